//! Canvas Tree: a hierarchical path namespace over lockable document-id bitmaps.
//!
//! Paths such as `/work/projects/alpha` are bound to one or more *layers*; a
//! layer is a named set of document ids stored as a Roaring bitmap. Querying a
//! path returns the union of its layers. Set algebra between layers, and
//! along the ancestor/descendant axis of the tree, is how documents get
//! tagged into several contexts at once.
//!
//! ```text
//!   path namespace                layers (shared, by id)
//!   ──────────────                ───────────────────────
//!   /            ──────────────▶  universe  {1,2,3,4,5}
//!   /work        ──────────────▶  work      {1,2,3}
//!   /work/alpha  ──┬───────────▶  alpha     {1,2}
//!   /home/alpha  ──┘
//!                                 urgent    {2,5}     (feature, unbound)
//! ```
//!
//! ## Module Organization
//!
//! - `store`: key-value backends (in-memory and append-only log file)
//! - `layer` / `layer_index`: layer records and their keyspace
//! - `tree` / `tree_index`: path structure and its keyspace
//! - `propagate`: merge/subtract up, down and across layers
//! - `consumer`: workspace and context views with feature filtering
//! - `view`: nested snapshot of the whole tree

pub mod bitmap;
pub mod config;
pub mod consumer;
pub mod error;
pub mod layer;
pub mod layer_index;
mod lock;
pub mod path;
pub mod propagate;
pub mod store;
pub mod tree;
pub mod tree_index;
pub mod view;

pub use bitmap::{document_set, union_all, DocumentId, DocumentSet};
pub use config::{StoreBackend, StoreConfig, TreeConfig};
pub use consumer::{Context, DocumentStore, Workspace};
pub use error::{Error, ErrorKind, Result, StoreError};
pub use layer::{Actor, Layer, LayerId, LayerKind, LayerPatch, LayerSpec, LayerSummary, LockState};
pub use layer_index::LayerIndex;
pub use propagate::{PartialFailure, PropagationReport, TargetFailure};
pub use store::{open_store, KvStore, LogStore, MemoryStore};
pub use tree::Tree;
pub use tree_index::{TreeIndex, TreeNode};
pub use view::TreeView;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_bitmap_is_union_of_bound_layers() {
        let tree = Tree::in_memory().unwrap();
        tree.insert_path("/work", None, true).unwrap();
        let work = tree.layers_at("/work").unwrap()[0].id().clone();
        let urgent = tree
            .create_layer(LayerSpec::new("urgent").kind(LayerKind::Feature))
            .unwrap();

        tree.add_documents(&work, [1, 2], &Actor::Anonymous).unwrap();
        tree.add_documents(urgent.id(), [2, 5], &Actor::Anonymous)
            .unwrap();
        tree.bind_layer("/work", urgent.id()).unwrap();

        let bits = tree.effective_bitmap("/work").unwrap();
        assert_eq!(bits, document_set([1, 2, 5]));
    }
}
