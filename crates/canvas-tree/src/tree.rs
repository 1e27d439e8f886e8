//! Tree: path structure over the two indexes.
//!
//! The tree owns the path↔layer binding; layer bitmaps are shared by every
//! path that binds them. Multi-key operations are not atomic across keys:
//! they write new keys before deleting old ones so an interrupted move leaves
//! duplicates rather than holes.

use crate::bitmap::{DocumentId, DocumentSet};
use crate::config::TreeConfig;
use crate::error::{Error, Result};
use crate::layer::{Actor, Layer, LayerId, LayerKind, LayerPatch, LayerSpec};
use crate::layer_index::LayerIndex;
use crate::lock::LayerGuards;
use crate::path::{self, ROOT};
use crate::store::{open_store, KvStore};
use crate::tree_index::{TreeIndex, TreeNode};
use parking_lot::Mutex;
use std::sync::Arc;

pub struct Tree {
    config: TreeConfig,
    pub(crate) layers: LayerIndex,
    pub(crate) nodes: TreeIndex,
    guards: LayerGuards,
    /// Serializes path-structure mutations.
    structure: Mutex<()>,
    root_layer: LayerId,
}

impl Tree {
    /// Open the store described by `config.store` and the tree inside it.
    pub fn from_config(config: TreeConfig) -> Result<Self> {
        let store = open_store(&config.store)?;
        Self::open(store, config)
    }

    /// Open a tree over a shared store (`layers/*` and `tree/*` keyspaces).
    pub fn open(store: Arc<dyn KvStore>, config: TreeConfig) -> Result<Self> {
        Self::with_indexes(
            LayerIndex::new(Arc::clone(&store)),
            TreeIndex::new(store),
            config,
        )
    }

    pub fn in_memory() -> Result<Self> {
        Self::from_config(TreeConfig::default())
    }

    pub fn with_indexes(layers: LayerIndex, nodes: TreeIndex, config: TreeConfig) -> Result<Self> {
        let root_layer = match nodes.get(ROOT)?.and_then(|n| n.layer_ids.first().cloned()) {
            Some(id) => id,
            None => {
                let layer = Layer::with_spec(
                    LayerSpec::new(config.root_layer_name.clone()).kind(LayerKind::Universe),
                );
                layers.put(&layer)?;
                nodes.put(&TreeNode::new(ROOT, vec![layer.id().clone()]))?;
                tracing::info!(layer = %layer.id(), "created root node");
                layer.id().clone()
            }
        };
        layers.reconcile_names()?;

        Ok(Self {
            config,
            layers,
            nodes,
            guards: LayerGuards::new(),
            structure: Mutex::new(()),
            root_layer,
        })
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    pub fn layer_index(&self) -> &LayerIndex {
        &self.layers
    }

    pub fn tree_index(&self) -> &TreeIndex {
        &self.nodes
    }

    pub fn root_layer_id(&self) -> &LayerId {
        &self.root_layer
    }

    pub(crate) fn normalize(&self, raw: &str) -> Result<String> {
        let normalized = path::normalize(raw)?;
        if path::depth(&normalized) > self.config.max_path_depth {
            return Err(Error::InvalidPath {
                path: raw.to_string(),
                reason: "path exceeds the maximum depth",
            });
        }
        Ok(normalized)
    }

    pub(crate) fn require_node(&self, path: &str) -> Result<TreeNode> {
        self.nodes
            .get(path)?
            .ok_or_else(|| Error::PathNotFound(path.to_string()))
    }

    fn require_layer(&self, id: &LayerId) -> Result<Layer> {
        self.layers
            .get(id)?
            .ok_or_else(|| Error::LayerNotFound(id.to_string()))
    }

    // ========================================================================
    // Path structure
    // ========================================================================

    pub fn path_exists(&self, raw: &str) -> Result<bool> {
        let path = self.normalize(raw)?;
        self.nodes.contains(&path)
    }

    pub fn get_node(&self, raw: &str) -> Result<Option<TreeNode>> {
        let path = self.normalize(raw)?;
        self.nodes.get(&path)
    }

    /// Every path in the tree, sorted.
    pub fn paths(&self) -> Result<Vec<String>> {
        Ok(self.nodes.list_all()?.into_iter().map(|n| n.path).collect())
    }

    /// Bind a fresh layer named after the last segment of `path`.
    fn create_node(&self, path: &str, data: Option<serde_json::Value>) -> Result<TreeNode> {
        let layer = Layer::create(path::basename(path));
        self.layers.put(&layer)?;
        let node = TreeNode::new(path, vec![layer.id().clone()]).with_data(data);
        self.nodes.put(&node)?;
        tracing::debug!(path, layer = %layer.id(), "created tree node");
        Ok(node)
    }

    fn ensure_ancestors(&self, path: &str, auto_create_layers: bool) -> Result<()> {
        for ancestor in path::ancestors(path) {
            if self.nodes.contains(&ancestor)? {
                continue;
            }
            if !auto_create_layers {
                return Err(Error::PathNotFound(ancestor));
            }
            self.create_node(&ancestor, None)?;
        }
        Ok(())
    }

    /// Insert `path`, creating missing ancestors when `auto_create_layers`.
    ///
    /// Inserting an existing path is a no-op that returns the stored node.
    /// Without auto-creation a missing leaf binds the earliest registered
    /// segment layer ([`LayerKind::SEGMENT`], in that order) named after its
    /// last segment. Feature and label layers are never bound this way.
    pub fn insert_path(
        &self,
        raw: &str,
        data: Option<serde_json::Value>,
        auto_create_layers: bool,
    ) -> Result<TreeNode> {
        let _structure = self.structure.lock();
        let path = self.normalize(raw)?;
        if let Some(node) = self.nodes.get(&path)? {
            return Ok(node);
        }

        self.ensure_ancestors(&path, auto_create_layers)?;
        if auto_create_layers {
            return self.create_node(&path, data);
        }

        let name = path::basename(&path);
        let layer = self
            .find_segment_layer(name)?
            .ok_or_else(|| Error::LayerNotFound(name.to_string()))?;
        let node = TreeNode::new(path.clone(), vec![layer.id().clone()]).with_data(data);
        self.nodes.put(&node)?;
        tracing::debug!(path = %path, layer = %layer.id(), "bound existing layer");
        Ok(node)
    }

    fn find_segment_layer(&self, name: &str) -> Result<Option<Layer>> {
        for kind in LayerKind::SEGMENT {
            if let Some(layer) = self.layers.find_by_name_and_kind(name, kind)? {
                return Ok(Some(layer));
            }
        }
        Ok(None)
    }

    /// Rebind `from` (and, when `recursive`, its subtree) to `to`.
    /// Returns the number of nodes moved.
    pub fn move_path(&self, from: &str, to: &str, recursive: bool) -> Result<usize> {
        self.relocate(from, to, recursive, false)
    }

    /// Alias `from` at `to`: the new nodes reference the same layer ids.
    /// A non-recursive copy copies the single node. Returns the number of
    /// nodes created.
    pub fn copy_path(&self, from: &str, to: &str, recursive: bool) -> Result<usize> {
        self.relocate(from, to, recursive, true)
    }

    fn relocate(&self, from: &str, to: &str, recursive: bool, keep_source: bool) -> Result<usize> {
        let _structure = self.structure.lock();
        let from = self.normalize(from)?;
        let to = self.normalize(to)?;

        if path::is_root(&from) {
            return Err(Error::InvalidPath {
                path: from,
                reason: "the root path cannot be moved or copied",
            });
        }
        if from == to || path::is_descendant(&to, &from) {
            return Err(Error::InvalidPath {
                path: to,
                reason: "destination lies inside the source subtree",
            });
        }

        let source = self.require_node(&from)?;
        let mut descendants = self.nodes.list_descendants(&from)?;
        if !recursive && !descendants.is_empty() {
            if keep_source {
                descendants.clear();
            } else {
                return Err(Error::NonRecursiveMove(from));
            }
        }

        let mut plan = Vec::with_capacity(descendants.len() + 1);
        plan.push(source);
        plan.extend(descendants);

        let mut targets = Vec::with_capacity(plan.len());
        for node in &plan {
            let target = path::rebase(&node.path, &from, &to);
            if path::depth(&target) > self.config.max_path_depth {
                return Err(Error::InvalidPath {
                    path: target,
                    reason: "path exceeds the maximum depth",
                });
            }
            if self.nodes.contains(&target)? {
                return Err(Error::PathExists(target));
            }
            targets.push(target);
        }

        self.ensure_ancestors(&to, true)?;
        for (node, target) in plan.iter().zip(&targets) {
            let mut moved = node.clone();
            moved.path = target.clone();
            self.nodes.put(&moved)?;
        }
        if !keep_source {
            // Lexicographic order puts parents first; delete children first.
            for node in plan.iter().rev() {
                self.nodes.delete(&node.path)?;
            }
        }

        tracing::debug!(
            from = %from,
            to = %to,
            nodes = plan.len(),
            copy = keep_source,
            "relocated subtree"
        );
        Ok(plan.len())
    }

    /// Delete `path` (and its subtree when `recursive`). Layers are never
    /// deleted here. Returns the number of nodes removed.
    pub fn remove_path(&self, raw: &str, recursive: bool) -> Result<usize> {
        let _structure = self.structure.lock();
        let path = self.normalize(raw)?;
        if path::is_root(&path) {
            return Err(Error::InvalidPath {
                path,
                reason: "the root path cannot be removed",
            });
        }

        self.require_node(&path)?;
        let descendants = self.nodes.list_descendants(&path)?;
        if !recursive && !descendants.is_empty() {
            return Err(Error::NonRecursiveRemove(path));
        }

        for node in descendants.iter().rev() {
            self.nodes.delete(&node.path)?;
        }
        self.nodes.delete(&path)?;

        tracing::debug!(path = %path, nodes = descendants.len() + 1, "removed subtree");
        Ok(descendants.len() + 1)
    }

    // ========================================================================
    // Layers
    // ========================================================================

    /// Create an unbound layer, e.g. a feature tag.
    pub fn create_layer(&self, spec: LayerSpec) -> Result<Layer> {
        let layer = Layer::with_spec(spec);
        self.layers.put(&layer)?;
        tracing::debug!(layer = %layer.id(), name = layer.name(), "created layer");
        Ok(layer)
    }

    /// The layer of `kind` named `name`, created when absent.
    pub fn ensure_layer(&self, name: &str, kind: LayerKind) -> Result<Layer> {
        let _structure = self.structure.lock();
        if let Some(layer) = self.layers.find_by_name_and_kind(name, kind)? {
            return Ok(layer);
        }
        self.create_layer(LayerSpec::new(name).kind(kind))
    }

    /// First layer named `name` of any kind; see [`LayerIndex::find_by_name`].
    pub fn get_layer(&self, name: &str) -> Result<Option<Layer>> {
        self.layers.find_by_name(name)
    }

    /// Earliest registered layer of `kind` named `name`.
    pub fn find_layer(&self, name: &str, kind: LayerKind) -> Result<Option<Layer>> {
        self.layers.find_by_name_and_kind(name, kind)
    }

    pub fn get_layer_by_id(&self, id: &LayerId) -> Result<Option<Layer>> {
        self.layers.get(id)
    }

    pub fn list_all_layers(&self) -> Result<Vec<Layer>> {
        self.layers.list_all()
    }

    /// Layers bound at `path`, in binding order.
    pub fn layers_at(&self, raw: &str) -> Result<Vec<Layer>> {
        let path = self.normalize(raw)?;
        let node = self.require_node(&path)?;
        let mut out = Vec::with_capacity(node.layer_ids.len());
        for id in &node.layer_ids {
            out.push(self.require_layer(id)?);
        }
        Ok(out)
    }

    /// Read-modify-write of one layer under its write guard.
    pub(crate) fn with_layer_mut<F>(&self, id: &LayerId, f: F) -> Result<Layer>
    where
        F: FnOnce(&mut Layer) -> Result<()>,
    {
        let _guard = self.guards.acquire(id);
        let mut layer = self.require_layer(id)?;
        let previous_name = layer.name().to_string();
        let previous_kind = layer.kind();
        f(&mut layer)?;
        self.layers.replace((previous_kind, &previous_name), &layer)?;
        Ok(layer)
    }

    pub fn rename_layer(&self, id: &LayerId, new_name: &str, actor: &Actor) -> Result<Layer> {
        self.with_layer_mut(id, |layer| layer.rename(new_name, actor))
    }

    pub fn update_layer(&self, id: &LayerId, patch: LayerPatch, actor: &Actor) -> Result<Layer> {
        self.with_layer_mut(id, |layer| layer.update(patch, actor))
    }

    pub fn lock_layer(&self, id: &LayerId, holder: &str) -> Result<Layer> {
        self.with_layer_mut(id, |layer| layer.lock(holder))
    }

    pub fn unlock_layer(&self, id: &LayerId, actor: &Actor) -> Result<Layer> {
        self.with_layer_mut(id, |layer| layer.unlock(actor))
    }

    pub fn add_documents<I>(&self, id: &LayerId, ids: I, actor: &Actor) -> Result<Layer>
    where
        I: IntoIterator<Item = DocumentId>,
    {
        self.with_layer_mut(id, |layer| layer.add_documents(ids, actor))
    }

    pub fn remove_documents<I>(&self, id: &LayerId, ids: I, actor: &Actor) -> Result<Layer>
    where
        I: IntoIterator<Item = DocumentId>,
    {
        self.with_layer_mut(id, |layer| layer.remove_documents(ids, actor))
    }

    /// Bind an existing layer at another path as well.
    pub fn bind_layer(&self, raw: &str, id: &LayerId) -> Result<TreeNode> {
        let _structure = self.structure.lock();
        let path = self.normalize(raw)?;
        let mut node = self.require_node(&path)?;
        self.require_layer(id)?;
        if !node.layer_ids.contains(id) {
            node.layer_ids.push(id.clone());
            self.nodes.put(&node)?;
        }
        Ok(node)
    }

    /// Remove one path↔layer binding; the layer record is kept.
    pub fn detach_layer(&self, raw: &str, id: &LayerId) -> Result<TreeNode> {
        let _structure = self.structure.lock();
        let path = self.normalize(raw)?;
        if path::is_root(&path) && *id == self.root_layer {
            return Err(Error::ProtectedLayer(id.clone()));
        }
        let mut node = self.require_node(&path)?;
        if !node.layer_ids.contains(id) {
            return Err(Error::LayerNotFound(id.to_string()));
        }
        node.layer_ids.retain(|bound| bound != id);
        self.nodes.put(&node)?;
        Ok(node)
    }

    /// Detach `id` from every path and destroy the record.
    /// Returns the number of paths it was detached from.
    pub fn delete_layer(&self, id: &LayerId, actor: &Actor) -> Result<usize> {
        if *id == self.root_layer {
            return Err(Error::ProtectedLayer(id.clone()));
        }
        let _structure = self.structure.lock();
        let guard = self.guards.acquire(id);
        self.require_layer(id)?.ensure_writable(actor)?;

        let mut detached = 0;
        for mut node in self.nodes.list_all()? {
            if node.layer_ids.contains(id) {
                node.layer_ids.retain(|bound| bound != id);
                self.nodes.put(&node)?;
                detached += 1;
            }
        }
        self.layers.delete(id)?;
        drop(guard);
        self.guards.forget(id);

        tracing::debug!(layer = %id, detached, "deleted layer");
        Ok(detached)
    }

    /// Union of the bitmaps of every layer bound at `path`.
    pub fn effective_bitmap(&self, raw: &str) -> Result<DocumentSet> {
        let path = self.normalize(raw)?;
        let node = self.require_node(&path)?;
        self.union_of(&node.layer_ids)
    }

    pub(crate) fn union_of(&self, ids: &[LayerId]) -> Result<DocumentSet> {
        let mut out = DocumentSet::new();
        for id in ids {
            match self.layers.get(id)? {
                Some(layer) => out |= layer.documents(),
                None => tracing::warn!(layer = %id, "tree references a missing layer"),
            }
        }
        Ok(out)
    }
}
