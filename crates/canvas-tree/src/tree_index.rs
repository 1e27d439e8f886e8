//! TreeIndex: durable map from normalized path to the layers bound there.

use crate::error::{Error, Result};
use crate::layer::LayerId;
use crate::path;
use crate::store::{Keyspace, KvStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const TREE_PREFIX: &str = "tree/";

/// Stored value of one path. `data` is caller metadata kept as JSON text so
/// the record stays a plain binary encoding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct NodeRecord {
    layer_ids: Vec<LayerId>,
    data: Option<String>,
}

/// A path and the ordered layers bound at it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    pub path: String,
    pub layer_ids: Vec<LayerId>,
    pub data: Option<serde_json::Value>,
}

impl TreeNode {
    pub fn new(path: impl Into<String>, layer_ids: Vec<LayerId>) -> Self {
        Self {
            path: path.into(),
            layer_ids,
            data: None,
        }
    }

    pub fn with_data(mut self, data: Option<serde_json::Value>) -> Self {
        self.data = data;
        self
    }

    pub fn name(&self) -> &str {
        path::basename(&self.path)
    }

    fn from_record(path: String, record: NodeRecord) -> Result<Self> {
        let data = match record.data {
            Some(text) => Some(
                serde_json::from_str(&text).map_err(|e| Error::InvalidData(e.to_string()))?,
            ),
            None => None,
        };
        Ok(Self {
            path,
            layer_ids: record.layer_ids,
            data,
        })
    }

    fn to_record(&self) -> Result<NodeRecord> {
        let data = match &self.data {
            Some(value) => {
                Some(serde_json::to_string(value).map_err(|e| Error::InvalidData(e.to_string()))?)
            }
            None => None,
        };
        Ok(NodeRecord {
            layer_ids: self.layer_ids.clone(),
            data,
        })
    }
}

#[derive(Clone)]
pub struct TreeIndex {
    nodes: Keyspace<NodeRecord>,
}

impl TreeIndex {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            nodes: Keyspace::new(store, TREE_PREFIX, "tree node"),
        }
    }

    pub fn get(&self, path: &str) -> Result<Option<TreeNode>> {
        match self.nodes.get(path)? {
            Some(record) => TreeNode::from_record(path.to_string(), record).map(Some),
            None => Ok(None),
        }
    }

    pub fn contains(&self, path: &str) -> Result<bool> {
        Ok(self.nodes.get(path)?.is_some())
    }

    pub fn layer_ids(&self, path: &str) -> Result<Option<Vec<LayerId>>> {
        Ok(self.nodes.get(path)?.map(|r| r.layer_ids))
    }

    pub fn put(&self, node: &TreeNode) -> Result<()> {
        Ok(self.nodes.put(&node.path, &node.to_record()?)?)
    }

    pub fn delete(&self, path: &str) -> Result<bool> {
        Ok(self.nodes.delete(path)?)
    }

    /// Proper descendants of `path`, lexicographic on the path string.
    pub fn list_descendants(&self, path: &str) -> Result<Vec<TreeNode>> {
        let prefix = path::descendant_prefix(path);
        let mut out = Vec::new();
        for (key, record) in self.nodes.scan(&prefix)? {
            if key == path {
                continue;
            }
            out.push(TreeNode::from_record(key, record)?);
        }
        Ok(out)
    }

    /// Proper ancestors of `path` that are present in the index, root first.
    pub fn list_ancestors(&self, path: &str) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for ancestor in path::ancestors(path) {
            if self.contains(&ancestor)? {
                out.push(ancestor);
            }
        }
        Ok(out)
    }

    pub fn list_all(&self) -> Result<Vec<TreeNode>> {
        let mut out = Vec::new();
        for (key, record) in self.nodes.scan("")? {
            out.push(TreeNode::from_record(key, record)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn index_with(paths: &[&str]) -> TreeIndex {
        let index = TreeIndex::new(Arc::new(MemoryStore::new()));
        for p in paths {
            index
                .put(&TreeNode::new(*p, vec![LayerId::from(*p)]))
                .unwrap();
        }
        index
    }

    #[test]
    fn test_descendants_stop_at_segment_boundary() {
        let index = index_with(&["/", "/work", "/work/a", "/work/a/b", "/workshop"]);
        let paths: Vec<_> = index
            .list_descendants("/work")
            .unwrap()
            .into_iter()
            .map(|n| n.path)
            .collect();
        assert_eq!(paths, vec!["/work/a", "/work/a/b"]);

        let all = index.list_descendants("/").unwrap();
        assert_eq!(all.len(), 4);
    }

    #[test]
    fn test_ancestors_root_first() {
        let index = index_with(&["/", "/a", "/a/b", "/a/b/c"]);
        assert_eq!(index.list_ancestors("/a/b/c").unwrap(), vec!["/", "/a", "/a/b"]);
        assert!(index.list_ancestors("/").unwrap().is_empty());
    }

    #[test]
    fn test_node_data_roundtrip() {
        let index = TreeIndex::new(Arc::new(MemoryStore::new()));
        let node = TreeNode::new("/a", vec![LayerId::from("l1"), LayerId::from("l2")])
            .with_data(Some(json!({"color": "#ff0000", "pinned": true})));
        index.put(&node).unwrap();

        assert_eq!(index.get("/a").unwrap(), Some(node));
        assert_eq!(
            index.layer_ids("/a").unwrap(),
            Some(vec![LayerId::from("l1"), LayerId::from("l2")])
        );
        assert!(index.delete("/a").unwrap());
        assert!(index.get("/a").unwrap().is_none());
    }
}
