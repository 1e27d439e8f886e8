//! Nested, serializable view of the whole tree (`GET .../tree`).

use crate::error::Result;
use crate::layer::{LayerId, LayerSummary};
use crate::path::{self, ROOT};
use crate::tree::Tree;
use crate::tree_index::TreeNode;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeView {
    pub path: String,
    pub name: String,
    pub layers: Vec<LayerSummary>,
    pub data: Option<serde_json::Value>,
    pub children: Vec<TreeView>,
}

impl TreeView {
    /// Number of nodes in this subtree, itself included.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(TreeView::node_count).sum::<usize>()
    }

    pub fn find(&self, path: &str) -> Option<&TreeView> {
        if self.path == path {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(path))
    }
}

impl Tree {
    pub fn snapshot(&self) -> Result<TreeView> {
        let summaries: HashMap<_, _> = self
            .list_all_layers()?
            .into_iter()
            .map(|layer| (layer.id().clone(), layer.summary()))
            .collect();

        let mut nodes: BTreeMap<String, TreeNode> = self
            .nodes
            .list_all()?
            .into_iter()
            .map(|node| (node.path.clone(), node))
            .collect();

        let mut children: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for node_path in nodes.keys() {
            if path::is_root(node_path) {
                continue;
            }
            // Attach to the nearest stored ancestor.
            let mut parent = path::parent(node_path);
            while let Some(p) = parent {
                if nodes.contains_key(p) {
                    break;
                }
                parent = path::parent(p);
            }
            let parent = parent.unwrap_or(ROOT);
            children
                .entry(parent.to_string())
                .or_default()
                .push(node_path.clone());
        }

        Ok(build(ROOT, &mut nodes, &children, &summaries))
    }
}

fn build(
    node_path: &str,
    nodes: &mut BTreeMap<String, TreeNode>,
    children: &BTreeMap<String, Vec<String>>,
    summaries: &HashMap<LayerId, LayerSummary>,
) -> TreeView {
    let node = nodes
        .remove(node_path)
        .unwrap_or_else(|| TreeNode::new(node_path, Vec::new()));
    let layers = node
        .layer_ids
        .iter()
        .filter_map(|id| summaries.get(id).cloned())
        .collect();
    let kids = children
        .get(node_path)
        .map(|paths| {
            paths
                .iter()
                .map(|child| build(child, nodes, children, summaries))
                .collect()
        })
        .unwrap_or_default();

    TreeView {
        name: node.name().to_string(),
        path: node.path,
        layers,
        data: node.data,
        children: kids,
    }
}
