//! Bitmap propagation: merge/subtract up/down the tree and across layers.
//!
//! All path-based propagation works on the source path's effective bitmap
//! (union of its bound layers). Targets that are locked by someone else or
//! missing are skipped and reported; a store failure aborts the call. Nothing
//! is applied when the source lookup fails. Application across targets is
//! not transactional.

use crate::bitmap::DocumentSet;
use crate::error::{Error, ErrorKind, Result};
use crate::layer::{Actor, Layer, LayerId};
use crate::tree::Tree;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SetOp {
    Union,
    Difference,
}

impl SetOp {
    fn apply(self, layer: &mut Layer, bits: &DocumentSet, actor: &Actor) -> Result<()> {
        match self {
            SetOp::Union => layer.merge(bits, actor),
            SetOp::Difference => layer.subtract(bits, actor),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

/// One target that could not be updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetFailure {
    pub layer_id: LayerId,
    /// Tree path the target was reached through, for path propagation.
    pub path: Option<String>,
    pub kind: ErrorKind,
    pub message: String,
}

/// Outcome of a propagation: which targets changed and which were skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropagationReport {
    pub updated: Vec<LayerId>,
    pub failures: Vec<TargetFailure>,
}

/// Some targets failed; the rest were updated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialFailure {
    pub updated: Vec<LayerId>,
    pub failures: Vec<TargetFailure>,
}

impl fmt::Display for PartialFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} targets failed",
            self.failures.len(),
            self.failures.len() + self.updated.len()
        )
    }
}

impl std::error::Error for PartialFailure {}

impl PropagationReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn target_count(&self) -> usize {
        self.updated.len() + self.failures.len()
    }

    pub fn into_result(self) -> std::result::Result<Vec<LayerId>, PartialFailure> {
        if self.failures.is_empty() {
            Ok(self.updated)
        } else {
            Err(PartialFailure {
                updated: self.updated,
                failures: self.failures,
            })
        }
    }
}

impl Tree {
    /// OR the effective bitmap at `path` into every layer of every ancestor.
    pub fn merge_up(&self, path: &str, actor: &Actor) -> Result<PropagationReport> {
        self.propagate(path, Direction::Up, SetOp::Union, actor)
    }

    /// OR the effective bitmap at `path` into every layer of every descendant.
    pub fn merge_down(&self, path: &str, actor: &Actor) -> Result<PropagationReport> {
        self.propagate(path, Direction::Down, SetOp::Union, actor)
    }

    /// Remove the ids of `path`'s effective bitmap from every ancestor.
    pub fn subtract_up(&self, path: &str, actor: &Actor) -> Result<PropagationReport> {
        self.propagate(path, Direction::Up, SetOp::Difference, actor)
    }

    /// Remove the ids of `path`'s effective bitmap from every descendant.
    pub fn subtract_down(&self, path: &str, actor: &Actor) -> Result<PropagationReport> {
        self.propagate(path, Direction::Down, SetOp::Difference, actor)
    }

    /// Union `source` into each target, independent of tree adjacency.
    pub fn merge_layer(
        &self,
        source: &LayerId,
        targets: &[LayerId],
        actor: &Actor,
    ) -> Result<PropagationReport> {
        self.cross_layer(source, targets, SetOp::Union, actor)
    }

    /// AND-NOT `source` from each target.
    pub fn subtract_layer(
        &self,
        source: &LayerId,
        targets: &[LayerId],
        actor: &Actor,
    ) -> Result<PropagationReport> {
        self.cross_layer(source, targets, SetOp::Difference, actor)
    }

    fn propagate(
        &self,
        raw: &str,
        direction: Direction,
        op: SetOp,
        actor: &Actor,
    ) -> Result<PropagationReport> {
        let path = self.normalize(raw)?;
        let source = self.require_node(&path)?;
        let bits = self.union_of(&source.layer_ids)?;

        let reached: Vec<(String, Vec<LayerId>)> = match direction {
            Direction::Up => {
                let mut out = Vec::new();
                for ancestor in self.nodes.list_ancestors(&path)? {
                    if let Some(ids) = self.nodes.layer_ids(&ancestor)? {
                        out.push((ancestor, ids));
                    }
                }
                out
            }
            Direction::Down => self
                .nodes
                .list_descendants(&path)?
                .into_iter()
                .map(|node| (node.path, node.layer_ids))
                .collect(),
        };

        // Shared layers are updated once; the source's own layers never.
        let mut seen: HashSet<LayerId> = source.layer_ids.iter().cloned().collect();
        let mut targets = Vec::new();
        for (node_path, ids) in reached {
            for id in ids {
                if seen.insert(id.clone()) {
                    targets.push((Some(node_path.clone()), id));
                }
            }
        }

        let report = self.apply_to_targets(&bits, targets, op, actor)?;
        tracing::debug!(
            path = %path,
            ?direction,
            ?op,
            documents = bits.len(),
            updated = report.updated.len(),
            failed = report.failures.len(),
            "propagated bitmap"
        );
        Ok(report)
    }

    fn cross_layer(
        &self,
        source: &LayerId,
        targets: &[LayerId],
        op: SetOp,
        actor: &Actor,
    ) -> Result<PropagationReport> {
        let bits = self
            .layers
            .get(source)?
            .ok_or_else(|| Error::LayerNotFound(source.to_string()))?
            .documents()
            .clone();

        let mut seen = HashSet::new();
        let targets = targets
            .iter()
            .filter(|id| seen.insert((*id).clone()))
            .map(|id| (None, id.clone()))
            .collect();

        let report = self.apply_to_targets(&bits, targets, op, actor)?;
        tracing::debug!(
            source = %source,
            ?op,
            updated = report.updated.len(),
            failed = report.failures.len(),
            "applied cross-layer operation"
        );
        Ok(report)
    }

    fn apply_to_targets(
        &self,
        bits: &DocumentSet,
        targets: Vec<(Option<String>, LayerId)>,
        op: SetOp,
        actor: &Actor,
    ) -> Result<PropagationReport> {
        let mut report = PropagationReport::default();
        for (path, id) in targets {
            match self.with_layer_mut(&id, |layer| op.apply(layer, bits, actor)) {
                Ok(_) => report.updated.push(id),
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    tracing::warn!(layer = %id, path = ?path, error = %err, "skipped propagation target");
                    report.failures.push(TargetFailure {
                        layer_id: id,
                        path,
                        kind: err.kind(),
                        message: err.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }
}
