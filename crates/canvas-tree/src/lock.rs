//! In-process write guards, one per layer id.
//!
//! The lock fields on [`Layer`](crate::Layer) are advisory data; these guards
//! are what keeps two writers from interleaving a read-modify-write of the
//! same layer record. Lock order: the tree structure mutex first, then at
//! most one layer guard at a time.

use crate::layer::LayerId;
use dashmap::DashMap;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};
use std::sync::Arc;

#[derive(Default)]
pub struct LayerGuards {
    guards: DashMap<LayerId, Arc<Mutex<()>>>,
}

/// Held for the duration of one layer write.
pub struct LayerWriteGuard {
    _guard: ArcMutexGuard<RawMutex, ()>,
}

impl LayerGuards {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: &LayerId) -> Arc<Mutex<()>> {
        // Clone the Arc out so the shard lock is not held while blocking.
        Arc::clone(
            self.guards
                .entry(id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    pub fn acquire(&self, id: &LayerId) -> LayerWriteGuard {
        LayerWriteGuard {
            _guard: Mutex::lock_arc(&self.slot(id)),
        }
    }

    /// Drop the slot of a destroyed layer.
    pub fn forget(&self, id: &LayerId) {
        self.guards.remove(id);
    }

    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}
