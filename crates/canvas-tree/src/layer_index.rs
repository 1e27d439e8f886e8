//! LayerIndex: durable registry of layer records keyed by layer id.
//!
//! `put` is a full overwrite; callers read-modify-write. Lock state is just
//! another field here, enforcement lives in [`Layer`] and the tree's guards.
//!
//! Names are not unique, so a second keyspace maps `<kind>/<name>` to the ids
//! carrying that name in registration order. Lookups by name read one list
//! and the records it points at instead of decoding every layer.

use crate::error::Result;
use crate::layer::{Layer, LayerId, LayerKind};
use crate::store::{Keyspace, KvStore};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

const LAYER_PREFIX: &str = "layers/";
const NAME_PREFIX: &str = "names/";

fn name_key(kind: LayerKind, name: &str) -> String {
    format!("{}/{}", kind.as_str(), name)
}

#[derive(Clone)]
pub struct LayerIndex {
    records: Keyspace<Layer>,
    names: Keyspace<Vec<LayerId>>,
    /// Name lists are shared between layers; their read-modify-write is serialized.
    names_lock: Arc<Mutex<()>>,
}

impl LayerIndex {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            records: Keyspace::new(Arc::clone(&store), LAYER_PREFIX, "layer"),
            names: Keyspace::new(store, NAME_PREFIX, "layer name list"),
            names_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn get(&self, id: &LayerId) -> Result<Option<Layer>> {
        Ok(self.records.get(id.as_str())?)
    }

    /// Write the record and register it under its current name.
    pub fn put(&self, layer: &Layer) -> Result<()> {
        self.records.put(layer.id().as_str(), layer)?;
        self.register(layer.kind(), layer.name(), layer.id())
    }

    /// Overwrite a record whose name or kind may differ from `previous`.
    /// The new name is registered before the old one is dropped.
    pub fn replace(&self, previous: (LayerKind, &str), layer: &Layer) -> Result<()> {
        self.put(layer)?;
        if previous != (layer.kind(), layer.name()) {
            self.unregister(previous.0, previous.1, layer.id())?;
        }
        Ok(())
    }

    pub fn delete(&self, id: &LayerId) -> Result<bool> {
        let Some(layer) = self.get(id)? else {
            return Ok(false);
        };
        self.records.delete(id.as_str())?;
        self.unregister(layer.kind(), layer.name(), id)?;
        Ok(true)
    }

    pub fn list_all(&self) -> Result<Vec<Layer>> {
        Ok(self
            .records
            .scan("")?
            .into_iter()
            .map(|(_, layer)| layer)
            .collect())
    }

    /// Ids registered under `name` for `kind`, oldest registration first.
    pub fn ids_named(&self, name: &str, kind: LayerKind) -> Result<Vec<LayerId>> {
        Ok(self.names.get(&name_key(kind, name))?.unwrap_or_default())
    }

    /// The earliest registered layer of `kind` carrying `name`.
    pub fn find_by_name_and_kind(&self, name: &str, kind: LayerKind) -> Result<Option<Layer>> {
        for id in self.ids_named(name, kind)? {
            match self.get(&id)? {
                Some(layer) if layer.kind() == kind && layer.name() == name => {
                    return Ok(Some(layer))
                }
                _ => tracing::warn!(layer = %id, name, "stale layer name entry"),
            }
        }
        Ok(None)
    }

    /// First layer carrying `name`, trying kinds in [`LayerKind::ALL`] order.
    pub fn find_by_name(&self, name: &str) -> Result<Option<Layer>> {
        for kind in LayerKind::ALL {
            if let Some(layer) = self.find_by_name_and_kind(name, kind)? {
                return Ok(Some(layer));
            }
        }
        Ok(None)
    }

    fn register(&self, kind: LayerKind, name: &str, id: &LayerId) -> Result<()> {
        let _names = self.names_lock.lock();
        let key = name_key(kind, name);
        let mut ids = self.names.get(&key)?.unwrap_or_default();
        if !ids.contains(id) {
            ids.push(id.clone());
            self.names.put(&key, &ids)?;
        }
        Ok(())
    }

    fn unregister(&self, kind: LayerKind, name: &str, id: &LayerId) -> Result<()> {
        let _names = self.names_lock.lock();
        let key = name_key(kind, name);
        let Some(mut ids) = self.names.get(&key)? else {
            return Ok(());
        };
        ids.retain(|registered| registered != id);
        if ids.is_empty() {
            self.names.delete(&key)?;
        } else {
            self.names.put(&key, &ids)?;
        }
        Ok(())
    }

    /// Bring the name lists in line with the records: drop stale ids and
    /// append unregistered layers by creation time. Lists that already match
    /// are not rewritten. Returns the number of lists written or deleted.
    pub fn reconcile_names(&self) -> Result<usize> {
        let _names = self.names_lock.lock();
        let layers = self.list_all()?;
        let mut expected: BTreeMap<String, Vec<&Layer>> = BTreeMap::new();
        for layer in &layers {
            expected
                .entry(name_key(layer.kind(), layer.name()))
                .or_default()
                .push(layer);
        }
        let mut stored: BTreeMap<String, Vec<LayerId>> = self.names.scan("")?.into_iter().collect();

        let mut written = 0;
        for (key, mut members) in expected {
            let current = stored.remove(&key).unwrap_or_default();
            let mut ids: Vec<LayerId> = current
                .iter()
                .filter(|id| members.iter().any(|l| l.id() == *id))
                .cloned()
                .collect();
            members.sort_by(|a, b| (a.created_at(), a.id()).cmp(&(b.created_at(), b.id())));
            for layer in members {
                if !ids.contains(layer.id()) {
                    ids.push(layer.id().clone());
                }
            }
            if ids != current {
                self.names.put(&key, &ids)?;
                written += 1;
            }
        }
        for key in stored.keys() {
            self.names.delete(key)?;
            written += 1;
        }

        if written > 0 {
            tracing::info!(lists = written, "reconciled layer name index");
        }
        Ok(written)
    }
}
