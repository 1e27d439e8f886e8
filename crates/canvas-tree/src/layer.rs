//! Layer: an identified, nameable, lockable set of document ids.
//!
//! Lock state machine:
//!
//! ```text
//!   Unlocked --lock(h)--> LockedBy(h)
//!   LockedBy(h) --lock(h)--> LockedBy(h)      (re-entrant)
//!   LockedBy(h) --unlock(h)--> Unlocked
//!   LockedBy(h') + any mutation by h != h'    -> error, no state change
//! ```
//!
//! Locks guard mutation only; reads are never blocked. [`Actor::Admin`] is the
//! administrative override: it may mutate and unlock any layer.

use crate::bitmap::{serde_bytes, DocumentId, DocumentSet};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identity
// ============================================================================

/// Stable layer identifier, immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerId(String);

impl LayerId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LayerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for LayerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Layer flavours carried over from the canvas data model. The kind is
/// metadata: every kind is a plain document-id set to the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    /// The root layer bound at `/`.
    Universe,
    /// Path segment layers (default).
    #[default]
    Context,
    /// Feature tags, usually unbound.
    Feature,
    Label,
    Canvas,
    Workspace,
}

impl LayerKind {
    /// Lookup precedence for name resolution that ignores kind.
    pub const ALL: [LayerKind; 6] = [
        LayerKind::Universe,
        LayerKind::Context,
        LayerKind::Feature,
        LayerKind::Label,
        LayerKind::Canvas,
        LayerKind::Workspace,
    ];

    /// Kinds a path segment may bind by name.
    pub const SEGMENT: [LayerKind; 3] = [LayerKind::Context, LayerKind::Canvas, LayerKind::Workspace];

    pub fn as_str(self) -> &'static str {
        match self {
            LayerKind::Universe => "universe",
            LayerKind::Context => "context",
            LayerKind::Feature => "feature",
            LayerKind::Label => "label",
            LayerKind::Canvas => "canvas",
            LayerKind::Workspace => "workspace",
        }
    }
}

/// Who is calling a mutating operation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Actor {
    #[default]
    Anonymous,
    Holder(String),
    Admin,
}

impl Actor {
    pub fn holder(id: impl Into<String>) -> Self {
        Actor::Holder(id.into())
    }

    pub fn holder_id(&self) -> Option<&str> {
        match self {
            Actor::Holder(id) => Some(id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LockState {
    #[default]
    Unlocked,
    LockedBy(String),
}

// ============================================================================
// Layer
// ============================================================================

/// Creation parameters for [`Layer::with_spec`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayerSpec {
    pub name: String,
    #[serde(default)]
    pub kind: LayerKind,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

impl LayerSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn kind(mut self, kind: LayerKind) -> Self {
        self.kind = kind;
        self
    }
}

/// Rename plus presentation metadata in one mutation; `None` leaves a field
/// unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayerPatch {
    pub name: Option<String>,
    pub label: Option<String>,
    pub description: Option<String>,
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    id: LayerId,
    name: String,
    kind: LayerKind,
    label: Option<String>,
    description: Option<String>,
    color: Option<String>,
    #[serde(with = "serde_bytes")]
    documents: DocumentSet,
    lock: LockState,
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Layer {
    /// Fresh id, empty bitmap, unlocked.
    pub fn create(name: impl Into<String>) -> Self {
        Self::with_spec(LayerSpec::new(name))
    }

    pub fn with_spec(spec: LayerSpec) -> Self {
        let now = Utc::now();
        Self {
            id: LayerId::generate(),
            name: spec.name,
            kind: spec.kind,
            label: spec.label,
            description: spec.description,
            color: spec.color,
            documents: DocumentSet::new(),
            lock: LockState::Unlocked,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> &LayerId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> LayerKind {
        self.kind
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn color(&self) -> Option<&str> {
        self.color.as_deref()
    }

    pub fn documents(&self) -> &DocumentSet {
        &self.documents
    }

    pub fn lock_state(&self) -> &LockState {
        &self.lock
    }

    pub fn is_locked(&self) -> bool {
        matches!(self.lock, LockState::LockedBy(_))
    }

    pub fn locked_by(&self) -> Option<&str> {
        match &self.lock {
            LockState::LockedBy(holder) => Some(holder),
            LockState::Unlocked => None,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Fails with `Locked` unless unlocked, held by `actor`, or `actor` is admin.
    pub fn ensure_writable(&self, actor: &Actor) -> Result<()> {
        match (&self.lock, actor) {
            (LockState::Unlocked, _) | (_, Actor::Admin) => Ok(()),
            (LockState::LockedBy(holder), Actor::Holder(caller)) if holder == caller => Ok(()),
            (LockState::LockedBy(holder), _) => Err(Error::Locked {
                layer: self.id.clone(),
                holder: holder.clone(),
            }),
        }
    }

    fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }

    pub fn rename(&mut self, new_name: impl Into<String>, actor: &Actor) -> Result<()> {
        self.ensure_writable(actor)?;
        self.name = new_name.into();
        self.touch();
        Ok(())
    }

    pub fn update(&mut self, patch: LayerPatch, actor: &Actor) -> Result<()> {
        self.ensure_writable(actor)?;
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(label) = patch.label {
            self.label = Some(label);
        }
        if let Some(description) = patch.description {
            self.description = Some(description);
        }
        if let Some(color) = patch.color {
            self.color = Some(color);
        }
        self.touch();
        Ok(())
    }

    /// Re-locking by the current holder is a no-op.
    pub fn lock(&mut self, holder: &str) -> Result<()> {
        if holder.is_empty() {
            return Err(Error::MissingHolder);
        }
        match &self.lock {
            LockState::LockedBy(current) if current == holder => Ok(()),
            LockState::LockedBy(current) => Err(Error::AlreadyLocked {
                layer: self.id.clone(),
                holder: current.clone(),
            }),
            LockState::Unlocked => {
                self.lock = LockState::LockedBy(holder.to_string());
                self.touch();
                Ok(())
            }
        }
    }

    pub fn unlock(&mut self, actor: &Actor) -> Result<()> {
        let LockState::LockedBy(current) = &self.lock else {
            return Err(Error::NotLocked(self.id.clone()));
        };
        let permitted = match actor {
            Actor::Admin => true,
            Actor::Holder(caller) => caller == current,
            Actor::Anonymous => false,
        };
        if !permitted {
            return Err(Error::WrongHolder {
                layer: self.id.clone(),
                holder: current.clone(),
            });
        }
        self.lock = LockState::Unlocked;
        self.touch();
        Ok(())
    }

    pub fn add_documents<I: IntoIterator<Item = DocumentId>>(
        &mut self,
        ids: I,
        actor: &Actor,
    ) -> Result<()> {
        self.ensure_writable(actor)?;
        for id in ids {
            self.documents.insert(id);
        }
        self.touch();
        Ok(())
    }

    pub fn remove_documents<I: IntoIterator<Item = DocumentId>>(
        &mut self,
        ids: I,
        actor: &Actor,
    ) -> Result<()> {
        self.ensure_writable(actor)?;
        for id in ids {
            self.documents.remove(id);
        }
        self.touch();
        Ok(())
    }

    /// Bitwise OR of `other` into this layer.
    pub fn merge(&mut self, other: &DocumentSet, actor: &Actor) -> Result<()> {
        self.ensure_writable(actor)?;
        self.documents |= other;
        self.touch();
        Ok(())
    }

    /// AND-NOT of `other` from this layer.
    pub fn subtract(&mut self, other: &DocumentSet, actor: &Actor) -> Result<()> {
        self.ensure_writable(actor)?;
        self.documents -= other;
        self.touch();
        Ok(())
    }

    pub fn summary(&self) -> LayerSummary {
        LayerSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            kind: self.kind,
            label: self.label.clone(),
            description: self.description.clone(),
            color: self.color.clone(),
            locked: self.is_locked(),
            locked_by: self.locked_by().map(str::to_string),
            document_count: self.documents.len(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Transport projection of a layer: cardinality instead of the raw bitmap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerSummary {
    pub id: LayerId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: LayerKind,
    pub label: Option<String>,
    pub description: Option<String>,
    pub color: Option<String>,
    pub locked: bool,
    pub locked_by: Option<String>,
    pub document_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::document_set;

    #[test]
    fn test_create_is_empty_and_unlocked() {
        let layer = Layer::create("work");
        assert_eq!(layer.name(), "work");
        assert!(layer.documents().is_empty());
        assert!(!layer.is_locked());
        assert_eq!(layer.locked_by(), None);
        assert_ne!(Layer::create("work").id(), layer.id());
    }

    #[test]
    fn test_lock_is_reentrant_for_same_holder() {
        let mut layer = Layer::create("a");
        layer.lock("h1").unwrap();
        let version = layer.version();
        layer.lock("h1").unwrap();
        assert_eq!(layer.version(), version);
        assert_eq!(layer.locked_by(), Some("h1"));
    }

    #[test]
    fn test_lock_by_other_holder_fails_without_state_change() {
        let mut layer = Layer::create("a");
        layer.lock("h1").unwrap();
        let err = layer.lock("h2").unwrap_err();
        assert!(matches!(err, Error::AlreadyLocked { ref holder, .. } if holder == "h1"));
        assert_eq!(layer.locked_by(), Some("h1"));
    }

    #[test]
    fn test_unlock_errors() {
        let mut layer = Layer::create("a");
        assert!(matches!(
            layer.unlock(&Actor::holder("h1")),
            Err(Error::NotLocked(_))
        ));

        layer.lock("h1").unwrap();
        assert!(matches!(
            layer.unlock(&Actor::holder("h2")),
            Err(Error::WrongHolder { .. })
        ));
        assert!(matches!(
            layer.unlock(&Actor::Anonymous),
            Err(Error::WrongHolder { .. })
        ));
        layer.unlock(&Actor::holder("h1")).unwrap();
        assert!(!layer.is_locked());
    }

    #[test]
    fn test_admin_overrides_lock() {
        let mut layer = Layer::create("a");
        layer.lock("h1").unwrap();
        layer.add_documents([7], &Actor::Admin).unwrap();
        layer.unlock(&Actor::Admin).unwrap();
        assert!(layer.documents().contains(7));
        assert!(!layer.is_locked());
    }

    #[test]
    fn test_locked_layer_rejects_foreign_mutation() {
        let mut layer = Layer::create("a");
        layer.add_documents([1, 2], &Actor::Anonymous).unwrap();
        layer.lock("h1").unwrap();

        let other = Actor::holder("h2");
        assert!(matches!(
            layer.add_documents([3], &other),
            Err(Error::Locked { .. })
        ));
        assert!(matches!(
            layer.rename("b", &other),
            Err(Error::Locked { .. })
        ));
        assert!(matches!(
            layer.merge(&document_set([9]), &Actor::Anonymous),
            Err(Error::Locked { .. })
        ));
        assert_eq!(layer.name(), "a");
        assert_eq!(layer.documents(), &document_set([1, 2]));

        let holder = Actor::holder("h1");
        layer.rename("b", &holder).unwrap();
        layer.remove_documents([1], &holder).unwrap();
        assert_eq!(layer.name(), "b");
        assert_eq!(layer.documents(), &document_set([2]));
    }

    #[test]
    fn test_mutation_bumps_version_and_updated_at() {
        let mut layer = Layer::create("a");
        let before = layer.updated_at();
        layer.merge(&document_set([1, 2, 3]), &Actor::Anonymous).unwrap();
        layer.subtract(&document_set([2]), &Actor::Anonymous).unwrap();
        assert_eq!(layer.version(), 2);
        assert!(layer.updated_at() >= before);
        assert_eq!(layer.documents(), &document_set([1, 3]));
    }

    #[test]
    fn test_summary_projection() {
        let mut layer = Layer::with_spec(LayerSpec::new("notes").kind(LayerKind::Feature));
        layer.add_documents([1, 2, 3], &Actor::Anonymous).unwrap();
        layer.lock("alice").unwrap();

        let json = serde_json::to_value(layer.summary()).unwrap();
        assert_eq!(json["name"], "notes");
        assert_eq!(json["type"], "feature");
        assert_eq!(json["locked"], true);
        assert_eq!(json["lockedBy"], "alice");
        assert_eq!(json["documentCount"], 3);
        assert!(json.get("createdAt").is_some());
        assert!(json.get("documents").is_none());
    }

    #[test]
    fn test_bincode_roundtrip_keeps_bitmap() {
        let mut layer = Layer::create("a");
        layer.add_documents([1, 1 << 40], &Actor::Anonymous).unwrap();
        let bytes = bincode::serialize(&layer).unwrap();
        let back: Layer = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, layer);
    }
}
