//! Workspace and Context: thin consumers binding a [`Tree`] to a
//! user-facing namespace.
//!
//! A workspace owns one tree. A context is a movable cursor (its url) into a
//! workspace tree plus a standing set of feature filters. Document queries
//! intersect the effective bitmap at a path with each requested feature
//! layer's bitmap; document bodies come from an external [`DocumentStore`].

use crate::bitmap::{DocumentId, DocumentSet};
use crate::error::{Error, Result};
use crate::layer::{Actor, LayerKind};
use crate::tree::Tree;
use parking_lot::RwLock;
use std::sync::Arc;

/// External document storage keyed by id.
pub trait DocumentStore {
    type Document;

    fn get(&self, id: DocumentId) -> Option<Self::Document>;
}

pub struct Workspace {
    id: String,
    name: String,
    tree: Arc<Tree>,
}

impl Workspace {
    pub fn new(id: impl Into<String>, name: impl Into<String>, tree: Arc<Tree>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            tree,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tree(&self) -> &Arc<Tree> {
        &self.tree
    }

    /// Ids at `path` that carry every feature in `features`.
    pub fn find_documents<S: AsRef<str>>(&self, path: &str, features: &[S]) -> Result<DocumentSet> {
        let mut out = self.tree.effective_bitmap(path)?;
        for feature in features {
            if out.is_empty() {
                break;
            }
            match self.tree.find_layer(feature.as_ref(), LayerKind::Feature)? {
                Some(layer) => out &= layer.documents(),
                None => out.clear(),
            }
        }
        Ok(out)
    }

    /// Resolve [`find_documents`](Self::find_documents) against a store.
    /// Ids the store does not know are skipped.
    pub fn list_documents<D: DocumentStore, S: AsRef<str>>(
        &self,
        store: &D,
        path: &str,
        features: &[S],
    ) -> Result<Vec<D::Document>> {
        Ok(self
            .find_documents(path, features)?
            .iter()
            .filter_map(|id| store.get(id))
            .collect())
    }

    /// Add `ids` to every layer bound at `path` and to each feature layer,
    /// creating missing feature layers.
    pub fn insert_documents<S: AsRef<str>>(
        &self,
        path: &str,
        features: &[S],
        ids: &[DocumentId],
        actor: &Actor,
    ) -> Result<()> {
        for layer in self.tree.layers_at(path)? {
            self.tree
                .add_documents(layer.id(), ids.iter().copied(), actor)?;
        }
        for feature in features {
            let layer = self.tree.ensure_layer(feature.as_ref(), LayerKind::Feature)?;
            self.tree
                .add_documents(layer.id(), ids.iter().copied(), actor)?;
        }
        tracing::debug!(workspace = %self.id, path, count = ids.len(), "inserted documents");
        Ok(())
    }

    /// Remove `ids` from the layers at `path` and from the named features.
    pub fn remove_documents<S: AsRef<str>>(
        &self,
        path: &str,
        features: &[S],
        ids: &[DocumentId],
        actor: &Actor,
    ) -> Result<()> {
        for layer in self.tree.layers_at(path)? {
            self.tree
                .remove_documents(layer.id(), ids.iter().copied(), actor)?;
        }
        for feature in features {
            if let Some(layer) = self.tree.find_layer(feature.as_ref(), LayerKind::Feature)? {
                self.tree
                    .remove_documents(layer.id(), ids.iter().copied(), actor)?;
            }
        }
        tracing::debug!(workspace = %self.id, path, count = ids.len(), "removed documents");
        Ok(())
    }
}

struct ContextState {
    url: String,
    features: Vec<String>,
    locked: bool,
}

pub struct Context {
    id: String,
    workspace: Arc<Workspace>,
    state: RwLock<ContextState>,
}

impl Context {
    /// Bind a context to `url`, inserting the path when missing.
    pub fn new(id: impl Into<String>, workspace: Arc<Workspace>, url: &str) -> Result<Self> {
        let node = workspace.tree().insert_path(url, None, true)?;
        Ok(Self {
            id: id.into(),
            workspace,
            state: RwLock::new(ContextState {
                url: node.path,
                features: Vec::new(),
                locked: false,
            }),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn workspace(&self) -> &Arc<Workspace> {
        &self.workspace
    }

    pub fn url(&self) -> String {
        self.state.read().url.clone()
    }

    pub fn features(&self) -> Vec<String> {
        self.state.read().features.clone()
    }

    pub fn is_locked(&self) -> bool {
        self.state.read().locked
    }

    pub fn lock(&self) {
        self.state.write().locked = true;
    }

    pub fn unlock(&self) {
        self.state.write().locked = false;
    }

    fn ensure_unlocked(&self, state: &ContextState) -> Result<()> {
        if state.locked {
            return Err(Error::ContextLocked(self.id.clone()));
        }
        Ok(())
    }

    /// Point the context at `url`, inserting the path when missing.
    pub fn set_url(&self, url: &str) -> Result<String> {
        let mut state = self.state.write();
        self.ensure_unlocked(&state)?;
        let node = self.workspace.tree().insert_path(url, None, true)?;
        tracing::debug!(context = %self.id, from = %state.url, to = %node.path, "context url changed");
        state.url = node.path;
        Ok(state.url.clone())
    }

    pub fn set_features<S: AsRef<str>>(&self, features: &[S]) -> Result<()> {
        let mut state = self.state.write();
        self.ensure_unlocked(&state)?;
        state.features = features.iter().map(|f| f.as_ref().to_string()).collect();
        Ok(())
    }

    pub fn append_features<S: AsRef<str>>(&self, features: &[S]) -> Result<()> {
        let mut state = self.state.write();
        self.ensure_unlocked(&state)?;
        for feature in features {
            let feature = feature.as_ref();
            if !state.features.iter().any(|f| f == feature) {
                state.features.push(feature.to_string());
            }
        }
        Ok(())
    }

    pub fn remove_features<S: AsRef<str>>(&self, features: &[S]) -> Result<()> {
        let mut state = self.state.write();
        self.ensure_unlocked(&state)?;
        state
            .features
            .retain(|f| !features.iter().any(|r| r.as_ref() == f));
        Ok(())
    }

    pub fn clear_features(&self) -> Result<()> {
        let mut state = self.state.write();
        self.ensure_unlocked(&state)?;
        state.features.clear();
        Ok(())
    }

    fn scope<S: AsRef<str>>(&self, extra: &[S]) -> (String, Vec<String>) {
        let state = self.state.read();
        let mut features = state.features.clone();
        features.extend(extra.iter().map(|f| f.as_ref().to_string()));
        (state.url.clone(), features)
    }

    pub fn find_documents<S: AsRef<str>>(&self, extra_features: &[S]) -> Result<DocumentSet> {
        let (url, features) = self.scope(extra_features);
        self.workspace.find_documents(&url, &features)
    }

    pub fn list_documents<D: DocumentStore, S: AsRef<str>>(
        &self,
        store: &D,
        extra_features: &[S],
    ) -> Result<Vec<D::Document>> {
        let (url, features) = self.scope(extra_features);
        self.workspace.list_documents(store, &url, &features)
    }

    /// Index `ids` under the context url and its standing features.
    pub fn insert_documents<S: AsRef<str>>(
        &self,
        extra_features: &[S],
        ids: &[DocumentId],
        actor: &Actor,
    ) -> Result<()> {
        let (url, features) = self.scope(extra_features);
        self.workspace.insert_documents(&url, &features, ids, actor)
    }

    pub fn remove_documents<S: AsRef<str>>(
        &self,
        extra_features: &[S],
        ids: &[DocumentId],
        actor: &Actor,
    ) -> Result<()> {
        let (url, features) = self.scope(extra_features);
        self.workspace.remove_documents(&url, &features, ids, actor)
    }
}
