use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which PersistentKV backend to open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreBackend {
    /// Volatile; for tests and scratch trees.
    Memory,
    /// Append-only log file replayed at open.
    Log { path: PathBuf },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// fsync after every appended frame (default: true)
    pub sync_writes: bool,
    /// Rewrite the log once this many frames were appended since the last
    /// compaction (default: 10_000). `None` disables auto-compaction.
    pub compact_after: Option<u64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            sync_writes: true,
            compact_after: Some(10_000),
        }
    }
}

impl StoreConfig {
    pub fn memory() -> Self {
        Self::default()
    }

    pub fn log(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: StoreBackend::Log { path: path.into() },
            ..Default::default()
        }
    }

    pub fn sync_writes(mut self, enabled: bool) -> Self {
        self.sync_writes = enabled;
        self
    }

    pub fn compact_after(mut self, frames: Option<u64>) -> Self {
        self.compact_after = frames;
        self
    }
}

/// Configuration for a [`Tree`](crate::Tree).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    /// Name given to the layer bound at `/` (default: "/")
    pub root_layer_name: String,
    /// Default for `insert_path` callers that do not choose (default: true)
    pub auto_create_layers: bool,
    /// Maximum number of segments in a path (default: 64)
    pub max_path_depth: usize,
    pub store: StoreConfig,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            root_layer_name: "/".to_string(),
            auto_create_layers: true,
            max_path_depth: 64,
            store: StoreConfig::default(),
        }
    }
}

impl TreeConfig {
    pub fn new(store: StoreConfig) -> Self {
        Self {
            store,
            ..Default::default()
        }
    }

    pub fn root_layer_name(mut self, name: impl Into<String>) -> Self {
        self.root_layer_name = name.into();
        self
    }

    pub fn auto_create_layers(mut self, enabled: bool) -> Self {
        self.auto_create_layers = enabled;
        self
    }

    pub fn max_path_depth(mut self, depth: usize) -> Self {
        self.max_path_depth = depth;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TreeConfig::default();
        assert_eq!(config.root_layer_name, "/");
        assert!(config.auto_create_layers);
        assert_eq!(config.max_path_depth, 64);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert!(config.store.sync_writes);
        assert_eq!(config.store.compact_after, Some(10_000));
    }

    #[test]
    fn test_config_builder() {
        let config = TreeConfig::new(
            StoreConfig::log("/tmp/canvas.log")
                .sync_writes(false)
                .compact_after(None),
        )
        .root_layer_name("universe")
        .auto_create_layers(false)
        .max_path_depth(8);

        assert_eq!(config.root_layer_name, "universe");
        assert!(!config.auto_create_layers);
        assert_eq!(config.max_path_depth, 8);
        assert_eq!(
            config.store.backend,
            StoreBackend::Log {
                path: PathBuf::from("/tmp/canvas.log")
            }
        );
        assert!(!config.store.sync_writes);
        assert_eq!(config.store.compact_after, None);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "store": { "backend": { "type": "log", "path": "data/tree.log" } } }"#;
        let config: TreeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.root_layer_name, "/");
        assert_eq!(
            config.store.backend,
            StoreBackend::Log {
                path: PathBuf::from("data/tree.log")
            }
        );
        assert!(config.store.sync_writes);
    }
}
