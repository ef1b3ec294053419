//! Namespace manager configuration.

use std::time::Duration;

/// Tunables for the namespace manager.
#[derive(Debug, Clone)]
pub struct NamespaceConfig {
    /// Bound for the try-acquire used by `remove_collection`'s
    /// soft-failure path. Everything else blocks without bound.
    pub remove_lock_timeout: Duration,
    /// Optional configuration document imported into the root collection
    /// the first time the root is created.
    pub seed_config: Option<String>,
    /// Name the seed configuration document is stored under.
    pub seed_config_name: String,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            remove_lock_timeout: Duration::from_millis(500),
            seed_config: None,
            seed_config_name: "collection.xconf".to_string(),
        }
    }
}
