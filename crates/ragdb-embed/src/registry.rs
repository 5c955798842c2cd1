//! Priority-ordered registry of embedding backends.
//!
//! Holds the backend table from [`EmbeddingBackendsConfig`] behind an `RwLock`.
//! Reads are frequent (every embed call resolves the fallback chain), while
//! enable/disable is a rare checkpoint operation.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use ragdb_core::config::{BackendConfig, EmbeddingBackendsConfig};
use ragdb_core::error::Result;
use tracing::info;

pub struct BackendRegistry {
    config: RwLock<EmbeddingBackendsConfig>,
}

impl BackendRegistry {
    pub fn new(config: EmbeddingBackendsConfig) -> Self { Self { config: RwLock::new(config) } }

    fn read(&self) -> RwLockReadGuard<'_, EmbeddingBackendsConfig> {
        self.config.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, EmbeddingBackendsConfig> {
        self.config.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enabled backends, ascending by priority. Equal priorities keep their
    /// declaration order.
    pub fn get_enabled_backends(&self) -> Vec<BackendConfig> {
        let mut enabled: Vec<BackendConfig> = self.read().backends.iter().filter(|b| b.enabled).cloned().collect();
        enabled.sort_by_key(|b| b.priority);
        enabled
    }

    pub fn get_primary_backend(&self) -> Option<BackendConfig> { self.get_enabled_backends().into_iter().next() }

    pub fn get_fallback_backends(&self) -> Vec<BackendConfig> { self.get_enabled_backends().into_iter().skip(1).collect() }

    /// The chain an embed call walks: primary first, then fallbacks when
    /// `allow_fallback` is set. Empty when the global switch is off.
    pub fn resolution_chain(&self) -> Vec<BackendConfig> {
        let (enabled, allow_fallback) = { let c = self.read(); (c.enabled, c.allow_fallback) };
        if !enabled { return Vec::new(); }
        let mut chain = self.get_enabled_backends();
        if !allow_fallback { chain.truncate(1); }
        chain
    }

    pub fn enable_backend(&self, name: &str) -> bool { self.set_enabled(name, true) }

    pub fn disable_backend(&self, name: &str) -> bool { self.set_enabled(name, false) }

    fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        let mut config = self.write();
        match config.backend_mut(name) {
            Some(backend) => {
                backend.enabled = enabled;
                info!(backend = name, enabled, "embedding backend toggled");
                true
            }
            None => false,
        }
    }

    pub fn get_backend(&self, name: &str) -> Option<BackendConfig> { self.read().backend(name).cloned() }

    pub fn is_backend_enabled(&self, name: &str) -> bool { self.read().backend(name).is_some_and(|b| b.enabled) }

    pub fn mock_mode(&self) -> bool { self.read().mock_mode }

    pub fn is_enabled(&self) -> bool { self.read().enabled }

    pub fn mock_dimension(&self) -> usize { self.read().mock_dimension }

    pub fn cache_capacity(&self) -> u64 { self.read().cache_capacity }

    pub fn validation_errors(&self) -> Vec<String> { self.read().validation_errors() }

    pub fn validate(&self) -> Result<()> { self.read().validate() }

    /// Serializable copy of the current table.
    pub fn snapshot(&self) -> EmbeddingBackendsConfig { self.read().clone() }

    /// Restores the built-in backend table.
    pub fn reset(&self) { self.write().reset(); }
}

impl Default for BackendRegistry {
    fn default() -> Self { Self::new(EmbeddingBackendsConfig::default()) }
}
