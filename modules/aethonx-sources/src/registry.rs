//! Process-wide source registry.
//!
//! A concurrent map from source name to (factory, metadata). Factories
//! self-register at program start (`adapters::register_bundled`); `build`
//! resolves a configuration map into constructed sources in descending
//! priority order. Reads are concurrent, writes exclusive.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;
use tracing::{info, warn};

use aethonx_common::config::{SourceConfig, DEFAULT_PRIORITY};
use aethonx_common::{AethonxError, CancelToken};

use crate::metadata::SourceMetadata;
use crate::source::Source;

pub type SourceFactory =
    Arc<dyn Fn(SourceConfig) -> Result<Box<dyn Source>, AethonxError> + Send + Sync>;

struct Registered {
    factory: SourceFactory,
    metadata: SourceMetadata,
}

#[derive(Default)]
pub struct SourceRegistry {
    inner: RwLock<HashMap<String, Registered>>,
}

static GLOBAL: Lazy<SourceRegistry> = Lazy::new(SourceRegistry::default);

/// The process-wide registry instance.
pub fn global() -> &'static SourceRegistry {
    &GLOBAL
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under a unique name. Duplicate names are rejected
    /// so a misconfigured double-registration surfaces at startup.
    pub fn register(
        &self,
        name: &str,
        factory: SourceFactory,
        metadata: SourceMetadata,
    ) -> Result<(), AethonxError> {
        if name.trim().is_empty() {
            return Err(AethonxError::Config(
                "source name must not be empty".to_string(),
            ));
        }
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if inner.contains_key(name) {
            return Err(AethonxError::Config(format!(
                "source '{name}' already registered"
            )));
        }
        inner.insert(
            name.to_string(),
            Registered {
                factory,
                metadata,
            },
        );
        Ok(())
    }

    /// Build every enabled configured source, highest priority first.
    ///
    /// Unknown names and per-source factory failures are warned, not fatal;
    /// an error is returned only when every configured source failed to
    /// build. `initialize()` failures on advanced sources are warned and the
    /// source is still returned; the caller owns the hard-failure policy.
    pub async fn build(
        &self,
        configs: &HashMap<String, SourceConfig>,
    ) -> Result<Vec<Box<dyn Source>>, AethonxError> {
        // Resolve enabled entries and normalize priorities.
        let mut enabled: Vec<(String, SourceConfig, i32)> = Vec::new();
        for (name, config) in configs {
            if !config.enabled {
                continue;
            }
            if !self.is_registered(name) {
                warn!(source = name.as_str(), "configured source is not registered, skipping");
                continue;
            }
            let priority = if config.priority < 0 {
                warn!(
                    source = name.as_str(),
                    priority = config.priority,
                    "negative priority normalized to default"
                );
                DEFAULT_PRIORITY
            } else {
                config.priority
            };
            enabled.push((name.clone(), config.clone(), priority));
        }
        enabled.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| a.0.cmp(&b.0)));

        let mut built: Vec<Box<dyn Source>> = Vec::with_capacity(enabled.len());
        let mut attempted = 0usize;
        {
            let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
            for (name, mut config, priority) in enabled {
                let Some(registered) = inner.get(&name) else {
                    continue; // unregistered between check and build
                };
                config.priority = priority;
                attempted += 1;
                match (registered.factory)(config) {
                    Ok(source) => built.push(source),
                    Err(e) => {
                        warn!(source = name.as_str(), error = %e, "source factory failed");
                    }
                }
            }
        }

        if attempted > 0 && built.is_empty() {
            return Err(AethonxError::Config(
                "all configured sources failed to build".to_string(),
            ));
        }

        // Pre-use lifecycle for sources that advertise it. Failures are
        // warned; the source stays in the output.
        for source in &built {
            if let Some(advanced) = source.advanced() {
                if let Err(e) = advanced.validate() {
                    warn!(source = source.name(), error = %e, "source validation failed");
                    continue;
                }
                let cancel = CancelToken::new();
                if let Err(e) = advanced.initialize().await {
                    warn!(source = source.name(), error = %e, "source initialization failed");
                } else if let Err(e) = advanced.health_check(&cancel).await {
                    warn!(source = source.name(), error = %e, "source health check failed");
                }
            }
        }

        info!(count = built.len(), "sources built");
        Ok(built)
    }

    /// Registered names, sorted.
    pub fn list(&self) -> Vec<String> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = inner.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn metadata(&self, name: &str) -> Option<SourceMetadata> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.get(name).map(|r| r.metadata.clone())
    }

    /// Copies, so callers never hold the lock.
    pub fn all_metadata(&self) -> Vec<SourceMetadata> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<SourceMetadata> = inner.values().map(|r| r.metadata.clone()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn is_registered(&self, name: &str) -> bool {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.contains_key(name)
    }

    /// Drop every registration. Test escape hatch.
    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.clear();
    }
}
