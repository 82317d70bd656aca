use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::chrono::{DateTime, Utc};
use kindex_mapping::{KnownStatusConfig, StatusMapping, StatusObject};
use serde::Serialize;
use serde_json::Value;

use crate::registry::KindRegistry;
use crate::status::compute_status;
use crate::watch::{CacheProbe, SupervisorHandle, WatchStats};

/// Diagnostics to be exposed by the web server
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    /// When the daemon started
    pub started: DateTime<Utc>,
    /// Registry rebuilds since start
    pub registry_refreshes: u64,
    /// Group/version/kind entries currently known
    pub registry_kinds: usize,
    /// Per watch progress, keyed by label
    pub watches: BTreeMap<String, WatchStats>,
    /// Cached object counts, keyed by label
    pub caches: BTreeMap<String, usize>,
    /// Known-status vocabulary in effect
    pub status_vocabulary: KnownStatusConfig,
}

/// Holds the state of the whole application
#[derive(Clone)]
pub struct State {
    started: DateTime<Utc>,
    /// Shared kind registry
    pub registry: Arc<KindRegistry>,
    status: KnownStatusConfig,
    watches: Vec<SupervisorHandle>,
    caches: Vec<Arc<dyn CacheProbe>>,
}

impl State {
    /// Creates the state around a registry and status vocabulary, with no watches yet
    #[must_use]
    pub fn new(registry: Arc<KindRegistry>, status: KnownStatusConfig) -> Self {
        Self {
            started: Utc::now(),
            registry,
            status,
            watches: Vec::new(),
            caches: Vec::new(),
        }
    }

    /// Reports on a spawned supervisor
    #[must_use]
    pub fn with_watch(mut self, handle: SupervisorHandle) -> Self {
        self.watches.push(handle);
        self
    }

    /// Reports on a cache
    #[must_use]
    pub fn with_cache(mut self, probe: Arc<dyn CacheProbe>) -> Self {
        self.caches.push(probe);
        self
    }

    /// Normalizes `raw` with the configured vocabulary
    #[must_use]
    pub fn compute_status(&self, raw: Option<&Value>, mapping: Option<&StatusMapping>) -> StatusObject {
        compute_status(raw, mapping, &self.status)
    }

    /// Snapshot of everything worth reporting
    pub async fn diagnostics(&self) -> Diagnostics {
        let mut caches = BTreeMap::new();
        for probe in &self.caches {
            caches.insert(probe.label().to_string(), probe.size().await);
        }

        Diagnostics {
            started: self.started,
            registry_refreshes: self.registry.refresh_count(),
            registry_kinds: self.registry.kind_count(),
            watches: self
                .watches
                .iter()
                .map(|w| (w.label().to_string(), w.stats()))
                .collect(),
            caches,
            status_vocabulary: self.status.clone(),
        }
    }
}
