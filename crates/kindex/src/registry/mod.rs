// Copyright 2026 Kindex Maintainers
// SPDX-License-Identifier: Apache-2.0

//! Kind registry: where does a kind live, and how is it reached.
//!
//! The registry serves lookups from an immutable [`Snapshot`] published through an
//! [`ArcSwap`]. A lookup miss rebuilds the whole snapshot from the discovery endpoints
//! and retries once, so a freshly installed CRD becomes resolvable on first use. Seeded
//! built-in kinds survive every rebuild.

mod builtin;
mod discovery;

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind, ListParams};
use kube::core::gvk::GroupVersion;
use kube::{Api, Client};
use tracing::{debug, info, instrument};

use crate::selector::Selector;
use crate::{Error, Result};

use self::builtin::TypedOps;
use self::discovery::DiscoveredKind;

/// How calls for a kind reach the cluster
#[derive(Clone, Copy)]
pub(crate) enum Dispatch {
    /// Generic custom-object surface addressed by group/version/plural
    Custom,
    /// Typed built-in surface
    Typed(TypedOps),
}

/// Where a kind is served
#[derive(Clone)]
pub struct KindLocation {
    /// Kind name, e.g. `ConfigMap`
    pub kind: String,
    /// API group, empty for the core group
    pub group: String,
    /// API version, e.g. `v1`
    pub version: String,
    /// Plural resource name used in URLs
    pub plural: String,
    /// Whether objects live inside namespaces
    pub namespaced: bool,
    dispatch: Dispatch,
}

impl fmt::Debug for KindLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KindLocation")
            .field("kind", &self.kind)
            .field("group", &self.group)
            .field("version", &self.version)
            .field("plural", &self.plural)
            .field("namespaced", &self.namespaced)
            .field("builtin", &self.is_builtin())
            .finish()
    }
}

impl KindLocation {
    fn custom(found: DiscoveredKind) -> Self {
        Self {
            kind: found.kind,
            group: found.group,
            version: found.version,
            plural: found.plural,
            namespaced: found.namespaced,
            dispatch: Dispatch::Custom,
        }
    }

    /// `group/version`, or just `version` for the core group
    #[must_use]
    pub fn api_version(&self) -> String {
        api_version(&self.group, &self.version)
    }

    /// Whether calls go through the typed built-in surface
    #[must_use]
    pub fn is_builtin(&self) -> bool {
        matches!(self.dispatch, Dispatch::Typed(_))
    }

    /// Dynamic resource descriptor for this kind
    #[must_use]
    pub fn api_resource(&self) -> ApiResource {
        let gvk = GroupVersionKind::gvk(&self.group, &self.version, &self.kind);
        ApiResource::from_gvk_with_plural(&gvk, &self.plural)
    }

    fn key(&self) -> String {
        format!("{}/{}/{}", self.group, self.version, self.kind)
    }

    async fn list(
        &self,
        client: Client,
        namespace: Option<&str>,
        lp: ListParams,
    ) -> Result<Vec<DynamicObject>> {
        match self.dispatch {
            Dispatch::Typed(ops) => (ops.list)(client, namespace.map(str::to_string), lp).await,
            Dispatch::Custom => {
                let ar = self.api_resource();
                let api: Api<DynamicObject> = match namespace {
                    Some(ns) => Api::namespaced_with(client, ns, &ar),
                    None => Api::all_with(client, &ar),
                };
                Ok(api.list(&lp).await?.items)
            }
        }
    }

    async fn get(&self, client: Client, namespace: Option<&str>, name: &str) -> Result<DynamicObject> {
        match self.dispatch {
            Dispatch::Typed(ops) => {
                (ops.get)(client, namespace.map(str::to_string), name.to_string()).await
            }
            Dispatch::Custom => {
                let ar = self.api_resource();
                let api: Api<DynamicObject> = match namespace {
                    Some(ns) => Api::namespaced_with(client, ns, &ar),
                    None => Api::all_with(client, &ar),
                };
                Ok(api.get(name).await?)
            }
        }
    }
}

fn api_version(group: &str, version: &str) -> String {
    if group.is_empty() {
        version.to_string()
    } else {
        format!("{group}/{version}")
    }
}

/// Optional narrowing for list calls
#[derive(Clone, Debug, Default)]
pub struct ListFilters {
    /// Label selector; an empty selector selects nothing
    pub label_selector: Option<Selector>,
    /// Raw field selector
    pub field_selector: Option<String>,
    /// Page size
    pub limit: Option<u32>,
}

impl ListFilters {
    fn selects_nothing(&self) -> bool {
        self.label_selector.as_ref().is_some_and(Selector::is_empty)
    }

    fn list_params(&self) -> ListParams {
        let mut lp = ListParams::default();
        if let Some(selector) = &self.label_selector {
            lp = lp.labels(&selector.serialize());
        }
        if let Some(fields) = &self.field_selector {
            lp = lp.fields(fields);
        }
        if let Some(limit) = self.limit {
            lp = lp.limit(limit);
        }
        lp
    }
}

/// Immutable view of the registry, swapped wholesale on refresh
#[derive(Default)]
struct Snapshot {
    locations: HashMap<String, Arc<KindLocation>>,
    group_versions: HashMap<String, BTreeSet<String>>,
}

impl Snapshot {
    fn build(seeds: &[Arc<KindLocation>], discovered: Vec<DiscoveredKind>) -> Self {
        let mut snapshot = Self::default();

        for seed in seeds {
            snapshot.insert(seed.kind.clone(), seed.clone());
            snapshot.insert(seed.key(), seed.clone());
        }
        for found in discovered {
            snapshot.insert_if_absent(Arc::new(KindLocation::custom(found)));
        }

        snapshot
    }

    fn insert(&mut self, key: String, location: Arc<KindLocation>) {
        self.group_versions
            .entry(format!("{}/{}", location.group, location.kind))
            .or_default()
            .insert(location.api_version());
        self.locations.insert(key, location);
    }

    fn insert_if_absent(&mut self, location: Arc<KindLocation>) {
        let key = location.key();
        if !self.locations.contains_key(&key) {
            self.insert(key, location);
        }
    }

    fn kinds(&self) -> usize {
        self.group_versions.values().map(BTreeSet::len).sum()
    }
}

/// Maps kind names to their API location, refreshing from the cluster on a miss
pub struct KindRegistry {
    client: Client,
    seeds: Vec<Arc<KindLocation>>,
    snapshot: ArcSwap<Snapshot>,
    refreshes: AtomicU64,
}

impl KindRegistry {
    /// Creates a registry that knows only the built-in kinds until the first miss
    #[must_use]
    pub fn new(client: Client) -> Self {
        let seeds: Vec<_> = builtin::seed().into_iter().map(Arc::new).collect();
        let snapshot = Snapshot::build(&seeds, Vec::new());

        Self {
            client,
            seeds,
            snapshot: ArcSwap::from_pointee(snapshot),
            refreshes: AtomicU64::new(0),
        }
    }

    /// Number of rebuilds performed so far
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    /// Number of distinct group/version/kind entries currently known
    pub fn kind_count(&self) -> usize {
        self.snapshot.load().kinds()
    }

    /// Locates `kind`. An empty `api_version` only matches built-in kinds by name.
    ///
    /// # Errors
    ///
    /// `UnknownKind` if the kind is still missing after one rebuild, `ParseError` for a
    /// malformed `api_version`, `Upstream` if the rebuild itself fails.
    #[instrument(skip(self))]
    pub async fn resolve(&self, kind: &str, api_version: &str) -> Result<Arc<KindLocation>> {
        let key = lookup_key(kind, api_version)?;

        if let Some(location) = self.snapshot.load().locations.get(&key) {
            return Ok(location.clone());
        }

        info!("kind not in registry, rebuilding");
        self.refresh().await?;

        self.snapshot
            .load()
            .locations
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::UnknownKind {
                kind: kind.to_string(),
                api_version: api_version.to_string(),
            })
    }

    /// Rebuilds the snapshot from the discovery endpoints and publishes it.
    ///
    /// Concurrent rebuilds are not coalesced; the last one to finish wins.
    ///
    /// # Errors
    ///
    /// `Upstream` if the API groups cannot be enumerated.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<()> {
        let discovered = discovery::discover(&self.client).await?;
        let snapshot = Snapshot::build(&self.seeds, discovered);
        let kinds = snapshot.kinds();

        self.snapshot.store(Arc::new(snapshot));
        let refreshes = self.refreshes.fetch_add(1, Ordering::Relaxed) + 1;

        info!(kinds, refreshes, "registry rebuilt");
        Ok(())
    }

    /// API versions (`group/version`, or `version` for core) serving `kind` in `group`
    #[must_use]
    pub fn group_versions_for(&self, group: &str, kind: &str) -> BTreeSet<String> {
        self.snapshot
            .load()
            .group_versions
            .get(&format!("{group}/{kind}"))
            .cloned()
            .unwrap_or_default()
    }

    /// Lists objects of a kind across the whole cluster
    ///
    /// # Errors
    ///
    /// Resolution errors, or `Upstream` when the list call fails.
    #[instrument(skip(self, filters))]
    pub async fn list_at_cluster(
        &self,
        kind: &str,
        api_version: &str,
        filters: &ListFilters,
    ) -> Result<Vec<DynamicObject>> {
        let location = self.resolve(kind, api_version).await?;
        if filters.selects_nothing() {
            debug!("empty label selector, skipping list");
            return Ok(Vec::new());
        }

        location
            .list(self.client.clone(), None, filters.list_params())
            .await
    }

    /// Lists objects of a namespaced kind inside one namespace
    ///
    /// # Errors
    ///
    /// Resolution errors, `ClusterScoped` for cluster scoped kinds, or `Upstream` when
    /// the list call fails.
    #[instrument(skip(self, filters))]
    pub async fn list_in_namespace(
        &self,
        kind: &str,
        api_version: &str,
        namespace: &str,
        filters: &ListFilters,
    ) -> Result<Vec<DynamicObject>> {
        let location = self.resolve(kind, api_version).await?;
        if !location.namespaced {
            return Err(Error::ClusterScoped(location.kind.clone()));
        }
        if filters.selects_nothing() {
            debug!("empty label selector, skipping list");
            return Ok(Vec::new());
        }

        location
            .list(self.client.clone(), Some(namespace), filters.list_params())
            .await
    }

    /// Reads one object. For namespaced kinds a missing namespace means the client's
    /// default namespace; for cluster scoped kinds the namespace is ignored.
    ///
    /// # Errors
    ///
    /// Resolution errors, `ObjectNotFound` when the cluster reports 404, `Upstream`
    /// for any other failure.
    #[instrument(skip(self))]
    pub async fn get(
        &self,
        kind: &str,
        api_version: &str,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<DynamicObject> {
        let location = self.resolve(kind, api_version).await?;
        let namespace = location
            .namespaced
            .then(|| namespace.unwrap_or_else(|| self.client.default_namespace()));

        location
            .get(self.client.clone(), namespace, name)
            .await
            .map_err(|e| match e {
                Error::Upstream(kube::Error::Api(resp)) if resp.code == 404 => {
                    Error::ObjectNotFound {
                        namespace: namespace.unwrap_or_default().to_string(),
                        name: name.to_string(),
                    }
                }
                other => other,
            })
    }
}

fn lookup_key(kind: &str, api_version: &str) -> Result<String> {
    if api_version.is_empty() {
        return Ok(kind.to_string());
    }

    let gv: GroupVersion = api_version.parse()?;
    let well_formed = !gv.version.is_empty()
        && !gv.version.contains('/')
        && (api_version.contains('/') != gv.group.is_empty());
    if !well_formed {
        return Err(Error::MalformedExpression(format!(
            "invalid api version: {api_version}"
        )));
    }

    Ok(format!("{}/{}/{kind}", gv.group, gv.version))
}
