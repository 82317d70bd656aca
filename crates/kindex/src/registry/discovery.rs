//! Cluster API discovery walk used by registry rebuilds

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    APIGroup, APIResourceList, GroupVersionForDiscovery,
};
use kube::Client;
use kube::core::gvk::GroupVersion;
use tracing::{debug, instrument, warn};

use crate::Result;

/// Groups whose served versions are all scanned, not just the preferred one.
/// A cluster can serve several versions of these with differing resource lists.
pub(crate) const ALL_VERSION_GROUPS: &[&str] = &["apiextensions.k8s.io"];

/// One kind as reported by the discovery endpoints
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DiscoveredKind {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
    pub namespaced: bool,
}

fn versions_to_scan(group: &APIGroup) -> Vec<&GroupVersionForDiscovery> {
    if ALL_VERSION_GROUPS.contains(&group.name.as_str()) {
        return group.versions.iter().collect();
    }

    group
        .preferred_version
        .as_ref()
        .or_else(|| group.versions.first())
        .into_iter()
        .collect()
}

fn collect(list: APIResourceList, found: &mut Vec<DiscoveredKind>) {
    let Ok(gv) = list.group_version.parse::<GroupVersion>() else {
        warn!(group_version = %list.group_version, "skipping unparsable group version");
        return;
    };

    found.extend(
        list.resources
            .into_iter()
            // subresources such as pods/log
            .filter(|r| !r.name.contains('/'))
            .map(|r| DiscoveredKind {
                group: gv.group.clone(),
                version: gv.version.clone(),
                kind: r.kind,
                plural: r.name,
                namespaced: r.namespaced,
            }),
    );
}

/// Enumerates the legacy core group and every API group.
///
/// Failing to enumerate versions or groups is an error; a single group whose
/// resource list cannot be read is logged and skipped.
#[instrument(skip(client))]
pub(crate) async fn discover(client: &Client) -> Result<Vec<DiscoveredKind>> {
    let mut found = Vec::new();

    let core = client.list_core_api_versions().await?;
    for version in &core.versions {
        match client.list_core_api_resources(version).await {
            Ok(list) => collect(list, &mut found),
            Err(e) => warn!(group_version = %version, error = %e, "skipping core api version"),
        }
    }

    let groups = client.list_api_groups().await?;
    for group in &groups.groups {
        for gv in versions_to_scan(group) {
            match client.list_api_group_resources(&gv.group_version).await {
                Ok(list) => collect(list, &mut found),
                Err(e) => warn!(
                    group_version = %gv.group_version,
                    error = %e,
                    "skipping api group version"
                ),
            }
        }
    }

    debug!(kinds = found.len(), "discovery finished");
    Ok(found)
}
