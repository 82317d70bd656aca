//! Built-in kinds and their typed transport.
//!
//! Every seeded kind carries a [`TypedOps`] table of function pointers into the
//! `k8s-openapi` typed surface. Results are converted into [`DynamicObject`] so the
//! registry can hand out one object shape regardless of how the kind is reached.

use std::fmt::Debug;

use futures::FutureExt;
use futures::future::BoxFuture;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{DynamicObject, ListParams};
use kube::{Api, Client, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{Dispatch, KindLocation};
use crate::Result;

/// Typed list/get calls for one built-in kind
#[derive(Clone, Copy)]
pub(crate) struct TypedOps {
    /// List objects, across all namespaces when no namespace is given
    pub list: fn(Client, Option<String>, ListParams) -> BoxFuture<'static, Result<Vec<DynamicObject>>>,
    /// Read one object
    pub get: fn(Client, Option<String>, String) -> BoxFuture<'static, Result<DynamicObject>>,
}

fn to_dynamic<K: Serialize>(obj: &K) -> Result<DynamicObject> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

fn namespaced_api<K>(client: Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

fn list_namespaced<K>(
    client: Client,
    namespace: Option<String>,
    lp: ListParams,
) -> BoxFuture<'static, Result<Vec<DynamicObject>>>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Serialize
        + Debug
        + Send
        + Sync
        + 'static,
{
    async move {
        let api = namespaced_api::<K>(client, namespace.as_deref());
        let list = api.list(&lp).await?;
        list.items.iter().map(to_dynamic).collect()
    }
    .boxed()
}

fn get_namespaced<K>(
    client: Client,
    namespace: Option<String>,
    name: String,
) -> BoxFuture<'static, Result<DynamicObject>>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Serialize
        + Debug
        + Send
        + Sync
        + 'static,
{
    async move {
        let api = namespaced_api::<K>(client, namespace.as_deref());
        to_dynamic(&api.get(&name).await?)
    }
    .boxed()
}

fn list_cluster<K>(
    client: Client,
    _namespace: Option<String>,
    lp: ListParams,
) -> BoxFuture<'static, Result<Vec<DynamicObject>>>
where
    K: Resource<DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Serialize
        + Debug
        + Send
        + Sync
        + 'static,
{
    async move {
        let list = Api::<K>::all(client).list(&lp).await?;
        list.items.iter().map(to_dynamic).collect()
    }
    .boxed()
}

fn get_cluster<K>(
    client: Client,
    _namespace: Option<String>,
    name: String,
) -> BoxFuture<'static, Result<DynamicObject>>
where
    K: Resource<DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Serialize
        + Debug
        + Send
        + Sync
        + 'static,
{
    async move { to_dynamic(&Api::<K>::all(client).get(&name).await?) }.boxed()
}

macro_rules! seed {
    ($type:ty, namespaced) => {
        seed!(@inner $type, true, TypedOps {
            list: list_namespaced::<$type>,
            get: get_namespaced::<$type>,
        })
    };
    ($type:ty, cluster) => {
        seed!(@inner $type, false, TypedOps {
            list: list_cluster::<$type>,
            get: get_cluster::<$type>,
        })
    };
    (@inner $type:ty, $namespaced:expr, $ops:expr) => {
        KindLocation {
            kind: <$type>::kind(&()).to_string(),
            group: <$type>::group(&()).to_string(),
            version: <$type>::version(&()).to_string(),
            plural: <$type>::plural(&()).to_string(),
            namespaced: $namespaced,
            dispatch: Dispatch::Typed($ops),
        }
    };
}

/// The built-in kinds known without asking the cluster
pub(crate) fn seed() -> Vec<KindLocation> {
    use k8s_openapi::api::{
        apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet},
        batch::v1::{CronJob, Job},
        core::v1::{
            ConfigMap, Event, Namespace, Node, PersistentVolume, PersistentVolumeClaim, Pod,
            Secret, Service, ServiceAccount,
        },
        networking::v1::{Ingress, NetworkPolicy},
        rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding},
        storage::v1::StorageClass,
    };
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;

    vec![
        seed!(ConfigMap, namespaced),
        seed!(Secret, namespaced),
        seed!(Pod, namespaced),
        seed!(Service, namespaced),
        seed!(ServiceAccount, namespaced),
        seed!(PersistentVolumeClaim, namespaced),
        seed!(Event, namespaced),
        seed!(Deployment, namespaced),
        seed!(StatefulSet, namespaced),
        seed!(DaemonSet, namespaced),
        seed!(ReplicaSet, namespaced),
        seed!(Job, namespaced),
        seed!(CronJob, namespaced),
        seed!(Ingress, namespaced),
        seed!(NetworkPolicy, namespaced),
        seed!(Role, namespaced),
        seed!(RoleBinding, namespaced),
        seed!(Namespace, cluster),
        seed!(Node, cluster),
        seed!(PersistentVolume, cluster),
        seed!(ClusterRole, cluster),
        seed!(ClusterRoleBinding, cluster),
        seed!(StorageClass, cluster),
        seed!(CustomResourceDefinition, cluster),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeds_carry_typed_dispatch() {
        let seeds = seed();

        assert!(seeds.iter().all(KindLocation::is_builtin));

        let cm = seeds.iter().find(|l| l.kind == "ConfigMap");
        assert!(cm.is_some_and(|l| l.group.is_empty()
            && l.version == "v1"
            && l.plural == "configmaps"
            && l.namespaced));

        let crd = seeds.iter().find(|l| l.kind == "CustomResourceDefinition");
        assert!(crd.is_some_and(|l| l.group == "apiextensions.k8s.io" && !l.namespaced));
    }
}
