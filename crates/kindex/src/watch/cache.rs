//! In-memory object cache fed by a supervised watch

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use futures::{FutureExt, StreamExt};
use futures::future::BoxFuture;
use kube::api::{WatchEvent, WatchParams};
use kube::runtime::reflector::ObjectRef;
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::{ClientSource, WatchHandler, WatchStream, WatchSupervisor, WatchWaker};
use crate::Result;

type Store<K> = Arc<RwLock<HashMap<ObjectRef<K>, Arc<K>>>>;

/// Bounds for kinds that can be cached
pub trait Cacheable:
    Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static
{
}

impl<K> Cacheable for K where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static
{
}

/// Watch handler mirroring every object of kind `K` into a map
pub struct CacheWatch<K: Cacheable> {
    label: String,
    store: Store<K>,
}

impl<K: Cacheable> WatchHandler for CacheWatch<K>
where
    ObjectRef<K>: Hash + Eq,
{
    type Object = K;

    fn label(&self) -> &str {
        &self.label
    }

    async fn open_watch(&self, client: Client) -> Result<WatchStream<K>> {
        let api = Api::<K>::all(client);
        let stream = api.watch(&WatchParams::default(), "0").await?;
        Ok(stream.boxed())
    }

    async fn on_event(&self, _client: &Client, event: WatchEvent<K>) {
        match event {
            WatchEvent::Added(obj) | WatchEvent::Modified(obj) => {
                let key = ObjectRef::from_obj(&obj);
                self.store.write().await.insert(key, Arc::new(obj));
            }
            WatchEvent::Deleted(obj) => {
                self.store.write().await.remove(&ObjectRef::from_obj(&obj));
            }
            WatchEvent::Bookmark(_) => {}
            WatchEvent::Error(err) => warn!(error = ?err, "watch reported an error"),
        }
    }

    async fn on_teardown(&self, _client: &Client) {
        let mut store = self.store.write().await;
        debug!(dropped = store.len(), "invalidating cache");
        store.clear();
    }
}

/// Read side of a [`CacheWatch`]
pub struct ObjectCache<K: Cacheable> {
    store: Store<K>,
    waker: WatchWaker,
}

impl<K: Cacheable> Clone for ObjectCache<K> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            waker: self.waker.clone(),
        }
    }
}

impl<K: Cacheable> ObjectCache<K>
where
    ObjectRef<K>: Hash + Eq,
{
    /// All cached objects. An empty cache wakes the supervisor, so a stale or dropped
    /// watch reconnects on the next read.
    pub async fn list(&self) -> Vec<Arc<K>> {
        let store = self.store.read().await;
        if store.is_empty() {
            debug!("cache empty, waking watch");
            self.waker.wake();
        }
        store.values().cloned().collect()
    }

    /// One cached object
    pub async fn get(&self, name: &str, namespace: Option<&str>) -> Option<Arc<K>> {
        let mut key = ObjectRef::new(name);
        if let Some(ns) = namespace {
            key = key.within(ns);
        }
        self.store.read().await.get(&key).cloned()
    }

    /// Number of cached objects
    pub async fn len(&self) -> usize {
        self.store.read().await.len()
    }

    /// Whether nothing is cached
    pub async fn is_empty(&self) -> bool {
        self.store.read().await.is_empty()
    }
}

/// Type erased view of a cache for diagnostics
pub trait CacheProbe: Send + Sync {
    /// Label of the feeding watch
    fn label(&self) -> &str;

    /// Current number of cached objects
    fn size(&self) -> BoxFuture<'_, usize>;
}

struct Probe<K: Cacheable> {
    label: String,
    cache: ObjectCache<K>,
}

impl<K: Cacheable> CacheProbe for Probe<K>
where
    ObjectRef<K>: Hash + Eq,
{
    fn label(&self) -> &str {
        &self.label
    }

    fn size(&self) -> BoxFuture<'_, usize> {
        self.cache.len().boxed()
    }
}

impl<K: Cacheable> ObjectCache<K>
where
    ObjectRef<K>: Hash + Eq,
{
    /// Diagnostics probe reporting this cache's size under `label`
    #[must_use]
    pub fn probe(&self, label: impl Into<String>) -> Arc<dyn CacheProbe> {
        Arc::new(Probe {
            label: label.into(),
            cache: self.clone(),
        })
    }
}

/// Builds a supervised cache of every `K` in the cluster.
/// The supervisor still has to be spawned.
pub fn cache_watch<K>(
    label: impl Into<String>,
    source: Arc<dyn ClientSource>,
) -> (WatchSupervisor<CacheWatch<K>>, ObjectCache<K>)
where
    K: Cacheable,
    ObjectRef<K>: Hash + Eq,
{
    let store: Store<K> = Arc::default();
    let handler = CacheWatch {
        label: label.into(),
        store: store.clone(),
    };

    let supervisor = WatchSupervisor::with_shared_source(handler, source);
    let cache = ObjectCache {
        store,
        waker: supervisor.waker(),
    };

    (supervisor, cache)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use http::{Request, Response, StatusCode};
    use k8s_openapi::api::core::v1::Namespace;
    use kube::api::ObjectMeta;
    use kube::client::Body;
    use serde_json::json;
    use tokio::time::timeout;
    use tower_test::mock;

    use super::*;
    use crate::watch::WatchState;

    fn namespace(name: &str) -> Namespace {
        Namespace {
            metadata: ObjectMeta {
                name: Some(name.into()),
                ..ObjectMeta::default()
            },
            ..Namespace::default()
        }
    }

    /// Answers every watch request with two namespace events, then ends the stream
    fn fake_watch_server() -> (Client, Arc<Mutex<Vec<String>>>) {
        let (service, mut handle) = mock::pair::<Request<Body>, Response<Body>>();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();

        tokio::spawn(async move {
            while let Some((request, send)) = handle.next_request().await {
                log.lock()
                    .unwrap()
                    .push(request.uri().path_and_query().unwrap().to_string());

                let mut body = String::new();
                for (kind, name) in [("ADDED", "team-a"), ("ADDED", "team-b")] {
                    let event = json!({
                        "type": kind,
                        "object": { "apiVersion": "v1", "kind": "Namespace", "metadata": { "name": name } }
                    });
                    body.push_str(&event.to_string());
                    body.push('\n');
                }

                send.send_response(
                    Response::builder()
                        .status(StatusCode::OK)
                        .body(Body::from(body.into_bytes()))
                        .unwrap(),
                );
            }
        });

        (Client::new(service, "default"), seen)
    }

    #[tokio::test]
    async fn events_update_the_store() {
        let (client, _) = fake_watch_server();
        let (supervisor, cache) = cache_watch::<Namespace>("namespaces", Arc::new(client.clone()));
        let handler = &supervisor.handler;

        handler.on_event(&client, WatchEvent::Added(namespace("a"))).await;
        handler.on_event(&client, WatchEvent::Added(namespace("b"))).await;
        handler.on_event(&client, WatchEvent::Modified(namespace("a"))).await;
        assert_eq!(cache.len().await, 2);
        assert!(cache.get("a", None).await.is_some());

        handler.on_event(&client, WatchEvent::Deleted(namespace("a"))).await;
        assert!(cache.get("a", None).await.is_none());
        assert_eq!(cache.list().await.len(), 1);

        handler.on_teardown(&client).await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn empty_read_wakes_the_watch() {
        let (client, seen) = fake_watch_server();
        let (supervisor, cache) = cache_watch::<Namespace>("namespaces", Arc::new(client));
        let probe = cache.probe("namespaces");
        let handle = supervisor.spawn();

        let mut stats = handle.subscribe();
        timeout(
            Duration::from_secs(5),
            stats.wait_for(|s| s.state == WatchState::Idle && s.cycles == 1),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(handle.stats().events, 2);
        {
            let seen = seen.lock().unwrap();
            assert_eq!(seen.len(), 1);
            assert!(seen[0].starts_with("/api/v1/namespaces?"));
            assert!(seen[0].contains("watch=true"));
        }

        // the stream ended, teardown invalidated everything
        assert_eq!(probe.size().await, 0);
        assert_eq!(probe.label(), "namespaces");
        assert!(cache.list().await.is_empty());

        timeout(
            Duration::from_secs(5),
            stats.wait_for(|s| s.state == WatchState::Idle && s.cycles == 2),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(seen.lock().unwrap().len(), 2);
        assert_eq!(handle.stats().events, 4);
    }
}
