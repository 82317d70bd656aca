// Copyright 2026 Kindex Maintainers
// SPDX-License-Identifier: Apache-2.0

//! Self-healing watch loops.
//!
//! A [`WatchSupervisor`] owns one [`WatchHandler`] and runs it on its own task, forever:
//! get a client, open the watch, feed events to the handler until the stream ends, tear
//! down, then park until somebody calls [`WatchWaker::wake`]. Nothing inside a cycle
//! can take the loop down; errors and panics are logged, the handler is torn down and
//! the supervisor goes idle.

mod cache;

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use k8s_openapi::chrono::{DateTime, Utc};
use kube::api::WatchEvent;
use kube::{Client, Config};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{Notify, watch};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::Result;

pub use self::cache::{CacheProbe, CacheWatch, ObjectCache, cache_watch};

/// Raw watch events as delivered by the API server
pub type WatchStream<K> = BoxStream<'static, kube::Result<WatchEvent<K>>>;

/// Produces a fresh client for every connection cycle
pub trait ClientSource: Send + Sync + 'static {
    /// Builds a client suitable for long lived watches
    ///
    /// # Errors
    ///
    /// Will return `Err` if the client cannot be constructed
    fn client(&self) -> Result<Client>;
}

/// Copy of `config` suitable for long lived watches: no read timeout, since a watch may
/// legitimately stay quiet for a long time
#[must_use]
pub fn watch_config(config: &Config) -> Config {
    let mut config = config.clone();
    config.read_timeout = None;
    config
}

impl ClientSource for Config {
    fn client(&self) -> Result<Client> {
        Ok(Client::try_from(watch_config(self))?)
    }
}

/// Hands out the same client every cycle, timeouts included. Only suitable for clients
/// already built from [`watch_config`], or for scripted test clients.
impl ClientSource for Client {
    fn client(&self) -> Result<Client> {
        Ok(self.clone())
    }
}

/// What a supervisor drives: opening a watch and reacting to its events
pub trait WatchHandler: Send + Sync + 'static {
    /// Object type carried by the events
    type Object: Clone + DeserializeOwned + std::fmt::Debug + Send + 'static;

    /// Name used in logs and diagnostics
    fn label(&self) -> &str;

    /// Opens the event stream for one cycle
    fn open_watch(
        &self,
        client: Client,
    ) -> impl Future<Output = Result<WatchStream<Self::Object>>> + Send;

    /// Handles one event, in stream order
    fn on_event(
        &self,
        client: &Client,
        event: WatchEvent<Self::Object>,
    ) -> impl Future<Output = ()> + Send;

    /// Runs after the stream ended, before the supervisor goes idle
    fn on_teardown(&self, client: &Client) -> impl Future<Output = ()> + Send;
}

/// Where a supervisor is in its cycle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum WatchState {
    /// Obtaining a client and opening the watch
    #[default]
    Connecting,
    /// Dispatching events
    Streaming,
    /// Parked until woken
    Idle,
}

/// Progress of one supervisor, published after every transition
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchStats {
    /// Current state
    pub state: WatchState,
    /// Connection attempts so far
    pub cycles: u64,
    /// Events dispatched so far, over all cycles
    pub events: u64,
    /// When the last event was dispatched
    pub last_event: Option<DateTime<Utc>>,
}

/// Wakes an idle supervisor so it reconnects
#[derive(Clone, Debug)]
pub struct WatchWaker {
    notify: Arc<Notify>,
}

impl WatchWaker {
    /// Requests a reconnect.
    ///
    /// A wake sent while the supervisor is still streaming is remembered, so the next
    /// teardown is followed by an immediate reconnect. Repeated wakes collapse into one.
    pub fn wake(&self) {
        self.notify.notify_one();
    }
}

/// Handle to a spawned supervisor
#[derive(Clone, Debug)]
pub struct SupervisorHandle {
    label: String,
    waker: WatchWaker,
    stats: watch::Receiver<WatchStats>,
}

impl SupervisorHandle {
    /// Label of the supervised handler
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Waker for the supervisor
    #[must_use]
    pub fn waker(&self) -> &WatchWaker {
        &self.waker
    }

    /// Latest published stats
    #[must_use]
    pub fn stats(&self) -> WatchStats {
        self.stats.borrow().clone()
    }

    /// A receiver that observes every stats change
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<WatchStats> {
        self.stats.clone()
    }
}

/// Runs one [`WatchHandler`] forever
pub struct WatchSupervisor<H> {
    handler: Arc<H>,
    source: Arc<dyn ClientSource>,
    wake: Arc<Notify>,
    stats: watch::Sender<WatchStats>,
}

impl<H: WatchHandler> WatchSupervisor<H> {
    /// Creates a supervisor; nothing runs until [`WatchSupervisor::spawn`]
    pub fn new(handler: H, source: impl ClientSource) -> Self {
        Self::with_shared_source(handler, Arc::new(source))
    }

    /// Same as [`WatchSupervisor::new`] with a source shared between supervisors
    pub fn with_shared_source(handler: H, source: Arc<dyn ClientSource>) -> Self {
        Self {
            handler: Arc::new(handler),
            source,
            wake: Arc::new(Notify::new()),
            stats: watch::Sender::new(WatchStats::default()),
        }
    }

    /// Waker for this supervisor, usable before it is spawned
    #[must_use]
    pub fn waker(&self) -> WatchWaker {
        WatchWaker {
            notify: self.wake.clone(),
        }
    }

    /// Starts the supervisor on its own task.
    /// The task runs for the rest of the process; there is no way to stop it.
    pub fn spawn(self) -> SupervisorHandle {
        let handle = SupervisorHandle {
            label: self.handler.label().to_string(),
            waker: self.waker(),
            stats: self.stats.subscribe(),
        };

        let span = info_span!("watch", label = %handle.label);
        tokio::spawn(self.run().instrument(span));

        handle
    }

    fn set_state(&self, state: WatchState) {
        self.stats.send_modify(|s| s.state = state);
    }

    async fn run(self) {
        loop {
            self.stats.send_modify(|s| {
                s.state = WatchState::Connecting;
                s.cycles += 1;
            });

            if AssertUnwindSafe(self.cycle()).catch_unwind().await.is_err() {
                error!("watch cycle panicked");
            }

            self.set_state(WatchState::Idle);
            debug!("watch idle, waiting for wake");
            self.wake.notified().await;
            info!("watch woken, reconnecting");
        }
    }

    async fn cycle(&self) {
        let client = match self.source.client() {
            Ok(client) => client,
            Err(e) => {
                error!(error = %e, "failed to create watch client");
                return;
            }
        };

        match self.handler.open_watch(client.clone()).await {
            Ok(mut stream) => {
                self.set_state(WatchState::Streaming);
                info!("watch opened");

                while let Some(item) = stream.next().await {
                    match item {
                        Ok(event) => {
                            self.stats.send_modify(|s| {
                                s.events += 1;
                                s.last_event = Some(Utc::now());
                            });
                            let handled = AssertUnwindSafe(self.handler.on_event(&client, event))
                                .catch_unwind()
                                .await;
                            if handled.is_err() {
                                error!("watch handler panicked on event");
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "watch stream failed");
                            break;
                        }
                    }
                }

                info!("watch stream ended");
                self.handler.on_teardown(&client).await;
                drop(stream);
            }
            Err(e) => {
                warn!(error = %e, "failed to open watch");
                self.handler.on_teardown(&client).await;
            }
        }
    }
}
