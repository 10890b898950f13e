pub mod contest;
pub mod coordinator;
pub mod in_flight;
pub mod lifecycle;
pub mod timers;

use std::sync::Arc;

use axum::extract::ws::Message;
use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, watch};

use crate::{
    config::AppConfig,
    dao::kv_store::KvStore,
    error::ServiceError,
    services::{
        identity::IdentityProvider,
        problem_generator::{ProblemBatchGenerator, ProblemSource},
        renderer::ContentRenderer,
    },
};

use self::{
    contest::ConnectionId, coordinator::Coordinator, in_flight::InFlight,
    lifecycle::RoomStateMachine, timers::RoundTimers,
};

pub type SharedState = Arc<AppState>;

#[derive(Clone)]
/// Handle used to push messages to a connected client.
pub struct ClientConnection {
    pub id: ConnectionId,
    pub tx: mpsc::UnboundedSender<Message>,
}

/// Central application state: store handle, collaborators and process-local registries.
///
/// Nothing in here is authoritative room state; that lives in the store.
pub struct AppState {
    config: Arc<AppConfig>,
    store: RwLock<Option<Arc<dyn KvStore>>>,
    degraded: watch::Sender<bool>,
    generator: ProblemBatchGenerator,
    identity: Arc<dyn IdentityProvider>,
    connections: DashMap<ConnectionId, ClientConnection>,
    round_timers: RoundTimers,
    in_flight: InFlight,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(
        config: AppConfig,
        source: Arc<dyn ProblemSource>,
        renderer: Arc<dyn ContentRenderer>,
        identity: Arc<dyn IdentityProvider>,
    ) -> SharedState {
        let config = Arc::new(config);
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            generator: ProblemBatchGenerator::new(config.clone(), source, renderer),
            config,
            store: RwLock::new(None),
            degraded: degraded_tx,
            identity,
            connections: DashMap::new(),
            round_timers: RoundTimers::new(),
            in_flight: InFlight::new(),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Obtain a handle to the current store, if one is installed.
    pub async fn store(&self) -> Option<Arc<dyn KvStore>> {
        self.store.read().await.as_ref().cloned()
    }

    /// Install a store implementation and leave degraded mode.
    pub async fn install_store(&self, store: Arc<dyn KvStore>) {
        *self.store.write().await = Some(store);
        self.update_degraded(false);
    }

    /// Coordinator over the installed store, or [`ServiceError::Degraded`].
    pub async fn coordinator(&self) -> Result<Coordinator, ServiceError> {
        if self.is_degraded() {
            return Err(ServiceError::Degraded);
        }
        let store = self.store().await.ok_or(ServiceError::Degraded)?;
        Ok(Coordinator::new(store, self.config.retry_budget))
    }

    pub async fn lifecycle(&self) -> Result<RoomStateMachine, ServiceError> {
        Ok(RoomStateMachine::new(self.coordinator().await?))
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            let changed = *current != value;
            *current = value;
            changed
        });
    }

    pub fn generator(&self) -> &ProblemBatchGenerator {
        &self.generator
    }

    pub fn identity(&self) -> &dyn IdentityProvider {
        self.identity.as_ref()
    }

    /// Registry of open client sockets on this node.
    pub fn connections(&self) -> &DashMap<ConnectionId, ClientConnection> {
        &self.connections
    }

    pub fn round_timers(&self) -> &RoundTimers {
        &self.round_timers
    }

    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::{io, sync::Arc};

    use axum::extract::ws::Message;
    use dashmap::DashMap;
    use futures::future::BoxFuture;
    use serde_json::Value;
    use tokio::sync::{mpsc, watch};

    use super::{AppState, ClientConnection, SharedState};
    use crate::{
        config::AppConfig,
        dao::{
            kv_store::{KvStore, MemoryKvStore, Revision, SwapResult, Versioned},
            storage::{StorageError, StorageResult},
        },
        services::{
            identity::TokenTable,
            problem_generator::{FetchedProblem, ProblemSource, SourceError, tests::StaticSource},
            renderer::MarkupSanitizer,
        },
        state::contest::ConnectionId,
    };

    pub(crate) async fn state_with(
        source: Arc<dyn ProblemSource>,
        store: Arc<dyn KvStore>,
    ) -> SharedState {
        let state = AppState::new(
            AppConfig::default(),
            source,
            Arc::new(MarkupSanitizer),
            Arc::new(TokenTable::default()),
        );
        state.install_store(store).await;
        state
    }

    pub(crate) async fn state_with_source(source: StaticSource) -> SharedState {
        state_with(Arc::new(source), Arc::new(MemoryKvStore::new())).await
    }

    /// Source whose fetches hold until the gate is opened.
    pub(crate) struct GatedSource {
        inner: StaticSource,
        open: watch::Receiver<bool>,
    }

    impl GatedSource {
        pub(crate) fn new() -> (Self, watch::Sender<bool>) {
            let (gate, open) = watch::channel(false);
            let source = Self {
                inner: StaticSource::default(),
                open,
            };
            (source, gate)
        }
    }

    impl ProblemSource for GatedSource {
        fn fetch(&self, reference: &str) -> BoxFuture<'static, Result<FetchedProblem, SourceError>> {
            let mut open = self.open.clone();
            let fetched = self.inner.fetch(reference);
            Box::pin(async move {
                let _ = open.wait_for(|open| *open).await;
                fetched.await
            })
        }
    }

    /// Memory store whose writes under chosen key prefixes fail a set number of times.
    pub(crate) struct FaultyStore {
        inner: MemoryKvStore,
        failures: DashMap<String, u32>,
    }

    impl FaultyStore {
        pub(crate) fn new() -> Self {
            Self {
                inner: MemoryKvStore::new(),
                failures: DashMap::new(),
            }
        }

        /// Fail the next `times` writes or removals of keys starting with `prefix`.
        pub(crate) fn fail_writes(&self, prefix: &str, times: u32) {
            self.failures.insert(prefix.to_string(), times);
        }

        fn injected(&self, key: &str) -> Option<StorageError> {
            let mut remaining = self
                .failures
                .iter_mut()
                .find(|entry| key.starts_with(entry.key().as_str()))?;
            if *remaining == 0 {
                return None;
            }
            *remaining -= 1;
            Some(StorageError::unavailable(
                format!("write to `{key}` refused"),
                io::Error::other("injected"),
            ))
        }
    }

    impl KvStore for FaultyStore {
        fn get(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<Versioned>>> {
            self.inner.get(key)
        }

        fn compare_and_swap(
            &self,
            key: &str,
            expected: Option<Revision>,
            next: Option<Value>,
        ) -> BoxFuture<'static, StorageResult<SwapResult>> {
            match self.injected(key) {
                Some(err) => Box::pin(async move { Err(err) }),
                None => self.inner.compare_and_swap(key, expected, next),
            }
        }

        fn remove(&self, key: &str) -> BoxFuture<'static, StorageResult<()>> {
            match self.injected(key) {
                Some(err) => Box::pin(async move { Err(err) }),
                None => self.inner.remove(key),
            }
        }

        fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.health_check()
        }
    }

    pub(crate) async fn state() -> SharedState {
        state_with_source(StaticSource::default()).await
    }

    /// Fake socket registered like a real one.
    pub(crate) struct TestClient {
        pub id: ConnectionId,
        rx: mpsc::UnboundedReceiver<Message>,
    }

    impl TestClient {
        pub(crate) fn connect(state: &SharedState) -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            let id = ConnectionId::new();
            state
                .connections()
                .insert(id, ClientConnection { id, tx });
            Self { id, rx }
        }

        /// Every JSON message delivered so far.
        pub(crate) fn drain(&mut self) -> Vec<Value> {
            let mut messages = Vec::new();
            while let Ok(message) = self.rx.try_recv() {
                if let Message::Text(text) = message {
                    messages.push(serde_json::from_str(text.as_str()).unwrap());
                }
            }
            messages
        }

        /// Delivered messages of the given `type`.
        pub(crate) fn received(&mut self, kind: &str) -> Vec<Value> {
            self.drain()
                .into_iter()
                .filter(|message| message["type"] == kind)
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support;

    #[tokio::test]
    async fn degraded_state_refuses_coordinator() {
        let state = test_support::state().await;
        assert!(state.coordinator().await.is_ok());

        let mut watcher = state.degraded_watcher();
        state.update_degraded(true);
        assert!(watcher.has_changed().unwrap());
        assert!(*watcher.borrow_and_update());
        assert!(state.coordinator().await.is_err());

        state.update_degraded(true);
        assert!(!watcher.has_changed().unwrap());
    }
}
