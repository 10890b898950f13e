use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{kv_store::KvStore, storage::StorageError},
    state::SharedState,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_FAILED_CHECKS: u32 = 3;

/// Connect to the store and keep the shared state in degraded mode while it is unreachable.
pub async fn run<F, Fut>(state: SharedState, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn KvStore>, StorageError>> + Send,
{
    let mut delay = INITIAL_DELAY;

    loop {
        match connect().await {
            Ok(store) => {
                state.install_store(store.clone()).await;
                info!("storage connection established; leaving degraded mode");
                delay = INITIAL_DELAY;
                watch_health(&state, store.as_ref()).await;
                warn!("storage kept failing health checks; reconnecting");
            }
            Err(err) => {
                warn!(error = %err, "storage connection attempt failed");
            }
        }
        sleep(delay).await;
        delay = (delay * 2).min(MAX_DELAY);
    }
}

/// Poll `store` until it fails [`MAX_FAILED_CHECKS`] checks in a row.
async fn watch_health(state: &SharedState, store: &dyn KvStore) {
    let mut failures = 0;
    let mut retry_delay = INITIAL_DELAY;

    while failures < MAX_FAILED_CHECKS {
        match store.health_check().await {
            Ok(()) => {
                if state.is_degraded() {
                    info!("storage healthy again; leaving degraded mode");
                    state.update_degraded(false);
                }
                failures = 0;
                retry_delay = INITIAL_DELAY;
                sleep(HEALTH_POLL_INTERVAL).await;
            }
            Err(err) => {
                if failures == 0 {
                    warn!(error = %err, "storage health check failed; entering degraded mode");
                    state.update_degraded(true);
                } else {
                    warn!(attempt = failures, error = %err, "storage health check failed again");
                }
                failures += 1;
                sleep(retry_delay).await;
                retry_delay = (retry_delay * 2).min(MAX_DELAY);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use futures::future::BoxFuture;
    use serde_json::Value;

    use super::*;
    use crate::{
        dao::{
            kv_store::{MemoryKvStore, Revision, SwapResult, Versioned},
            storage::StorageResult,
        },
        state::test_support,
    };

    /// Memory store whose health can be toggled.
    struct SwitchableStore {
        inner: MemoryKvStore,
        healthy: Arc<AtomicBool>,
    }

    impl KvStore for SwitchableStore {
        fn get(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<Versioned>>> {
            self.inner.get(key)
        }

        fn compare_and_swap(
            &self,
            key: &str,
            expected: Option<Revision>,
            next: Option<Value>,
        ) -> BoxFuture<'static, StorageResult<SwapResult>> {
            self.inner.compare_and_swap(key, expected, next)
        }

        fn remove(&self, key: &str) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.remove(key)
        }

        fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
            let healthy = self.healthy.load(Ordering::SeqCst);
            Box::pin(async move {
                if healthy {
                    Ok(())
                } else {
                    Err(StorageError::unavailable(
                        "switched off".into(),
                        std::io::Error::other("down"),
                    ))
                }
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failing_health_check_toggles_degraded_mode() {
        let state = test_support::state().await;
        let healthy = Arc::new(AtomicBool::new(true));
        let store = SwitchableStore {
            inner: MemoryKvStore::new(),
            healthy: healthy.clone(),
        };

        let watcher_state = state.clone();
        let watcher = tokio::spawn(async move { watch_health(&watcher_state, &store).await });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!state.is_degraded());

        healthy.store(false, Ordering::SeqCst);
        tokio::time::sleep(HEALTH_POLL_INTERVAL + Duration::from_millis(1)).await;
        assert!(state.is_degraded());

        healthy.store(true, Ordering::SeqCst);
        tokio::time::sleep(MAX_DELAY).await;
        assert!(!state.is_degraded());

        watcher.abort();
    }
}
