//! Optimistic read-transform-write on a single key.
//!
//! Every change to authoritative room state goes through [`Coordinator::mutate`]: the
//! current document is read together with its revision, handed to a pure transform, and
//! written back with a compare-and-swap. A concurrent writer makes the swap fail, in which
//! case the whole cycle runs again against the fresh value.

use std::{convert::Infallible, sync::Arc, time::Duration};

use rand::Rng;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::dao::{
    kv_store::{KvStore, SwapResult},
    storage::{StorageError, StorageResult},
};

/// Attempts made before a contended mutation gives up.
pub const DEFAULT_RETRY_BUDGET: u32 = 16;
const BACKOFF_BASE: Duration = Duration::from_millis(2);
const BACKOFF_CAP: Duration = Duration::from_millis(50);

/// What a transform wants written.
#[derive(Debug, Clone, PartialEq)]
pub enum Change<T> {
    Put(T),
    Delete,
}

/// Result of a mutation that reached a decision.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T, A> {
    /// The transform's change was written; carries the value now stored.
    Committed(Option<T>),
    /// The transform refused; nothing was written.
    Aborted { current: Option<T>, reason: A },
}

impl<T, A> Outcome<T, A> {
    pub fn is_committed(&self) -> bool {
        matches!(self, Outcome::Committed(_))
    }

    /// The committed value, or the abort reason as an error.
    pub fn into_result(self) -> Result<Option<T>, A> {
        match self {
            Outcome::Committed(value) => Ok(value),
            Outcome::Aborted { reason, .. } => Err(reason),
        }
    }
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("gave up on `{key}` after {attempts} conflicting writes")]
    RetriesExhausted { key: String, attempts: u32 },
}

/// Cheap, cloneable handle over the shared store.
#[derive(Clone)]
pub struct Coordinator {
    store: Arc<dyn KvStore>,
    retry_budget: u32,
}

impl Coordinator {
    pub fn new(store: Arc<dyn KvStore>, retry_budget: u32) -> Self {
        Self {
            store,
            retry_budget: retry_budget.max(1),
        }
    }

    /// Read and decode the record under `key`.
    pub async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CoordinatorError> {
        match self.store.get(key).await? {
            Some(versioned) => Ok(Some(decode(key, versioned.value)?)),
            None => Ok(None),
        }
    }

    /// Remove `key` regardless of its revision.
    pub async fn remove(&self, key: &str) -> Result<(), CoordinatorError> {
        Ok(self.store.remove(key).await?)
    }

    /// Overwrite `key` with `value` whatever is stored there.
    pub async fn put<T>(&self, key: &str, value: T) -> Result<(), CoordinatorError>
    where
        T: Serialize + DeserializeOwned + Clone,
    {
        self.mutate(key, |_: Option<T>| Ok::<_, Infallible>(Change::Put(value.clone())))
            .await
            .map(|_| ())
    }

    pub async fn health_check(&self) -> StorageResult<()> {
        self.store.health_check().await
    }

    /// Apply `transform` to the record under `key` until the write lands or the transform aborts.
    ///
    /// The transform may run several times and must not have side effects.
    pub async fn mutate<T, A, F>(
        &self,
        key: &str,
        mut transform: F,
    ) -> Result<Outcome<T, A>, CoordinatorError>
    where
        T: Serialize + DeserializeOwned + Clone,
        F: FnMut(Option<T>) -> Result<Change<T>, A>,
    {
        let mut backoff = BACKOFF_BASE;

        for attempt in 1..=self.retry_budget {
            let (revision, current) = match self.store.get(key).await? {
                Some(versioned) => (
                    Some(versioned.revision),
                    Some(decode::<T>(key, versioned.value)?),
                ),
                None => (None, None),
            };

            let change = match transform(current.clone()) {
                Ok(change) => change,
                Err(reason) => return Ok(Outcome::Aborted { current, reason }),
            };

            let (next, committed) = match change {
                Change::Put(value) => (Some(encode(key, &value)?), Some(value)),
                // Deleting an absent record is already done.
                Change::Delete if revision.is_none() => return Ok(Outcome::Committed(None)),
                Change::Delete => (None, None),
            };

            match self.store.compare_and_swap(key, revision, next).await? {
                SwapResult::Swapped(_) => return Ok(Outcome::Committed(committed)),
                SwapResult::Conflict => {
                    debug!(key, attempt, "write conflict; retrying");
                    let delay = {
                        let jitter = rand::rng().random_range(0..=backoff.as_micros() as u64);
                        Duration::from_micros(jitter)
                    };
                    sleep(delay).await;
                    backoff = (backoff * 2).min(BACKOFF_CAP);
                }
            }
        }

        warn!(key, attempts = self.retry_budget, "mutation retry budget exhausted");
        Err(CoordinatorError::RetriesExhausted {
            key: key.to_string(),
            attempts: self.retry_budget,
        })
    }
}

fn decode<T: DeserializeOwned>(key: &str, value: serde_json::Value) -> StorageResult<T> {
    serde_json::from_value(value).map_err(|err| StorageError::corrupt(key, err))
}

fn encode<T: Serialize>(key: &str, value: &T) -> StorageResult<serde_json::Value> {
    serde_json::to_value(value).map_err(|err| StorageError::corrupt(key, err))
}
