use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::BoxFuture;
use serde_json::Value;

use crate::dao::storage::StorageResult;

use super::{KvStore, Revision, SwapResult, Versioned};

/// Process-local store backed by a [`DashMap`].
///
/// Each compare-and-swap runs under the shard lock of its key, which gives the
/// per-key linearizability the coordinator relies on. Revisions come from a
/// single counter so they are never reused, even across delete/recreate.
#[derive(Clone, Default)]
pub struct MemoryKvStore {
    entries: Arc<DashMap<String, Versioned>>,
    next_revision: Arc<AtomicU64>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn issue_revision(&self) -> Revision {
        let n = self.next_revision.fetch_add(1, Ordering::Relaxed) + 1;
        Revision(n.to_string())
    }

    fn swap_now(&self, key: &str, expected: Option<Revision>, next: Option<Value>) -> SwapResult {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if expected.as_ref() != Some(&occupied.get().revision) {
                    return SwapResult::Conflict;
                }
                match next {
                    Some(value) => {
                        let revision = self.issue_revision();
                        occupied.insert(Versioned {
                            revision: revision.clone(),
                            value,
                        });
                        SwapResult::Swapped(Some(revision))
                    }
                    None => {
                        occupied.remove();
                        SwapResult::Swapped(None)
                    }
                }
            }
            Entry::Vacant(vacant) => {
                if expected.is_some() {
                    return SwapResult::Conflict;
                }
                match next {
                    Some(value) => {
                        let revision = self.issue_revision();
                        vacant.insert(Versioned {
                            revision: revision.clone(),
                            value,
                        });
                        SwapResult::Swapped(Some(revision))
                    }
                    None => SwapResult::Swapped(None),
                }
            }
        }
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<Versioned>>> {
        let store = self.clone();
        let key = key.to_string();
        Box::pin(async move { Ok(store.entries.get(&key).map(|entry| entry.value().clone())) })
    }

    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<Revision>,
        next: Option<Value>,
    ) -> BoxFuture<'static, StorageResult<SwapResult>> {
        let store = self.clone();
        let key = key.to_string();
        Box::pin(async move { Ok(store.swap_now(&key, expected, next)) })
    }

    fn remove(&self, key: &str) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let key = key.to_string();
        Box::pin(async move {
            store.entries.remove(&key);
            Ok(())
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}
