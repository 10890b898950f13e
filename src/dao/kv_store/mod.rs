#[cfg(feature = "couch-store")]
pub mod couchdb;
pub mod memory;

use std::fmt;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dao::storage::StorageResult;

pub use memory::MemoryKvStore;

/// Opaque version token issued by a store for a single key.
///
/// Two reads of the same key return equal revisions iff no write happened in between.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(pub String);

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored JSON document together with the revision it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned {
    pub revision: Revision,
    pub value: Value,
}

/// Result of a conditional write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapResult {
    /// The write was applied; carries the new revision (`None` after a delete).
    Swapped(Option<Revision>),
    /// Another writer got there first; the caller must re-read.
    Conflict,
}

/// Linearizable-per-key document store used for all authoritative room state.
pub trait KvStore: Send + Sync {
    /// Read the current document stored under `key`.
    fn get(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<Versioned>>>;

    /// Write `next` (or delete when `None`) only if the key is still at `expected`.
    ///
    /// `expected == None` means the key must currently be absent.
    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<Revision>,
        next: Option<Value>,
    ) -> BoxFuture<'static, StorageResult<SwapResult>>;

    /// Unconditionally delete `key`; deleting an absent key succeeds.
    fn remove(&self, key: &str) -> BoxFuture<'static, StorageResult<()>>;

    /// Cheap connectivity check used by the storage supervisor.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
}
