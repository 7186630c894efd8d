use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};

/// Remote key-value store the orchestrator persists metadata and transfer
/// records to.
///
/// Addresses are deterministic: metadata lives under the key's compressed
/// public key, share-transfer pointers under their request address. Writes
/// carry the nonce the caller expects to land at; the store must reject any
/// write whose nonce is not strictly greater than what it already holds,
/// which is the whole optimistic-concurrency story — a losing writer gets
/// [`Error::MetadataConflict`] and must re-fetch and retry.
#[async_trait]
pub trait StorageLayer: Send + Sync {
    /// Fetches the value at `address`, or `None` if nothing was ever set.
    async fn get(&self, address: &str) -> Result<Option<Vec<u8>>>;

    /// Stores `value` at `address` versioned by `expected_nonce`.
    async fn set(&self, address: &str, value: Vec<u8>, expected_nonce: u64) -> Result<()>;
}

/// In-memory [`StorageLayer`] backed by a mutex-guarded map. Stands in for
/// the remote metadata service in tests and single-process setups.
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, (u64, Vec<u8>)>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        MemoryStorage {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageLayer for MemoryStorage {
    async fn get(&self, address: &str) -> Result<Option<Vec<u8>>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| Error::Storage("storage lock poisoned".to_string()))?;
        Ok(entries.get(address).map(|(_, value)| value.clone()))
    }

    async fn set(&self, address: &str, value: Vec<u8>, expected_nonce: u64) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| Error::Storage("storage lock poisoned".to_string()))?;
        if let Some((stored_nonce, _)) = entries.get(address) {
            if *stored_nonce >= expected_nonce {
                debug!(address, stored_nonce, expected_nonce, "rejecting stale write");
                return Err(Error::MetadataConflict(*stored_nonce));
            }
        }
        entries.insert(address.to_string(), (expected_nonce, value));
        Ok(())
    }
}
