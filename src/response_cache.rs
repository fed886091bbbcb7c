//! Typed view over the flat key-value backend: reference lists under the
//! URL key, entries under their response IDs.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{trace, warn};

use crate::entry::{Entry, ResponseRef, decode_refs, encode_refs};
use crate::store::{CacheStore, StoreError};

#[derive(Clone)]
pub(crate) struct ResponseCache {
    store: Arc<dyn CacheStore>,
}

impl ResponseCache {
    pub(crate) fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// Loads and decodes the entry stored under `response_id`. `Ok(None)`
    /// means the key is absent; decode failures and backend errors bubble up
    /// so the caller can log and fall back to a miss.
    pub(crate) async fn entry(&self, response_id: &str) -> Result<Option<Entry>> {
        let data = match self.store.get(response_id).await {
            Ok(data) => data,
            Err(StoreError::NotFound) => return Ok(None),
            Err(err) => {
                return Err(anyhow::Error::new(err)
                    .context(format!("failed to load cache entry {response_id}")));
            }
        };
        let entry = Entry::from_bytes(&data)
            .with_context(|| format!("corrupt cache entry {response_id}"))?;
        Ok(Some(entry))
    }

    pub(crate) async fn set_entry(&self, entry: &Entry) -> Result<()> {
        let data = entry.to_bytes()?;
        self.store
            .set(&entry.id, &data)
            .await
            .with_context(|| format!("failed to store cache entry {}", entry.id))
    }

    /// Loads the reference list for a URL key; absence reads as an empty
    /// list, corruption as an error the caller downgrades to a miss.
    pub(crate) async fn refs(&self, url_key: &str) -> Result<Vec<ResponseRef>> {
        let data = match self.store.get(url_key).await {
            Ok(data) => data,
            Err(StoreError::NotFound) => return Ok(Vec::new()),
            Err(err) => {
                return Err(anyhow::Error::new(err)
                    .context(format!("failed to load cache references for {url_key}")));
            }
        };
        decode_refs(&data).with_context(|| format!("corrupt cache references for {url_key}"))
    }

    pub(crate) async fn set_refs(&self, url_key: &str, refs: &[ResponseRef]) -> Result<()> {
        let data = encode_refs(refs)?;
        self.store
            .set(url_key, &data)
            .await
            .with_context(|| format!("failed to store cache references for {url_key}"))
    }

    /// Best-effort delete; a missing key is success, anything else is
    /// logged and swallowed.
    pub(crate) async fn delete(&self, key: &str) {
        match self.store.delete(key).await {
            Ok(()) => trace!(key, "cache key deleted"),
            Err(StoreError::NotFound) => {}
            Err(err) => warn!(error = %err, key, "cache delete failed"),
        }
    }
}
