use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::{collections::HashSet, sync::Arc};
use tracing::{debug, warn};

use crate::error::{InboxError, Result};
use crate::services::KvStore;
use inbox_api::MessageId;

/// Storage key holding the JSON array of hidden message ids.
pub const DEFAULT_LEDGER_KEY: &str = "deleted_messages";

const MAX_WRITE_ATTEMPTS: usize = 8;

/// Set of message ids hidden on this device only ("delete for me").
///
/// The ledger is shared between every view of the inbox. Membership checks are
/// answered from the in-process cache; every mutation updates the cache first
/// and then merges into storage with compare-and-swap, so concurrent holders
/// never overwrite each other's ids. A write only adds the ids this holder hid
/// and has not stored yet, and the cache is then replaced by what was stored,
/// so ids forgotten through another holder are not written back. Storage
/// failures are logged and leave the cache ahead of the durable copy until the
/// next successful write.
pub struct DeletionLedger {
    store: Arc<dyn KvStore>,
    key: String,
    hidden: RwLock<HashSet<MessageId>>,
    /// Hidden here but not yet in storage.
    unsaved: Mutex<HashSet<MessageId>>,
}

impl DeletionLedger {
    /// Load the ledger stored under `key`. Unreadable state yields an empty ledger.
    pub async fn load(store: Arc<dyn KvStore>, key: impl Into<String>) -> Self {
        let key = key.into();
        let hidden = match store.get(&key).await {
            Ok(raw) => decode(raw.as_deref()),
            Err(e) => {
                warn!(%key, "failed to read deletion ledger: {e}");
                HashSet::new()
            }
        };
        debug!(%key, count = hidden.len(), "deletion ledger loaded");
        Self {
            store,
            key,
            hidden: RwLock::new(hidden),
            unsaved: Mutex::new(HashSet::new()),
        }
    }

    pub fn is_hidden(&self, id: MessageId) -> bool {
        self.hidden.read().contains(&id)
    }

    pub fn len(&self) -> usize {
        self.hidden.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hidden.read().is_empty()
    }

    /// Snapshot of the hidden ids, ascending.
    pub fn ids(&self) -> Vec<MessageId> {
        let mut ids: Vec<_> = self.hidden.read().iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub async fn hide(&self, id: MessageId) {
        self.hide_all([id]).await
    }

    /// Hide a batch of ids with a single storage write.
    pub async fn hide_all<I>(&self, ids: I)
    where
        I: IntoIterator<Item = MessageId>,
    {
        let added: Vec<MessageId> = {
            let mut hidden = self.hidden.write();
            ids.into_iter().filter(|id| hidden.insert(*id)).collect()
        };
        if added.is_empty() {
            return;
        }
        self.unsaved.lock().extend(added);
        if let Err(e) = self.merge(&[]).await {
            warn!(key = %self.key, "failed to persist hidden messages: {e}");
        }
    }

    /// Drop ids whose messages no longer exist remotely.
    pub async fn forget<I>(&self, ids: I)
    where
        I: IntoIterator<Item = MessageId>,
    {
        let removed: Vec<MessageId> = {
            let mut hidden = self.hidden.write();
            ids.into_iter().filter(|id| hidden.remove(id)).collect()
        };
        if removed.is_empty() {
            return;
        }
        {
            let mut unsaved = self.unsaved.lock();
            for id in &removed {
                unsaved.remove(id);
            }
        }
        if let Err(e) = self.merge(&removed).await {
            warn!(key = %self.key, "failed to persist pruned ledger: {e}");
        }
    }

    /// Write unsaved hides through to storage and refresh the cache from it,
    /// reporting failures.
    pub async fn flush(&self) -> Result<()> {
        self.merge(&[]).await
    }

    /// Persist `stored ∪ unsaved − removed` with compare-and-swap, then take
    /// the stored set as the new cache.
    async fn merge(&self, removed: &[MessageId]) -> Result<()> {
        for attempt in 0..MAX_WRITE_ATTEMPTS {
            let current = self.store.get(&self.key).await?;
            let mut merged = decode(current.as_deref());
            let added: Vec<MessageId> = self.unsaved.lock().iter().copied().collect();
            merged.extend(added.iter().copied());
            for id in removed {
                merged.remove(id);
            }
            let encoded = encode(&merged)?;
            let written = current.as_deref() == Some(encoded.as_str())
                || self
                    .store
                    .compare_and_swap(&self.key, current.as_deref(), &encoded)
                    .await?;
            if written {
                let mut unsaved = self.unsaved.lock();
                for id in &added {
                    unsaved.remove(id);
                }
                // hides made while this write was in flight stay visible
                merged.extend(unsaved.iter().copied());
                *self.hidden.write() = merged;
                return Ok(());
            }
            debug!(attempt, key = %self.key, "ledger changed underneath write, retrying");
        }
        Err(InboxError::Contended(self.key.clone()))
    }
}

fn decode(raw: Option<&str>) -> HashSet<MessageId> {
    let Some(raw) = raw else {
        return HashSet::new();
    };
    match serde_json::from_str::<Vec<Value>>(raw) {
        // ids written by older clients may be strings
        Ok(values) => values
            .iter()
            .filter_map(|v| match v {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.parse().ok(),
                _ => None,
            })
            .collect(),
        Err(e) => {
            warn!("ignoring malformed deletion ledger: {e}");
            HashSet::new()
        }
    }
}

fn encode(ids: &HashSet<MessageId>) -> Result<String> {
    let mut sorted: Vec<_> = ids.iter().copied().collect();
    sorted.sort_unstable();
    Ok(serde_json::to_string(&sorted)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{FileKvStore, MemoryKvStore};
    use async_trait::async_trait;

    #[tokio::test]
    async fn hide_is_idempotent_and_visible() {
        let store = Arc::new(MemoryKvStore::new());
        let ledger = DeletionLedger::load(store.clone(), DEFAULT_LEDGER_KEY).await;
        assert!(!ledger.is_hidden(42));
        ledger.hide(42).await;
        ledger.hide(42).await;
        assert!(ledger.is_hidden(42));
        assert_eq!(ledger.len(), 1);
        assert_eq!(
            store.get(DEFAULT_LEDGER_KEY).await.unwrap().as_deref(),
            Some("[42]")
        );
    }

    #[tokio::test]
    async fn survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = Arc::new(FileKvStore::open(dir.path()).await.unwrap());
            let ledger = DeletionLedger::load(store, DEFAULT_LEDGER_KEY).await;
            ledger.hide(42).await;
        }
        let store = Arc::new(FileKvStore::open(dir.path()).await.unwrap());
        let ledger = DeletionLedger::load(store, DEFAULT_LEDGER_KEY).await;
        assert!(ledger.is_hidden(42));
    }

    #[tokio::test]
    async fn hide_all_matches_sequential_hides() {
        let ids = [5, 3, 5, 9, 1];
        let batch = DeletionLedger::load(Arc::new(MemoryKvStore::new()), "k").await;
        batch.hide_all(ids).await;
        let single = DeletionLedger::load(Arc::new(MemoryKvStore::new()), "k").await;
        for id in ids {
            single.hide(id).await;
        }
        assert_eq!(batch.ids(), single.ids());
        assert_eq!(batch.ids(), vec![1, 3, 5, 9]);
    }

    #[tokio::test]
    async fn holders_do_not_lose_each_others_ids() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let chats = DeletionLedger::load(store.clone(), "k").await;
        let detail = DeletionLedger::load(store.clone(), "k").await;
        chats.hide(1).await;
        detail.hide(2).await;
        assert!(detail.is_hidden(1));
        let reloaded = DeletionLedger::load(store, "k").await;
        assert_eq!(reloaded.ids(), vec![1, 2]);
    }

    #[tokio::test]
    async fn forget_prunes_storage() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let ledger = DeletionLedger::load(store.clone(), "k").await;
        ledger.hide_all([1, 2, 3]).await;
        ledger.forget([2, 7]).await;
        assert!(!ledger.is_hidden(2));
        let reloaded = DeletionLedger::load(store, "k").await;
        assert_eq!(reloaded.ids(), vec![1, 3]);
    }

    #[tokio::test]
    async fn stale_holder_does_not_restore_forgotten_ids() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let chats = DeletionLedger::load(store.clone(), "k").await;
        let detail = DeletionLedger::load(store.clone(), "k").await;
        chats.hide_all([1, 2]).await;
        detail.hide(3).await;
        assert!(detail.is_hidden(1));

        chats.forget([1]).await;
        detail.hide(4).await;
        assert!(!detail.is_hidden(1));
        let reloaded = DeletionLedger::load(store, "k").await;
        assert_eq!(reloaded.ids(), vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn tolerates_legacy_and_malformed_blobs() {
        let store = Arc::new(MemoryKvStore::new());
        store.set("k", r#"["12", 13, null]"#).await.unwrap();
        let ledger = DeletionLedger::load(store.clone(), "k").await;
        assert_eq!(ledger.ids(), vec![12, 13]);

        store.set("bad", "not json").await.unwrap();
        let ledger = DeletionLedger::load(store, "bad").await;
        assert!(ledger.is_empty());
    }

    struct BrokenStore;

    #[async_trait]
    impl KvStore for BrokenStore {
        async fn get(&self, _key: &str) -> Result<Option<String>> {
            Err(InboxError::Io(std::io::Error::other("disk gone")))
        }
        async fn set(&self, _key: &str, _value: &str) -> Result<()> {
            Err(InboxError::Io(std::io::Error::other("disk gone")))
        }
        async fn compare_and_swap(&self, _: &str, _: Option<&str>, _: &str) -> Result<bool> {
            Err(InboxError::Io(std::io::Error::other("disk gone")))
        }
    }

    #[tokio::test]
    async fn storage_failures_keep_session_view() {
        let ledger = DeletionLedger::load(Arc::new(BrokenStore), "k").await;
        ledger.hide(8).await;
        assert!(ledger.is_hidden(8));
        assert!(ledger.flush().await.is_err());
    }

    struct AlwaysRacing(MemoryKvStore);

    #[async_trait]
    impl KvStore for AlwaysRacing {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            self.0.get(key).await
        }
        async fn set(&self, key: &str, value: &str) -> Result<()> {
            self.0.set(key, value).await
        }
        async fn compare_and_swap(&self, _: &str, _: Option<&str>, _: &str) -> Result<bool> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn gives_up_after_bounded_retries() {
        let ledger = DeletionLedger::load(Arc::new(AlwaysRacing(MemoryKvStore::new())), "k").await;
        ledger.hide(1).await;
        assert!(matches!(ledger.flush().await, Err(InboxError::Contended(_))));
    }
}
