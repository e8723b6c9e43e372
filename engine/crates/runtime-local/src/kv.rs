use std::{
    collections::{BinaryHeap, HashMap},
    time::{Duration, Instant},
};

use bytes::Bytes;
use futures_util::lock::Mutex;
use runtime::kv::{KvError, KvResult, KvStoreInner};

/// A key-value store living in the process memory.
///
/// Entries put with a TTL are dropped once it elapsed, the others stay until the store
/// itself is dropped.
pub struct InMemoryKvStore {
    inner: Mutex<StoreInner>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn new_with_time(now: impl Fn() -> Instant + Sync + Send + 'static) -> Self {
        InMemoryKvStore {
            inner: Mutex::new(StoreInner {
                now: Box::new(now),
                key_to_entry: HashMap::new(),
                deletion_tasks: BinaryHeap::new(),
            }),
        }
    }

    pub async fn len(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let now = (inner.now)();
        inner.purge(now);
        inner.key_to_entry.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for InMemoryKvStore {
    fn default() -> Self {
        InMemoryKvStore {
            inner: Mutex::new(StoreInner {
                now: Box::new(Instant::now),
                key_to_entry: HashMap::new(),
                deletion_tasks: BinaryHeap::new(),
            }),
        }
    }
}

struct StoreInner {
    // for testing
    now: Box<dyn Fn() -> Instant + Sync + Send>,
    key_to_entry: HashMap<String, StoreEntry>,
    deletion_tasks: BinaryHeap<DeletionTask>,
}

struct StoreEntry {
    bytes: Bytes,
    expires_at: Option<Instant>,
}

#[derive(Debug, PartialEq, Eq)]
struct DeletionTask {
    key: String,
    to_delete_at: Instant,
}

impl PartialOrd for DeletionTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DeletionTask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.to_delete_at.cmp(&other.to_delete_at).reverse()
    }
}

impl StoreInner {
    fn purge(&mut self, now: Instant) {
        while self
            .deletion_tasks
            .peek()
            .is_some_and(|task| task.to_delete_at <= now)
        {
            let Some(DeletionTask { key, to_delete_at }) = self.deletion_tasks.pop() else {
                break;
            };

            // The key may have been overwritten since, with another expiry or none at all.
            if self
                .key_to_entry
                .get(&key)
                .is_some_and(|entry| entry.expires_at == Some(to_delete_at))
            {
                self.key_to_entry.remove(&key);
            }
        }
    }
}

#[async_trait::async_trait]
impl KvStoreInner for InMemoryKvStore {
    async fn get(&self, name: &str) -> KvResult<Option<Bytes>> {
        let mut inner = self.inner.lock().await;
        let now = (inner.now)();
        inner.purge(now);

        Ok(inner
            .key_to_entry
            .get(name)
            .filter(|entry| match entry.expires_at {
                Some(expires_at) => now < expires_at,
                None => true,
            })
            .map(|entry| entry.bytes.clone()))
    }

    async fn put(&self, name: &str, bytes: Bytes, expiration_ttl: Option<Duration>) -> KvResult<()> {
        let mut inner = self.inner.lock().await;
        let now = (inner.now)();
        inner.purge(now);

        let expires_at = expiration_ttl
            .map(|ttl| {
                now.checked_add(ttl)
                    .ok_or_else(|| KvError::Kv(format!("ttl of {ttl:?} is out of range")))
            })
            .transpose()?;

        let key = name.to_string();
        if let Some(to_delete_at) = expires_at {
            inner.deletion_tasks.push(DeletionTask {
                key: key.clone(),
                to_delete_at,
            });
        }
        inner.key_to_entry.insert(key, StoreEntry { bytes, expires_at });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicU64, Ordering::Relaxed},
        time::{Duration, Instant},
    };

    use bytes::Bytes;
    use runtime::kv::{KvStore, KvStoreInner};

    use super::InMemoryKvStore;

    fn store_with_clock() -> (InMemoryKvStore, &'static AtomicU64) {
        let offset: &'static AtomicU64 = Box::leak(Box::new(AtomicU64::new(0)));
        let store = InMemoryKvStore::new_with_time({
            let start = Instant::now();
            move || start.checked_add(Duration::from_secs(offset.load(Relaxed))).unwrap()
        });
        (store, offset)
    }

    #[tokio::test]
    async fn get_put() {
        let (store, _) = store_with_clock();

        store.put("test", Bytes::from_static(b"value"), None).await.unwrap();

        assert_eq!(store.get("unknown").await.unwrap(), None);
        assert_eq!(store.get("test").await.unwrap(), Some(Bytes::from_static(b"value")));
    }

    #[tokio::test]
    async fn entries_expire_after_their_ttl() {
        let (store, offset) = store_with_clock();

        store
            .put("short", Bytes::from_static(b"1"), Some(Duration::from_secs(10)))
            .await
            .unwrap();
        store.put("forever", Bytes::from_static(b"2"), None).await.unwrap();

        offset.store(9, Relaxed);
        assert!(store.get("short").await.unwrap().is_some());

        offset.store(10, Relaxed);
        assert_eq!(store.get("short").await.unwrap(), None);
        assert_eq!(store.len().await, 1);

        offset.store(1_000_000, Relaxed);
        assert_eq!(store.get("forever").await.unwrap(), Some(Bytes::from_static(b"2")));
    }

    #[tokio::test]
    async fn overwriting_an_entry_drops_its_previous_expiry() {
        let (store, offset) = store_with_clock();

        store
            .put("key", Bytes::from_static(b"old"), Some(Duration::from_secs(5)))
            .await
            .unwrap();
        store
            .put("key", Bytes::from_static(b"new"), Some(Duration::from_secs(60)))
            .await
            .unwrap();

        offset.store(30, Relaxed);
        assert_eq!(store.get("key").await.unwrap(), Some(Bytes::from_static(b"new")));
    }

    #[tokio::test]
    async fn works_behind_a_kv_store_handle() {
        let store = KvStore::new(InMemoryKvStore::new());

        store
            .put_json("json", &pair(), Some(Duration::from_secs(60)))
            .await
            .unwrap();

        assert_eq!(
            store.get("json").await.unwrap(),
            Some(Bytes::from_static(br#"["a",1]"#))
        );
    }

    fn pair() -> (&'static str, u32) {
        ("a", 1)
    }
}
