use std::{fmt, sync::Arc, time::Duration};

use bytes::Bytes;

#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("Kv error: {0}")]
    Kv(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type KvResult<T> = Result<T, KvError>;

/// Cheaply cloneable handle over whatever store the application plugged in.
#[derive(Clone)]
pub struct KvStore(Arc<dyn KvStoreInner>);

impl KvStore {
    pub fn new(inner: impl KvStoreInner + 'static) -> Self {
        Self(Arc::new(inner))
    }

    pub async fn get_json<T: serde::de::DeserializeOwned>(&self, name: &str) -> KvResult<Option<T>> {
        let bytes = self.get(name).await?;
        bytes
            .map(|bytes| serde_json::from_slice(&bytes))
            .transpose()
            .map_err(Into::into)
    }

    /// Stores `value` as JSON. Without `expiration_ttl` the entry lives until the store
    /// evicts it on its own.
    pub async fn put_json<T: serde::Serialize + ?Sized>(
        &self,
        name: &str,
        value: &T,
        expiration_ttl: Option<Duration>,
    ) -> KvResult<()> {
        let bytes = serde_json::to_vec(value)?;
        self.put(name, bytes.into(), expiration_ttl).await
    }
}

impl std::ops::Deref for KvStore {
    type Target = dyn KvStoreInner;
    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl fmt::Debug for KvStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KvStore").finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
pub trait KvStoreInner: Send + Sync {
    async fn get(&self, name: &str) -> KvResult<Option<Bytes>>;
    async fn put(&self, name: &str, bytes: Bytes, expiration_ttl: Option<Duration>) -> KvResult<()>;
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Mutex};

    use super::*;

    #[derive(Default)]
    struct MapStore(Mutex<HashMap<String, Bytes>>);

    #[async_trait::async_trait]
    impl KvStoreInner for MapStore {
        async fn get(&self, name: &str) -> KvResult<Option<Bytes>> {
            Ok(self.0.lock().unwrap().get(name).cloned())
        }

        async fn put(&self, name: &str, bytes: Bytes, _expiration_ttl: Option<Duration>) -> KvResult<()> {
            self.0.lock().unwrap().insert(name.to_string(), bytes);
            Ok(())
        }
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let store = KvStore::new(MapStore::default());
        let value: Option<serde_json::Value> = store.get_json("nope").await.unwrap();
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn undecodable_entry_is_an_error() {
        let store = KvStore::new(MapStore::default());
        store
            .put("broken", Bytes::from_static(b"{not json"), None)
            .await
            .unwrap();

        let result = store.get_json::<serde_json::Value>("broken").await;
        assert!(matches!(result, Err(KvError::Serialization(_))), "{result:?}");
    }
}
