//! Automatic persisted queries.

use std::{borrow::Cow, sync::Arc};

use mini_moka::sync::Cache;
use runtime::kv::KvStore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::Instrument;

use crate::{
    cache::Key,
    config::{PersistedQueriesConfig, StoreErrorPolicy},
    error::RequestError,
};

/// Extensions of a request this crate understands.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestExtensions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persisted_query: Option<PersistedQueryRequestExtension>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedQueryRequestExtension {
    pub version: u32,
    #[serde(with = "hex")]
    pub sha256_hash: Vec<u8>,
}

impl PersistedQueryRequestExtension {
    /// Extension referring to `query`.
    pub fn of(query: &str) -> Self {
        PersistedQueryRequestExtension {
            version: 1,
            sha256_hash: Sha256::digest(query.as_bytes()).to_vec(),
        }
    }
}

/// Registered queries, by hash.
pub(crate) struct PersistedQueries {
    backend: Backend,
    key_prefix: String,
    config: PersistedQueriesConfig,
    store_errors: StoreErrorPolicy,
}

enum Backend {
    Store(KvStore),
    Memory(Cache<Vec<u8>, Arc<str>>),
}

impl PersistedQueries {
    pub(crate) fn new(
        store: Option<KvStore>,
        key_prefix: String,
        config: PersistedQueriesConfig,
        store_errors: StoreErrorPolicy,
    ) -> Self {
        let backend = match store {
            Some(store) => Backend::Store(store),
            None => {
                let mut builder = Cache::builder().max_capacity(config.limit);
                if let Some(ttl) = config.ttl {
                    builder = builder.time_to_live(ttl);
                }
                Backend::Memory(builder.build())
            }
        };

        PersistedQueries {
            backend,
            key_prefix,
            config,
            store_errors,
        }
    }

    pub(crate) fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Query text of a request using the extension. A request carrying its query must carry
    /// the matching hash, one without is looked up among the registered queries.
    pub(crate) async fn query<'r>(
        &self,
        query: &'r str,
        ext: &PersistedQueryRequestExtension,
    ) -> Result<Cow<'r, str>, RequestError> {
        if ext.version != 1 {
            return Err(RequestError::PersistedQueryVersion(ext.version));
        }

        if !query.is_empty() {
            if Sha256::digest(query.as_bytes()).as_slice() != ext.sha256_hash.as_slice() {
                return Err(RequestError::InvalidPersistedQueryHash);
            }
            return Ok(Cow::Borrowed(query));
        }

        let registered = match &self.backend {
            Backend::Memory(cache) => cache.get(&ext.sha256_hash).map(|query| query.to_string()),
            Backend::Store(store) => {
                let key = self.key(ext);
                match store
                    .get_json::<String>(&key)
                    .instrument(tracing::info_span!("apq_get"))
                    .await
                {
                    Ok(query) => query,
                    Err(err) if self.store_errors == StoreErrorPolicy::Propagate => {
                        tracing::error!("Error loading persisted query {key}: {err}");
                        return Err(err.into());
                    }
                    Err(err) => {
                        tracing::warn!("Error loading persisted query {key}: {err}");
                        None
                    }
                }
            }
        };

        match registered {
            Some(query) => {
                tracing::debug!("Persisted query HIT - {}", hex::encode(&ext.sha256_hash));
                Ok(Cow::Owned(query))
            }
            None => {
                tracing::debug!("Persisted query MISS - {}", hex::encode(&ext.sha256_hash));
                Err(RequestError::PersistedQueryNotFound)
            }
        }
    }

    /// Registers a query whose hash was checked and whose document is valid. Failing to
    /// store it only means the client will have to send it again.
    pub(crate) async fn register(&self, ext: &PersistedQueryRequestExtension, query: &str) {
        match &self.backend {
            Backend::Memory(cache) => cache.insert(ext.sha256_hash.clone(), Arc::from(query)),
            Backend::Store(store) => {
                let key = self.key(ext);
                if let Err(err) = store
                    .put_json(&key, query, self.config.ttl)
                    .instrument(tracing::info_span!("apq_put"))
                    .await
                {
                    tracing::error!("Error registering persisted query {key}: {err}");
                }
            }
        }
    }

    fn key(&self, ext: &PersistedQueryRequestExtension) -> String {
        Key::Apq {
            prefix: &self.key_prefix,
            ext,
        }
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn memory() -> PersistedQueries {
        PersistedQueries::new(
            None,
            "field-cache".into(),
            PersistedQueriesConfig::default(),
            StoreErrorPolicy::Propagate,
        )
    }

    #[test]
    fn extension_from_json() {
        let extensions: RequestExtensions = serde_json::from_value(json!({
            "persistedQuery": {
                "version": 1,
                "sha256Hash": "001c3174e099bd72b729d0c0a529ba9f5a740c446e2a6e1d71b283cb84ec3065"
            }
        }))
        .unwrap();

        assert_eq!(extensions.persisted_query, Some(PersistedQueryRequestExtension::of("{ hello }")));
    }

    #[tokio::test]
    async fn registers_then_serves_by_hash() {
        let queries = memory();
        let ext = PersistedQueryRequestExtension::of("{ hello }");

        let error = queries.query("", &ext).await.unwrap_err();
        assert!(matches!(error, RequestError::PersistedQueryNotFound), "{error}");

        assert_eq!(queries.query("{ hello }", &ext).await.unwrap(), "{ hello }");
        queries.register(&ext, "{ hello }").await;

        assert_eq!(queries.query("", &ext).await.unwrap(), "{ hello }");
    }

    #[tokio::test]
    async fn rejects_mismatched_hashes_and_versions() {
        let queries = memory();

        let ext = PersistedQueryRequestExtension::of("{ other }");
        let error = queries.query("{ hello }", &ext).await.unwrap_err();
        assert_eq!(error.to_string(), "Invalid persisted query sha256Hash");

        let ext = PersistedQueryRequestExtension {
            version: 2,
            ..PersistedQueryRequestExtension::of("{ hello }")
        };
        let error = queries.query("{ hello }", &ext).await.unwrap_err();
        assert_eq!(error.to_string(), "Persisted query version 2 is not supported");
    }
}
