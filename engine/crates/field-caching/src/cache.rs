//! Resolution cache: a dispatch link serving field values from the store, and the keys
//! of everything this crate puts into it.

use std::{fmt, future::Future, time::Duration};

use base64::{display::Base64Display, engine::general_purpose::URL_SAFE_NO_PAD};
use runtime::kv::{KvError, KvStore};
use serde::{de::DeserializeOwned, Serialize};
use tracing::Instrument;

use crate::{
    config::StoreErrorPolicy,
    context::ResolverContext,
    error::FieldError,
    fingerprint::SelectionFingerprint,
    middleware::{Middleware, Next},
    persisted::PersistedQueryRequestExtension,
    policy::CachePolicies,
    response::ServerResult,
    Variables,
};

mod namespaces {
    pub const FIELD: &str = "field";
    pub const OPERATION: &str = "op";
    pub const APQ: &str = "apq";
}

/// Serves fields with a cache policy from the store, resolving and storing them on a miss.
///
/// The stored value is the field's completed response value, so a hit resolves nothing
/// beneath the field. Values with errors anywhere beneath the field are not stored.
pub(crate) struct CacheMiddleware {
    pub(crate) policies: CachePolicies,
    pub(crate) store: KvStore,
    pub(crate) key_prefix: String,
    pub(crate) default_ttl: Option<Duration>,
    pub(crate) store_errors: StoreErrorPolicy,
}

#[async_trait::async_trait]
impl Middleware for CacheMiddleware {
    fn applies_to(&self, type_name: &str, field_name: &str) -> bool {
        self.policies.contains(type_name, field_name)
    }

    async fn resolve(&self, ctx: ResolverContext<'_>, next: Next<'_>) -> ServerResult<serde_json::Value> {
        let Some(policy) = self
            .policies
            .get(ctx.info.parent_type_name(), ctx.info.field_name())
        else {
            return next.run(ctx).await;
        };

        let Some(config) = policy.cache_config(ctx)? else {
            return next.run(ctx).await;
        };

        let fingerprint = ctx.info.selection_fingerprint().map_err(FieldError::from)?;
        let shape = ctx.info.response_shape().map_err(FieldError::from)?;
        let key = Key::Field {
            prefix: &self.key_prefix,
            type_name: ctx.info.parent_type_name(),
            field_name: ctx.info.field_name(),
            cache_key: &config.cache_key,
            fingerprint: &fingerprint,
            shape: &shape,
        }
        .to_string();

        cached(
            &self.store,
            self.store_errors,
            &key,
            config.ttl.or(self.default_ttl),
            |_| !ctx.info.has_errors(),
            next.run(ctx),
        )
        .await
    }
}

/// Looks `key` up in the store, falling back to `resolve` and storing its successful
/// results accepted by `should_store`.
pub(crate) async fn cached<T, E>(
    store: &KvStore,
    store_errors: StoreErrorPolicy,
    key: &str,
    ttl: Option<Duration>,
    should_store: impl FnOnce(&T) -> bool,
    resolve: impl Future<Output = Result<T, E>>,
) -> Result<T, E>
where
    T: Serialize + DeserializeOwned,
    E: From<KvError>,
{
    let cached_value = match store
        .get_json::<T>(key)
        .instrument(tracing::info_span!("cache_get"))
        .await
    {
        Ok(value) => value,
        Err(err) => match store_errors {
            StoreErrorPolicy::Propagate => {
                tracing::error!("Error cache GET {key}: {err}");
                return Err(err.into());
            }
            StoreErrorPolicy::Bypass => {
                tracing::warn!("Error loading {key} from cache: {err}");
                None
            }
        },
    };

    if let Some(value) = cached_value {
        tracing::debug!("Cache HIT - {key}");
        return Ok(value);
    }

    tracing::debug!("Cache MISS - {key}");
    let value = resolve.await?;

    if should_store(&value) {
        if let Err(err) = store
            .put_json(key, &value, ttl)
            .instrument(tracing::info_span!("cache_put"))
            .await
        {
            tracing::error!("Error cache PUT {key}: {err}");
            if store_errors == StoreErrorPolicy::Propagate {
                return Err(err.into());
            }
        }
    }

    Ok(value)
}

/// Store key, URL-safe and stable across processes sharing a store.
pub(crate) enum Key<'a> {
    Field {
        prefix: &'a str,
        type_name: &'a str,
        field_name: &'a str,
        cache_key: &'a str,
        fingerprint: &'a SelectionFingerprint,
        shape: &'a str,
    },
    Operation {
        prefix: &'a str,
        query: &'a str,
        operation_name: Option<&'a str>,
        variables: &'a Variables,
    },
    Apq {
        prefix: &'a str,
        ext: &'a PersistedQueryRequestExtension,
    },
}

impl fmt::Display for Key<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut hasher = blake3::Hasher::new();

        let (prefix, namespace) = match self {
            Key::Field {
                prefix,
                type_name,
                field_name,
                cache_key,
                fingerprint,
                shape,
            } => {
                for part in [type_name, field_name, cache_key] {
                    hasher.update(&part.len().to_le_bytes());
                    hasher.update(part.as_bytes());
                }
                // Map keys are sorted and argument values canonical, the output is stable.
                let fingerprint = serde_json::to_vec(fingerprint).map_err(|_| fmt::Error)?;
                hasher.update(&fingerprint.len().to_le_bytes());
                hasher.update(&fingerprint);
                hasher.update(shape.as_bytes());
                (prefix, namespaces::FIELD)
            }
            Key::Operation {
                prefix,
                query,
                operation_name,
                variables,
            } => {
                hasher.update(&query.len().to_le_bytes());
                hasher.update(query.as_bytes());
                if let Some(name) = operation_name {
                    hasher.update(name.as_bytes());
                }
                // NULL bytes acting as a separator as it cannot be present in the
                // operation name.
                hasher.update(&[0x00]);
                let variables = crate::fingerprint::canonical_json((*variables).clone().into_json());
                serde_json::to_writer(&mut hasher, &variables).map_err(|_| fmt::Error)?;
                (prefix, namespaces::OPERATION)
            }
            Key::Apq {
                prefix,
                ext: PersistedQueryRequestExtension { version, sha256_hash },
            } => {
                return f.write_fmt(format_args!(
                    "{prefix}.{}.{version}.{}",
                    namespaces::APQ,
                    Base64Display::new(sha256_hash, &URL_SAFE_NO_PAD)
                ));
            }
        };

        let hash = hasher.finalize();
        f.write_fmt(format_args!(
            "{prefix}.{namespace}.blake3.{}",
            Base64Display::new(hash.as_bytes(), &URL_SAFE_NO_PAD)
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    };

    use bytes::Bytes;
    use runtime::kv::{KvResult, KvStoreInner};
    use serde_json::json;

    use super::*;
    use crate::error::FieldError;

    #[derive(Default)]
    struct FakeStore {
        entries: Mutex<HashMap<String, Bytes>>,
        ttls: Mutex<Vec<Option<Duration>>>,
        failing: bool,
    }

    impl FakeStore {
        fn failing() -> Self {
            FakeStore {
                failing: true,
                ..Default::default()
            }
        }
    }

    #[async_trait::async_trait]
    impl KvStoreInner for FakeStore {
        async fn get(&self, name: &str) -> KvResult<Option<Bytes>> {
            if self.failing {
                return Err(KvError::Kv("unavailable".into()));
            }
            Ok(self.entries.lock().unwrap().get(name).cloned())
        }

        async fn put(&self, name: &str, bytes: Bytes, expiration_ttl: Option<Duration>) -> KvResult<()> {
            if self.failing {
                return Err(KvError::Kv("unavailable".into()));
            }
            self.ttls.lock().unwrap().push(expiration_ttl);
            self.entries.lock().unwrap().insert(name.to_string(), bytes);
            Ok(())
        }
    }

    async fn resolve_counted(
        store: &KvStore,
        store_errors: StoreErrorPolicy,
        calls: &AtomicUsize,
        result: Result<serde_json::Value, FieldError>,
    ) -> Result<serde_json::Value, FieldError> {
        cached(store, store_errors, "key", Some(Duration::from_secs(30)), |_| true, async {
            calls.fetch_add(1, Ordering::Relaxed);
            result
        })
        .await
    }

    #[tokio::test]
    async fn serves_the_second_resolution_from_the_store() {
        let store = KvStore::new(FakeStore::default());
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = resolve_counted(&store, StoreErrorPolicy::Propagate, &calls, Ok(json!({"id": 1})))
                .await
                .unwrap();
            assert_eq!(value, json!({"id": 1}));
        }

        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn caches_null_but_not_errors() {
        let store = KvStore::new(FakeStore::default());
        let calls = AtomicUsize::new(0);

        let error = FieldError::new("boom");
        for _ in 0..2 {
            let result = resolve_counted(&store, StoreErrorPolicy::Propagate, &calls, Err(error.clone())).await;
            assert_eq!(result, Err(error.clone()));
        }
        assert_eq!(calls.load(Ordering::Relaxed), 2);

        for _ in 0..2 {
            let result = resolve_counted(&store, StoreErrorPolicy::Propagate, &calls, Ok(serde_json::Value::Null)).await;
            assert_eq!(result, Ok(serde_json::Value::Null));
        }
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn forwards_the_ttl() {
        let fake = std::sync::Arc::new(FakeStore::default());
        let store = KvStore::new(SharedStore(fake.clone()));
        let calls = AtomicUsize::new(0);

        resolve_counted(&store, StoreErrorPolicy::Propagate, &calls, Ok(json!(1)))
            .await
            .unwrap();

        assert_eq!(*fake.ttls.lock().unwrap(), [Some(Duration::from_secs(30))]);
    }

    #[tokio::test]
    async fn skips_values_it_should_not_store() {
        let store = KvStore::new(FakeStore::default());
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            cached(&store, StoreErrorPolicy::Propagate, "key", None, |_: &u32| false, async {
                calls.fetch_add(1, Ordering::Relaxed);
                Ok::<_, FieldError>(7)
            })
            .await
            .unwrap();
        }

        assert_eq!(calls.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn store_failures_propagate_or_bypass() {
        let store = KvStore::new(FakeStore::failing());
        let calls = AtomicUsize::new(0);

        let error = resolve_counted(&store, StoreErrorPolicy::Propagate, &calls, Ok(json!(1)))
            .await
            .unwrap_err();
        assert_eq!(error.message, "Kv error: unavailable");
        assert_eq!(calls.load(Ordering::Relaxed), 0);

        let value = resolve_counted(&store, StoreErrorPolicy::Bypass, &calls, Ok(json!(1)))
            .await
            .unwrap();
        assert_eq!(value, json!(1));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    struct SharedStore(std::sync::Arc<FakeStore>);

    #[async_trait::async_trait]
    impl KvStoreInner for SharedStore {
        async fn get(&self, name: &str) -> KvResult<Option<Bytes>> {
            self.0.get(name).await
        }

        async fn put(&self, name: &str, bytes: Bytes, expiration_ttl: Option<Duration>) -> KvResult<()> {
            self.0.put(name, bytes, expiration_ttl).await
        }
    }

    #[test]
    fn keys_depend_on_every_part() {
        let fingerprint = SelectionFingerprint::default();
        let key = |type_name, field_name, cache_key| {
            Key::Field {
                prefix: "field-cache",
                type_name,
                field_name,
                cache_key,
                fingerprint: &fingerprint,
                shape: " id",
            }
            .to_string()
        };

        let base = key("Object1", "subObjects2", "object-1");
        assert!(base.starts_with("field-cache.field.blake3."), "{base}");
        assert_eq!(base, key("Object1", "subObjects2", "object-1"));
        assert_ne!(base, key("Object1", "subObjects2", "object-2"));
        assert_ne!(base, key("Object1", "other", "object-1"));
        assert_ne!(base, key("Object2", "subObjects2", "object-1"));
        // Parts are length-prefixed, shifting characters between them changes the key.
        assert_ne!(key("ab", "c", "x"), key("a", "bc", "x"));
    }

    #[test]
    fn keys_depend_on_the_response_shape() {
        let fingerprint = SelectionFingerprint::default();
        let key = |shape| {
            Key::Field {
                prefix: "field-cache",
                type_name: "Object1",
                field_name: "subObjects2",
                cache_key: "object-1",
                fingerprint: &fingerprint,
                shape,
            }
            .to_string()
        };

        assert_eq!(key(" id"), key(" id"));
        assert_ne!(key(" id"), key(" identifier:id"));
        assert_ne!(key(" id fieldWithArgs"), key(" fieldWithArgs id"));
    }

    #[test]
    fn persisted_query_keys() {
        let ext = PersistedQueryRequestExtension {
            version: 1,
            sha256_hash: vec![0xfb, 0xff, 0x01],
        };
        let key = Key::Apq {
            prefix: "field-cache",
            ext: &ext,
        };

        assert_eq!(key.to_string(), "field-cache.apq.1.-_8B");
    }
}
