use std::time::Duration;

/// Settings of the field cache, usually read from the `[field_caching]` table of a TOML file.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FieldCachingConfig {
    /// When disabled, fields with a cache policy are always resolved.
    pub enabled: bool,
    /// Prepended to every store key, to share a store between applications.
    pub key_prefix: String,
    /// TTL of entries whose policy did not set one. Without it they never expire.
    #[serde(deserialize_with = "duration_str::deserialize_option_duration")]
    pub default_ttl: Option<Duration>,
    pub store_errors: StoreErrorPolicy,
    /// Compute each field's selection fingerprint at most once per execution.
    pub fingerprint_memoization: bool,
    pub operation_caching: OperationCachingConfig,
    pub document_cache: DocumentCacheConfig,
    pub persisted_queries: PersistedQueriesConfig,
}

impl Default for FieldCachingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            key_prefix: String::from("field-cache"),
            default_ttl: None,
            store_errors: StoreErrorPolicy::default(),
            fingerprint_memoization: true,
            operation_caching: OperationCachingConfig::default(),
            document_cache: DocumentCacheConfig::default(),
            persisted_queries: PersistedQueriesConfig::default(),
        }
    }
}

/// What happens when the store fails to read or write an entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreErrorPolicy {
    /// The field fails with the store error.
    #[default]
    Propagate,
    /// The failure is logged and the field resolved as if it was not cached.
    Bypass,
}

/// Whole responses of operations annotated with `@cacheQuery`.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OperationCachingConfig {
    pub enabled: bool,
}

impl Default for OperationCachingConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// In-memory cache of parsed and validated documents, keyed by their text.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DocumentCacheConfig {
    pub enabled: bool,
    pub limit: u64,
}

impl Default for DocumentCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            limit: 1000,
        }
    }
}

/// Automatic persisted queries: clients send the SHA-256 hash of a query in the
/// `persistedQuery` extension and the query text only when the server does not know it yet.
///
/// Queries are kept in the store when one is configured, in memory otherwise.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PersistedQueriesConfig {
    pub enabled: bool,
    /// Without it registered queries never expire.
    #[serde(deserialize_with = "duration_str::deserialize_option_duration")]
    pub ttl: Option<Duration>,
    /// Maximum number of queries kept in memory without a store.
    pub limit: u64,
}

impl Default for PersistedQueriesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: None,
            limit: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[test]
    fn defaults() {
        let config: FieldCachingConfig = toml::from_str("").unwrap();
        assert_eq!(config, FieldCachingConfig::default());
        assert!(config.enabled);
        assert_eq!(config.store_errors, StoreErrorPolicy::Propagate);
        assert_eq!(config.default_ttl, None);
    }

    #[test]
    fn values() {
        let input = indoc! {r#"
            enabled = true
            key_prefix = "app"
            default_ttl = "5m"
            store_errors = "bypass"
            fingerprint_memoization = false

            [operation_caching]
            enabled = false

            [document_cache]
            limit = 10

            [persisted_queries]
            enabled = false
            ttl = "1h"
        "#};

        let config: FieldCachingConfig = toml::from_str(input).unwrap();

        assert_eq!(config.key_prefix, "app");
        assert_eq!(config.default_ttl, Some(Duration::from_secs(300)));
        assert_eq!(config.store_errors, StoreErrorPolicy::Bypass);
        assert!(!config.fingerprint_memoization);
        assert!(!config.operation_caching.enabled);
        assert!(config.document_cache.enabled);
        assert_eq!(config.document_cache.limit, 10);
        assert!(!config.persisted_queries.enabled);
        assert_eq!(config.persisted_queries.ttl, Some(Duration::from_secs(3600)));
        assert_eq!(config.persisted_queries.limit, 1000);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let input = indoc! {r#"
            enabled = true
            ttl = "5m"
        "#};

        let error = toml::from_str::<FieldCachingConfig>(input).unwrap_err();
        assert!(error.to_string().contains("unknown field `ttl`"), "{error}");
    }
}
