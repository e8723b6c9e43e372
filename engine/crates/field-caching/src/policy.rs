use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use crate::{context::ResolverContext, error::FieldError};

/// How a single resolution of a field is cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Application half of the key, usually identifying the parent object.
    pub cache_key: String,
    /// Falls back to the configured default, and to no expiry without one.
    pub ttl: Option<Duration>,
}

impl CacheConfig {
    pub fn new(cache_key: impl Into<String>) -> Self {
        CacheConfig {
            cache_key: cache_key.into(),
            ttl: None,
        }
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Decides whether and how a field resolution is cached.
///
/// Returning `Ok(None)` resolves the field normally. An error becomes the field's error and
/// the resolver is not called.
pub trait CachePolicy: Send + Sync {
    fn cache_config(&self, ctx: ResolverContext<'_>) -> Result<Option<CacheConfig>, FieldError>;
}

pub(crate) struct FnPolicy<F>(F);

impl<F> CachePolicy for FnPolicy<F>
where
    F: Fn(ResolverContext<'_>) -> Result<Option<CacheConfig>, FieldError> + Send + Sync,
{
    fn cache_config(&self, ctx: ResolverContext<'_>) -> Result<Option<CacheConfig>, FieldError> {
        (self.0)(ctx)
    }
}

/// Cache policies by parent type and field name. Fields without one are never cached.
#[derive(Default, Clone)]
pub struct CachePolicies {
    /// By type then field name.
    policies: HashMap<String, HashMap<String, Arc<dyn CachePolicy>>>,
}

impl CachePolicies {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn policy(
        mut self,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        policy: impl CachePolicy + 'static,
    ) -> Self {
        self.policies
            .entry(type_name.into())
            .or_default()
            .insert(field_name.into(), Arc::new(policy));
        self
    }

    #[must_use]
    pub fn policy_fn<F>(self, type_name: impl Into<String>, field_name: impl Into<String>, policy: F) -> Self
    where
        F: Fn(ResolverContext<'_>) -> Result<Option<CacheConfig>, FieldError> + Send + Sync + 'static,
    {
        self.policy(type_name, field_name, FnPolicy(policy))
    }

    pub fn get(&self, type_name: &str, field_name: &str) -> Option<&Arc<dyn CachePolicy>> {
        self.policies.get(type_name)?.get(field_name)
    }

    pub fn contains(&self, type_name: &str, field_name: &str) -> bool {
        self.get(type_name, field_name).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    pub(crate) fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.policies.iter().flat_map(|(type_name, fields)| {
            fields
                .keys()
                .map(move |field_name| (type_name.as_str(), field_name.as_str()))
        })
    }
}

impl fmt::Debug for CachePolicies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.fields()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{CacheConfig, CachePolicies};

    #[test]
    fn policies_are_looked_up_by_type_then_field() {
        let policies = CachePolicies::new()
            .policy_fn("Object1", "subObjects2", |_| Ok(Some(CacheConfig::new("a"))))
            .policy_fn("Object1", "id", |_| Ok(None))
            .policy_fn("Object2", "subObjects2", |_| Ok(None));

        assert!(policies.contains("Object1", "subObjects2"));
        assert!(policies.contains("Object2", "subObjects2"));
        assert!(!policies.contains("Object2", "id"));
        assert!(!policies.contains("Object", "1subObjects2"));
        assert!(!policies.contains("Query", "subObjects2"));

        let mut fields = policies.fields().collect::<Vec<_>>();
        fields.sort_unstable();
        assert_eq!(
            fields,
            [("Object1", "id"), ("Object1", "subObjects2"), ("Object2", "subObjects2")]
        );
    }
}
