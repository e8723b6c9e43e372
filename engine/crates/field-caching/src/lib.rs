//! Field-level response caching for a GraphQL executor.
//!
//! Fields with a registered [`CachePolicy`] are served from a key-value store. Entries hold
//! the field's completed response value and are keyed by the policy's cache key, usually
//! identifying the parent object, by the [`SelectionFingerprint`] of the field (its arguments
//! and everything selected beneath it) and by the shape of its response. Asking for different
//! data under the same parent never hits the same entry.
//!
//! ```ignore
//! let schema = Schema::build(sdl)
//!     .resolvers(resolvers)
//!     .cache_policies(CachePolicies::new().policy_fn("User", "friends", |ctx| {
//!         Ok(Some(CacheConfig::new(format!("user-{}", ctx.parent["id"]))))
//!     }))
//!     .middleware(TracingMiddleware)
//!     .store(KvStore::new(InMemoryKvStore::new()))
//!     .build()?;
//!
//! let response = schema.execute(Request::new(query).variables(variables)).await;
//! ```

mod cache;
mod coercion;
pub mod config;
mod context;
mod directives;
mod error;
mod execution;
mod fingerprint;
mod middleware;
mod persisted;
mod policy;
pub mod registry;
mod resolver;
mod response;
mod schema;
mod validation;
mod variables;

pub use self::{
    coercion::{resolve_field_arguments, Arguments, InputValueError, ValueKind},
    config::{FieldCachingConfig, PersistedQueriesConfig, StoreErrorPolicy},
    context::{Data, FieldInfo, ResolverContext},
    error::{FieldError, RequestError, SchemaError},
    fingerprint::{FieldFingerprint, FingerprintError, SelectionFingerprint},
    middleware::{
        ArgumentValidator, ConstraintViolation, FieldTiming, FieldTimings, GrantedRoles, Middleware, Next,
        SecurityMiddleware, TimingMiddleware, TracingMiddleware, ValidationMiddleware,
    },
    persisted::{PersistedQueryRequestExtension, RequestExtensions},
    policy::{CacheConfig, CachePolicies, CachePolicy},
    resolver::{Resolver, ResolverResult, Resolvers, TypeResolverFn},
    response::{Location, QueryPath, QueryPathSegment, Response, ServerError, ServerResult},
    schema::{Request, Schema, SchemaBuilder},
    variables::Variables,
};

#[cfg(test)]
mod tests {
    use runtime_local as _;
}
