use std::{collections::HashMap, sync::Arc};

use crate::{context::ResolverContext, error::FieldError};

pub type ResolverResult = Result<serde_json::Value, FieldError>;

/// Produces the raw value of a field. Nested fields are resolved afterwards against it.
#[async_trait::async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, ctx: ResolverContext<'_>) -> ResolverResult;
}

pub(crate) struct FnResolver<F>(F);

#[async_trait::async_trait]
impl<F> Resolver for FnResolver<F>
where
    F: Fn(ResolverContext<'_>) -> ResolverResult + Send + Sync,
{
    async fn resolve(&self, ctx: ResolverContext<'_>) -> ResolverResult {
        (self.0)(ctx)
    }
}

/// Used by fields without a registered resolver: reads the property named after the field
/// on the parent value.
pub(crate) struct PropertyResolver;

#[async_trait::async_trait]
impl Resolver for PropertyResolver {
    async fn resolve(&self, ctx: ResolverContext<'_>) -> ResolverResult {
        Ok(ctx
            .parent
            .get(ctx.info.field_name())
            .cloned()
            .unwrap_or_default())
    }
}

/// Picks the concrete object type of a value returned for an interface or a union.
pub type TypeResolverFn = dyn Fn(&serde_json::Value) -> Option<String> + Send + Sync;

/// Field resolvers by parent type and field name, and type resolvers by abstract type.
#[derive(Default, Clone)]
pub struct Resolvers {
    pub(crate) fields: HashMap<(String, String), Arc<dyn Resolver>>,
    pub(crate) types: HashMap<String, Arc<TypeResolverFn>>,
}

impl Resolvers {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn resolver(
        mut self,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        resolver: impl Resolver + 'static,
    ) -> Self {
        self.fields
            .insert((type_name.into(), field_name.into()), Arc::new(resolver));
        self
    }

    /// Registers a synchronous resolver.
    #[must_use]
    pub fn resolver_fn<F>(self, type_name: impl Into<String>, field_name: impl Into<String>, resolver: F) -> Self
    where
        F: Fn(ResolverContext<'_>) -> ResolverResult + Send + Sync + 'static,
    {
        self.resolver(type_name, field_name, FnResolver(resolver))
    }

    /// Without a type resolver, the `__typename` property of the value is used.
    #[must_use]
    pub fn type_resolver<F>(mut self, type_name: impl Into<String>, resolver: F) -> Self
    where
        F: Fn(&serde_json::Value) -> Option<String> + Send + Sync + 'static,
    {
        self.types.insert(type_name.into(), Arc::new(resolver));
        self
    }
}
