//! Field dispatch: every field resolution goes through an ordered chain of middlewares
//! ending with the field's resolver.
//!
//! The end of the chain completes the resolver's value against the field's type, nested
//! selections included, so every link sees the field's final response value.

mod instrument;
mod security;
mod timing;
mod validation;

use std::sync::Arc;

pub use self::{
    instrument::TracingMiddleware,
    security::{GrantedRoles, SecurityMiddleware},
    timing::{FieldTiming, FieldTimings, TimingMiddleware},
    validation::{ArgumentValidator, ConstraintViolation, ValidationMiddleware},
};
use crate::{context::ResolverContext, resolver::Resolver, response::ServerResult};

/// One link of the dispatch chain.
///
/// A middleware either returns a value on its own, short-circuiting everything after it,
/// or delegates to the rest of the chain through `next`.
#[async_trait::async_trait]
pub trait Middleware: Send + Sync {
    async fn resolve(&self, ctx: ResolverContext<'_>, next: Next<'_>) -> ServerResult<serde_json::Value>;

    /// Whether the middleware takes part in the chain of this field at all. Chains are
    /// composed once per field when the schema is built.
    fn applies_to(&self, type_name: &str, field_name: &str) -> bool {
        let _ = (type_name, field_name);
        true
    }
}

/// The remainder of a chain.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    links: &'a [Arc<dyn Middleware>],
    resolver: &'a dyn Resolver,
}

impl Next<'_> {
    pub async fn run(self, ctx: ResolverContext<'_>) -> ServerResult<serde_json::Value> {
        match self.links.split_first() {
            Some((link, links)) => {
                let next = Next {
                    links,
                    resolver: self.resolver,
                };
                link.resolve(ctx, next).await
            }
            None => {
                let value = self.resolver.resolve(ctx).await?;
                ctx.info.ctx.complete_field(ctx.info, value).await
            }
        }
    }
}

/// The composed chain of one field.
pub(crate) struct FieldChain {
    links: Vec<Arc<dyn Middleware>>,
    resolver: Arc<dyn Resolver>,
}

impl FieldChain {
    pub(crate) fn compose(
        middlewares: &[Arc<dyn Middleware>],
        type_name: &str,
        field_name: &str,
        resolver: Arc<dyn Resolver>,
    ) -> Self {
        let links = middlewares
            .iter()
            .filter(|middleware| middleware.applies_to(type_name, field_name))
            .cloned()
            .collect();

        FieldChain { links, resolver }
    }

    pub(crate) async fn call(&self, ctx: ResolverContext<'_>) -> ServerResult<serde_json::Value> {
        Next {
            links: &self.links,
            resolver: self.resolver.as_ref(),
        }
        .run(ctx)
        .await
    }

    pub(crate) fn len(&self) -> usize {
        self.links.len()
    }
}
