use tracing::Instrument;

use super::{Middleware, Next};
use crate::{context::ResolverContext, response::ServerResult};

/// Wraps every resolution in a span named after the field.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMiddleware;

#[async_trait::async_trait]
impl Middleware for TracingMiddleware {
    async fn resolve(&self, ctx: ResolverContext<'_>, next: Next<'_>) -> ServerResult<serde_json::Value> {
        let span = tracing::info_span!(
            "graphql-resolver",
            graphql.type_name = ctx.info.parent_type_name(),
            graphql.field_name = ctx.info.field_name(),
            graphql.path = %ctx.info.path,
        );

        let result = next.run(ctx).instrument(span).await;

        if let Err(error) = &result {
            tracing::debug!(
                "Resolving {}.{} failed: {error}",
                ctx.info.parent_type_name(),
                ctx.info.field_name()
            );
        }

        result
    }
}
