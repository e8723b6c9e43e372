use std::{
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use super::{Middleware, Next};
use crate::{context::ResolverContext, response::ServerResult};

/// Measures how long each field takes to resolve and complete, nested fields included.
///
/// Durations are logged at debug level and, when the request data holds an
/// `Arc<FieldTimings>`, collected into it.
#[derive(Debug, Default, Clone, Copy)]
pub struct TimingMiddleware;

#[derive(Debug, Default)]
pub struct FieldTimings(Mutex<Vec<FieldTiming>>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldTiming {
    /// `Type.field`
    pub field: String,
    pub path: String,
    pub duration: Duration,
}

impl FieldTimings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded timings, in completion order.
    pub fn take(&self) -> Vec<FieldTiming> {
        std::mem::take(&mut *self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn record(&self, timing: FieldTiming) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).push(timing);
    }
}

#[async_trait::async_trait]
impl Middleware for TimingMiddleware {
    async fn resolve(&self, ctx: ResolverContext<'_>, next: Next<'_>) -> ServerResult<serde_json::Value> {
        let start = Instant::now();
        let result = next.run(ctx).await;
        let duration = start.elapsed();

        let field = format!("{}.{}", ctx.info.parent_type_name(), ctx.info.field_name());
        tracing::debug!("Calling {field} took {duration:?}");

        if let Some(timings) = ctx.data::<Arc<FieldTimings>>() {
            timings.record(FieldTiming {
                field,
                path: ctx.info.path.to_string(),
                duration,
            });
        }

        result
    }
}
