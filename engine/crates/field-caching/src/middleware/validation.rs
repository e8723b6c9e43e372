use std::{collections::HashMap, sync::Arc};

use serde::Serialize;

use super::{Middleware, Next};
use crate::{coercion::Arguments, context::ResolverContext, error::FieldError, response::ServerResult};

/// One failed constraint on a field's arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConstraintViolation {
    /// Argument, or path within an input object argument, e.g. `input.email`.
    pub path: String,
    pub message: String,
}

impl ConstraintViolation {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        ConstraintViolation {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Checks the coerced arguments of a field, returning every violation found.
pub trait ArgumentValidator: Send + Sync {
    fn validate(&self, args: &Arguments) -> Vec<ConstraintViolation>;
}

impl<F> ArgumentValidator for F
where
    F: Fn(&Arguments) -> Vec<ConstraintViolation> + Send + Sync,
{
    fn validate(&self, args: &Arguments) -> Vec<ConstraintViolation> {
        self(args)
    }
}

/// Refuses to resolve fields whose arguments violate a registered constraint. The field
/// fails with a `Constraint violation` error listing the violations in its `violations`
/// extension, and nothing after this link runs.
///
/// Only fields with validators take this link in their chain.
#[derive(Default, Clone)]
pub struct ValidationMiddleware {
    /// Validators by type then field name, run in registration order.
    validators: HashMap<String, HashMap<String, Vec<Arc<dyn ArgumentValidator>>>>,
}

impl ValidationMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn validator(
        mut self,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        validator: impl ArgumentValidator + 'static,
    ) -> Self {
        self.validators
            .entry(type_name.into())
            .or_default()
            .entry(field_name.into())
            .or_default()
            .push(Arc::new(validator));
        self
    }

    fn validators(&self, type_name: &str, field_name: &str) -> Option<&[Arc<dyn ArgumentValidator>]> {
        self.validators.get(type_name)?.get(field_name).map(Vec::as_slice)
    }
}

#[async_trait::async_trait]
impl Middleware for ValidationMiddleware {
    fn applies_to(&self, type_name: &str, field_name: &str) -> bool {
        self.validators(type_name, field_name).is_some()
    }

    async fn resolve(&self, ctx: ResolverContext<'_>, next: Next<'_>) -> ServerResult<serde_json::Value> {
        let violations = self
            .validators(ctx.info.parent_type_name(), ctx.info.field_name())
            .unwrap_or_default()
            .iter()
            .flat_map(|validator| validator.validate(ctx.args))
            .collect::<Vec<_>>();

        if violations.is_empty() {
            return next.run(ctx).await;
        }

        tracing::debug!(
            "Rejected arguments of {}.{}: {} violation(s)",
            ctx.info.parent_type_name(),
            ctx.info.field_name(),
            violations.len()
        );

        let violations = serde_json::to_value(&violations).map_err(FieldError::from)?;
        Err(FieldError::new("Constraint violation")
            .with_extension("violations", violations)
            .into())
    }
}

impl std::fmt::Debug for ValidationMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set()
            .entries(self.validators.iter().flat_map(|(type_name, fields)| {
                fields.keys().map(move |field_name| format!("{type_name}.{field_name}"))
            }))
            .finish()
    }
}
