use std::collections::{HashMap, HashSet};

use super::{Middleware, Next};
use crate::{context::ResolverContext, error::FieldError, response::ServerResult};

/// Roles granted to the client of a request, inserted into the request data.
#[derive(Debug, Default, Clone)]
pub struct GrantedRoles(HashSet<String>);

impl GrantedRoles {
    pub fn new(roles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self(roles.into_iter().map(Into::into).collect())
    }

    pub fn contains(&self, role: &str) -> bool {
        self.0.contains(role)
    }
}

/// Refuses to resolve fields whose required role was not granted to the request.
///
/// Only fields with a required role take this link in their chain.
#[derive(Debug, Default)]
pub struct SecurityMiddleware {
    /// Required role, by type then field name.
    roles: HashMap<String, HashMap<String, String>>,
}

impl SecurityMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn require(
        mut self,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        self.roles
            .entry(type_name.into())
            .or_default()
            .insert(field_name.into(), role.into());
        self
    }

    fn required_role(&self, type_name: &str, field_name: &str) -> Option<&str> {
        self.roles.get(type_name)?.get(field_name).map(String::as_str)
    }
}

#[async_trait::async_trait]
impl Middleware for SecurityMiddleware {
    fn applies_to(&self, type_name: &str, field_name: &str) -> bool {
        self.required_role(type_name, field_name).is_some()
    }

    async fn resolve(&self, ctx: ResolverContext<'_>, next: Next<'_>) -> ServerResult<serde_json::Value> {
        if let Some(role) = self.required_role(ctx.info.parent_type_name(), ctx.info.field_name()) {
            let granted = ctx.data::<GrantedRoles>().is_some_and(|roles| roles.contains(role));
            if !granted {
                tracing::debug!(
                    "Denied {}.{}, missing role {role}",
                    ctx.info.parent_type_name(),
                    ctx.info.field_name()
                );
                return Err(FieldError::new("You are not authorized!")
                    .with_extension("code", "FORBIDDEN")
                    .into());
            }
        }

        next.run(ctx).await
    }
}
