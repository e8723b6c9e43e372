//! Execution of a prepared operation.
//!
//! Every field goes through its dispatch chain. The chain ends with the field's resolver,
//! whose raw value is completed against the field's type, resolving nested selections from
//! it. Links therefore see, and the field cache stores, completed values.
//!
//! Errors travel up as `Err` until they reach a nullable position, where they are recorded
//! and the value becomes null.

mod collect;
mod complete;

use std::sync::{Mutex, PoisonError};

use async_graphql_parser::{
    types::{ExecutableDocument, Field, OperationDefinition, OperationType},
    Positioned,
};
use futures_util::future::{join_all, BoxFuture, FutureExt};
use indexmap::IndexMap;

use crate::{
    coercion::resolve_field_arguments,
    context::{Data, FieldInfo, ResolverContext},
    fingerprint::{SelectionFingerprint, SelectionMemo},
    registry::{MetaField, MetaType},
    resolver::{PropertyResolver, Resolver},
    response::{QueryPath, Response, ServerError, ServerResult},
    schema::SchemaInner,
    Variables,
};

/// Fields of a selection set grouped by response key, in query order.
type CollectedFields<'a> = IndexMap<&'a str, Vec<&'a Positioned<Field>>>;

/// A field being completed, for error reporting and nested collection.
#[derive(Clone, Copy)]
struct Target<'a, 'b> {
    parent_type: &'a str,
    field: &'a MetaField,
    nodes: &'b [&'a Positioned<Field>],
}

/// State of one execution: coerced variables, collected errors and memoized selections.
pub(crate) struct ExecutionContext<'a> {
    pub(crate) schema: &'a SchemaInner,
    pub(crate) document: &'a ExecutableDocument,
    pub(crate) operation: &'a OperationDefinition,
    pub(crate) variables: Variables,
    pub(crate) data: &'a Data,
    pub(crate) fingerprints: Option<SelectionMemo<SelectionFingerprint>>,
    pub(crate) shapes: Option<SelectionMemo<String>>,
    errors: Mutex<Vec<ServerError>>,
}

impl<'a> ExecutionContext<'a> {
    pub(crate) fn new(
        schema: &'a SchemaInner,
        document: &'a ExecutableDocument,
        operation: &'a OperationDefinition,
        variables: Variables,
        data: &'a Data,
    ) -> Self {
        let memoize = schema.config.fingerprint_memoization;
        ExecutionContext {
            schema,
            document,
            operation,
            variables,
            data,
            fingerprints: memoize.then(SelectionMemo::default),
            shapes: memoize.then(SelectionMemo::default),
            errors: Mutex::new(Vec::new()),
        }
    }

    pub(crate) async fn execute(self, root_value: &serde_json::Value) -> Response {
        let Some(root_type) = self.schema.registry.root_type(self.operation.ty) else {
            return Response::from_errors([ServerError::new(format!(
                "The schema does not support {} operations",
                self.operation.ty
            ))]);
        };

        let fields = self.collect_fields(root_type, [&self.operation.selection_set.node]);
        let serial = self.operation.ty == OperationType::Mutation;
        let data = match self
            .execute_selection_set(root_type, fields, root_value, &QueryPath::empty(), serial)
            .await
        {
            Ok(data) => data,
            Err(error) => {
                self.add_error(error);
                serde_json::Value::Null
            }
        };

        if let Some(memo) = &self.fingerprints {
            tracing::trace!("Computed {} selection fingerprints", memo.len());
        }

        Response {
            data: Some(data),
            errors: self.errors.into_inner().unwrap_or_else(PoisonError::into_inner),
        }
    }

    pub(crate) fn add_error(&self, error: ServerError) {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(error);
    }

    /// Whether an error was recorded at `path` or beneath it.
    pub(crate) fn has_errors_under(&self, path: &QueryPath) -> bool {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|error| error.path.as_ref().is_some_and(|error_path| error_path.starts_with(path)))
    }

    /// Completes the raw value returned by a field's resolver. An error at the field's own
    /// position is returned rather than recorded, for the field to handle.
    pub(crate) fn complete_field<'b>(
        &'b self,
        info: &'b FieldInfo<'a>,
        value: serde_json::Value,
    ) -> BoxFuture<'b, ServerResult<serde_json::Value>> {
        let target = Target {
            parent_type: &info.parent_type.name,
            field: info.field,
            nodes: info.field_nodes,
        };
        self.complete_position(&info.field.ty, target, value, info.path)
    }

    fn execute_selection_set<'b>(
        &'b self,
        object_type: &'a MetaType,
        fields: CollectedFields<'a>,
        parent: &'b serde_json::Value,
        path: &'b QueryPath,
        serial: bool,
    ) -> BoxFuture<'b, ServerResult<serde_json::Value>> {
        async move {
            let results = if serial {
                let mut results = Vec::with_capacity(fields.len());
                for nodes in fields.values() {
                    results.push(self.resolve_field(object_type, nodes, parent, path).await);
                }
                results
            } else {
                let resolutions = fields
                    .values()
                    .map(|nodes| self.resolve_field(object_type, nodes, parent, path));
                join_all(resolutions).await
            };

            let mut object = serde_json::Map::with_capacity(results.len());
            let mut bubbled = None;
            for (response_key, result) in fields.keys().zip(results) {
                match result {
                    Ok(value) => {
                        object.insert(response_key.to_string(), value);
                    }
                    Err(error) if bubbled.is_none() => bubbled = Some(error),
                    Err(error) => self.add_error(error),
                }
            }

            match bubbled {
                Some(error) => Err(error),
                None => Ok(serde_json::Value::Object(object)),
            }
        }
        .boxed()
    }

    async fn resolve_field(
        &self,
        object_type: &'a MetaType,
        nodes: &[&'a Positioned<Field>],
        parent: &serde_json::Value,
        path: &QueryPath,
    ) -> ServerResult<serde_json::Value> {
        let Some(first) = nodes.first() else {
            return Ok(serde_json::Value::Null);
        };
        let name = first.node.name.node.as_str();
        let path = path.child(first.node.response_key().node.as_str());

        if name == "__typename" {
            return Ok(serde_json::Value::String(object_type.name.clone()));
        }

        let Some(field) = object_type.field(name) else {
            self.add_error(
                ServerError::new(format!("Unknown field '{name}' on type '{}'", object_type.name))
                    .with_location(first.pos)
                    .with_path(path),
            );
            return Ok(serde_json::Value::Null);
        };

        match self.dispatch(object_type, field, nodes, parent, &path).await {
            Ok(value) => Ok(value),
            Err(error) => {
                let error = error.at_field(first.pos, &path);
                if field.ty.nullable {
                    self.add_error(error);
                    Ok(serde_json::Value::Null)
                } else {
                    Err(error)
                }
            }
        }
    }

    /// Runs the field's dispatch chain, which returns the completed value.
    async fn dispatch(
        &self,
        object_type: &'a MetaType,
        field: &'a MetaField,
        nodes: &[&'a Positioned<Field>],
        parent: &serde_json::Value,
        path: &QueryPath,
    ) -> ServerResult<serde_json::Value> {
        let Some(first) = nodes.first() else {
            return Ok(serde_json::Value::Null);
        };

        let arguments = resolve_field_arguments(&self.schema.registry, field, &first.node.arguments, &self.variables)
            .map_err(|error| ServerError::new(error.to_string()))?;

        let info = FieldInfo {
            ctx: self,
            parent_type: object_type,
            field,
            path,
            field_nodes: nodes,
        };
        let ctx = ResolverContext {
            parent,
            args: &arguments,
            info: &info,
        };

        match self.schema.chain(&object_type.name, &field.name) {
            Some(chain) => chain.call(ctx).await,
            None => {
                let value = PropertyResolver.resolve(ctx).await?;
                info.ctx.complete_field(&info, value).await
            }
        }
    }
}
