use async_graphql_parser::types::{BaseType, Type};
use futures_util::future::{join_all, BoxFuture, FutureExt};

use super::{ExecutionContext, Target};
use crate::{
    registry::{MetaType, MetaTypeKind},
    response::{QueryPath, ServerError, ServerResult},
};

impl<'a> ExecutionContext<'a> {
    /// Completes a value in a position whose errors are handled by the caller: the field
    /// itself, or a non-null list item.
    pub(super) fn complete_position<'b>(
        &'b self,
        ty: &'b Type,
        target: Target<'a, 'b>,
        value: serde_json::Value,
        path: &'b QueryPath,
    ) -> BoxFuture<'b, ServerResult<serde_json::Value>> {
        async move {
            if value.is_null() {
                if ty.nullable {
                    return Ok(serde_json::Value::Null);
                }
                return Err(self.field_error(
                    target,
                    path,
                    format!(
                        "Cannot return null for non-nullable field {}.{}",
                        target.parent_type, target.field.name
                    ),
                ));
            }

            match &ty.base {
                BaseType::List(item_ty) => self.complete_list(item_ty, target, value, path).await,
                BaseType::Named(name) => self.complete_named(name, target, value, path).await,
            }
        }
        .boxed()
    }

    /// Shapes a list item according to its type. Errors of a nullable item are recorded and
    /// the item becomes null, the others are returned to the list.
    async fn complete_item(
        &self,
        ty: &Type,
        target: Target<'a, '_>,
        value: serde_json::Value,
        path: &QueryPath,
    ) -> ServerResult<serde_json::Value> {
        match self.complete_position(ty, target, value, path).await {
            Err(error) if ty.nullable => {
                self.add_error(error);
                Ok(serde_json::Value::Null)
            }
            completed => completed,
        }
    }

    async fn complete_list(
        &self,
        item_ty: &Type,
        target: Target<'a, '_>,
        value: serde_json::Value,
        path: &QueryPath,
    ) -> ServerResult<serde_json::Value> {
        let serde_json::Value::Array(items) = value else {
            return Err(self.field_error(
                target,
                path,
                format!(
                    "Expected a list for field {}.{}, got {value}",
                    target.parent_type, target.field.name
                ),
            ));
        };

        let paths = (0..items.len()).map(|index| path.child(index)).collect::<Vec<_>>();
        let completions = items
            .into_iter()
            .zip(&paths)
            .map(|(item, path)| self.complete_item(item_ty, target, item, path));

        let mut completed = Vec::with_capacity(paths.len());
        let mut bubbled = None;
        for result in join_all(completions).await {
            match result {
                Ok(item) => completed.push(item),
                Err(error) if bubbled.is_none() => bubbled = Some(error),
                Err(error) => self.add_error(error),
            }
        }

        match bubbled {
            Some(error) => Err(error),
            None => Ok(serde_json::Value::Array(completed)),
        }
    }

    async fn complete_named(
        &self,
        type_name: &str,
        target: Target<'a, '_>,
        value: serde_json::Value,
        path: &QueryPath,
    ) -> ServerResult<serde_json::Value> {
        let Some(ty) = self.schema.registry.lookup_type(type_name) else {
            return Err(self.field_error(target, path, format!("Unknown type {type_name}")));
        };

        let object_type = match &ty.kind {
            MetaTypeKind::Scalar => {
                return serialize_scalar(type_name, value).map_err(|message| self.field_error(target, path, message));
            }
            MetaTypeKind::Enum { values } => {
                return match value {
                    serde_json::Value::String(name) if values.contains(&name) => Ok(serde_json::Value::String(name)),
                    value => Err(self.field_error(
                        target,
                        path,
                        format!("Enum \"{type_name}\" cannot represent value: {value}"),
                    )),
                };
            }
            MetaTypeKind::Object { .. } => ty,
            MetaTypeKind::Interface { .. } | MetaTypeKind::Union { .. } => {
                let Some(object_type) = self.resolve_concrete_type(ty, &value) else {
                    return Err(self.field_error(
                        target,
                        path,
                        format!(
                            "Abstract type {type_name} must resolve to an object type at runtime for field {}.{}",
                            target.parent_type, target.field.name
                        ),
                    ));
                };
                object_type
            }
            MetaTypeKind::InputObject { .. } => {
                return Err(self.field_error(
                    target,
                    path,
                    format!("Input type {type_name} cannot be used as an output"),
                ));
            }
        };

        let fields = self.collect_subfields(object_type, target.nodes);
        self.execute_selection_set(object_type, fields, &value, path, false)
            .await
    }

    /// Concrete object type of a value returned for an interface or a union, picked by the
    /// registered type resolver or read from its `__typename` property.
    fn resolve_concrete_type(&self, abstract_type: &MetaType, value: &serde_json::Value) -> Option<&'a MetaType> {
        let registry = &self.schema.registry;
        let name = match self.schema.type_resolvers.get(&abstract_type.name) {
            Some(resolve) => resolve(value)?,
            None => value.get("__typename")?.as_str()?.to_string(),
        };

        registry
            .lookup_type(&name)
            .filter(|ty| ty.is_object())
            .filter(|_| registry.type_condition_applies(&abstract_type.name, &name))
    }

    fn field_error(&self, target: Target<'a, '_>, path: &QueryPath, message: String) -> ServerError {
        let mut error = ServerError::new(message).with_path(path.clone());
        if let Some(field) = target.nodes.first() {
            error = error.with_location(field.pos);
        }
        error
    }
}

/// Output coercion of the built-in scalars. Custom scalars are passed through.
fn serialize_scalar(name: &str, value: serde_json::Value) -> Result<serde_json::Value, String> {
    use serde_json::Value;

    match (name, value) {
        ("Int", Value::Number(number)) => match number.as_i64() {
            Some(int) if i32::try_from(int).is_ok() => Ok(Value::Number(number)),
            // Floats with an integral value are accepted, as 1.0 for 1.
            None => match number.as_f64() {
                Some(float) if float.fract() == 0.0 && float >= f64::from(i32::MIN) && float <= f64::from(i32::MAX) => {
                    Ok(Value::from(float as i32))
                }
                _ => Err(format!("Int cannot represent non-integer value: {number}")),
            },
            Some(_) => Err(format!("Int cannot represent non 32-bit signed integer value: {number}")),
        },
        ("Int", Value::Bool(boolean)) => Ok(Value::from(i32::from(boolean))),
        ("Int", Value::String(string)) => string
            .parse::<i32>()
            .map(Value::from)
            .map_err(|_| format!("Int cannot represent non-integer value: \"{string}\"")),
        ("Float", Value::Number(number)) => Ok(Value::Number(number)),
        ("Float", Value::Bool(boolean)) => Ok(Value::from(if boolean { 1.0 } else { 0.0 })),
        ("Float", Value::String(string)) => string
            .parse::<f64>()
            .ok()
            .filter(|float| float.is_finite())
            .map(Value::from)
            .ok_or_else(|| format!("Float cannot represent non numeric value: \"{string}\"")),
        ("String", Value::String(string)) => Ok(Value::String(string)),
        ("String", Value::Number(number)) => Ok(Value::String(number.to_string())),
        ("String", Value::Bool(boolean)) => Ok(Value::String(boolean.to_string())),
        ("Boolean", Value::Bool(boolean)) => Ok(Value::Bool(boolean)),
        ("Boolean", Value::Number(number)) if number.as_f64().is_some_and(|n| n == 0.0 || n == 1.0) => {
            Ok(Value::Bool(number.as_f64() == Some(1.0)))
        }
        ("ID", Value::String(string)) => Ok(Value::String(string)),
        ("ID", Value::Number(number)) if number.is_i64() || number.is_u64() => Ok(Value::String(number.to_string())),
        ("Int" | "Float" | "String" | "Boolean" | "ID", value) => Err(format!("{name} cannot represent value: {value}")),
        (_, value) => Ok(value),
    }
}
