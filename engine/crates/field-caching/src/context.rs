use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
    sync::Arc,
};

use async_graphql_parser::{
    types::{Field, OperationType},
    Positioned,
};
use async_graphql_value::ConstValue;

use crate::{
    coercion::Arguments,
    execution::ExecutionContext,
    fingerprint::{FingerprintError, SelectionFingerprint, SelectionKeyBuilder},
    registry::{MetaField, MetaType, Registry},
    response::QueryPath,
    Variables,
};

/// Application values attached to a request, looked up by type.
#[derive(Default)]
pub struct Data(HashMap<TypeId, Box<dyn Any + Send + Sync>>);

impl Data {
    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) {
        self.0.insert(TypeId::of::<T>(), Box::new(value));
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.0.get(&TypeId::of::<T>()).and_then(|value| value.downcast_ref())
    }
}

impl fmt::Debug for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Data").field(&self.0.len()).finish()
    }
}

/// What a resolver, a cache policy or a middleware knows about the field being resolved.
#[derive(Clone, Copy)]
pub struct ResolverContext<'a> {
    /// Value returned by the parent field's resolver, or the root value.
    pub parent: &'a serde_json::Value,
    pub args: &'a Arguments,
    pub info: &'a FieldInfo<'a>,
}

impl<'a> ResolverContext<'a> {
    pub fn arg(&self, name: &str) -> Option<&'a ConstValue> {
        self.args.get(name)
    }

    /// Application data of the request.
    pub fn data<T: Any + Send + Sync>(&self) -> Option<&'a T> {
        self.info.ctx.data.get()
    }
}

pub struct FieldInfo<'a> {
    pub(crate) ctx: &'a ExecutionContext<'a>,
    pub parent_type: &'a MetaType,
    pub field: &'a MetaField,
    pub path: &'a QueryPath,
    pub(crate) field_nodes: &'a [&'a Positioned<Field>],
}

impl<'a> FieldInfo<'a> {
    pub fn parent_type_name(&self) -> &'a str {
        &self.parent_type.name
    }

    pub fn field_name(&self) -> &'a str {
        &self.field.name
    }

    pub fn response_key(&self) -> &'a str {
        self.field_nodes
            .first()
            .map(|field| field.node.response_key().node.as_str())
            .unwrap_or(&self.field.name)
    }

    pub fn operation_type(&self) -> OperationType {
        self.ctx.operation.ty
    }

    pub fn registry(&self) -> &'a Registry {
        &self.ctx.schema.registry
    }

    /// Coerced variables of the operation, defaults applied.
    pub fn variables(&self) -> &'a Variables {
        &self.ctx.variables
    }

    /// The field's arguments and everything selected beneath it, in canonical form.
    ///
    /// Computed at most once per field node set and execution when memoization is enabled.
    pub fn selection_fingerprint(&self) -> Result<Arc<SelectionFingerprint>, FingerprintError> {
        let builder = SelectionKeyBuilder::new(self.registry(), &self.ctx.document.fragments, self.variables());
        let build = || builder.build(self.parent_type, self.field_nodes);

        match &self.ctx.fingerprints {
            Some(memo) => memo.get_or_try_insert(&self.parent_type.name, self.field_nodes, build),
            None => build().map(Arc::new),
        }
    }

    /// The field's selection as it appears in the response: response keys, arguments and
    /// the order of its nested fields.
    pub(crate) fn response_shape(&self) -> Result<Arc<String>, FingerprintError> {
        let builder = SelectionKeyBuilder::new(self.registry(), &self.ctx.document.fragments, self.variables());
        let build = || builder.response_shape(self.parent_type, self.field_nodes);

        match &self.ctx.shapes {
            Some(memo) => memo.get_or_try_insert(&self.parent_type.name, self.field_nodes, build),
            None => build().map(Arc::new),
        }
    }

    /// Whether an error was recorded for this field or anything beneath it.
    pub(crate) fn has_errors(&self) -> bool {
        self.ctx.has_errors_under(self.path)
    }
}

impl fmt::Debug for FieldInfo<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldInfo")
            .field("parent_type", &self.parent_type.name)
            .field("field", &self.field.name)
            .field("path", &self.path.to_string())
            .finish_non_exhaustive()
    }
}
