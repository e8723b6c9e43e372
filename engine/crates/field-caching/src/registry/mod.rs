//! The schema as seen by the executor: every named type with its fields, arguments and
//! possible types, indexed by name.

mod builder;

use std::collections::HashMap;

use async_graphql_parser::types::{BaseType, OperationType, Type};
use async_graphql_value::ConstValue;
use indexmap::{IndexMap, IndexSet};

pub use builder::RegistryError;

pub const BUILTIN_SCALARS: [&str; 5] = ["Int", "Float", "String", "Boolean", "ID"];

#[derive(Debug)]
pub struct Registry {
    types: HashMap<String, MetaType>,
    query_type: String,
    mutation_type: Option<String>,
    subscription_type: Option<String>,
}

impl Registry {
    pub fn from_sdl(sdl: &str) -> Result<Self, RegistryError> {
        builder::build(sdl)
    }

    pub fn lookup_type(&self, name: &str) -> Option<&MetaType> {
        self.types.get(name)
    }

    pub fn root_type(&self, operation_type: OperationType) -> Option<&MetaType> {
        let name = match operation_type {
            OperationType::Query => Some(&self.query_type),
            OperationType::Mutation => self.mutation_type.as_ref(),
            OperationType::Subscription => self.subscription_type.as_ref(),
        };
        name.and_then(|name| self.lookup_type(name))
    }

    pub fn query_type(&self) -> &str {
        &self.query_type
    }

    pub fn types(&self) -> impl Iterator<Item = &MetaType> {
        self.types.values()
    }

    /// Whether a selection guarded by `type_condition` applies to values of `object_type`.
    pub fn type_condition_applies(&self, type_condition: &str, object_type: &str) -> bool {
        if type_condition == object_type {
            return true;
        }
        self.lookup_type(type_condition)
            .and_then(MetaType::possible_types)
            .is_some_and(|possible_types| possible_types.contains(object_type))
    }
}

#[derive(Debug)]
pub struct MetaType {
    pub name: String,
    pub kind: MetaTypeKind,
}

#[derive(Debug)]
pub enum MetaTypeKind {
    Scalar,
    Object {
        fields: IndexMap<String, MetaField>,
        interfaces: Vec<String>,
    },
    Interface {
        fields: IndexMap<String, MetaField>,
        possible_types: IndexSet<String>,
    },
    Union {
        possible_types: IndexSet<String>,
    },
    Enum {
        values: IndexSet<String>,
    },
    InputObject {
        fields: IndexMap<String, MetaInputValue>,
    },
}

impl MetaType {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> Option<&IndexMap<String, MetaField>> {
        match &self.kind {
            MetaTypeKind::Object { fields, .. } | MetaTypeKind::Interface { fields, .. } => Some(fields),
            _ => None,
        }
    }

    pub fn field(&self, name: &str) -> Option<&MetaField> {
        self.fields().and_then(|fields| fields.get(name))
    }

    pub fn possible_types(&self) -> Option<&IndexSet<String>> {
        match &self.kind {
            MetaTypeKind::Interface { possible_types, .. } | MetaTypeKind::Union { possible_types } => {
                Some(possible_types)
            }
            _ => None,
        }
    }

    pub fn is_object(&self) -> bool {
        matches!(self.kind, MetaTypeKind::Object { .. })
    }

    pub fn is_abstract(&self) -> bool {
        matches!(self.kind, MetaTypeKind::Interface { .. } | MetaTypeKind::Union { .. })
    }

    /// Object, interface or union: anything a selection set can be applied to.
    pub fn is_composite(&self) -> bool {
        self.is_object() || self.is_abstract()
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, MetaTypeKind::Scalar | MetaTypeKind::Enum { .. })
    }

    pub fn is_input(&self) -> bool {
        matches!(
            self.kind,
            MetaTypeKind::Scalar | MetaTypeKind::Enum { .. } | MetaTypeKind::InputObject { .. }
        )
    }
}

#[derive(Debug)]
pub struct MetaField {
    pub name: String,
    pub ty: Type,
    pub args: IndexMap<String, MetaInputValue>,
}

impl MetaField {
    pub fn named_type(&self) -> &str {
        named_type(&self.ty)
    }
}

#[derive(Debug)]
pub struct MetaInputValue {
    pub name: String,
    pub ty: Type,
    pub default_value: Option<ConstValue>,
}

/// The innermost named type of a possibly wrapped type: `String` for `[String!]!`.
pub fn named_type(ty: &Type) -> &str {
    match &ty.base {
        BaseType::Named(name) => name.as_str(),
        BaseType::List(inner) => named_type(inner),
    }
}
