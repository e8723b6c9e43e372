//! Input coercion: variables once per operation, then field arguments against them.

mod error;

use std::fmt::Write;

use async_graphql_parser::{
    types::{BaseType, OperationDefinition, Type},
    Positioned,
};
use async_graphql_value::{ConstValue, Name, Value};
use indexmap::IndexMap;

pub use error::{InputValueError, ValueKind};

use crate::{
    registry::{MetaField, MetaTypeKind, Registry},
    Variables,
};

/// Coerced arguments of a field, in the order the schema declares them.
///
/// Optional arguments that were neither provided nor defaulted are absent rather than null.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments(IndexMap<Name, ConstValue>);

impl Arguments {
    pub fn get(&self, name: &str) -> Option<&ConstValue> {
        self.0.get(&Name::new(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Name, &ConstValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(Name, ConstValue)> for Arguments {
    fn from_iter<T: IntoIterator<Item = (Name, ConstValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Coerces the raw request variables against the operation's variable definitions.
pub(crate) fn coerce_variables(
    registry: &Registry,
    operation: &OperationDefinition,
    mut raw: Variables,
) -> Result<Variables, InputValueError> {
    let mut coerced = Variables::default();

    for definition in &operation.variable_definitions {
        let definition = &definition.node;
        let name = definition.name.node.clone();
        let ty = &definition.var_type.node;

        let value = raw.remove(&name).or_else(|| {
            definition
                .default_value
                .as_ref()
                .map(|default_value| default_value.node.clone())
        });

        match value {
            Some(value) => {
                let value = InputValueCoercer::new(registry)
                    .coerce(ty, value)
                    .map_err(|error| InputValueError::InvalidVariable {
                        name: name.to_string(),
                        error: Box::new(error),
                    })?;
                coerced.insert(name, value);
            }
            None if !ty.nullable => {
                return Err(InputValueError::MissingVariable {
                    name: name.to_string(),
                    ty: ty.to_string(),
                })
            }
            None => (),
        }
    }

    Ok(coerced)
}

/// Resolves the arguments of one field occurrence.
///
/// Variables are looked up in the already coerced operation variables. An argument bound to
/// a variable that was not provided behaves as if the argument was omitted.
pub fn resolve_field_arguments(
    registry: &Registry,
    field: &MetaField,
    arguments: &[(Positioned<Name>, Positioned<Value>)],
    variables: &Variables,
) -> Result<Arguments, InputValueError> {
    let mut resolved = IndexMap::with_capacity(field.args.len());

    for definition in field.args.values() {
        let provided = arguments
            .iter()
            .find(|(name, _)| name.node.as_str() == definition.name)
            .map(|(_, value)| &value.node);

        let value = match provided {
            Some(Value::Variable(variable)) => variables.get(variable).cloned(),
            Some(literal) => Some(resolve_literal(literal, variables)),
            None => None,
        };

        match value.or_else(|| definition.default_value.clone()) {
            Some(value) => {
                let mut coercer = InputValueCoercer::new(registry);
                coercer.path.push(PathSegment::Field(definition.name.clone()));
                let value = coercer.coerce(&definition.ty, value)?;
                resolved.insert(Name::new(&definition.name), value);
            }
            None if !definition.ty.nullable => {
                return Err(InputValueError::MissingArgument {
                    name: definition.name.clone(),
                    ty: definition.ty.to_string(),
                })
            }
            None => (),
        }
    }

    Ok(Arguments(resolved))
}

/// Replaces the variables nested in a literal by their values. Inside input objects a
/// missing variable drops the field so that its default applies, inside lists it is null.
fn resolve_literal(value: &Value, variables: &Variables) -> ConstValue {
    match value {
        Value::Variable(name) => variables.get(name).cloned().unwrap_or(ConstValue::Null),
        Value::Null => ConstValue::Null,
        Value::Number(number) => ConstValue::Number(number.clone()),
        Value::String(string) => ConstValue::String(string.clone()),
        Value::Boolean(boolean) => ConstValue::Boolean(*boolean),
        Value::Binary(bytes) => ConstValue::Binary(bytes.clone()),
        Value::Enum(name) => ConstValue::Enum(name.clone()),
        Value::List(items) => ConstValue::List(items.iter().map(|item| resolve_literal(item, variables)).collect()),
        Value::Object(fields) => ConstValue::Object(
            fields
                .iter()
                .filter(|(_, value)| match value {
                    Value::Variable(name) => variables.contains_key(name),
                    _ => true,
                })
                .map(|(name, value)| (name.clone(), resolve_literal(value, variables)))
                .collect(),
        ),
    }
}

enum PathSegment {
    Field(String),
    Index(usize),
}

struct InputValueCoercer<'a> {
    registry: &'a Registry,
    path: Vec<PathSegment>,
}

impl<'a> InputValueCoercer<'a> {
    fn new(registry: &'a Registry) -> Self {
        Self {
            registry,
            path: Vec::new(),
        }
    }

    fn coerce(&mut self, ty: &Type, value: ConstValue) -> Result<ConstValue, InputValueError> {
        if matches!(value, ConstValue::Null) {
            if ty.nullable {
                return Ok(ConstValue::Null);
            }
            return Err(InputValueError::UnexpectedNull {
                expected: ty.to_string(),
                path: self.path(),
            });
        }

        match &ty.base {
            BaseType::List(item_ty) => match value {
                ConstValue::List(items) => {
                    let mut coerced = Vec::with_capacity(items.len());
                    for (index, item) in items.into_iter().enumerate() {
                        self.path.push(PathSegment::Index(index));
                        coerced.push(self.coerce(item_ty, item)?);
                        self.path.pop();
                    }
                    Ok(ConstValue::List(coerced))
                }
                // A single value is accepted where a list is expected.
                value => Ok(ConstValue::List(vec![self.coerce(item_ty, value)?])),
            },
            BaseType::Named(name) => self.coerce_named(name, value),
        }
    }

    fn coerce_named(&mut self, name: &str, value: ConstValue) -> Result<ConstValue, InputValueError> {
        let registry = self.registry;
        let Some(ty) = registry.lookup_type(name).filter(|ty| ty.is_input()) else {
            return Err(InputValueError::NotAnInputType {
                name: name.to_string(),
                path: self.path(),
            });
        };

        match &ty.kind {
            MetaTypeKind::Scalar => self.coerce_scalar(name, value),
            MetaTypeKind::Enum { values } => {
                let candidate = match &value {
                    ConstValue::Enum(candidate) => candidate.as_str(),
                    ConstValue::String(candidate) => candidate.as_str(),
                    _ => {
                        return Err(InputValueError::IncorrectEnumValueType {
                            r#enum: name.to_string(),
                            actual: (&value).into(),
                            path: self.path(),
                        })
                    }
                };
                if !values.contains(candidate) {
                    return Err(InputValueError::UnknownEnumValue {
                        r#enum: name.to_string(),
                        value: candidate.to_string(),
                        path: self.path(),
                    });
                }
                Ok(ConstValue::Enum(Name::new(candidate)))
            }
            MetaTypeKind::InputObject { fields } => {
                let ConstValue::Object(mut object) = value else {
                    return Err(InputValueError::MissingObject {
                        name: name.to_string(),
                        actual: (&value).into(),
                        path: self.path(),
                    });
                };

                if let Some(unknown) = object.keys().find(|key| !fields.contains_key(key.as_str())) {
                    return Err(InputValueError::UnknownInputField {
                        input_object: name.to_string(),
                        name: unknown.to_string(),
                        path: self.path(),
                    });
                }

                let mut coerced = IndexMap::with_capacity(fields.len());
                for field in fields.values() {
                    let key = Name::new(&field.name);
                    self.path.push(PathSegment::Field(field.name.clone()));
                    match object.shift_remove(&key).or_else(|| field.default_value.clone()) {
                        Some(value) => {
                            coerced.insert(key, self.coerce(&field.ty, value)?);
                        }
                        None if !field.ty.nullable => {
                            return Err(InputValueError::UnexpectedNull {
                                expected: field.ty.to_string(),
                                path: self.path(),
                            })
                        }
                        None => (),
                    }
                    self.path.pop();
                }
                Ok(ConstValue::Object(coerced))
            }
            MetaTypeKind::Object { .. } | MetaTypeKind::Interface { .. } | MetaTypeKind::Union { .. } => {
                Err(InputValueError::NotAnInputType {
                    name: name.to_string(),
                    path: self.path(),
                })
            }
        }
    }

    fn coerce_scalar(&self, name: &str, value: ConstValue) -> Result<ConstValue, InputValueError> {
        let accepted = match (name, &value) {
            ("Int", ConstValue::Number(number)) => {
                if !number.as_i64().is_some_and(|number| i32::try_from(number).is_ok()) {
                    return Err(InputValueError::IncorrectScalarValue {
                        actual: number.to_string(),
                        expected: name.to_string(),
                        path: self.path(),
                    });
                }
                true
            }
            ("ID", ConstValue::Number(number)) if !number.is_f64() => {
                return Ok(ConstValue::String(number.to_string()));
            }
            ("Float", ConstValue::Number(_))
            | ("String" | "ID", ConstValue::String(_))
            | ("Boolean", ConstValue::Boolean(_)) => true,
            ("Int" | "Float" | "String" | "Boolean" | "ID", _) => false,
            // Custom scalars accept any value.
            _ => true,
        };

        if accepted {
            Ok(value)
        } else {
            Err(InputValueError::IncorrectScalarType {
                actual: (&value).into(),
                expected: name.to_string(),
                path: self.path(),
            })
        }
    }

    fn path(&self) -> String {
        if self.path.is_empty() {
            return String::new();
        }

        let mut path = String::from(" at path '");
        for segment in &self.path {
            // Writing into a String cannot fail.
            let _ = match segment {
                PathSegment::Field(name) => write!(path, ".{name}"),
                PathSegment::Index(index) => write!(path, "[{index}]"),
            };
        }
        path.push('\'');
        path
    }
}

#[cfg(test)]
mod tests {
    use async_graphql_parser::{parse_query, types::Selection};
    use serde_json::json;

    use super::*;

    const SDL: &str = r"
        type Query {
            search(filter: Filter, ids: [ID!], limit: Int = 10, order: Order): [String]
        }

        input Filter {
            name: String!
            exact: Boolean = false
        }

        enum Order { ASC DESC }
    ";

    fn resolve(query: &str, variables: serde_json::Value) -> Result<Arguments, InputValueError> {
        let registry = Registry::from_sdl(SDL).unwrap();
        let document = parse_query(query).unwrap();
        let (_, operation) = document.operations.iter().next().unwrap();
        let variables = coerce_variables(&registry, &operation.node, Variables::from_json(variables))?;

        let Selection::Field(field) = &operation.node.selection_set.node.items[0].node else {
            unreachable!()
        };
        let definition = registry.lookup_type("Query").unwrap().field("search").unwrap();
        resolve_field_arguments(&registry, definition, &field.node.arguments, &variables)
    }

    fn to_json(arguments: &Arguments) -> serde_json::Value {
        ConstValue::Object(arguments.0.clone()).into_json().unwrap()
    }

    #[test]
    fn applies_defaults_and_omits_missing_optionals() {
        let arguments = resolve("{ search }", json!({})).unwrap();
        assert_eq!(to_json(&arguments), json!({"limit": 10}));
    }

    #[test]
    fn coerces_literals_and_variables() {
        let arguments = resolve(
            r#"query($name: String!, $order: Order) { search(filter: {name: $name}, ids: 7, order: $order) }"#,
            json!({"name": "bob", "order": "DESC"}),
        )
        .unwrap();

        assert_eq!(
            to_json(&arguments),
            json!({
                "filter": {"name": "bob", "exact": false},
                "ids": ["7"],
                "limit": 10,
                "order": "DESC"
            })
        );
    }

    #[test]
    fn unprovided_variable_omits_the_argument() {
        let arguments = resolve("query($limit: Int) { search(limit: $limit) }", json!({})).unwrap();
        assert_eq!(to_json(&arguments), json!({"limit": 10}));

        let arguments = resolve("query($limit: Int) { search(limit: $limit) }", json!({"limit": null})).unwrap();
        assert_eq!(to_json(&arguments), json!({"limit": null}));
    }

    #[test]
    fn reports_invalid_values_with_their_path() {
        let error = resolve(r#"{ search(filter: {exact: true}) }"#, json!({})).unwrap_err();
        assert_eq!(
            error.to_string(),
            "Found a null where we expected a String! at path '.filter.name'"
        );

        let error = resolve(r#"{ search(order: UP) }"#, json!({})).unwrap_err();
        assert_eq!(error.to_string(), "Unknown enum value 'UP' for enum Order at path '.order'");

        let error = resolve("query($limit: Int!) { search(limit: $limit) }", json!({})).unwrap_err();
        assert_eq!(error.to_string(), "Variable $limit of required type 'Int!' was not provided");

        let error = resolve("query($limit: Int) { search(limit: $limit) }", json!({"limit": 2.5})).unwrap_err();
        assert_eq!(
            error.to_string(),
            "Variable $limit got an invalid value: Found value 2.5 which cannot be coerced into a Int scalar"
        );
    }
}
