use std::collections::HashMap;

use async_graphql_parser::{
    types::{FieldDefinition, InputValueDefinition, TypeDefinition, TypeKind, TypeSystemDefinition},
    Positioned,
};
use indexmap::{IndexMap, IndexSet};

use super::{named_type, MetaField, MetaInputValue, MetaType, MetaTypeKind, Registry, BUILTIN_SCALARS};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Could not parse the schema: {0}")]
    Parse(String),
    #[error("The type {0} is defined more than once")]
    DuplicateType(String),
    #[error("Cannot extend the unknown type {0}")]
    ExtendUnknownType(String),
    #[error("The extension of {0} does not match the kind of its definition")]
    ExtensionKindMismatch(String),
    #[error("The schema does not define a query root type")]
    MissingQueryType,
    #[error("The root type {0} must be an object type")]
    InvalidRootType(String),
    #[error("Unknown type {name} referenced by {referenced_by}")]
    UnknownType { name: String, referenced_by: String },
    #[error("{object} cannot implement {name}, which is not an interface")]
    NotAnInterface { object: String, name: String },
    #[error("The union {union} can only contain object types, found {member}")]
    InvalidUnionMember { union: String, member: String },
}

#[derive(Default)]
struct RootTypes {
    query: Option<String>,
    mutation: Option<String>,
    subscription: Option<String>,
}

pub(super) fn build(sdl: &str) -> Result<Registry, RegistryError> {
    let document = async_graphql_parser::parse_schema(sdl).map_err(|err| RegistryError::Parse(err.to_string()))?;

    let mut types = BUILTIN_SCALARS
        .into_iter()
        .map(|name| {
            let ty = MetaType {
                name: name.to_string(),
                kind: MetaTypeKind::Scalar,
            };
            (name.to_string(), ty)
        })
        .collect::<HashMap<_, _>>();

    let mut roots = RootTypes::default();
    let mut extensions = Vec::new();

    for definition in document.definitions {
        match definition {
            TypeSystemDefinition::Schema(schema) => {
                let schema = schema.node;
                if let Some(query) = schema.query {
                    roots.query = Some(query.node.to_string());
                }
                if let Some(mutation) = schema.mutation {
                    roots.mutation = Some(mutation.node.to_string());
                }
                if let Some(subscription) = schema.subscription {
                    roots.subscription = Some(subscription.node.to_string());
                }
            }
            TypeSystemDefinition::Type(definition) if definition.node.extend => extensions.push(definition.node),
            TypeSystemDefinition::Type(definition) => {
                let TypeDefinition { name, kind, .. } = definition.node;
                let name = name.node.to_string();

                if BUILTIN_SCALARS.contains(&name.as_str()) && matches!(kind, TypeKind::Scalar) {
                    continue;
                }
                if types.contains_key(&name) {
                    return Err(RegistryError::DuplicateType(name));
                }

                let kind = convert_kind(kind);
                types.insert(name.clone(), MetaType { name, kind });
            }
            TypeSystemDefinition::Directive(_) => (),
        }
    }

    for extension in extensions {
        let name = extension.name.node.to_string();
        let ty = types
            .get_mut(&name)
            .ok_or_else(|| RegistryError::ExtendUnknownType(name.clone()))?;
        extend(ty, extension.kind)?;
    }

    link_possible_types(&mut types)?;
    check_references(&types)?;

    let query_type = roots
        .query
        .or_else(|| types.contains_key("Query").then(|| "Query".to_string()))
        .ok_or(RegistryError::MissingQueryType)?;
    let mutation_type = roots
        .mutation
        .or_else(|| types.contains_key("Mutation").then(|| "Mutation".to_string()));
    let subscription_type = roots
        .subscription
        .or_else(|| types.contains_key("Subscription").then(|| "Subscription".to_string()));

    for root in [Some(&query_type), mutation_type.as_ref(), subscription_type.as_ref()]
        .into_iter()
        .flatten()
    {
        match types.get(root) {
            Some(ty) if ty.is_object() => (),
            Some(_) => return Err(RegistryError::InvalidRootType(root.clone())),
            None if root == &query_type => return Err(RegistryError::MissingQueryType),
            None => {
                return Err(RegistryError::UnknownType {
                    name: root.clone(),
                    referenced_by: "schema".to_string(),
                })
            }
        }
    }

    Ok(Registry {
        types,
        query_type,
        mutation_type,
        subscription_type,
    })
}

fn convert_kind(kind: TypeKind) -> MetaTypeKind {
    match kind {
        TypeKind::Scalar => MetaTypeKind::Scalar,
        TypeKind::Object(object) => MetaTypeKind::Object {
            fields: convert_fields(object.fields),
            interfaces: object.implements.into_iter().map(|name| name.node.to_string()).collect(),
        },
        TypeKind::Interface(interface) => MetaTypeKind::Interface {
            fields: convert_fields(interface.fields),
            possible_types: IndexSet::new(),
        },
        TypeKind::Union(union) => MetaTypeKind::Union {
            possible_types: union.members.into_iter().map(|name| name.node.to_string()).collect(),
        },
        TypeKind::Enum(r#enum) => MetaTypeKind::Enum {
            values: r#enum
                .values
                .into_iter()
                .map(|value| value.node.value.node.to_string())
                .collect(),
        },
        TypeKind::InputObject(input_object) => MetaTypeKind::InputObject {
            fields: convert_input_values(input_object.fields),
        },
    }
}

fn extend(ty: &mut MetaType, kind: TypeKind) -> Result<(), RegistryError> {
    match (&mut ty.kind, kind) {
        (MetaTypeKind::Scalar, TypeKind::Scalar) => (),
        (MetaTypeKind::Object { fields, interfaces }, TypeKind::Object(object)) => {
            fields.extend(convert_fields(object.fields));
            interfaces.extend(object.implements.into_iter().map(|name| name.node.to_string()));
        }
        (MetaTypeKind::Interface { fields, .. }, TypeKind::Interface(interface)) => {
            fields.extend(convert_fields(interface.fields));
        }
        (MetaTypeKind::Union { possible_types }, TypeKind::Union(union)) => {
            possible_types.extend(union.members.into_iter().map(|name| name.node.to_string()));
        }
        (MetaTypeKind::Enum { values }, TypeKind::Enum(r#enum)) => {
            values.extend(r#enum.values.into_iter().map(|value| value.node.value.node.to_string()));
        }
        (MetaTypeKind::InputObject { fields }, TypeKind::InputObject(input_object)) => {
            fields.extend(convert_input_values(input_object.fields));
        }
        _ => return Err(RegistryError::ExtensionKindMismatch(ty.name.clone())),
    }
    Ok(())
}

fn convert_fields(fields: Vec<Positioned<FieldDefinition>>) -> IndexMap<String, MetaField> {
    fields
        .into_iter()
        .map(|field| {
            let FieldDefinition {
                name, arguments, ty, ..
            } = field.node;
            let field = MetaField {
                name: name.node.to_string(),
                ty: ty.node,
                args: convert_input_values(arguments),
            };
            (field.name.clone(), field)
        })
        .collect()
}

fn convert_input_values(values: Vec<Positioned<InputValueDefinition>>) -> IndexMap<String, MetaInputValue> {
    values
        .into_iter()
        .map(|value| {
            let InputValueDefinition {
                name,
                ty,
                default_value,
                ..
            } = value.node;
            let value = MetaInputValue {
                name: name.node.to_string(),
                ty: ty.node,
                default_value: default_value.map(|value| value.node),
            };
            (value.name.clone(), value)
        })
        .collect()
}

fn link_possible_types(types: &mut HashMap<String, MetaType>) -> Result<(), RegistryError> {
    let implementations = types
        .values()
        .filter_map(|ty| match &ty.kind {
            MetaTypeKind::Object { interfaces, .. } => Some((ty.name.clone(), interfaces.clone())),
            _ => None,
        })
        .collect::<Vec<_>>();

    for (object, interfaces) in implementations {
        for name in interfaces {
            match types.get_mut(&name).map(|ty| &mut ty.kind) {
                Some(MetaTypeKind::Interface { possible_types, .. }) => {
                    possible_types.insert(object.clone());
                }
                Some(_) => return Err(RegistryError::NotAnInterface { object, name }),
                None => {
                    return Err(RegistryError::UnknownType {
                        name,
                        referenced_by: object,
                    })
                }
            }
        }
    }

    Ok(())
}

fn check_references(types: &HashMap<String, MetaType>) -> Result<(), RegistryError> {
    let check = |name: &str, referenced_by: String| {
        if types.contains_key(name) {
            Ok(())
        } else {
            Err(RegistryError::UnknownType {
                name: name.to_string(),
                referenced_by,
            })
        }
    };

    for ty in types.values() {
        match &ty.kind {
            MetaTypeKind::Object { fields, .. } | MetaTypeKind::Interface { fields, .. } => {
                for field in fields.values() {
                    check(field.named_type(), format!("{}.{}", ty.name, field.name))?;
                    for arg in field.args.values() {
                        check(named_type(&arg.ty), format!("{}.{}({}:)", ty.name, field.name, arg.name))?;
                    }
                }
            }
            MetaTypeKind::InputObject { fields } => {
                for field in fields.values() {
                    check(named_type(&field.ty), format!("{}.{}", ty.name, field.name))?;
                }
            }
            MetaTypeKind::Union { possible_types } => {
                for member in possible_types {
                    check(member, ty.name.clone())?;
                    if !types.get(member).is_some_and(MetaType::is_object) {
                        return Err(RegistryError::InvalidUnionMember {
                            union: ty.name.clone(),
                            member: member.clone(),
                        });
                    }
                }
            }
            MetaTypeKind::Scalar | MetaTypeKind::Enum { .. } => (),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use async_graphql_parser::types::OperationType;

    use super::*;

    #[test]
    fn builds_types_with_their_fields_and_arguments() {
        let registry = Registry::from_sdl(
            r#"
            type Query {
                objects1: [Object1]
            }

            type Object1 {
                id: Int!
                subObjects2: [Object2]
            }

            type Object2 {
                id: String
                fieldWithArgs(arg1: String, limit: Int = 10): String
            }
            "#,
        )
        .unwrap();

        let query = registry.root_type(OperationType::Query).unwrap();
        assert_eq!(query.name(), "Query");
        assert_eq!(query.field("objects1").unwrap().named_type(), "Object1");
        assert!(registry.root_type(OperationType::Mutation).is_none());

        let field = registry.lookup_type("Object2").unwrap().field("fieldWithArgs").unwrap();
        assert_eq!(field.args.keys().collect::<Vec<_>>(), ["arg1", "limit"]);
        assert_eq!(
            field.args["limit"].default_value,
            Some(async_graphql_value::ConstValue::Number(10.into()))
        );
        assert!(registry.lookup_type("String").unwrap().is_leaf());
    }

    #[test]
    fn links_interfaces_and_extensions() {
        let registry = Registry::from_sdl(
            r"
            schema { query: Root }

            type Root { node: Node }

            interface Node { id: ID! }

            type User implements Node { id: ID! }

            extend type Root { search: SearchResult }

            union SearchResult = User

            type Post { id: ID! }

            extend type Post implements Node

            extend union SearchResult = Post
            ",
        )
        .unwrap();

        assert_eq!(registry.query_type(), "Root");
        assert!(registry.lookup_type("Root").unwrap().field("search").is_some());
        assert!(registry.type_condition_applies("Node", "User"));
        assert!(registry.type_condition_applies("Node", "Post"));
        assert!(registry.type_condition_applies("SearchResult", "Post"));
        assert!(!registry.type_condition_applies("User", "Post"));
    }

    #[test]
    fn rejects_unknown_references() {
        let error = Registry::from_sdl("type Query { broken: Missing }").unwrap_err();
        assert_eq!(error.to_string(), "Unknown type Missing referenced by Query.broken");

        let error = Registry::from_sdl("type Foo { id: ID }").unwrap_err();
        assert!(matches!(error, RegistryError::MissingQueryType), "{error}");

        let error = Registry::from_sdl("type Query { id: ID } type Query { other: ID }").unwrap_err();
        assert!(matches!(error, RegistryError::DuplicateType(name) if name == "Query"));
    }
}
