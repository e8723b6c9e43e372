//! Checks run once per document, before anything executes.
//!
//! Fields, arguments and fragments referenced by the operations must exist, so that
//! fingerprints can be computed for any field of a valid document. Fields sharing a response
//! key must be mergeable: the executor resolves such a group once, with the arguments of its
//! first node, and the field cache keys it the same way.

use std::collections::HashSet;

use async_graphql_parser::{
    types::{BaseType, ExecutableDocument, Field, OperationDefinition, Selection, SelectionSet, Type},
    Pos, Positioned,
};
use async_graphql_value::{Name, Value};
use indexmap::IndexMap;

use crate::{
    error::RequestError,
    registry::{MetaType, Registry},
    response::Location,
};

pub(crate) fn validate(registry: &Registry, document: &ExecutableDocument) -> Vec<RequestError> {
    let mut validator = Validator {
        registry,
        document,
        errors: Vec::new(),
        validated_fragments: HashSet::new(),
        fragment_stack: Vec::new(),
    };

    for (name, operation) in document.operations.iter() {
        validator.variables_defined(name.map(Name::as_str), &operation.node);
        // Missing root types are reported when the operation is selected.
        if let Some(root_type) = registry.root_type(operation.node.ty) {
            validator.selection_set(root_type, &operation.node.selection_set);
        }
    }

    for (name, fragment) in &document.fragments {
        if !validator.validated_fragments.contains(name.as_str()) {
            validator.fragment(name.as_str(), fragment.pos);
        }
    }

    // Merging relies on known fields and acyclic fragments.
    if validator.errors.is_empty() {
        let mut overlap = OverlapValidator {
            registry,
            document,
            errors: Vec::new(),
            reported: HashSet::new(),
        };
        for (_, operation) in document.operations.iter() {
            if let Some(root_type) = registry.root_type(operation.node.ty) {
                overlap.selection_set(root_type, &operation.node.selection_set.node);
            }
        }
        for fragment in document.fragments.values() {
            let condition = fragment.node.type_condition.node.on.node.as_str();
            if let Some(ty) = registry.lookup_type(condition) {
                overlap.selection_set(ty, &fragment.node.selection_set.node);
            }
        }
        validator.errors.extend(overlap.errors);
    }

    validator.errors
}

struct Validator<'a> {
    registry: &'a Registry,
    document: &'a ExecutableDocument,
    errors: Vec<RequestError>,
    validated_fragments: HashSet<&'a str>,
    fragment_stack: Vec<&'a str>,
}

impl<'a> Validator<'a> {
    fn error(&mut self, message: String, pos: Pos) {
        self.errors.push(RequestError::Validation {
            message,
            locations: vec![Location::from(pos)],
        });
    }

    fn selection_set(&mut self, parent_type: &'a MetaType, selection_set: &'a Positioned<SelectionSet>) {
        let registry = self.registry;
        for selection in &selection_set.node.items {
            match &selection.node {
                Selection::Field(field) => {
                    let name = field.node.name.node.as_str();
                    let has_selection = !field.node.selection_set.node.items.is_empty();

                    if name == "__typename" {
                        if has_selection {
                            self.error(
                                "Field \"__typename\" must not have a selection since type \"String!\" has no subfields."
                                    .to_string(),
                                field.pos,
                            );
                        }
                        continue;
                    }

                    let Some(meta_field) = parent_type.field(name) else {
                        self.error(
                            format!("Cannot query field \"{name}\" on type \"{}\".", parent_type.name),
                            field.pos,
                        );
                        continue;
                    };

                    let mut seen = HashSet::new();
                    for (argument, _) in &field.node.arguments {
                        if !seen.insert(argument.node.as_str()) {
                            self.error(
                                format!("There can be only one argument named \"{}\".", argument.node),
                                argument.pos,
                            );
                        }
                        if !meta_field.args.contains_key(argument.node.as_str()) {
                            self.error(
                                format!(
                                    "Unknown argument \"{}\" on field \"{}.{name}\".",
                                    argument.node, parent_type.name
                                ),
                                argument.pos,
                            );
                        }
                    }

                    let Some(field_type) = registry.lookup_type(meta_field.named_type()) else {
                        continue;
                    };

                    match (field_type.is_leaf(), has_selection) {
                        (true, true) => self.error(
                            format!(
                                "Field \"{name}\" must not have a selection since type \"{}\" has no subfields.",
                                meta_field.ty
                            ),
                            field.pos,
                        ),
                        (false, false) => self.error(
                            format!(
                                "Field \"{name}\" of type \"{}\" must have a selection of subfields.",
                                meta_field.ty
                            ),
                            field.pos,
                        ),
                        (false, true) => self.selection_set(field_type, &field.node.selection_set),
                        (true, false) => {}
                    }
                }
                Selection::FragmentSpread(spread) => {
                    let name = spread.node.fragment_name.node.as_str();
                    if !self.document.fragments.contains_key(&spread.node.fragment_name.node) {
                        self.error(format!("Unknown fragment \"{name}\"."), spread.pos);
                        continue;
                    }
                    self.fragment(name, spread.pos);
                }
                Selection::InlineFragment(fragment) => {
                    let fragment_type = match &fragment.node.type_condition {
                        Some(condition) => match self.type_condition(condition.node.on.node.as_str(), condition.pos) {
                            Some(ty) => ty,
                            None => continue,
                        },
                        None => parent_type,
                    };
                    self.selection_set(fragment_type, &fragment.node.selection_set);
                }
            }
        }
    }

    /// Validates a named fragment once, against its own type condition.
    fn fragment(&mut self, name: &'a str, pos: Pos) {
        if self.fragment_stack.contains(&name) {
            self.error(format!("Cannot spread fragment \"{name}\" within itself."), pos);
            return;
        }
        if self.validated_fragments.contains(name) {
            return;
        }

        let document = self.document;
        let Some(fragment) = document.fragments.get(&Name::new(name)) else {
            return;
        };

        self.fragment_stack.push(name);
        let condition = &fragment.node.type_condition;
        if let Some(ty) = self.type_condition(condition.node.on.node.as_str(), condition.pos) {
            self.selection_set(ty, &fragment.node.selection_set);
        }
        self.fragment_stack.pop();
        self.validated_fragments.insert(name);
    }

    /// Every variable used by the operation, in its fragments included, must be defined by it.
    fn variables_defined(&mut self, operation_name: Option<&str>, operation: &'a OperationDefinition) {
        let defined = operation
            .variable_definitions
            .iter()
            .map(|definition| definition.node.name.node.as_str())
            .collect::<HashSet<_>>();

        let mut used = Vec::new();
        let mut spread = HashSet::new();
        self.variable_usages(&operation.selection_set.node, &mut spread, &mut used);

        let mut reported = HashSet::new();
        for (name, pos) in used {
            if defined.contains(name) || !reported.insert(name) {
                continue;
            }
            let message = match operation_name {
                Some(operation_name) => {
                    format!("Variable \"${name}\" is not defined by operation \"{operation_name}\".")
                }
                None => format!("Variable \"${name}\" is not defined."),
            };
            self.error(message, pos);
        }
    }

    fn variable_usages(
        &self,
        selection_set: &'a SelectionSet,
        spread: &mut HashSet<&'a str>,
        used: &mut Vec<(&'a str, Pos)>,
    ) {
        for selection in &selection_set.items {
            for directive in selection.node.directives() {
                for (_, value) in &directive.node.arguments {
                    variables_in(&value.node, value.pos, used);
                }
            }
            match &selection.node {
                Selection::Field(field) => {
                    for (_, value) in &field.node.arguments {
                        variables_in(&value.node, value.pos, used);
                    }
                    self.variable_usages(&field.node.selection_set.node, spread, used);
                }
                Selection::FragmentSpread(fragment_spread) => {
                    let name = &fragment_spread.node.fragment_name.node;
                    if !spread.insert(name.as_str()) {
                        continue;
                    }
                    if let Some(fragment) = self.document.fragments.get(name) {
                        self.variable_usages(&fragment.node.selection_set.node, spread, used);
                    }
                }
                Selection::InlineFragment(fragment) => {
                    self.variable_usages(&fragment.node.selection_set.node, spread, used);
                }
            }
        }
    }

    fn type_condition(&mut self, name: &str, pos: Pos) -> Option<&'a MetaType> {
        let registry = self.registry;
        match registry.lookup_type(name) {
            Some(ty) if ty.is_composite() => Some(ty),
            Some(_) => {
                self.error(format!("Fragment cannot condition on non composite type \"{name}\"."), pos);
                None
            }
            None => {
                self.error(format!("Unknown type \"{name}\"."), pos);
                None
            }
        }
    }
}

fn variables_in<'a>(value: &'a Value, pos: Pos, used: &mut Vec<(&'a str, Pos)>) {
    match value {
        Value::Variable(name) => used.push((name.as_str(), pos)),
        Value::List(items) => items.iter().for_each(|item| variables_in(item, pos, used)),
        Value::Object(fields) => fields.values().for_each(|field| variables_in(field, pos, used)),
        _ => {}
    }
}

/// A field node and the type it was selected on.
#[derive(Clone, Copy)]
struct SelectedField<'a> {
    parent_type: &'a MetaType,
    field: &'a Positioned<Field>,
}

type FieldsByResponseKey<'a> = IndexMap<&'a str, Vec<SelectedField<'a>>>;

/// Fields selected under the same response key must resolve to the same value: same field,
/// same arguments and compatible types, recursively. Fields on distinct object types can
/// never be selected together and only need compatible types.
struct OverlapValidator<'a> {
    registry: &'a Registry,
    document: &'a ExecutableDocument,
    errors: Vec<RequestError>,
    reported: HashSet<[(usize, usize); 2]>,
}

impl<'a> OverlapValidator<'a> {
    fn selection_set(&mut self, parent_type: &'a MetaType, selection_set: &'a SelectionSet) {
        let fields = self.collect(parent_type, selection_set);

        for (response_key, group) in &fields {
            for (i, left) in group.iter().enumerate() {
                for right in &group[i + 1..] {
                    if let Some(reason) = self.find_conflict(*left, *right, false) {
                        self.report(response_key, &reason, *left, *right);
                    }
                }
            }
        }

        for selected in fields.values().flatten() {
            let field = &selected.field.node;
            if field.selection_set.node.items.is_empty() {
                continue;
            }
            if let Some(field_type) = self.field_type(*selected) {
                self.selection_set(field_type, &field.selection_set.node);
            }
        }
    }

    fn collect(&self, parent_type: &'a MetaType, selection_set: &'a SelectionSet) -> FieldsByResponseKey<'a> {
        let mut fields = FieldsByResponseKey::new();
        let mut spread = HashSet::new();
        self.collect_into(parent_type, selection_set, &mut spread, &mut fields);
        fields
    }

    fn collect_into(
        &self,
        parent_type: &'a MetaType,
        selection_set: &'a SelectionSet,
        spread: &mut HashSet<&'a str>,
        fields: &mut FieldsByResponseKey<'a>,
    ) {
        for selection in &selection_set.items {
            match &selection.node {
                Selection::Field(field) => {
                    fields
                        .entry(field.node.response_key().node.as_str())
                        .or_default()
                        .push(SelectedField { parent_type, field });
                }
                Selection::FragmentSpread(fragment_spread) => {
                    let name = &fragment_spread.node.fragment_name.node;
                    if !spread.insert(name.as_str()) {
                        continue;
                    }
                    let Some(fragment) = self.document.fragments.get(name) else {
                        continue;
                    };
                    let condition = fragment.node.type_condition.node.on.node.as_str();
                    if let Some(ty) = self.registry.lookup_type(condition) {
                        self.collect_into(ty, &fragment.node.selection_set.node, spread, fields);
                    }
                }
                Selection::InlineFragment(fragment) => {
                    let ty = match &fragment.node.type_condition {
                        Some(condition) => match self.registry.lookup_type(condition.node.on.node.as_str()) {
                            Some(ty) => ty,
                            None => continue,
                        },
                        None => parent_type,
                    };
                    self.collect_into(ty, &fragment.node.selection_set.node, spread, fields);
                }
            }
        }
    }

    fn find_conflict(&self, left: SelectedField<'a>, right: SelectedField<'a>, exclusive: bool) -> Option<String> {
        let exclusive = exclusive
            || (left.parent_type.name != right.parent_type.name
                && left.parent_type.is_object()
                && right.parent_type.is_object());
        let (left_name, right_name) = (left.field.node.name.node.as_str(), right.field.node.name.node.as_str());

        if !exclusive {
            if left_name != right_name {
                return Some(format!("\"{left_name}\" and \"{right_name}\" are different fields"));
            }
            if !same_arguments(&left.field.node, &right.field.node) {
                return Some("they have differing arguments".to_string());
            }
        }

        let (Some(left_definition), Some(right_definition)) = (
            left.parent_type.field(left_name),
            right.parent_type.field(right_name),
        ) else {
            return None;
        };
        if self.types_conflict(&left_definition.ty, &right_definition.ty) {
            return Some(format!(
                "they return conflicting types \"{}\" and \"{}\"",
                left_definition.ty, right_definition.ty
            ));
        }

        let (Some(left_type), Some(right_type)) = (self.field_type(left), self.field_type(right)) else {
            return None;
        };
        let left_fields = self.collect(left_type, &left.field.node.selection_set.node);
        let right_fields = self.collect(right_type, &right.field.node.selection_set.node);
        for (response_key, left_group) in &left_fields {
            let Some(right_group) = right_fields.get(response_key) else {
                continue;
            };
            for left in left_group {
                for right in right_group {
                    if let Some(reason) = self.find_conflict(*left, *right, exclusive) {
                        return Some(format!("subfields \"{response_key}\" conflict because {reason}"));
                    }
                }
            }
        }

        None
    }

    /// Lists and nullability must match, and leaf types must be the same type.
    fn types_conflict(&self, left: &Type, right: &Type) -> bool {
        if left.nullable != right.nullable {
            return true;
        }
        match (&left.base, &right.base) {
            (BaseType::List(left), BaseType::List(right)) => self.types_conflict(left, right),
            (BaseType::Named(left), BaseType::Named(right)) => {
                let is_leaf = |name: &Name| self.registry.lookup_type(name.as_str()).is_some_and(MetaType::is_leaf);
                left != right && (is_leaf(left) || is_leaf(right))
            }
            _ => true,
        }
    }

    /// Named type of a selected field when it has subfields.
    fn field_type(&self, selected: SelectedField<'a>) -> Option<&'a MetaType> {
        let definition = selected.parent_type.field(selected.field.node.name.node.as_str())?;
        self.registry
            .lookup_type(definition.named_type())
            .filter(|ty| ty.is_composite())
    }

    fn report(&mut self, response_key: &str, reason: &str, left: SelectedField<'a>, right: SelectedField<'a>) {
        let mut positions = [left.field.pos, right.field.pos].map(|pos| (pos.line, pos.column));
        positions.sort_unstable();
        if !self.reported.insert(positions) {
            return;
        }

        self.errors.push(RequestError::Validation {
            message: format!(
                "Fields \"{response_key}\" conflict because {reason}. Use different aliases on the fields to fetch both if this was intentional."
            ),
            locations: vec![Location::from(left.field.pos), Location::from(right.field.pos)],
        });
    }
}

/// Same arguments, in any order.
fn same_arguments(left: &Field, right: &Field) -> bool {
    left.arguments.len() == right.arguments.len()
        && left.arguments.iter().all(|(name, value)| {
            right
                .get_argument(name.node.as_str())
                .is_some_and(|other| other.node == value.node)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SDL: &str = r"
        type Query {
            user(id: ID!): User
            search: [SearchResult]
        }

        type User {
            id: ID!
            name(format: String): String
            friends: [User]
        }

        type Post {
            title: String
        }

        union SearchResult = User | Post
    ";

    fn errors(query: &str) -> Vec<String> {
        let registry = Registry::from_sdl(SDL).unwrap();
        let document = async_graphql_parser::parse_query(query).unwrap();
        validate(&registry, &document)
            .into_iter()
            .map(|error| error.to_string())
            .collect()
    }

    #[test]
    fn valid_documents() {
        let query = r#"
            query {
                __typename
                user(id: "1") { id name(format: "short") ...Friends }
                search { ... on Post { title } ...UserName }
            }
            fragment Friends on User { friends { id } }
            fragment UserName on User { name }
        "#;

        assert_eq!(errors(query), Vec::<String>::new());
    }

    #[test]
    fn unknown_fields_and_arguments() {
        assert_eq!(
            errors(r#"{ user(id: "1") { email name(size: 1) } }"#),
            [
                "Cannot query field \"email\" on type \"User\".",
                "Unknown argument \"size\" on field \"User.name\".",
            ]
        );
    }

    #[test]
    fn selections_must_match_the_field_type() {
        assert_eq!(
            errors(r#"{ user(id: "1") { id { value } friends } }"#),
            [
                "Field \"id\" must not have a selection since type \"ID!\" has no subfields.",
                "Field \"friends\" of type \"[User]\" must have a selection of subfields.",
            ]
        );
    }

    #[test]
    fn fragments() {
        assert_eq!(
            errors("{ search { ...Missing ... on String { length } ... on Comment { id } } }"),
            [
                "Unknown fragment \"Missing\".",
                "Fragment cannot condition on non composite type \"String\".",
                "Unknown type \"Comment\".",
            ]
        );
    }

    #[test]
    fn fragment_cycles() {
        let query = r#"
            { user(id: "1") { ...A } }
            fragment A on User { friends { ...B } }
            fragment B on User { ...A }
        "#;

        assert_eq!(errors(query), ["Cannot spread fragment \"A\" within itself."]);
    }

    #[test]
    fn undefined_variables_and_repeated_arguments() {
        let query = r#"
            query Named($id: ID!) { user(id: $id) { name(format: $format) ...Friends } }
            fragment Friends on User { friends @include(if: $withFriends) { id } }
        "#;
        assert_eq!(
            errors(query),
            [
                "Variable \"$format\" is not defined by operation \"Named\".",
                "Variable \"$withFriends\" is not defined by operation \"Named\".",
            ]
        );

        assert_eq!(
            errors(r#"{ user(id: "1", id: "2") { id } }"#),
            ["There can be only one argument named \"id\"."]
        );
    }

    #[test]
    fn merged_fields_need_equal_arguments() {
        let registry = Registry::from_sdl(SDL).unwrap();
        let document =
            async_graphql_parser::parse_query(r#"{ user(id: "1") { a: name(format: "x") a: name(format: "y") } }"#)
                .unwrap();

        let errors = validate(&registry, &document);
        assert_eq!(errors.len(), 1);
        let RequestError::Validation { message, locations } = &errors[0] else {
            unreachable!("{:?}", errors[0]);
        };
        assert_eq!(
            message,
            "Fields \"a\" conflict because they have differing arguments. Use different aliases on the fields to fetch both if this was intentional."
        );
        assert_eq!(
            locations,
            &[Location { line: 1, column: 19 }, Location { line: 1, column: 40 }]
        );
    }

    #[test]
    fn merged_fields_must_be_the_same_field() {
        assert_eq!(
            errors(r#"{ user(id: "1") { value: id value: name } }"#),
            ["Fields \"value\" conflict because \"id\" and \"name\" are different fields. Use different aliases on the fields to fetch both if this was intentional."]
        );
        assert_eq!(
            errors(r#"{ user(id: "1") { friends { id } ...Friends } } fragment Friends on User { friends { id: name } }"#),
            ["Fields \"friends\" conflict because subfields \"id\" conflict because \"id\" and \"name\" are different fields. Use different aliases on the fields to fetch both if this was intentional."]
        );
    }

    #[test]
    fn exclusive_types_only_need_compatible_types() {
        assert_eq!(
            errors("{ search { ... on User { value: name } ... on Post { value: title } } }"),
            Vec::<String>::new()
        );
        assert_eq!(
            errors("{ search { ... on User { value: id } ... on Post { value: title } } }"),
            ["Fields \"value\" conflict because they return conflicting types \"ID!\" and \"String\". Use different aliases on the fields to fetch both if this was intentional."]
        );
    }

    #[test]
    fn identical_fields_merge() {
        let query = r#"
            query($id: ID!) {
                user(id: $id) { name(format: "x") ...Name }
                other: user(id: "2") { id }
                user(id: $id) { id }
            }
            fragment Name on User { name(format: "x") }
        "#;

        assert_eq!(errors(query), Vec::<String>::new());
    }
}
