//! Canonical description of what a field's resolved value depends on in the query: its own
//! arguments and everything selected beneath it.
//!
//! Aliases, selection order, fragment boundaries and `__typename` do not contribute to the
//! fingerprint. They do change the completed value though, so cached values are also keyed
//! by the field's response shape, which renders them.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_graphql_parser::{
    types::{Field, FragmentDefinition, Selection, SelectionSet},
    Positioned,
};
use async_graphql_value::Name;
use serde::Serialize;

use crate::{
    coercion::{resolve_field_arguments, InputValueError},
    directives::is_excluded,
    registry::{MetaField, MetaType, Registry},
    Variables,
};

#[derive(Debug, thiserror::Error)]
pub enum FingerprintError {
    #[error("Field '{field_name}' does not exist on type '{type_name}'")]
    UnknownField { type_name: String, field_name: String },
    #[error("Unknown type '{0}'")]
    UnknownType(String),
    #[error("Unknown fragment '{0}'")]
    UnknownFragment(String),
    #[error(transparent)]
    Arguments(#[from] InputValueError),
    #[error("Arguments could not be represented as JSON: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Selected fields keyed by canonical name, followed by their arguments when any.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SelectionFingerprint(BTreeMap<String, FieldFingerprint>);

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FieldFingerprint {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<SelectionFingerprint>,
}

impl SelectionFingerprint {
    pub fn get(&self, key: &str) -> Option<&FieldFingerprint> {
        self.0.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn entry(&mut self, name: &str, args: BTreeMap<String, serde_json::Value>) -> &mut FieldFingerprint {
        let mut key = String::new();
        write_invocation(&mut key, name, &args);
        self.0.entry(key).or_insert_with(|| FieldFingerprint { args, fields: None })
    }
}

/// `name(arg: value, ...)`, arguments sorted by name.
fn write_invocation(out: &mut String, name: &str, args: &BTreeMap<String, serde_json::Value>) {
    out.push_str(name);
    if args.is_empty() {
        return;
    }
    let rendered = args
        .iter()
        .map(|(name, value)| format!("{name}: {value}"))
        .collect::<Vec<_>>();
    out.push('(');
    out.push_str(&rendered.join(", "));
    out.push(')');
}

pub(crate) struct SelectionKeyBuilder<'a> {
    registry: &'a Registry,
    fragments: &'a HashMap<Name, Positioned<FragmentDefinition>>,
    variables: &'a Variables,
}

impl<'a> SelectionKeyBuilder<'a> {
    pub(crate) fn new(
        registry: &'a Registry,
        fragments: &'a HashMap<Name, Positioned<FragmentDefinition>>,
        variables: &'a Variables,
    ) -> Self {
        Self {
            registry,
            fragments,
            variables,
        }
    }

    /// Fingerprint of one field, given every node the field was collected from within
    /// `parent_type`. The field itself is the single root entry, with the arguments of its
    /// first node as the executor resolves it with those.
    pub(crate) fn build(
        &self,
        parent_type: &MetaType,
        field_nodes: &[&Positioned<Field>],
    ) -> Result<SelectionFingerprint, FingerprintError> {
        let mut fingerprint = SelectionFingerprint::default();
        let Some(first) = field_nodes.first() else {
            return Ok(fingerprint);
        };

        let definition = self.definition(parent_type, &first.node)?;
        let args = self.arguments(definition, &first.node)?;
        let entry = fingerprint.entry(&definition.name, args);
        for field in field_nodes {
            self.add_subselection(definition, &field.node, entry)?;
        }

        Ok(fingerprint)
    }

    /// Renders what the completed value of a field looks like: its selection in document
    /// order, with response keys, resolved arguments and the type conditions that matter.
    ///
    /// Fragments on object types always apply and are flattened, so spreading a fragment or
    /// writing its fields inline renders the same.
    pub(crate) fn response_shape(
        &self,
        parent_type: &MetaType,
        field_nodes: &[&Positioned<Field>],
    ) -> Result<String, FingerprintError> {
        let mut shape = String::new();
        let Some(first) = field_nodes.first() else {
            return Ok(shape);
        };

        let definition = self.definition(parent_type, &first.node)?;
        if let Some(field_type) = self.composite_type(definition.named_type())? {
            for field in field_nodes {
                self.write_selection_set(field_type, &field.node.selection_set.node, &mut shape)?;
            }
        }

        Ok(shape)
    }

    fn definition<'t>(&self, parent_type: &'t MetaType, field: &Field) -> Result<&'t MetaField, FingerprintError> {
        let name = field.name.node.as_str();
        parent_type.field(name).ok_or_else(|| FingerprintError::UnknownField {
            type_name: parent_type.name.clone(),
            field_name: name.to_string(),
        })
    }

    fn arguments(
        &self,
        definition: &MetaField,
        field: &Field,
    ) -> Result<BTreeMap<String, serde_json::Value>, FingerprintError> {
        resolve_field_arguments(self.registry, definition, &field.arguments, self.variables)?
            .iter()
            .map(|(name, value)| Ok((name.to_string(), canonical_json(value.clone().into_json()?))))
            .collect()
    }

    /// The named type of a field when it has subfields.
    fn composite_type(&self, name: &str) -> Result<Option<&'a MetaType>, FingerprintError> {
        self.registry
            .lookup_type(name)
            .map(|ty| ty.is_composite().then_some(ty))
            .ok_or_else(|| FingerprintError::UnknownType(name.to_string()))
    }

    fn add_field(
        &self,
        parent_type: &MetaType,
        field: &Field,
        fingerprint: &mut SelectionFingerprint,
    ) -> Result<(), FingerprintError> {
        let definition = self.definition(parent_type, field)?;
        let args = self.arguments(definition, field)?;
        let entry = fingerprint.entry(&definition.name, args);
        self.add_subselection(definition, field, entry)
    }

    fn add_subselection(
        &self,
        definition: &MetaField,
        field: &Field,
        entry: &mut FieldFingerprint,
    ) -> Result<(), FingerprintError> {
        if field.selection_set.node.items.is_empty() {
            return Ok(());
        }

        if let Some(field_type) = self.composite_type(definition.named_type())? {
            let fields = entry.fields.get_or_insert_with(SelectionFingerprint::default);
            self.add_selection_set(field_type, &field.selection_set.node, fields)?;
        }

        Ok(())
    }

    fn add_selection_set(
        &self,
        parent_type: &MetaType,
        selection_set: &SelectionSet,
        fingerprint: &mut SelectionFingerprint,
    ) -> Result<(), FingerprintError> {
        for selection in &selection_set.items {
            match &selection.node {
                Selection::Field(field) => {
                    let field = &field.node;
                    if is_excluded(&field.directives, self.variables) || field.name.node.as_str() == "__typename" {
                        continue;
                    }
                    self.add_field(parent_type, field, fingerprint)?;
                }
                Selection::FragmentSpread(spread) => {
                    if is_excluded(&spread.node.directives, self.variables) {
                        continue;
                    }
                    let name = &spread.node.fragment_name.node;
                    let fragment = self
                        .fragments
                        .get(name)
                        .ok_or_else(|| FingerprintError::UnknownFragment(name.to_string()))?;
                    let type_condition = self.type_condition(&fragment.node.type_condition.node.on.node)?;
                    self.add_selection_set(type_condition, &fragment.node.selection_set.node, fingerprint)?;
                }
                Selection::InlineFragment(fragment) => {
                    if is_excluded(&fragment.node.directives, self.variables) {
                        continue;
                    }
                    let type_condition = match &fragment.node.type_condition {
                        Some(condition) => self.type_condition(&condition.node.on.node)?,
                        None => parent_type,
                    };
                    self.add_selection_set(type_condition, &fragment.node.selection_set.node, fingerprint)?;
                }
            }
        }

        Ok(())
    }

    fn write_selection_set(
        &self,
        parent_type: &MetaType,
        selection_set: &SelectionSet,
        out: &mut String,
    ) -> Result<(), FingerprintError> {
        for selection in &selection_set.items {
            match &selection.node {
                Selection::Field(field) => {
                    let field = &field.node;
                    if is_excluded(&field.directives, self.variables) {
                        continue;
                    }
                    let response_key = field.response_key().node.as_str();
                    let name = field.name.node.as_str();

                    out.push(' ');
                    if response_key != name {
                        out.push_str(response_key);
                        out.push(':');
                    }
                    if name == "__typename" {
                        out.push_str(name);
                        continue;
                    }

                    let definition = self.definition(parent_type, field)?;
                    write_invocation(out, name, &self.arguments(definition, field)?);
                    if field.selection_set.node.items.is_empty() {
                        continue;
                    }
                    if let Some(field_type) = self.composite_type(definition.named_type())? {
                        out.push_str(" {");
                        self.write_selection_set(field_type, &field.selection_set.node, out)?;
                        out.push_str(" }");
                    }
                }
                Selection::FragmentSpread(spread) => {
                    if is_excluded(&spread.node.directives, self.variables) {
                        continue;
                    }
                    let name = &spread.node.fragment_name.node;
                    let fragment = self
                        .fragments
                        .get(name)
                        .ok_or_else(|| FingerprintError::UnknownFragment(name.to_string()))?;
                    let type_condition = self.type_condition(&fragment.node.type_condition.node.on.node)?;
                    self.write_fragment(parent_type, type_condition, &fragment.node.selection_set.node, out)?;
                }
                Selection::InlineFragment(fragment) => {
                    if is_excluded(&fragment.node.directives, self.variables) {
                        continue;
                    }
                    let type_condition = match &fragment.node.type_condition {
                        Some(condition) => self.type_condition(&condition.node.on.node)?,
                        None => parent_type,
                    };
                    self.write_fragment(parent_type, type_condition, &fragment.node.selection_set.node, out)?;
                }
            }
        }

        Ok(())
    }

    fn write_fragment(
        &self,
        parent_type: &MetaType,
        type_condition: &MetaType,
        selection_set: &SelectionSet,
        out: &mut String,
    ) -> Result<(), FingerprintError> {
        if parent_type.is_object() {
            if type_condition.is_object() && type_condition.name != parent_type.name {
                return Ok(());
            }
            return self.write_selection_set(parent_type, selection_set, out);
        }
        if parent_type.name == type_condition.name {
            return self.write_selection_set(parent_type, selection_set, out);
        }

        out.push_str(" ... on ");
        out.push_str(&type_condition.name);
        out.push_str(" {");
        self.write_selection_set(type_condition, selection_set, out)?;
        out.push_str(" }");
        Ok(())
    }

    fn type_condition(&self, name: &Name) -> Result<&'a MetaType, FingerprintError> {
        self.registry
            .lookup_type(name.as_str())
            .ok_or_else(|| FingerprintError::UnknownType(name.to_string()))
    }
}

/// Sorts object keys at every depth so that equal values render identically.
pub(crate) fn canonical_json(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(object) => {
            let mut entries = object
                .into_iter()
                .map(|(key, value)| (key, canonical_json(value)))
                .collect::<Vec<_>>();
            entries.sort_by(|(left, _), (right, _)| left.cmp(right));
            serde_json::Value::Object(entries.into_iter().collect())
        }
        serde_json::Value::Array(items) => serde_json::Value::Array(items.into_iter().map(canonical_json).collect()),
        value => value,
    }
}

/// Values already computed during one execution, keyed by the parent type and the
/// positions of the field nodes they were built from.
pub(crate) struct SelectionMemo<T> {
    entries: Mutex<HashMap<MemoKey, Arc<T>>>,
}

impl<T> Default for SelectionMemo<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::default(),
        }
    }
}

#[derive(PartialEq, Eq, Hash)]
struct MemoKey {
    parent_type: String,
    nodes: Box<[(usize, usize)]>,
}

impl<T> SelectionMemo<T> {
    pub(crate) fn get_or_try_insert(
        &self,
        parent_type: &str,
        field_nodes: &[&Positioned<Field>],
        build: impl FnOnce() -> Result<T, FingerprintError>,
    ) -> Result<Arc<T>, FingerprintError> {
        let key = MemoKey {
            parent_type: parent_type.to_string(),
            nodes: field_nodes.iter().map(|field| (field.pos.line, field.pos.column)).collect(),
        };

        if let Some(value) = self.lock().get(&key) {
            return Ok(value.clone());
        }

        // Built outside of the lock, concurrent builds of the same key yield equal values.
        let value = Arc::new(build()?);
        Ok(self.lock().entry(key).or_insert(value).clone())
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<MemoKey, Arc<T>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use async_graphql_parser::{parse_query, types::ExecutableDocument};
    use async_graphql_value::ConstValue;
    use serde_json::json;

    use super::*;

    const SDL: &str = r"
        type Query {
            objects1: [Object1]
            object1(id: Int!): Object1
            node: Node
        }

        interface Node { id: ID! }

        type Object1 implements Node {
            id: ID!
            subObjects2: [Object2]
        }

        type Object2 {
            id: String
            fieldWithArgs(arg1: String, options: Options): String
        }

        input Options {
            first: Int
            second: Int
        }
    ";

    struct Fixture {
        registry: Registry,
        document: ExecutableDocument,
        variables: Variables,
    }

    impl Fixture {
        fn new(query: &str, variables: serde_json::Value) -> Self {
            Self {
                registry: Registry::from_sdl(SDL).unwrap(),
                document: parse_query(query).unwrap(),
                variables: Variables::from_json(variables),
            }
        }

        /// Fingerprint of `Object1.subObjects2` as selected under `objects1` or `node`.
        fn sub_objects(&self) -> SelectionFingerprint {
            let (_, operation) = self.document.operations.iter().next().unwrap();
            let nodes = collect_named(&self.document, &operation.node.selection_set.node, "subObjects2");
            let builder = SelectionKeyBuilder::new(&self.registry, &self.document.fragments, &self.variables);
            builder
                .build(self.registry.lookup_type("Object1").unwrap(), &nodes)
                .unwrap()
        }
    }

    /// Every field node named `name`, looking through fields and fragments.
    fn collect_named<'a>(
        document: &'a ExecutableDocument,
        selection_set: &'a SelectionSet,
        name: &str,
    ) -> Vec<&'a Positioned<Field>> {
        let mut found = Vec::new();
        for selection in &selection_set.items {
            match &selection.node {
                Selection::Field(field) if field.node.name.node.as_str() == name => found.push(field),
                Selection::Field(field) => {
                    found.extend(collect_named(document, &field.node.selection_set.node, name));
                }
                Selection::FragmentSpread(spread) => {
                    let fragment = &document.fragments[&spread.node.fragment_name.node];
                    found.extend(collect_named(document, &fragment.node.selection_set.node, name));
                }
                Selection::InlineFragment(fragment) => {
                    found.extend(collect_named(document, &fragment.node.selection_set.node, name));
                }
            }
        }
        found
    }

    fn fingerprint(query: &str, variables: serde_json::Value) -> SelectionFingerprint {
        Fixture::new(query, variables).sub_objects()
    }

    /// Response shape of `objects1` as selected under the root.
    fn shape(query: &str, variables: serde_json::Value) -> String {
        let fixture = Fixture::new(query, variables);
        let (_, operation) = fixture.document.operations.iter().next().unwrap();
        let nodes = collect_named(&fixture.document, &operation.node.selection_set.node, "objects1");
        let builder = SelectionKeyBuilder::new(&fixture.registry, &fixture.document.fragments, &fixture.variables);
        builder
            .response_shape(fixture.registry.lookup_type("Query").unwrap(), &nodes)
            .unwrap()
    }

    #[test]
    fn canonical_shape() {
        let fingerprint = fingerprint(
            r#"query($arg1: String) { objects1 { subObjects2 { id fieldWithArgs(arg1: $arg1) } } }"#,
            json!({"arg1": "ARG1"}),
        );

        insta::assert_json_snapshot!(fingerprint, @r###"
        {
          "subObjects2": {
            "fields": {
              "fieldWithArgs(arg1: \"ARG1\")": {
                "args": {
                  "arg1": "ARG1"
                }
              },
              "id": {}
            }
          }
        }
        "###);
    }

    #[test]
    fn ignores_aliases_order_fragments_and_typename() {
        let plain = fingerprint("{ objects1 { subObjects2 { id fieldWithArgs(arg1: \"x\") } } }", json!({}));

        let reshaped = fingerprint(
            r#"
            query {
                objects1 {
                    renamed: subObjects2 {
                        __typename
                        ... on Object2 { other: fieldWithArgs(arg1: "x") }
                        ...Ids
                    }
                }
            }

            fragment Ids on Object2 { id __typename }
            "#,
            json!({}),
        );

        assert_eq!(plain, reshaped);
    }

    #[test]
    fn literal_and_variable_arguments_are_equivalent() {
        let literal = fingerprint(
            "{ objects1 { subObjects2 { fieldWithArgs(options: {second: 2, first: 1}) } } }",
            json!({}),
        );
        let variable = fingerprint(
            "query($options: Options) { objects1 { subObjects2 { fieldWithArgs(options: $options) } } }",
            json!({"options": {"first": 1, "second": 2}}),
        );

        assert_eq!(literal, variable);
    }

    #[test]
    fn sensitive_to_selection_and_arguments() {
        let query = "query($arg1: String) { objects1 { subObjects2 { id fieldWithArgs(arg1: $arg1) } } }";
        let base = fingerprint(query, json!({"arg1": "ARG1"}));

        assert_ne!(base, fingerprint(query, json!({"arg1": "OTHER"})));
        assert_ne!(base, fingerprint(query, json!({"arg1": null})));
        assert_ne!(base, fingerprint(query, json!({})));
        assert_ne!(base, fingerprint("{ objects1 { subObjects2 { id } } }", json!({})));
    }

    #[test]
    fn unprovided_variable_differs_from_explicit_null() {
        let query = "query($arg1: String) { objects1 { subObjects2 { fieldWithArgs(arg1: $arg1) } } }";
        let omitted = fingerprint(query, json!({}));
        let null = fingerprint(query, json!({"arg1": null}));

        let fields = |fingerprint: &SelectionFingerprint| {
            let fields = fingerprint.get("subObjects2").unwrap().fields.as_ref().unwrap();
            fields.keys().map(str::to_string).collect::<Vec<_>>()
        };
        assert_eq!(fields(&omitted), ["fieldWithArgs"]);
        assert_eq!(fields(&null), ["fieldWithArgs(arg1: null)"]);
    }

    #[test]
    fn merges_repeated_selections() {
        let merged = fingerprint("{ objects1 { subObjects2 { id } subObjects2 { fieldWithArgs } } }", json!({}));
        let single = fingerprint("{ objects1 { subObjects2 { id fieldWithArgs } } }", json!({}));

        assert_eq!(merged, single);
    }

    #[test]
    fn distinct_arguments_stay_distinct() {
        let fingerprint = fingerprint(
            r#"{ objects1 { subObjects2 { a: fieldWithArgs(arg1: "a") b: fieldWithArgs(arg1: "b") } } }"#,
            json!({}),
        );

        let fields = fingerprint.get("subObjects2").unwrap().fields.as_ref().unwrap();
        assert_eq!(
            fields.keys().collect::<Vec<_>>(),
            [r#"fieldWithArgs(arg1: "a")"#, r#"fieldWithArgs(arg1: "b")"#]
        );
    }

    #[test]
    fn honors_skip_and_include() {
        let query = "query($show: Boolean!) { objects1 { subObjects2 { id fieldWithArgs @include(if: $show) } } }";

        assert_eq!(
            fingerprint(query, json!({"show": false})),
            fingerprint("{ objects1 { subObjects2 { id } } }", json!({}))
        );
        assert_eq!(
            fingerprint(query, json!({"show": true})),
            fingerprint("{ objects1 { subObjects2 { id fieldWithArgs } } }", json!({}))
        );
    }

    #[test]
    fn fragments_on_interfaces() {
        let through_interface = fingerprint(
            "{ node { ... on Object1 { subObjects2 { id } } } }",
            json!({}),
        );
        assert_eq!(through_interface, fingerprint("{ objects1 { subObjects2 { id } } }", json!({})));
    }

    #[test]
    fn root_arguments_come_from_the_first_node() {
        let fixture = Fixture::new(
            r#"{ objects1 { subObjects2 { a: fieldWithArgs(arg1: "x") a: fieldWithArgs(arg1: "y") } } }"#,
            json!({}),
        );
        let (_, operation) = fixture.document.operations.iter().next().unwrap();
        let nodes = collect_named(&fixture.document, &operation.node.selection_set.node, "fieldWithArgs");
        let builder = SelectionKeyBuilder::new(&fixture.registry, &fixture.document.fragments, &fixture.variables);
        let object2 = fixture.registry.lookup_type("Object2").unwrap();

        let first = builder.build(object2, &nodes).unwrap();
        assert_eq!(first.keys().collect::<Vec<_>>(), [r#"fieldWithArgs(arg1: "x")"#]);

        let reversed = nodes.iter().rev().copied().collect::<Vec<_>>();
        let swapped = builder.build(object2, &reversed).unwrap();
        assert_eq!(swapped.keys().collect::<Vec<_>>(), [r#"fieldWithArgs(arg1: "y")"#]);
    }

    #[test]
    fn response_shape_follows_the_document() {
        let shape = shape(
            r#"
            query($arg1: String) {
                objects1 {
                    __typename
                    renamed: id
                    subObjects2 { fieldWithArgs(arg1: $arg1) }
                }
            }
            "#,
            json!({"arg1": "x"}),
        );

        assert_eq!(shape, r#" __typename renamed:id subObjects2 { fieldWithArgs(arg1: "x") }"#);
    }

    #[test]
    fn response_shape_depends_on_aliases_and_order() {
        let plain = shape("{ objects1 { id subObjects2 { id } } }", json!({}));

        assert_ne!(plain, shape("{ objects1 { subObjects2 { id } id } }", json!({})));
        assert_ne!(plain, shape("{ objects1 { identifier: id subObjects2 { id } } }", json!({})));
        assert_ne!(plain, shape("{ objects1 { __typename id subObjects2 { id } } }", json!({})));
    }

    #[test]
    fn response_shape_flattens_fragments_on_objects() {
        let plain = shape("{ objects1 { id subObjects2 { id } } }", json!({}));

        let spread = shape(
            r"
            query { objects1 { ...Fields } }
            fragment Fields on Object1 { id subObjects2 { ... on Object2 { id } } }
            ",
            json!({}),
        );
        assert_eq!(plain, spread);
        assert_eq!(
            shape("query($show: Boolean!) { objects1 { id @include(if: $show) } }", json!({"show": false})),
            ""
        );
    }

    #[test]
    fn memo_reuses_fingerprints() {
        let fixture = Fixture::new("{ objects1 { subObjects2 { id } } }", json!({}));
        let (_, operation) = fixture.document.operations.iter().next().unwrap();
        let nodes = collect_named(&fixture.document, &operation.node.selection_set.node, "subObjects2");
        let builder = SelectionKeyBuilder::new(&fixture.registry, &fixture.document.fragments, &fixture.variables);
        let object1 = fixture.registry.lookup_type("Object1").unwrap();

        let memo = SelectionMemo::default();
        let first = memo
            .get_or_try_insert("Object1", &nodes, || builder.build(object1, &nodes))
            .unwrap();
        let second = memo
            .get_or_try_insert("Object1", &nodes, || unreachable!("should have been memoized"))
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(memo.len(), 1);
    }

    #[test]
    fn unknown_fields_are_errors() {
        let fixture = Fixture::new("{ objects1 { subObjects2 { missing } } }", json!({}));
        let (_, operation) = fixture.document.operations.iter().next().unwrap();
        let nodes = collect_named(&fixture.document, &operation.node.selection_set.node, "subObjects2");
        let builder = SelectionKeyBuilder::new(&fixture.registry, &fixture.document.fragments, &fixture.variables);

        let error = builder
            .build(fixture.registry.lookup_type("Object1").unwrap(), &nodes)
            .unwrap_err();
        assert_eq!(error.to_string(), "Field 'missing' does not exist on type 'Object2'");
    }

    #[test]
    fn canonical_json_sorts_nested_keys() {
        let value = ConstValue::from_json(json!({"b": [{"z": 1, "a": 2}], "a": null})).unwrap();
        let canonical = canonical_json(value.into_json().unwrap());
        assert_eq!(canonical.to_string(), r#"{"a":null,"b":[{"a":2,"z":1}]}"#);
    }
}
