use std::collections::HashSet;

use async_graphql_parser::{
    types::{Field, Selection, SelectionSet},
    Positioned,
};

use super::{CollectedFields, ExecutionContext};
use crate::{directives::is_excluded, registry::MetaType};

impl<'a> ExecutionContext<'a> {
    /// Groups the fields selected on `object_type` by response key, looking through the
    /// fragments that apply to it and honoring `@skip` and `@include`.
    pub(super) fn collect_fields(
        &self,
        object_type: &MetaType,
        selection_sets: impl IntoIterator<Item = &'a SelectionSet>,
    ) -> CollectedFields<'a> {
        let mut fields = CollectedFields::new();
        let mut visited_fragments = HashSet::new();

        for selection_set in selection_sets {
            self.collect_into(object_type, selection_set, &mut fields, &mut visited_fragments);
        }

        fields
    }

    /// Fields selected beneath every node of a field, merged.
    pub(super) fn collect_subfields(
        &self,
        object_type: &MetaType,
        nodes: &[&'a Positioned<Field>],
    ) -> CollectedFields<'a> {
        self.collect_fields(object_type, nodes.iter().map(|field| &field.node.selection_set.node))
    }

    fn collect_into(
        &self,
        object_type: &MetaType,
        selection_set: &'a SelectionSet,
        fields: &mut CollectedFields<'a>,
        visited_fragments: &mut HashSet<&'a str>,
    ) {
        for selection in &selection_set.items {
            match &selection.node {
                Selection::Field(field) => {
                    if is_excluded(&field.node.directives, &self.variables) {
                        continue;
                    }
                    fields
                        .entry(field.node.response_key().node.as_str())
                        .or_default()
                        .push(field);
                }
                Selection::FragmentSpread(spread) => {
                    if is_excluded(&spread.node.directives, &self.variables) {
                        continue;
                    }
                    let name = spread.node.fragment_name.node.as_str();
                    if !visited_fragments.insert(name) {
                        continue;
                    }
                    let Some(fragment) = self.document.fragments.get(&spread.node.fragment_name.node) else {
                        continue;
                    };
                    let type_condition = fragment.node.type_condition.node.on.node.as_str();
                    if !self
                        .schema
                        .registry
                        .type_condition_applies(type_condition, &object_type.name)
                    {
                        continue;
                    }
                    self.collect_into(object_type, &fragment.node.selection_set.node, fields, visited_fragments);
                }
                Selection::InlineFragment(fragment) => {
                    if is_excluded(&fragment.node.directives, &self.variables) {
                        continue;
                    }
                    if let Some(type_condition) = &fragment.node.type_condition {
                        let type_condition = type_condition.node.on.node.as_str();
                        if !self
                            .schema
                            .registry
                            .type_condition_applies(type_condition, &object_type.name)
                        {
                            continue;
                        }
                    }
                    self.collect_into(object_type, &fragment.node.selection_set.node, fields, visited_fragments);
                }
            }
        }
    }
}
