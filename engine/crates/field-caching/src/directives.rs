use async_graphql_parser::{types::Directive, Positioned};
use async_graphql_value::{ConstValue, Value};

use crate::Variables;

/// Whether `@skip` or `@include` exclude the annotated selection.
///
/// An `if` argument that is neither a boolean nor a variable bound to one leaves the
/// selection in place.
pub(crate) fn is_excluded(directives: &[Positioned<Directive>], variables: &Variables) -> bool {
    directives.iter().any(|directive| {
        let directive = &directive.node;
        let condition = || {
            directive
                .get_argument("if")
                .and_then(|value| match &value.node {
                    Value::Boolean(condition) => Some(*condition),
                    Value::Variable(name) => match variables.get(name) {
                        Some(ConstValue::Boolean(condition)) => Some(*condition),
                        _ => None,
                    },
                    _ => None,
                })
        };

        match directive.name.node.as_str() {
            "skip" => condition() == Some(true),
            "include" => condition() == Some(false),
            _ => false,
        }
    })
}

#[cfg(test)]
mod tests {
    use async_graphql_parser::{parse_query, types::Selection};
    use async_graphql_value::Name;

    use super::*;

    fn excluded(query: &str, show: Option<bool>) -> Vec<bool> {
        let document = parse_query(query).unwrap();
        let (_, operation) = document.operations.iter().next().unwrap();
        let variables = show
            .map(|show| (Name::new("show"), ConstValue::Boolean(show)))
            .into_iter()
            .collect::<Variables>();

        operation
            .node
            .selection_set
            .node
            .items
            .iter()
            .map(|selection| match &selection.node {
                Selection::Field(field) => is_excluded(&field.node.directives, &variables),
                Selection::FragmentSpread(spread) => is_excluded(&spread.node.directives, &variables),
                Selection::InlineFragment(fragment) => is_excluded(&fragment.node.directives, &variables),
            })
            .collect()
    }

    #[test]
    fn literal_conditions() {
        assert_eq!(
            excluded("{ a b @skip(if: true) c @include(if: false) d @include(if: true) }", None),
            [false, true, true, false]
        );
    }

    #[test]
    fn variable_conditions() {
        let query = "query($show: Boolean!) { a @include(if: $show) b @skip(if: $show) }";
        assert_eq!(excluded(query, Some(true)), [false, true]);
        assert_eq!(excluded(query, Some(false)), [true, false]);
    }
}
