//! Combining selection trees and queries.
use super::Query;
use super::Selection;
use super::VariableDefinition;
use super::contains::same_arguments;
use crate::error::QueryError;

impl Selection {
    /// Merge `other` into this selection.
    ///
    /// Children are unioned by response key; children sharing a key are merged
    /// recursively.
    ///
    /// # Errors
    ///
    /// Returns an error if the two selections do not have the same key, select
    /// different fields, or use different arguments.
    pub fn merge_into(&mut self, other: Selection) -> Result<(), QueryError> {
        if self.key() != other.key() {
            return Err(QueryError::KeyMismatch {
                left: self.key().to_string(),
                right: other.key().to_string(),
            });
        }
        if self.name() != other.name() {
            return Err(QueryError::FieldMismatch {
                key: self.key().to_string(),
                left: self.name().to_string(),
                right: other.name().to_string(),
            });
        }
        if !same_arguments(&self.arguments, &other.arguments) {
            return Err(QueryError::IncompatibleArguments {
                field: self.name().to_string(),
            });
        }
        for child in other.selection {
            merge_selection_into(&mut self.selection, child)?;
        }
        Ok(())
    }

    /// Combine two selections sharing the same key.
    pub fn combine(mut self, other: Selection) -> Result<Selection, QueryError> {
        self.merge_into(other)?;
        Ok(self)
    }

    /// Add children to this selection.
    pub fn add(
        mut self,
        children: impl IntoIterator<Item = Selection>,
    ) -> Result<Selection, QueryError> {
        for child in children {
            merge_selection_into(&mut self.selection, child)?;
        }
        Ok(self)
    }

    /// Merge a list of selections into a selection set with unique keys.
    pub fn merge(
        selections: impl IntoIterator<Item = Selection>,
    ) -> Result<Vec<Selection>, QueryError> {
        let mut merged = Vec::new();
        for selection in selections {
            merge_selection_into(&mut merged, selection)?;
        }
        Ok(merged)
    }
}

pub(crate) fn merge_selection_into(
    target: &mut Vec<Selection>,
    selection: Selection,
) -> Result<(), QueryError> {
    match target.iter_mut().find(|s| s.key() == selection.key()) {
        Some(existing) => existing.merge_into(selection),
        None => {
            target.push(selection);
            Ok(())
        }
    }
}

impl Query {
    /// Merge another query into this one: root selections are merged by key and
    /// variable definitions are unioned by name.
    pub fn add(mut self, other: Query) -> Result<Query, QueryError> {
        for selection in other.selection {
            merge_selection_into(&mut self.selection, selection)?;
        }
        self.add_vardefs(other.variables);
        Ok(self)
    }

    pub fn add_selection(mut self, selection: Selection) -> Result<Query, QueryError> {
        merge_selection_into(&mut self.selection, selection)?;
        Ok(self)
    }

    /// Add variable definitions; a definition replaces an existing one with the same name.
    pub fn add_vardefs(&mut self, vardefs: impl IntoIterator<Item = VariableDefinition>) {
        for vardef in vardefs {
            match self.variables.iter_mut().find(|v| v.name == vardef.name) {
                Some(existing) => *existing = vardef,
                None => self.variables.push(vardef),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::query::Argument;
    use crate::query::tests::list;
    use crate::query::tests::object;
    use crate::query::tests::scalar;
    use crate::schema::TypeKind;
    use crate::schema::TypeRef;

    fn swaps(children: Vec<Selection>) -> Selection {
        list("swaps", "Swap", children).with_arguments(vec![Argument::new("first", 10)])
    }

    #[test]
    fn combine_unions_children() {
        let a = swaps(vec![scalar("id", "ID"), object("pair", "Pair", vec![scalar("id", "ID")])]);
        let b = swaps(vec![
            scalar("amount", "BigDecimal"),
            object("pair", "Pair", vec![scalar("name", "String")]),
        ]);
        let combined = a.combine(b).unwrap();
        assert_eq!(
            combined,
            swaps(vec![
                scalar("id", "ID"),
                object("pair", "Pair", vec![scalar("id", "ID"), scalar("name", "String")]),
                scalar("amount", "BigDecimal"),
            ])
        );
    }

    #[test]
    fn add_is_idempotent_and_commutative() {
        let a = swaps(vec![scalar("id", "ID"), scalar("amount", "BigDecimal")]);
        let b = swaps(vec![scalar("timestamp", "BigInt")]);

        assert_eq!(a.clone().combine(a.clone()).unwrap(), a);
        assert_eq!(
            a.clone().combine(b.clone()).unwrap(),
            b.combine(a).unwrap()
        );
    }

    #[test]
    fn incompatible_arguments_are_rejected() {
        let a = swaps(vec![scalar("id", "ID")]);
        let b = list("swaps", "Swap", vec![scalar("id", "ID")])
            .with_arguments(vec![Argument::new("first", 20)]);
        assert_eq!(
            a.combine(b).unwrap_err(),
            QueryError::IncompatibleArguments {
                field: "swaps".to_string()
            }
        );
    }

    #[test]
    fn aliased_selections_stay_apart() {
        let merged = Selection::merge([
            swaps(vec![scalar("id", "ID")]),
            list("swaps", "Swap", vec![scalar("id", "ID")])
                .with_alias("other")
                .with_arguments(vec![Argument::new("first", 20)]),
            swaps(vec![scalar("id", "ID")]),
        ])
        .unwrap();
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn query_add_unions_vardefs() {
        let int = TypeRef::named("Int", TypeKind::Scalar);
        let a = Query::new(vec![swaps(vec![scalar("id", "ID")])])
            .with_variables(vec![VariableDefinition::new("a", int.clone())]);
        let b = Query::new(vec![object("pair", "Pair", vec![scalar("id", "ID")])]).with_variables(
            vec![
                VariableDefinition::new("a", int.clone()),
                VariableDefinition::new("b", int),
            ],
        );
        let query = a.add(b).unwrap();
        assert_eq!(query.selection.len(), 2);
        assert_eq!(query.variables.len(), 2);
    }
}
