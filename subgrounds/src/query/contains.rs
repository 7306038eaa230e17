use super::Argument;
use super::Query;
use super::Selection;

/// Compare two argument lists, ignoring order.
pub(crate) fn same_arguments(left: &[Argument], right: &[Argument]) -> bool {
    left.len() == right.len()
        && left.iter().all(|arg| {
            right
                .iter()
                .find(|other| other.name == arg.name)
                .is_some_and(|other| other.value == arg.value)
        })
}

/// Compare two selection sets, ignoring order.
pub(crate) fn same_selections(left: &[Selection], right: &[Selection]) -> bool {
    left.len() == right.len() && left.iter().all(|s| right.iter().any(|other| s == other))
}

impl PartialEq for Selection {
    fn eq(&self, other: &Self) -> bool {
        self.fmeta == other.fmeta
            && self.alias == other.alias
            && same_arguments(&self.arguments, &other.arguments)
            && same_selections(&self.selection, &other.selection)
    }
}

impl PartialEq for Query {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && same_selections(&self.selection, &other.selection)
            && self.variables.len() == other.variables.len()
            && self
                .variables
                .iter()
                .all(|v| other.variables.iter().any(|o| v == o))
    }
}

impl Selection {
    /// Whether `other` is a sub-tree of this selection: same field, alias and arguments,
    /// and every child of `other` contained in the child with the same key.
    pub fn contains(&self, other: &Selection) -> bool {
        self.key() == other.key()
            && self.name() == other.name()
            && same_arguments(&self.arguments, &other.arguments)
            && other.selection.iter().all(|child| {
                self.child(child.key())
                    .is_some_and(|mine| mine.contains(child))
            })
    }

    /// Whether this selection or any of its descendants is list-valued.
    pub fn contains_list(&self) -> bool {
        self.fmeta.type_.is_list() || self.selection.iter().any(Selection::contains_list)
    }
}

impl Query {
    pub fn contains_selection(&self, selection: &Selection) -> bool {
        self.selection.iter().any(|s| s.contains(selection))
    }

    pub fn contains_list(&self) -> bool {
        self.selection.iter().any(Selection::contains_list)
    }
}
