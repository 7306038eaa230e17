//! Traversals over selection trees.
//!
//! Rewrites come in two orders: [`Selection::map_self_first`] rewrites a node before
//! descending into the (possibly rewritten) children, [`Selection::map_children_first`]
//! rewrites the children first so that the callback sees already transformed
//! sub-trees.
use std::collections::HashSet;

use super::Argument;
use super::Query;
use super::Selection;
use super::VariableDefinition;
use crate::error::QueryError;

/// Pre-order iterator over a selection tree.
pub struct SelectionIter<'a> {
    stack: Vec<&'a Selection>,
}

impl<'a> Iterator for SelectionIter<'a> {
    type Item = &'a Selection;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.stack.pop()?;
        self.stack.extend(next.selection.iter().rev());
        Some(next)
    }
}

impl Selection {
    /// Rewrite this node, then each child of the result.
    pub fn map_self_first<E, F>(self, f: &mut F) -> Result<Selection, E>
    where
        F: FnMut(Selection) -> Result<Selection, E>,
    {
        let mut current = f(self)?;
        let children = std::mem::take(&mut current.selection);
        for child in children {
            current.selection.push(child.map_self_first(f)?);
        }
        Ok(current)
    }

    /// Rewrite each child, then this node.
    pub fn map_children_first<E, F>(mut self, f: &mut F) -> Result<Selection, E>
    where
        F: FnMut(Selection) -> Result<Selection, E>,
    {
        let children = std::mem::take(&mut self.selection);
        for child in children {
            self.selection.push(child.map_children_first(f)?);
        }
        f(self)
    }

    /// Fold the tree bottom-up. The callback receives the node, its ancestors (root
    /// first) and the folded values of its children.
    pub fn fold<T, F>(&self, f: &mut F) -> T
    where
        F: FnMut(&Selection, &[&Selection], Vec<T>) -> T,
    {
        let mut parents = Vec::new();
        self.fold_with_parents(&mut parents, f)
    }

    fn fold_with_parents<'a, T, F>(&'a self, parents: &mut Vec<&'a Selection>, f: &mut F) -> T
    where
        F: FnMut(&Selection, &[&Selection], Vec<T>) -> T,
    {
        parents.push(self);
        let children = self
            .selection
            .iter()
            .map(|child| child.fold_with_parents(parents, f))
            .collect();
        parents.pop();
        f(self, parents, children)
    }

    /// Keep only the descendants for which `predicate` holds. Returns `None` if this
    /// node itself is rejected.
    pub fn filter<F>(self, predicate: &mut F) -> Option<Selection>
    where
        F: FnMut(&Selection) -> bool,
    {
        if !predicate(&self) {
            return None;
        }
        let mut current = self;
        let children = std::mem::take(&mut current.selection);
        current.selection = children
            .into_iter()
            .filter_map(|child| child.filter(predicate))
            .collect();
        Some(current)
    }

    /// Rewrite children first, then this node. Returning `None` drops the node with
    /// its sub-tree.
    pub fn filter_map<F>(mut self, f: &mut F) -> Option<Selection>
    where
        F: FnMut(Selection) -> Option<Selection>,
    {
        let children = std::mem::take(&mut self.selection);
        self.selection = children
            .into_iter()
            .filter_map(|child| child.filter_map(f))
            .collect();
        f(self)
    }

    /// Rewrite every argument of the tree. Returning `None` drops the argument.
    pub fn map_args<F>(mut self, f: &mut F) -> Selection
    where
        F: FnMut(Argument) -> Option<Argument>,
    {
        let arguments = std::mem::take(&mut self.arguments);
        self.arguments = arguments.into_iter().filter_map(&mut *f).collect();
        let children = std::mem::take(&mut self.selection);
        self.selection = children.into_iter().map(|c| c.map_args(f)).collect();
        self
    }

    /// Keep only the arguments of the tree for which `predicate` holds.
    pub fn filter_args<F>(self, predicate: &mut F) -> Selection
    where
        F: FnMut(&Argument) -> bool,
    {
        self.map_args(&mut |arg| predicate(&arg).then_some(arg))
    }

    pub fn iter(&self) -> SelectionIter<'_> {
        SelectionIter { stack: vec![self] }
    }

    pub fn iter_args(&self) -> impl Iterator<Item = &Argument> {
        self.iter().flat_map(|s| s.arguments.iter())
    }

    pub fn exists<F>(&self, mut predicate: F) -> bool
    where
        F: FnMut(&Selection) -> bool,
    {
        self.iter().any(|s| predicate(s))
    }

    pub fn exists_args<F>(&self, mut predicate: F) -> bool
    where
        F: FnMut(&Argument) -> bool,
    {
        self.iter_args().any(|arg| predicate(arg))
    }

    /// First argument of the tree (pre-order) satisfying `predicate`.
    pub fn find_args<F>(&self, mut predicate: F) -> Option<&Argument>
    where
        F: FnMut(&Argument) -> bool,
    {
        self.iter_args().find(|arg| predicate(arg))
    }

    /// Variables referenced by the arguments of this node only.
    pub fn own_variables(&self) -> impl Iterator<Item = &str> {
        self.arguments.iter().flat_map(|arg| arg.value.variables())
    }

    /// Drop every sub-tree whose own arguments reference a variable outside `bound`.
    pub fn prune_undefined(self, bound: &HashSet<String>) -> Option<Selection> {
        if self.own_variables().any(|name| !bound.contains(name)) {
            return None;
        }
        let mut current = self;
        let children = std::mem::take(&mut current.selection);
        current.selection = children
            .into_iter()
            .filter_map(|child| child.prune_undefined(bound))
            .collect();
        Some(current)
    }

    /// Remove the sub-tree described by `other`. A leaf `other` removes the whole
    /// selection with its key.
    pub fn remove(self, other: &Selection) -> Option<Selection> {
        if self.key() != other.key() {
            return Some(self);
        }
        if other.is_leaf() {
            return None;
        }
        let mut current = self;
        let children = std::mem::take(&mut current.selection);
        current.selection = children
            .into_iter()
            .filter_map(|child| match other.child(child.key()) {
                Some(removed) => child.remove(removed),
                None => Some(child),
            })
            .collect();
        Some(current)
    }

    /// Keep the part of this selection described by `other`. A leaf `other` keeps
    /// the whole sub-tree.
    pub fn select(&self, other: &Selection) -> Option<Selection> {
        if self.key() != other.key() {
            return None;
        }
        if other.is_leaf() {
            return Some(self.clone());
        }
        let mut selected = Selection {
            selection: Vec::new(),
            ..self.clone()
        };
        selected.selection = other
            .selection
            .iter()
            .filter_map(|wanted| self.child(wanted.key())?.select(wanted))
            .collect();
        Some(selected)
    }

    /// One root-to-leaf selection per leaf of this tree.
    pub fn split(&self) -> Vec<Selection> {
        if self.is_leaf() {
            return vec![self.clone()];
        }
        self.selection
            .iter()
            .flat_map(Selection::split)
            .map(|branch| Selection {
                selection: vec![branch],
                ..self.clone_shallow()
            })
            .collect()
    }

    fn clone_shallow(&self) -> Selection {
        Selection {
            fmeta: self.fmeta.clone(),
            alias: self.alias.clone(),
            arguments: self.arguments.clone(),
            selection: Vec::new(),
        }
    }

    /// Response key path of every leaf.
    pub fn data_paths(&self) -> Vec<Vec<String>> {
        self.fold(&mut |selection, _, children: Vec<Vec<Vec<String>>>| {
            if children.is_empty() {
                return vec![vec![selection.key().to_string()]];
            }
            children
                .into_iter()
                .flatten()
                .map(|mut path| {
                    path.insert(0, selection.key().to_string());
                    path
                })
                .collect()
        })
    }

    /// Definitions of the variables used directly as argument values, typed after
    /// the field's argument schema.
    pub fn infer_variable_definitions(&self) -> Result<Vec<VariableDefinition>, QueryError> {
        let mut definitions: Vec<VariableDefinition> = Vec::new();
        for selection in self.iter() {
            for arg in &selection.arguments {
                let super::InputValue::Variable(name) = &arg.value else {
                    continue;
                };
                if definitions.iter().any(|v| &v.name == name) {
                    continue;
                }
                let type_ = selection
                    .fmeta
                    .type_of_arg(&arg.name)
                    .map_err(|_| QueryError::UntypedVariable(name.clone()))?;
                definitions.push(VariableDefinition::new(name.clone(), type_.clone()));
            }
        }
        Ok(definitions)
    }
}

impl Query {
    pub fn map_self_first<E, F>(mut self, f: &mut F) -> Result<Query, E>
    where
        F: FnMut(Selection) -> Result<Selection, E>,
    {
        let roots = std::mem::take(&mut self.selection);
        for root in roots {
            self.selection.push(root.map_self_first(f)?);
        }
        Ok(self)
    }

    pub fn map_children_first<E, F>(mut self, f: &mut F) -> Result<Query, E>
    where
        F: FnMut(Selection) -> Result<Selection, E>,
    {
        let roots = std::mem::take(&mut self.selection);
        for root in roots {
            self.selection.push(root.map_children_first(f)?);
        }
        Ok(self)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Selection> {
        self.selection.iter().flat_map(Selection::iter)
    }

    /// Drop selections using unbound variables and the definitions of unbound
    /// variables.
    pub fn prune_undefined(mut self, bound: &HashSet<String>) -> Query {
        let roots = std::mem::take(&mut self.selection);
        self.selection = roots
            .into_iter()
            .filter_map(|root| root.prune_undefined(bound))
            .collect();
        self.variables.retain(|v| bound.contains(&v.name));
        self
    }

    pub fn remove(mut self, other: &Selection) -> Query {
        let roots = std::mem::take(&mut self.selection);
        self.selection = roots
            .into_iter()
            .filter_map(|root| root.remove(other))
            .collect();
        self
    }
}
