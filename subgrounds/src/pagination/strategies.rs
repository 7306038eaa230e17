//! Pagination strategies.
//!
//! A strategy owns one cursor per [`PaginationNode`] and turns each page of data
//! into the variable bindings of the next page. Nodes that a page does not bind are
//! pruned from that page's document.
use std::collections::HashSet;

use serde_json::Value;

use super::PaginationStrategy;
use super::StrategyStep;
use super::preprocess;
use super::preprocess::PaginationNode;
use crate::configuration::PaginationConfig;
use crate::error::SubgroundsError;
use crate::json_ext;
use crate::json_ext::Object;
use crate::query::Document;
use crate::schema::SchemaMeta;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Progress {
    Continue,
    Exhausted,
}

/// How the next page of a node is positioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorMode {
    /// `skip` grows by the rows already fetched.
    Offset,
    /// `skip` is 0 and the `where` filter starts after the last seen ordering value.
    Cursor,
}

/// Pagination state of one node.
#[derive(Debug, Clone)]
pub struct Cursor {
    node: PaginationNode,
    inner: Vec<Cursor>,
    inner_idx: usize,
    filter_value: Option<Value>,
    offset: u64,
    mode: CursorMode,
    ids: HashSet<String>,
    page_count: u64,
}

impl Cursor {
    pub fn new(node: &PaginationNode) -> Self {
        Self {
            inner: node.inner.iter().map(Cursor::new).collect(),
            inner_idx: 0,
            filter_value: node.filter_value.clone(),
            offset: 0,
            mode: CursorMode::Offset,
            ids: HashSet::new(),
            page_count: 0,
            node: PaginationNode {
                inner: Vec::new(),
                ..node.clone()
            },
        }
    }

    pub fn node(&self) -> &PaginationNode {
        &self.node
    }

    /// Number of distinct rows fetched so far.
    pub fn queried_entities(&self) -> u64 {
        self.ids.len() as u64
    }

    pub fn page_count(&self) -> u64 {
        self.page_count
    }

    pub fn mode(&self) -> CursorMode {
        self.mode
    }

    pub fn filter_value(&self) -> Option<&Value> {
        self.filter_value.as_ref()
    }

    fn is_leaf(&self) -> bool {
        self.inner.is_empty()
    }

    fn reset(&mut self) {
        let mut inner = std::mem::take(&mut self.inner);
        inner.iter_mut().for_each(Cursor::reset);
        *self = Cursor::new(&self.node);
        self.inner = inner;
    }

    fn remaining(&self) -> u64 {
        self.node.first_value.saturating_sub(self.queried_entities())
    }

    fn page_first(&self, flat: bool, config: &PaginationConfig) -> u64 {
        if flat || self.is_leaf() {
            self.remaining().min(config.page_size)
        } else {
            1
        }
    }

    fn page_skip(&self) -> u64 {
        match self.mode {
            CursorMode::Offset => self.node.skip_value + self.offset,
            CursorMode::Cursor => 0,
        }
    }

    fn bind_own(&self, flat: bool, config: &PaginationConfig, bindings: &mut Object) {
        bindings.insert(
            self.node.first_variable(),
            self.page_first(flat, config).into(),
        );
        bindings.insert(self.node.skip_variable(), self.page_skip().into());
        if let Some(value) = &self.filter_value {
            bindings.insert(self.node.filter_variable(), value.clone());
        }
    }

    /// Bindings of this node and of the active chain of inner nodes.
    fn bind_nested(&self, config: &PaginationConfig, bindings: &mut Object) {
        self.bind_own(false, config, bindings);
        if let Some(inner) = self.inner.get(self.inner_idx) {
            inner.bind_nested(config, bindings);
        }
    }

    /// Bindings of this node paginated on its own, with a single page for every
    /// inner node.
    fn bind_flat(&self, config: &PaginationConfig, bindings: &mut Object) {
        self.bind_own(true, config, bindings);
        for inner in &self.inner {
            inner.bind_single_page(config, bindings);
        }
    }

    fn bind_single_page(&self, config: &PaginationConfig, bindings: &mut Object) {
        bindings.insert(
            self.node.first_variable(),
            self.node.first_value.min(config.page_size).into(),
        );
        bindings.insert(self.node.skip_variable(), self.node.skip_value.into());
        if let Some(value) = &self.node.filter_value {
            bindings.insert(self.node.filter_variable(), value.clone());
        }
        for inner in &self.inner {
            inner.bind_single_page(config, bindings);
        }
    }

    /// Absorb the rows of this node found in `data`.
    fn update(
        &mut self,
        data: &Object,
        flat: bool,
        config: &PaginationConfig,
    ) -> Result<Progress, SubgroundsError> {
        let requested = self.page_first(flat, config);
        let rows = rows_at(data, &self.node.key_path)?;
        let fetched = rows.len() as u64;
        for row in &rows {
            let id = row.get("id").ok_or_else(|| {
                SubgroundsError::step(format!(
                    "row of '{}' has no id",
                    self.node.key_path.join(".")
                ))
            })?;
            self.ids.insert(id.to_string());
        }
        self.page_count += 1;

        let exhausted = if flat || self.is_leaf() {
            fetched < requested
        } else {
            fetched == 0
        };
        if exhausted || self.queried_entities() >= self.node.first_value {
            return Ok(Progress::Exhausted);
        }

        let next_offset = self.offset + fetched;
        if self.mode == CursorMode::Offset
            && self.node.skip_value + next_offset <= config.offset_ceiling
        {
            self.offset = next_offset;
            return Ok(Progress::Continue);
        }

        let ordering_path = self.node.ordering_path();
        let last = rows
            .last()
            .and_then(|row| json_ext::get_path(row, &ordering_path))
            .filter(|value| !value.is_null())
            .ok_or_else(|| {
                SubgroundsError::step(format!(
                    "last row of '{}' has no value for ordering field '{}'",
                    self.node.key_path.join("."),
                    self.node.filter_field
                ))
            })?;
        self.filter_value = Some(last.clone());
        self.mode = CursorMode::Cursor;
        Ok(Progress::Continue)
    }

    /// Nested pagination: the active inner node is paginated to exhaustion for the
    /// current row of this node, then the next inner node, then the next row.
    fn step_nested(
        &mut self,
        data: &Object,
        config: &PaginationConfig,
    ) -> Result<Progress, SubgroundsError> {
        let Some(inner) = self.inner.get_mut(self.inner_idx) else {
            return self.update(data, false, config);
        };
        if inner.step_nested(data, config)? == Progress::Continue {
            return Ok(Progress::Continue);
        }
        if self.inner_idx + 1 < self.inner.len() {
            self.inner_idx += 1;
        } else {
            if self.update(data, false, config)? == Progress::Exhausted {
                return Ok(Progress::Exhausted);
            }
            self.inner_idx = 0;
        }
        self.inner[self.inner_idx].reset();
        Ok(Progress::Continue)
    }
}

fn rows_at<'a>(data: &'a Object, key_path: &[String]) -> Result<Vec<&'a Value>, SubgroundsError> {
    let Some((first, rest)) = key_path.split_first() else {
        return Ok(Vec::new());
    };
    let Some(root) = data.get(first) else {
        tracing::warn!("field '{first}' missing from page data");
        return Ok(Vec::new());
    };
    Ok(json_ext::extract(root, rest)?)
}

fn page(document: &Document, bindings: Object) -> StrategyStep {
    let bound: HashSet<String> = document
        .variables
        .keys()
        .chain(bindings.keys())
        .cloned()
        .collect();
    StrategyStep::Page {
        document: preprocess::prune(document.clone(), &bound),
        variables: bindings,
    }
}

fn normalized(
    schema: &SchemaMeta,
    document: Document,
    config: &PaginationConfig,
) -> Result<(Document, Vec<Cursor>), SubgroundsError> {
    config.validate()?;
    let nodes = preprocess::generate_pagination_nodes(schema, &document, config.default_first)?;
    if nodes.is_empty() {
        return Ok((document, Vec::new()));
    }
    let document = preprocess::normalize(schema, document, &nodes)?;
    Ok((document, nodes.iter().map(Cursor::new).collect()))
}

/// Paginates every list field at every depth, one top level field after another.
///
/// A field with nested list fields is fetched one row at a time; for each row, the
/// nested fields are paginated completely before the next row is fetched.
#[derive(Debug, Clone)]
pub struct LegacyStrategy {
    document: Document,
    cursors: Vec<Cursor>,
    active: usize,
    config: PaginationConfig,
}

impl LegacyStrategy {
    pub fn new(
        schema: &SchemaMeta,
        document: Document,
        config: PaginationConfig,
    ) -> Result<Self, SubgroundsError> {
        let (document, cursors) = normalized(schema, document, &config)?;
        Ok(Self {
            document,
            cursors,
            active: 0,
            config,
        })
    }

    pub fn cursors(&self) -> &[Cursor] {
        &self.cursors
    }

    /// The normalized document pages are derived from.
    pub fn document(&self) -> &Document {
        &self.document
    }
}

impl PaginationStrategy for LegacyStrategy {
    fn step(&mut self, page_data: Option<&Object>) -> Result<StrategyStep, SubgroundsError> {
        if self.cursors.is_empty() {
            return Ok(StrategyStep::Skip);
        }
        if let Some(data) = page_data {
            let Some(cursor) = self.cursors.get_mut(self.active) else {
                return Ok(StrategyStep::Stop);
            };
            if cursor.step_nested(data, &self.config)? == Progress::Exhausted {
                self.active += 1;
            }
        }
        let Some(cursor) = self.cursors.get(self.active) else {
            return Ok(StrategyStep::Stop);
        };
        let mut bindings = Object::new();
        cursor.bind_nested(&self.config, &mut bindings);
        Ok(page(&self.document, bindings))
    }
}

/// Paginates top level list fields only; nested list fields get a single page.
///
/// Every top level field is queried on each page until it is exhausted.
#[derive(Debug, Clone)]
pub struct ShallowStrategy {
    document: Document,
    cursors: Vec<Cursor>,
    exhausted: Vec<bool>,
    config: PaginationConfig,
}

impl ShallowStrategy {
    pub fn new(
        schema: &SchemaMeta,
        document: Document,
        config: PaginationConfig,
    ) -> Result<Self, SubgroundsError> {
        let (document, cursors) = normalized(schema, document, &config)?;
        Ok(Self {
            exhausted: vec![false; cursors.len()],
            document,
            cursors,
            config,
        })
    }

    pub fn cursors(&self) -> &[Cursor] {
        &self.cursors
    }
}

impl PaginationStrategy for ShallowStrategy {
    fn step(&mut self, page_data: Option<&Object>) -> Result<StrategyStep, SubgroundsError> {
        if self.cursors.is_empty() {
            return Ok(StrategyStep::Skip);
        }
        if let Some(data) = page_data {
            for (cursor, exhausted) in self.cursors.iter_mut().zip(self.exhausted.iter_mut()) {
                if !*exhausted {
                    *exhausted = cursor.update(data, true, &self.config)? == Progress::Exhausted;
                }
            }
        }
        if self.exhausted.iter().all(|exhausted| *exhausted) {
            return Ok(StrategyStep::Stop);
        }
        let mut bindings = Object::new();
        for (cursor, _) in self
            .cursors
            .iter()
            .zip(&self.exhausted)
            .filter(|(_, exhausted)| !**exhausted)
        {
            cursor.bind_flat(&self.config, &mut bindings);
        }
        Ok(page(&self.document, bindings))
    }
}

/// Disables pagination: the document is sent once, as written.
#[derive(Debug, Clone, Copy, Default)]
pub struct SkipStrategy;

impl PaginationStrategy for SkipStrategy {
    fn step(&mut self, _page: Option<&Object>) -> Result<StrategyStep, SubgroundsError> {
        Ok(StrategyStep::Skip)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::query::Argument;
    use crate::query::InputValue;
    use crate::query::Query;
    use crate::query::Selection;

    const SDL: &str = r#"
        enum OrderDirection { asc desc }
        enum Swap_orderBy { id timestamp }
        enum Pair_orderBy { id createdAt }
        type Query {
          swaps(first: Int, skip: Int, orderBy: Swap_orderBy, orderDirection: OrderDirection, where: Swap_filter): [Swap!]!
          pairs(first: Int, skip: Int, orderBy: Pair_orderBy, orderDirection: OrderDirection, where: Pair_filter): [Pair!]!
        }
        type Swap { id: ID! timestamp: Int! }
        type Pair {
          id: ID!
          createdAt: Int!
          swaps(first: Int, skip: Int, orderBy: Swap_orderBy, orderDirection: OrderDirection, where: Swap_filter): [Swap!]!
        }
        input Swap_filter { id_gt: ID id_lt: ID timestamp_gt: Int timestamp_lt: Int }
        input Pair_filter { id_gt: ID id_lt: ID createdAt_gt: Int createdAt_lt: Int }
    "#;

    fn schema() -> SchemaMeta {
        SchemaMeta::parse_sdl(SDL).unwrap()
    }

    fn field(schema: &SchemaMeta, type_name: &str, name: &str) -> Selection {
        Selection::new(schema.field(type_name, name).unwrap().clone())
    }

    fn config(page_size: u64) -> PaginationConfig {
        PaginationConfig {
            page_size,
            ..Default::default()
        }
    }

    fn swaps(schema: &SchemaMeta, first: i64, direction: &str) -> Selection {
        field(schema, "Query", "swaps")
            .with_arguments(vec![
                Argument::new("first", first),
                Argument::new("orderBy", InputValue::enum_value("timestamp")),
                Argument::new("orderDirection", InputValue::enum_value(direction)),
            ])
            .with_selection(vec![field(schema, "Swap", "timestamp")])
    }

    fn rows(range: std::ops::Range<i64>) -> Value {
        range
            .map(|i| json!({"id": format!("swap_{i}"), "timestamp": i}))
            .collect::<Vec<_>>()
            .into()
    }

    fn page_of(value: Value) -> Object {
        value.as_object().cloned().unwrap()
    }

    fn variables(step: &StrategyStep) -> &Object {
        match step {
            StrategyStep::Page { variables, .. } => variables,
            other => panic!("expected a page, got {other:?}"),
        }
    }

    #[test]
    fn cursor_follows_last_ordering_value() {
        let schema = schema();
        let document = Document::new("u", Query::new(vec![swaps(&schema, 1100, "asc")]));
        let mut strategy = LegacyStrategy::new(&schema, document, config(900)).unwrap();

        let step = strategy.step(None).unwrap();
        assert_eq!(
            variables(&step),
            &page_of(json!({"first0": 900, "skip0": 0}))
        );

        let step = strategy
            .step(Some(&page_of(json!({"swaps": rows(0..900)}))))
            .unwrap();
        assert_eq!(
            variables(&step),
            &page_of(json!({"first0": 200, "skip0": 0, "lastOrderingValue0": 899}))
        );

        let step = strategy
            .step(Some(&page_of(json!({"swaps": rows(900..1100)}))))
            .unwrap();
        assert!(matches!(step, StrategyStep::Stop));
        assert_eq!(strategy.cursors()[0].queried_entities(), 1100);
    }

    #[test]
    fn short_page_stops_pagination() {
        let schema = schema();
        let document = Document::new("u", Query::new(vec![swaps(&schema, 500, "asc")]));
        let mut strategy = LegacyStrategy::new(&schema, document, config(100)).unwrap();
        strategy.step(None).unwrap();
        let step = strategy
            .step(Some(&page_of(json!({"swaps": rows(0..40)}))))
            .unwrap();
        assert!(matches!(step, StrategyStep::Stop));
    }

    #[test]
    fn offset_mode_until_ceiling() {
        let schema = schema();
        let document = Document::new("u", Query::new(vec![swaps(&schema, 400, "asc")]));
        let config = PaginationConfig {
            page_size: 100,
            offset_ceiling: 200,
            ..Default::default()
        };
        let mut strategy = LegacyStrategy::new(&schema, document, config).unwrap();
        strategy.step(None).unwrap();

        let step = strategy
            .step(Some(&page_of(json!({"swaps": rows(0..100)}))))
            .unwrap();
        assert_eq!(variables(&step), &page_of(json!({"first0": 100, "skip0": 100})));

        let step = strategy
            .step(Some(&page_of(json!({"swaps": rows(100..200)}))))
            .unwrap();
        assert_eq!(variables(&step), &page_of(json!({"first0": 100, "skip0": 200})));

        let step = strategy
            .step(Some(&page_of(json!({"swaps": rows(200..300)}))))
            .unwrap();
        assert_eq!(
            variables(&step),
            &page_of(json!({"first0": 100, "skip0": 0, "lastOrderingValue0": 299}))
        );
        assert_eq!(strategy.cursors()[0].mode(), CursorMode::Cursor);
    }

    #[test]
    fn missing_ordering_value_is_an_error() {
        let schema = schema();
        let document = Document::new("u", Query::new(vec![swaps(&schema, 500, "asc")]));
        let mut strategy = LegacyStrategy::new(&schema, document, config(2)).unwrap();
        strategy.step(None).unwrap();
        let err = strategy
            .step(Some(&page_of(json!({"swaps": [{"id": "a"}, {"id": "b"}]}))))
            .unwrap_err();
        assert!(matches!(err, SubgroundsError::Step(_)));
    }

    #[test]
    fn nested_nodes_paginate_per_parent_row() {
        let schema = schema();
        let pairs = field(&schema, "Query", "pairs")
            .with_arguments(vec![
                Argument::new("first", 2),
                Argument::new("orderBy", InputValue::enum_value("createdAt")),
            ])
            .with_selection(vec![
                field(&schema, "Pair", "swaps")
                    .with_arguments(vec![Argument::new("first", 3)])
                    .with_selection(vec![field(&schema, "Swap", "timestamp")]),
            ]);
        let document = Document::new("u", Query::new(vec![pairs]));
        let mut strategy = LegacyStrategy::new(&schema, document, config(2)).unwrap();

        let step = strategy.step(None).unwrap();
        assert_eq!(
            variables(&step),
            &page_of(json!({"first0": 1, "skip0": 0, "first1": 2, "skip1": 0}))
        );

        // Second page of the first pair's swaps.
        let data = json!({"pairs": [{"id": "p0", "createdAt": 10, "swaps": [
            {"id": "s0", "timestamp": 0}, {"id": "s1", "timestamp": 1}
        ]}]});
        let step = strategy.step(Some(&page_of(data))).unwrap();
        assert_eq!(
            variables(&step),
            &page_of(json!({"first0": 1, "skip0": 0, "first1": 1, "skip1": 0, "lastOrderingValue1": "s1"}))
        );

        // First pair done: move on to the next pair, inner cursor restarts.
        let data = json!({"pairs": [{"id": "p0", "createdAt": 10, "swaps": [
            {"id": "s2", "timestamp": 2}
        ]}]});
        let step = strategy.step(Some(&page_of(data))).unwrap();
        assert_eq!(
            variables(&step),
            &page_of(json!({"first0": 1, "skip0": 0, "lastOrderingValue0": 10, "first1": 2, "skip1": 0}))
        );

        // Second pair has no swaps and is the last pair requested.
        let data = json!({"pairs": [{"id": "p1", "createdAt": 11, "swaps": []}]});
        let step = strategy.step(Some(&page_of(data))).unwrap();
        assert!(matches!(step, StrategyStep::Stop));
    }

    #[test]
    fn root_nodes_run_one_after_another() {
        let schema = schema();
        let pairs = field(&schema, "Query", "pairs")
            .with_arguments(vec![Argument::new("first", 1)])
            .with_selection(vec![field(&schema, "Pair", "createdAt")]);
        let document = Document::new(
            "u",
            Query::new(vec![swaps(&schema, 1, "asc"), pairs]),
        );
        let mut strategy = LegacyStrategy::new(&schema, document, config(10)).unwrap();

        let StrategyStep::Page { document, .. } = strategy.step(None).unwrap() else {
            panic!("expected a page");
        };
        let keys: Vec<_> = document.query.selection.iter().map(|s| s.key()).collect();
        assert_eq!(keys, ["swaps"]);

        let StrategyStep::Page { document, .. } = strategy
            .step(Some(&page_of(json!({"swaps": rows(0..1)}))))
            .unwrap()
        else {
            panic!("expected a page");
        };
        let keys: Vec<_> = document.query.selection.iter().map(|s| s.key()).collect();
        assert_eq!(keys, ["pairs"]);
    }

    #[test]
    fn shallow_strategy_pages_roots_only() {
        let schema = schema();
        let pairs = field(&schema, "Query", "pairs")
            .with_arguments(vec![Argument::new("first", 3)])
            .with_selection(vec![
                field(&schema, "Pair", "swaps")
                    .with_arguments(vec![Argument::new("first", 5)])
                    .with_selection(vec![field(&schema, "Swap", "timestamp")]),
            ]);
        let document = Document::new("u", Query::new(vec![pairs]));
        let mut strategy = ShallowStrategy::new(&schema, document, config(2)).unwrap();

        let step = strategy.step(None).unwrap();
        assert_eq!(
            variables(&step),
            &page_of(json!({"first0": 2, "skip0": 0, "first1": 2, "skip1": 0}))
        );

        let data = json!({"pairs": [{"id": "a", "swaps": []}, {"id": "b", "swaps": []}]});
        let step = strategy.step(Some(&page_of(data))).unwrap();
        assert_eq!(
            variables(&step),
            &page_of(json!({"first0": 1, "skip0": 0, "lastOrderingValue0": "b", "first1": 2, "skip1": 0}))
        );

        let data = json!({"pairs": [{"id": "c", "swaps": []}]});
        assert!(matches!(
            strategy.step(Some(&page_of(data))).unwrap(),
            StrategyStep::Stop
        ));
    }

    #[test]
    fn documents_without_lists_are_skipped() {
        let schema = SchemaMeta::parse_sdl("type Query { total: Int }").unwrap();
        let document = Document::new("u", Query::new(vec![field(&schema, "Query", "total")]));
        let mut strategy = LegacyStrategy::new(&schema, document, config(10)).unwrap();
        assert!(matches!(strategy.step(None).unwrap(), StrategyStep::Skip));
        assert!(matches!(SkipStrategy.step(None).unwrap(), StrategyStep::Skip));
    }

    #[test]
    fn zero_page_size_is_rejected() {
        let schema = schema();
        let document = Document::new("u", Query::new(vec![swaps(&schema, 10, "asc")]));
        let err = LegacyStrategy::new(&schema, document.clone(), config(0)).unwrap_err();
        assert!(matches!(
            err,
            SubgroundsError::Configuration(crate::error::ConfigurationError::InvalidValue { .. })
        ));
        assert!(ShallowStrategy::new(&schema, document, config(0)).is_err());
    }
}
