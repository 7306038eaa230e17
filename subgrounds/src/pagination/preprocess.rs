//! Rewrites a document into its paginatable form.
//!
//! Every list-of-entities selection gets pagination variables (`first{i}`, `skip{i}`,
//! `lastOrderingValue{i}`), a concrete ordering and a cursor filter merged into its
//! `where` argument. The shape of the rewrite is described by a tree of
//! [`PaginationNode`]s that the strategies use to compute variable bindings.
use std::collections::HashSet;
use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use crate::error::QueryError;
use crate::error::SubgroundsError;
use crate::json_ext::Object;
use crate::query::Argument;
use crate::query::Document;
use crate::query::InputValue;
use crate::query::Selection;
use crate::query::VariableDefinition;
use crate::schema::SchemaMeta;
use crate::schema::TypeKind;
use crate::schema::TypeRef;

/// Number of rows fetched for a paginated field without a `first` argument.
pub const DEFAULT_NUM_ENTITIES: u64 = 100;

/// Largest `first` sent to the server in one page.
pub const PAGE_SIZE: u64 = 900;

const PAGINATION_ARGS: [&str; 5] = ["first", "skip", "where", "orderBy", "orderDirection"];

/// Sort direction of a paginated field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

impl OrderDirection {
    fn filter_suffix(self) -> &'static str {
        match self {
            Self::Asc => "gt",
            Self::Desc => "lt",
        }
    }
}

impl fmt::Display for OrderDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Asc => f.write_str("asc"),
            Self::Desc => f.write_str("desc"),
        }
    }
}

/// Pagination metadata of one list-valued selection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaginationNode {
    /// Unique index of the node within its document.
    pub node_idx: usize,
    /// Ordering field, `__` separated when ordering by a nested field.
    pub filter_field: String,
    /// Total number of rows requested by the caller.
    pub first_value: u64,
    /// Rows skipped by the caller before the first page.
    pub skip_value: u64,
    /// Initial cursor value, taken from the caller's `where` filter.
    pub filter_value: Option<Value>,
    /// Type of the cursor variable.
    pub filter_value_type: TypeRef,
    /// Response keys leading to the rows of this node.
    pub key_path: Vec<String>,
    pub inner: Vec<PaginationNode>,
}

impl PaginationNode {
    pub fn first_variable(&self) -> String {
        format!("first{}", self.node_idx)
    }

    pub fn skip_variable(&self) -> String {
        format!("skip{}", self.node_idx)
    }

    pub fn filter_variable(&self) -> String {
        format!("lastOrderingValue{}", self.node_idx)
    }

    /// Path of the ordering value inside one row.
    pub fn ordering_path(&self) -> Vec<&str> {
        self.filter_field.split("__").collect()
    }

    /// This node followed by every descendant, depth first.
    pub fn flatten(&self) -> Vec<&PaginationNode> {
        let mut nodes = vec![self];
        for inner in &self.inner {
            nodes.extend(inner.flatten());
        }
        nodes
    }
}

/// Whether the selection is a list of objects or interfaces.
pub fn is_paginatable(selection: &Selection) -> bool {
    selection.fmeta.type_.is_list()
        && matches!(
            selection.fmeta.type_.kind(),
            TypeKind::Object | TypeKind::Interface
        )
}

/// Ordering field of the selection, `id` when not specified.
pub fn get_order_by(selection: &Selection) -> Result<String, QueryError> {
    match selection.argument("orderBy") {
        None => Ok("id".to_string()),
        Some(arg) => arg
            .value
            .as_name()
            .map(str::to_string)
            .ok_or_else(|| invalid_argument(selection, "orderBy", "expected an enum value")),
    }
}

/// Ordering direction of the selection, ascending when not specified.
pub fn get_order_direction(selection: &Selection) -> Result<OrderDirection, QueryError> {
    match selection.argument("orderDirection") {
        None => Ok(OrderDirection::Asc),
        Some(arg) => match arg.value.as_name() {
            Some("asc") => Ok(OrderDirection::Asc),
            Some("desc") => Ok(OrderDirection::Desc),
            _ => Err(invalid_argument(
                selection,
                "orderDirection",
                "expected `asc` or `desc`",
            )),
        },
    }
}

/// Path of the cursor filter inside `where`.
///
/// `timestamp` ascending gives `["timestamp_gt"]`; `token__symbol` descending gives
/// `["token_", "symbol_lt"]`.
pub fn get_filtering_args(order_by: &str, direction: OrderDirection) -> Vec<String> {
    let mut names: Vec<&str> = order_by.split("__").collect();
    let last = names.pop().unwrap_or(order_by);
    names
        .into_iter()
        .map(|name| format!("{name}_"))
        .chain(std::iter::once(format!(
            "{last}_{}",
            direction.filter_suffix()
        )))
        .collect()
}

/// Caller supplied cursor value found at `filter_path` in the selection's `where`.
pub fn get_filtering_value(
    selection: &Selection,
    filter_path: &[String],
    variables: &Object,
) -> Option<Value> {
    let mut current = &selection.argument("where")?.value;
    for segment in filter_path {
        let InputValue::Object(fields) = current else {
            return None;
        };
        current = fields.get(segment)?;
    }
    to_json(current, variables).filter(|value| !value.is_null())
}

fn to_json(value: &InputValue, variables: &Object) -> Option<Value> {
    Some(match value {
        InputValue::Null => Value::Null,
        InputValue::Int(i) => Value::from(*i),
        InputValue::Float(f) => Value::from(*f),
        InputValue::String(s) | InputValue::Enum(s) => Value::from(s.as_str()),
        InputValue::Boolean(b) => Value::from(*b),
        InputValue::Variable(name) => variables.get(name)?.clone(),
        InputValue::List(values) => Value::Array(
            values
                .iter()
                .map(|v| to_json(v, variables))
                .collect::<Option<_>>()?,
        ),
        InputValue::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(k, v)| Some((k.clone(), to_json(v, variables)?)))
                .collect::<Option<_>>()?,
        ),
    })
}

fn invalid_argument(selection: &Selection, argument: &str, reason: &str) -> QueryError {
    QueryError::InvalidArgument {
        field: selection.name().to_string(),
        argument: argument.to_string(),
        reason: reason.to_string(),
    }
}

fn count_argument(
    selection: &Selection,
    name: &str,
    variables: &Object,
) -> Result<Option<u64>, QueryError> {
    let Some(arg) = selection.argument(name) else {
        return Ok(None);
    };
    to_json(&arg.value, variables)
        .and_then(|value| value.as_u64())
        .map(Some)
        .ok_or_else(|| invalid_argument(selection, name, "expected a non-negative integer"))
}

/// Deep merge of two input objects; on conflicting leaves `left` wins.
pub fn merge_input_value_objects(
    left: IndexMap<String, InputValue>,
    mut right: IndexMap<String, InputValue>,
) -> IndexMap<String, InputValue> {
    let mut merged = IndexMap::with_capacity(left.len() + right.len());
    for (key, value) in left {
        let value = match (value, right.shift_remove(&key)) {
            (InputValue::Object(l), Some(InputValue::Object(r))) => {
                InputValue::Object(merge_input_value_objects(l, r))
            }
            (value, _) => value,
        };
        merged.insert(key, value);
    }
    merged.extend(right);
    merged
}

/// Build the pagination tree of a document.
///
/// Nodes are indexed depth first, parents before their children.
pub fn generate_pagination_nodes(
    schema: &SchemaMeta,
    document: &Document,
    default_first: u64,
) -> Result<Vec<PaginationNode>, SubgroundsError> {
    let mut counter = 0;
    let mut key_path = Vec::new();
    let mut nodes = Vec::new();
    for selection in &document.query.selection {
        nodes.extend(pagination_nodes(
            schema,
            &document.variables,
            selection,
            &mut key_path,
            &mut counter,
            default_first,
        )?);
    }
    Ok(nodes)
}

fn pagination_nodes(
    schema: &SchemaMeta,
    variables: &Object,
    selection: &Selection,
    key_path: &mut Vec<String>,
    counter: &mut usize,
    default_first: u64,
) -> Result<Vec<PaginationNode>, SubgroundsError> {
    key_path.push(selection.key().to_string());
    let node_idx = is_paginatable(selection).then(|| {
        let idx = *counter;
        *counter += 1;
        idx
    });

    let mut inner = Vec::new();
    for child in &selection.selection {
        inner.extend(pagination_nodes(
            schema,
            variables,
            child,
            key_path,
            counter,
            default_first,
        )?);
    }

    let result = match node_idx {
        None => inner,
        Some(node_idx) => {
            let order_by = get_order_by(selection)?;
            let direction = get_order_direction(selection)?;
            let filter_path = get_filtering_args(&order_by, direction);
            let where_type = selection.fmeta.type_of_arg("where")?;
            let filter_value_type = schema
                .type_of_input_object_path(where_type.name(), &filter_path)?
                .clone();
            vec![PaginationNode {
                node_idx,
                first_value: count_argument(selection, "first", variables)?
                    .unwrap_or(default_first),
                skip_value: count_argument(selection, "skip", variables)?.unwrap_or(0),
                filter_value: get_filtering_value(selection, &filter_path, variables),
                filter_field: order_by,
                filter_value_type,
                key_path: key_path.clone(),
                inner,
            }]
        }
    };
    key_path.pop();
    Ok(result)
}

/// Rewrite the paginatable selections of `document` following `nodes`.
pub fn normalize(
    schema: &SchemaMeta,
    document: Document,
    nodes: &[PaginationNode],
) -> Result<Document, SubgroundsError> {
    let by_path: IndexMap<&[String], &PaginationNode> = nodes
        .iter()
        .flat_map(PaginationNode::flatten)
        .map(|node| (node.key_path.as_slice(), node))
        .collect();

    let mut document = document;
    let roots = std::mem::take(&mut document.query.selection);
    let mut key_path = Vec::new();
    for root in roots {
        let root = normalize_selection(schema, root, &by_path, &mut key_path)?;
        document.query.selection.push(root);
    }

    let int = TypeRef::named("Int", TypeKind::Scalar);
    document
        .query
        .add_vardefs(by_path.values().flat_map(|node| {
            [
                VariableDefinition::new(node.first_variable(), int.clone()),
                VariableDefinition::new(node.skip_variable(), int.clone()),
                VariableDefinition::new(node.filter_variable(), node.filter_value_type.clone()),
            ]
        }));
    Ok(document)
}

fn normalize_selection(
    schema: &SchemaMeta,
    selection: Selection,
    nodes: &IndexMap<&[String], &PaginationNode>,
    key_path: &mut Vec<String>,
) -> Result<Selection, SubgroundsError> {
    key_path.push(selection.key().to_string());
    let mut selection = match nodes.get(key_path.as_slice()) {
        Some(node) => paginate_selection(schema, selection, node)?,
        None => selection,
    };
    let children = std::mem::take(&mut selection.selection);
    for child in children {
        selection
            .selection
            .push(normalize_selection(schema, child, nodes, key_path)?);
    }
    key_path.pop();
    Ok(selection)
}

fn paginate_selection(
    schema: &SchemaMeta,
    selection: Selection,
    node: &PaginationNode,
) -> Result<Selection, SubgroundsError> {
    let direction = get_order_direction(&selection)?;
    let filter_path = get_filtering_args(&node.filter_field, direction);

    let cursor_filter = filter_path.iter().rev().fold(
        InputValue::variable(node.filter_variable()),
        |inner, segment| InputValue::object([(segment.clone(), inner)]),
    );
    let InputValue::Object(cursor_filter) = cursor_filter else {
        crate::bail!("empty filter path for field '{}'", selection.name());
    };
    let caller_filter = match selection.argument("where").map(|arg| &arg.value) {
        None => IndexMap::new(),
        Some(InputValue::Object(fields)) => fields.clone(),
        Some(_) => {
            return Err(invalid_argument(&selection, "where", "expected an object literal").into());
        }
    };

    let mut arguments = vec![
        Argument::new("first", InputValue::variable(node.first_variable())),
        Argument::new("skip", InputValue::variable(node.skip_variable())),
        Argument::new("orderBy", InputValue::enum_value(node.filter_field.clone())),
        Argument::new("orderDirection", InputValue::enum_value(direction.to_string())),
        Argument::new(
            "where",
            InputValue::Object(merge_input_value_objects(cursor_filter, caller_filter)),
        ),
    ];
    arguments.extend(
        selection
            .arguments
            .iter()
            .filter(|arg| !PAGINATION_ARGS.contains(&arg.name.as_str()))
            .cloned(),
    );

    let entity_type = selection.fmeta.type_.name().to_string();
    let id = Selection::new(schema.field(&entity_type, "id")?.clone());
    let ordering = ordering_selection(schema, &entity_type, &node.ordering_path())?;

    Ok(selection.with_arguments(arguments).add([id, ordering])?)
}

// `token__symbol` on `Swap` becomes `token { symbol }`.
fn ordering_selection(
    schema: &SchemaMeta,
    entity_type: &str,
    path: &[&str],
) -> Result<Selection, SubgroundsError> {
    let mut fields = Vec::with_capacity(path.len());
    let mut type_name = entity_type.to_string();
    for name in path {
        let fmeta = schema.field(&type_name, name)?.clone();
        type_name = fmeta.type_.name().to_string();
        fields.push(fmeta);
    }
    let mut fields = fields.into_iter().rev();
    let Some(leaf) = fields.next() else {
        crate::bail!("empty ordering path on type '{entity_type}'");
    };
    Ok(fields.fold(Selection::new(leaf), |inner, fmeta| {
        Selection::new(fmeta).with_selection(vec![inner])
    }))
}

fn prune_filter(value: InputValue, bound: &HashSet<String>) -> Option<InputValue> {
    match value {
        InputValue::Variable(name) if !bound.contains(&name) => None,
        InputValue::Object(fields) => {
            let was_empty = fields.is_empty();
            let pruned: IndexMap<_, _> = fields
                .into_iter()
                .filter_map(|(key, value)| Some((key, prune_filter(value, bound)?)))
                .collect();
            (was_empty || !pruned.is_empty()).then_some(InputValue::Object(pruned))
        }
        other => Some(other),
    }
}

/// Strip what a page does not bind.
///
/// Filter entries whose value is an unbound variable are removed (filter objects
/// emptied this way disappear with them), then selections whose arguments still use
/// an unbound variable are dropped along with unbound variable definitions. `bound`
/// should hold the document's own variables plus the page bindings.
pub fn prune(document: Document, bound: &HashSet<String>) -> Document {
    let mut document = document;
    let roots = std::mem::take(&mut document.query.selection);
    document.query.selection = roots
        .into_iter()
        .map(|root| {
            root.map_args(&mut |arg: Argument| {
                if arg.name != "where" {
                    return Some(arg);
                }
                Some(Argument {
                    value: prune_filter(arg.value, bound)?,
                    name: arg.name,
                })
            })
        })
        .collect();
    document.query = std::mem::take(&mut document.query).prune_undefined(bound);
    document
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::query::Query;

    const SDL: &str = r#"
        enum OrderDirection { asc desc }
        enum Swap_orderBy { id timestamp token token__symbol }
        enum Pair_orderBy { id createdAt }
        type Query {
          swaps(first: Int, skip: Int, orderBy: Swap_orderBy, orderDirection: OrderDirection, where: Swap_filter): [Swap!]!
          pairs(first: Int, skip: Int, orderBy: Pair_orderBy, orderDirection: OrderDirection, where: Pair_filter): [Pair!]!
        }
        type Token { id: ID! symbol: String! }
        type Swap { id: ID! timestamp: BigInt! amount: BigDecimal! token: Token! }
        type Pair {
          id: ID!
          createdAt: BigInt!
          swaps(first: Int, skip: Int, orderBy: Swap_orderBy, orderDirection: OrderDirection, where: Swap_filter): [Swap!]!
        }
        scalar BigInt
        scalar BigDecimal
        input Token_filter { symbol_gt: String symbol_lt: String }
        input Swap_filter { id_gt: ID id_lt: ID timestamp_gt: BigInt timestamp_lt: BigInt amount_gt: BigDecimal token_: Token_filter }
        input Pair_filter { id_gt: ID id_lt: ID createdAt_gt: BigInt createdAt_lt: BigInt }
    "#;

    fn schema() -> SchemaMeta {
        SchemaMeta::parse_sdl(SDL).unwrap()
    }

    fn field(schema: &SchemaMeta, type_name: &str, name: &str) -> Selection {
        Selection::new(schema.field(type_name, name).unwrap().clone())
    }

    fn swaps_document(schema: &SchemaMeta, arguments: Vec<Argument>) -> Document {
        let swaps = field(schema, "Query", "swaps")
            .with_arguments(arguments)
            .with_selection(vec![field(schema, "Swap", "amount")]);
        Document::new("www.abc.xyz/graphql", Query::new(vec![swaps]))
    }

    #[rstest]
    #[case("timestamp", OrderDirection::Asc, &["timestamp_gt"])]
    #[case("timestamp", OrderDirection::Desc, &["timestamp_lt"])]
    #[case("token__symbol", OrderDirection::Asc, &["token_", "symbol_gt"])]
    fn filtering_args(
        #[case] order_by: &str,
        #[case] direction: OrderDirection,
        #[case] expected: &[&str],
    ) {
        assert_eq!(get_filtering_args(order_by, direction), expected);
    }

    #[test]
    fn merges_filters_left_first() {
        let left = IndexMap::from([
            ("a".to_string(), InputValue::variable("x")),
            (
                "n".to_string(),
                InputValue::object([("b", InputValue::from(1))]),
            ),
        ]);
        let right = IndexMap::from([
            ("a".to_string(), InputValue::from(5)),
            (
                "n".to_string(),
                InputValue::object([("c", InputValue::from(2))]),
            ),
            ("d".to_string(), InputValue::from(true)),
        ]);
        let merged = InputValue::Object(merge_input_value_objects(left, right));
        assert_eq!(merged.to_string(), "{a: $x, n: {b: 1, c: 2}, d: true}");
    }

    #[test]
    fn generates_nested_nodes_parent_first() {
        let schema = schema();
        let pairs = field(&schema, "Query", "pairs")
            .with_arguments(vec![
                Argument::new("first", 10),
                Argument::new("orderBy", InputValue::enum_value("createdAt")),
            ])
            .with_selection(vec![
                field(&schema, "Pair", "swaps")
                    .with_alias("s")
                    .with_arguments(vec![
                        Argument::new("orderBy", InputValue::enum_value("timestamp")),
                        Argument::new("orderDirection", InputValue::enum_value("desc")),
                        Argument::new(
                            "where",
                            InputValue::object([("timestamp_lt", InputValue::from(1000))]),
                        ),
                    ])
                    .with_selection(vec![field(&schema, "Swap", "amount")]),
            ]);
        let document = Document::new("u", Query::new(vec![pairs]));
        let nodes = generate_pagination_nodes(&schema, &document, DEFAULT_NUM_ENTITIES).unwrap();

        assert_eq!(nodes.len(), 1);
        let outer = &nodes[0];
        assert_eq!(outer.node_idx, 0);
        assert_eq!(outer.first_value, 10);
        assert_eq!(outer.filter_field, "createdAt");
        assert_eq!(outer.filter_value_type.name(), "BigInt");
        assert_eq!(outer.key_path, ["pairs"]);

        let inner = &outer.inner[0];
        assert_eq!(inner.node_idx, 1);
        assert_eq!(inner.first_value, DEFAULT_NUM_ENTITIES);
        assert_eq!(inner.skip_value, 0);
        assert_eq!(inner.filter_value, Some(Value::from(1000)));
        assert_eq!(inner.key_path, ["pairs", "s"]);
    }

    #[test]
    fn normalizes_a_paginated_field() {
        let schema = schema();
        let document = swaps_document(
            &schema,
            vec![
                Argument::new("first", 250),
                Argument::new("orderBy", InputValue::enum_value("timestamp")),
                Argument::new("orderDirection", InputValue::enum_value("desc")),
                Argument::new(
                    "where",
                    InputValue::object([("amount_gt", InputValue::from(10))]),
                ),
            ],
        );
        let nodes = generate_pagination_nodes(&schema, &document, DEFAULT_NUM_ENTITIES).unwrap();
        let normalized = normalize(&schema, document, &nodes).unwrap();

        assert_snapshot!(normalized.graphql(), @r###"
        query($first0: Int, $skip0: Int, $lastOrderingValue0: BigInt) {
          swaps(first: $first0, skip: $skip0, orderBy: timestamp, orderDirection: desc, where: {timestamp_lt: $lastOrderingValue0, amount_gt: 10}) {
            amount
            id
            timestamp
          }
        }
        "###);
    }

    #[test]
    fn normalizes_nested_ordering_fields() {
        let schema = schema();
        let document = swaps_document(
            &schema,
            vec![Argument::new(
                "orderBy",
                InputValue::enum_value("token__symbol"),
            )],
        );
        let nodes = generate_pagination_nodes(&schema, &document, DEFAULT_NUM_ENTITIES).unwrap();
        assert_eq!(nodes[0].filter_value_type.name(), "String");
        let normalized = normalize(&schema, document, &nodes).unwrap();

        assert_snapshot!(normalized.graphql(), @r###"
        query($first0: Int, $skip0: Int, $lastOrderingValue0: String) {
          swaps(first: $first0, skip: $skip0, orderBy: token__symbol, orderDirection: asc, where: {token_: {symbol_gt: $lastOrderingValue0}}) {
            amount
            id
            token {
              symbol
            }
          }
        }
        "###);
    }

    #[test]
    fn prune_removes_unbound_cursor_filters() {
        let schema = schema();
        let document = swaps_document(&schema, vec![Argument::new("first", 250)]);
        let nodes = generate_pagination_nodes(&schema, &document, DEFAULT_NUM_ENTITIES).unwrap();
        let normalized = normalize(&schema, document, &nodes).unwrap();

        let bound = HashSet::from(["first0".to_string(), "skip0".to_string()]);
        let pruned = prune(normalized.clone(), &bound);
        assert_snapshot!(pruned.graphql(), @r###"
        query($first0: Int, $skip0: Int) {
          swaps(first: $first0, skip: $skip0, orderBy: id, orderDirection: asc) {
            amount
            id
          }
        }
        "###);

        let pruned = prune(normalized, &HashSet::new());
        assert!(pruned.query.selection.is_empty());
        assert!(pruned.query.variables.is_empty());
    }

    #[test]
    fn where_as_variable_is_rejected() {
        let schema = schema();
        let document = swaps_document(
            &schema,
            vec![Argument::new("where", InputValue::variable("filter"))],
        );
        let nodes = generate_pagination_nodes(&schema, &document, DEFAULT_NUM_ENTITIES).unwrap();
        let err = normalize(&schema, document, &nodes).unwrap_err();
        assert!(matches!(
            err,
            SubgroundsError::Query(QueryError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn non_list_fields_are_not_paginated() {
        let schema = schema();
        let amount = field(&schema, "Swap", "amount");
        assert!(!is_paginatable(&amount));
        assert!(is_paginatable(&field(&schema, "Query", "swaps")));
    }
}
