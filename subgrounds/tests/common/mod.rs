//! An in-memory subgraph answering the documents the engine sends.
use std::cmp::Ordering;

use serde_json::Value;
use serde_json::json;
use apollo_compiler::ExecutableDocument;
use apollo_compiler::Schema;
use subgrounds::Subgrounds;
use subgrounds::error::BoxError;
use subgrounds::json_ext::Object;
use subgrounds::query::Document;
use subgrounds::query::InputValue;
use subgrounds::query::Selection;
use subgrounds::schema::SchemaMeta;

pub const URL: &str = "https://api.thegraph.com/subgraphs/name/uniswap/v2";

pub const SDL: &str = r#"
    scalar BigInt
    scalar BigDecimal

    enum OrderDirection { asc desc }
    enum Swap_orderBy { id timestamp amountIn amountOut }
    enum Pair_orderBy { id name }

    type Query {
      swaps(first: Int, skip: Int, orderBy: Swap_orderBy, orderDirection: OrderDirection, where: Swap_filter): [Swap!]!
      swap(id: ID!): Swap
      pairs(first: Int, skip: Int, orderBy: Pair_orderBy, orderDirection: OrderDirection, where: Pair_filter): [Pair!]!
    }

    type Pair {
      id: ID!
      name: String!
      swaps(first: Int, skip: Int, orderBy: Swap_orderBy, orderDirection: OrderDirection, where: Swap_filter): [Swap!]!
    }

    type Swap {
      id: ID!
      timestamp: BigInt!
      amountIn: BigDecimal!
      amountOut: BigDecimal!
    }

    input Swap_filter {
      id_gt: ID
      id_lt: ID
      timestamp_gt: BigInt
      timestamp_lt: BigInt
      amountIn_gt: BigDecimal
    }

    input Pair_filter {
      id_gt: ID
      id_lt: ID
    }
"#;

pub fn schema() -> SchemaMeta {
    SchemaMeta::parse_sdl(SDL).unwrap()
}

pub fn client(page_size: u64) -> Subgrounds {
    let mut configuration = subgrounds::Configuration::default();
    configuration.pagination.page_size = page_size;
    let mut client = Subgrounds::builder().configuration(configuration).build();
    client.load_subgraph(URL, schema());
    client
}

pub fn field(client: &Subgrounds, type_name: &str, name: &str) -> Selection {
    client.subgraph(URL).unwrap().field(type_name, name).unwrap()
}

/// `count` swaps, one per second, with BigInt and BigDecimal values as strings.
pub fn swaps(count: usize) -> Vec<Value> {
    (0..count)
        .map(|i| {
            json!({
                "id": format!("0x{i:04x}"),
                "timestamp": (1_600_000_000 + i).to_string(),
                "amountIn": format!("{}.5", i),
                "amountOut": format!("{}", i * 2),
            })
        })
        .collect()
}

/// `count` pairs named `P0`, `P1`, ..., each with `swaps` swaps of its own.
pub fn pairs(count: usize, swaps: usize) -> Vec<Value> {
    (0..count)
        .map(|p| {
            let swaps: Vec<_> = (0..swaps)
                .map(|s| {
                    json!({
                        "id": format!("0x{p:02x}{s:02x}"),
                        "timestamp": (1_600_000_000 + s).to_string(),
                        "amountIn": format!("{s}.5"),
                        "amountOut": format!("{}", s * 2),
                    })
                })
                .collect();
            json!({"id": format!("pair-{p:02}"), "name": format!("P{p}"), "swaps": swaps})
        })
        .collect()
}

/// Every document received, with its variables.
#[derive(Debug, Default)]
pub struct Server {
    pub rows: Vec<Value>,
    pub pairs: Vec<Value>,
    pub received: Vec<Document>,
}

impl Server {
    pub fn new(rows: Vec<Value>) -> Self {
        Self {
            rows,
            pairs: Vec::new(),
            received: Vec::new(),
        }
    }

    pub fn with_pairs(mut self, pairs: Vec<Value>) -> Self {
        self.pairs = pairs;
        self
    }

    pub fn fetch(&mut self, document: &Document) -> Result<Object, BoxError> {
        self.received.push(document.clone());
        let variables = &document.variables;
        let mut data = Object::new();
        for selection in &document.query.selection {
            let value = match selection.name() {
                "swaps" => list(&self.rows, selection, variables),
                "pairs" => list(&self.pairs, selection, variables),
                "swap" => self.single(selection, variables),
                other => return Err(format!("unknown field {other}").into()),
            };
            data.insert(selection.key().to_string(), value);
        }
        Ok(data)
    }

    /// Number of rows returned for each document received.
    pub fn page_sizes(&self) -> Vec<usize> {
        let mut server = Server::new(self.rows.clone()).with_pairs(self.pairs.clone());
        self.received
            .iter()
            .map(|document| {
                let data = server.fetch(document).unwrap();
                data.values()
                    .map(|rows| rows.as_array().map_or(0, Vec::len))
                    .sum()
            })
            .collect()
    }

    fn single(&self, selection: &Selection, variables: &Object) -> Value {
        let id = selection
            .argument("id")
            .map(|arg| resolve(&arg.value, variables))
            .unwrap_or(Value::Null);
        self.rows
            .iter()
            .find(|row| row["id"] == id)
            .map_or(Value::Null, |row| project(row, &selection.selection, variables))
    }
}

// Filters, orders and slices `rows` the way a subgraph answers a list field.
fn list(rows: &[Value], selection: &Selection, variables: &Object) -> Value {
    let arg = |name: &str| {
        selection
            .argument(name)
            .map(|arg| resolve(&arg.value, variables))
            .unwrap_or(Value::Null)
    };
    let first = arg("first").as_u64().unwrap_or(100) as usize;
    let skip = arg("skip").as_u64().unwrap_or(0) as usize;
    let order_by = arg("orderBy").as_str().unwrap_or("id").to_string();
    let descending = arg("orderDirection").as_str() == Some("desc");
    let filter = arg("where");

    let mut rows: Vec<&Value> = rows
        .iter()
        .filter(|row| matches_filter(row, &filter))
        .collect();
    rows.sort_by(|a, b| {
        let ordering = compare(&a[&order_by], &b[&order_by]);
        if descending { ordering.reverse() } else { ordering }
    });
    rows.into_iter()
        .skip(skip)
        .take(first)
        .map(|row| project(row, &selection.selection, variables))
        .collect()
}

fn resolve(value: &InputValue, variables: &Object) -> Value {
    match value {
        InputValue::Null => Value::Null,
        InputValue::Int(i) => json!(i),
        InputValue::Float(f) => json!(f),
        InputValue::String(s) | InputValue::Enum(s) => json!(s),
        InputValue::Boolean(b) => json!(b),
        InputValue::Variable(name) => variables.get(name).cloned().unwrap_or(Value::Null),
        InputValue::List(values) => values.iter().map(|v| resolve(v, variables)).collect(),
        InputValue::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), resolve(v, variables)))
                .collect(),
        ),
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn compare(a: &Value, b: &Value) -> Ordering {
    match (number(a), number(b)) {
        (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        _ => a.as_str().cmp(&b.as_str()),
    }
}

fn matches_filter(row: &Value, filter: &Value) -> bool {
    let Some(filter) = filter.as_object() else {
        return true;
    };
    filter.iter().all(|(key, expected)| {
        let (field, op) = key.rsplit_once('_').unwrap_or((key.as_str(), "eq"));
        let ordering = if field == "id" {
            row[field].as_str().cmp(&expected.as_str())
        } else {
            compare(&row[field], expected)
        };
        match op {
            "gt" => ordering == Ordering::Greater,
            "lt" => ordering == Ordering::Less,
            _ => ordering == Ordering::Equal,
        }
    })
}

fn project(row: &Value, selection: &[Selection], variables: &Object) -> Value {
    Value::Object(
        selection
            .iter()
            .map(|s| {
                let value = match &row[s.name()] {
                    Value::Array(rows) if !s.is_leaf() => list(rows, s, variables),
                    Value::Object(_) if !s.is_leaf() => project(&row[s.name()], &s.selection, variables),
                    other => other.clone(),
                };
                (s.key().to_string(), value)
            })
            .collect(),
    )
}

/// Check `document` against the schema, as a server would.
pub fn validate(document: &Document) {
    let schema = Schema::parse_and_validate(SDL, "schema.graphql").unwrap();
    let text = document.graphql();
    let result = ExecutableDocument::parse_and_validate(&schema, text.clone(), "page.graphql");
    assert!(result.is_ok(), "invalid document:\n{text}");
}
