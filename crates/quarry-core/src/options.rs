//! Query options: ordering, paging, projection and joins.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn sql(&self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

/// Placement of NULLs in an ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NullsOrder {
    First,
    Last,
}

/// One `ORDER BY` term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "OrderItemRepr")]
pub struct OrderItem {
    pub field: String,
    pub direction: Direction,
    pub nulls: Option<NullsOrder>,
    /// Last value seen on the previous page, for keyset pagination.
    pub last: Option<Value>,
}

impl OrderItem {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Asc,
            nulls: None,
            last: None,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            direction: Direction::Desc,
            ..Self::asc(field)
        }
    }

    pub fn nulls(mut self, nulls: NullsOrder) -> Self {
        self.nulls = Some(nulls);
        self
    }

    pub fn after(mut self, last: Value) -> Self {
        self.last = Some(last);
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OrderItemRepr {
    /// `"age"`, `"age desc"`, `"age desc nulls last"`.
    Text(String),
    Full {
        field: String,
        #[serde(default)]
        direction: Option<String>,
        #[serde(default)]
        nulls: Option<NullsOrder>,
        #[serde(default)]
        last: Option<Value>,
    },
}

impl TryFrom<OrderItemRepr> for OrderItem {
    type Error = String;

    fn try_from(repr: OrderItemRepr) -> Result<Self, Self::Error> {
        match repr {
            OrderItemRepr::Text(text) => {
                let mut words = text.split_whitespace();
                let field = words
                    .next()
                    .ok_or_else(|| "empty order expression".to_string())?
                    .to_string();
                let mut item = OrderItem::asc(field);
                let rest: Vec<String> = words.map(str::to_ascii_lowercase).collect();
                match rest.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
                    [] => {}
                    [dir] => item.direction = parse_direction(dir)?,
                    [dir, "nulls", nulls] => {
                        item.direction = parse_direction(dir)?;
                        item.nulls = Some(parse_nulls(nulls)?);
                    }
                    ["nulls", nulls] => item.nulls = Some(parse_nulls(nulls)?),
                    _ => return Err(format!("invalid order expression '{}'", text)),
                }
                Ok(item)
            }
            OrderItemRepr::Full {
                field,
                direction,
                nulls,
                last,
            } => Ok(OrderItem {
                field,
                direction: direction
                    .as_deref()
                    .map(|d| parse_direction(&d.to_ascii_lowercase()))
                    .transpose()?
                    .unwrap_or_default(),
                nulls,
                last,
            }),
        }
    }
}

fn parse_direction(s: &str) -> Result<Direction, String> {
    match s {
        "asc" => Ok(Direction::Asc),
        "desc" => Ok(Direction::Desc),
        other => Err(format!("invalid order direction '{}'", other)),
    }
}

fn parse_nulls(s: &str) -> Result<NullsOrder, String> {
    match s {
        "first" => Ok(NullsOrder::First),
        "last" => Ok(NullsOrder::Last),
        other => Err(format!("invalid nulls placement '{}'", other)),
    }
}

/// Join flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
    #[default]
    Inner,
    Left,
}

/// Join another relation into a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinSpec {
    /// Entity to join (`schema.name` or unqualified).
    pub entity: String,
    /// Name the joined relation is addressed by in criteria and results.
    /// Defaults to the entity's unqualified name.
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub kind: JoinKind,
    /// Local column -> joined column equalities.
    pub on: BTreeMap<String, String>,
}

impl JoinSpec {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            alias: None,
            kind: JoinKind::Inner,
            on: BTreeMap::new(),
        }
    }

    pub fn left(mut self) -> Self {
        self.kind = JoinKind::Left;
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn on(mut self, local: impl Into<String>, joined: impl Into<String>) -> Self {
        self.on.insert(local.into(), joined.into());
        self
    }
}

/// Per-call options for reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOptions {
    #[serde(default)]
    pub order: Vec<OrderItem>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
    /// Keyset pagination page size. Exclusive with `limit`/`offset`.
    #[serde(default, alias = "pageSize", alias = "pageLength")]
    pub page_size: Option<u64>,
    /// Projection; empty selects every column.
    #[serde(default, alias = "columns")]
    pub fields: Vec<String>,
    /// Exclude rows from inheriting tables.
    #[serde(default)]
    pub only: bool,
    #[serde(default)]
    pub joins: Vec<JoinSpec>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn order_by(mut self, item: OrderItem) -> Self {
        self.order.push(item);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn page_size(mut self, size: u64) -> Self {
        self.page_size = Some(size);
        self
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn only(mut self) -> Self {
        self.only = true;
        self
    }

    pub fn join(mut self, join: JoinSpec) -> Self {
        self.joins.push(join);
        self
    }
}

/// Full-text search over a relation or document table.
///
/// With no `fields`, the table's `search` tsvector column is used.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextSearch {
    #[serde(default)]
    pub fields: Vec<String>,
    pub term: String,
}

impl TextSearch {
    pub fn new(term: impl Into<String>) -> Self {
        Self {
            fields: Vec::new(),
            term: term.into(),
        }
    }

    pub fn in_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }
}
