//! Parametrised SQL query construction
//!
//! A [QueryBuilder] accumulates typed filters over one table and renders them into SQL text
//! plus a map of named parameters. Values supplied by clients only ever reach the database as
//! bound parameters; the SQL text contains nothing but field names chosen by this crate and
//! generated parameter names.
//!
//! A wildcard filter renders as an always-true condition rather than being omitted, so filters
//! compose uniformly.

use rusqlite::types::{ToSql, ToSqlOutput};

use crate::selectors::{GeoPair, SourceSignalPair, TimePair, Values};
use crate::types::TimeValue;

/// Fields identifying one observation, excluding its issue
pub const NATURAL_KEY: [&str; 6] = [
    "source",
    "signal",
    "time_type",
    "geo_type",
    "geo_value",
    "time_value",
];

/// A bound parameter value
#[derive(Clone, Debug, PartialEq)]
pub enum ParamValue {
    Text(String),
    Integer(i64),
}

impl ToSql for ParamValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Self::Text(text) => text.to_sql(),
            Self::Integer(integer) => integer.to_sql(),
        }
    }
}

/// Named parameters of a query, in binding order
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryParams(Vec<(String, ParamValue)>);

impl QueryParams {
    /// Parameters in the form expected by rusqlite's named parameter APIs.
    pub fn as_named(&self) -> Vec<(&str, &dyn ToSql)> {
        self.0
            .iter()
            .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0
            .iter()
            .find_map(|(n, value)| (n == name).then_some(value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A rendered query
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    pub sql: String,
    pub params: QueryParams,
}

/// Sort direction of an ORDER BY field
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Filter condition tree. Fields are rendered relative to a table alias.
#[derive(Clone, Debug)]
enum Clause {
    Always,
    Eq(String, String),
    In(String, Vec<String>),
    Between(String, String, String),
    Le(String, String),
    Any(Vec<Clause>),
    All(Vec<Clause>),
}

impl Clause {
    fn render(&self, alias: &str) -> String {
        match self {
            Self::Always => "1 = 1".to_string(),
            Self::Eq(field, param) => format!("{alias}.{field} = {param}"),
            Self::In(field, params) => format!("{alias}.{field} IN ({})", params.join(", ")),
            Self::Between(field, start, end) => {
                format!("{alias}.{field} BETWEEN {start} AND {end}")
            }
            Self::Le(field, param) => format!("{alias}.{field} <= {param}"),
            Self::Any(clauses) if clauses.is_empty() => "1 = 0".to_string(),
            Self::Any(clauses) => Self::join(clauses, alias, " OR "),
            Self::All(clauses) if clauses.is_empty() => "1 = 1".to_string(),
            Self::All(clauses) => Self::join(clauses, alias, " AND "),
        }
    }

    fn join(clauses: &[Clause], alias: &str, separator: &str) -> String {
        let rendered: Vec<String> = clauses.iter().map(|c| c.render(alias)).collect();
        format!("({})", rendered.join(separator))
    }
}

#[derive(Debug)]
struct LatestJoin {
    as_of: Option<String>,
}

/// Builder for a parametrised SELECT over one table
#[derive(Debug)]
pub struct QueryBuilder {
    table: String,
    alias: String,
    fields: Vec<String>,
    conditions: Vec<Clause>,
    params: QueryParams,
    latest: Option<LatestJoin>,
    group_by: Vec<String>,
    order: Vec<(String, SortDirection)>,
    limit: Option<usize>,
    counter: usize,
}

impl QueryBuilder {
    pub fn new(table: &str, alias: &str) -> Self {
        QueryBuilder {
            table: table.to_string(),
            alias: alias.to_string(),
            fields: vec![],
            conditions: vec![],
            params: QueryParams::default(),
            latest: None,
            group_by: vec![],
            order: vec![],
            limit: None,
            counter: 0,
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Select table fields.
    pub fn select(&mut self, fields: &[&str]) -> &mut Self {
        let alias = &self.alias;
        self.fields
            .extend(fields.iter().map(|field| format!("{alias}.{field}")));
        self
    }

    /// Select a raw expression, e.g. an aggregate.
    pub fn select_expr(&mut self, expr: &str) -> &mut Self {
        self.fields.push(expr.to_string());
        self
    }

    /// Bind a value to a new, unique parameter name.
    fn bind(&mut self, field: &str, value: ParamValue) -> String {
        let name = format!(":{}_{}", field, self.counter);
        self.counter += 1;
        self.params.0.push((name.clone(), value));
        name
    }

    fn strings_clause(&mut self, field: &str, values: &Values<String>) -> Clause {
        match values {
            Values::All => Clause::Always,
            Values::List(values) => {
                let params = values
                    .iter()
                    .map(|value| self.bind(field, ParamValue::Text(value.clone())))
                    .collect();
                Clause::In(field.to_string(), params)
            }
        }
    }

    fn integers_clause(&mut self, field: &str, values: &Values<TimeValue>) -> Clause {
        match values {
            Values::All => Clause::Always,
            Values::List(values) => Clause::Any(
                values
                    .iter()
                    .map(|value| match *value {
                        TimeValue::Single(single) => {
                            Clause::Eq(field.to_string(), self.bind(field, ParamValue::Integer(single)))
                        }
                        TimeValue::Range(start, end) => Clause::Between(
                            field.to_string(),
                            self.bind(field, ParamValue::Integer(start)),
                            self.bind(field, ParamValue::Integer(end)),
                        ),
                    })
                    .collect(),
            ),
        }
    }

    fn text_eq(&mut self, field: &str, value: &str) -> Clause {
        Clause::Eq(
            field.to_string(),
            self.bind(field, ParamValue::Text(value.to_string())),
        )
    }

    /// Restrict a text field to a set of values.
    pub fn where_strings(&mut self, field: &str, values: &Values<String>) -> &mut Self {
        let clause = self.strings_clause(field, values);
        self.conditions.push(clause);
        self
    }

    /// Restrict an integer field to a set of values and inclusive ranges.
    pub fn where_integers(&mut self, field: &str, values: &Values<TimeValue>) -> &mut Self {
        let clause = self.integers_clause(field, values);
        self.conditions.push(clause);
        self
    }

    /// Restrict an integer field to one value.
    pub fn where_equals_int(&mut self, field: &str, value: i64) -> &mut Self {
        let param = self.bind(field, ParamValue::Integer(value));
        self.conditions.push(Clause::Eq(field.to_string(), param));
        self
    }

    /// Restrict to any of the source/signal pairs.
    pub fn where_source_signals(&mut self, pairs: &[SourceSignalPair]) -> &mut Self {
        let clauses = pairs
            .iter()
            .map(|pair| {
                Clause::All(vec![
                    self.text_eq("source", &pair.source),
                    self.strings_clause("signal", &pair.signals),
                ])
            })
            .collect();
        self.conditions.push(Clause::Any(clauses));
        self
    }

    /// Restrict to any of the geo pairs.
    pub fn where_geo_pairs(&mut self, pairs: &[GeoPair]) -> &mut Self {
        let clauses = pairs
            .iter()
            .map(|pair| {
                Clause::All(vec![
                    self.text_eq("geo_type", &pair.geo_type),
                    self.strings_clause("geo_value", &pair.geo_values),
                ])
            })
            .collect();
        self.conditions.push(Clause::Any(clauses));
        self
    }

    /// Restrict to any of the time pairs. An empty list selects all times.
    pub fn where_time_pairs(&mut self, pairs: &[TimePair]) -> &mut Self {
        if pairs.is_empty() {
            self.conditions.push(Clause::Always);
            return self;
        }
        let clauses = pairs
            .iter()
            .map(|pair| {
                Clause::All(vec![
                    self.text_eq("time_type", &pair.time_type.to_string()),
                    self.integers_clause("time_value", &pair.time_values),
                ])
            })
            .collect();
        self.conditions.push(Clause::Any(clauses));
        self
    }

    /// Keep only the row with the greatest issue per natural key, optionally considering only
    /// issues no later than `as_of`.
    ///
    /// Rendered as a self-join on `MAX(issue)` grouped by the natural key. The inner query
    /// reuses this builder's filters.
    pub fn use_latest_issue(&mut self, as_of: Option<i64>) -> &mut Self {
        let as_of = as_of.map(|as_of| self.bind("as_of", ParamValue::Integer(as_of)));
        self.latest = Some(LatestJoin { as_of });
        self
    }

    pub fn group_by(&mut self, fields: &[&str]) -> &mut Self {
        self.group_by
            .extend(fields.iter().map(|field| field.to_string()));
        self
    }

    /// Order by fields in the given directions.
    pub fn order_by(&mut self, fields: &[(&str, SortDirection)]) -> &mut Self {
        self.order.extend(
            fields
                .iter()
                .map(|(field, direction)| (field.to_string(), *direction)),
        );
        self
    }

    /// Order ascending by fields.
    pub fn order_by_fields(&mut self, fields: &[&str]) -> &mut Self {
        self.order.extend(
            fields
                .iter()
                .map(|field| (field.to_string(), SortDirection::default())),
        );
        self
    }

    pub fn limit(&mut self, limit: usize) -> &mut Self {
        self.limit = Some(limit);
        self
    }

    fn render_conditions(&self, alias: &str) -> Vec<String> {
        self.conditions.iter().map(|c| c.render(alias)).collect()
    }

    /// Render the SQL text and its parameters.
    pub fn build(&self) -> Query {
        let alias = &self.alias;
        let fields = if self.fields.is_empty() {
            format!("{alias}.*")
        } else {
            self.fields.join(", ")
        };
        let mut sql = format!("SELECT {fields} FROM {} {alias}", self.table);

        if let Some(latest) = &self.latest {
            let inner = format!("{alias}_latest");
            let joined = format!("{alias}_max");
            let key = NATURAL_KEY.join(", ");
            let mut inner_conditions = self.render_conditions(&inner);
            if let Some(as_of) = &latest.as_of {
                inner_conditions.push(Clause::Le("issue".to_string(), as_of.clone()).render(&inner));
            }
            let inner_where = if inner_conditions.is_empty() {
                String::new()
            } else {
                format!(" WHERE {}", inner_conditions.join(" AND "))
            };
            let on: Vec<String> = NATURAL_KEY
                .iter()
                .map(|field| format!("{alias}.{field} = {joined}.{field}"))
                .collect();
            sql.push_str(&format!(
                " JOIN (SELECT {key}, MAX(issue) AS max_issue FROM {table} {inner}{inner_where} GROUP BY {key}) {joined} ON {on} AND {alias}.issue = {joined}.max_issue",
                table = self.table,
                on = on.join(" AND "),
            ));
        }

        let conditions = self.render_conditions(alias);
        if !conditions.is_empty() {
            sql.push_str(&format!(" WHERE {}", conditions.join(" AND ")));
        }
        if !self.group_by.is_empty() {
            let group_by: Vec<String> = self
                .group_by
                .iter()
                .map(|field| format!("{alias}.{field}"))
                .collect();
            sql.push_str(&format!(" GROUP BY {}", group_by.join(", ")));
        }
        if !self.order.is_empty() {
            let order: Vec<String> = self
                .order
                .iter()
                .map(|(field, direction)| match direction {
                    SortDirection::Asc => format!("{alias}.{field} ASC"),
                    SortDirection::Desc => format!("{alias}.{field} DESC"),
                })
                .collect();
            sql.push_str(&format!(" ORDER BY {}", order.join(", ")));
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        Query {
            sql,
            params: self.params.clone(),
        }
    }
}
