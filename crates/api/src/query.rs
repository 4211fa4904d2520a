// Path: crates/api/src/query.rs

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// A comparison applied to one payload field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal.
    Lte,
    /// Member of a JSON array operand.
    In,
    /// Not a member of a JSON array operand.
    NotIn,
}

/// One `field <op> value` predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldFilter {
    /// Top-level field name of the payload object.
    pub field: String,
    /// The comparison.
    pub op: FilterOp,
    /// The operand.
    pub value: Value,
}

impl FieldFilter {
    /// Returns true if `entity` satisfies the predicate. A missing field is `null`.
    pub fn matches(&self, entity: &Value) -> bool {
        let actual = entity.get(&self.field).unwrap_or(&Value::Null);
        match self.op {
            FilterOp::Eq => actual == &self.value,
            FilterOp::Ne => actual != &self.value,
            FilterOp::Gt => compare_json(actual, &self.value) == Ordering::Greater,
            FilterOp::Gte => compare_json(actual, &self.value) != Ordering::Less,
            FilterOp::Lt => compare_json(actual, &self.value) == Ordering::Less,
            FilterOp::Lte => compare_json(actual, &self.value) != Ordering::Greater,
            FilterOp::In => self
                .value
                .as_array()
                .map_or(false, |set| set.contains(actual)),
            FilterOp::NotIn => self
                .value
                .as_array()
                .map_or(true, |set| !set.contains(actual)),
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OrderDirection {
    /// Smallest first.
    #[default]
    Asc,
    /// Largest first.
    Desc,
}

/// Filters, ordering and paging for `get_by_fields` style lookups.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FieldQuery {
    /// Conjunction of predicates.
    pub filters: Vec<FieldFilter>,
    /// Rows to skip after ordering.
    pub offset: usize,
    /// Maximum rows returned; `None` is unbounded.
    pub limit: Option<usize>,
    /// Field to sort by; `None` sorts by id.
    pub order_by: Option<String>,
    /// Sort direction.
    pub direction: OrderDirection,
}

impl FieldQuery {
    /// An unfiltered, unbounded query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a predicate.
    pub fn filter(mut self, field: impl Into<String>, op: FilterOp, value: Value) -> Self {
        self.filters.push(FieldFilter {
            field: field.into(),
            op,
            value,
        });
        self
    }

    /// Shorthand for an equality predicate.
    pub fn eq(self, field: impl Into<String>, value: Value) -> Self {
        self.filter(field, FilterOp::Eq, value)
    }

    /// Sets the offset.
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Sets the limit.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the ordering.
    pub fn order_by(mut self, field: impl Into<String>, direction: OrderDirection) -> Self {
        self.order_by = Some(field.into());
        self.direction = direction;
        self
    }

    /// Returns true if `entity` satisfies every predicate.
    pub fn matches(&self, entity: &Value) -> bool {
        self.filters.iter().all(|f| f.matches(entity))
    }

    /// Sorts `(id, payload)` rows by the query's ordering, breaking ties by id.
    pub fn sort(&self, rows: &mut [(String, Value)]) {
        rows.sort_by(|(id_a, a), (id_b, b)| {
            let ord = match &self.order_by {
                Some(field) => compare_json(
                    a.get(field).unwrap_or(&Value::Null),
                    b.get(field).unwrap_or(&Value::Null),
                )
                .then_with(|| id_a.cmp(id_b)),
                None => id_a.cmp(id_b),
            };
            match self.direction {
                OrderDirection::Asc => ord,
                OrderDirection::Desc => ord.reverse(),
            }
        });
    }

    /// Filters, sorts and pages `rows` in place of a store query.
    pub fn apply(&self, rows: Vec<(String, Value)>) -> Vec<(String, Value)> {
        let mut rows: Vec<_> = rows.into_iter().filter(|(_, v)| self.matches(v)).collect();
        self.sort(&mut rows);
        let rows = rows.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => rows.take(limit).collect(),
            None => rows.collect(),
        }
    }
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values: null < bool < number < string < array < object.
pub fn compare_json(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => {
                let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x
            .iter()
            .zip(y.iter())
            .map(|(x, y)| compare_json(x, y))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows() -> Vec<(String, Value)> {
        vec![
            ("a".into(), json!({"id": "a", "n": 3, "kind": "x"})),
            ("b".into(), json!({"id": "b", "n": 1, "kind": "y"})),
            ("c".into(), json!({"id": "c", "n": 2, "kind": "x"})),
            ("d".into(), json!({"id": "d", "kind": "x"})),
        ]
    }

    #[test]
    fn filters_and_orders_by_field() {
        let q = FieldQuery::new()
            .eq("kind", json!("x"))
            .order_by("n", OrderDirection::Desc);
        let ids: Vec<_> = q.apply(rows()).into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["a", "c", "d"]);
    }

    #[test]
    fn missing_fields_compare_as_null() {
        let q = FieldQuery::new().filter("n", FilterOp::Lt, json!(2));
        let ids: Vec<_> = q.apply(rows()).into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["b", "d"]);
    }

    #[test]
    fn offset_and_limit_page_after_sorting() {
        let q = FieldQuery::new().offset(1).limit(2);
        let ids: Vec<_> = q.apply(rows()).into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn in_requires_an_array_operand() {
        let hit = FieldFilter {
            field: "n".into(),
            op: FilterOp::In,
            value: json!([1, 2]),
        };
        assert!(hit.matches(&json!({"n": 2})));
        assert!(!hit.matches(&json!({"n": 3})));
        let bad = FieldFilter {
            value: json!(2),
            ..hit
        };
        assert!(!bad.matches(&json!({"n": 2})));
    }
}
