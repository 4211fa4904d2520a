// Path: crates/storage/src/apply.rs

//! Backend-independent semantics of [`StoreOp`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strata_api::storage::{StorageError, StoreOp, VersionRow};
use strata_types::{Height, ProofOfIndex};

/// The stored form of one entity interval. The key carries id and start height.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct StoredRow {
    pub data: Value,
    pub end: Option<Height>,
}

impl StoredRow {
    pub fn into_version(self, id: &str, start: Height) -> VersionRow {
        VersionRow {
            id: id.to_string(),
            data: self.data,
            start_height: start,
            end_height: self.end,
        }
    }
}

/// Primitive table access a backend exposes inside one write transaction.
pub(crate) trait OpTarget {
    /// Every row of an id, ordered by start height.
    fn rows(&mut self, entity: &str, id: &str) -> Result<Vec<(Height, StoredRow)>, StorageError>;
    fn put_row(
        &mut self,
        entity: &str,
        id: &str,
        start: Height,
        row: &StoredRow,
    ) -> Result<(), StorageError>;
    fn delete_row(&mut self, entity: &str, id: &str, start: Height) -> Result<(), StorageError>;
    fn get_meta(&mut self, key: &str) -> Result<Option<Value>, StorageError>;
    fn put_meta(&mut self, key: &str, value: &Value) -> Result<(), StorageError>;
    fn delete_meta(&mut self, key: &str) -> Result<(), StorageError>;
    fn put_poi(&mut self, poi: &ProofOfIndex) -> Result<(), StorageError>;
    /// POI rows with `id >= from`.
    fn pois_from(&mut self, from: Height) -> Result<Vec<ProofOfIndex>, StorageError>;
}

pub(crate) fn apply_op<T: OpTarget + ?Sized>(t: &mut T, op: StoreOp) -> Result<(), StorageError> {
    match op {
        StoreOp::CloseVersions { entity, closes } => {
            for (id, end) in closes {
                for (start, mut row) in t.rows(&entity, &id)? {
                    if row.end.is_none() && start < end {
                        row.end = Some(end);
                        t.put_row(&entity, &id, start, &row)?;
                    }
                }
            }
        }
        StoreOp::InsertVersions { entity, rows } => {
            for row in rows {
                let stored = StoredRow {
                    data: row.data,
                    end: row.end_height,
                };
                t.put_row(&entity, &row.id, row.start_height, &stored)?;
            }
        }
        StoreOp::Upsert { entity, id, data } => {
            for (start, _) in t.rows(&entity, &id)? {
                t.delete_row(&entity, &id, start)?;
            }
            t.put_row(&entity, &id, 0, &StoredRow { data, end: None })?;
        }
        StoreOp::Delete { entity, id } => {
            for (start, _) in t.rows(&entity, &id)? {
                t.delete_row(&entity, &id, start)?;
            }
        }
        StoreOp::SetMetadata { key, value } => t.put_meta(&key, &value)?,
        StoreOp::IncrementMetadata { key, amount } => {
            let next = increment(&key, t.get_meta(&key)?, amount)?;
            t.put_meta(&key, &next)?;
        }
        StoreOp::AppendMetadata { key, values } => {
            let next = append(&key, t.get_meta(&key)?, values)?;
            t.put_meta(&key, &next)?;
        }
        StoreOp::DeleteMetadata { key } => t.delete_meta(&key)?,
        StoreOp::UpsertPoi(pois) => {
            for poi in &pois {
                t.put_poi(poi)?;
            }
        }
        StoreOp::ClearPoiMmrRoots { from } => {
            for mut poi in t.pois_from(from)? {
                if poi.mmr_root.take().is_some() {
                    t.put_poi(&poi)?;
                }
            }
        }
    }
    Ok(())
}

fn increment(key: &str, current: Option<Value>, amount: i64) -> Result<Value, StorageError> {
    let base = match current {
        None | Some(Value::Null) => 0,
        Some(Value::Number(n)) => n.as_i64().ok_or_else(|| StorageError::InvalidMetadata {
            key: key.to_string(),
            reason: format!("{} is not an integer", n),
        })?,
        Some(other) => {
            return Err(StorageError::InvalidMetadata {
                key: key.to_string(),
                reason: format!("expected a number, found {}", other),
            })
        }
    };
    let next = base
        .checked_add(amount)
        .ok_or_else(|| StorageError::InvalidMetadata {
            key: key.to_string(),
            reason: "counter overflow".into(),
        })?;
    Ok(Value::from(next))
}

fn append(key: &str, current: Option<Value>, values: Vec<Value>) -> Result<Value, StorageError> {
    let mut list = match current {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(list)) => list,
        Some(other) => {
            return Err(StorageError::InvalidMetadata {
                key: key.to_string(),
                reason: format!("expected an array, found {}", other),
            })
        }
    };
    list.extend(values);
    Ok(Value::Array(list))
}

/// The open row of an id.
pub(crate) fn open_row(rows: Vec<(Height, StoredRow)>) -> Option<Value> {
    rows.into_iter()
        .find(|(_, row)| row.end.is_none())
        .map(|(_, row)| row.data)
}

/// The row of an id whose interval covers `height`.
pub(crate) fn row_at(rows: Vec<(Height, StoredRow)>, height: Height) -> Option<Value> {
    rows.into_iter()
        .find(|(start, row)| *start <= height && row.end.map_or(true, |end| height < end))
        .map(|(_, row)| row.data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn increment_creates_and_adds() {
        assert_eq!(increment("k", None, 2).unwrap(), json!(2));
        assert_eq!(increment("k", Some(json!(40)), 2).unwrap(), json!(42));
        assert!(matches!(
            increment("k", Some(json!("x")), 1),
            Err(StorageError::InvalidMetadata { .. })
        ));
    }

    #[test]
    fn append_extends_in_order() {
        assert_eq!(append("k", None, vec![json!(1)]).unwrap(), json!([1]));
        assert_eq!(
            append("k", Some(json!([1])), vec![json!(2), json!(3)]).unwrap(),
            json!([1, 2, 3])
        );
        assert!(append("k", Some(json!({})), vec![]).is_err());
    }

    #[test]
    fn row_at_respects_half_open_intervals() {
        let rows = vec![
            (
                1,
                StoredRow {
                    data: json!("a"),
                    end: Some(4),
                },
            ),
            (
                6,
                StoredRow {
                    data: json!("b"),
                    end: None,
                },
            ),
        ];
        assert_eq!(row_at(rows.clone(), 3), Some(json!("a")));
        assert_eq!(row_at(rows.clone(), 4), None);
        assert_eq!(row_at(rows.clone(), 9), Some(json!("b")));
        assert_eq!(open_row(rows), Some(json!("b")));
    }
}
