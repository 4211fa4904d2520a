// Path: crates/storage/src/migrations.rs

//! Versioned schema migrations for the embedded store.
//!
//! Pending migrations run in one write transaction when the store is opened.
//! `schemaMigrationCount` records how many have been applied; a failing
//! migration aborts the transaction so no partial migration is ever committed.

use crate::apply::{apply_op, OpTarget};
use crate::redb_store::{backend, RedbWriter};
use redb::{Database, WriteTransaction};
use serde_json::Value;
use strata_api::storage::{StorageError, StoreOp};
use strata_types::keys;

/// One schema migration.
pub struct Migration {
    /// Position in the migration sequence, starting at 1.
    pub version: u32,
    /// Short description used in errors and logs.
    pub name: &'static str,
    apply: fn(&mut RedbWriter<'_, '_>) -> Result<(), StorageError>,
}

/// Every migration, in order.
pub const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "normalize dynamicDatasources to a JSON array",
    apply: normalize_dynamic_datasources,
}];

/// Older stores kept `dynamicDatasources` as a JSON-encoded string.
fn normalize_dynamic_datasources(w: &mut RedbWriter<'_, '_>) -> Result<(), StorageError> {
    let Some(Value::String(raw)) = w.get_meta(keys::DYNAMIC_DATASOURCES)? else {
        return Ok(());
    };
    let parsed: Value = serde_json::from_str(&raw).map_err(|e| StorageError::Decode(e.to_string()))?;
    if !parsed.is_array() {
        return Err(StorageError::Decode(format!(
            "expected a JSON array, found {}",
            parsed
        )));
    }
    w.put_meta(keys::DYNAMIC_DATASOURCES, &parsed)
}

fn applied_count(w: &mut RedbWriter<'_, '_>) -> Result<u64, StorageError> {
    Ok(w
        .get_meta(keys::SCHEMA_MIGRATION_COUNT)?
        .and_then(|v| v.as_u64())
        .unwrap_or(0))
}

fn run_pending(tx: &WriteTransaction<'_>) -> Result<u32, StorageError> {
    let mut w = RedbWriter { tx };
    let done = applied_count(&mut w)?;
    let mut applied = 0;
    for m in MIGRATIONS.iter().filter(|m| u64::from(m.version) > done) {
        (m.apply)(&mut w).map_err(|e| StorageError::Migration {
            version: m.version,
            reason: format!("{}: {}", m.name, e),
        })?;
        apply_op(
            &mut w,
            StoreOp::IncrementMetadata {
                key: keys::SCHEMA_MIGRATION_COUNT.to_string(),
                amount: 1,
            },
        )?;
        tracing::debug!(target: "storage", version = m.version, name = m.name, "migration applied");
        applied += 1;
    }
    Ok(applied)
}

/// Applies every pending migration and returns how many ran.
pub fn run(db: &Database) -> Result<u32, StorageError> {
    let w = db.begin_write().map_err(backend)?;
    let applied = run_pending(&w)?;
    if applied > 0 {
        w.commit().map_err(backend)?;
    }
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redb_store::METADATA;
    use serde_json::json;

    fn db_with_legacy(value: Value) -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::create(dir.path().join("m.redb")).unwrap();
        let w = db.begin_write().unwrap();
        {
            w.open_table(METADATA).unwrap();
            let mut writer = RedbWriter { tx: &w };
            writer.put_meta(keys::DYNAMIC_DATASOURCES, &value).unwrap();
        }
        w.commit().unwrap();
        (dir, db)
    }

    fn read(db: &Database, key: &str) -> Option<Value> {
        let w = db.begin_write().unwrap();
        let mut writer = RedbWriter { tx: &w };
        writer.get_meta(key).unwrap()
    }

    #[test]
    fn legacy_string_is_normalized_once() {
        let (_dir, db) = db_with_legacy(json!(r#"[{"template":"erc20"}]"#));
        assert_eq!(run(&db).unwrap(), 1);
        assert_eq!(
            read(&db, keys::DYNAMIC_DATASOURCES),
            Some(json!([{"template": "erc20"}]))
        );
        assert_eq!(read(&db, keys::SCHEMA_MIGRATION_COUNT), Some(json!(1)));
        assert_eq!(run(&db).unwrap(), 0);
    }

    #[test]
    fn failing_migration_commits_nothing() {
        let (_dir, db) = db_with_legacy(json!("not json"));
        let err = run(&db).unwrap_err();
        assert!(matches!(err, StorageError::Migration { version: 1, .. }));
        assert_eq!(read(&db, keys::SCHEMA_MIGRATION_COUNT), None);
        assert_eq!(read(&db, keys::DYNAMIC_DATASOURCES), Some(json!("not json")));
    }
}
