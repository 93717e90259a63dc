//! Test harness shared by this crate's unit tests (spec §10 / SPEC_FULL.md
//! "Test tooling"). Mirrors the production bootstrap in `storage::sqlite`:
//! one pooled connection over a named, shared-cache in-memory database, so
//! every connection handed out by the pool sees the same schema instead of
//! each getting its own throwaway `:memory:` database.

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{FromRow, SqlitePool};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::schema::{TreeFields, Value};

static COUNTER: AtomicU32 = AtomicU32::new(0);

/// A fresh in-memory pool, isolated from every other call by a unique
/// shared-cache database name — parallel `#[tokio::test]`s never see each
/// other's tables.
pub async fn memory_pool() -> SqlitePool {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let url = format!("file:treenode_test_{n}?mode=memory&cache=shared");
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect(&url)
        .await
        .expect("open in-memory sqlite pool")
}

/// Minimal `TreeEntity` used by this crate's own tests: five structural
/// columns, no extras.
#[derive(Debug, Clone, FromRow)]
pub struct TestRow {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub priority: i64,
    pub _path: String,
    pub _depth: i64,
}

impl TreeFields for TestRow {
    fn id(&self) -> i64 {
        self.id
    }
    fn parent_id(&self) -> Option<i64> {
        self.parent_id
    }
    fn priority(&self) -> i64 {
        self.priority
    }
    fn path(&self) -> &str {
        &self._path
    }
    fn depth(&self) -> i64 {
        self._depth
    }
}

impl crate::schema::TreeEntity for TestRow {
    const TABLE: &'static str = "widgets";

    fn extra_columns(&self) -> Vec<(&'static str, Value)> {
        Vec::new()
    }
}
