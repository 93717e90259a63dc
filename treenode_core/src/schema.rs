//! The seam between the engine and a host's row type.
//!
//! A tree type is any Rust struct the host already fetches with
//! `sqlx::FromRow`; it only needs to expose the five structural columns
//! the engine owns (`id`, `parent_id`, `priority`, `_path`, `_depth`) and
//! hand back whatever other columns it wants persisted at creation time.

use sqlx::sqlite::SqliteRow;

/// A loosely-typed scalar for columns the engine doesn't know the Rust
/// type of ahead of time — used only to build dynamic `INSERT` statements
/// for a `TreeEntity`'s non-structural columns.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Real(f64),
    Text(String),
}

/// Read-only access to the five structural columns every tree row has.
pub trait TreeFields {
    fn id(&self) -> i64;
    fn parent_id(&self) -> Option<i64>;
    fn priority(&self) -> i64;
    fn path(&self) -> &str;
    fn depth(&self) -> i64;
}

/// A row type bound to one tree table.
///
/// `TABLE` must be a literal, compile-time-known name — the engine never
/// accepts a table name from a caller-supplied string, which is how it
/// keeps the injection-safety guarantee spec §4.A requires of the dialect
/// adapter.
pub trait TreeEntity:
    TreeFields + for<'r> sqlx::FromRow<'r, SqliteRow> + Send + Unpin + 'static
{
    const TABLE: &'static str;

    /// Non-structural columns to set when this row is first inserted.
    /// The engine writes these once, at `create`; it never rewrites them.
    fn extra_columns(&self) -> Vec<(&'static str, Value)> {
        Vec::new()
    }
}
