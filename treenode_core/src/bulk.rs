//! Bulk tree operations (component H, spec §4.H).
//!
//! `bulk_create`/`bulk_update` are grounded on the source library's
//! `load_tree` (`models/mixins/tree.py`), which separates "write the rows"
//! from "rebuild the structural columns afterward" — every bulk write here
//! ends by queuing the touched parents rather than rebuilding inline.
//! `dump_tree`/`load_tree` mirror the same file's `get_tree`/`load_tree`
//! pair; `delete_tree`/`delete_forest` are carried over from the same
//! mixin's direct-SQL implementations almost unchanged, since a delete
//! needs no rebuild of the rows it just removed.
//!
//! A Rust `TreeEntity` has no runtime field reflection, so `load_tree`
//! can't instantiate a brand-new row the way `cls(**data)` does in the
//! source. Callers supply a `build` closure that turns a [`TreeDumpNode`]'s
//! extra columns back into a concrete `T` (design decision, see
//! `DESIGN.md`).

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use crate::error::{Error, TreeResult};
use crate::queue::TaskQueue;
use crate::schema::{TreeEntity, TreeFields, Value};

/// JSON-friendly mirror of [`Value`] for round-tripping extra columns
/// through `dump_tree`/`load_tree`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JsonValue {
    Null,
    Bool(bool),
    Int(i64),
    Real(f64),
    Text(String),
}

impl From<Value> for JsonValue {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(b),
            Value::Int(i) => JsonValue::Int(i),
            Value::Real(r) => JsonValue::Real(r),
            Value::Text(t) => JsonValue::Text(t),
        }
    }
}

impl From<JsonValue> for Value {
    fn from(v: JsonValue) -> Self {
        match v {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(b),
            JsonValue::Int(i) => Value::Int(i),
            JsonValue::Real(r) => Value::Real(r),
            JsonValue::Text(t) => Value::Text(t),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeDumpNode {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub priority: i64,
    pub depth: i64,
    pub path: String,
    pub extra: Vec<(String, JsonValue)>,
    pub children: Vec<TreeDumpNode>,
}

pub(crate) fn push_value(sep: &mut sqlx::query_builder::Separated<'_, '_, Sqlite, &str>, value: Value) {
    match value {
        Value::Null => {
            sep.push_bind(Option::<i64>::None);
        }
        Value::Bool(b) => {
            sep.push_bind(b);
        }
        Value::Int(i) => {
            sep.push_bind(i);
        }
        Value::Real(r) => {
            sep.push_bind(r);
        }
        Value::Text(t) => {
            sep.push_bind(t);
        }
    }
}

/// Insert `rows` in one statement, then queue every distinct parent they
/// landed under for a rebuild. Returns the new ids in insertion order.
pub async fn bulk_create<T: TreeEntity>(
    pool: &SqlitePool,
    queue: &TaskQueue<T>,
    rows: &[T],
) -> TreeResult<Vec<i64>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let table = T::TABLE;
    let extra_names: Vec<&'static str> = rows[0].extra_columns().into_iter().map(|(k, _)| k).collect();

    let mut builder: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("INSERT INTO {table} (parent_id, priority, _path, _depth"));
    for name in &extra_names {
        builder.push(", ").push(name);
    }
    builder.push(") ");

    builder.push_values(rows, |mut sep, row| {
        sep.push_bind(row.parent_id());
        sep.push_bind(row.priority());
        sep.push_bind(row.path().to_string());
        sep.push_bind(row.depth());
        for (_, value) in row.extra_columns() {
            push_value(&mut sep, value);
        }
    });
    builder.push(" RETURNING id");

    let ids: Vec<i64> = builder.build_query_scalar().fetch_all(pool).await?;

    let parents: HashSet<Option<i64>> = rows.iter().map(|r| r.parent_id()).collect();
    for parent in parents {
        queue.add(parent).await;
    }

    tracing::debug!(table = T::TABLE, count = ids.len(), "bulk created rows");
    Ok(ids)
}

/// Update each row's extra columns (and, if changed, its `parent_id`) by
/// id, then queue every distinct old/new parent for a rebuild.
pub async fn bulk_update<T: TreeEntity>(
    pool: &SqlitePool,
    queue: &TaskQueue<T>,
    rows: &[T],
) -> TreeResult<()> {
    let mut touched_parents = HashSet::new();

    for row in rows {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!("UPDATE {} SET ", T::TABLE));
        let mut sep = builder.separated(", ");
        sep.push("parent_id = ").push_bind_unseparated(row.parent_id());
        for (name, value) in row.extra_columns() {
            sep.push(format!("{name} = "));
            push_value(&mut sep, value);
        }
        builder.push(" WHERE id = ").push_bind(row.id());
        builder.build().execute(pool).await?;
        touched_parents.insert(row.parent_id());
    }

    for parent in touched_parents {
        queue.add(parent).await;
    }
    tracing::debug!(table = T::TABLE, count = rows.len(), "bulk updated rows");
    Ok(())
}

/// Export the subtree rooted at `root_id` (or the whole forest, if
/// `None`) as a nested structure ordered by `_path`.
pub async fn dump_tree<T: TreeEntity>(
    pool: &SqlitePool,
    root_id: Option<i64>,
) -> TreeResult<Vec<TreeDumpNode>> {
    let table = T::TABLE;
    let rows: Vec<T> = match root_id {
        Some(id) => {
            sqlx::query_as(&format!(
                "SELECT * FROM {table} WHERE id = ? \
                 OR _path LIKE (SELECT _path || '.%' FROM {table} WHERE id = ?) \
                 ORDER BY _path"
            ))
            .bind(id)
            .bind(id)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as(&format!("SELECT * FROM {table} ORDER BY _path"))
                .fetch_all(pool)
                .await?
        }
    };

    let mut nodes: HashMap<i64, TreeDumpNode> = HashMap::new();
    let mut order: Vec<i64> = Vec::new();
    for row in &rows {
        let extra = row
            .extra_columns()
            .into_iter()
            .map(|(k, v)| (k.to_string(), JsonValue::from(v)))
            .collect();
        nodes.insert(
            row.id(),
            TreeDumpNode {
                id: row.id(),
                parent_id: row.parent_id(),
                priority: row.priority(),
                depth: row.depth(),
                path: row.path().to_string(),
                extra,
                children: Vec::new(),
            },
        );
        order.push(row.id());
    }

    let mut roots = Vec::new();
    for id in order.into_iter().rev() {
        let node = nodes.remove(&id).expect("just inserted");
        match node.parent_id.and_then(|pid| nodes.get_mut(&pid)) {
            Some(parent) => parent.children.push(node),
            None => roots.push(node),
        }
    }
    roots.reverse();
    for root in &mut roots {
        root.children.reverse();
    }
    Ok(roots)
}

async fn existing_ids<T: TreeEntity>(pool: &SqlitePool, ids: &[i64]) -> TreeResult<HashSet<i64>> {
    if ids.is_empty() {
        return Ok(HashSet::new());
    }
    let table = T::TABLE;
    let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
    let sql = format!("SELECT id FROM {table} WHERE id IN ({placeholders})");
    let mut q = sqlx::query(&sql);
    for id in ids {
        q = q.bind(id);
    }
    Ok(q.fetch_all(pool).await?.into_iter().map(|r| r.get::<i64, _>(0)).collect())
}

/// Reject a payload that reuses the same `id` more than once — the only
/// shape a cycle can take in a structure that is already nested as a tree.
fn reject_duplicate_ids(tree: &[TreeDumpNode], seen: &mut HashSet<i64>) -> TreeResult<()> {
    for node in tree {
        if !seen.insert(node.id) {
            return Err(Error::InvalidTreeData(format!("id {} appears more than once (cycle)", node.id)));
        }
        reject_duplicate_ids(&node.children, seen)?;
    }
    Ok(())
}

/// Import a nested tree, creating rows for nodes whose `id` isn't already
/// present and updating the rest, then rebuilding the whole forest.
///
/// Processed level by level (breadth-first from the roots) so that a
/// child's `parent_id` is rewritten to the real id its parent was just
/// assigned before the child itself is created or updated — the source
/// library's `load_tree` does this by walking depth-first and resolving
/// `parent_id` just-in-time; the BFS-by-level shape here is equivalent and
/// matches how `bulk_create`/`bulk_update` already batch by parent. `build`
/// turns a flattened node's extra columns into a concrete `T` to insert; it
/// is never called for nodes that already exist in the table.
pub async fn load_tree<T: TreeEntity>(
    pool: &SqlitePool,
    queue: &TaskQueue<T>,
    tree: Vec<TreeDumpNode>,
    build: impl Fn(&TreeDumpNode) -> T,
) -> TreeResult<()> {
    reject_duplicate_ids(&tree, &mut HashSet::new())?;

    // Split into levels, deriving each non-root node's `parent_id` from
    // its nesting rather than trusting a possibly-stale field.
    let mut levels: Vec<Vec<TreeDumpNode>> = Vec::new();
    let mut current = tree;
    while !current.is_empty() {
        let mut next_level = Vec::new();
        for node in current.iter_mut() {
            for child in &mut node.children {
                child.parent_id = Some(node.id);
            }
            next_level.extend(std::mem::take(&mut node.children));
        }
        levels.push(current);
        current = next_level;
    }

    if let Some(roots) = levels.first() {
        for root in roots {
            if let Some(pid) = root.parent_id {
                let found = existing_ids::<T>(pool, &[pid]).await?;
                if !found.contains(&pid) {
                    return Err(Error::InvalidTreeData(format!(
                        "root node {} references unknown parent {pid}",
                        root.id
                    )));
                }
            }
        }
    }

    let mut id_map: HashMap<i64, i64> = HashMap::new();

    for mut level in levels {
        for node in level.iter_mut() {
            if let Some(pid) = node.parent_id {
                if let Some(&mapped) = id_map.get(&pid) {
                    node.parent_id = Some(mapped);
                }
            }
        }

        let ids: Vec<i64> = level.iter().map(|n| n.id).collect();
        let existing = existing_ids::<T>(pool, &ids).await?;

        let mut provisional_ids = Vec::new();
        let mut create_rows = Vec::new();
        let mut update_rows = Vec::new();
        for node in &level {
            if existing.contains(&node.id) {
                update_rows.push(build(node));
            } else {
                provisional_ids.push(node.id);
                create_rows.push(build(node));
            }
        }

        if !update_rows.is_empty() {
            bulk_update(pool, queue, &update_rows).await?;
        }
        if !create_rows.is_empty() {
            let new_ids = bulk_create(pool, queue, &create_rows).await?;
            id_map.extend(provisional_ids.into_iter().zip(new_ids));
        }
    }

    queue.add(None).await;
    queue.run().await?;
    tracing::debug!(table = T::TABLE, "loaded tree, full rebuild queued");
    Ok(())
}

/// Delete the subtree at `path` (and, if `include_self`, the node itself).
pub async fn delete_tree<T: TreeEntity>(pool: &SqlitePool, path: &str, include_self: bool) -> TreeResult<()> {
    let table = T::TABLE;
    let like_pattern = format!("{path}.%");
    if include_self {
        sqlx::query(&format!("DELETE FROM {table} WHERE _path = ? OR _path LIKE ?"))
            .bind(path)
            .bind(like_pattern)
            .execute(pool)
            .await?;
    } else {
        sqlx::query(&format!("DELETE FROM {table} WHERE _path LIKE ?"))
            .bind(like_pattern)
            .execute(pool)
            .await?;
    }
    Ok(())
}

/// Delete every row of this tree type.
pub async fn delete_forest<T: TreeEntity>(pool: &SqlitePool) -> TreeResult<()> {
    sqlx::query(&format!("DELETE FROM {}", T::TABLE)).execute(pool).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::testing::{memory_pool, TestRow};

    async fn seed_schema(pool: &SqlitePool) {
        sqlx::query("CREATE TABLE widgets (id INTEGER PRIMARY KEY, parent_id INTEGER, priority INTEGER NOT NULL, _path TEXT NOT NULL DEFAULT '', _depth INTEGER NOT NULL DEFAULT 0)")
            .execute(pool)
            .await
            .unwrap();
    }

    fn row(id: i64, parent_id: Option<i64>, priority: i64, path: &str, depth: i64) -> TestRow {
        TestRow { id, parent_id, priority, _path: path.to_string(), _depth: depth }
    }

    #[tokio::test]
    async fn bulk_create_inserts_and_queues_parents() {
        let pool = memory_pool().await;
        seed_schema(&pool).await;
        let queue = TaskQueue::<TestRow>::new(pool.clone(), Config::default());

        let ids = bulk_create(
            &pool,
            &queue,
            &[row(0, None, 0, "", 0), row(0, None, 1, "", 0)],
        )
        .await
        .unwrap();
        assert_eq!(ids.len(), 2);
        assert!(queue.is_dirty().await);
    }

    #[tokio::test]
    async fn delete_tree_removes_subtree_but_keeps_siblings() {
        let pool = memory_pool().await;
        seed_schema(&pool).await;
        sqlx::query("INSERT INTO widgets (id, parent_id, priority, _path, _depth) VALUES (1, NULL, 0, '000', 0), (2, 1, 0, '000.000', 1), (3, NULL, 1, '001', 0)")
            .execute(&pool)
            .await
            .unwrap();

        delete_tree::<TestRow>(&pool, "000", true).await.unwrap();

        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM widgets")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(remaining, 1);
    }

    #[tokio::test]
    async fn delete_forest_clears_every_row() {
        let pool = memory_pool().await;
        seed_schema(&pool).await;
        sqlx::query("INSERT INTO widgets (id, parent_id, priority, _path, _depth) VALUES (1, NULL, 0, '000', 0)")
            .execute(&pool)
            .await
            .unwrap();

        delete_forest::<TestRow>(&pool).await.unwrap();

        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM widgets")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[tokio::test]
    async fn dump_tree_nests_children_under_parents() {
        let pool = memory_pool().await;
        seed_schema(&pool).await;
        sqlx::query("INSERT INTO widgets (id, parent_id, priority, _path, _depth) VALUES (1, NULL, 0, '000', 0), (2, 1, 0, '000.000', 1)")
            .execute(&pool)
            .await
            .unwrap();

        let tree = dump_tree::<TestRow>(&pool, None).await.unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].id, 1);
        assert_eq!(tree[0].children.len(), 1);
        assert_eq!(tree[0].children[0].id, 2);
    }

    fn build(node: &TreeDumpNode) -> TestRow {
        TestRow {
            id: node.id,
            parent_id: node.parent_id,
            priority: node.priority,
            _path: node.path.clone(),
            _depth: node.depth,
        }
    }

    fn dump_node(id: i64, children: Vec<TreeDumpNode>) -> TreeDumpNode {
        TreeDumpNode { id, parent_id: None, priority: 0, depth: 0, path: String::new(), extra: Vec::new(), children }
    }

    #[tokio::test]
    async fn load_tree_remaps_provisional_parent_ids_level_by_level() {
        let pool = memory_pool().await;
        seed_schema(&pool).await;
        let queue = TaskQueue::<TestRow>::new(pool.clone(), Config::default());

        // Every id here (-1, -2, -3) is provisional: none exist in the
        // table yet, so the parent must be created before its child's
        // `parent_id` can be resolved to a real row id.
        let tree = vec![dump_node(-1, vec![dump_node(-2, vec![dump_node(-3, vec![])])])];

        load_tree(&pool, &queue, tree, build).await.unwrap();

        let rows: Vec<(i64, Option<i64>)> =
            sqlx::query_as("SELECT id, parent_id FROM widgets ORDER BY id")
                .fetch_all(&pool)
                .await
                .unwrap();
        assert_eq!(rows.len(), 3);
        let root_id = rows.iter().find(|(_, p)| p.is_none()).unwrap().0;
        let mid = rows.iter().find(|(_, p)| *p == Some(root_id)).unwrap();
        let leaf = rows.iter().find(|(id, _)| *id != root_id && *id != mid.0).unwrap();
        assert_eq!(leaf.1, Some(mid.0));
    }

    #[tokio::test]
    async fn load_tree_updates_rows_that_already_exist() {
        let pool = memory_pool().await;
        seed_schema(&pool).await;
        sqlx::query("INSERT INTO widgets (id, parent_id, priority, _path, _depth) VALUES (1, NULL, 0, '000', 0)")
            .execute(&pool)
            .await
            .unwrap();
        let queue = TaskQueue::<TestRow>::new(pool.clone(), Config::default());

        let tree = vec![dump_node(1, vec![dump_node(-1, vec![])])];
        load_tree(&pool, &queue, tree, build).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM widgets").fetch_one(&pool).await.unwrap();
        assert_eq!(count, 2);
        let child_parent: Option<i64> =
            sqlx::query_scalar("SELECT parent_id FROM widgets WHERE id <> 1").fetch_one(&pool).await.unwrap();
        assert_eq!(child_parent, Some(1));
    }

    #[tokio::test]
    async fn load_tree_rejects_an_id_reused_as_its_own_descendant() {
        let pool = memory_pool().await;
        seed_schema(&pool).await;
        let queue = TaskQueue::<TestRow>::new(pool.clone(), Config::default());

        let tree = vec![dump_node(-1, vec![dump_node(-1, vec![])])];
        let err = load_tree(&pool, &queue, tree, build).await.unwrap_err();
        assert!(matches!(err, Error::InvalidTreeData(_)));
    }

    #[tokio::test]
    async fn load_tree_rejects_root_pointing_at_unknown_parent() {
        let pool = memory_pool().await;
        seed_schema(&pool).await;
        let queue = TaskQueue::<TestRow>::new(pool.clone(), Config::default());

        let mut root = dump_node(-1, vec![]);
        root.parent_id = Some(999);
        let err = load_tree(&pool, &queue, vec![root], build).await.unwrap_err();
        assert!(matches!(err, Error::InvalidTreeData(_)));
    }
}
