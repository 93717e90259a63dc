//! Path/depth compiler (component D, spec §4.D).
//!
//! Rebuilds `(priority, _path, _depth)` for one subtree (or the whole
//! forest) as a single recursive CTE. `dialect.rs` documents the
//! vendor-general shape of this statement for every supported backend;
//! this module is the concrete executor against the one backend
//! `treenode_core` actually drives, SQLite, following the same
//! materialize-then-correlated-UPDATE strategy `Vendor::Sqlite::update_from`
//! describes.
//!
//! The transaction itself (and the row-lock attempt) is the task queue's
//! responsibility (component E); this function runs against whatever
//! connection it is handed and never opens or commits a transaction of
//! its own.

use sqlx::SqliteConnection;

use crate::config::SortDirection;
use crate::error::{Error, TreeResult};
use crate::schema::TreeEntity;

/// Rebuild the subtree rooted at `parent_id`'s children, or the whole
/// forest when `parent_id` is `None`. The row named by `parent_id` itself
/// is never rewritten — only its descendants.
pub async fn rebuild<T: TreeEntity>(
    conn: &mut SqliteConnection,
    parent_id: Option<i64>,
    segment_length: u32,
    base: i64,
    direction: SortDirection,
) -> TreeResult<()> {
    let table = T::TABLE;
    let order = match direction {
        SortDirection::Asc => "ASC",
        SortDirection::Desc => "DESC",
    };
    let width = segment_length as usize;

    let (parent_path, parent_depth) = match parent_id {
        Some(pid) => {
            let row: Option<(String, i64)> =
                sqlx::query_as(&format!("SELECT _path, _depth FROM {table} WHERE id = ?"))
                    .bind(pid)
                    .fetch_optional(&mut *conn)
                    .await?;
            row.ok_or(Error::NodeNotFound(pid))?
        }
        None => (String::new(), -1),
    };

    let sibling_count: i64 = match parent_id {
        Some(pid) => {
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table} WHERE parent_id = ?"))
                .bind(pid)
                .fetch_one(&mut *conn)
                .await?
        }
        None => {
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table} WHERE parent_id IS NULL"))
                .fetch_one(&mut *conn)
                .await?
        }
    };
    if sibling_count > base {
        return Err(Error::SiblingOverflow { base });
    }
    if sibling_count == 0 {
        // Nothing directly under this parent; nothing to rebuild.
        return Ok(());
    }

    let anchor_filter = match parent_id {
        Some(_) => "parent_id = ?",
        None => "parent_id IS NULL",
    };

    let anchor_sql = format!(
        "SELECT id, \
             ROW_NUMBER() OVER (ORDER BY priority {order}, id ASC) - 1 AS new_priority, \
             CASE WHEN ? = '' \
                  THEN printf('%0{width}X', ROW_NUMBER() OVER (ORDER BY priority {order}, id ASC) - 1) \
                  ELSE ? || '.' || printf('%0{width}X', ROW_NUMBER() OVER (ORDER BY priority {order}, id ASC) - 1) \
             END AS new_path, \
             ? AS new_depth \
         FROM {table} WHERE {anchor_filter}"
    );

    let recursive_sql = format!(
        "SELECT t.id, \
             ROW_NUMBER() OVER (PARTITION BY t.parent_id ORDER BY t.priority {order}, t.id ASC) - 1 AS new_priority, \
             tree_cte.new_path || '.' || printf('%0{width}X', \
                 ROW_NUMBER() OVER (PARTITION BY t.parent_id ORDER BY t.priority {order}, t.id ASC) - 1) AS new_path, \
             tree_cte.new_depth + 1 AS new_depth \
         FROM {table} t JOIN tree_cte ON t.parent_id = tree_cte.id"
    );

    let create_temp_sql = format!(
        "CREATE TEMP TABLE tree_cte_tmp AS \
         WITH RECURSIVE tree_cte(id, new_priority, new_path, new_depth) AS ( \
             {anchor_sql} UNION ALL {recursive_sql} \
         ) SELECT id, new_priority, new_path, new_depth FROM tree_cte"
    );

    let mut q = sqlx::query(&create_temp_sql)
        .bind(parent_path.clone())
        .bind(parent_path.clone())
        .bind(parent_depth + 1);
    if let Some(pid) = parent_id {
        q = q.bind(pid);
    }
    q.execute(&mut *conn).await?;

    sqlx::query(&format!(
        "UPDATE {table} SET \
             priority = (SELECT new_priority FROM tree_cte_tmp WHERE tree_cte_tmp.id = {table}.id), \
             _path = (SELECT new_path FROM tree_cte_tmp WHERE tree_cte_tmp.id = {table}.id), \
             _depth = (SELECT new_depth FROM tree_cte_tmp WHERE tree_cte_tmp.id = {table}.id) \
         WHERE id IN (SELECT id FROM tree_cte_tmp)"
    ))
    .execute(&mut *conn)
    .await?;

    sqlx::query("DROP TABLE tree_cte_tmp").execute(&mut *conn).await?;

    Ok(())
}
