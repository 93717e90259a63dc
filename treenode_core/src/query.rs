//! Relational query layer (component C, spec §4.C).
//!
//! Every relationship here is grounded on the source library's
//! `TreeQuery` (`managers/queries.py`): children and siblings by
//! `parent_id`, descendants/family by a `_path LIKE` / range scan instead
//! of locale-sensitive string comparison, ancestors by a recursive CTE
//! walking `parent_id`, and root by the first path segment. All statements
//! are parameterized; no caller-supplied string ever reaches SQL text —
//! only the compile-time `T::TABLE` constant does.

use sqlx::{Row, SqlitePool};

use crate::error::TreeResult;
use crate::schema::TreeEntity;

/// How a relationship query should be reduced before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Ids,
    Count,
    Exist,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryResult {
    Ids(Vec<i64>),
    Count(i64),
    Exist(bool),
}

impl QueryResult {
    fn reduce(ids: Vec<i64>, mode: Mode) -> Self {
        match mode {
            Mode::Ids => QueryResult::Ids(ids),
            Mode::Count => QueryResult::Count(ids.len() as i64),
            Mode::Exist => QueryResult::Exist(!ids.is_empty()),
        }
    }
}

async fn ids_for(pool: &SqlitePool, sql: &str, binds: &[i64]) -> TreeResult<Vec<i64>> {
    let mut q = sqlx::query(sql);
    for b in binds {
        q = q.bind(b);
    }
    let rows = q.fetch_all(pool).await?;
    Ok(rows.into_iter().map(|r| r.get::<i64, _>(0)).collect())
}

async fn ids_for_str(pool: &SqlitePool, sql: &str, binds: &[&str]) -> TreeResult<Vec<i64>> {
    let mut q = sqlx::query(sql);
    for b in binds {
        q = q.bind(*b);
    }
    let rows = q.fetch_all(pool).await?;
    Ok(rows.into_iter().map(|r| r.get::<i64, _>(0)).collect())
}

/// Direct children of `parent_id`, ordered by `priority`. `parent_id` of
/// `None` means the forest's roots.
pub async fn children<T: TreeEntity>(
    pool: &SqlitePool,
    parent_id: Option<i64>,
    mode: Mode,
) -> TreeResult<QueryResult> {
    let table = T::TABLE;
    let ids = match parent_id {
        Some(pid) => {
            ids_for(
                pool,
                &format!("SELECT id FROM {table} WHERE parent_id = ? ORDER BY priority"),
                &[pid],
            )
            .await?
        }
        None => {
            ids_for(
                pool,
                &format!("SELECT id FROM {table} WHERE parent_id IS NULL ORDER BY priority"),
                &[],
            )
            .await?
        }
    };
    Ok(QueryResult::reduce(ids, mode))
}

/// Other nodes sharing `target`'s parent (or, for a root, other roots).
pub async fn siblings<T: TreeEntity>(
    pool: &SqlitePool,
    target_id: i64,
    target_parent_id: Option<i64>,
    include_self: bool,
    mode: Mode,
) -> TreeResult<QueryResult> {
    let table = T::TABLE;
    let mut ids = match target_parent_id {
        Some(pid) => {
            ids_for(
                pool,
                &format!("SELECT id FROM {table} WHERE parent_id = ? AND id <> ? ORDER BY priority"),
                &[pid, target_id],
            )
            .await?
        }
        None => {
            ids_for(
                pool,
                &format!("SELECT id FROM {table} WHERE parent_id IS NULL AND id <> ? ORDER BY priority"),
                &[target_id],
            )
            .await?
        }
    };
    if include_self {
        ids.push(target_id);
        ids.sort_unstable();
    }
    Ok(QueryResult::reduce(ids, mode))
}

/// Nodes whose `_path` starts with `target_path`, optionally capped at
/// `target_depth + depth`.
pub async fn descendants<T: TreeEntity>(
    pool: &SqlitePool,
    target_id: i64,
    target_path: &str,
    target_depth: i64,
    include_self: bool,
    depth: Option<i64>,
    mode: Mode,
) -> TreeResult<QueryResult> {
    let table = T::TABLE;
    let like_pattern = format!("{target_path}.%");

    let mut sql = format!(
        "SELECT id FROM {table} WHERE _path LIKE ?{}",
        if depth.is_some() { " AND _depth <= ?" } else { "" }
    );
    if include_self {
        sql = format!("SELECT id FROM ({sql} UNION ALL SELECT id FROM {table} WHERE id = ?) ORDER BY id");
    } else {
        sql.push_str(" ORDER BY id");
    }

    let mut q = sqlx::query(&sql).bind(like_pattern);
    if let Some(d) = depth {
        q = q.bind(target_depth + d);
    }
    if include_self {
        q = q.bind(target_id);
    }
    let rows = q.fetch_all(pool).await?;
    let ids = rows.into_iter().map(|r| r.get::<i64, _>(0)).collect();
    Ok(QueryResult::reduce(ids, mode))
}

/// Root-to-immediate-parent chain of `target_id`, via a recursive CTE over
/// `parent_id` (there is no `_path` shortcut here: a materialized path
/// segment doesn't carry enough information to recover ancestor ids, only
/// ancestor depth).
pub async fn ancestors<T: TreeEntity>(
    pool: &SqlitePool,
    target_id: i64,
    include_self: bool,
    mode: Mode,
) -> TreeResult<QueryResult> {
    let table = T::TABLE;
    let sql = format!(
        "WITH RECURSIVE ancestors_cte(id, lvl) AS ( \
             SELECT (SELECT parent_id FROM {table} WHERE id = ?), 1 \
             UNION ALL \
             SELECT p.parent_id, lvl + 1 FROM ancestors_cte a \
             JOIN {table} p ON p.id = a.id \
             WHERE a.id IS NOT NULL \
         ) SELECT id FROM ancestors_cte WHERE id IS NOT NULL ORDER BY lvl DESC"
    );
    let mut ids = ids_for(pool, &sql, &[target_id]).await?;
    if include_self {
        ids.push(target_id);
    }
    Ok(QueryResult::reduce(ids, mode))
}

/// The union of ancestors and descendants (siblings and cousins excluded).
///
/// Composed from the same two queries `ancestors`/`descendants` use rather
/// than a single `_path` range scan: a path-prefix comparison only ever
/// proves "is an ancestor or a descendant", never "is neither" — an earlier
/// sibling's subtree can sort lexicographically before `target_path`
/// without containing a single ancestor of `target_id`, so the real parent
/// chain (via `parent_id`) is still required here, same as in `ancestors`.
pub async fn family<T: TreeEntity>(
    pool: &SqlitePool,
    target_id: i64,
    target_path: &str,
    target_depth: i64,
    include_self: bool,
    max_depth: Option<i64>,
    mode: Mode,
) -> TreeResult<QueryResult> {
    let QueryResult::Ids(ancestor_ids) = ancestors::<T>(pool, target_id, false, Mode::Ids).await? else {
        unreachable!("ancestors() always honors Mode::Ids")
    };
    let QueryResult::Ids(descendant_ids) =
        descendants::<T>(pool, target_id, target_path, target_depth, false, max_depth, Mode::Ids).await?
    else {
        unreachable!("descendants() always honors Mode::Ids")
    };

    let mut ids = ancestor_ids;
    ids.extend(descendant_ids);
    if include_self {
        ids.push(target_id);
    }
    ids.sort_unstable();
    Ok(QueryResult::reduce(ids, mode))
}

/// The root of `target`'s tree: the node whose `_path` equals the first
/// dot-delimited segment of `target_path`.
pub async fn root<T: TreeEntity>(
    pool: &SqlitePool,
    target_path: &str,
    mode: Mode,
) -> TreeResult<QueryResult> {
    let table = T::TABLE;
    let root_segment = target_path.split('.').next().unwrap_or(target_path);
    let ids = ids_for_str(
        pool,
        &format!("SELECT id FROM {table} WHERE _path = ? ORDER BY priority"),
        &[root_segment],
    )
    .await?;
    Ok(QueryResult::reduce(ids, mode))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{memory_pool, TestRow};

    async fn seed(pool: &SqlitePool) {
        sqlx::query(
            "CREATE TABLE widgets (id INTEGER PRIMARY KEY, parent_id INTEGER, priority INTEGER NOT NULL, _path TEXT NOT NULL, _depth INTEGER NOT NULL)",
        )
        .execute(pool)
        .await
        .unwrap();
        let rows: &[(i64, Option<i64>, i64, &str, i64)] = &[
            (1, None, 0, "000", 0),
            (2, Some(1), 0, "000.000", 1),
            (3, Some(1), 1, "000.001", 1),
            (4, Some(2), 0, "000.000.000", 2),
        ];
        for (id, parent, priority, path, depth) in rows {
            sqlx::query("INSERT INTO widgets (id, parent_id, priority, _path, _depth) VALUES (?, ?, ?, ?, ?)")
                .bind(id)
                .bind(parent)
                .bind(priority)
                .bind(*path)
                .bind(depth)
                .execute(pool)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn children_are_ordered_by_priority() {
        let pool = memory_pool().await;
        seed(&pool).await;
        let result = children::<TestRow>(&pool, Some(1), Mode::Ids).await.unwrap();
        assert_eq!(result, QueryResult::Ids(vec![2, 3]));
    }

    #[tokio::test]
    async fn siblings_exclude_self_by_default() {
        let pool = memory_pool().await;
        seed(&pool).await;
        let result = siblings::<TestRow>(&pool, 2, Some(1), false, Mode::Ids).await.unwrap();
        assert_eq!(result, QueryResult::Ids(vec![3]));
    }

    #[tokio::test]
    async fn descendants_match_path_prefix() {
        let pool = memory_pool().await;
        seed(&pool).await;
        let result = descendants::<TestRow>(&pool, 1, "000", 0, false, None, Mode::Ids)
            .await
            .unwrap();
        assert_eq!(result, QueryResult::Ids(vec![2, 3, 4]));
    }

    #[tokio::test]
    async fn ancestors_are_root_first() {
        let pool = memory_pool().await;
        seed(&pool).await;
        let result = ancestors::<TestRow>(&pool, 4, false, Mode::Ids).await.unwrap();
        assert_eq!(result, QueryResult::Ids(vec![1, 2]));
    }

    #[tokio::test]
    async fn root_resolves_from_path_prefix() {
        let pool = memory_pool().await;
        seed(&pool).await;
        let result = root::<TestRow>(&pool, "000.000.000", Mode::Ids).await.unwrap();
        assert_eq!(result, QueryResult::Ids(vec![1]));
    }

    #[tokio::test]
    async fn family_excludes_an_earlier_sibling_with_a_lexicographically_smaller_path() {
        // Regression test: a naive `_path < target_path` range wrongly treats
        // node 2 ("000.000") as an ancestor of node 5 ("000.001.000") just
        // because its path sorts first — it's actually an unrelated uncle
        // subtree. Real ancestors of 5 are only {1, 3}.
        let pool = memory_pool().await;
        seed(&pool).await;
        sqlx::query(
            "INSERT INTO widgets (id, parent_id, priority, _path, _depth) VALUES (5, 3, 0, '000.001.000', 2)",
        )
        .execute(&pool)
        .await
        .unwrap();

        let result = family::<TestRow>(&pool, 5, "000.001.000", 2, false, None, Mode::Ids)
            .await
            .unwrap();
        assert_eq!(result, QueryResult::Ids(vec![1, 3]));
    }

    #[tokio::test]
    async fn family_is_union_of_ancestors_and_descendants() {
        let pool = memory_pool().await;
        seed(&pool).await;
        let result = family::<TestRow>(&pool, 2, "000.000", 1, true, None, Mode::Ids)
            .await
            .unwrap();
        assert_eq!(result, QueryResult::Ids(vec![1, 2, 4]));
    }

    #[tokio::test]
    async fn count_mode_reduces_to_length() {
        let pool = memory_pool().await;
        seed(&pool).await;
        let result = children::<TestRow>(&pool, Some(1), Mode::Count).await.unwrap();
        assert_eq!(result, QueryResult::Count(2));
    }

    #[tokio::test]
    async fn exist_mode_is_false_for_leaf() {
        let pool = memory_pool().await;
        seed(&pool).await;
        let result = children::<TestRow>(&pool, Some(4), Mode::Exist).await.unwrap();
        assert_eq!(result, QueryResult::Exist(false));
    }
}
