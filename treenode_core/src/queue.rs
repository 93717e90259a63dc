//! Deferred rebuild task queue (component E, spec §4.E).
//!
//! The coalescing algorithm (`optimize`, `common_ancestor`,
//! `ancestor_path`) is grounded directly on the source library's
//! `TreeTaskQueue._optimize` / `_get_common_ancestor` / `_get_ancestor_path`
//! (`managers/tasks.py`). SQLite has neither row locks nor `FOR UPDATE
//! NOWAIT`; `run()` substitutes `BEGIN IMMEDIATE`, which fails immediately
//! with `SQLITE_BUSY` instead of queuing behind another writer — the
//! closest available analogue (spec §9 design note).

use sqlx::{Row, SqlitePool};
use std::marker::PhantomData;
use tokio::sync::Mutex;

use crate::compiler;
use crate::config::{Config, SortDirection};
use crate::error::TreeResult;
use crate::schema::TreeEntity;

/// A pending rebuild task. `None` means "rebuild the whole forest".
type Task = Option<i64>;

pub struct TaskQueue<T: TreeEntity> {
    pool: SqlitePool,
    config: Config,
    pending: Mutex<Vec<Task>>,
    _marker: PhantomData<T>,
}

impl<T: TreeEntity> TaskQueue<T> {
    pub fn new(pool: SqlitePool, config: Config) -> Self {
        Self {
            pool,
            config,
            pending: Mutex::new(Vec::new()),
            _marker: PhantomData,
        }
    }

    pub async fn add(&self, parent_id: Task) {
        self.pending.lock().await.push(parent_id);
    }

    pub async fn is_dirty(&self) -> bool {
        !self.pending.lock().await.is_empty()
    }

    /// Flush trigger (a): explicit run. Coalesces the queue, acquires a
    /// write lock, and rebuilds each surviving task. Returns without
    /// error if the lock can't be acquired immediately — another writer
    /// owns the database file right now and will leave it consistent.
    pub async fn run(&self) -> TreeResult<()> {
        let drained: Vec<Task> = {
            let mut guard = self.pending.lock().await;
            std::mem::take(&mut *guard)
        };
        if drained.is_empty() {
            return Ok(());
        }

        let tasks = self.optimize(drained).await?;

        let mut conn = match self.pool.acquire().await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "failed to acquire connection for rebuild");
                return Ok(());
            }
        };

        if let Err(e) = sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await {
            tracing::warn!(error = %e, "rebuild lock unavailable, skipping (another writer owns this table)");
            return Ok(());
        }

        for parent_id in tasks {
            if let Err(e) = compiler::rebuild::<T>(
                &mut conn,
                parent_id,
                self.config.segment_length,
                self.config.base(),
                self.config.sort_direction,
            )
            .await
            {
                tracing::warn!(error = %e, "rebuild failed, rolling back");
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                return Err(e);
            }
        }

        sqlx::query("COMMIT").execute(&mut *conn).await?;
        Ok(())
    }

    /// Reduce a set of pending tasks to the minimal covering set.
    async fn optimize(&self, tasks: Vec<Task>) -> TreeResult<Vec<Task>> {
        if tasks.iter().any(|t| t.is_none()) {
            return Ok(vec![None]);
        }

        let mut id_list: Vec<i64> = tasks.into_iter().flatten().collect();
        let mut id_set: std::collections::HashSet<i64> = id_list.iter().copied().collect();
        let root_ids: std::collections::HashSet<i64> = self.root_ids().await?.into_iter().collect();
        let mut result: Vec<i64> = Vec::new();

        'outer: while let Some(current) = id_list.pop() {
            for i in 0..id_list.len() {
                let other = id_list[i];
                match self.common_ancestor(current, other).await? {
                    Some(ancestor) => {
                        if root_ids.contains(&ancestor) {
                            return Ok(vec![None]);
                        }
                        if !id_set.contains(&ancestor) {
                            id_set.insert(ancestor);
                            id_list.push(ancestor);
                        }
                        id_list.remove(i);
                        continue 'outer;
                    }
                    None => {
                        // `current` and `other` sit under disjoint roots
                        // (separate trees in the same table) — there is no
                        // single subtree the rebuilder could target for
                        // both, so the whole forest is queued instead.
                        return Ok(vec![None]);
                    }
                }
            }
            result.push(current);
        }

        result.sort_unstable();
        result.dedup();
        Ok(result.into_iter().map(Some).collect())
    }

    async fn root_ids(&self) -> TreeResult<Vec<i64>> {
        let table = T::TABLE;
        let rows = sqlx::query(&format!("SELECT id FROM {table} WHERE parent_id IS NULL"))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.get::<i64, _>(0)).collect())
    }

    /// Root-first ancestor chain of `id`, including `id` itself.
    async fn ancestor_path(&self, id: i64) -> TreeResult<Vec<i64>> {
        let table = T::TABLE;
        let rows = sqlx::query(&format!(
            "WITH RECURSIVE ancestor_cte(id, depth) AS ( \
                 SELECT id, 0 FROM {table} WHERE id = ? \
                 UNION ALL \
                 SELECT t.id, a.depth + 1 FROM {table} t JOIN ancestor_cte a ON t.id = ( \
                     SELECT parent_id FROM {table} WHERE id = a.id \
                 ) \
             ) SELECT id FROM ancestor_cte ORDER BY depth DESC"
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.get::<i64, _>(0)).collect())
    }

    /// Lowest common ancestor of `a` and `b`, or `None` if they share no
    /// ancestor (distinct trees).
    async fn common_ancestor(&self, a: i64, b: i64) -> TreeResult<Option<i64>> {
        let path_a = self.ancestor_path(a).await?;
        let path_b = self.ancestor_path(b).await?;
        let mut lca = None;
        for (x, y) in path_a.iter().zip(path_b.iter()) {
            if x == y {
                lca = Some(*x);
            } else {
                break;
            }
        }
        Ok(lca)
    }
}

impl<T: TreeEntity> Drop for TaskQueue<T> {
    /// Process-exit-style flush trigger (c). `Drop` can't await, so this
    /// only logs what would have been flushed; hosts that need a
    /// guaranteed final rebuild should call `run()` explicitly before the
    /// repository goes out of scope.
    fn drop(&mut self) {
        if let Ok(guard) = self.pending.try_lock() {
            if !guard.is_empty() {
                tracing::warn!(
                    table = T::TABLE,
                    pending = guard.len(),
                    "task queue dropped with unflushed rebuilds"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{memory_pool, TestRow};

    async fn seed(pool: &SqlitePool) {
        sqlx::query("CREATE TABLE widgets (id INTEGER PRIMARY KEY, parent_id INTEGER, priority INTEGER NOT NULL, _path TEXT NOT NULL DEFAULT '', _depth INTEGER NOT NULL DEFAULT 0)")
            .execute(pool)
            .await
            .unwrap();
    }

    async fn insert(pool: &SqlitePool, id: i64, parent: Option<i64>, priority: i64) {
        sqlx::query("INSERT INTO widgets (id, parent_id, priority) VALUES (?, ?, ?)")
            .bind(id)
            .bind(parent)
            .bind(priority)
            .execute(pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn coalesce_siblings_to_shared_parent() {
        let pool = memory_pool().await;
        seed(&pool).await;
        insert(&pool, 1, None, 0); // root
        insert(&pool, 2, Some(1), 0); // P, a non-root parent
        insert(&pool, 3, Some(2), 0); // X
        insert(&pool, 4, Some(2), 1); // Y

        let queue = TaskQueue::<TestRow>::new(pool, Config::default());
        let result = queue.optimize(vec![Some(3), Some(4)]).await.unwrap();
        assert_eq!(result, vec![Some(2)]);
    }

    #[tokio::test]
    async fn coalesce_across_roots_collapses_to_full_rebuild() {
        let pool = memory_pool().await;
        seed(&pool).await;
        insert(&pool, 1, None, 0); // root A
        insert(&pool, 2, None, 1); // root B
        insert(&pool, 3, Some(1), 0); // X under A
        insert(&pool, 4, Some(2), 0); // Y under B

        let queue = TaskQueue::<TestRow>::new(pool, Config::default());
        let result = queue.optimize(vec![Some(3), Some(4)]).await.unwrap();
        assert_eq!(result, vec![None]);
    }

    #[tokio::test]
    async fn any_null_task_collapses_queue() {
        let pool = memory_pool().await;
        seed(&pool).await;
        let queue = TaskQueue::<TestRow>::new(pool, Config::default());
        let result = queue.optimize(vec![Some(1), None]).await.unwrap();
        assert_eq!(result, vec![None]);
    }
}
