//! Node entity API (component F, spec §4.F).
//!
//! Grounded on the source library's node/logical/tree mixins
//! (`models/mixins/{node,logical,tree}.py`). The source renders these as
//! instance methods on the model itself (`node.move_to(target)`); this
//! crate follows the teacher's repository pattern instead — see
//! `storage::CategoryRepository` and its `Sqlite*Repository` impls — and
//! exposes the same operations as `TreeRepository<T>` methods taking a row
//! id rather than `self`. A Rust `TreeFields` is read-only, so placement
//! (`parent_id`, `priority`) is computed by the repository and written
//! directly, instead of being assigned onto a mutable model instance
//! before a save.

use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::bulk::{self, push_value, TreeDumpNode};
use crate::cache::TreeCache;
use crate::config::Config;
use crate::error::{Error, TreeResult};
use crate::position::Position;
use crate::query::{self, Mode, QueryResult};
use crate::queue::TaskQueue;
use crate::schema::{TreeEntity, TreeFields, Value};

fn unwrap_ids(result: QueryResult) -> Vec<i64> {
    match result {
        QueryResult::Ids(ids) => ids,
        _ => unreachable!("caller always asks for Mode::Ids"),
    }
}

pub struct TreeRepository<T: TreeEntity> {
    pool: SqlitePool,
    config: Config,
    queue: TaskQueue<T>,
    cache: TreeCache,
    model_label: String,
    _marker: std::marker::PhantomData<T>,
}

impl<T: TreeEntity> TreeRepository<T> {
    pub fn new(pool: SqlitePool, config: Config, model_label: impl Into<String>) -> Self {
        let cache = TreeCache::new(config.cache_limit_bytes);
        let queue = TaskQueue::new(pool.clone(), config.clone());
        Self {
            pool,
            config,
            queue,
            cache,
            model_label: model_label.into(),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn cache(&self) -> &TreeCache {
        &self.cache
    }

    pub fn queue(&self) -> &TaskQueue<T> {
        &self.queue
    }

    /// Migration-time hook (spec §6): ensures the recommended indexes
    /// exist, then runs a first full rebuild if any row still has an
    /// empty `_path` (a freshly migrated table, or one populated outside
    /// this engine). Idempotent — safe to call on every startup.
    pub async fn ensure_ready(&self) -> TreeResult<()> {
        let table = T::TABLE;
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_parent_priority ON {table} (parent_id, priority)"
        ))
        .execute(&self.pool)
        .await?;
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_depth_priority ON {table} (_depth, priority)"
        ))
        .execute(&self.pool)
        .await?;
        sqlx::query(&format!("CREATE INDEX IF NOT EXISTS idx_{table}_path ON {table} (_path)"))
            .execute(&self.pool)
            .await?;

        let needs_rebuild: bool =
            sqlx::query_scalar(&format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE _path = '')"))
                .fetch_one(&self.pool)
                .await?;
        if needs_rebuild {
            self.queue.add(None).await;
            self.flush().await?;
        }
        Ok(())
    }

    pub async fn get(&self, id: i64) -> TreeResult<T> {
        sqlx::query_as(&format!("SELECT * FROM {} WHERE id = ?", T::TABLE))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(Error::NodeNotFound(id))
    }

    async fn flush(&self) -> TreeResult<()> {
        self.queue.run().await?;
        self.cache.invalidate(&self.model_label).await;
        Ok(())
    }

    /// Flush trigger (b): run the queue — and invalidate the cache — only
    /// if it's actually dirty. Accessors whose result depends on `_path`
    /// or `_depth` call this before reading (spec §4.F); accessors that
    /// only need `parent_id`/`priority` skip it, since those columns are
    /// written directly by `save`/`move_to` and never wait on a rebuild.
    async fn flush_for_read(&self) -> TreeResult<()> {
        if self.queue.is_dirty().await {
            self.flush().await?;
        }
        Ok(())
    }

    /// Memoize a query-layer id list under `"<model_label>|<fn_name>:<id>:<hash>"`
    /// (spec §4.G), falling back to `compute` on a miss or a corrupt entry.
    async fn cached_ids<F>(&self, fn_name: &str, id: i64, hash: u64, compute: F) -> TreeResult<Vec<i64>>
    where
        F: std::future::Future<Output = TreeResult<Vec<i64>>>,
    {
        let key = crate::cache::TreeCache::make_key(&self.model_label, fn_name, id, hash);
        if let Some(bytes) = self.cache.get(&key).await {
            if let Ok(ids) = serde_json::from_slice::<Vec<i64>>(&bytes) {
                return Ok(ids);
            }
        }
        let ids = compute.await?;
        if let Ok(bytes) = serde_json::to_vec(&ids) {
            self.cache.set(key, bytes).await;
        }
        Ok(ids)
    }

    /// Reject a would-be `BASE`-th sibling before any row is written (spec
    /// §7, §8 S6) — `compiler::rebuild` only ever discovers overflow after
    /// the insert has already committed, which is too late.
    async fn check_sibling_capacity(&self, parent_id: Option<i64>) -> TreeResult<()> {
        let table = T::TABLE;
        let count: i64 = match parent_id {
            Some(pid) => {
                sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table} WHERE parent_id = ?"))
                    .bind(pid)
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table} WHERE parent_id IS NULL"))
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        let base = self.config.base();
        if count >= base {
            return Err(Error::SiblingOverflow { base });
        }
        Ok(())
    }

    async fn insert_row(
        &self,
        parent_id: Option<i64>,
        priority: i64,
        extra: Vec<(&'static str, Value)>,
    ) -> TreeResult<i64> {
        let table = T::TABLE;
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("INSERT INTO {table} (parent_id, priority, _path, _depth"));
        for (name, _) in &extra {
            builder.push(", ").push(name);
        }
        builder.push(") VALUES (");
        {
            let mut sep = builder.separated(", ");
            sep.push_bind(parent_id);
            sep.push_bind(priority);
            sep.push_bind("");
            sep.push_bind(0i64);
            for (_, value) in extra {
                push_value(&mut sep, value);
            }
        }
        builder.push(")");
        builder.push(" RETURNING id");
        let id: i64 = builder.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(id)
    }

    // -- creation -----------------------------------------------------

    /// Add `row` as a new root, placed by `position` (only the root-family
    /// variants make sense here; anything else resolves with no parent).
    pub async fn add_root(&self, row: &T, position: Position) -> TreeResult<i64> {
        let base = self.config.base();
        let (parent_id, priority) = crate::position::resolve(position, 0, None, 0, base);
        self.check_sibling_capacity(parent_id).await?;
        let id = self.insert_row(parent_id, priority, row.extra_columns()).await?;
        self.queue.add(parent_id).await;
        self.flush().await?;
        tracing::debug!(table = T::TABLE, id, "added root node");
        Ok(id)
    }

    /// Add `row` as the new last child of `parent_id`.
    pub async fn add_child(&self, parent_id: i64, row: &T) -> TreeResult<i64> {
        let base = self.config.base();
        self.check_sibling_capacity(Some(parent_id)).await?;
        let id = self.insert_row(Some(parent_id), base - 1, row.extra_columns()).await?;
        self.queue.add(Some(parent_id)).await;
        self.flush().await?;
        tracing::debug!(table = T::TABLE, id, parent_id, "added child node");
        Ok(id)
    }

    /// Add `row` as a sibling of `target_id`, placed by `position`.
    pub async fn add_sibling(&self, target_id: i64, row: &T, position: Position) -> TreeResult<i64> {
        let target = self.get(target_id).await?;
        let base = self.config.base();
        let (parent_id, priority) =
            crate::position::resolve(position, target.id(), target.parent_id(), target.priority(), base);
        self.check_sibling_capacity(parent_id).await?;
        let id = self.insert_row(parent_id, priority, row.extra_columns()).await?;
        self.queue.add(parent_id).await;
        self.flush().await?;
        tracing::debug!(table = T::TABLE, id, target_id, "added sibling node");
        Ok(id)
    }

    // -- relocation -----------------------------------------------------

    /// Move `node_id` (with its whole subtree) relative to `target_id`.
    pub async fn move_to(&self, node_id: i64, target_id: i64, position: Position) -> TreeResult<()> {
        let node = self.get(node_id).await?;
        let target = self.get(target_id).await?;

        if target_id == node_id
            || target.path() == node.path()
            || target.path().starts_with(&format!("{}.", node.path()))
        {
            tracing::warn!(table = T::TABLE, node_id, target_id, "rejected cyclic move");
            return Err(Error::CyclicMove);
        }

        let base = self.config.base();
        let (new_parent, new_priority) =
            crate::position::resolve(position, target.id(), target.parent_id(), target.priority(), base);

        sqlx::query(&format!("UPDATE {} SET parent_id = ?, priority = ? WHERE id = ?", T::TABLE))
            .bind(new_parent)
            .bind(new_priority)
            .bind(node_id)
            .execute(&self.pool)
            .await?;

        self.queue.add(node.parent_id()).await;
        self.queue.add(new_parent).await;
        self.flush().await?;
        tracing::debug!(table = T::TABLE, node_id, ?new_parent, new_priority, "moved node");
        Ok(())
    }

    // -- deletion -----------------------------------------------------

    /// Delete `node_id`. `cascade = true` removes the whole subtree;
    /// `cascade = false` reparents its children onto its own parent first.
    pub async fn delete(&self, node_id: i64, cascade: bool) -> TreeResult<()> {
        let node = self.get(node_id).await?;
        if cascade {
            bulk::delete_tree::<T>(&self.pool, node.path(), true).await?;
        } else {
            sqlx::query(&format!("UPDATE {} SET parent_id = ? WHERE parent_id = ?", T::TABLE))
                .bind(node.parent_id())
                .bind(node_id)
                .execute(&self.pool)
                .await?;
            sqlx::query(&format!("DELETE FROM {} WHERE id = ?", T::TABLE))
                .bind(node_id)
                .execute(&self.pool)
                .await?;
        }
        self.queue.add(node.parent_id()).await;
        self.flush().await?;
        tracing::debug!(table = T::TABLE, node_id, cascade, "deleted node");
        Ok(())
    }

    // -- bulk operations (component H, spec §4.H) -----------------------

    /// Insert `rows` in one statement, queue a rebuild for every parent
    /// they landed under, then flush and invalidate the cache.
    pub async fn bulk_create(&self, rows: &[T]) -> TreeResult<Vec<i64>> {
        let ids = bulk::bulk_create(&self.pool, &self.queue, rows).await?;
        self.flush().await?;
        tracing::debug!(table = T::TABLE, count = ids.len(), "bulk create flushed");
        Ok(ids)
    }

    /// Update `rows` by id, queue a rebuild for every touched parent, then
    /// flush and invalidate the cache.
    pub async fn bulk_update(&self, rows: &[T]) -> TreeResult<()> {
        bulk::bulk_update(&self.pool, &self.queue, rows).await?;
        self.flush().await?;
        tracing::debug!(table = T::TABLE, count = rows.len(), "bulk update flushed");
        Ok(())
    }

    /// Import a nested dump (see [`bulk::dump_tree`]), creating rows for
    /// ids not already present and updating the rest, then rebuilding the
    /// whole forest and invalidating the cache.
    pub async fn load_tree(&self, tree: Vec<TreeDumpNode>, build: impl Fn(&TreeDumpNode) -> T) -> TreeResult<()> {
        bulk::load_tree(&self.pool, &self.queue, tree, build).await?;
        self.cache.invalidate(&self.model_label).await;
        tracing::debug!(table = T::TABLE, "load_tree flushed");
        Ok(())
    }

    /// Export the subtree rooted at `id` (or the whole forest, if `None`).
    pub async fn dump_tree(&self, id: Option<i64>) -> TreeResult<Vec<TreeDumpNode>> {
        self.flush_for_read().await?;
        bulk::dump_tree::<T>(&self.pool, id).await
    }

    /// Delete every row of this tree type and invalidate the cache.
    pub async fn delete_forest(&self) -> TreeResult<()> {
        bulk::delete_forest::<T>(&self.pool).await?;
        self.cache.invalidate(&self.model_label).await;
        tracing::debug!(table = T::TABLE, "deleted forest");
        Ok(())
    }

    // -- accessors -----------------------------------------------------

    /// Root-to-immediate-parent chain, via `parent_id` only — no rebuild
    /// needed, since this never reads `_path`/`_depth` (spec §4.F).
    pub async fn ancestors(&self, id: i64, include_self: bool) -> TreeResult<Vec<i64>> {
        self.cached_ids("ancestors", id, include_self as u64, async {
            Ok(unwrap_ids(query::ancestors::<T>(&self.pool, id, include_self, Mode::Ids).await?))
        })
        .await
    }

    pub async fn descendants(&self, id: i64, include_self: bool, depth: Option<i64>) -> TreeResult<Vec<i64>> {
        self.flush_for_read().await?;
        let hash = (include_self as u64) | (depth.map(|d| d as u64 + 1).unwrap_or(0) << 1);
        self.cached_ids("descendants", id, hash, async {
            let node = self.get(id).await?;
            Ok(unwrap_ids(
                query::descendants::<T>(&self.pool, id, node.path(), node.depth(), include_self, depth, Mode::Ids)
                    .await?,
            ))
        })
        .await
    }

    /// Direct children of `parent_id` — `parent_id`/`priority` only, no
    /// rebuild needed.
    pub async fn children(&self, parent_id: Option<i64>) -> TreeResult<Vec<i64>> {
        self.cached_ids("children", parent_id.unwrap_or(-1), 0, async {
            Ok(unwrap_ids(query::children::<T>(&self.pool, parent_id, Mode::Ids).await?))
        })
        .await
    }

    /// Other nodes sharing `id`'s parent — `parent_id`/`priority` only, no
    /// rebuild needed.
    pub async fn siblings(&self, id: i64, include_self: bool) -> TreeResult<Vec<i64>> {
        self.cached_ids("siblings", id, include_self as u64, async {
            let node = self.get(id).await?;
            Ok(unwrap_ids(
                query::siblings::<T>(&self.pool, id, node.parent_id(), include_self, Mode::Ids).await?,
            ))
        })
        .await
    }

    pub async fn family(&self, id: i64, include_self: bool) -> TreeResult<Vec<i64>> {
        self.flush_for_read().await?;
        self.cached_ids("family", id, include_self as u64, async {
            let node = self.get(id).await?;
            Ok(unwrap_ids(
                query::family::<T>(&self.pool, id, node.path(), node.depth(), include_self, None, Mode::Ids)
                    .await?,
            ))
        })
        .await
    }

    pub async fn root(&self, id: i64) -> TreeResult<Vec<i64>> {
        self.flush_for_read().await?;
        self.cached_ids("root", id, 0, async {
            let node = self.get(id).await?;
            Ok(unwrap_ids(query::root::<T>(&self.pool, node.path(), Mode::Ids).await?))
        })
        .await
    }

    pub async fn depth(&self, id: i64) -> TreeResult<i64> {
        self.flush_for_read().await?;
        Ok(self.get(id).await?.depth())
    }

    pub async fn level(&self, id: i64) -> TreeResult<i64> {
        Ok(self.depth(id).await? + 1)
    }

    /// Priority only — no rebuild needed.
    pub async fn index(&self, id: i64) -> TreeResult<i64> {
        Ok(self.get(id).await?.priority())
    }

    /// The ordered `priority` of every node from the root to `id`.
    pub async fn breadcrumbs(&self, id: i64) -> TreeResult<Vec<i64>> {
        let mut priorities = Vec::new();
        for ancestor_id in self.ancestors(id, true).await? {
            priorities.push(self.get(ancestor_id).await?.priority());
        }
        Ok(priorities)
    }

    /// `_path` rendered with a caller-chosen delimiter instead of `.`.
    pub async fn get_path(&self, id: i64, delimiter: &str) -> TreeResult<String> {
        self.flush_for_read().await?;
        let node = self.get(id).await?;
        Ok(node.path().replace('.', delimiter))
    }

    /// Number of edges on the shortest path between `a` and `b`.
    pub async fn distance_to(&self, a: i64, b: i64) -> TreeResult<i64> {
        let path_a = self.ancestors(a, true).await?;
        let path_b = self.ancestors(b, true).await?;
        let mut i = 0;
        for (x, y) in path_a.iter().zip(path_b.iter()) {
            if x != y {
                break;
            }
            i += 1;
        }
        Ok(((path_a.len() - i) + (path_b.len() - i)) as i64)
    }

    /// Ids from `source` up to the lowest common ancestor, then down to
    /// `destination`.
    pub async fn shortest_path(&self, source: i64, destination: i64) -> TreeResult<Vec<i64>> {
        let path_a = self.ancestors(source, true).await?;
        let path_b = self.ancestors(destination, true).await?;
        let mut i = 0;
        for (x, y) in path_a.iter().zip(path_b.iter()) {
            if x != y {
                break;
            }
            i += 1;
        }
        let up: Vec<i64> = path_a[i.saturating_sub(1)..].iter().rev().copied().collect();
        let down: Vec<i64> = path_b[i.saturating_sub(1)..].to_vec();
        let mut result = up;
        result.extend(down.into_iter().skip(1));
        Ok(result)
    }

    /// Clone `id` and its whole subtree under `new_parent_id`, returning
    /// the new root's id. `build` turns a dumped node's extra columns
    /// back into a concrete `T` to insert (see `bulk::load_tree`).
    pub async fn clone_subtree(
        &self,
        id: i64,
        new_parent_id: Option<i64>,
        build: &impl Fn(&TreeDumpNode) -> T,
    ) -> TreeResult<i64> {
        let subtree = bulk::dump_tree::<T>(&self.pool, Some(id)).await?;
        let root = subtree.into_iter().next().ok_or(Error::NodeNotFound(id))?;
        self.clone_node(&root, new_parent_id, build).await
    }

    fn clone_node<'a>(
        &'a self,
        node: &'a TreeDumpNode,
        parent_id: Option<i64>,
        build: &'a impl Fn(&TreeDumpNode) -> T,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = TreeResult<i64>> + 'a>> {
        Box::pin(async move {
            let row = build(node);
            let base = self.config.base();
            let new_id = self.insert_row(parent_id, base - 1, row.extra_columns()).await?;
            for child in &node.children {
                self.clone_node(child, Some(new_id), build).await?;
            }
            self.queue.add(parent_id).await;
            Ok(new_id)
        })
    }

    // -- predicates -----------------------------------------------------

    pub async fn is_root(&self, id: i64) -> TreeResult<bool> {
        Ok(self.get(id).await?.parent_id().is_none())
    }

    pub async fn is_leaf(&self, id: i64) -> TreeResult<bool> {
        match query::children::<T>(&self.pool, Some(id), Mode::Exist).await? {
            QueryResult::Exist(has_children) => Ok(!has_children),
            _ => unreachable!(),
        }
    }

    pub async fn is_ancestor_of(&self, id: i64, target_id: i64) -> TreeResult<bool> {
        Ok(self.ancestors(target_id, false).await?.contains(&id))
    }

    pub async fn is_descendant_of(&self, id: i64, target_id: i64) -> TreeResult<bool> {
        Ok(self.descendants(target_id, false, None).await?.contains(&id))
    }

    pub async fn is_child_of(&self, id: i64, target_id: i64) -> TreeResult<bool> {
        Ok(self.get(id).await?.parent_id() == Some(target_id))
    }

    pub async fn is_parent_of(&self, id: i64, target_id: i64) -> TreeResult<bool> {
        Ok(self.get(target_id).await?.parent_id() == Some(id))
    }

    pub async fn is_sibling_of(&self, id: i64, target_id: i64) -> TreeResult<bool> {
        let a = self.get(id).await?;
        let b = self.get(target_id).await?;
        Ok(a.parent_id() == b.parent_id())
    }

    pub async fn is_root_of(&self, id: i64, target_id: i64) -> TreeResult<bool> {
        Ok(self.ancestors(target_id, true).await?.first() == Some(&id))
    }

    pub async fn is_first_child(&self, id: i64) -> TreeResult<bool> {
        Ok(self.get(id).await?.priority() == 0)
    }

    pub async fn is_last_child(&self, id: i64) -> TreeResult<bool> {
        let siblings = self.siblings(id, true).await?;
        Ok(siblings.last() == Some(&id))
    }
}
