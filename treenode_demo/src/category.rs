use sqlx::FromRow;
use treenode_core::{TreeEntity, TreeFields, Value};

/// A product category, the tree type this demo wires up against
/// `TreeRepository`. `name` is the only user-defined column; everything
/// else is the engine's own structural state.
#[derive(Debug, Clone, FromRow)]
pub struct CategoryNode {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub priority: i64,
    pub _path: String,
    pub _depth: i64,
    pub name: String,
}

impl CategoryNode {
    /// A template row for `TreeRepository::add_*`. Structural columns are
    /// filled in by the repository; only `name` survives into the insert.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            id: 0,
            parent_id: None,
            priority: 0,
            _path: String::new(),
            _depth: 0,
            name: name.into(),
        }
    }
}

impl TreeFields for CategoryNode {
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

impl TreeEntity for CategoryNode {
    const TABLE: &'static str = "categories";

    fn extra_columns(&self) -> Vec<(&'static str, Value)> {
        vec![("name", Value::Text(self.name.clone()))]
    }
}
