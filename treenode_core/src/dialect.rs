//! SQL dialect adapter (component A, spec §4.A).
//!
//! Pure-function fragment emission for each vendor tag. `treenode_core`
//! only ships an executor for [`Vendor::Sqlite`] (see `compiler.rs`), but
//! the fragment emitters below are vendor-complete so a host targeting a
//! different backend can reuse them to build its own executor, the way
//! `SQLCompat` in the system this engine is modeled on emits fragments for
//! every vendor but is only ever driven against whichever one connection
//! actually runs.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vendor {
    PostgreSql,
    MySql,
    MariaDb,
    Sqlite,
    MsSql,
    Oracle,
}

/// Fields to rewrite in the terminal `UPDATE` of a rebuild, paired with
/// the raw SQL expression (referencing the CTE) that computes each.
pub struct UpdateField<'a> {
    pub column: &'a str,
    pub cte_expr: &'a str,
}

impl Vendor {
    /// Quote an identifier per the vendor's quoting rule. Callers must
    /// only ever pass identifiers drawn from a compile-time whitelist
    /// (`TreeEntity::TABLE`, or the engine's own fixed column names) —
    /// this function does not itself sanitize against injection.
    pub fn quote_ident(&self, ident: &str) -> String {
        match self {
            Vendor::MySql | Vendor::MariaDb => format!("`{ident}`"),
            Vendor::MsSql => format!("[{ident}]"),
            _ => format!("\"{ident}\""),
        }
    }

    pub fn concat(&self, parts: &[&str]) -> String {
        match self {
            Vendor::MySql | Vendor::MariaDb => format!("CONCAT({})", parts.join(", ")),
            Vendor::MsSql => parts.join(" + "),
            _ => parts.join(" || "),
        }
    }

    pub fn to_hex(&self, expr: &str) -> String {
        match self {
            Vendor::Sqlite => format!("UPPER(printf('%x', {expr}))"),
            Vendor::MySql | Vendor::MariaDb => format!("UPPER(CONV({expr}, 10, 16))"),
            _ => format!("UPPER(TO_HEX({expr}))"),
        }
    }

    pub fn lpad(&self, expr: &str, len: u32, pad: char) -> String {
        match self {
            Vendor::Sqlite => format!("substr('{}' || {expr}, -{len}, {len})", pad.to_string().repeat(len as usize)),
            _ => format!("LPAD({expr}, {len}, '{pad}')"),
        }
    }

    /// Builds the terminal statement(s) that join a recursive CTE named
    /// `cte` back into `table`, rewriting `fields`. `anchor_sql` and
    /// `recursive_sql` are the CTE's two arms; `cte_columns` names every
    /// column the CTE projects (id plus each field's source column).
    ///
    /// Returns one or more statements to run in sequence (SQLite needs a
    /// materialization step first; every other vendor returns exactly one
    /// statement).
    pub fn update_from(
        &self,
        table: &str,
        cte_header: &str,
        anchor_sql: &str,
        recursive_sql: &str,
        fields: &[UpdateField<'_>],
    ) -> Vec<String> {
        let set_clause = fields
            .iter()
            .map(|f| format!("{} = {}", f.column, f.cte_expr))
            .collect::<Vec<_>>()
            .join(", ");

        match self {
            Vendor::PostgreSql => vec![format!(
                "WITH RECURSIVE {cte_header} AS ({anchor_sql} UNION ALL {recursive_sql}) \
                 UPDATE {table} SET {set_clause} FROM tree_cte WHERE {table}.id = tree_cte.id"
            )],
            Vendor::MsSql => vec![format!(
                "WITH {cte_header} AS ({anchor_sql} UNION ALL {recursive_sql}) \
                 UPDATE {table} SET {set_clause} FROM {table} JOIN tree_cte ON {table}.id = tree_cte.id"
            )],
            Vendor::Oracle => vec![format!(
                "MERGE INTO {table} USING (WITH {cte_header} AS ({anchor_sql} UNION ALL {recursive_sql}) SELECT * FROM tree_cte) tree_cte \
                 ON ({table}.id = tree_cte.id) WHEN MATCHED THEN UPDATE SET {set_clause}"
            )],
            Vendor::Sqlite => {
                let select_cols = fields
                    .iter()
                    .map(|f| format!("tree_cte.{}", f.column))
                    .collect::<Vec<_>>()
                    .join(", ");
                let correlated_set = fields
                    .iter()
                    .map(|f| {
                        format!(
                            "{col} = (SELECT {col} FROM tree_cte_tmp WHERE tree_cte_tmp.id = {table}.id)",
                            col = f.column
                        )
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                vec![
                    format!(
                        "CREATE TEMP TABLE tree_cte_tmp AS WITH RECURSIVE {cte_header} AS ({anchor_sql} UNION ALL {recursive_sql}) \
                         SELECT id, {select_cols} FROM tree_cte"
                    ),
                    format!(
                        "UPDATE {table} SET {correlated_set} WHERE id IN (SELECT id FROM tree_cte_tmp)"
                    ),
                    "DROP TABLE tree_cte_tmp".to_string(),
                ]
            }
            Vendor::MySql | Vendor::MariaDb => {
                let correlated_set = fields
                    .iter()
                    .map(|f| {
                        format!(
                            "{col} = (SELECT {col} FROM tree_cte WHERE tree_cte.id = {table}.id)",
                            col = f.column
                        )
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                vec![format!(
                    "WITH RECURSIVE {cte_header} AS ({anchor_sql} UNION ALL {recursive_sql}) \
                     UPDATE {table} SET {correlated_set} WHERE id IN (SELECT id FROM tree_cte)"
                )]
            }
        }
    }
}
