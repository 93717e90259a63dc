//! Symbolic position grammar for move/add operations (spec §6).
//!
//! Grounded directly on the source library's `_get_place` classmethod
//! (`models/mixins/node.py`), which maps each symbolic position to a
//! `(parent, priority)` pair before a save.

use crate::error::{Error, TreeResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    FirstRoot,
    LastRoot,
    SortedRoot,
    FirstSibling,
    LeftSibling,
    RightSibling,
    LastSibling,
    SortedSibling,
    FirstChild,
    LastChild,
    SortedChild,
    /// A caller-supplied priority relative to `target`'s own parent.
    Priority(i64),
}

impl Position {
    pub fn parse(s: &str) -> TreeResult<Self> {
        Ok(match s {
            "first-root" => Position::FirstRoot,
            "last-root" => Position::LastRoot,
            "sorted-root" => Position::SortedRoot,
            "first-sibling" => Position::FirstSibling,
            "left-sibling" => Position::LeftSibling,
            "right-sibling" => Position::RightSibling,
            "last-sibling" => Position::LastSibling,
            "sorted-sibling" => Position::SortedSibling,
            "first-child" => Position::FirstChild,
            "last-child" => Position::LastChild,
            "sorted-child" => Position::SortedChild,
            other => {
                if let Ok(n) = other.parse::<i64>() {
                    Position::Priority(n)
                } else {
                    return Err(Error::UnknownPosition(other.to_string()));
                }
            }
        })
    }
}

/// Resolves a [`Position`] against a `target` node (id, parent_id,
/// priority) into `(new_parent_id, new_priority)`.
///
/// `sorted-*` positions have no independent sort field in this engine
/// (`SORTING_FIELD` is fixed to `priority` — see `SPEC_FULL.md` §9, Open
/// Question 2) and are therefore resolved identically to their `last-*`
/// counterpart: the rebuilder renumbers densely regardless, so "sorted"
/// and "last" both just mean "append, then let the rebuild place it".
pub fn resolve(
    position: Position,
    target_id: i64,
    target_parent_id: Option<i64>,
    target_priority: i64,
    base: i64,
) -> (Option<i64>, i64) {
    match position {
        Position::FirstRoot => (None, 0),
        Position::LastRoot | Position::SortedRoot => (None, base - 1),
        Position::FirstSibling => (target_parent_id, 0),
        Position::LeftSibling => (target_parent_id, target_priority),
        Position::RightSibling => (target_parent_id, target_priority + 1),
        Position::LastSibling | Position::SortedSibling => (target_parent_id, base - 1),
        Position::FirstChild => (Some(target_id), 0),
        Position::LastChild | Position::SortedChild => (Some(target_id), base - 1),
        Position::Priority(n) => (target_parent_id, n),
    }
}
