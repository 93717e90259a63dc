//! Materialized-path codec (component B, spec §4.B).

use crate::error::{Error, TreeResult};

/// Uppercase hex, left-padded to `segment_length`. Fails when `priority`
/// is outside `[0, BASE-1]`.
pub fn encode(priority: i64, segment_length: u32, base: i64) -> TreeResult<String> {
    if priority < 0 || priority >= base {
        return Err(Error::InvalidPriority {
            priority,
            max: base - 1,
        });
    }
    Ok(format!(
        "{:0width$X}",
        priority,
        width = segment_length as usize
    ))
}

/// `generate(parent_path, priority)`: returns the encoded segment alone
/// when `parent_path` is empty, otherwise appends it with a `.`.
pub fn generate(parent_path: &str, priority: i64, segment_length: u32, base: i64) -> TreeResult<String> {
    let segment = encode(priority, segment_length, base)?;
    if parent_path.is_empty() {
        Ok(segment)
    } else {
        Ok(format!("{parent_path}.{segment}"))
    }
}

/// Number of `.` characters in `path` — the row's `_depth`.
pub fn depth(path: &str) -> i64 {
    path.matches('.').count() as i64
}

/// True iff `b == a` or `b` starts with `a + "."`.
pub fn is_ancestor_path(a: &str, b: &str) -> bool {
    b == a || b.starts_with(&format!("{a}."))
}

/// The first dot-delimited segment of `path` — the path of the tree's root.
pub fn root_segment(path: &str) -> &str {
    path.split('.').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_pads_to_segment_length() {
        assert_eq!(encode(10, 3, 4096).unwrap(), "00A");
        assert_eq!(encode(0, 3, 4096).unwrap(), "000");
    }

    #[test]
    fn encode_rejects_out_of_range_priority() {
        assert!(encode(4096, 3, 4096).is_err());
        assert!(encode(-1, 3, 4096).is_err());
    }

    #[test]
    fn generate_roots_have_no_dot() {
        assert_eq!(generate("", 0, 3, 4096).unwrap(), "000");
        assert_eq!(generate("000", 4, 3, 4096).unwrap(), "000.004");
    }

    #[test]
    fn depth_counts_dots() {
        assert_eq!(depth("000"), 0);
        assert_eq!(depth("000.001.00A"), 2);
    }

    #[test]
    fn is_ancestor_path_matches_self_and_prefix() {
        assert!(is_ancestor_path("000", "000"));
        assert!(is_ancestor_path("000", "000.001"));
        assert!(!is_ancestor_path("000", "0001"));
        assert!(!is_ancestor_path("000", "001"));
    }

    #[test]
    fn root_segment_is_first_component() {
        assert_eq!(root_segment("000.001.00A"), "000");
        assert_eq!(root_segment("000"), "000");
    }
}
