use std::env;

/// Sort direction for sibling ordering during a rebuild (§4.D).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Tunables named in spec §3's "Configurable parameters".
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub segment_length: u32,
    pub segment_base: u32,
    pub cache_limit_bytes: usize,
    pub sort_direction: SortDirection,
}

impl Config {
    /// `BASE = SEGMENT_BASE ** SEGMENT_LENGTH`, the maximum sibling count
    /// per parent (§3, GLOSSARY).
    pub fn base(&self) -> i64 {
        (self.segment_base as i64).pow(self.segment_length)
    }

    pub fn from_env() -> Self {
        let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");

        let segment_length: u32 = env::var("TREENODE_SEGMENT_LENGTH")
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .expect("TREENODE_SEGMENT_LENGTH must be a valid number");

        let cache_limit_mb: usize = env::var("TREENODE_CACHE_LIMIT_MB")
            .unwrap_or_else(|_| "100".to_string())
            .parse()
            .expect("TREENODE_CACHE_LIMIT_MB must be a valid number");

        let sort_direction = match env::var("TREENODE_SORT_DIRECTION")
            .unwrap_or_else(|_| "ASC".to_string())
            .to_uppercase()
            .as_str()
        {
            "DESC" => SortDirection::Desc,
            _ => SortDirection::Asc,
        };

        Self {
            database_url,
            segment_length,
            segment_base: 16,
            cache_limit_bytes: cache_limit_mb * 1024 * 1024,
            sort_direction,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            segment_length: 3,
            segment_base: 16,
            cache_limit_bytes: 100 * 1024 * 1024,
            sort_direction: SortDirection::Asc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_is_segment_base_to_the_segment_length() {
        let config = Config::default();
        assert_eq!(config.base(), 4096);
    }

    #[test]
    fn single_hex_digit_segment_has_base_16() {
        let config = Config {
            segment_length: 1,
            ..Config::default()
        };
        assert_eq!(config.base(), 16);
    }
}
