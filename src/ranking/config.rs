//! Runtime configuration from environment variables

use super::sqlite_source::DEFAULT_PAGE_SIZE;
use super::window::{DEFAULT_WINDOW_SECS, MAX_WINDOW_SECS};
use std::env;

/// Configuration loaded from environment variables
///
/// | Variable | Default |
/// |---|---|
/// | `BOOST_RANKING_DB_PATH` | `data/boost_ranking.db` |
/// | `BOOST_RANKING_SCHEMA_DIR` | `sql` |
/// | `RANKING_WINDOW_SECS` | `3600` (at most 30 days) |
/// | `RANKING_CYCLE_INTERVAL_MS` | `5000` |
/// | `VIEWS_PAGE_SIZE` | `2500` |
/// | `RANKING_SNAPSHOT_PATH` | `data/ranking_window.json` (empty disables) |
#[derive(Debug, Clone, PartialEq)]
pub struct RankingConfig {
    pub db_path: String,
    pub schema_dir: String,
    pub window_secs: i64,
    pub cycle_interval_ms: u64,
    pub page_size: usize,
    pub snapshot_path: Option<String>,
}

impl RankingConfig {
    /// Load configuration from environment variables
    ///
    /// Unset or unparseable numeric values fall back to their defaults.
    pub fn from_env() -> Self {
        let db_path = env::var("BOOST_RANKING_DB_PATH").unwrap_or_else(|_| "data/boost_ranking.db".to_string());

        let schema_dir = env::var("BOOST_RANKING_SCHEMA_DIR").unwrap_or_else(|_| "sql".to_string());

        let window_secs = env::var("RANKING_WINDOW_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|secs: &i64| (1..=MAX_WINDOW_SECS).contains(secs))
            .unwrap_or(DEFAULT_WINDOW_SECS);

        let cycle_interval_ms = env::var("RANKING_CYCLE_INTERVAL_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|ms: &u64| *ms > 0)
            .unwrap_or(5000);

        let page_size = env::var("VIEWS_PAGE_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|size: &usize| *size > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE);

        let snapshot_path = match env::var("RANKING_SNAPSHOT_PATH") {
            Ok(path) if path.trim().is_empty() => None,
            Ok(path) => Some(path),
            Err(_) => Some("data/ranking_window.json".to_string()),
        };

        Self {
            db_path,
            schema_dir,
            window_secs,
            cycle_interval_ms,
            page_size,
            snapshot_path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VARS: [&str; 6] = [
        "BOOST_RANKING_DB_PATH",
        "BOOST_RANKING_SCHEMA_DIR",
        "RANKING_WINDOW_SECS",
        "RANKING_CYCLE_INTERVAL_MS",
        "VIEWS_PAGE_SIZE",
        "RANKING_SNAPSHOT_PATH",
    ];

    // Single test so parallel test threads never race on the environment
    #[test]
    fn test_config_from_env() {
        for var in VARS {
            env::remove_var(var);
        }

        let config = RankingConfig::from_env();
        assert_eq!(config.db_path, "data/boost_ranking.db");
        assert_eq!(config.schema_dir, "sql");
        assert_eq!(config.window_secs, 3600);
        assert_eq!(config.cycle_interval_ms, 5000);
        assert_eq!(config.page_size, 2500);
        assert_eq!(config.snapshot_path.as_deref(), Some("data/ranking_window.json"));

        env::set_var("BOOST_RANKING_DB_PATH", "/tmp/ranks.db");
        env::set_var("RANKING_WINDOW_SECS", "600");
        env::set_var("RANKING_CYCLE_INTERVAL_MS", "250");
        env::set_var("VIEWS_PAGE_SIZE", "not-a-number");
        env::set_var("RANKING_SNAPSHOT_PATH", "");

        let config = RankingConfig::from_env();
        assert_eq!(config.db_path, "/tmp/ranks.db");
        assert_eq!(config.window_secs, 600);
        assert_eq!(config.cycle_interval_ms, 250);
        assert_eq!(config.page_size, 2500);
        assert_eq!(config.snapshot_path, None);

        // Windows longer than 30 days fall back to the default
        env::set_var("RANKING_WINDOW_SECS", "9223372036854775807");
        assert_eq!(RankingConfig::from_env().window_secs, 3600);
        env::set_var("RANKING_WINDOW_SECS", "2592000");
        assert_eq!(RankingConfig::from_env().window_secs, 2_592_000);

        for var in VARS {
            env::remove_var(var);
        }
    }
}
