//! SQLite boost repository and schema migration loader

use super::repository::{BoostRepository, RepositoryError};
use super::types::{Audience, BoostRanking, BoostShareRatio, BoostTargetLocation};
use crate::sqlite_pragma::apply_optimized_pragmas;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Run schema migrations from SQL files
///
/// Reads every `.sql` file in `schema_dir` in file-name order (`01_`, `02_`,
/// ...) and executes it. Files must use `IF NOT EXISTS` so reruns are no-ops.
///
/// Example:
/// ```no_run
/// # use boostrank::ranking::db::run_schema_migrations;
/// let mut conn = rusqlite::Connection::open("boost_ranking.db")?;
/// run_schema_migrations(&mut conn, "sql")?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn run_schema_migrations(conn: &mut Connection, schema_dir: &str) -> Result<(), Box<dyn std::error::Error>> {
    let schema_path = Path::new(schema_dir);

    if !schema_path.exists() {
        return Err(format!("Schema directory not found: {}", schema_dir).into());
    }

    apply_optimized_pragmas(conn)?;

    let mut sql_files: Vec<_> = fs::read_dir(schema_path)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().and_then(|s| s.to_str()) == Some("sql"))
        .collect();

    sql_files.sort_by_key(|entry| entry.file_name());

    log::info!("🔧 Running schema migrations from: {}", schema_dir);

    for entry in sql_files {
        let path = entry.path();
        let filename = entry.file_name().to_string_lossy().into_owned();

        log::info!("   ├─ Executing: {}", filename);
        let sql_content = fs::read_to_string(&path)?;
        conn.execute_batch(&sql_content)?;
        log::info!("   └─ ✅ Success: {}", filename);
    }

    log::info!("✅ All schema migrations completed successfully");
    Ok(())
}

/// Share ratios are derived from daily bids among active boosts:
/// - open share: bid / sum of bids at the same location
/// - safe share: bid / sum of safe bids at the same location (safe boosts only)
const ACTIVE_SHARES_SQL: &str = r#"
    SELECT guid, target_location, safe_for_all, daily_bid, 1 AS active,
           SUM(daily_bid) OVER (PARTITION BY target_location) AS open_pool,
           SUM(CASE WHEN safe_for_all = 1 THEN daily_bid ELSE 0 END)
               OVER (PARTITION BY target_location) AS safe_pool
    FROM boosts
    WHERE active = 1
    ORDER BY guid
"#;

const SHARE_BY_GUID_SQL: &str = r#"
    SELECT b.guid, b.target_location, b.safe_for_all, b.daily_bid, b.active,
           (SELECT COALESCE(SUM(o.daily_bid), 0) FROM boosts o
             WHERE o.active = 1 AND o.target_location = b.target_location) AS open_pool,
           (SELECT COALESCE(SUM(s.daily_bid), 0) FROM boosts s
             WHERE s.active = 1 AND s.safe_for_all = 1 AND s.target_location = b.target_location) AS safe_pool
    FROM boosts b
    WHERE b.guid = ?1
"#;

/// Boost repository on the `boosts` and `boost_rankings` tables
#[derive(Clone)]
pub struct SqliteBoostRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBoostRepository {
    /// Open the repository at `db_path`
    ///
    /// Does NOT create the schema; run the migrations in `sql/` first.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, RepositoryError> {
        let conn = Connection::open(db_path)?;
        apply_optimized_pragmas(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, RepositoryError> {
        self.conn
            .lock()
            .map_err(|_| RepositoryError::Unavailable("connection mutex poisoned".to_string()))
    }

    /// Insert or update a boost row (used by seeding tools and tests)
    pub fn upsert_boost(
        &self,
        guid: &str,
        target_location: BoostTargetLocation,
        safe_for_all: bool,
        daily_bid: f64,
        active: bool,
    ) -> Result<(), RepositoryError> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO boosts (guid, target_location, safe_for_all, daily_bid, active, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(guid) DO UPDATE SET
                target_location = excluded.target_location,
                safe_for_all = excluded.safe_for_all,
                daily_bid = excluded.daily_bid,
                active = excluded.active
            "#,
            params![
                guid,
                target_location.as_str(),
                safe_for_all,
                daily_bid,
                active,
                chrono::Utc::now().timestamp(),
            ],
        )?;
        Ok(())
    }

    /// Latest stored ranking for a boost
    pub fn get_boost_ranking(&self, guid: &str) -> Result<Option<BoostRanking>, RepositoryError> {
        let conn = self.lock()?;
        let ranks_json: Option<String> = conn
            .query_row(
                "SELECT ranks_json FROM boost_rankings WHERE guid = ?1",
                [guid],
                |row| row.get(0),
            )
            .optional()?;

        let Some(ranks_json) = ranks_json else {
            return Ok(None);
        };

        let ranks: BTreeMap<String, f64> = serde_json::from_str(&ranks_json)?;
        let mut ranking = BoostRanking::new(guid);
        for (audience, rank) in ranks {
            let audience = Audience::from_str(&audience)
                .ok_or_else(|| RepositoryError::InvalidRow(format!("unknown audience '{}'", audience)))?;
            ranking.set_rank(audience, rank);
        }
        Ok(Some(ranking))
    }
}

struct ShareRow {
    guid: String,
    target_location: String,
    safe_for_all: bool,
    daily_bid: f64,
    active: bool,
    open_pool: f64,
    safe_pool: f64,
}

impl ShareRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            guid: row.get(0)?,
            target_location: row.get(1)?,
            safe_for_all: row.get(2)?,
            daily_bid: row.get(3)?,
            active: row.get(4)?,
            open_pool: row.get(5)?,
            safe_pool: row.get(6)?,
        })
    }

    fn into_share_ratio(self) -> Result<BoostShareRatio, RepositoryError> {
        let location = BoostTargetLocation::from_str(&self.target_location).ok_or_else(|| {
            RepositoryError::InvalidRow(format!(
                "boost {} has unknown target location '{}'",
                self.guid, self.target_location
            ))
        })?;

        // Inactive boosts are resolvable but entitled to nothing
        let share = |pool: f64| {
            if self.active && pool > 0.0 {
                self.daily_bid / pool
            } else {
                0.0
            }
        };

        let mut ratio = BoostShareRatio::new(self.guid.clone(), location, self.safe_for_all)
            .with_share(Audience::Open, share(self.open_pool));
        if self.safe_for_all {
            ratio = ratio.with_share(Audience::Safe, share(self.safe_pool));
        }
        Ok(ratio)
    }
}

impl BoostRepository for SqliteBoostRepository {
    fn get_active_boost_share_ratios(&self) -> Result<Vec<BoostShareRatio>, RepositoryError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(ACTIVE_SHARES_SQL)?;
        let rows = stmt.query_map([], ShareRow::from_row)?;

        let mut boosts = Vec::new();
        for row in rows {
            boosts.push(row?.into_share_ratio()?);
        }
        Ok(boosts)
    }

    fn get_boost_share_ratio_by_guid(&self, boost_id: &str) -> Result<Option<BoostShareRatio>, RepositoryError> {
        let conn = self.lock()?;
        let row = conn
            .prepare_cached(SHARE_BY_GUID_SQL)?
            .query_row([boost_id], ShareRow::from_row)
            .optional()?;

        row.map(ShareRow::into_share_ratio).transpose()
    }

    /// UPSERT into `boost_rankings`
    ///
    /// `rank_open` and `rank_safe` are NULL when the boost does not compete in
    /// that audience; `ranks_json` carries every audience rank by name.
    fn add_boost_ranking(&self, ranking: &BoostRanking) -> Result<(), RepositoryError> {
        let ranks: BTreeMap<&str, f64> = Audience::all()
            .into_iter()
            .filter_map(|audience| ranking.rank(audience).map(|rank| (audience.as_str(), rank)))
            .collect();
        let ranks_json = serde_json::to_string(&ranks)?;

        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO boost_rankings (guid, rank_open, rank_safe, ranks_json, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(guid) DO UPDATE SET
                rank_open = excluded.rank_open,
                rank_safe = excluded.rank_safe,
                ranks_json = excluded.ranks_json,
                updated_at = excluded.updated_at
            "#,
            params![
                ranking.boost_id,
                ranking.rank(Audience::Open),
                ranking.rank(Audience::Safe),
                ranks_json,
                chrono::Utc::now().timestamp(),
            ],
        )?;
        Ok(())
    }
}
