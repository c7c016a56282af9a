//! Shared SQLite PRAGMA tuning for the views log and ranking tables

use rusqlite::Connection;

/// Apply WAL + relaxed-sync settings suited to an append-heavy log
///
/// Safe to call on every connection open; all PRAGMAs are idempotent.
pub fn apply_optimized_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    // journal_mode answers with the resulting mode
    let _mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "mmap_size", 268_435_456i64)?;
    conn.pragma_update(None, "cache_size", -64_000i64)?;
    conn.pragma_update(None, "wal_autocheckpoint", 1000i64)?;
    Ok(())
}
