//! Numbered SQL migration scripts, applied in order and recorded in
//! `schema_migrations` so each one runs at most once per database file.

use rusqlite::Connection;

/// `(version, filename, sql)` in ascending version order. The embedding
/// mechanics (reading these as `include_str!` literals) are not part of the
/// spec's scope; only the numbered-script-plus-ledger contract is.
const MIGRATIONS: &[(u32, &str, &str)] = &[
    (1, "0001_applied_config.sql", include_str!("0001_applied_config.sql")),
    (2, "0002_turn_log.sql", include_str!("0002_turn_log.sql")),
    (3, "0003_approvals.sql", include_str!("0003_approvals.sql")),
    (4, "0004_portfolio.sql", include_str!("0004_portfolio.sql")),
    (5, "0005_analysis_runs.sql", include_str!("0005_analysis_runs.sql")),
    (6, "0006_matrix_sync_state.sql", include_str!("0006_matrix_sync_state.sql")),
];

pub fn run(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL
        );",
    )?;

    for (version, name, sql) in MIGRATIONS {
        let already: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM schema_migrations WHERE version = ?1)",
            [version],
            |row| row.get(0),
        )?;
        if already {
            continue;
        }
        tracing::info!(version, name, "applying migration");
        conn.execute_batch(sql)?;
        conn.execute(
            "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![version, name, chrono::Utc::now().to_rfc3339()],
        )?;
    }

    Ok(())
}
