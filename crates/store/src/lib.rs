//! `sa-store` — the durable store.
//!
//! Single SQLite connection, write-ahead journaling, numbered migrations,
//! narrow transactional operations. All writes go through this crate; no
//! other component touches the database file directly.

pub mod models;
mod migrations;

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

use models::*;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("store task join: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("not found: {0}")]
    NotFound(String),
}

impl From<StoreError> for sa_domain::Error {
    fn from(e: StoreError) -> Self {
        sa_domain::Error::Other(format!("store: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// The durable store. Cheaply cloneable; all clones share one connection
/// behind a mutex, matching the spec's "single connection, rely on the
/// database's own locking" discipline.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (creating if absent) the SQLite file at `path`, configure WAL +
    /// foreign keys + a busy timeout, and run any pending migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let conn = Connection::open(&path)?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            conn.busy_timeout(std::time::Duration::from_secs(5))?;
            migrations::run(&conn)?;
            Ok(conn)
        })
        .await??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store, for tests.
    pub async fn open_in_memory() -> Result<Self> {
        let conn = tokio::task::spawn_blocking(|| -> Result<Connection> {
            let conn = Connection::open_in_memory()?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            migrations::run(&conn)?;
            Ok(conn)
        })
        .await??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.blocking_lock();
            f(&guard)
        })
        .await?
    }

    // ── Applied config ──────────────────────────────────────────────

    pub async fn upsert_applied_config(&self, hash: String, yaml_blob: String) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO applied_config (id, hash, yaml_blob, applied_at)
                 VALUES (1, ?1, ?2, ?3)
                 ON CONFLICT (id) DO UPDATE SET hash = excluded.hash,
                     yaml_blob = excluded.yaml_blob, applied_at = excluded.applied_at",
                params![hash, yaml_blob, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn load_applied_config(&self) -> Result<Option<AppliedConfigRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT hash, yaml_blob, applied_at FROM applied_config WHERE id = 1",
                    [],
                    |row| {
                        Ok(AppliedConfigRow {
                            hash: row.get(0)?,
                            yaml_blob: row.get(1)?,
                            applied_at: row.get(2)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
        .await
    }

    // ── Turn log ─────────────────────────────────────────────────────

    pub async fn insert_turn(&self, turn: NewTurn) -> Result<i64> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO turn_log
                    (trace_id, room_id, sender_mxid, message, started_at, trigger, gateway_name, event_type)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    turn.trace_id,
                    turn.room_id,
                    turn.sender_mxid,
                    turn.message,
                    Utc::now().to_rfc3339(),
                    turn.trigger.as_str(),
                    turn.gateway_name,
                    turn.event_type,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn finalize_turn(
        &self,
        id: i64,
        tool_calls: i64,
        result: TurnResult,
        error_msg: Option<String>,
    ) -> Result<()> {
        self.with_conn(move |conn| {
            let started_at: String =
                conn.query_row("SELECT started_at FROM turn_log WHERE id = ?1", [id], |row| row.get(0))?;
            let started = chrono::DateTime::parse_from_rfc3339(&started_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now());
            let finished = Utc::now();
            let duration_ms = (finished - started).num_milliseconds().max(0);

            conn.execute(
                "UPDATE turn_log SET tool_calls = ?1, result = ?2, error_msg = ?3,
                    finished_at = ?4, duration_ms = ?5 WHERE id = ?6",
                params![
                    tool_calls,
                    result.as_str(),
                    error_msg,
                    finished.to_rfc3339(),
                    duration_ms,
                    id
                ],
            )?;
            Ok(())
        })
        .await
    }

    // ── Approvals ────────────────────────────────────────────────────

    pub async fn insert_approval(&self, approval: NewApproval) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO approvals
                    (approval_id, trace_id, room_id, action, target, params_json,
                     status, requestor, expires_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, ?8, ?9)",
                params![
                    approval.approval_id,
                    approval.trace_id,
                    approval.room_id,
                    approval.action,
                    approval.target,
                    approval.params_json,
                    approval.requestor,
                    approval.expires_at,
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Read an approval's current status, lazily transitioning `pending`
    /// rows whose deadline has passed to `expired` first.
    pub async fn get_approval(&self, approval_id: &str) -> Result<Option<ApprovalRecord>> {
        let approval_id = approval_id.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT approval_id, trace_id, room_id, action, target, params_json,
                            status, requestor, expires_at, created_at, decided_at,
                            decided_by, decision_reason
                     FROM approvals WHERE approval_id = ?1",
                    [&approval_id],
                    map_approval_row,
                )
                .optional()?;

            let Some(mut record) = row else {
                return Ok(None);
            };

            if record.status == "pending" {
                let expires = chrono::DateTime::parse_from_rfc3339(&record.expires_at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now());
                if expires <= Utc::now() {
                    conn.execute(
                        "UPDATE approvals SET status = 'expired' WHERE approval_id = ?1",
                        [&approval_id],
                    )?;
                    record.status = "expired".into();
                }
            }

            Ok(Some(record))
        })
        .await
    }

    pub async fn set_approval_status(
        &self,
        approval_id: &str,
        status: ApprovalStatus,
        decided_by: Option<String>,
        decision_reason: Option<String>,
    ) -> Result<()> {
        let approval_id = approval_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE approvals SET status = ?1, decided_at = ?2, decided_by = ?3,
                    decision_reason = ?4 WHERE approval_id = ?5",
                params![
                    status.as_str(),
                    Utc::now().to_rfc3339(),
                    decided_by,
                    decision_reason,
                    approval_id
                ],
            )?;
            Ok(())
        })
        .await
    }

    // ── Portfolio ────────────────────────────────────────────────────

    pub async fn get_portfolio(&self) -> Result<Option<Portfolio>> {
        self.with_conn(|conn| {
            let json: Option<String> = conn
                .query_row("SELECT positions_json FROM portfolio WHERE id = 1", [], |row| row.get(0))
                .optional()?;
            match json {
                Some(json) => Ok(Some(serde_json::from_str(&json)?)),
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn upsert_portfolio(&self, portfolio: &Portfolio) -> Result<()> {
        let json = serde_json::to_string(portfolio)?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO portfolio (id, positions_json, updated_at) VALUES (1, ?1, ?2)
                 ON CONFLICT (id) DO UPDATE SET positions_json = excluded.positions_json,
                     updated_at = excluded.updated_at",
                params![json, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }

    // ── Analysis runs ────────────────────────────────────────────────

    /// Insert an analysis run and its per-ticker rows in one transaction.
    pub async fn insert_analysis_run(&self, new_run: NewAnalysisRun) -> Result<i64> {
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT INTO analysis_runs
                    (trace_id, trigger_source, room_id, status, summary, commentary, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    new_run.trace_id,
                    new_run.trigger_source,
                    new_run.room_id,
                    new_run.status,
                    new_run.summary,
                    new_run.commentary,
                    Utc::now().to_rfc3339(),
                ],
            )?;
            let run_id = tx.last_insert_rowid();

            for t in &new_run.tickers {
                tx.execute(
                    "INSERT INTO analysis_run_tickers
                        (run_id, ticker, allocation, price, change_percent, open, high, low,
                         previous_close, metrics_json, commentary)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    params![
                        run_id,
                        t.ticker,
                        t.allocation,
                        t.price,
                        t.change_percent,
                        t.open,
                        t.high,
                        t.low,
                        t.previous_close,
                        t.metrics_json,
                        t.commentary,
                    ],
                )?;
            }

            tx.commit()?;
            Ok(run_id)
        })
        .await
    }

    pub async fn get_analysis_run(&self, run_id: i64) -> Result<Option<AnalysisRun>> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, trace_id, trigger_source, room_id, status, summary, commentary, created_at
                 FROM analysis_runs WHERE id = ?1",
                [run_id],
                |row| {
                    Ok(AnalysisRun {
                        id: row.get(0)?,
                        trace_id: row.get(1)?,
                        trigger_source: row.get(2)?,
                        room_id: row.get(3)?,
                        status: row.get(4)?,
                        summary: row.get(5)?,
                        commentary: row.get(6)?,
                        created_at: row.get(7)?,
                    })
                },
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    pub async fn get_analysis_run_tickers(&self, run_id: i64) -> Result<Vec<TickerMetric>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT run_id, ticker, allocation, price, change_percent, open, high, low,
                        previous_close, metrics_json, commentary
                 FROM analysis_run_tickers WHERE run_id = ?1",
            )?;
            let rows = stmt
                .query_map([run_id], |row| {
                    Ok(TickerMetric {
                        run_id: row.get(0)?,
                        ticker: row.get(1)?,
                        allocation: row.get(2)?,
                        price: row.get(3)?,
                        change_percent: row.get(4)?,
                        open: row.get(5)?,
                        high: row.get(6)?,
                        low: row.get(7)?,
                        previous_close: row.get(8)?,
                        metrics_json: row.get(9)?,
                        commentary: row.get(10)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    pub async fn update_analysis_run_status(
        &self,
        run_id: i64,
        status: &str,
        commentary: Option<String>,
    ) -> Result<()> {
        let status = status.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE analysis_runs SET status = ?1, commentary = COALESCE(?2, commentary) WHERE id = ?3",
                params![status, commentary, run_id],
            )?;
            Ok(())
        })
        .await
    }

    /// The maximum absolute `change_percent` across a run's tickers, or
    /// `0.0` if the run has none.
    pub async fn max_abs_change(&self, run_id: i64) -> Result<f64> {
        self.with_conn(move |conn| {
            let max: Option<f64> = conn.query_row(
                "SELECT MAX(ABS(change_percent)) FROM analysis_run_tickers WHERE run_id = ?1",
                [run_id],
                |row| row.get(0),
            )?;
            Ok(max.unwrap_or(0.0))
        })
        .await
    }

    /// Count of runs with status `notified` created within the last hour —
    /// feeds the canonical pipeline's rate-limit check.
    pub async fn count_notified_runs_last_hour(&self) -> Result<i64> {
        self.with_conn(|conn| {
            let cutoff = (Utc::now() - chrono::Duration::hours(1)).to_rfc3339();
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM analysis_runs WHERE status = 'notified' AND created_at >= ?1",
                [cutoff],
                |row| row.get(0),
            )?;
            Ok(count)
        })
        .await
    }

    // ── Matrix sync state ───────────────────────────────────────────

    pub async fn load_sync_token(&self) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let token: Option<String> = conn
                .query_row("SELECT next_batch FROM matrix_sync_state WHERE id = 1", [], |row| row.get(0))
                .optional()?;
            Ok(token)
        })
        .await
    }

    pub async fn save_sync_token(&self, token: String) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO matrix_sync_state (id, next_batch, updated_at) VALUES (1, ?1, ?2)
                 ON CONFLICT (id) DO UPDATE SET next_batch = excluded.next_batch,
                     updated_at = excluded.updated_at",
                params![token, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }
}

fn map_approval_row(row: &rusqlite::Row) -> rusqlite::Result<ApprovalRecord> {
    Ok(ApprovalRecord {
        approval_id: row.get(0)?,
        trace_id: row.get(1)?,
        room_id: row.get(2)?,
        action: row.get(3)?,
        target: row.get(4)?,
        params_json: row.get(5)?,
        status: row.get(6)?,
        requestor: row.get(7)?,
        expires_at: row.get(8)?,
        created_at: row.get(9)?,
        decided_at: row.get(10)?,
        decided_by: row.get(11)?,
        decision_reason: row.get(12)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn applied_config_round_trip() {
        let store = Store::open_in_memory().await.unwrap();
        assert!(store.load_applied_config().await.unwrap().is_none());
        store
            .upsert_applied_config("abc123".into(), "api_version: agent/v1".into())
            .await
            .unwrap();
        let row = store.load_applied_config().await.unwrap().unwrap();
        assert_eq!(row.hash, "abc123");
    }

    #[tokio::test]
    async fn turn_insert_and_finalize() {
        let store = Store::open_in_memory().await.unwrap();
        let id = store
            .insert_turn(NewTurn {
                trace_id: "t1".into(),
                room_id: "!r:example.com".into(),
                sender_mxid: "@a:example.com".into(),
                message: "hi".into(),
                trigger: TurnTrigger::Matrix,
                gateway_name: None,
                event_type: None,
            })
            .await
            .unwrap();
        store.finalize_turn(id, 2, TurnResult::Success, None).await.unwrap();
    }

    #[tokio::test]
    async fn approval_lazy_expiry() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .insert_approval(NewApproval {
                approval_id: "appr_1".into(),
                trace_id: "t1".into(),
                room_id: "!r:example.com".into(),
                action: "apply".into(),
                target: "k8s".into(),
                params_json: "{}".into(),
                requestor: "@a:example.com".into(),
                expires_at: (Utc::now() - chrono::Duration::seconds(5)).to_rfc3339(),
            })
            .await
            .unwrap();
        let record = store.get_approval("appr_1").await.unwrap().unwrap();
        assert_eq!(record.status, "expired");
    }

    #[tokio::test]
    async fn analysis_run_with_tickers() {
        let store = Store::open_in_memory().await.unwrap();
        let run_id = store
            .insert_analysis_run(NewAnalysisRun {
                trace_id: "t1".into(),
                trigger_source: "scheduler".into(),
                room_id: None,
                status: "awaiting_news".into(),
                summary: Some("summary".into()),
                commentary: None,
                tickers: vec![
                    NewTickerMetric {
                        ticker: "AAPL".into(),
                        allocation: 60.0,
                        price: Some(200.0),
                        change_percent: Some(1.5),
                        open: None,
                        high: None,
                        low: None,
                        previous_close: None,
                        metrics_json: None,
                        commentary: None,
                    },
                    NewTickerMetric {
                        ticker: "MSFT".into(),
                        allocation: 40.0,
                        price: Some(400.0),
                        change_percent: Some(-0.5),
                        open: None,
                        high: None,
                        low: None,
                        previous_close: None,
                        metrics_json: None,
                        commentary: None,
                    },
                ],
            })
            .await
            .unwrap();

        let tickers = store.get_analysis_run_tickers(run_id).await.unwrap();
        assert_eq!(tickers.len(), 2);
        assert_eq!(store.max_abs_change(run_id).await.unwrap(), 1.5);
    }

    #[tokio::test]
    async fn notified_runs_in_last_hour() {
        let store = Store::open_in_memory().await.unwrap();
        for _ in 0..2 {
            let id = store
                .insert_analysis_run(NewAnalysisRun {
                    trace_id: "t".into(),
                    trigger_source: "scheduler".into(),
                    room_id: None,
                    status: "awaiting_news".into(),
                    summary: None,
                    commentary: None,
                    tickers: vec![],
                })
                .await
                .unwrap();
            store.update_analysis_run_status(id, "notified", None).await.unwrap();
        }
        assert_eq!(store.count_notified_runs_last_hour().await.unwrap(), 2);
    }
}
