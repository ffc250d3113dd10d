//! Durable audit log.
//!
//! Events land in a single `audit_logs` table keyed by `(id, created_date)`
//! with the daily date column standing in for range partitions. All public
//! operations are async; the underlying connection work runs on the
//! blocking pool. A background sweeper enforces bounded retention and is
//! joined on `close()`.

use crate::audit::event::{sanitize_parameters, AuditEvent};
use crate::audit::filter::{is_distinct_column, QueryFilter, SEARCH_COLUMNS};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Fixed-width UTC timestamp format; lexicographic order equals time order.
const TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.format(TS_FORMAT).to_string()
}

fn parse_ts(text: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(text).map(|dt| dt.with_timezone(&Utc))
}

pub(crate) struct StoreInner {
    conn: Mutex<Connection>,
}

impl StoreInner {
    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    fn ensure_schema(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS audit_logs (
                    id TEXT NOT NULL,
                    created_date TEXT NOT NULL,
                    timestamp TEXT NOT NULL,
                    tool_name TEXT NOT NULL,
                    success INTEGER NOT NULL,
                    duration_ms INTEGER,
                    request_id TEXT,
                    session_id TEXT,
                    user_id TEXT,
                    user_email TEXT,
                    persona TEXT,
                    toolkit_kind TEXT,
                    toolkit_name TEXT,
                    connection TEXT,
                    parameters TEXT NOT NULL DEFAULT '{}',
                    error_message TEXT,
                    error_category TEXT,
                    response_chars INTEGER,
                    request_chars INTEGER,
                    content_blocks INTEGER,
                    transport TEXT,
                    source TEXT,
                    enrichment_applied INTEGER,
                    authorized INTEGER,
                    PRIMARY KEY (id, created_date)
                );

                CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_logs(timestamp);
                CREATE INDEX IF NOT EXISTS idx_audit_user_id ON audit_logs(user_id);
                CREATE INDEX IF NOT EXISTS idx_audit_tool_name ON audit_logs(tool_name);
                CREATE INDEX IF NOT EXISTS idx_audit_success ON audit_logs(success);
                CREATE INDEX IF NOT EXISTS idx_audit_created_date ON audit_logs(created_date);
                "#,
            )?;
            Ok(())
        })
    }

    fn insert(&self, event: &AuditEvent) -> Result<()> {
        // Sanitization is idempotent; running it again here guarantees no
        // sensitive key reaches a row even for hand-built events.
        let parameters = sanitize_parameters(event.parameters.as_ref())
            .map(|map| serde_json::to_string(&map).unwrap_or_else(|_| "{}".to_string()))
            .unwrap_or_else(|| "{}".to_string());

        self.with_conn(|conn| {
            conn.execute(
                r#"
                INSERT INTO audit_logs (
                    id, created_date, timestamp, tool_name, success,
                    duration_ms, request_id, session_id, user_id, user_email,
                    persona, toolkit_kind, toolkit_name, connection, parameters,
                    error_message, error_category, response_chars, request_chars,
                    content_blocks, transport, source, enrichment_applied, authorized
                ) VALUES (
                    ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                    ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24
                )
                "#,
                params![
                    event.id,
                    event.created_date(),
                    format_ts(event.timestamp),
                    event.tool_name,
                    event.success,
                    event.duration_ms,
                    event.request_id,
                    event.session_id,
                    event.user_id,
                    event.user_email,
                    event.persona,
                    event.toolkit_kind,
                    event.toolkit_name,
                    event.connection,
                    parameters,
                    event.error_message,
                    event.error_category,
                    event.response_chars,
                    event.request_chars,
                    event.content_blocks,
                    event.transport,
                    event.source,
                    event.enrichment_applied,
                    event.authorized,
                ],
            )?;
            Ok(())
        })
    }

    fn filter_clause(filter: &QueryFilter) -> (String, Vec<rusqlite::types::Value>) {
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<rusqlite::types::Value> = Vec::new();

        let mut eq = |column: &str, value: &Option<String>| {
            if let Some(v) = value {
                values.push(v.clone().into());
                clauses.push(format!("{} = ?{}", column, values.len()));
            }
        };
        eq("id", &filter.id);
        eq("user_id", &filter.user_id);
        eq("session_id", &filter.session_id);
        eq("tool_name", &filter.tool_name);
        eq("toolkit_kind", &filter.toolkit_kind);

        if let Some(search) = &filter.search {
            let pattern = format!("%{}%", search.to_lowercase());
            let mut ors = Vec::with_capacity(SEARCH_COLUMNS.len());
            for column in SEARCH_COLUMNS {
                values.push(pattern.clone().into());
                ors.push(format!("LOWER({}) LIKE ?{}", column, values.len()));
            }
            clauses.push(format!("({})", ors.join(" OR ")));
        }

        if let Some(start) = filter.start_time {
            values.push(format_ts(start).into());
            clauses.push(format!("timestamp >= ?{}", values.len()));
        }
        if let Some(end) = filter.end_time {
            values.push(format_ts(end).into());
            clauses.push(format!("timestamp <= ?{}", values.len()));
        }
        if let Some(success) = filter.success {
            values.push((success as i64).into());
            clauses.push(format!("success = ?{}", values.len()));
        }

        let clause = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        (clause, values)
    }

    fn query(&self, filter: &QueryFilter) -> Result<Vec<AuditEvent>> {
        let (clause, values) = Self::filter_clause(filter);
        let order = filter.sort_order.as_sql();
        let sql = format!(
            "SELECT id, timestamp, tool_name, success, duration_ms, request_id, session_id, \
             user_id, user_email, persona, toolkit_kind, toolkit_name, connection, parameters, \
             error_message, error_category, response_chars, request_chars, content_blocks, \
             transport, source, enrichment_applied, authorized \
             FROM audit_logs{} ORDER BY {} {}, id {} LIMIT {} OFFSET {}",
            clause,
            filter.resolved_sort_column(),
            order,
            order,
            filter.clamped_limit(),
            filter.offset,
        );

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let mapped = stmt.query_map(params_from_iter(values.iter()), |row| {
                let ts_text: String = row.get(1)?;
                let timestamp = parse_ts(&ts_text).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e))
                })?;
                let parameters_text: String = row.get(13)?;
                let parameters = serde_json::from_str::<serde_json::Map<_, _>>(&parameters_text)
                    .ok()
                    .filter(|map| !map.is_empty());

                Ok(AuditEvent {
                    id: row.get(0)?,
                    timestamp,
                    tool_name: row.get(2)?,
                    success: row.get(3)?,
                    duration_ms: row.get(4)?,
                    request_id: row.get(5)?,
                    session_id: row.get(6)?,
                    user_id: row.get(7)?,
                    user_email: row.get(8)?,
                    persona: row.get(9)?,
                    toolkit_kind: row.get(10)?,
                    toolkit_name: row.get(11)?,
                    connection: row.get(12)?,
                    parameters,
                    error_message: row.get(14)?,
                    error_category: row.get(15)?,
                    response_chars: row.get(16)?,
                    request_chars: row.get(17)?,
                    content_blocks: row.get(18)?,
                    transport: row.get(19)?,
                    source: row.get(20)?,
                    enrichment_applied: row.get(21)?,
                    authorized: row.get(22)?,
                })
            })?;

            let mut events = Vec::with_capacity(filter.result_capacity());
            for event in mapped {
                events.push(
                    event.map_err(|e| Error::audit_source("audit row iteration failed", e))?,
                );
            }
            Ok(events)
        })
    }

    fn count(&self, filter: &QueryFilter) -> Result<i64> {
        let (clause, values) = Self::filter_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM audit_logs{}", clause);
        self.with_conn(|conn| {
            let count =
                conn.query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))?;
            Ok(count)
        })
    }

    fn distinct(
        &self,
        column: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<String>> {
        if !is_distinct_column(column) {
            return Err(Error::validation(format!(
                "column '{}' is not listable",
                column
            )));
        }

        let mut sql = format!(
            "SELECT DISTINCT {} FROM audit_logs WHERE {} IS NOT NULL AND {} != ''",
            column, column, column
        );
        let mut values: Vec<rusqlite::types::Value> = Vec::new();
        if let Some(start) = start {
            values.push(format_ts(start).into());
            sql.push_str(&format!(" AND timestamp >= ?{}", values.len()));
        }
        if let Some(end) = end {
            values.push(format_ts(end).into());
            sql.push_str(&format!(" AND timestamp <= ?{}", values.len()));
        }
        sql.push_str(&format!(" ORDER BY {}", column));

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(values.iter()), |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()
                .map_err(|e| Error::audit_source("audit row iteration failed", e))?;
            Ok(rows)
        })
    }

    fn distinct_pairs(&self, key_column: &str, value_column: &str) -> Result<BTreeMap<String, String>> {
        for column in [key_column, value_column] {
            if !is_distinct_column(column) {
                return Err(Error::validation(format!(
                    "column '{}' is not listable",
                    column
                )));
            }
        }

        let sql = format!(
            "SELECT {}, MAX({}) FROM audit_logs WHERE {} IS NOT NULL AND {} != '' GROUP BY {}",
            key_column, value_column, key_column, key_column, key_column
        );
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let mut pairs = BTreeMap::new();
            let rows = stmt.query_map([], |row| {
                let key: String = row.get(0)?;
                let value: Option<String> = row.get(1)?;
                Ok((key, value))
            })?;
            for row in rows {
                let (key, value) =
                    row.map_err(|e| Error::audit_source("audit row iteration failed", e))?;
                pairs.insert(key, value.unwrap_or_default());
            }
            Ok(pairs)
        })
    }

    fn delete_older_than(&self, retention_days: u32) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));
        self.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM audit_logs WHERE timestamp < ?1",
                params![format_ts(cutoff)],
            )?;
            Ok(deleted)
        })
    }
}

/// Append-only audit event store with bounded retention.
pub struct AuditStore {
    pub(crate) inner: Arc<StoreInner>,
    retention_days: u32,
    shutdown: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl AuditStore {
    /// Open (or create) a store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| Error::audit_source("failed to open audit database", e))?;
        Self::from_connection(conn)
    }

    /// Open an in-memory store (tests and embedded runs).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::audit_source("failed to open audit database", e))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let inner = Arc::new(StoreInner {
            conn: Mutex::new(conn),
        });
        inner.ensure_schema()?;
        Ok(Self {
            inner,
            retention_days: 90,
            shutdown: CancellationToken::new(),
            sweeper: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// Override the retention cutoff (default 90 days).
    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    /// The configured retention cutoff in days.
    pub fn retention_days(&self) -> u32 {
        self.retention_days
    }

    async fn run_blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&StoreInner) -> Result<T> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || f(&inner))
            .await
            .map_err(|e| Error::internal(format!("audit task join failed: {}", e)))?
    }

    /// Append one event. Each write is its own transaction.
    pub async fn log(&self, event: AuditEvent) -> Result<()> {
        self.run_blocking(move |inner| inner.insert(&event)).await
    }

    /// Read events matching the filter.
    ///
    /// Always returns a (possibly empty) vector, ordered by the resolved
    /// sort column with `id` as the stability tiebreaker.
    pub async fn query(&self, filter: QueryFilter) -> Result<Vec<AuditEvent>> {
        self.run_blocking(move |inner| inner.query(&filter)).await
    }

    /// Count events matching the filter.
    pub async fn count(&self, filter: QueryFilter) -> Result<i64> {
        self.run_blocking(move |inner| inner.count(&filter)).await
    }

    /// Sorted distinct values of a safe-listed column.
    pub async fn distinct(
        &self,
        column: impl Into<String>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<String>> {
        let column = column.into();
        self.run_blocking(move |inner| inner.distinct(&column, start, end))
            .await
    }

    /// Mapping from distinct `key_column` values to an associated
    /// `value_column` value.
    pub async fn distinct_pairs(
        &self,
        key_column: impl Into<String>,
        value_column: impl Into<String>,
    ) -> Result<BTreeMap<String, String>> {
        let key_column = key_column.into();
        let value_column = value_column.into();
        self.run_blocking(move |inner| inner.distinct_pairs(&key_column, &value_column))
            .await
    }

    /// Start the retention sweeper. A second call while running is a no-op.
    pub fn start_cleanup_routine(&self, interval: Duration) {
        let mut guard = self.sweeper.lock();
        if guard.is_some() || self.closed.load(Ordering::SeqCst) {
            return;
        }

        let inner = self.inner.clone();
        let retention_days = self.retention_days;
        let token = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let inner = inner.clone();
                        let swept = tokio::task::spawn_blocking(move || {
                            inner.delete_older_than(retention_days)
                        })
                        .await;
                        match swept {
                            Ok(Ok(deleted)) if deleted > 0 => {
                                tracing::info!(deleted, "audit retention sweep removed events");
                            }
                            Ok(Ok(_)) => {}
                            Ok(Err(err)) => {
                                tracing::warn!(error = %err, "audit retention sweep failed");
                            }
                            Err(err) => {
                                tracing::warn!(error = %err, "audit retention sweep panicked");
                            }
                        }
                    }
                }
            }
        });
        *guard = Some(handle);
    }

    /// Stop the sweeper and wait for it to exit.
    ///
    /// Idempotent, and a no-op when the sweeper was never started.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.shutdown.cancel();
        let handle = self.sweeper.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl std::fmt::Debug for AuditStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditStore")
            .field("retention_days", &self.retention_days)
            .field("sweeper_running", &self.sweeper.lock().is_some())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}
