//! Analytic aggregations over the audit log.
//!
//! Every operation accepts an optional `[start, end]` window and defaults
//! missing endpoints to the last 24 hours. Rates are conditional aggregates
//! over the sanitized integer/boolean columns with total row counts as
//! denominators; empty windows yield zeroed records, never nulls.

use crate::audit::filter::{BreakdownDimension, BreakdownFilter, TimeseriesFilter};
use crate::audit::store::{format_ts, AuditStore, StoreInner};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};

/// Toolkit kind whose calls count as discovery.
const DISCOVERY_KIND: &str = "datahub";

/// Toolkit kind whose calls count as querying.
const QUERY_KIND: &str = "trino";

/// One time-series bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeseriesBucket {
    /// Bucket start (timestamp truncated to the resolution).
    pub bucket: DateTime<Utc>,
    /// Calls in the bucket.
    pub count: i64,
    /// Successful calls.
    pub success_count: i64,
    /// Failed calls.
    pub error_count: i64,
    /// Mean duration across the bucket's calls.
    pub avg_duration_ms: f64,
}

/// One breakdown entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakdownEntry {
    /// Displayed dimension value.
    pub dimension: String,
    /// Calls attributed to the value.
    pub count: i64,
    /// Fraction of successful calls.
    pub success_rate: f64,
    /// Mean duration.
    pub avg_duration_ms: f64,
}

/// Aggregate overview of a window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverviewMetrics {
    /// Total calls in the window.
    pub total_calls: i64,
    /// successes / total (0 when empty).
    pub success_rate: f64,
    /// Mean duration.
    pub avg_duration_ms: f64,
    /// Distinct users seen.
    pub unique_users: i64,
    /// Distinct tools invoked.
    pub unique_tools: i64,
    /// enriched / total (0 when empty).
    pub enrichment_rate: f64,
    /// Failed calls.
    pub error_count: i64,
}

/// Latency and size percentiles for a window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Median duration.
    pub p50_ms: f64,
    /// 95th percentile duration.
    pub p95_ms: f64,
    /// 99th percentile duration.
    pub p99_ms: f64,
    /// Mean duration.
    pub avg_ms: f64,
    /// Maximum duration.
    pub max_ms: f64,
    /// Mean response size in characters.
    pub avg_response_chars: f64,
    /// Mean request size in characters.
    pub avg_request_chars: f64,
}

/// A discovery tool and its call count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryTool {
    /// Tool name.
    pub tool_name: String,
    /// Calls in the window.
    pub count: i64,
}

/// Session-pattern analysis of a window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryMetrics {
    /// Sessions with at least one call.
    pub total_sessions: i64,
    /// Sessions that issued a discovery-kind call.
    pub sessions_with_discovery: i64,
    /// Sessions that issued a query-kind call.
    pub sessions_with_query: i64,
    /// Sessions whose first discovery call strictly preceded their first
    /// query call.
    pub discover_before_query: i64,
    /// discover_before_query / sessions_with_query (0 when no sessions
    /// queried).
    pub discover_before_query_rate: f64,
    /// Most used discovery tools, by call count descending.
    pub top_discovery_tools: Vec<DiscoveryTool>,
}

/// Resolve the window, defaulting to the last 24 hours.
fn window(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let end = end.unwrap_or_else(Utc::now);
    let start = start.unwrap_or_else(|| end - chrono::Duration::hours(24));
    (start, end)
}

/// Continuous-rank percentile over a sorted slice (PERCENTILE_CONT).
fn percentile_cont(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = p * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let weight = rank - lower as f64;
        sorted[lower] * (1.0 - weight) + sorted[upper] * weight
    }
}

impl StoreInner {
    fn timeseries(&self, filter: &TimeseriesFilter) -> Result<Vec<TimeseriesBucket>> {
        let (start, end) = window(filter.start_time, filter.end_time);
        let sql = format!(
            "SELECT strftime('{}', timestamp) AS bucket, \
                    COUNT(*), \
                    SUM(CASE WHEN success = 1 THEN 1 ELSE 0 END), \
                    SUM(CASE WHEN success = 0 THEN 1 ELSE 0 END), \
                    AVG(COALESCE(duration_ms, 0)) \
             FROM audit_logs \
             WHERE timestamp >= ?1 AND timestamp <= ?2 \
             GROUP BY bucket ORDER BY bucket ASC",
            filter.resolution.bucket_format()
        );

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![format_ts(start), format_ts(end)], |row| {
                let bucket_text: String = row.get(0)?;
                Ok((
                    bucket_text,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, Option<f64>>(4)?,
                ))
            })?;

            let mut buckets = Vec::new();
            for row in rows {
                let (bucket_text, count, success_count, error_count, avg) =
                    row.map_err(|e| Error::audit_source("audit row iteration failed", e))?;
                let bucket = DateTime::parse_from_rfc3339(&bucket_text)
                    .map_err(|e| Error::audit(format!("malformed bucket '{}': {}", bucket_text, e)))?
                    .with_timezone(&Utc);
                buckets.push(TimeseriesBucket {
                    bucket,
                    count,
                    success_count,
                    error_count,
                    avg_duration_ms: avg.unwrap_or(0.0),
                });
            }
            Ok(buckets)
        })
    }

    fn breakdown(&self, filter: &BreakdownFilter) -> Result<Vec<BreakdownEntry>> {
        let (start, end) = window(filter.start_time, filter.end_time);
        let group = filter.group_by.group_column();
        let email_select = if filter.group_by == BreakdownDimension::UserId {
            "MAX(NULLIF(user_email, ''))"
        } else {
            "NULL"
        };
        let sql = format!(
            "SELECT {}, {}, COUNT(*) AS n, \
                    AVG(CASE WHEN success = 1 THEN 1.0 ELSE 0.0 END), \
                    AVG(COALESCE(duration_ms, 0)) \
             FROM audit_logs \
             WHERE timestamp >= ?1 AND timestamp <= ?2 \
               AND {} IS NOT NULL AND {} != '' \
             GROUP BY {} ORDER BY n DESC, {} ASC LIMIT {}",
            group,
            email_select,
            group,
            group,
            group,
            group,
            filter.clamped_limit()
        );

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![format_ts(start), format_ts(end)], |row| {
                let raw: String = row.get(0)?;
                let email: Option<String> = row.get(1)?;
                Ok(BreakdownEntry {
                    dimension: email.unwrap_or(raw),
                    count: row.get(2)?,
                    success_rate: row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
                    avg_duration_ms: row.get::<_, Option<f64>>(4)?.unwrap_or(0.0),
                })
            })?;

            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| Error::audit_source("audit row iteration failed", e))
        })
    }

    fn overview(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<OverviewMetrics> {
        let (start, end) = window(start, end);
        self.with_conn(|conn| {
            let metrics = conn.query_row(
                "SELECT COUNT(*), \
                        SUM(CASE WHEN success = 1 THEN 1 ELSE 0 END), \
                        AVG(COALESCE(duration_ms, 0)), \
                        COUNT(DISTINCT user_id), \
                        COUNT(DISTINCT tool_name), \
                        SUM(CASE WHEN enrichment_applied = 1 THEN 1 ELSE 0 END), \
                        SUM(CASE WHEN success = 0 THEN 1 ELSE 0 END) \
                 FROM audit_logs WHERE timestamp >= ?1 AND timestamp <= ?2",
                params![format_ts(start), format_ts(end)],
                |row| {
                    let total: i64 = row.get(0)?;
                    let successes: Option<i64> = row.get(1)?;
                    let avg: Option<f64> = row.get(2)?;
                    let users: i64 = row.get(3)?;
                    let tools: i64 = row.get(4)?;
                    let enriched: Option<i64> = row.get(5)?;
                    let errors: Option<i64> = row.get(6)?;
                    Ok((total, successes, avg, users, tools, enriched, errors))
                },
            )?;
            let (total, successes, avg, users, tools, enriched, errors) = metrics;

            let rate = |numerator: Option<i64>| {
                if total == 0 {
                    0.0
                } else {
                    numerator.unwrap_or(0) as f64 / total as f64
                }
            };

            Ok(OverviewMetrics {
                total_calls: total,
                success_rate: rate(successes),
                avg_duration_ms: avg.unwrap_or(0.0),
                unique_users: users,
                unique_tools: tools,
                enrichment_rate: rate(enriched),
                error_count: errors.unwrap_or(0),
            })
        })
    }

    fn performance(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<PerformanceMetrics> {
        let (start, end) = window(start, end);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT duration_ms FROM audit_logs \
                 WHERE timestamp >= ?1 AND timestamp <= ?2 AND duration_ms IS NOT NULL \
                 ORDER BY duration_ms ASC",
            )?;
            let durations = stmt
                .query_map(params![format_ts(start), format_ts(end)], |row| {
                    row.get::<_, i64>(0).map(|v| v as f64)
                })?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| Error::audit_source("audit row iteration failed", e))?;

            if durations.is_empty() {
                return Ok(PerformanceMetrics::default());
            }

            let (avg_response, avg_request) = conn.query_row(
                "SELECT AVG(COALESCE(response_chars, 0)), AVG(COALESCE(request_chars, 0)) \
                 FROM audit_logs WHERE timestamp >= ?1 AND timestamp <= ?2",
                params![format_ts(start), format_ts(end)],
                |row| {
                    Ok((
                        row.get::<_, Option<f64>>(0)?,
                        row.get::<_, Option<f64>>(1)?,
                    ))
                },
            )?;

            let sum: f64 = durations.iter().sum();
            Ok(PerformanceMetrics {
                p50_ms: percentile_cont(&durations, 0.50),
                p95_ms: percentile_cont(&durations, 0.95),
                p99_ms: percentile_cont(&durations, 0.99),
                avg_ms: sum / durations.len() as f64,
                max_ms: *durations.last().expect("non-empty durations"),
                avg_response_chars: avg_response.unwrap_or(0.0),
                avg_request_chars: avg_request.unwrap_or(0.0),
            })
        })
    }

    fn discovery(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        top: usize,
    ) -> Result<DiscoveryMetrics> {
        let (start, end) = window(start, end);
        let top = top.clamp(1, 100);

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT session_id, \
                        MIN(CASE WHEN toolkit_kind = ?3 THEN timestamp END), \
                        MIN(CASE WHEN toolkit_kind = ?4 THEN timestamp END) \
                 FROM audit_logs \
                 WHERE timestamp >= ?1 AND timestamp <= ?2 \
                   AND session_id IS NOT NULL AND session_id != '' \
                 GROUP BY session_id",
            )?;
            let sessions = stmt
                .query_map(
                    params![format_ts(start), format_ts(end), DISCOVERY_KIND, QUERY_KIND],
                    |row| {
                        Ok((
                            row.get::<_, Option<String>>(1)?,
                            row.get::<_, Option<String>>(2)?,
                        ))
                    },
                )?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| Error::audit_source("audit row iteration failed", e))?;

            let mut metrics = DiscoveryMetrics {
                total_sessions: sessions.len() as i64,
                ..DiscoveryMetrics::default()
            };
            for (first_discovery, first_query) in &sessions {
                if first_discovery.is_some() {
                    metrics.sessions_with_discovery += 1;
                }
                if first_query.is_some() {
                    metrics.sessions_with_query += 1;
                }
                if let (Some(discovery), Some(query)) = (first_discovery, first_query) {
                    // Fixed-width timestamps compare lexicographically.
                    if discovery < query {
                        metrics.discover_before_query += 1;
                    }
                }
            }
            if metrics.sessions_with_query > 0 {
                metrics.discover_before_query_rate =
                    metrics.discover_before_query as f64 / metrics.sessions_with_query as f64;
            }

            let mut stmt = conn.prepare(&format!(
                "SELECT tool_name, COUNT(*) AS n FROM audit_logs \
                 WHERE timestamp >= ?1 AND timestamp <= ?2 AND toolkit_kind = ?3 \
                 GROUP BY tool_name ORDER BY n DESC, tool_name ASC LIMIT {}",
                top
            ))?;
            metrics.top_discovery_tools = stmt
                .query_map(
                    params![format_ts(start), format_ts(end), DISCOVERY_KIND],
                    |row| {
                        Ok(DiscoveryTool {
                            tool_name: row.get(0)?,
                            count: row.get(1)?,
                        })
                    },
                )?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| Error::audit_source("audit row iteration failed", e))?;

            Ok(metrics)
        })
    }
}

impl AuditStore {
    /// Time-series buckets over the window.
    pub async fn timeseries(&self, filter: TimeseriesFilter) -> Result<Vec<TimeseriesBucket>> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || inner.timeseries(&filter))
            .await
            .map_err(|e| Error::internal(format!("audit task join failed: {}", e)))?
    }

    /// Dimensional breakdown over the window.
    pub async fn breakdown(&self, filter: BreakdownFilter) -> Result<Vec<BreakdownEntry>> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || inner.breakdown(&filter))
            .await
            .map_err(|e| Error::internal(format!("audit task join failed: {}", e)))?
    }

    /// Aggregate overview of the window.
    pub async fn overview(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<OverviewMetrics> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || inner.overview(start, end))
            .await
            .map_err(|e| Error::internal(format!("audit task join failed: {}", e)))?
    }

    /// Latency percentiles and size averages for the window.
    pub async fn performance(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<PerformanceMetrics> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || inner.performance(start, end))
            .await
            .map_err(|e| Error::internal(format!("audit task join failed: {}", e)))?
    }

    /// Session discovery-pattern analysis for the window.
    pub async fn discovery(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        top: usize,
    ) -> Result<DiscoveryMetrics> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || inner.discovery(start, end, top))
            .await
            .map_err(|e| Error::internal(format!("audit task join failed: {}", e)))?
    }
}
