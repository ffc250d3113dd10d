//! Filters for reading the audit log and its aggregations.
//!
//! Column choices are closed sets: sort columns fall back to `timestamp`
//! silently, while unknown resolutions and breakdown dimensions are
//! validation errors.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Hard cap on rows returned by a single log query.
pub const MAX_QUERY_CAPACITY: usize = 1000;

/// Pre-allocation size when no limit is requested.
pub const DEFAULT_QUERY_CAPACITY: usize = 100;

/// Columns the log query may sort by. Anything else falls back to
/// `timestamp`.
const SORTABLE_COLUMNS: &[&str] = &[
    "timestamp",
    "tool_name",
    "user_id",
    "toolkit_kind",
    "duration_ms",
    "success",
    "created_date",
];

/// Columns covered by the free-text search filter.
pub(crate) const SEARCH_COLUMNS: &[&str] = &[
    "tool_name",
    "user_id",
    "user_email",
    "error_message",
    "connection",
    "request_id",
];

/// Columns that may be targeted by distinct-value listings.
pub(crate) const DISTINCT_COLUMNS: &[&str] = &[
    "tool_name",
    "user_id",
    "user_email",
    "persona",
    "toolkit_kind",
    "toolkit_name",
    "connection",
    "transport",
    "source",
    "session_id",
];

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Ascending.
    Asc,
    /// Descending (default).
    #[default]
    Desc,
}

impl SortOrder {
    pub(crate) fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Filter for reading the event log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryFilter {
    /// Exact event ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Exact user ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Exact session ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Exact tool name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Exact toolkit kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toolkit_kind: Option<String>,
    /// Case-insensitive substring match over the fixed search column set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    /// Window start (inclusive).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    /// Window end (inclusive).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Tri-state success filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    /// Requested sort column; unknown values fall back to `timestamp`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<String>,
    /// Sort direction.
    #[serde(default)]
    pub sort_order: SortOrder,
    /// Maximum rows to return; 0 means capped only by
    /// [`MAX_QUERY_CAPACITY`].
    #[serde(default)]
    pub limit: usize,
    /// Rows to skip.
    #[serde(default)]
    pub offset: usize,
}

impl QueryFilter {
    /// The sort column after safe-list resolution.
    pub fn resolved_sort_column(&self) -> &'static str {
        match &self.sort_by {
            Some(requested) => SORTABLE_COLUMNS
                .iter()
                .find(|col| *col == requested)
                .copied()
                .unwrap_or("timestamp"),
            None => "timestamp",
        }
    }

    /// The effective row limit, clamped to `[1, MAX_QUERY_CAPACITY]`.
    pub fn clamped_limit(&self) -> usize {
        if self.limit == 0 {
            MAX_QUERY_CAPACITY
        } else {
            self.limit.clamp(1, MAX_QUERY_CAPACITY)
        }
    }

    /// Pre-allocation capacity for the result buffer.
    pub fn result_capacity(&self) -> usize {
        if self.limit == 0 {
            DEFAULT_QUERY_CAPACITY
        } else {
            self.limit.min(MAX_QUERY_CAPACITY)
        }
    }
}

/// Bucket resolution for time-series aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// One bucket per minute.
    Minute,
    /// One bucket per hour.
    Hour,
    /// One bucket per day.
    Day,
}

impl Resolution {
    /// Parse a resolution string. Unknown values are validation errors.
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "minute" => Ok(Self::Minute),
            "hour" => Ok(Self::Hour),
            "day" => Ok(Self::Day),
            other => Err(Error::validation(format!(
                "unknown resolution '{}' (expected minute, hour or day)",
                other
            ))),
        }
    }

    /// SQLite strftime format truncating timestamps to this resolution.
    pub(crate) fn bucket_format(self) -> &'static str {
        match self {
            Self::Minute => "%Y-%m-%dT%H:%M:00Z",
            Self::Hour => "%Y-%m-%dT%H:00:00Z",
            Self::Day => "%Y-%m-%dT00:00:00Z",
        }
    }
}

/// Filter for time-series aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeseriesFilter {
    /// Bucket resolution.
    pub resolution: Resolution,
    /// Window start; defaults to 24 hours ago.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    /// Window end; defaults to now.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

/// Dimension for breakdown aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakdownDimension {
    /// Group by tool name.
    ToolName,
    /// Group by user; display prefers email when present.
    UserId,
    /// Group by persona.
    Persona,
    /// Group by toolkit kind.
    ToolkitKind,
    /// Group by connection.
    Connection,
}

impl BreakdownDimension {
    /// Parse a dimension string. Unknown values are validation errors.
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "tool_name" => Ok(Self::ToolName),
            "user_id" => Ok(Self::UserId),
            "persona" => Ok(Self::Persona),
            "toolkit_kind" => Ok(Self::ToolkitKind),
            "connection" => Ok(Self::Connection),
            other => Err(Error::validation(format!(
                "unknown breakdown dimension '{}'",
                other
            ))),
        }
    }

    /// The column the aggregation groups by.
    pub(crate) fn group_column(self) -> &'static str {
        match self {
            Self::ToolName => "tool_name",
            Self::UserId => "user_id",
            Self::Persona => "persona",
            Self::ToolkitKind => "toolkit_kind",
            Self::Connection => "connection",
        }
    }
}

/// Filter for dimensional breakdowns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakdownFilter {
    /// Grouping dimension.
    pub group_by: BreakdownDimension,
    /// Window start; defaults to 24 hours ago.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    /// Window end; defaults to now.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Maximum entries; defaults to 10, clamped to `[1, 100]`.
    #[serde(default)]
    pub limit: usize,
}

impl BreakdownFilter {
    /// The effective entry limit.
    pub fn clamped_limit(&self) -> usize {
        if self.limit == 0 {
            10
        } else {
            self.limit.clamp(1, 100)
        }
    }
}

/// Whether a column may be targeted by distinct-value listings.
pub(crate) fn is_distinct_column(column: &str) -> bool {
    DISTINCT_COLUMNS.contains(&column)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_sort_column_falls_back_to_timestamp() {
        let filter = QueryFilter {
            sort_by: Some("evil; DROP TABLE audit_logs".to_string()),
            ..QueryFilter::default()
        };
        assert_eq!(filter.resolved_sort_column(), "timestamp");

        let filter = QueryFilter {
            sort_by: Some("duration_ms".to_string()),
            ..QueryFilter::default()
        };
        assert_eq!(filter.resolved_sort_column(), "duration_ms");
    }

    #[test]
    fn limit_clamps() {
        let unset = QueryFilter::default();
        assert_eq!(unset.clamped_limit(), MAX_QUERY_CAPACITY);
        assert_eq!(unset.result_capacity(), DEFAULT_QUERY_CAPACITY);

        let small = QueryFilter {
            limit: 5,
            ..QueryFilter::default()
        };
        assert_eq!(small.clamped_limit(), 5);
        assert_eq!(small.result_capacity(), 5);

        let huge = QueryFilter {
            limit: 1_000_000,
            ..QueryFilter::default()
        };
        assert_eq!(huge.clamped_limit(), MAX_QUERY_CAPACITY);
        assert_eq!(huge.result_capacity(), MAX_QUERY_CAPACITY);
    }

    #[test]
    fn resolution_parse() {
        assert_eq!(Resolution::parse("hour").unwrap(), Resolution::Hour);
        let err = Resolution::parse("fortnight").unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::Validation);
    }

    #[test]
    fn breakdown_dimension_parse() {
        assert_eq!(
            BreakdownDimension::parse("user_id").unwrap(),
            BreakdownDimension::UserId
        );
        let err = BreakdownDimension::parse("hostname").unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::Validation);
    }

    #[test]
    fn breakdown_limit_clamps() {
        let default = BreakdownFilter {
            group_by: BreakdownDimension::ToolName,
            start_time: None,
            end_time: None,
            limit: 0,
        };
        assert_eq!(default.clamped_limit(), 10);

        let large = BreakdownFilter {
            limit: 500,
            ..default.clone()
        };
        assert_eq!(large.clamped_limit(), 100);
    }

    #[test]
    fn distinct_safe_list() {
        assert!(is_distinct_column("tool_name"));
        assert!(is_distinct_column("connection"));
        assert!(!is_distinct_column("parameters"));
        assert!(!is_distinct_column("id; DROP TABLE audit_logs"));
    }
}
