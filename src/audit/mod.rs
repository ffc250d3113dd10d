//! Audit subsystem: durable event log plus analytic aggregations.

pub mod event;
pub mod filter;
pub mod metrics;
pub mod store;

pub use event::{sanitize_parameters, AuditEvent, REDACTED, SENSITIVE_KEYS};
pub use filter::{
    BreakdownDimension, BreakdownFilter, QueryFilter, Resolution, SortOrder, TimeseriesFilter,
    DEFAULT_QUERY_CAPACITY, MAX_QUERY_CAPACITY,
};
pub use metrics::{
    BreakdownEntry, DiscoveryMetrics, DiscoveryTool, OverviewMetrics, PerformanceMetrics,
    TimeseriesBucket,
};
pub use store::AuditStore;
