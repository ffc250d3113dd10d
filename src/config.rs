//! Configuration surface consumed by the core.
//!
//! Loading from YAML or a database is the job of an external collaborator;
//! this module defines the typed options the pipeline consults, their
//! defaults, and a TOML helper for embedded/test configuration.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

fn default_true() -> bool {
    true
}

fn default_retention_days() -> u32 {
    90
}

fn default_row_threshold() -> u64 {
    1_000_000
}

fn default_timeout_secs() -> u64 {
    120
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Transport and naming options, opaque to the core.
    #[serde(default)]
    pub server: ServerSection,
    /// Audit subsystem options.
    #[serde(default)]
    pub audit: AuditConfig,
    /// Elicitation gates.
    #[serde(default)]
    pub elicitation: ElicitationConfig,
    /// Progress notification injection.
    #[serde(default)]
    pub progress: ProgressConfig,
    /// Tool visibility filter.
    #[serde(default)]
    pub tools: ToolFilterConfig,
    /// Query toolkit instances.
    #[serde(default)]
    pub query: QueryToolkitConfig,
}

impl ServerConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::validation(format!("invalid configuration: {}", e)))
    }
}

/// Server section. The core treats the transport choice as opaque.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    /// Server name, used for audit attribution.
    #[serde(default)]
    pub name: String,
    /// Transport adapter identifier (e.g. `stdio`, `http`).
    #[serde(default)]
    pub transport: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            name: "mcp-dataplane".to_string(),
            transport: "stdio".to_string(),
        }
    }
}

/// Audit subsystem configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Gates the audit middleware as a whole.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Gates per-call logging (metrics reads stay available regardless).
    #[serde(default = "default_true")]
    pub log_tool_calls: bool,
    /// Sweeper cutoff in days.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_tool_calls: true,
            retention_days: default_retention_days(),
        }
    }
}

/// Elicitation gates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ElicitationConfig {
    /// Master switch; when off neither gate runs.
    #[serde(default)]
    pub enabled: bool,
    /// Cost-estimate consent gate.
    #[serde(default)]
    pub cost_estimation: CostEstimationConfig,
    /// PII consent gate.
    #[serde(default)]
    pub pii_consent: PiiConsentConfig,
}

/// Cost-estimate gate options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostEstimationConfig {
    /// Whether the gate runs.
    #[serde(default)]
    pub enabled: bool,
    /// Estimated-row threshold above which consent is required.
    #[serde(default = "default_row_threshold")]
    pub row_threshold: u64,
}

impl Default for CostEstimationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            row_threshold: default_row_threshold(),
        }
    }
}

/// PII consent gate options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PiiConsentConfig {
    /// Whether the gate runs.
    #[serde(default)]
    pub enabled: bool,
}

/// Progress notification injection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Whether the injector middleware is attached.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Tool visibility filter applied before registration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolFilterConfig {
    /// When non-empty, only these tools are registered.
    #[serde(default)]
    pub allow: Vec<String>,
    /// Tools removed after the allow filter.
    #[serde(default)]
    pub deny: Vec<String>,
}

impl ToolFilterConfig {
    /// Whether the named tool survives the filter.
    pub fn permits(&self, tool: &str) -> bool {
        if !self.allow.is_empty() && !self.allow.iter().any(|t| t == tool) {
            return false;
        }
        !self.deny.iter().any(|t| t == tool)
    }
}

/// Query toolkit configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryToolkitConfig {
    /// Attach the read-only interceptor to this toolkit.
    #[serde(default)]
    pub read_only: bool,
    /// Name of the default backend. Must be a configured instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_connection: Option<String>,
    /// Named backend instances.
    #[serde(default)]
    pub instances: BTreeMap<String, BackendConfig>,
}

/// A single named backend instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Engine coordinator host. Required.
    pub host: String,
    /// Engine port.
    #[serde(default)]
    pub port: u16,
    /// User the backend connects as.
    #[serde(default)]
    pub user: String,
    /// Default catalog.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog: Option<String>,
    /// Default schema.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    /// Shown in connection listings.
    #[serde(default)]
    pub description: String,
    /// Per-call timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 0,
            user: String::new(),
            catalog: None,
            schema: None,
            description: String::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl BackendConfig {
    /// Validate the instance configuration.
    pub fn validate(&self, name: &str) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::validation(format!(
                "connection '{}': host is required",
                name
            )));
        }
        Ok(())
    }

    /// The per-call timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
