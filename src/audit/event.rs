//! Audit event model.
//!
//! One event is written per completed tool call. Event creation stamps a
//! URL-safe random ID and a UTC timestamp; everything else is attached
//! through fluent setters. Parameters are sanitized before they reach the
//! store — sensitive keys never leave the process unredacted.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Parameter keys that are always redacted.
pub const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "secret",
    "token",
    "api_key",
    "authorization",
    "credentials",
];

/// The literal stored in place of a sensitive value.
pub const REDACTED: &str = "[REDACTED]";

/// Generate a URL-safe event ID with 128 bits of entropy.
fn new_event_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Replace sensitive keys in a parameter map with [`REDACTED`].
///
/// Pure: `None` maps to `None`, and a new map is returned otherwise.
/// Matching is exact on the key name; other values are copied as-is.
/// Idempotent by construction.
pub fn sanitize_parameters(parameters: Option<&Map<String, Value>>) -> Option<Map<String, Value>> {
    parameters.map(|params| {
        params
            .iter()
            .map(|(key, value)| {
                if SENSITIVE_KEYS.contains(&key.as_str()) {
                    (key.clone(), Value::String(REDACTED.to_string()))
                } else {
                    (key.clone(), value.clone())
                }
            })
            .collect()
    })
}

/// A durable record of one tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// URL-safe random identifier, unique within its creation date.
    pub id: String,
    /// UTC time the event was created.
    pub timestamp: DateTime<Utc>,
    /// Tool that was invoked.
    pub tool_name: String,
    /// Whether the call produced a user-visible error.
    pub success: bool,
    /// Call duration in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    /// Request ID for correlation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Session the call belonged to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Caller's user ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Caller's email.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    /// Caller's persona.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
    /// Kind of the serving toolkit (e.g. `trino`, `datahub`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toolkit_kind: Option<String>,
    /// Name of the serving toolkit instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toolkit_name: Option<String>,
    /// Connection the call was routed to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,
    /// Sanitized call parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Map<String, Value>>,
    /// Error message for failed calls, verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Stable error category for failed calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_category: Option<String>,
    /// Characters across response content blocks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_chars: Option<i64>,
    /// Characters in the serialized request arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_chars: Option<i64>,
    /// Number of response content blocks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_blocks: Option<i64>,
    /// Transport the call arrived on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,
    /// Server/source identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Whether response enrichment was applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrichment_applied: Option<bool>,
    /// Whether the call passed authorization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorized: Option<bool>,
}

impl AuditEvent {
    /// Create an event, stamping ID and timestamp.
    pub fn new(tool_name: impl Into<String>, success: bool) -> Self {
        Self {
            id: new_event_id(),
            timestamp: Utc::now(),
            tool_name: tool_name.into(),
            success,
            duration_ms: None,
            request_id: None,
            session_id: None,
            user_id: None,
            user_email: None,
            persona: None,
            toolkit_kind: None,
            toolkit_name: None,
            connection: None,
            parameters: None,
            error_message: None,
            error_category: None,
            response_chars: None,
            request_chars: None,
            content_blocks: None,
            transport: None,
            source: None,
            enrichment_applied: None,
            authorized: None,
        }
    }

    /// The ISO date the event was created, used for partition-style keys.
    pub fn created_date(&self) -> String {
        self.timestamp.format("%Y-%m-%d").to_string()
    }

    /// Set the duration.
    pub fn with_duration_ms(mut self, duration_ms: i64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Set request and session correlation IDs.
    pub fn with_correlation(
        mut self,
        request_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        self.request_id = Some(request_id.into());
        self.session_id = Some(session_id.into());
        self
    }

    /// Set caller identity fields.
    pub fn with_user(
        mut self,
        user_id: impl Into<String>,
        user_email: Option<String>,
        persona: Option<String>,
    ) -> Self {
        self.user_id = Some(user_id.into());
        self.user_email = user_email;
        self.persona = persona;
        self
    }

    /// Set toolkit attribution.
    pub fn with_toolkit(
        mut self,
        kind: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        self.toolkit_kind = Some(kind.into());
        self.toolkit_name = Some(name.into());
        self
    }

    /// Set the connection the call was routed to.
    pub fn with_connection(mut self, connection: impl Into<String>) -> Self {
        self.connection = Some(connection.into());
        self
    }

    /// Attach parameters, sanitizing them first.
    pub fn with_parameters(mut self, parameters: Option<Map<String, Value>>) -> Self {
        self.parameters = sanitize_parameters(parameters.as_ref());
        self
    }

    /// Set the error message and category for a failed call.
    pub fn with_error(
        mut self,
        message: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        self.error_message = Some(message.into());
        self.error_category = Some(category.into());
        self
    }

    /// Set request/response size accounting.
    pub fn with_sizes(
        mut self,
        request_chars: i64,
        response_chars: i64,
        content_blocks: i64,
    ) -> Self {
        self.request_chars = Some(request_chars);
        self.response_chars = Some(response_chars);
        self.content_blocks = Some(content_blocks);
        self
    }

    /// Set transport and source attribution.
    pub fn with_origin(
        mut self,
        transport: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        self.transport = Some(transport.into());
        self.source = Some(source.into());
        self
    }

    /// Set the enrichment flag.
    pub fn with_enrichment(mut self, applied: bool) -> Self {
        self.enrichment_applied = Some(applied);
        self
    }

    /// Set the authorization flag.
    pub fn with_authorized(mut self, authorized: bool) -> Self {
        self.authorized = Some(authorized);
        self
    }
}
