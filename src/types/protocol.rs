//! Wire-facing protocol shapes.
//!
//! The transport adapter (an external collaborator) speaks a bidirectional
//! JSON message stream. The pipeline only consumes the shapes defined here:
//! tool results, progress notifications, and the elicitation round-trip.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Progress token supplied by the caller on a tool call.
///
/// Echoed verbatim on every progress notification for that call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProgressToken {
    /// String token
    String(String),
    /// Numeric token
    Number(i64),
}

impl fmt::Display for ProgressToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{}", n),
        }
    }
}

/// Progress notification emitted to the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressNotification {
    /// Token from the original request.
    pub progress_token: ProgressToken,
    /// Current progress value (must increase with each notification).
    pub progress: f64,
    /// Optional total value for the operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    /// Optional human-readable progress message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Action taken by the user on an elicitation prompt.
///
/// Every value other than `accept` counts as a decline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElicitAction {
    /// The user confirmed.
    Accept,
    /// The user explicitly declined.
    Decline,
    /// The user dismissed the prompt.
    Cancel,
}

impl ElicitAction {
    /// True only for an explicit accept.
    pub fn is_accepted(self) -> bool {
        matches!(self, Self::Accept)
    }
}

/// Requested response schema for an elicitation.
///
/// The server only ever asks yes/no confirmations, so the schema is a flat
/// object of boolean/string properties.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElicitSchema {
    /// JSON schema type, always `"object"`.
    #[serde(rename = "type")]
    pub schema_type: String,
    /// Property name → JSON schema fragment.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Value>,
}

impl ElicitSchema {
    /// Schema for a bare confirmation prompt.
    pub fn confirmation() -> Self {
        let mut properties = BTreeMap::new();
        properties.insert(
            "confirm".to_string(),
            serde_json::json!({"type": "boolean", "description": "Confirm the operation"}),
        );
        Self {
            schema_type: "object".to_string(),
            properties,
        }
    }
}

/// Elicitation request sent to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElicitRequest {
    /// Prompt shown to the user.
    pub message: String,
    /// Schema of the expected answer.
    pub requested_schema: ElicitSchema,
}

impl ElicitRequest {
    /// Create a confirmation request with the given message.
    pub fn confirmation(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            requested_schema: ElicitSchema::confirmation(),
        }
    }
}

/// Client answer to an elicitation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElicitResult {
    /// The action the user took.
    pub action: ElicitAction,
    /// Structured answer content, when the client provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
}

/// Capabilities the client declared during the handshake.
///
/// Only the subset the pipeline consults is modeled.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientCapabilities {
    /// The client can answer elicitation round-trips.
    #[serde(default)]
    pub elicitation: bool,
}

/// Content item in tool results.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Content {
    /// Text content
    #[serde(rename_all = "camelCase")]
    Text {
        /// The text content
        text: String,
    },
    /// Structured JSON content
    #[serde(rename_all = "camelCase")]
    Json {
        /// The structured payload
        data: Value,
    },
}

impl Content {
    /// Create a text content block.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Create a structured content block.
    pub fn json(data: Value) -> Self {
        Self::Json { data }
    }

    /// Character length of the rendered block, for audit sizing.
    pub fn char_len(&self) -> usize {
        match self {
            Self::Text { text } => text.chars().count(),
            Self::Json { data } => data.to_string().chars().count(),
        }
    }
}

/// Result of a tool invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    /// Result content blocks.
    #[serde(default)]
    pub content: Vec<Content>,
    /// Whether response enrichment was applied.
    #[serde(default)]
    pub enrichment_applied: bool,
}

impl ToolResult {
    /// Result with a single text block.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(text)],
            enrichment_applied: false,
        }
    }

    /// Result with a single structured block.
    pub fn json(data: Value) -> Self {
        Self {
            content: vec![Content::json(data)],
            enrichment_applied: false,
        }
    }

    /// Mark the result as enriched.
    pub fn with_enrichment(mut self) -> Self {
        self.enrichment_applied = true;
        self
    }

    /// Total characters across all content blocks.
    pub fn response_chars(&self) -> usize {
        self.content.iter().map(Content::char_len).sum()
    }
}
