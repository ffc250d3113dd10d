//! User identity and persona shapes.
//!
//! Persona definitions are loaded by an external collaborator; the core only
//! consumes their shapes for tool visibility and audit attribution. The
//! identity attached to the request carrier is the single source of truth
//! for who made a call.

use serde::{Deserialize, Serialize};

/// Identity of the caller, resolved by the transport/auth layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// Stable user identifier.
    pub user_id: String,
    /// Email, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Resolved persona name, when persona mapping is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
}

impl UserIdentity {
    /// Create an identity from a user id.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: None,
            persona: None,
        }
    }

    /// Set the email.
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Set the persona.
    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = Some(persona.into());
        self
    }
}

/// A named role profile deciding which tools a user may see.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Persona {
    /// Persona name (unique).
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Tools visible to this persona. Empty means all registered tools.
    #[serde(default)]
    pub tools: Vec<String>,
}

impl Persona {
    /// Whether this persona may see the named tool.
    pub fn allows(&self, tool: &str) -> bool {
        self.tools.is_empty() || self.tools.iter().any(|t| t == tool)
    }
}

/// Mapping from an upstream role/group claim to a persona.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleMapping {
    /// Upstream role or group name.
    pub role: String,
    /// Persona assigned to that role.
    pub persona: String,
}
