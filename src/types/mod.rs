//! Protocol and identity types consumed by the tool-call pipeline.

pub mod identity;
pub mod protocol;

pub use identity::{Persona, RoleMapping, UserIdentity};
pub use protocol::{
    ClientCapabilities, Content, ElicitAction, ElicitRequest, ElicitResult, ElicitSchema,
    ProgressNotification, ProgressToken, ToolResult,
};
