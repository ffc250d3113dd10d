//! The multi-connection query toolkit and its seams.

pub mod backend;
pub mod dispatcher;
pub mod input;
pub mod query;
pub mod semantic;

pub use backend::{ExecuteOutcome, QueryBackend, QueryRows};
pub use dispatcher::{ConnectionDetail, MultiConnectionConfig, QueryDispatcher};
pub use input::{tool_name, ExplainKind, ToolInput};
pub use query::{QueryToolkit, QUERY_TOOLKIT_KIND};
pub use semantic::{extract_tables, ColumnMetadata, SemanticProvider};
