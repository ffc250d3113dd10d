//! Read-only enforcement for SQL-bearing tools.
//!
//! Write detection looks only at the first keyword of the statement after
//! stripping leading whitespace and comments. Keywords appearing mid-query
//! (`SELECT delete_flag FROM t`) never trigger rejection.

use crate::error::{Error, Result};
use crate::server::context::{RequestContext, ToolContext};
use crate::server::middleware::ToolMiddleware;
use async_trait::async_trait;

/// Leading keywords that identify a write statement.
const WRITE_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "CREATE", "ALTER", "TRUNCATE", "GRANT", "REVOKE",
    "MERGE", "CALL",
];

/// Strip leading whitespace, `--` line comments and `/* ... */` block
/// comments from a statement.
///
/// Block comments are stripped a single level deep; nested block comments
/// are not supported, and a statement whose stripped remainder is comment
/// residue fails keyword detection closed (treated as non-write).
fn strip_leading_trivia(sql: &str) -> &str {
    let mut rest = sql;
    loop {
        let trimmed = rest.trim_start();
        if let Some(after) = trimmed.strip_prefix("--") {
            rest = match after.find('\n') {
                Some(pos) => &after[pos + 1..],
                None => "",
            };
        } else if let Some(after) = trimmed.strip_prefix("/*") {
            rest = match after.find("*/") {
                Some(pos) => &after[pos + 2..],
                None => "",
            };
        } else {
            return trimmed;
        }
    }
}

/// The first keyword of the statement, uppercased.
fn leading_keyword(sql: &str) -> String {
    strip_leading_trivia(sql)
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect::<String>()
        .to_ascii_uppercase()
}

/// Reject write statements; pass everything else through unchanged.
pub fn ensure_read_only(sql: &str) -> Result<()> {
    let keyword = leading_keyword(sql);
    if WRITE_KEYWORDS.contains(&keyword.as_str()) {
        return Err(Error::ReadOnly);
    }
    Ok(())
}

/// Middleware rejecting write SQL on read-only toolkits.
///
/// Also marks the carrier as read-only enforced, so backends can apply
/// engine-level session flags where supported.
#[derive(Debug, Default)]
pub struct ReadOnlyGuard;

impl ReadOnlyGuard {
    /// Create the guard.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ToolMiddleware for ReadOnlyGuard {
    fn name(&self) -> &'static str {
        "read_only"
    }

    async fn before(&self, cx: RequestContext, tc: &ToolContext) -> Result<RequestContext> {
        if let Some(sql) = tc.input.sql() {
            ensure_read_only(sql)?;
        }
        Ok(cx.with_read_only(true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("INSERT INTO t VALUES (1)")]
    #[test_case("UPDATE t SET a = 1")]
    #[test_case("DELETE FROM t")]
    #[test_case("DROP TABLE t")]
    #[test_case("CREATE TABLE t (a int)")]
    #[test_case("ALTER TABLE t ADD COLUMN b int")]
    #[test_case("TRUNCATE TABLE t")]
    #[test_case("GRANT SELECT ON t TO role")]
    #[test_case("REVOKE SELECT ON t FROM role")]
    #[test_case("MERGE INTO t USING s ON t.id = s.id")]
    #[test_case("CALL system.flush()")]
    fn write_statements_are_blocked(sql: &str) {
        let err = ensure_read_only(sql).unwrap_err();
        assert_eq!(
            err.to_string(),
            "write operations not allowed in read-only mode"
        );
        assert_eq!(err.category(), crate::error::ErrorCategory::ReadOnly);
    }

    #[test_case("SELECT * FROM t")]
    #[test_case("EXPLAIN SELECT * FROM t")]
    #[test_case("SHOW CATALOGS")]
    #[test_case("DESCRIBE t")]
    #[test_case("WITH x AS (SELECT 1) SELECT * FROM x")]
    fn read_statements_pass(sql: &str) {
        assert!(ensure_read_only(sql).is_ok());
    }

    #[test]
    fn detection_is_case_insensitive() {
        assert!(ensure_read_only("delete from t").is_err());
        assert!(ensure_read_only("DeLeTe FROM t").is_err());
        assert!(ensure_read_only("select 1").is_ok());
    }

    #[test]
    fn leading_whitespace_and_comments_are_ignored() {
        assert!(ensure_read_only("   \n\t DELETE FROM t").is_err());
        assert!(ensure_read_only("-- audit note\nDELETE FROM t").is_err());
        assert!(ensure_read_only("/* x */ DELETE FROM t").is_err());
        assert!(ensure_read_only(" /* x */ -- y\n /* z */ INSERT INTO t VALUES (1)").is_err());
        assert!(ensure_read_only("/* x */ SELECT 1").is_ok());
    }

    #[test]
    fn mid_query_keywords_do_not_trigger() {
        assert!(ensure_read_only("SELECT delete_flag FROM t").is_ok());
        assert!(ensure_read_only("SELECT * FROM updates").is_ok());
        assert!(ensure_read_only("SELECT 'DROP TABLE t' FROM dual").is_ok());
    }

    #[test]
    fn keyword_must_stand_alone() {
        // "DELETED" is not "DELETE".
        assert!(ensure_read_only("DELETED_ROWS").is_ok());
        assert!(ensure_read_only("insertion_report").is_ok());
    }

    #[test]
    fn unterminated_comment_fails_closed_to_allow() {
        assert!(ensure_read_only("/* never closed DELETE FROM t").is_ok());
    }

    #[tokio::test]
    async fn guard_checks_sql_and_marks_carrier() {
        use crate::toolkit::input::ToolInput;

        let guard = ReadOnlyGuard::new();
        let tc = ToolContext::new(
            "query",
            ToolInput::parse("query", serde_json::json!({"sql": " /* x */ DELETE FROM t"}))
                .unwrap(),
            "req-1",
            "sess-1",
        );
        let err = guard.before(RequestContext::new(), &tc).await.unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::ReadOnly);

        let tc = ToolContext::new(
            "query",
            ToolInput::parse("query", serde_json::json!({"sql": "SELECT delete_col FROM t"}))
                .unwrap(),
            "req-1",
            "sess-1",
        );
        let cx = guard.before(RequestContext::new(), &tc).await.unwrap();
        assert!(cx.read_only());
    }

    #[tokio::test]
    async fn non_sql_tools_pass_untouched() {
        use crate::toolkit::input::ToolInput;

        let guard = ReadOnlyGuard::new();
        let tc = ToolContext::new(
            "list_connections",
            ToolInput::parse("list_connections", serde_json::json!({})).unwrap(),
            "req-1",
            "sess-1",
        );
        assert!(guard.before(RequestContext::new(), &tc).await.is_ok());
    }
}
