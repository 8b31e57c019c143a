//! MCP Tools for SQL Server operations.
//!
//! - `execute_query`: Run a read-only SELECT query
//! - `execute_stored_procedure`: Call a stored procedure with typed parameters
//! - `get_schema`: Describe the tables and columns of a database
//! - `health_check`: Check the connection pool and report service state
//!
//! Failures are returned as tool errors whose text is
//! `{"error": {"kind", "message", "details", "cause"?}}`.

mod inputs;

pub use inputs::*;

use crate::error::{ErrorKind, ServerError};
use crate::security::truncate_for_log;
use crate::server::MssqlMcpServer;
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content};
use rmcp::{tool, tool_router, ErrorData};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

/// Build the router dispatching every tool below.
pub(crate) fn create_tool_router() -> ToolRouter<MssqlMcpServer> {
    MssqlMcpServer::tool_router()
}

#[tool_router]
impl MssqlMcpServer {
    #[tool(
        description = "Execute a read-only SQL query and return columns, rows and recordCount. Only SELECT statements (including WITH ... SELECT and UNION) are allowed."
    )]
    pub async fn execute_query(
        &self,
        Parameters(input): Parameters<ExecuteQueryInput>,
    ) -> Result<CallToolResult, ErrorData> {
        debug!(
            query = %truncate_for_log(&input.query, 100),
            database = ?input.database,
            "execute_query called"
        );

        let result = self
            .service
            .execute_query(&input.query, input.database.as_deref())
            .await;
        Ok(tool_result("execute_query", result))
    }

    #[tool(
        description = "Execute a stored procedure with typed parameters. Returns any result rows plus output parameters, returnValue and rowsAffected."
    )]
    pub async fn execute_stored_procedure(
        &self,
        Parameters(input): Parameters<ExecuteStoredProcedureInput>,
    ) -> Result<CallToolResult, ErrorData> {
        debug!(
            procedure = %input.procedure,
            params = input.parameters.len(),
            database = ?input.database,
            "execute_stored_procedure called"
        );

        let result = self
            .service
            .execute_stored_procedure(
                &input.procedure,
                &input.parameters,
                input.database.as_deref(),
            )
            .await;
        Ok(tool_result("execute_stored_procedure", result))
    }

    #[tool(
        description = "Get the tables of a database with their columns, data types, nullability and primary keys."
    )]
    pub async fn get_schema(
        &self,
        Parameters(input): Parameters<GetSchemaInput>,
    ) -> Result<CallToolResult, ErrorData> {
        debug!(database = ?input.database, "get_schema called");

        let result = self.service.get_schema(input.database.as_deref()).await;
        let tables = result.as_ref().map(|t| t.as_slice()).map_err(Clone::clone);
        Ok(tool_result("get_schema", tables))
    }

    #[tool(
        description = "Test database connectivity and report pool state, default database and the database whitelist."
    )]
    pub async fn health_check(&self) -> Result<CallToolResult, ErrorData> {
        let report = self.service.health_check().await;
        if !report.healthy {
            warn!(pool_state = %report.pool_state, "Health check failed");
        }
        Ok(tool_result("health_check", Ok(report)))
    }
}

/// Turn a service outcome into a tool result.
fn tool_result<T: Serialize>(tool: &str, result: Result<T, ServerError>) -> CallToolResult {
    match result {
        Ok(value) => match serde_json::to_string_pretty(&value) {
            Ok(text) => CallToolResult::success(vec![Content::text(text)]),
            Err(e) => error_result(&ServerError::new(
                ErrorKind::Unknown,
                format!("Failed to serialize {} result: {}", tool, e),
            )),
        },
        Err(err) => {
            warn!(tool, kind = %err.kind(), error = %err, "Tool call failed");
            error_result(&err)
        }
    }
}

fn error_result(err: &ServerError) -> CallToolResult {
    let body = json!({ "error": err.to_json() });
    CallToolResult::error(vec![Content::text(body.to_string())])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn text_of(result: &CallToolResult) -> Value {
        let text = result.content[0]
            .as_text()
            .map(|t| t.text.clone())
            .unwrap_or_default();
        serde_json::from_str(&text).unwrap()
    }

    #[test]
    fn test_success_result_is_json() {
        let result = tool_result("t", Ok(json!({"recordCount": 0})));
        assert_ne!(result.is_error, Some(true));
        assert_eq!(text_of(&result)["recordCount"], 0);
    }

    #[test]
    fn test_error_result_shape() {
        let err = ServerError::permission("Access to database 'Db3' is not allowed")
            .with_detail("allowed", vec!["Db1", "Db2"]);
        let result = tool_result::<Value>("t", Err(err));

        assert_eq!(result.is_error, Some(true));
        let body = text_of(&result);
        assert_eq!(body["error"]["kind"], "PermissionError");
        assert_eq!(body["error"]["details"]["allowed"], json!(["Db1", "Db2"]));
    }
}
