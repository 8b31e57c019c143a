//! ServerHandler implementation for the MSSQL MCP bridge.
//!
//! This module implements the rmcp `ServerHandler` trait which defines how
//! the server responds to MCP protocol requests.

use crate::server::MssqlMcpServer;
use rmcp::handler::server::ServerHandler;
use rmcp::model::{Implementation, ProtocolVersion, ServerCapabilities, ServerInfo};
use rmcp::tool_handler;
use tracing::info;

/// The `#[tool_handler]` macro wires up tool routing automatically.
/// It generates the `list_tools` and `call_tool` method implementations.
#[tool_handler]
impl ServerHandler for MssqlMcpServer {
    /// Server identification - called during initialization handshake.
    fn get_info(&self) -> ServerInfo {
        info!("MCP client requesting server info");

        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,

            capabilities: ServerCapabilities::builder().enable_tools().build(),

            server_info: Implementation {
                name: env!("CARGO_PKG_NAME").to_string(),
                title: Some("MSSQL MCP Bridge".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },

            instructions: Some(build_instructions(self)),
        }
    }
}

/// Build server instructions based on current configuration.
fn build_instructions(server: &MssqlMcpServer) -> String {
    let service = server.service();
    let mut instructions = String::new();

    instructions.push_str("# MSSQL MCP Bridge\n\n");
    instructions.push_str("Read-only access to a Microsoft SQL Server instance.\n\n");
    instructions.push_str(&format!(
        "**Default database:** `{}`\n\n",
        service.default_database()
    ));

    let whitelist = service.whitelist();
    if whitelist.is_enabled() {
        instructions.push_str(&format!(
            "**Allowed databases:** {}\n\n",
            whitelist
                .allowed()
                .iter()
                .map(|db| format!("`{}`", db))
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }

    instructions.push_str("### Tools\n");
    instructions.push_str("- `get_schema`: tables, columns, types and primary keys\n");
    instructions.push_str("- `execute_query`: SELECT queries only\n");
    instructions.push_str("- `execute_stored_procedure`: typed parameters and OUTPUT values\n");
    instructions.push_str("- `health_check`: connectivity and pool state\n\n");

    instructions.push_str("### Best Practices\n");
    instructions.push_str("1. Call `get_schema` before writing queries\n");
    instructions.push_str("2. Use TOP to bound large result sets\n");
    instructions.push_str("3. Prefer stored procedures for anything that changes data\n");

    instructions
}
