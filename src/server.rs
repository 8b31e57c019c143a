//! MCP server struct definition and initialization.

use crate::config::Config;
use crate::service::DatabaseService;
use rmcp::handler::server::router::tool::ToolRouter;
use std::fmt;
use std::sync::Arc;

/// The MSSQL MCP bridge instance.
///
/// This struct is cloned for each request, but the database service is
/// shared via Arc.
#[derive(Clone)]
pub struct MssqlMcpServer {
    /// Pool, executor and schema cache.
    pub(crate) service: Arc<DatabaseService>,

    /// Tool router for dispatching tool calls.
    pub(crate) tool_router: ToolRouter<Self>,
}

impl MssqlMcpServer {
    /// Create a server around an existing service.
    pub fn new(service: Arc<DatabaseService>) -> Self {
        Self {
            service,
            tool_router: crate::tools::create_tool_router(),
        }
    }

    /// Create a server for the given configuration. No connection is opened.
    pub fn from_config(config: &Config) -> Self {
        Self::new(Arc::new(DatabaseService::from_config(config)))
    }

    /// Get a reference to the database service.
    pub fn service(&self) -> &Arc<DatabaseService> {
        &self.service
    }
}

impl fmt::Debug for MssqlMcpServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MssqlMcpServer")
            .field("default_database", &self.service.default_database())
            .field("pool_state", &self.service.pool_state())
            .finish_non_exhaustive()
    }
}
