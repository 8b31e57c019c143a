//! Tool input types with JSON Schema generation.

use crate::database::ProcedureParam;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Input for the execute_query tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExecuteQueryInput {
    /// The SQL query to execute.
    #[schemars(description = "Read-only SQL query to execute. Only SELECT statements are accepted.")]
    pub query: String,

    /// Target database.
    #[serde(default)]
    #[schemars(description = "Database to run the query in (default: the configured database)")]
    pub database: Option<String>,
}

/// Input for the execute_stored_procedure tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExecuteStoredProcedureInput {
    /// Procedure name.
    #[schemars(description = "Stored procedure name, either 'procedure' or 'schema.procedure'")]
    pub procedure: String,

    /// Procedure parameters.
    #[serde(default)]
    #[schemars(
        description = "Parameters as a list of {name, type, value, output}. 'type' is a SQL Server type name such as int, nvarchar or datetime2."
    )]
    pub parameters: Vec<ProcedureParam>,

    /// Target database.
    #[serde(default)]
    #[schemars(description = "Database to run the procedure in (default: the configured database)")]
    pub database: Option<String>,
}

/// Input for the get_schema tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct GetSchemaInput {
    /// Target database.
    #[serde(default)]
    #[schemars(description = "Database to describe (default: the configured database)")]
    pub database: Option<String>,
}
