//! Stored procedure call planning and result decoding.
//!
//! A call is sent as a single parameterized batch: the procedure runs through
//! `EXEC`, output parameters are bound to local variables, and a final
//! trailer row reports the return code, the row count and every output value.

use super::driver::RecordSet;
use super::types::{ParamType, ParamValue};
use crate::constants::{RETURN_VALUE_COLUMN, ROWS_AFFECTED_COLUMN};
use crate::error::ServerError;
use crate::security::{escape_procedure_name, normalize_parameter_name};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt::Write as _;

/// A stored procedure parameter as supplied by the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ProcedureParam {
    /// Parameter name, with or without a leading `@`.
    #[serde(default)]
    pub name: Option<String>,

    /// SQL type name, e.g. `int`, `nvarchar`, `datetime2`.
    #[serde(default, rename = "type")]
    pub param_type: Option<String>,

    /// Value to bind. Omitted or null binds SQL NULL.
    #[serde(default)]
    pub value: Option<Value>,

    /// Whether the value is read back as an OUTPUT parameter.
    #[serde(default)]
    pub output: bool,
}

impl ProcedureParam {
    pub fn input(name: &str, param_type: &str, value: Value) -> Self {
        Self {
            name: Some(name.to_string()),
            param_type: Some(param_type.to_string()),
            value: Some(value),
            output: false,
        }
    }

    pub fn output(name: &str, param_type: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            param_type: Some(param_type.to_string()),
            value: None,
            output: true,
        }
    }
}

/// A validated procedure call ready to send.
#[derive(Debug, Clone)]
pub struct ProcedureCall {
    pub procedure: String,
    pub sql: String,
    pub params: Vec<ParamValue>,
    pub outputs: Vec<String>,
}

/// Validate the procedure name and parameters and build the call batch.
pub fn plan_call(procedure: &str, params: &[ProcedureParam]) -> Result<ProcedureCall, ServerError> {
    if procedure.trim().is_empty() {
        return Err(ServerError::validation("Stored procedure name cannot be empty"));
    }
    let escaped = escape_procedure_name(procedure)?;

    let mut declarations = String::new();
    let mut arguments: Vec<String> = Vec::new();
    let mut bound: Vec<ParamValue> = Vec::new();
    let mut outputs: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for (position, param) in params.iter().enumerate() {
        let raw_name = param
            .name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| {
                ServerError::validation(format!("Parameter {} is missing a name", position + 1))
                    .with_detail("position", position + 1)
            })?;
        let name = normalize_parameter_name(raw_name)?;

        let type_name = param
            .param_type
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                ServerError::validation(format!("Parameter '{}' is missing a type", name))
                    .with_detail("parameter", name.as_str())
            })?;
        let param_type = ParamType::resolve(type_name);

        if !seen.insert(name.to_lowercase()) {
            return Err(
                ServerError::validation(format!("Parameter '{}' is given more than once", name))
                    .with_detail("parameter", name.as_str()),
            );
        }

        let value = param_type.bind(param.value.as_ref()).map_err(|reason| {
            ServerError::validation(format!("Invalid value for parameter '{}': {}", name, reason))
                .with_detail("parameter", name.as_str())
                .with_detail("type", type_name)
        })?;

        if param.output {
            let variable = output_variable(&name);
            if value.is_null() {
                let _ = writeln!(declarations, "DECLARE {} {};", variable, param_type.declaration());
            } else {
                bound.push(value);
                let _ = writeln!(
                    declarations,
                    "DECLARE {} {} = @P{};",
                    variable,
                    param_type.declaration(),
                    bound.len()
                );
            }
            arguments.push(format!("@{} = {} OUTPUT", name, variable));
            outputs.push(name);
        } else {
            bound.push(value);
            arguments.push(format!("@{} = @P{}", name, bound.len()));
        }
    }

    let mut sql = String::new();
    let _ = writeln!(sql, "DECLARE @{} INT;", RETURN_VALUE_COLUMN);
    let _ = writeln!(sql, "DECLARE @{} INT;", ROWS_AFFECTED_COLUMN);
    sql.push_str(&declarations);

    let _ = write!(sql, "EXEC @{} = {}", RETURN_VALUE_COLUMN, escaped);
    if !arguments.is_empty() {
        let _ = write!(sql, " {}", arguments.join(", "));
    }
    sql.push_str(";\n");
    let _ = writeln!(sql, "SET @{} = @@ROWCOUNT;", ROWS_AFFECTED_COLUMN);

    let mut trailer = vec![
        format!("@{0} AS [{0}]", RETURN_VALUE_COLUMN),
        format!("@{0} AS [{0}]", ROWS_AFFECTED_COLUMN),
    ];
    trailer.extend(
        outputs
            .iter()
            .map(|name| format!("{} AS [{}]", output_variable(name), name)),
    );
    let _ = write!(sql, "SELECT {};", trailer.join(", "));

    Ok(ProcedureCall {
        procedure: procedure.trim().to_string(),
        sql,
        params: bound,
        outputs,
    })
}

fn output_variable(name: &str) -> String {
    format!("@__out_{}", name)
}

/// Decoded procedure outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcedureOutcome {
    /// First row-set produced by the procedure, if any.
    pub primary: Option<RecordSet>,
    pub output: Map<String, Value>,
    pub return_value: Value,
    pub rows_affected: Vec<u64>,
}

/// Split the driver's row-sets into the procedure's own result and the
/// trailer row appended by [`plan_call`].
pub fn decode_outcome(call: &ProcedureCall, mut sets: Vec<RecordSet>) -> ProcedureOutcome {
    let has_trailer = sets
        .last()
        .is_some_and(|last| last.column_index(RETURN_VALUE_COLUMN).is_some());
    let trailer = if has_trailer { sets.pop() } else { None };
    let primary = sets.into_iter().next();

    let mut output = Map::new();
    let mut return_value = Value::Null;
    let mut rows_affected = Vec::new();

    if let Some(trailer) = trailer {
        let row = trailer.rows.first();
        let cell = |column: &str| -> Value {
            trailer
                .column_index(column)
                .and_then(|idx| row.and_then(|r| r.get(idx)))
                .cloned()
                .unwrap_or(Value::Null)
        };

        return_value = cell(RETURN_VALUE_COLUMN);
        if let Some(count) = cell(ROWS_AFFECTED_COLUMN).as_u64() {
            rows_affected.push(count);
        }
        for name in &call.outputs {
            output.insert(name.clone(), cell(name));
        }
    }

    ProcedureOutcome {
        primary,
        output,
        return_value,
        rows_affected,
    }
}
