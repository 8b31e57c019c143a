//! Security module: database whitelist, read-only query validation and
//! identifier handling.

mod identifiers;
mod validation;
mod whitelist;

pub use identifiers::{
    escape_procedure_name, normalize_parameter_name, quote_database, truncate_for_log,
    validate_database_name, MAX_IDENTIFIER_LENGTH,
};
pub use validation::QueryValidator;
pub use whitelist::DatabaseWhitelist;
