//! Database whitelist enforcement.

use crate::error::ServerError;
use tracing::warn;

/// Set of databases callers may target.
///
/// An empty whitelist allows every database. Membership is exact and
/// case-sensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseWhitelist {
    allowed: Vec<String>,
}

impl DatabaseWhitelist {
    /// Build a whitelist, trimming entries and dropping blank ones.
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut allowed: Vec<String> = Vec::new();
        for entry in entries {
            let entry = entry.as_ref().trim();
            if !entry.is_empty() && !allowed.iter().any(|a| a == entry) {
                allowed.push(entry.to_string());
            }
        }
        Self { allowed }
    }

    /// Whether the check is active.
    pub fn is_enabled(&self) -> bool {
        !self.allowed.is_empty()
    }

    pub fn allowed(&self) -> &[String] {
        &self.allowed
    }

    pub fn is_allowed(&self, database: &str) -> bool {
        !self.is_enabled() || self.allowed.iter().any(|a| a == database)
    }

    /// Reject a target database that is not whitelisted.
    pub fn check(&self, database: &str) -> Result<(), ServerError> {
        if self.is_allowed(database) {
            return Ok(());
        }

        warn!(
            database,
            allowed = ?self.allowed,
            "Rejected access to database outside the whitelist"
        );
        Err(ServerError::permission(format!(
            "Access to database '{}' is not allowed",
            database
        ))
        .with_detail("database", database)
        .with_detail("allowed", self.allowed.clone()))
    }
}
