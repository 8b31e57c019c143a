//! # MSSQL MCP Bridge
//!
//! A Model Context Protocol (MCP) server exposing a Microsoft SQL Server
//! database to LLM tool calls.
//!
//! This crate provides:
//! - **Tools**: read-only queries, stored procedure calls, schema discovery
//!   and a health check
//! - **Connection lifecycle**: a lazily created bb8 pool with liveness
//!   liveness checks, bounded retry with backoff and single-flight creation
//! - **Query safety**: a database whitelist and parser-based SELECT-only
//!   validation with a blocked-substring filter
//! - **Caching**: per-database schema snapshots with a TTL
//!
//! ## Architecture
//!
//! Transport ([`MssqlMcpServer`]) → [`DatabaseService`] (executor and schema
//! cache) → [`database::PoolManager`] → tiberius.

pub mod cache;
pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod handlers;
pub mod resilience;
pub mod security;
pub mod server;
pub mod service;
pub mod shutdown;
pub mod tools;

pub use config::Config;
pub use error::{ErrorKind, ServerError};
pub use server::MssqlMcpServer;
pub use service::DatabaseService;
