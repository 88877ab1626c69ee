//! `tl-domain`: data types shared by the toollink crates.
//!
//! Server configuration, config validation, the shared error type, the
//! orchestrator-facing tool definition, and the persistence port for server
//! records. Nothing here performs I/O against an MCP server.

pub mod config;
pub mod error;
pub mod store;
pub mod tool;
