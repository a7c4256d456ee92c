//! API module
//!
//! This module provides the HTTP API for the mindflow tool.

pub mod server;

// Re-export commonly used types
pub use server::{router, serve, ApiResponse, ServerConfig};
