//! Fleet server library.
//!
//! This library exposes the server components for testing.

pub mod config;
pub mod http;
pub mod node;
