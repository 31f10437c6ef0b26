//! jarida-common — shared foundations for the Jarida pipeline.
//! - Error taxonomy (auth / transient / quality / validation / persist)
//! - Allowlist-capped HTTP client
//! - Bounded retry with exponential backoff
//! - Configuration loading (jarida.toml + environment)

pub mod config;
pub mod error;
pub mod http;
pub mod retry;

pub use error::{ErrorClass, JaridaError, Result};
