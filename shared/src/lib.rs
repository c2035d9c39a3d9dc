//! Shared library for the quota redemption service
//!
//! - Environment-driven configuration
//! - Application error type and its HTTP mapping

pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::{AppConfig, AuthConfig, Config, DatabaseConfig, RedeemConfig, StoreBackend};
pub use error::{AppError, ErrorResponse, Result};
