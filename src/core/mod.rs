//! Core plumbing shared by every kestrel component.
//!
//! Errors and configuration live here; the metric model lives in
//! [`crate::metrics`].

#![warn(missing_docs)]

pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::{Compression, Config, ConfigBuilder, OtlpConfig, ParquetConfig};
pub use error::{KestrelError, Result};
