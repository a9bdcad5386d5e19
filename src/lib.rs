//! kestrel - host telemetry agent.
//!
//! kestrel collects metric families from producers, stages them per sink
//! and ships them to OTLP/gRPC receivers and to a Parquet directory tree.
//!
//! # Features
//!
//! - **Idempotent staging**: re-sending a family never duplicates metrics
//! - **OTLP export**: cumulative sums, gauges and histograms over gRPC
//! - **Parquet archive**: one single-column file per series with rotation
//! - **Bounded buffering**: a process-wide cap on buffered Parquet rows
//!
//! # Architecture
//!
//! - `metrics`: labels, families, identities and the staging set
//! - `export`: the `Sink` trait and the OTLP and Parquet sinks
//! - `scheduler`: flush timers, producers and the dispatcher
//! - `core`: errors and configuration
//! - `cli`: command-line interface
//!
//! # Example
//!
//! ```no_run
//! use kestrel_lib::core::Config;
//! use kestrel_lib::Application;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let app = Application::new(config)?;
//!     app.run().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod application;
pub mod cli;
pub mod core;
pub mod export;
pub mod metrics;
pub mod scheduler;

// Re-export core types for convenience
pub use crate::application::Application;
pub use crate::core::{Config, KestrelError, Result};
