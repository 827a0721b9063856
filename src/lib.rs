//! Core event-processing engine of a single-process SIEM server.
//!
//! The engine accepts heterogeneous log records from network listeners
//! and agents, enriches and matches them against a detection rule
//! catalogue, generates deduplicated alerts, persists raw events to an
//! append-only store while indexing them for full-text search, and
//! seals everything into a tamper-evident chain of signed blocks.
//!
//! # Example
//!
//! ```no_run
//! use palisade::app::App;
//! use palisade::config::Config;
//!
//! # async fn example() -> palisade::error::Result<()> {
//! let app = App::start(Config::default()).await?;
//! app.ingest(palisade::model::Event::new(
//!     "syslog",
//!     "web-01",
//!     "Failed password for root from 1.2.3.4",
//! ));
//! app.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]

pub use error::{Result, SiemError};
pub use model::{Alert, Event, Severity};

/// Alert persistence and response dispatch
pub mod alerting;

/// Composition root and lifecycle
pub mod app;

/// MITRE technique table
pub mod compliance;

/// Server configuration
pub mod config;

/// Honeytoken matching
pub mod deception;

/// Rule matching, thresholds, deduplication
pub mod detection;

/// Event enrichment chain
pub mod enrichment;

/// Error types
pub mod error;

/// File-integrity monitoring
pub mod fim;

/// Merkle-chained, signed integrity blocks
pub mod forensics;

/// Core data model
pub mod model;

/// Ingestion health counters
pub mod monitoring;

/// NetFlow v5 collection
pub mod netflow;

/// Bounded ingestion pipeline and listeners
pub mod pipeline;

/// Pluggable response actions
pub mod response;

/// Raw store, full-text index, metadata store
pub mod storage;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the tracing subscriber with env-filtered fmt output.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
