//! # Nexus Reactor
//!
//! This library renders views by dispatching requests to a pool of stateful
//! JavaScript engines. Engine code can be replaced at runtime without dropping
//! in-flight work, and every render is bounded by a timeout.
//!
//! ## Architecture
//!
//! ```text
//! caller
//!     │
//!     │ Pool::render
//!     ▼
//! Pool (free list + active code version)
//!     │
//!     │ Worker::render (raced against a deadline)
//!     ▼
//! Engine context on its own thread (boa)
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use nexus_reactor::{Pool, Request, RuntimeConfig};
//!
//! # async fn run() -> nexus_reactor::Result<()> {
//! nexus_reactor::init(RuntimeConfig::default())?;
//!
//! let pool = Pool::new("function render(req) { return JSON.stringify({ html: '<p></p>' }); }").await?;
//! let response = pool.render(Request::new("Home")).await?;
//! assert_eq!(response.html.as_deref(), Some("<p></p>"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Stateful Workers**: Each worker keeps one engine context loaded with the server code
//! - **Hot Code Updates**: New code is validated before it replaces the active version
//! - **Timeouts**: Renders that overrun are abandoned and their worker discarded
//! - **Metrics**: Render and worker lifecycle counters with Prometheus export

#![deny(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod render;

// Re-export commonly used types
pub use config::RuntimeConfig;
pub use engine::{init, EngineContext, EngineValue};
pub use error::{ErrorCode, Result, RuntimeError, ScriptError};
pub use metrics::{MetricsCollector, PoolStats};
pub use render::{checksum, Pool, Request, Response, Worker};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Install a `tracing` subscriber for this crate.
///
/// Honors `RUST_LOG` and falls back to `nexus_reactor=info`. Returns `false`
/// when a global subscriber was already installed.
pub fn init_tracing() -> bool {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("nexus_reactor=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_ok()
}
