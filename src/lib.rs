//! # metrics1 - Sampling and encoding core for metrics channels
//!
//! A metrics channel fires on a fixed cadence, asks a metric source for the
//! current samples, and streams them as run-length compressed JSON arrays.
//!
//! ## Key Features
//!
//! - **Drift-free metronome**: ticks land on a fixed logical grid, late ticks
//!   are caught up immediately, none are skipped
//! - **Streaming compression**: rows are compressed without knowing their
//!   length, unchanged positions collapse into negative skip counts
//! - **Pluggable sources**: backends implement [`TickSource`] and are picked
//!   from the `"source"` option of the open request
//!
//! ## Quick Start
//!
//! ```rust
//! use metrics1::{compressed, CompressedArrayBuilder};
//! use serde_json::json;
//!
//! let previous = vec![json!(1.0), json!(2.0), json!(3.0)];
//! let current = vec![json!(1.0), json!(2.5), json!(3.0)];
//!
//! // Only the changed position is sent
//! let row = compressed::compress_against(Some(&previous), &current);
//! assert_eq!(row, vec![json!(-1), json!(1), json!(2.5), json!(-1)]);
//!
//! // Builders can also be fed one position at a time
//! let mut builder = CompressedArrayBuilder::new();
//! builder.add(Some(json!("a")));
//! builder.add(None);
//! assert_eq!(builder.finish(), vec![json!(1), json!("a"), json!(-1)]);
//! ```
//!
//! ## Modules
//!
//! - [`metronome`]: Drift-free periodic scheduler
//! - [`compressed`]: Run-length compressed arrays
//! - [`channel`]: Metrics channel, transports, close handling
//! - [`source`]: Metric source trait and open-time dispatch
//! - [`config`]: Open requests and channel configuration
//! - [`error`]: Errors and close problem codes

// Modules
pub mod channel;
pub mod compressed;
pub mod config;
pub mod error;
pub mod metronome;
pub mod source;

// Re-exports for convenient access
pub use channel::{
    ChannelMetrics, Frame, MemoryTransport, MetricsChannel, Outbound, Transport, PAYLOAD_TYPE,
};
pub use compressed::CompressedArrayBuilder;
pub use config::{ChannelConfig, OpenRequest, DEFAULT_INTERVAL_MS};
pub use error::{ChannelError, DecodeError, Metrics1Error, MetronomeError, Problem, Result};
pub use metronome::{Clock, Metronome, MonotonicClock, TimerDelay};
pub use source::{SourceConstructor, SourceRegistry, TickSource};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
