//! Error types for metrics1
//!
//! This module defines all error types used throughout the library, and the
//! [`Problem`] codes a channel reports when it closes.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias for metrics1 operations
pub type Result<T> = std::result::Result<T, Metrics1Error>;

/// Reason a channel was closed, as carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Problem {
    /// The peer sent something this channel type does not accept
    ProtocolError,
    /// Something went wrong inside the channel itself
    InternalError,
    /// The requested source or option is not available here
    NotSupported,
    /// The transport went away
    Disconnected,
}

impl Problem {
    /// Wire representation of the problem code
    pub fn as_str(&self) -> &'static str {
        match self {
            Problem::ProtocolError => "protocol-error",
            Problem::InternalError => "internal-error",
            Problem::NotSupported => "not-supported",
            Problem::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for metrics1 operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Metrics1Error {
    /// Metronome error
    #[error("Metronome error: {0}")]
    Metronome(#[from] MetronomeError),

    /// Compressed array decoding error
    #[error("Decoding error: {0}")]
    Decode(#[from] DecodeError),

    /// Channel error
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// A metric source failed or rejected its options
    #[error("Source error ({problem}): {message}")]
    Source { problem: Problem, message: String },
}

impl Metrics1Error {
    /// Build a source error carrying the problem the channel should close with
    pub fn source(problem: Problem, message: impl Into<String>) -> Self {
        Metrics1Error::Source {
            problem,
            message: message.into(),
        }
    }

    /// Shorthand for a source rejecting its options
    pub fn not_supported(message: impl Into<String>) -> Self {
        Self::source(Problem::NotSupported, message)
    }

    /// Problem code a channel closes with when it hits this error
    pub fn problem(&self) -> Problem {
        match self {
            Metrics1Error::Metronome(_) => Problem::InternalError,
            Metrics1Error::Decode(_) => Problem::ProtocolError,
            Metrics1Error::Channel(_) => Problem::Disconnected,
            Metrics1Error::Source { problem, .. } => *problem,
        }
    }
}

/// Errors raised by the metronome
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetronomeError {
    /// `arm` was called while a timer is still live
    #[error("Metronome is already armed")]
    AlreadyArmed,

    /// Interval is zero or not representable in milliseconds
    #[error("Invalid interval: {interval_ms}ms")]
    InvalidInterval { interval_ms: u128 },

    /// Next fire time does not fit any available timer primitive
    #[error("Delay of {delay_ms}ms cannot be represented by any timer")]
    DelayOutOfRange { delay_ms: i128 },
}

/// Errors while expanding a compressed array
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// A run marker was expected but something else was found
    #[error("Expected run marker at offset {offset}")]
    ExpectedMarker { offset: usize },

    /// A literal run claims more entries than the array holds
    #[error("Truncated run at offset {offset}: need {needed} literals, have {available}")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// An absent run would expand past the decoded length limit
    #[error("Run at offset {offset} of {count} positions exceeds the decode limit")]
    RunTooLong { offset: usize, count: u64 },
}

/// Errors related to the channel and its transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Transport failed to deliver
    #[error("Transport error: {0}")]
    Transport(String),
}
