// metrics1 - Sampling and encoding core for metrics channels
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Configuration types for metrics channels

use crate::error::{Metrics1Error, Problem, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Default tick interval in milliseconds
pub const DEFAULT_INTERVAL_MS: u64 = 1000;

/// Options object carried by a channel-open request
///
/// Only `"source"` and `"interval"` are read here; every other field is
/// left for the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpenRequest(Map<String, Value>);

impl OpenRequest {
    /// Create an empty request
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a request from its JSON text
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Set a field, returning the request
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Set a field in place
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Requested backend name; a non-string value counts as absent
    pub fn source(&self) -> Option<&str> {
        self.0.get("source").and_then(Value::as_str)
    }

    /// Raw field lookup
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// All fields
    pub fn options(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for OpenRequest {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Per-channel configuration, resolved from an [`OpenRequest`]
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelConfig {
    /// Tick interval
    pub interval: Duration,

    /// Requested backend, if any
    pub source: Option<String>,

    /// Full option set, for the backend's own validation
    pub options: Map<String, Value>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_INTERVAL_MS),
            source: None,
            options: Map::new(),
        }
    }
}

impl ChannelConfig {
    /// Create a configuration naming a backend
    pub fn with_source(source: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            ..Default::default()
        }
    }

    /// Resolve the options of an open request
    ///
    /// `"interval"` must be a positive integer number of milliseconds when
    /// present.
    pub fn from_request(request: &OpenRequest) -> Result<Self> {
        let interval = match request.get("interval") {
            None | Some(Value::Null) => Duration::from_millis(DEFAULT_INTERVAL_MS),
            Some(value) => match value.as_u64() {
                Some(ms) if ms > 0 => Duration::from_millis(ms),
                _ => {
                    return Err(Metrics1Error::source(
                        Problem::ProtocolError,
                        format!("invalid \"interval\" option: {}", value),
                    ))
                }
            },
        };

        Ok(Self {
            interval,
            source: request.source().map(str::to_string),
            options: request.options().clone(),
        })
    }

    /// Backend option lookup
    pub fn option(&self, key: &str) -> Option<&Value> {
        self.options.get(key)
    }

    /// Interval in whole milliseconds
    pub fn interval_ms(&self) -> u64 {
        self.interval.as_millis() as u64
    }
}
