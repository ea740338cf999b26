// metrics1 - Sampling and encoding core for metrics channels
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Metric sources and open-time dispatch
//!
//! A [`TickSource`] is the backend a metrics channel samples on every tick.
//! The [`SourceRegistry`] turns the `"source"` option of an open request
//! into exactly one backend. Unknown or missing names fall back to the
//! default backend, which then validates the request itself.

use crate::channel::Outbound;
use crate::config::ChannelConfig;
use crate::error::{Problem, Result};
use log::debug;
use std::collections::BTreeMap;
use std::fmt;

/// Backend sampled by a metrics channel
pub trait TickSource {
    /// Produce and send one sample set for the logical time `timestamp`
    /// (milliseconds on the metronome's clock)
    fn on_tick(&mut self, timestamp: i64, out: &mut Outbound<'_>) -> Result<()>;

    /// Called once when the channel closes
    fn on_close(&mut self, _problem: Option<Problem>) {}
}

/// Builds a backend from the channel configuration, or rejects it
pub type SourceConstructor = Box<dyn Fn(&ChannelConfig) -> Result<Box<dyn TickSource>>>;

/// Named backend constructors with a default fallback
pub struct SourceRegistry {
    default_name: String,
    constructors: BTreeMap<String, SourceConstructor>,
}

impl SourceRegistry {
    /// Create a registry whose default backend is `name`
    pub fn new<F>(name: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(&ChannelConfig) -> Result<Box<dyn TickSource>> + 'static,
    {
        let default_name = name.into();
        let mut constructors: BTreeMap<String, SourceConstructor> = BTreeMap::new();
        constructors.insert(default_name.clone(), Box::new(constructor));
        Self {
            default_name,
            constructors,
        }
    }

    /// Register another backend, replacing one of the same name
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn(&ChannelConfig) -> Result<Box<dyn TickSource>> + 'static,
    {
        self.constructors.insert(name.into(), Box::new(constructor));
        self
    }

    /// Name of the default backend
    pub fn default_name(&self) -> &str {
        &self.default_name
    }

    /// Registered backend names, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    /// Name of the backend that serves `source`
    pub fn resolve(&self, source: Option<&str>) -> &str {
        let Some(name) = source else {
            return &self.default_name;
        };
        match self.constructors.get_key_value(name) {
            Some((key, _)) => key,
            None => {
                debug!(
                    "unknown metrics source '{}', deferring to '{}'",
                    name, self.default_name
                );
                &self.default_name
            }
        }
    }

    /// Construct the backend for `config`
    pub fn create(&self, config: &ChannelConfig) -> Result<Box<dyn TickSource>> {
        let name = self.resolve(config.source.as_deref());
        let constructor = &self.constructors[name];
        constructor(config)
    }
}

impl fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("default", &self.default_name)
            .field("sources", &self.names().collect::<Vec<_>>())
            .finish()
    }
}
