// metrics1 - Sampling and encoding core for metrics channels
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Channel abstraction module
//!
//! A [`MetricsChannel`] owns one metronome and one metric source and streams
//! what the source produces through a [`Transport`]. The channel is
//! unidirectional: anything received from the peer closes it with
//! `protocol-error`.

use crate::config::{ChannelConfig, OpenRequest};
use crate::error::{ChannelError, Metrics1Error, Problem, Result};
use crate::metronome::{Clock, Metronome, MonotonicClock};
use crate::source::{SourceRegistry, TickSource};
use log::{info, warn};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::future;

/// Payload type name of metrics channels
pub const PAYLOAD_TYPE: &str = "metrics1";

/// Statistics about channel usage
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelMetrics {
    /// Ticks the source has handled
    pub ticks: u64,
    /// Messages handed to the transport
    pub messages_sent: u64,
    /// Inbound payloads received (each one closes the channel)
    pub messages_received: u64,
}

/// Outbound side of the channel framework
pub trait Transport {
    /// Send one payload on `channel`
    fn send(&mut self, channel: &str, payload: Value) -> std::result::Result<(), ChannelError>;

    /// Announce that `channel` closed, with an optional problem code
    fn close(
        &mut self,
        channel: &str,
        problem: Option<Problem>,
    ) -> std::result::Result<(), ChannelError>;
}

/// One unit written to a transport
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A payload message
    Message { channel: String, payload: Value },
    /// The channel closed
    Close {
        channel: String,
        problem: Option<Problem>,
    },
}

impl Frame {
    /// JSON form used on line-oriented transports
    pub fn to_json(&self) -> Value {
        match self {
            Frame::Message { channel, payload } => json!({
                "channel": channel,
                "payload": payload,
            }),
            Frame::Close { channel, problem } => json!({
                "command": "close",
                "channel": channel,
                "problem": problem,
            }),
        }
    }
}

/// Handle a [`TickSource`] uses to send during a tick
pub struct Outbound<'a> {
    channel: &'a str,
    transport: &'a mut dyn Transport,
    metrics: &'a mut ChannelMetrics,
}

impl<'a> Outbound<'a> {
    /// Wrap a transport for one channel
    pub fn new(
        channel: &'a str,
        transport: &'a mut dyn Transport,
        metrics: &'a mut ChannelMetrics,
    ) -> Self {
        Self {
            channel,
            transport,
            metrics,
        }
    }

    /// Send a payload on the channel
    pub fn send(&mut self, payload: Value) -> Result<()> {
        self.transport.send(self.channel, payload)?;
        self.metrics.messages_sent += 1;
        Ok(())
    }

    /// Channel identifier
    pub fn channel(&self) -> &str {
        self.channel
    }
}

/// In-memory transport for tests and local use
#[derive(Debug)]
pub struct MemoryTransport {
    /// Frames waiting to be read
    outgoing: VecDeque<Frame>,
    /// Maximum buffered frames
    max_buffer_size: usize,
}

impl MemoryTransport {
    /// Create a new memory transport
    pub fn new() -> Self {
        Self::with_buffer_size(1000)
    }

    /// Create with custom buffer size
    pub fn with_buffer_size(max_size: usize) -> Self {
        Self {
            outgoing: VecDeque::with_capacity(max_size.min(1024)),
            max_buffer_size: max_size,
        }
    }

    /// Pop the oldest frame
    pub fn pop(&mut self) -> Option<Frame> {
        self.outgoing.pop_front()
    }

    /// Number of buffered frames
    pub fn pending(&self) -> usize {
        self.outgoing.len()
    }

    /// Payloads sent so far, oldest first, without consuming them
    pub fn payloads(&self) -> Vec<&Value> {
        self.outgoing
            .iter()
            .filter_map(|frame| match frame {
                Frame::Message { payload, .. } => Some(payload),
                Frame::Close { .. } => None,
            })
            .collect()
    }

    /// Close frames seen so far
    pub fn closes(&self) -> Vec<Option<Problem>> {
        self.outgoing
            .iter()
            .filter_map(|frame| match frame {
                Frame::Close { problem, .. } => Some(*problem),
                Frame::Message { .. } => None,
            })
            .collect()
    }

    fn push(&mut self, frame: Frame) -> std::result::Result<(), ChannelError> {
        if self.outgoing.len() >= self.max_buffer_size {
            return Err(ChannelError::Transport("send buffer full".to_string()));
        }
        self.outgoing.push_back(frame);
        Ok(())
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MemoryTransport {
    fn send(&mut self, channel: &str, payload: Value) -> std::result::Result<(), ChannelError> {
        self.push(Frame::Message {
            channel: channel.to_string(),
            payload,
        })
    }

    fn close(
        &mut self,
        channel: &str,
        problem: Option<Problem>,
    ) -> std::result::Result<(), ChannelError> {
        // Close frames bypass the buffer limit so a close is never lost
        self.outgoing.push_back(Frame::Close {
            channel: channel.to_string(),
            problem,
        });
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelState {
    Open,
    Closed(Option<Problem>),
}

/// A metrics channel: metronome + source + transport
pub struct MetricsChannel<T: Transport, C: Clock = MonotonicClock> {
    id: String,
    source: Option<Box<dyn TickSource>>,
    metronome: Metronome<C>,
    transport: T,
    state: ChannelState,
    metrics: ChannelMetrics,
}

impl<T: Transport> MetricsChannel<T> {
    /// Open a channel on the runtime clock
    ///
    /// Always returns a channel. If the request is rejected the channel is
    /// already closed and the transport has seen the close.
    pub fn open(
        id: impl Into<String>,
        request: &OpenRequest,
        registry: &SourceRegistry,
        transport: T,
    ) -> Self {
        Self::open_with_clock(id, request, registry, transport, MonotonicClock::new())
    }
}

impl<T: Transport, C: Clock> MetricsChannel<T, C> {
    /// Open a channel on a custom clock
    pub fn open_with_clock(
        id: impl Into<String>,
        request: &OpenRequest,
        registry: &SourceRegistry,
        transport: T,
        clock: C,
    ) -> Self {
        let mut channel = Self {
            id: id.into(),
            source: None,
            metronome: Metronome::with_clock(clock),
            transport,
            state: ChannelState::Open,
            metrics: ChannelMetrics::default(),
        };

        if let Err(err) = channel.start(request, registry) {
            warn!("{}: cannot open metrics channel: {}", channel.id, err);
            channel.close(Some(err.problem()));
        }
        channel
    }

    fn start(&mut self, request: &OpenRequest, registry: &SourceRegistry) -> Result<()> {
        let config = ChannelConfig::from_request(request)?;
        self.source = Some(registry.create(&config)?);
        self.metronome.arm(config.interval)?;
        info!(
            "{}: opened {} channel, source={}, interval={}ms",
            self.id,
            PAYLOAD_TYPE,
            registry.resolve(config.source.as_deref()),
            config.interval_ms()
        );
        Ok(())
    }

    /// Wait for the next tick and let the source sample
    ///
    /// Closes the channel with the matching problem if the source fails or
    /// the next tick cannot be scheduled. Pends forever once closed, so it
    /// can sit in a `select!` next to other channel events.
    pub async fn run_tick(&mut self) {
        let Self {
            id,
            source,
            metronome,
            transport,
            metrics,
            ..
        } = &mut *self;
        let Some(source) = source.as_mut() else {
            return future::pending().await;
        };

        let outcome = metronome
            .tick(|timestamp| {
                let mut out = Outbound::new(id.as_str(), transport, metrics);
                source.on_tick(timestamp, &mut out)
            })
            .await;

        match outcome {
            Ok(Ok(())) => self.metrics.ticks += 1,
            Ok(Err(err)) => {
                warn!("{}: metrics source failed: {}", self.id, err);
                self.close(Some(err.problem()));
            }
            Err(err) => {
                let err = Metrics1Error::from(err);
                warn!("{}: {}", self.id, err);
                self.close(Some(err.problem()));
            }
        }
    }

    /// Tick until the channel closes
    pub async fn run(&mut self) {
        while self.is_open() {
            self.run_tick().await;
        }
    }

    /// Handle a payload from the peer
    ///
    /// Metrics channels define no inbound messages.
    pub fn recv(&mut self, _payload: &[u8]) {
        self.metrics.messages_received += 1;
        warn!("{}: received unexpected {} payload", self.id, PAYLOAD_TYPE);
        self.close(Some(Problem::ProtocolError));
    }

    /// Close the channel
    ///
    /// The metronome is stopped before anything else. Closing twice is a
    /// no-op.
    pub fn close(&mut self, problem: Option<Problem>) {
        if !self.is_open() {
            return;
        }
        self.metronome.stop();
        self.state = ChannelState::Closed(problem);

        if let Some(source) = self.source.as_mut() {
            source.on_close(problem);
        }

        match problem {
            Some(problem) => info!("{}: closing channel: {}", self.id, problem),
            None => info!("{}: closing channel", self.id),
        }
        if let Err(err) = self.transport.close(&self.id, problem) {
            warn!("{}: couldn't send close: {}", self.id, err);
        }
    }

    /// Channel identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Check if the channel is still open
    pub fn is_open(&self) -> bool {
        self.state == ChannelState::Open
    }

    /// Problem the channel closed with; `None` while open or on a clean close
    pub fn problem(&self) -> Option<Problem> {
        match self.state {
            ChannelState::Open => None,
            ChannelState::Closed(problem) => problem,
        }
    }

    /// Get channel metrics
    pub fn metrics(&self) -> &ChannelMetrics {
        &self.metrics
    }

    /// The channel's metronome
    pub fn metronome(&self) -> &Metronome<C> {
        &self.metronome
    }

    /// The underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }
}

impl<T: Transport, C: Clock> Drop for MetricsChannel<T, C> {
    fn drop(&mut self) {
        self.metronome.stop();
    }
}
