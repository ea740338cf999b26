// metrics1 - Sampling and encoding core for metrics channels
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Metronome module
//!
//! A [`Metronome`] fires on a fixed logical grid: every fire reports the
//! intended timestamp, and the next one is scheduled `interval` after that
//! intended time, never after `now()`. Callbacks that run long are caught up
//! by firing again with zero delay, so no tick is ever skipped and the
//! reported timestamps never drift.
//!
//! The metronome does not spawn anything. The owner awaits [`Metronome::tick`]
//! from its own event loop, which keeps fires strictly sequential.

use crate::error::MetronomeError;
use log::{debug, error, warn};
use std::fmt;
use std::future;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::{sleep, Instant, Sleep};

/// Source of monotonic time in milliseconds
pub trait Clock {
    /// Milliseconds since an arbitrary, fixed epoch
    fn now_ms(&self) -> i64;
}

/// Clock backed by the runtime's monotonic instant
///
/// The epoch is the moment the clock was created. Under a paused tokio
/// runtime this follows virtual time.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Create a clock whose epoch is now
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> i64 {
        i64::try_from(self.origin.elapsed().as_millis()).unwrap_or(i64::MAX)
    }
}

/// Delay handed to the host timer
///
/// Host timers take an unsigned 32-bit argument, either in milliseconds or,
/// for long delays, in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerDelay {
    /// Fine-grained delay
    Millis(u32),
    /// Coarse delay, sub-second part dropped
    Seconds(u32),
}

impl TimerDelay {
    /// Pick the finest primitive that can hold `delay_ms`
    ///
    /// Negative delays are clamped to zero.
    pub fn from_millis(delay_ms: i64) -> Result<Self, MetronomeError> {
        let delay_ms = delay_ms.max(0);
        if let Ok(ms) = u32::try_from(delay_ms) {
            return Ok(TimerDelay::Millis(ms));
        }
        if let Ok(secs) = u32::try_from(delay_ms / 1000) {
            return Ok(TimerDelay::Seconds(secs));
        }
        Err(MetronomeError::DelayOutOfRange {
            delay_ms: delay_ms as i128,
        })
    }

    /// Duration the timer will actually wait
    pub fn as_duration(&self) -> Duration {
        match *self {
            TimerDelay::Millis(ms) => Duration::from_millis(ms as u64),
            TimerDelay::Seconds(secs) => Duration::from_secs(secs as u64),
        }
    }
}

/// Drift-free periodic scheduler for one channel
pub struct Metronome<C: Clock = MonotonicClock> {
    clock: C,
    /// Fixed at arm time
    interval: Option<i64>,
    /// Logical time of the next fire
    next: i64,
    /// At most one live timer
    pending: Option<Pin<Box<Sleep>>>,
    /// Delay the current or most recent timer was armed with
    delay: Option<TimerDelay>,
    /// Fires scheduled with a clamped (zero) delay
    late_fires: u64,
}

impl Metronome<MonotonicClock> {
    /// Create an unarmed metronome on the runtime clock
    pub fn new() -> Self {
        Self::with_clock(MonotonicClock::new())
    }
}

impl Default for Metronome<MonotonicClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> Metronome<C> {
    /// Create an unarmed metronome on a custom clock
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock,
            interval: None,
            next: 0,
            pending: None,
            delay: None,
            late_fires: 0,
        }
    }

    /// Start firing every `interval`, the first fire being immediate
    ///
    /// A metronome is armed once; its interval never changes afterwards.
    pub fn arm(&mut self, interval: Duration) -> Result<(), MetronomeError> {
        if self.interval.is_some() || self.pending.is_some() {
            return Err(MetronomeError::AlreadyArmed);
        }

        let interval_ms = interval.as_millis();
        let interval_ms = match i64::try_from(interval_ms) {
            Ok(ms) if ms > 0 => ms,
            _ => return Err(MetronomeError::InvalidInterval { interval_ms }),
        };

        self.interval = Some(interval_ms);
        self.next = self.clock.now_ms();
        self.pending = Some(Box::pin(sleep(Duration::ZERO)));
        self.delay = Some(TimerDelay::Millis(0));
        debug!("metronome armed: interval={}ms start={}", interval_ms, self.next);
        Ok(())
    }

    /// Wait for the pending fire, run `on_tick` with its logical timestamp,
    /// then schedule the next one
    ///
    /// Pends forever while no timer is live. Dropping the returned future
    /// before the timer elapses leaves the timer in place.
    pub async fn tick<F, T>(&mut self, on_tick: F) -> Result<T, MetronomeError>
    where
        F: FnOnce(i64) -> T,
    {
        match self.pending.as_mut() {
            Some(timer) => timer.as_mut().await,
            None => future::pending().await,
        }
        self.pending = None;

        let output = on_tick(self.next);
        self.reschedule()?;
        Ok(output)
    }

    /// Cancel the pending fire
    ///
    /// Safe to call any number of times, armed or not.
    pub fn stop(&mut self) {
        if self.pending.take().is_some() {
            debug!("metronome stopped at {}", self.next);
        }
    }

    /// Check if a fire is scheduled
    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }

    /// Interval given at arm time
    pub fn interval(&self) -> Option<Duration> {
        self.interval.map(|ms| Duration::from_millis(ms as u64))
    }

    /// Logical timestamp of the next fire, while armed
    pub fn next_fire(&self) -> Option<i64> {
        self.pending.as_ref().map(|_| self.next)
    }

    /// Delay handed to the timer the last time one was armed
    pub fn last_delay(&self) -> Option<TimerDelay> {
        self.delay
    }

    /// Number of fires that were already due when scheduled
    pub fn late_fires(&self) -> u64 {
        self.late_fires
    }

    fn reschedule(&mut self) -> Result<(), MetronomeError> {
        let Some(interval) = self.interval else {
            return Ok(());
        };
        let now = self.clock.now_ms();

        let result = self
            .next
            .checked_add(interval)
            .ok_or(MetronomeError::DelayOutOfRange {
                delay_ms: self.next as i128 + interval as i128 - now as i128,
            })
            .and_then(|next| {
                self.next = next;
                TimerDelay::from_millis(next.saturating_sub(now))
            });

        let delay = match result {
            Ok(delay) => delay,
            Err(err) => {
                error!("metronome cannot schedule next tick: {}", err);
                self.stop();
                return Err(err);
            }
        };

        if self.next < now {
            self.late_fires += 1;
            warn!(
                "metronome running {}ms behind, firing immediately",
                now - self.next
            );
        } else {
            debug!("next tick at {} in {:?}", self.next, delay);
        }

        self.pending = Some(Box::pin(sleep(delay.as_duration())));
        self.delay = Some(delay);
        Ok(())
    }
}

impl<C: Clock> Drop for Metronome<C> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<C: Clock> fmt::Debug for Metronome<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metronome")
            .field("interval", &self.interval)
            .field("next", &self.next)
            .field("armed", &self.pending.is_some())
            .field("delay", &self.delay)
            .field("late_fires", &self.late_fires)
            .finish()
    }
}
