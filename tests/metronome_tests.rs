//! Timing tests for the metronome
//!
//! All tests run on a paused tokio clock, so virtual time only moves when
//! every task is waiting on a timer.

use metrics1::*;
use serde_json::json;
use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;
use tokio::time::Instant;

/// Runtime clock plus a manually added offset that stands in for time
/// spent inside tick callbacks
#[derive(Clone)]
struct SkewClock {
    base: MonotonicClock,
    skew: Rc<Cell<i64>>,
}

impl SkewClock {
    fn new() -> Self {
        Self {
            base: MonotonicClock::new(),
            skew: Rc::new(Cell::new(0)),
        }
    }

    fn spend(&self, ms: i64) {
        self.skew.set(self.skew.get() + ms);
    }
}

impl Clock for SkewClock {
    fn now_ms(&self) -> i64 {
        self.base.now_ms() + self.skew.get()
    }
}

#[tokio::test(start_paused = true)]
async fn test_grid_holds_with_slow_callbacks() {
    let clock = SkewClock::new();
    let mut metronome = Metronome::with_clock(clock.clone());
    metronome.arm(Duration::from_millis(100)).unwrap();

    let mut fires = Vec::new();
    for _ in 0..10 {
        let fire = metronome
            .tick(|ts| {
                let observed = clock.now_ms();
                clock.spend(30);
                (ts, observed)
            })
            .await
            .unwrap();
        fires.push(fire);
    }

    for (k, (logical, observed)) in fires.iter().enumerate() {
        assert_eq!(*logical, k as i64 * 100);
        // Fires happen on the grid, not 30ms later each time
        assert!(
            (observed - logical).abs() <= 1,
            "fire {} observed at {} for logical {}",
            k,
            observed,
            logical
        );
    }
    assert_eq!(metronome.late_fires(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_late_callback_catches_up_immediately() {
    let clock = SkewClock::new();
    let start = Instant::now();
    let mut metronome = Metronome::with_clock(clock.clone());
    metronome.arm(Duration::from_millis(100)).unwrap();

    let mut stamps = Vec::new();
    let mut wall = Vec::new();
    for k in 0..6 {
        let ts = metronome
            .tick(|ts| {
                if k == 1 {
                    // Overruns two and a half intervals
                    clock.spend(250);
                }
                ts
            })
            .await
            .unwrap();
        stamps.push(ts);
        wall.push(start.elapsed());
    }

    // No tick skipped
    assert_eq!(stamps, vec![0, 100, 200, 300, 400, 500]);

    // Ticks for 200 and 300 were already due: zero delay after tick 100
    assert_eq!(wall[2], wall[1]);
    assert_eq!(wall[3], wall[1]);
    // Tick 400 waits for the remaining 50ms of its slot
    assert!(wall[4] > wall[3]);
    assert_eq!(metronome.late_fires(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_long_interval_uses_coarse_timer() {
    let mut metronome = Metronome::new();
    let interval = Duration::from_millis(u32::MAX as u64 + 1_500);
    metronome.arm(interval).unwrap();

    let start = Instant::now();
    metronome.tick(|_| ()).await.unwrap();
    assert!(metronome.is_armed());
    assert_eq!(metronome.next_fire(), Some(u32::MAX as i64 + 1_500));

    // Too long for the millisecond timer: whole seconds, remainder dropped
    let coarse_secs = (u32::MAX as u64 + 1_500) / 1000;
    assert_eq!(
        metronome.last_delay(),
        Some(TimerDelay::Seconds(coarse_secs as u32))
    );

    let ts = metronome.tick(|ts| ts).await.unwrap();
    assert_eq!(ts, u32::MAX as i64 + 1_500);
    assert_eq!(start.elapsed(), Duration::from_secs(coarse_secs));
}

#[tokio::test(start_paused = true)]
async fn test_unrepresentable_delay_fails_metronome() {
    let mut metronome = Metronome::new();
    let interval = Duration::from_millis((u32::MAX as u64 + 5) * 1000);
    metronome.arm(interval).unwrap();

    let result = metronome.tick(|ts| ts).await;
    assert!(matches!(
        result,
        Err(MetronomeError::DelayOutOfRange { .. })
    ));
    assert!(!metronome.is_armed());
}

#[tokio::test(start_paused = true)]
async fn test_unrepresentable_delay_closes_channel() {
    struct Sampler;
    impl TickSource for Sampler {
        fn on_tick(&mut self, timestamp: i64, out: &mut Outbound<'_>) -> Result<()> {
            out.send(json!({ "timestamp": timestamp }))
        }
    }

    let registry = SourceRegistry::new("sampler", |_| Ok(Box::new(Sampler) as Box<dyn TickSource>));
    let request = OpenRequest::new().with("interval", (u32::MAX as u64 + 5) * 1000);
    let mut channel = MetricsChannel::open("big", &request, &registry, MemoryTransport::new());
    assert!(channel.is_open());

    channel.run().await;

    assert_eq!(channel.problem(), Some(Problem::InternalError));
    assert_eq!(
        channel.transport().closes(),
        vec![Some(Problem::InternalError)]
    );
    // The first tick still went out before the schedule failed
    assert_eq!(channel.transport().payloads(), vec![&json!({ "timestamp": 0 })]);
}

#[tokio::test(start_paused = true)]
async fn test_stop_while_waiting_cancels_fire() {
    let mut metronome = Metronome::new();
    metronome.arm(Duration::from_millis(100)).unwrap();
    metronome.tick(|_| ()).await.unwrap();

    // Give up on the pending fire half way through its delay
    let waited = tokio::time::timeout(Duration::from_millis(50), metronome.tick(|ts| ts)).await;
    assert!(waited.is_err());
    assert!(metronome.is_armed());

    // The timer survived the dropped future and still fires on the grid
    let ts = metronome.tick(|ts| ts).await.unwrap();
    assert_eq!(ts, 100);

    metronome.stop();
    metronome.stop();
    let waited = tokio::time::timeout(Duration::from_secs(60), metronome.tick(|ts| ts)).await;
    assert!(waited.is_err());
}
