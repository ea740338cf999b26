// metrics1 Bridge - /proc metrics source
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Metrics source reading the Linux `/proc` filesystem.
//!
//! Recognized open options:
//!
//! - `"proc-root"`: directory to read instead of `/proc`
//! - `"metrics"`: array of metric names to sample (default: all)
//!
//! The first tick sends a meta message describing the metrics. Every tick
//! then sends one compressed row, holding only the values that changed since
//! the previous tick. Values that cannot be read are sent as `null`.

use metrics1::compressed::compress_against;
use metrics1::{ChannelConfig, Metrics1Error, Outbound, Problem, SourceRegistry, TickSource};
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name the source is registered under
pub const SOURCE_NAME: &str = "proc";

const DEFAULT_PROC_ROOT: &str = "/proc";

/// One sampled quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcMetric {
    Load1,
    Load5,
    Load15,
    MemTotal,
    MemAvailable,
    CpuUser,
    CpuSystem,
    CpuIdle,
}

impl ProcMetric {
    pub const ALL: [ProcMetric; 8] = [
        ProcMetric::Load1,
        ProcMetric::Load5,
        ProcMetric::Load15,
        ProcMetric::MemTotal,
        ProcMetric::MemAvailable,
        ProcMetric::CpuUser,
        ProcMetric::CpuSystem,
        ProcMetric::CpuIdle,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ProcMetric::Load1 => "load.1min",
            ProcMetric::Load5 => "load.5min",
            ProcMetric::Load15 => "load.15min",
            ProcMetric::MemTotal => "memory.total",
            ProcMetric::MemAvailable => "memory.available",
            ProcMetric::CpuUser => "cpu.user",
            ProcMetric::CpuSystem => "cpu.system",
            ProcMetric::CpuIdle => "cpu.idle",
        }
    }

    pub fn units(self) -> &'static str {
        match self {
            ProcMetric::Load1 | ProcMetric::Load5 | ProcMetric::Load15 => "",
            ProcMetric::MemTotal | ProcMetric::MemAvailable => "bytes",
            ProcMetric::CpuUser | ProcMetric::CpuSystem | ProcMetric::CpuIdle => "jiffies",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|metric| metric.name() == name)
    }

    fn sample(self, files: &ProcFiles) -> Value {
        let value = match self {
            ProcMetric::Load1 => files.load(0),
            ProcMetric::Load5 => files.load(1),
            ProcMetric::Load15 => files.load(2),
            ProcMetric::MemTotal => files.meminfo_bytes("MemTotal"),
            ProcMetric::MemAvailable => files.meminfo_bytes("MemAvailable"),
            ProcMetric::CpuUser => files.cpu(0),
            ProcMetric::CpuSystem => files.cpu(2),
            ProcMetric::CpuIdle => files.cpu(3),
        };
        value.unwrap_or(Value::Null)
    }
}

/// File contents read once per tick
#[derive(Debug, Default)]
struct ProcFiles {
    loadavg: Option<String>,
    meminfo: Option<String>,
    stat: Option<String>,
}

impl ProcFiles {
    fn read(root: &Path, metrics: &[ProcMetric]) -> Self {
        let wants = |group: &[ProcMetric]| metrics.iter().any(|m| group.contains(m));
        Self {
            loadavg: wants(&ProcMetric::ALL[0..3])
                .then(|| read_file(root, "loadavg"))
                .flatten(),
            meminfo: wants(&ProcMetric::ALL[3..5])
                .then(|| read_file(root, "meminfo"))
                .flatten(),
            stat: wants(&ProcMetric::ALL[5..8])
                .then(|| read_file(root, "stat"))
                .flatten(),
        }
    }

    /// `loadavg`: "0.52 0.58 0.59 1/389 12345"
    fn load(&self, field: usize) -> Option<Value> {
        let text = self.loadavg.as_deref()?;
        let load: f64 = text.split_whitespace().nth(field)?.parse().ok()?;
        Some(json!(load))
    }

    /// `meminfo`: "MemTotal:       16318480 kB"
    fn meminfo_bytes(&self, key: &str) -> Option<Value> {
        let text = self.meminfo.as_deref()?;
        let line = text
            .lines()
            .find(|line| line.split(':').next() == Some(key))?;
        let mut fields = line.split(':').nth(1)?.split_whitespace();
        let amount: u64 = fields.next()?.parse().ok()?;
        let scale = match fields.next() {
            Some("kB") => 1024,
            _ => 1,
        };
        Some(json!(amount.saturating_mul(scale)))
    }

    /// `stat`: "cpu  user nice system idle iowait ..."
    fn cpu(&self, field: usize) -> Option<Value> {
        let text = self.stat.as_deref()?;
        let line = text.lines().find(|line| line.starts_with("cpu "))?;
        let ticks: u64 = line.split_whitespace().nth(field + 1)?.parse().ok()?;
        Some(json!(ticks))
    }
}

fn read_file(root: &Path, name: &str) -> Option<String> {
    let path = root.join(name);
    match fs::read_to_string(&path) {
        Ok(text) => Some(text),
        Err(e) => {
            debug!("Cannot read {}: {}", path.display(), e);
            None
        }
    }
}

/// `/proc` backend for metrics channels.
#[derive(Debug)]
pub struct ProcSource {
    root: PathBuf,
    metrics: Vec<ProcMetric>,
    interval_ms: u64,
    last: Option<Vec<Value>>,
}

impl ProcSource {
    /// Validate the channel options and build the source.
    pub fn new(config: &ChannelConfig) -> metrics1::Result<Self> {
        let root = match config.option("proc-root") {
            None => PathBuf::from(DEFAULT_PROC_ROOT),
            Some(Value::String(path)) => PathBuf::from(path),
            Some(other) => {
                return Err(Metrics1Error::source(
                    Problem::ProtocolError,
                    format!("\"proc-root\" must be a string, got {}", other),
                ))
            }
        };
        if !root.is_dir() {
            return Err(Metrics1Error::not_supported(format!(
                "{} is not available",
                root.display()
            )));
        }

        let metrics = match config.option("metrics") {
            None => ProcMetric::ALL.to_vec(),
            Some(Value::Array(names)) => names
                .iter()
                .map(|name| {
                    name.as_str()
                        .and_then(ProcMetric::from_name)
                        .ok_or_else(|| {
                            Metrics1Error::not_supported(format!("unknown metric {}", name))
                        })
                })
                .collect::<metrics1::Result<Vec<_>>>()?,
            Some(other) => {
                return Err(Metrics1Error::source(
                    Problem::ProtocolError,
                    format!("\"metrics\" must be an array, got {}", other),
                ))
            }
        };

        Ok(Self {
            root,
            metrics,
            interval_ms: config.interval_ms(),
            last: None,
        })
    }

    fn meta(&self, timestamp: i64) -> Value {
        let metrics: Vec<Value> = self
            .metrics
            .iter()
            .map(|metric| json!({ "name": metric.name(), "units": metric.units() }))
            .collect();
        json!({
            "timestamp": timestamp,
            "interval": self.interval_ms,
            "source": SOURCE_NAME,
            "metrics": metrics,
        })
    }

    fn sample(&self) -> Vec<Value> {
        let files = ProcFiles::read(&self.root, &self.metrics);
        self.metrics.iter().map(|metric| metric.sample(&files)).collect()
    }
}

impl TickSource for ProcSource {
    fn on_tick(&mut self, timestamp: i64, out: &mut Outbound<'_>) -> metrics1::Result<()> {
        if self.last.is_none() {
            out.send(self.meta(timestamp))?;
        }

        let row = self.sample();
        let encoded = compress_against(self.last.as_deref(), &row);
        out.send(json!([encoded]))?;
        self.last = Some(row);
        Ok(())
    }

    fn on_close(&mut self, problem: Option<Problem>) {
        debug!("proc source closed (problem: {:?})", problem);
        self.last = None;
    }
}

/// Registry with `/proc` as the default backend
pub fn registry() -> SourceRegistry {
    SourceRegistry::new(SOURCE_NAME, |config: &ChannelConfig| {
        Ok(Box::new(ProcSource::new(config)?) as Box<dyn TickSource>)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics1::{MemoryTransport, MetricsChannel, OpenRequest};
    use std::io::Write;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, text: &str) {
        let mut file = fs::File::create(dir.path().join(name)).unwrap();
        file.write_all(text.as_bytes()).unwrap();
    }

    fn fake_proc() -> TempDir {
        let dir = TempDir::new().unwrap();
        write(&dir, "loadavg", "0.50 0.25 0.10 1/100 4242\n");
        write(
            &dir,
            "meminfo",
            "MemTotal:        2048 kB\nMemFree:          512 kB\nMemAvailable:    1024 kB\n",
        );
        write(
            &dir,
            "stat",
            "cpu  100 0 50 1000 3 0 0 0 0 0\ncpu0 100 0 50 1000 3 0 0 0 0 0\n",
        );
        dir
    }

    fn request(dir: &TempDir) -> OpenRequest {
        OpenRequest::new()
            .with("interval", 100)
            .with("proc-root", dir.path().to_string_lossy().to_string())
    }

    #[test]
    fn test_metric_names_roundtrip() {
        for metric in ProcMetric::ALL {
            assert_eq!(ProcMetric::from_name(metric.name()), Some(metric));
        }
        assert_eq!(ProcMetric::from_name("disk.io"), None);
    }

    #[test]
    fn test_sample_parses_files() {
        let dir = fake_proc();
        let config = ChannelConfig::from_request(&request(&dir)).unwrap();
        let source = ProcSource::new(&config).unwrap();

        assert_eq!(
            source.sample(),
            vec![
                json!(0.5),
                json!(0.25),
                json!(0.1),
                json!(2048u64 * 1024),
                json!(1024u64 * 1024),
                json!(100),
                json!(50),
                json!(1000),
            ]
        );
    }

    #[test]
    fn test_missing_file_samples_null() {
        let dir = TempDir::new().unwrap();
        write(&dir, "loadavg", "1.00 2.00 3.00 1/1 1\n");
        let request = request(&dir).with("metrics", json!(["load.5min", "cpu.idle"]));
        let config = ChannelConfig::from_request(&request).unwrap();
        let source = ProcSource::new(&config).unwrap();

        assert_eq!(source.sample(), vec![json!(2.0), Value::Null]);
    }

    #[test]
    fn test_unknown_metric_not_supported() {
        let dir = fake_proc();
        let request = request(&dir).with("metrics", json!(["load.1min", "gpu.temp"]));
        let config = ChannelConfig::from_request(&request).unwrap();

        let err = ProcSource::new(&config).unwrap_err();
        assert_eq!(err.problem(), Problem::NotSupported);
    }

    #[test]
    fn test_bad_option_types_are_protocol_errors() {
        let dir = fake_proc();
        let config = ChannelConfig::from_request(&request(&dir).with("metrics", "load.1min")).unwrap();
        assert_eq!(
            ProcSource::new(&config).unwrap_err().problem(),
            Problem::ProtocolError
        );

        let config = ChannelConfig::from_request(&OpenRequest::new().with("proc-root", 7)).unwrap();
        assert_eq!(
            ProcSource::new(&config).unwrap_err().problem(),
            Problem::ProtocolError
        );
    }

    #[test]
    fn test_missing_root_not_supported() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("nowhere");
        let request = OpenRequest::new().with("proc-root", root.to_string_lossy().to_string());
        let config = ChannelConfig::from_request(&request).unwrap();

        assert_eq!(
            ProcSource::new(&config).unwrap_err().problem(),
            Problem::NotSupported
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_streams_changes_only() {
        let dir = fake_proc();
        let request = request(&dir).with("metrics", json!(["load.1min", "memory.available"]));
        let mut channel = MetricsChannel::open("p", &request, &registry(), MemoryTransport::new());
        assert!(channel.is_open());

        channel.run_tick().await;
        channel.run_tick().await;
        write(&dir, "meminfo", "MemTotal: 2048 kB\nMemAvailable: 512 kB\n");
        channel.run_tick().await;

        let payloads: Vec<Value> = channel.transport().payloads().into_iter().cloned().collect();
        assert_eq!(
            payloads,
            vec![
                json!({
                    "timestamp": 0,
                    "interval": 100,
                    "source": "proc",
                    "metrics": [
                        {"name": "load.1min", "units": ""},
                        {"name": "memory.available", "units": "bytes"},
                    ],
                }),
                json!([[2, 0.5, 1024u64 * 1024]]),
                json!([[-2]]),
                json!([[-1, 1, 512u64 * 1024]]),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_request_closes_channel() {
        let dir = fake_proc();
        let request = request(&dir).with("metrics", json!(["nope"]));
        let channel = MetricsChannel::open("p", &request, &registry(), MemoryTransport::new());

        assert!(!channel.is_open());
        assert_eq!(channel.problem(), Some(Problem::NotSupported));
        assert!(channel.transport().payloads().is_empty());
    }
}
