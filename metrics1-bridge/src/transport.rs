// metrics1 Bridge - JSON lines transport
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Writes channel frames as one JSON object per line.

use metrics1::{ChannelError, Frame, Problem, Transport};
use serde_json::Value;
use std::io::Write;

/// Transport over any line-oriented writer.
#[derive(Debug)]
pub struct JsonLinesTransport<W: Write> {
    writer: W,
    frames: u64,
}

impl<W: Write> JsonLinesTransport<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, frames: 0 }
    }

    /// Frames written so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<(), ChannelError> {
        let line = serde_json::to_string(&frame.to_json())
            .map_err(|e| ChannelError::Transport(e.to_string()))?;
        writeln!(self.writer, "{}", line)
            .and_then(|_| self.writer.flush())
            .map_err(|e| ChannelError::Transport(e.to_string()))?;
        self.frames += 1;
        Ok(())
    }
}

impl<W: Write> Transport for JsonLinesTransport<W> {
    fn send(&mut self, channel: &str, payload: Value) -> Result<(), ChannelError> {
        self.write_frame(&Frame::Message {
            channel: channel.to_string(),
            payload,
        })
    }

    fn close(&mut self, channel: &str, problem: Option<Problem>) -> Result<(), ChannelError> {
        self.write_frame(&Frame::Close {
            channel: channel.to_string(),
            problem,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io;

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "reader went away"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_one_frame_per_line() {
        let mut buf = Vec::new();
        let mut transport = JsonLinesTransport::new(&mut buf);
        transport.send("m", json!([[2, 1.5, 3]])).unwrap();
        transport.close("m", Some(Problem::InternalError)).unwrap();
        assert_eq!(transport.frames(), 2);

        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<Value> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(
            lines,
            vec![
                json!({"channel": "m", "payload": [[2, 1.5, 3]]}),
                json!({"command": "close", "channel": "m", "problem": "internal-error"}),
            ]
        );
    }

    #[test]
    fn test_clean_close_has_null_problem() {
        let mut buf = Vec::new();
        JsonLinesTransport::new(&mut buf).close("m", None).unwrap();

        let text = String::from_utf8(buf).unwrap();
        assert!(text.ends_with('\n'));
        let frame: Value = serde_json::from_str(text.trim_end()).unwrap();
        assert_eq!(frame["problem"], Value::Null);
        assert_eq!(frame["command"], json!("close"));
    }

    #[test]
    fn test_write_failure_is_transport_error() {
        let mut transport = JsonLinesTransport::new(BrokenPipe);
        let err = transport.send("m", json!(1)).unwrap_err();
        assert!(matches!(err, ChannelError::Transport(_)));
        assert_eq!(transport.frames(), 0);
    }
}
