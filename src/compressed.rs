// metrics1 - Sampling and encoding core for metrics channels
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Compressed array module
//!
//! Sample rows are sent as JSON arrays mixing literal values with signed
//! integer run markers:
//!
//! - a negative marker `-N` stands for `N` consecutive absent positions,
//!   which the receiver fills from the previous row;
//! - a non-negative marker `M` is followed by exactly `M` literal values.
//!
//! ```rust
//! use metrics1::CompressedArrayBuilder;
//! use serde_json::json;
//!
//! let mut builder = CompressedArrayBuilder::new();
//! builder.add(None);
//! builder.add(None);
//! builder.add(Some(json!("v1")));
//! builder.add(Some(json!("v2")));
//! builder.add(None);
//! builder.add(Some(json!("v3")));
//!
//! assert_eq!(
//!     builder.finish(),
//!     vec![json!(-2), json!(2), json!("v1"), json!("v2"), json!(-1), json!(1), json!("v3")]
//! );
//! ```

use crate::error::DecodeError;
use serde_json::Value;

/// Streaming builder for a run-length compressed array
///
/// Literals are appended as they arrive. The length marker of a literal run
/// is reserved as a placeholder when the run opens and patched in place once
/// the run ends, so the row length never has to be known up front.
#[derive(Debug, Clone, Default)]
pub struct CompressedArrayBuilder {
    array: Vec<Value>,
    /// Literals appended since the run's marker slot was reserved
    run_present: usize,
    /// Absent positions since the last marker
    run_absent: usize,
}

impl CompressedArrayBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder with room for `capacity` entries
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            array: Vec::with_capacity(capacity),
            run_present: 0,
            run_absent: 0,
        }
    }

    /// Feed the next position: `Some` for a new literal, `None` for absent
    pub fn add(&mut self, element: Option<Value>) {
        match element {
            None => {
                if self.run_present > 0 {
                    assert_eq!(self.run_absent, 0, "present and absent runs both open");
                    self.close_present_run();
                }
                self.run_absent += 1;
            }
            Some(value) => {
                if self.run_absent > 0 {
                    assert_eq!(self.run_present, 0, "present and absent runs both open");
                    self.close_absent_run();
                    self.array.push(Value::from(0));
                } else if self.run_present == 0 {
                    // Leading literal run still gets its own marker slot
                    self.array.push(Value::from(0));
                }
                self.array.push(value);
                self.run_present += 1;
            }
        }
    }

    /// Flush the open run and return the finished array
    pub fn finish(mut self) -> Vec<Value> {
        if self.run_present > 0 {
            assert_eq!(self.run_absent, 0, "present and absent runs both open");
            self.close_present_run();
        }
        if self.run_absent > 0 {
            assert_eq!(self.run_present, 0, "present and absent runs both open");
            self.close_absent_run();
        }
        self.array
    }

    /// Number of entries written so far, markers included
    pub fn len(&self) -> usize {
        self.array.len()
    }

    /// Check if nothing has been written yet
    ///
    /// An open absent run is not written until it closes, so this can be
    /// true after `add(None)`.
    pub fn is_empty(&self) -> bool {
        self.array.is_empty()
    }

    /// Length of the currently open literal run (0 if none)
    pub fn open_present_run(&self) -> usize {
        self.run_present
    }

    /// Length of the currently open absent run (0 if none)
    pub fn open_absent_run(&self) -> usize {
        self.run_absent
    }

    fn close_present_run(&mut self) {
        let pos = self.array.len() - self.run_present - 1;
        self.array[pos] = Value::from(self.run_present as u64);
        self.run_present = 0;
    }

    fn close_absent_run(&mut self) {
        self.array.push(Value::from(-(self.run_absent as i64)));
        self.run_absent = 0;
    }
}

/// Compress a whole row in one go
pub fn compress_row<I>(row: I) -> Vec<Value>
where
    I: IntoIterator<Item = Option<Value>>,
{
    let iter = row.into_iter();
    let mut builder = CompressedArrayBuilder::with_capacity(iter.size_hint().0 + 1);
    for element in iter {
        builder.add(element);
    }
    builder.finish()
}

/// Compress `current`, marking positions that repeat `previous` as absent
///
/// Positions beyond the end of `previous` are always present. Without a
/// previous row every position is present.
pub fn compress_against(previous: Option<&[Value]>, current: &[Value]) -> Vec<Value> {
    compress_row(current.iter().enumerate().map(|(i, value)| {
        match previous.and_then(|prev| prev.get(i)) {
            Some(last) if last == value => None,
            _ => Some(value.clone()),
        }
    }))
}

/// Most positions [`decode`] will expand a single array into
pub const MAX_DECODED_LEN: usize = 1 << 20;

/// Expand a compressed array back into positions
///
/// Absent positions come back as `None`. Arrays that would expand past
/// [`MAX_DECODED_LEN`] positions are rejected.
pub fn decode(array: &[Value]) -> Result<Vec<Option<Value>>, DecodeError> {
    let mut out = Vec::with_capacity(array.len());
    let mut offset = 0;

    while offset < array.len() {
        let marker = array[offset]
            .as_i64()
            .ok_or(DecodeError::ExpectedMarker { offset })?;

        if marker < 0 {
            let count = marker.unsigned_abs();
            let room = MAX_DECODED_LEN.saturating_sub(out.len()) as u64;
            if count > room {
                return Err(DecodeError::RunTooLong { offset, count });
            }
            out.extend(std::iter::repeat(None).take(count as usize));
            offset += 1;
            continue;
        }

        let needed = marker as usize;
        let available = array.len() - offset - 1;
        if needed > available {
            return Err(DecodeError::Truncated {
                offset,
                needed,
                available,
            });
        }
        let start = offset + 1;
        out.extend(array[start..start + needed].iter().cloned().map(Some));
        offset = start + needed;
    }

    Ok(out)
}
