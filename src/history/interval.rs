//! State intervals, the unit of history storage
//!
//! An interval records that attribute `quark` held `value` during the closed
//! time range `[start, end]`. Inside a node block an interval is laid out as:
//!
//! ```text
//! start: i64 (8) | end: i64 (8) | quark: u32 (4) | value: tag + payload
//! ```

use crate::history::error::{HistoryError, HistoryResult};
use crate::history::value::{ByteReader, StateValue};

/// Fixed part of an interval's on-disk size (start + end + quark)
const INTERVAL_FIXED_SIZE: usize = 8 + 8 + 4;

/// One entry of state history: a value held by one attribute over a closed
/// time range
#[derive(Debug, Clone, PartialEq)]
pub struct Interval {
    /// Start of the range, inclusive
    pub start: i64,
    /// End of the range, inclusive
    pub end: i64,
    /// Attribute handle, assigned by the external namespace resolver
    pub quark: u32,
    /// Value held over the range
    pub value: StateValue,
}

impl Interval {
    /// Create a new interval, validating `start <= end`
    pub fn new(start: i64, end: i64, quark: u32, value: StateValue) -> HistoryResult<Self> {
        if start > end {
            return Err(HistoryError::InvalidInterval(format!(
                "start {} is after end {}",
                start, end
            )));
        }
        let payload = match &value {
            StateValue::Str(s) => s.len(),
            StateValue::Custom(b) => b.len(),
            _ => 0,
        };
        if payload > u16::MAX as usize {
            return Err(HistoryError::InvalidInterval(format!(
                "value payload of {} bytes exceeds the {}-byte encoding limit",
                payload,
                u16::MAX
            )));
        }
        Ok(Self {
            start,
            end,
            quark,
            value,
        })
    }

    /// Bytes this interval occupies inside a node block
    pub fn size_on_disk(&self) -> usize {
        INTERVAL_FIXED_SIZE + self.value.size_on_disk()
    }

    /// True if `t` falls inside the (closed) range
    pub fn contains(&self, t: i64) -> bool {
        self.start <= t && t <= self.end
    }

    /// True if the closed ranges `[self.start, self.end]` and `[start, end]`
    /// share at least one instant
    pub fn intersects(&self, start: i64, end: i64) -> bool {
        self.start <= end && self.end >= start
    }

    /// Append the serialized form to `buf`
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.start.to_le_bytes());
        buf.extend_from_slice(&self.end.to_le_bytes());
        buf.extend_from_slice(&self.quark.to_le_bytes());
        self.value.write_to(buf);
    }

    /// Read an interval back from `reader`
    pub fn read_from(reader: &mut ByteReader<'_>) -> HistoryResult<Self> {
        let start = reader.read_i64()?;
        let end = reader.read_i64()?;
        let quark = reader.read_u32()?;
        let value = StateValue::read_from(reader)?;
        if start > end {
            return Err(HistoryError::Corruption(format!(
                "deserialized interval has start {} after end {}",
                start, end
            )));
        }
        Ok(Self {
            start,
            end,
            quark,
            value,
        })
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {}] quark {} = {}",
            self.start, self.end, self.quark, self.value
        )
    }
}
