//! State values stored in history intervals
//!
//! A `StateValue` is the payload attached to one interval. The variants map
//! one-to-one onto the type tags used in the node block format, so the wire
//! size of a value is fully determined by its variant.

use crate::history::error::{HistoryError, HistoryResult};

/// Type tag for a null value
const TAG_NULL: u8 = 0;
/// Type tag for a 32-bit integer
const TAG_INT: u8 = 1;
/// Type tag for a 64-bit integer
const TAG_LONG: u8 = 2;
/// Type tag for a double
const TAG_DOUBLE: u8 = 3;
/// Type tag for a string
const TAG_STR: u8 = 4;
/// Type tag for opaque bytes
const TAG_CUSTOM: u8 = 5;

/// The value carried by one state interval
#[derive(Debug, Clone, PartialEq)]
pub enum StateValue {
    /// No value (attribute existed but had no state)
    Null,
    /// 32-bit integer state
    Int(i32),
    /// 64-bit integer state
    Long(i64),
    /// Floating-point state
    Double(f64),
    /// String state
    Str(String),
    /// Opaque application-defined bytes
    Custom(Vec<u8>),
}

impl StateValue {
    /// Size of the serialized value, including the type tag byte
    pub fn size_on_disk(&self) -> usize {
        1 + match self {
            StateValue::Null => 0,
            StateValue::Int(_) => 4,
            StateValue::Long(_) => 8,
            StateValue::Double(_) => 8,
            StateValue::Str(s) => 2 + s.len(),
            StateValue::Custom(b) => 2 + b.len(),
        }
    }

    /// Append the serialized form (tag byte + payload) to `buf`
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        match self {
            StateValue::Null => buf.push(TAG_NULL),
            StateValue::Int(v) => {
                buf.push(TAG_INT);
                buf.extend_from_slice(&v.to_le_bytes());
            }
            StateValue::Long(v) => {
                buf.push(TAG_LONG);
                buf.extend_from_slice(&v.to_le_bytes());
            }
            StateValue::Double(v) => {
                buf.push(TAG_DOUBLE);
                buf.extend_from_slice(&v.to_le_bytes());
            }
            StateValue::Str(s) => {
                buf.push(TAG_STR);
                buf.extend_from_slice(&(s.len() as u16).to_le_bytes());
                buf.extend_from_slice(s.as_bytes());
            }
            StateValue::Custom(b) => {
                buf.push(TAG_CUSTOM);
                buf.extend_from_slice(&(b.len() as u16).to_le_bytes());
                buf.extend_from_slice(b);
            }
        }
    }

    /// Read a value back from `reader` (tag byte first)
    pub fn read_from(reader: &mut ByteReader<'_>) -> HistoryResult<Self> {
        let tag = reader.read_u8()?;
        match tag {
            TAG_NULL => Ok(StateValue::Null),
            TAG_INT => Ok(StateValue::Int(reader.read_i32()?)),
            TAG_LONG => Ok(StateValue::Long(reader.read_i64()?)),
            TAG_DOUBLE => Ok(StateValue::Double(reader.read_f64()?)),
            TAG_STR => {
                let len = reader.read_u16()? as usize;
                let bytes = reader.read_bytes(len)?;
                let s = String::from_utf8(bytes.to_vec()).map_err(|_| {
                    HistoryError::Corruption("string value is not valid UTF-8".into())
                })?;
                Ok(StateValue::Str(s))
            }
            TAG_CUSTOM => {
                let len = reader.read_u16()? as usize;
                Ok(StateValue::Custom(reader.read_bytes(len)?.to_vec()))
            }
            other => Err(HistoryError::Corruption(format!(
                "unknown state value tag: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for StateValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateValue::Null => write!(f, "null"),
            StateValue::Int(v) => write!(f, "{}", v),
            StateValue::Long(v) => write!(f, "{}", v),
            StateValue::Double(v) => write!(f, "{}", v),
            StateValue::Str(s) => write!(f, "{}", s),
            StateValue::Custom(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

/// Cursor over a byte slice with little-endian primitive reads
///
/// All reads are bounds-checked; running past the end of the slice is
/// reported as corruption, since block layouts are fixed-size.
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current read position within the buffer
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes remaining past the read position
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Skip `n` bytes forward
    pub fn skip(&mut self, n: usize) -> HistoryResult<()> {
        self.read_bytes(n)?;
        Ok(())
    }

    pub fn read_bytes(&mut self, n: usize) -> HistoryResult<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(HistoryError::Corruption(format!(
                "read of {} bytes at offset {} overflows {}-byte block",
                n,
                self.pos,
                self.buf.len()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> HistoryResult<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16(&mut self) -> HistoryResult<u16> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> HistoryResult<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i32(&mut self) -> HistoryResult<i32> {
        let b = self.read_bytes(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i64(&mut self) -> HistoryResult<i64> {
        let b = self.read_bytes(8)?;
        Ok(i64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub fn read_u64(&mut self) -> HistoryResult<u64> {
        let b = self.read_bytes(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub fn read_f64(&mut self) -> HistoryResult<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }
}
