//! Forward-only reader over an immutable byte buffer.
//!
//! All integers and floats are little-endian. Every read is bounds-checked
//! against the remaining buffer and either advances the offset by exactly the
//! width it consumed or fails and leaves the offset where it was.

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ProtocolError, Result};

/// Width of the length prefix in front of strings and JSON blobs.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LengthPrefix {
    #[default]
    U16,
    U32,
}

impl LengthPrefix {
    pub fn width(self) -> usize {
        match self {
            LengthPrefix::U16 => 2,
            LengthPrefix::U32 => 4,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ByteCursor<'a> {
    buffer: &'a [u8],
    offset: usize,
    prefix: LengthPrefix,
}

impl<'a> ByteCursor<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self::with_prefix(buffer, LengthPrefix::default())
    }

    pub fn with_prefix(buffer: &'a [u8], prefix: LengthPrefix) -> Self {
        Self {
            buffer,
            offset: 0,
            prefix,
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.offset
    }

    pub fn is_at_end(&self) -> bool {
        self.remaining() == 0
    }

    pub fn prefix(&self) -> LengthPrefix {
        self.prefix
    }

    pub fn set_prefix(&mut self, prefix: LengthPrefix) {
        self.prefix = prefix;
    }

    /// Borrow the next `needed` bytes without consuming them.
    fn peek(&self, needed: usize) -> Result<&'a [u8]> {
        let remaining = self.remaining();
        if needed > remaining {
            return Err(ProtocolError::Underrun { needed, remaining });
        }
        Ok(&self.buffer[self.offset..self.offset + needed])
    }

    /// Consume the next `n` bytes.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let bytes = self.peek(n)?;
        self.offset += n;
        Ok(bytes)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    /// Run `f`, rewinding the cursor if it fails.
    pub(crate) fn atomically<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let start = self.offset;
        let result = f(self);
        if result.is_err() {
            self.offset = start;
        }
        result
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.take(8)?))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(LittleEndian::read_f64(self.take(8)?))
    }

    /// Read a length-prefixed body, consuming nothing unless the whole body fits.
    fn read_prefixed(&mut self, prefix: LengthPrefix) -> Result<&'a [u8]> {
        let width = prefix.width();
        let head = self.peek(width)?;
        let len = match prefix {
            LengthPrefix::U16 => LittleEndian::read_u16(head) as usize,
            LengthPrefix::U32 => LittleEndian::read_u32(head) as usize,
        };
        let total = width.checked_add(len).ok_or(ProtocolError::Underrun {
            needed: usize::MAX,
            remaining: self.remaining(),
        })?;
        let body = &self.peek(total)?[width..];
        self.offset += total;
        Ok(body)
    }

    /// Read a string with the cursor's length prefix.
    pub fn read_string(&mut self) -> Result<String> {
        self.atomically(|c| {
            let prefix = c.prefix;
            let body = c.read_prefixed(prefix)?;
            Ok(std::str::from_utf8(body)?.to_owned())
        })
    }

    /// Read a string and parse it as JSON. An empty string yields `None`.
    pub fn read_json(&mut self) -> Result<Option<Value>> {
        self.atomically(|c| {
            let text = c.read_string()?;
            if text.is_empty() {
                return Ok(None);
            }
            Ok(Some(serde_json::from_str(&text)?))
        })
    }

    /// Read a binary blob with a `u32` length prefix.
    pub fn read_blob(&mut self) -> Result<Vec<u8>> {
        Ok(self.read_prefixed(LengthPrefix::U32)?.to_vec())
    }
}

/// Write a string with the given length prefix.
pub fn write_string(buf: &mut Vec<u8>, prefix: LengthPrefix, text: &str) -> anyhow::Result<()> {
    match prefix {
        LengthPrefix::U16 => {
            let len = u16::try_from(text.len())
                .map_err(|_| anyhow::anyhow!("string of {} bytes exceeds u16 prefix", text.len()))?;
            buf.write_u16::<LittleEndian>(len)?;
        }
        LengthPrefix::U32 => {
            let len = u32::try_from(text.len())
                .map_err(|_| anyhow::anyhow!("string of {} bytes exceeds u32 prefix", text.len()))?;
            buf.write_u32::<LittleEndian>(len)?;
        }
    }
    buf.extend_from_slice(text.as_bytes());
    Ok(())
}

/// Write an optional JSON value; `None` is written as an empty string.
pub fn write_json(buf: &mut Vec<u8>, prefix: LengthPrefix, value: Option<&Value>) -> anyhow::Result<()> {
    let text = match value {
        Some(v) => serde_json::to_string(v)?,
        None => String::new(),
    };
    write_string(buf, prefix, &text)
}

/// Write a binary blob with a `u32` length prefix.
pub fn write_blob(buf: &mut Vec<u8>, bytes: &[u8]) -> anyhow::Result<()> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| anyhow::anyhow!("blob of {} bytes exceeds u32 prefix", bytes.len()))?;
    buf.write_u32::<LittleEndian>(len)?;
    buf.extend_from_slice(bytes);
    Ok(())
}
