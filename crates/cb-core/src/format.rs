//! Bank Binary Format Helpers
//!
//! All compiled banks share one primitive encoding:
//! ```text
//! integers / floats   little-endian, fixed width
//! bool                one byte, non-zero = true
//! string              i16 length + ASCII bytes
//! ```
//!
//! `BankReader` walks a byte slice and reports truncation as an error
//! instead of panicking. `BankWriter` produces the same encoding.

use crate::error::{CueError, CueResult};

/// Global settings format version
pub const SETTINGS_FORMAT_VERSION: i32 = 1;

/// Sound bank format version
pub const SOUND_BANK_FORMAT_VERSION: i32 = 4;

/// Wave bank format version
pub const WAVE_BANK_FORMAT_VERSION: i32 = 4;

// ═══════════════════════════════════════════════════════════════════════════
// READER
// ═══════════════════════════════════════════════════════════════════════════

/// Cursor over a compiled bank blob
#[derive(Debug, Clone)]
pub struct BankReader<'a> {
    bytes: &'a [u8],
    pos: usize,
    what: &'static str,
}

impl<'a> BankReader<'a> {
    /// Create a reader; `what` names the blob in error messages
    pub fn new(bytes: &'a [u8], what: &'static str) -> Self {
        Self {
            bytes,
            pos: 0,
            what,
        }
    }

    /// Current byte offset
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read
    #[inline]
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, len: usize) -> CueResult<&'a [u8]> {
        if self.remaining() < len {
            return Err(CueError::Truncated {
                what: self.what,
                needed: len,
                available: self.remaining(),
            });
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> CueResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> CueResult<u8> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn read_bool(&mut self) -> CueResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_i16(&mut self) -> CueResult<i16> {
        Ok(i16::from_le_bytes(self.take_array()?))
    }

    pub fn read_i32(&mut self) -> CueResult<i32> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    pub fn read_i64(&mut self) -> CueResult<i64> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    pub fn read_f64(&mut self) -> CueResult<f64> {
        Ok(f64::from_le_bytes(self.take_array()?))
    }

    /// Read raw bytes
    pub fn read_bytes(&mut self, len: usize) -> CueResult<&'a [u8]> {
        self.take(len)
    }

    /// Read an i16-length-prefixed ASCII string
    pub fn read_string(&mut self) -> CueResult<String> {
        let len = self.read_i16()?;
        if len < 0 {
            return Err(CueError::Malformed(format!(
                "negative string length {} in {} at offset {}",
                len,
                self.what,
                self.pos - 2
            )));
        }
        let bytes = self.take(len as usize)?;
        if !bytes.is_ascii() {
            return Err(CueError::Malformed(format!(
                "non-ASCII string in {} at offset {}",
                self.what,
                self.pos - bytes.len()
            )));
        }
        // ASCII is always valid UTF-8
        Ok(bytes.iter().map(|&b| b as char).collect())
    }

    /// Read an i32 element count, rejecting negative values
    ///
    /// Every element occupies at least `min_record_size` bytes, so a count
    /// the rest of the blob cannot hold is reported as truncation before
    /// the caller allocates for it.
    pub fn read_count(&mut self, of: &str, min_record_size: usize) -> CueResult<usize> {
        let count = self.read_unbounded_count(of)?;
        let needed = count.saturating_mul(min_record_size.max(1));
        if needed > self.remaining() {
            return Err(CueError::Truncated {
                what: self.what,
                needed,
                available: self.remaining(),
            });
        }
        Ok(count)
    }

    /// Read an i32 element count whose records live outside this blob
    pub fn read_unbounded_count(&mut self, of: &str) -> CueResult<usize> {
        let count = self.read_i32()?;
        usize::try_from(count).map_err(|_| {
            CueError::Malformed(format!("negative {} count {} in {}", of, count, self.what))
        })
    }

    /// Read the leading version field and check it
    pub fn expect_version(&mut self, expected: i32) -> CueResult<()> {
        let found = self.read_i32()?;
        if found != expected {
            return Err(CueError::FormatVersion {
                what: self.what,
                expected,
                found,
            });
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// WRITER
// ═══════════════════════════════════════════════════════════════════════════

/// Builder for compiled bank blobs
#[derive(Debug, Clone, Default)]
pub struct BankWriter {
    bytes: Vec<u8>,
}

impl BankWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.bytes.push(value);
        self
    }

    pub fn write_bool(&mut self, value: bool) -> &mut Self {
        self.write_u8(u8::from(value))
    }

    pub fn write_i16(&mut self, value: i16) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn write_i32(&mut self, value: i32) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn write_i64(&mut self, value: i64) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn write_f64(&mut self, value: f64) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    /// Write an i16-length-prefixed string (truncated to `i16::MAX` bytes)
    pub fn write_string(&mut self, value: &str) -> &mut Self {
        let bytes = value.as_bytes();
        let len = bytes.len().min(i16::MAX as usize);
        self.write_i16(len as i16);
        self.bytes.extend_from_slice(&bytes[..len]);
        self
    }

    /// Write a collection length as i32
    pub fn write_count(&mut self, count: usize) -> &mut Self {
        self.write_i32(i32::try_from(count).unwrap_or(i32::MAX))
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════
