//! # Record Codec
//!
//! Byte-exact encoding of a single log entry.
//!
//! Every mutation of the store is expressed as one immutable [`Record`]
//! appended to the data file. A record is self-describing: a fixed
//! 10-byte header carries the key and value lengths, so a forward scan
//! can always compute where the next record starts.
//!
//! # On-disk layout
//!
//! ```text
//! [KEY_SIZE u32 BE][VALUE_SIZE u32 BE][MARK u16 BE][KEY bytes][VALUE bytes]
//! ```
//!
//! - **KEY_SIZE / VALUE_SIZE**: payload lengths, big-endian.
//! - **MARK**: `0` for a put, `1` for a delete (tombstone).
//!
//! There is no checksum; integrity of the payload is not validated.
//!
//! # Decode ordering
//!
//! [`decode_header`] produces a complete [`RecordHeader`] value from a
//! header-sized array. Readers branch on the returned header only, never
//! on a partially populated record.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------


// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Size of the fixed record header in bytes.
pub const HEADER_SIZE: usize = 10;

/// A header-sized scratch buffer.
pub type HeaderBytes = [u8; HEADER_SIZE];

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by record construction and decoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    /// Key length does not fit the 32-bit size field.
    #[error("key too large ({0} bytes)")]
    KeyTooLarge(usize),

    /// Value length does not fit the 32-bit size field.
    #[error("value too large ({0} bytes)")]
    ValueTooLarge(usize),

    /// Header carried a mark that is neither put nor delete.
    #[error("invalid record mark {0}")]
    InvalidMark(u16),

    /// The buffer ended before the record did.
    #[error("truncated record (need {needed} bytes, have {available})")]
    Truncated {
        /// Bytes required to decode the full record.
        needed: usize,
        /// Bytes actually available.
        available: usize,
    },
}

// ------------------------------------------------------------------------------------------------
// Mark
// ------------------------------------------------------------------------------------------------

/// Tag distinguishing a live value from a tombstone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Mark {
    /// The record stores a value for its key.
    Put = 0,

    /// The record deletes its key.
    Del = 1,
}

impl Mark {
    /// Wire representation of the mark.
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

impl TryFrom<u16> for Mark {
    type Error = RecordError;

    fn try_from(raw: u16) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(Mark::Put),
            1 => Ok(Mark::Del),
            other => Err(RecordError::InvalidMark(other)),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Header
// ------------------------------------------------------------------------------------------------

/// Decoded fixed-size prefix of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Length of the key payload.
    pub key_size: u32,

    /// Length of the value payload.
    pub value_size: u32,

    /// Put or delete.
    pub mark: Mark,
}

impl RecordHeader {
    /// Total encoded length of the record this header describes.
    pub fn record_size(&self) -> u64 {
        HEADER_SIZE as u64 + u64::from(self.key_size) + u64::from(self.value_size)
    }
}

/// Parses a record header without touching the key or value payload.
pub fn decode_header(bytes: &HeaderBytes) -> Result<RecordHeader, RecordError> {
    let key_size = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let value_size = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    let mark = Mark::try_from(u16::from_be_bytes([bytes[8], bytes[9]]))?;

    Ok(RecordHeader {
        key_size,
        value_size,
        mark,
    })
}

// ------------------------------------------------------------------------------------------------
// Record
// ------------------------------------------------------------------------------------------------

/// One immutable log entry.
///
/// Sizes are derived from the owned buffers, which are length-checked at
/// construction, so the persisted `key_size`/`value_size` always agree
/// with the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    key: Vec<u8>,
    value: Vec<u8>,
    mark: Mark,
}

impl Record {
    /// Builds a put record.
    pub fn put(key: Vec<u8>, value: Vec<u8>) -> Result<Self, RecordError> {
        check_len(&key, RecordError::KeyTooLarge)?;
        check_len(&value, RecordError::ValueTooLarge)?;
        Ok(Self {
            key,
            value,
            mark: Mark::Put,
        })
    }

    /// Builds a tombstone for `key`. The value is always empty.
    pub fn delete(key: Vec<u8>) -> Result<Self, RecordError> {
        check_len(&key, RecordError::KeyTooLarge)?;
        Ok(Self {
            key,
            value: Vec::new(),
            mark: Mark::Del,
        })
    }

    /// Reassembles a record from a decoded header and its payload.
    pub(crate) fn from_parts(header: RecordHeader, key: Vec<u8>, value: Vec<u8>) -> Self {
        debug_assert_eq!(header.key_size as usize, key.len());
        debug_assert_eq!(header.value_size as usize, value.len());
        Self {
            key,
            value,
            mark: header.mark,
        }
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn mark(&self) -> Mark {
        self.mark
    }

    pub fn is_tombstone(&self) -> bool {
        self.mark == Mark::Del
    }

    /// Consumes the record, returning the key and value buffers.
    pub fn into_parts(self) -> (Vec<u8>, Vec<u8>) {
        (self.key, self.value)
    }

    /// Consumes the record, returning only the value.
    pub fn into_value(self) -> Vec<u8> {
        self.value
    }

    /// Header describing this record.
    pub fn header(&self) -> RecordHeader {
        // Lengths were checked against u32::MAX on construction.
        RecordHeader {
            key_size: self.key.len() as u32,
            value_size: self.value.len() as u32,
            mark: self.mark,
        }
    }

    /// Encoded length in bytes: `HEADER_SIZE + key_size + value_size`.
    pub fn size(&self) -> u64 {
        self.header().record_size()
    }

    /// Encodes the record into a freshly allocated buffer.
    pub fn encode(&self) -> Vec<u8> {
        let header = self.header();
        let mut buf = Vec::with_capacity(HEADER_SIZE + self.key.len() + self.value.len());
        buf.extend_from_slice(&header.key_size.to_be_bytes());
        buf.extend_from_slice(&header.value_size.to_be_bytes());
        buf.extend_from_slice(&header.mark.as_u16().to_be_bytes());
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);
        buf
    }

    /// Decodes one record from the start of `buf`.
    ///
    /// Trailing bytes after the record are ignored; use [`Record::size`]
    /// to advance past it.
    pub fn decode(buf: &[u8]) -> Result<Self, RecordError> {
        let header_bytes = buf
            .get(..HEADER_SIZE)
            .and_then(|s| <&HeaderBytes>::try_from(s).ok())
            .ok_or(RecordError::Truncated {
                needed: HEADER_SIZE,
                available: buf.len(),
            })?;
        let header = decode_header(header_bytes)?;

        let key_end = HEADER_SIZE + header.key_size as usize;
        let value_end = key_end + header.value_size as usize;
        if buf.len() < value_end {
            return Err(RecordError::Truncated {
                needed: value_end,
                available: buf.len(),
            });
        }

        Ok(Self::from_parts(
            header,
            buf[HEADER_SIZE..key_end].to_vec(),
            buf[key_end..value_end].to_vec(),
        ))
    }
}

/// Rejects payloads whose length cannot be stored in a 32-bit size field.
fn check_len(bytes: &[u8], err: fn(usize) -> RecordError) -> Result<(), RecordError> {
    if u32::try_from(bytes.len()).is_err() {
        return Err(err(bytes.len()));
    }
    Ok(())
}
