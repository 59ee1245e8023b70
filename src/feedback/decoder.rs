//! Reassembly of feedback records from an unframed byte stream.
//!
//! The feedback service writes back-to-back fixed-size records:
//! `u32 timestamp | u16 token length | 32 token bytes`. Reads may split a
//! record anywhere, so incomplete trailing bytes are held until the next
//! chunk completes them.

use std::{
    io,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio_util::codec::Decoder;
use tracing::warn;

use crate::{
    byte_order::decode_uint,
    token::{DEVICE_TOKEN_LENGTH, DeviceToken},
};

/// Bytes preceding the token in each record.
pub const FEEDBACK_HEADER_LEN: usize = 4 + 2;
/// Size of every feedback record on the wire.
pub const FEEDBACK_RECORD_LEN: usize = FEEDBACK_HEADER_LEN + DEVICE_TOKEN_LENGTH;

/// A device token the service asks the provider to stop targeting.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeedbackRecord {
    /// Unix time at which the service determined the app was gone.
    pub timestamp: u32,
    /// Token that should no longer receive notifications.
    pub token: DeviceToken,
}

impl FeedbackRecord {
    /// The timestamp as a [`SystemTime`].
    #[must_use]
    pub fn time(&self) -> SystemTime { UNIX_EPOCH + Duration::from_secs(u64::from(self.timestamp)) }
}

/// Malformed feedback records.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FeedbackError {
    /// The declared token length does not fit in the fixed record.
    #[error("feedback token length {length} exceeds {max}")]
    InvalidTokenLength {
        /// Declared token length.
        length: usize,
        /// Token bytes available in a record.
        max: usize,
    },
}

impl From<FeedbackError> for io::Error {
    fn from(error: FeedbackError) -> Self { io::Error::new(io::ErrorKind::InvalidData, error) }
}

/// Stateful record reassembler.
///
/// Feed arbitrary chunks with [`FeedbackDecoder::push`]; the returned
/// iterator lazily yields every record completed so far. Output does not
/// depend on where the chunk boundaries fall.
///
/// # Examples
///
/// ```
/// use apnwire::feedback::{FEEDBACK_RECORD_LEN, FeedbackDecoder};
///
/// let mut record = vec![0, 0, 0, 42, 0, 32];
/// record.extend_from_slice(&[0xab; 32]);
///
/// let mut decoder = FeedbackDecoder::new();
/// assert_eq!(decoder.push(&record[..20]).count(), 0);
/// assert_eq!(decoder.buffered(), 20);
///
/// let records: Vec<_> = decoder.push(&record[20..]).collect();
/// assert_eq!(records.len(), 1);
/// let record = records[0].as_ref().expect("well-formed record");
/// assert_eq!(record.timestamp, 42);
/// assert_eq!(decoder.buffered(), 0);
/// # let _ = FEEDBACK_RECORD_LEN;
/// ```
#[derive(Debug, Default)]
pub struct FeedbackDecoder {
    buffer: BytesMut,
}

impl FeedbackDecoder {
    /// Create a decoder with an empty reassembly buffer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(FEEDBACK_RECORD_LEN),
        }
    }

    /// Append `chunk` and iterate over the records it completes.
    ///
    /// Records not drained from the iterator stay buffered and are returned
    /// by the next call.
    pub fn push(&mut self, chunk: &[u8]) -> Records<'_> {
        self.buffer.extend_from_slice(chunk);
        Records { decoder: self }
    }

    /// Bytes of an incomplete record awaiting the next chunk.
    #[must_use]
    pub fn buffered(&self) -> usize { self.buffer.len() }

    /// Discard any partially received record.
    pub fn reset(&mut self) { self.buffer.clear(); }
}

/// Iterator over records completed by a [`FeedbackDecoder::push`] call.
#[derive(Debug)]
pub struct Records<'a> {
    decoder: &'a mut FeedbackDecoder,
}

impl Iterator for Records<'_> {
    type Item = Result<FeedbackRecord, FeedbackError>;

    fn next(&mut self) -> Option<Self::Item> { take_record(&mut self.decoder.buffer) }
}

/// Remove one complete record from the front of `src`, if present.
fn take_record(src: &mut BytesMut) -> Option<Result<FeedbackRecord, FeedbackError>> {
    if src.len() < FEEDBACK_RECORD_LEN {
        return None;
    }
    let record = src.split_to(FEEDBACK_RECORD_LEN);
    Some(parse_record(&record))
}

fn parse_record(record: &[u8]) -> Result<FeedbackRecord, FeedbackError> {
    let header = decode_uint(record, 4, 0).zip(decode_uint(record, 2, 4));
    let (timestamp, length) = header.map_or((0, 0), |(timestamp, length)| {
        (
            u32::try_from(timestamp).unwrap_or(u32::MAX),
            usize::try_from(length).unwrap_or(usize::MAX),
        )
    });
    let token = record
        .get(FEEDBACK_HEADER_LEN..FEEDBACK_HEADER_LEN.saturating_add(length))
        .ok_or(FeedbackError::InvalidTokenLength {
            length,
            max: DEVICE_TOKEN_LENGTH,
        })?;
    Ok(FeedbackRecord {
        timestamp,
        token: DeviceToken::from(token),
    })
}

impl Decoder for FeedbackDecoder {
    type Item = FeedbackRecord;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        take_record(src).transpose().map_err(io::Error::from)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(record) = self.decode(src)? {
            return Ok(Some(record));
        }
        if !src.is_empty() {
            warn!(
                buffered = src.len(),
                record_len = FEEDBACK_RECORD_LEN,
                "feedback stream ended inside a record; dropping partial bytes"
            );
            src.advance(src.len());
        }
        Ok(None)
    }
}
