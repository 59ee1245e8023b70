//! Binary frames exchanged with the push gateway.
//!
//! Outbound notifications use one of two layouts:
//!
//! - enhanced (command `1`): `u8 command | u32 id | u32 expiry | u16 token length | token | u16
//!   payload length | payload`
//! - simple (command `0`): `u8 command | u16 token length | token | u16 payload length | payload`
//!
//! The gateway answers only on failure, with a six byte error frame:
//! `u8 command (8) | u8 status | u32 id`. After sending it the gateway closes
//! the connection.

use std::{fmt, io};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::byte_order::{
    read_network_u16,
    read_network_u32,
    write_network_u16,
    write_network_u32,
};

/// Command byte of a simple notification frame.
pub const SIMPLE_COMMAND: u8 = 0;
/// Command byte of an enhanced notification frame.
pub const ENHANCED_COMMAND: u8 = 1;
/// Command byte of an error report sent by the gateway.
pub const ERROR_COMMAND: u8 = 8;
/// Size of an error report frame.
pub const ERROR_FRAME_LEN: usize = 6;

const SIMPLE_HEADER_LEN: usize = 1 + 2;
const ENHANCED_HEADER_LEN: usize = 1 + 4 + 4 + 2;

/// Layout used for outbound notification frames.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrameFormat {
    /// Legacy layout without identifier or expiry. Errors cannot be matched
    /// to individual notifications.
    Simple,
    /// Layout carrying a sequence identifier and expiry.
    #[default]
    Enhanced,
}

impl FrameFormat {
    /// Command byte introducing frames of this layout.
    #[must_use]
    pub const fn command(self) -> u8 {
        match self {
            Self::Simple => SIMPLE_COMMAND,
            Self::Enhanced => ENHANCED_COMMAND,
        }
    }
}

/// One notification as it appears on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PushFrame {
    /// Sequence identifier. Always zero for simple frames.
    pub sequence_id: u32,
    /// Expiry in unix seconds. Always zero for simple frames.
    pub expiry: u32,
    /// Binary device token.
    pub token: Bytes,
    /// UTF-8 JSON payload.
    pub payload: Bytes,
}

/// Encoder and decoder for [`PushFrame`]s in a fixed [`FrameFormat`].
///
/// The client only encodes; decoding is provided for gateway doubles and
/// diagnostics.
#[derive(Clone, Copy, Debug, Default)]
pub struct PushFrameCodec {
    format: FrameFormat,
}

impl PushFrameCodec {
    /// Create a codec for the given layout.
    #[must_use]
    pub const fn new(format: FrameFormat) -> Self { Self { format } }

    /// Layout handled by this codec.
    #[must_use]
    pub const fn format(&self) -> FrameFormat { self.format }

    const fn header_len(&self) -> usize {
        match self.format {
            FrameFormat::Simple => SIMPLE_HEADER_LEN,
            FrameFormat::Enhanced => ENHANCED_HEADER_LEN,
        }
    }
}

fn length_prefix(len: usize, what: &str) -> io::Result<[u8; 2]> {
    u16::try_from(len)
        .map(write_network_u16)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, format!("{what} too large")))
}

impl Encoder<PushFrame> for PushFrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: PushFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let token_len = length_prefix(item.token.len(), "token")?;
        let payload_len = length_prefix(item.payload.len(), "payload")?;
        dst.reserve(self.header_len() + item.token.len() + 2 + item.payload.len());
        dst.put_u8(self.format.command());
        if self.format == FrameFormat::Enhanced {
            dst.put_slice(&write_network_u32(item.sequence_id));
            dst.put_slice(&write_network_u32(item.expiry));
        }
        dst.put_slice(&token_len);
        dst.put_slice(&item.token);
        dst.put_slice(&payload_len);
        dst.put_slice(&item.payload);
        Ok(())
    }
}

impl Decoder for PushFrameCodec {
    type Item = PushFrame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let header_len = self.header_len();
        let Some(header) = src.get(..header_len) else {
            return Ok(None);
        };
        if header[0] != self.format.command() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected command byte {}", header[0]),
            ));
        }
        let token_len = usize::from(read_network_u16([
            header[header_len - 2],
            header[header_len - 1],
        ]));
        let Some(&[high, low]) = src.get(header_len + token_len..header_len + token_len + 2)
        else {
            return Ok(None);
        };
        let payload_len = usize::from(read_network_u16([high, low]));
        let total = header_len + token_len + 2 + payload_len;
        if src.len() < total {
            return Ok(None);
        }

        let mut frame = src.split_to(total);
        frame.advance(1);
        let (sequence_id, expiry) = match self.format {
            FrameFormat::Simple => (0, 0),
            FrameFormat::Enhanced => (frame.get_u32(), frame.get_u32()),
        };
        frame.advance(2);
        let token = frame.split_to(token_len).freeze();
        frame.advance(2);
        let payload = frame.freeze();
        Ok(Some(PushFrame {
            sequence_id,
            expiry,
            token,
            payload,
        }))
    }
}

/// Status codes reported by the gateway in error frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GatewayStatus {
    /// `0`: no errors encountered.
    NoErrors,
    /// `1`: the gateway failed to process the frame.
    ProcessingError,
    /// `2`: the frame carried no device token.
    MissingDeviceToken,
    /// `3`: the topic was missing.
    MissingTopic,
    /// `4`: the frame carried no payload.
    MissingPayload,
    /// `5`: the device token had the wrong size.
    InvalidTokenSize,
    /// `6`: the topic had the wrong size.
    InvalidTopicSize,
    /// `7`: the payload was too large.
    InvalidPayloadSize,
    /// `8`: the device token is not valid for this certificate.
    InvalidToken,
    /// `255`: unspecified failure.
    Unknown,
    /// Any status code outside the documented set.
    Other(u8),
}

impl GatewayStatus {
    /// Numeric code used on the wire.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::NoErrors => 0,
            Self::ProcessingError => 1,
            Self::MissingDeviceToken => 2,
            Self::MissingTopic => 3,
            Self::MissingPayload => 4,
            Self::InvalidTokenSize => 5,
            Self::InvalidTopicSize => 6,
            Self::InvalidPayloadSize => 7,
            Self::InvalidToken => 8,
            Self::Unknown => 255,
            Self::Other(code) => code,
        }
    }

    pub(crate) const fn label(self) -> &'static str {
        match self {
            Self::NoErrors => "no_errors",
            Self::ProcessingError => "processing_error",
            Self::MissingDeviceToken => "missing_device_token",
            Self::MissingTopic => "missing_topic",
            Self::MissingPayload => "missing_payload",
            Self::InvalidTokenSize => "invalid_token_size",
            Self::InvalidTopicSize => "invalid_topic_size",
            Self::InvalidPayloadSize => "invalid_payload_size",
            Self::InvalidToken => "invalid_token",
            Self::Unknown => "unknown",
            Self::Other(_) => "other",
        }
    }
}

impl From<u8> for GatewayStatus {
    fn from(code: u8) -> Self {
        match code {
            0 => Self::NoErrors,
            1 => Self::ProcessingError,
            2 => Self::MissingDeviceToken,
            3 => Self::MissingTopic,
            4 => Self::MissingPayload,
            5 => Self::InvalidTokenSize,
            6 => Self::InvalidTopicSize,
            7 => Self::InvalidPayloadSize,
            8 => Self::InvalidToken,
            255 => Self::Unknown,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for GatewayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label(), self.code())
    }
}

/// Failure report identifying the notification the gateway rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ErrorFrame {
    /// Reason for the rejection.
    pub status: GatewayStatus,
    /// Sequence identifier of the rejected notification.
    pub sequence_id: u32,
}

impl ErrorFrame {
    /// Encode the frame as the gateway would send it.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; ERROR_FRAME_LEN] {
        let id = write_network_u32(self.sequence_id);
        [ERROR_COMMAND, self.status.code(), id[0], id[1], id[2], id[3]]
    }
}

/// Decoder extracting [`ErrorFrame`]s from the gateway's response stream.
///
/// The gateway sends nothing but error frames. A buffer that does not start
/// with the error command is discarded whole rather than searched for one.
#[derive(Clone, Copy, Debug, Default)]
pub struct ErrorFrameDecoder;

impl Decoder for ErrorFrameDecoder {
    type Item = ErrorFrame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(&command) = src.first() else {
            return Ok(None);
        };
        if command != ERROR_COMMAND {
            warn!(command, skipped = src.len(), "discarding unrecognised gateway bytes");
            src.clear();
            return Ok(None);
        }
        let Some(&[_, status, a, b, c, d]) = src.get(..ERROR_FRAME_LEN) else {
            return Ok(None);
        };
        src.advance(ERROR_FRAME_LEN);
        Ok(Some(ErrorFrame {
            status: GatewayStatus::from(status),
            sequence_id: read_network_u32([a, b, c, d]),
        }))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn frame(sequence_id: u32, expiry: u32) -> PushFrame {
        PushFrame {
            sequence_id,
            expiry,
            token: Bytes::from_static(&[0xaa, 0xbb]),
            payload: Bytes::from_static(b"{}"),
        }
    }

    #[test]
    fn enhanced_layout_matches_wire_format() {
        let mut codec = PushFrameCodec::new(FrameFormat::Enhanced);
        let mut dst = BytesMut::new();
        codec
            .encode(frame(0x0102_0304, 0x0a0b_0c0d), &mut dst)
            .expect("encode enhanced frame");
        assert_eq!(
            &dst[..],
            &[
                1, 0x01, 0x02, 0x03, 0x04, 0x0a, 0x0b, 0x0c, 0x0d, 0, 2, 0xaa, 0xbb, 0, 2, b'{',
                b'}'
            ]
        );
    }

    #[test]
    fn simple_layout_omits_identifier_and_expiry() {
        let mut codec = PushFrameCodec::new(FrameFormat::Simple);
        let mut dst = BytesMut::new();
        codec.encode(frame(9, 9), &mut dst).expect("encode simple frame");
        assert_eq!(&dst[..], &[0, 0, 2, 0xaa, 0xbb, 0, 2, b'{', b'}']);
    }

    #[rstest]
    #[case(FrameFormat::Enhanced, frame(77, 1_700_000_000))]
    #[case(FrameFormat::Simple, frame(0, 0))]
    fn decoder_waits_for_complete_frames(#[case] format: FrameFormat, #[case] input: PushFrame) {
        let mut codec = PushFrameCodec::new(format);
        let mut wire = BytesMut::new();
        codec.encode(input.clone(), &mut wire).expect("encode frame");
        let full = wire.clone();

        for cut in 0..full.len() {
            let mut partial = BytesMut::from(&full[..cut]);
            assert!(
                codec.decode(&mut partial).expect("partial decode").is_none(),
                "frame must not decode from {cut} bytes"
            );
        }
        let decoded = codec.decode(&mut wire).expect("decode frame");
        assert_eq!(decoded, Some(input));
        assert!(wire.is_empty());
    }

    #[test]
    fn oversized_token_is_rejected() {
        let mut codec = PushFrameCodec::default();
        let mut dst = BytesMut::new();
        let mut oversized = frame(0, 0);
        oversized.token = Bytes::from(vec![0; usize::from(u16::MAX) + 1]);
        let err = codec.encode(oversized, &mut dst).expect_err("token too large");
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn error_frame_decodes_status_and_identifier() {
        let mut src = BytesMut::from(&[8, 7, 0, 0, 1, 2][..]);
        let decoded = ErrorFrameDecoder.decode(&mut src).expect("decode");
        assert_eq!(
            decoded,
            Some(ErrorFrame {
                status: GatewayStatus::InvalidPayloadSize,
                sequence_id: 258,
            })
        );
    }

    #[test]
    fn error_frame_decoder_discards_noise_without_resyncing() {
        let mut src = BytesMut::from(&[0x42, 0x43, 8, 1, 0, 0, 0, 9][..]);
        assert_eq!(ErrorFrameDecoder.decode(&mut src).expect("decode"), None);
        assert!(src.is_empty(), "a stray error command byte must not start a frame");
    }

    #[test]
    fn error_frame_decoder_waits_for_a_whole_frame() {
        let mut src = BytesMut::from(&[8, 1, 0][..]);
        assert_eq!(ErrorFrameDecoder.decode(&mut src).expect("decode"), None);
        assert_eq!(&src[..], &[8, 1, 0]);
        src.extend_from_slice(&[0, 0, 5]);
        let decoded = ErrorFrameDecoder
            .decode(&mut src)
            .expect("decode")
            .expect("complete frame");
        assert_eq!(decoded.status, GatewayStatus::ProcessingError);
        assert_eq!(decoded.sequence_id, 5);
    }

    #[rstest]
    #[case(0, GatewayStatus::NoErrors)]
    #[case(8, GatewayStatus::InvalidToken)]
    #[case(255, GatewayStatus::Unknown)]
    #[case(42, GatewayStatus::Other(42))]
    fn status_codes_round_trip(#[case] code: u8, #[case] status: GatewayStatus) {
        assert_eq!(GatewayStatus::from(code), status);
        assert_eq!(status.code(), code);
    }

    #[test]
    fn error_frame_to_bytes_matches_layout() {
        let frame = ErrorFrame {
            status: GatewayStatus::InvalidToken,
            sequence_id: 0x0000_0102,
        };
        assert_eq!(frame.to_bytes(), [8, 8, 0, 0, 1, 2]);
    }
}
