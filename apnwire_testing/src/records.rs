//! Raw protocol bytes for server doubles.

use apnwire::{ErrorFrame, GatewayStatus, byte_order::encode_uint, feedback::FEEDBACK_RECORD_LEN};

/// Bytes of an error frame reporting `sequence_id` with `status`.
#[must_use]
pub fn error_frame(status: GatewayStatus, sequence_id: u32) -> Vec<u8> {
    ErrorFrame {
        status,
        sequence_id,
    }
    .to_bytes()
    .to_vec()
}

/// Bytes of one feedback record. Tokens shorter than 32 bytes are zero
/// padded to the fixed record size.
#[must_use]
pub fn feedback_record(timestamp: u32, token: &[u8]) -> Vec<u8> {
    let mut bytes = encode_uint(u64::from(timestamp), 4);
    bytes.extend(encode_uint(token.len() as u64, 2));
    bytes.extend_from_slice(token);
    bytes.resize(FEEDBACK_RECORD_LEN.max(bytes.len()), 0);
    bytes
}
