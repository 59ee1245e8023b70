//! Device tokens identifying a single app installation.
//!
//! Tokens are opaque binary blobs (32 bytes for current devices). They travel
//! on the wire as raw bytes and are exchanged with application servers as
//! lowercase hexadecimal text.

use std::{fmt, str::FromStr};

use thiserror::Error;

/// Length of the device tokens currently issued by the gateway.
pub const DEVICE_TOKEN_LENGTH: usize = 32;

/// Errors raised while parsing hexadecimal token text.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    /// A character outside `[0-9a-fA-F]` was found after whitespace removal.
    #[error("invalid hex digit {digit:?} at position {position}")]
    InvalidHexDigit {
        /// Offset of the offending character in the cleaned text.
        position: usize,
        /// The offending character.
        digit: char,
    },
    /// Strict parsing rejected text with an odd number of hex digits.
    #[error("hex token has odd length {length}")]
    OddLength {
        /// Number of hex digits after whitespace removal.
        length: usize,
    },
}

/// Binary device token.
///
/// # Examples
///
/// ```
/// use apnwire::DeviceToken;
///
/// let token = DeviceToken::from_hex("ab cd 01").expect("valid hex");
/// assert_eq!(token.as_bytes(), &[0xab, 0xcd, 0x01]);
/// assert_eq!(token.to_hex(), "abcd01");
/// ```
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DeviceToken {
    bytes: Box<[u8]>,
}

impl DeviceToken {
    /// Wrap raw token bytes.
    #[must_use]
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into().into_boxed_slice(),
        }
    }

    /// Parse hexadecimal text, ignoring any whitespace.
    ///
    /// Text with an odd number of digits is accepted for compatibility with
    /// older tooling: the dangling digit becomes the high nibble of a final
    /// byte whose low nibble is zero, so `"abc"` parses as `[0xab, 0xc0]`.
    /// Use [`DeviceToken::from_hex_strict`] to reject such input.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::InvalidHexDigit`] if a non-hex character is found.
    pub fn from_hex(text: &str) -> Result<Self, TokenError> {
        let digits = hex_digits(text)?;
        let bytes = digits
            .chunks(2)
            .map(|pair| match *pair {
                [high, low] => (high << 4) | low,
                [high] => high << 4,
                _ => 0,
            })
            .collect::<Vec<_>>();
        Ok(Self::new(bytes))
    }

    /// Parse hexadecimal text, rejecting an odd number of digits.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::OddLength`] for odd-length input and
    /// [`TokenError::InvalidHexDigit`] for non-hex characters.
    pub fn from_hex_strict(text: &str) -> Result<Self, TokenError> {
        let cleaned: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        let length = cleaned.chars().count();
        if length % 2 != 0 {
            return Err(TokenError::OddLength { length });
        }
        Self::from_hex(&cleaned)
    }

    /// Render the token as lowercase hex with no separators.
    #[must_use]
    pub fn to_hex(&self) -> String { hex::encode(&self.bytes) }

    /// Raw token bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] { &self.bytes }

    /// Number of bytes in the token.
    #[must_use]
    pub fn len(&self) -> usize { self.bytes.len() }

    /// Whether the token holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.bytes.is_empty() }
}

fn hex_digits(text: &str) -> Result<Vec<u8>, TokenError> {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .enumerate()
        .map(|(position, digit)| {
            digit
                .to_digit(16)
                .and_then(|value| u8::try_from(value).ok())
                .ok_or(TokenError::InvalidHexDigit { position, digit })
        })
        .collect()
}

impl From<Vec<u8>> for DeviceToken {
    fn from(bytes: Vec<u8>) -> Self { Self::new(bytes) }
}

impl From<&[u8]> for DeviceToken {
    fn from(bytes: &[u8]) -> Self { Self::new(bytes) }
}

impl AsRef<[u8]> for DeviceToken {
    fn as_ref(&self) -> &[u8] { &self.bytes }
}

impl FromStr for DeviceToken {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> { Self::from_hex(s) }
}

impl fmt::Display for DeviceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.to_hex()) }
}

impl fmt::Debug for DeviceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DeviceToken").field(&self.to_hex()).finish()
    }
}

#[cfg(test)]
mod tests {
    use proptest::{collection::vec, prelude::any, prop_assert_eq, proptest};
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("00ff10", &[0x00, 0xff, 0x10])]
    #[case("AB cd\n0e\t", &[0xab, 0xcd, 0x0e])]
    #[case("", &[])]
    #[case("abc", &[0xab, 0xc0])]
    #[case("f", &[0xf0])]
    fn from_hex_parses_digit_pairs(#[case] text: &str, #[case] expected: &[u8]) {
        let token = DeviceToken::from_hex(text).expect("hex should parse");
        assert_eq!(token.as_bytes(), expected);
    }

    #[test]
    fn from_hex_rejects_non_hex_characters() {
        let err = DeviceToken::from_hex("ab zz").expect_err("z is not hex");
        assert_eq!(
            err,
            TokenError::InvalidHexDigit {
                position: 2,
                digit: 'z'
            }
        );
    }

    #[test]
    fn strict_mode_rejects_odd_length() {
        let err = DeviceToken::from_hex_strict("a b c").expect_err("odd length");
        assert_eq!(err, TokenError::OddLength { length: 3 });
        assert!(DeviceToken::from_hex_strict("ab cd").is_ok());
    }

    #[test]
    fn to_hex_pads_small_bytes() {
        let token = DeviceToken::new(vec![0x01, 0x0a, 0xff]);
        assert_eq!(token.to_hex(), "010aff");
        assert_eq!(token.to_string(), "010aff");
        assert_eq!(token.len(), 3);
    }

    #[test]
    fn from_str_uses_lenient_parsing() {
        let token: DeviceToken = "1".parse().expect("lenient parse");
        assert_eq!(token.as_bytes(), &[0x10]);
    }

    proptest! {
        #[test]
        fn hex_text_round_trips(bytes in vec(any::<u8>(), 0..64)) {
            let token = DeviceToken::new(bytes);
            let parsed = DeviceToken::from_hex(&token.to_hex()).expect("own hex parses");
            prop_assert_eq!(parsed, token);
        }
    }
}
