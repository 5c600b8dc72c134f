//! Transfer encodings for part bodies and header values.
//!
//! Covers Base64 and Quoted-Printable bodies (RFC 2045) and the
//! encoded-word form for non-ASCII header values (RFC 2047).

use crate::error::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Maximum encoded line length for MIME bodies.
const MAX_LINE_LENGTH: usize = 76;

/// Encodes data as a single line of Base64.
#[must_use]
pub fn encode_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Encodes data as Base64 folded into CRLF-terminated 76 character lines.
#[must_use]
pub fn encode_base64_lines(data: &[u8]) -> String {
    let encoded = encode_base64(data);
    let mut folded = String::with_capacity(encoded.len() + encoded.len() / MAX_LINE_LENGTH * 2);

    // Base64 output is pure ASCII, so byte chunks are valid char boundaries.
    for line in encoded.as_bytes().chunks(MAX_LINE_LENGTH) {
        folded.push_str(&String::from_utf8_lossy(line));
        folded.push_str("\r\n");
    }

    folded
}

/// Decodes Base64 data, ignoring any embedded line breaks or whitespace.
///
/// # Errors
///
/// Returns an error if the input is not valid Base64.
pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    let cleaned: String = data.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD.decode(cleaned).map_err(Into::into)
}

/// Decodes Quoted-Printable text into raw bytes.
///
/// # Errors
///
/// Returns an error if the input contains an invalid escape sequence.
pub fn decode_quoted_printable(text: &str) -> Result<Vec<u8>> {
    let bytes = text.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut index = 0;

    while index < bytes.len() {
        let byte = bytes[index];
        if byte != b'=' {
            decoded.push(byte);
            index += 1;
            continue;
        }

        // Soft line breaks
        match bytes.get(index + 1..index + 3) {
            Some([b'\r', b'\n']) => {
                index += 3;
                continue;
            }
            Some([b'\n', _]) => {
                index += 2;
                continue;
            }
            _ if bytes.get(index + 1) == Some(&b'\n') => {
                index += 2;
                continue;
            }
            _ => {}
        }

        let hex = bytes
            .get(index + 1..index + 3)
            .ok_or_else(|| Error::InvalidEncoding("Incomplete escape sequence".to_string()))?;
        let hex = std::str::from_utf8(hex)
            .map_err(|e| Error::InvalidEncoding(format!("Invalid hex: {e}")))?;
        let value = u8::from_str_radix(hex, 16)
            .map_err(|e| Error::InvalidEncoding(format!("Invalid hex: {e}")))?;
        decoded.push(value);
        index += 3;
    }

    Ok(decoded)
}

/// Encodes a header value as an RFC 2047 encoded-word when it is not plain ASCII.
#[must_use]
pub fn encode_header_value(value: &str) -> String {
    if value.is_ascii() && !value.contains("=?") {
        return value.to_string();
    }

    format!("=?utf-8?B?{}?=", encode_base64(value.as_bytes()))
}
