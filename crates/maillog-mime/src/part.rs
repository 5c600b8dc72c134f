//! Pre-built MIME body parts.

use crate::content_type::{ContentType, parse_parameters};
use crate::encoding::{decode_base64, decode_quoted_printable, encode_base64_lines};
use crate::error::Result;
use crate::header::Headers;
use std::fmt;

/// Transfer encoding types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    /// 7-bit ASCII.
    SevenBit,
    /// 8-bit binary.
    EightBit,
    /// Base64 encoding.
    Base64,
    /// Quoted-Printable encoding.
    QuotedPrintable,
    /// Binary (no encoding).
    Binary,
}

impl TransferEncoding {
    /// Parses transfer encoding from a header value.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "8bit" => Self::EightBit,
            "base64" => Self::Base64,
            "quoted-printable" => Self::QuotedPrintable,
            "binary" => Self::Binary,
            _ => Self::SevenBit,
        }
    }
}

impl fmt::Display for TransferEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SevenBit => "7bit",
            Self::EightBit => "8bit",
            Self::Base64 => "base64",
            Self::QuotedPrintable => "quoted-printable",
            Self::Binary => "binary",
        })
    }
}

/// A MIME body part: headers plus the body exactly as it would be transmitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    /// Part headers.
    pub headers: Headers,
    /// Part body (transfer-encoded bytes).
    pub body: Vec<u8>,
}

impl Part {
    /// Creates a new part.
    #[must_use]
    pub const fn new(headers: Headers, body: Vec<u8>) -> Self {
        Self { headers, body }
    }

    /// Creates a UTF-8 text part with the given subtype (`plain`, `html`, ...).
    #[must_use]
    pub fn text(sub_type: &str, text: &str) -> Self {
        let mut headers = Headers::new();
        headers.add(
            "Content-Type",
            ContentType::new("text", sub_type)
                .with_parameter("charset", "utf-8")
                .to_string(),
        );
        headers.add("Content-Transfer-Encoding", TransferEncoding::EightBit.to_string());
        Self::new(headers, text.as_bytes().to_vec())
    }

    /// Creates a base64-encoded attachment part.
    #[must_use]
    pub fn attachment(filename: &str, content_type: &ContentType, content: &[u8]) -> Self {
        let mut headers = Headers::new();
        headers.add("Content-Type", content_type.to_string());
        headers.add("Content-Transfer-Encoding", TransferEncoding::Base64.to_string());
        headers.add(
            "Content-Disposition",
            format!("attachment; filename=\"{}\"", filename.replace('"', "\\\"")),
        );
        Self::new(headers, encode_base64_lines(content).into_bytes())
    }

    /// Gets the content type, defaulting to `text/plain` when absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the content type header is invalid.
    pub fn content_type(&self) -> Result<ContentType> {
        self.headers
            .get("content-type")
            .map_or_else(|| Ok(ContentType::text_plain()), ContentType::parse)
    }

    /// Gets the transfer encoding.
    #[must_use]
    pub fn transfer_encoding(&self) -> TransferEncoding {
        self.headers
            .get("content-transfer-encoding")
            .map_or(TransferEncoding::SevenBit, TransferEncoding::parse)
    }

    /// Returns the declared filename.
    ///
    /// Looks at the `filename` parameter of `Content-Disposition` first and
    /// falls back to the `name` parameter of `Content-Type`.
    #[must_use]
    pub fn filename(&self) -> Option<String> {
        let from_disposition = self.headers.get("content-disposition").and_then(|value| {
            parse_parameters(value)
                .into_iter()
                .find(|(key, _)| key == "filename")
                .map(|(_, name)| name)
        });

        from_disposition.or_else(|| {
            self.headers.get("content-type").and_then(|value| {
                parse_parameters(value)
                    .into_iter()
                    .find(|(key, _)| key == "name")
                    .map(|(_, name)| name)
            })
        })
    }

    /// Decodes the body according to the transfer encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if decoding fails.
    pub fn decode_body(&self) -> Result<Vec<u8>> {
        match self.transfer_encoding() {
            TransferEncoding::Base64 => decode_base64(&String::from_utf8_lossy(&self.body)),
            TransferEncoding::QuotedPrintable => {
                decode_quoted_printable(&String::from_utf8_lossy(&self.body))
            }
            _ => Ok(self.body.clone()),
        }
    }

    /// Serializes headers, blank line and body.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.headers.to_string().into_bytes();
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_encoding_parse() {
        assert_eq!(TransferEncoding::parse("7bit"), TransferEncoding::SevenBit);
        assert_eq!(TransferEncoding::parse(" BASE64 "), TransferEncoding::Base64);
        assert_eq!(
            TransferEncoding::parse("quoted-printable"),
            TransferEncoding::QuotedPrintable
        );
    }

    #[test]
    fn test_attachment_round_trip() {
        let part = Part::attachment("report.pdf", &ContentType::new("application", "pdf"), b"%PDF");

        assert_eq!(part.filename().as_deref(), Some("report.pdf"));
        assert_eq!(part.transfer_encoding(), TransferEncoding::Base64);
        assert_eq!(part.content_type().unwrap(), ContentType::new("application", "pdf"));
        assert_eq!(part.decode_body().unwrap(), b"%PDF");
    }

    #[test]
    fn test_inline_text_part_with_disposition_filename() {
        let mut part = Part::text("plain", "Test message");
        part.headers
            .add("Content-Disposition", "inline; filename=\"testfiles/test.txt\"");

        assert_eq!(part.filename().as_deref(), Some("testfiles/test.txt"));
        assert_eq!(part.decode_body().unwrap(), b"Test message");
    }

    #[test]
    fn test_filename_falls_back_to_content_type_name() {
        let mut headers = Headers::new();
        headers.add("Content-Type", "image/png; name=logo.png");
        let part = Part::new(headers, Vec::new());

        assert_eq!(part.filename().as_deref(), Some("logo.png"));
    }

    #[test]
    fn test_part_without_filename() {
        assert_eq!(Part::text("plain", "x").filename(), None);
    }

    #[test]
    fn test_quoted_printable_body() {
        let mut headers = Headers::new();
        headers.add("Content-Transfer-Encoding", "quoted-printable");
        let part = Part::new(headers, b"caf=C3=A9".to_vec());

        assert_eq!(part.decode_body().unwrap(), "café".as_bytes());
    }

    #[test]
    fn test_to_bytes_separates_headers_and_body() {
        let bytes = Part::text("plain", "hi").to_bytes();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.ends_with("\r\n\r\nhi"));
        assert!(text.starts_with("Content-Type: text/plain; charset=utf-8\r\n"));
    }
}
