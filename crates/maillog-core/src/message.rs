//! Outgoing message model.
//!
//! [`OutgoingMessage`] is what callers hand to a [`Transport`](crate::Transport)
//! and to the [`EmailBackend`](crate::EmailBackend) wrapping it.

use std::collections::BTreeMap;

use chrono::Utc;
use maillog_mime::{ContentType, Headers, OCTET_STREAM, Part, TransferEncoding};

use crate::Result;

/// Separator used when a list of addresses is stored as one string.
pub const ADDRESS_SEPARATOR: &str = "; ";

/// MIME type of the HTML alternative body.
pub const HTML_MIMETYPE: &str = "text/html";

/// Joins addresses in input order with [`ADDRESS_SEPARATOR`].
///
/// An empty list yields an empty string.
#[must_use]
pub fn join_addresses(addresses: &[String]) -> String {
    addresses.join(ADDRESS_SEPARATOR)
}

/// An alternative rendering of the message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alternative {
    /// Body content.
    pub content: String,
    /// Declared MIME type, e.g. `text/html`.
    pub mimetype: String,
}

/// An attachment as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageAttachment {
    /// A pre-built MIME part carrying its own headers.
    Part(Part),
    /// A raw file triple.
    File {
        /// Display name.
        filename: String,
        /// File content.
        content: Vec<u8>,
        /// Declared MIME type; `None` is sent as `application/octet-stream`.
        mimetype: Option<String>,
    },
}

impl MessageAttachment {
    /// Creates a raw file attachment.
    #[must_use]
    pub fn file(
        filename: impl Into<String>,
        content: impl Into<Vec<u8>>,
        mimetype: Option<&str>,
    ) -> Self {
        Self::File {
            filename: filename.into(),
            content: content.into(),
            mimetype: mimetype.map(str::to_string),
        }
    }

    /// Converts the attachment into the part that is transmitted.
    fn to_part(&self) -> Part {
        match self {
            Self::Part(part) => part.clone(),
            Self::File {
                filename,
                content,
                mimetype,
            } => {
                let content_type = mimetype
                    .as_deref()
                    .and_then(|m| ContentType::parse(m).ok())
                    .unwrap_or_else(ContentType::octet_stream);
                Part::attachment(filename, &content_type, content)
            }
        }
    }
}

/// An email message to send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Sender address.
    pub from: String,
    /// Recipient addresses.
    pub to: Vec<String>,
    /// CC addresses.
    pub cc: Vec<String>,
    /// BCC addresses.
    pub bcc: Vec<String>,
    /// Reply-To addresses.
    pub reply_to: Vec<String>,
    /// Subject line.
    pub subject: String,
    /// Plain text body.
    pub body: String,
    /// Alternative bodies (HTML and friends).
    pub alternatives: Vec<Alternative>,
    /// Attachments.
    pub attachments: Vec<MessageAttachment>,
    /// Extra headers set by the caller.
    pub headers: BTreeMap<String, String>,
}

impl OutgoingMessage {
    /// Creates a new outgoing message.
    #[must_use]
    pub fn new(
        from: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            subject: subject.into(),
            body: body.into(),
            ..Self::default()
        }
    }

    /// Adds a recipient.
    #[must_use]
    pub fn to(mut self, recipient: impl Into<String>) -> Self {
        self.to.push(recipient.into());
        self
    }

    /// Adds a CC recipient.
    #[must_use]
    pub fn cc(mut self, recipient: impl Into<String>) -> Self {
        self.cc.push(recipient.into());
        self
    }

    /// Adds a BCC recipient.
    #[must_use]
    pub fn bcc(mut self, recipient: impl Into<String>) -> Self {
        self.bcc.push(recipient.into());
        self
    }

    /// Adds a Reply-To address.
    #[must_use]
    pub fn reply_to(mut self, address: impl Into<String>) -> Self {
        self.reply_to.push(address.into());
        self
    }

    /// Sets an extra header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Adds an alternative body.
    #[must_use]
    pub fn alternative(mut self, content: impl Into<String>, mimetype: impl Into<String>) -> Self {
        self.alternatives.push(Alternative {
            content: content.into(),
            mimetype: mimetype.into(),
        });
        self
    }

    /// Adds a raw file attachment.
    #[must_use]
    pub fn attach(
        mut self,
        filename: impl Into<String>,
        content: impl Into<Vec<u8>>,
        mimetype: Option<&str>,
    ) -> Self {
        self.attachments
            .push(MessageAttachment::file(filename, content, mimetype));
        self
    }

    /// Adds a pre-built MIME part as an attachment.
    #[must_use]
    pub fn attach_part(mut self, part: Part) -> Self {
        self.attachments.push(MessageAttachment::Part(part));
        self
    }

    /// Returns the first alternative declared exactly as `text/html`.
    #[must_use]
    pub fn html_body(&self) -> Option<&str> {
        self.alternatives
            .iter()
            .find(|alternative| alternative.mimetype == HTML_MIMETYPE)
            .map(|alternative| alternative.content.as_str())
    }

    /// Returns every address the message is delivered to (to, cc, bcc).
    #[must_use]
    pub fn all_recipients(&self) -> Vec<&str> {
        self.to
            .iter()
            .chain(&self.cc)
            .chain(&self.bcc)
            .map(String::as_str)
            .collect()
    }

    /// Returns the headers the message carries when rendered.
    ///
    /// Extra headers replace generated ones of the same name. `Date` and
    /// `Message-ID` are generated on every call unless supplied by the caller.
    #[must_use]
    pub fn mime_headers(&self) -> Headers {
        self.envelope_headers(&self.top_level_part())
    }

    /// Builds the RFC 5322 formatted message.
    #[must_use]
    pub fn to_rfc5322(&self) -> Vec<u8> {
        let top = self.top_level_part();
        let mut message = self.envelope_headers(&top).to_string().into_bytes();
        message.extend_from_slice(b"\r\n");
        message.extend_from_slice(&top.body);
        message
    }

    fn envelope_headers(&self, top: &Part) -> Headers {
        let mut headers = top.headers.clone();
        headers.add("MIME-Version", "1.0");
        headers.add("Subject", self.subject.as_str());
        headers.add("From", self.from.as_str());
        if !self.to.is_empty() {
            headers.add("To", self.to.join(", "));
        }
        if !self.cc.is_empty() {
            headers.add("Cc", self.cc.join(", "));
        }
        if !self.reply_to.is_empty() {
            headers.add("Reply-To", self.reply_to.join(", "));
        }
        headers.add("Date", Utc::now().to_rfc2822());
        headers.add("Message-ID", make_message_id(&self.from));

        for (name, value) in &self.headers {
            headers.set(name.as_str(), value.as_str());
        }

        headers
    }

    /// The outermost body part: plain text, `multipart/alternative` or `multipart/mixed`.
    fn top_level_part(&self) -> Part {
        let text = Part::text("plain", &self.body);

        let body = if self.alternatives.is_empty() {
            text
        } else {
            let mut parts = vec![text];
            parts.extend(self.alternatives.iter().map(alternative_part));
            multipart("alternative", &parts)
        };

        if self.attachments.is_empty() {
            return body;
        }

        let mut parts = vec![body];
        parts.extend(self.attachments.iter().map(MessageAttachment::to_part));
        multipart("mixed", &parts)
    }
}

fn alternative_part(alternative: &Alternative) -> Part {
    let content_type = ContentType::parse(&alternative.mimetype)
        .map(|ct| {
            if ct.main_type == "text" && ct.parameter("charset").is_none() {
                ct.with_parameter("charset", "utf-8")
            } else {
                ct
            }
        })
        .unwrap_or_else(|_| ContentType::octet_stream());

    let mut headers = Headers::new();
    headers.add("Content-Type", content_type.to_string());
    headers.add("Content-Transfer-Encoding", TransferEncoding::EightBit.to_string());
    Part::new(headers, alternative.content.as_bytes().to_vec())
}

fn multipart(sub_type: &str, parts: &[Part]) -> Part {
    let boundary = format!("=_maillog_{}", uuid::Uuid::new_v4().simple());

    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(&part.to_bytes());
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

    let mut headers = Headers::new();
    headers.add(
        "Content-Type",
        ContentType::multipart(sub_type, boundary).to_string(),
    );
    Part::new(headers, body)
}

fn make_message_id(from: &str) -> String {
    let domain = from
        .rsplit_once('@')
        .map(|(_, domain)| domain.trim_end_matches('>').trim())
        .filter(|domain| !domain.is_empty())
        .unwrap_or("localhost");
    format!("<{}@{domain}>", uuid::Uuid::new_v4().simple())
}

/// Resolves a caller attachment into its display name, payload and declared type.
///
/// Structured parts carry no declared type of their own and report
/// `application/octet-stream`.
///
/// # Errors
///
/// Returns an error if a structured part cannot be decoded.
pub(crate) fn attachment_contents(
    attachment: &MessageAttachment,
) -> Result<(String, Vec<u8>, String)> {
    match attachment {
        MessageAttachment::Part(part) => {
            let filename = part.filename().unwrap_or_default();
            let content = part.decode_body()?;
            Ok((filename, content, OCTET_STREAM.to_string()))
        }
        MessageAttachment::File {
            filename,
            content,
            mimetype,
        } => Ok((
            filename.clone(),
            content.clone(),
            mimetype.clone().unwrap_or_else(|| OCTET_STREAM.to_string()),
        )),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample() -> OutgoingMessage {
        OutgoingMessage::new("from@example.com", "Subject line", "Message body").to("to@example.com")
    }

    #[test]
    fn test_join_addresses() {
        assert_eq!(join_addresses(&[]), "");
        assert_eq!(
            join_addresses(&["a@x.com".to_string(), "b@x.com".to_string()]),
            "a@x.com; b@x.com"
        );
    }

    #[test]
    fn test_html_body_picks_first_exact_html_alternative() {
        let message = sample()
            .alternative("plain alt", "text/plain")
            .alternative("<p>first</p>", "text/html")
            .alternative("<p>second</p>", "text/html");
        assert_eq!(message.html_body(), Some("<p>first</p>"));

        let not_exact = sample().alternative("<p>x</p>", "text/html; charset=utf-8");
        assert_eq!(not_exact.html_body(), None);
    }

    #[test]
    fn test_mime_headers_include_extra_headers() {
        let message = sample()
            .cc("cc@example.com")
            .bcc("hidden@example.com")
            .header("List-Unsubscribe", "<mailto:unsub@example.com>");

        let headers = message.mime_headers();
        assert_eq!(headers.get("From"), Some("from@example.com"));
        assert_eq!(headers.get("To"), Some("to@example.com"));
        assert_eq!(headers.get("Cc"), Some("cc@example.com"));
        assert_eq!(headers.get("MIME-Version"), Some("1.0"));
        assert_eq!(
            headers.get("List-Unsubscribe"),
            Some("<mailto:unsub@example.com>")
        );
        assert!(headers.get("Message-ID").unwrap().ends_with("@example.com>"));
        assert!(!headers.contains("Bcc"));
    }

    #[test]
    fn test_extra_headers_override_generated() {
        let message = sample().header("Message-ID", "<fixed@example.com>");
        let headers = message.mime_headers();
        assert_eq!(headers.get_all("message-id"), vec!["<fixed@example.com>"]);
    }

    #[test]
    fn test_render_plain_message() {
        let rendered = String::from_utf8(sample().to_rfc5322()).unwrap();
        assert!(rendered.contains("Content-Type: text/plain; charset=utf-8\r\n"));
        assert!(rendered.contains("Subject: Subject line\r\n"));
        assert!(rendered.ends_with("\r\n\r\nMessage body"));
    }

    #[test]
    fn test_render_mixed_message_with_attachment() {
        let message = sample()
            .alternative("<b>hi</b>", "text/html")
            .attach("f.txt", b"data".to_vec(), Some("text/plain"));

        let rendered = String::from_utf8(message.to_rfc5322()).unwrap();
        assert!(rendered.contains("Content-Type: multipart/mixed; boundary="));
        assert!(rendered.contains("multipart/alternative"));
        assert!(rendered.contains("filename=\"f.txt\""));
        assert!(rendered.contains("ZGF0YQ=="));
    }

    #[test]
    fn test_attachment_contents_for_file_without_type() {
        let attachment = MessageAttachment::file("test", b"test".to_vec(), None);
        let (name, content, declared) = attachment_contents(&attachment).unwrap();
        assert_eq!(name, "test");
        assert_eq!(content, b"test");
        assert_eq!(declared, OCTET_STREAM);
    }

    #[test]
    fn test_attachment_contents_for_part() {
        let mut part = Part::text("plain", "Test message");
        part.headers
            .add("Content-Disposition", "inline; filename=\"testfiles/test.txt\"");

        let (name, content, declared) =
            attachment_contents(&MessageAttachment::Part(part)).unwrap();
        assert_eq!(name, "testfiles/test.txt");
        assert_eq!(content, b"Test message");
        assert_eq!(declared, OCTET_STREAM);
    }

    proptest! {
        #[test]
        fn prop_join_keeps_input_order(addresses in proptest::collection::vec("[a-z]{1,6}@[a-z]{1,6}\\.com", 1..8)) {
            let joined = join_addresses(&addresses);
            let split: Vec<String> = joined.split(ADDRESS_SEPARATOR).map(str::to_string).collect();
            prop_assert_eq!(split, addresses);
        }
    }
}
