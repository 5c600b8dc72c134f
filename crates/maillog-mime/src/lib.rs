//! # maillog-mime
//!
//! MIME primitives for describing outgoing email.
//!
//! ## Features
//!
//! - **Headers**: ordered, case-preserving header collections
//! - **Content types**: parsing and rendering with parameters
//! - **Parts**: pre-built body parts carrying their own headers, as used for
//!   structured attachments
//! - **Encoding**: Base64, Quoted-Printable and RFC 2047 header values
//!
//! ## Quick Start
//!
//! ```
//! use maillog_mime::{ContentType, Part};
//!
//! let part = Part::attachment("report.csv", &ContentType::new("text", "csv"), b"a,b\n1,2\n");
//!
//! assert_eq!(part.filename().as_deref(), Some("report.csv"));
//! assert_eq!(part.decode_body().unwrap(), b"a,b\n1,2\n");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod content_type;
mod error;
mod header;
mod part;

pub mod encoding;

pub use content_type::{ContentType, OCTET_STREAM, parse_parameters};
pub use error::{Error, Result};
pub use header::Headers;
pub use part::{Part, TransferEncoding};
