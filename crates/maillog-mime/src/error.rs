//! MIME errors.

/// Errors raised while parsing or decoding MIME data.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A `Content-Type` value without a usable `type/subtype`.
    #[error("Invalid content type: {0}")]
    InvalidContentType(String),

    /// A malformed transfer-encoded body.
    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),

    /// Base64 body that does not decode.
    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}

/// Result alias for MIME operations.
pub type Result<T> = std::result::Result<T, Error>;
