//! Error types for credential loading and channel management.

use std::path::PathBuf;

/// Reasons a binary macaroon fails to decode.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MacaroonError {
    /// No bytes at all.
    #[error("macaroon is empty")]
    Empty,
    /// Only the version 2 binary encoding is understood.
    #[error("unsupported macaroon version byte {0:#04x}, only v2 binary macaroons are accepted (v1 must be re-encoded as v2)")]
    UnsupportedVersion(u8),
    /// The input ended in the middle of a field.
    #[error("truncated macaroon while reading {0}")]
    Truncated(&'static str),
    /// A varint did not fit in 64 bits.
    #[error("varint overflow")]
    VarintOverflow,
    /// A field type that is not allowed in this section.
    #[error("unexpected field type {found} in {section}")]
    UnexpectedField {
        /// The section being parsed.
        section: &'static str,
        /// The offending field type.
        found: u64,
    },
    /// Field types within a section must be strictly increasing.
    #[error("fields out of order in {0}")]
    OutOfOrder(&'static str),
    /// The section has no identifier field.
    #[error("missing identifier in {0}")]
    MissingIdentifier(&'static str),
    /// The trailing field is not a signature.
    #[error("missing signature")]
    MissingSignature,
    /// Signatures are always 32 bytes.
    #[error("invalid signature length {0}")]
    SignatureLength(usize),
    /// Locations are UTF-8 strings.
    #[error("invalid location: {0}")]
    Location(#[from] std::string::FromUtf8Error),
    /// Bytes left over after the signature.
    #[error("{0} trailing bytes after macaroon")]
    TrailingData(usize),
}

/// Errors raised while turning credential files into transport options.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// The file could not be read.
    #[error("unable to read {}: {source}", path.display())]
    Read {
        /// The configured path.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },
    /// The file is not valid PEM.
    #[error("unable to parse pem in {}: {source}", path.display())]
    Pem {
        /// The configured path.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },
    /// The file parsed but held no certificates.
    #[error("no valid certificates in {}", path.display())]
    NoCertificates {
        /// The configured path.
        path: PathBuf,
    },
    /// The macaroon file did not decode.
    #[error("unable to decode macaroon {}: {source}", path.display())]
    Macaroon {
        /// The configured path.
        path: PathBuf,
        /// The decode failure.
        source: MacaroonError,
    },
    /// The macaroon could not be carried as call metadata.
    #[error("unable to attach macaroon: {0}")]
    InvalidMetadata(#[from] tonic::metadata::errors::InvalidMetadataValue),
}

/// Errors raised while dialing, using or closing a channel.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Host and port do not form a URI.
    #[error("invalid address {address}: {source}")]
    InvalidAddress {
        /// The composed `host:port`.
        address: String,
        /// The parse failure.
        source: http::uri::InvalidUri,
    },
    /// The transport could not be configured or connected.
    #[error("unable to dial {uri}: {source}")]
    Dial {
        /// The target.
        uri: http::Uri,
        /// The transport failure.
        source: tonic::transport::Error,
    },
    /// A call was issued on a channel that has been closed.
    #[error("channel closed")]
    Closed,
    /// `close` was called twice.
    #[error("channel already closed")]
    AlreadyClosed,
}
