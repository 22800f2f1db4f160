//! Anchoring-specific error types

use thiserror::Error;

/// Binary proof format errors
///
/// Always fatal for the parse that raised them: the whole blob is invalid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Magic header does not match the OpenTimestamps proof magic
    #[error("invalid header")]
    InvalidHeader,

    /// Proof format version other than 1
    #[error("unsupported version: {0}")]
    UnsupportedVersion(u8),

    /// File hash operation other than SHA-256
    #[error("unsupported hash type: 0x{0:02x}")]
    UnsupportedHashType(u8),

    /// Input ended in the middle of a field
    #[error("unexpected end of data")]
    UnexpectedEndOfData,

    /// Variable-length integer longer than 64 bits
    #[error("invalid varint")]
    InvalidVarInt,

    /// Pending attestation URI is not valid UTF-8
    #[error("invalid calendar uri")]
    InvalidUri,

    /// Operation/fork nesting exceeds the parser limit
    #[error("proof nesting too deep")]
    NestingTooDeep,

    /// Parsed paths would hold more operation bytes than the parser allows
    #[error("proof too large")]
    ProofTooLarge,
}

/// Commitment replay errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommitmentError {
    /// Operation is part of the format but cannot be replayed here
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(&'static str),
}

/// Anchoring operation errors
#[derive(Debug, Clone, Error)]
pub enum AnchorError {
    /// Network communication error
    #[error("network error: {0}")]
    Network(String),

    /// Service returned an error status
    #[error("service error: {0}")]
    ServiceError(String),

    /// Invalid response from service
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Request timeout
    #[error("timeout after {0} seconds")]
    Timeout(u64),

    /// Every calendar failed the submission
    #[error("no calendar accepted the digest")]
    CalendarUnavailable,

    /// Service not configured
    #[error("not configured: {0}")]
    NotConfigured(String),

    /// Failed to fetch block data from all explorer providers
    #[error("failed to fetch block {height}: {details}")]
    BlockFetchFailed { height: u64, details: String },

    /// Proof could not be decoded
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Proof operations could not be replayed
    #[error("commitment error: {0}")]
    Commitment(#[from] CommitmentError),
}

impl AnchorError {
    /// Map a reqwest error, distinguishing timeouts
    pub(crate) fn from_reqwest(e: reqwest::Error, timeout_secs: u64) -> Self {
        if e.is_timeout() {
            AnchorError::Timeout(timeout_secs)
        } else {
            AnchorError::Network(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_error_display() {
        let err = AnchorError::Network("connection refused".to_string());
        assert_eq!(err.to_string(), "network error: connection refused");
    }

    #[test]
    fn test_service_error_display() {
        let err = AnchorError::ServiceError("calendar returned status 500".to_string());
        assert_eq!(err.to_string(), "service error: calendar returned status 500");
    }

    #[test]
    fn test_timeout_display() {
        let err = AnchorError::Timeout(30);
        assert_eq!(err.to_string(), "timeout after 30 seconds");
    }

    #[test]
    fn test_calendar_unavailable_display() {
        assert_eq!(
            AnchorError::CalendarUnavailable.to_string(),
            "no calendar accepted the digest"
        );
    }

    #[test]
    fn test_block_fetch_failed_display() {
        let err = AnchorError::BlockFetchFailed {
            height: 800000,
            details: "all providers unreachable".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "failed to fetch block 800000: all providers unreachable"
        );
    }

    #[test]
    fn test_codec_error_display() {
        assert_eq!(CodecError::InvalidHeader.to_string(), "invalid header");
        assert_eq!(
            CodecError::UnsupportedVersion(2).to_string(),
            "unsupported version: 2"
        );
        assert_eq!(
            CodecError::UnsupportedHashType(0x02).to_string(),
            "unsupported hash type: 0x02"
        );
        assert_eq!(CodecError::ProofTooLarge.to_string(), "proof too large");
    }

    #[test]
    fn test_from_codec_error() {
        let err: AnchorError = CodecError::UnexpectedEndOfData.into();
        assert!(matches!(
            err,
            AnchorError::Codec(CodecError::UnexpectedEndOfData)
        ));
        assert_eq!(err.to_string(), "codec error: unexpected end of data");
    }

    #[test]
    fn test_from_commitment_error() {
        let err: AnchorError = CommitmentError::UnsupportedOperation("ripemd160").into();
        assert_eq!(
            err.to_string(),
            "commitment error: unsupported operation: ripemd160"
        );
    }
}
