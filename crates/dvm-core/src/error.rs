//! Error taxonomy shared by the server and client engines.
//!
//! Every variant has a corresponding [`ErrorCode`], the value carried in a
//! kind-21999 status event's `error_code` tag. Client-local errors
//! (`ChunkMissing`, `ResponseTimeout`) never cross the wire; they are
//! surfaced directly to the caller of `upload`/`download`.

use thiserror::Error;

/// Wire-level error code, as it appears in an `error_code` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    FileTooLarge,
    InvalidHash,
    FileNotFound,
    ChunkMissing,
    IntegrityFailed,
    StorageFull,
    ResponseTimeout,
    MalformedRequest,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::FileTooLarge => "FILE_TOO_LARGE",
            ErrorCode::InvalidHash => "INVALID_HASH",
            ErrorCode::FileNotFound => "FILE_NOT_FOUND",
            ErrorCode::ChunkMissing => "CHUNK_MISSING",
            ErrorCode::IntegrityFailed => "INTEGRITY_FAILED",
            ErrorCode::StorageFull => "STORAGE_FULL",
            ErrorCode::ResponseTimeout => "RESPONSE_TIMEOUT",
            ErrorCode::MalformedRequest => "MALFORMED_REQUEST",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "FILE_TOO_LARGE" => ErrorCode::FileTooLarge,
            "INVALID_HASH" => ErrorCode::InvalidHash,
            "FILE_NOT_FOUND" => ErrorCode::FileNotFound,
            "CHUNK_MISSING" => ErrorCode::ChunkMissing,
            "INTEGRITY_FAILED" => ErrorCode::IntegrityFailed,
            "STORAGE_FULL" => ErrorCode::StorageFull,
            "RESPONSE_TIMEOUT" => ErrorCode::ResponseTimeout,
            "MALFORMED_REQUEST" => ErrorCode::MalformedRequest,
            "INTERNAL_ERROR" => ErrorCode::InternalError,
            _ => return None,
        })
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine-level error. Both the server handlers and the client's
/// upload/download paths produce this; [`DvmError::code`] maps it onto the
/// wire taxonomy.
#[derive(Debug, Error)]
pub enum DvmError {
    #[error("file of {size} bytes exceeds the {limit} byte limit")]
    FileTooLarge { size: usize, limit: usize },

    #[error("hash '{0}' is not 64 lowercase hex characters")]
    InvalidHash(String),

    #[error("file not found or expired")]
    FileNotFound,

    #[error("timed out waiting for chunk(s): missing {missing} of {total}")]
    ChunkMissing { missing: usize, total: usize },

    #[error("integrity check failed: {0}")]
    IntegrityFailed(String),

    #[error("server storage capacity exceeded")]
    StorageFull,

    #[error("no response before deadline")]
    ResponseTimeout,

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DvmError {
    /// Reconstructs a client-side error from a remote `error_code` tag and
    /// its accompanying status message. Numeric detail carried by some
    /// variants (e.g. the size that exceeded a limit) lives only on the
    /// server that produced the error, so it is not reconstructed here.
    pub fn from_wire(code: ErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            ErrorCode::FileTooLarge => DvmError::FileTooLarge { size: 0, limit: 0 },
            ErrorCode::InvalidHash => DvmError::InvalidHash(message),
            ErrorCode::FileNotFound => DvmError::FileNotFound,
            ErrorCode::ChunkMissing => DvmError::ChunkMissing { missing: 0, total: 0 },
            ErrorCode::IntegrityFailed => DvmError::IntegrityFailed(message),
            ErrorCode::StorageFull => DvmError::StorageFull,
            ErrorCode::ResponseTimeout => DvmError::ResponseTimeout,
            ErrorCode::MalformedRequest => DvmError::MalformedRequest(message),
            ErrorCode::InternalError => DvmError::Internal(message),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            DvmError::FileTooLarge { .. } => ErrorCode::FileTooLarge,
            DvmError::InvalidHash(_) => ErrorCode::InvalidHash,
            DvmError::FileNotFound => ErrorCode::FileNotFound,
            DvmError::ChunkMissing { .. } => ErrorCode::ChunkMissing,
            DvmError::IntegrityFailed(_) => ErrorCode::IntegrityFailed,
            DvmError::StorageFull => ErrorCode::StorageFull,
            DvmError::ResponseTimeout => ErrorCode::ResponseTimeout,
            DvmError::MalformedRequest(_) => ErrorCode::MalformedRequest,
            DvmError::Internal(_) => ErrorCode::InternalError,
        }
    }
}

impl From<serde_json::Error> for DvmError {
    fn from(err: serde_json::Error) -> Self {
        DvmError::MalformedRequest(err.to_string())
    }
}

impl From<base64::DecodeError> for DvmError {
    fn from(err: base64::DecodeError) -> Self {
        DvmError::MalformedRequest(format!("bad base64: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, DvmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_code_round_trips_through_its_wire_string() {
        let codes = [
            ErrorCode::FileTooLarge,
            ErrorCode::InvalidHash,
            ErrorCode::FileNotFound,
            ErrorCode::ChunkMissing,
            ErrorCode::IntegrityFailed,
            ErrorCode::StorageFull,
            ErrorCode::ResponseTimeout,
            ErrorCode::MalformedRequest,
            ErrorCode::InternalError,
        ];
        for code in codes {
            assert_eq!(ErrorCode::from_str(code.as_str()), Some(code));
        }
    }

    #[test]
    fn unknown_wire_string_does_not_parse() {
        assert_eq!(ErrorCode::from_str("NOT_A_REAL_CODE"), None);
    }

    #[test]
    fn error_code_matches_the_variant_it_was_constructed_from() {
        let err = DvmError::FileNotFound;
        assert_eq!(err.code(), ErrorCode::FileNotFound);

        let err = DvmError::IntegrityFailed("bad hash".into());
        assert_eq!(err.code(), ErrorCode::IntegrityFailed);
    }

    #[test]
    fn from_wire_preserves_the_message_where_the_variant_carries_one() {
        let err = DvmError::from_wire(ErrorCode::MalformedRequest, "bad json");
        assert!(matches!(err, DvmError::MalformedRequest(m) if m == "bad json"));
    }
}
