//! Status outcome of a control-channel call.
//!
//! Every control call resolves to either a value or a [`RemoteStatus`]. The
//! code space is the gRPC one, so a status coming from a gRPC-backed service
//! maps one-to-one. Diagnostic metadata (the trailing key/value pairs a
//! service attaches to a failure) travels with the status unchanged.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Metadata key under which instrument services report their native error code.
pub const VENDOR_ERROR_KEY: &str = "ni-error";

/// Result of a control-channel call.
pub type ControlResult<T> = std::result::Result<T, RemoteStatus>;

/// Status code of a failed remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", from = "i32")]
pub enum StatusCode {
    Ok,
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    /// The operation or strategy is not supported by this server build.
    Unimplemented,
    Internal,
    /// The service could not be reached.
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl StatusCode {
    /// Numeric code on the wire.
    pub fn code(self) -> i32 {
        match self {
            StatusCode::Ok => 0,
            StatusCode::Cancelled => 1,
            StatusCode::Unknown => 2,
            StatusCode::InvalidArgument => 3,
            StatusCode::DeadlineExceeded => 4,
            StatusCode::NotFound => 5,
            StatusCode::AlreadyExists => 6,
            StatusCode::PermissionDenied => 7,
            StatusCode::ResourceExhausted => 8,
            StatusCode::FailedPrecondition => 9,
            StatusCode::Aborted => 10,
            StatusCode::OutOfRange => 11,
            StatusCode::Unimplemented => 12,
            StatusCode::Internal => 13,
            StatusCode::Unavailable => 14,
            StatusCode::DataLoss => 15,
            StatusCode::Unauthenticated => 16,
        }
    }

    /// Map a numeric code. Codes outside the known range become `Unknown`.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => StatusCode::Ok,
            1 => StatusCode::Cancelled,
            3 => StatusCode::InvalidArgument,
            4 => StatusCode::DeadlineExceeded,
            5 => StatusCode::NotFound,
            6 => StatusCode::AlreadyExists,
            7 => StatusCode::PermissionDenied,
            8 => StatusCode::ResourceExhausted,
            9 => StatusCode::FailedPrecondition,
            10 => StatusCode::Aborted,
            11 => StatusCode::OutOfRange,
            12 => StatusCode::Unimplemented,
            13 => StatusCode::Internal,
            14 => StatusCode::Unavailable,
            15 => StatusCode::DataLoss,
            16 => StatusCode::Unauthenticated,
            _ => StatusCode::Unknown,
        }
    }

    fn name(self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::Cancelled => "CANCELLED",
            StatusCode::Unknown => "UNKNOWN",
            StatusCode::InvalidArgument => "INVALID_ARGUMENT",
            StatusCode::DeadlineExceeded => "DEADLINE_EXCEEDED",
            StatusCode::NotFound => "NOT_FOUND",
            StatusCode::AlreadyExists => "ALREADY_EXISTS",
            StatusCode::PermissionDenied => "PERMISSION_DENIED",
            StatusCode::ResourceExhausted => "RESOURCE_EXHAUSTED",
            StatusCode::FailedPrecondition => "FAILED_PRECONDITION",
            StatusCode::Aborted => "ABORTED",
            StatusCode::OutOfRange => "OUT_OF_RANGE",
            StatusCode::Unimplemented => "UNIMPLEMENTED",
            StatusCode::Internal => "INTERNAL",
            StatusCode::Unavailable => "UNAVAILABLE",
            StatusCode::DataLoss => "DATA_LOSS",
            StatusCode::Unauthenticated => "UNAUTHENTICATED",
        }
    }
}

impl From<StatusCode> for i32 {
    fn from(code: StatusCode) -> i32 {
        code.code()
    }
}

impl From<i32> for StatusCode {
    fn from(code: i32) -> Self {
        StatusCode::from_code(code)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

/// A failed control-channel call: code, message and diagnostic metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStatus {
    /// Status code reported by the remote (or synthesized for local transport failures).
    pub code: StatusCode,
    /// Human-readable message from the remote.
    pub message: String,
    /// Diagnostic key/value pairs in the order received. Keys may repeat.
    pub metadata: Vec<(String, String)>,
}

impl RemoteStatus {
    /// Create a status without metadata.
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            metadata: Vec::new(),
        }
    }

    /// Attach a metadata pair.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }

    /// Shorthand for an `Unavailable` status.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unavailable, message)
    }

    /// Shorthand for an `Unimplemented` status.
    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unimplemented, message)
    }

    /// First value recorded under `key`.
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The vendor error code (`ni-error` metadata), if the remote sent one.
    pub fn vendor_error(&self) -> Option<&str> {
        self.metadata_value(VENDOR_ERROR_KEY)
    }

    #[inline]
    pub fn is_unavailable(&self) -> bool {
        self.code == StatusCode::Unavailable
    }

    #[inline]
    pub fn is_unimplemented(&self) -> bool {
        self.code == StatusCode::Unimplemented
    }

    /// Message suitable for an operator.
    ///
    /// Unreachable services and unsupported operations get a specific
    /// sentence; anything else is the remote message followed by every vendor
    /// error status it carried.
    pub fn diagnostic(&self) -> String {
        match self.code {
            StatusCode::Unavailable => {
                format!("Failed to connect to server: {}", self.message)
            }
            StatusCode::Unimplemented => {
                "The operation is not implemented or is not supported/enabled in this service"
                    .to_string()
            }
            _ => {
                let mut text = self.message.clone();
                for (key, value) in &self.metadata {
                    if key == VENDOR_ERROR_KEY {
                        text.push_str("\nError status: ");
                        text.push_str(value);
                    }
                }
                text
            }
        }
    }
}

impl fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)?;
        if let Some(vendor) = self.vendor_error() {
            write!(f, " [{}={}]", VENDOR_ERROR_KEY, vendor)?;
        }
        Ok(())
    }
}

impl std::error::Error for RemoteStatus {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_mapping_roundtrip() {
        for n in 0..=16 {
            assert_eq!(StatusCode::from_code(n).code(), n);
        }
    }

    #[test]
    fn test_unknown_codes_collapse() {
        assert_eq!(StatusCode::from_code(99), StatusCode::Unknown);
        assert_eq!(StatusCode::from_code(-1), StatusCode::Unknown);
    }

    #[test]
    fn test_vendor_error_lookup() {
        let status = RemoteStatus::new(StatusCode::FailedPrecondition, "task not started")
            .with_metadata("other", "x")
            .with_metadata(VENDOR_ERROR_KEY, "-200473");

        assert_eq!(status.vendor_error(), Some("-200473"));
        assert_eq!(status.metadata_value("other"), Some("x"));
        assert!(status.metadata_value("missing").is_none());
    }

    #[test]
    fn test_diagnostic_distinguishes_actionable_codes() {
        let unavailable = RemoteStatus::unavailable("connection refused");
        assert!(unavailable.diagnostic().starts_with("Failed to connect"));

        let unimplemented = RemoteStatus::unimplemented("strategy SOCKETS_LOW_LATENCY");
        assert!(unimplemented.diagnostic().contains("not implemented"));

        let generic = RemoteStatus::new(StatusCode::Internal, "driver fault")
            .with_metadata(VENDOR_ERROR_KEY, "-50103");
        let text = generic.diagnostic();
        assert!(text.starts_with("driver fault"));
        assert!(text.contains("Error status: -50103"));
    }

    #[test]
    fn test_display_includes_code_and_vendor() {
        let status = RemoteStatus::new(StatusCode::NotFound, "no such resource")
            .with_metadata(VENDOR_ERROR_KEY, "-200220");
        let text = status.to_string();
        assert!(text.contains("NOT_FOUND (5)"));
        assert!(text.contains("ni-error=-200220"));
    }

    #[test]
    fn test_status_code_serde_is_numeric() {
        let json = serde_json::to_string(&StatusCode::Unimplemented).unwrap();
        assert_eq!(json, "12");
        let back: StatusCode = serde_json::from_str("14").unwrap();
        assert_eq!(back, StatusCode::Unavailable);
    }
}
