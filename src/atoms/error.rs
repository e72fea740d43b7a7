// ── Grantmesh Atoms: Error Types ───────────────────────────────────────────
// Single canonical error enum for the mesh, built with `thiserror`.
//
// Design rules:
//   • Variants are coarse-grained by domain (I/O, Network, Backend, …).
//   • The `#[from]` attribute wires std/external error conversions.
//   • `MeshError` → `String` conversion is provided via `Display` so that
//     callers holding `Result<T, String>` can `.map_err(|e| e.to_string())`
//     without boilerplate.
//   • Agent-side handler failures travel as ERROR envelopes, not as this
//     type; `ErrorCode` is the wire-level discriminator for those.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── Wire-level error codes (carried in ERROR envelopes) ────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Envelope failed validation (missing sender, expired TTL, …).
    InvalidMessage,
    /// Agent received an intent it has no handler for.
    NoHandler,
    /// Handler raised unexpectedly.
    ProcessingError,
    /// Per-agent deadline exceeded.
    Timeout,
    /// Vector backend or embedding service failed.
    UpstreamUnavailable,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidMessage => "INVALID_MESSAGE",
            ErrorCode::NoHandler => "NO_HANDLER",
            ErrorCode::ProcessingError => "PROCESSING_ERROR",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Primary error enum ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum MeshError {
    /// Filesystem or OS-level I/O failure (query log, config files).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP / network failure (reqwest layer).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Vector backend or embedding service returned an API-level failure.
    #[error("Backend error: {service}: {message}")]
    Backend { service: String, message: String },

    /// A peer agent answered with an ERROR envelope.
    #[error("Protocol error [{code}]: {message}")]
    Protocol { code: ErrorCode, message: String },

    /// Per-agent call exceeded its deadline.
    #[error("Timeout: {agent_id} did not answer within {seconds}s")]
    Timeout { agent_id: String, seconds: u64 },

    /// Mesh or agent configuration is invalid or missing.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Catch-all for errors that do not yet have a dedicated variant.
    /// Prefer adding a specific variant over using this in new code.
    #[error("{0}")]
    Other(String),
}

// ── Convenience constructors ───────────────────────────────────────────────

impl MeshError {
    /// Create a backend error with service name and message.
    pub fn backend(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend { service: service.into(), message: message.into() }
    }

    /// Create a protocol error from a wire-level code.
    pub fn protocol(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Protocol { code, message: message.into() }
    }

    /// The wire-level code this error maps to when it crosses an agent
    /// boundary as an ERROR envelope.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            MeshError::Protocol { code, .. } => *code,
            MeshError::Timeout { .. } => ErrorCode::Timeout,
            MeshError::Network(_) | MeshError::Backend { .. } => ErrorCode::UpstreamUnavailable,
            _ => ErrorCode::ProcessingError,
        }
    }
}

// ── Migration bridge: String → MeshError ───────────────────────────────────
// Allows `?` on helpers still returning `Result<T, String>` inside functions
// that return `MeshResult<T>`.

impl From<String> for MeshError {
    fn from(s: String) -> Self {
        MeshError::Other(s)
    }
}

impl From<&str> for MeshError {
    fn from(s: &str) -> Self {
        MeshError::Other(s.to_string())
    }
}

// ── Convenience alias ──────────────────────────────────────────────────────

/// All mesh operations should return this type.
pub type MeshResult<T> = Result<T, MeshError>;

// ── Conversion: MeshError → String ─────────────────────────────────────────

impl From<MeshError> for String {
    fn from(e: MeshError) -> Self {
        e.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_roundtrip() {
        let json = serde_json::to_string(&ErrorCode::NoHandler).unwrap();
        assert_eq!(json, "\"NO_HANDLER\"");
        let back: ErrorCode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ErrorCode::NoHandler);
    }

    #[test]
    fn test_error_code_mapping() {
        let e = MeshError::Timeout { agent_id: "nihr".into(), seconds: 5 };
        assert_eq!(e.error_code(), ErrorCode::Timeout);

        let e = MeshError::backend("chroma", "connection refused");
        assert_eq!(e.error_code(), ErrorCode::UpstreamUnavailable);

        let e = MeshError::Other("boom".into());
        assert_eq!(e.error_code(), ErrorCode::ProcessingError);
    }

    #[test]
    fn test_string_bridge() {
        fn inner() -> MeshResult<()> {
            Err("plain message")?
        }
        let err = inner().unwrap_err();
        assert_eq!(err.to_string(), "plain message");
    }
}
