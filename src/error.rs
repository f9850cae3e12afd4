//! Error types for the diligence pipeline
//!
//! Errors are tagged with an [`ErrorKind`] where they are raised (HTTP status
//! mapping, schema validation, extraction). Message sniffing via
//! [`ErrorKind::from_message`] is reserved for opaque third-party errors at the
//! retry boundary.

use std::time::Duration;
use thiserror::Error;

/// Closed classification of failure causes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    RateLimited,
    Timeout,
    Network,
    Unavailable,
    Unauthorized,
    NotFound,
    InvalidRequest,
    /// Model reply violated the JSON/schema contract
    InvalidResponse,
    Configuration,
    Extraction,
    UnsupportedType,
    Archive,
    Unknown,
}

impl ErrorKind {
    /// Whether a failure of this kind is worth another attempt.
    ///
    /// `Unknown` retries: unrecognized failures are treated as transient.
    pub fn is_retryable(self) -> bool {
        match self {
            Self::RateLimited | Self::Timeout | Self::Network | Self::Unavailable => true,
            Self::Unknown => true,
            Self::Unauthorized
            | Self::NotFound
            | Self::InvalidRequest
            | Self::InvalidResponse
            | Self::Configuration
            | Self::Extraction
            | Self::UnsupportedType
            | Self::Archive => false,
        }
    }

    /// Infer a kind from an error message. Only used for errors that arrive
    /// untagged.
    pub fn from_message(message: &str) -> Self {
        let msg = message.to_lowercase();

        // Permanent conditions are checked first so "invalid api key" never
        // reads as a transient failure.
        const UNAUTHORIZED: &[&str] = &[
            "invalid api key",
            "invalid_api_key",
            "incorrect api key",
            "unauthorized",
            "authentication",
            "forbidden",
            "permission denied",
            "401",
            "403",
        ];
        const NOT_FOUND: &[&str] = &["not found", "not_found", "404", "no such model"];
        const INVALID_REQUEST: &[&str] = &[
            "bad request",
            "invalid request",
            "invalid_request",
            "malformed",
            "400",
            "422",
        ];
        const RATE_LIMITED: &[&str] = &[
            "rate limit",
            "rate_limit",
            "too many requests",
            "429",
            "quota",
            "resource exhausted",
        ];
        const TIMEOUT: &[&str] = &["timeout", "timed out", "deadline exceeded"];
        const NETWORK: &[&str] = &[
            "network",
            "connection",
            "connect",
            "dns",
            "socket",
            "econnreset",
            "econnrefused",
            "broken pipe",
        ];
        const UNAVAILABLE: &[&str] = &[
            "temporar",
            "unavailable",
            "overloaded",
            "try again",
            "502",
            "503",
            "504",
        ];

        let has = |needles: &[&str]| needles.iter().any(|n| msg.contains(n));

        if has(UNAUTHORIZED) {
            Self::Unauthorized
        } else if has(NOT_FOUND) {
            Self::NotFound
        } else if has(INVALID_REQUEST) {
            Self::InvalidRequest
        } else if has(RATE_LIMITED) {
            Self::RateLimited
        } else if has(TIMEOUT) {
            Self::Timeout
        } else if has(NETWORK) {
            Self::Network
        } else if has(UNAVAILABLE) {
            Self::Unavailable
        } else {
            Self::Unknown
        }
    }
}

/// Failure of a language-model call
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct GatewayError {
    pub kind: ErrorKind,
    pub message: String,
}

impl GatewayError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Wrap an error whose cause is not known at the call site
    pub fn opaque(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            ErrorKind::Timeout,
            format!("model call timed out after {}s", after.as_secs()),
        )
    }

    /// Kind used for retry decisions, falling back to the message for
    /// untagged errors.
    pub fn effective_kind(&self) -> ErrorKind {
        match self.kind {
            ErrorKind::Unknown => ErrorKind::from_message(&self.message),
            kind => kind,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ErrorKind::Timeout
        } else if err.is_connect() || err.is_request() {
            ErrorKind::Network
        } else if err.is_decode() {
            ErrorKind::InvalidResponse
        } else if let Some(status) = err.status() {
            ErrorKind::from_status(status.as_u16())
        } else {
            ErrorKind::Unknown
        };
        Self::new(kind, err.to_string())
    }
}

impl ErrorKind {
    /// Map an HTTP status from the model provider
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Unauthorized,
            404 => Self::NotFound,
            400 | 413 | 422 => Self::InvalidRequest,
            408 => Self::Timeout,
            429 => Self::RateLimited,
            500..=599 => Self::Unavailable,
            _ => Self::Unknown,
        }
    }
}

/// Failure turning a file buffer into text
#[derive(Debug, Clone, Error)]
pub enum ExtractionError {
    /// Reason already reads as a sentence fragment ("unsupported file type .pptx")
    #[error("{0}")]
    Unsupported(String),

    #[error("{format} extraction failed: {reason}")]
    Failed { format: &'static str, reason: String },

    #[error("{format} extraction panicked - file is likely malformed")]
    Panicked { format: &'static str },
}

impl ExtractionError {
    pub fn failed(format: &'static str, reason: impl ToString) -> Self {
        Self::Failed {
            format,
            reason: reason.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unsupported(_) => ErrorKind::UnsupportedType,
            Self::Failed { .. } | Self::Panicked { .. } => ErrorKind::Extraction,
        }
    }
}

/// Failure unpacking the uploaded archive
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive is unreadable: {0}")]
    Corrupt(String),

    #[error("archive contains no eligible files")]
    NoEligibleFiles,

    #[error("archive admitted {admitted} files, limit is {limit}")]
    TooManyFiles { admitted: usize, limit: usize },

    #[error("failed to read archive entry {name}: {reason}")]
    EntryRead { name: String, reason: String },
}

impl From<zip::result::ZipError> for ArchiveError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::Corrupt(err.to_string())
    }
}

/// Run-aborting failure. Carries no partial result.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unpacking failed: {0}")]
    Archive(#[from] ArchiveError),

    #[error("model credential missing: set {0}")]
    MissingCredential(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("prompt template error: {0}")]
    Prompt(String),

    #[error("analysis exceeded the {}s run budget", .limit.as_secs())]
    Timeout { limit: Duration },

    #[error("report store error: {0}")]
    Store(String),

    #[error("result not found: {0}")]
    NotFound(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Archive(_) => ErrorKind::Archive,
            Self::MissingCredential(_) | Self::Configuration(_) | Self::Prompt(_) => {
                ErrorKind::Configuration
            }
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Store(_) => ErrorKind::Unknown,
            Self::NotFound(_) => ErrorKind::NotFound,
        }
    }
}
