//! Error types shared by hosts, modules and components.
//!
//! Two kinds of failure cross this crate:
//!
//! 1. **InitError**: a component instance was not set up correctly
//!    (a required attribute is missing). Fatal for that instance.
//!
//! 2. **IntegrationError**: everything else: version refusal at load time,
//!    manifest validation, service failures (storage, access token),
//!    refresh failures. Carries a machine-readable code, a severity and
//!    whether the caller can recover.
//!
//! Refresh failures never leave the component: the controller turns them
//! into a `refresh {status: "fail"}` event.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Error codes across the integration contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Host and module disagree on the major spec version
    IncompatibleVersion,

    /// Manifest is malformed or violates an invariant
    InvalidManifest,

    /// Required attribute absent at connect time
    MissingAttribute,

    /// Attribute present but not a valid value for its setting
    InvalidAttributeValue,

    /// Invalid input provided
    InvalidInput,

    /// No authenticated session to issue a token for
    AccessTokenUnavailable,

    /// Storage error (read/write failed)
    StorageError,

    /// Checksum mismatch (corruption)
    ChecksumMismatch,

    /// The component's refresh operation failed
    RefreshFailed,

    /// Pre-fetch of module data failed
    PrefetchFailed,

    /// Operation not valid in the current lifecycle state
    InvalidState,

    /// Module already loaded
    AlreadyExists,

    /// Resource not found
    NotFound,

    /// Internal error (bug)
    Internal,
}

impl ErrorCode {
    /// Get default severity for this error code
    pub fn default_severity(&self) -> Severity {
        match self {
            Self::IncompatibleVersion | Self::Internal | Self::ChecksumMismatch => Severity::Fatal,
            Self::MissingAttribute => Severity::Fatal,
            Self::RefreshFailed | Self::PrefetchFailed => Severity::Warning,
            _ => Severity::Error,
        }
    }

    /// Check if this error is typically recoverable
    pub fn is_typically_recoverable(&self) -> bool {
        match self {
            Self::IncompatibleVersion | Self::MissingAttribute | Self::Internal => false,
            Self::InvalidManifest | Self::ChecksumMismatch => false,
            Self::AccessTokenUnavailable | Self::StorageError => true, // caller may retry
            Self::RefreshFailed | Self::PrefetchFailed => true,
            _ => true,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::IncompatibleVersion => "INCOMPATIBLE_VERSION",
            Self::InvalidManifest => "INVALID_MANIFEST",
            Self::MissingAttribute => "MISSING_ATTRIBUTE",
            Self::InvalidAttributeValue => "INVALID_ATTRIBUTE_VALUE",
            Self::InvalidInput => "INVALID_INPUT",
            Self::AccessTokenUnavailable => "ACCESS_TOKEN_UNAVAILABLE",
            Self::StorageError => "STORAGE_ERROR",
            Self::ChecksumMismatch => "CHECKSUM_MISMATCH",
            Self::RefreshFailed => "REFRESH_FAILED",
            Self::PrefetchFailed => "PREFETCH_FAILED",
            Self::InvalidState => "INVALID_STATE",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::NotFound => "NOT_FOUND",
            Self::Internal => "INTERNAL",
        };
        write!(f, "{}", s)
    }
}

/// Severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational, not really an error
    Info,

    /// Warning, operation failed but nothing else is affected
    Warning,

    /// Error, operation failed but recoverable
    Error,

    /// Fatal, the module or component cannot be used
    Fatal,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// Standard error type for integration operations.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("[{code}] {message}")]
pub struct IntegrationError {
    /// Error code (machine-readable)
    pub code: ErrorCode,

    /// Severity level
    pub severity: Severity,

    /// Human-readable message
    pub message: String,

    /// Additional context (for debugging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<HashMap<String, serde_json::Value>>,

    /// Is this recoverable?
    pub recoverable: bool,
}

impl IntegrationError {
    /// Create a new error
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            severity: code.default_severity(),
            message: message.into(),
            context: None,
            recoverable: code.is_typically_recoverable(),
        }
    }

    /// Add context to the error
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        let context = self.context.get_or_insert_with(HashMap::new);
        if let Ok(v) = serde_json::to_value(value) {
            context.insert(key.into(), v);
        }
        self
    }

    /// Set recoverable flag
    pub fn recoverable(mut self, recoverable: bool) -> Self {
        self.recoverable = recoverable;
        self
    }

    /// Set severity
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Look up a context value
    pub fn context_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.context.as_ref().and_then(|c| c.get(key))
    }

    // ═══════════════════════════════════════════════════════════
    // Common error constructors
    // ═══════════════════════════════════════════════════════════

    /// Host refuses a module built against another major spec version
    pub fn incompatible_version(
        host: &crate::types::SpecVersion,
        module: &crate::types::SpecVersion,
    ) -> Self {
        Self::new(
            ErrorCode::IncompatibleVersion,
            format!(
                "Module spec version {} is incompatible with host spec version {}",
                module, host
            ),
        )
        .with_context("host_version", host)
        .with_context("module_version", module)
    }

    /// Required attribute absent
    pub fn missing_attribute(attribute: &str) -> Self {
        Self::new(
            ErrorCode::MissingAttribute,
            format!("Missing attribute \"{}\"", attribute),
        )
        .with_context("attribute", attribute)
    }

    /// Attribute value cannot be read as its setting type
    pub fn invalid_attribute(attribute: &str, value: &str) -> Self {
        Self::new(
            ErrorCode::InvalidAttributeValue,
            format!("Invalid value \"{}\" for attribute \"{}\"", value, attribute),
        )
        .with_context("attribute", attribute)
        .with_context("value", value)
    }

    /// Manifest violates an invariant
    pub fn invalid_manifest(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidManifest, message)
    }

    /// Invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// No token can be issued
    pub fn access_token_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AccessTokenUnavailable, message)
    }

    /// Storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StorageError, message)
    }

    /// Refresh operation failed
    pub fn refresh_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::RefreshFailed, message)
    }

    /// Pre-fetch failed
    pub fn prefetch_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PrefetchFailed, message)
    }

    /// Operation not valid in the current state
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidState, message)
    }

    /// Internal error (bug)
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
            .with_severity(Severity::Fatal)
            .recoverable(false)
    }
}

impl Default for IntegrationError {
    fn default() -> Self {
        Self::new(ErrorCode::Internal, "Unknown error")
    }
}

impl From<serde_json::Error> for IntegrationError {
    fn from(e: serde_json::Error) -> Self {
        IntegrationError::new(ErrorCode::InvalidInput, format!("JSON error: {}", e))
    }
}

/// Component was not initialised properly.
///
/// Once returned from `connect`, the instance must not be used further.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InitError {
    #[error("Failed to initialise web component <{tag}>. Missing attribute \"{attribute}\".")]
    MissingAttribute { tag: String, attribute: String },

    #[error("Failed to initialise web component <{tag}>. {reason}.")]
    Unusable { tag: String, reason: String },
}

impl InitError {
    pub fn missing_attribute(tag: &str, attribute: &str) -> Self {
        Self::MissingAttribute {
            tag: tag.to_lowercase(),
            attribute: attribute.to_string(),
        }
    }

    pub fn unusable(tag: &str, reason: impl Into<String>) -> Self {
        Self::Unusable {
            tag: tag.to_lowercase(),
            reason: reason.into(),
        }
    }

    /// Tag name of the failing component
    pub fn tag(&self) -> &str {
        match self {
            Self::MissingAttribute { tag, .. } | Self::Unusable { tag, .. } => tag,
        }
    }
}

impl From<InitError> for IntegrationError {
    fn from(e: InitError) -> Self {
        let message = e.to_string();
        match e {
            InitError::MissingAttribute { tag, attribute } => {
                IntegrationError::new(ErrorCode::MissingAttribute, message)
                    .with_context("tag", tag)
                    .with_context("attribute", attribute)
            }
            InitError::Unusable { tag, .. } => {
                IntegrationError::new(ErrorCode::InvalidState, message)
                    .with_context("tag", tag)
                    .recoverable(false)
            }
        }
    }
}

/// Result type alias for integration operations
pub type IntegrationResult<T> = Result<T, IntegrationError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SpecVersion;

    #[test]
    fn test_incompatible_version_error() {
        let err = IntegrationError::incompatible_version(
            &SpecVersion::new(6, 0, 0),
            &SpecVersion::new(5, 0, 0),
        );
        assert_eq!(err.code, ErrorCode::IncompatibleVersion);
        assert_eq!(err.severity, Severity::Fatal);
        assert!(!err.recoverable);
        assert!(err.message.contains("5.0.0"));
        assert!(err.context_value("host_version").is_some());
    }

    #[test]
    fn test_init_error_message() {
        let err = InitError::missing_attribute("MY-COMPONENT", "user-language");
        assert_eq!(
            err.to_string(),
            "Failed to initialise web component <my-component>. Missing attribute \"user-language\"."
        );
        assert_eq!(err.tag(), "my-component");

        let converted: IntegrationError = err.into();
        assert_eq!(converted.code, ErrorCode::MissingAttribute);
        assert_eq!(converted.context_value("attribute").unwrap(), "user-language");
    }

    #[test]
    fn test_error_serialization() {
        let err = IntegrationError::access_token_unavailable("no session");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("ACCESS_TOKEN_UNAVAILABLE"));

        let recovered: IntegrationError = serde_json::from_str(&json).unwrap();
        assert_eq!(recovered.code, ErrorCode::AccessTokenUnavailable);
        assert!(recovered.recoverable);
    }

    #[test]
    fn test_refresh_failure_is_warning() {
        let err = IntegrationError::refresh_failed("backend down");
        assert_eq!(err.severity, Severity::Warning);
        assert!(err.recoverable);
    }
}
