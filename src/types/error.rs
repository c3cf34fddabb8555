//! Unified Error Type System
//!
//! Centralized error types for the entire application.
//! Backend errors carry a category that drives the retry decision.
//!
//! ## Error Categories
//!
//! - **RateLimit**: HTTP 429 (retry with backoff)
//! - **Timeout**: request timed out or was aborted (retry with more patience)
//! - **Network**: connection reset, DNS failure, connect timeout (retry)
//! - **ServerError**: HTTP 5xx (retry)
//! - **ClientError**: other 4xx (terminal)
//! - **Malformed**: response could not be decoded (terminal)

use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Error Categories
// =============================================================================

/// Backend error categories for retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Rate limited (HTTP 429)
    RateLimit,
    /// Request timeout or abort
    Timeout,
    /// Connectivity issues
    Network,
    /// HTTP 5xx
    ServerError,
    /// HTTP 4xx other than 429
    ClientError,
    /// Response body could not be decoded
    Malformed,
    /// Anything else
    Unknown,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimit => write!(f, "RATE_LIMIT"),
            Self::Timeout => write!(f, "TIMEOUT"),
            Self::Network => write!(f, "NETWORK"),
            Self::ServerError => write!(f, "SERVER_ERROR"),
            Self::ClientError => write!(f, "CLIENT_ERROR"),
            Self::Malformed => write!(f, "MALFORMED"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

impl ErrorCategory {
    /// Transient categories are retried; everything else is terminal
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimit | Self::Timeout | Self::Network | Self::ServerError
        )
    }
}

// =============================================================================
// LLM Error
// =============================================================================

/// Model backend error with category, HTTP context and provider
#[derive(Debug, Clone)]
pub struct LlmError {
    /// Error category for retry decisions
    pub category: ErrorCategory,
    /// Detailed error message
    pub message: String,
    /// HTTP status, when the backend answered
    pub status: Option<u16>,
    /// Raw response body, when the backend answered
    pub body: Option<String>,
    /// Provider that produced the error
    pub provider: Option<String>,
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.provider {
            Some(provider) => write!(f, "[{}:{}] {}", provider, self.category, self.message)?,
            None => write!(f, "[{}] {}", self.category, self.message)?,
        }
        if let Some(status) = self.status {
            write!(f, " (HTTP {}", status)?;
            if let Some(body) = &self.body
                && !body.is_empty()
            {
                write!(f, ": {}", body)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl std::error::Error for LlmError {}

impl LlmError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            status: None,
            body: None,
            provider: None,
        }
    }

    pub fn with_provider(
        category: ErrorCategory,
        message: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self::new(category, message).provider(provider)
    }

    /// Add provider context to existing error
    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Attach the HTTP status and response body
    pub fn http(mut self, status: u16, body: impl Into<String>) -> Self {
        self.status = Some(status);
        self.body = Some(body.into());
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.category.is_retryable()
    }
}

// =============================================================================
// Error Classifier
// =============================================================================

/// Maps transport-level failures onto error categories
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify HTTP status code
    pub fn classify_http_status(status: u16, body: &str, provider: &str) -> LlmError {
        let category = match status {
            429 => ErrorCategory::RateLimit,
            408 => ErrorCategory::Timeout,
            500..=599 => ErrorCategory::ServerError,
            400..=499 => ErrorCategory::ClientError,
            _ => ErrorCategory::Unknown,
        };
        LlmError::with_provider(category, format!("backend returned {}", status), provider)
            .http(status, body)
    }

    /// Classify a reqwest transport error
    pub fn classify_transport(err: &reqwest::Error, provider: &str) -> LlmError {
        let category = if err.is_timeout() {
            ErrorCategory::Timeout
        } else if err.is_connect() || err.is_request() {
            ErrorCategory::Network
        } else if err.is_decode() || err.is_body() {
            ErrorCategory::Malformed
        } else if let Some(status) = err.status() {
            return Self::classify_http_status(status.as_u16(), &err.to_string(), provider);
        } else {
            ErrorCategory::Unknown
        };
        LlmError::with_provider(category, err.to_string(), provider)
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Structured validation error with context
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// What validation failed
    pub kind: ValidationErrorKind,
    /// Field or component that failed validation
    pub field: Option<String>,
    /// Detailed message
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(field) = &self.field {
            write!(f, "Validation failed for '{}': {}", field, self.message)
        } else {
            write!(f, "Validation failed: {}", self.message)
        }
    }
}

impl std::error::Error for ValidationError {}

impl ValidationError {
    pub fn new(kind: ValidationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            field: None,
            message: message.into(),
        }
    }

    /// Add field context
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    /// Value outside its allowed range
    pub fn range(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ValidationErrorKind::Range, message).with_field(field)
    }
}

/// Validation error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorKind {
    /// Required field missing
    MissingField,
    /// Invalid format
    Format,
    /// Value out of range
    Range,
    /// General validation error
    General,
}

// =============================================================================
// Application Error
// =============================================================================

#[derive(Debug, Error)]
pub enum LensError {
    // -------------------------------------------------------------------------
    // System Errors (auto From impl)
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // -------------------------------------------------------------------------
    // Backend Errors
    // -------------------------------------------------------------------------
    #[error("LLM error: {0}")]
    Llm(LlmError),

    #[error("Timeout after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    // -------------------------------------------------------------------------
    // Pipeline Errors
    // -------------------------------------------------------------------------
    #[error("{0}")]
    Validation(ValidationError),

    /// The VALIDATE gate rejected the collected market data
    #[error("Essential data missing for {stock_code}: {}", missing.join(", "))]
    EssentialDataMissing {
        stock_code: String,
        missing: Vec<String>,
    },

    #[error("Agent {agent} failed: {message}")]
    Agent { agent: String, message: String },

    #[error("Analysis cancelled")]
    Cancelled,

    // -------------------------------------------------------------------------
    // Infrastructure Errors
    // -------------------------------------------------------------------------
    #[error("Config error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Notifier error: {0}")]
    Notifier(String),
}

impl From<LlmError> for LensError {
    fn from(err: LlmError) -> Self {
        LensError::Llm(err)
    }
}

impl From<ValidationError> for LensError {
    fn from(err: ValidationError) -> Self {
        LensError::Validation(err)
    }
}

impl From<r2d2::Error> for LensError {
    fn from(err: r2d2::Error) -> Self {
        LensError::Storage(format!("connection pool: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, LensError>;

// =============================================================================
// Helper Functions
// =============================================================================

impl LensError {
    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    pub fn agent(agent: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Agent {
            agent: agent.into(),
            message: message.into(),
        }
    }

    /// Whether the backend retry loop should try again.
    ///
    /// Timeouts from `with_timeout` and categorized transient backend errors
    /// qualify; validation, malformed responses and other 4xx do not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Llm(e) => e.is_retryable(),
            Self::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Whether this is the hard pipeline gate failure
    pub fn is_essential_data_missing(&self) -> bool {
        matches!(self, Self::EssentialDataMissing { .. })
    }
}

/// Context extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn with_context<C: Into<String>>(self, context: C) -> Result<T>;

    /// Add context using a closure (lazy evaluation)
    fn with_context_fn<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T, E: std::error::Error + Send + Sync + 'static> ResultExt<T> for std::result::Result<T, E> {
    fn with_context<C: Into<String>>(self, context: C) -> Result<T> {
        self.map_err(|e| LensError::Storage(format!("{}: {}", context.into(), e)))
    }

    fn with_context_fn<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.map_err(|e| LensError::Storage(format!("{}: {}", f().into(), e)))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category_display() {
        assert_eq!(ErrorCategory::RateLimit.to_string(), "RATE_LIMIT");
        assert_eq!(ErrorCategory::ServerError.to_string(), "SERVER_ERROR");
        assert_eq!(ErrorCategory::ClientError.to_string(), "CLIENT_ERROR");
    }

    #[test]
    fn test_error_category_retryable() {
        assert!(ErrorCategory::RateLimit.is_retryable());
        assert!(ErrorCategory::Timeout.is_retryable());
        assert!(ErrorCategory::Network.is_retryable());
        assert!(ErrorCategory::ServerError.is_retryable());
        assert!(!ErrorCategory::ClientError.is_retryable());
        assert!(!ErrorCategory::Malformed.is_retryable());
        assert!(!ErrorCategory::Unknown.is_retryable());
    }

    #[test]
    fn test_classify_http_status() {
        let rate_limit = ErrorClassifier::classify_http_status(429, "slow down", "openai");
        assert_eq!(rate_limit.category, ErrorCategory::RateLimit);
        assert!(rate_limit.is_retryable());

        let server = ErrorClassifier::classify_http_status(503, "overloaded", "openai");
        assert_eq!(server.category, ErrorCategory::ServerError);

        let bad = ErrorClassifier::classify_http_status(400, "bad request", "openai");
        assert_eq!(bad.category, ErrorCategory::ClientError);
        assert!(!bad.is_retryable());

        let auth = ErrorClassifier::classify_http_status(401, "no key", "openai");
        assert!(!auth.is_retryable());
    }

    #[test]
    fn test_llm_error_display_includes_status_and_body() {
        let err = ErrorClassifier::classify_http_status(500, "boom", "openai");
        let text = err.to_string();
        assert!(text.contains("SERVER_ERROR"));
        assert!(text.contains("HTTP 500"));
        assert!(text.contains("boom"));

        let plain = LlmError::new(ErrorCategory::Network, "Connection failed");
        assert_eq!(plain.to_string(), "[NETWORK] Connection failed");
    }

    #[test]
    fn test_lens_error_retryable() {
        assert!(LensError::timeout("generate", Duration::from_secs(1)).is_retryable());
        assert!(LensError::from(LlmError::new(ErrorCategory::ServerError, "x")).is_retryable());
        assert!(!LensError::Config("bad".into()).is_retryable());
        assert!(
            !LensError::from(ValidationError::range("temperature", "out of range")).is_retryable()
        );
    }

    #[test]
    fn test_essential_data_missing_message() {
        let err = LensError::EssentialDataMissing {
            stock_code: "000001".into(),
            missing: vec!["realtime_data.price".into(), "financial_data".into()],
        };
        assert!(err.is_essential_data_missing());
        assert_eq!(
            err.to_string(),
            "Essential data missing for 000001: realtime_data.price, financial_data"
        );
    }
}
