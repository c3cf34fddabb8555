pub mod agent;
pub mod error;
pub mod utils;

pub use agent::{AgentResult, AgentType, FinalDecision, Recommendation, StageResult};
pub use error::{
    ErrorCategory, ErrorClassifier, LensError, LlmError, Result, ResultExt, ValidationError,
    ValidationErrorKind,
};
pub use utils::{
    ParseWithDefault, json_f64, json_is_present, json_string, json_string_array,
    log_filter_error, log_filter_warn, truncate_chars,
};

// =============================================================================
// Domain Newtypes
// =============================================================================

use std::fmt;

/// Type-safe wrapper for analysis session IDs
///
/// Prevents accidental mixing of session IDs with stock codes and record IDs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random session ID
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod newtype_tests {
    use super::*;

    #[test]
    fn test_session_id() {
        let id = SessionId::new("sess-123");
        assert_eq!(id.as_str(), "sess-123");
        assert_eq!(format!("{}", id), "sess-123");
    }

    #[test]
    fn test_generated_session_ids_differ() {
        assert_ne!(SessionId::generate(), SessionId::generate());
    }
}
