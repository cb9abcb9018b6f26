//! Validation outcome for a single load event
//!
//! Three terminal states: pass (apply the mutation), skip (idempotent no-op,
//! not an error), fail (cannot apply now, channel should retry).

/// Outcome of validating one event against the current committed state.
///
/// At most one of skip/fail is set; neither set means pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    skip: bool,
    fail: bool,
    message: Option<String>,
}

impl ValidationResult {
    /// The event should be applied.
    pub fn pass() -> Self {
        ValidationResult {
            skip: false,
            fail: false,
            message: None,
        }
    }

    /// The event is not applied and that is fine (idempotent no-op).
    pub fn skip(message: impl Into<String>) -> Self {
        ValidationResult {
            skip: true,
            fail: false,
            message: Some(message.into()),
        }
    }

    /// The event cannot be applied now and should be retried.
    pub fn fail(message: impl Into<String>) -> Self {
        ValidationResult {
            skip: false,
            fail: true,
            message: Some(message.into()),
        }
    }

    pub fn is_pass(&self) -> bool {
        !self.skip && !self.fail
    }

    pub fn is_skip(&self) -> bool {
        self.skip
    }

    pub fn is_fail(&self) -> bool {
        self.fail
    }

    /// Diagnostic message, present on skip and fail.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

impl std::fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = if self.fail {
            "fail"
        } else if self.skip {
            "skip"
        } else {
            "pass"
        };
        match &self.message {
            Some(msg) => write!(f, "{state}: {msg}"),
            None => write!(f, "{state}"),
        }
    }
}
