//! Per-domain pseudonymous authentication outcomes.

use serde::{Deserialize, Serialize};

/// The result of one authentication attempt, scoped to a domain.
///
/// A token is exactly one of: a successful result (`endonym` set), an
/// error marker (`error` set), or a timeout marker (`timeout` set).
/// Callers receive a copy; the stored original is owned by the session
/// correlator and never mutated after it resolves.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndonymToken {
    /// Domain-scoped pseudonymous identifier, derived deterministically
    /// from the domain and the presented pseudonym value.
    pub endonym: Option<String>,
    /// Set when a rulebook honesty check resolved the presenting
    /// credential's moderator.
    pub moderator_uid: Option<String>,
    /// Failure message when the authentication attempt was rejected.
    pub error: Option<String>,
    /// True when the wait deadline elapsed before any resolution.
    pub timeout: bool,
}

impl EndonymToken {
    /// A successful authentication result.
    pub fn authenticated(endonym: String) -> Self {
        Self {
            endonym: Some(endonym),
            ..Self::default()
        }
    }

    /// An error marker for a rejected attempt.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    /// The synthetic outcome for a wait that elapsed; an expected result,
    /// not an error.
    pub fn timed_out() -> Self {
        Self {
            timeout: true,
            ..Self::default()
        }
    }

    /// True for a resolved, non-error, non-timeout token.
    pub fn is_success(&self) -> bool {
        self.endonym.is_some() && self.error.is_none() && !self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_error_and_timeout_are_mutually_exclusive() {
        assert!(EndonymToken::authenticated("urn:endonym:d:ab".into()).is_success());
        assert!(!EndonymToken::failure("rejected").is_success());
        assert!(!EndonymToken::timed_out().is_success());
        assert!(EndonymToken::timed_out().timeout);
    }
}
