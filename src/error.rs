//! Error types for the SSO verification engine.

/// Main result type for the library.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure modes of the authentication engine.
///
/// A wait that elapses is *not* an error; it is reported as an
/// [`EndonymToken`](crate::EndonymToken) with the timeout flag set.
/// Failures discovered after the owning session has been identified are
/// recorded against that session and surfaced through a later poll, never
/// returned to the proof submitter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The challenge was never issued, has expired, or was already
    /// consumed. The cases are deliberately indistinguishable so the
    /// error cannot be used as an oracle on challenge validity.
    #[error("challenge not found: replay or timeout")]
    ChallengeNotFound,

    /// The challenge value embedded in the token's signed message does
    /// not match the challenge it was looked up under.
    #[error("token invalid: replay")]
    TokenInvalidReplay,

    /// The pseudonym set lacked a domain-exclusive pseudonym, a basis
    /// pseudonym, or both.
    #[error("unexpected pseudonym request: hasBasis={has_basis} hasExclusive={has_exclusive}")]
    UnexpectedPseudonymRequest {
        /// A non-exclusive pseudonym outside the challenge domain was present.
        has_basis: bool,
        /// An exclusive pseudonym scoped to the challenge domain was present.
        has_exclusive: bool,
    },

    /// A sybil-resistance credential was required and none was presented.
    #[error("a sybil credential was requested and none was provided")]
    SybilCredentialMissing,

    /// The presenting credential's moderator is blacklisted for a
    /// required rulebook.
    #[error("blacklisted moderator: {0}")]
    BlacklistedModerator(String),

    /// The presenting credential's lead is blacklisted for a required
    /// rulebook.
    #[error("blacklisted lead: {0}")]
    BlacklistedLead(String),

    /// The external claim verifier rejected the proof against the policy.
    #[error("policy not satisfied: {0}")]
    PolicyNotSatisfied(String),

    /// The session holds no authorized token for the requested domain.
    #[error("failed to authorize")]
    NotAuthorized,

    /// The session is already authorized for the requested domain.
    #[error("already authenticated for this domain")]
    AlreadyAuthenticated,

    /// No presentation token was provided.
    #[error("no token provided")]
    NoToken,

    /// An internal failure before any session could be identified.
    #[error("server-side programming error: {0}")]
    ServerProgrammingError(String),
}
