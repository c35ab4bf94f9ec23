//! The challenge/session correlation and policy-verification engine.
//!
//! This module is the server side of anonymous-credential single sign-on:
//! it issues one-time challenges, matches submitted presentation tokens
//! back to waiting sessions, evaluates pseudonym/sybil/rulebook policy,
//! delegates cryptographic verification, and delivers the outcome to
//! callers that may be blocking on it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::policy::PresentationPolicyAlternatives;
use crate::proof::{PresentationToken, SignedMessage};
use crate::{
    Challenge, ClaimVerifier, EndonymToken, Error, Result, SsoChallenge, SsoConfiguration,
};

mod policy;

/// Server configuration.
pub mod config;

/// gRPC service implementation.
pub mod service;

/// Challenge and session state management.
pub mod state;

pub use config::VerifierConfig;
pub use service::SsoServiceImpl;
pub use state::{ChallengeStore, PendingChallenge, SessionStore};

/// How long a challenge may stay pending before the sweeper purges it.
pub const DEFAULT_CHALLENGE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default budget for a blocking poll. Deliberately longer than the
/// challenge lifetime so an abandoned challenge expires server-side while
/// its caller is still allowed to wait.
pub const DEFAULT_WAIT_BUDGET: Duration = Duration::from_secs(120);

/// The authentication engine: challenge store, session correlator, and
/// policy verifier behind one surface.
///
/// Cheap to share via [`Arc`]; all operations take `&self` and only
/// [`Authenticator::poll_or_wait`] ever blocks.
pub struct Authenticator {
    challenges: ChallengeStore,
    sessions: SessionStore,
    claims: Arc<dyn ClaimVerifier>,
    challenge_timeout: Duration,
    default_wait: Duration,
}

impl Authenticator {
    /// Creates an engine with the default two-tier timeouts.
    pub fn new(claims: Arc<dyn ClaimVerifier>) -> Self {
        Self::with_timeouts(claims, DEFAULT_CHALLENGE_TIMEOUT, DEFAULT_WAIT_BUDGET)
    }

    /// Creates an engine with explicit challenge and wait timeouts.
    pub fn with_timeouts(
        claims: Arc<dyn ClaimVerifier>,
        challenge_timeout: Duration,
        default_wait: Duration,
    ) -> Self {
        Self {
            challenges: ChallengeStore::new(),
            sessions: SessionStore::new(),
            claims,
            challenge_timeout,
            default_wait,
        }
    }

    /// Issues a fresh challenge for the domain unless the session already
    /// holds an authorized token there.
    pub fn issue_challenge(
        &self,
        config: &SsoConfiguration,
        session_id: &str,
    ) -> Result<SsoChallenge> {
        if self.sessions.is_authorized(session_id, &config.domain) {
            return Err(Error::AlreadyAuthenticated);
        }
        let challenge = SsoChallenge::new(config);
        info!(
            session_id,
            challenge = %challenge.challenge,
            domain = %challenge.domain,
            "issued challenge"
        );
        self.challenges
            .issue(Challenge::Sso(challenge.clone()), session_id)?;
        Ok(challenge)
    }

    /// Resolves the domain of the session's pending challenge, for a
    /// request layer that only holds the session id.
    pub fn probe_for_context(&self, session_id: &str) -> Result<String> {
        self.challenges.probe_for_context(session_id)
    }

    /// Consumes a submitted presentation token.
    ///
    /// Once the owning session is identified, any failure is recorded
    /// against that session and surfaced only through a later poll — the
    /// submitter sees `Ok(())` because submission and observation may be
    /// different call paths. Failures before a session could be resolved
    /// (no token, unreadable token, unknown challenge) surface directly.
    pub fn submit_proof(&self, token: Option<PresentationToken>) -> Result<()> {
        let started = Instant::now();
        let token = token.ok_or(Error::NoToken)?;
        let submitted_value = token.challenge_value()?;

        let pending = self.challenges.consume(&submitted_value)?;
        let session_id = pending.session_id;

        let outcome = self
            .verify_against_challenge(&session_id, pending.challenge, &token)
            .and_then(|domain| {
                self.sessions.complete(&session_id, &domain)?;
                Ok(domain)
            });

        match outcome {
            Ok(domain) => {
                info!(
                    session_id,
                    %domain,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "authentication complete"
                );
            }
            Err(e) => {
                warn!(session_id, error = %e, "authentication rejected");
                self.sessions.fail(&session_id, &e.to_string());
            }
        }
        Ok(())
    }

    /// Runs the verification pipeline for one consumed challenge and
    /// returns the authorized domain.
    fn verify_against_challenge(
        &self,
        session_id: &str,
        challenge: Challenge,
        token: &PresentationToken,
    ) -> Result<String> {
        match challenge {
            Challenge::Sso(sso) => {
                // nonce binding: the signed message must be byte-identical
                // to the canonical encoding of the stored challenge value;
                // a correct `c` smuggled inside other bytes does not count
                let expected = SignedMessage::for_challenge(&sso.challenge);
                if token.description.message.nonce != expected.nonce {
                    return Err(Error::TokenInvalidReplay);
                }

                let mut policy =
                    policy::check_pseudonyms(&self.sessions, session_id, &sso, token)?;

                if sso.sybil || !sso.honest_under.is_empty() {
                    let by_rulebook = policy::check_sybil(&mut policy, token)?;
                    if !sso.honest_under.is_empty() {
                        policy::check_rulebooks(&self.sessions, session_id, &sso, &by_rulebook)?;
                    }
                }

                let alternatives = PresentationPolicyAlternatives::single(policy);
                self.claims
                    .verify_claim(&alternatives, token)
                    .map_err(|e| match e {
                        Error::PolicyNotSatisfied(_) => e,
                        other => Error::PolicyNotSatisfied(other.to_string()),
                    })?;

                Ok(sso.domain)
            }
            Challenge::Delegate(_) => {
                // delegation policy construction is an unimplemented
                // collaborator; the attempt fails into the session error path
                Err(Error::ServerProgrammingError(
                    "delegate challenge verification is not implemented".into(),
                ))
            }
        }
    }

    /// Non-blocking outcome check for `(session, domain)`.
    pub fn query(&self, session_id: &str, domain: &str) -> Result<EndonymToken> {
        self.sessions.query(session_id, domain)
    }

    /// Returns immediately if the session has resolved for the domain,
    /// otherwise blocks up to `timeout` (`None` selects the engine
    /// default). An elapsed deadline yields a timeout token.
    pub async fn poll_or_wait(
        &self,
        session_id: &str,
        domain: &str,
        timeout: Option<Duration>,
    ) -> Result<EndonymToken> {
        let timeout = timeout.unwrap_or(self.default_wait);
        self.sessions
            .wait_for_outcome(session_id, domain, timeout)
            .await
    }

    /// Clears all authorized state for a session.
    pub fn logout(&self, session_id: &str) {
        info!(session_id, "logout");
        self.sessions.remove(session_id);
    }

    /// Purges challenges that outlived the pending timeout. Session state
    /// is untouched; an abandoned session simply times out in
    /// [`Authenticator::poll_or_wait`].
    pub fn sweep_expired(&self) -> usize {
        self.challenges.sweep(self.challenge_timeout)
    }

    /// Periodic sweep loop, intended to run as a background task.
    pub async fn run_sweeper(self: Arc<Self>, period: Duration) {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let removed = self.sweep_expired();
            if removed > 0 {
                info!(removed, "swept expired challenges");
            }
        }
    }

    pub fn pending_challenge_count(&self) -> usize {
        self.challenges.pending_count()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.session_count()
    }
}
