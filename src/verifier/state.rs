//! Concurrent challenge and session bookkeeping.
//!
//! Both stores use keyed concurrent maps so independent challenges and
//! sessions never contend on a single lock. No operation here blocks
//! except [`SessionStore::wait_for_outcome`], and that only up to the
//! caller-supplied deadline.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::{Challenge, EndonymToken, Error, Result};

/// A challenge awaiting its proof.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingChallenge {
    pub challenge: Challenge,
    pub session_id: String,
    pub issued_at: Instant,
}

/// Pending challenges keyed by challenge value, with a session-to-challenge
/// back-pointer for context probing.
///
/// A pending challenge maps to exactly one domain and policy; it leaves
/// the store atomically when consumed or when the sweeper purges it.
#[derive(Default)]
pub struct ChallengeStore {
    pending: DashMap<String, PendingChallenge>,
    session_to_challenge: DashMap<String, String>,
}

impl ChallengeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a freshly issued challenge for a session.
    ///
    /// A session that still had a challenge pending gets its binding
    /// replaced; the orphaned challenge stays in the store until the
    /// sweeper reaps it, but is no longer consumable.
    pub fn issue(&self, challenge: Challenge, session_id: &str) -> Result<()> {
        let value = challenge.value().to_owned();
        match self.pending.entry(value.clone()) {
            Entry::Occupied(_) => {
                // 32 bytes of OS randomness colliding with a pending value
                // means something is deeply wrong; never silently overwrite.
                return Err(Error::ServerProgrammingError(
                    "challenge value collision".into(),
                ));
            }
            Entry::Vacant(slot) => {
                slot.insert(PendingChallenge {
                    challenge,
                    session_id: session_id.to_owned(),
                    issued_at: Instant::now(),
                });
            }
        }
        self.session_to_challenge
            .insert(session_id.to_owned(), value);
        Ok(())
    }

    /// Looks up a pending challenge without consuming it.
    pub fn resolve_pending(&self, challenge_value: &str) -> Result<(String, Challenge)> {
        let entry = self
            .pending
            .get(challenge_value)
            .ok_or(Error::ChallengeNotFound)?;
        Ok((
            entry.challenge.domain().to_owned(),
            entry.challenge.clone(),
        ))
    }

    /// Atomically consumes a pending challenge, returning the binding.
    ///
    /// An orphaned challenge — its session requested a newer one since —
    /// is removed but reported as not found, so only a session's latest
    /// challenge is ever consumable.
    pub fn consume(&self, challenge_value: &str) -> Result<PendingChallenge> {
        let (_, pending) = self
            .pending
            .remove(challenge_value)
            .ok_or(Error::ChallengeNotFound)?;
        let still_bound = self
            .session_to_challenge
            .remove_if(&pending.session_id, |_, bound| bound == challenge_value)
            .is_some();
        if !still_bound {
            debug!(challenge = challenge_value, "discarded orphaned challenge");
            return Err(Error::ChallengeNotFound);
        }
        Ok(pending)
    }

    /// Resolves the domain of the session's currently pending challenge.
    pub fn probe_for_context(&self, session_id: &str) -> Result<String> {
        let value = self
            .session_to_challenge
            .get(session_id)
            .ok_or(Error::ChallengeNotFound)?;
        let pending = self
            .pending
            .get(value.value())
            .ok_or(Error::ChallengeNotFound)?;
        Ok(pending.challenge.domain().to_owned())
    }

    /// Removes pending challenges older than `max_age`, returning how
    /// many were purged.
    pub fn sweep(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|entry| now.duration_since(entry.issued_at) >= max_age)
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for value in expired {
            if let Some((_, pending)) = self.pending.remove(&value) {
                self.session_to_challenge
                    .remove_if(&pending.session_id, |_, bound| bound == &value);
                removed += 1;
            }
        }
        removed
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Per-session authentication state: one provisional token, one error
/// slot, and the authorized tokens keyed by domain.
#[derive(Default)]
struct SessionState {
    pending: Option<EndonymToken>,
    authorized: HashMap<String, EndonymToken>,
    error: Option<EndonymToken>,
}

/// Session-scoped outcomes with a per-session monitor for wait/notify.
///
/// Each session's state lives behind its own keyed entry, so `complete`,
/// `fail`, and `query` on the same session are mutually atomic while
/// distinct sessions never contend.
#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<String, SessionState>,
    monitors: DashMap<String, Arc<Notify>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn monitor(&self, session_id: &str) -> Arc<Notify> {
        self.monitors
            .entry(session_id.to_owned())
            .or_default()
            .clone()
    }

    /// Stores a provisional endonym ahead of cryptographic verification;
    /// the moderator UID may still be attached to it during rulebook
    /// checks.
    pub fn record_pending(&self, session_id: &str, token: EndonymToken) {
        self.sessions
            .entry(session_id.to_owned())
            .or_default()
            .pending = Some(token);
    }

    /// Attaches the moderator resolved during rulebook checks to the
    /// session's provisional endonym.
    pub fn set_pending_moderator(&self, session_id: &str, moderator_uid: &str) {
        match self.sessions.get_mut(session_id) {
            Some(mut state) => match state.pending.as_mut() {
                Some(pending) => pending.moderator_uid = Some(moderator_uid.to_owned()),
                None => warn!(session_id, "no provisional endonym for this session"),
            },
            None => warn!(session_id, "no state for this session"),
        }
    }

    /// Promotes the provisional endonym into the session's authorized
    /// map for the domain, then wakes any waiter. A later successful
    /// authentication for the same domain overwrites the earlier token.
    pub fn complete(&self, session_id: &str, domain: &str) -> Result<()> {
        {
            let mut state = self.sessions.entry(session_id.to_owned()).or_default();
            let token = state.pending.take().ok_or_else(|| {
                Error::ServerProgrammingError("no provisional endonym to promote".into())
            })?;
            state.error = None;
            state.authorized.insert(domain.to_owned(), token);
        }
        self.monitor(session_id).notify_waiters();
        Ok(())
    }

    /// Records a rejected attempt as a read-once error marker, consuming
    /// the provisional endonym, then wakes any waiter.
    pub fn fail(&self, session_id: &str, message: &str) {
        {
            let mut state = self.sessions.entry(session_id.to_owned()).or_default();
            let mut token = state.pending.take().unwrap_or_default();
            token.error = Some(message.to_owned());
            state.error = Some(token);
        }
        self.monitor(session_id).notify_waiters();
    }

    /// Non-blocking outcome check: the authorized token for the domain if
    /// present, else a pending error marker (cleared on read), else
    /// [`Error::NotAuthorized`]. The priority order is load-bearing.
    pub fn query(&self, session_id: &str, domain: &str) -> Result<EndonymToken> {
        let mut state = self
            .sessions
            .get_mut(session_id)
            .ok_or(Error::NotAuthorized)?;
        if let Some(token) = state.authorized.get(domain) {
            return Ok(token.clone());
        }
        if let Some(error) = state.error.take() {
            return Ok(error);
        }
        Err(Error::NotAuthorized)
    }

    /// True when the session already holds an authorized token for the
    /// domain. Unlike [`SessionStore::query`], never consumes an error
    /// marker.
    pub fn is_authorized(&self, session_id: &str, domain: &str) -> bool {
        self.sessions
            .get(session_id)
            .map(|state| state.authorized.contains_key(domain))
            .unwrap_or(false)
    }

    /// Deletes all per-domain state for a session and drops its monitor.
    pub fn remove(&self, session_id: &str) {
        self.sessions.remove(session_id);
        self.monitors.remove(session_id);
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Blocks until the session resolves for the domain or the deadline
    /// elapses.
    ///
    /// Resolution already present returns immediately. The monitor is
    /// registered *before* the second check, so a notification landing
    /// between the check and the wait is never lost. An elapsed deadline
    /// yields a timeout token, not an error; a wait cut short by caller
    /// cancellation simply drops the future, and the authentication
    /// attempt continues independently.
    pub async fn wait_for_outcome(
        &self,
        session_id: &str,
        domain: &str,
        timeout: Duration,
    ) -> Result<EndonymToken> {
        if let Ok(token) = self.query(session_id, domain) {
            return Ok(token);
        }

        let monitor = self.monitor(session_id);
        let notified = monitor.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if let Ok(token) = self.query(session_id, domain) {
            return Ok(token);
        }

        match tokio::time::timeout(timeout, notified).await {
            Ok(()) => self.query(session_id, domain),
            Err(_) => Ok(EndonymToken::timed_out()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SsoChallenge, SsoConfiguration};

    fn sso(domain: &str) -> Challenge {
        Challenge::Sso(SsoChallenge::new(&SsoConfiguration::basic(domain)))
    }

    #[test]
    fn consume_is_single_use() {
        let store = ChallengeStore::new();
        let challenge = sso("https://rp.example.com");
        let value = challenge.value().to_owned();
        store.issue(challenge, "s1").unwrap();

        assert!(store.consume(&value).is_ok());
        assert_eq!(store.consume(&value), Err(Error::ChallengeNotFound));
    }

    #[test]
    fn reissue_orphans_the_older_challenge() {
        let store = ChallengeStore::new();
        let first = sso("https://a.example.com");
        let second = sso("https://b.example.com");
        let first_value = first.value().to_owned();
        let second_value = second.value().to_owned();

        store.issue(first, "s1").unwrap();
        store.issue(second, "s1").unwrap();

        assert_eq!(store.consume(&first_value), Err(Error::ChallengeNotFound));
        let consumed = store.consume(&second_value).unwrap();
        assert_eq!(consumed.session_id, "s1");
    }

    #[test]
    fn probe_resolves_the_pending_domain() {
        let store = ChallengeStore::new();
        store.issue(sso("https://rp.example.com"), "s1").unwrap();
        assert_eq!(
            store.probe_for_context("s1").unwrap(),
            "https://rp.example.com"
        );
        assert_eq!(
            store.probe_for_context("unknown"),
            Err(Error::ChallengeNotFound)
        );
    }

    #[test]
    fn sweep_purges_aged_challenges_only() {
        let store = ChallengeStore::new();
        let challenge = sso("https://rp.example.com");
        let value = challenge.value().to_owned();
        store.issue(challenge, "s1").unwrap();

        assert_eq!(store.sweep(Duration::from_secs(60)), 0);
        assert!(store.resolve_pending(&value).is_ok());

        assert_eq!(store.sweep(Duration::ZERO), 1);
        assert_eq!(
            store.resolve_pending(&value),
            Err(Error::ChallengeNotFound)
        );
        assert_eq!(store.pending_count(), 0);
    }

    #[test]
    fn query_prefers_success_then_error_then_fails() {
        let sessions = SessionStore::new();
        assert_eq!(
            sessions.query("s1", "https://rp.example.com"),
            Err(Error::NotAuthorized)
        );

        sessions.record_pending("s1", EndonymToken::authenticated("urn:endonym:d:aa".into()));
        sessions.fail("s1", "rejected");

        // error marker is read exactly once
        let marker = sessions.query("s1", "https://rp.example.com").unwrap();
        assert_eq!(marker.error.as_deref(), Some("rejected"));
        assert_eq!(
            sessions.query("s1", "https://rp.example.com"),
            Err(Error::NotAuthorized)
        );
    }

    #[test]
    fn complete_promotes_the_provisional_token() {
        let sessions = SessionStore::new();
        sessions.record_pending("s1", EndonymToken::authenticated("urn:endonym:d:aa".into()));
        sessions.set_pending_moderator("s1", "urn:rulebook:lead:mod:hash");
        sessions.complete("s1", "https://rp.example.com").unwrap();

        let token = sessions.query("s1", "https://rp.example.com").unwrap();
        assert!(token.is_success());
        assert_eq!(
            token.moderator_uid.as_deref(),
            Some("urn:rulebook:lead:mod:hash")
        );
        assert!(sessions.is_authorized("s1", "https://rp.example.com"));
        assert!(!sessions.is_authorized("s1", "https://other.example.com"));
    }

    #[tokio::test]
    async fn waiter_is_woken_by_completion() {
        let sessions = Arc::new(SessionStore::new());

        let waiter = {
            let sessions = Arc::clone(&sessions);
            tokio::spawn(async move {
                sessions
                    .wait_for_outcome("s1", "https://rp.example.com", Duration::from_secs(5))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        sessions.record_pending("s1", EndonymToken::authenticated("urn:endonym:d:aa".into()));
        sessions.complete("s1", "https://rp.example.com").unwrap();

        let token = waiter.await.unwrap().unwrap();
        assert!(token.is_success());
    }

    #[tokio::test]
    async fn wait_elapsing_returns_a_timeout_token() {
        let sessions = SessionStore::new();
        let token = sessions
            .wait_for_outcome("s1", "https://rp.example.com", Duration::from_millis(30))
            .await
            .unwrap();
        assert!(token.timeout);
        assert!(token.error.is_none());
    }
}
