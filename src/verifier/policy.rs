//! Pseudonym, sybil, and rulebook policy evaluation.
//!
//! Each check consumes the presented token metadata and grows the policy
//! that is eventually handed to the claim verifier; nothing here touches
//! proof cryptography.

use std::collections::HashMap;

use tracing::{debug, info};

use super::state::SessionStore;
use crate::proof::{CredentialInToken, PresentationToken};
use crate::{uid, EndonymToken, Error, PresentationPolicy, Result, SsoChallenge, SYBIL_RULEBOOK_HASH};

/// Applies the pseudonym policy and starts the policy under construction.
///
/// Exactly one pseudonym scoped to the challenge domain and flagged
/// exclusive must be present; the first one wins and later duplicates are
/// ignored rather than rejected. At least one non-exclusive pseudonym
/// outside the domain must anchor the holder to a persistent basis.
/// The accepted exclusive pseudonym immediately yields the session's
/// provisional endonym.
pub(super) fn check_pseudonyms(
    sessions: &SessionStore,
    session_id: &str,
    challenge: &SsoChallenge,
    token: &PresentationToken,
) -> Result<PresentationPolicy> {
    let description = &token.description;
    let mut policy = PresentationPolicy::bound_to(
        description.policy_uid.clone(),
        description.message.clone(),
    );

    let mut has_basis = false;
    let mut has_exclusive = false;

    for nym in &description.pseudonyms {
        if nym.scope == challenge.domain {
            if nym.exclusive && !has_exclusive {
                policy.pseudonyms.push(nym.clone());
                let endonym = uid::endonym_form(&nym.scope, &nym.value);
                debug!(session_id, %endonym, "derived provisional endonym");
                sessions.record_pending(session_id, EndonymToken::authenticated(endonym));
                has_exclusive = true;
            }
        } else if !nym.exclusive {
            policy.pseudonyms.push(nym.clone());
            has_basis = true;
        }
    }

    if has_exclusive && has_basis {
        Ok(policy)
    } else {
        Err(Error::UnexpectedPseudonymRequest {
            has_basis,
            has_exclusive,
        })
    }
}

/// Indexes the presented credentials by their derived rulebook UID,
/// adding each to the policy, and enforces the sybil-resistance gate.
///
/// Called only when the challenge demands sybil resistance or rulebook
/// honesty; in either case a credential from the sybil rulebook must be
/// present.
pub(super) fn check_sybil(
    policy: &mut PresentationPolicy,
    token: &PresentationToken,
) -> Result<HashMap<String, CredentialInToken>> {
    let mut by_rulebook = HashMap::new();
    let mut found_sybil = false;

    for credential in &token.description.credentials {
        let rulebook_uid = uid::rulebook_uid_from_issuer(&credential.issuer_uid)?;
        debug!(issuer = %credential.issuer_uid, rulebook = %rulebook_uid, "indexed credential");
        by_rulebook.insert(rulebook_uid, credential.clone());
        policy.credentials.push(credential.clone());
        if credential.issuer_uid.contains(SYBIL_RULEBOOK_HASH) {
            found_sybil = true;
        }
    }

    if found_sybil {
        Ok(by_rulebook)
    } else {
        Err(Error::SybilCredentialMissing)
    }
}

/// Enforces the per-rulebook honesty policy against the indexed
/// credentials and attaches the resolved moderator to the session's
/// provisional endonym.
pub(super) fn check_rulebooks(
    sessions: &SessionStore,
    session_id: &str,
    challenge: &SsoChallenge,
    by_rulebook: &HashMap<String, CredentialInToken>,
) -> Result<()> {
    for (rulebook_uid, auth) in &challenge.honest_under {
        let credential = by_rulebook.get(rulebook_uid).ok_or_else(|| {
            Error::PolicyNotSatisfied(format!("no credential presented for {rulebook_uid}"))
        })?;

        let mod_uid = uid::mod_uid_from_issuer(&credential.issuer_uid)?;
        if auth.mod_blacklist.contains(&mod_uid) {
            return Err(Error::BlacklistedModerator(mod_uid));
        }

        let lead_uid = uid::lead_uid_from_mod(&mod_uid)?;
        if auth.lead_blacklist.contains(&lead_uid) {
            return Err(Error::BlacklistedLead(lead_uid));
        }

        info!(session_id, %mod_uid, %lead_uid, "rulebook honesty check passed");
        sessions.set_pending_moderator(session_id, &mod_uid);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proof::{PseudonymInToken, SignedMessage, TokenDescription};
    use crate::SsoConfiguration;

    const DOMAIN: &str = "https://rp.example.com";

    fn challenge() -> SsoChallenge {
        SsoChallenge::new(&SsoConfiguration::basic(DOMAIN))
    }

    fn token_with(pseudonyms: Vec<PseudonymInToken>) -> PresentationToken {
        PresentationToken {
            description: TokenDescription {
                policy_uid: "urn:policy:1".into(),
                message: SignedMessage::for_challenge("cafe"),
                pseudonyms,
                credentials: vec![],
            },
        }
    }

    fn exclusive(value: &[u8]) -> PseudonymInToken {
        PseudonymInToken {
            scope: DOMAIN.into(),
            exclusive: true,
            value: value.to_vec(),
        }
    }

    fn basis() -> PseudonymInToken {
        PseudonymInToken {
            scope: "urn:basis".into(),
            exclusive: false,
            value: b"root".to_vec(),
        }
    }

    #[test]
    fn first_exclusive_pseudonym_wins_and_duplicates_are_ignored() {
        let sessions = SessionStore::new();
        let token = token_with(vec![exclusive(b"one"), exclusive(b"two"), basis()]);

        let policy = check_pseudonyms(&sessions, "s1", &challenge(), &token).unwrap();
        // the second exclusive pseudonym is dropped, not rejected
        assert_eq!(policy.pseudonyms.len(), 2);

        sessions.complete("s1", DOMAIN).unwrap();
        let token = sessions.query("s1", DOMAIN).unwrap();
        assert_eq!(
            token.endonym.as_deref(),
            Some(uid::endonym_form(DOMAIN, b"one").as_str())
        );
    }

    #[test]
    fn missing_basis_is_rejected_with_both_flags() {
        let sessions = SessionStore::new();
        let token = token_with(vec![exclusive(b"one")]);

        assert_eq!(
            check_pseudonyms(&sessions, "s1", &challenge(), &token),
            Err(Error::UnexpectedPseudonymRequest {
                has_basis: false,
                has_exclusive: true,
            })
        );
    }

    #[test]
    fn missing_exclusive_is_rejected_with_both_flags() {
        let sessions = SessionStore::new();
        let token = token_with(vec![basis()]);

        assert_eq!(
            check_pseudonyms(&sessions, "s1", &challenge(), &token),
            Err(Error::UnexpectedPseudonymRequest {
                has_basis: true,
                has_exclusive: false,
            })
        );
    }

    #[test]
    fn exclusive_pseudonym_outside_the_domain_is_no_basis() {
        let sessions = SessionStore::new();
        let mut foreign = basis();
        foreign.exclusive = true;
        let token = token_with(vec![exclusive(b"one"), foreign]);

        assert_eq!(
            check_pseudonyms(&sessions, "s1", &challenge(), &token),
            Err(Error::UnexpectedPseudonymRequest {
                has_basis: false,
                has_exclusive: true,
            })
        );
    }
}
