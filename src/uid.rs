//! Deterministic identifier derivations.
//!
//! Every function here is pure and reproducible bit-for-bit: the same
//! inputs always yield the same identifier on any implementation. The
//! moderator-to-lead derivation is one-way only; nothing here recovers a
//! moderator from a lead, or a holder from an endonym.

use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// URN prefix shared by all rulebook-derived identifiers.
pub const RULEBOOK_URN_PREFIX: &str = "urn:rulebook";

/// Derives the per-domain endonym for a presented pseudonym.
///
/// Same holder, same domain-scoped pseudonym, same endonym — and the
/// derivation is not reversible to the pseudonym value.
pub fn endonym_form(scope: &str, pseudonym_value: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(scope.as_bytes());
    hasher.update([0u8]);
    hasher.update(pseudonym_value);
    format!("urn:endonym:{scope}:{}", hex::encode(hasher.finalize()))
}

/// Segments of a rulebook issuer UID, `urn:rulebook:<lead>:<mod>:<hash>[:...]`.
struct IssuerSegments<'a> {
    lead: &'a str,
    moderator: &'a str,
    hash: &'a str,
}

fn parse_issuer(issuer_uid: &str) -> Result<IssuerSegments<'_>> {
    let rest = issuer_uid
        .strip_prefix(RULEBOOK_URN_PREFIX)
        .and_then(|r| r.strip_prefix(':'))
        .ok_or_else(|| malformed(issuer_uid))?;

    let mut parts = rest.split(':');
    let lead = parts.next().filter(|s| !s.is_empty());
    let moderator = parts.next().filter(|s| !s.is_empty());
    let hash = parts.next().filter(|s| !s.is_empty());

    match (lead, moderator, hash) {
        (Some(lead), Some(moderator), Some(hash)) => Ok(IssuerSegments {
            lead,
            moderator,
            hash,
        }),
        _ => Err(malformed(issuer_uid)),
    }
}

fn malformed(uid: &str) -> Error {
    Error::ServerProgrammingError(format!("malformed rulebook uid: {uid}"))
}

/// Derives the rulebook UID a credential was issued under.
pub fn rulebook_uid_from_issuer(issuer_uid: &str) -> Result<String> {
    let segments = parse_issuer(issuer_uid)?;
    Ok(format!("{RULEBOOK_URN_PREFIX}:{}", segments.hash))
}

/// Derives the moderator UID from a credential's issuer UID.
pub fn mod_uid_from_issuer(issuer_uid: &str) -> Result<String> {
    let segments = parse_issuer(issuer_uid)?;
    Ok(format!(
        "{RULEBOOK_URN_PREFIX}:{}:{}:{}",
        segments.lead, segments.moderator, segments.hash
    ))
}

/// Derives the lead UID from a moderator UID by dropping the moderator
/// segment. The inverse direction is not derivable.
pub fn lead_uid_from_mod(mod_uid: &str) -> Result<String> {
    let segments = parse_issuer(mod_uid)?;
    Ok(format!(
        "{RULEBOOK_URN_PREFIX}:{}:{}",
        segments.lead, segments.hash
    ))
}
