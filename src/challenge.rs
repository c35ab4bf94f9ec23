//! Challenge types issued to credential holders.

use std::collections::{HashMap, HashSet};

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Hash of the sybil-resistance rulebook this node accepts. A presented
/// credential counts as a sybil credential when its issuer UID contains
/// this hash.
pub const SYBIL_RULEBOOK_HASH: &str =
    "ba6a4e8232f91d0b235de7a06a6c1899380c2428cea1bb0d6a0ca6724f24b6b0";

/// Moderator and lead blacklists for one rulebook.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulebookAuth {
    pub rulebook_uid: String,
    pub mod_blacklist: HashSet<String>,
    pub lead_blacklist: HashSet<String>,
}

impl RulebookAuth {
    pub fn open(rulebook_uid: impl Into<String>) -> Self {
        Self {
            rulebook_uid: rulebook_uid.into(),
            ..Self::default()
        }
    }
}

/// Relying-party configuration a challenge is derived from: the domain it
/// is scoped to and the trust policy a proof must satisfy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SsoConfiguration {
    pub domain: String,
    pub sybil: bool,
    /// Rulebook UID to the honesty requirements under that rulebook.
    pub honest_under: HashMap<String, RulebookAuth>,
}

impl SsoConfiguration {
    /// A plain pseudonymous-login configuration with no trust policy.
    pub fn basic(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            sybil: false,
            honest_under: HashMap::new(),
        }
    }
}

/// A single-sign-on challenge: a fresh unique value bound to the domain
/// and policy requirements of the issuing configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SsoChallenge {
    /// Hex-encoded 32-byte challenge value; the holder signs over it.
    pub challenge: String,
    pub domain: String,
    pub sybil: bool,
    pub honest_under: HashMap<String, RulebookAuth>,
}

impl SsoChallenge {
    /// Generates a fresh challenge for the configuration.
    pub fn new(config: &SsoConfiguration) -> Self {
        let mut value = [0u8; 32];
        OsRng.fill_bytes(&mut value);
        Self {
            challenge: hex::encode(value),
            domain: config.domain.clone(),
            sybil: config.sybil,
            honest_under: config.honest_under.clone(),
        }
    }
}

/// A delegation request: structurally parallel to [`SsoChallenge`] but
/// verified against a delegation-specific policy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegateRequest {
    pub challenge: String,
    pub domain: String,
}

/// Tagged union of everything the challenge store can hold; the policy
/// verifier matches on it exhaustively.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Challenge {
    Sso(SsoChallenge),
    Delegate(DelegateRequest),
}

impl Challenge {
    /// The unique challenge value used as the pending-store key.
    pub fn value(&self) -> &str {
        match self {
            Challenge::Sso(c) => &c.challenge,
            Challenge::Delegate(c) => &c.challenge,
        }
    }

    /// The relying-party domain the challenge is scoped to.
    pub fn domain(&self) -> &str {
        match self {
            Challenge::Sso(c) => &c.domain,
            Challenge::Delegate(c) => &c.domain,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_challenges_carry_the_configuration() {
        let mut config = SsoConfiguration::basic("https://rp.example.com");
        config.sybil = true;
        config.honest_under.insert(
            "urn:rulebook:abc".into(),
            RulebookAuth::open("urn:rulebook:abc"),
        );

        let challenge = SsoChallenge::new(&config);
        assert_eq!(challenge.challenge.len(), 64);
        assert_eq!(challenge.domain, "https://rp.example.com");
        assert!(challenge.sybil);
        assert!(challenge.honest_under.contains_key("urn:rulebook:abc"));
    }

    #[test]
    fn challenge_values_do_not_repeat() {
        let config = SsoConfiguration::basic("https://rp.example.com");
        let a = SsoChallenge::new(&config);
        let b = SsoChallenge::new(&config);
        assert_ne!(a.challenge, b.challenge);
    }
}
