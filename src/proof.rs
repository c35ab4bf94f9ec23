//! Presentation-token structures submitted by credential holders.
//!
//! The engine treats these as opaque structured data: it inspects the
//! pseudonym and credential metadata to build a verification policy and
//! delegates the cryptographic validity of the proof itself to the
//! [`ClaimVerifier`](crate::ClaimVerifier) collaborator. How tokens are
//! constructed on the wallet side is out of scope.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// The message a holder signed over when producing the proof. The nonce
/// bytes carry a JSON object of the form `{"c": "<challenge value>"}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedMessage {
    pub nonce: Vec<u8>,
}

impl SignedMessage {
    /// Wraps a challenge value in the signed-message encoding.
    pub fn for_challenge(challenge_value: &str) -> Self {
        let body = serde_json::json!({ "c": challenge_value });
        Self {
            nonce: body.to_string().into_bytes(),
        }
    }
}

/// A pseudonym presented in a token. Exclusive pseudonyms are unique per
/// scope; non-exclusive ones anchor the holder across domains.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PseudonymInToken {
    pub scope: String,
    pub exclusive: bool,
    pub value: Vec<u8>,
}

/// A credential presented in a token, referenced by its issuer UID.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialInToken {
    pub issuer_uid: String,
}

/// The inspectable description of a presentation token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenDescription {
    pub policy_uid: String,
    pub message: SignedMessage,
    pub pseudonyms: Vec<PseudonymInToken>,
    pub credentials: Vec<CredentialInToken>,
}

/// A zero-knowledge presentation token proving credential possession and
/// pseudonym ownership without revealing the holder's identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresentationToken {
    pub description: TokenDescription,
}

impl PresentationToken {
    /// Extracts the challenge value embedded in the signed message.
    ///
    /// A token whose message cannot be decoded never identifies a
    /// session, so the failure surfaces directly to the submitter.
    pub fn challenge_value(&self) -> Result<String> {
        let message = std::str::from_utf8(&self.description.message.nonce)
            .map_err(|_| Error::ServerProgrammingError("signed message is not UTF-8".into()))?;
        let body: serde_json::Value = serde_json::from_str(message).map_err(|e| {
            Error::ServerProgrammingError(format!("signed message is not JSON: {e}"))
        })?;
        body.get("c")
            .and_then(|c| c.as_str())
            .map(str::to_owned)
            .ok_or_else(|| {
                Error::ServerProgrammingError("signed message carries no challenge".into())
            })
    }

    /// Parses a token from its JSON wire form.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| Error::ServerProgrammingError(format!("unreadable token: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_value_round_trips_through_the_signed_message() {
        let token = PresentationToken {
            description: TokenDescription {
                policy_uid: "urn:policy:1".into(),
                message: SignedMessage::for_challenge("ab12cd34"),
                pseudonyms: vec![],
                credentials: vec![],
            },
        };
        assert_eq!(token.challenge_value().unwrap(), "ab12cd34");
    }

    #[test]
    fn garbage_message_is_a_programming_error() {
        let token = PresentationToken {
            description: TokenDescription {
                policy_uid: "urn:policy:1".into(),
                message: SignedMessage {
                    nonce: vec![0xff, 0xfe],
                },
                pseudonyms: vec![],
                credentials: vec![],
            },
        };
        assert!(matches!(
            token.challenge_value(),
            Err(Error::ServerProgrammingError(_))
        ));
    }
}
