//! Verification policies and the external claim-verifier seam.

use serde::{Deserialize, Serialize};

use crate::proof::{CredentialInToken, PresentationToken, PseudonymInToken, SignedMessage};
use crate::{Error, Result};

/// The policy a submitted token is verified against, assembled from the
/// parts of the token the engine accepted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresentationPolicy {
    pub policy_uid: String,
    pub message: SignedMessage,
    pub pseudonyms: Vec<PseudonymInToken>,
    pub credentials: Vec<CredentialInToken>,
}

impl PresentationPolicy {
    /// An empty policy bound to the token's message and policy UID.
    pub fn bound_to(policy_uid: String, message: SignedMessage) -> Self {
        Self {
            policy_uid,
            message,
            pseudonyms: Vec::new(),
            credentials: Vec::new(),
        }
    }
}

/// Wrapper handed to the claim verifier; one policy per alternative.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresentationPolicyAlternatives {
    pub policies: Vec<PresentationPolicy>,
}

impl PresentationPolicyAlternatives {
    pub fn single(policy: PresentationPolicy) -> Self {
        Self {
            policies: vec![policy],
        }
    }
}

/// External collaborator that verifies a presentation token satisfies a
/// policy. The engine never inspects proof mathematics itself; every
/// failure from this seam is treated as a verification failure, not a
/// programming error.
pub trait ClaimVerifier: Send + Sync {
    fn verify_claim(
        &self,
        policy: &PresentationPolicyAlternatives,
        token: &PresentationToken,
    ) -> Result<()>;
}

/// Structural stand-in for the cryptographic verifier.
///
/// Checks that the token actually presents every pseudonym and credential
/// the policy demands and that the signed message matches. A real
/// zero-knowledge verifier plugs in behind the same trait.
pub struct StructuralClaimVerifier;

impl ClaimVerifier for StructuralClaimVerifier {
    fn verify_claim(
        &self,
        policy: &PresentationPolicyAlternatives,
        token: &PresentationToken,
    ) -> Result<()> {
        let description = &token.description;
        for alternative in &policy.policies {
            if alternative.message != description.message {
                return Err(Error::PolicyNotSatisfied(
                    "policy message does not match token message".into(),
                ));
            }
            for nym in &alternative.pseudonyms {
                if !description.pseudonyms.contains(nym) {
                    return Err(Error::PolicyNotSatisfied(format!(
                        "pseudonym for scope {} not presented",
                        nym.scope
                    )));
                }
            }
            for credential in &alternative.credentials {
                if !description.credentials.contains(credential) {
                    return Err(Error::PolicyNotSatisfied(format!(
                        "credential from issuer {} not presented",
                        credential.issuer_uid
                    )));
                }
            }
        }
        Ok(())
    }
}
