//! Server-side verification engine for anonymous-credential single
//! sign-on.
//!
//! A relying party asks for a fresh challenge scoped to its domain; the
//! credential holder's wallet answers with a presentation token signed
//! over that challenge; the relying party polls (optionally blocking)
//! for the outcome. A successful authentication yields a deterministic
//! per-domain pseudonym (an *endonym*) rather than an identity, so the
//! holder is unlinkable across relying parties but stable within one.
//!
//! The [`Authenticator`] is the engine; [`SsoServiceImpl`] exposes it
//! over gRPC. Proof cryptography lives behind the [`ClaimVerifier`]
//! trait.

pub mod challenge;
pub mod error;
pub mod policy;
pub mod proof;
pub mod token;
pub mod uid;
pub mod verifier;

/// Generated protobuf/gRPC types.
pub mod proto {
    tonic::include_proto!("sso");
}

pub use challenge::{
    Challenge, DelegateRequest, RulebookAuth, SsoChallenge, SsoConfiguration, SYBIL_RULEBOOK_HASH,
};
pub use error::{Error, Result};
pub use policy::{
    ClaimVerifier, PresentationPolicy, PresentationPolicyAlternatives, StructuralClaimVerifier,
};
pub use proof::{CredentialInToken, PresentationToken, PseudonymInToken, SignedMessage};
pub use token::EndonymToken;
pub use verifier::{Authenticator, SsoServiceImpl, VerifierConfig};
