use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use tonic::{Request, Response, Status};

use super::config::RateLimiter;
use super::Authenticator;
use crate::proto::sso_auth_service_server::SsoAuthService;
use crate::proto::{
    ChallengeRequest, ChallengeResponse, LogoutRequest, LogoutResponse, PollRequest, PollResponse,
    ProofAck, ProofSubmission,
};
use crate::{Error, PresentationToken, RulebookAuth, SsoConfiguration};

/// Largest accepted presentation token, in bytes of JSON.
const MAX_TOKEN_BYTES: usize = 65_536;

/// gRPC service implementation for anonymous-credential single sign-on.
pub struct SsoServiceImpl {
    auth: Arc<Authenticator>,
    rate_limiter: RateLimiter,
}

impl SsoServiceImpl {
    /// Creates a new SSO service over the given engine and rate limiter.
    pub fn new(auth: Arc<Authenticator>, rate_limiter: RateLimiter) -> Self {
        Self { auth, rate_limiter }
    }

    #[allow(clippy::result_large_err)]
    fn validate_session_id(session_id: &str) -> Result<(), Status> {
        if session_id.is_empty() {
            return Err(Status::invalid_argument("Session ID cannot be empty"));
        }

        if session_id.len() > 256 {
            return Err(Status::invalid_argument("Session ID too long"));
        }

        if !session_id
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '.')
        {
            return Err(Status::invalid_argument(
                "Session ID contains invalid characters",
            ));
        }

        Ok(())
    }

    #[allow(clippy::result_large_err)]
    fn validate_domain(domain: &str) -> Result<(), Status> {
        if domain.is_empty() {
            return Err(Status::invalid_argument("Domain cannot be empty"));
        }

        if domain.len() > 2048 {
            return Err(Status::invalid_argument("Domain too long"));
        }

        Ok(())
    }

    /// Maps engine errors onto gRPC statuses. Challenge and authorization
    /// failures collapse to one opaque message so the status cannot be
    /// used as an oracle.
    fn status_from(error: Error) -> Status {
        match error {
            Error::ChallengeNotFound | Error::NotAuthorized => {
                Status::permission_denied("Authentication failed")
            }
            Error::AlreadyAuthenticated => {
                Status::failed_precondition("Already authenticated for this domain")
            }
            Error::NoToken => Status::invalid_argument("No token provided"),
            Error::ServerProgrammingError(e) => Status::internal(e),
            other => Status::permission_denied(other.to_string()),
        }
    }
}

#[tonic::async_trait]
impl SsoAuthService for SsoServiceImpl {
    async fn issue_challenge(
        &self,
        request: Request<ChallengeRequest>,
    ) -> Result<Response<ChallengeResponse>, Status> {
        let start = Instant::now();
        counter!("sso.challenge.requests").increment(1);

        self.rate_limiter.check_rate_limit().await?;

        let req = request.into_inner();

        Self::validate_session_id(&req.session_id)?;
        Self::validate_domain(&req.domain)?;

        let mut honest_under = HashMap::with_capacity(req.honest_under.len());
        for entry in req.honest_under {
            if entry.rulebook_uid.is_empty() {
                return Err(Status::invalid_argument("Empty rulebook UID"));
            }
            honest_under.insert(
                entry.rulebook_uid.clone(),
                RulebookAuth {
                    rulebook_uid: entry.rulebook_uid,
                    mod_blacklist: HashSet::from_iter(entry.mod_blacklist),
                    lead_blacklist: HashSet::from_iter(entry.lead_blacklist),
                },
            );
        }

        let config = SsoConfiguration {
            domain: req.domain,
            sybil: req.sybil,
            honest_under,
        };

        let result = self
            .auth
            .issue_challenge(&config, &req.session_id)
            .map_err(Self::status_from);

        histogram!("sso.challenge.duration").record(start.elapsed().as_secs_f64());

        if result.is_ok() {
            counter!("sso.challenge.success").increment(1);
        } else {
            counter!("sso.challenge.failure").increment(1);
        }

        let challenge = result?;

        Ok(Response::new(ChallengeResponse {
            challenge: challenge.challenge,
            domain: challenge.domain,
        }))
    }

    async fn submit_proof(
        &self,
        request: Request<ProofSubmission>,
    ) -> Result<Response<ProofAck>, Status> {
        let start = Instant::now();
        counter!("sso.submit.requests").increment(1);

        self.rate_limiter.check_rate_limit().await?;

        let req = request.into_inner();

        if req.token_json.len() > MAX_TOKEN_BYTES {
            return Err(Status::invalid_argument("Token too large"));
        }

        let token = if req.token_json.is_empty() {
            None
        } else {
            Some(
                PresentationToken::from_json(&req.token_json)
                    .map_err(|e| Status::invalid_argument(format!("Invalid token: {e}")))?,
            )
        };

        let result = self.auth.submit_proof(token).map_err(Self::status_from);

        histogram!("sso.submit.duration").record(start.elapsed().as_secs_f64());

        if result.is_ok() {
            counter!("sso.submit.success").increment(1);
        } else {
            counter!("sso.submit.failure").increment(1);
        }

        result?;

        Ok(Response::new(ProofAck {
            accepted: true,
            message: "Proof accepted for verification".to_string(),
        }))
    }

    async fn poll(&self, request: Request<PollRequest>) -> Result<Response<PollResponse>, Status> {
        let start = Instant::now();
        counter!("sso.poll.requests").increment(1);

        self.rate_limiter.check_rate_limit().await?;

        let req = request.into_inner();

        Self::validate_session_id(&req.session_id)?;
        Self::validate_domain(&req.domain)?;

        let timeout = match req.timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };

        let result = self
            .auth
            .poll_or_wait(&req.session_id, &req.domain, timeout)
            .await
            .map_err(Self::status_from);

        histogram!("sso.poll.duration").record(start.elapsed().as_secs_f64());

        if result.is_ok() {
            counter!("sso.poll.success").increment(1);
        } else {
            counter!("sso.poll.failure").increment(1);
        }

        let token = result?;

        if token.timeout {
            counter!("sso.poll.timeouts").increment(1);
        }

        Ok(Response::new(PollResponse {
            endonym: token.endonym.unwrap_or_default(),
            moderator_uid: token.moderator_uid.unwrap_or_default(),
            error: token.error.unwrap_or_default(),
            timeout: token.timeout,
        }))
    }

    async fn logout(
        &self,
        request: Request<LogoutRequest>,
    ) -> Result<Response<LogoutResponse>, Status> {
        counter!("sso.logout.requests").increment(1);

        self.rate_limiter.check_rate_limit().await?;

        let req = request.into_inner();

        Self::validate_session_id(&req.session_id)?;

        self.auth.logout(&req.session_id);

        Ok(Response::new(LogoutResponse { removed: true }))
    }
}
