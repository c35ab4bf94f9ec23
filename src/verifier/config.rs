use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tonic::Status;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VerifierConfig {
    /// Hostname or IP address to bind to.
    pub host: String,
    /// Port number to listen on.
    pub port: u16,
    /// Challenge and wait timeout configuration.
    pub timeouts: TimeoutSettings,
    /// Rate limiting configuration.
    pub rate_limit: RateLimitSettings,
    /// Metrics exporter configuration.
    pub metrics: MetricsSettings,
}

impl VerifierConfig {
    /// Converts host and port into a socket address.
    ///
    /// # Panics
    /// Panics if the host and port cannot be parsed into a valid socket address.
    /// This should only happen if the configuration is malformed.
    pub fn addr(&self) -> SocketAddr {
        format!("{}:{}", self.host, self.port)
            .parse()
            .unwrap_or_else(|e| {
                panic!(
                    "Invalid server address configuration (host: {}, port: {}): {}",
                    self.host, self.port, e
                )
            })
    }
}

/// Challenge and wait timeout settings.
///
/// The two tiers are deliberately distinct: a pending challenge expires
/// well before a blocking poll gives up, so an abandoned login attempt is
/// purged server-side while its caller is still allowed to wait.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimeoutSettings {
    /// How long an unconsumed challenge stays pending, in milliseconds.
    pub challenge_ms: u64,
    /// Default budget for a blocking poll, in milliseconds.
    pub wait_ms: u64,
    /// Interval between expiry sweeps, in milliseconds.
    pub sweep_interval_ms: u64,
}

impl TimeoutSettings {
    pub fn challenge(&self) -> Duration {
        Duration::from_millis(self.challenge_ms)
    }

    pub fn wait(&self) -> Duration {
        Duration::from_millis(self.wait_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Rate limiting settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Maximum requests per minute per client.
    pub requests_per_minute: u64,
    /// Burst capacity for short-term spikes.
    pub burst: u64,
}

impl RateLimitSettings {
    /// Creates a rate limiter from these settings.
    pub fn build_limiter(&self) -> RateLimiter {
        RateLimiter::new(self.requests_per_minute, self.burst)
    }
}

/// Rate limiter using token bucket algorithm.
///
/// Thread-safe and suitable for concurrent access.
#[derive(Clone)]
pub struct RateLimiter {
    state: Arc<Mutex<RateLimiterState>>,
    rate: u64,
    burst: u64,
}

struct RateLimiterState {
    tokens: f64,
    last_update: Instant,
}

impl RateLimiter {
    /// Creates a new rate limiter.
    ///
    /// # Arguments
    /// * `requests_per_minute` - Maximum sustained request rate
    /// * `burst` - Maximum burst capacity (additional requests allowed in short bursts)
    pub fn new(requests_per_minute: u64, burst: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(RateLimiterState {
                tokens: burst as f64,
                last_update: Instant::now(),
            })),
            rate: requests_per_minute,
            burst,
        }
    }

    /// Attempts to acquire a token for a request.
    ///
    /// Returns `Ok(())` if a token was acquired, `Err(Status)` if rate limit exceeded.
    pub async fn check_rate_limit(&self) -> Result<(), Status> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_update).as_secs_f64();

        let tokens_per_second = self.rate as f64 / 60.0;
        state.tokens = (state.tokens + elapsed * tokens_per_second).min(self.burst as f64);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            state.last_update = now;
            Ok(())
        } else {
            Err(Status::resource_exhausted("Rate limit exceeded"))
        }
    }
}

/// Metrics exporter settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricsSettings {
    /// Whether metrics export is enabled.
    pub enabled: bool,
    /// Hostname or IP address for metrics server.
    pub host: String,
    /// Port number for metrics server.
    pub port: u16,
}

impl MetricsSettings {
    /// Converts host and port into a socket address for metrics server.
    ///
    /// # Panics
    /// Panics if the host and port cannot be parsed into a valid socket address.
    /// This should only happen if the configuration is malformed.
    pub fn addr(&self) -> SocketAddr {
        format!("{}:{}", self.host, self.port)
            .parse()
            .unwrap_or_else(|e| {
                panic!(
                    "Invalid metrics address configuration (host: {}, port: {}): {}",
                    self.host, self.port, e
                )
            })
    }
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 50051,
            timeouts: TimeoutSettings {
                challenge_ms: 60_000,
                wait_ms: 120_000,
                sweep_interval_ms: 10_000,
            },
            rate_limit: RateLimitSettings {
                requests_per_minute: 100,
                burst: 10,
            },
            metrics: MetricsSettings {
                enabled: true,
                host: "127.0.0.1".to_string(),
                port: 9090,
            },
        }
    }
}

impl VerifierConfig {
    /// Loads configuration from `.env` file, TOML file, and environment variables.
    ///
    /// Configuration priority (highest to lowest):
    /// 1. Environment variables with `SSO_` prefix (e.g., `SSO_PORT=8080`)
    /// 2. TOML configuration file (if exists)
    /// 3. `.env` file (if exists)
    /// 4. Built-in defaults
    ///
    /// The `.env` file is automatically loaded from the current directory or any parent
    /// directory (searches up the directory tree). If no `.env` file is found, this is
    /// not considered an error and configuration continues with other sources.
    ///
    /// The TOML file path can be set via `SSO_CONFIG_PATH` environment variable.
    /// If not set, defaults to `./config/server.toml`. If the file doesn't exist,
    /// it is silently skipped (not an error).
    ///
    /// # Environment Variable Examples
    /// ```bash
    /// # In `.env` file or shell:
    /// SSO_HOST=0.0.0.0
    /// SSO_PORT=8080
    /// SSO_TIMEOUTS_CHALLENGE_MS=60000
    /// SSO_TIMEOUTS_WAIT_MS=120000
    /// SSO_RATE_LIMIT_REQUESTS_PER_MINUTE=200
    /// SSO_METRICS_ENABLED=true
    /// SSO_METRICS_PORT=9090
    /// ```
    ///
    /// # Errors
    /// Returns an error if the configuration is malformed or contains invalid values.
    #[allow(clippy::result_large_err)]
    pub fn from_env() -> figment::error::Result<Self> {
        use figment::providers::{Env, Format, Toml};
        use figment::Figment;

        // Attempt to load .env file (silently ignore if it doesn't exist)
        let _ = dotenvy::dotenv();

        let config_path =
            std::env::var("SSO_CONFIG_PATH").unwrap_or_else(|_| "config/server.toml".to_string());

        Figment::from(figment::providers::Serialized::defaults(Self::default()))
            .merge(Toml::file(&config_path).nested())
            .merge(Env::prefixed("SSO_").split("_"))
            .extract()
    }

    /// Validates the configuration for production readiness.
    ///
    /// # Errors
    /// Returns an error message if the configuration is invalid for production use.
    pub fn validate(&self) -> Result<(), String> {
        if self.timeouts.challenge_ms == 0 {
            return Err("Challenge timeout cannot be zero".to_string());
        }

        if self.timeouts.wait_ms == 0 {
            return Err("Wait timeout cannot be zero".to_string());
        }

        if self.timeouts.sweep_interval_ms == 0 {
            return Err("Sweep interval cannot be zero".to_string());
        }

        if self.timeouts.challenge_ms >= self.timeouts.wait_ms {
            return Err(
                "Challenge timeout must be shorter than the wait timeout".to_string(),
            );
        }

        if self.rate_limit.requests_per_minute == 0 {
            return Err("Rate limit requests_per_minute cannot be zero".to_string());
        }

        if self.rate_limit.burst == 0 {
            return Err("Rate limit burst cannot be zero".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = VerifierConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.timeouts.challenge(), Duration::from_secs(60));
        assert_eq!(config.timeouts.wait(), Duration::from_secs(120));
    }

    #[test]
    fn challenge_timeout_must_undercut_wait_timeout() {
        let mut config = VerifierConfig::default();
        config.timeouts.challenge_ms = config.timeouts.wait_ms;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        let mut config = VerifierConfig::default();
        config.timeouts.sweep_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn rate_limiter_allows_within_limit() {
        let limiter = RateLimiter::new(60, 10);

        for _ in 0..10 {
            assert!(limiter.check_rate_limit().await.is_ok());
        }
    }

    #[tokio::test]
    async fn rate_limiter_blocks_over_limit() {
        let limiter = RateLimiter::new(60, 5);

        for _ in 0..5 {
            limiter.check_rate_limit().await.unwrap();
        }

        assert!(limiter.check_rate_limit().await.is_err());
    }

    #[test]
    fn rate_limit_settings_build_limiter() {
        let settings = RateLimitSettings {
            requests_per_minute: 100,
            burst: 10,
        };

        let limiter = settings.build_limiter();
        assert_eq!(limiter.rate, 100);
        assert_eq!(limiter.burst, 10);
    }
}
