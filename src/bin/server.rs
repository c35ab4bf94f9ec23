use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anon_sso::proto::sso_auth_service_server::SsoAuthServiceServer;
use anon_sso::verifier::config::RateLimiter;
use anon_sso::{Authenticator, SsoServiceImpl, StructuralClaimVerifier, VerifierConfig};
use clap::Parser;
use tokio::signal;
use tonic::transport::Server;
use tonic_health::server::{health_reporter, HealthReporter};
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "server")]
#[command(about = "Anonymous-credential single-sign-on verification server", long_about = None)]
#[command(version)]
struct Args {
    /// Host to bind to
    #[arg(short = 'H', long, env = "SSO_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "SSO_PORT")]
    port: Option<u16>,

    /// Enable metrics endpoint
    #[arg(long, env = "METRICS_ENABLED", default_value = "false")]
    metrics: bool,

    /// Metrics port
    #[arg(long, env = "METRICS_PORT", default_value = "9090")]
    metrics_port: u16,

    /// Rate limit requests per minute
    #[arg(long, env = "RATE_LIMIT_RPM", default_value = "100")]
    rate_limit: u64,

    /// Rate limit burst
    #[arg(long, env = "RATE_LIMIT_BURST", default_value = "50")]
    rate_burst: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = VerifierConfig::from_env().unwrap_or_else(|e| {
        error!("Failed to load configuration: {e}");
        info!("Using default configuration");
        VerifierConfig::default()
    });

    // CLI flags override file and environment configuration
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {e}");
        return Err(format!("Invalid configuration: {e}").into());
    }

    let auth = Arc::new(Authenticator::with_timeouts(
        Arc::new(StructuralClaimVerifier),
        config.timeouts.challenge(),
        config.timeouts.wait(),
    ));
    let rate_limiter = RateLimiter::new(args.rate_limit, args.rate_burst);
    let service = SsoServiceImpl::new(Arc::clone(&auth), rate_limiter);

    let sweep_interval = config.timeouts.sweep_interval();
    let sweeper_auth = Arc::clone(&auth);
    tokio::spawn(async move {
        loop {
            let auth = Arc::clone(&sweeper_auth);
            let sweep_handle = tokio::spawn(auth.run_sweeper(sweep_interval));

            match sweep_handle.await {
                Ok(()) => {
                    error!("Sweeper task terminated unexpectedly, restarting...");
                }
                Err(e) => {
                    error!("Sweeper task panicked: {:?}, restarting...", e);
                }
            }

            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    });

    if args.metrics {
        let metrics_addr =
            format!("{}:{}", config.host, args.metrics_port).parse::<SocketAddr>()?;
        tokio::spawn(async move {
            if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
                .with_http_listener(metrics_addr)
                .install()
            {
                error!("Failed to start metrics server: {e}");
            } else {
                info!("Metrics server started on {metrics_addr}");
            }
        });
    }

    let (mut health_reporter, health_service) = health_reporter();
    health_reporter
        .set_serving::<SsoAuthServiceServer<SsoServiceImpl>>()
        .await;

    let addr = config.addr();
    info!("SSO verification server starting on {addr}");
    info!(
        "Challenge timeout: {}ms, wait budget: {}ms, sweep interval: {}ms",
        config.timeouts.challenge_ms, config.timeouts.wait_ms, config.timeouts.sweep_interval_ms
    );

    Server::builder()
        .add_service(health_service)
        .add_service(SsoAuthServiceServer::new(service))
        .serve_with_shutdown(addr, shutdown_signal(health_reporter))
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal(mut health_reporter: HealthReporter) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }

    health_reporter
        .set_not_serving::<SsoAuthServiceServer<SsoServiceImpl>>()
        .await;

    info!("Initiating graceful shutdown (allowing in-flight requests to complete)");

    tokio::time::sleep(Duration::from_secs(2)).await;
}
