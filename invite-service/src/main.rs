use invite_service::{
    AppState, build_router,
    config::{InviteConfig, MailMode},
    services::{
        HttpIdentity, HttpMembershipStore, IdentityProvider, InvitationCoordinator, MailProvider,
        MembershipStore, SmtpMailer,
    },
};
use service_core::middleware::rate_limit::create_ip_rate_limiter;
use service_core::observability::logging::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), service_core::error::AppError> {
    // Load configuration - fail fast if invalid
    let config = InviteConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        policy = ?config.flow.policy,
        binding = ?config.flow.binding,
        mail = ?config.flow.mail,
        "Starting invitation service"
    );

    // External collaborators, all behind one bounded-round-trip timeout.
    let timeout = Duration::from_secs(config.common.http_timeout_seconds);
    let identity: Arc<dyn IdentityProvider> = Arc::new(HttpIdentity::new(&config.backend, timeout)?);
    let memberships: Arc<dyn MembershipStore> =
        Arc::new(HttpMembershipStore::new(&config.backend, timeout)?);

    let mailer: Option<Arc<dyn MailProvider>> = match (&config.flow.mail, &config.smtp) {
        (MailMode::Smtp, Some(smtp)) => Some(Arc::new(SmtpMailer::new(smtp)?)),
        _ => None,
    };

    let coordinator = Arc::new(InvitationCoordinator::new(
        identity,
        memberships,
        mailer,
        config.flow.clone(),
        config.app.clone(),
    ));
    tracing::info!("Invitation coordinator initialized");

    let invite_rate_limiter = create_ip_rate_limiter(
        config.rate_limit.invite_attempts,
        config.rate_limit.invite_window_seconds,
    );
    let ip_rate_limiter = create_ip_rate_limiter(
        config.rate_limit.global_ip_limit,
        config.rate_limit.global_ip_window_seconds,
    );
    tracing::info!("Rate limiters initialized: Invite and Global IP");

    let state = AppState {
        config: config.clone(),
        coordinator,
        invite_rate_limiter,
        ip_rate_limiter,
    };

    let app = build_router(state).await?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    service_core::axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }

    // Give in-flight requests a moment to complete
    tokio::time::sleep(tokio::time::Duration::from_secs(10)).await;
}
