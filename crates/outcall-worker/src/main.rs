//! Outcall worker binary.
//!
//! Resolves settings, initializes logging, prewarms the provider clients,
//! and serves the job dispatch surface with graceful shutdown on
//! SIGTERM/SIGINT. The inference gateway handle is process-wide and closed
//! exactly once, after the server stops.

use outcall_voice::{LiveKitTelephony, Telephony, TelephonyConfig};
use outcall_worker::config::Settings;
use outcall_worker::logging::{self, log_provider_event, LogOptions};
use outcall_worker::{app, prewarm, warm_gateway, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    let settings = Arc::new(Settings::from_env());
    logging::init(&LogOptions::from(settings.as_ref()));

    tracing::info!(
        agent = settings.agent_name.as_str(),
        url = settings.livekit_url.as_str(),
        "starting outcall worker"
    );
    log_provider_event(
        "PROVIDERS CONFIGURED",
        &[
            ("stt", "deepgram"),
            ("llm", "openai"),
            ("tts", "elevenlabs"),
        ],
    );

    let providers = Arc::new(
        prewarm(&settings)
            .expect("failed to prewarm provider clients — the worker cannot take calls without them"),
    );
    let gateway = warm_gateway(&settings);

    let telephony: Arc<dyn Telephony> = Arc::new(LiveKitTelephony::new(TelephonyConfig::new(
        &settings.livekit_url,
        &settings.livekit_api_key,
        &settings.livekit_api_secret,
        &settings.sip_trunk_id,
    )));

    let state = AppState {
        settings: settings.clone(),
        telephony,
        providers,
        gateway: gateway.clone(),
    };
    let app = app(state);

    let addr = SocketAddr::new(settings.host, settings.port);
    tracing::info!(%addr, "worker dispatch surface listening");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address — is another process using this port?");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // Process-wide handle, closed once here rather than per job.
    if let Some(gateway) = gateway {
        gateway.close();
    }
    tracing::info!("outcall worker shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
