// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::net::SocketAddr;
use std::time::Duration;

use auth_gateway::{
    api::router,
    config::Config,
    maintenance::Maintenance,
    state::initialize,
    telemetry,
};
use axum_server::tls_rustls::RustlsConfig;
use tokio_util::sync::CancellationToken;

/// How long in-flight requests get to finish after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };
    telemetry::init(config.log_format);

    let (state, directory) = match initialize(&config) {
        Ok(initialized) => initialized,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            std::process::exit(1);
        }
    };

    if let Some((username, password)) = &config.seed_user {
        match directory.add_user(username, password) {
            Ok(user_id) => tracing::info!(username = %username, user_id = %user_id, "Seeded development user"),
            Err(e) => tracing::warn!(error = %e, "Failed to seed development user"),
        }
    }

    let shutdown = CancellationToken::new();
    let maintenance = Maintenance::new(
        state.keys.clone(),
        state.sessions.clone(),
        state.oauth.clone(),
        config.key_rotation_interval,
        config.maintenance_interval,
    );
    let maintenance_task = tokio::spawn(maintenance.run(shutdown.clone()));

    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .expect("Failed to parse bind address");

    match &config.tls {
        Some(tls) => {
            // Install the ring crypto provider for rustls (must be done before any TLS operations)
            rustls::crypto::ring::default_provider()
                .install_default()
                .expect("Failed to install rustls crypto provider");

            let tls_config = RustlsConfig::from_pem_file(&tls.cert, &tls.key)
                .await
                .expect("Failed to load TLS certificate and key");

            let handle: axum_server::Handle<std::net::SocketAddr> = axum_server::Handle::new();
            let signal_handle = handle.clone();
            let signal_token = shutdown.clone();
            tokio::spawn(async move {
                shutdown_signal().await;
                signal_token.cancel();
                signal_handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
            });

            tracing::info!(%addr, "Auth gateway listening on https (docs at /docs)");
            axum_server::bind_rustls(addr, tls_config)
                .handle(handle)
                .serve(app.into_make_service())
                .await
                .expect("HTTPS server failed");
        }
        None => {
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .expect("Failed to bind listener");

            tracing::warn!(%addr, "Auth gateway listening on plain http (docs at /docs)");
            let signal_token = shutdown.clone();
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_signal().await;
                    signal_token.cancel();
                })
                .await
                .expect("HTTP server failed");
        }
    }

    shutdown.cancel();
    if let Err(e) = maintenance_task.await {
        tracing::error!(error = %e, "Maintenance task panicked");
    }
    tracing::info!("Auth gateway stopped");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
