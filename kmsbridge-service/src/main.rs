//! KMS Bridge
//!
//! Binds the KMS endpoint, warms up the PKCS#11 library in the background
//! and reloads keys and signing credentials on SIGHUP.
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use anyhow::Result;
use kmsbridge_config::AppConfig;
use kmsbridge_keys::{KeyManager, KeySet, Pkcs11TokenManager};
use kmsbridge_service::{
    apply_config, router, spawn_preheat, wait_for_shutdown, AppState, SignatureSettings,
    SignatureVerifier,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = AppConfig::load()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    // Initialize logging
    kmsbridge_logging::init("kmsbridge", config.log_level(), config.log_format);

    info!("Starting KMS Bridge");

    let token_manager = Pkcs11TokenManager::new(config.token.library_path());
    info!(
        library = %token_manager.library_path().display(),
        "Using PKCS#11 library"
    );

    let keys = KeySet::from_config(&config.keys, &config.token);
    info!(keys = keys.len(), "Key set loaded");
    let key_manager = Arc::new(KeyManager::new(keys, Arc::new(token_manager)));
    let verifier = Arc::new(SignatureVerifier::new(SignatureSettings::from_config(
        &config.signature,
    )));

    let preheat_handle = spawn_preheat(key_manager.clone());
    let reload_handle = tokio::spawn(reload_on_hangup(key_manager.clone(), verifier.clone()));

    let addr = config
        .listen_addr()
        .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", addr, e))?;

    info!(
        listen = %addr,
        max_request_body_bytes = config.max_request_body_bytes,
        "KMS Bridge listening"
    );

    let app = router(
        AppState::new(key_manager, verifier),
        config.max_request_body_bytes,
    );

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    reload_handle.abort();
    preheat_handle.abort();
    info!("KMS Bridge stopped");

    Ok(())
}

/// Re-read the configuration on every SIGHUP
///
/// A configuration that fails to load leaves the previous one active.
#[cfg(unix)]
async fn reload_on_hangup(key_manager: Arc<KeyManager>, verifier: Arc<SignatureVerifier>) {
    let mut hangup = match signal::unix::signal(signal::unix::SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            error!(error = %e, "Failed to install SIGHUP handler, reload disabled");
            return;
        }
    };

    while hangup.recv().await.is_some() {
        info!("SIGHUP received, reloading configuration");
        match AppConfig::load() {
            Ok(config) => apply_config(&config, &key_manager, &verifier),
            Err(e) => error!(error = %e, "Configuration reload failed, keeping previous"),
        }
    }
}

#[cfg(not(unix))]
async fn reload_on_hangup(_key_manager: Arc<KeyManager>, _verifier: Arc<SignatureVerifier>) {}

/// Ctrl+C or SIGTERM, whichever comes first
async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())?
            .recv()
            .await;
        Ok::<(), std::io::Error>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<std::io::Result<()>>();

    let fired = wait_for_shutdown(signal::ctrl_c(), terminate).await;
    info!(signal = fired, "Shutdown signal received, draining connections");
}
