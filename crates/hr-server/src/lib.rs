//! Development HTTP server with live reload for hr.
//!
//! This crate provides a native Rust HTTP server using axum, serving:
//! - Static files from the build output directory
//! - A live reload status endpoint (Server-Sent Events or JSON polling)
//! - The client-side script that talks to the status endpoint
//!
//! # Quick Start
//!
//! ```ignore
//! use std::path::PathBuf;
//! use hr_server::{LiveReloadSettings, ServerConfig, run_server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ServerConfig {
//!         host: "127.0.0.1".to_owned(),
//!         port: 7878,
//!         static_root: PathBuf::from("public"),
//!         static_no_cache: true,
//!         live_reload: Some(LiveReloadSettings {
//!             watch: Some(PathBuf::from("public/build-info.json")),
//!             ..LiveReloadSettings::default()
//!         }),
//!     };
//!
//!     run_server(config).await.unwrap();
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! Browser ──HTTP──► axum server (hr-server)
//!                        │
//!                        ├─► live reload middleware (GET status / script)
//!                        │       │
//!                        │       └─► LiveReload ◄── notify watcher
//!                        │
//!                        └─► Static files (tower-http)
//! ```
//!
//! When live reload is not active the middleware is not installed, so every
//! request goes straight to the static files.

mod app;
mod error;
mod live_reload;
mod middleware;
mod static_files;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub use error::{LiveReloadError, ServerError};
pub use live_reload::{
    BroadcastReport, ClientId, ClientRegistry, ClientStream, LiveReload, LiveReloadSettings,
    ServerMessage, VersionState, VersionToken,
};

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Directory served as static files.
    pub static_root: PathBuf,
    /// Send `Cache-Control: no-cache` with static files.
    pub static_no_cache: bool,
    /// Live reload settings (`None` disables the endpoints).
    pub live_reload: Option<LiveReloadSettings>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 7878,
            static_root: PathBuf::from("public"),
            static_no_cache: false,
            live_reload: None,
        }
    }
}

/// Run the server.
///
/// # Arguments
///
/// * `config` - Server configuration
///
/// # Errors
///
/// Returns an error if the address is invalid or the listener fails.
pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let addr = SocketAddr::from_str(&format!("{}:{}", config.host, config.port))?;

    // Create live reload service if enabled
    let live_reload = config
        .live_reload
        .clone()
        .map(|settings| Arc::new(LiveReload::new(settings)));
    let watcher = live_reload.as_ref().and_then(LiveReload::start_watching);

    let app = app::create_router(&config, live_reload.clone());

    tracing::info!(address = %addr, root = %config.static_root.display(), "Starting server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(live_reload))
        .await?;

    if let Some(watcher) = watcher {
        watcher.abort();
    }

    Ok(())
}

/// Wait for shutdown signal (Ctrl-C), then close live reload streams.
///
/// Open event streams never end on their own, so they are closed here to let
/// graceful shutdown finish.
async fn shutdown_signal(live_reload: Option<Arc<LiveReload>>) {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");

    if let Some(live_reload) = live_reload {
        live_reload.shutdown();
    }
}

/// Create server configuration from hr config.
///
/// # Arguments
///
/// * `config` - Loaded and validated hr configuration
#[must_use]
pub fn server_config_from_config(config: &hr_config::Config) -> ServerConfig {
    let live_reload = config.live_reload.enabled.then(|| {
        let section = &config.live_reload;
        LiveReloadSettings {
            mode: section.mode,
            status_path: section.path.clone(),
            script_path: section.script_path(),
            watch: config.watch_target.clone(),
            keepalive: Duration::from_secs(section.keepalive_secs),
            debounce: Duration::from_millis(section.debounce_ms),
            client_buffer: section.client_buffer,
            max_clients: section.max_clients,
        }
    });

    ServerConfig {
        host: config.server.host.clone(),
        port: config.server.port,
        static_root: config.static_resolved.root.clone(),
        static_no_cache: config.static_no_cache(),
        live_reload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hr_config::{Config, ReloadMode};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_server_config_from_default_config() {
        let config = Config::default();

        let server = server_config_from_config(&config);

        assert_eq!(server.host, "127.0.0.1");
        assert_eq!(server.port, 7878);
        assert!(server.live_reload.is_none());
    }

    #[test]
    fn test_server_config_maps_live_reload() {
        let mut config = Config::default();
        config.live_reload.enabled = true;
        config.live_reload.mode = ReloadMode::Poll;
        config.live_reload.path = "/__reload".to_owned();
        config.live_reload.keepalive_secs = 30;
        config.live_reload.debounce_ms = 100;
        config.live_reload.max_clients = Some(4);
        config.watch_target = Some(PathBuf::from("/srv/app/build-info.json"));

        let server = server_config_from_config(&config);
        let settings = server.live_reload.unwrap();

        assert!(server.static_no_cache);
        assert_eq!(settings.mode, ReloadMode::Poll);
        assert_eq!(settings.status_path, "/__reload");
        assert_eq!(settings.script_path, "/__reload/script");
        assert_eq!(
            settings.watch,
            Some(PathBuf::from("/srv/app/build-info.json"))
        );
        assert_eq!(settings.keepalive, Duration::from_secs(30));
        assert_eq!(settings.debounce, Duration::from_millis(100));
        assert_eq!(settings.max_clients, Some(4));
    }

    #[test]
    fn test_server_config_disabled_ignores_watch_target() {
        let mut config = Config::default();
        config.watch_target = Some(PathBuf::from("/srv/app/build-info.json"));

        let server = server_config_from_config(&config);

        assert!(server.live_reload.is_none());
    }

    #[tokio::test]
    async fn test_run_server_invalid_address() {
        let config = ServerConfig {
            host: "not an address".to_owned(),
            ..ServerConfig::default()
        };

        let result = run_server(config).await;

        assert!(matches!(result, Err(ServerError::AddrParse(_))));
    }
}
