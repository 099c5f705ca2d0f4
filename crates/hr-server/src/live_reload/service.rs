//! Live reload notification service.
//!
//! Ties the current build version to the set of connected stream clients.
//! One instance is created at startup and shared by every request handler
//! and the watcher.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use hr_config::ReloadMode;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use super::message::ServerMessage;
use super::registry::{BroadcastReport, ClientRegistry, ClientStream};
use super::version::{VersionState, VersionToken};
use super::watcher::{self, WatchError};
use super::script;
use crate::error::LiveReloadError;

/// Live reload settings, validated by `hr-config` before they get here.
#[derive(Clone, Debug)]
pub struct LiveReloadSettings {
    /// Notification transport.
    pub mode: ReloadMode,
    /// Status endpoint path.
    pub status_path: String,
    /// Script endpoint path.
    pub script_path: String,
    /// Build marker to watch (`None` serves a fixed token).
    pub watch: Option<PathBuf>,
    /// Interval between keep-alive pings.
    pub keepalive: Duration,
    /// Quiet period before a change is reported.
    pub debounce: Duration,
    /// Messages buffered per stream client.
    pub client_buffer: usize,
    /// Maximum concurrent stream clients.
    pub max_clients: Option<usize>,
}

impl Default for LiveReloadSettings {
    fn default() -> Self {
        Self {
            mode: ReloadMode::Sse,
            status_path: "/hot-reload".to_owned(),
            script_path: "/hot-reload/script".to_owned(),
            watch: None,
            keepalive: Duration::from_secs(15),
            debounce: Duration::from_millis(300),
            client_buffer: 16,
            max_clients: None,
        }
    }
}

/// Notification service for live reload clients.
pub struct LiveReload {
    settings: LiveReloadSettings,
    version: VersionState,
    registry: Arc<ClientRegistry>,
    instance_id: String,
    keepalive_started: AtomicBool,
    script: String,
}

impl LiveReload {
    /// Create the service with a fresh initial token.
    ///
    /// The watcher is not started; call [`LiveReload::start_watching`].
    #[must_use]
    pub fn new(settings: LiveReloadSettings) -> Self {
        let registry = Arc::new(ClientRegistry::new(
            settings.client_buffer,
            settings.max_clients,
        ));
        let script = script::render(settings.mode, &settings.status_path);

        Self {
            registry,
            version: VersionState::new(),
            instance_id: Uuid::new_v4().simple().to_string(),
            keepalive_started: AtomicBool::new(false),
            script,
            settings,
        }
    }

    /// Service settings.
    #[must_use]
    pub fn settings(&self) -> &LiveReloadSettings {
        &self.settings
    }

    /// Notification transport.
    #[must_use]
    pub fn mode(&self) -> ReloadMode {
        self.settings.mode
    }

    /// Build version state.
    #[must_use]
    pub fn version(&self) -> &VersionState {
        &self.version
    }

    /// Identifier sent in keep-alive pings.
    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Client script for the configured transport.
    #[must_use]
    pub fn script(&self) -> &str {
        &self.script
    }

    /// Number of connected stream clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.registry.len()
    }

    /// Reload message carrying the current token.
    #[must_use]
    pub fn current_payload(&self) -> ServerMessage {
        ServerMessage::reload(self.version.current())
    }

    /// Push the current token to every stream client.
    pub fn broadcast_reload(&self) -> BroadcastReport {
        self.registry.broadcast(&self.current_payload())
    }

    /// Handle a detected rebuild: new token, then notify clients.
    pub fn on_change(&self) -> VersionToken {
        let previous = self.version.generated_at();
        let token = self.version.regenerate();
        let report = self.broadcast_reload();
        let since_previous = self.version.generated_at() - previous;

        tracing::info!(
            uuid = %token,
            generation = self.version.generation(),
            since_previous_ms = since_previous.num_milliseconds(),
            delivered = report.delivered,
            removed = report.removed,
            "Build changed, clients notified"
        );
        token
    }

    /// Register a stream client.
    ///
    /// Arms the keep-alive timer on first use. The client's first message is
    /// the current reload message.
    ///
    /// # Errors
    ///
    /// Returns [`LiveReloadError::TooManyClients`] when the limit is reached.
    pub fn subscribe(&self) -> Result<ClientStream, LiveReloadError> {
        self.start_keep_alive();
        self.registry.add(|| self.current_payload())
    }

    /// Arm the recurring keep-alive ping, once.
    ///
    /// Returns `true` for the call that armed the timer. Must be called from
    /// within a tokio runtime.
    pub fn start_keep_alive(&self) -> bool {
        if self
            .keepalive_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let registry = Arc::downgrade(&self.registry);
        let instance_id = self.instance_id.clone();
        let period = self.settings.keepalive;

        tokio::spawn(keep_alive(registry, instance_id, period));
        tracing::debug!(
            interval_secs = period.as_secs(),
            "Live reload keep-alive armed"
        );
        true
    }

    /// Start the build marker watcher if one is configured.
    ///
    /// Failures are logged and leave the service serving its current token.
    pub fn start_watching(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let Some(path) = &self.settings.watch else {
            tracing::info!("No build marker configured, serving a fixed token");
            return None;
        };

        let service: Weak<Self> = Arc::downgrade(self);
        let on_change = move || {
            if let Some(service) = service.upgrade() {
                service.on_change();
            }
        };

        match watcher::spawn(path, self.settings.debounce, on_change) {
            Ok(handle) => Some(handle),
            Err(err @ (WatchError::MissingParent(_) | WatchError::InvalidTarget(_))) => {
                tracing::warn!(path = %path.display(), error = %err, "Live reload watcher disabled");
                None
            }
            Err(err) => {
                tracing::error!(path = %path.display(), error = %err, "Failed to start live reload watcher");
                None
            }
        }
    }

    /// Disconnect every stream client so the server can shut down.
    pub fn shutdown(&self) {
        let oldest = self.registry.oldest_connection();
        let count = self.registry.disconnect_all();
        if let Some(oldest) = oldest {
            tracing::info!(
                clients = count,
                oldest_secs = oldest.as_secs(),
                "Disconnected live reload clients"
            );
        }
    }
}

/// Keep-alive loop; ends when the registry is dropped.
async fn keep_alive(registry: Weak<ClientRegistry>, instance_id: String, period: Duration) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        let Some(registry) = registry.upgrade() else {
            break;
        };
        let report = registry.broadcast(&ServerMessage::ping(&instance_id));
        tracing::trace!(
            delivered = report.delivered,
            removed = report.removed,
            "Keep-alive ping sent"
        );
    }
}
