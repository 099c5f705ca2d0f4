//! Live reload system for development mode.
//!
//! Watches a build marker file and tells connected browsers that a new build
//! is available, either by pushing Server-Sent Events or by answering polls.
//!
//! ```text
//! notify ─► watcher ─► debouncer ─► LiveReload::on_change
//!                                        │
//!                                        ├─► VersionState::regenerate
//!                                        └─► ClientRegistry::broadcast ─► SSE clients
//! ```

mod debouncer;
mod handlers;
mod message;
mod registry;
mod script;
mod service;
mod version;
mod watcher;

use std::sync::Arc;

use axum::Router;

pub use message::ServerMessage;
pub use registry::{BroadcastReport, ClientId, ClientRegistry, ClientStream};
pub use service::{LiveReload, LiveReloadSettings};
pub use version::{VersionState, VersionToken};

/// Install the live reload endpoints in front of `router`.
///
/// Requests that are not `GET` on the status or script path reach the
/// router unchanged.
pub fn layer<S>(router: Router<S>, live_reload: Arc<LiveReload>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(axum::middleware::from_fn_with_state(
        live_reload,
        handlers::dispatch,
    ))
}
