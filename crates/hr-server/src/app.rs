//! Router construction.
//!
//! Builds the axum router: static files as the fallback, live reload
//! endpoints in front of them when enabled.

use std::sync::Arc;

use axum::Router;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::ServerConfig;
use crate::live_reload::{self, LiveReload};
use crate::static_files;

/// Create the application router.
///
/// # Arguments
///
/// * `config` - Server configuration
/// * `live_reload` - Shared live reload service (`None` means pass-through)
pub(crate) fn create_router(config: &ServerConfig, live_reload: Option<Arc<LiveReload>>) -> Router {
    let mut router = static_files::static_router(&config.static_root, config.static_no_cache);

    if let Some(live_reload) = live_reload {
        router = live_reload::layer(router, live_reload);
    }

    router.layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}
