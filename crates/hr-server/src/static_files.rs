//! Static file serving.
//!
//! Serves the build output directory as the fallback handler, so any request
//! the live reload endpoints pass through ends up here.

use std::path::Path;

use axum::Router;
use tower_http::services::ServeDir;

use crate::middleware::cache;

/// Create router serving files from `root`.
///
/// With `no_cache`, every response carries `Cache-Control: no-cache`.
pub(crate) fn static_router(root: &Path, no_cache: bool) -> Router {
    let serve_dir = ServeDir::new(root).append_index_html_on_directories(true);
    let router = Router::new().fallback_service(serve_dir);

    if no_cache {
        tracing::info!(root = %root.display(), "Serving static files without cache");
        router.layer(cache::no_cache_layer())
    } else {
        router
    }
}
