//! Cache control middleware.
//!
//! While live reload is active the browser must fetch the new build on
//! reload, so static responses are marked `Cache-Control: no-cache`.

use axum::http::HeaderValue;
use axum::http::header;
use tower_http::set_header::SetResponseHeaderLayer;

/// Cache-Control value for development responses.
const NO_CACHE: &str = "no-cache";

/// Create layer that adds `Cache-Control: no-cache`.
pub(crate) fn no_cache_layer() -> SetResponseHeaderLayer<HeaderValue> {
    SetResponseHeaderLayer::overriding(header::CACHE_CONTROL, HeaderValue::from_static(NO_CACHE))
}
