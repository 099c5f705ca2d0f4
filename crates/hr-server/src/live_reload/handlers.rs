//! HTTP endpoints for live reload.
//!
//! Installed as middleware in front of the host router: `GET` requests for the
//! status and script paths are answered here, everything else is passed to
//! the next handler untouched.

use std::convert::Infallible;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Request, State};
use axum::http::{Method, header};
use axum::middleware::Next;
use axum::response::sse::Sse;
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use hr_config::ReloadMode;

use super::service::LiveReload;

/// Endpoint addressed by a request.
enum Endpoint {
    Status,
    Script,
}

impl Endpoint {
    fn route(live_reload: &LiveReload, request: &Request) -> Option<Self> {
        if request.method() != Method::GET {
            return None;
        }

        let path = request.uri().path();
        let settings = live_reload.settings();
        if path == settings.status_path {
            Some(Self::Status)
        } else if path == settings.script_path {
            Some(Self::Script)
        } else {
            None
        }
    }
}

/// Middleware answering the live reload endpoints.
pub(crate) async fn dispatch(
    State(live_reload): State<Arc<LiveReload>>,
    request: Request,
    next: Next,
) -> Response {
    match Endpoint::route(&live_reload, &request) {
        Some(Endpoint::Status) => match live_reload.mode() {
            ReloadMode::Sse => event_stream(&live_reload),
            ReloadMode::Poll => poll(&live_reload),
        },
        Some(Endpoint::Script) => script(&live_reload),
        None => next.run(request).await,
    }
}

/// Open a Server-Sent Events stream for a new client.
fn event_stream(live_reload: &LiveReload) -> Response {
    let stream = match live_reload.subscribe() {
        Ok(stream) => stream,
        Err(err) => {
            tracing::warn!(error = %err, "Rejected live reload client");
            return err.into_response();
        }
    };
    tracing::debug!(
        client = stream.id(),
        clients = live_reload.client_count(),
        "Live reload client connected"
    );

    let events = stream.map(|message| Ok::<_, Infallible>(message.to_sse_event()));

    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        Sse::new(events),
    )
        .into_response()
}

/// Answer a poll request with the current token.
fn poll(live_reload: &LiveReload) -> Response {
    (
        [(header::CACHE_CONTROL, "no-cache")],
        Json(live_reload.current_payload().payload()),
    )
        .into_response()
}

/// Serve the client script.
fn script(live_reload: &LiveReload) -> Response {
    (
        [(header::CONTENT_TYPE, "application/javascript")],
        live_reload.script().to_owned(),
    )
        .into_response()
}
