//! Client-side reload scripts.
//!
//! Both variants remember the first token they see and force a full page
//! reload when a later token differs. On transport errors they retry after
//! one second; the poll variant also reloads once the server answers again.

use hr_config::ReloadMode;

/// Placeholder replaced with the status endpoint path (as a JS string literal).
const PATH_PLACEHOLDER: &str = "__HOT_RELOAD_PATH__";

const SSE_SCRIPT: &str = include_str!("assets/sse.js");
const POLL_SCRIPT: &str = include_str!("assets/poll.js");

/// Render the client script for a transport and status endpoint.
pub(crate) fn render(mode: ReloadMode, status_path: &str) -> String {
    let template = match mode {
        ReloadMode::Sse => SSE_SCRIPT,
        ReloadMode::Poll => POLL_SCRIPT,
    };
    // JSON string encoding doubles as JS string literal escaping
    let literal = serde_json::Value::from(status_path).to_string();
    template.replace(PATH_PLACEHOLDER, &literal)
}
