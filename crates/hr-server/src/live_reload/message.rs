//! Messages pushed to live reload clients.

use axum::response::sse::Event;
use serde_json::json;

use super::version::VersionToken;

/// Message sent over the status endpoint.
///
/// Built fresh for every broadcast and never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerMessage {
    /// A build is available; clients reload when `uuid` differs from the first one seen.
    Reload {
        /// Current build token.
        uuid: VersionToken,
    },
    /// Keep-alive for idle stream connections.
    Ping {
        /// Identifier of the notifier instance that sent the ping.
        ping: String,
    },
}

impl ServerMessage {
    /// Reload message for the given token.
    #[must_use]
    pub fn reload(uuid: VersionToken) -> Self {
        Self::Reload { uuid }
    }

    /// Ping message for the given notifier instance.
    #[must_use]
    pub fn ping(instance_id: &str) -> Self {
        Self::Ping {
            ping: instance_id.to_owned(),
        }
    }

    /// SSE event name.
    #[must_use]
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Reload { .. } => "reload",
            Self::Ping { .. } => "ping",
        }
    }

    /// JSON payload, e.g. `{"uuid":"..."}`.
    #[must_use]
    pub fn payload(&self) -> serde_json::Value {
        match self {
            Self::Reload { uuid } => json!({ "uuid": uuid }),
            Self::Ping { ping } => json!({ "ping": ping }),
        }
    }

    /// Encode as a Server-Sent Event.
    #[must_use]
    pub fn to_sse_event(&self) -> Event {
        Event::default()
            .event(self.event_name())
            .data(self.payload().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live_reload::VersionState;

    #[test]
    fn test_reload_payload() {
        let token = VersionState::new().current();
        let message = ServerMessage::reload(token.clone());

        assert_eq!(message.event_name(), "reload");
        assert_eq!(
            message.payload().to_string(),
            format!(r#"{{"uuid":"{token}"}}"#)
        );
    }

    #[test]
    fn test_ping_payload() {
        let message = ServerMessage::ping("abc123");

        assert_eq!(message.event_name(), "ping");
        assert_eq!(message.payload().to_string(), r#"{"ping":"abc123"}"#);
    }
}
