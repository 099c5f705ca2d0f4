//! Registry of connected stream clients.
//!
//! Each stream client owns the receiving half of a bounded channel; the
//! registry keeps the sending half. A client is removed when its stream is
//! dropped (the HTTP connection closed), when a send finds the channel closed,
//! or when its buffer is full because it stopped reading.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures::Stream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::message::ServerMessage;
use crate::error::LiveReloadError;

/// Identifier assigned to each registered client.
pub type ClientId = u64;

/// Registry entry for one stream client.
struct Client {
    sender: mpsc::Sender<ServerMessage>,
    connected_at: Instant,
}

/// Outcome of a broadcast.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Clients that accepted the message.
    pub delivered: usize,
    /// Clients removed because they were closed or stalled.
    pub removed: usize,
}

/// Concurrent set of stream clients.
///
/// # Thread Safety
///
/// All mutation and iteration happens under one `Mutex`. Sends never block
/// (`try_send`), so the lock is held only for a pass over the map.
pub struct ClientRegistry {
    clients: Mutex<HashMap<ClientId, Client>>,
    next_id: AtomicU64,
    buffer: usize,
    max_clients: Option<usize>,
}

impl ClientRegistry {
    /// Create an empty registry.
    ///
    /// # Arguments
    ///
    /// * `buffer` - Messages queued per client before it counts as stalled
    /// * `max_clients` - Upper bound on concurrent clients (`None` = unlimited)
    #[must_use]
    pub fn new(buffer: usize, max_clients: Option<usize>) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
            max_clients,
        }
    }

    /// Register a new client.
    ///
    /// `initial` is evaluated under the registry lock and queued before the
    /// client becomes visible to broadcasts, so it is always the first
    /// message the client sees.
    ///
    /// # Errors
    ///
    /// Returns [`LiveReloadError::TooManyClients`] when the limit is reached.
    ///
    /// # Panics
    ///
    /// Panics if the internal `Mutex` is poisoned.
    pub fn add<F>(self: &Arc<Self>, initial: F) -> Result<ClientStream, LiveReloadError>
    where
        F: FnOnce() -> ServerMessage,
    {
        let mut clients = self.clients.lock().unwrap();

        if let Some(limit) = self.max_clients
            && clients.len() >= limit
        {
            return Err(LiveReloadError::TooManyClients { limit });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.buffer);

        // Fresh channel with capacity >= 1 and a live receiver: cannot fail.
        let _ = sender.try_send(initial());

        clients.insert(
            id,
            Client {
                sender,
                connected_at: Instant::now(),
            },
        );
        tracing::debug!(client = id, clients = clients.len(), "Client registered");

        Ok(ClientStream {
            id,
            receiver,
            registry: Arc::downgrade(self),
        })
    }

    /// Remove a client. Removing an unknown client is a no-op.
    ///
    /// # Panics
    ///
    /// Panics if the internal `Mutex` is poisoned.
    pub fn remove(&self, id: ClientId) -> bool {
        let removed = self.clients.lock().unwrap().remove(&id);
        if let Some(client) = &removed {
            tracing::debug!(
                client = id,
                connected_secs = client.connected_at.elapsed().as_secs(),
                "Client removed"
            );
        }
        removed.is_some()
    }

    /// Send a message to every registered client.
    ///
    /// Clients whose channel is closed or full are removed; a failure on one
    /// client never prevents delivery to the others.
    ///
    /// # Panics
    ///
    /// Panics if the internal `Mutex` is poisoned.
    pub fn broadcast(&self, message: &ServerMessage) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut clients = self.clients.lock().unwrap();

        clients.retain(|id, client| match client.sender.try_send(message.clone()) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(client = id, "Client disconnected");
                report.removed += 1;
                false
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    client = id,
                    buffer = self.buffer,
                    "Evicting stalled live reload client"
                );
                report.removed += 1;
                false
            }
        });

        report
    }

    /// Number of registered clients.
    ///
    /// # Panics
    ///
    /// Panics if the internal `Mutex` is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    /// Whether no client is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Age of the oldest registered connection.
    ///
    /// # Panics
    ///
    /// Panics if the internal `Mutex` is poisoned.
    #[must_use]
    pub fn oldest_connection(&self) -> Option<Duration> {
        self.clients
            .lock()
            .unwrap()
            .values()
            .map(|c| c.connected_at.elapsed())
            .max()
    }

    /// Drop every client so open streams end.
    ///
    /// Only used on shutdown; returns the number of clients dropped.
    ///
    /// # Panics
    ///
    /// Panics if the internal `Mutex` is poisoned.
    pub fn disconnect_all(&self) -> usize {
        let mut clients = self.clients.lock().unwrap();
        let count = clients.len();
        clients.clear();
        count
    }
}

/// Message stream of one registered client.
///
/// Ends when the registry drops the client. Dropping the stream unregisters
/// the client.
pub struct ClientStream {
    id: ClientId,
    receiver: mpsc::Receiver<ServerMessage>,
    registry: Weak<ClientRegistry>,
}

impl ClientStream {
    /// Registry identifier of this client.
    #[must_use]
    pub fn id(&self) -> ClientId {
        self.id
    }
}

impl Stream for ClientStream {
    type Item = ServerMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for ClientStream {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live_reload::VersionState;
    use futures::StreamExt;
    use pretty_assertions::assert_eq;

    fn reload(state: &VersionState) -> ServerMessage {
        ServerMessage::reload(state.current())
    }

    #[tokio::test]
    async fn test_add_queues_initial_message_first() {
        let registry = Arc::new(ClientRegistry::new(4, None));
        let state = VersionState::new();

        let mut stream = registry.add(|| reload(&state)).unwrap();
        registry.broadcast(&ServerMessage::ping("p"));

        assert_eq!(stream.next().await, Some(reload(&state)));
        assert_eq!(stream.next().await, Some(ServerMessage::ping("p")));
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_client() {
        let registry = Arc::new(ClientRegistry::new(4, None));
        let state = VersionState::new();
        let mut first = registry.add(|| reload(&state)).unwrap();
        let mut second = registry.add(|| reload(&state)).unwrap();

        let next = ServerMessage::reload(state.regenerate());
        let report = registry.broadcast(&next);

        assert_eq!(
            report,
            BroadcastReport {
                delivered: 2,
                removed: 0
            }
        );
        for stream in [&mut first, &mut second] {
            stream.next().await;
            assert_eq!(stream.next().await, Some(next.clone()));
        }
    }

    #[test]
    fn test_dropping_stream_unregisters() {
        let registry = Arc::new(ClientRegistry::new(4, None));
        let stream = registry.add(|| ServerMessage::ping("x")).unwrap();
        assert_eq!(registry.len(), 1);

        drop(stream);

        assert!(registry.is_empty());
    }

    #[test]
    fn test_closed_transport_removed_on_broadcast() {
        let registry = Arc::new(ClientRegistry::new(4, None));
        let _open = registry.add(|| ServerMessage::ping("x")).unwrap();
        let mut closed = registry.add(|| ServerMessage::ping("x")).unwrap();

        // Transport gone without the stream being dropped yet.
        closed.receiver.close();
        assert_eq!(registry.len(), 2);

        let report = registry.broadcast(&ServerMessage::ping("y"));

        assert_eq!(report.delivered, 1);
        assert_eq!(report.removed, 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_stalled_client_evicted() {
        let registry = Arc::new(ClientRegistry::new(2, None));
        let _stalled = registry.add(|| ServerMessage::ping("0")).unwrap();

        // Initial message + one more fill the buffer.
        assert_eq!(registry.broadcast(&ServerMessage::ping("1")).delivered, 1);
        let report = registry.broadcast(&ServerMessage::ping("2"));

        assert_eq!(report.removed, 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = Arc::new(ClientRegistry::new(4, None));
        let stream = registry.add(|| ServerMessage::ping("x")).unwrap();
        let id = stream.id();

        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        drop(stream);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_max_clients_enforced() {
        let registry = Arc::new(ClientRegistry::new(4, Some(1)));
        let first = registry.add(|| ServerMessage::ping("x")).unwrap();

        let err = registry.add(|| ServerMessage::ping("x")).err();
        assert!(matches!(
            err,
            Some(LiveReloadError::TooManyClients { limit: 1 })
        ));

        drop(first);
        assert!(registry.add(|| ServerMessage::ping("x")).is_ok());
    }

    #[tokio::test]
    async fn test_disconnect_all_ends_streams() {
        let registry = Arc::new(ClientRegistry::new(4, None));
        let mut stream = registry.add(|| ServerMessage::ping("x")).unwrap();

        assert_eq!(registry.disconnect_all(), 1);

        assert_eq!(stream.next().await, Some(ServerMessage::ping("x")));
        assert_eq!(stream.next().await, None);
    }

    #[test]
    fn test_oldest_connection() {
        let registry = Arc::new(ClientRegistry::new(4, None));
        assert!(registry.oldest_connection().is_none());

        let _stream = registry.add(|| ServerMessage::ping("x")).unwrap();
        assert!(registry.oldest_connection().is_some());
    }

    #[test]
    fn test_broadcast_on_empty_registry() {
        let registry = ClientRegistry::new(4, None);
        assert_eq!(
            registry.broadcast(&ServerMessage::ping("x")),
            BroadcastReport::default()
        );
    }

    #[test]
    fn test_concurrent_add_and_broadcast() {
        let registry = Arc::new(ClientRegistry::new(64, None));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let stream = registry.add(|| ServerMessage::ping("x")).unwrap();
                        if i % 2 == 0 {
                            registry.broadcast(&ServerMessage::ping("y"));
                        }
                        drop(stream);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(registry.is_empty());
    }
}
