//! Snapshot fan-out to connected dashboard clients.
//!
//! Each client owns a single-slot `watch` channel: publishing overwrites the
//! slot, so a slow client skips straight to the newest snapshot instead of
//! building a backlog.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use garden_common::{ClientSnapshot, DeviceIndex};
use thiserror::Error;
use tokio::sync::watch;
use tracing::warn;

pub type ClientId = u64;

#[derive(Clone, Default)]
pub struct Broadcaster {
    inner: Arc<Registry>,
}

#[derive(Default)]
struct Registry {
    clients: Mutex<HashMap<ClientId, watch::Sender<Arc<str>>>>,
    next_id: AtomicU64,
}

/// A connected client. Dropping it removes the client from the broadcast set.
pub struct Subscription {
    id: ClientId,
    rx: watch::Receiver<Arc<str>>,
    broadcaster: Broadcaster,
}

impl Subscription {
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Waits for the next snapshot. The first call returns the snapshot the
    /// client was registered with.
    pub async fn next(&mut self) -> Option<Arc<str>> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.broadcaster.disconnect(self.id);
    }
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, snapshot: &ClientSnapshot) -> Subscription {
        let (tx, mut rx) = watch::channel(serialize(snapshot));
        rx.mark_changed();

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.clients().insert(id, tx);

        Subscription {
            id,
            rx,
            broadcaster: self.clone(),
        }
    }

    /// Sends `snapshot` to every client, serializing it once. Returns how many
    /// clients received it.
    pub fn publish(&self, snapshot: &ClientSnapshot) -> usize {
        let payload = serialize(snapshot);
        let mut clients = self.clients();
        clients.retain(|_, tx| tx.send(payload.clone()).is_ok());
        clients.len()
    }

    pub fn client_count(&self) -> usize {
        self.clients().len()
    }

    fn disconnect(&self, id: ClientId) {
        self.clients().remove(&id);
    }

    fn clients(&self) -> std::sync::MutexGuard<'_, HashMap<ClientId, watch::Sender<Arc<str>>>> {
        self.inner
            .clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn serialize(snapshot: &ClientSnapshot) -> Arc<str> {
    match snapshot.to_json() {
        Ok(json) => json.into(),
        Err(err) => {
            warn!("snapshot serialization failed: {err}");
            Arc::from("{}")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientMessageError {
    #[error("not a device index: {0:?}")]
    Malformed(String),
    #[error("device index {index} out of range (have {count} devices)")]
    OutOfRange { index: i64, count: usize },
}

/// Parses an inbound client message: a single device index as text.
pub fn parse_toggle(message: &str, device_count: usize) -> Result<DeviceIndex, ClientMessageError> {
    let trimmed = message.trim();
    let index = trimmed
        .parse::<i64>()
        .map_err(|_| ClientMessageError::Malformed(trimmed.chars().take(32).collect()))?;

    usize::try_from(index)
        .ok()
        .filter(|index| *index < device_count)
        .ok_or(ClientMessageError::OutOfRange {
            index,
            count: device_count,
        })
}
