use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, warn};
use uuid::Uuid;
use zonelink_core::ServerEvent;

/// Frames a new client receives before any live event
pub const REPLAY_FRAMES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn new() -> Self {
        ClientId(Uuid::new_v4())
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outbound queues of all connected push-channel clients.
///
/// Sends never wait: a full queue drops the frame for that client only,
/// a closed queue removes the client.
#[derive(Clone)]
pub struct ClientRegistry {
    clients: Arc<RwLock<HashMap<ClientId, mpsc::Sender<String>>>>,
    buffer: usize,
}

impl ClientRegistry {
    pub fn new(buffer: usize) -> Self {
        ClientRegistry {
            clients: Arc::new(RwLock::new(HashMap::new())),
            buffer: buffer.max(1),
        }
    }

    /// A fresh, not yet registered, outbound queue.
    ///
    /// The queue holds the replay on top of `buffer` live frames.
    pub fn channel(&self) -> (ClientId, mpsc::Sender<String>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(self.buffer + REPLAY_FRAMES);
        (ClientId::new(), tx, rx)
    }

    pub fn register(&self, id: ClientId, sender: mpsc::Sender<String>) {
        self.clients.write().insert(id, sender);
    }

    pub fn unregister(&self, id: ClientId) -> bool {
        self.clients.write().remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sends one event to a single registered client
    pub fn send_to(&self, id: ClientId, event: &ServerEvent) -> bool {
        let text = match encode(event) {
            Some(text) => text,
            None => return false,
        };
        let sender = match self.clients.read().get(&id) {
            Some(sender) => sender.clone(),
            None => {
                debug!(client = %id, "Client is gone, dropping {}", event.name());
                return false;
            }
        };
        if deliver(id, &sender, text) {
            true
        } else {
            self.prune_closed(&[id]);
            false
        }
    }

    /// Fans an event out to every client.
    ///
    /// Returns the number of delivery attempts, one per registered client.
    pub fn broadcast(&self, event: &ServerEvent) -> usize {
        let text = match encode(event) {
            Some(text) => text,
            None => return 0,
        };

        let targets: Vec<(ClientId, mpsc::Sender<String>)> = self
            .clients
            .read()
            .iter()
            .map(|(id, sender)| (*id, sender.clone()))
            .collect();

        let mut closed = Vec::new();
        for (id, sender) in &targets {
            if !deliver(*id, sender, text.clone()) {
                closed.push(*id);
            }
        }
        self.prune_closed(&closed);
        targets.len()
    }

    fn prune_closed(&self, ids: &[ClientId]) {
        let mut clients = self.clients.write();
        for id in ids {
            let is_closed = clients.get(id).map_or(false, |sender| sender.is_closed());
            if is_closed {
                clients.remove(id);
                debug!(client = %id, "Removed closed client");
            }
        }
    }
}

/// False if the client's queue is closed
fn deliver(id: ClientId, sender: &mpsc::Sender<String>, text: String) -> bool {
    match sender.try_send(text) {
        Ok(_) => true,
        Err(TrySendError::Full(_)) => {
            warn!(client = %id, "Client queue is full, dropping frame");
            true
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

fn encode(event: &ServerEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(text) => Some(text),
        Err(e) => {
            error!("Failed encoding {}: {}", event.name(), e);
            None
        }
    }
}
