//! Host events and the hub that fans them out to subscribers.
//!
//! The network layer and the simulation host publish; the lobby driver
//! subscribes for the lifetime of a session and unsubscribes on exit.

use crate::session::ClientInfo;
use log::debug;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    Connected {
        client: ClientInfo,
        reconnect: bool,
    },
    Disconnected {
        client_id: u32,
    },
    Request {
        client_id: u32,
        request_id: u32,
        message_type: String,
        payload: String,
    },
    /// Terrain for the current system finished generating.
    SystemReady,
    /// The simulation finished loading.
    SimReady,
}

/// Handle returned by `HostEvents::subscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

#[derive(Debug, Default)]
pub struct HostEvents {
    next_id: u64,
    subscribers: Vec<(Subscription, mpsc::UnboundedSender<HostEvent>)>,
}

impl HostEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self) -> (Subscription, mpsc::UnboundedReceiver<HostEvent>) {
        self.subscribers.retain(|(_, tx)| !tx.is_closed());

        let handle = Subscription(self.next_id);
        self.next_id += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push((handle, tx));
        debug!("Host event subscriber {:?} added", handle);
        (handle, rx)
    }

    /// Returns false if the handle was not subscribed.
    pub fn unsubscribe(&mut self, handle: Subscription) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(id, _)| *id != handle);
        before != self.subscribers.len()
    }

    /// Delivers an event to every live subscriber, returning how many got it.
    pub fn publish(&self, event: HostEvent) -> usize {
        self.subscribers
            .iter()
            .filter(|(_, tx)| tx.send(event.clone()).is_ok())
            .count()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .iter()
            .filter(|(_, tx)| !tx.is_closed())
            .count()
    }
}
