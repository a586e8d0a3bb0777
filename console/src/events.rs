//! Broadcast bus between the console's systems
//!
//! Every system owns one listener. A send goes to every listener that is still alive. A bounded
//! listener that fell `BUS_CAPACITY` events behind misses the event instead of blocking the
//! sender, an unbounded one never misses anything.

use std::sync::Arc;

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use tracing::{error, trace};

use crate::event::Event;

pub const BUS_CAPACITY: usize = 50;

/// How much a system's listener may fall behind
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Backlog {
    /// Up to `BUS_CAPACITY` events, newer ones are dropped
    #[default]
    Bounded,
    /// Everything is kept, for systems that must see every operator input
    Unbounded,
}

#[derive(Debug, Clone)]
struct Peer {
    system: &'static str,
    tx: Sender<Arc<Event>>,
}

/// Delivers `event` to every peer, returns the indices of peers whose listener is gone
fn broadcast(peers: &[Peer], event: Event) -> Vec<usize> {
    let event = Arc::new(event);
    let mut gone = Vec::new();

    for (idx, peer) in peers.iter().enumerate() {
        match peer.tx.try_send(event.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                error!(system = peer.system, "Listener is full, event dropped");
            }
            Err(TrySendError::Disconnected(_)) => gone.push(idx),
        }
    }

    gone
}

/// A system's connection to the bus
#[derive(Debug, Clone)]
pub struct EventHandle {
    peers: Vec<Peer>,
    listner: Option<Receiver<Arc<Event>>>,
}

impl EventHandle {
    /// One handle per system, in the order of `systems`
    pub fn create(systems: &[(&'static str, Backlog)]) -> Vec<EventHandle> {
        let (peers, listners): (Vec<_>, Vec<_>) = systems
            .iter()
            .map(|&(system, backlog)| {
                let (tx, rx) = match backlog {
                    Backlog::Bounded => channel::bounded(BUS_CAPACITY),
                    Backlog::Unbounded => channel::unbounded(),
                };
                (Peer { system, tx }, rx)
            })
            .unzip();

        listners
            .into_iter()
            .map(|listner| EventHandle {
                peers: peers.clone(),
                listner: Some(listner),
            })
            .collect()
    }

    /// Broadcasts and forgets systems that stopped listening
    #[tracing::instrument(skip(self))]
    pub fn send(&mut self, event: Event) {
        for idx in broadcast(&self.peers, event).into_iter().rev() {
            let peer = self.peers.remove(idx);
            trace!(system = peer.system, "Listener gone");
        }
    }

    /// Send-only handle for callbacks that only get `&self`
    pub fn sender(&self) -> EventSender {
        EventSender {
            peers: self.peers.clone(),
        }
    }

    pub fn take_listner(&mut self) -> Option<Receiver<Arc<Event>>> {
        self.listner.take()
    }
}

/// Broadcasts to the same systems as the `EventHandle` it came from
#[derive(Debug, Clone)]
pub struct EventSender {
    peers: Vec<Peer>,
}

impl EventSender {
    pub fn send(&self, event: Event) {
        broadcast(&self.peers, event);
    }
}
