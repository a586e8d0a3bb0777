//! Command and service channels carried over the network to a remote executor

use crate::channel::{CommandChannel, GoalBook, GoalHandle, ServiceChannel};
use anyhow::Context;
use common::network::{LinkHandler, NetHandler, Network, Peer};
use common::protocol::Packet;
use common::service::{Service, ServiceRequest, ServiceResponse};
use common::status::StatusEvent;
use common::types::{ChannelError, ChannelKind, Goal, GoalState};
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use fxhash::FxHashMap as HashMap;
use message_io::network::Endpoint;
use std::fmt::{Debug, Formatter};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, trace, warn};

/// Things the link reports outside of the channel traits
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Connected(SocketAddr),
    Disconnected,
    Status(StatusEvent),
}

type Reply = Result<ServiceResponse, String>;

#[derive(Debug)]
struct LinkState {
    teleop: Arc<GoalBook>,
    autonomy: Arc<GoalBook>,
    pending: Mutex<HashMap<u64, Sender<Reply>>>,
    next_call: AtomicU64,
}

impl LinkState {
    fn book(&self, kind: ChannelKind) -> &Arc<GoalBook> {
        match kind {
            ChannelKind::Teleop => &self.teleop,
            ChannelKind::Autonomy => &self.autonomy,
        }
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<u64, Sender<Reply>>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Everything in flight is lost with the connection
    fn abandon(&self) {
        let teleop = self.teleop.finish_all(GoalState::Aborted);
        let autonomy = self.autonomy.finish_all(GoalState::Aborted);
        let calls = {
            let mut pending = self.pending();
            let calls = pending.len();
            pending.clear();
            calls
        };

        if teleop + autonomy + calls > 0 {
            warn!(teleop, autonomy, calls, "Connection lost with work in flight");
        }
    }
}

/// Connection to a remote executor
pub struct Link {
    network: Arc<Network>,
    state: Arc<LinkState>,
    service_timeout: Duration,
}

impl Link {
    /// Starts connecting to `addrs`, the channels report `Disconnected` until that succeeds
    pub fn connect(
        addrs: &str,
        service_timeout: Duration,
        on_event: impl FnMut(LinkEvent) + Send + 'static,
    ) -> anyhow::Result<Self> {
        let state = Arc::new(LinkState {
            teleop: Arc::new(GoalBook::new(ChannelKind::Teleop)),
            autonomy: Arc::new(GoalBook::new(ChannelKind::Autonomy)),
            pending: Mutex::default(),
            next_call: AtomicU64::new(1),
        });

        let network = Network::create(ExecutorEvents {
            state: state.clone(),
            on_event: Box::new(on_event),
        });
        network
            .connect(addrs)
            .context("Connect to executor")?;

        Ok(Self {
            network: Arc::new(network),
            state,
            service_timeout,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.network.is_connected()
    }

    pub fn teleop(&self) -> Arc<LinkChannel> {
        self.channel(ChannelKind::Teleop)
    }

    pub fn autonomy(&self) -> Arc<LinkChannel> {
        self.channel(ChannelKind::Autonomy)
    }

    fn channel(&self, kind: ChannelKind) -> Arc<LinkChannel> {
        Arc::new(LinkChannel {
            book: self.state.book(kind).clone(),
            network: self.network.clone(),
        })
    }

    pub fn services(&self) -> Arc<LinkServices> {
        Arc::new(LinkServices {
            state: self.state.clone(),
            network: self.network.clone(),
            timeout: self.service_timeout,
        })
    }
}

fn send(network: &Network, packet: Packet) -> Result<(), ChannelError> {
    network.send_packet(packet).map_err(|err| {
        trace!("Send failed: {err:?}");
        ChannelError::Disconnected
    })
}

pub struct LinkChannel {
    book: Arc<GoalBook>,
    network: Arc<Network>,
}

impl CommandChannel for LinkChannel {
    fn kind(&self) -> ChannelKind {
        self.book.kind()
    }

    fn submit(&self, goal: Goal) -> Result<GoalHandle, ChannelError> {
        let handle = self.book.open(goal);
        let packet = Packet::SubmitGoal {
            channel: self.book.kind(),
            id: handle.id(),
            goal,
        };

        if let Err(err) = send(&self.network, packet) {
            self.book.update(handle.id(), GoalState::Aborted);
            return Err(err);
        }

        Ok(handle)
    }

    fn cancel_all(&self) -> Result<(), ChannelError> {
        send(
            &self.network,
            Packet::CancelAll {
                channel: self.book.kind(),
            },
        )
    }

    fn is_idle(&self) -> bool {
        self.book.is_idle()
    }
}

pub struct LinkServices {
    state: Arc<LinkState>,
    network: Arc<Network>,
    timeout: Duration,
}

impl ServiceChannel for LinkServices {
    fn call(
        &self,
        service: Service,
        request: ServiceRequest,
    ) -> Result<ServiceResponse, ChannelError> {
        let id = self.state.next_call.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = channel::bounded(1);
        self.state.pending().insert(id, tx);

        let packet = Packet::ServiceCall {
            id,
            service: service.name().to_owned(),
            request,
        };
        if let Err(err) = send(&self.network, packet) {
            self.state.pending().remove(&id);
            return Err(err);
        }

        match rx.recv_timeout(self.timeout) {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(message)) => Err(ChannelError::Rejected(message)),
            Err(RecvTimeoutError::Timeout) => {
                self.state.pending().remove(&id);
                Err(ChannelError::Timeout(service.name()))
            }
            Err(RecvTimeoutError::Disconnected) => Err(ChannelError::Disconnected),
        }
    }
}

struct ExecutorEvents {
    state: Arc<LinkState>,
    on_event: Box<dyn FnMut(LinkEvent) + Send>,
}

impl Debug for ExecutorEvents {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorEvents")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl LinkHandler for ExecutorEvents {
    #[tracing::instrument(skip(self, net, peer))]
    fn on_packet(&mut self, net: &NetHandler, peer: &Peer, packet: Packet) -> anyhow::Result<()> {
        match packet {
            Packet::GoalState { channel, id, state } => {
                self.state.book(channel).update(id, state);
            }
            Packet::ServiceReply { id, response } => match self.state.pending().remove(&id) {
                Some(reply) => {
                    let _ = reply.try_send(response);
                }
                None => debug!(id, "Late service reply"),
            },
            Packet::Status(event) => (self.on_event)(LinkEvent::Status(event)),
            Packet::Ping(ping) => {
                let response = Packet::Pong(ping, SystemTime::now());
                peer.send(net, response).context("Send pong")?;
            }
            Packet::Pong(sent, _) => {
                if let Ok(latency) = sent.elapsed() {
                    debug!(?latency, "Pong");
                }
            }
            Packet::SubmitGoal { .. } | Packet::CancelAll { .. } | Packet::ServiceCall { .. } => {
                warn!("Executor sent a console-bound request");
            }
        }

        Ok(())
    }

    fn on_connected(&mut self, _net: &NetHandler, peer: &Peer) -> anyhow::Result<()> {
        info!("Executor link up");
        (self.on_event)(LinkEvent::Connected(peer.addr()));

        Ok(())
    }

    fn on_connect_failed(&mut self, endpoint: Endpoint) -> anyhow::Result<()> {
        warn!("Executor at {endpoint} is unreachable");
        (self.on_event)(LinkEvent::Disconnected);

        Ok(())
    }

    fn on_disconnected(&mut self, _endpoint: Endpoint) -> anyhow::Result<()> {
        self.state.abandon();
        (self.on_event)(LinkEvent::Disconnected);

        Ok(())
    }
}
