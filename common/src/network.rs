//! Framed TCP transport between the console and an executor, built on message-io
//!
//! Either side talks to exactly one peer at a time. The console connects, the executor listens
//! and only lets a new peer take over once the current one has gone quiet.

use crate::protocol::Packet;
use anyhow::{bail, Context};
use message_io::network::{Endpoint, NetEvent, SendStatus, ToRemoteAddr, Transport};
use message_io::node::{NodeEvent, NodeHandler, NodeTask};
use std::fmt::{Debug, Formatter};
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, trace, warn};

/// A listener accepts a new peer in place of the current one after this much silence
pub const PEER_TIMEOUT: Duration = Duration::from_secs(10);

/// Signals for the network thread
#[derive(Debug)]
pub enum NetSignal {
    /// Write a packet to the current peer
    Send(Packet),
}

pub type NetHandler = NodeHandler<NetSignal>;

/// Callbacks run on the network thread
pub trait LinkHandler: Sized + Debug {
    fn on_packet(&mut self, net: &NetHandler, peer: &Peer, packet: Packet) -> anyhow::Result<()>;

    fn on_connected(&mut self, _net: &NetHandler, _peer: &Peer) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_connect_failed(&mut self, _endpoint: Endpoint) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_disconnected(&mut self, _endpoint: Endpoint) -> anyhow::Result<()> {
        Ok(())
    }
}

/// The other end of the link
#[derive(Debug)]
pub struct Peer {
    endpoint: Endpoint,
    last_heard: Instant,
}

impl Peer {
    fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            last_heard: Instant::now(),
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    pub fn addr(&self) -> SocketAddr {
        self.endpoint.addr()
    }

    /// Encodes and writes `packet` straight from the network thread
    #[tracing::instrument(skip(self, net))]
    pub fn send(&self, net: &NetHandler, packet: Packet) -> anyhow::Result<()> {
        let bytes: Vec<u8> = (&packet).try_into().context("Encode packet")?;

        match net.network().send(self.endpoint, &bytes) {
            SendStatus::Sent => Ok(()),
            status => bail!("Could not send to {}: {status:?}", self.endpoint),
        }
    }
}

/// Holds the current peer and publishes whether there is one
#[derive(Debug, Default)]
struct PeerSlot {
    peer: Option<Peer>,
    connected: Arc<AtomicBool>,
}

impl PeerSlot {
    fn set(&mut self, peer: Option<Peer>) {
        self.connected.store(peer.is_some(), Ordering::Release);
        self.peer = peer;
    }

    /// An accepted connection may only replace a peer that went quiet
    fn can_admit(&self) -> bool {
        self.peer
            .as_ref()
            .map_or(true, |peer| peer.last_heard.elapsed() > PEER_TIMEOUT)
    }

    fn current(&mut self, endpoint: Endpoint) -> Option<&mut Peer> {
        self.peer.as_mut().filter(|peer| peer.endpoint == endpoint)
    }
}

struct NetThread<H> {
    net: NetHandler,
    slot: PeerSlot,
    handler: H,
}

impl<H: LinkHandler> NetThread<H> {
    fn on_event(&mut self, event: NodeEvent<NetSignal>) {
        let ret = match event {
            NodeEvent::Network(event) => self.on_net_event(event),
            NodeEvent::Signal(NetSignal::Send(packet)) => self.on_send(packet),
        };

        if let Err(err) = ret {
            error!("Network error: {err:?}");
        }
    }

    fn on_net_event(&mut self, event: NetEvent) -> anyhow::Result<()> {
        match event {
            NetEvent::Accepted(endpoint, _) => {
                if !self.slot.can_admit() {
                    info!(%endpoint, "Rejecting peer, the current one is still alive");
                    self.net.network().remove(endpoint.resource_id());
                    return Ok(());
                }

                info!(%endpoint, "Accepted peer");
                self.admit(endpoint)
            }
            NetEvent::Connected(endpoint, true) => {
                info!(%endpoint, "Connected");
                self.admit(endpoint)
            }
            NetEvent::Connected(endpoint, false) => {
                warn!(%endpoint, "Could not connect");
                self.handler
                    .on_connect_failed(endpoint)
                    .context("Connect failed callback")
            }
            NetEvent::Message(endpoint, bytes) => {
                let packet = Packet::try_from(bytes).context("Decode packet")?;
                trace!(?packet, "Received");

                let Some(peer) = self.slot.current(endpoint) else {
                    bail!("Packet from {endpoint}, which is not the current peer");
                };
                peer.last_heard = Instant::now();

                self.handler
                    .on_packet(&self.net, peer, packet)
                    .context("Packet callback")
            }
            NetEvent::Disconnected(endpoint) => {
                if self.slot.current(endpoint).is_none() {
                    trace!(%endpoint, "Stale peer disconnected");
                    return Ok(());
                }

                info!(%endpoint, "Peer disconnected");
                self.slot.set(None);
                self.handler
                    .on_disconnected(endpoint)
                    .context("Disconnected callback")
            }
        }
    }

    fn admit(&mut self, endpoint: Endpoint) -> anyhow::Result<()> {
        let peer = Peer::new(endpoint);
        self.handler
            .on_connected(&self.net, &peer)
            .context("Connected callback")?;
        self.slot.set(Some(peer));

        Ok(())
    }

    fn on_send(&mut self, packet: Packet) -> anyhow::Result<()> {
        match &self.slot.peer {
            Some(peer) => peer.send(&self.net, packet),
            None => {
                trace!(?packet, "No peer, packet dropped");
                Ok(())
            }
        }
    }
}

/// Owns the message-io node, the network thread stops when this is dropped
pub struct Network {
    net: NetHandler,
    task: Option<NodeTask>,
    connected: Arc<AtomicBool>,
}

impl Debug for Network {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl Network {
    #[tracing::instrument]
    pub fn create<H: LinkHandler + Send + 'static>(handler: H) -> Self {
        let (net, listener) = message_io::node::split::<NetSignal>();

        let slot = PeerSlot::default();
        let connected = slot.connected.clone();

        let mut thread = NetThread {
            net: net.clone(),
            slot,
            handler,
        };
        let task = listener.for_each_async(move |event| thread.on_event(event));

        Network {
            net,
            task: Some(task),
            connected,
        }
    }

    /// Listens for a peer, returns the address that was actually bound
    #[tracing::instrument]
    pub fn listen(&self, addrs: impl ToSocketAddrs + Debug) -> anyhow::Result<SocketAddr> {
        let (_, bound) = self
            .net
            .network()
            .listen(Transport::FramedTcp, addrs)
            .context("Bind")?;
        info!(%bound, "Listening");

        Ok(bound)
    }

    /// Starts connecting, the outcome arrives through the handler
    #[tracing::instrument]
    pub fn connect(&self, addrs: impl ToRemoteAddr + Debug) -> anyhow::Result<()> {
        self.net
            .network()
            .connect(Transport::FramedTcp, addrs)
            .context("Connect")?;

        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Queues a packet for the current peer
    #[tracing::instrument(skip(self))]
    pub fn send_packet(&self, packet: Packet) -> anyhow::Result<()> {
        if !self.is_connected() {
            bail!("No peer connected");
        }

        self.net.signals().send(NetSignal::Send(packet));

        Ok(())
    }

    /// Stops the network thread, also done on drop
    pub fn stop(&mut self) {
        self.net.stop();
        if let Some(mut task) = self.task.take() {
            task.wait();
            info!("Network stopped");
        }
    }
}

impl Drop for Network {
    fn drop(&mut self) {
        self.stop();
    }
}
