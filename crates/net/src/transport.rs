//! 4.5 Messaging transport — a single libp2p node per process, registering
//! the clip/trust/history stream protocols and tracking peer/relay
//! connection lifecycle (spec §4.5).
//!
//! The swarm itself runs on a dedicated background task; every other method
//! on `MessagingTransport` talks to it over a command channel, mirroring the
//! teacher's `NetworkManager` (command-in / event-out over an actor task)
//! rather than sharing the `Swarm` behind a lock.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use libp2p::core::transport::OrTransport;
use libp2p::swarm::SwarmEvent;
use libp2p::websocket::WsConfig;
use libp2p::{core::upgrade, dns, identify, noise, relay, tcp, yamux, Multiaddr, PeerId, StreamProtocol, Swarm, Transport};
use libp2p_identity::Keypair;
use libp2p_stream as stream;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex as AsyncMutex, RwLock};
use tracing::{debug, info, warn};

use crate::addressing::extract_peer_id;
use crate::behaviour::ClipmeshBehaviour;
use crate::errors::ConnectivityError;
use crate::events::{NetworkEvent, RelayStatus};
use crate::stream_io::{read_chunk_to_end, write_chunk_and_close};

pub type MessageHandler = Arc<dyn Fn(PeerId, Vec<u8>) + Send + Sync>;

/// `send`'s target, matching spec §4.5's "if `target` starts with `/`,
/// dial-protocol over that multiaddress; otherwise reuse an existing
/// connection" rule, made into a proper sum type instead of sniffing a
/// string prefix.
#[derive(Debug, Clone)]
pub enum SendTarget {
    Addr(Multiaddr),
    Peer(PeerId),
}

#[derive(Debug)]
enum Command {
    /// Dial `addr` and resolve once a connection to `peer_id` is
    /// established or the attempt fails — `peer_id` must already be known
    /// (extracted from the address) because libp2p dial completion is
    /// reported per-peer, not per-dial-call.
    DialAndWait {
        addr: Multiaddr,
        peer_id: PeerId,
        reply: oneshot::Sender<Result<(), ConnectivityError>>,
    },
    ListenOn(Multiaddr),
    MarkRelay(PeerId),
}

struct PendingDial {
    peer_id: PeerId,
    reply: oneshot::Sender<Result<(), ConnectivityError>>,
}

struct Shared {
    local_peer_id: PeerId,
    relay_peers: RwLock<HashSet<PeerId>>,
    connected_peers: RwLock<HashSet<PeerId>>,
    handlers: RwLock<HashMap<StreamProtocol, MessageHandler>>,
    events: broadcast::Sender<NetworkEvent>,
    last_self_addrs_hash: RwLock<Option<u64>>,
}

/// Single node per process (spec §4.5). Cheap to clone — every clone shares
/// the same background swarm task and handler registry.
#[derive(Clone)]
pub struct MessagingTransport {
    shared: Arc<Shared>,
    control: Arc<AsyncMutex<stream::Control>>,
    commands: mpsc::UnboundedSender<Command>,
}

impl MessagingTransport {
    /// Builds the swarm (noise + yamux muxing over TCP and WebSocket, plus
    /// a circuit-relay-v2 client) and spawns its event loop. Does not start
    /// listening or accepting protocol streams yet — call `start`.
    pub fn new(keypair: Keypair) -> anyhow::Result<Self> {
        let local_peer_id = PeerId::from(keypair.public());

        let tcp_transport = tcp::tokio::Transport::new(tcp::Config::default().nodelay(true));
        let ws_transport = WsConfig::new(tcp::tokio::Transport::new(tcp::Config::default()));
        let base_transport = OrTransport::new(ws_transport, tcp_transport)
            .map(|either, _| either.into_inner());
        let dns_transport = dns::tokio::Transport::system(base_transport)?;

        let noise_config = noise::Config::new(&keypair)?;
        let transport = dns_transport
            .upgrade(upgrade::Version::V1)
            .authenticate(noise_config)
            .multiplex(yamux::Config::default())
            .boxed();

        let (relay_transport, relay_client) = relay::client::new(local_peer_id);
        let transport = OrTransport::new(relay_transport, transport)
            .map(|either, _| either.into_inner())
            .boxed();

        let behaviour = ClipmeshBehaviour {
            stream: stream::Behaviour::new(),
            relay_client,
            identify: identify::Behaviour::new(identify::Config::new(
                "/clipmesh/1.0.0".to_string(),
                keypair.public(),
            )),
        };

        let swarm = Swarm::new(
            transport,
            behaviour,
            local_peer_id,
            libp2p::swarm::Config::with_tokio_executor()
                .with_idle_connection_timeout(Duration::from_secs(60)),
        );

        let control = swarm.behaviour().stream.new_control();
        let (events_tx, _) = broadcast::channel(256);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            local_peer_id,
            relay_peers: RwLock::new(HashSet::new()),
            connected_peers: RwLock::new(HashSet::new()),
            handlers: RwLock::new(HashMap::new()),
            events: events_tx,
            last_self_addrs_hash: RwLock::new(None),
        });

        tokio::spawn(run_swarm(swarm, Arc::clone(&shared), commands_rx));

        Ok(Self {
            shared,
            control: Arc::new(AsyncMutex::new(control)),
            commands: commands_tx,
        })
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.shared.local_peer_id
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<NetworkEvent> {
        self.shared.events.subscribe()
    }

    pub fn listen_on(&self, addr: Multiaddr) {
        let _ = self.commands.send(Command::ListenOn(addr));
    }

    pub fn mark_relay(&self, peer_id: PeerId) {
        let _ = self.commands.send(Command::MarkRelay(peer_id));
    }

    pub async fn is_connected(&self, peer_id: &PeerId) -> bool {
        self.shared.connected_peers.read().await.contains(peer_id)
    }

    /// Currently connected non-relay peers (spec §4.6 "broadcast iterates
    /// the currently connected non-relay peers").
    pub async fn connected_peers(&self) -> Vec<PeerId> {
        let connected = self.shared.connected_peers.read().await;
        let relays = self.shared.relay_peers.read().await;
        connected.iter().filter(|p| !relays.contains(p)).copied().collect()
    }

    /// Begins accepting inbound streams for `protocol`, dispatching each
    /// complete chunk to `cb` (spec §4.5 `onMessage`). Must be called
    /// before any peer can reach this protocol; safe to call once per
    /// protocol.
    pub async fn on_message(&self, protocol: StreamProtocol, cb: MessageHandler) -> anyhow::Result<()> {
        self.shared
            .handlers
            .write()
            .await
            .insert(protocol.clone(), Arc::clone(&cb));

        let mut incoming = {
            let mut control = self.control.lock().await;
            control
                .accept(protocol.clone())
                .map_err(|e| anyhow::anyhow!("protocol {protocol} already has a handler: {e}"))?
        };
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            while let Some((peer, io)) = incoming.next().await {
                let shared = Arc::clone(&shared);
                let protocol = protocol.clone();
                tokio::spawn(async move {
                    let mut io = io;
                    match read_chunk_to_end(&mut io).await {
                        Ok(bytes) if !bytes.is_empty() => {
                            if let Some(handler) = shared.handlers.read().await.get(&protocol) {
                                handler(peer, bytes);
                            }
                        }
                        Ok(_) => debug!(%peer, %protocol, "inbound stream closed with no data"),
                        Err(err) => warn!(%peer, %protocol, %err, "inbound stream read failed"),
                    }
                });
            }
        });
        Ok(())
    }

    /// Dials `addr` (which must carry `peer_id`) and waits for the
    /// connection or the configured timeout, whichever comes first.
    pub async fn dial(
        &self,
        addr: Multiaddr,
        peer_id: PeerId,
        timeout: Duration,
    ) -> Result<(), ConnectivityError> {
        if self.is_connected(&peer_id).await {
            return Ok(());
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::DialAndWait {
                addr,
                peer_id,
                reply: reply_tx,
            })
            .map_err(|_| ConnectivityError::MessagingNotStarted)?;

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ConnectivityError::DialFailed),
            Err(_) => Err(ConnectivityError::DialTimeout(timeout)),
        }
    }

    /// Opens a raw duplex stream to `peer_id` without the chunk-and-close
    /// framing `send` applies, for protocols that run their own message
    /// loop over one long-lived stream (rendezvous register/list, spec
    /// §4.9).
    pub async fn open_raw_stream(
        &self,
        peer_id: PeerId,
        protocol: StreamProtocol,
    ) -> Result<stream::Stream, ConnectivityError> {
        if !self.is_connected(&peer_id).await {
            return Err(ConnectivityError::PeerNotConnected);
        }
        let mut control = self.control.lock().await;
        control
            .open_stream(peer_id, protocol)
            .await
            .map_err(|_| ConnectivityError::PeerNotConnected)
    }

    /// Begins accepting inbound raw streams for `protocol`, handed back as
    /// a `(PeerId, Stream)` pair per connection rather than dispatched
    /// through the chunk-based handler registry — used by the rendezvous
    /// server, which keeps a connection open across multiple
    /// register/list exchanges instead of one chunk per stream.
    pub async fn accept_raw_stream(
        &self,
        protocol: StreamProtocol,
    ) -> anyhow::Result<stream::IncomingStreams> {
        let mut control = self.control.lock().await;
        control
            .accept(protocol.clone())
            .map_err(|e| anyhow::anyhow!("protocol {protocol} already has a handler: {e}"))
    }

    /// `send(protocol, target, bytes)` (spec §4.5): writes one chunk and
    /// closes the write half — the transport does not re-frame.
    pub async fn send(
        &self,
        protocol: StreamProtocol,
        target: SendTarget,
        bytes: &[u8],
    ) -> Result<(), ConnectivityError> {
        let peer_id = match &target {
            SendTarget::Peer(p) => *p,
            SendTarget::Addr(addr) => extract_peer_id(addr).ok_or(ConnectivityError::NoTarget)?,
        };

        if let SendTarget::Peer(_) = target {
            if !self.is_connected(&peer_id).await {
                return Err(ConnectivityError::PeerNotConnected);
            }
        }

        let mut stream = {
            let mut control = self.control.lock().await;
            control
                .open_stream(peer_id, protocol)
                .await
                .map_err(|_| ConnectivityError::PeerNotConnected)?
        };
        write_chunk_and_close(&mut stream, bytes)
            .await
            .map_err(|_| ConnectivityError::PeerNotConnected)
    }
}

/// Content hash of an address set, to suppress duplicate
/// `SelfAddressesChanged` emissions (spec §4.5).
fn addr_set_hash(addrs: &[Multiaddr]) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut sorted: Vec<String> = addrs.iter().map(|a| a.to_string()).collect();
    sorted.sort();
    let mut hasher = DefaultHasher::new();
    sorted.hash(&mut hasher);
    hasher.finish()
}

async fn run_swarm(
    mut swarm: Swarm<ClipmeshBehaviour>,
    shared: Arc<Shared>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let mut pending_dials: HashMap<PeerId, Vec<PendingDial>> = HashMap::new();

    loop {
        tokio::select! {
            event = swarm.select_next_some() => {
                handle_swarm_event(&mut swarm, &shared, &mut pending_dials, event).await;
            }
            Some(command) = commands.recv() => {
                match command {
                    Command::ListenOn(addr) => {
                        if let Err(err) = swarm.listen_on(addr.clone()) {
                            warn!(%addr, %err, "failed to listen");
                        }
                    }
                    Command::MarkRelay(peer_id) => {
                        shared.relay_peers.write().await.insert(peer_id);
                    }
                    Command::DialAndWait { addr, peer_id, reply } => {
                        match swarm.dial(addr.clone()) {
                            Ok(()) => {
                                pending_dials.entry(peer_id).or_default().push(PendingDial { peer_id, reply });
                            }
                            Err(err) => {
                                warn!(%addr, %err, "dial failed immediately");
                                let _ = reply.send(Err(ConnectivityError::DialFailed));
                            }
                        }
                    }
                }
            }
        }
    }
}

async fn handle_swarm_event(
    swarm: &mut Swarm<ClipmeshBehaviour>,
    shared: &Arc<Shared>,
    pending_dials: &mut HashMap<PeerId, Vec<PendingDial>>,
    event: SwarmEvent<crate::behaviour::ClipmeshBehaviourEvent>,
) {
    match event {
        SwarmEvent::ConnectionEstablished { peer_id, .. } => {
            let is_relay = shared.relay_peers.read().await.contains(&peer_id);
            shared.connected_peers.write().await.insert(peer_id);
            if let Some(waiters) = pending_dials.remove(&peer_id) {
                for waiter in waiters {
                    let _ = waiter.reply.send(Ok(()));
                }
            }
            if !is_relay {
                let _ = shared.events.send(NetworkEvent::PeerConnected {
                    device_id: peer_id.into(),
                    via_relay: false,
                });
            }
            info!(%peer_id, is_relay, "connection established");
        }
        SwarmEvent::ConnectionClosed { peer_id, .. } => {
            shared.connected_peers.write().await.remove(&peer_id);
            let is_relay = shared.relay_peers.read().await.contains(&peer_id);
            if !is_relay {
                let _ = shared.events.send(NetworkEvent::PeerDisconnected {
                    device_id: peer_id.into(),
                });
            }
        }
        SwarmEvent::OutgoingConnectionError { peer_id: Some(peer_id), error, .. } => {
            warn!(%peer_id, %error, "outgoing connection failed");
            if let Some(waiters) = pending_dials.remove(&peer_id) {
                for waiter in waiters {
                    let _ = waiter.reply.send(Err(ConnectivityError::DialFailed));
                }
            }
        }
        SwarmEvent::NewListenAddr { address, .. } => {
            info!(%address, "listening");
            emit_self_addresses(swarm, shared).await;
        }
        SwarmEvent::Behaviour(crate::behaviour::ClipmeshBehaviourEvent::RelayClient(event)) => {
            handle_relay_client_event(swarm, shared, event).await;
        }
        _ => {}
    }
}

async fn handle_relay_client_event(
    swarm: &mut Swarm<ClipmeshBehaviour>,
    shared: &Arc<Shared>,
    event: relay::client::Event,
) {
    match event {
        relay::client::Event::ReservationReqAccepted { relay_peer_id, .. } => {
            let _ = shared.events.send(NetworkEvent::RelayStatusChanged {
                relay: Multiaddr::empty(),
                status: RelayStatus::ReservationGranted,
            });
            debug!(%relay_peer_id, "relay reservation accepted");
            emit_self_addresses(swarm, shared).await;
        }
        relay::client::Event::OutboundCircuitEstablished { relay_peer_id, .. } => {
            debug!(%relay_peer_id, "outbound circuit established");
        }
        _ => {}
    }
}

async fn emit_self_addresses(swarm: &Swarm<ClipmeshBehaviour>, shared: &Arc<Shared>) {
    let addrs: Vec<Multiaddr> = swarm.listeners().cloned().collect();
    let hash = addr_set_hash(&addrs);
    let mut last = shared.last_self_addrs_hash.write().await;
    if *last == Some(hash) {
        return;
    }
    *last = Some(hash);
    let _ = shared.events.send(NetworkEvent::SelfAddressesChanged { addrs });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addr_hash_ignores_order() {
        let a: Multiaddr = "/ip4/127.0.0.1/tcp/4001".parse().unwrap();
        let b: Multiaddr = "/ip4/10.0.0.1/tcp/4001".parse().unwrap();
        assert_eq!(addr_set_hash(&[a.clone(), b.clone()]), addr_set_hash(&[b, a]));
    }
}
