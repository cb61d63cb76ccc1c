//! Standalone relay server: a circuit-relay-v2 server plus the rendezvous
//! directory, run as its own process rather than colocated with an agent
//! node (supplemented feature — see SPEC_FULL.md §10 "operators run a small
//! number of public relays").
//!
//! Configuration is two environment variables, matching `NetworkConfig`'s
//! `relay_addr`/`relay_private_key_path` fields:
//! - `RELAY_ADDR`: multiaddr to listen on, default `/ip4/0.0.0.0/tcp/4001`.
//! - `RELAY_PRIVATE_KEY`: path to a protobuf-encoded ed25519 keypair,
//!   generated and persisted on first run if the file doesn't exist.

use std::path::PathBuf;

use futures::StreamExt;
use libp2p::core::transport::OrTransport;
use libp2p::swarm::SwarmEvent;
use libp2p::websocket::WsConfig;
use libp2p::{core::upgrade, dns, identify, noise, relay, tcp, yamux, Multiaddr, Swarm, Transport};
use libp2p_identity::Keypair;
use libp2p_stream as stream;

use clipmesh_net::behaviour::{RelayServerBehaviour, RelayServerBehaviourEvent};
use clipmesh_net::rendezvous::RendezvousServer;

const DEFAULT_LISTEN_ADDR: &str = "/ip4/0.0.0.0/tcp/4001";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let keypair = load_or_generate_keypair(std::env::var("RELAY_PRIVATE_KEY").ok().map(PathBuf::from))?;
    let local_peer_id = keypair.public().to_peer_id();
    tracing::info!(%local_peer_id, "starting relay");

    let listen_addr: Multiaddr = std::env::var("RELAY_ADDR")
        .unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string())
        .parse()?;

    let tcp_transport = tcp::tokio::Transport::new(tcp::Config::default().nodelay(true));
    let ws_transport = WsConfig::new(tcp::tokio::Transport::new(tcp::Config::default()));
    let base_transport = OrTransport::new(ws_transport, tcp_transport).map(|either, _| either.into_inner());
    let dns_transport = dns::tokio::Transport::system(base_transport)?;

    let noise_config = noise::Config::new(&keypair)?;
    let transport = dns_transport
        .upgrade(upgrade::Version::V1)
        .authenticate(noise_config)
        .multiplex(yamux::Config::default())
        .boxed();

    let behaviour = RelayServerBehaviour {
        relay: relay::Behaviour::new(local_peer_id, relay::Config::default()),
        stream: stream::Behaviour::new(),
        identify: identify::Behaviour::new(identify::Config::new(
            "/clipmesh-relay/1.0.0".to_string(),
            keypair.public(),
        )),
    };

    let mut swarm = Swarm::new(
        transport,
        behaviour,
        local_peer_id,
        libp2p::swarm::Config::with_tokio_executor(),
    );
    swarm.listen_on(listen_addr)?;

    let mut control = swarm.behaviour().stream.new_control();
    let rendezvous = RendezvousServer::new();
    rendezvous.spawn(&mut control).await?;

    loop {
        match swarm.select_next_some().await {
            SwarmEvent::NewListenAddr { address, .. } => tracing::info!(%address, "listening"),
            SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                tracing::debug!(%peer_id, "connection established")
            }
            SwarmEvent::ConnectionClosed { peer_id, .. } => tracing::debug!(%peer_id, "connection closed"),
            SwarmEvent::Behaviour(RelayServerBehaviourEvent::Relay(event)) => {
                tracing::debug!(?event, "relay event")
            }
            _ => {}
        }
    }
}

fn load_or_generate_keypair(path: Option<PathBuf>) -> anyhow::Result<Keypair> {
    let Some(path) = path else {
        tracing::warn!("RELAY_PRIVATE_KEY not set, generating an ephemeral identity");
        return Ok(Keypair::generate_ed25519());
    };

    if let Ok(bytes) = std::fs::read(&path) {
        return Ok(Keypair::from_protobuf_encoding(&bytes)?);
    }

    let keypair = Keypair::generate_ed25519();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, keypair.to_protobuf_encoding()?)?;
    Ok(keypair)
}
