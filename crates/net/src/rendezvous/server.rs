//! Rendezvous server: an in-memory, topic-keyed directory of `(peerId,
//! addrs)` records, served over a long-lived stream per connecting peer
//! (spec §4.8 "the server keeps records in memory only").

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use libp2p::PeerId;
use libp2p_stream as stream;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::protocol_ids::RENDEZVOUS_PROTOCOL;
use crate::rendezvous::{PeerRecord, RendezvousReply, RendezvousRequest};
use crate::stream_io::{read_length_prefixed, write_length_prefixed};

struct Record {
    addrs: Vec<String>,
    #[allow(dead_code)]
    last_seen: DateTime<Utc>,
}

#[derive(Default)]
pub struct RendezvousServer {
    topics: RwLock<HashMap<String, HashMap<PeerId, Record>>>,
}

impl RendezvousServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Starts accepting rendezvous connections on `control`; each
    /// connection is served on its own task, handling register/list
    /// requests in a loop until the remote closes the stream. Takes a raw
    /// `libp2p_stream::Control` rather than `MessagingTransport` so both the
    /// agent node and the standalone relay binary (which runs a different
    /// swarm behaviour) can host it.
    pub async fn spawn(self: &Arc<Self>, control: &mut stream::Control) -> anyhow::Result<tokio::task::JoinHandle<()>> {
        let mut incoming = control
            .accept(RENDEZVOUS_PROTOCOL)
            .map_err(|e| anyhow::anyhow!("rendezvous protocol already has a handler: {e}"))?;
        let this = Arc::clone(self);
        Ok(tokio::spawn(async move {
            while let Some((peer, stream)) = incoming.next().await {
                let this = Arc::clone(&this);
                tokio::spawn(async move {
                    this.serve_connection(peer, stream).await;
                });
            }
        }))
    }

    async fn serve_connection(&self, peer: PeerId, mut stream: stream::Stream) {
        loop {
            let request_bytes = match read_length_prefixed(&mut stream).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    debug!(%peer, %err, "rendezvous connection closed");
                    return;
                }
            };

            let reply = match serde_json::from_slice::<RendezvousRequest>(&request_bytes) {
                Ok(request) => self.handle_request(peer, request).await,
                Err(err) => RendezvousReply {
                    ok: false,
                    error: Some(err.to_string()),
                    ..Default::default()
                },
            };

            let reply_bytes = match serde_json::to_vec(&reply) {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(%peer, %err, "failed to encode rendezvous reply");
                    return;
                }
            };
            if let Err(err) = write_length_prefixed(&mut stream, &reply_bytes).await {
                debug!(%peer, %err, "failed to write rendezvous reply");
                return;
            }
        }
    }

    async fn handle_request(&self, peer: PeerId, request: RendezvousRequest) -> RendezvousReply {
        match request {
            RendezvousRequest::Register { topic, addrs } => {
                self.topics
                    .write()
                    .await
                    .entry(topic)
                    .or_default()
                    .insert(
                        peer,
                        Record {
                            addrs,
                            last_seen: Utc::now(),
                        },
                    );
                RendezvousReply {
                    ok: true,
                    ..Default::default()
                }
            }
            RendezvousRequest::List { topic } => {
                let topics = self.topics.read().await;
                let peers = topics
                    .get(&topic)
                    .map(|records| {
                        records
                            .iter()
                            .map(|(peer_id, record)| PeerRecord {
                                peer_id: peer_id.to_string(),
                                addrs: record.addrs.clone(),
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                RendezvousReply {
                    ok: true,
                    peers: Some(peers),
                    ..Default::default()
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_then_list_round_trips() {
        let server = RendezvousServer::new();
        let peer = PeerId::from(libp2p_identity::Keypair::generate_ed25519().public());
        let reply = server
            .handle_request(
                peer,
                RendezvousRequest::Register {
                    topic: "desk".into(),
                    addrs: vec!["/ip4/1.2.3.4/tcp/4001".into()],
                },
            )
            .await;
        assert!(reply.ok);

        let reply = server
            .handle_request(peer, RendezvousRequest::List { topic: "desk".into() })
            .await;
        assert!(reply.ok);
        let peers = reply.peers.unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].peer_id, peer.to_string());
    }

    #[tokio::test]
    async fn list_on_unknown_topic_is_empty_not_error() {
        let server = RendezvousServer::new();
        let reply = server
            .handle_request(
                PeerId::from(libp2p_identity::Keypair::generate_ed25519().public()),
                RendezvousRequest::List { topic: "nope".into() },
            )
            .await;
        assert!(reply.ok);
        assert!(reply.peers.unwrap().is_empty());
    }
}
