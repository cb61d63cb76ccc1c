//! Rendezvous client: register self under a topic with a relay and list
//! other peers registered under it, re-registering on a loose timer while
//! running (spec §4.8 "the client re-registers every 30s while running").

use std::sync::Arc;
use std::time::Duration;

use libp2p::{Multiaddr, PeerId};
use tracing::warn;

use crate::errors::RendezvousError;
use crate::protocol_ids::RENDEZVOUS_PROTOCOL;
use crate::rendezvous::{PeerRecord, RendezvousReply, RendezvousRequest};
use crate::stream_io::{read_length_prefixed, write_length_prefixed};
use crate::transport::MessagingTransport;

#[derive(Clone)]
pub struct RendezvousClient {
    transport: MessagingTransport,
}

impl RendezvousClient {
    pub fn new(transport: MessagingTransport) -> Self {
        Self { transport }
    }

    pub async fn register(
        &self,
        relay: PeerId,
        topic: &str,
        addrs: &[Multiaddr],
    ) -> Result<(), RendezvousError> {
        let request = RendezvousRequest::Register {
            topic: topic.to_string(),
            addrs: addrs.iter().map(Multiaddr::to_string).collect(),
        };
        let reply = self.request(relay, request).await?;
        if reply.ok {
            Ok(())
        } else {
            Err(RendezvousError::Server(
                reply.error.unwrap_or_else(|| "register rejected".into()),
            ))
        }
    }

    /// Returns `(peerId, addrs)` pairs registered under `topic`, skipping
    /// any record whose peer id fails to parse rather than failing the
    /// whole list.
    pub async fn list(
        &self,
        relay: PeerId,
        topic: &str,
    ) -> Result<Vec<(PeerId, Vec<Multiaddr>)>, RendezvousError> {
        let request = RendezvousRequest::List {
            topic: topic.to_string(),
        };
        let reply = self.request(relay, request).await?;
        if !reply.ok {
            return Err(RendezvousError::Server(
                reply.error.unwrap_or_else(|| "list rejected".into()),
            ));
        }
        Ok(reply
            .peers
            .unwrap_or_default()
            .into_iter()
            .filter_map(parse_record)
            .collect())
    }

    async fn request(
        &self,
        relay: PeerId,
        request: RendezvousRequest,
    ) -> Result<RendezvousReply, RendezvousError> {
        let mut stream = self
            .transport
            .open_raw_stream(relay, RENDEZVOUS_PROTOCOL)
            .await?;
        let bytes = serde_json::to_vec(&request)
            .map_err(|e| RendezvousError::Malformed(e.to_string()))?;
        write_length_prefixed(&mut stream, &bytes)
            .await
            .map_err(|_| RendezvousError::Connectivity(crate::errors::ConnectivityError::PeerNotConnected))?;
        let reply_bytes = read_length_prefixed(&mut stream)
            .await
            .map_err(|_| RendezvousError::Connectivity(crate::errors::ConnectivityError::PeerNotConnected))?;
        serde_json::from_slice(&reply_bytes).map_err(|e| RendezvousError::Malformed(e.to_string()))
    }

    /// Spawns a task that re-registers `addrs()` under `topic` with `relay`
    /// every `interval`, until the returned handle is dropped/aborted
    /// (spec §9 "own ambient timers as explicit task handles").
    pub fn spawn_refresh(
        self: Arc<Self>,
        relay: PeerId,
        topic: String,
        addrs: Arc<dyn Fn() -> Vec<Multiaddr> + Send + Sync>,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let current = addrs();
                if let Err(err) = self.register(relay, &topic, &current).await {
                    warn!(%relay, %topic, %err, "rendezvous re-registration failed");
                }
            }
        })
    }
}

fn parse_record(record: PeerRecord) -> Option<(PeerId, Vec<Multiaddr>)> {
    let peer_id: PeerId = match record.peer_id.parse() {
        Ok(id) => id,
        Err(err) => {
            warn!(peer_id = %record.peer_id, %err, "rendezvous list returned an unparseable peer id");
            return None;
        }
    };
    let addrs = record
        .addrs
        .into_iter()
        .filter_map(|a| match a.parse() {
            Ok(addr) => Some(addr),
            Err(err) => {
                warn!(addr = %a, %err, "rendezvous list returned an unparseable address");
                None
            }
        })
        .collect();
    Some((peer_id, addrs))
}
