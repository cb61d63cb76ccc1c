//! 4.8 Connectivity engine — pairing and restore flows: address parsing,
//! direct-dial, relay-dial, rendezvous register/list, direct-upgrade (spec
//! §4.8). Owns the `MessagingTransport` (spec §3 "the Connectivity engine
//! owns the Messaging transport").

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId};
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use clipmesh_core::identity::IdentityStore;
use clipmesh_core::ids::DeviceId;
use clipmesh_core::ports::StoragePort;
use clipmesh_core::trust::protocol::{TrustAck, TrustRequest};
use clipmesh_core::trust::store::TrustedDevice;

use crate::addressing::{classify_and_dedupe, extract_peer_id, synthesize_relay_addr, ClassifiedAddrs};
use crate::binder::TrustRequestOrAck;
use crate::config::NetworkConfig;
use crate::errors::{ConnectivityError, MessengerError};
use crate::messenger::Messenger;
use crate::rendezvous::RendezvousClient;
use crate::transport::{MessagingTransport, SendTarget};

/// `PairingTarget` (spec §4.8): the addresses and optional peer id a pairing
/// attempt is aimed at, plus the relays/topic used for self-registration and
/// discovery.
#[derive(Debug, Clone, Default)]
pub struct PairingTarget {
    pub addrs: Vec<Multiaddr>,
    pub peer_id: Option<PeerId>,
    pub rendezvous_relays: Vec<Multiaddr>,
    pub rendezvous_topic: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Via {
    Direct,
    Relay,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairResult {
    pub via: Via,
}

#[derive(Debug, Clone)]
pub struct RestoreResult {
    pub device_id: DeviceId,
    pub connected: bool,
    pub via: Option<Via>,
    pub addr: Option<Multiaddr>,
    pub error: Option<ConnectivityError>,
}

/// Pending ack correlation, keyed by the target device id. Sequential
/// per-address dial attempts (spec §4.8 step 3/4) mean only one waiter per
/// device is ever in flight at a time.
type AckWaiters = Mutex<HashMap<DeviceId, oneshot::Sender<TrustAck>>>;

pub struct ConnectivityEngine<S: StoragePort + 'static> {
    transport: MessagingTransport,
    trust_messenger: Messenger<TrustRequestOrAck>,
    identity: Arc<IdentityStore<S>>,
    rendezvous: Arc<RendezvousClient>,
    config: NetworkConfig,
    waiters: AckWaiters,
    /// One re-registration loop per relay we've registered with (spec §4.8,
    /// §9 "own ambient timers as explicit task handles"). Aborted on drop.
    refresh_tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl<S: StoragePort + 'static> Drop for ConnectivityEngine<S> {
    fn drop(&mut self) {
        if let Ok(tasks) = self.refresh_tasks.try_lock() {
            for task in tasks.iter() {
                task.abort();
            }
        }
    }
}

impl<S: StoragePort + 'static> ConnectivityEngine<S> {
    /// Subscribes to the trust messenger for ack correlation and returns the
    /// engine ready to pair/restore. The trust-protocol binder subscribes to
    /// the same messenger independently (spec §9 — neither back-references
    /// the other); both receive every inbound trust message.
    pub async fn new(
        transport: MessagingTransport,
        trust_messenger: Messenger<TrustRequestOrAck>,
        identity: Arc<IdentityStore<S>>,
        rendezvous: Arc<RendezvousClient>,
        config: NetworkConfig,
    ) -> Arc<Self> {
        let engine = Arc::new(Self {
            transport,
            trust_messenger,
            identity,
            rendezvous,
            config,
            waiters: Mutex::new(HashMap::new()),
            refresh_tasks: Mutex::new(Vec::new()),
        });

        let this = Arc::clone(&engine);
        engine
            .trust_messenger
            .on_message(Arc::new(move |_device_id, message| {
                let this = Arc::clone(&this);
                tokio::spawn(async move {
                    this.handle_inbound(message).await;
                });
            }))
            .await;

        engine
    }

    async fn handle_inbound(&self, message: TrustRequestOrAck) {
        if let TrustRequestOrAck::Ack(ack) = message {
            if let Some(tx) = self.waiters.lock().await.remove(&ack.from) {
                let _ = tx.send(ack);
            }
        }
    }

    /// **Pair with peer** (spec §4.8).
    pub async fn pair_with_peer(&self, target: PairingTarget) -> Result<PairResult, ConnectivityError> {
        self.pair_with_peer_cancelable(target, &CancellationToken::new()).await
    }

    pub async fn pair_with_peer_cancelable(
        &self,
        target: PairingTarget,
        cancel: &CancellationToken,
    ) -> Result<PairResult, ConnectivityError> {
        if let Some(topic) = &target.rendezvous_topic {
            self.register_rendezvous(topic, &target.rendezvous_relays).await;
        }

        let peer_id = target
            .peer_id
            .or_else(|| target.addrs.iter().find_map(extract_peer_id))
            .ok_or(ConnectivityError::NoTarget)?;

        let ClassifiedAddrs { direct, relay } = classify_and_dedupe(target.addrs.iter().cloned());

        for addr in &direct {
            if cancel.is_cancelled() {
                return Err(ConnectivityError::Cancelled);
            }
            match self
                .dial_cancelable(addr.clone(), peer_id, self.config.direct_dial_timeout, cancel)
                .await
            {
                Ok(()) => {
                    match self
                        .send_trust_request_and_await_ack(peer_id, self.config.direct_dial_timeout, cancel)
                        .await
                    {
                        Ok(_ack) => return Ok(PairResult { via: Via::Direct }),
                        Err(ConnectivityError::Cancelled) => return Err(ConnectivityError::Cancelled),
                        Err(err) => warn!(%addr, %err, "direct pairing attempt failed after connecting"),
                    }
                }
                Err(ConnectivityError::Cancelled) => return Err(ConnectivityError::Cancelled),
                Err(err) => debug!(%addr, %err, "direct dial failed"),
            }
        }

        let mut relay_addrs = relay;
        if relay_addrs.is_empty() {
            for configured in &self.config.relays {
                relay_addrs.push(synthesize_relay_addr(configured, peer_id));
            }
        }

        for addr in &relay_addrs {
            if cancel.is_cancelled() {
                return Err(ConnectivityError::Cancelled);
            }
            let Some(relay_peer) = self.relay_hop_peer_id(addr) else {
                continue;
            };
            if self.ensure_relay_reservation(relay_peer).await.is_err() {
                continue;
            }
            match self
                .dial_cancelable(addr.clone(), peer_id, self.config.relay_dial_timeout, cancel)
                .await
            {
                Ok(()) => {
                    match self
                        .send_trust_request_and_await_ack(peer_id, self.config.relay_dial_timeout, cancel)
                        .await
                    {
                        Ok(ack) => {
                            self.schedule_direct_upgrade(peer_id, &ack);
                            return Ok(PairResult { via: Via::Relay });
                        }
                        Err(ConnectivityError::Cancelled) => return Err(ConnectivityError::Cancelled),
                        Err(err) => warn!(%addr, %err, "relay pairing attempt failed after connecting"),
                    }
                }
                Err(ConnectivityError::Cancelled) => return Err(ConnectivityError::Cancelled),
                Err(err) => debug!(%addr, %err, "relay dial failed"),
            }
        }

        Err(ConnectivityError::DialFailed)
    }

    /// The relay (first) hop of a `/p2p-circuit` address: the `/p2p/<id>`
    /// component that precedes `/p2p-circuit`, if the address carries one,
    /// else whichever configured relay this address was built from.
    fn relay_hop_peer_id(&self, addr: &Multiaddr) -> Option<PeerId> {
        let mut hop = None;
        for proto in addr.iter() {
            match proto {
                Protocol::P2p(id) => hop = Some(id),
                Protocol::P2pCircuit => return hop,
                _ => {}
            }
        }
        self.config
            .relays
            .iter()
            .find(|r| addr.to_string().starts_with(&r.to_string()))
            .and_then(extract_peer_id)
    }

    /// **Restore trusted peers** (spec §4.8), run once at startup. Does not
    /// re-verify signatures — identity is already trust-anchored by public
    /// key.
    pub async fn restore_trusted_peers(&self, devices: &[TrustedDevice], topic: &str) -> Vec<RestoreResult> {
        let mut results = Vec::with_capacity(devices.len());
        for device in devices {
            results.push(self.restore_one(device, topic).await);
        }
        results
    }

    async fn restore_one(&self, device: &TrustedDevice, topic: &str) -> RestoreResult {
        let Ok(peer_id) = device.device_id.to_peer_id() else {
            return RestoreResult {
                device_id: device.device_id.clone(),
                connected: false,
                via: None,
                addr: None,
                error: Some(ConnectivityError::NoTarget),
            };
        };

        let mut candidates = device.multiaddrs.clone();
        for relay in &self.config.relays {
            let Some(relay_peer) = extract_peer_id(relay) else { continue };
            match self.rendezvous.list(relay_peer, topic).await {
                Ok(listed) => {
                    for (listed_peer, addrs) in listed {
                        if listed_peer == peer_id {
                            candidates.extend(addrs);
                        }
                    }
                }
                Err(err) => debug!(%relay, %err, "rendezvous list failed during restore"),
            }
        }

        let ClassifiedAddrs { direct, relay } = classify_and_dedupe(candidates);

        for addr in &direct {
            if self
                .transport
                .dial(addr.clone(), peer_id, self.config.direct_dial_timeout)
                .await
                .is_ok()
            {
                return RestoreResult {
                    device_id: device.device_id.clone(),
                    connected: true,
                    via: Some(Via::Direct),
                    addr: Some(addr.clone()),
                    error: None,
                };
            }
        }

        for addr in &relay {
            let Some(relay_peer) = self.relay_hop_peer_id(addr) else { continue };
            if self.ensure_relay_reservation(relay_peer).await.is_err() {
                continue;
            }
            if self
                .transport
                .dial(addr.clone(), peer_id, self.config.relay_dial_timeout)
                .await
                .is_ok()
            {
                return RestoreResult {
                    device_id: device.device_id.clone(),
                    connected: true,
                    via: Some(Via::Relay),
                    addr: Some(addr.clone()),
                    error: None,
                };
            }
        }

        RestoreResult {
            device_id: device.device_id.clone(),
            connected: false,
            via: None,
            addr: None,
            error: Some(ConnectivityError::DialFailed),
        }
    }

    async fn register_rendezvous(&self, topic: &str, relays: &[Multiaddr]) {
        let addrs = self
            .identity
            .get()
            .await
            .map(|identity| identity.multiaddrs)
            .unwrap_or_default();
        for relay in relays {
            let Some(relay_peer) = extract_peer_id(relay) else { continue };
            if self.ensure_relay_reservation(relay_peer).await.is_err() {
                continue;
            }
            if let Err(err) = self.rendezvous.register(relay_peer, topic, &addrs).await {
                warn!(%relay, %err, "rendezvous register failed");
                continue;
            }
            let addrs_snapshot = addrs.clone();
            let handle = Arc::clone(&self.rendezvous).spawn_refresh(
                relay_peer,
                topic.to_string(),
                Arc::new(move || addrs_snapshot.clone()),
                self.config.rendezvous_refresh_interval,
            );
            self.refresh_tasks.lock().await.push(handle);
        }
    }

    /// Dials a relay (marking it as a relay connection first, so the
    /// transport doesn't raise `PeerConnected` for it) and retries with
    /// backoff up to `relay_reservation_max_attempts` (spec §4.8 "relay
    /// reservation refresh").
    async fn ensure_relay_reservation(&self, relay_peer: PeerId) -> Result<(), ConnectivityError> {
        let Some(relay_addr) = self
            .config
            .relays
            .iter()
            .find(|a| extract_peer_id(a) == Some(relay_peer))
            .cloned()
        else {
            return Err(ConnectivityError::NoReservation);
        };

        self.transport.mark_relay(relay_peer);

        let mut attempts = 1;
        loop {
            match self
                .transport
                .dial(relay_addr.clone(), relay_peer, self.config.relay_dial_timeout)
                .await
            {
                Ok(()) => return Ok(()),
                Err(_) if attempts < self.config.relay_reservation_max_attempts => {
                    attempts += 1;
                    tokio::time::sleep(self.config.relay_reservation_backoff).await;
                }
                Err(_) => return Err(ConnectivityError::NoReservation),
            }
        }
    }

    /// After a successful relay dial, attempts a direct connection to any
    /// non-circuit address learned from the ack's responder payload, within
    /// `direct_upgrade_timeout`. Best-effort: failure leaves the relay
    /// connection in use (spec §4.8 "direct-upgrade").
    fn schedule_direct_upgrade(&self, peer_id: PeerId, ack: &TrustAck) {
        let Some(responder) = &ack.payload.responder else { return };
        let ClassifiedAddrs { direct, .. } = classify_and_dedupe(responder.multiaddrs.iter().cloned());
        if direct.is_empty() {
            return;
        }
        let transport = self.transport.clone();
        let timeout = self.config.direct_upgrade_timeout;
        tokio::spawn(async move {
            for addr in direct {
                match transport.dial(addr.clone(), peer_id, timeout).await {
                    Ok(()) => {
                        debug!(%addr, %peer_id, "direct-upgrade succeeded");
                        return;
                    }
                    Err(err) => debug!(%addr, %peer_id, %err, "direct-upgrade attempt failed"),
                }
            }
        });
    }

    async fn dial_cancelable(
        &self,
        addr: Multiaddr,
        peer_id: PeerId,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), ConnectivityError> {
        tokio::select! {
            res = self.transport.dial(addr, peer_id, timeout) => res,
            _ = cancel.cancelled() => Err(ConnectivityError::Cancelled),
        }
    }

    async fn send_trust_request_and_await_ack(
        &self,
        target_peer: PeerId,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<TrustAck, ConnectivityError> {
        let identity = self
            .identity
            .get()
            .await
            .map_err(|_| ConnectivityError::InvalidPairingPayload)?;
        let keypair = identity
            .keypair()
            .map_err(|_| ConnectivityError::InvalidPairingPayload)?;
        let target_id = DeviceId::from(target_peer);
        let request = TrustRequest::sign(
            identity.device_id.clone(),
            target_id.clone(),
            identity.to_payload(),
            Utc::now(),
            &keypair,
        )
        .map_err(|_| ConnectivityError::InvalidPairingPayload)?;

        let (tx, rx) = oneshot::channel();
        self.waiters.lock().await.insert(target_id.clone(), tx);

        if let Err(err) = self
            .trust_messenger
            .send(SendTarget::Peer(target_peer), &TrustRequestOrAck::Request(request))
            .await
        {
            self.waiters.lock().await.remove(&target_id);
            return Err(match err {
                MessengerError::Connectivity(e) => e,
                _ => ConnectivityError::PeerNotConnected,
            });
        }

        let wait = tokio::time::timeout(timeout, rx);
        tokio::select! {
            result = wait => match result {
                Ok(Ok(ack)) if ack.payload.accepted => Ok(ack),
                Ok(Ok(_)) => Err(ConnectivityError::Rejected),
                Ok(Err(_)) => Err(ConnectivityError::DialFailed),
                Err(_) => {
                    self.waiters.lock().await.remove(&target_id);
                    Err(ConnectivityError::DialTimeout(timeout))
                }
            },
            _ = cancel.cancelled() => {
                self.waiters.lock().await.remove(&target_id);
                Err(ConnectivityError::Cancelled)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairing_target_defaults_to_no_addresses() {
        let target = PairingTarget::default();
        assert!(target.addrs.is_empty());
        assert!(target.peer_id.is_none());
    }
}
