//! 4.3 Trust manager — orchestrates pairing state transitions and emits
//! lifecycle events.
//!
//! State per remote device: `none -> pending -> approved | rejected |
//! expired -> removed`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::identity::DeviceIdentityPayload;
use crate::ids::DeviceId;
use crate::ports::errors::TrustError;
use crate::ports::storage::StoragePort;
use crate::trust::protocol::TrustRequest;
use crate::trust::store::{TrustStore, TrustedDevice};

/// Default pending-request expiry (spec §5). `TrustManager::new` takes its
/// own expiry so a host can override it via `NetworkConfig.pending_expiry`;
/// this constant is only the fallback `NetworkConfig::default()` uses.
pub const PENDING_EXPIRY: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub device: DeviceIdentityPayload,
    pub received_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Rejection emits the same public `rejected` event whether the cause was a
/// user decision or the pending window expiring (spec §4.3, §9 — see
/// DESIGN.md "Open Question Decisions" for why the event name itself is
/// unchanged but carries this reason).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    UserRejected,
    Expired,
}

#[derive(Debug, Clone)]
pub enum TrustEvent {
    Request { device_id: DeviceId },
    Approved { device_id: DeviceId },
    Rejected { device_id: DeviceId, reason: RejectionReason },
    Removed { device_id: DeviceId },
}

pub type SubscriptionHandle = u64;

struct Subscribers {
    next_handle: SubscriptionHandle,
    senders: HashMap<SubscriptionHandle, mpsc::UnboundedSender<TrustEvent>>,
}

impl Default for Subscribers {
    fn default() -> Self {
        Self {
            next_handle: 0,
            senders: HashMap::new(),
        }
    }
}

struct PendingState {
    request: PendingRequest,
    expiry_task: JoinHandle<()>,
}

pub struct TrustManager<S: StoragePort> {
    store: Arc<TrustStore<S>>,
    local_device_id: DeviceId,
    /// Pending-request expiry (spec §5, configurable — `NetworkConfig.
    /// pending_expiry` in `clipmesh-net`).
    pending_expiry: Duration,
    pending: Mutex<HashMap<DeviceId, PendingState>>,
    /// Per-device mutex striping so concurrent `handleTrustRequest` calls for
    /// the same device collapse to one transition (spec §5).
    locks: Mutex<HashMap<DeviceId, Arc<Mutex<()>>>>,
    subscribers: Mutex<Subscribers>,
}

impl<S: StoragePort + 'static> TrustManager<S> {
    pub fn new(store: Arc<TrustStore<S>>, local_device_id: DeviceId, pending_expiry: Duration) -> Arc<Self> {
        Arc::new(Self {
            store,
            local_device_id,
            pending_expiry,
            pending: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(Subscribers::default()),
        })
    }

    pub async fn subscribe(self: &Arc<Self>) -> (SubscriptionHandle, mpsc::UnboundedReceiver<TrustEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subs = self.subscribers.lock().await;
        let handle = subs.next_handle;
        subs.next_handle += 1;
        subs.senders.insert(handle, tx);
        (handle, rx)
    }

    pub async fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.subscribers.lock().await.senders.remove(&handle);
    }

    async fn emit(&self, event: TrustEvent) {
        let subs = self.subscribers.lock().await;
        for sender in subs.senders.values() {
            let _ = sender.send(event.clone());
        }
    }

    async fn device_lock(&self, device_id: &DeviceId) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(device_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Verifies the signature (§4.4); on failure, drops silently. On
    /// success: if already approved, emits `approved` and reports
    /// `already_trusted = true` so the binder can send a positive ack
    /// without waiting on user approval. Otherwise registers a
    /// `PendingRequest` (deduplicated by deviceId, ignoring duplicates),
    /// emits `request`, and schedules an expiry timer.
    pub async fn handle_trust_request(
        self: &Arc<Self>,
        req: &TrustRequest,
    ) -> Result<HandleOutcome, TrustError> {
        if !req.verify_signature() || !req.is_addressed_to(&self.local_device_id) {
            return Ok(HandleOutcome::Dropped);
        }

        let device_id = req.payload.device_id.clone();
        let device_lock = self.device_lock(&device_id).await;
        let _guard = device_lock.lock().await;

        if self.store.is_trusted(&device_id).await? {
            self.emit(TrustEvent::Approved {
                device_id: device_id.clone(),
            })
            .await;
            return Ok(HandleOutcome::AlreadyTrusted);
        }

        let mut pending = self.pending.lock().await;
        if pending.contains_key(&device_id) {
            // Duplicate within the pending window: exactly one `request`
            // event total (spec invariant 4).
            return Ok(HandleOutcome::Registered);
        }

        let received_at = Utc::now();
        let expires_at = received_at
            + chrono::Duration::from_std(self.pending_expiry).expect("configured duration fits");
        let record = PendingRequest {
            device: req.payload.clone(),
            received_at,
            expires_at,
        };

        let this = Arc::clone(self);
        let expiry_device_id = device_id.clone();
        let pending_expiry = self.pending_expiry;
        let expiry_task = tokio::spawn(async move {
            tokio::time::sleep(pending_expiry).await;
            this.expire(&expiry_device_id).await;
        });

        pending.insert(
            device_id.clone(),
            PendingState {
                request: record,
                expiry_task,
            },
        );
        drop(pending);

        self.emit(TrustEvent::Request { device_id }).await;
        Ok(HandleOutcome::Registered)
    }

    async fn expire(self: &Arc<Self>, device_id: &DeviceId) {
        let mut pending = self.pending.lock().await;
        if pending.remove(device_id).is_some() {
            drop(pending);
            self.emit(TrustEvent::Rejected {
                device_id: device_id.clone(),
                reason: RejectionReason::Expired,
            })
            .await;
        }
    }

    pub async fn approve(self: &Arc<Self>, device_id: &DeviceId) -> Result<(), TrustError> {
        let mut pending = self.pending.lock().await;
        let Some(state) = pending.remove(device_id) else {
            return Ok(());
        };
        state.expiry_task.abort();
        drop(pending);

        let now = Utc::now();
        self.store
            .upsert(TrustedDevice {
                device_id: device_id.clone(),
                device_name: state.request.device.device_name.clone(),
                public_key: state.request.device.public_key.clone(),
                multiaddrs: state.request.device.multiaddrs.clone(),
                created_at: state.request.device.created_at,
                last_seen: now,
            })
            .await?;

        self.emit(TrustEvent::Approved {
            device_id: device_id.clone(),
        })
        .await;
        Ok(())
    }

    pub async fn reject(&self, device_id: &DeviceId) {
        let mut pending = self.pending.lock().await;
        let Some(state) = pending.remove(device_id) else {
            return;
        };
        state.expiry_task.abort();
        drop(pending);

        self.emit(TrustEvent::Rejected {
            device_id: device_id.clone(),
            reason: RejectionReason::UserRejected,
        })
        .await;
    }

    /// Upserts an already-trusted device directly into the store without
    /// going through the pending-request flow, and emits `approved`. Used
    /// by the requester-side trust-protocol binder when a positive
    /// trust-ack arrives with a `responder` payload (spec §4.7) — pairing
    /// completes from the requester's view without it ever having
    /// registered a pending request for itself.
    pub async fn upsert_trusted(&self, device: TrustedDevice) -> Result<(), TrustError> {
        let device_id = device.device_id.clone();
        self.store.upsert(device).await?;
        self.emit(TrustEvent::Approved { device_id }).await;
        Ok(())
    }

    pub async fn remove(&self, device_id: &DeviceId) -> Result<(), TrustError> {
        self.store.remove(device_id).await?;
        self.emit(TrustEvent::Removed {
            device_id: device_id.clone(),
        })
        .await;
        Ok(())
    }

    pub async fn is_trusted(&self, device_id: &DeviceId) -> Result<bool, TrustError> {
        self.store.is_trusted(device_id).await
    }

    /// The full trusted-device set, for startup restore (spec §4.8).
    pub async fn list_trusted(&self) -> Result<Vec<TrustedDevice>, TrustError> {
        self.store.list().await
    }

    pub async fn pending_request(&self, device_id: &DeviceId) -> Option<PendingRequest> {
        self.pending
            .lock()
            .await
            .get(device_id)
            .map(|s| s.request.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    Dropped,
    AlreadyTrusted,
    Registered,
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use crate::ports::storage::memory::MemoryStorage;

    fn sample_request(
        keypair: &libp2p_identity::Keypair,
        to: DeviceId,
    ) -> TrustRequest {
        let public_key = keypair.public();
        let payload = DeviceIdentityPayload {
            device_id: DeviceId::from_public_key(&public_key),
            device_name: "phone".into(),
            public_key: public_key.encode_protobuf(),
            multiaddrs: Vec::new(),
            created_at: Utc::now(),
        };
        let from = payload.device_id.clone();
        TrustRequest::sign(from, to, payload, Utc::now(), keypair).unwrap()
    }

    #[tokio::test]
    async fn valid_request_emits_request_and_registers_pending() {
        let store = Arc::new(TrustStore::new(MemoryStorage::new()));
        let local = DeviceId::from("host");
        let manager = TrustManager::new(store, local.clone(), PENDING_EXPIRY);
        let (_, mut rx) = manager.subscribe().await;

        let keypair = libp2p_identity::Keypair::generate_ed25519();
        let req = sample_request(&keypair, local);
        let outcome = manager.handle_trust_request(&req).await.unwrap();
        assert_eq!(outcome, HandleOutcome::Registered);

        match rx.recv().await.unwrap() {
            TrustEvent::Request { device_id } => assert_eq!(device_id, req.from),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn duplicate_requests_emit_exactly_one_request_event() {
        let store = Arc::new(TrustStore::new(MemoryStorage::new()));
        let local = DeviceId::from("host");
        let manager = TrustManager::new(store, local.clone(), PENDING_EXPIRY);
        let (_, mut rx) = manager.subscribe().await;

        let keypair = libp2p_identity::Keypair::generate_ed25519();
        let req = sample_request(&keypair, local);
        manager.handle_trust_request(&req).await.unwrap();
        manager.handle_trust_request(&req).await.unwrap();

        let _first = rx.recv().await.unwrap();
        let second = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(second.is_err(), "no second request event should be emitted");
    }

    #[tokio::test]
    async fn approve_persists_and_cancels_expiry() {
        let store = Arc::new(TrustStore::new(MemoryStorage::new()));
        let local = DeviceId::from("host");
        let manager = TrustManager::new(store.clone(), local.clone(), PENDING_EXPIRY);
        let keypair = libp2p_identity::Keypair::generate_ed25519();
        let req = sample_request(&keypair, local);
        manager.handle_trust_request(&req).await.unwrap();
        manager.approve(&req.from).await.unwrap();
        assert!(store.is_trusted(&req.from).await.unwrap());
    }

    #[tokio::test]
    async fn invalid_signature_is_dropped_silently() {
        let store = Arc::new(TrustStore::new(MemoryStorage::new()));
        let local = DeviceId::from("host");
        let manager = TrustManager::new(store, local.clone(), PENDING_EXPIRY);
        let keypair = libp2p_identity::Keypair::generate_ed25519();
        let mut req = sample_request(&keypair, local);
        req.sig = base64::engine::general_purpose::STANDARD.encode([0u8; 64]);
        let outcome = manager.handle_trust_request(&req).await.unwrap();
        assert_eq!(outcome, HandleOutcome::Dropped);
    }

    /// Pending expiry fires at exactly `receivedAt + 10 min` and emits
    /// `rejected` once (spec §8 boundary behavior, §4.3).
    #[tokio::test(start_paused = true)]
    async fn pending_request_expires_and_emits_rejected() {
        let store = Arc::new(TrustStore::new(MemoryStorage::new()));
        let local = DeviceId::from("host");
        let manager = TrustManager::new(store, local.clone(), PENDING_EXPIRY);
        let (_, mut rx) = manager.subscribe().await;

        let keypair = libp2p_identity::Keypair::generate_ed25519();
        let req = sample_request(&keypair, local);
        manager.handle_trust_request(&req).await.unwrap();
        match rx.recv().await.unwrap() {
            TrustEvent::Request { .. } => {}
            other => panic!("unexpected event: {other:?}"),
        }

        tokio::time::advance(PENDING_EXPIRY + Duration::from_secs(1)).await;

        match rx.recv().await.unwrap() {
            TrustEvent::Rejected { device_id, reason } => {
                assert_eq!(device_id, req.from);
                assert_eq!(reason, RejectionReason::Expired);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(manager.pending_request(&req.from).await.is_none());

        // A subsequent approve is a no-op once the pending entry is gone.
        manager.approve(&req.from).await.unwrap();
        assert!(!manager.is_trusted(&req.from).await.unwrap());
    }
}
