//! 4.7 Trust-protocol binder — wires inbound trust messages into the trust
//! manager and sends outbound acks, without either side holding a reference
//! to the other (spec §9 "cyclic references... break with one-way message
//! passing": the binder holds handles to both and mediates).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::warn;

use clipmesh_core::identity::IdentityStore;
use clipmesh_core::ids::DeviceId;
use clipmesh_core::ports::StoragePort;
use clipmesh_core::trust::manager::{HandleOutcome, RejectionReason, TrustEvent};
use clipmesh_core::trust::protocol::{TrustAck, TrustRequest};
use clipmesh_core::trust::store::TrustedDevice;
use clipmesh_core::trust::TrustManager;

use crate::messenger::Messenger;
use crate::transport::SendTarget;

/// The trust protocol carries either message shape over
/// `/clipboard/trust/1.0.0`; `type` discriminates (spec §4.4).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum TrustRequestOrAck {
    Request(TrustRequest),
    Ack(TrustAck),
}

/// Wires the (non-trust-gated) trust messenger to a `TrustManager`. Neither
/// the messenger nor the manager reference each other; this struct mediates.
pub struct TrustProtocolBinder<S: StoragePort + 'static> {
    messenger: Messenger<TrustRequestOrAck>,
    manager: Arc<TrustManager<S>>,
    identity: Arc<IdentityStore<S>>,
    /// Snapshot of the original signed request per device, kept only while
    /// a decision (approve/reject/expiry) is pending, so the eventual ack
    /// can carry it by value (spec §4.3 "acks include the original signed
    /// request so the requester can correlate").
    awaiting_ack: Mutex<HashMap<DeviceId, TrustRequest>>,
}

impl<S: StoragePort + 'static> TrustProtocolBinder<S> {
    pub fn new(
        messenger: Messenger<TrustRequestOrAck>,
        manager: Arc<TrustManager<S>>,
        identity: Arc<IdentityStore<S>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            messenger,
            manager,
            identity,
            awaiting_ack: Mutex::new(HashMap::new()),
        })
    }

    /// Subscribes to the trust messenger and to trust-manager lifecycle
    /// events; returns a handle whose drop cancels both subscriptions
    /// (spec §9 "own them as explicit task handles").
    pub async fn spawn(self: &Arc<Self>) -> BinderHandles {
        let this = Arc::clone(self);
        self.messenger
            .on_message(Arc::new(move |_device_id, message| {
                let this = Arc::clone(&this);
                tokio::spawn(async move {
                    this.handle_inbound(message).await;
                });
            }))
            .await;

        let (sub_handle, mut events) = self.manager.subscribe().await;
        let this = Arc::clone(self);
        let manager_for_unsub = Arc::clone(&self.manager);
        let events_task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                this.handle_trust_event(event).await;
            }
            manager_for_unsub.unsubscribe(sub_handle).await;
        });

        BinderHandles { events_task }
    }

    async fn handle_inbound(&self, message: TrustRequestOrAck) {
        match message {
            TrustRequestOrAck::Request(req) => self.handle_request(req).await,
            TrustRequestOrAck::Ack(ack) => self.handle_ack(ack).await,
        }
    }

    async fn handle_request(&self, req: TrustRequest) {
        let outcome = match self.manager.handle_trust_request(&req).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(%err, "trust store failure while handling trust-request");
                return;
            }
        };

        match outcome {
            HandleOutcome::Dropped => {}
            HandleOutcome::AlreadyTrusted => self.send_ack(&req, true).await,
            HandleOutcome::Registered => {
                self.awaiting_ack
                    .lock()
                    .await
                    .insert(req.from.clone(), req);
            }
        }
    }

    /// `approve`/`reject`/expiry all surface as `TrustEvent`s; this is
    /// where the corresponding ack actually goes out, since by the time
    /// `approve` returns the manager has already dropped the
    /// `PendingRequest`.
    async fn handle_trust_event(&self, event: TrustEvent) {
        match event {
            TrustEvent::Approved { device_id } => {
                if let Some(req) = self.awaiting_ack.lock().await.remove(&device_id) {
                    self.send_ack(&req, true).await;
                }
            }
            TrustEvent::Rejected { device_id, reason } => {
                if let Some(req) = self.awaiting_ack.lock().await.remove(&device_id) {
                    match reason {
                        RejectionReason::UserRejected | RejectionReason::Expired => {
                            self.send_ack(&req, false).await;
                        }
                    }
                }
            }
            TrustEvent::Request { .. } | TrustEvent::Removed { .. } => {}
        }
    }

    async fn handle_ack(&self, ack: TrustAck) {
        if !ack.payload.accepted {
            return;
        }
        let Some(responder) = ack.payload.responder else {
            warn!(from = %ack.from, "accepted trust-ack missing responder payload");
            return;
        };
        let now = Utc::now();
        let device = TrustedDevice {
            device_id: responder.device_id,
            device_name: responder.device_name,
            public_key: responder.public_key,
            multiaddrs: responder.multiaddrs,
            created_at: responder.created_at,
            last_seen: now,
        };
        if let Err(err) = self.manager.upsert_trusted(device).await {
            warn!(%err, "failed to persist responder from trust-ack");
        }
    }

    async fn send_ack(&self, req: &TrustRequest, accepted: bool) {
        let responder = if accepted {
            match self.identity.get().await {
                Ok(identity) => Some(identity.to_payload()),
                Err(err) => {
                    warn!(%err, "failed to load local identity for trust-ack");
                    None
                }
            }
        } else {
            None
        };
        let Ok(peer_id) = req.from.to_peer_id() else {
            warn!(from = %req.from, "trust-request sender has no parseable peer id");
            return;
        };
        let ack = TrustAck::new(
            req.to.clone(),
            req.from.clone(),
            accepted,
            req.clone(),
            responder,
            Utc::now(),
        );
        if let Err(err) = self
            .messenger
            .send(SendTarget::Peer(peer_id), &TrustRequestOrAck::Ack(ack))
            .await
        {
            warn!(%err, peer = %req.from, "failed to send trust-ack");
        }
    }
}

pub struct BinderHandles {
    pub events_task: tokio::task::JoinHandle<()>,
}

impl Drop for BinderHandles {
    fn drop(&mut self) {
        self.events_task.abort();
    }
}
