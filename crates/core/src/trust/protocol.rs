//! 4.4 Clip-trust protocol — canonical encoding, signing, and verification
//! of pairing messages.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identity::DeviceIdentityPayload;
use crate::ids::DeviceId;

/// Recursively canonicalizes a JSON value for signing: object keys in
/// lexicographic order, arrays preserve order, null-valued object fields
/// (standing in for `undefined`/function/symbol-valued properties) are
/// omitted, primitives keep their JSON literal form.
///
/// `serde_json::Map` is BTreeMap-backed unless the `preserve_order` feature
/// is enabled (it isn't, here), so building a fresh `Map` already yields
/// lexicographic key order on serialization — this function only needs to
/// drop nulls and recurse.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                if v.is_null() {
                    continue;
                }
                out.insert(k.clone(), canonicalize(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// The canonical byte encoding of `value`, ready to sign or hash.
pub fn canonical_bytes(value: &Value) -> Vec<u8> {
    serde_json::to_vec(&canonicalize(value)).expect("canonical json always serializes")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustRequest {
    #[serde(rename = "type")]
    pub kind: TrustRequestKind,
    pub from: DeviceId,
    pub to: DeviceId,
    pub payload: DeviceIdentityPayload,
    pub sent_at: DateTime<Utc>,
    pub sig: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrustRequestKind {
    #[serde(rename = "trust-request")]
    TrustRequest,
}

/// The signing domain is the canonical encoding of the request without
/// `sig`.
#[derive(Serialize)]
struct SigningDomain<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    from: &'a DeviceId,
    to: &'a DeviceId,
    payload: &'a DeviceIdentityPayload,
    sent_at: DateTime<Utc>,
}

fn signing_bytes(
    from: &DeviceId,
    to: &DeviceId,
    payload: &DeviceIdentityPayload,
    sent_at: DateTime<Utc>,
) -> Vec<u8> {
    let domain = SigningDomain {
        kind: "trust-request",
        from,
        to,
        payload,
        sent_at,
    };
    let value = serde_json::to_value(&domain).expect("signing domain always serializes");
    canonical_bytes(&value)
}

impl TrustRequest {
    /// Build and sign a trust-request with `keypair`, the sender's own
    /// identity key.
    pub fn sign(
        from: DeviceId,
        to: DeviceId,
        payload: DeviceIdentityPayload,
        sent_at: DateTime<Utc>,
        keypair: &libp2p_identity::Keypair,
    ) -> anyhow::Result<Self> {
        let bytes = signing_bytes(&from, &to, &payload, sent_at);
        let sig = keypair.sign(&bytes)?;
        Ok(Self {
            kind: TrustRequestKind::TrustRequest,
            from,
            to,
            payload,
            sent_at,
            sig: BASE64.encode(sig),
        })
    }

    /// Verification rules (spec §4.4), all of which must hold:
    /// - `from` equals `payload.deviceId`, which equals the id derived from
    ///   `payload.publicKey`.
    /// - `sig` verifies under `payload.publicKey`.
    /// - `to` equals the local device id (checked by the caller, since it
    ///   depends on which node is verifying).
    pub fn verify_signature(&self) -> bool {
        if self.from != self.payload.device_id {
            return false;
        }
        let Ok(public_key) = libp2p_identity::PublicKey::try_decode_protobuf(&self.payload.public_key)
        else {
            return false;
        };
        if DeviceId::from_public_key(&public_key) != self.payload.device_id {
            return false;
        }
        let Ok(sig) = BASE64.decode(&self.sig) else {
            return false;
        };
        let bytes = signing_bytes(&self.from, &self.to, &self.payload, self.sent_at);
        public_key.verify(&bytes, &sig)
    }

    pub fn is_addressed_to(&self, local_device_id: &DeviceId) -> bool {
        &self.to == local_device_id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustAck {
    #[serde(rename = "type")]
    pub kind: TrustAckKind,
    pub from: DeviceId,
    pub to: DeviceId,
    pub payload: TrustAckPayload,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrustAckKind {
    #[serde(rename = "trust-ack")]
    TrustAck,
}

/// Acks are not signed — integrity is inherited from the authenticated
/// transport between peers (spec §4.4 / §9 Open Questions). They carry the
/// original signed request by value so the sender can correlate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustAckPayload {
    pub accepted: bool,
    pub request: TrustRequest,
    pub responder: Option<DeviceIdentityPayload>,
}

impl TrustAck {
    pub fn new(
        from: DeviceId,
        to: DeviceId,
        accepted: bool,
        request: TrustRequest,
        responder: Option<DeviceIdentityPayload>,
        sent_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: TrustAckKind::TrustAck,
            from,
            to,
            payload: TrustAckPayload {
                accepted,
                request,
                responder,
            },
            sent_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_payload(keypair: &libp2p_identity::Keypair) -> DeviceIdentityPayload {
        let public_key = keypair.public();
        DeviceIdentityPayload {
            device_id: DeviceId::from_public_key(&public_key),
            device_name: "laptop".into(),
            public_key: public_key.encode_protobuf(),
            multiaddrs: Vec::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn sign_then_verify_succeeds() {
        let keypair = libp2p_identity::Keypair::generate_ed25519();
        let payload = identity_payload(&keypair);
        let from = payload.device_id.clone();
        let to = DeviceId::from("responder");
        let req = TrustRequest::sign(from, to, payload, Utc::now(), &keypair).unwrap();
        assert!(req.verify_signature());
    }

    #[test]
    fn bit_flip_in_signature_breaks_verification() {
        let keypair = libp2p_identity::Keypair::generate_ed25519();
        let payload = identity_payload(&keypair);
        let from = payload.device_id.clone();
        let to = DeviceId::from("responder");
        let mut req = TrustRequest::sign(from, to, payload, Utc::now(), &keypair).unwrap();
        let mut sig = BASE64.decode(&req.sig).unwrap();
        sig[0] ^= 0x01;
        req.sig = BASE64.encode(sig);
        assert!(!req.verify_signature());
    }

    #[test]
    fn swapped_public_key_is_rejected() {
        let keypair = libp2p_identity::Keypair::generate_ed25519();
        let other = libp2p_identity::Keypair::generate_ed25519();
        let mut payload = identity_payload(&keypair);
        let from = payload.device_id.clone();
        let to = DeviceId::from("responder");
        let req = TrustRequest::sign(from, to.clone(), payload.clone(), Utc::now(), &keypair).unwrap();
        payload.public_key = other.public().encode_protobuf();
        let mut spoofed = req;
        spoofed.payload = payload;
        assert!(!spoofed.verify_signature());
    }

    #[test]
    fn canonical_encoding_is_stable_under_key_reordering() {
        let a = serde_json::json!({"b": 1, "a": 2, "c": {"z": 1, "y": 2}});
        let b = serde_json::json!({"a": 2, "c": {"y": 2, "z": 1}, "b": 1});
        assert_eq!(canonical_bytes(&a), canonical_bytes(&b));
    }

    #[test]
    fn canonical_encoding_omits_null_fields() {
        let a = serde_json::json!({"a": 1, "b": null});
        let b = serde_json::json!({"a": 1});
        assert_eq!(canonical_bytes(&a), canonical_bytes(&b));
    }

    #[test]
    fn canonical_encoding_is_deterministic() {
        let v = serde_json::json!({"x": [3, 2, 1], "a": "hi"});
        assert_eq!(canonical_bytes(&v), canonical_bytes(&v));
    }
}

/// Property tests for the universally-quantified invariants in spec.md §8:
/// canonical encoding is stable under arbitrary key reordering (invariant 6),
/// and sign/verify round-trips while any single-bit mutation of the
/// signature breaks it (the sign/verify round-trip property).
#[cfg(test)]
mod proptests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn identity_payload(keypair: &libp2p_identity::Keypair, device_name: String) -> DeviceIdentityPayload {
        let public_key = keypair.public();
        DeviceIdentityPayload {
            device_id: DeviceId::from_public_key(&public_key),
            device_name,
            public_key: public_key.encode_protobuf(),
            multiaddrs: Vec::new(),
            created_at: Utc::now(),
        }
    }

    proptest! {
        /// encoding is stable under key reordering of input (spec.md §8
        /// invariant 6), for an arbitrary flat object of up to 8 keys.
        #[test]
        fn canonical_encoding_stable_under_shuffled_keys(
            pairs in prop::collection::hash_map("[a-z]{1,6}", any::<i32>(), 1..8)
        ) {
            let mut keys: Vec<_> = pairs.keys().cloned().collect();
            let forward: serde_json::Map<String, Value> = keys
                .iter()
                .map(|k| (k.clone(), Value::from(pairs[k])))
                .collect();
            keys.reverse();
            let backward: serde_json::Map<String, Value> = keys
                .iter()
                .map(|k| (k.clone(), Value::from(pairs[k])))
                .collect();
            prop_assert_eq!(
                canonical_bytes(&Value::Object(forward)),
                canonical_bytes(&Value::Object(backward))
            );
        }

        /// `signRequest` followed by `verifyRequest` returns true for any
        /// well-formed payload and timestamp.
        #[test]
        fn sign_then_verify_round_trips(
            device_name in "[a-zA-Z0-9 ]{0,16}",
            secs in 0i64..2_000_000_000i64,
        ) {
            let keypair = libp2p_identity::Keypair::generate_ed25519();
            let payload = identity_payload(&keypair, device_name);
            let from = payload.device_id.clone();
            let to = DeviceId::from("responder");
            let sent_at = Utc.timestamp_opt(secs, 0).unwrap();
            let req = TrustRequest::sign(from, to, payload, sent_at, &keypair).unwrap();
            prop_assert!(req.verify_signature());
        }

        /// any single-bit mutation of the signed bytes makes verification
        /// false.
        #[test]
        fn single_bit_flip_in_signature_breaks_verification(
            byte_idx in 0usize..64,
            bit in 0u8..8,
        ) {
            let keypair = libp2p_identity::Keypair::generate_ed25519();
            let payload = identity_payload(&keypair, "device".to_string());
            let from = payload.device_id.clone();
            let to = DeviceId::from("responder");
            let mut req = TrustRequest::sign(from, to, payload, Utc::now(), &keypair).unwrap();
            let mut sig = BASE64.decode(&req.sig).unwrap();
            let idx = byte_idx % sig.len();
            sig[idx] ^= 1 << bit;
            req.sig = BASE64.encode(sig);
            prop_assert!(!req.verify_signature());
        }
    }
}
