//! QR pairing payload codec: the base64url-JSON blob a device's pairing QR
//! code carries, decoded by whichever device scans it (spec §6).

use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64_URL;
use base64::Engine;

use crate::identity::DeviceIdentityPayload;

#[derive(Debug, thiserror::Error)]
pub enum PairingCodecError {
    #[error("pairing payload is not valid base64url: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("pairing payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encodes an identity payload for display as a QR code.
pub fn encode_pairing(payload: &DeviceIdentityPayload) -> String {
    let bytes = serde_json::to_vec(payload).expect("identity payload always serializes");
    BASE64_URL.encode(bytes)
}

/// Decodes a scanned QR payload back into an identity payload. Unknown JSON
/// fields are ignored, so payloads from newer devices stay decodable.
pub fn decode_pairing(encoded: &str) -> Result<DeviceIdentityPayload, PairingCodecError> {
    let bytes = BASE64_URL.decode(encoded.trim())?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::DeviceId;
    use chrono::Utc;

    fn sample_payload() -> DeviceIdentityPayload {
        let keypair = libp2p_identity::Keypair::generate_ed25519();
        let public_key = keypair.public();
        DeviceIdentityPayload {
            device_id: DeviceId::from_public_key(&public_key),
            device_name: "laptop".into(),
            public_key: public_key.encode_protobuf(),
            multiaddrs: vec!["/ip4/127.0.0.1/tcp/4001".parse().unwrap()],
            created_at: Utc::now(),
        }
    }

    #[test]
    fn round_trips_through_encode_decode() {
        let payload = sample_payload();
        let decoded = decode_pairing(&encode_pairing(&payload)).unwrap();
        assert_eq!(payload, decoded);
    }

    #[test]
    fn encoded_payload_is_url_safe() {
        let encoded = encode_pairing(&sample_payload());
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));
        assert!(!encoded.contains('='));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode_pairing("not valid base64url!!").is_err());
    }
}
