//! Request signing for the private stream and the REST API

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{MarketDataError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Current wall-clock time in milliseconds, used as the auth nonce
pub fn nonce_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// hex(HMAC-SHA256(secret, message))
pub fn hmac_sha256_hex(secret: &str, message: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| MarketDataError::Signing(e.to_string()))?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Signature for the websocket `auth` action: the nonce is signed as its
/// decimal string.
pub fn sign_nonce(secret: &str, nonce: i64) -> Result<String> {
    hmac_sha256_hex(secret, &nonce.to_string())
}

/// Encoded payload and signature headers for a REST call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedPayload {
    pub payload: String,
    pub signature: String,
}

/// base64 the JSON body and sign the encoded form
pub fn sign_payload(body: &serde_json::Value, secret: &str) -> Result<SignedPayload> {
    let json = serde_json::to_vec(body).map_err(|e| MarketDataError::Serialization(e.to_string()))?;
    let payload = STANDARD.encode(json);
    let signature = hmac_sha256_hex(secret, &payload)?;
    Ok(SignedPayload { payload, signature })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hmac_known_vector() {
        let sig = hmac_sha256_hex("key", "The quick brown fox jumps over the lazy dog").unwrap();
        assert_eq!(
            sig,
            "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    #[test]
    fn test_sign_nonce_uses_decimal_string() {
        let nonce = 1_700_000_000_123;
        assert_eq!(
            sign_nonce("secret", nonce).unwrap(),
            hmac_sha256_hex("secret", "1700000000123").unwrap()
        );
    }

    #[test]
    fn test_sign_payload_round_trips_body() {
        let body = serde_json::json!({"nonce": 1, "path": "/api/v2/orders"});
        let signed = sign_payload(&body, "secret").unwrap();

        let decoded = STANDARD.decode(&signed.payload).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(value, body);
        assert_eq!(signed.signature, hmac_sha256_hex("secret", &signed.payload).unwrap());
        assert_eq!(signed.signature.len(), 64);
    }
}
