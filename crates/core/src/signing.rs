//! Webhook signing keys and HMAC payload signatures.
//!
//! Receivers verify a delivery by recomputing HMAC-SHA256 over the raw
//! request body with their copy of the endpoint's signing key and comparing
//! it with the [`SIGNATURE_HEADER`] value.

use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Header carrying the hex-encoded payload signature.
pub const SIGNATURE_HEADER: &str = "X-Abacus-Signature";

/// Prefix of generated signing keys.
pub const SIGNING_KEY_PREFIX: &str = "wk_";

/// Random bytes in a generated signing key (hex-encoded after the prefix).
pub const SIGNING_KEY_BYTES: usize = 16;

// ---------------------------------------------------------------------------
// Signing keys
// ---------------------------------------------------------------------------

/// Generate a new signing key, e.g. `wk_3f9a…` (32 hex chars).
///
/// Keys are never updated in place; rotating one means deleting the endpoint
/// and registering it again.
pub fn generate_signing_key() -> String {
    let bytes: [u8; SIGNING_KEY_BYTES] = rand::rng().random();
    format!("{SIGNING_KEY_PREFIX}{}", hex::encode(bytes))
}

// ---------------------------------------------------------------------------
// HMAC signing
// ---------------------------------------------------------------------------

type HmacSha256 = Hmac<Sha256>;

/// Compute the hex HMAC-SHA256 of `payload` under `signing_key`.
pub fn sign_payload(signing_key: &str, payload: &[u8]) -> String {
    let mut mac = mac_for(signing_key);
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time check of a received signature.
pub fn verify_signature(signing_key: &str, payload: &[u8], signature: &str) -> bool {
    let Some(expected) = hex::decode(signature) else {
        return false;
    };
    let mut mac = mac_for(signing_key);
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

fn mac_for(signing_key: &str) -> HmacSha256 {
    // HMAC is defined for keys of any length; `new_from_slice` cannot fail.
    match HmacSha256::new_from_slice(signing_key.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC accepts any key length"),
    }
}

// ---------------------------------------------------------------------------
// hex encoding helper (no extra dep)
// ---------------------------------------------------------------------------

mod hex {
    /// Encode bytes as a lowercase hex string.
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }

    pub fn decode(s: &str) -> Option<Vec<u8>> {
        if s.len() % 2 != 0 {
            return None;
        }
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
            .collect()
    }
}
