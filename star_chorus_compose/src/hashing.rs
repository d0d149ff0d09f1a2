// Content digests.
//
// Every fingerprint in a compose response is SHA-256 over a canonical JSON
// encoding: values go through `serde_json::Value`, whose object map keeps
// keys sorted, so two structurally equal values always hash the same no
// matter how their fields were declared or populated.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Wire prefix on every response digest.
pub const DIGEST_PREFIX: &str = "sha256:";

/// Canonical (sorted-key, compact) JSON encoding.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let value = serde_json::to_value(value)?;
    serde_json::to_string(&value)
}

/// Lowercase hex SHA-256.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// `sha256:<hex>` over raw bytes.
pub fn prefixed_digest(bytes: &[u8]) -> String {
    format!("{DIGEST_PREFIX}{}", sha256_hex(bytes))
}

/// `sha256:<hex>` over the canonical JSON of `value`.
pub fn json_digest<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    Ok(prefixed_digest(canonical_json(value)?.as_bytes()))
}

/// Round to 6 decimals so float noise below that never changes a hash.
pub fn round6(x: f64) -> f64 {
    if x.is_finite() { (x * 1e6).round() / 1e6 } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn known_digest() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(prefixed_digest(b"abc").starts_with("sha256:ba7816bf"));
    }

    #[test]
    fn canonical_json_sorts_keys() {
        let mut a = HashMap::new();
        a.insert("zeta", 1);
        a.insert("alpha", 2);
        a.insert("mid", 3);
        assert_eq!(canonical_json(&a).unwrap(), r#"{"alpha":2,"mid":3,"zeta":1}"#);
    }

    #[test]
    fn json_digest_is_prefixed_and_stable() {
        let d1 = json_digest(&vec![1, 2, 3]).unwrap();
        let d2 = json_digest(&vec![1, 2, 3]).unwrap();
        assert_eq!(d1, d2);
        assert!(d1.starts_with(DIGEST_PREFIX));
        assert_eq!(d1.len(), DIGEST_PREFIX.len() + 64);
        assert_ne!(d1, json_digest(&vec![1, 2, 4]).unwrap());
    }

    #[test]
    fn round6_drops_noise() {
        assert_eq!(round6(0.1 + 0.2), 0.3);
        assert_eq!(round6(f64::NAN), 0.0);
    }
}
