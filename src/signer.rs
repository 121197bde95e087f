//! Canonical record encoding and the pluggable signature capability.

use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use serde::Serialize;

use crate::error::SigningError;

/// Encodes a record as compact JSON with keys sorted at every depth.
///
/// Equal records always produce identical bytes regardless of how the struct
/// fields were declared or populated.
pub fn canonical_bytes<T: Serialize>(record: &T) -> Result<Vec<u8>, SigningError> {
    // serde_json::Map is BTreeMap-backed, so going through Value sorts the keys
    let value = serde_json::to_value(record)?;
    Ok(serde_json::to_vec(&value)?)
}

/// Something that can sign a packet and check its own signatures.
///
/// Implementations range from an in-process software key to a hardware
/// secure element. Callers only ever see these three methods.
pub trait PacketSigner: Send + Sync {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, SigningError>;

    fn verify(&self, message: &[u8], signature: &[u8]) -> bool;

    /// Public half of the key, hex encoded, for registering the device with a collector.
    fn public_key_hex(&self) -> String;
}

/// ECDSA over secp256k1 with deterministic (RFC 6979) nonces.
pub struct Secp256k1Signer {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl Secp256k1Signer {
    pub fn from_hex(private_key_hex: &str) -> Result<Self, SigningError> {
        let bytes = hex::decode(private_key_hex.trim())
            .map_err(|e| SigningError::InvalidKey(format!("not valid hex: {e}")))?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SigningError> {
        if bytes.len() != 32 {
            return Err(SigningError::InvalidKey(format!(
                "expected 32 bytes, got {}",
                bytes.len()
            )));
        }
        let signing_key = SigningKey::from_slice(bytes)
            .map_err(|e| SigningError::InvalidKey(e.to_string()))?;
        let verifying_key = VerifyingKey::from(&signing_key);
        Ok(Self {
            signing_key,
            verifying_key,
        })
    }
}

impl PacketSigner for Secp256k1Signer {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, SigningError> {
        let signature: Signature = self
            .signing_key
            .try_sign(message)
            .map_err(|e| SigningError::Backend(e.to_string()))?;
        Ok(signature.to_bytes().to_vec())
    }

    fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        match Signature::from_slice(signature) {
            Ok(signature) => self.verifying_key.verify(message, &signature).is_ok(),
            Err(_) => false,
        }
    }

    fn public_key_hex(&self) -> String {
        hex::encode(self.verifying_key.to_sec1_bytes())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_derive::Serialize;
    use std::collections::HashMap;

    pub const TEST_KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    #[derive(Serialize)]
    struct Forward {
        alpha: u32,
        beta: &'static str,
        gamma: f64,
    }

    #[derive(Serialize)]
    struct Backward {
        gamma: f64,
        beta: &'static str,
        alpha: u32,
    }

    #[test]
    fn test_canonical_bytes_ignore_field_order() {
        let a = canonical_bytes(&Forward {
            alpha: 1,
            beta: "b",
            gamma: 230.0,
        })
        .unwrap();
        let b = canonical_bytes(&Backward {
            gamma: 230.0,
            beta: "b",
            alpha: 1,
        })
        .unwrap();
        assert_eq!(a, b);
        assert_eq!(
            String::from_utf8(a).unwrap(),
            r#"{"alpha":1,"beta":"b","gamma":230.0}"#
        );
    }

    #[test]
    fn test_canonical_bytes_sort_nested_maps() {
        let mut first = HashMap::new();
        let mut second = HashMap::new();
        for (k, v) in [("zeta", 1), ("eta", 2), ("theta", 3)] {
            first.insert(k, v);
        }
        for (k, v) in [("theta", 3), ("zeta", 1), ("eta", 2)] {
            second.insert(k, v);
        }
        let a = canonical_bytes(&vec![first]).unwrap();
        let b = canonical_bytes(&vec![second]).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            String::from_utf8(a).unwrap(),
            r#"[{"eta":2,"theta":3,"zeta":1}]"#
        );
    }

    #[test]
    fn test_sign_and_verify() {
        let signer = Secp256k1Signer::from_hex(TEST_KEY).unwrap();
        let message = b"{\"energy_wh\":2185}";
        let signature = signer.sign(message).unwrap();

        assert_eq!(signature.len(), 64);
        assert!(signer.verify(message, &signature));
        assert!(!signer.verify(b"{\"energy_wh\":2186}", &signature));

        let mut tampered = signature.clone();
        tampered[10] ^= 0x01;
        assert!(!signer.verify(message, &tampered));
        assert!(!signer.verify(message, &signature[..32]));
    }

    #[test]
    fn test_signatures_are_deterministic() {
        let signer = Secp256k1Signer::from_hex(TEST_KEY).unwrap();
        let a = signer.sign(b"same record").unwrap();
        let b = signer.sign(b"same record").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_other_key_does_not_verify() {
        let signer = Secp256k1Signer::from_hex(TEST_KEY).unwrap();
        let other = Secp256k1Signer::from_hex(&"11".repeat(32)).unwrap();
        let signature = signer.sign(b"record").unwrap();
        assert!(!other.verify(b"record", &signature));
        assert_ne!(signer.public_key_hex(), other.public_key_hex());
    }

    #[test]
    fn test_invalid_keys_are_rejected() {
        assert!(matches!(
            Secp256k1Signer::from_hex("not hex"),
            Err(SigningError::InvalidKey(_))
        ));
        assert!(matches!(
            Secp256k1Signer::from_hex("abcd"),
            Err(SigningError::InvalidKey(_))
        ));
        // Zero is not a valid scalar
        assert!(matches!(
            Secp256k1Signer::from_hex(&"00".repeat(32)),
            Err(SigningError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_public_key_is_compressed_sec1() {
        let signer = Secp256k1Signer::from_hex(TEST_KEY).unwrap();
        let public_key = signer.public_key_hex();
        // 33 bytes, 0x02/0x03 prefix
        assert_eq!(public_key.len(), 66);
        assert!(public_key.starts_with("02") || public_key.starts_with("03"));
    }
}
