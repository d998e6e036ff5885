use mixcoin_core::types::{ServicePubKey, Warrant};
use pqcrypto_dilithium::dilithium2;
use pqcrypto_traits::sign::{PublicKey, SecretKey};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// The service's long-term warrant key: Dilithium2 public + secret keys.
///
/// The secret key bytes are wiped on drop. Clients keep the public key to
/// verify warrants; losing the secret key means future warrants cannot be
/// issued, so the daemon persists it to the data directory on first run.
#[derive(Serialize, Deserialize)]
pub struct ServiceKey {
    pub public_key: ServicePubKey,
    secret_key: Vec<u8>,
}

impl ServiceKey {
    /// Generate a fresh Dilithium2 keypair.
    pub fn generate() -> Self {
        let (pk, sk) = dilithium2::keypair();
        Self {
            public_key: ServicePubKey(pk.as_bytes().to_vec()),
            secret_key: sk.as_bytes().to_vec(),
        }
    }

    /// Sign `message` — the canonical request digest — producing a warrant.
    pub fn sign(&self, message: &[u8]) -> Warrant {
        let sk = Zeroizing::new(self.secret_key.clone());
        crate::dilithium::sign(&sk, message).expect("sign with valid secret key is infallible")
    }

    /// Restore a ServiceKey from raw bytes (e.g. loaded from the key file).
    pub fn from_raw(pk_bytes: Vec<u8>, sk_bytes: Vec<u8>) -> Self {
        Self {
            public_key: ServicePubKey(pk_bytes),
            secret_key: sk_bytes,
        }
    }
}

impl Drop for ServiceKey {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.secret_key.zeroize();
    }
}

impl std::fmt::Debug for ServiceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ServiceKey {{ public_key: {:?} }}", self.public_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dilithium::verify_signature;

    #[test]
    fn generated_key_signs_verifiable_warrants() {
        let key = ServiceKey::generate();
        let warrant = key.sign(b"digest");
        assert!(verify_signature(&key.public_key, b"digest", &warrant).is_ok());
    }

    #[test]
    fn from_raw_round_trips_through_serde() {
        let key = ServiceKey::generate();
        let json = serde_json::to_string(&key).unwrap();
        let restored: ServiceKey = serde_json::from_str(&json).unwrap();
        let warrant = restored.sign(b"digest");
        assert!(verify_signature(&key.public_key, b"digest", &warrant).is_ok());
    }
}
