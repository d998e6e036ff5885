use mixcoin_core::types::{ServicePubKey, Warrant};
use pqcrypto_dilithium::dilithium2;
use pqcrypto_traits::sign::{DetachedSignature, PublicKey, SecretKey};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid public key length: expected {expected}, got {got}")]
    InvalidPublicKeyLength { expected: usize, got: usize },
}

/// Sign `message` with the service's Dilithium2 secret key.
/// Returns a detached signature — the warrant bytes.
pub fn sign(secret_key_bytes: &[u8], message: &[u8]) -> Result<Warrant, SignatureError> {
    let sk = dilithium2::SecretKey::from_bytes(secret_key_bytes)
        .map_err(|_| SignatureError::InvalidSignature)?;
    let sig = dilithium2::detached_sign(message, &sk);
    Ok(Warrant(sig.as_bytes().to_vec()))
}

/// Verify a detached warrant signature against the service public key.
pub fn verify_signature(
    public_key: &ServicePubKey,
    message: &[u8],
    warrant: &Warrant,
) -> Result<(), SignatureError> {
    let pk = dilithium2::PublicKey::from_bytes(&public_key.0).map_err(|_| {
        SignatureError::InvalidPublicKeyLength {
            expected: dilithium2::public_key_bytes(),
            got: public_key.0.len(),
        }
    })?;
    let sig = dilithium2::DetachedSignature::from_bytes(&warrant.0)
        .map_err(|_| SignatureError::InvalidSignature)?;
    dilithium2::verify_detached_signature(&sig, message, &pk)
        .map_err(|_| SignatureError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pqcrypto_dilithium::dilithium2;
    use pqcrypto_traits::sign::{PublicKey, SecretKey};

    #[test]
    fn sign_verify_round_trip() {
        let (pk, sk) = dilithium2::keypair();
        let pk_bytes = ServicePubKey(pk.as_bytes().to_vec());
        let message = b"mixing terms for one chunk";

        let warrant = sign(sk.as_bytes(), message).unwrap();
        assert!(verify_signature(&pk_bytes, message, &warrant).is_ok());
    }

    #[test]
    fn tampered_message_fails() {
        let (pk, sk) = dilithium2::keypair();
        let pk_bytes = ServicePubKey(pk.as_bytes().to_vec());
        let warrant = sign(sk.as_bytes(), b"original terms").unwrap();
        assert!(verify_signature(&pk_bytes, b"altered terms", &warrant).is_err());
    }

    #[test]
    fn wrong_key_fails() {
        let (_, sk) = dilithium2::keypair();
        let (other_pk, _) = dilithium2::keypair();
        let warrant = sign(sk.as_bytes(), b"terms").unwrap();
        let other = ServicePubKey(other_pk.as_bytes().to_vec());
        assert!(verify_signature(&other, b"terms", &warrant).is_err());
    }
}
