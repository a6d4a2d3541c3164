//! Packet encryption and signature primitives
//!
//! Payloads are encrypted for a recipient's Ed25519 identity key using an
//! ephemeral X25519 key agreement: the recipient key is converted to its
//! Montgomery form, a fresh ephemeral scalar is multiplied against it, and
//! the shared point is hashed into an XChaCha20-Poly1305 key. Signatures are
//! plain Ed25519 over the caller-supplied bytes.

use crate::error::{IdentityError, IdentityResult};
use crate::node::NodeKeypair;
use chacha20poly1305::{
    aead::{Aead, NewAead},
    Key, XChaCha20Poly1305, XNonce,
};
use curve25519_dalek::constants::X25519_BASEPOINT;
use curve25519_dalek::edwards::CompressedEdwardsY;
use curve25519_dalek::montgomery::MontgomeryPoint;
use curve25519_dalek::scalar::Scalar;
use ed25519_dalek::{ExpandedSecretKey, PublicKey, Signature, Verifier};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

/// Sealed payload produced by [`MeshCrypto::encrypt`]
///
/// Carries everything the recipient needs besides their own secret key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Ephemeral X25519 public key (Montgomery u-coordinate)
    pub ephemeral_public: [u8; 32],
    /// XChaCha20-Poly1305 nonce
    pub nonce: [u8; 24],
    /// Ciphertext with appended auth tag
    pub ciphertext: Vec<u8>,
}

/// Encryption and signing collaborator for mesh packets
pub struct MeshCrypto;

impl MeshCrypto {
    /// Convert an Ed25519 public key to Curve25519 Montgomery form
    ///
    /// Key agreement runs on the Montgomery curve while identities sign on
    /// edwards25519, so recipient keys are converted before the multiply.
    pub fn ed25519_to_curve25519(ed_pk: &[u8; 32]) -> IdentityResult<[u8; 32]> {
        let compressed = CompressedEdwardsY(*ed_pk);
        let edwards_point = compressed
            .decompress()
            .ok_or_else(|| IdentityError::InvalidCurvePoint("invalid Ed25519 public key".into()))?;

        Ok(edwards_point.to_montgomery().to_bytes())
    }

    /// Encrypt a plaintext for the holder of `recipient_public`
    ///
    /// Generates a fresh ephemeral scalar per call; the same plaintext never
    /// produces the same envelope twice.
    pub fn encrypt(plaintext: &[u8], recipient_public: &[u8; 32]) -> IdentityResult<Envelope> {
        let recipient_montgomery = Self::ed25519_to_curve25519(recipient_public)?;

        let mut ephemeral_bytes = [0u8; 32];
        let mut nonce = [0u8; 24];
        {
            use rand::RngCore;
            let mut rng = rand::rngs::OsRng;
            rng.fill_bytes(&mut ephemeral_bytes);
            rng.fill_bytes(&mut nonce);
        }

        let ephemeral_scalar = Scalar::from_bytes_mod_order(ephemeral_bytes);
        ephemeral_bytes.zeroize();

        let ephemeral_public = (ephemeral_scalar * X25519_BASEPOINT).to_bytes();
        let shared_point = ephemeral_scalar * MontgomeryPoint(recipient_montgomery);

        let key = derive_symmetric_key(&shared_point.to_bytes());
        let cipher = XChaCha20Poly1305::new(Key::from_slice(&key));
        let ciphertext = cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext)
            .map_err(|e| IdentityError::EncryptionFailed(e.to_string()))?;

        Ok(Envelope {
            ephemeral_public,
            nonce,
            ciphertext,
        })
    }

    /// Decrypt an envelope addressed to `keypair`
    ///
    /// Fails with [`IdentityError::DecryptionFailed`] on auth-tag mismatch,
    /// which callers treat as a silently-dropped packet.
    pub fn decrypt(envelope: &Envelope, keypair: &NodeKeypair) -> IdentityResult<Vec<u8>> {
        // The ECDH scalar for an Ed25519 identity is the clamped first half
        // of the expanded secret key.
        let expanded = ExpandedSecretKey::from(&keypair.dalek().secret);
        let expanded_bytes = expanded.to_bytes();
        let mut scalar_bytes = [0u8; 32];
        scalar_bytes.copy_from_slice(&expanded_bytes[..32]);

        let scalar = Scalar::from_bytes_mod_order(scalar_bytes);
        scalar_bytes.zeroize();

        let shared_point = scalar * MontgomeryPoint(envelope.ephemeral_public);
        let key = derive_symmetric_key(&shared_point.to_bytes());

        let cipher = XChaCha20Poly1305::new(Key::from_slice(&key));
        cipher
            .decrypt(XNonce::from_slice(&envelope.nonce), envelope.ciphertext.as_ref())
            .map_err(|e| IdentityError::DecryptionFailed(e.to_string()))
    }

    /// Verify a detached Ed25519 signature
    ///
    /// Total: malformed keys or signatures verify as `false` rather than
    /// erroring, since the caller's response is the same either way.
    pub fn verify(message: &[u8], signature: &[u8], public_key: &[u8]) -> bool {
        let public = match PublicKey::from_bytes(public_key) {
            Ok(pk) => pk,
            Err(_) => return false,
        };
        let signature = match Signature::from_bytes(signature) {
            Ok(sig) => sig,
            Err(_) => return false,
        };

        public.verify(message, &signature).is_ok()
    }
}

fn derive_symmetric_key(shared_secret: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(shared_secret);
    let hash = hasher.finalize();

    let mut key = [0u8; 32];
    key.copy_from_slice(&hash);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let recipient = NodeKeypair::generate().unwrap();
        let plaintext = b"offline transfer: 1.5 SOL";

        let envelope = MeshCrypto::encrypt(plaintext, &recipient.public_bytes()).unwrap();
        let decrypted = MeshCrypto::decrypt(&envelope, &recipient).unwrap();

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_decrypt_with_wrong_key_fails() {
        let recipient = NodeKeypair::generate().unwrap();
        let other = NodeKeypair::generate().unwrap();

        let envelope = MeshCrypto::encrypt(b"secret", &recipient.public_bytes()).unwrap();
        let result = MeshCrypto::decrypt(&envelope, &other);

        assert!(matches!(result, Err(IdentityError::DecryptionFailed(_))));
    }

    #[test]
    fn test_tampered_ciphertext_fails_auth() {
        let recipient = NodeKeypair::generate().unwrap();

        let mut envelope = MeshCrypto::encrypt(b"secret", &recipient.public_bytes()).unwrap();
        envelope.ciphertext[0] ^= 0xFF;

        assert!(MeshCrypto::decrypt(&envelope, &recipient).is_err());
    }

    #[test]
    fn test_envelopes_are_unique_per_call() {
        let recipient = NodeKeypair::generate().unwrap();

        let a = MeshCrypto::encrypt(b"same plaintext", &recipient.public_bytes()).unwrap();
        let b = MeshCrypto::encrypt(b"same plaintext", &recipient.public_bytes()).unwrap();

        assert_ne!(a.ephemeral_public, b.ephemeral_public);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_invalid_recipient_key_rejected() {
        // Not a valid edwards25519 point encoding
        let bogus = [0xFFu8; 32];
        let result = MeshCrypto::encrypt(b"data", &bogus);
        assert!(matches!(result, Err(IdentityError::InvalidCurvePoint(_))));
    }

    #[test]
    fn test_verify_rejects_malformed_inputs() {
        let keypair = NodeKeypair::generate().unwrap();
        let signature = keypair.sign(b"msg");

        assert!(!MeshCrypto::verify(b"msg", &signature[..10], &keypair.public_bytes()));
        assert!(!MeshCrypto::verify(b"msg", &signature, &[0u8; 5]));
    }

    #[test]
    fn test_envelope_serde_round_trip() {
        let recipient = NodeKeypair::generate().unwrap();
        let envelope = MeshCrypto::encrypt(b"payload", &recipient.public_bytes()).unwrap();

        let json = serde_json::to_string(&envelope).unwrap();
        let restored: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(envelope, restored);
    }
}
