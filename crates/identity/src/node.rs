//! Local node identity management

use crate::error::{IdentityError, IdentityResult};
use chrono::{DateTime, Utc};
use ed25519_dalek::{Keypair, PublicKey, SecretKey, Signer};
use serde::{Deserialize, Serialize};
use shared::storage::{get_json, put_json};
use shared::{keys, KvStore};
use tracing::{debug, info};
use zeroize::Zeroize;

/// Ed25519 signing key pair for the local node
///
/// Wraps the dalek key pair so the rest of the workspace never touches raw
/// key material directly.
pub struct NodeKeypair {
    inner: Keypair,
}

impl NodeKeypair {
    /// Generate a fresh key pair
    pub fn generate() -> IdentityResult<Self> {
        let mut secret_bytes = [0u8; 32];

        use rand::RngCore;
        rand::rngs::OsRng.fill_bytes(&mut secret_bytes);

        let keypair = Self::from_secret_bytes(&secret_bytes);
        secret_bytes.zeroize();
        keypair
    }

    /// Reconstruct a key pair from 32 secret bytes
    pub fn from_secret_bytes(bytes: &[u8]) -> IdentityResult<Self> {
        let secret = SecretKey::from_bytes(bytes)
            .map_err(|e| IdentityError::InvalidKeyFormat(format!("secret key: {}", e)))?;
        let public: PublicKey = (&secret).into();

        Ok(Self {
            inner: Keypair { secret, public },
        })
    }

    /// The 32 public key bytes
    pub fn public_bytes(&self) -> [u8; 32] {
        self.inner.public.to_bytes()
    }

    /// The 32 secret key bytes; callers must zeroize their copy when done
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.inner.secret.to_bytes()
    }

    /// Sign a message, returning the 64-byte detached signature
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.inner.sign(message).to_bytes()
    }

    pub(crate) fn dalek(&self) -> &Keypair {
        &self.inner
    }
}

impl std::fmt::Debug for NodeKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Secret material never appears in debug output
        f.debug_struct("NodeKeypair")
            .field("public", &bs58::encode(self.public_bytes()).into_string())
            .finish()
    }
}

/// Public identity of a mesh node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeIdentity {
    /// Stable node identifier: base58 of the public key
    pub id: String,
    /// Human-readable alias advertised to nearby peers
    pub alias: String,
    /// Ed25519 public key bytes
    pub public_key: [u8; 32],
    pub created_at: DateTime<Utc>,
}

/// Persisted identity record, including secret key material
///
/// Encryption at rest is the storage collaborator's responsibility; this core
/// only guarantees a stable round-trip.
#[derive(Serialize, Deserialize)]
struct StoredIdentity {
    id: String,
    alias: String,
    secret_key: [u8; 32],
    public_key: [u8; 32],
    created_at: DateTime<Utc>,
}

impl Drop for StoredIdentity {
    fn drop(&mut self) {
        self.secret_key.zeroize();
    }
}

/// The local node: public identity plus its signing key pair
pub struct LocalIdentity {
    pub identity: NodeIdentity,
    pub keypair: NodeKeypair,
}

impl LocalIdentity {
    /// Load the persisted identity, or generate and persist a new one
    ///
    /// Identity is created once per installation and is immutable except for
    /// the alias.
    pub async fn load_or_generate(store: &dyn KvStore, default_alias: &str) -> IdentityResult<Self> {
        if let Some(stored) = get_json::<StoredIdentity>(store, keys::MESH_IDENTITY).await? {
            debug!("Loaded existing mesh identity {}", stored.id);
            let keypair = NodeKeypair::from_secret_bytes(&stored.secret_key)?;

            return Ok(Self {
                identity: NodeIdentity {
                    id: stored.id.clone(),
                    alias: stored.alias.clone(),
                    public_key: stored.public_key,
                    created_at: stored.created_at,
                },
                keypair,
            });
        }

        let keypair = NodeKeypair::generate()?;
        let public_key = keypair.public_bytes();
        let id = bs58::encode(public_key).into_string();

        let identity = NodeIdentity {
            id: id.clone(),
            alias: default_alias.to_string(),
            public_key,
            created_at: Utc::now(),
        };

        let local = Self { identity, keypair };
        local.persist(store).await?;

        info!("Generated new mesh identity {}", id);
        Ok(local)
    }

    /// Update the advertised alias and persist the change
    pub async fn set_alias(&mut self, store: &dyn KvStore, alias: &str) -> IdentityResult<()> {
        self.identity.alias = alias.to_string();
        self.persist(store).await
    }

    async fn persist(&self, store: &dyn KvStore) -> IdentityResult<()> {
        let stored = StoredIdentity {
            id: self.identity.id.clone(),
            alias: self.identity.alias.clone(),
            secret_key: self.keypair.secret_bytes(),
            public_key: self.identity.public_key,
            created_at: self.identity.created_at,
        };

        put_json(store, keys::MESH_IDENTITY, &stored).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::MeshCrypto;
    use shared::MemoryKvStore;

    #[test]
    fn test_keypair_sign_verify() {
        let keypair = NodeKeypair::generate().unwrap();
        let message = b"zone announcement";

        let signature = keypair.sign(message);
        assert!(MeshCrypto::verify(message, &signature, &keypair.public_bytes()));

        // A different message must not verify
        assert!(!MeshCrypto::verify(b"other", &signature, &keypair.public_bytes()));
    }

    #[test]
    fn test_keypair_round_trip_through_secret_bytes() {
        let keypair = NodeKeypair::generate().unwrap();
        let restored = NodeKeypair::from_secret_bytes(&keypair.secret_bytes()).unwrap();
        assert_eq!(keypair.public_bytes(), restored.public_bytes());
    }

    #[tokio::test]
    async fn test_load_or_generate_persists_identity() {
        let store = MemoryKvStore::new();

        let first = LocalIdentity::load_or_generate(&store, "alice").await.unwrap();
        let second = LocalIdentity::load_or_generate(&store, "ignored").await.unwrap();

        assert_eq!(first.identity.id, second.identity.id);
        assert_eq!(second.identity.alias, "alice");
        assert_eq!(first.keypair.public_bytes(), second.keypair.public_bytes());
    }

    #[tokio::test]
    async fn test_set_alias_persists() {
        let store = MemoryKvStore::new();

        let mut local = LocalIdentity::load_or_generate(&store, "alice").await.unwrap();
        local.set_alias(&store, "alice-phone").await.unwrap();

        let reloaded = LocalIdentity::load_or_generate(&store, "other").await.unwrap();
        assert_eq!(reloaded.identity.alias, "alice-phone");
    }

    #[test]
    fn test_node_id_is_base58_of_public_key() {
        let keypair = NodeKeypair::generate().unwrap();
        let id = bs58::encode(keypair.public_bytes()).into_string();
        let decoded = bs58::decode(&id).into_vec().unwrap();
        assert_eq!(decoded, keypair.public_bytes());
    }
}
