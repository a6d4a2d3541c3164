//! Node identity and packet cryptography
//!
//! Generates and persists the local node identity (id, alias, signing key
//! pair) and provides the encryption/signing primitives used by the mesh
//! packet envelope: ephemeral X25519 key agreement with XChaCha20-Poly1305
//! payload encryption, and Ed25519 signatures.

pub mod crypto;
pub mod error;
pub mod node;

pub use crypto::{Envelope, MeshCrypto};
pub use error::{IdentityError, IdentityResult};
pub use node::{LocalIdentity, NodeIdentity, NodeKeypair};
