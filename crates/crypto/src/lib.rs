//! circlevault-crypto: key management engine for circlevault.
//!
//! Provides the algorithm catalog, destructible key wrappers, the stateless
//! crypto engine (generation, symmetric and sealed-envelope encryption,
//! Ed25519 signatures, checksums, charset conversion), Base64 armoring of
//! key material, and the in-memory MasterKey that seals IVs and salts.

pub mod algorithm;
pub mod armor;
pub mod engine;
pub mod error;
pub mod keys;
pub mod master_key;
pub mod settings;

pub use algorithm::{Algorithm, AlgorithmKind};
pub use engine::Crypto;
pub use error::CryptoError;
pub use keys::{IVSalt, KeyRef, PrivateKeyMaterial, PublicKeyMaterial, SecretKeyMaterial};
pub use master_key::{MasterKey, MasterKeyHolder, MasterKeyState};
pub use settings::{Charset, CryptoSettings, PbeParams};
