//! Key wrappers with explicit destruction.
//!
//! Each wrapper owns its key bytes exclusively, zeroizes them on `destroy()`
//! and on drop, and refuses every further use once destroyed.

use base64::Engine;
use rand::RngCore;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, Zeroizing};

use circlevault_shared::constants::IV_SALT_LENGTH;

use crate::algorithm::Algorithm;
use crate::error::CryptoError;

const B64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// A 16-byte initialization vector or salt.
#[derive(Clone, PartialEq, Eq, Zeroize)]
pub struct IVSalt([u8; IV_SALT_LENGTH]);

impl std::fmt::Debug for IVSalt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("IVSalt").field(&"[REDACTED]").finish()
    }
}

impl IVSalt {
    pub fn random() -> Self {
        let mut bytes = [0u8; IV_SALT_LENGTH];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; IV_SALT_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let array: [u8; IV_SALT_LENGTH] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKey(format!(
                "IV/salt must be {IV_SALT_LENGTH} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; IV_SALT_LENGTH] {
        &self.0
    }

    /// Base64 form used in storage.
    pub fn armored(&self) -> String {
        B64.encode(self.0)
    }

    /// Strict inverse of [`IVSalt::armored`]. Non-Base64 input is an error,
    /// never reinterpreted as raw text.
    pub fn from_armored(armored: &str) -> Result<Self, CryptoError> {
        let bytes = Zeroizing::new(B64.decode(armored.trim())?);
        Self::from_slice(&bytes)
    }

    /// Reads the legacy representation, where the salt was stored as raw
    /// UTF-8 text. Only for the one-time migration to the armored form.
    pub fn from_legacy_text(text: &str) -> Result<Self, CryptoError> {
        Self::from_slice(text.as_bytes())
    }
}

/// A symmetric key, optionally carrying the IV it is used with.
pub struct SecretKeyMaterial {
    algorithm: Algorithm,
    key: Zeroizing<Vec<u8>>,
    salt: Option<IVSalt>,
    destroyed: bool,
}

impl std::fmt::Debug for SecretKeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretKeyMaterial")
            .field("algorithm", &self.algorithm)
            .field("key", &"[REDACTED]")
            .field("has_salt", &self.salt.is_some())
            .field("destroyed", &self.destroyed)
            .finish()
    }
}

impl SecretKeyMaterial {
    pub(crate) fn new(algorithm: Algorithm, key: Zeroizing<Vec<u8>>, salt: Option<IVSalt>) -> Self {
        Self {
            algorithm,
            key,
            salt,
            destroyed: false,
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn salt(&self) -> Option<&IVSalt> {
        self.salt.as_ref()
    }

    /// Attach the IV of the record this key will encrypt or decrypt.
    pub fn with_salt(mut self, salt: IVSalt) -> Self {
        self.salt = Some(salt);
        self
    }

    pub fn set_salt(&mut self, salt: IVSalt) {
        self.salt = Some(salt);
    }

    pub(crate) fn bytes(&self) -> Result<&[u8], CryptoError> {
        if self.destroyed {
            tracing::error!(algorithm = %self.algorithm, "use of destroyed secret key");
            return Err(CryptoError::KeyDestroyed("secret"));
        }
        Ok(&self.key)
    }

    /// Overwrite the key bytes. Idempotent.
    pub fn destroy(&mut self) {
        if !self.destroyed {
            self.key.zeroize();
            if let Some(salt) = self.salt.as_mut() {
                salt.zeroize();
            }
            self.destroyed = true;
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}

/// An Ed25519 verifying key; also receives sealed envelopes via its X25519 form.
pub struct PublicKeyMaterial {
    algorithm: Algorithm,
    key: [u8; 32],
    destroyed: bool,
}

impl std::fmt::Debug for PublicKeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicKeyMaterial")
            .field("algorithm", &self.algorithm)
            .field("destroyed", &self.destroyed)
            .finish()
    }
}

impl PartialEq for PublicKeyMaterial {
    fn eq(&self, other: &Self) -> bool {
        self.algorithm == other.algorithm
            && self.destroyed == other.destroyed
            && self.key == other.key
    }
}

impl PublicKeyMaterial {
    pub(crate) fn new(algorithm: Algorithm, key: [u8; 32]) -> Self {
        Self {
            algorithm,
            key,
            destroyed: false,
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub(crate) fn bytes(&self) -> Result<&[u8; 32], CryptoError> {
        if self.destroyed {
            tracing::error!(algorithm = %self.algorithm, "use of destroyed public key");
            return Err(CryptoError::KeyDestroyed("public"));
        }
        Ok(&self.key)
    }

    pub fn destroy(&mut self) {
        if !self.destroyed {
            self.key.zeroize();
            self.destroyed = true;
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}

impl Drop for PublicKeyMaterial {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// An Ed25519 signing seed; opens sealed envelopes via its X25519 form.
pub struct PrivateKeyMaterial {
    algorithm: Algorithm,
    seed: Zeroizing<[u8; 32]>,
    destroyed: bool,
}

impl std::fmt::Debug for PrivateKeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKeyMaterial")
            .field("algorithm", &self.algorithm)
            .field("seed", &"[REDACTED]")
            .field("destroyed", &self.destroyed)
            .finish()
    }
}

impl PartialEq for PrivateKeyMaterial {
    fn eq(&self, other: &Self) -> bool {
        self.algorithm == other.algorithm
            && self.destroyed == other.destroyed
            && bool::from(self.seed.as_ref().ct_eq(other.seed.as_ref()))
    }
}

impl PrivateKeyMaterial {
    pub(crate) fn new(algorithm: Algorithm, seed: Zeroizing<[u8; 32]>) -> Self {
        Self {
            algorithm,
            seed,
            destroyed: false,
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub(crate) fn seed(&self) -> Result<&[u8; 32], CryptoError> {
        if self.destroyed {
            tracing::error!(algorithm = %self.algorithm, "use of destroyed private key");
            return Err(CryptoError::KeyDestroyed("private"));
        }
        Ok(&self.seed)
    }

    pub fn destroy(&mut self) {
        if !self.destroyed {
            self.seed.zeroize();
            self.destroyed = true;
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}

/// Borrowed view over any key wrapper, so one `encrypt`/`decrypt` entry
/// point can reject the wrong kind of key with a precise error.
#[derive(Debug, Clone, Copy)]
pub enum KeyRef<'a> {
    Secret(&'a SecretKeyMaterial),
    Public(&'a PublicKeyMaterial),
    Private(&'a PrivateKeyMaterial),
}

impl KeyRef<'_> {
    pub fn describe(&self) -> &'static str {
        match self {
            KeyRef::Secret(_) => "secret",
            KeyRef::Public(_) => "public",
            KeyRef::Private(_) => "private",
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        match self {
            KeyRef::Secret(k) => k.algorithm(),
            KeyRef::Public(k) => k.algorithm(),
            KeyRef::Private(k) => k.algorithm(),
        }
    }
}

impl<'a> From<&'a SecretKeyMaterial> for KeyRef<'a> {
    fn from(key: &'a SecretKeyMaterial) -> Self {
        KeyRef::Secret(key)
    }
}

impl<'a> From<&'a PublicKeyMaterial> for KeyRef<'a> {
    fn from(key: &'a PublicKeyMaterial) -> Self {
        KeyRef::Public(key)
    }
}

impl<'a> From<&'a PrivateKeyMaterial> for KeyRef<'a> {
    fn from(key: &'a PrivateKeyMaterial) -> Self {
        KeyRef::Private(key)
    }
}
