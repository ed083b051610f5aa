//! MasterKey management for circlevault-crypto.
//!
//! The MasterKey seals every record IV and member salt at rest. It lives only
//! in memory: it is derived at startup either from the system salt alone
//! (`Default`) or from an operator secret combined with the system salt
//! (`Custom`), and is never written to storage.

use std::sync::{Arc, RwLock};

use circlevault_shared::constants::IV_SALT_LENGTH;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::algorithm::Algorithm;
use crate::armor::{armor, dearmor};
use crate::engine::Crypto;
use crate::error::CryptoError;
use crate::keys::{IVSalt, SecretKeyMaterial};
use crate::settings::PbeParams;

/// Derivation parameters for the MasterKey. Fixed per deployment: changing
/// them has the same effect as changing the system salt.
pub const MASTER_KEY_PBE: PbeParams = PbeParams {
    algorithm: Algorithm::Pbe256,
    iterations: 3,
    memory_kib: 19456,
};

const SALT_DOMAIN: &[u8] = b"circlevault-system-salt-v1";

/// How the current MasterKey was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterKeyState {
    Unset,
    Default,
    Custom,
}

/// The in-memory root key. Key bytes are wiped on drop.
pub struct MasterKey {
    key: SecretKeyMaterial,
    crypto: Crypto,
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl MasterKey {
    /// Derive the MasterKey from `secret` and the system salt.
    pub fn derive(
        crypto: &Crypto,
        params: &PbeParams,
        secret: &[u8],
        system_salt: &str,
    ) -> Result<MasterKey, CryptoError> {
        if system_salt.is_empty() {
            return Err(CryptoError::Setting("system salt must not be empty".into()));
        }
        let salt = system_salt_iv(system_salt)?;
        let key = crypto.derive_password_key(params, secret, &salt)?;
        Ok(MasterKey {
            key,
            crypto: crypto.clone(),
        })
    }

    /// Default MasterKey: the system salt doubles as the secret.
    pub fn derive_default(
        crypto: &Crypto,
        params: &PbeParams,
        system_salt: &str,
    ) -> Result<MasterKey, CryptoError> {
        Self::derive(crypto, params, system_salt.as_bytes(), system_salt)
    }

    /// Encrypt under a fresh random nonce; output is `armor(nonce || ciphertext)`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
        let nonce = IVSalt::random();
        let ciphertext = self.crypto.encrypt_with_iv(&self.key, &nonce, plaintext)?;
        let mut sealed = Vec::with_capacity(IV_SALT_LENGTH + ciphertext.len());
        sealed.extend_from_slice(nonce.as_bytes());
        sealed.extend_from_slice(&ciphertext);
        Ok(armor(&sealed))
    }

    pub fn open(&self, armored: &str) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let sealed = dearmor(armored)?;
        if sealed.len() < IV_SALT_LENGTH {
            return Err(CryptoError::DecryptionFailed("sealed value too short".into()));
        }
        let (nonce, ciphertext) = sealed.split_at(IV_SALT_LENGTH);
        let nonce = IVSalt::from_slice(nonce)?;
        Ok(Zeroizing::new(self.crypto.decrypt_with_iv(&self.key, &nonce, ciphertext)?))
    }

    pub fn seal_salt(&self, salt: &IVSalt) -> Result<String, CryptoError> {
        self.seal(salt.as_bytes())
    }

    pub fn open_salt(&self, armored: &str) -> Result<IVSalt, CryptoError> {
        IVSalt::from_slice(&self.open(armored)?)
    }
}

/// 16-byte Argon2 salt derived from the free-form system salt setting.
fn system_salt_iv(system_salt: &str) -> Result<IVSalt, CryptoError> {
    let mut hasher = Sha256::new();
    hasher.update(SALT_DOMAIN);
    hasher.update(system_salt.as_bytes());
    let digest = hasher.finalize();
    IVSalt::from_slice(&digest[..16])
}

/// Process-wide holder. Keys are fully derived before the write lock is
/// taken, so readers see either the previous key or the new one.
#[derive(Debug, Default)]
pub struct MasterKeyHolder {
    inner: RwLock<Option<(MasterKeyState, Arc<MasterKey>)>>,
}

impl MasterKeyHolder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MasterKeyState {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        guard
            .as_ref()
            .map(|(state, _)| *state)
            .unwrap_or(MasterKeyState::Unset)
    }

    pub fn current(&self) -> Result<Arc<MasterKey>, CryptoError> {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        guard
            .as_ref()
            .map(|(_, key)| Arc::clone(key))
            .ok_or_else(|| CryptoError::MasterKeyUnavailable("master key has not been established".into()))
    }

    /// Install a default key. Refused once a custom key is active, since
    /// that would silently downgrade every sealed value.
    pub fn install_default(&self, key: MasterKey) -> Result<(), CryptoError> {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if matches!(guard.as_ref(), Some((MasterKeyState::Custom, _))) {
            return Err(CryptoError::Setting(
                "cannot replace a custom master key with the default key".into(),
            ));
        }
        *guard = Some((MasterKeyState::Default, Arc::new(key)));
        tracing::info!("default master key installed");
        Ok(())
    }

    pub fn install_custom(&self, key: MasterKey) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some((MasterKeyState::Custom, Arc::new(key)));
        tracing::info!("custom master key installed");
    }
}
