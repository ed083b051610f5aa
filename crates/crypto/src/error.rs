//! Error types for the circlevault-crypto crate.

use thiserror::Error;

use crate::algorithm::AlgorithmKind;

/// Errors that can occur during cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// An algorithm was used in a slot that requires a different kind.
    #[error("algorithm {algorithm} is {actual}, but {expected} is required")]
    AlgorithmMismatch {
        algorithm: &'static str,
        expected: AlgorithmKind,
        actual: AlgorithmKind,
    },

    /// The key type cannot perform the requested operation.
    #[error("key mismatch: {0}")]
    KeyMismatch(String),

    /// The key was destroyed before use.
    #[error("{0} key has been destroyed")]
    KeyDestroyed(&'static str),

    /// The provided key material is invalid (wrong length, malformed, missing IV).
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Key or key pair generation failed.
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption failed (wrong key, tampered ciphertext, etc.).
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// Armored text could not be decoded back into key material.
    #[error("armor error: {0}")]
    Armor(String),

    /// Invalid value in crypto settings (charset, algorithm slot).
    #[error("setting error: {0}")]
    Setting(String),

    /// No catalog entry carries this name.
    #[error("unknown algorithm: {0}")]
    UnknownAlgorithm(String),

    /// The MasterKey has not been established yet.
    #[error("master key unavailable: {0}")]
    MasterKeyUnavailable(String),
}

impl CryptoError {
    /// True for failures caused by configuration rather than key material.
    pub fn is_setting_error(&self) -> bool {
        matches!(self, CryptoError::Setting(_) | CryptoError::UnknownAlgorithm(_))
    }
}

impl From<CryptoError> for circlevault_shared::error::VaultError {
    fn from(err: CryptoError) -> Self {
        use circlevault_shared::error::VaultError;
        match err {
            CryptoError::Setting(_) | CryptoError::UnknownAlgorithm(_) => {
                VaultError::Setting(err.to_string())
            }
            CryptoError::MasterKeyUnavailable(_) => VaultError::NotReady(err.to_string()),
            other => VaultError::Crypto(other.to_string()),
        }
    }
}

impl From<base64::DecodeError> for CryptoError {
    fn from(err: base64::DecodeError) -> Self {
        CryptoError::Armor(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use circlevault_shared::error::{ReturnCode, VaultError};

    #[test]
    fn display_messages_are_human_readable() {
        let err = CryptoError::InvalidKey("bad key data".into());
        assert!(err.to_string().contains("bad key data"));

        let err = CryptoError::AlgorithmMismatch {
            algorithm: "AES_256",
            expected: AlgorithmKind::PbeSymmetric,
            actual: AlgorithmKind::Symmetric,
        };
        let msg = err.to_string();
        assert!(msg.contains("AES_256"));
        assert!(msg.contains("PBE_SYMMETRIC"));

        let err = CryptoError::KeyDestroyed("secret");
        assert_eq!(err.to_string(), "secret key has been destroyed");
    }

    #[test]
    fn from_base64_error_converts_to_armor_error() {
        use base64::Engine;
        let b64_err = base64::engine::general_purpose::STANDARD
            .decode("***")
            .unwrap_err();
        let err: CryptoError = b64_err.into();
        assert!(matches!(err, CryptoError::Armor(_)));
    }

    #[test]
    fn setting_errors_map_to_setting_return_code() {
        let err: VaultError = CryptoError::Setting("charset".into()).into();
        assert_eq!(err.return_code(), ReturnCode::SettingError);

        let err: VaultError = CryptoError::UnknownAlgorithm("DES".into()).into();
        assert_eq!(err.return_code(), ReturnCode::SettingError);
    }

    #[test]
    fn other_errors_map_to_crypto_return_code() {
        let err: VaultError = CryptoError::DecryptionFailed("tag".into()).into();
        assert_eq!(err.return_code(), ReturnCode::CryptoError);

        let err: VaultError = CryptoError::KeyDestroyed("private").into();
        assert_eq!(err.return_code(), ReturnCode::CryptoError);
    }

    #[test]
    fn missing_master_key_maps_to_not_ready() {
        let err: VaultError = CryptoError::MasterKeyUnavailable("unset".into()).into();
        assert_eq!(err.return_code(), ReturnCode::NotReady);
    }

    #[test]
    fn all_variants_impl_error() {
        let errors: Vec<Box<dyn std::error::Error>> = vec![
            Box::new(CryptoError::AlgorithmMismatch {
                algorithm: "SHA_256",
                expected: AlgorithmKind::Signature,
                actual: AlgorithmKind::Hash,
            }),
            Box::new(CryptoError::KeyMismatch("k".into())),
            Box::new(CryptoError::KeyDestroyed("public")),
            Box::new(CryptoError::InvalidKey("i".into())),
            Box::new(CryptoError::KeyGeneration("g".into())),
            Box::new(CryptoError::EncryptionFailed("e".into())),
            Box::new(CryptoError::DecryptionFailed("d".into())),
            Box::new(CryptoError::Armor("a".into())),
            Box::new(CryptoError::Setting("s".into())),
            Box::new(CryptoError::UnknownAlgorithm("u".into())),
            Box::new(CryptoError::MasterKeyUnavailable("m".into())),
        ];
        for e in &errors {
            let _ = e.to_string();
        }
    }
}
