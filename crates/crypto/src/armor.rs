//! Armoring: Base64 text forms of key material for storage.
//!
//! Private keys are only ever armored encrypted under a password-derived key;
//! circle keys only ever as sealed envelopes for one trustee's public key.

use base64::Engine;
use ed25519_dalek::VerifyingKey;
use zeroize::Zeroizing;

use crate::algorithm::{Algorithm, AlgorithmKind};
use crate::engine::Crypto;
use crate::error::CryptoError;
use crate::keys::{PrivateKeyMaterial, PublicKeyMaterial, SecretKeyMaterial};

const B64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// Base64-encode arbitrary bytes.
pub fn armor(bytes: &[u8]) -> String {
    B64.encode(bytes)
}

/// Inverse of [`armor`].
pub fn dearmor(armored: &str) -> Result<Vec<u8>, CryptoError> {
    Ok(B64.decode(armored.trim())?)
}

impl Crypto {
    pub fn armor_public(&self, key: &PublicKeyMaterial) -> Result<String, CryptoError> {
        Ok(armor(key.bytes()?))
    }

    /// Rebuild a public key under the configured asymmetric algorithm. Bytes
    /// that are not a valid curve point are rejected here, not at first use.
    pub fn dearmor_public(&self, armored: &str) -> Result<PublicKeyMaterial, CryptoError> {
        let algorithm = self.settings().asymmetric_algorithm.require(AlgorithmKind::Asymmetric)?;
        let bytes = dearmor(armored)?;
        let array: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            CryptoError::Armor(format!(
                "{algorithm} public key must be 32 bytes, got {}",
                bytes.len()
            ))
        })?;
        VerifyingKey::from_bytes(&array)
            .map_err(|e| CryptoError::Armor(format!("{algorithm} public key rejected: {e}")))?;
        Ok(PublicKeyMaterial::new(algorithm, array))
    }

    /// Encrypt the private key under a password-derived key, then armor it.
    pub fn encrypt_and_armor_private(
        &self,
        unlock_key: &SecretKeyMaterial,
        private_key: &PrivateKeyMaterial,
    ) -> Result<String, CryptoError> {
        require_unlock_key(unlock_key)?;
        let ciphertext = self.encrypt(unlock_key, private_key.seed()?)?;
        Ok(armor(&ciphertext))
    }

    /// Inverse of [`Crypto::encrypt_and_armor_private`]. A wrong password
    /// surfaces as `DecryptionFailed`, never as a corrupted key.
    pub fn dearmor_private(
        &self,
        unlock_key: &SecretKeyMaterial,
        armored: &str,
    ) -> Result<PrivateKeyMaterial, CryptoError> {
        require_unlock_key(unlock_key)?;
        let algorithm = self.settings().asymmetric_algorithm.require(AlgorithmKind::Asymmetric)?;
        let ciphertext = dearmor(armored)?;
        let plaintext = Zeroizing::new(self.decrypt(unlock_key, &ciphertext)?);

        let mut seed = Zeroizing::new([0u8; 32]);
        if plaintext.len() != seed.len() {
            return Err(CryptoError::InvalidKey(format!(
                "{algorithm} private key must be 32 bytes, got {}",
                plaintext.len()
            )));
        }
        seed.copy_from_slice(&plaintext);
        Ok(PrivateKeyMaterial::new(algorithm, seed))
    }

    /// Wrap a circle key for one trustee.
    pub fn encrypt_and_armor_circle_key(
        &self,
        trustee_public_key: &PublicKeyMaterial,
        circle_key: &SecretKeyMaterial,
    ) -> Result<String, CryptoError> {
        if circle_key.algorithm().kind() != AlgorithmKind::Symmetric {
            return Err(CryptoError::KeyMismatch(format!(
                "circle key must be symmetric, got {}",
                circle_key.algorithm()
            )));
        }
        let sealed = self.encrypt(trustee_public_key, circle_key.bytes()?)?;
        Ok(armor(&sealed))
    }

    /// Unwrap a trustee's copy of a circle key. The returned key carries no
    /// IV; attach the record's own IV with `with_salt` before use.
    pub fn extract_circle_key(
        &self,
        algorithm: Algorithm,
        trustee_private_key: &PrivateKeyMaterial,
        armored: &str,
    ) -> Result<SecretKeyMaterial, CryptoError> {
        algorithm.require(AlgorithmKind::Symmetric)?;
        let sealed = dearmor(armored)?;
        let key = Zeroizing::new(self.decrypt(trustee_private_key, &sealed)?);
        if key.len() != algorithm.key_bytes() {
            return Err(CryptoError::InvalidKey(format!(
                "{algorithm} key must be {} bytes, got {}",
                algorithm.key_bytes(),
                key.len()
            )));
        }
        Ok(SecretKeyMaterial::new(algorithm, key, None))
    }
}

fn require_unlock_key(key: &SecretKeyMaterial) -> Result<(), CryptoError> {
    if key.algorithm().kind() == AlgorithmKind::PbeSymmetric {
        Ok(())
    } else {
        Err(CryptoError::KeyMismatch(format!(
            "private keys unlock only with a password-derived key, got {}",
            key.algorithm()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::IVSalt;
    use crate::settings::CryptoSettings;

    fn crypto() -> Crypto {
        Crypto::new(CryptoSettings {
            pbe_iterations: 1,
            pbe_memory_kib: 64,
            ..CryptoSettings::default()
        })
        .unwrap()
    }

    #[test]
    fn public_key_round_trip() {
        let crypto = crypto();
        let (public, _) = crypto.generate_asymmetric(Algorithm::Curve25519).unwrap();
        let armored = crypto.armor_public(&public).unwrap();
        assert_eq!(crypto.dearmor_public(&armored).unwrap(), public);
    }

    #[test]
    fn dearmor_public_rejects_wrong_length_and_garbage() {
        let crypto = crypto();
        assert!(matches!(
            crypto.dearmor_public(&armor(&[1u8; 31])),
            Err(CryptoError::Armor(_))
        ));
        assert!(matches!(
            crypto.dearmor_public("%%% not base64"),
            Err(CryptoError::Armor(_))
        ));
    }

    #[test]
    fn private_key_round_trip() {
        let crypto = crypto();
        let (_, private) = crypto.generate_asymmetric(Algorithm::Curve25519).unwrap();
        let unlock = crypto
            .generate_password_key(Algorithm::Pbe256, b"password", &IVSalt::random())
            .unwrap();
        let armored = crypto.encrypt_and_armor_private(&unlock, &private).unwrap();
        assert_eq!(crypto.dearmor_private(&unlock, &armored).unwrap(), private);
    }

    #[test]
    fn dearmor_private_with_wrong_password_fails() {
        let crypto = crypto();
        let salt = IVSalt::random();
        let (_, private) = crypto.generate_asymmetric(Algorithm::Curve25519).unwrap();
        let unlock = crypto
            .generate_password_key(Algorithm::Pbe256, b"password", &salt)
            .unwrap();
        let armored = crypto.encrypt_and_armor_private(&unlock, &private).unwrap();

        let wrong = crypto
            .generate_password_key(Algorithm::Pbe256, b"passw0rd", &salt)
            .unwrap();
        assert!(matches!(
            crypto.dearmor_private(&wrong, &armored),
            Err(CryptoError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn private_key_requires_password_derived_unlock_key() {
        let crypto = crypto();
        let (_, private) = crypto.generate_asymmetric(Algorithm::Curve25519).unwrap();
        let plain = crypto
            .generate_symmetric(Algorithm::Aes256)
            .unwrap()
            .with_salt(IVSalt::random());
        assert!(matches!(
            crypto.encrypt_and_armor_private(&plain, &private),
            Err(CryptoError::KeyMismatch(_))
        ));
    }

    #[test]
    fn circle_key_round_trip_with_reattached_iv() {
        let crypto = crypto();
        let (public, private) = crypto.generate_asymmetric(Algorithm::Curve25519).unwrap();
        let iv = IVSalt::random();
        let circle_key = crypto
            .generate_symmetric(Algorithm::Aes256)
            .unwrap()
            .with_salt(iv.clone());
        let ciphertext = crypto.encrypt(&circle_key, b"record payload").unwrap();

        let armored = crypto
            .encrypt_and_armor_circle_key(&public, &circle_key)
            .unwrap();
        let extracted = crypto
            .extract_circle_key(Algorithm::Aes256, &private, &armored)
            .unwrap();
        assert!(extracted.salt().is_none());

        let extracted = extracted.with_salt(iv);
        assert_eq!(crypto.decrypt(&extracted, &ciphertext).unwrap(), b"record payload");
    }

    #[test]
    fn extract_circle_key_checks_algorithm_length() {
        let crypto = crypto();
        let (public, private) = crypto.generate_asymmetric(Algorithm::Curve25519).unwrap();
        let circle_key = crypto.generate_symmetric(Algorithm::Aes128).unwrap();
        let armored = crypto
            .encrypt_and_armor_circle_key(&public, &circle_key)
            .unwrap();
        assert!(matches!(
            crypto.extract_circle_key(Algorithm::Aes256, &private, &armored),
            Err(CryptoError::InvalidKey(_))
        ));
        assert!(matches!(
            crypto.extract_circle_key(Algorithm::Sha256, &private, &armored),
            Err(CryptoError::AlgorithmMismatch { .. })
        ));
    }
}
