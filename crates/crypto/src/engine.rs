//! Stateless crypto operations.
//!
//! Symmetric encryption is AES-GCM with the full 16-byte IVSalt as nonce.
//! Public-key encryption is a sealed envelope: an ephemeral X25519 secret is
//! agreed with the recipient's Montgomery-form key, HKDF-SHA256 derives an
//! AES-256-GCM key and nonce, and the output is `ephemeral_public || ciphertext`.
//! Member key pairs are Ed25519, so the same pair signs and receives envelopes.

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::{Aes128, Aes192, Aes256};
use aes_gcm::{AesGcm, Nonce};
use base64::Engine;
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::{Digest, Sha256, Sha384, Sha512};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::algorithm::{Algorithm, AlgorithmKind};
use crate::error::CryptoError;
use crate::keys::{IVSalt, KeyRef, PrivateKeyMaterial, PublicKeyMaterial, SecretKeyMaterial};
use crate::settings::{Charset, CryptoSettings, PbeParams};

type Aes128Gcm16 = AesGcm<Aes128, U16>;
type Aes192Gcm16 = AesGcm<Aes192, U16>;
type Aes256Gcm16 = AesGcm<Aes256, U16>;

const ENVELOPE_INFO: &[u8] = b"circlevault-envelope-v1";
const EPHEMERAL_KEY_SIZE: usize = 32;
const TAG_SIZE: usize = 16;

/// The crypto engine. Holds only its settings; every operation is a pure
/// function of its arguments.
#[derive(Debug, Clone)]
pub struct Crypto {
    settings: CryptoSettings,
}

impl Crypto {
    /// Build an engine, rejecting settings whose algorithm slots or charset are invalid.
    pub fn new(settings: CryptoSettings) -> Result<Self, CryptoError> {
        settings.validate()?;
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &CryptoSettings {
        &self.settings
    }

    pub fn generate_symmetric(&self, algorithm: Algorithm) -> Result<SecretKeyMaterial, CryptoError> {
        algorithm.require(AlgorithmKind::Symmetric)?;
        let mut key = Zeroizing::new(vec![0u8; algorithm.key_bytes()]);
        rand::rng().fill_bytes(&mut key);
        tracing::debug!(algorithm = %algorithm, "generated symmetric key");
        Ok(SecretKeyMaterial::new(algorithm, key, None))
    }

    pub fn generate_asymmetric(
        &self,
        algorithm: Algorithm,
    ) -> Result<(PublicKeyMaterial, PrivateKeyMaterial), CryptoError> {
        algorithm.require(AlgorithmKind::Asymmetric)?;
        let mut seed = Zeroizing::new([0u8; 32]);
        rand::rng().fill_bytes(seed.as_mut());
        let signing = SigningKey::from_bytes(&seed);
        let public = PublicKeyMaterial::new(algorithm, signing.verifying_key().to_bytes());
        tracing::debug!(algorithm = %algorithm, "generated key pair");
        Ok((public, PrivateKeyMaterial::new(algorithm, seed)))
    }

    /// Derive a key from a password and salt with Argon2id under the
    /// configured cost. The salt is attached to the returned key as its IV.
    pub fn generate_password_key(
        &self,
        algorithm: Algorithm,
        secret: &[u8],
        salt: &IVSalt,
    ) -> Result<SecretKeyMaterial, CryptoError> {
        let params = PbeParams {
            algorithm,
            ..self.settings.pbe_params()
        };
        self.derive_password_key(&params, secret, salt)
    }

    /// Same as [`Crypto::generate_password_key`], with explicit cost parameters.
    pub fn derive_password_key(
        &self,
        params: &PbeParams,
        secret: &[u8],
        salt: &IVSalt,
    ) -> Result<SecretKeyMaterial, CryptoError> {
        let algorithm = params.algorithm.require(AlgorithmKind::PbeSymmetric)?;
        let target = symmetric_cipher(algorithm)?;

        let argon_params = argon2::Params::new(
            params.memory_kib,
            params.iterations,
            1,
            Some(target.key_bytes()),
        )
        .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        let argon2 =
            argon2::Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, argon_params);

        let mut output = Zeroizing::new(vec![0u8; target.key_bytes()]);
        argon2
            .hash_password_into(secret, salt.as_bytes(), &mut output)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;

        Ok(SecretKeyMaterial::new(algorithm, output, Some(salt.clone())))
    }

    /// Encrypt with a secret key (AES-GCM under the key's IV) or a public key
    /// (sealed envelope). Private keys are rejected.
    pub fn encrypt<'a>(&self, key: impl Into<KeyRef<'a>>, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match key.into() {
            KeyRef::Secret(key) => {
                let bytes = key.bytes()?;
                let iv = key.salt().ok_or_else(missing_iv)?;
                aes_encrypt(symmetric_cipher(key.algorithm())?, bytes, iv, plaintext)
            }
            KeyRef::Public(key) => seal_envelope(key, plaintext),
            KeyRef::Private(_) => Err(CryptoError::KeyMismatch(
                "cannot encrypt with a private key, use the matching public key".into(),
            )),
        }
    }

    /// Decrypt with a secret key or a private key. Public keys are rejected.
    pub fn decrypt<'a>(&self, key: impl Into<KeyRef<'a>>, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match key.into() {
            KeyRef::Secret(key) => {
                let bytes = key.bytes()?;
                let iv = key.salt().ok_or_else(missing_iv)?;
                aes_decrypt(symmetric_cipher(key.algorithm())?, bytes, iv, ciphertext)
            }
            KeyRef::Private(key) => open_envelope(key, ciphertext),
            KeyRef::Public(_) => Err(CryptoError::KeyMismatch(
                "cannot decrypt with a public key, use the matching private key".into(),
            )),
        }
    }

    /// Encrypt under `key` with an explicit IV, ignoring any IV the key carries.
    pub(crate) fn encrypt_with_iv(
        &self,
        key: &SecretKeyMaterial,
        iv: &IVSalt,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        aes_encrypt(symmetric_cipher(key.algorithm())?, key.bytes()?, iv, plaintext)
    }

    pub(crate) fn decrypt_with_iv(
        &self,
        key: &SecretKeyMaterial,
        iv: &IVSalt,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        aes_decrypt(symmetric_cipher(key.algorithm())?, key.bytes()?, iv, ciphertext)
    }

    pub fn sign(&self, private_key: &PrivateKeyMaterial, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.settings.signature_algorithm.require(AlgorithmKind::Signature)?;
        require_key_pair(private_key.algorithm())?;
        let signing = SigningKey::from_bytes(private_key.seed()?);
        Ok(signing.sign(message).to_bytes().to_vec())
    }

    /// Returns `Ok(false)` for a wrong or malformed signature; errors are
    /// reserved for unusable keys and settings.
    pub fn verify(
        &self,
        public_key: &PublicKeyMaterial,
        message: &[u8],
        signature: &[u8],
    ) -> Result<bool, CryptoError> {
        self.settings.signature_algorithm.require(AlgorithmKind::Signature)?;
        require_key_pair(public_key.algorithm())?;
        let verifying = VerifyingKey::from_bytes(public_key.bytes()?)
            .map_err(|e| CryptoError::InvalidKey(format!("public key: {e}")))?;
        let Ok(signature) = ed25519_dalek::Signature::from_slice(signature) else {
            return Ok(false);
        };
        Ok(verifying.verify_strict(message, &signature).is_ok())
    }

    /// Digest of `bytes` under the configured hash algorithm.
    pub fn checksum(&self, bytes: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let algorithm = self.settings.hash_algorithm.require(AlgorithmKind::Hash)?;
        digest(algorithm, bytes)
    }

    /// Base64 form of [`Crypto::checksum`], as persisted next to ciphertext.
    pub fn armored_checksum(&self, bytes: &[u8]) -> Result<String, CryptoError> {
        Ok(base64::engine::general_purpose::STANDARD.encode(self.checksum(bytes)?))
    }

    /// Constant-time comparison of a recomputed checksum with a stored one.
    /// The digest algorithm is inferred from the stored length, so records
    /// written under an earlier hash setting still verify.
    pub fn verify_checksum(&self, bytes: &[u8], armored: &str) -> Result<bool, CryptoError> {
        let stored = base64::engine::general_purpose::STANDARD.decode(armored.trim())?;
        let algorithm = Algorithm::of_kind(AlgorithmKind::Hash)
            .find(|alg| alg.key_bytes() == stored.len())
            .unwrap_or(self.settings.hash_algorithm);
        let computed = digest(algorithm, bytes)?;
        Ok(bool::from(computed.ct_eq(&stored)))
    }

    pub fn string_to_bytes(&self, text: &str) -> Result<Vec<u8>, CryptoError> {
        Charset::resolve(&self.settings.charset)?.encode(text)
    }

    pub fn bytes_to_string(&self, bytes: &[u8]) -> Result<String, CryptoError> {
        Charset::resolve(&self.settings.charset)?.decode(bytes)
    }
}

fn missing_iv() -> CryptoError {
    CryptoError::InvalidKey("symmetric key carries no IV, attach one with with_salt".into())
}

fn require_key_pair(algorithm: Algorithm) -> Result<(), CryptoError> {
    if algorithm.kind() == AlgorithmKind::Asymmetric {
        Ok(())
    } else {
        Err(CryptoError::KeyMismatch(format!(
            "{algorithm} is {}, not a key pair algorithm",
            algorithm.kind()
        )))
    }
}

/// The AES variant a secret key encrypts with.
fn symmetric_cipher(algorithm: Algorithm) -> Result<Algorithm, CryptoError> {
    match algorithm.kind() {
        AlgorithmKind::Symmetric => Ok(algorithm),
        AlgorithmKind::PbeSymmetric => algorithm
            .pbe_target()
            .ok_or(CryptoError::UnknownAlgorithm(algorithm.name().to_string())),
        other => Err(CryptoError::KeyMismatch(format!(
            "{algorithm} is {other}, not usable as a secret key"
        ))),
    }
}

fn digest(algorithm: Algorithm, bytes: &[u8]) -> Result<Vec<u8>, CryptoError> {
    match algorithm {
        Algorithm::Sha256 => Ok(Sha256::digest(bytes).to_vec()),
        Algorithm::Sha384 => Ok(Sha384::digest(bytes).to_vec()),
        Algorithm::Sha512 => Ok(Sha512::digest(bytes).to_vec()),
        other => Err(CryptoError::AlgorithmMismatch {
            algorithm: other.name(),
            expected: AlgorithmKind::Hash,
            actual: other.kind(),
        }),
    }
}

macro_rules! gcm_apply {
    ($cipher:ty, $method:ident, $key:expr, $iv:expr, $input:expr, $err:path) => {{
        let cipher = <$cipher>::new_from_slice($key)
            .map_err(|e| CryptoError::InvalidKey(format!("key length: {e}")))?;
        cipher
            .$method(Nonce::<U16>::from_slice($iv.as_bytes()), $input)
            .map_err(|_| $err("authentication tag mismatch or malformed input".into()))
    }};
}

fn aes_encrypt(algorithm: Algorithm, key: &[u8], iv: &IVSalt, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    match algorithm {
        Algorithm::Aes128 => gcm_apply!(Aes128Gcm16, encrypt, key, iv, plaintext, CryptoError::EncryptionFailed),
        Algorithm::Aes192 => gcm_apply!(Aes192Gcm16, encrypt, key, iv, plaintext, CryptoError::EncryptionFailed),
        Algorithm::Aes256 => gcm_apply!(Aes256Gcm16, encrypt, key, iv, plaintext, CryptoError::EncryptionFailed),
        other => Err(CryptoError::AlgorithmMismatch {
            algorithm: other.name(),
            expected: AlgorithmKind::Symmetric,
            actual: other.kind(),
        }),
    }
}

fn aes_decrypt(algorithm: Algorithm, key: &[u8], iv: &IVSalt, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() < TAG_SIZE {
        return Err(CryptoError::DecryptionFailed("ciphertext shorter than tag".into()));
    }
    match algorithm {
        Algorithm::Aes128 => gcm_apply!(Aes128Gcm16, decrypt, key, iv, ciphertext, CryptoError::DecryptionFailed),
        Algorithm::Aes192 => gcm_apply!(Aes192Gcm16, decrypt, key, iv, ciphertext, CryptoError::DecryptionFailed),
        Algorithm::Aes256 => gcm_apply!(Aes256Gcm16, decrypt, key, iv, ciphertext, CryptoError::DecryptionFailed),
        other => Err(CryptoError::AlgorithmMismatch {
            algorithm: other.name(),
            expected: AlgorithmKind::Symmetric,
            actual: other.kind(),
        }),
    }
}

/// Derive the envelope AES key and IV from the X25519 shared secret.
fn envelope_key(
    shared: &[u8; 32],
    ephemeral_public: &[u8; 32],
    recipient: &[u8; 32],
) -> Result<(Zeroizing<[u8; 32]>, IVSalt), CryptoError> {
    let mut context = [0u8; 64];
    context[..32].copy_from_slice(ephemeral_public);
    context[32..].copy_from_slice(recipient);

    let hk = Hkdf::<Sha256>::new(Some(&context), shared);
    let mut okm = Zeroizing::new([0u8; 48]);
    hk.expand(ENVELOPE_INFO, okm.as_mut())
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;

    let mut key = Zeroizing::new([0u8; 32]);
    key.copy_from_slice(&okm[..32]);
    let iv = IVSalt::from_slice(&okm[32..])?;
    Ok((key, iv))
}

fn recipient_montgomery(ed25519_public: &[u8; 32]) -> Result<[u8; 32], CryptoError> {
    let verifying = VerifyingKey::from_bytes(ed25519_public)
        .map_err(|e| CryptoError::InvalidKey(format!("public key: {e}")))?;
    Ok(verifying.to_montgomery().to_bytes())
}

fn seal_envelope(public_key: &PublicKeyMaterial, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    require_key_pair(public_key.algorithm())?;
    let recipient = recipient_montgomery(public_key.bytes()?)?;

    let mut ephemeral_bytes = Zeroizing::new([0u8; 32]);
    rand::rng().fill_bytes(ephemeral_bytes.as_mut());
    let ephemeral = x25519_dalek::StaticSecret::from(*ephemeral_bytes);
    let ephemeral_public = x25519_dalek::PublicKey::from(&ephemeral);

    let shared = ephemeral.diffie_hellman(&x25519_dalek::PublicKey::from(recipient));
    if !shared.was_contributory() {
        return Err(CryptoError::InvalidKey("recipient public key has low order".into()));
    }

    let (key, iv) = envelope_key(shared.as_bytes(), ephemeral_public.as_bytes(), &recipient)?;
    let ciphertext = aes_encrypt(Algorithm::Aes256, key.as_ref(), &iv, plaintext)?;

    let mut sealed = Vec::with_capacity(EPHEMERAL_KEY_SIZE + ciphertext.len());
    sealed.extend_from_slice(ephemeral_public.as_bytes());
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

fn open_envelope(private_key: &PrivateKeyMaterial, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    require_key_pair(private_key.algorithm())?;
    let signing = SigningKey::from_bytes(private_key.seed()?);

    if sealed.len() < EPHEMERAL_KEY_SIZE + TAG_SIZE {
        return Err(CryptoError::DecryptionFailed("sealed envelope too short".into()));
    }
    let (ephemeral_bytes, ciphertext) = sealed.split_at(EPHEMERAL_KEY_SIZE);
    let mut ephemeral_public = [0u8; 32];
    ephemeral_public.copy_from_slice(ephemeral_bytes);

    let secret = x25519_dalek::StaticSecret::from(signing.to_scalar_bytes());
    let recipient = signing.verifying_key().to_montgomery().to_bytes();
    let shared = secret.diffie_hellman(&x25519_dalek::PublicKey::from(ephemeral_public));
    if !shared.was_contributory() {
        return Err(CryptoError::DecryptionFailed("ephemeral public key has low order".into()));
    }

    let (key, iv) = envelope_key(shared.as_bytes(), &ephemeral_public, &recipient)?;
    aes_decrypt(Algorithm::Aes256, key.as_ref(), &iv, ciphertext)
}
