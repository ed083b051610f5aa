//! Crypto settings and the character-set registry.

use serde::{Deserialize, Serialize};

use crate::algorithm::{Algorithm, AlgorithmKind};
use crate::error::CryptoError;

/// Algorithm selections and tuning for the crypto engine.
///
/// Constructed once per configuration epoch and handed to [`crate::Crypto::new`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoSettings {
    #[serde(default = "default_symmetric")]
    pub symmetric_algorithm: Algorithm,
    #[serde(default = "default_asymmetric")]
    pub asymmetric_algorithm: Algorithm,
    #[serde(default = "default_signature")]
    pub signature_algorithm: Algorithm,
    #[serde(default = "default_pbe")]
    pub pbe_algorithm: Algorithm,
    #[serde(default = "default_hash")]
    pub hash_algorithm: Algorithm,
    /// Character set used for string/byte conversion. Default: "UTF-8"
    #[serde(default = "default_charset")]
    pub charset: String,
    /// Argon2 time cost. Default: 3
    #[serde(default = "default_pbe_iterations")]
    pub pbe_iterations: u32,
    /// Argon2 memory cost in KiB. Default: 19456
    #[serde(default = "default_pbe_memory_kib")]
    pub pbe_memory_kib: u32,
}

fn default_symmetric() -> Algorithm {
    Algorithm::Aes256
}
fn default_asymmetric() -> Algorithm {
    Algorithm::Curve25519
}
fn default_signature() -> Algorithm {
    Algorithm::Ed25519
}
fn default_pbe() -> Algorithm {
    Algorithm::Pbe256
}
fn default_hash() -> Algorithm {
    Algorithm::Sha512
}
fn default_charset() -> String {
    "UTF-8".to_string()
}
fn default_pbe_iterations() -> u32 {
    3
}
fn default_pbe_memory_kib() -> u32 {
    19456
}

impl Default for CryptoSettings {
    fn default() -> Self {
        Self {
            symmetric_algorithm: default_symmetric(),
            asymmetric_algorithm: default_asymmetric(),
            signature_algorithm: default_signature(),
            pbe_algorithm: default_pbe(),
            hash_algorithm: default_hash(),
            charset: default_charset(),
            pbe_iterations: default_pbe_iterations(),
            pbe_memory_kib: default_pbe_memory_kib(),
        }
    }
}

impl CryptoSettings {
    /// Check every algorithm slot against its required kind, the charset name
    /// and the PBE cost parameters.
    pub fn validate(&self) -> Result<(), CryptoError> {
        let slots = [
            ("symmetric_algorithm", self.symmetric_algorithm, AlgorithmKind::Symmetric),
            ("asymmetric_algorithm", self.asymmetric_algorithm, AlgorithmKind::Asymmetric),
            ("signature_algorithm", self.signature_algorithm, AlgorithmKind::Signature),
            ("pbe_algorithm", self.pbe_algorithm, AlgorithmKind::PbeSymmetric),
            ("hash_algorithm", self.hash_algorithm, AlgorithmKind::Hash),
        ];
        for (slot, algorithm, kind) in slots {
            algorithm
                .require(kind)
                .map_err(|e| CryptoError::Setting(format!("{slot}: {e}")))?;
        }
        Charset::resolve(&self.charset)?;
        if self.pbe_iterations == 0 {
            return Err(CryptoError::Setting("pbe_iterations must be at least 1".into()));
        }
        if self.pbe_memory_kib < 8 {
            return Err(CryptoError::Setting("pbe_memory_kib must be at least 8".into()));
        }
        Ok(())
    }

    /// Assign an algorithm to a slot by name, rejecting unknown names and
    /// kind mismatches without touching the current value.
    pub fn set_algorithm(&mut self, slot: &str, name: &str) -> Result<(), CryptoError> {
        let algorithm = Algorithm::resolve(name)?;
        let (target, kind) = match slot {
            "symmetric_algorithm" => (&mut self.symmetric_algorithm, AlgorithmKind::Symmetric),
            "asymmetric_algorithm" => (&mut self.asymmetric_algorithm, AlgorithmKind::Asymmetric),
            "signature_algorithm" => (&mut self.signature_algorithm, AlgorithmKind::Signature),
            "pbe_algorithm" => (&mut self.pbe_algorithm, AlgorithmKind::PbeSymmetric),
            "hash_algorithm" => (&mut self.hash_algorithm, AlgorithmKind::Hash),
            other => return Err(CryptoError::Setting(format!("unknown algorithm slot: {other}"))),
        };
        algorithm
            .require(kind)
            .map_err(|e| CryptoError::Setting(format!("{slot}: {e}")))?;
        *target = algorithm;
        Ok(())
    }
}

/// Parameters a password-derived key was produced with. Persisted next to
/// every encrypted private key so later setting changes cannot lock a member out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PbeParams {
    pub algorithm: Algorithm,
    pub iterations: u32,
    pub memory_kib: u32,
}

impl std::fmt::Display for PbeParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.algorithm, self.iterations, self.memory_kib)
    }
}

impl std::str::FromStr for PbeParams {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        let (Some(algorithm), Some(iterations), Some(memory_kib), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(CryptoError::Setting(format!("malformed PBE parameters: {s}")));
        };
        let params = PbeParams {
            algorithm: Algorithm::resolve(algorithm)?.require(AlgorithmKind::PbeSymmetric)?,
            iterations: iterations
                .parse()
                .map_err(|_| CryptoError::Setting(format!("invalid PBE iterations: {iterations}")))?,
            memory_kib: memory_kib
                .parse()
                .map_err(|_| CryptoError::Setting(format!("invalid PBE memory: {memory_kib}")))?,
        };
        Ok(params)
    }
}

impl CryptoSettings {
    /// PBE parameters new password-derived keys are produced with.
    pub fn pbe_params(&self) -> PbeParams {
        PbeParams {
            algorithm: self.pbe_algorithm,
            iterations: self.pbe_iterations,
            memory_kib: self.pbe_memory_kib,
        }
    }
}

/// Supported character sets for string/byte conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    Utf8,
    UsAscii,
    Latin1,
}

impl Charset {
    pub fn resolve(name: &str) -> Result<Charset, CryptoError> {
        match name.trim().to_ascii_uppercase().replace('_', "-").as_str() {
            "UTF-8" | "UTF8" => Ok(Charset::Utf8),
            "US-ASCII" | "ASCII" => Ok(Charset::UsAscii),
            "ISO-8859-1" | "ISO8859-1" | "LATIN1" | "LATIN-1" => Ok(Charset::Latin1),
            _ => Err(CryptoError::Setting(format!("unsupported charset: {name}"))),
        }
    }

    pub fn encode(&self, text: &str) -> Result<Vec<u8>, CryptoError> {
        match self {
            Charset::Utf8 => Ok(text.as_bytes().to_vec()),
            Charset::UsAscii => text
                .chars()
                .map(|c| {
                    if c.is_ascii() {
                        Ok(c as u8)
                    } else {
                        Err(CryptoError::Armor(format!("{c:?} is not representable in US-ASCII")))
                    }
                })
                .collect(),
            Charset::Latin1 => text
                .chars()
                .map(|c| {
                    u8::try_from(u32::from(c)).map_err(|_| {
                        CryptoError::Armor(format!("{c:?} is not representable in ISO-8859-1"))
                    })
                })
                .collect(),
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<String, CryptoError> {
        match self {
            Charset::Utf8 => String::from_utf8(bytes.to_vec())
                .map_err(|e| CryptoError::Armor(format!("invalid UTF-8: {e}"))),
            Charset::UsAscii => {
                if let Some(pos) = bytes.iter().position(|b| !b.is_ascii()) {
                    return Err(CryptoError::Armor(format!(
                        "byte 0x{:02x} at offset {pos} is not US-ASCII",
                        bytes[pos]
                    )));
                }
                Ok(bytes.iter().map(|&b| b as char).collect())
            }
            Charset::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
        }
    }
}
