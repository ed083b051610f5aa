//! Algorithm catalog.
//!
//! Every algorithm the vault can use is one variant of [`Algorithm`]; the
//! associated data (kind, cipher, transformation, key length) comes from
//! exhaustive matches, so adding an entry is a compile-checked change.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CryptoError;

/// The role an algorithm plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlgorithmKind {
    Symmetric,
    Asymmetric,
    PbeSymmetric,
    Signature,
    Hash,
}

impl fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AlgorithmKind::Symmetric => "SYMMETRIC",
            AlgorithmKind::Asymmetric => "ASYMMETRIC",
            AlgorithmKind::PbeSymmetric => "PBE_SYMMETRIC",
            AlgorithmKind::Signature => "SIGNATURE",
            AlgorithmKind::Hash => "HASH",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    Aes128,
    Aes192,
    Aes256,
    Curve25519,
    Pbe128,
    Pbe192,
    Pbe256,
    Ed25519,
    Sha256,
    Sha384,
    Sha512,
}

impl Algorithm {
    pub const ALL: [Algorithm; 11] = [
        Algorithm::Aes128,
        Algorithm::Aes192,
        Algorithm::Aes256,
        Algorithm::Curve25519,
        Algorithm::Pbe128,
        Algorithm::Pbe192,
        Algorithm::Pbe256,
        Algorithm::Ed25519,
        Algorithm::Sha256,
        Algorithm::Sha384,
        Algorithm::Sha512,
    ];

    /// Catalog name, as used in configuration and the `algorithm` columns.
    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Aes128 => "AES_128",
            Algorithm::Aes192 => "AES_192",
            Algorithm::Aes256 => "AES_256",
            Algorithm::Curve25519 => "CURVE_25519",
            Algorithm::Pbe128 => "PBE_128",
            Algorithm::Pbe192 => "PBE_192",
            Algorithm::Pbe256 => "PBE_256",
            Algorithm::Ed25519 => "ED_25519",
            Algorithm::Sha256 => "SHA_256",
            Algorithm::Sha384 => "SHA_384",
            Algorithm::Sha512 => "SHA_512",
        }
    }

    pub fn kind(&self) -> AlgorithmKind {
        match self {
            Algorithm::Aes128 | Algorithm::Aes192 | Algorithm::Aes256 => AlgorithmKind::Symmetric,
            Algorithm::Curve25519 => AlgorithmKind::Asymmetric,
            Algorithm::Pbe128 | Algorithm::Pbe192 | Algorithm::Pbe256 => {
                AlgorithmKind::PbeSymmetric
            }
            Algorithm::Ed25519 => AlgorithmKind::Signature,
            Algorithm::Sha256 | Algorithm::Sha384 | Algorithm::Sha512 => AlgorithmKind::Hash,
        }
    }

    /// Underlying cipher family.
    pub fn cipher(&self) -> &'static str {
        match self {
            Algorithm::Aes128 | Algorithm::Aes192 | Algorithm::Aes256 => "AES",
            Algorithm::Curve25519 => "X25519",
            Algorithm::Pbe128 | Algorithm::Pbe192 | Algorithm::Pbe256 => "Argon2id",
            Algorithm::Ed25519 => "Ed25519",
            Algorithm::Sha256 | Algorithm::Sha384 | Algorithm::Sha512 => "SHA-2",
        }
    }

    /// Full transformation string: cipher, mode and padding.
    pub fn transformation(&self) -> &'static str {
        match self {
            Algorithm::Aes128 | Algorithm::Aes192 | Algorithm::Aes256 => "AES/GCM/NoPadding",
            Algorithm::Curve25519 => "X25519/HKDF-SHA256/AES-256-GCM",
            Algorithm::Pbe128 | Algorithm::Pbe192 | Algorithm::Pbe256 => {
                "Argon2id/AES/GCM/NoPadding"
            }
            Algorithm::Ed25519 => "Ed25519",
            Algorithm::Sha256 => "SHA-256",
            Algorithm::Sha384 => "SHA-384",
            Algorithm::Sha512 => "SHA-512",
        }
    }

    /// Key length (or digest length for hashes) in bits.
    pub fn key_length(&self) -> usize {
        match self {
            Algorithm::Aes128 | Algorithm::Pbe128 => 128,
            Algorithm::Aes192 | Algorithm::Pbe192 => 192,
            Algorithm::Aes256 | Algorithm::Pbe256 => 256,
            Algorithm::Curve25519 | Algorithm::Ed25519 => 256,
            Algorithm::Sha256 => 256,
            Algorithm::Sha384 => 384,
            Algorithm::Sha512 => 512,
        }
    }

    pub fn key_bytes(&self) -> usize {
        self.key_length() / 8
    }

    /// Cipher mode column value for key descriptors.
    pub fn cipher_mode(&self) -> &'static str {
        self.transformation().split('/').nth(1).unwrap_or("NONE")
    }

    /// Padding column value for key descriptors.
    pub fn padding(&self) -> &'static str {
        self.transformation().split('/').nth(2).unwrap_or("NoPadding")
    }

    /// Look up a catalog entry by name. Case-insensitive; `-` is read as `_`.
    pub fn resolve(name: &str) -> Result<Algorithm, CryptoError> {
        let normalized = name.trim().to_ascii_uppercase().replace('-', "_");
        Algorithm::ALL
            .into_iter()
            .find(|alg| alg.name() == normalized)
            .ok_or_else(|| CryptoError::UnknownAlgorithm(name.to_string()))
    }

    /// Fails unless this algorithm is of the required kind.
    pub fn require(self, expected: AlgorithmKind) -> Result<Algorithm, CryptoError> {
        if self.kind() == expected {
            Ok(self)
        } else {
            Err(CryptoError::AlgorithmMismatch {
                algorithm: self.name(),
                expected,
                actual: self.kind(),
            })
        }
    }

    /// The symmetric cipher a PBE entry produces keys for.
    pub fn pbe_target(&self) -> Option<Algorithm> {
        match self {
            Algorithm::Pbe128 => Some(Algorithm::Aes128),
            Algorithm::Pbe192 => Some(Algorithm::Aes192),
            Algorithm::Pbe256 => Some(Algorithm::Aes256),
            _ => None,
        }
    }

    pub fn of_kind(kind: AlgorithmKind) -> impl Iterator<Item = Algorithm> {
        Algorithm::ALL.into_iter().filter(move |alg| alg.kind() == kind)
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Algorithm::resolve(s)
    }
}

impl Serialize for Algorithm {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Algorithm {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Algorithm::resolve(&name).map_err(serde::de::Error::custom)
    }
}
