use serde::{Deserialize, Serialize};

/// Machine-readable code attached to every caller-visible failure.
///
/// Errors (`1xx`) signal a fault in the system or its configuration;
/// warnings (`4xx`) signal that the request itself could not be honoured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReturnCode {
    CryptoError,
    SettingError,
    DatabaseError,
    NotReady,
    AuthenticationWarning,
    AuthorizationWarning,
    IdentificationWarning,
    VerificationWarning,
    IntegrityWarning,
}

impl ReturnCode {
    pub fn code(&self) -> u16 {
        match self {
            ReturnCode::CryptoError => 100,
            ReturnCode::SettingError => 101,
            ReturnCode::DatabaseError => 102,
            ReturnCode::NotReady => 103,
            ReturnCode::AuthenticationWarning => 400,
            ReturnCode::AuthorizationWarning => 401,
            ReturnCode::IdentificationWarning => 402,
            ReturnCode::VerificationWarning => 403,
            ReturnCode::IntegrityWarning => 404,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ReturnCode::CryptoError => "CRYPTO_ERROR",
            ReturnCode::SettingError => "SETTING_ERROR",
            ReturnCode::DatabaseError => "DATABASE_ERROR",
            ReturnCode::NotReady => "NOT_READY",
            ReturnCode::AuthenticationWarning => "AUTHENTICATION_WARNING",
            ReturnCode::AuthorizationWarning => "AUTHORIZATION_WARNING",
            ReturnCode::IdentificationWarning => "IDENTIFICATION_WARNING",
            ReturnCode::VerificationWarning => "VERIFICATION_WARNING",
            ReturnCode::IntegrityWarning => "INTEGRITY_WARNING",
        }
    }

    pub fn is_error(&self) -> bool {
        self.code() < 400
    }
}

/// Shared error type returned by every vault operation.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("setting error: {0}")]
    Setting(String),

    #[error("database error: {0}")]
    Database(String),

    #[cfg(feature = "rusqlite")]
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("not ready: {0}")]
    NotReady(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("not authorized: {0}")]
    Authorization(String),

    #[error("not found: {0}")]
    Identification(String),

    #[error("verification failed: {0}")]
    Verification(String),

    #[error("integrity check failed: {0}")]
    Integrity(String),
}

impl VaultError {
    pub fn return_code(&self) -> ReturnCode {
        match self {
            VaultError::Crypto(_) => ReturnCode::CryptoError,
            VaultError::Setting(_) => ReturnCode::SettingError,
            VaultError::Database(_) => ReturnCode::DatabaseError,
            #[cfg(feature = "rusqlite")]
            VaultError::Sqlite(_) => ReturnCode::DatabaseError,
            VaultError::NotReady(_) => ReturnCode::NotReady,
            VaultError::Authentication(_) => ReturnCode::AuthenticationWarning,
            VaultError::Authorization(_) => ReturnCode::AuthorizationWarning,
            VaultError::Identification(_) => ReturnCode::IdentificationWarning,
            VaultError::Verification(_) => ReturnCode::VerificationWarning,
            VaultError::Integrity(_) => ReturnCode::IntegrityWarning,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identification_display() {
        let err = VaultError::Identification("no such circle".into());
        assert_eq!(err.to_string(), "not found: no such circle");
    }

    #[test]
    fn crypto_contains_message() {
        let err = VaultError::Crypto("bad key".into());
        assert_eq!(err.to_string(), "crypto error: bad key");
    }

    #[test]
    fn return_codes_split_errors_and_warnings() {
        assert!(VaultError::Database("x".into()).return_code().is_error());
        assert!(VaultError::Setting("x".into()).return_code().is_error());
        assert!(!VaultError::Verification("x".into()).return_code().is_error());
        assert!(!VaultError::Integrity("x".into()).return_code().is_error());
    }

    #[test]
    fn return_code_names_are_screaming_snake_case() {
        let code = VaultError::Identification("x".into()).return_code();
        assert_eq!(code.name(), "IDENTIFICATION_WARNING");
        let json = serde_json::to_string(&code).unwrap();
        assert_eq!(json, "\"IDENTIFICATION_WARNING\"");
    }

    #[test]
    fn return_codes_are_unique() {
        let codes = [
            ReturnCode::CryptoError,
            ReturnCode::SettingError,
            ReturnCode::DatabaseError,
            ReturnCode::NotReady,
            ReturnCode::AuthenticationWarning,
            ReturnCode::AuthorizationWarning,
            ReturnCode::IdentificationWarning,
            ReturnCode::VerificationWarning,
            ReturnCode::IntegrityWarning,
        ];
        for (i, a) in codes.iter().enumerate() {
            for (j, b) in codes.iter().enumerate() {
                if i != j {
                    assert_ne!(a.code(), b.code(), "{} and {} share a code", a.name(), b.name());
                }
            }
        }
    }

    #[test]
    fn all_variants_impl_error() {
        let errors: Vec<Box<dyn std::error::Error>> = vec![
            Box::new(VaultError::Crypto("a".into())),
            Box::new(VaultError::Setting("b".into())),
            Box::new(VaultError::Database("c".into())),
            Box::new(VaultError::NotReady("d".into())),
            Box::new(VaultError::Authentication("e".into())),
            Box::new(VaultError::Authorization("f".into())),
            Box::new(VaultError::Identification("g".into())),
            Box::new(VaultError::Verification("h".into())),
            Box::new(VaultError::Integrity("i".into())),
        ];
        for e in &errors {
            let _ = e.to_string();
        }
    }
}
