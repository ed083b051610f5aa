//! Moving stored salts and IVs from one MasterKey to another.
//!
//! Used when a custom MasterKey replaces the default one. Values already
//! sealed under the new key are left alone, so an interrupted or repeated
//! upgrade picks up where it stopped.

use circlevault_crypto::MasterKey;
use circlevault_shared::error::VaultError;

use super::{members, records, Store};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RekeyReport {
    pub members: usize,
    pub records: usize,
    /// Values that open under neither key, such as legacy salts.
    pub unreadable: usize,
}

impl RekeyReport {
    pub fn resealed(&self) -> usize {
        self.members + self.records
    }
}

/// Re-seal every value that opens under `previous` so it opens under `next`.
/// Runs in one transaction.
pub fn reseal_all(
    store: &Store,
    previous: &MasterKey,
    next: &MasterKey,
) -> Result<RekeyReport, VaultError> {
    store.with_transaction(|tx| {
        let mut report = RekeyReport::default();
        for member in members::list_all(tx)? {
            match reseal(previous, next, &member.salt)? {
                Outcome::Resealed(sealed) => {
                    members::update_salt(tx, member.id, &sealed)?;
                    report.members += 1;
                }
                Outcome::Current => {}
                Outcome::Unreadable => {
                    tracing::warn!(member = %member.name, "member salt opens under neither master key");
                    report.unreadable += 1;
                }
            }
        }
        for (id, stored) in records::all_initial_vectors(tx)? {
            match reseal(previous, next, &stored)? {
                Outcome::Resealed(sealed) => {
                    records::update_initial_vector(tx, id, &sealed)?;
                    report.records += 1;
                }
                Outcome::Current => {}
                Outcome::Unreadable => {
                    tracing::warn!(data_id = %id, "record IV opens under neither master key");
                    report.unreadable += 1;
                }
            }
        }
        Ok(report)
    })
}

enum Outcome {
    Resealed(String),
    Current,
    Unreadable,
}

fn reseal(previous: &MasterKey, next: &MasterKey, stored: &str) -> Result<Outcome, VaultError> {
    if next.open_salt(stored).is_ok() {
        return Ok(Outcome::Current);
    }
    match previous.open_salt(stored) {
        Ok(salt) => Ok(Outcome::Resealed(next.seal_salt(&salt)?)),
        Err(_) => Ok(Outcome::Unreadable),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use circlevault_crypto::{Algorithm, Crypto, CryptoSettings, IVSalt, PbeParams};
    use circlevault_shared::model::MemberRole;

    fn keys() -> (MasterKey, MasterKey) {
        let crypto = Crypto::new(CryptoSettings::default()).unwrap();
        let params = PbeParams {
            algorithm: Algorithm::Pbe256,
            iterations: 1,
            memory_kib: 64,
        };
        let default = MasterKey::derive_default(&crypto, &params, "test salt").unwrap();
        let custom = MasterKey::derive(&crypto, &params, b"operator secret", "test salt").unwrap();
        (default, custom)
    }

    #[test]
    fn default_sealed_salts_move_to_custom_key_once() {
        let store = Store::open_in_memory().unwrap();
        let (default, custom) = keys();
        let salt = IVSalt::random();
        let sealed = default.seal_salt(&salt).unwrap();
        let id = store
            .with_conn(|conn| members::insert(conn, "alice", &sealed, MemberRole::Standard, None))
            .unwrap();

        let report = reseal_all(&store, &default, &custom).unwrap();
        assert_eq!(report.members, 1);
        assert_eq!(report.unreadable, 0);

        let row = store.with_conn(|conn| members::find(conn, id)).unwrap().unwrap();
        assert!(default.open_salt(&row.salt).is_err());
        assert_eq!(custom.open_salt(&row.salt).unwrap().as_bytes(), salt.as_bytes());

        let again = reseal_all(&store, &default, &custom).unwrap();
        assert_eq!(again, RekeyReport::default());
    }

    #[test]
    fn values_under_neither_key_are_left_in_place() {
        let store = Store::open_in_memory().unwrap();
        let (default, custom) = keys();
        store
            .with_conn(|conn| members::insert(conn, "legacy", "0123456789abcdef", MemberRole::Standard, None))
            .unwrap();

        let report = reseal_all(&store, &default, &custom).unwrap();
        assert_eq!(report.resealed(), 0);
        assert_eq!(report.unreadable, 1);
        let row = store
            .with_conn(|conn| members::find_by_name(conn, "legacy"))
            .unwrap()
            .unwrap();
        assert_eq!(row.salt, "0123456789abcdef");
    }
}
