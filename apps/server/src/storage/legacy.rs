//! One-time migration of salts and IVs stored in the legacy raw-text form.
//!
//! Regular reads never fall back to the legacy form; a value that does not
//! open under the MasterKey is an error. This routine is the only place the
//! old representation is accepted, and it rewrites every such value sealed.

use circlevault_crypto::{IVSalt, MasterKey};
use circlevault_shared::error::VaultError;
use rusqlite::Connection;

use super::{members, records, Store};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LegacyMigrationReport {
    pub members: usize,
    pub records: usize,
}

/// Re-seal every legacy salt and IV. Runs in one transaction: a value that is
/// neither sealed nor a valid legacy salt aborts the whole migration.
pub fn migrate_legacy_salts(
    store: &Store,
    master: &MasterKey,
) -> Result<LegacyMigrationReport, VaultError> {
    let report = store.with_transaction(|tx| {
        let mut report = LegacyMigrationReport::default();
        for member in members::list_all(tx)? {
            if let Some(sealed) = reseal_if_legacy(master, &member.salt, "member", &member.name)? {
                members::update_salt(tx, member.id, &sealed)?;
                report.members += 1;
            }
        }
        for (id, iv) in records::all_initial_vectors(tx)? {
            if let Some(sealed) = reseal_if_legacy(master, &iv, "record", &id.to_string())? {
                records::update_initial_vector(tx, id, &sealed)?;
                report.records += 1;
            }
        }
        Ok(report)
    })?;

    tracing::info!(
        members = report.members,
        records = report.records,
        "legacy salt migration complete"
    );
    Ok(report)
}

fn reseal_if_legacy(
    master: &MasterKey,
    stored: &str,
    kind: &str,
    owner: &str,
) -> Result<Option<String>, VaultError> {
    if master.open_salt(stored).is_ok() {
        return Ok(None);
    }
    let salt = IVSalt::from_legacy_text(stored).map_err(|e| {
        tracing::error!(kind, owner, "stored salt is neither sealed nor legacy");
        VaultError::Crypto(format!("{kind} {owner}: unreadable salt: {e}"))
    })?;
    tracing::warn!(kind, owner, "re-sealing legacy salt");
    Ok(Some(master.seal_salt(&salt)?))
}

/// True if any stored salt or IV would need [`migrate_legacy_salts`].
pub fn has_legacy_values(conn: &Connection, master: &MasterKey) -> Result<bool, VaultError> {
    let member_salts = members::list_all(conn)?.into_iter().map(|m| m.salt);
    let record_ivs = records::all_initial_vectors(conn)?.into_iter().map(|(_, iv)| iv);
    Ok(member_salts
        .chain(record_ivs)
        .any(|value| master.open_salt(&value).is_err()))
}
