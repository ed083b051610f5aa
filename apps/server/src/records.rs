//! Keyed records: data encrypted under a circle key.
//!
//! Each record gets its own random IV, stored sealed by the MasterKey, and a
//! checksum of its ciphertext. The checksum is verified before every decrypt.

use chrono::{DateTime, Utc};
use circlevault_crypto::IVSalt;
use circlevault_shared::constants::MAX_RECORD_NAME_LENGTH;
use circlevault_shared::error::VaultError;
use circlevault_shared::ids::{CircleId, DataId};
use circlevault_shared::model::{SanityStatus, TrustLevel};
use zeroize::Zeroizing;

use crate::auth::MemberSession;
use crate::state::AppState;
use crate::storage::records::{self, DataRow, EncryptedPayload};
use crate::storage::{from_millis, now_millis};
use crate::trust::{require_trust, unwrap_circle_key};
use crate::validation::validate_name;

pub struct DecryptedRecord {
    pub id: DataId,
    pub name: String,
    pub data: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for DecryptedRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptedRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("data", &format_args!("[{} bytes]", self.data.len()))
            .finish()
    }
}

/// Record metadata, without ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordInfo {
    pub id: DataId,
    pub circle_id: CircleId,
    pub name: String,
    pub sanity_status: SanityStatus,
    pub sanity_checked: Option<DateTime<Utc>>,
    pub created: DateTime<Utc>,
}

fn find_record(state: &AppState, data_id: DataId) -> Result<DataRow, VaultError> {
    state
        .store
        .with_conn(|conn| records::find(conn, data_id))?
        .ok_or_else(|| VaultError::Identification(format!("no record {data_id}")))
}

/// Encrypt `plaintext` under the circle key. Requires WRITE trust.
pub fn encrypt_record(
    state: &AppState,
    session: &MemberSession,
    circle_id: CircleId,
    name: &str,
    plaintext: &[u8],
) -> Result<DataId, VaultError> {
    let name = validate_name(name, MAX_RECORD_NAME_LENGTH, "record name")?;
    let crypto = state.crypto()?;
    let master = state.master_key()?;

    let data_id = state.store.with_transaction(|tx| {
        let trustee = require_trust(tx, session, circle_id, TrustLevel::Write)?;
        let iv = IVSalt::random();
        let sealed_iv = master.seal_salt(&iv)?;
        let mut key = unwrap_circle_key(tx, &crypto, session, &trustee)?.with_salt(iv);
        let ciphertext = crypto.encrypt(&key, plaintext);
        key.destroy();
        let ciphertext = ciphertext?;
        let checksum = crypto.armored_checksum(&ciphertext)?;
        records::insert(
            tx,
            circle_id,
            &name,
            &EncryptedPayload {
                key_id: trustee.key_id,
                initial_vector: &sealed_iv,
                data: &ciphertext,
                checksum: &checksum,
            },
        )
    })?;
    tracing::debug!(data_id = %data_id, circle_id = %circle_id, bytes = plaintext.len(), "record encrypted");
    Ok(data_id)
}

/// Decrypt a record. Requires READ trust.
///
/// A checksum mismatch flags the record FAILED and returns `Integrity`
/// without attempting to decrypt.
pub fn decrypt_record(
    state: &AppState,
    session: &MemberSession,
    data_id: DataId,
) -> Result<DecryptedRecord, VaultError> {
    let crypto = state.crypto()?;
    let master = state.master_key()?;
    let record = find_record(state, data_id)?;
    let trustee = state
        .store
        .with_conn(|conn| require_trust(conn, session, record.circle_id, TrustLevel::Read))?;

    if !crypto.verify_checksum(&record.data, &record.checksum).unwrap_or(false) {
        state
            .store
            .with_conn(|conn| records::set_sanity(conn, data_id, SanityStatus::Failed, now_millis()))?;
        tracing::warn!(data_id = %data_id, circle_id = %record.circle_id, "record failed its checksum");
        return Err(VaultError::Integrity(format!("record {data_id} failed its checksum")));
    }
    if trustee.key_id != record.key_id {
        return Err(VaultError::Crypto(format!(
            "record {data_id} is not encrypted under the circle's current key"
        )));
    }

    let iv = master.open_salt(&record.initial_vector)?;
    let mut key = state
        .store
        .with_conn(|conn| unwrap_circle_key(conn, &crypto, session, &trustee))?
        .with_salt(iv);
    let plaintext = crypto.decrypt(&key, &record.data);
    key.destroy();

    tracing::debug!(data_id = %data_id, "record decrypted");
    Ok(DecryptedRecord {
        id: record.id,
        name: record.name,
        data: Zeroizing::new(plaintext?),
    })
}

/// Delete a record. Requires WRITE trust.
pub fn delete_record(
    state: &AppState,
    session: &MemberSession,
    data_id: DataId,
) -> Result<(), VaultError> {
    state.store.with_transaction(|tx| {
        let record = records::find(tx, data_id)?
            .ok_or_else(|| VaultError::Identification(format!("no record {data_id}")))?;
        require_trust(tx, session, record.circle_id, TrustLevel::Write)?;
        records::delete(tx, data_id)?;
        Ok(())
    })?;
    tracing::info!(data_id = %data_id, "record deleted");
    Ok(())
}

/// List a circle's records. Requires READ trust.
pub fn fetch_records(
    state: &AppState,
    session: &MemberSession,
    circle_id: CircleId,
) -> Result<Vec<RecordInfo>, VaultError> {
    state.store.with_conn(|conn| {
        require_trust(conn, session, circle_id, TrustLevel::Read)?;
        Ok(records::summaries_for_circle(conn, circle_id)?
            .into_iter()
            .map(|r| RecordInfo {
                id: r.id,
                circle_id: r.circle_id,
                name: r.name,
                sanity_status: r.sanity_status,
                sanity_checked: r.sanity_checked.map(from_millis),
                created: from_millis(r.created),
            })
            .collect())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{authenticate, create_member};
    use crate::test_support::{admin_session, ready_state};
    use crate::trust::{add_trustee, create_circle, rotate_circle_key};
    use circlevault_shared::ids::MemberId;

    fn setup() -> (AppState, MemberSession, MemberId, CircleId) {
        let state = ready_state();
        let admin = admin_session(&state);
        create_member(&state, &admin, "alice", "alice password").unwrap();
        let bob = create_member(&state, &admin, "bob", "bob password").unwrap();
        let alice = authenticate(&state, "alice", "alice password").unwrap();
        let circle = create_circle(&state, &alice, "finance", None).unwrap();
        (state, alice, bob, circle)
    }

    fn corrupt(state: &AppState, data_id: DataId) {
        state
            .store
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE data SET data = X'00112233' WHERE id = ?1",
                    [data_id],
                )?;
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn example_record_round_trips() {
        let (state, alice, _, circle) = setup();
        let id = encrypt_record(&state, &alice, circle, "note", b"This is just an example").unwrap();
        let record = decrypt_record(&state, &alice, id).unwrap();
        assert_eq!(record.name, "note");
        assert_eq!(record.data.as_slice(), b"This is just an example");
    }

    #[test]
    fn read_trustee_can_decrypt_but_not_write() {
        let (state, alice, bob_id, circle) = setup();
        add_trustee(&state, &alice, circle, bob_id, TrustLevel::Read).unwrap();
        let id = encrypt_record(&state, &alice, circle, "note", b"payload").unwrap();

        let bob = authenticate(&state, "bob", "bob password").unwrap();
        assert_eq!(decrypt_record(&state, &bob, id).unwrap().data.as_slice(), b"payload");
        match encrypt_record(&state, &bob, circle, "other", b"x") {
            Err(VaultError::Authorization(_)) => {}
            other => panic!("expected Authorization error, got: {other:?}"),
        }
        assert!(delete_record(&state, &bob, id).is_err());
    }

    #[test]
    fn non_trustee_cannot_read() {
        let (state, alice, _, circle) = setup();
        let id = encrypt_record(&state, &alice, circle, "note", b"payload").unwrap();
        let bob = authenticate(&state, "bob", "bob password").unwrap();
        match decrypt_record(&state, &bob, id) {
            Err(VaultError::Authorization(_)) => {}
            other => panic!("expected Authorization error, got: {other:?}"),
        }
    }

    #[test]
    fn checksum_mismatch_flags_record() {
        let (state, alice, _, circle) = setup();
        let id = encrypt_record(&state, &alice, circle, "note", b"payload").unwrap();
        corrupt(&state, id);

        match decrypt_record(&state, &alice, id) {
            Err(VaultError::Integrity(_)) => {}
            other => panic!("expected Integrity error, got: {other:?}"),
        }
        let listed = fetch_records(&state, &alice, circle).unwrap();
        assert_eq!(listed[0].sanity_status, SanityStatus::Failed);
    }

    #[test]
    fn records_survive_rotation() {
        let (state, alice, _, circle) = setup();
        let id = encrypt_record(&state, &alice, circle, "note", b"payload").unwrap();
        let before = find_record(&state, id).unwrap();

        rotate_circle_key(&state, &alice, circle).unwrap();
        let after = find_record(&state, id).unwrap();
        assert_ne!(after.data, before.data);
        assert_ne!(after.key_id, before.key_id);
        assert_eq!(decrypt_record(&state, &alice, id).unwrap().data.as_slice(), b"payload");
    }

    #[test]
    fn rotation_aborts_on_corrupt_record() {
        let (state, alice, _, circle) = setup();
        let id = encrypt_record(&state, &alice, circle, "note", b"payload").unwrap();
        corrupt(&state, id);
        match rotate_circle_key(&state, &alice, circle) {
            Err(VaultError::Integrity(_)) => {}
            other => panic!("expected Integrity error, got: {other:?}"),
        }
    }

    #[test]
    fn delete_and_missing_record() {
        let (state, alice, _, circle) = setup();
        let id = encrypt_record(&state, &alice, circle, "note", b"payload").unwrap();
        delete_record(&state, &alice, id).unwrap();
        match decrypt_record(&state, &alice, id) {
            Err(VaultError::Identification(_)) => {}
            other => panic!("expected Identification error, got: {other:?}"),
        }
        assert!(fetch_records(&state, &alice, circle).unwrap().is_empty());
    }
}
