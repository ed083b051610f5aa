//! Circle trust model.
//!
//! A circle's symmetric key exists only as one wrapped copy per trustee,
//! each sealed for that trustee's public key. Adding a trustee unwraps the
//! caller's own copy and wraps it again for the newcomer; rotation replaces
//! the key for every trustee and every record at once. The system
//! administrator may manage circles but never holds a trustee row, so it
//! never holds a circle key either.

use chrono::{DateTime, Utc};
use circlevault_crypto::{Crypto, IVSalt, PublicKeyMaterial, SecretKeyMaterial};
use circlevault_shared::constants::MAX_CIRCLE_NAME_LENGTH;
use circlevault_shared::error::VaultError;
use circlevault_shared::ids::{CircleId, KeyId, MemberId, TrusteeId};
use circlevault_shared::model::{KeyStatus, MemberRole, TrustLevel};
use rusqlite::Connection;
use zeroize::Zeroizing;

use crate::auth::MemberSession;
use crate::state::AppState;
use crate::storage::members::{self, MemberRow};
use crate::storage::records::{self as record_rows, EncryptedPayload};
use crate::storage::trustees::{self, TrusteeRow};
use crate::storage::{circles, from_millis, keys};
use crate::validation::validate_name;

/// A trustee as reported to callers. Never carries the wrapped key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrusteeInfo {
    pub trustee_id: TrusteeId,
    pub member_id: MemberId,
    pub member_name: String,
    pub trust_level: TrustLevel,
    pub created: DateTime<Utc>,
    pub changed: DateTime<Utc>,
}

fn ensure_circle(conn: &Connection, circle_id: CircleId) -> Result<(), VaultError> {
    match circles::find(conn, circle_id)? {
        Some(_) => Ok(()),
        None => Err(VaultError::Identification(format!("no circle {circle_id}"))),
    }
}

/// The caller's trustee row in `circle_id`, if it grants at least `required`.
pub(crate) fn require_trust(
    conn: &Connection,
    session: &MemberSession,
    circle_id: CircleId,
    required: TrustLevel,
) -> Result<TrusteeRow, VaultError> {
    session.ensure_active()?;
    ensure_circle(conn, circle_id)?;
    let row = trustees::find(conn, session.member_id(), circle_id)?.ok_or_else(|| {
        VaultError::Authorization(format!("not a trustee of circle {circle_id}"))
    })?;
    if !row.trust_level.allows(required) {
        return Err(VaultError::Authorization(format!(
            "{} trust required, {} held",
            required, row.trust_level
        )));
    }
    Ok(row)
}

/// Managing trustees takes ADMIN trust, or the system administrator.
fn require_manager(
    conn: &Connection,
    session: &MemberSession,
    circle_id: CircleId,
) -> Result<(), VaultError> {
    if session.is_system_admin() {
        session.ensure_active()?;
        return ensure_circle(conn, circle_id);
    }
    require_trust(conn, session, circle_id, TrustLevel::Admin).map(|_| ())
}

/// Unwrap the caller's copy of the circle key. The key carries no IV.
pub(crate) fn unwrap_circle_key(
    conn: &Connection,
    crypto: &Crypto,
    session: &MemberSession,
    trustee: &TrusteeRow,
) -> Result<SecretKeyMaterial, VaultError> {
    let descriptor = keys::find(conn, trustee.key_id)?.ok_or_else(|| {
        VaultError::Identification(format!("no key descriptor {}", trustee.key_id))
    })?;
    Ok(crypto.extract_circle_key(
        descriptor.algorithm,
        session.private_key()?,
        &trustee.circle_key,
    )?)
}

fn find_member(conn: &Connection, member_id: MemberId) -> Result<MemberRow, VaultError> {
    members::find(conn, member_id)?
        .ok_or_else(|| VaultError::Identification(format!("no member {member_id}")))
}

fn ensure_not_system_admin(member: &MemberRow) -> Result<(), VaultError> {
    if member.role == MemberRole::Admin {
        return Err(VaultError::Verification(
            "the system administrator cannot be a trustee".into(),
        ));
    }
    Ok(())
}

fn member_public_key(crypto: &Crypto, member: &MemberRow) -> Result<PublicKeyMaterial, VaultError> {
    let pbk = member.pbk.as_deref().ok_or_else(|| {
        VaultError::Verification(format!("member {} has no key pair yet", member.name))
    })?;
    Ok(crypto.dearmor_public(pbk)?)
}

fn wrap_for(
    crypto: &Crypto,
    member: &MemberRow,
    circle_key: &SecretKeyMaterial,
) -> Result<String, VaultError> {
    let public = member_public_key(crypto, member)?;
    Ok(crypto.encrypt_and_armor_circle_key(&public, circle_key)?)
}

/// Refuse changes that would leave the circle without an ADMIN trustee.
fn ensure_keeps_admin(
    conn: &Connection,
    circle_id: CircleId,
    trustee: &TrusteeRow,
) -> Result<(), VaultError> {
    if trustee.trust_level != TrustLevel::Admin {
        return Ok(());
    }
    let admins = trustees::list_for_circle(conn, circle_id)?
        .iter()
        .filter(|t| t.trust_level == TrustLevel::Admin)
        .count();
    if admins <= 1 {
        return Err(VaultError::Verification(
            "a circle must keep at least one ADMIN trustee".into(),
        ));
    }
    Ok(())
}

/// Create a circle with a fresh key and one ADMIN trustee.
///
/// A member creates circles for itself (`owner` is `None` or its own id).
/// The system administrator must name the first trustee.
pub fn create_circle(
    state: &AppState,
    session: &MemberSession,
    name: &str,
    owner: Option<MemberId>,
) -> Result<CircleId, VaultError> {
    session.ensure_active()?;
    let name = validate_name(name, MAX_CIRCLE_NAME_LENGTH, "circle name")?;
    let owner_id = match (session.is_system_admin(), owner) {
        (true, Some(id)) => id,
        (true, None) => {
            return Err(VaultError::Verification(
                "the administrator must name the circle's first trustee".into(),
            ))
        }
        (false, None) => session.member_id(),
        (false, Some(id)) if id == session.member_id() => id,
        (false, Some(_)) => {
            return Err(VaultError::Verification(
                "a member creates circles with itself as first trustee".into(),
            ))
        }
    };

    let crypto = state.crypto()?;
    let algorithm = crypto.settings().symmetric_algorithm;
    let mut circle_key = crypto.generate_symmetric(algorithm)?;
    let result = state.store.with_transaction(|tx| {
        if circles::name_exists(tx, &name)? {
            return Err(VaultError::Verification(format!(
                "circle name {name} is already taken"
            )));
        }
        let owner = find_member(tx, owner_id)?;
        ensure_not_system_admin(&owner)?;
        let wrapped = wrap_for(&crypto, &owner, &circle_key)?;
        let circle_id = circles::insert(tx, &name)?;
        let key_id = keys::insert(tx, algorithm)?;
        trustees::insert(tx, owner_id, circle_id, key_id, TrustLevel::Admin, &wrapped)?;
        Ok(circle_id)
    });
    circle_key.destroy();

    let circle_id = result?;
    tracing::info!(circle_id = %circle_id, owner = %owner_id, algorithm = %algorithm, "circle created");
    Ok(circle_id)
}

/// Grant `member_id` access to the circle at `level`.
///
/// The caller must be an ADMIN trustee, since adding a trustee wraps the
/// caller's own copy of the circle key. Re-adding an existing trustee
/// re-wraps its copy and sets the new level.
pub fn add_trustee(
    state: &AppState,
    session: &MemberSession,
    circle_id: CircleId,
    member_id: MemberId,
    level: TrustLevel,
) -> Result<TrusteeId, VaultError> {
    let crypto = state.crypto()?;
    let trustee_id = state.store.with_transaction(|tx| {
        let member = find_member(tx, member_id)?;
        ensure_not_system_admin(&member)?;
        if session.is_system_admin() {
            ensure_circle(tx, circle_id)?;
            return Err(VaultError::Authorization(
                "the administrator holds no circle key; an ADMIN trustee must add members".into(),
            ));
        }
        let own = require_trust(tx, session, circle_id, TrustLevel::Admin)?;

        let mut circle_key = unwrap_circle_key(tx, &crypto, session, &own)?;
        let wrapped = wrap_for(&crypto, &member, &circle_key);
        circle_key.destroy();
        let wrapped = wrapped?;

        match trustees::find(tx, member_id, circle_id)? {
            Some(existing) => {
                trustees::update_key(tx, existing.id, own.key_id, &wrapped, level)?;
                Ok(existing.id)
            }
            None => trustees::insert(tx, member_id, circle_id, own.key_id, level, &wrapped),
        }
    })?;
    tracing::info!(circle_id = %circle_id, member_id = %member_id, level = %level, "trustee added");
    Ok(trustee_id)
}

/// Change a trustee's level. The wrapped key is not touched.
pub fn alter_trust_level(
    state: &AppState,
    session: &MemberSession,
    circle_id: CircleId,
    member_id: MemberId,
    level: TrustLevel,
) -> Result<(), VaultError> {
    state.store.with_transaction(|tx| {
        let member = find_member(tx, member_id)?;
        ensure_not_system_admin(&member)?;
        require_manager(tx, session, circle_id)?;
        let trustee = trustees::find(tx, member_id, circle_id)?.ok_or_else(|| {
            VaultError::Identification(format!("member {member_id} is not a trustee of {circle_id}"))
        })?;
        if level != TrustLevel::Admin {
            ensure_keeps_admin(tx, circle_id, &trustee)?;
        }
        trustees::update_level(tx, trustee.id, level)
    })?;
    tracing::info!(circle_id = %circle_id, member_id = %member_id, level = %level, "trust level altered");
    Ok(())
}

/// Remove a trustee. Members may always remove themselves; other removals
/// need management rights. The last ADMIN trustee cannot be removed.
pub fn remove_trustee(
    state: &AppState,
    session: &MemberSession,
    circle_id: CircleId,
    member_id: MemberId,
) -> Result<(), VaultError> {
    state.store.with_transaction(|tx| {
        if member_id == session.member_id() {
            session.ensure_active()?;
            ensure_circle(tx, circle_id)?;
        } else {
            require_manager(tx, session, circle_id)?;
        }
        let trustee = trustees::find(tx, member_id, circle_id)?.ok_or_else(|| {
            VaultError::Identification(format!("member {member_id} is not a trustee of {circle_id}"))
        })?;
        ensure_keeps_admin(tx, circle_id, &trustee)?;
        trustees::delete(tx, trustee.id)?;
        Ok(())
    })?;
    tracing::info!(circle_id = %circle_id, member_id = %member_id, "trustee removed");
    Ok(())
}

/// Replace the circle key.
///
/// Every record is re-encrypted under the new key with a fresh IV and
/// checksum, every trustee receives a newly wrapped copy, and the old key
/// descriptor is marked DEPRECATED, all in one transaction. A record that
/// fails its checksum aborts the rotation.
pub fn rotate_circle_key(
    state: &AppState,
    session: &MemberSession,
    circle_id: CircleId,
) -> Result<KeyId, VaultError> {
    let crypto = state.crypto()?;
    let master = state.master_key()?;
    let algorithm = crypto.settings().symmetric_algorithm;
    let mut new_key = crypto.generate_symmetric(algorithm)?;

    let result = state.store.with_transaction(|tx| {
        let own = require_trust(tx, session, circle_id, TrustLevel::Admin)?;
        let mut old_key = unwrap_circle_key(tx, &crypto, session, &own)?;
        let new_key_id = keys::insert(tx, algorithm)?;

        for record in record_rows::list_for_circle(tx, circle_id)? {
            if record.key_id != own.key_id {
                return Err(VaultError::Crypto(format!(
                    "record {} is not encrypted under the circle's current key",
                    record.id
                )));
            }
            if !crypto
                .verify_checksum(&record.data, &record.checksum)
                .unwrap_or(false)
            {
                return Err(VaultError::Integrity(format!(
                    "record {} failed its checksum, rotation aborted",
                    record.id
                )));
            }
            old_key.set_salt(master.open_salt(&record.initial_vector)?);
            let plaintext = Zeroizing::new(crypto.decrypt(&old_key, &record.data)?);

            let iv = IVSalt::random();
            let sealed_iv = master.seal_salt(&iv)?;
            new_key.set_salt(iv);
            let ciphertext = crypto.encrypt(&new_key, &plaintext)?;
            let checksum = crypto.armored_checksum(&ciphertext)?;
            record_rows::update_payload(
                tx,
                record.id,
                &EncryptedPayload {
                    key_id: new_key_id,
                    initial_vector: &sealed_iv,
                    data: &ciphertext,
                    checksum: &checksum,
                },
            )?;
        }
        old_key.destroy();

        for trustee in trustees::list_for_circle(tx, circle_id)? {
            let member = find_member(tx, trustee.member_id)?;
            let wrapped = wrap_for(&crypto, &member, &new_key)?;
            trustees::update_key(tx, trustee.id, new_key_id, &wrapped, trustee.trust_level)?;
        }
        keys::set_status(tx, own.key_id, KeyStatus::Deprecated)?;
        Ok(new_key_id)
    });
    new_key.destroy();

    let new_key_id = result?;
    tracing::info!(circle_id = %circle_id, key_id = %new_key_id, "circle key rotated");
    Ok(new_key_id)
}

/// Delete a circle with all its trustees and records. Its key descriptors
/// are marked DEPRECATED.
pub fn delete_circle(
    state: &AppState,
    session: &MemberSession,
    circle_id: CircleId,
) -> Result<(), VaultError> {
    state.store.with_transaction(|tx| {
        require_manager(tx, session, circle_id)?;
        let mut key_ids: Vec<KeyId> = trustees::list_for_circle(tx, circle_id)?
            .into_iter()
            .map(|t| t.key_id)
            .collect();
        key_ids.sort();
        key_ids.dedup();
        circles::delete(tx, circle_id)?;
        for key_id in key_ids {
            keys::set_status(tx, key_id, KeyStatus::Deprecated)?;
        }
        Ok(())
    })?;
    tracing::info!(circle_id = %circle_id, "circle deleted");
    Ok(())
}

/// List a circle's trustees. Open to any trustee and to the system administrator.
pub fn fetch_trustees(
    state: &AppState,
    session: &MemberSession,
    circle_id: CircleId,
) -> Result<Vec<TrusteeInfo>, VaultError> {
    state.store.with_conn(|conn| {
        if session.is_system_admin() {
            session.ensure_active()?;
            ensure_circle(conn, circle_id)?;
        } else {
            require_trust(conn, session, circle_id, TrustLevel::Read)?;
        }
        trustees::list_for_circle(conn, circle_id)?
            .into_iter()
            .map(|t| {
                let member = find_member(conn, t.member_id)?;
                Ok(TrusteeInfo {
                    trustee_id: t.id,
                    member_id: t.member_id,
                    member_name: member.name,
                    trust_level: t.trust_level,
                    created: from_millis(t.created),
                    changed: from_millis(t.changed),
                })
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{authenticate, create_member};
    use crate::test_support::{admin_session, ready_state};

    struct Circle {
        state: AppState,
        admin: MemberSession,
        alice: MemberSession,
        bob_id: MemberId,
        circle_id: CircleId,
    }

    fn circle_with_alice() -> Circle {
        let state = ready_state();
        let admin = admin_session(&state);
        create_member(&state, &admin, "alice", "alice password").unwrap();
        let bob_id = create_member(&state, &admin, "bob", "bob password").unwrap();
        let alice = authenticate(&state, "alice", "alice password").unwrap();
        let circle_id = create_circle(&state, &alice, "finance", None).unwrap();
        Circle {
            state,
            admin,
            alice,
            bob_id,
            circle_id,
        }
    }

    fn trustee_row(state: &AppState, member: MemberId, circle: CircleId) -> TrusteeRow {
        state
            .store
            .with_conn(|conn| trustees::find(conn, member, circle))
            .unwrap()
            .unwrap()
    }

    #[test]
    fn creator_becomes_admin_trustee() {
        let c = circle_with_alice();
        let list = fetch_trustees(&c.state, &c.alice, c.circle_id).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].member_name, "alice");
        assert_eq!(list[0].trust_level, TrustLevel::Admin);
    }

    #[test]
    fn admin_created_circle_requires_named_trustee() {
        let c = circle_with_alice();
        assert!(create_circle(&c.state, &c.admin, "ops", None).is_err());
        let circle = create_circle(&c.state, &c.admin, "ops", Some(c.bob_id)).unwrap();
        assert_eq!(
            trustee_row(&c.state, c.bob_id, circle).trust_level,
            TrustLevel::Admin
        );
        match create_circle(&c.state, &c.admin, "ops2", Some(c.admin.member_id())) {
            Err(VaultError::Verification(_)) => {}
            other => panic!("expected Verification error, got: {other:?}"),
        }
    }

    #[test]
    fn duplicate_circle_name_is_rejected() {
        let c = circle_with_alice();
        match create_circle(&c.state, &c.alice, "finance", None) {
            Err(VaultError::Verification(_)) => {}
            other => panic!("expected Verification error, got: {other:?}"),
        }
    }

    #[test]
    fn alter_keeps_wrapped_key_bytes() {
        let c = circle_with_alice();
        add_trustee(&c.state, &c.alice, c.circle_id, c.bob_id, TrustLevel::Read).unwrap();
        let before = trustee_row(&c.state, c.bob_id, c.circle_id);

        alter_trust_level(&c.state, &c.alice, c.circle_id, c.bob_id, TrustLevel::Write).unwrap();
        let after = trustee_row(&c.state, c.bob_id, c.circle_id);
        assert_eq!(after.trust_level, TrustLevel::Write);
        assert_eq!(after.circle_key, before.circle_key);
        assert_eq!(after.key_id, before.key_id);
    }

    #[test]
    fn readd_rewraps_the_key() {
        let c = circle_with_alice();
        add_trustee(&c.state, &c.alice, c.circle_id, c.bob_id, TrustLevel::Read).unwrap();
        let before = trustee_row(&c.state, c.bob_id, c.circle_id);
        add_trustee(&c.state, &c.alice, c.circle_id, c.bob_id, TrustLevel::Write).unwrap();
        let after = trustee_row(&c.state, c.bob_id, c.circle_id);
        assert_ne!(after.circle_key, before.circle_key);
        assert_eq!(after.trust_level, TrustLevel::Write);
    }

    #[test]
    fn system_admin_is_never_a_trustee() {
        let c = circle_with_alice();
        let err = add_trustee(
            &c.state,
            &c.alice,
            c.circle_id,
            c.admin.member_id(),
            TrustLevel::Read,
        )
        .unwrap_err();
        assert!(matches!(err, VaultError::Verification(_)));
        let err = alter_trust_level(
            &c.state,
            &c.admin,
            c.circle_id,
            c.admin.member_id(),
            TrustLevel::Admin,
        )
        .unwrap_err();
        assert!(matches!(err, VaultError::Verification(_)));
    }

    #[test]
    fn non_admin_trustee_cannot_manage() {
        let c = circle_with_alice();
        add_trustee(&c.state, &c.alice, c.circle_id, c.bob_id, TrustLevel::Write).unwrap();
        let bob = authenticate(&c.state, "bob", "bob password").unwrap();
        let err = alter_trust_level(
            &c.state,
            &bob,
            c.circle_id,
            c.alice.member_id(),
            TrustLevel::Read,
        )
        .unwrap_err();
        assert!(matches!(err, VaultError::Authorization(_)));
    }

    #[test]
    fn last_admin_cannot_leave_or_be_demoted() {
        let c = circle_with_alice();
        let me = c.alice.member_id();
        assert!(remove_trustee(&c.state, &c.alice, c.circle_id, me).is_err());
        assert!(alter_trust_level(&c.state, &c.admin, c.circle_id, me, TrustLevel::Read).is_err());

        add_trustee(&c.state, &c.alice, c.circle_id, c.bob_id, TrustLevel::Admin).unwrap();
        remove_trustee(&c.state, &c.alice, c.circle_id, me).unwrap();
        match fetch_trustees(&c.state, &c.alice, c.circle_id) {
            Err(VaultError::Authorization(_)) => {}
            other => panic!("expected Authorization error, got: {other:?}"),
        }
    }

    #[test]
    fn unknown_trust_relation_is_identification() {
        let c = circle_with_alice();
        match remove_trustee(&c.state, &c.alice, c.circle_id, c.bob_id) {
            Err(VaultError::Identification(_)) => {}
            other => panic!("expected Identification error, got: {other:?}"),
        }
        match fetch_trustees(&c.state, &c.alice, CircleId::new()) {
            Err(VaultError::Identification(_)) => {}
            other => panic!("expected Identification error, got: {other:?}"),
        }
    }

    #[test]
    fn rotation_rewraps_every_trustee_and_deprecates_old_key() {
        let c = circle_with_alice();
        add_trustee(&c.state, &c.alice, c.circle_id, c.bob_id, TrustLevel::Read).unwrap();
        let old = trustee_row(&c.state, c.bob_id, c.circle_id);

        let new_key_id = rotate_circle_key(&c.state, &c.alice, c.circle_id).unwrap();
        let bob_row = trustee_row(&c.state, c.bob_id, c.circle_id);
        let alice_row = trustee_row(&c.state, c.alice.member_id(), c.circle_id);
        assert_eq!(bob_row.key_id, new_key_id);
        assert_eq!(alice_row.key_id, new_key_id);
        assert_ne!(bob_row.circle_key, old.circle_key);
        assert_eq!(bob_row.trust_level, TrustLevel::Read);

        let old_descriptor = c
            .state
            .store
            .with_conn(|conn| keys::find(conn, old.key_id))
            .unwrap()
            .unwrap();
        assert_eq!(old_descriptor.status, KeyStatus::Deprecated);
    }

    #[test]
    fn delete_circle_removes_trustees() {
        let c = circle_with_alice();
        delete_circle(&c.state, &c.admin, c.circle_id).unwrap();
        match fetch_trustees(&c.state, &c.admin, c.circle_id) {
            Err(VaultError::Identification(_)) => {}
            other => panic!("expected Identification error, got: {other:?}"),
        }
        let count = c
            .state
            .store
            .with_conn(|conn| trustees::count_for_circle(conn, c.circle_id))
            .unwrap();
        assert_eq!(count, 0);
    }
}
