//! Member accounts and sessions.
//!
//! A member's private key is stored encrypted under a key derived from the
//! password and the member's salt. Authenticating unlocks it into a
//! [`MemberSession`], which is the only holder of the unlocked key and wipes
//! it when dropped.

use chrono::{DateTime, Duration, Utc};
use circlevault_crypto::{
    Algorithm, Crypto, CryptoError, IVSalt, MasterKey, PbeParams, PrivateKeyMaterial,
};
use circlevault_shared::constants::MAX_MEMBER_NAME_LENGTH;
use circlevault_shared::error::VaultError;
use circlevault_shared::ids::MemberId;
use circlevault_shared::model::MemberRole;
use subtle::ConstantTimeEq;

use crate::state::AppState;
use crate::storage::members::{self, MemberKeys, MemberRow};
use crate::storage::trustees;
use crate::validation::{validate_name, validate_password};

/// An authenticated member holding its unlocked private key.
pub struct MemberSession {
    member_id: MemberId,
    name: String,
    role: MemberRole,
    private_key: PrivateKeyMaterial,
    expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for MemberSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemberSession")
            .field("member_id", &self.member_id)
            .field("name", &self.name)
            .field("role", &self.role)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl MemberSession {
    pub fn member_id(&self) -> MemberId {
        self.member_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> MemberRole {
        self.role
    }

    pub fn is_system_admin(&self) -> bool {
        self.role == MemberRole::Admin
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Fails with `Authentication` once the session has expired or been closed.
    pub fn ensure_active(&self) -> Result<(), VaultError> {
        if self.private_key.is_destroyed() {
            return Err(VaultError::Authentication("session is closed".into()));
        }
        if Utc::now() >= self.expires_at {
            return Err(VaultError::Authentication("session has expired".into()));
        }
        Ok(())
    }

    pub fn ensure_admin(&self) -> Result<(), VaultError> {
        self.ensure_active()?;
        if !self.is_system_admin() {
            return Err(VaultError::Authorization(
                "only the system administrator may do this".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn private_key(&self) -> Result<&PrivateKeyMaterial, VaultError> {
        self.ensure_active()?;
        Ok(&self.private_key)
    }

    /// Wipe the private key. Further use of the session fails.
    pub fn close(&mut self) {
        if !self.private_key.is_destroyed() {
            self.private_key.destroy();
            tracing::debug!(member_id = %self.member_id, "session closed");
        }
    }

    #[cfg(test)]
    pub(crate) fn expire(&mut self) {
        self.expires_at = Utc::now() - Duration::seconds(1);
    }
}

impl Drop for MemberSession {
    fn drop(&mut self) {
        self.private_key.destroy();
    }
}

fn invalid_credentials() -> VaultError {
    VaultError::Authentication("invalid member name or password".into())
}

/// Unlock a member's private key with its password.
///
/// The system administrator is created without a key pair; its first
/// successful login, with the configured administrator password, generates
/// and stores one.
pub fn authenticate(state: &AppState, name: &str, password: &str) -> Result<MemberSession, VaultError> {
    let crypto = state.crypto()?;
    let master = state.master_key()?;
    let settings = state.settings.snapshot();

    let member = state
        .store
        .with_conn(|conn| members::find_by_name(conn, name.trim()))?
        .ok_or_else(invalid_credentials)?;
    let salt = master.open_salt(&member.salt)?;

    let private_key = match (&member.pvk, &member.pbe_params) {
        (Some(pvk), Some(params)) => unlock_private_key(&crypto, params, password, &salt, pvk)?,
        _ if member.role == MemberRole::Admin => {
            setup_admin_keys(state, &crypto, &master, &member, password, &salt)?
        }
        _ => {
            tracing::warn!(member = %member.name, "member has no key pair");
            return Err(invalid_credentials());
        }
    };

    tracing::info!(member_id = %member.id, role = %member.role, "member authenticated");
    Ok(MemberSession {
        member_id: member.id,
        name: member.name,
        role: member.role,
        private_key,
        expires_at: Utc::now() + Duration::minutes(i64::from(settings.session_timeout_minutes)),
    })
}

fn unlock_private_key(
    crypto: &Crypto,
    params: &str,
    password: &str,
    salt: &IVSalt,
    armored: &str,
) -> Result<PrivateKeyMaterial, VaultError> {
    let params: PbeParams = params.parse()?;
    let mut unlock = crypto.derive_password_key(&params, password.as_bytes(), salt)?;
    let result = crypto.dearmor_private(&unlock, armored);
    unlock.destroy();
    match result {
        Ok(key) => Ok(key),
        Err(CryptoError::DecryptionFailed(_)) => Err(invalid_credentials()),
        Err(e) => Err(e.into()),
    }
}

/// Generate a key pair and lock its private half under `password`.
fn lock_new_key_pair(
    crypto: &Crypto,
    password: &str,
    salt: &IVSalt,
) -> Result<(PrivateKeyMaterial, LockedKeys), VaultError> {
    let algorithm = crypto.settings().asymmetric_algorithm;
    let (public, private) = crypto.generate_asymmetric(algorithm)?;
    let locked = lock_private_key(crypto, &private, password, salt)?;
    Ok((
        private,
        LockedKeys {
            pbk: crypto.armor_public(&public)?,
            ..locked
        },
    ))
}

fn lock_private_key(
    crypto: &Crypto,
    private: &PrivateKeyMaterial,
    password: &str,
    salt: &IVSalt,
) -> Result<LockedKeys, VaultError> {
    let params = crypto.settings().pbe_params();
    let mut unlock = crypto.derive_password_key(&params, password.as_bytes(), salt)?;
    let pvk = crypto.encrypt_and_armor_private(&unlock, private);
    unlock.destroy();
    Ok(LockedKeys {
        pbk: String::new(),
        pvk: pvk?,
        pbe_params: params.to_string(),
        algorithm: private.algorithm(),
    })
}

/// Armored key columns of a member row.
struct LockedKeys {
    pbk: String,
    pvk: String,
    pbe_params: String,
    algorithm: Algorithm,
}

impl LockedKeys {
    fn columns(&self) -> MemberKeys<'_> {
        MemberKeys {
            pbk: &self.pbk,
            pvk: &self.pvk,
            pbe_params: &self.pbe_params,
            algorithm: self.algorithm.name(),
        }
    }
}

fn setup_admin_keys(
    state: &AppState,
    crypto: &Crypto,
    master: &MasterKey,
    member: &MemberRow,
    password: &str,
    salt: &IVSalt,
) -> Result<PrivateKeyMaterial, VaultError> {
    let Some(configured) = state.config.admin.password.as_deref() else {
        tracing::warn!("administrator login attempted but no admin password is configured");
        return Err(invalid_credentials());
    };
    if !bool::from(configured.as_bytes().ct_eq(password.as_bytes())) {
        return Err(invalid_credentials());
    }

    let (private, locked) = lock_new_key_pair(crypto, password, salt)?;
    let sealed_salt = master.seal_salt(salt)?;
    let stored = state
        .store
        .with_conn(|conn| members::set_initial_keys(conn, member.id, &sealed_salt, &locked.columns()))?;
    if !stored {
        // Another login stored a key pair first; unlock that one instead.
        let row = state
            .store
            .with_conn(|conn| members::find(conn, member.id))?
            .ok_or_else(invalid_credentials)?;
        let (Some(pvk), Some(params)) = (row.pvk, row.pbe_params) else {
            return Err(invalid_credentials());
        };
        return unlock_private_key(crypto, &params, password, salt, &pvk);
    }
    tracing::info!(member_id = %member.id, "administrator key pair created");
    Ok(private)
}

/// Create a member account with its own key pair. Administrator only.
pub fn create_member(
    state: &AppState,
    session: &MemberSession,
    name: &str,
    password: &str,
) -> Result<MemberId, VaultError> {
    session.ensure_admin()?;
    let name = validate_name(name, MAX_MEMBER_NAME_LENGTH, "member name")?;
    validate_password(password)?;
    let crypto = state.crypto()?;
    let master = state.master_key()?;

    let salt = IVSalt::random();
    let (mut private, locked) = lock_new_key_pair(&crypto, password, &salt)?;
    private.destroy();
    let sealed_salt = master.seal_salt(&salt)?;

    let id = state.store.with_transaction(|tx| {
        if members::name_exists(tx, &name)? {
            return Err(VaultError::Verification(format!(
                "member name {name} is already taken"
            )));
        }
        members::insert(tx, &name, &sealed_salt, MemberRole::Standard, Some(&locked.columns()))
    })?;
    tracing::info!(member_id = %id, "member created");
    Ok(id)
}

/// Re-lock the caller's private key under a new password and a fresh salt.
pub fn change_password(
    state: &AppState,
    session: &MemberSession,
    old_password: &str,
    new_password: &str,
) -> Result<(), VaultError> {
    session.ensure_active()?;
    validate_password(new_password)?;
    let crypto = state.crypto()?;
    let master = state.master_key()?;

    let member = state
        .store
        .with_conn(|conn| members::find(conn, session.member_id()))?
        .ok_or_else(|| VaultError::Identification("member no longer exists".into()))?;
    let (Some(pvk), Some(params)) = (&member.pvk, &member.pbe_params) else {
        return Err(invalid_credentials());
    };
    let old_salt = master.open_salt(&member.salt)?;
    let mut private = unlock_private_key(&crypto, params, old_password, &old_salt, pvk)?;

    let salt = IVSalt::random();
    let locked = lock_private_key(&crypto, &private, new_password, &salt);
    private.destroy();
    let locked = LockedKeys {
        pbk: member.pbk.clone().unwrap_or_default(),
        ..locked?
    };
    let sealed_salt = master.seal_salt(&salt)?;
    state
        .store
        .with_conn(|conn| members::update_keys(conn, member.id, &sealed_salt, &locked.columns()))?;
    tracing::info!(member_id = %member.id, "password changed");
    Ok(())
}

/// Remove a member and every trust relation it holds. Administrator only.
///
/// Refused while the member is the only trustee of a circle, since that
/// circle's key would become unrecoverable, or its last ADMIN trustee.
pub fn delete_member(state: &AppState, session: &MemberSession, member_id: MemberId) -> Result<(), VaultError> {
    session.ensure_admin()?;
    if member_id == session.member_id() {
        return Err(VaultError::Verification(
            "the administrator cannot delete its own account".into(),
        ));
    }
    state.store.with_transaction(|tx| {
        if members::find(tx, member_id)?.is_none() {
            return Err(VaultError::Identification(format!("no member {member_id}")));
        }
        let orphaned = trustees::circles_with_sole_trustee(tx, member_id)?;
        if let Some(circle) = orphaned.first() {
            return Err(VaultError::Verification(format!(
                "member is the only trustee of circle {circle}; delete the circle first"
            )));
        }
        let headless = trustees::circles_where_last_admin(tx, member_id)?;
        if let Some(circle) = headless.first() {
            return Err(VaultError::Verification(format!(
                "member is the last ADMIN trustee of circle {circle}; promote another trustee first"
            )));
        }
        members::delete(tx, member_id)?;
        Ok(())
    })?;
    tracing::info!(member_id = %member_id, "member deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{admin_session, ready_state, ADMIN_PASSWORD};
    use circlevault_shared::error::ReturnCode;

    #[test]
    fn admin_first_login_creates_key_pair() {
        let state = ready_state();
        let row = state
            .store
            .with_conn(|conn| members::find_by_name(conn, "admin"))
            .unwrap()
            .unwrap();
        assert!(row.pvk.is_none());

        let session = authenticate(&state, "admin", ADMIN_PASSWORD).unwrap();
        assert!(session.is_system_admin());

        let row = state
            .store
            .with_conn(|conn| members::find_by_name(conn, "admin"))
            .unwrap()
            .unwrap();
        assert!(row.pvk.is_some());
        assert_eq!(row.algorithm.as_deref(), Some("CURVE_25519"));

        // second login unlocks the stored key
        authenticate(&state, "admin", ADMIN_PASSWORD).unwrap();
    }

    #[test]
    fn admin_first_login_requires_configured_password() {
        let state = ready_state();
        match authenticate(&state, "admin", "not the password") {
            Err(VaultError::Authentication(_)) => {}
            other => panic!("expected Authentication error, got: {other:?}"),
        }
    }

    #[test]
    fn wrong_password_is_an_authentication_warning() {
        let state = ready_state();
        let admin = admin_session(&state);
        create_member(&state, &admin, "alice", "alice password").unwrap();

        let err = authenticate(&state, "alice", "wrong password").unwrap_err();
        assert_eq!(err.return_code(), ReturnCode::AuthenticationWarning);
        let err = authenticate(&state, "nobody", "alice password").unwrap_err();
        assert_eq!(err.return_code(), ReturnCode::AuthenticationWarning);
        authenticate(&state, "alice", "alice password").unwrap();
    }

    #[test]
    fn create_member_is_admin_only_and_names_are_unique() {
        let state = ready_state();
        let admin = admin_session(&state);
        create_member(&state, &admin, "alice", "alice password").unwrap();

        match create_member(&state, &admin, "alice", "another password") {
            Err(VaultError::Verification(_)) => {}
            other => panic!("expected Verification error, got: {other:?}"),
        }

        let alice = authenticate(&state, "alice", "alice password").unwrap();
        match create_member(&state, &alice, "bob", "bob password") {
            Err(VaultError::Authorization(_)) => {}
            other => panic!("expected Authorization error, got: {other:?}"),
        }
    }

    #[test]
    fn change_password_relocks_private_key() {
        let state = ready_state();
        let admin = admin_session(&state);
        create_member(&state, &admin, "alice", "alice password").unwrap();
        let alice = authenticate(&state, "alice", "alice password").unwrap();

        assert!(change_password(&state, &alice, "wrong password", "new password!").is_err());
        change_password(&state, &alice, "alice password", "new password!").unwrap();

        assert!(authenticate(&state, "alice", "alice password").is_err());
        let again = authenticate(&state, "alice", "new password!").unwrap();
        assert_eq!(again.member_id(), alice.member_id());
    }

    #[test]
    fn expired_and_closed_sessions_are_rejected() {
        let state = ready_state();
        let mut admin = admin_session(&state);
        admin.expire();
        assert_eq!(
            admin.ensure_active().unwrap_err().return_code(),
            ReturnCode::AuthenticationWarning
        );

        let mut admin = admin_session(&state);
        admin.close();
        admin.close();
        assert!(create_member(&state, &admin, "alice", "alice password").is_err());
    }

    #[test]
    fn delete_member_rules() {
        let state = ready_state();
        let admin = admin_session(&state);
        let alice = create_member(&state, &admin, "alice", "alice password").unwrap();

        assert!(delete_member(&state, &admin, admin.member_id()).is_err());
        delete_member(&state, &admin, alice).unwrap();
        match delete_member(&state, &admin, alice) {
            Err(VaultError::Identification(_)) => {}
            other => panic!("expected Identification error, got: {other:?}"),
        }
    }

    #[test]
    fn last_admin_trustee_cannot_be_deleted() {
        use crate::trust::{add_trustee, alter_trust_level, create_circle};
        use circlevault_shared::model::TrustLevel;

        let state = ready_state();
        let admin = admin_session(&state);
        let alice_id = create_member(&state, &admin, "alice", "alice password").unwrap();
        let bob_id = create_member(&state, &admin, "bob", "bob password").unwrap();
        let alice = authenticate(&state, "alice", "alice password").unwrap();
        let circle = create_circle(&state, &alice, "finance", None).unwrap();
        add_trustee(&state, &alice, circle, bob_id, TrustLevel::Read).unwrap();

        match delete_member(&state, &admin, alice_id) {
            Err(VaultError::Verification(msg)) => assert!(msg.contains("last ADMIN")),
            other => panic!("expected Verification error, got: {other:?}"),
        }

        alter_trust_level(&state, &alice, circle, bob_id, TrustLevel::Admin).unwrap();
        delete_member(&state, &admin, alice_id).unwrap();
    }
}
