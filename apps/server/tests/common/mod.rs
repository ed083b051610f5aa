#![allow(dead_code)]

use circlevault_crypto::CryptoSettings;
use circlevault_server::auth::{authenticate, create_member, MemberSession};
use circlevault_server::bootstrap::initialize;
use circlevault_server::config::ServerConfig;
use circlevault_server::state::AppState;
use circlevault_shared::ids::MemberId;

pub const ADMIN_PASSWORD: &str = "admin password";

/// In-memory vault config with cheap key derivation.
pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.database_path = ":memory:".into();
    config.crypto = CryptoSettings {
        pbe_iterations: 1,
        pbe_memory_kib: 64,
        ..CryptoSettings::default()
    };
    config.master_key.pbe_iterations = 1;
    config.master_key.pbe_memory_kib = 64;
    config.admin.password = Some(ADMIN_PASSWORD.into());
    config
}

pub async fn ready_vault() -> AppState {
    let state = initialize(test_config()).await.unwrap();
    assert!(state.is_ready());
    state
}

pub fn admin(state: &AppState) -> MemberSession {
    authenticate(state, "admin", ADMIN_PASSWORD).unwrap()
}

/// Create a member and log it in. The password is derived from the name.
pub fn member(state: &AppState, admin: &MemberSession, name: &str) -> (MemberId, MemberSession) {
    let password = format!("{name} password");
    let id = create_member(state, admin, name, &password).unwrap();
    (id, authenticate(state, name, &password).unwrap())
}
