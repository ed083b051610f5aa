use circlevault_crypto::CryptoSettings;

use crate::auth::{authenticate, MemberSession};
use crate::bootstrap::{ensure_admin_account, install_default_master_key};
use crate::config::ServerConfig;
use crate::state::AppState;
use crate::storage::Store;

pub const ADMIN_PASSWORD: &str = "admin password";

/// In-memory config with cheap key derivation.
pub fn fast_config() -> ServerConfig {
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

/// A vault with the default MasterKey and the administrator account.
pub fn ready_state() -> AppState {
    let store = Store::open_in_memory().unwrap();
    let state = AppState::new(fast_config(), store).unwrap();
    install_default_master_key(&state).unwrap();
    ensure_admin_account(&state).unwrap();
    state
}

pub fn admin_session(state: &AppState) -> MemberSession {
    authenticate(state, "admin", ADMIN_PASSWORD).unwrap()
}
