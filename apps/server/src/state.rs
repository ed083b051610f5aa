use std::sync::Arc;

use circlevault_crypto::{Crypto, MasterKey, MasterKeyHolder, MasterKeyState};
use circlevault_shared::error::VaultError;

use crate::config::ServerConfig;
use crate::settings::{RuntimeSettings, SettingsRegistry};
use crate::storage::Store;

/// Shared vault state handed to every operation.
///
/// Every field is `Arc`-wrapped so cloning `AppState` is cheap; the
/// background sanity task holds its own clone.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub settings: Arc<SettingsRegistry>,
    pub master: Arc<MasterKeyHolder>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Layer persisted setting overrides on top of `config`. The MasterKey
    /// starts unset; see [`crate::bootstrap`].
    pub fn new(config: ServerConfig, store: Store) -> Result<Self, VaultError> {
        let persisted = store.with_conn(crate::storage::settings::load_all)?;
        let settings = RuntimeSettings::layered(&config, &persisted);
        Ok(Self {
            store: Arc::new(store),
            settings: Arc::new(SettingsRegistry::new(settings)),
            master: Arc::new(MasterKeyHolder::new()),
            config: Arc::new(config),
        })
    }

    /// Crypto engine for the current settings snapshot.
    pub fn crypto(&self) -> Result<Crypto, VaultError> {
        self.settings.snapshot().crypto()
    }

    /// The current MasterKey, or `NotReady` before bootstrap has established one.
    pub fn master_key(&self) -> Result<Arc<MasterKey>, VaultError> {
        Ok(self.master.current()?)
    }

    pub fn is_ready(&self) -> bool {
        self.master.state() != MasterKeyState::Unset
    }
}
