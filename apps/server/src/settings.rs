//! Runtime settings registry.
//!
//! Operations read an `Arc<RuntimeSettings>` snapshot once per call, so an
//! update only affects operations that start after it. Updates are validated
//! per key: a rejected key leaves its current value in place and yields a
//! warning, while accepted keys are persisted and take effect together.

use std::sync::{Arc, RwLock};

use circlevault_crypto::{Crypto, CryptoSettings, MasterKey, MasterKeyState};
use circlevault_shared::error::{ReturnCode, VaultError};

use crate::auth::MemberSession;
use crate::config::ServerConfig;
use crate::state::AppState;
use crate::storage::{self, members, records};

/// Names accepted by [`update_settings`] and the `settings` table.
pub const SETTING_NAMES: &[&str] = &[
    "symmetric_algorithm",
    "asymmetric_algorithm",
    "signature_algorithm",
    "pbe_algorithm",
    "hash_algorithm",
    "charset",
    "pbe_iterations",
    "pbe_memory_kib",
    "system_salt",
    "master_key_url",
    "session_timeout_minutes",
    "sanity_enabled",
    "sanity_interval_days",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub crypto: CryptoSettings,
    pub system_salt: String,
    pub master_key_url: Option<String>,
    pub session_timeout_minutes: u32,
    pub sanity_enabled: bool,
    pub sanity_interval_days: u32,
}

/// A setting change that was not applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingWarning {
    pub name: String,
    pub code: ReturnCode,
    pub reason: String,
}

impl SettingWarning {
    fn from_error(name: &str, err: &VaultError) -> Self {
        Self {
            name: name.to_string(),
            code: err.return_code(),
            reason: err.to_string(),
        }
    }
}

impl RuntimeSettings {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            crypto: config.crypto.clone(),
            system_salt: config.system_salt.clone(),
            master_key_url: config.master_key.url.clone(),
            session_timeout_minutes: config.session_timeout_minutes,
            sanity_enabled: config.sanity.enabled,
            sanity_interval_days: config.sanity.interval_days,
        }
    }

    /// File config with persisted overrides applied on top. Overrides that no
    /// longer validate are skipped with a warning.
    pub fn layered(config: &ServerConfig, persisted: &[(String, String)]) -> Self {
        let mut settings = Self::from_config(config);
        for (name, value) in persisted {
            if let Err(e) = settings.apply(name, value) {
                tracing::warn!(setting = %name, error = %e, "ignoring persisted setting");
            }
        }
        settings
    }

    /// Validate and apply one setting. On error `self` is unchanged.
    pub fn apply(&mut self, name: &str, value: &str) -> Result<(), VaultError> {
        match name {
            "symmetric_algorithm" | "asymmetric_algorithm" | "signature_algorithm"
            | "pbe_algorithm" | "hash_algorithm" => {
                self.crypto.set_algorithm(name, value)?;
            }
            "charset" => {
                let mut crypto = self.crypto.clone();
                crypto.charset = value.trim().to_string();
                crypto.validate()?;
                self.crypto = crypto;
            }
            "pbe_iterations" | "pbe_memory_kib" => {
                let parsed = parse_number(name, value)?;
                let mut crypto = self.crypto.clone();
                if name == "pbe_iterations" {
                    crypto.pbe_iterations = parsed;
                } else {
                    crypto.pbe_memory_kib = parsed;
                }
                crypto.validate()?;
                self.crypto = crypto;
            }
            "system_salt" => {
                if value.is_empty() {
                    return Err(VaultError::Setting("system_salt must not be empty".into()));
                }
                self.system_salt = value.to_string();
            }
            "master_key_url" => {
                self.master_key_url = Some(value.trim().to_string()).filter(|url| !url.is_empty());
            }
            "session_timeout_minutes" => {
                let minutes = parse_number(name, value)?;
                if minutes == 0 {
                    return Err(VaultError::Setting(
                        "session_timeout_minutes must be at least 1".into(),
                    ));
                }
                self.session_timeout_minutes = minutes;
            }
            "sanity_enabled" => {
                self.sanity_enabled = value.trim().parse().map_err(|_| {
                    VaultError::Setting(format!("sanity_enabled must be true or false, got {value}"))
                })?;
            }
            "sanity_interval_days" => {
                self.sanity_interval_days = parse_number(name, value)?;
            }
            other => return Err(VaultError::Setting(format!("unknown setting: {other}"))),
        }
        Ok(())
    }

    /// Text form of a setting, as persisted.
    pub fn value_of(&self, name: &str) -> Option<String> {
        let value = match name {
            "symmetric_algorithm" => self.crypto.symmetric_algorithm.to_string(),
            "asymmetric_algorithm" => self.crypto.asymmetric_algorithm.to_string(),
            "signature_algorithm" => self.crypto.signature_algorithm.to_string(),
            "pbe_algorithm" => self.crypto.pbe_algorithm.to_string(),
            "hash_algorithm" => self.crypto.hash_algorithm.to_string(),
            "charset" => self.crypto.charset.clone(),
            "pbe_iterations" => self.crypto.pbe_iterations.to_string(),
            "pbe_memory_kib" => self.crypto.pbe_memory_kib.to_string(),
            "system_salt" => self.system_salt.clone(),
            "master_key_url" => self.master_key_url.clone().unwrap_or_default(),
            "session_timeout_minutes" => self.session_timeout_minutes.to_string(),
            "sanity_enabled" => self.sanity_enabled.to_string(),
            "sanity_interval_days" => self.sanity_interval_days.to_string(),
            _ => return None,
        };
        Some(value)
    }

    pub fn crypto(&self) -> Result<Crypto, VaultError> {
        Ok(Crypto::new(self.crypto.clone())?)
    }
}

fn parse_number(name: &str, value: &str) -> Result<u32, VaultError> {
    value
        .trim()
        .parse()
        .map_err(|_| VaultError::Setting(format!("{name} must be a non-negative integer, got {value}")))
}

/// Process-wide holder of the current settings snapshot.
#[derive(Debug)]
pub struct SettingsRegistry {
    current: RwLock<Arc<RuntimeSettings>>,
}

impl SettingsRegistry {
    pub fn new(settings: RuntimeSettings) -> Self {
        Self {
            current: RwLock::new(Arc::new(settings)),
        }
    }

    pub fn snapshot(&self) -> Arc<RuntimeSettings> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    fn replace(&self, settings: RuntimeSettings) {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(settings);
    }
}

/// Apply setting changes as the system administrator.
///
/// Returns one warning per rejected change. A `system_salt` change is only
/// accepted while the default MasterKey is active and the administrator is
/// the only member; it re-derives the MasterKey and re-seals every stored
/// salt and IV in the same transaction that persists the new salt. A
/// `master_key_url` is only accepted while the default MasterKey is active;
/// the next start re-seals everything under the custom key.
pub fn update_settings(
    state: &AppState,
    session: &MemberSession,
    changes: &[(&str, &str)],
) -> Result<Vec<SettingWarning>, VaultError> {
    session.ensure_admin()?;

    let current = state.settings.snapshot();
    let mut next = (*current).clone();
    let mut warnings = Vec::new();
    let mut accepted: Vec<&str> = Vec::new();
    let mut new_salt: Option<&str> = None;

    for &(name, value) in changes {
        if name == "system_salt" {
            if value == current.system_salt {
                continue;
            }
            match check_salt_change(state, value) {
                Ok(()) => new_salt = Some(value),
                Err(e) => {
                    tracing::warn!(setting = name, error = %e, "setting rejected");
                    warnings.push(SettingWarning::from_error(name, &e));
                }
            }
            continue;
        }
        if name == "master_key_url" {
            if let Err(e) = check_url_change(state, &current, value) {
                tracing::warn!(setting = name, error = %e, "setting rejected");
                warnings.push(SettingWarning::from_error(name, &e));
                continue;
            }
        }
        match next.apply(name, value) {
            Ok(()) => {
                if !accepted.contains(&name) {
                    accepted.push(name);
                }
            }
            Err(e) => {
                tracing::warn!(setting = name, error = %e, "setting rejected");
                warnings.push(SettingWarning::from_error(name, &e));
            }
        }
    }

    let crypto = next.crypto()?;
    let new_master = match new_salt {
        Some(salt) => {
            next.system_salt = salt.to_string();
            accepted.push("system_salt");
            Some(MasterKey::derive_default(
                &crypto,
                &state.config.master_key.pbe_params(),
                salt,
            )?)
        }
        None => None,
    };

    if accepted.is_empty() {
        return Ok(warnings);
    }

    let old_master = match new_master {
        Some(_) => Some(state.master_key()?),
        None => None,
    };
    state.store.with_transaction(|tx| {
        if let (Some(old), Some(new)) = (old_master.as_deref(), new_master.as_ref()) {
            if members::count(tx)? > 1 {
                return Err(VaultError::Verification(
                    "system salt can only change while the administrator is the only member".into(),
                ));
            }
            for member in members::list_all(tx)? {
                let salt = old.open_salt(&member.salt)?;
                members::update_salt(tx, member.id, &new.seal_salt(&salt)?)?;
            }
            for (id, sealed) in records::all_initial_vectors(tx)? {
                let iv = old.open_salt(&sealed)?;
                records::update_initial_vector(tx, id, &new.seal_salt(&iv)?)?;
            }
        }
        for name in &accepted {
            if let Some(value) = next.value_of(name) {
                storage::settings::upsert(tx, name, &value)?;
            }
        }
        Ok(())
    })?;

    if let Some(master) = new_master {
        state.master.install_default(master)?;
        tracing::warn!("system salt changed, master key re-derived");
    }
    if next.master_key_url != current.master_key_url {
        tracing::info!("master_key_url changed; stored salts move to the new key on restart");
    }
    state.settings.replace(next);
    tracing::info!(accepted = ?accepted, rejected = warnings.len(), "settings updated");
    Ok(warnings)
}

/// Values sealed under a custom MasterKey cannot be recovered with any other
/// key, so the URL is fixed once a custom key is active.
fn check_url_change(state: &AppState, current: &RuntimeSettings, value: &str) -> Result<(), VaultError> {
    let value = value.trim();
    let unchanged = match current.master_key_url.as_deref() {
        Some(url) => url == value,
        None => value.is_empty(),
    };
    if !unchanged && state.master.state() == MasterKeyState::Custom {
        return Err(VaultError::Verification(
            "master_key_url cannot change while a custom master key is active".into(),
        ));
    }
    Ok(())
}

fn check_salt_change(state: &AppState, value: &str) -> Result<(), VaultError> {
    if value.is_empty() {
        return Err(VaultError::Setting("system_salt must not be empty".into()));
    }
    if state.master.state() != MasterKeyState::Default {
        return Err(VaultError::Verification(
            "system salt cannot change while a custom master key is active".into(),
        ));
    }
    let count = state.store.with_conn(members::count)?;
    if count > 1 {
        return Err(VaultError::Verification(
            "system salt can only change while the administrator is the only member".into(),
        ));
    }
    Ok(())
}
