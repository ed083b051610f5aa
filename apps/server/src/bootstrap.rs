//! Startup sequence: open the store, establish the MasterKey, migrate legacy
//! salts if asked to, and make sure the administrator account exists.
//!
//! The first start with a custom MasterKey re-seals every salt and IV that
//! is still sealed under the default key before the custom key goes live.
//!
//! A MasterKey URL that cannot be read leaves the vault running but not
//! ready: every operation that needs the MasterKey fails with `NotReady`.

use std::time::Duration;

use circlevault_crypto::{IVSalt, MasterKey};
use circlevault_shared::error::VaultError;
use circlevault_shared::model::MemberRole;
use zeroize::Zeroizing;

use crate::config::ServerConfig;
use crate::state::AppState;
use crate::storage::{legacy, members, rekey, Store};

#[derive(Debug, thiserror::Error)]
pub enum SecretFetchError {
    #[error("unsupported master key url scheme: {0}")]
    UnsupportedScheme(String),

    #[error("master key fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("master key file unreadable: {0}")]
    Io(#[from] std::io::Error),

    #[error("master key request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("master key secret is empty")]
    Empty,
}

/// Read the MasterKey secret from a `file://` or `http(s)://` URL.
/// Trailing whitespace is not part of the secret.
pub async fn fetch_master_secret(
    url: &str,
    timeout: Duration,
) -> Result<Zeroizing<Vec<u8>>, SecretFetchError> {
    let mut secret = tokio::time::timeout(timeout, read_secret(url, timeout))
        .await
        .map_err(|_| SecretFetchError::Timeout(timeout))??;

    let trimmed = secret
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(0, |last| last + 1);
    secret.truncate(trimmed);
    if secret.is_empty() {
        return Err(SecretFetchError::Empty);
    }
    Ok(secret)
}

async fn read_secret(url: &str, timeout: Duration) -> Result<Zeroizing<Vec<u8>>, SecretFetchError> {
    if let Some(path) = url.strip_prefix("file://") {
        return Ok(Zeroizing::new(tokio::fs::read(path).await?));
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let body = client.get(url).send().await?.error_for_status()?.bytes().await?;
        return Ok(Zeroizing::new(body.to_vec()));
    }
    let scheme = url.split("://").next().unwrap_or(url);
    Err(SecretFetchError::UnsupportedScheme(scheme.to_string()))
}

/// Derive the default MasterKey from the current system salt and install it.
pub fn install_default_master_key(state: &AppState) -> Result<(), VaultError> {
    let settings = state.settings.snapshot();
    let crypto = settings.crypto()?;
    let key = MasterKey::derive_default(
        &crypto,
        &state.config.master_key.pbe_params(),
        &settings.system_salt,
    )?;
    state.master.install_default(key)?;
    Ok(())
}

/// Establish the MasterKey. Returns false, leaving the vault not ready, when
/// a configured URL cannot be read or the key cannot be derived.
pub async fn establish_master_key(state: &AppState) -> bool {
    let settings = state.settings.snapshot();
    let Some(url) = settings.master_key_url.clone() else {
        let state = state.clone();
        return match tokio::task::spawn_blocking(move || install_default_master_key(&state)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "failed to derive default master key");
                false
            }
            Err(e) => {
                tracing::error!(error = %e, "master key derivation task failed");
                false
            }
        };
    };

    let timeout = Duration::from_secs(state.config.master_key.fetch_timeout_secs);
    let secret = match fetch_master_secret(&url, timeout).await {
        Ok(secret) => secret,
        Err(e) => {
            tracing::error!(error = %e, "master key secret unavailable, vault is not ready");
            return false;
        }
    };

    let upgrade = state.clone();
    let adopted = tokio::task::spawn_blocking(move || adopt_custom_master_key(&upgrade, &secret)).await;
    match adopted {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::error!(error = %e, "failed to establish custom master key");
            false
        }
        Err(e) => {
            tracing::error!(error = %e, "master key derivation task failed");
            false
        }
    }
}

/// Derive the custom MasterKey, move every value still sealed under the
/// default key over to it, then install it. Nothing is installed if the
/// re-seal fails.
fn adopt_custom_master_key(state: &AppState, secret: &[u8]) -> Result<(), VaultError> {
    let settings = state.settings.snapshot();
    let crypto = settings.crypto()?;
    let params = state.config.master_key.pbe_params();
    let custom = MasterKey::derive(&crypto, &params, secret, &settings.system_salt)?;

    let has_values = state.store.with_conn(members::count)? > 0;
    if has_values {
        let default = MasterKey::derive_default(&crypto, &params, &settings.system_salt)?;
        let report = rekey::reseal_all(&state.store, &default, &custom)?;
        if report.resealed() > 0 {
            tracing::warn!(
                members = report.members,
                records = report.records,
                "re-sealed stored salts under the custom master key"
            );
        }
    }
    state.master.install_custom(custom);
    Ok(())
}

/// Create the administrator account on first start. Its key pair is created
/// on its first login.
pub fn ensure_admin_account(state: &AppState) -> Result<(), VaultError> {
    let name = state.config.admin.name.trim();
    let exists = state
        .store
        .with_conn(|conn| Ok(members::find_by_name(conn, name)?.is_some()))?;
    if exists {
        return Ok(());
    }
    let master = state.master_key()?;
    let sealed_salt = master.seal_salt(&IVSalt::random())?;
    let id = state
        .store
        .with_conn(|conn| members::insert(conn, name, &sealed_salt, MemberRole::Admin, None))?;
    tracing::info!(member_id = %id, name, "administrator account created");
    if state.config.admin.password.is_none() {
        tracing::warn!("no administrator password configured; the administrator cannot log in yet");
    }
    Ok(())
}

/// Open the store and bring the vault up as far as it can go.
pub async fn initialize(config: ServerConfig) -> Result<AppState, VaultError> {
    let store = Store::open(&config.database_path)?;
    let state = AppState::new(config, store)?;

    if !establish_master_key(&state).await {
        return Ok(state);
    }
    let master = state.master_key()?;

    if state.config.migrate_legacy_salts {
        legacy::migrate_legacy_salts(&state.store, &master)?;
    } else if state
        .store
        .with_conn(|conn| legacy::has_legacy_values(conn, &master))?
    {
        tracing::warn!(
            "stored salts do not open under the master key; set MIGRATE_LEGACY_SALTS=true if they use the legacy form"
        );
    }

    ensure_admin_account(&state)?;
    tracing::info!(state = ?state.master.state(), "vault ready");
    Ok(state)
}
