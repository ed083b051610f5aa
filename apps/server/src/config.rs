use circlevault_crypto::master_key::MASTER_KEY_PBE;
use circlevault_crypto::{CryptoSettings, PbeParams};
use serde::Deserialize;

/// Server configuration loaded from config.toml with env var overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// SQLite database file, or ":memory:". Default: "circlevault.db"
    #[serde(default = "default_database_path")]
    pub database_path: String,
    /// Tracing log level. Default: "info"
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Salt every MasterKey is derived with. Must be final before members are created.
    #[serde(default = "default_system_salt")]
    pub system_salt: String,
    /// Idle lifetime of a member session. Default: 30
    #[serde(default = "default_session_timeout_minutes")]
    pub session_timeout_minutes: u32,
    /// Rewrite salts and IVs stored in the legacy raw-text form at startup. Default: false
    #[serde(default)]
    pub migrate_legacy_salts: bool,
    #[serde(default)]
    pub crypto: CryptoSettings,
    #[serde(default)]
    pub sanity: SanityConfig,
    #[serde(default)]
    pub master_key: MasterKeyConfig,
    #[serde(default)]
    pub admin: AdminConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SanityConfig {
    /// Default: true
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Run a full scan of every record before serving. Default: false
    #[serde(default)]
    pub startup_scan: bool,
    /// Minimum age in days of a record's last check before it is checked again. Default: 1
    #[serde(default = "default_interval_days")]
    pub interval_days: u32,
    /// Period of the background scan. Default: 60
    #[serde(default = "default_scan_every_minutes")]
    pub scan_every_minutes: u64,
    /// Records fetched per batch. Default: 100
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MasterKeyConfig {
    /// `file://` or `http(s)://` location of the MasterKey secret. Unset keeps the default key.
    #[serde(default)]
    pub url: Option<String>,
    /// Default: 10
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Argon2 time cost of the MasterKey derivation. Default: 3
    #[serde(default = "default_master_iterations")]
    pub pbe_iterations: u32,
    /// Argon2 memory cost of the MasterKey derivation, in KiB. Default: 19456
    #[serde(default = "default_master_memory_kib")]
    pub pbe_memory_kib: u32,
}

impl MasterKeyConfig {
    /// Changing these has the same effect as changing the system salt.
    pub fn pbe_params(&self) -> PbeParams {
        PbeParams {
            iterations: self.pbe_iterations,
            memory_kib: self.pbe_memory_kib,
            ..MASTER_KEY_PBE
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdminConfig {
    /// Default: "admin"
    #[serde(default = "default_admin_name")]
    pub name: String,
    /// Password accepted on the administrator's first login, when its key pair is created.
    #[serde(default)]
    pub password: Option<String>,
}

fn default_database_path() -> String {
    "circlevault.db".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_system_salt() -> String {
    "circlevault".to_string()
}
fn default_session_timeout_minutes() -> u32 {
    30
}
fn default_true() -> bool {
    true
}
fn default_interval_days() -> u32 {
    1
}
fn default_scan_every_minutes() -> u64 {
    60
}
fn default_batch_size() -> u32 {
    100
}
fn default_fetch_timeout_secs() -> u64 {
    10
}
fn default_master_iterations() -> u32 {
    MASTER_KEY_PBE.iterations
}
fn default_master_memory_kib() -> u32 {
    MASTER_KEY_PBE.memory_kib
}
fn default_admin_name() -> String {
    "admin".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            log_level: default_log_level(),
            system_salt: default_system_salt(),
            session_timeout_minutes: default_session_timeout_minutes(),
            migrate_legacy_salts: false,
            crypto: CryptoSettings::default(),
            sanity: SanityConfig::default(),
            master_key: MasterKeyConfig::default(),
            admin: AdminConfig::default(),
        }
    }
}

impl Default for SanityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            startup_scan: false,
            interval_days: default_interval_days(),
            scan_every_minutes: default_scan_every_minutes(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for MasterKeyConfig {
    fn default() -> Self {
        Self {
            url: None,
            fetch_timeout_secs: default_fetch_timeout_secs(),
            pbe_iterations: default_master_iterations(),
            pbe_memory_kib: default_master_memory_kib(),
        }
    }
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            name: default_admin_name(),
            password: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from TOML file with environment variable overrides.
    ///
    /// Reads `config.toml` from CWD (or path in `CONFIG_PATH` env var),
    /// then overrides individual fields from env vars. A missing file is
    /// treated as an empty one.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(format!("cannot read {path}: {e}").into()),
        };
        Self::from_toml_str(&contents)
    }

    /// Load configuration from a TOML string, then apply env var overrides.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let mut config: ServerConfig = toml::from_str(toml_str)?;
        config.apply_env_overrides()?;
        config.crypto.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to the config.
    ///
    /// Returns an error if an env var is set but has an invalid format
    /// (e.g., SANITY_INTERVAL_DAYS=abc).
    pub fn apply_env_overrides(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        if let Ok(val) = std::env::var("DATABASE_PATH") {
            self.database_path = val;
        }
        if let Ok(val) = std::env::var("LOG_LEVEL") {
            self.log_level = val;
        }
        if let Ok(val) = std::env::var("MASTER_KEY_URL") {
            self.master_key.url = Some(val).filter(|url| !url.is_empty());
        }
        if let Ok(val) = std::env::var("SYSTEM_SALT") {
            self.system_salt = val;
        }
        if let Ok(val) = std::env::var("ADMIN_NAME") {
            self.admin.name = val;
        }
        if let Ok(val) = std::env::var("ADMIN_PASSWORD") {
            self.admin.password = Some(val);
        }
        if let Ok(val) = std::env::var("SESSION_TIMEOUT_MINUTES") {
            self.session_timeout_minutes = val
                .parse()
                .map_err(|_| format!("invalid SESSION_TIMEOUT_MINUTES value: {val}"))?;
        }
        if let Ok(val) = std::env::var("SANITY_ENABLED") {
            self.sanity.enabled = val
                .parse()
                .map_err(|_| format!("invalid SANITY_ENABLED value: {val}"))?;
        }
        if let Ok(val) = std::env::var("SANITY_STARTUP") {
            self.sanity.startup_scan = val
                .parse()
                .map_err(|_| format!("invalid SANITY_STARTUP value: {val}"))?;
        }
        if let Ok(val) = std::env::var("SANITY_INTERVAL_DAYS") {
            self.sanity.interval_days = val
                .parse()
                .map_err(|_| format!("invalid SANITY_INTERVAL_DAYS value: {val}"))?;
        }
        if let Ok(val) = std::env::var("MIGRATE_LEGACY_SALTS") {
            self.migrate_legacy_salts = val
                .parse()
                .map_err(|_| format!("invalid MIGRATE_LEGACY_SALTS value: {val}"))?;
        }
        Ok(())
    }
}
