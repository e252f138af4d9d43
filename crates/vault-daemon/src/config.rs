//! Daemon configuration — parsed from TOML file + environment variable overrides.
//!
//! Priority: environment variables > config file > defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// General daemon settings.
    #[serde(default)]
    pub daemon: DaemonSection,

    /// Bitcoin / Electrum settings.
    #[serde(default)]
    pub bitcoin: BitcoinSection,
}

/// General daemon settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonSection {
    /// Data directory (SQLite DB file lives here).
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Sync interval in seconds.
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    /// Log level (error, warn, info, debug, trace).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Run schema migrations on open if the stored version is older than current.
    #[serde(default)]
    pub migrate: bool,
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            check_interval_secs: default_check_interval(),
            log_level: default_log_level(),
            migrate: false,
        }
    }
}

/// Bitcoin network settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BitcoinSection {
    /// Bitcoin network: "bitcoin", "testnet", "signet", "regtest".
    #[serde(default = "default_network")]
    pub network: String,

    /// Electrum server URL.
    #[serde(default = "default_electrum_url")]
    pub electrum_url: String,
}

impl Default for BitcoinSection {
    fn default() -> Self {
        Self { network: default_network(), electrum_url: default_electrum_url() }
    }
}

const RECOGNIZED_NETWORKS: [&str; 4] = ["bitcoin", "testnet", "signet", "regtest"];

fn default_data_dir() -> PathBuf {
    PathBuf::from("/data")
}

fn default_check_interval() -> u64 {
    600
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_network() -> String {
    "bitcoin".to_string()
}

fn default_electrum_url() -> String {
    electrum_client_default_for("bitcoin")
}

fn electrum_client_default_for(network: &str) -> String {
    vault_sync::electrum::default_server(match network {
        "testnet" => bitcoin::Network::Testnet,
        "signet" => bitcoin::Network::Signet,
        "regtest" => bitcoin::Network::Regtest,
        _ => bitcoin::Network::Bitcoin,
    })
    .to_string()
}

impl VaultConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: VaultConfig = toml::from_str(&contents).with_context(|| "Failed to parse TOML config")?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// Supported env vars:
    /// - `VAULT_DATA_DIR`
    /// - `VAULT_CHECK_INTERVAL`
    /// - `VAULT_LOG_LEVEL`
    /// - `VAULT_NETWORK`
    /// - `VAULT_ELECTRUM_URL`
    /// - `VAULT_MIGRATE`
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("VAULT_DATA_DIR") {
            self.daemon.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("VAULT_CHECK_INTERVAL") {
            if let Ok(secs) = v.parse::<u64>() {
                self.daemon.check_interval_secs = secs;
            }
        }
        if let Ok(v) = std::env::var("VAULT_LOG_LEVEL") {
            self.daemon.log_level = v;
        }
        if let Ok(v) = std::env::var("VAULT_MIGRATE") {
            self.daemon.migrate = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("VAULT_NETWORK") {
            self.bitcoin.network = v;
        }
        if let Ok(v) = std::env::var("VAULT_ELECTRUM_URL") {
            self.bitcoin.electrum_url = v;
        }
    }

    /// Parse the configured network string to a `bitcoin::Network`.
    pub fn network(&self) -> bitcoin::Network {
        match self.bitcoin.network.as_str() {
            "testnet" => bitcoin::Network::Testnet,
            "signet" => bitcoin::Network::Signet,
            "regtest" => bitcoin::Network::Regtest,
            _ => bitcoin::Network::Bitcoin,
        }
    }

    /// Path to the SQLite database file inside `data_dir`.
    pub fn db_path(&self) -> PathBuf {
        self.daemon.data_dir.join("vault.sqlite3")
    }

    /// Validate that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.daemon.data_dir.as_os_str().is_empty(),
            "daemon.data_dir must not be empty"
        );
        anyhow::ensure!(
            RECOGNIZED_NETWORKS.contains(&self.bitcoin.network.as_str()),
            "bitcoin.network must be one of {:?}, got {:?}",
            RECOGNIZED_NETWORKS,
            self.bitcoin.network
        );
        anyhow::ensure!(
            self.daemon.check_interval_secs >= 1,
            "daemon.check_interval_secs must be >= 1"
        );
        anyhow::ensure!(!self.bitcoin.electrum_url.is_empty(), "bitcoin.electrum_url must not be empty");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn minimal_toml() -> &'static str {
        r#"
[bitcoin]
network = "testnet"
"#
    }

    #[test]
    fn parses_minimal_config_with_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", minimal_toml()).unwrap();
        let config = VaultConfig::from_file(file.path()).unwrap();
        assert_eq!(config.bitcoin.network, "testnet");
        assert_eq!(config.daemon.check_interval_secs, 600);
        assert!(!config.daemon.migrate);
    }

    #[test]
    fn env_overrides_take_precedence_over_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", minimal_toml()).unwrap();
        let mut config = VaultConfig::from_file(file.path()).unwrap();

        std::env::set_var("VAULT_NETWORK", "regtest");
        std::env::set_var("VAULT_CHECK_INTERVAL", "30");
        config.apply_env_overrides();
        std::env::remove_var("VAULT_NETWORK");
        std::env::remove_var("VAULT_CHECK_INTERVAL");

        assert_eq!(config.bitcoin.network, "regtest");
        assert_eq!(config.daemon.check_interval_secs, 30);
    }

    #[test]
    fn validate_rejects_unrecognized_network() {
        let toml = r#"
[bitcoin]
network = "mainnet"
"#;
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", toml).unwrap();
        let config = VaultConfig::from_file(file.path()).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_data_dir() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", minimal_toml()).unwrap();
        let mut config = VaultConfig::from_file(file.path()).unwrap();
        config.daemon.data_dir = PathBuf::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_roundtrips() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", minimal_toml()).unwrap();
        let config = VaultConfig::from_file(file.path()).unwrap();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let reparsed: VaultConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(reparsed.bitcoin.network, config.bitcoin.network);
        assert_eq!(reparsed.daemon.check_interval_secs, config.daemon.check_interval_secs);
    }
}
