//! vault-daemon — headless daemon driving the sync coordinator against a live
//! Electrum peer on a fixed interval.
//!
//! # Usage
//!
//! ```bash
//! vault-daemon --config /path/to/vault-daemon.toml
//! vault-daemon --once      # Run a single sync cycle and exit
//! vault-daemon --validate  # Validate config and exit
//! ```

mod config;
mod daemon;

use anyhow::{Context, Result};
use std::path::PathBuf;

fn main() -> Result<()> {
    // electrum-client's rustls backend needs a process-wide default crypto
    // provider installed before the first TLS connection.
    rustls::crypto::ring::default_provider().install_default().ok();

    let args: Vec<String> = std::env::args().collect();

    let mut config_path = PathBuf::from("/config/vault-daemon.toml");
    let mut one_shot = false;
    let mut validate_only = false;
    let mut export_path: Option<PathBuf> = None;
    let mut import_path: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                if i < args.len() {
                    config_path = PathBuf::from(&args[i]);
                } else {
                    anyhow::bail!("--config requires a path argument");
                }
            }
            "--once" => one_shot = true,
            "--validate" => validate_only = true,
            "--export" => {
                i += 1;
                if i < args.len() {
                    export_path = Some(PathBuf::from(&args[i]));
                } else {
                    anyhow::bail!("--export requires a path argument");
                }
            }
            "--import" => {
                i += 1;
                if i < args.len() {
                    import_path = Some(PathBuf::from(&args[i]));
                } else {
                    anyhow::bail!("--import requires a path argument");
                }
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "--version" | "-V" => {
                println!("vault-daemon {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            other => anyhow::bail!("Unknown argument: {}", other),
        }
        i += 1;
    }

    let mut vault_config = config::VaultConfig::from_file(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    vault_config.apply_env_overrides();
    vault_config.validate().context("Configuration validation failed")?;

    std::env::set_var("RUST_LOG", &vault_config.daemon.log_level);
    env_logger::init();

    if validate_only {
        println!("Configuration is valid.");
        println!("  Network:         {}", vault_config.bitcoin.network);
        println!("  Electrum:        {}", vault_config.bitcoin.electrum_url);
        println!("  Data dir:        {}", vault_config.daemon.data_dir.display());
        println!("  Check interval:  {} secs", vault_config.daemon.check_interval_secs);
        println!("  Migrate:         {}", vault_config.daemon.migrate);
        return Ok(());
    }

    if let Some(path) = export_path {
        daemon::export_vault(&vault_config, &path)?;
        log::info!("Exported vault to {}", path.display());
        return Ok(());
    }

    if let Some(path) = import_path {
        daemon::import_vault(&vault_config, &path)?;
        log::info!("Imported vault from {}", path.display());
        return Ok(());
    }

    let rt = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;

    if one_shot {
        log::info!("Running single sync cycle…");
        rt.block_on(daemon::run_once(vault_config))?;
        log::info!("Done.");
    } else {
        let shutdown = rt.block_on(async {
            tokio::select! {
                result = daemon::run(vault_config) => result,
                _ = tokio::signal::ctrl_c() => {
                    log::info!("Received shutdown signal. Exiting…");
                    Ok(())
                }
            }
        });

        if let Err(e) = shutdown {
            log::error!("Daemon error: {:#}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}

fn print_help() {
    println!(
        r#"vault-daemon — headless sync-coordinator daemon

USAGE:
    vault-daemon [OPTIONS]

OPTIONS:
    -c, --config <PATH>   Config file path (default: /config/vault-daemon.toml)
    --once                 Run a single sync cycle and exit
    --validate             Validate config file and exit
    --export <PATH>        Export the vault to a JSON file and exit
    --import <PATH>        Import a JSON export into the vault and exit
    -h, --help             Show this help message
    -V, --version          Show version

ENVIRONMENT VARIABLES (override config file):
    VAULT_DATA_DIR        Data directory path
    VAULT_CHECK_INTERVAL  Sync interval in seconds
    VAULT_LOG_LEVEL       Log level (error/warn/info/debug/trace)
    VAULT_NETWORK         Bitcoin network (bitcoin/testnet/signet/regtest)
    VAULT_ELECTRUM_URL    Electrum server URL
    VAULT_MIGRATE         Run schema migrations on open (1/true)

EXAMPLES:
    vault-daemon --config /path/to/config.toml
    vault-daemon --config config.toml --once
    vault-daemon --config config.toml --validate
"#
    );
}
