//! The daemon loop — periodically drives the sync coordinator against a live
//! Electrum peer, sleeping `check_interval_secs` between cycles and
//! containing each cycle's errors so one bad sync doesn't kill the process.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use vault_db::sqlite_store::SqliteStore;
use vault_sync::electrum::ElectrumNetworkClient;
use vault_sync::{SyncCoordinator, SyncState};

use crate::config::VaultConfig;

/// Run the daemon loop. Blocks forever (until shutdown signal).
pub async fn run(config: VaultConfig) -> Result<()> {
    log::info!("vault-daemon starting…");
    log::info!("  Network:  {}", config.bitcoin.network);
    log::info!("  Electrum: {}", config.bitcoin.electrum_url);
    log::info!(
        "  Interval: {} seconds ({:.1} minutes)",
        config.daemon.check_interval_secs,
        config.daemon.check_interval_secs as f64 / 60.0
    );
    log::info!("  Data dir: {}", config.daemon.data_dir.display());

    std::fs::create_dir_all(&config.daemon.data_dir)
        .with_context(|| format!("Failed to create data dir: {}", config.daemon.data_dir.display()))?;

    let coordinator = Arc::new(build_coordinator(&config)?);
    install_log_subscribers(&coordinator);

    let interval = Duration::from_secs(config.daemon.check_interval_secs);

    let mut first = true;
    loop {
        if !first {
            log::info!("Sleeping {} seconds until next sync…", config.daemon.check_interval_secs);
            tokio::time::sleep(interval).await;
        }
        first = false;

        match run_sync_cycle(&coordinator).await {
            Ok(()) => log::info!("Sync cycle completed; status = {:?}", coordinator.status()),
            Err(e) => log::error!("Sync cycle failed: {:#}", e),
        }
    }
}

/// Build a coordinator and run exactly one sync cycle, for `--once` / cron use.
pub async fn run_once(config: VaultConfig) -> Result<()> {
    std::fs::create_dir_all(&config.daemon.data_dir)
        .with_context(|| format!("Failed to create data dir: {}", config.daemon.data_dir.display()))?;
    let coordinator = Arc::new(build_coordinator(&config)?);
    install_log_subscribers(&coordinator);
    run_sync_cycle(&coordinator).await
}

/// Execute a single sync cycle: connect (if needed) and pull everything new.
pub async fn run_sync_cycle(coordinator: &Arc<SyncCoordinator<ElectrumNetworkClient>>) -> Result<()> {
    let coordinator = Arc::clone(coordinator);
    tokio::task::spawn_blocking(move || -> Result<()> {
        if coordinator.status() == SyncState::Stopped {
            coordinator.start_sync().context("start_sync failed")?;
        } else {
            coordinator.resume_block_updates().context("resume_block_updates failed")?;
        }
        Ok(())
    })
    .await
    .context("sync task panicked")?
}

/// Export the vault at `config.db_path()` to a JSON file.
pub fn export_vault(config: &VaultConfig, out_path: &std::path::Path) -> Result<()> {
    let network_str = config.bitcoin.network.clone();
    let store = SqliteStore::open_with_lifecycle(&config.db_path(), Some(&network_str), config.daemon.migrate)
        .with_context(|| format!("Failed to open vault database at {}", config.db_path().display()))?;
    let json = vault_export::export_vault_to_json(&store, &network_str).context("Failed to export vault")?;
    std::fs::write(out_path, json).with_context(|| format!("Failed to write export to {}", out_path.display()))?;
    Ok(())
}

/// Import a JSON export into the vault at `config.db_path()`, which must
/// already exist (import adds rows; it does not create a database from
/// scratch — that's still `open_with_lifecycle`'s job).
pub fn import_vault(config: &VaultConfig, in_path: &std::path::Path) -> Result<()> {
    let network_str = config.bitcoin.network.clone();
    let mut store = SqliteStore::open_with_lifecycle(&config.db_path(), Some(&network_str), config.daemon.migrate)
        .with_context(|| format!("Failed to open vault database at {}", config.db_path().display()))?;
    let json = std::fs::read_to_string(in_path).with_context(|| format!("Failed to read export from {}", in_path.display()))?;
    vault_export::import_vault_from_json(&mut store, &json).context("Failed to import vault")?;
    Ok(())
}

fn build_coordinator(config: &VaultConfig) -> Result<SyncCoordinator<ElectrumNetworkClient>> {
    let network_str = config.bitcoin.network.clone();
    let store = SqliteStore::open_with_lifecycle(&config.db_path(), Some(&network_str), config.daemon.migrate)
        .with_context(|| format!("Failed to open vault database at {}", config.db_path().display()))?;
    let client = ElectrumNetworkClient::new(&config.bitcoin.electrum_url)
        .with_context(|| format!("Failed to connect to Electrum at {}", config.bitcoin.electrum_url))?;
    Ok(SyncCoordinator::new(Box::new(store), client))
}

/// Subscribe plain logging callbacks mirroring the level the original UI gave
/// each signal (errors loud, state transitions at info, confirmations at debug).
fn install_log_subscribers(coordinator: &Arc<SyncCoordinator<ElectrumNetworkClient>>) {
    let mut subs = coordinator.subscribers();
    subs.subscribe_status_changed(|status| log::info!("sync status -> {:?}", status));
    subs.subscribe_connection_error(|msg| log::error!("connection error: {}", msg));
    subs.subscribe_best_header_changed(|(height, hash)| {
        log::info!("best header changed: height={} hash={}", height, hex_hash(&hash))
    });
    subs.subscribe_merkle_block_inserted(|height| log::debug!("merkle block inserted at height {}", height));
    subs.subscribe_merkle_block_insertion_error(|msg| log::error!("merkle block insertion error: {}", msg));
    subs.subscribe_vault_error(|msg| log::error!("vault error: {}", msg));
}

fn hex_hash(hash: &[u8; 32]) -> String {
    hash.iter().map(|b| format!("{:02x}", b)).collect()
}
