//! An Electrum-backed [`NetworkClient`], styled after the blocking wrapper
//! pattern of the original Electrum client: a synchronous handle over
//! `electrum_client::Client`, called from whatever thread the coordinator
//! runs on.
//!
//! Electrum has no BIP37 bloom-filter concept — servers index by address and
//! answer `script_get_history` directly, so there is nothing for the vault's
//! filter to install on the wire. `set_bloom_filter` is therefore a
//! documented no-op here; a true P2P backend would actually send it.

use std::collections::HashMap;
use std::sync::Mutex;

use bitcoin::hashes::Hash;
use bitcoin::{ScriptBuf, Transaction};
use electrum_client::{Client, ElectrumApi};

use vault_chain::BloomFilter;
use vault_db::model::{BlockHeader, MerkleBlock};

use crate::error::SyncError;
use crate::network::{FetchedBlock, NetworkClient};

pub struct ElectrumNetworkClient {
    client: Client,
    watched: Mutex<Vec<ScriptBuf>>,
}

impl ElectrumNetworkClient {
    pub fn new(url: &str) -> Result<Self, SyncError> {
        if !url.starts_with("ssl://") && !url.contains("tls") {
            log::warn!("connecting to Electrum server without TLS: {url}");
        }
        let client = Client::new(url).map_err(|e| SyncError::Connection(e.to_string()))?;
        Ok(Self { client, watched: Mutex::new(Vec::new()) })
    }

    /// Per watched script, asks the server for its history and buckets the
    /// confirmed entries by height. Electrum has no bloom filter to answer
    /// "what's in block N" with, so this stands in for it: one
    /// `script_get_history` call per address the vault owns a script for.
    fn matched_txs_by_height(&self) -> HashMap<u32, Vec<[u8; 32]>> {
        let mut by_height: HashMap<u32, Vec<[u8; 32]>> = HashMap::new();
        for script in self.watched.lock().unwrap().iter() {
            let history = match self.client.script_get_history(script.as_script()) {
                Ok(h) => h,
                Err(e) => {
                    log::warn!("script_get_history failed: {e}");
                    continue;
                }
            };
            for entry in history {
                if entry.height > 0 {
                    by_height.entry(entry.height as u32).or_default().push(entry.tx_hash.to_byte_array());
                }
            }
        }
        by_height
    }
}

fn to_block_header(height: u32, header: &bitcoin::block::Header) -> BlockHeader {
    BlockHeader {
        id: None,
        height,
        hash: header.block_hash().to_byte_array(),
        prev_hash: header.prev_blockhash.to_byte_array(),
        merkle_root: header.merkle_root.to_byte_array(),
        timestamp: header.time,
        bits: header.bits.to_consensus(),
        nonce: header.nonce,
        version: header.version.to_consensus(),
    }
}

impl NetworkClient for ElectrumNetworkClient {
    fn tip_height(&self) -> Result<u32, SyncError> {
        let notification = self.client.block_headers_subscribe()?;
        Ok(notification.height as u32)
    }

    /// Electrum serves headers by height, not by locator — the locator's
    /// fork point is resolved by the caller comparing hashes at each height
    /// it already has, so this simply returns the contiguous range from a
    /// conservative lookback through the current tip.
    fn fetch_headers(&self, locator: &[[u8; 32]], start_time: u32) -> Result<Vec<FetchedBlock>, SyncError> {
        let tip = self.tip_height()?;
        let lookback = (locator.len() as u32 * 2).max(1);
        let start_height = tip.saturating_sub(lookback);
        let count = (tip - start_height + 1) as usize;

        let result = self.client.block_headers(start_height as usize, count)?;
        let matched = self.matched_txs_by_height();

        let mut out = Vec::new();
        for (i, header) in result.headers.iter().enumerate() {
            if header.time < start_time {
                continue;
            }
            let height = start_height + i as u32;
            let merkle_block = matched.get(&height).map(|hashes| MerkleBlock {
                id: None,
                block_header_id: 0,
                tx_count: hashes.len() as u32,
                hashes: hashes.clone(),
                flags: Vec::new(),
                txsinserted: false,
            });
            out.push(FetchedBlock { header: to_block_header(height, header), merkle_block });
        }
        Ok(out)
    }

    fn set_bloom_filter(&self, _filter: &BloomFilter) {
        log::debug!("ElectrumNetworkClient::set_bloom_filter: no-op, Electrum indexes by address server-side");
    }

    fn watch_scripts(&self, scripts: &[ScriptBuf]) {
        *self.watched.lock().unwrap() = scripts.to_vec();
    }

    fn broadcast(&self, tx: &Transaction) -> Result<(), SyncError> {
        self.client.transaction_broadcast(tx)?;
        Ok(())
    }

    fn get_tx(&self, txid: &bitcoin::Txid) -> Result<Option<Transaction>, SyncError> {
        match self.client.transaction_get(txid) {
            Ok(tx) => Ok(Some(tx)),
            Err(_) => Ok(None),
        }
    }
}

/// Default Electrum servers per network, mirroring the original client's
/// fallback table.
pub fn default_server(network: bitcoin::Network) -> &'static str {
    match network {
        bitcoin::Network::Bitcoin => "ssl://blockstream.info:700",
        bitcoin::Network::Testnet => "ssl://blockstream.info:993",
        bitcoin::Network::Signet => "ssl://mempool.space:60602",
        bitcoin::Network::Regtest => "tcp://127.0.0.1:50001",
        _ => "ssl://blockstream.info:700",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_servers_match_network() {
        assert!(default_server(bitcoin::Network::Bitcoin).contains("700"));
        assert!(default_server(bitcoin::Network::Testnet).contains("993"));
    }

    #[test]
    #[ignore = "requires network access"]
    fn connects_and_reads_tip_height() {
        let client = ElectrumNetworkClient::new(default_server(bitcoin::Network::Bitcoin)).unwrap();
        let height = client.tip_height().unwrap();
        assert!(height > 900_000);
    }
}
