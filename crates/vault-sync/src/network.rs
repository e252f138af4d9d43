//! The network client abstraction. Blocking,
//! not `async`: the original's `CoinQ::Network::NetworkSync` is driven from a
//! dedicated I/O thread, and this mirrors that by keeping the trait
//! synchronous and letting the coordinator's caller decide whether to run it
//! on a blocking task. `tokio` appears only in the daemon binary's outer
//! retry loop, never inside this trait.

use bitcoin::{ScriptBuf, Transaction};

use vault_chain::BloomFilter;
use vault_db::model::{BlockHeader, MerkleBlock};

use crate::error::SyncError;

/// A block header together with the merkle block proving which of the
/// vault's watched elements it contains, if any were delivered for it.
/// `merkle_block.hashes` names the transactions the coordinator must then
/// fetch (via [`NetworkClient::get_tx`]) and forward into `vault_tx::ingest`.
pub struct FetchedBlock {
    pub header: BlockHeader,
    pub merkle_block: Option<MerkleBlock>,
}

/// What the sync coordinator needs from a network backend. Implementations
/// are free to be a full P2P node (true BIP37 filtering) or a protocol that
/// approximates it server-side (see [`crate::electrum::ElectrumNetworkClient`]).
pub trait NetworkClient: Send {
    /// The peer's current best height, or an error if disconnected.
    fn tip_height(&self) -> Result<u32, SyncError>;

    /// Headers descending from the fork point implied by `locator`, oldest
    /// first, whose timestamp is at or after `start_time` — mirrors
    /// `CoinQ::Network::NetworkSync::syncBlocks(locatorHashes, startTime)`.
    fn fetch_headers(&self, locator: &[[u8; 32]], start_time: u32) -> Result<Vec<FetchedBlock>, SyncError>;

    /// Installs the vault's bloom filter on the connection. A client backed
    /// by a protocol with no filter concept (e.g. Electrum's server-side
    /// address indexing) may implement this as a documented no-op.
    fn set_bloom_filter(&self, filter: &BloomFilter);

    /// Tells the backend which literal scriptPubKeys the vault currently
    /// watches. A true P2P backend already gets this from the bloom filter
    /// and may leave this a no-op; a backend with no filter concept (Electrum)
    /// uses this list directly to ask its server for each script's history.
    fn watch_scripts(&self, _scripts: &[ScriptBuf]) {}

    /// Broadcasts a fully signed transaction, returning once the peer has
    /// accepted it into its mempool.
    fn broadcast(&self, tx: &Transaction) -> Result<(), SyncError>;

    /// Requests a transaction back from the network, to confirm propagation
    /// (mirrors the original's post-`sendTx` `getTx` call).
    fn get_tx(&self, txid: &bitcoin::Txid) -> Result<Option<Transaction>, SyncError>;
}

/// A network double with no actual I/O. Not test-gated: exercised by this
/// crate's own unit tests and reused by the end-to-end test crate, which
/// needs a way to drive the coordinator without a live peer.
pub mod mock {
    use std::sync::Mutex;

    use super::*;

    /// A network double with no actual I/O, for coordinator tests.
    #[derive(Default)]
    pub struct MockNetworkClient {
        pub height: u32,
        pub headers: Vec<FetchedBlock>,
        pub broadcasted: Mutex<Vec<Transaction>>,
        pub fail_connection: bool,
    }

    impl NetworkClient for MockNetworkClient {
        fn tip_height(&self) -> Result<u32, SyncError> {
            if self.fail_connection {
                return Err(SyncError::NotConnected);
            }
            Ok(self.height)
        }

        fn fetch_headers(&self, _locator: &[[u8; 32]], _start_time: u32) -> Result<Vec<FetchedBlock>, SyncError> {
            if self.fail_connection {
                return Err(SyncError::NotConnected);
            }
            Ok(self
                .headers
                .iter()
                .map(|f| FetchedBlock { header: f.header.clone(), merkle_block: f.merkle_block.clone() })
                .collect())
        }

        fn set_bloom_filter(&self, _filter: &BloomFilter) {}

        fn broadcast(&self, tx: &Transaction) -> Result<(), SyncError> {
            if self.fail_connection {
                return Err(SyncError::NotConnected);
            }
            self.broadcasted.lock().unwrap().push(tx.clone());
            Ok(())
        }

        fn get_tx(&self, _txid: &bitcoin::Txid) -> Result<Option<Transaction>, SyncError> {
            Ok(None)
        }
    }
}
