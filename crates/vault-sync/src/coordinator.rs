//! The sync coordinator: wraps the vault's persisted state behind one
//! coarse `Mutex`, drives the STOPPED..SYNCHED state machine against a
//! [`NetworkClient`], and exposes the per-signal subscription surface.
//! Grounded on `SynchedVault.cpp`'s `syncBlocks`/`sendTx`/`stopSync`/
//! `suspendBlockUpdates` and the `subscribeAddBestChain`/
//! `subscribeRemoveBestChain` reorg callbacks.

use std::sync::{Mutex, MutexGuard};

use bitcoin::hashes::Hash;
use bitcoin::Txid;

use vault_chain::bloom::build_bloom_filter;
use vault_chain::chain;
use vault_db::model::{Id, MerkleBlock, Tx, TxStatus};
use vault_db::store::Store;
use vault_keychain::SessionContext;

use crate::error::SyncError;
use crate::event::{SignalQueue, Subscribers, VaultEvent};
use crate::network::{FetchedBlock, NetworkClient};
use crate::state::SyncState;

/// The working set the coordinator's single lock protects: the
/// persistence handle, the session-scoped unlock cache, and the queue of
/// signals raised by the mutation currently in flight.
pub struct VaultState {
    pub store: Box<dyn Store>,
    pub session: SessionContext,
    signals: SignalQueue,
}

impl VaultState {
    pub fn new(store: Box<dyn Store>) -> Self {
        Self { store, session: SessionContext::new(), signals: SignalQueue::default() }
    }
}

pub struct SyncCoordinator<N: NetworkClient> {
    state: Mutex<VaultState>,
    subscribers: Mutex<Subscribers>,
    network: N,
    sync_state: Mutex<SyncState>,
    filter_false_positive_rate: f64,
    filter_tweak: u32,
}

impl<N: NetworkClient> SyncCoordinator<N> {
    pub fn new(store: Box<dyn Store>, network: N) -> Self {
        Self {
            state: Mutex::new(VaultState::new(store)),
            subscribers: Mutex::new(Subscribers::default()),
            network,
            sync_state: Mutex::new(SyncState::Stopped),
            filter_false_positive_rate: 0.001,
            filter_tweak: 0,
        }
    }

    pub fn subscribers(&self) -> MutexGuard<'_, Subscribers> {
        self.subscribers.lock().unwrap()
    }

    pub fn status(&self) -> SyncState {
        *self.sync_state.lock().unwrap()
    }

    fn set_status(&self, new: SyncState) {
        let mut s = self.sync_state.lock().unwrap();
        if *s == new {
            return;
        }
        *s = new;
        self.subscribers.lock().unwrap().dispatch(&VaultEvent::StatusChanged(new));
    }

    /// `startSync` + the first `syncBlocks` pass: installs the bloom filter
    /// and fetches everything the network has since the vault's locator.
    pub fn start_sync(&self) -> Result<(), SyncError> {
        self.set_status(SyncState::Starting);
        match self.network.tip_height() {
            Ok(_) => self.subscribers.lock().unwrap().dispatch(&VaultEvent::PeerConnected),
            Err(e) => {
                self.set_status(SyncState::Stopped);
                self.subscribers.lock().unwrap().dispatch(&VaultEvent::ConnectionError(e.to_string()));
                return Err(e);
            }
        }
        self.sync_once()
    }

    /// `stopSync`: the network connection is torn down; no further
    /// dispatches reach the ingestion engine until `start_sync` again.
    pub fn stop_sync(&self) {
        self.set_status(SyncState::Stopped);
        self.subscribers.lock().unwrap().dispatch(&VaultEvent::PeerDisconnected);
    }

    /// `suspendBlockUpdates`: headers may still arrive, but merkle blocks
    /// are no longer applied to the store until sync resumes.
    pub fn suspend_block_updates(&self) {
        if self.status() == SyncState::SynchingBlocks || self.status() == SyncState::Synched {
            self.set_status(SyncState::SynchingHeaders);
        }
    }

    pub fn resume_block_updates(&self) -> Result<(), SyncError> {
        self.sync_once()
    }

    /// One full header+block sync pass (`SynchedVault::syncBlocks`): builds
    /// the bloom filter from current store contents, asks the network for
    /// everything past the vault's locator, and applies it through
    /// `vault_chain::chain`. Reorgs are handled transparently: a header that
    /// fails to connect by `prev_hash` triggers an unwind inside
    /// `insert_merkle_block` itself, so no separate reorg path is needed
    /// here beyond re-deriving the locator on the next pass.
    pub fn sync_once(&self) -> Result<(), SyncError> {
        let mut state = self.state.lock().unwrap();

        let start_time = match chain::max_first_block_timestamp(state.store.as_ref())? {
            Some(t) => t.max(0) as u32,
            None => {
                log::debug!("sync_once: no accounts exist yet, nothing to sync for");
                return Ok(());
            }
        };

        let filter = build_bloom_filter(state.store.as_ref(), self.filter_false_positive_rate, self.filter_tweak)?;
        self.network.set_bloom_filter(&filter);
        self.network.watch_scripts(&vault_chain::bloom::watched_scripts(state.store.as_ref())?);

        let locator = chain::get_locator_hashes(state.store.as_ref())?;
        self.set_status(SyncState::SynchingHeaders);

        let fetched = self.network.fetch_headers(&locator, start_time)?;
        if !fetched.is_empty() {
            self.set_status(SyncState::SynchingBlocks);
        }

        for block in &fetched {
            self.apply_fetched_block(&mut state, block);
        }
        state.signals.flush(&self.subscribers.lock().unwrap());

        self.set_status(SyncState::Synched);
        Ok(())
    }

    fn apply_fetched_block(&self, state: &mut VaultState, block: &FetchedBlock) {
        let mb = block.merkle_block.clone().unwrap_or_else(|| MerkleBlock {
            id: None,
            block_header_id: 0,
            tx_count: 0,
            hashes: Vec::new(),
            flags: Vec::new(),
            txsinserted: false,
        });

        match chain::insert_merkle_block(state.store.as_mut(), &block.header, &mb) {
            Ok(Some(header)) => {
                state.signals.push(VaultEvent::BestHeaderChanged { height: header.height, hash: header.hash });
                state.signals.push(VaultEvent::MerkleBlockInserted { height: header.height });
                let block_header_id = header.id.expect("just inserted");
                for hash in &mb.hashes {
                    self.fetch_and_ingest_merkle_tx(state, block_header_id, *hash, header.timestamp as i64);
                }
            }
            Ok(None) => {}
            Err(e) => {
                state.signals.clear();
                state.signals.push(VaultEvent::MerkleBlockInsertionError(e.to_string()));
                state.signals.flush(&self.subscribers.lock().unwrap());
            }
        }
    }

    /// Fetches the full body of a transaction the merkle block named and
    /// routes it through `vault_tx::ingest`, mirroring `SynchedVault`'s
    /// `getTx` follow-up to every matched hash in an incoming merkle block.
    fn fetch_and_ingest_merkle_tx(&self, state: &mut VaultState, block_header_id: Id, hash: [u8; 32], timestamp: i64) {
        let txid = Txid::from_byte_array(hash);
        let raw = match self.network.get_tx(&txid) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                log::warn!("apply_fetched_block: peer has no body for matched tx {:02x?}", hash);
                return;
            }
            Err(e) => {
                state.signals.push(VaultEvent::TxConfirmationError(e.to_string()));
                return;
            }
        };

        match vault_tx::ingest::insert_merkle_tx(state.store.as_mut(), block_header_id, &raw, timestamp) {
            Ok(Some(tx)) => state.signals.push(VaultEvent::TxInserted(tx.id.expect("just inserted"))),
            Ok(None) => {}
            Err(e) => state.signals.push(VaultEvent::TxInsertionError(e.to_string())),
        }
    }

    /// `sendTx`: recursively broadcasts any unconfirmed dependency before
    /// the requested transaction, refusing anything UNSIGNED along the way.
    pub fn send_tx(&self, tx_id: Id) -> Result<Tx, SyncError> {
        if self.status() == SyncState::Stopped {
            return Err(SyncError::NotConnected);
        }
        let mut state = self.state.lock().unwrap();
        let tx = state.store.get_tx(tx_id)?.ok_or(SyncError::Vault(vault_db::error::TxError::NotFound.into()))?;
        self.recursive_send_tx(&mut state, &tx)?;
        Ok(tx)
    }

    fn recursive_send_tx(&self, state: &mut VaultState, tx: &Tx) -> Result<(), SyncError> {
        if tx.status == TxStatus::Unsigned {
            return Err(SyncError::TxUnsigned);
        }

        let tx_id = tx.id.expect("persisted tx has an id");
        for txin in state.store.txins_for_tx(tx_id)? {
            let Some((_, txout)) = state.store.find_txout_by_outpoint(&txin.outpoint_hash, txin.outpoint_index)? else {
                continue;
            };
            let Some(dependency) = state.store.get_tx(txout.tx_id)? else { continue };

            if dependency.status == TxStatus::Unsigned {
                return Err(SyncError::DependencyUnsigned);
            }
            if dependency.status == TxStatus::Unsent || dependency.status == TxStatus::Propagated {
                self.recursive_send_tx(state, &dependency)?;
            }
        }

        let raw = vault_tx::signer::reconstruct_raw_for_sighash(state.store.as_ref(), tx, tx_id)?;
        self.network.broadcast(&raw)?;
        self.network.get_tx(&raw.compute_txid())?;
        Ok(())
    }
}
