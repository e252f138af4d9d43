//! Block chain state: merkle block insertion with reorg handling,
//! the sync horizon, and chain locators. Grounded on `Vault.cpp`'s
//! `insertMerkleBlock_unwrapped` / `deleteMerkleBlock_unwrapped` /
//! `getLocatorHashes_unwrapped`.

use vault_db::error::{ChainError, VaultError};
use vault_db::model::{BlockHeader, MerkleBlock, TxStatus};
use vault_db::store::Store;

/// An account created just before a block was mined, on a clock that ran a
/// little ahead of the miner's, must not make that block fail the horizon
/// check — so the horizon is backed off by this much.
const HORIZON_TOLERANCE_SECS: i64 = 6 * 60 * 60;

/// The latest timestamp a chain-empty store will accept as its first block,
/// derived from the earliest account's creation time. `None` until at least
/// one account exists — there is nothing yet worth syncing for.
pub fn max_first_block_timestamp(store: &dyn Store) -> Result<Option<i64>, VaultError> {
    Ok(store.earliest_account_time_created()?.map(|t| t - HORIZON_TOLERANCE_SECS))
}

/// Inserts a merkle block, connecting it to the chain and confirming every
/// transaction named in its hash list. On an empty store this is instead
/// the horizon check: the block is accepted verbatim as the chain's first
/// entry only if its timestamp predates every account by the tolerance
/// above; a first block whose timestamp falls after the horizon is silently
/// dropped with a `warn!` rather than failing the whole sync (the
/// resolution of this open question).
pub fn insert_merkle_block(store: &mut dyn Store, header: &BlockHeader, mb: &MerkleBlock) -> Result<Option<BlockHeader>, VaultError> {
    let mut header = header.clone();

    if store.is_empty()? {
        let horizon = match max_first_block_timestamp(store)? {
            Some(h) => h,
            None => {
                log::warn!("insert_merkle_block: no accounts exist yet, nothing to sync for");
                return Ok(None);
            }
        };
        if header.timestamp as i64 > horizon {
            log::warn!(
                "insert_merkle_block: dropping first block at height {} (timestamp {} is after sync horizon {})",
                header.height,
                header.timestamp,
                horizon
            );
            return Ok(None);
        }
        if header.height == 0 {
            return Err(ChainError::MerkleTxInvalidHeight.into());
        }

        let id = store.insert_block_header(&header)?;
        header.id = Some(id);
    } else {
        if store.get_block_header_by_hash(&header.hash)?.is_some() {
            return Ok(None);
        }
        let parent = store.get_block_header_by_hash(&header.prev_hash)?.ok_or(ChainError::MerkleTxFailedToConnect)?;
        header.height = parent.height + 1;

        let removed = unwind_from_height(store, header.height)?;
        if removed > 0 {
            log::debug!("insert_merkle_block: reorganization, {} blocks removed from chain", removed);
        }

        let id = store.insert_block_header(&header)?;
        header.id = Some(id);
    }

    confirm_transactions(store, &header, mb)?;

    let mut mb = mb.clone();
    mb.block_header_id = header.id.expect("just inserted");
    mb.txsinserted = true;
    store.insert_merkle_block(&mb)?;

    Ok(Some(header))
}

fn confirm_transactions(store: &mut dyn Store, header: &BlockHeader, mb: &MerkleBlock) -> Result<(), VaultError> {
    for (index, hash) in mb.hashes.iter().enumerate() {
        let Some(mut tx) = store.get_tx_by_signed_hash(hash)? else { continue };
        if tx.status == TxStatus::Confirmed {
            if tx.block_header_id != header.id {
                return Err(ChainError::MerkleTxMismatch(format!("tx {:02x?} already confirmed in a different block", hash)).into());
            }
            continue;
        }
        tx.status = TxStatus::Confirmed;
        tx.block_header_id = header.id;
        tx.block_index = Some(index as u32);
        store.update_tx(&tx)?;
    }
    Ok(())
}

/// Deletes every header (and its merkle block) at or above `height`,
/// descending from the tip, unconfirming each affected transaction back to
/// SENT — it was broadcast and accepted by the network at some point, just
/// not in this chain. Returns the number of headers removed.
pub fn delete_merkle_block(store: &mut dyn Store, height: u32) -> Result<u32, VaultError> {
    unwind_from_height(store, height)
}

fn unwind_from_height(store: &mut dyn Store, from_height: u32) -> Result<u32, VaultError> {
    let mut headers = store.all_block_headers_descending()?;
    headers.retain(|h| h.height >= from_height);

    for tx in store.txs_at_or_above_height(from_height)? {
        let mut tx = tx;
        tx.status = TxStatus::Sent;
        tx.block_header_id = None;
        tx.block_index = None;
        store.update_tx(&tx)?;
    }

    let mut count = 0;
    for header in headers {
        let id = header.id.expect("persisted header has an id");
        if let Some(mb) = store.get_merkle_block_by_header(id)? {
            store.delete_merkle_block(mb.id.expect("persisted merkle block has an id"))?;
        }
        store.delete_block_header(id)?;
        count += 1;
    }
    Ok(count)
}

/// Classic exponential-step chain locator: the ten most recent heights, then
/// doubling steps back to the horizon, so a peer can find the fork point in
/// O(log n) round trips regardless of reorg depth.
pub fn get_locator_hashes(store: &dyn Store) -> Result<Vec<[u8; 32]>, VaultError> {
    let Some(best) = store.best_block_header()? else { return Ok(Vec::new()) };
    if best.height == 0 {
        return Ok(Vec::new());
    }

    let mut heights = vec![best.height];
    let mut i = best.height;
    let mut n = 1u32;
    let mut step = 1u32;
    while step <= i {
        i -= step;
        n += 1;
        if n > 10 {
            step *= 2;
        }
        heights.push(i);
    }

    let mut hashes = Vec::with_capacity(heights.len());
    for h in heights {
        if let Some(header) = store.get_block_header_by_height(h)? {
            hashes.push(header.hash);
        }
    }
    Ok(hashes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vault_db::memory_store::InMemoryStore;
    use vault_db::model::{Account, RedeemScriptPattern};

    fn sample_header(height: u32, hash: u8, prev_hash: u8, timestamp: u32) -> BlockHeader {
        BlockHeader { id: None, height, hash: [hash; 32], prev_hash: [prev_hash; 32], merkle_root: [0u8; 32], timestamp, bits: 0, nonce: 0, version: 1 }
    }

    fn sample_merkle_block(hashes: Vec<[u8; 32]>) -> MerkleBlock {
        MerkleBlock { id: None, block_header_id: 0, tx_count: hashes.len() as u32, hashes, flags: vec![], txsinserted: false }
    }

    fn with_account(store: &mut InMemoryStore, time_created: i64) {
        store
            .insert_account(&Account {
                id: None,
                name: "a".into(),
                hash: [0u8; 20],
                minsigs: 1,
                keychain_ids: vec![],
                unused_pool_size: 1,
                compressed_keys: true,
                pattern: RedeemScriptPattern::P2wsh,
                time_created,
            })
            .unwrap();
    }

    #[test]
    fn first_block_accepted_only_before_horizon() {
        let mut store = InMemoryStore::default();
        with_account(&mut store, 1_000_000);

        let too_late = sample_header(5, 1, 0, 1_000_000 as u32);
        let result = insert_merkle_block(&mut store, &too_late, &sample_merkle_block(vec![])).unwrap();
        assert!(result.is_none());

        let early = sample_header(5, 1, 0, (1_000_000 - 7 * 3600) as u32);
        let result = insert_merkle_block(&mut store, &early, &sample_merkle_block(vec![])).unwrap();
        assert!(result.is_some());
    }

    #[test]
    fn connects_by_prevhash_and_computes_height() {
        let mut store = InMemoryStore::default();
        with_account(&mut store, 1_000_000);
        let genesis = sample_header(5, 1, 0, (1_000_000 - 7 * 3600) as u32);
        insert_merkle_block(&mut store, &genesis, &sample_merkle_block(vec![])).unwrap();

        let next = sample_header(0, 2, 1, (1_000_000 - 7 * 3600) as u32);
        let inserted = insert_merkle_block(&mut store, &next, &sample_merkle_block(vec![])).unwrap().unwrap();
        assert_eq!(inserted.height, 6);
    }

    #[test]
    fn disconnected_block_fails() {
        let mut store = InMemoryStore::default();
        with_account(&mut store, 1_000_000);
        let genesis = sample_header(5, 1, 0, (1_000_000 - 7 * 3600) as u32);
        insert_merkle_block(&mut store, &genesis, &sample_merkle_block(vec![])).unwrap();

        let orphan = sample_header(0, 9, 77, (1_000_000 - 7 * 3600) as u32);
        let err = insert_merkle_block(&mut store, &orphan, &sample_merkle_block(vec![])).unwrap_err();
        assert!(matches!(err, VaultError::Chain(ChainError::MerkleTxFailedToConnect)));
    }

    #[test]
    fn locator_hashes_empty_for_empty_chain() {
        let store = InMemoryStore::default();
        assert!(get_locator_hashes(&store).unwrap().is_empty());
    }
}
