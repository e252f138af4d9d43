//! Conflict detection and reorg handling against a live chain of headers.

use bitcoin::absolute::LockTime;
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness};
use std::str::FromStr;

use vault_chain::chain::insert_merkle_block;
use vault_db::memory_store::InMemoryStore;
use vault_db::model::{Account, AccountBin, BlockHeader, MerkleBlock, RedeemScriptPattern, SigningScript, SigningScriptStatus, TxStatus};
use vault_db::store::Store;
use vault_tx::identity;
use vault_tx::ingest::{insert_merkle_tx, insert_new_tx};

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

fn setup_account_with_script(store: &mut InMemoryStore) -> ScriptBuf {
    let account_id = store
        .insert_account(&Account {
            id: None,
            name: "conflicts".into(),
            hash: [7u8; 20],
            minsigs: 1,
            keychain_ids: vec![],
            unused_pool_size: 1,
            compressed_keys: true,
            pattern: RedeemScriptPattern::P2sh,
            time_created: 0,
        })
        .unwrap();
    let bin_id = store
        .insert_bin(&AccountBin {
            id: None,
            account_id,
            name: "default".into(),
            index: 2,
            hash: [0u8; 20],
            next_script_index: 0,
            script_count: 1,
            labels: Default::default(),
            imported_keychain_ids: None,
        })
        .unwrap();
    let txoutscript = ScriptBuf::from_hex("a914bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb87").unwrap();
    store
        .insert_signing_script(&SigningScript {
            id: None,
            bin_id,
            index: 0,
            label: String::new(),
            status: SigningScriptStatus::Unused,
            redeem_script: vec![],
            txinscript_template: vec![],
            txoutscript: txoutscript.to_bytes(),
        })
        .unwrap();
    txoutscript
}

fn funding_tx(script_pubkey: ScriptBuf, value: u64) -> Transaction {
    Transaction {
        version: Version::ONE,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint { txid: Txid::from_str(&"be".repeat(32)).unwrap(), vout: 0 },
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: vec![TxOut { value: Amount::from_sat(value), script_pubkey }],
    }
}

fn spending_tx(outpoint_hash: [u8; 32], dest: ScriptBuf, value: u64, version: u32) -> Transaction {
    Transaction {
        version: Version(version as i32),
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint { txid: Txid::from_byte_array(outpoint_hash), vout: 0 },
            script_sig: ScriptBuf::from_hex("00").unwrap(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: vec![TxOut { value: Amount::from_sat(value), script_pubkey: dest }],
    }
}

/// Two transactions spending the same confirmed output are both flagged
/// conflicting; confirming one in a merkle block clears only its own flag.
#[test]
fn double_spend_flags_both_spenders_and_confirmation_clears_only_the_winner() {
    let mut store = InMemoryStore::default();
    let txoutscript = setup_account_with_script(&mut store);
    let funding = funding_tx(txoutscript.clone(), 50_000);
    let funding_record = insert_new_tx(&mut store, &funding, None, 0).unwrap().unwrap();
    let outpoint = funding_record.signed_hash;

    let dest_a = ScriptBuf::from_hex("76a914aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa88ac").unwrap();
    let dest_b = ScriptBuf::from_hex("76a914cccccccccccccccccccccccccccccccccccccccc88ac").unwrap();
    let tx_a = spending_tx(outpoint, dest_a, 49_000, 1);
    let tx_b = spending_tx(outpoint, dest_b, 48_000, 2);

    let record_a = insert_new_tx(&mut store, &tx_a, None, 1).unwrap().unwrap();
    assert!(!record_a.conflicting, "the first spender has nothing to conflict with yet");

    let record_b = insert_new_tx(&mut store, &tx_b, None, 2).unwrap().unwrap();
    assert!(record_b.conflicting);
    let record_a_after_b = store.get_tx(record_a.id.unwrap()).unwrap().unwrap();
    assert!(record_a_after_b.conflicting, "the earlier spender is retroactively flagged once a rival appears");

    let confirmed_a = insert_merkle_tx(&mut store, 1, &tx_a, 3).unwrap().unwrap();
    assert!(!confirmed_a.conflicting);
    assert_eq!(confirmed_a.status, TxStatus::Confirmed);

    let record_b_after_confirm = store.get_tx(record_b.id.unwrap()).unwrap().unwrap();
    assert!(record_b_after_confirm.conflicting, "the losing double-spend stays flagged");
    assert_ne!(record_b_after_confirm.status, TxStatus::Confirmed);
}

fn sample_header(height: u32, hash: u8, prev_hash: u8, timestamp: u32) -> BlockHeader {
    BlockHeader { id: None, height, hash: [hash; 32], prev_hash: [prev_hash; 32], merkle_root: [0u8; 32], timestamp, bits: 0, nonce: 0, version: 1 }
}

fn merkle_block_with(hashes: Vec<[u8; 32]>) -> MerkleBlock {
    MerkleBlock { id: None, block_header_id: 0, tx_count: hashes.len() as u32, hashes, flags: vec![], txsinserted: false }
}

/// A header replacing an already-occupied height (a reorg) unwinds every
/// block at or above it, reverting any transaction it had confirmed.
#[test]
fn competing_header_at_occupied_height_reorgs_and_reverts_confirmed_tx() {
    let mut store = InMemoryStore::default();
    with_account(&mut store, 10_000_000);

    let h100 = sample_header(100, 100, 0, 1_000);
    insert_merkle_block(&mut store, &h100, &merkle_block_with(vec![])).unwrap();

    let txoutscript = ScriptBuf::from_hex("a914dddddddddddddddddddddddddddddddddddddddd87").unwrap();
    let t = funding_tx(txoutscript, 20_000);
    let stored_t = vault_tx::ingest::insert_new_tx(&mut store, &t, None, 1_000).unwrap().unwrap();
    assert_eq!(stored_t.status, TxStatus::Propagated);

    let h101 = sample_header(0, 101, 100, 1_001);
    insert_merkle_block(&mut store, &h101, &merkle_block_with(vec![])).unwrap();
    let h102 = sample_header(0, 102, 101, 1_002);
    insert_merkle_block(&mut store, &h102, &merkle_block_with(vec![])).unwrap();

    let h103 = sample_header(0, 103, 102, 1_003);
    let confirmed = insert_merkle_block(&mut store, &h103, &merkle_block_with(vec![stored_t.signed_hash])).unwrap().unwrap();
    assert_eq!(confirmed.height, 103);
    let after_confirm = store.get_tx(stored_t.id.unwrap()).unwrap().unwrap();
    assert_eq!(after_confirm.status, TxStatus::Confirmed);
    assert_eq!(after_confirm.block_header_id, confirmed.id);

    let h104 = sample_header(0, 104, 103, 1_004);
    insert_merkle_block(&mut store, &h104, &merkle_block_with(vec![])).unwrap();
    let h105 = sample_header(0, 105, 104, 1_005);
    insert_merkle_block(&mut store, &h105, &merkle_block_with(vec![])).unwrap();
    assert!(store.get_block_header_by_height(105).unwrap().is_some());

    // A competing block at height 103 (same parent, different hash) reorgs
    // out 103-105 before being inserted in their place.
    let rival_103 = sample_header(0, 200, 102, 1_003);
    let reinserted = insert_merkle_block(&mut store, &rival_103, &merkle_block_with(vec![])).unwrap().unwrap();
    assert_eq!(reinserted.height, 103);
    assert_eq!(reinserted.hash, [200u8; 32]);

    assert!(store.get_block_header_by_height(104).unwrap().is_none());
    assert!(store.get_block_header_by_height(105).unwrap().is_none());

    let reverted_t = store.get_tx(stored_t.id.unwrap()).unwrap().unwrap();
    assert_eq!(reverted_t.status, TxStatus::Sent, "unwound from the old chain, the tx reverts to broadcast-but-unconfirmed");
    assert!(reverted_t.block_header_id.is_none());

    // The rival chain's height 103 can now confirm the same tx again.
    let recomfirmed = insert_merkle_tx(&mut store, reinserted.id.unwrap(), &t, 1_003).unwrap().unwrap();
    assert_eq!(recomfirmed.status, TxStatus::Confirmed);
}
