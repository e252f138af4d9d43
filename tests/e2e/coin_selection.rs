//! S6: requesting more than an account holds fails coin selection before
//! anything is persisted, across three separate confirmed UTXOs.

use bitcoin::absolute::LockTime;
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid};

use vault_account::AccountManager;
use vault_core::bip32::master_from_entropy;
use vault_db::error::{AccountError, VaultError};
use vault_db::memory_store::InMemoryStore;
use vault_db::model::RedeemScriptPattern;
use vault_db::store::Store;
use vault_tx::builder::{create_tx, Payment};
use vault_tx::ingest::insert_new_tx;

fn keychain(store: &mut InMemoryStore, name: &str, seed_byte: u8) -> vault_db::model::Keychain {
    let master = master_from_entropy(&[seed_byte; 32], bitcoin::Network::Bitcoin).unwrap();
    let secp = bitcoin::secp256k1::Secp256k1::new();
    let pubkey = bitcoin::secp256k1::PublicKey::from_secret_key(&secp, &master.private_key);
    let hash = vault_core::bip32::identity_hash(&pubkey, &master.chain_code);
    let kc = vault_db::model::Keychain {
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
    vault_db::model::Keychain { id: Some(id), ..kc }
}

fn confirmed_deposit(store: &mut InMemoryStore, dest: ScriptBuf, value: u64, marker: u8) {
    let tx = Transaction {
        version: Version::ONE,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint { txid: Txid::from_str(&format!("{:02x}", marker).repeat(32)).unwrap(), vout: 0 },
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: bitcoin::Witness::new(),
        }],
        output: vec![TxOut { value: Amount::from_sat(value), script_pubkey: dest }],
    };
    insert_new_tx(store, &tx, Some(1), 0).unwrap();
}

use std::str::FromStr;

#[test]
fn requesting_more_than_the_account_holds_fails_before_any_persistence() {
    let mut store = InMemoryStore::default();
    let kc = keychain(&mut store, "solo", 0x09);
    let account = AccountManager::new_account(&mut store, "shortfall", &[kc.clone()], 1, RedeemScriptPattern::P2wsh, 1, 0).unwrap();

    let bin = store.get_bin_by_name(account.id.unwrap(), "default").unwrap().unwrap();
    let scripts = store.scripts_for_bin(bin.id.unwrap()).unwrap();
    let script = scripts.into_iter().find(|s| s.index == 0).unwrap();
    let dest = ScriptBuf::from(script.txoutscript.clone());

    // 0.5 BTC split across three separate UTXOs, all confirmed.
    confirmed_deposit(&mut store, dest.clone(), 20_000_000, 0x01);
    confirmed_deposit(&mut store, dest.clone(), 20_000_000, 0x02);
    confirmed_deposit(&mut store, dest, 10_000_000, 0x03);

    let tx_count_before = store.all_txs().unwrap().len();

    let payment = Payment { script_pubkey: vec![0x00, 0x14], value: 60_000_000 };
    let err = create_tx(&mut store, &account, &[kc], &[payment], 10_000, 0, 100).unwrap_err();

    match err {
        VaultError::Account(AccountError::InsufficientFunds { requested, available, .. }) => {
            assert_eq!(requested, 60_010_000);
            assert_eq!(available, 50_000_000);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    assert_eq!(store.all_txs().unwrap().len(), tx_count_before, "a failed coin selection must not persist a transaction");
    let unspent = store.unspent_txouts_for_account(account.id.unwrap()).unwrap();
    assert_eq!(unspent.len(), 3, "none of the three UTXOs were marked spent");
}
