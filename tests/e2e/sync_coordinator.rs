//! Driving the sync coordinator end-to-end against a mock network: reaching
//! SYNCHED with no live peer, refusing to send an unsigned transaction, and
//! broadcasting a transaction that was fully co-signed before hand-off.

use bitcoin::Network;

use vault_account::AccountManager;
use vault_core::bip32::master_from_entropy;
use vault_db::memory_store::InMemoryStore;
use vault_db::model::{Account, RedeemScriptPattern, Tx, TxIn as ModelTxIn, TxOut as ModelTxOut, TxOutStatus, TxStatus};
use vault_db::store::Store;
use vault_keychain::SessionContext;
use vault_sync::network::mock::MockNetworkClient;
use vault_sync::{SyncCoordinator, SyncError, SyncState};
use vault_tx::builder::{create_tx, Payment};
use vault_tx::signer::sign_tx;

fn keychain(store: &mut InMemoryStore, name: &str, seed_byte: u8) -> vault_db::model::Keychain {
    let master = master_from_entropy(&[seed_byte; 32], Network::Bitcoin).unwrap();
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

fn account_with_funded_bin(store: &mut InMemoryStore) -> (Account, vault_db::model::Keychain, vault_db::model::Keychain) {
    let kc1 = keychain(store, "alice", 0x05);
    let kc2 = keychain(store, "bob", 0x06);
    let account = AccountManager::new_account(store, "joint", &[kc1.clone(), kc2.clone()], 2, RedeemScriptPattern::P2wsh, 2, 0).unwrap();

    let bin = store.get_bin_by_name(account.id.unwrap(), "default").unwrap().unwrap();
    let scripts = store.scripts_for_bin(bin.id.unwrap()).unwrap();
    let script = scripts.into_iter().find(|s| s.index == 0).unwrap();

    let funding = Tx {
        id: None,
        version: 1,
        locktime: 0,
        timestamp: 0,
        status: TxStatus::Confirmed,
        conflicting: false,
        unsigned_hash: [3u8; 32],
        signed_hash: [3u8; 32],
        block_header_id: None,
        block_index: None,
        total_in: 0,
        total_out: 100_000,
        user_id: None,
    };
    let funding_id = store.insert_tx(&funding).unwrap();
    store
        .insert_txin(&ModelTxIn {
            id: None,
            tx_id: funding_id,
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
            tx_id: funding_id,
            tx_index: 0,
            value: 100_000,
            script: script.txoutscript.clone(),
            status: TxOutStatus::Unspent,
            spent_by_txin_id: None,
            sending_account_id: None,
            receiving_account_id: account.id,
            receiving_bin_id: bin.id,
            receiving_signingscript_id: script.id,
            sending_label: String::new(),
            receiving_label: String::new(),
        })
        .unwrap();

    (account, kc1, kc2)
}

#[test]
fn start_sync_reaches_synched_against_a_mock_peer() {
    let mut store = InMemoryStore::default();
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
            time_created: 1_000_000,
        })
        .unwrap();

    let coordinator = SyncCoordinator::new(Box::new(store), MockNetworkClient { height: 0, ..Default::default() });
    coordinator.start_sync().unwrap();
    assert_eq!(coordinator.status(), SyncState::Synched);
}

#[test]
fn send_tx_refuses_an_unsigned_transaction_end_to_end() {
    let mut store = InMemoryStore::default();
    let (account, kc1, kc2) = account_with_funded_bin(&mut store);
    let payment = Payment { script_pubkey: vec![0x00, 0x14], value: 50_000 };
    let built = create_tx(&mut store, &account, &[kc1, kc2], &[payment], 1_000, 0, 10).unwrap();
    assert_eq!(built.status, TxStatus::Unsigned);
    let tx_id = built.id.unwrap();

    let coordinator = SyncCoordinator::new(Box::new(store), MockNetworkClient { height: 5, ..Default::default() });
    coordinator.start_sync().unwrap();

    let err = coordinator.send_tx(tx_id).unwrap_err();
    assert!(matches!(err, SyncError::TxUnsigned));
}

#[test]
fn a_fully_cosigned_transaction_broadcasts_through_send_tx() {
    let mut store = InMemoryStore::default();
    let (account, kc1, kc2) = account_with_funded_bin(&mut store);
    let payment = Payment { script_pubkey: vec![0x00, 0x14], value: 50_000 };
    let built = create_tx(&mut store, &account, &[kc1, kc2], &[payment], 1_000, 0, 10).unwrap();
    let tx_id = built.id.unwrap();

    let mut session = SessionContext::new();
    session.insert("alice", master_from_entropy(&[0x05; 32], Network::Bitcoin).unwrap());
    session.insert("bob", master_from_entropy(&[0x06; 32], Network::Bitcoin).unwrap());
    let signed = sign_tx(&mut store, &session, tx_id, None).unwrap();
    assert_eq!(signed.status, TxStatus::Unsent);

    let network = MockNetworkClient { height: 5, ..Default::default() };
    let coordinator = SyncCoordinator::new(Box::new(store), network);
    coordinator.start_sync().unwrap();

    let sent = coordinator.send_tx(tx_id).unwrap();
    assert_eq!(sent.id, Some(tx_id));
}
