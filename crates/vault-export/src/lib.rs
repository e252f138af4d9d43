//! Versioned JSON import/export of a vault's persisted entities.
//!
//! Chosen over the original's Boost text archive: `serde_json` is already the
//! workspace's serialization crate, and nothing outside this codebase needs to
//! read the format, so byte-exact interop was never a goal. Round-trip within
//! this implementation is the only contract `import_vault(export_vault(store))`
//! has to honor, and it does so by carrying every row of every entity type
//! rather than the distilled field subset, so nothing is lost to re-derivation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use vault_db::error::{StoreError, VaultError};
use vault_db::model::{Account, AccountBin, BlockHeader, Id, Keychain, MerkleBlock, SigningScript, Tx, TxIn, TxOut};
use vault_db::store::Store;

/// Bumped whenever a field is added, removed, or reinterpreted. Unlike the
/// on-disk schema version (the `Version` row), this has no base/current
/// split: an export from a newer version than this build understands is
/// simply rejected, there is no migration path for the interchange format.
pub const VAULT_EXPORT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultExport {
    pub schema_version: u32,
    /// `bitcoin`, `testnet`, `signet`, `regtest`, or empty if the source
    /// vault never recorded one (the `Network` row).
    pub network: String,
    pub keychains: Vec<Keychain>,
    pub accounts: Vec<Account>,
    pub bins: Vec<AccountBin>,
    pub signing_scripts: Vec<SigningScript>,
    pub block_headers: Vec<BlockHeader>,
    pub merkle_blocks: Vec<MerkleBlock>,
    pub txs: Vec<Tx>,
    pub txins: Vec<TxIn>,
    pub txouts: Vec<TxOut>,
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("unsupported export schema version {found}, this build reads up to {supported}")]
    UnsupportedSchemaVersion { found: u32, supported: u32 },
    #[error("vault error: {0}")]
    Vault(#[from] VaultError),
    #[error("malformed export JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Walks every row reachable from the store's top-level listings, in an order
/// a fresh store can re-insert without ever seeing a forward reference.
pub fn export_vault(store: &dyn Store, network: &str) -> Result<VaultExport, VaultError> {
    let keychains = store.all_keychains()?;
    let accounts = store.all_accounts()?;

    let mut bins = Vec::new();
    let mut signing_scripts = Vec::new();
    for account in &accounts {
        let account_id = account.id.expect("stored account has an id");
        for bin in store.bins_for_account(account_id)? {
            let bin_id = bin.id.expect("stored bin has an id");
            signing_scripts.extend(store.scripts_for_bin(bin_id)?);
            bins.push(bin);
        }
    }

    let mut block_headers = store.all_block_headers_descending()?;
    block_headers.reverse();
    let mut merkle_blocks = Vec::new();
    for header in &block_headers {
        if let Some(mb) = store.get_merkle_block_by_header(header.id.expect("stored header has an id"))? {
            merkle_blocks.push(mb);
        }
    }

    let txs = store.all_txs()?;
    let mut txins = Vec::new();
    let mut txouts = Vec::new();
    for tx in &txs {
        let tx_id = tx.id.expect("stored tx has an id");
        txins.extend(store.txins_for_tx(tx_id)?);
        txouts.extend(store.txouts_for_tx(tx_id)?);
    }

    Ok(VaultExport {
        schema_version: VAULT_EXPORT_SCHEMA_VERSION,
        network: network.to_string(),
        keychains,
        accounts,
        bins,
        signing_scripts,
        block_headers,
        merkle_blocks,
        txs,
        txins,
        txouts,
    })
}

pub fn export_vault_to_json(store: &dyn Store, network: &str) -> Result<String, ExportError> {
    let export = export_vault(store, network)?;
    Ok(serde_json::to_string_pretty(&export)?)
}

pub fn import_vault_from_json(store: &mut dyn Store, json: &str) -> Result<(), ExportError> {
    let export: VaultExport = serde_json::from_str(json)?;
    import_vault(store, &export)?;
    Ok(())
}

/// Re-inserts every row of `export` into `store`, remapping ids as they're
/// assigned (a fresh store never shares numbering with the one that was
/// exported). Wrapped in a single `begin`/`commit`/`rollback` bracket since a
/// partial import would otherwise leave dangling foreign keys no public
/// operation could have produced on its own.
pub fn import_vault(store: &mut dyn Store, export: &VaultExport) -> Result<(), VaultError> {
    if export.schema_version > VAULT_EXPORT_SCHEMA_VERSION {
        return Err(VaultError::Store(StoreError::Serialization(format!(
            "export schema version {} is newer than this build's {}",
            export.schema_version, VAULT_EXPORT_SCHEMA_VERSION
        ))));
    }

    store.begin()?;
    match import_vault_inner(store, export) {
        Ok(()) => {
            store.commit()?;
            Ok(())
        }
        Err(e) => {
            let _ = store.rollback();
            Err(e)
        }
    }
}

fn missing_reference(kind: &str, id: Id) -> VaultError {
    VaultError::Store(StoreError::Constraint(format!("import references unknown {kind} id {id}")))
}

fn import_vault_inner(store: &mut dyn Store, export: &VaultExport) -> Result<(), VaultError> {
    let mut keychain_map: HashMap<Id, Id> = HashMap::new();
    for kc in &export.keychains {
        let mut kc = kc.clone();
        kc.parent_id = kc.parent_id.and_then(|id| keychain_map.get(&id).copied());
        let old_id = kc.id;
        kc.id = None;
        let new_id = store.insert_keychain(&kc)?;
        if let Some(old_id) = old_id {
            keychain_map.insert(old_id, new_id);
        }
    }

    let mut account_map: HashMap<Id, Id> = HashMap::new();
    for account in &export.accounts {
        let mut account = account.clone();
        account.keychain_ids = account.keychain_ids.iter().filter_map(|id| keychain_map.get(id).copied()).collect();
        let old_id = account.id;
        account.id = None;
        let new_id = store.insert_account(&account)?;
        if let Some(old_id) = old_id {
            account_map.insert(old_id, new_id);
        }
    }

    let mut bin_map: HashMap<Id, Id> = HashMap::new();
    for bin in &export.bins {
        let mut bin = bin.clone();
        bin.account_id = *account_map.get(&bin.account_id).ok_or_else(|| missing_reference("account", bin.account_id))?;
        bin.imported_keychain_ids = bin.imported_keychain_ids.as_ref().map(|ids| ids.iter().filter_map(|id| keychain_map.get(id).copied()).collect());
        let old_id = bin.id;
        bin.id = None;
        let new_id = store.insert_bin(&bin)?;
        if let Some(old_id) = old_id {
            bin_map.insert(old_id, new_id);
        }
    }

    let mut signing_script_map: HashMap<Id, Id> = HashMap::new();
    for script in &export.signing_scripts {
        let mut script = script.clone();
        script.bin_id = *bin_map.get(&script.bin_id).ok_or_else(|| missing_reference("bin", script.bin_id))?;
        let old_id = script.id;
        script.id = None;
        let new_id = store.insert_signing_script(&script)?;
        if let Some(old_id) = old_id {
            signing_script_map.insert(old_id, new_id);
        }
    }

    let mut header_map: HashMap<Id, Id> = HashMap::new();
    for header in &export.block_headers {
        let mut header = header.clone();
        let old_id = header.id;
        header.id = None;
        let new_id = store.insert_block_header(&header)?;
        if let Some(old_id) = old_id {
            header_map.insert(old_id, new_id);
        }
    }

    for mb in &export.merkle_blocks {
        let mut mb = mb.clone();
        mb.block_header_id = *header_map.get(&mb.block_header_id).ok_or_else(|| missing_reference("block header", mb.block_header_id))?;
        mb.id = None;
        store.insert_merkle_block(&mb)?;
    }

    let mut tx_map: HashMap<Id, Id> = HashMap::new();
    for tx in &export.txs {
        let mut tx = tx.clone();
        tx.block_header_id = match tx.block_header_id {
            Some(id) => Some(*header_map.get(&id).ok_or_else(|| missing_reference("block header", id))?),
            None => None,
        };
        // User accounts aren't part of this interchange format; a tx imported
        // from elsewhere is nobody's in particular until re-attributed.
        tx.user_id = None;
        let old_id = tx.id;
        tx.id = None;
        let new_id = store.insert_tx(&tx)?;
        if let Some(old_id) = old_id {
            tx_map.insert(old_id, new_id);
        }
    }

    let mut txin_map: HashMap<Id, Id> = HashMap::new();
    for txin in &export.txins {
        let mut txin = txin.clone();
        txin.tx_id = *tx_map.get(&txin.tx_id).ok_or_else(|| missing_reference("tx", txin.tx_id))?;
        let old_id = txin.id;
        txin.id = None;
        // Wired up once both sides of the cross-reference have new ids, below.
        txin.outpoint_txout_id = None;
        let new_id = store.insert_txin(&txin)?;
        if let Some(old_id) = old_id {
            txin_map.insert(old_id, new_id);
        }
    }

    let mut txout_map: HashMap<Id, Id> = HashMap::new();
    for txout in &export.txouts {
        let mut txout = txout.clone();
        txout.tx_id = *tx_map.get(&txout.tx_id).ok_or_else(|| missing_reference("tx", txout.tx_id))?;
        txout.sending_account_id = txout.sending_account_id.and_then(|id| account_map.get(&id).copied());
        txout.receiving_account_id = txout.receiving_account_id.and_then(|id| account_map.get(&id).copied());
        txout.receiving_bin_id = txout.receiving_bin_id.and_then(|id| bin_map.get(&id).copied());
        txout.receiving_signingscript_id = txout.receiving_signingscript_id.and_then(|id| signing_script_map.get(&id).copied());
        let old_id = txout.id;
        txout.id = None;
        txout.spent_by_txin_id = None;
        let new_id = store.insert_txout(&txout)?;
        if let Some(old_id) = old_id {
            txout_map.insert(old_id, new_id);
        }
    }

    for txin in &export.txins {
        let (Some(old_id), Some(old_outpoint)) = (txin.id, txin.outpoint_txout_id) else { continue };
        let (Some(&new_id), Some(&new_outpoint)) = (txin_map.get(&old_id), txout_map.get(&old_outpoint)) else { continue };
        let mut updated = txin.clone();
        updated.id = Some(new_id);
        updated.tx_id = *tx_map.get(&txin.tx_id).ok_or_else(|| missing_reference("tx", txin.tx_id))?;
        updated.outpoint_txout_id = Some(new_outpoint);
        store.update_txin(&updated)?;
    }
    for txout in &export.txouts {
        let (Some(old_id), Some(old_spender)) = (txout.id, txout.spent_by_txin_id) else { continue };
        let (Some(&new_id), Some(&new_spender)) = (txout_map.get(&old_id), txin_map.get(&old_spender)) else { continue };
        let mut updated = txout.clone();
        updated.id = Some(new_id);
        updated.tx_id = *tx_map.get(&txout.tx_id).ok_or_else(|| missing_reference("tx", txout.tx_id))?;
        updated.spent_by_txin_id = Some(new_spender);
        store.update_txout(&updated)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vault_db::memory_store::InMemoryStore;
    use vault_db::model::{RedeemScriptPattern, SigningScriptStatus, TxOutStatus, TxStatus};

    fn sample_keychain(name: &str) -> Keychain {
        Keychain {
            id: None,
            name: name.to_string(),
            hash: [1u8; 20],
            depth: 0,
            parent_fingerprint: [0u8; 4],
            child_num: 0,
            chain_code: [2u8; 32],
            pubkey: [3u8; 33],
            privkey_ciphertext: vec![],
            privkey_salt: 0,
            seed_ciphertext: vec![],
            seed_salt: 0,
            has_seed: false,
            derivation_path: vec![],
            parent_id: None,
            hidden: false,
        }
    }

    #[test]
    fn round_trips_an_account_with_a_funded_bin_through_json() {
        let mut store = InMemoryStore::default();
        let kc = sample_keychain("alice");
        let kc_id = store.insert_keychain(&kc).unwrap();

        let account_id = store
            .insert_account(&Account {
                id: None,
                name: "solo".into(),
                hash: [9u8; 20],
                minsigs: 1,
                keychain_ids: vec![kc_id],
                unused_pool_size: 1,
                compressed_keys: true,
                pattern: RedeemScriptPattern::P2wsh,
                time_created: 1_700_000_000,
            })
            .unwrap();
        let bin_id = store
            .insert_bin(&AccountBin {
                id: None,
                account_id,
                name: "default".into(),
                index: 2,
                hash: [0u8; 20],
                next_script_index: 1,
                script_count: 1,
                labels: Default::default(),
                imported_keychain_ids: None,
            })
            .unwrap();
        store
            .insert_signing_script(&SigningScript {
                id: None,
                bin_id,
                index: 0,
                label: String::new(),
                status: SigningScriptStatus::Issued,
                redeem_script: vec![0xAA],
                txinscript_template: vec![0xBB],
                txoutscript: vec![0xCC],
            })
            .unwrap();

        let tx_id = store
            .insert_tx(&Tx {
                id: None,
                version: 1,
                locktime: 0,
                timestamp: 0,
                status: TxStatus::Confirmed,
                conflicting: false,
                unsigned_hash: [5u8; 32],
                signed_hash: [5u8; 32],
                block_header_id: None,
                block_index: None,
                total_in: 0,
                total_out: 1_000,
                user_id: None,
            })
            .unwrap();
        store
            .insert_txout(&TxOut {
                id: None,
                tx_id,
                tx_index: 0,
                value: 1_000,
                script: vec![0xDD],
                status: TxOutStatus::Unspent,
                spent_by_txin_id: None,
                sending_account_id: None,
                receiving_account_id: Some(account_id),
                receiving_bin_id: Some(bin_id),
                receiving_signingscript_id: None,
                sending_label: String::new(),
                receiving_label: String::new(),
            })
            .unwrap();

        let json = export_vault_to_json(&store, "bitcoin").unwrap();

        let mut fresh = InMemoryStore::default();
        import_vault_from_json(&mut fresh, &json).unwrap();

        let imported_account = fresh.get_account_by_name("solo").unwrap().unwrap();
        assert_eq!(imported_account.keychain_ids.len(), 1);
        let imported_kc = fresh.get_keychain(imported_account.keychain_ids[0]).unwrap().unwrap();
        assert_eq!(imported_kc.name, "alice");

        let imported_bin = fresh.get_bin_by_name(imported_account.id.unwrap(), "default").unwrap().unwrap();
        let scripts = fresh.scripts_for_bin(imported_bin.id.unwrap()).unwrap();
        assert_eq!(scripts.len(), 1);
        assert_eq!(scripts[0].redeem_script, vec![0xAA]);

        let imported_txs = fresh.all_txs().unwrap();
        assert_eq!(imported_txs.len(), 1);
        let imported_txouts = fresh.txouts_for_tx(imported_txs[0].id.unwrap()).unwrap();
        assert_eq!(imported_txouts.len(), 1);
        assert_eq!(imported_txouts[0].receiving_account_id, imported_account.id);
        assert_eq!(imported_txouts[0].receiving_bin_id, imported_bin.id);
    }

    #[test]
    fn rejects_an_export_from_a_newer_schema_version() {
        let mut fresh = InMemoryStore::default();
        let export = VaultExport {
            schema_version: VAULT_EXPORT_SCHEMA_VERSION + 1,
            network: "bitcoin".into(),
            keychains: vec![],
            accounts: vec![],
            bins: vec![],
            signing_scripts: vec![],
            block_headers: vec![],
            merkle_blocks: vec![],
            txs: vec![],
            txins: vec![],
            txouts: vec![],
        };
        let err = import_vault(&mut fresh, &export).unwrap_err();
        assert!(matches!(err, VaultError::Store(StoreError::Serialization(_))));
    }

    #[test]
    fn a_chained_spend_reconnects_txin_to_txout_across_the_import() {
        let mut store = InMemoryStore::default();
        let funding_id = store
            .insert_tx(&Tx {
                id: None,
                version: 1,
                locktime: 0,
                timestamp: 0,
                status: TxStatus::Confirmed,
                conflicting: false,
                unsigned_hash: [1u8; 32],
                signed_hash: [1u8; 32],
                block_header_id: None,
                block_index: None,
                total_in: 0,
                total_out: 5_000,
                user_id: None,
            })
            .unwrap();
        let funding_txout_id = store
            .insert_txout(&TxOut {
                id: None,
                tx_id: funding_id,
                tx_index: 0,
                value: 5_000,
                script: vec![0x01],
                status: TxOutStatus::Spent,
                spent_by_txin_id: None,
                sending_account_id: None,
                receiving_account_id: None,
                receiving_bin_id: None,
                receiving_signingscript_id: None,
                sending_label: String::new(),
                receiving_label: String::new(),
            })
            .unwrap();

        let spend_id = store
            .insert_tx(&Tx {
                id: None,
                version: 1,
                locktime: 0,
                timestamp: 0,
                status: TxStatus::Sent,
                conflicting: false,
                unsigned_hash: [2u8; 32],
                signed_hash: [2u8; 32],
                block_header_id: None,
                block_index: None,
                total_in: 5_000,
                total_out: 4_900,
                user_id: None,
            })
            .unwrap();
        let spend_txin_id = store
            .insert_txin(&TxIn {
                id: None,
                tx_id: spend_id,
                tx_index: 0,
                outpoint_hash: [9u8; 32],
                outpoint_index: 0,
                script: vec![],
                witness: vec![],
                sequence: 0xffffffff,
                outpoint_txout_id: Some(funding_txout_id),
            })
            .unwrap();
        let mut spent = store.txouts_for_tx(funding_id).unwrap().remove(0);
        spent.spent_by_txin_id = Some(spend_txin_id);
        store.update_txout(&spent).unwrap();

        let json = export_vault_to_json(&store, "bitcoin").unwrap();
        let mut fresh = InMemoryStore::default();
        import_vault_from_json(&mut fresh, &json).unwrap();

        let txs = fresh.all_txs().unwrap();
        let new_spend = txs.iter().find(|t| t.signed_hash == [2u8; 32]).unwrap();
        let new_funding = txs.iter().find(|t| t.signed_hash == [1u8; 32]).unwrap();
        let new_txin = fresh.txins_for_tx(new_spend.id.unwrap()).unwrap().remove(0);
        let new_txout = fresh.txouts_for_tx(new_funding.id.unwrap()).unwrap().remove(0);
        assert_eq!(new_txin.outpoint_txout_id, new_txout.id);
        assert_eq!(new_txout.spent_by_txin_id, new_txin.id);
    }
}
