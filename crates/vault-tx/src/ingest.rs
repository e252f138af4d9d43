//! The transaction ingestion engine: three entry points funnel into one
//! merging core keyed by the unsigned hash.

use bitcoin::{ScriptBuf, Transaction, Witness};

use vault_db::error::{TxError, VaultError};
use vault_db::model::{
    Id, Keychain, SigningScriptStatus, Tx, TxIn as ModelTxIn, TxOut as ModelTxOut, TxOutStatus, TxStatus,
};
use vault_db::store::Store;
use vault_account::AccountManager;
use vault_script::merge::{extract_signature_candidates, match_signatures_to_pubkeys, merge_signatures};
use vault_script::redeem_script::pubkeys_in_redeem_script;

use crate::identity;

/// Attempts to merge an incoming partial-signature input into the stored one
/// for the same input index. Returns `None` when the prevout (and with it,
/// the pattern/pubkey order needed to verify a signature against a specific
/// key) can't be resolved, or when nothing new was matched.
fn merge_input_signatures(
    store: &dyn Store,
    raw: &Transaction,
    stored_txin: &ModelTxIn,
) -> Result<Option<ModelTxIn>, VaultError> {
    let input_index = stored_txin.tx_index as usize;
    let incoming = &raw.input[input_index];

    let Some((_, prevout)) = store.find_txout_by_outpoint(&stored_txin.outpoint_hash, stored_txin.outpoint_index)? else {
        return Ok(None);
    };
    let Some(signing_script_id) = prevout.receiving_signingscript_id else {
        return Ok(None);
    };
    let Some(signing_script) = store.get_signing_script(signing_script_id)? else {
        return Ok(None);
    };
    let bin = store.get_bin(signing_script.bin_id)?.ok_or_else(|| TxError::Mismatch("bin vanished during ingestion".into()))?;
    let account = store.get_account(bin.account_id)?.ok_or_else(|| TxError::Mismatch("account vanished during ingestion".into()))?;

    let redeem_script = ScriptBuf::from(signing_script.redeem_script.clone());
    let pubkeys = pubkeys_in_redeem_script(&redeem_script);
    let pattern = account.pattern;
    let input_value_sat = prevout.value;

    let stored_script = ScriptBuf::from(stored_txin.script.clone());
    let stored_witness = Witness::from_slice(&stored_txin.witness);
    let existing_candidates = extract_signature_candidates(pattern, &stored_script, &stored_witness);
    let incoming_candidates = extract_signature_candidates(pattern, &incoming.script_sig, &incoming.witness);

    // `raw` carries the same inputs/outputs as the stored transaction (they
    // share an unsigned hash), so its sighash for this input is valid for
    // verifying signatures drawn from either version's scriptSig/witness.
    let mut existing_map =
        match_signatures_to_pubkeys(raw, input_index, &redeem_script, input_value_sat, pattern, &pubkeys, &existing_candidates);
    let incoming_map =
        match_signatures_to_pubkeys(raw, input_index, &redeem_script, input_value_sat, pattern, &pubkeys, &incoming_candidates);

    let added = merge_signatures(&mut existing_map, &incoming_map);
    if added == 0 {
        return Ok(None);
    }

    let (script_sig, witness) = vault_script::assemble::assemble(pattern, &redeem_script, &pubkeys, &existing_map);
    let mut updated = stored_txin.clone();
    updated.script = script_sig.to_bytes();
    updated.witness = witness.iter().map(|w| w.to_vec()).collect();
    Ok(Some(updated))
}

/// Substitutes `txins`' current script/witness into a clone of `raw`, giving
/// a transaction whose sighash reflects whatever signatures are stored so far.
fn build_raw_with_txins(raw: &Transaction, txins: &[ModelTxIn]) -> Transaction {
    let mut tx = raw.clone();
    for (i, txin) in txins.iter().enumerate() {
        tx.input[i].script_sig = ScriptBuf::from(txin.script.clone());
        tx.input[i].witness = Witness::from_slice(&txin.witness);
    }
    tx
}

/// Whether every input's recorded signatures meet its account's `minsigs`,
/// verified against `merged_raw`'s sighash rather than assumed from presence.
/// Inputs whose prevout isn't one of ours (no resolvable signing script)
/// can't be checked this way and count as not fully signed.
fn is_tx_fully_signed(store: &dyn Store, merged_raw: &Transaction, txins: &[ModelTxIn]) -> Result<bool, VaultError> {
    if txins.is_empty() {
        return Ok(false);
    }
    for txin in txins {
        let Some((_, prevout)) = store.find_txout_by_outpoint(&txin.outpoint_hash, txin.outpoint_index)? else {
            return Ok(false);
        };
        let Some(signing_script_id) = prevout.receiving_signingscript_id else {
            return Ok(false);
        };
        let Some(signing_script) = store.get_signing_script(signing_script_id)? else {
            return Ok(false);
        };
        let bin = store.get_bin(signing_script.bin_id)?.ok_or_else(|| TxError::Mismatch("bin vanished during ingestion".into()))?;
        let account = store.get_account(bin.account_id)?.ok_or_else(|| TxError::Mismatch("account vanished during ingestion".into()))?;

        let redeem_script = ScriptBuf::from(signing_script.redeem_script.clone());
        let pubkeys = pubkeys_in_redeem_script(&redeem_script);
        let input_index = txin.tx_index as usize;
        let candidates = extract_signature_candidates(account.pattern, &ScriptBuf::from(txin.script.clone()), &Witness::from_slice(&txin.witness));
        let matched = match_signatures_to_pubkeys(merged_raw, input_index, &redeem_script, prevout.value, account.pattern, &pubkeys, &candidates);
        if matched.len() < account.minsigs as usize {
            return Ok(false);
        }
    }
    Ok(true)
}

fn account_keychains(store: &dyn Store, account_id: Id) -> Result<Vec<Keychain>, VaultError> {
    let account = store.get_account(account_id)?.ok_or_else(|| TxError::Mismatch("account vanished during ingestion".into()))?;
    account
        .keychain_ids
        .iter()
        .map(|id| store.get_keychain(*id)?.ok_or_else(|| TxError::Mismatch("keychain vanished during ingestion".into()).into()))
        .collect()
}

fn to_model_tx(raw: &Transaction, status: TxStatus, timestamp: i64, block_header_id: Option<Id>) -> Tx {
    let unsigned_hash = identity::unsigned_hash(raw);
    let signed_hash = if status >= TxStatus::Unsent { identity::signed_hash(raw) } else { [0u8; 32] };
    Tx {
        id: None,
        version: raw.version.0,
        locktime: raw.lock_time.to_consensus_u32(),
        timestamp,
        status,
        conflicting: false,
        unsigned_hash,
        signed_hash,
        block_header_id,
        block_index: None,
        total_in: 0,
        total_out: raw.output.iter().map(|o| o.value.to_sat()).sum(),
        user_id: None,
    }
}

fn to_model_txins(tx_id: Id, raw: &Transaction) -> Vec<ModelTxIn> {
    raw.input
        .iter()
        .enumerate()
        .map(|(i, txin)| ModelTxIn {
            id: None,
            tx_id,
            tx_index: i as u32,
            outpoint_hash: txin.previous_output.txid.to_byte_array(),
            outpoint_index: txin.previous_output.vout,
            script: txin.script_sig.to_bytes(),
            witness: txin.witness.iter().map(|item| item.to_vec()).collect(),
            sequence: txin.sequence.0,
            outpoint_txout_id: None,
        })
        .collect()
}

fn to_model_txouts(tx_id: Id, raw: &Transaction) -> Vec<ModelTxOut> {
    raw.output
        .iter()
        .enumerate()
        .map(|(i, txout)| ModelTxOut {
            id: None,
            tx_id,
            tx_index: i as u32,
            value: txout.value.to_sat(),
            script: txout.script_pubkey.to_bytes(),
            status: TxOutStatus::Unspent,
            spent_by_txin_id: None,
            sending_account_id: None,
            receiving_account_id: None,
            receiving_bin_id: None,
            receiving_signingscript_id: None,
            sending_label: String::new(),
            receiving_label: String::new(),
        })
        .collect()
}

/// Classifies a never-before-seen transaction: attaches inputs/outputs that
/// touch a known signing script, flags conflicts, refills pools, and persists
/// iff the vault sent or received something in it.
fn insert_new(store: &mut dyn Store, raw: &Transaction, status: TxStatus, timestamp: i64, block_header_id: Option<Id>) -> Result<Option<Tx>, VaultError> {
    let mut model_tx = to_model_tx(raw, status, timestamp, block_header_id);
    let mut model_txins = to_model_txins(0, raw);
    let mut model_txouts = to_model_txouts(0, raw);

    let mut sent_from_vault = false;
    let mut sending_account_id: Option<Id> = None;
    let mut conflicting_tx_ids: Vec<Id> = Vec::new();

    for txin in &mut model_txins {
        if let Some((spent_txout_id, spent_txout)) = store.find_txout_by_outpoint(&txin.outpoint_hash, txin.outpoint_index)? {
            txin.outpoint_txout_id = Some(spent_txout_id);
            if spent_txout.receiving_account_id.is_some() {
                sent_from_vault = true;
                sending_account_id = sending_account_id.or(spent_txout.receiving_account_id);
                model_tx.total_in += spent_txout.value;
            }
            if spent_txout.status == TxOutStatus::Spent {
                for spender in store.txins_spending(spent_txout_id)? {
                    conflicting_tx_ids.push(spender.tx_id);
                }
            }
        } else {
            // The outpoint's own transaction hasn't streamed in yet, a routine
            // SPV ordering. Recover the redeem script embedded in this input's
            // own scriptSig/witness and check whether it matches one of ours
            // regardless of how many of its signature slots are still unfilled.
            let raw_txin = &raw.input[txin.tx_index as usize];
            if let Some((pattern, redeem_script)) =
                vault_script::txoutscript::infer_pattern_and_redeem_script(&raw_txin.script_sig, &raw_txin.witness)
            {
                let implied_txoutscript = vault_script::txoutscript::derive_txoutscript(&redeem_script, pattern);
                if let Some(script) = store.get_signing_script_by_txoutscript(&implied_txoutscript.to_bytes())? {
                    if let Some(bin) = store.get_bin(script.bin_id)? {
                        sent_from_vault = true;
                        sending_account_id = sending_account_id.or(Some(bin.account_id));
                    }
                }
            }
        }
    }

    let mut sent_to_vault = false;
    let mut pool_refills: Vec<(Id, Id)> = Vec::new(); // (account_id, bin_id)

    for txout in &mut model_txouts {
        txout.sending_account_id = sending_account_id;

        if let Some(script) = store.get_signing_script_by_txoutscript(&txout.script)? {
            let bin = store.get_bin(script.bin_id)?.ok_or_else(|| TxError::Mismatch("bin vanished during ingestion".into()))?;
            let account = store.get_account(bin.account_id)?.ok_or_else(|| TxError::Mismatch("account vanished during ingestion".into()))?;

            sent_to_vault = true;
            txout.receiving_account_id = account.id;
            txout.receiving_bin_id = bin.id;
            txout.receiving_signingscript_id = script.id;

            let new_status = match script.status {
                SigningScriptStatus::Unused if bin.is_change() => SigningScriptStatus::Change,
                SigningScriptStatus::Unused | SigningScriptStatus::Issued => SigningScriptStatus::Used,
                terminal => terminal,
            };
            if new_status != script.status {
                let mut updated_script = script.clone();
                updated_script.status = new_status;
                store.update_signing_script(&updated_script)?;
            }
            if let (Some(account_id), Some(bin_id)) = (account.id, bin.id) {
                pool_refills.push((account_id, bin_id));
            }
        }
    }

    if !sent_from_vault && !sent_to_vault {
        return Ok(None);
    }

    if !conflicting_tx_ids.is_empty() {
        model_tx.conflicting = true;
    }

    let tx_id = store.insert_tx(&model_tx)?;
    model_tx.id = Some(tx_id);
    for txin in &mut model_txins {
        txin.tx_id = tx_id;
        let txin_id = store.insert_txin(txin)?;
        txin.id = Some(txin_id);
        if let Some(spent_txout_id) = txin.outpoint_txout_id {
            if let Some(spending_tx_id) = find_owning_tx_by_txout_id(store, spent_txout_id)? {
                if let Some(mut spent_txout) = store
                    .txouts_for_tx(spending_tx_id)?
                    .into_iter()
                    .find(|o| o.id == Some(spent_txout_id))
                {
                    spent_txout.status = TxOutStatus::Spent;
                    spent_txout.spent_by_txin_id = Some(txin_id);
                    store.update_txout(&spent_txout)?;
                }
            }
        }
    }
    for txout in &mut model_txouts {
        txout.tx_id = tx_id;
        let txout_id = store.insert_txout(txout)?;
        txout.id = Some(txout_id);

        // Out-of-order insertion: a TxIn already in the store named this
        // output as its outpoint before we had ever seen this transaction.
        let mut waiting_txins = store.txins_awaiting_outpoint(&model_tx.unsigned_hash, txout.tx_index)?;
        if model_tx.signed_hash != [0u8; 32] {
            waiting_txins.extend(store.txins_awaiting_outpoint(&model_tx.signed_hash, txout.tx_index)?);
        }
        if let Some(waiting_txin) = waiting_txins.into_iter().next() {
            let waiting_txin_id = waiting_txin.id.ok_or_else(|| TxError::Mismatch("stored txin has no id".into()))?;
            let mut updated_txin = waiting_txin.clone();
            updated_txin.outpoint_txout_id = Some(txout_id);
            store.update_txin(&updated_txin)?;

            txout.status = TxOutStatus::Spent;
            txout.spent_by_txin_id = Some(waiting_txin_id);
            store.update_txout(txout)?;
        }
    }

    for conflicting_tx_id in conflicting_tx_ids {
        if let Some(mut conflicting_tx) = store.get_tx(conflicting_tx_id)? {
            conflicting_tx.conflicting = true;
            store.update_tx(&conflicting_tx)?;
        }
    }

    for (account_id, bin_id) in pool_refills {
        if let (Some(account), Some(bin)) = (store.get_account(account_id)?, store.get_bin(bin_id)?) {
            let keychains = account_keychains(store, account_id)?;
            AccountManager::refill_account_bin_pool(store, &account, bin.index, 0, &keychains)?;
        }
    }

    Ok(Some(model_tx))
}

/// The dedup/merge entry point used
/// when the vault itself may be a co-signer of a still-unsigned transaction.
pub fn insert_tx(store: &mut dyn Store, raw: &Transaction, replace_labels: bool, timestamp: i64) -> Result<Option<Tx>, VaultError> {
    let uhash = identity::unsigned_hash(raw);
    let incoming_status = if identity::looks_fully_signed(raw) { TxStatus::Unsent } else { TxStatus::Unsigned };

    match store.get_tx_by_unsigned_hash(&uhash)? {
        None => insert_new(store, raw, incoming_status, timestamp, None),
        Some(mut stored) => {
            let stored_txins = store.txins_for_tx(stored.id.unwrap())?;
            let stored_txouts = store.txouts_for_tx(stored.id.unwrap())?;
            if stored_txins.len() != raw.input.len() || stored_txouts.len() != raw.output.len() {
                return Err(TxError::Mismatch("input/output counts differ from stored transaction".into()).into());
            }

            let incoming_txouts = to_model_txouts(stored.id.unwrap(), raw);
            let mut updated = false;
            for (stored_txout, incoming_txout) in stored_txouts.iter().zip(incoming_txouts.iter()) {
                let mut stored_txout = stored_txout.clone();
                let mut labels_updated = false;
                if !incoming_txout.sending_label.is_empty() && (replace_labels || stored_txout.sending_label.is_empty()) {
                    stored_txout.sending_label = incoming_txout.sending_label.clone();
                    labels_updated = true;
                }
                if !incoming_txout.receiving_label.is_empty() && (replace_labels || stored_txout.receiving_label.is_empty()) {
                    stored_txout.receiving_label = incoming_txout.receiving_label.clone();
                    labels_updated = true;
                }
                if labels_updated {
                    store.update_txout(&stored_txout)?;
                    updated = true;
                }
            }

            if stored.status == TxStatus::Unsigned {
                let mut sigs_changed = false;
                for stored_txin in stored_txins.iter() {
                    if let Some(merged) = merge_input_signatures(store, raw, stored_txin)? {
                        store.update_txin(&merged)?;
                        sigs_changed = true;
                    }
                }
                if sigs_changed {
                    let refreshed_txins = store.txins_for_tx(stored.id.unwrap())?;
                    let merged_raw = build_raw_with_txins(raw, &refreshed_txins);
                    if is_tx_fully_signed(store, &merged_raw, &refreshed_txins)? {
                        stored.status = TxStatus::Unsent;
                        stored.signed_hash = identity::signed_hash(&merged_raw);
                    }
                    store.update_tx(&stored)?;
                    updated = true;
                } else if incoming_status != TxStatus::Unsigned {
                    // No locally-resolvable signing script to merge against
                    // (e.g. a fully external copy); accept it outright.
                    for (i, stored_txin) in stored_txins.iter().enumerate() {
                        let mut stored_txin = stored_txin.clone();
                        stored_txin.script = raw.input[i].script_sig.to_bytes();
                        stored_txin.witness = raw.input[i].witness.iter().map(|w| w.to_vec()).collect();
                        store.update_txin(&stored_txin)?;
                    }
                    stored.status = incoming_status;
                    stored.signed_hash = identity::signed_hash(raw);
                    store.update_tx(&stored)?;
                    updated = true;
                }
            } else if incoming_status != TxStatus::Unsigned && incoming_status > stored.status {
                stored.status = incoming_status;
                store.update_tx(&stored)?;
                updated = true;
            }

            if updated {
                Ok(Some(stored))
            } else {
                Ok(None)
            }
        }
    }
}

/// Pure observation: the vault
/// never originated this transaction.
pub fn insert_new_tx(store: &mut dyn Store, raw: &Transaction, block_header_id: Option<Id>, timestamp: i64) -> Result<Option<Tx>, VaultError> {
    let status = if block_header_id.is_some() { TxStatus::Confirmed } else { TxStatus::Propagated };
    insert_new(store, raw, status, timestamp, block_header_id)
}

/// Confirms a transaction as part of a merkle block.
pub fn insert_merkle_tx(
    store: &mut dyn Store,
    block_header_id: Id,
    raw: &Transaction,
    timestamp: i64,
) -> Result<Option<Tx>, VaultError> {
    let uhash = identity::unsigned_hash(raw);
    if let Some(mut stored) = store.get_tx_by_unsigned_hash(&uhash)? {
        stored.block_header_id = Some(block_header_id);
        stored.conflicting = false;
        if stored.status != TxStatus::Confirmed {
            if stored.status == TxStatus::Unsigned {
                let stored_txins = store.txins_for_tx(stored.id.unwrap())?;
                for (i, stored_txin) in stored_txins.iter().enumerate() {
                    let mut stored_txin = stored_txin.clone();
                    stored_txin.script = raw.input[i].script_sig.to_bytes();
                    stored_txin.witness = raw.input[i].witness.iter().map(|w| w.to_vec()).collect();
                    store.update_txin(&stored_txin)?;
                }
                stored.signed_hash = identity::signed_hash(raw);
            }
            stored.status = TxStatus::Confirmed;
        }
        store.update_tx(&stored)?;
        return Ok(Some(stored));
    }

    insert_new(store, raw, TxStatus::Confirmed, timestamp, Some(block_header_id))
}

/// Deletes a transaction, cascading to un-spend the outpoints it consumed
/// and recursively deletes anything that spends its own outputs first.
/// Signing-script status is never downgraded.
pub fn delete_tx(store: &mut dyn Store, tx_id: Id) -> Result<(), VaultError> {
    let txins = store.txins_for_tx(tx_id)?;
    for txin in &txins {
        if let Some(outpoint_txout_id) = txin.outpoint_txout_id {
            if let Some(tx) = find_owning_tx_by_txout_id(store, outpoint_txout_id)? {
                if let Some(mut txout) = store.txouts_for_tx(tx).ok().and_then(|v| v.into_iter().find(|o| o.id == Some(outpoint_txout_id))) {
                    txout.status = TxOutStatus::Unspent;
                    txout.spent_by_txin_id = None;
                    store.update_txout(&txout)?;
                }
            }
        }
    }

    let txouts = store.txouts_for_tx(tx_id)?;
    for txout in &txouts {
        if let Some(txout_id) = txout.id {
            for spender in store.txins_spending(txout_id)? {
                delete_tx(store, spender.tx_id)?;
            }
        }
    }

    store.delete_tx(tx_id)
}

fn find_owning_tx_by_txout_id(store: &dyn Store, txout_id: Id) -> Result<Option<Id>, VaultError> {
    for tx in store.all_txs()? {
        if let Some(tx_id) = tx.id {
            if store.txouts_for_tx(tx_id)?.iter().any(|o| o.id == Some(txout_id)) {
                return Ok(Some(tx_id));
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::absolute::LockTime;
    use bitcoin::transaction::Version;
    use bitcoin::{Amount, OutPoint, Sequence, TxIn, TxOut, Txid, Witness};
    use std::str::FromStr;
    use vault_db::memory_store::InMemoryStore;
    use vault_db::model::{Account, AccountBin, RedeemScriptPattern, SigningScript};

    fn funding_tx(script_pubkey: ScriptBuf, value: u64) -> Transaction {
        Transaction {
            version: Version::ONE,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint { txid: Txid::from_str("00000000000000000000000000000000000000000000000000000000000000aa").unwrap(), vout: 0 },
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut { value: Amount::from_sat(value), script_pubkey }],
        }
    }

    fn setup_account_with_script(store: &mut InMemoryStore) -> (Id, Id, ScriptBuf) {
        let account = Account {
            id: None,
            name: "acct".into(),
            hash: [1u8; 20],
            minsigs: 1,
            keychain_ids: vec![],
            unused_pool_size: 1,
            compressed_keys: true,
            pattern: RedeemScriptPattern::P2sh,
            time_created: 0,
        };
        let account_id = store.insert_account(&account).unwrap();
        let bin = AccountBin {
            id: None,
            account_id,
            name: "default".into(),
            index: 2,
            hash: [0u8; 20],
            next_script_index: 0,
            script_count: 1,
            labels: Default::default(),
            imported_keychain_ids: None,
        };
        let bin_id = store.insert_bin(&bin).unwrap();
        let txoutscript = ScriptBuf::from_hex("a914aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa87").unwrap();
        let script = SigningScript {
            id: None,
            bin_id,
            index: 0,
            label: String::new(),
            status: SigningScriptStatus::Unused,
            redeem_script: vec![],
            txinscript_template: vec![],
            txoutscript: txoutscript.to_bytes(),
        };
        store.insert_signing_script(&script).unwrap();
        (account_id, bin_id, txoutscript)
    }

    #[test]
    fn insert_new_tx_attaches_output_paying_a_known_signing_script() {
        let mut store = InMemoryStore::default();
        let (_account_id, _bin_id, txoutscript) = setup_account_with_script(&mut store);
        let tx = funding_tx(txoutscript, 50_000);

        let inserted = insert_new_tx(&mut store, &tx, None, 0).unwrap();
        assert!(inserted.is_some());
        assert_eq!(inserted.unwrap().status, TxStatus::Propagated);
    }

    #[test]
    fn unrelated_tx_is_not_persisted() {
        let mut store = InMemoryStore::default();
        setup_account_with_script(&mut store);
        let tx = funding_tx(ScriptBuf::from_hex("76a914deadbeefdeadbeefdeadbeefdeadbeefdeadbeef88ac").unwrap(), 1000);
        let inserted = insert_new_tx(&mut store, &tx, None, 0).unwrap();
        assert!(inserted.is_none());
    }

    #[test]
    fn delete_tx_unspends_the_outpoint_it_consumed() {
        let mut store = InMemoryStore::default();
        let (_account_id, _bin_id, txoutscript) = setup_account_with_script(&mut store);
        let funding = funding_tx(txoutscript.clone(), 50_000);
        let funding_tx_record = insert_new_tx(&mut store, &funding, None, 0).unwrap().unwrap();
        let funding_txout_id = store.txouts_for_tx(funding_tx_record.id.unwrap()).unwrap()[0].id.unwrap();

        let spending = Transaction {
            version: Version::ONE,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint { txid: Txid::from_byte_array(funding_tx_record.signed_hash.into()), vout: 0 },
                script_sig: ScriptBuf::from_hex("00").unwrap(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut { value: Amount::from_sat(49_000), script_pubkey: txoutscript }],
        };
        let spending_tx_record = insert_new_tx(&mut store, &spending, None, 1).unwrap().unwrap();
        assert_eq!(store.txouts_for_tx(funding_tx_record.id.unwrap()).unwrap()[0].status, TxOutStatus::Spent);

        delete_tx(&mut store, spending_tx_record.id.unwrap()).unwrap();
        assert!(store.get_tx(spending_tx_record.id.unwrap()).unwrap().is_none());
        let funding_txout = store
            .txouts_for_tx(funding_tx_record.id.unwrap())
            .unwrap()
            .into_iter()
            .find(|o| o.id == Some(funding_txout_id))
            .unwrap();
        assert_eq!(funding_txout.status, TxOutStatus::Unspent);
        assert!(funding_txout.spent_by_txin_id.is_none());
    }

    #[test]
    fn insert_tx_merges_independently_signed_copies_until_minsigs_met() {
        use std::collections::BTreeMap;
        use vault_script::assemble::assemble;
        use vault_script::redeem_script::build_redeem_script;
        use vault_script::sighash::compute_sighash;

        let secp = secp256k1::Secp256k1::new();
        let sk1 = secp256k1::SecretKey::from_slice(&[0x11; 32]).unwrap();
        let sk2 = secp256k1::SecretKey::from_slice(&[0x22; 32]).unwrap();
        let pk1 = secp256k1::PublicKey::from_secret_key(&secp, &sk1).serialize().to_vec();
        let pk2 = secp256k1::PublicKey::from_secret_key(&secp, &sk2).serialize().to_vec();
        let mut pubkeys = vec![pk1.clone(), pk2.clone()];
        pubkeys.sort();
        let redeem_script = build_redeem_script(2, &pubkeys).unwrap();

        let mut store = InMemoryStore::default();
        let account = Account {
            id: None,
            name: "joint".into(),
            hash: [2u8; 20],
            minsigs: 2,
            keychain_ids: vec![],
            unused_pool_size: 1,
            compressed_keys: true,
            pattern: RedeemScriptPattern::P2wsh,
            time_created: 0,
        };
        let account_id = store.insert_account(&account).unwrap();
        let bin = AccountBin {
            id: None,
            account_id,
            name: "default".into(),
            index: 0,
            hash: [0u8; 20],
            next_script_index: 0,
            script_count: 1,
            labels: Default::default(),
            imported_keychain_ids: None,
        };
        let bin_id = store.insert_bin(&bin).unwrap();
        let txoutscript = ScriptBuf::new_p2wsh(&redeem_script.wscript_hash());
        let script = SigningScript {
            id: None,
            bin_id,
            index: 0,
            label: String::new(),
            status: SigningScriptStatus::Issued,
            redeem_script: redeem_script.to_bytes(),
            txinscript_template: vec![],
            txoutscript: txoutscript.to_bytes(),
        };
        store.insert_signing_script(&script).unwrap();

        let funding = funding_tx(txoutscript, 50_000);
        let funding_record = insert_new_tx(&mut store, &funding, None, 0).unwrap().unwrap();

        let spend = Transaction {
            version: Version::ONE,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint { txid: Txid::from_byte_array(funding_record.signed_hash.into()), vout: 0 },
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut { value: Amount::from_sat(49_000), script_pubkey: ScriptBuf::new() }],
        };

        let stored = insert_new(&mut store, &spend, TxStatus::Unsigned, 1, None).unwrap().unwrap();
        assert_eq!(stored.status, TxStatus::Unsigned);
        let uhash = identity::unsigned_hash(&spend);

        let sighash = compute_sighash(&spend, 0, &redeem_script, 50_000, RedeemScriptPattern::P2wsh).unwrap();
        let message = secp256k1::Message::from_digest_slice(&sighash).unwrap();

        let mut sigs1 = BTreeMap::new();
        let mut der1 = secp.sign_ecdsa(&message, &sk1).serialize_der().to_vec();
        der1.push(0x01);
        sigs1.insert(pk1.clone(), der1);
        let (script_sig1, witness1) = assemble(RedeemScriptPattern::P2wsh, &redeem_script, &pubkeys, &sigs1);
        let mut raw1 = spend.clone();
        raw1.input[0].script_sig = script_sig1;
        raw1.input[0].witness = witness1;

        assert!(insert_tx(&mut store, &raw1, false, 2).unwrap().is_some());
        let after_first = store.get_tx_by_unsigned_hash(&uhash).unwrap().unwrap();
        assert_eq!(after_first.status, TxStatus::Unsigned, "a single signature out of two must not look fully signed");

        let mut sigs2 = BTreeMap::new();
        let mut der2 = secp.sign_ecdsa(&message, &sk2).serialize_der().to_vec();
        der2.push(0x01);
        sigs2.insert(pk2.clone(), der2);
        let (script_sig2, witness2) = assemble(RedeemScriptPattern::P2wsh, &redeem_script, &pubkeys, &sigs2);
        let mut raw2 = spend.clone();
        raw2.input[0].script_sig = script_sig2;
        raw2.input[0].witness = witness2;

        assert!(insert_tx(&mut store, &raw2, false, 3).unwrap().is_some());
        let after_second = store.get_tx_by_unsigned_hash(&uhash).unwrap().unwrap();
        assert_eq!(after_second.status, TxStatus::Unsent);
        assert_ne!(after_second.signed_hash, [0u8; 32]);
    }

    /// Exercises the full SPV-out-of-order round trip: a vault-authored spend
    /// streams in before its own funding transaction does. The spend must
    /// still be recognized (by the redeem script embedded in its own
    /// scriptSig) and its output tagged with the spending account; once the
    /// funding transaction arrives, the already-stored spend must link up to
    /// the output it actually consumes.
    #[test]
    fn spend_seen_before_its_funding_tx_is_recognized_tagged_and_later_linked() {
        use vault_script::redeem_script::build_redeem_script;
        use vault_script::txoutscript::{derive_txinscript_template, derive_txoutscript};

        let mut store = InMemoryStore::default();
        let pk = secp256k1::PublicKey::from_secret_key(
            &secp256k1::Secp256k1::new(),
            &secp256k1::SecretKey::from_slice(&[0x33; 32]).unwrap(),
        )
        .serialize()
        .to_vec();
        let redeem_script = build_redeem_script(1, &[pk]).unwrap();
        let txoutscript = derive_txoutscript(&redeem_script, RedeemScriptPattern::P2sh);

        let account = Account {
            id: None,
            name: "solo".into(),
            hash: [3u8; 20],
            minsigs: 1,
            keychain_ids: vec![],
            unused_pool_size: 1,
            compressed_keys: true,
            pattern: RedeemScriptPattern::P2sh,
            time_created: 0,
        };
        let account_id = store.insert_account(&account).unwrap();
        let bin = AccountBin {
            id: None,
            account_id,
            name: "default".into(),
            index: 0,
            hash: [0u8; 20],
            next_script_index: 0,
            script_count: 1,
            labels: Default::default(),
            imported_keychain_ids: None,
        };
        let bin_id = store.insert_bin(&bin).unwrap();
        store
            .insert_signing_script(&SigningScript {
                id: None,
                bin_id,
                index: 0,
                label: String::new(),
                status: SigningScriptStatus::Issued,
                redeem_script: redeem_script.to_bytes(),
                txinscript_template: vec![],
                txoutscript: txoutscript.to_bytes(),
            })
            .unwrap();

        let funding = funding_tx(txoutscript, 50_000);
        let funding_uhash = identity::unsigned_hash(&funding);

        let spend = Transaction {
            version: Version::ONE,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint { txid: Txid::from_byte_array(funding_uhash), vout: 0 },
                script_sig: derive_txinscript_template(&redeem_script, RedeemScriptPattern::P2sh),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut { value: Amount::from_sat(900), script_pubkey: ScriptBuf::from_hex("76a914cafebabecafebabecafebabecafebabecafebabe88ac").unwrap() }],
        };

        let spend_record = insert_new_tx(&mut store, &spend, None, 0)
            .unwrap()
            .expect("recognized via its own embedded redeem script despite the unknown prevout");
        let spend_txout = store.txouts_for_tx(spend_record.id.unwrap()).unwrap().into_iter().next().unwrap();
        assert_eq!(spend_txout.sending_account_id, Some(account_id));
        let spend_txin = store.txins_for_tx(spend_record.id.unwrap()).unwrap().into_iter().next().unwrap();
        assert!(spend_txin.outpoint_txout_id.is_none());

        let funding_record = insert_new_tx(&mut store, &funding, None, 1).unwrap().expect("funding pays a known signing script");
        let funding_txout = store.txouts_for_tx(funding_record.id.unwrap()).unwrap().into_iter().next().unwrap();
        assert_eq!(funding_txout.status, TxOutStatus::Spent);
        assert_eq!(funding_txout.spent_by_txin_id, spend_txin.id);

        let relinked_spend_txin = store.txins_for_tx(spend_record.id.unwrap()).unwrap().into_iter().next().unwrap();
        assert_eq!(relinked_spend_txin.outpoint_txout_id, funding_txout.id);
    }
}
