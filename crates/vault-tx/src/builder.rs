//! Coin selection and transaction construction. A built transaction
//! is persisted immediately as UNSIGNED, with its inputs marked spent, so a
//! second `create_tx` call never double-selects the same coins before the
//! first is signed or canceled.

use bitcoin::blockdata::script::ScriptBuf;
use bitcoin::transaction::Version;
use bitcoin::{absolute::LockTime, Amount, OutPoint, Sequence, Transaction, TxIn as BitcoinTxIn, TxOut as BitcoinTxOut, Txid, Witness};
use rand::seq::SliceRandom;

use vault_account::AccountManager;
use vault_db::error::{AccountBinError, AccountError, TxError, VaultError};
use vault_db::model::{
    Account, Id, Keychain, SigningScript, SigningScriptStatus, Tx, TxIn as ModelTxIn, TxOut, TxOutStatus, TxStatus,
};
use vault_db::store::Store;

use crate::identity;

/// One requested payment: destination script and value.
pub struct Payment {
    pub script_pubkey: Vec<u8>,
    pub value: u64,
}

/// A planned output together with the signing script it pays, if any — the
/// change output is the vault's own, payments are (usually) someone else's.
struct PlannedOutput {
    txout: BitcoinTxOut,
    owner: Option<SigningScript>,
}

fn confirmed_unspent_utxos(store: &dyn Store, account_id: Id) -> Result<Vec<(Id, TxOut)>, VaultError> {
    let mut utxos = Vec::new();
    for (id, txout) in store.unspent_txouts_for_account(account_id)? {
        if let Some(tx) = store.get_tx(txout.tx_id)? {
            if tx.status == TxStatus::Confirmed {
                utxos.push((id, txout));
            }
        }
    }
    Ok(utxos)
}

fn select_coins(mut utxos: Vec<(Id, TxOut)>, desired_total: u64) -> Result<(Vec<(Id, TxOut)>, u64), AccountError> {
    let available: u64 = utxos.iter().map(|(_, o)| o.value).sum();
    if available < desired_total {
        return Err(AccountError::InsufficientFunds { requested: desired_total, available, username: None });
    }
    utxos.shuffle(&mut rand::thread_rng());
    let mut selected = Vec::new();
    let mut total = 0u64;
    for utxo in utxos {
        if total >= desired_total {
            break;
        }
        total += utxo.1.value;
        selected.push(utxo);
    }
    Ok((selected, total))
}

/// Issues a fresh change-bin script. `issue_signing_script` refuses the
/// change bin outright, so the pool is refilled and the lowest unused script
/// taken directly, set to CHANGE rather than ISSUED (the status lattice
/// only promotes UNUSED->CHANGE for a change bin still at UNUSED).
fn issue_change_script(store: &mut dyn Store, account: &Account, keychains: &[Keychain]) -> Result<SigningScript, VaultError> {
    let account_id = account.id.expect("account persisted");
    AccountManager::refill_account_bin_pool(store, account, vault_db::model::BIN_INDEX_CHANGE, 0, keychains)?;

    let bin = store
        .get_bin_by_name(account_id, "change")?
        .ok_or_else(|| AccountBinError::NotFound("change".into()))?;
    let scripts = store.scripts_for_bin(bin.id.expect("bin persisted"))?;
    let mut unused: Vec<_> = scripts.into_iter().filter(|s| s.status == SigningScriptStatus::Unused).collect();
    unused.sort_by_key(|s| s.index);
    let mut selected = unused.into_iter().next().ok_or(AccountBinError::OutOfScripts)?;

    selected.status = SigningScriptStatus::Change;
    store.update_signing_script(&selected)?;

    let mut bin = bin;
    bin.next_script_index = selected.index + 1;
    store.update_bin(&bin)?;

    Ok(selected)
}

/// Builds a `TxIn` spending `txout`. `previous_output.txid` is left zeroed;
/// callers fill it in once they've resolved the owning transaction's signed hash.
fn txin_for_utxo(txout: &TxOut, script: &SigningScript, account: &Account) -> BitcoinTxIn {
    let witness = if account.pattern.uses_witness() {
        let mut w = Witness::new();
        for _ in 0..account.minsigs {
            w.push(Vec::new());
        }
        w.push(script.redeem_script.clone());
        w
    } else {
        Witness::new()
    };
    BitcoinTxIn {
        previous_output: OutPoint { txid: Txid::all_zeros(), vout: txout.tx_index },
        script_sig: ScriptBuf::from(script.txinscript_template.clone()),
        sequence: Sequence::MAX,
        witness,
    }
}

fn build_txins(store: &dyn Store, selected: &[(Id, TxOut)], account: &Account) -> Result<Vec<BitcoinTxIn>, VaultError> {
    let mut txins = Vec::with_capacity(selected.len());
    for (_txout_id, txout) in selected {
        let signing_script_id = txout
            .receiving_signingscript_id
            .ok_or_else(|| TxError::Mismatch("selected utxo has no owning signing script".into()))?;
        let signing_script = store
            .get_signing_script(signing_script_id)?
            .ok_or_else(|| TxError::Mismatch("signing script vanished".into()))?;
        let owning_tx = store
            .get_tx(txout.tx_id)?
            .ok_or_else(|| TxError::Mismatch("owning transaction vanished".into()))?;
        let mut txin = txin_for_utxo(txout, &signing_script, account);
        txin.previous_output.txid = Txid::from_byte_array(owning_tx.signed_hash);
        txins.push(txin);
    }
    Ok(txins)
}

/// Persists a freshly built UNSIGNED transaction: the tx row, its txins
/// (linked to the spent prevout and marking it SPENT), and its txouts
/// (linked to the owning signing script for the change output, if any).
fn persist_built_tx(
    store: &mut dyn Store,
    raw: &Transaction,
    selected: &[(Id, TxOut)],
    outputs: &[PlannedOutput],
    account: &Account,
    total_in: u64,
    total_out: u64,
    timestamp: i64,
) -> Result<Tx, VaultError> {
    let unsigned_hash = identity::unsigned_hash(raw);
    let mut tx = Tx {
        id: None,
        version: raw.version.0,
        locktime: raw.lock_time.to_consensus_u32(),
        timestamp,
        status: TxStatus::Unsigned,
        conflicting: false,
        unsigned_hash,
        signed_hash: [0u8; 32],
        block_header_id: None,
        block_index: None,
        total_in,
        total_out,
        user_id: None,
    };
    let tx_id = store.insert_tx(&tx)?;
    tx.id = Some(tx_id);

    for (i, ((txout_id, prevout), txin)) in selected.iter().zip(raw.input.iter()).enumerate() {
        let model_txin = ModelTxIn {
            id: None,
            tx_id,
            tx_index: i as u32,
            outpoint_hash: txin.previous_output.txid.to_byte_array(),
            outpoint_index: txin.previous_output.vout,
            script: txin.script_sig.to_bytes(),
            witness: txin.witness.iter().map(|w| w.to_vec()).collect(),
            sequence: txin.sequence.0,
            outpoint_txout_id: Some(*txout_id),
        };
        let txin_id = store.insert_txin(&model_txin)?;

        let mut prevout = prevout.clone();
        prevout.status = TxOutStatus::Spent;
        prevout.spent_by_txin_id = Some(txin_id);
        store.update_txout(&prevout)?;
    }

    for (i, out) in outputs.iter().enumerate() {
        let model_txout = TxOut {
            id: None,
            tx_id,
            tx_index: i as u32,
            value: out.txout.value.to_sat(),
            script: out.txout.script_pubkey.to_bytes(),
            status: TxOutStatus::Unspent,
            spent_by_txin_id: None,
            sending_account_id: account.id,
            receiving_account_id: out.owner.as_ref().map(|_| account.id.expect("account persisted")),
            receiving_bin_id: out.owner.as_ref().map(|s| s.bin_id),
            receiving_signingscript_id: out.owner.as_ref().and_then(|s| s.id),
            sending_label: String::new(),
            receiving_label: String::new(),
        };
        store.insert_txout(&model_txout)?;
    }

    Ok(tx)
}

/// Builds a transaction spending `account`'s unspent outputs to `txouts`.
pub fn create_tx(
    store: &mut dyn Store,
    account: &Account,
    keychains: &[Keychain],
    payments: &[Payment],
    fee: u64,
    locktime: u32,
    timestamp: i64,
) -> Result<Tx, VaultError> {
    if payments.is_empty() {
        return Err(TxError::InvalidOutputs("no outputs requested".into()).into());
    }
    if payments.iter().any(|p| p.value == 0) {
        return Err(TxError::InvalidOutputs("zero-value output".into()).into());
    }

    let outputs_total: u64 = payments.iter().map(|p| p.value).sum();
    let desired_total = outputs_total + fee;

    let account_id = account.id.expect("account persisted");
    let utxos = confirmed_unspent_utxos(store, account_id)?;
    let (selected, total_in) = select_coins(utxos, desired_total)?;
    let txins = build_txins(store, &selected, account)?;

    let mut outputs: Vec<PlannedOutput> = payments
        .iter()
        .map(|p| PlannedOutput {
            txout: BitcoinTxOut { value: Amount::from_sat(p.value), script_pubkey: ScriptBuf::from(p.script_pubkey.clone()) },
            owner: None,
        })
        .collect();

    let change = total_in - desired_total;
    if change > 0 {
        let change_script = issue_change_script(store, account, keychains)?;
        outputs.push(PlannedOutput {
            txout: BitcoinTxOut { value: Amount::from_sat(change), script_pubkey: ScriptBuf::from(change_script.txoutscript.clone()) },
            owner: Some(change_script),
        });
    }
    outputs.shuffle(&mut rand::thread_rng());

    let raw_outputs: Vec<BitcoinTxOut> = outputs.iter().map(|o| o.txout.clone()).collect();
    let raw = Transaction { version: Version(1), lock_time: LockTime::from_consensus(locktime), input: txins, output: raw_outputs };

    persist_built_tx(store, &raw, &selected, &outputs, account, total_in, total_in - fee, timestamp)
}

/// `consolidateTxOuts`: packs confirmed UTXOs into `max_tx_size`-bounded
/// batches, each paying the sum of its inputs minus `min_fee` to `dest_script`.
pub fn consolidate_txouts(
    store: &mut dyn Store,
    account: &Account,
    dest_script: Vec<u8>,
    max_tx_size: usize,
    min_fee: u64,
    timestamp: i64,
) -> Result<Vec<Tx>, VaultError> {
    const APPROX_INPUT_SIZE: usize = 180;
    const APPROX_OVERHEAD: usize = 10;

    let account_id = account.id.expect("account persisted");
    let utxos = confirmed_unspent_utxos(store, account_id)?;

    let mut produced = Vec::new();
    let mut batch: Vec<(Id, TxOut)> = Vec::new();
    let mut batch_size = APPROX_OVERHEAD;

    for utxo in utxos {
        if batch_size + APPROX_INPUT_SIZE > max_tx_size && !batch.is_empty() {
            if let Some(tx) = finalize_consolidation_batch(store, account, &batch, &dest_script, min_fee, timestamp)? {
                produced.push(tx);
            }
            batch.clear();
            batch_size = APPROX_OVERHEAD;
        }
        batch_size += APPROX_INPUT_SIZE;
        batch.push(utxo);
    }
    if !batch.is_empty() {
        if let Some(tx) = finalize_consolidation_batch(store, account, &batch, &dest_script, min_fee, timestamp)? {
            produced.push(tx);
        }
    }

    Ok(produced)
}

fn finalize_consolidation_batch(
    store: &mut dyn Store,
    account: &Account,
    batch: &[(Id, TxOut)],
    dest_script: &[u8],
    min_fee: u64,
    timestamp: i64,
) -> Result<Option<Tx>, VaultError> {
    let total_in: u64 = batch.iter().map(|(_, o)| o.value).sum();
    if total_in <= min_fee {
        return Ok(None);
    }

    let txins = build_txins(store, batch, account)?;
    let outputs = vec![PlannedOutput {
        txout: BitcoinTxOut { value: Amount::from_sat(total_in - min_fee), script_pubkey: ScriptBuf::from(dest_script.to_vec()) },
        owner: None,
    }];
    let raw = Transaction {
        version: Version(1),
        lock_time: LockTime::ZERO,
        input: txins,
        output: outputs.iter().map(|o| o.txout.clone()).collect(),
    };

    Ok(Some(persist_built_tx(store, &raw, batch, &outputs, account, total_in, total_in - min_fee, timestamp)?))
}
