//! Transaction signing: for each input, derive candidate
//! private keys from the unlocked keychains named (or all unlocked keychains),
//! sign whatever pubkeys are still missing, and merge into the partial
//! scriptSig/witness already on the stored transaction.

use bitcoin::secp256k1::{Message, Secp256k1, SecretKey};
use bitcoin::ScriptBuf;

use vault_core::bip32::{derive_child_private, Step};
use vault_db::error::{TxError, VaultError};
use vault_db::model::{Id, Tx, TxStatus};
use vault_db::store::Store;
use vault_keychain::SessionContext;
use vault_script::assemble::{assemble, sigs_present};
use vault_script::merge::{extract_signature_candidates, match_signatures_to_pubkeys};
use vault_script::redeem_script::pubkeys_in_redeem_script;
use vault_script::sighash::compute_sighash;

use crate::identity;

/// Signs every input of `tx_id` that a currently unlocked keychain (optionally
/// restricted to `keychain_names`) can contribute a signature to. Returns the
/// updated transaction; `tx.status` is bumped to UNSENT once every input
/// carries `minsigs` signatures and the signed hash has been computed.
pub fn sign_tx(store: &mut dyn Store, session: &SessionContext, tx_id: Id, keychain_names: Option<&[String]>) -> Result<Tx, VaultError> {
    let mut tx = store.get_tx(tx_id)?.ok_or(TxError::NotFound)?;
    if tx.status != TxStatus::Unsigned {
        return Ok(tx);
    }

    let txins = store.txins_for_tx(tx_id)?;
    let mut fully_signed = true;

    let mut updated_txins = Vec::with_capacity(txins.len());
    for stored_txin in txins {
        let Some((_, prevout)) = store.find_txout_by_outpoint(&stored_txin.outpoint_hash, stored_txin.outpoint_index)? else {
            return Err(TxError::Mismatch("signTx: prevout not found for input".into()).into());
        };
        let Some(signing_script_id) = prevout.receiving_signingscript_id else {
            return Err(TxError::Mismatch("signTx: prevout has no owning signing script".into()).into());
        };
        let signing_script = store
            .get_signing_script(signing_script_id)?
            .ok_or_else(|| TxError::Mismatch("signing script vanished".into()))?;
        let bin = store.get_bin(signing_script.bin_id)?.ok_or_else(|| TxError::Mismatch("bin vanished".into()))?;
        let account = store.get_account(bin.account_id)?.ok_or_else(|| TxError::Mismatch("account vanished".into()))?;

        let redeem_script = ScriptBuf::from(signing_script.redeem_script.clone());
        let pubkeys = pubkeys_in_redeem_script(&redeem_script);
        let pattern = account.pattern;
        let input_index = stored_txin.tx_index as usize;

        let raw = reconstruct_raw_for_sighash(store, &tx, tx_id)?;

        let stored_script = ScriptBuf::from(stored_txin.script.clone());
        let stored_witness = bitcoin::Witness::from_slice(&stored_txin.witness);
        let existing_candidates = extract_signature_candidates(pattern, &stored_script, &stored_witness);
        let mut signatures =
            match_signatures_to_pubkeys(&raw, input_index, &redeem_script, prevout.value, pattern, &pubkeys, &existing_candidates);

        let sighash = compute_sighash(&raw, input_index, &redeem_script, prevout.value, pattern)
            .map_err(|e| TxError::Mismatch(e.to_string()))?;
        let message = Message::from_digest_slice(&sighash).map_err(|e| TxError::Mismatch(e.to_string()))?;
        let secp = Secp256k1::new();

        for account_keychain_id in &account.keychain_ids {
            let Some(account_keychain) = store.get_keychain(*account_keychain_id)? else { continue };
            if let Some(names) = keychain_names {
                if !names.iter().any(|n| n == &account_keychain.name) {
                    continue;
                }
            }
            let Some(xpriv) = session.get(&account_keychain.name) else { continue };

            let bin_child = derive_child_private(&xpriv, Step::Normal(bin.index))
                .map_err(|e| TxError::Mismatch(e.to_string()))?;
            let script_child = derive_child_private(&bin_child, Step::Normal(signing_script.index))
                .map_err(|e| TxError::Mismatch(e.to_string()))?;
            let secret_key: SecretKey = script_child.private_key;
            let pubkey = bitcoin::secp256k1::PublicKey::from_secret_key(&secp, &secret_key);

            let candidate_compressed = pubkey.serialize().to_vec();
            let candidate_uncompressed = pubkey.serialize_uncompressed().to_vec();
            let matches_expected = pubkeys.iter().any(|pk| *pk == candidate_compressed || *pk == candidate_uncompressed)
                && (account_keychain.pubkey == pubkey.serialize());
            if !matches_expected {
                continue;
            }
            let target_pubkey = if pubkeys.contains(&candidate_compressed) { candidate_compressed } else { candidate_uncompressed };
            if signatures.contains_key(&target_pubkey) {
                continue;
            }

            let sig = secp.sign_ecdsa(&message, &secret_key);
            let mut der = sig.serialize_der().to_vec();
            der.push(0x01); // SIGHASH_ALL
            signatures.insert(target_pubkey, der);
        }

        let present = sigs_present(&pubkeys, &signatures);
        if present < account.minsigs as usize {
            fully_signed = false;
        }

        let (script_sig, witness) = assemble(pattern, &redeem_script, &pubkeys, &signatures);
        let mut updated_txin = stored_txin.clone();
        updated_txin.script = script_sig.to_bytes();
        updated_txin.witness = witness.iter().map(|w| w.to_vec()).collect();
        updated_txins.push(updated_txin);
    }

    for txin in &updated_txins {
        store.update_txin(txin)?;
    }

    if fully_signed {
        let raw = reconstruct_raw_for_sighash(store, &tx, tx_id)?;
        tx.signed_hash = identity::signed_hash(&raw);
        tx.status = TxStatus::Unsent;
        store.update_tx(&tx)?;
    }

    Ok(tx)
}

/// Rebuilds the current `bitcoin::Transaction` for `tx_id` from its stored
/// model rows, needed to compute a sighash over the transaction as it stands
/// (same version/locktime/inputs/outputs, whatever partial signatures exist).
/// Also the broadcast-time reconstruction the sync coordinator uses to hand
/// a fully-signed transaction to the network client.
pub fn reconstruct_raw_for_sighash(store: &dyn Store, tx: &Tx, tx_id: Id) -> Result<bitcoin::Transaction, VaultError> {
    use bitcoin::{absolute::LockTime, transaction::Version, Amount, OutPoint, Sequence, TxIn as BitcoinTxIn, TxOut as BitcoinTxOut, Txid};

    let mut txins = store.txins_for_tx(tx_id)?;
    txins.sort_by_key(|t| t.tx_index);
    let mut txouts = store.txouts_for_tx(tx_id)?;
    txouts.sort_by_key(|t| t.tx_index);

    let input = txins
        .into_iter()
        .map(|t| BitcoinTxIn {
            previous_output: OutPoint { txid: Txid::from_byte_array(t.outpoint_hash), vout: t.outpoint_index },
            script_sig: ScriptBuf::from(t.script),
            sequence: Sequence(t.sequence),
            witness: bitcoin::Witness::from_slice(&t.witness),
        })
        .collect();
    let output = txouts
        .into_iter()
        .map(|o| BitcoinTxOut { value: Amount::from_sat(o.value), script_pubkey: ScriptBuf::from(o.script) })
        .collect();

    Ok(bitcoin::Transaction { version: Version(tx.version), lock_time: LockTime::from_consensus(tx.locktime), input, output })
}
