//! Merging signatures collected from multiple co-signers for the same input
//! When two parties both
//! produce a signature for the same pubkey, the earliest-seen one wins: a
//! resubmitted or replayed partial signature never displaces a signature
//! already recorded for that pubkey.

use std::collections::BTreeMap;

use bitcoin::blockdata::script::{Instruction, ScriptBuf};
use bitcoin::{Transaction, Witness};
use secp256k1::ecdsa;
use secp256k1::{Message, PublicKey, Secp256k1};
use vault_db::model::RedeemScriptPattern;

use crate::sighash::compute_sighash;

/// `existing` and `incoming` are keyed by pubkey bytes. Returns the number of
/// new signatures actually added.
pub fn merge_signatures(existing: &mut BTreeMap<Vec<u8>, Vec<u8>>, incoming: &BTreeMap<Vec<u8>, Vec<u8>>) -> usize {
    let mut added = 0;
    for (pubkey, sig) in incoming {
        if !existing.contains_key(pubkey) {
            existing.insert(pubkey.clone(), sig.clone());
            added += 1;
        }
    }
    added
}

/// Pulls the candidate DER+sighash-type signature blobs out of a scriptSig or
/// witness stack, in the order they appear. A raw transaction names no pubkey
/// per signature, so these are only candidates until verified against one.
pub fn extract_signature_candidates(pattern: RedeemScriptPattern, script_sig: &ScriptBuf, witness: &Witness) -> Vec<Vec<u8>> {
    if pattern.uses_witness() {
        let items: Vec<Vec<u8>> = witness.iter().map(|i| i.to_vec()).collect();
        if items.len() < 2 {
            return Vec::new();
        }
        items[1..items.len() - 1].to_vec()
    } else {
        let pushes: Vec<Vec<u8>> = script_sig
            .instructions()
            .filter_map(|i| i.ok())
            .filter_map(|instr| match instr {
                Instruction::PushBytes(b) => Some(b.as_bytes().to_vec()),
                _ => None,
            })
            .collect();
        if pushes.len() < 2 {
            return Vec::new();
        }
        pushes[..pushes.len() - 1].to_vec()
    }
}

/// Matches each candidate signature to the pubkey it verifies against for
/// `input_index`'s sighash, grounded in `SignableTxIn::mergesigs`'s own
/// verify-then-assign approach (a scriptSig carries signatures, never which
/// key made them). Unmatched or malformed candidates are silently dropped.
pub fn match_signatures_to_pubkeys(
    tx: &Transaction,
    input_index: usize,
    redeem_script: &ScriptBuf,
    input_value_sat: u64,
    pattern: RedeemScriptPattern,
    pubkeys: &[Vec<u8>],
    candidates: &[Vec<u8>],
) -> BTreeMap<Vec<u8>, Vec<u8>> {
    let mut matched = BTreeMap::new();
    let sighash = match compute_sighash(tx, input_index, redeem_script, input_value_sat, pattern) {
        Ok(h) => h,
        Err(_) => return matched,
    };
    let secp = Secp256k1::verification_only();
    let message = match Message::from_digest_slice(&sighash) {
        Ok(m) => m,
        Err(_) => return matched,
    };

    for candidate in candidates {
        if candidate.len() < 9 {
            continue;
        }
        let (der, _sighash_type) = candidate.split_at(candidate.len() - 1);
        let sig = match ecdsa::Signature::from_der(der) {
            Ok(s) => s,
            Err(_) => continue,
        };
        for pk_bytes in pubkeys {
            if matched.contains_key(pk_bytes) {
                continue;
            }
            if let Ok(pk) = PublicKey::from_slice(pk_bytes) {
                if secp.verify_ecdsa(&message, &sig, &pk).is_ok() {
                    matched.insert(pk_bytes.clone(), candidate.clone());
                    break;
                }
            }
        }
    }
    matched
}
