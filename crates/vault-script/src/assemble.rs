//! Assembles a final scriptSig/witness from however many partial signatures
//! have been collected so far, in the canonical pubkey order baked into the
//! redeem script. `OP_CHECKMULTISIG`'s off-by-one bug needs a dummy leading
//! element regardless of pattern.

use std::collections::BTreeMap;

use bitcoin::blockdata::opcodes::all as opcodes;
use bitcoin::blockdata::script::{Builder, PushBytesBuf, ScriptBuf};
use bitcoin::Witness;
use vault_db::model::RedeemScriptPattern;

/// How many of `pubkeys_in_order` currently have a recorded signature.
pub fn sigs_present(pubkeys_in_order: &[Vec<u8>], signatures: &BTreeMap<Vec<u8>, Vec<u8>>) -> usize {
    pubkeys_in_order.iter().filter(|pk| signatures.contains_key(*pk)).count()
}

pub fn missing_pubkeys(pubkeys_in_order: &[Vec<u8>], signatures: &BTreeMap<Vec<u8>, Vec<u8>>) -> Vec<Vec<u8>> {
    pubkeys_in_order
        .iter()
        .filter(|pk| !signatures.contains_key(*pk))
        .cloned()
        .collect()
}

/// Builds the scriptSig and witness for the given pattern from whatever
/// signatures are present, in redeem-script pubkey order. Callers check
/// `sigs_present(..) >= minsigs` before treating the transaction as fully
/// signed; a partially-signed assembly is still useful for exchange between
/// co-signers.
pub fn assemble(
    pattern: RedeemScriptPattern,
    redeem_script: &ScriptBuf,
    pubkeys_in_order: &[Vec<u8>],
    signatures: &BTreeMap<Vec<u8>, Vec<u8>>,
) -> (ScriptBuf, Witness) {
    let ordered_sigs: Vec<&Vec<u8>> = pubkeys_in_order.iter().filter_map(|pk| signatures.get(pk)).collect();

    if pattern.uses_witness() {
        let mut witness = Witness::new();
        witness.push(Vec::new());
        for sig in &ordered_sigs {
            witness.push(sig.as_slice());
        }
        witness.push(redeem_script.as_bytes());

        let script_sig = if pattern.witness_wrapped_in_p2sh() {
            let witness_script_pubkey = ScriptBuf::new_p2wsh(&redeem_script.wscript_hash());
            let push = PushBytesBuf::try_from(witness_script_pubkey.to_bytes()).expect("script under 4GB");
            Builder::new().push_slice(push).into_script()
        } else {
            ScriptBuf::new()
        };
        (script_sig, witness)
    } else {
        let mut builder = Builder::new().push_opcode(opcodes::OP_PUSHBYTES_0);
        for sig in &ordered_sigs {
            let push = PushBytesBuf::try_from((*sig).clone()).expect("signature under 4GB");
            builder = builder.push_slice(push);
        }
        let redeem_push = PushBytesBuf::try_from(redeem_script.to_bytes()).expect("script under 4GB");
        builder = builder.push_slice(redeem_push);
        (builder.into_script(), Witness::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redeem_script::build_redeem_script;

    #[test]
    fn assembles_partial_signatures_in_pubkey_order() {
        let pks = vec![vec![2u8; 33], vec![3u8; 33]];
        let redeem_script = build_redeem_script(2, &pks).unwrap();
        let mut sigs = BTreeMap::new();
        sigs.insert(pks[1].clone(), vec![0xbb; 70]);

        assert_eq!(sigs_present(&pks, &sigs), 1);
        assert_eq!(missing_pubkeys(&pks, &sigs), vec![pks[0].clone()]);

        let (script_sig, witness) = assemble(RedeemScriptPattern::P2wsh, &redeem_script, &pks, &sigs);
        assert!(script_sig.is_empty());
        assert_eq!(witness.len(), 3); // dummy + 1 sig + redeem script
    }

    #[test]
    fn p2sh_assembly_has_empty_witness() {
        let pks = vec![vec![2u8; 33], vec![3u8; 33]];
        let redeem_script = build_redeem_script(2, &pks).unwrap();
        let sigs = BTreeMap::new();
        let (script_sig, witness) = assemble(RedeemScriptPattern::P2sh, &redeem_script, &pks, &sigs);
        assert!(!script_sig.is_empty());
        assert!(witness.is_empty());
    }
}
