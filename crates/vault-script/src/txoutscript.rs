//! Derives the scriptPubKey and scriptSig/witness templates from a redeem
//! script, dispatching on [`RedeemScriptPattern`].

use bitcoin::blockdata::script::{Builder, Instruction, PushBytesBuf, ScriptBuf};
use bitcoin::Witness;
use vault_db::model::RedeemScriptPattern;

/// The scriptPubKey paying into this redeem script under the given pattern.
pub fn derive_txoutscript(redeem_script: &ScriptBuf, pattern: RedeemScriptPattern) -> ScriptBuf {
    match pattern {
        RedeemScriptPattern::P2sh => ScriptBuf::new_p2sh(&redeem_script.script_hash()),
        RedeemScriptPattern::P2wsh => ScriptBuf::new_p2wsh(&redeem_script.wscript_hash()),
        RedeemScriptPattern::P2shP2wsh => {
            let witness_script_pubkey = ScriptBuf::new_p2wsh(&redeem_script.wscript_hash());
            ScriptBuf::new_p2sh(&witness_script_pubkey.script_hash())
        }
    }
}

/// For P2SH (and P2SH-wrapped-P2WSH) this is the scriptSig carried alongside
/// the witness stack: a push of the witness-program script (P2SH-P2WSH) or
/// the bare redeem script (P2SH). Native P2WSH carries no scriptSig.
pub fn derive_txinscript_template(redeem_script: &ScriptBuf, pattern: RedeemScriptPattern) -> ScriptBuf {
    match pattern {
        RedeemScriptPattern::P2wsh => ScriptBuf::new(),
        RedeemScriptPattern::P2sh => push_script(redeem_script),
        RedeemScriptPattern::P2shP2wsh => {
            let witness_script_pubkey = ScriptBuf::new_p2wsh(&redeem_script.wscript_hash());
            push_script(&witness_script_pubkey)
        }
    }
}

fn push_script(script: &ScriptBuf) -> ScriptBuf {
    let push = PushBytesBuf::try_from(script.to_bytes()).expect("redeem script under 4GB");
    Builder::new().push_slice(push).into_script()
}

/// Recovers the redeem script (and the pattern it implies) carried inside an
/// input's own scriptSig/witness, with no prevout to consult. The redeem
/// script is always the final push — in the witness for P2WSH and
/// P2SH-P2WSH, in the scriptSig for plain P2SH — regardless of how many of
/// its signature slots are still placeholders.
pub fn infer_pattern_and_redeem_script(script_sig: &ScriptBuf, witness: &Witness) -> Option<(RedeemScriptPattern, ScriptBuf)> {
    if !witness.is_empty() {
        let redeem_script = ScriptBuf::from(witness.iter().last()?.to_vec());
        let pattern = if script_sig.is_empty() { RedeemScriptPattern::P2wsh } else { RedeemScriptPattern::P2shP2wsh };
        Some((pattern, redeem_script))
    } else if !script_sig.is_empty() {
        let last_push = script_sig
            .instructions()
            .filter_map(|i| i.ok())
            .filter_map(|instr| match instr {
                Instruction::PushBytes(b) => Some(b.as_bytes().to_vec()),
                _ => None,
            })
            .last()?;
        Some((RedeemScriptPattern::P2sh, ScriptBuf::from(last_push)))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redeem_script::build_redeem_script;

    fn sample_redeem_script() -> ScriptBuf {
        let pks = vec![vec![2u8; 33], vec![3u8; 33]];
        build_redeem_script(1, &pks).unwrap()
    }

    #[test]
    fn p2sh_txoutscript_is_hash160_of_redeem_script() {
        let rs = sample_redeem_script();
        let out = derive_txoutscript(&rs, RedeemScriptPattern::P2sh);
        assert!(out.is_p2sh());
    }

    #[test]
    fn p2wsh_txoutscript_is_witness_program() {
        let rs = sample_redeem_script();
        let out = derive_txoutscript(&rs, RedeemScriptPattern::P2wsh);
        assert!(out.is_p2wsh());
    }

    #[test]
    fn p2sh_p2wsh_wraps_witness_program_in_p2sh() {
        let rs = sample_redeem_script();
        let out = derive_txoutscript(&rs, RedeemScriptPattern::P2shP2wsh);
        assert!(out.is_p2sh());
    }

    #[test]
    fn native_p2wsh_has_no_txinscript_template() {
        let rs = sample_redeem_script();
        let template = derive_txinscript_template(&rs, RedeemScriptPattern::P2wsh);
        assert!(template.is_empty());
    }

    #[test]
    fn p2sh_txinscript_template_pushes_the_redeem_script() {
        let rs = sample_redeem_script();
        let template = derive_txinscript_template(&rs, RedeemScriptPattern::P2sh);
        assert!(!template.is_empty());
    }

    #[test]
    fn infers_native_p2wsh_redeem_script_from_the_witness() {
        let rs = sample_redeem_script();
        let witness = bitcoin::Witness::from_slice(&[vec![], rs.to_bytes()]);
        let (pattern, recovered) = infer_pattern_and_redeem_script(&ScriptBuf::new(), &witness).unwrap();
        assert_eq!(pattern, RedeemScriptPattern::P2wsh);
        assert_eq!(recovered, rs);
    }

    #[test]
    fn infers_p2sh_redeem_script_from_the_scriptsig() {
        let rs = sample_redeem_script();
        let script_sig = push_script(&rs);
        let (pattern, recovered) = infer_pattern_and_redeem_script(&script_sig, &Witness::new()).unwrap();
        assert_eq!(pattern, RedeemScriptPattern::P2sh);
        assert_eq!(recovered, rs);
    }

    #[test]
    fn no_scriptsig_or_witness_infers_nothing() {
        assert!(infer_pattern_and_redeem_script(&ScriptBuf::new(), &Witness::new()).is_none());
    }
}
