//! Multisig redeem script construction.
//!
//! Pubkeys are always sorted into canonical (lexicographic) order before
//! building the `OP_m <pubkeys> OP_n OP_CHECKMULTISIG` script, matching
//! `CoinDB::Schema.cpp`'s `std::sort(..., key1->pubkey() < key2->pubkey())`:
//! two accounts built from the same keychains in any order produce the same
//! redeem script and therefore the same receiving address.

use bitcoin::blockdata::opcodes::all as opcodes;
use bitcoin::blockdata::script::{Builder, PushBytesBuf, ScriptBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("multisig requires 1-15 signatures, got m={m} n={n}")]
    BadMofN { m: u8, n: u8 },
    #[error("invalid public key length: {0}")]
    BadPubkey(usize),
}

/// Sorts `pubkeys` and builds the bare multisig redeem script.
pub fn build_redeem_script(minsigs: u8, pubkeys: &[Vec<u8>]) -> Result<ScriptBuf, ScriptError> {
    let n = pubkeys.len() as u8;
    if minsigs == 0 || n == 0 || minsigs > n || n > 15 {
        return Err(ScriptError::BadMofN { m: minsigs, n });
    }
    let mut sorted = pubkeys.to_vec();
    sorted.sort();

    let mut builder = Builder::new().push_int(minsigs as i64);
    for pk in &sorted {
        if pk.len() != 33 && pk.len() != 65 {
            return Err(ScriptError::BadPubkey(pk.len()));
        }
        let push = PushBytesBuf::try_from(pk.clone()).map_err(|_| ScriptError::BadPubkey(pk.len()))?;
        builder = builder.push_slice(push);
    }
    builder = builder.push_int(n as i64).push_opcode(opcodes::OP_CHECKMULTISIG);
    Ok(builder.into_script())
}

/// Recovers the canonical pubkey order from a previously built redeem script,
/// needed when an incoming transaction carries a redeem script we generated
/// ourselves but the signature set associated with it has been lost (e.g. a
/// signing script looked up purely by txoutscript).
pub fn pubkeys_in_redeem_script(redeem_script: &ScriptBuf) -> Vec<Vec<u8>> {
    redeem_script
        .instructions()
        .filter_map(|i| i.ok())
        .filter_map(|instr| match instr {
            bitcoin::blockdata::script::Instruction::PushBytes(bytes) => {
                let b = bytes.as_bytes();
                if b.len() == 33 || b.len() == 65 {
                    Some(b.to_vec())
                } else {
                    None
                }
            }
            _ => None,
        })
        .collect()
}
