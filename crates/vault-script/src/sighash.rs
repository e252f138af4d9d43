//! Sighash computation, dispatching on whether the spending pattern carries
//! a witness: native P2WSH and P2SH-wrapped-P2WSH sign
//! over the BIP143 witness message; bare P2SH signs over the legacy preimage.
//! Only `SIGHASH_ALL` is supported.

use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{Amount, ScriptBuf, Transaction};
use thiserror::Error;
use vault_db::model::RedeemScriptPattern;

#[derive(Error, Debug)]
pub enum SighashError {
    #[error("sighash computation failed: {0}")]
    Failed(String),
}

pub fn compute_sighash(
    tx: &Transaction,
    input_index: usize,
    redeem_script: &ScriptBuf,
    input_value_sat: u64,
    pattern: RedeemScriptPattern,
) -> Result<[u8; 32], SighashError> {
    let mut cache = SighashCache::new(tx);
    if pattern.uses_witness() {
        let hash = cache
            .p2wsh_signature_hash(input_index, redeem_script, Amount::from_sat(input_value_sat), EcdsaSighashType::All)
            .map_err(|e| SighashError::Failed(e.to_string()))?;
        Ok(hash.to_byte_array())
    } else {
        let hash = cache
            .legacy_signature_hash(input_index, redeem_script, EcdsaSighashType::All.to_u32())
            .map_err(|e| SighashError::Failed(e.to_string()))?;
        Ok(hash.to_byte_array())
    }
}
