//! Redeem script construction, txoutscript derivation, sighash computation
//! and signature assembly.

pub mod assemble;
pub mod merge;
pub mod redeem_script;
pub mod sighash;
pub mod txoutscript;

pub use redeem_script::ScriptError;
pub use sighash::SighashError;
