//! CoinVault core
//!
//! Crypto primitives shared by the rest of the vault: BIP32 derivation,
//! the keychain identity hash, seed/privkey encryption, and memory hygiene
//! for unlocked key material.

pub mod bip32;
pub mod crypto;
pub mod memory;
pub mod password;
