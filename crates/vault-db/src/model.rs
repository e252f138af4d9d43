//! Entities of the vault's data model: Keychain, Key, Account, AccountBin,
//! SigningScript, Tx, TxIn, TxOut, BlockHeader, MerkleBlock, User.
//!
//! Every entity with an "identity hash" computes it with
//! `RIPEMD160(SHA256(...))`, matching [`vault_core::bip32::identity_hash`]'s formula
//! but over entity-specific byte layouts, so the hashing lives here rather than
//! being re-derived by every caller.

use bitcoin::hashes::{ripemd160, sha256, Hash};
use serde::{Deserialize, Serialize};

pub type Id = u64;

/// A hash identity shared by Keychain, Account, and AccountBin: 20 bytes,
/// `RIPEMD160(SHA256(...))` over an entity-specific preimage.
pub type EntityHash = [u8; 20];

pub fn hash160(data: &[u8]) -> EntityHash {
    let sha = sha256::Hash::hash(data);
    let ripe = ripemd160::Hash::hash(sha.as_byte_array());
    *ripe.as_byte_array()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Keychain {
    pub id: Option<Id>,
    pub name: String,
    pub hash: EntityHash,
    pub depth: u8,
    pub parent_fingerprint: [u8; 4],
    pub child_num: u32,
    pub chain_code: [u8; 32],
    pub pubkey: [u8; 33],
    /// AES-GCM ciphertext; empty iff the keychain is public-only.
    pub privkey_ciphertext: Vec<u8>,
    /// 0 means the private key above is stored in cleartext (not encrypted).
    pub privkey_salt: u64,
    pub seed_ciphertext: Vec<u8>,
    pub seed_salt: u64,
    /// Distinct from "seed ciphertext is empty" — a child keychain never had a
    /// seed of its own to begin with.
    pub has_seed: bool,
    pub derivation_path: Vec<u32>,
    pub parent_id: Option<Id>,
    pub hidden: bool,
}

impl Keychain {
    pub fn is_private(&self) -> bool {
        !self.privkey_ciphertext.is_empty()
    }

    pub fn is_encrypted(&self) -> bool {
        self.privkey_salt != 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Key {
    pub id: Option<Id>,
    pub root_keychain_id: Id,
    pub derivation_path: Vec<u32>,
    pub index: u32,
    pub pubkey: [u8; 33],
    pub is_private: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RedeemScriptPattern {
    /// Trailing flags byte 0x00: legacy P2SH, uncompressed-or-compressed keys.
    P2sh,
    /// Trailing flags byte 0x01: native P2WSH.
    P2wsh,
    /// Trailing flags byte 0x03: P2WSH wrapped in P2SH.
    P2shP2wsh,
}

impl RedeemScriptPattern {
    pub fn flags_byte(self) -> u8 {
        match self {
            RedeemScriptPattern::P2sh => 0x00,
            RedeemScriptPattern::P2wsh => 0x01,
            RedeemScriptPattern::P2shP2wsh => 0x03,
        }
    }

    pub fn uses_witness(self) -> bool {
        !matches!(self, RedeemScriptPattern::P2sh)
    }

    pub fn witness_wrapped_in_p2sh(self) -> bool {
        matches!(self, RedeemScriptPattern::P2shP2wsh)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Option<Id>,
    pub name: String,
    pub hash: EntityHash,
    pub minsigs: u8,
    /// Keychain ids composing this account; order is not significant for identity
    /// (the hash sorts keychain hashes), but is preserved here for display.
    pub keychain_ids: Vec<Id>,
    pub unused_pool_size: u32,
    pub compressed_keys: bool,
    pub pattern: RedeemScriptPattern,
    pub time_created: i64,
}

impl Account {
    pub fn compute_hash(minsigs: u8, mut keychain_hashes: Vec<EntityHash>, pattern: RedeemScriptPattern) -> EntityHash {
        keychain_hashes.sort();
        let mut data = Vec::with_capacity(1 + keychain_hashes.len() * 20 + 1);
        data.push(minsigs);
        for h in &keychain_hashes {
            data.extend_from_slice(h);
        }
        data.push(pattern.flags_byte());
        hash160(&data)
    }
}

pub const BIN_INDEX_CHANGE: u32 = 1;
pub const BIN_INDEX_DEFAULT: u32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountBin {
    pub id: Option<Id>,
    pub account_id: Id,
    pub name: String,
    pub index: u32,
    pub hash: EntityHash,
    pub next_script_index: u32,
    pub script_count: u32,
    pub labels: std::collections::BTreeMap<u32, String>,
    /// Present only for bins imported with explicit keychains rather than
    /// derived from the owning account's keychains at this bin's index.
    pub imported_keychain_ids: Option<Vec<Id>>,
}

impl AccountBin {
    pub fn is_change(&self) -> bool {
        self.index == BIN_INDEX_CHANGE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SigningScriptStatus {
    Unused,
    Issued,
    Change,
    Used,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningScript {
    pub id: Option<Id>,
    pub bin_id: Id,
    pub index: u32,
    pub label: String,
    pub status: SigningScriptStatus,
    pub redeem_script: Vec<u8>,
    /// scriptSig template with a zero-length placeholder per required signature.
    pub txinscript_template: Vec<u8>,
    pub txoutscript: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TxStatus {
    NoStatus,
    Unsigned,
    Unsent,
    Sent,
    Propagated,
    Canceled,
    Confirmed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tx {
    pub id: Option<Id>,
    pub version: i32,
    pub locktime: u32,
    pub timestamp: i64,
    pub status: TxStatus,
    pub conflicting: bool,
    pub unsigned_hash: [u8; 32],
    /// Empty while `status == Unsigned`.
    pub signed_hash: [u8; 32],
    pub block_header_id: Option<Id>,
    pub block_index: Option<u32>,
    pub total_in: u64,
    pub total_out: u64,
    pub user_id: Option<Id>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxIn {
    pub id: Option<Id>,
    pub tx_id: Id,
    pub tx_index: u32,
    pub outpoint_hash: [u8; 32],
    pub outpoint_index: u32,
    pub script: Vec<u8>,
    pub witness: Vec<Vec<u8>>,
    pub sequence: u32,
    /// Resolved lazily after ingestion; weak cross-reference to the spent TxOut.
    pub outpoint_txout_id: Option<Id>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxOutStatus {
    Unspent,
    Spent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxOut {
    pub id: Option<Id>,
    pub tx_id: Id,
    pub tx_index: u32,
    pub value: u64,
    pub script: Vec<u8>,
    pub status: TxOutStatus,
    pub spent_by_txin_id: Option<Id>,
    pub sending_account_id: Option<Id>,
    pub receiving_account_id: Option<Id>,
    pub receiving_bin_id: Option<Id>,
    pub receiving_signingscript_id: Option<Id>,
    pub sending_label: String,
    pub receiving_label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockHeader {
    pub id: Option<Id>,
    pub height: u32,
    pub hash: [u8; 32],
    pub prev_hash: [u8; 32],
    pub merkle_root: [u8; 32],
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
    pub version: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerkleBlock {
    pub id: Option<Id>,
    pub block_header_id: Id,
    pub tx_count: u32,
    pub hashes: Vec<[u8; 32]>,
    pub flags: Vec<u8>,
    pub txsinserted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Option<Id>,
    pub username: String,
    pub txoutscript_whitelist: Option<Vec<Vec<u8>>>,
    pub enabled: bool,
}
