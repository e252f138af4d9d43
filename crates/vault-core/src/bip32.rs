//! BIP32 HD derivation and keychain identity hashing.
//!
//! A keychain's identity hash is `RIPEMD160(SHA256(pubkey || chain_code))`; this
//! module is the only place that formula is computed, so every caller (account
//! hashing, account-bin hashing) gets it for free by hashing the same bytes.

use bitcoin::bip32::{ChainCode, ChildNumber, Fingerprint, Xpriv, Xpub};
use bitcoin::hashes::{ripemd160, sha256, Hash};
use bitcoin::secp256k1::{PublicKey, Secp256k1};
use bitcoin::Network;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Bip32Error {
    #[error("derivation failed: {0}")]
    Derivation(String),
    #[error("hardened derivation requires a private key")]
    HardenedRequiresPrivate,
    #[error("invalid extended key: {0}")]
    InvalidExtendedKey(String),
    #[error("entropy too short: need at least 128 bits, got {0}")]
    EntropyTooShort(usize),
}

/// Derive a BIP32 master extended private key from raw entropy (`HMAC-SHA512("Bitcoin
/// seed", entropy)`, performed internally by [`Xpriv::new_master`]).
pub fn master_from_entropy(entropy: &[u8], network: Network) -> Result<Xpriv, Bip32Error> {
    if entropy.len() < 16 {
        return Err(Bip32Error::EntropyTooShort(entropy.len() * 8));
    }
    Xpriv::new_master(network, entropy).map_err(|e| Bip32Error::Derivation(e.to_string()))
}

/// A single derivation step: a plain index, or a hardened index (high bit set).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Normal(u32),
    Hardened(u32),
}

impl Step {
    pub fn from_raw(raw: u32) -> Self {
        if raw & 0x8000_0000 != 0 {
            Step::Hardened(raw & 0x7fff_ffff)
        } else {
            Step::Normal(raw)
        }
    }

    pub fn to_raw(self) -> u32 {
        match self {
            Step::Normal(i) => i,
            Step::Hardened(i) => i | 0x8000_0000,
        }
    }

    fn to_child_number(self) -> ChildNumber {
        match self {
            Step::Normal(i) => ChildNumber::Normal { index: i },
            Step::Hardened(i) => ChildNumber::Hardened { index: i },
        }
    }

    pub fn is_hardened(self) -> bool {
        matches!(self, Step::Hardened(_))
    }
}

/// Derive a single private child. Hardened and normal steps are both permitted,
/// since a private parent key is always available here.
pub fn derive_child_private(parent: &Xpriv, step: Step) -> Result<Xpriv, Bip32Error> {
    let secp = Secp256k1::new();
    parent
        .ckd_priv(&secp, step.to_child_number())
        .map_err(|e| Bip32Error::Derivation(e.to_string()))
}

/// Derive a single public child. Hardened public-only derivation is impossible by
/// construction (BIP32) and is rejected up front with a clear error rather than a
/// cryptic library failure.
pub fn derive_child_public(parent: &Xpub, step: Step) -> Result<Xpub, Bip32Error> {
    if step.is_hardened() {
        return Err(Bip32Error::HardenedRequiresPrivate);
    }
    let secp = Secp256k1::new();
    parent
        .ckd_pub(&secp, step.to_child_number())
        .map_err(|e| Bip32Error::Derivation(e.to_string()))
}

/// Derive along a full path of steps, starting from a private master.
pub fn derive_path_private(master: &Xpriv, path: &[Step]) -> Result<Xpriv, Bip32Error> {
    let mut node = *master;
    for step in path {
        node = derive_child_private(&node, *step)?;
    }
    Ok(node)
}

/// Derive along a full path of steps, starting from a public master. Fails on the
/// first hardened step, since public-only keychains cannot cross one.
pub fn derive_path_public(master: &Xpub, path: &[Step]) -> Result<Xpub, Bip32Error> {
    let mut node = *master;
    for step in path {
        node = derive_child_public(&node, *step)?;
    }
    Ok(node)
}

/// `RIPEMD160(SHA256(pubkey || chain_code))` — the keychain/account identity hash
/// formula used throughout the data model.
pub fn identity_hash(pubkey: &PublicKey, chain_code: &ChainCode) -> [u8; 20] {
    let mut data = Vec::with_capacity(33 + 32);
    data.extend_from_slice(&pubkey.serialize());
    data.extend_from_slice(chain_code.as_bytes());
    let sha = sha256::Hash::hash(&data);
    let ripe = ripemd160::Hash::hash(sha.as_byte_array());
    *ripe.as_byte_array()
}

pub fn parent_fingerprint(parent_pubkey: &PublicKey) -> Fingerprint {
    let sha = sha256::Hash::hash(&parent_pubkey.serialize());
    let ripe = ripemd160::Hash::hash(sha.as_byte_array());
    Fingerprint::from(&ripe.as_byte_array()[0..4])
}

/// Rebuilds an [`Xpub`] from its stored components (as kept on a `Keychain`
/// record) without needing the original derivation path. Network is fixed to
/// mainnet framing since it only changes the base58 version prefix, never the
/// derivation math.
pub fn xpub_from_parts(
    pubkey: PublicKey,
    chain_code: ChainCode,
    depth: u8,
    parent_fingerprint: Fingerprint,
    child_number: ChildNumber,
) -> Xpub {
    Xpub {
        network: bitcoin::NetworkKind::Main,
        depth,
        parent_fingerprint,
        child_number,
        public_key: pubkey,
        chain_code,
    }
}

pub fn import_xpriv(s: &str) -> Result<Xpriv, Bip32Error> {
    s.parse::<Xpriv>()
        .map_err(|e| Bip32Error::InvalidExtendedKey(e.to_string()))
}

pub fn import_xpub(s: &str) -> Result<Xpub, Bip32Error> {
    s.parse::<Xpub>()
        .map_err(|e| Bip32Error::InvalidExtendedKey(e.to_string()))
}
