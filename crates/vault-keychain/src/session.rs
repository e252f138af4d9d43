//! The unlocked-key cache: unlocked private keys live in an explicit,
//! passed-around value instead of process-wide global state, so two vaults
//! opened in the same process never share unlock state and nothing needs a
//! `static`.

use std::collections::HashMap;

use bitcoin::bip32::Xpriv;
use zeroize::Zeroizing;

/// Unlocked extended private keys, keyed by keychain name. Each entry is kept
/// as its base58 string wrapped in [`Zeroizing`] rather than as a raw `Xpriv`,
/// so dropping or overwriting an entry actually scrubs the secret bytes.
#[derive(Default)]
pub struct SessionContext {
    unlocked: HashMap<String, Zeroizing<String>>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, xpriv: Xpriv) {
        self.unlocked.insert(name.into(), Zeroizing::new(xpriv.to_string()));
    }

    pub fn get(&self, name: &str) -> Option<Xpriv> {
        self.unlocked.get(name).and_then(|s| s.parse::<Xpriv>().ok())
    }

    pub fn is_unlocked(&self, name: &str) -> bool {
        self.unlocked.contains_key(name)
    }

    pub fn lock(&mut self, name: &str) {
        self.unlocked.remove(name);
    }

    pub fn lock_all(&mut self) {
        self.unlocked.clear();
    }
}
