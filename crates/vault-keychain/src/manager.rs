//! Keychain manager: new-keychain/child/unlock/lock/encrypt/decrypt and
//! BIP32 import/export, plus the merge-or-rename logic for importing a
//! keychain record from elsewhere.

use bitcoin::bip32::{ChainCode, ChildNumber, Fingerprint, Xpriv, Xpub};
use bitcoin::secp256k1::{PublicKey, Secp256k1};
use bitcoin::Network;

use vault_core::bip32::{self, Step};
use vault_core::crypto::{self, EncryptedPayload};
use vault_db::error::{KeychainError, VaultError};
use vault_db::model::Keychain;
use vault_db::store::Store;

use crate::session::SessionContext;

fn encrypt_bytes(plaintext: &[u8], lock_key: Option<&str>) -> Result<(Vec<u8>, u64), VaultError> {
    match lock_key {
        Some(pass) => {
            let payload = crypto::encrypt(plaintext, pass)
                .map_err(|e| KeychainError::InvalidPrivateKey(e.to_string()))?;
            Ok((payload.to_bytes(), 1))
        }
        None => Ok((plaintext.to_vec(), 0)),
    }
}

fn decrypt_bytes(ciphertext: &[u8], salt: u64, lock_key: Option<&str>) -> Result<Vec<u8>, VaultError> {
    if salt == 0 {
        return Ok(ciphertext.to_vec());
    }
    let pass = lock_key.ok_or_else(|| KeychainError::PrivateKeyLocked("lock key required".into()))?;
    let payload = EncryptedPayload::from_bytes(ciphertext)
        .map_err(|e| KeychainError::PrivateKeyUnlockFailed(e.to_string()))?;
    crypto::decrypt(&payload, pass).map_err(|e| KeychainError::PrivateKeyUnlockFailed(e.to_string()).into())
}

/// Derives the next free `"<base> <n>"` name when a name collision has a
/// different identity hash than the one being imported.
fn next_free_name(store: &dyn Store, base: &str) -> Result<String, VaultError> {
    let mut n = 2u32;
    loop {
        let candidate = format!("{base} {n}");
        if store.get_keychain_by_name(&candidate)?.is_none() {
            return Ok(candidate);
        }
        n += 1;
    }
}

pub struct KeychainManager;

impl KeychainManager {
    pub fn new_keychain(
        store: &mut dyn Store,
        name: &str,
        entropy: &[u8],
        lock_key: Option<&str>,
        network: Network,
    ) -> Result<Keychain, VaultError> {
        if name.trim().is_empty() {
            return Err(KeychainError::InvalidName(name.to_string()).into());
        }
        if store.get_keychain_by_name(name)?.is_some() {
            return Err(KeychainError::AlreadyExists(name.to_string()).into());
        }

        let master = bip32::master_from_entropy(entropy, network)
            .map_err(|e| KeychainError::InvalidPrivateKey(e.to_string()))?;
        let secp = Secp256k1::new();
        let pubkey = PublicKey::from_secret_key(&secp, &master.private_key);
        let hash = bip32::identity_hash(&pubkey, &master.chain_code);
        if store.get_keychain_by_hash(&hash)?.is_some() {
            return Err(KeychainError::AlreadyExists(format!("keychain with this hash already exists: {name}")).into());
        }

        let (privkey_ciphertext, privkey_salt) = encrypt_bytes(master.to_string().as_bytes(), lock_key)?;
        let (seed_ciphertext, seed_salt) = encrypt_bytes(entropy, lock_key)?;

        let keychain = Keychain {
            id: None,
            name: name.to_string(),
            hash,
            depth: master.depth,
            parent_fingerprint: master.parent_fingerprint.to_bytes(),
            child_num: u32::from(master.child_number),
            chain_code: *master.chain_code.as_bytes(),
            pubkey: pubkey.serialize(),
            privkey_ciphertext,
            privkey_salt,
            seed_ciphertext,
            seed_salt,
            has_seed: true,
            derivation_path: Vec::new(),
            parent_id: None,
            hidden: false,
        };
        let id = store.insert_keychain(&keychain)?;
        Ok(Keychain { id: Some(id), ..keychain }
        )
    }

    pub fn child(
        store: &mut dyn Store,
        session: &SessionContext,
        parent_name: &str,
        raw_index: u32,
        get_private: bool,
        lock_key: Option<&str>,
    ) -> Result<Keychain, VaultError> {
        let parent = store
            .get_keychain_by_name(parent_name)?
            .ok_or_else(|| KeychainError::NotFound(parent_name.to_string()))?;
        let step = Step::from_raw(raw_index);
        let secp = Secp256k1::new();

        if get_private || step.is_hardened() {
            let parent_xpriv = session
                .get(parent_name)
                .ok_or_else(|| KeychainError::PrivateKeyLocked(parent_name.to_string()))?;
            let child_xpriv = bip32::derive_child_private(&parent_xpriv, step)
                .map_err(|e| KeychainError::InvalidPrivateKey(e.to_string()))?;
            let child_pubkey = PublicKey::from_secret_key(&secp, &child_xpriv.private_key);
            let hash = bip32::identity_hash(&child_pubkey, &child_xpriv.chain_code);
            let (privkey_ciphertext, privkey_salt) = encrypt_bytes(child_xpriv.to_string().as_bytes(), lock_key)?;

            let mut derivation_path = parent.derivation_path.clone();
            derivation_path.push(step.to_raw());
            let child = Keychain {
                id: None,
                name: format!("{parent_name}/{raw_index}"),
                hash,
                depth: child_xpriv.depth,
                parent_fingerprint: child_xpriv.parent_fingerprint.to_bytes(),
                child_num: u32::from(child_xpriv.child_number),
                chain_code: *child_xpriv.chain_code.as_bytes(),
                pubkey: child_pubkey.serialize(),
                privkey_ciphertext,
                privkey_salt,
                seed_ciphertext: Vec::new(),
                seed_salt: 0,
                has_seed: false,
                derivation_path,
                parent_id: parent.id,
                hidden: false,
            };
            let id = store.insert_keychain(&child)?;
            Ok(Keychain { id: Some(id), ..child })
        } else {
            let parent_pubkey = PublicKey::from_slice(&parent.pubkey)
                .map_err(|e| KeychainError::InvalidPrivateKey(e.to_string()))?;
            let parent_xpub = Xpub {
                network: bitcoin::NetworkKind::Main,
                depth: parent.depth,
                parent_fingerprint: Fingerprint::from(parent.parent_fingerprint),
                child_number: ChildNumber::from(parent.child_num),
                public_key: parent_pubkey,
                chain_code: ChainCode::from(parent.chain_code),
            };
            let child_xpub = bip32::derive_child_public(&parent_xpub, step)
                .map_err(|e| KeychainError::InvalidPrivateKey(e.to_string()))?;
            let hash = bip32::identity_hash(&child_xpub.public_key, &child_xpub.chain_code);

            let mut derivation_path = parent.derivation_path.clone();
            derivation_path.push(step.to_raw());
            let child = Keychain {
                id: None,
                name: format!("{parent_name}/{raw_index}"),
                hash,
                depth: child_xpub.depth,
                parent_fingerprint: child_xpub.parent_fingerprint.to_bytes(),
                child_num: u32::from(child_xpub.child_number),
                chain_code: *child_xpub.chain_code.as_bytes(),
                pubkey: child_xpub.public_key.serialize(),
                privkey_ciphertext: Vec::new(),
                privkey_salt: 0,
                seed_ciphertext: Vec::new(),
                seed_salt: 0,
                has_seed: false,
                derivation_path,
                parent_id: parent.id,
                hidden: false,
            };
            let id = store.insert_keychain(&child)?;
            Ok(Keychain { id: Some(id), ..child })
        }
    }

    pub fn unlock(store: &dyn Store, session: &mut SessionContext, name: &str, lock_key: &str) -> Result<(), VaultError> {
        let kc = store.get_keychain_by_name(name)?.ok_or_else(|| KeychainError::NotFound(name.to_string()))?;
        if !kc.is_private() {
            return Err(KeychainError::IsNotPrivate(name.to_string()).into());
        }
        let plaintext = decrypt_bytes(&kc.privkey_ciphertext, kc.privkey_salt, Some(lock_key))?;
        let xprv_str = String::from_utf8(plaintext).map_err(|e| KeychainError::PrivateKeyUnlockFailed(e.to_string()))?;
        let xpriv = bip32::import_xpriv(&xprv_str).map_err(|e| KeychainError::PrivateKeyUnlockFailed(e.to_string()))?;
        session.insert(name, xpriv);
        Ok(())
    }

    pub fn lock(session: &mut SessionContext, name: &str) {
        session.lock(name);
    }

    pub fn lock_all(session: &mut SessionContext) {
        session.lock_all();
    }

    pub fn encrypt(store: &mut dyn Store, session: &SessionContext, name: &str, new_lock_key: &str) -> Result<(), VaultError> {
        let mut kc = store.get_keychain_by_name(name)?.ok_or_else(|| KeychainError::NotFound(name.to_string()))?;
        let xpriv = session.get(name).ok_or_else(|| KeychainError::PrivateKeyLocked(name.to_string()))?;
        let (ciphertext, salt) = encrypt_bytes(xpriv.to_string().as_bytes(), Some(new_lock_key))?;
        kc.privkey_ciphertext = ciphertext;
        kc.privkey_salt = salt;
        store.update_keychain(&kc)?;
        Ok(())
    }

    pub fn decrypt(store: &mut dyn Store, session: &SessionContext, name: &str) -> Result<(), VaultError> {
        let mut kc = store.get_keychain_by_name(name)?.ok_or_else(|| KeychainError::NotFound(name.to_string()))?;
        let xpriv = session.get(name).ok_or_else(|| KeychainError::PrivateKeyLocked(name.to_string()))?;
        let (ciphertext, salt) = encrypt_bytes(xpriv.to_string().as_bytes(), None)?;
        kc.privkey_ciphertext = ciphertext;
        kc.privkey_salt = salt;
        store.update_keychain(&kc)?;
        Ok(())
    }

    pub fn export_bip32(store: &dyn Store, session: &SessionContext, name: &str, include_private: bool) -> Result<String, VaultError> {
        let kc = store.get_keychain_by_name(name)?.ok_or_else(|| KeychainError::NotFound(name.to_string()))?;
        if include_private {
            let xpriv = session.get(name).ok_or_else(|| KeychainError::PrivateKeyLocked(name.to_string()))?;
            Ok(xpriv.to_string())
        } else {
            let pubkey = PublicKey::from_slice(&kc.pubkey).map_err(|e| KeychainError::InvalidPrivateKey(e.to_string()))?;
            let xpub = Xpub {
                network: bitcoin::NetworkKind::Main,
                depth: kc.depth,
                parent_fingerprint: Fingerprint::from(kc.parent_fingerprint),
                child_number: ChildNumber::from(kc.child_num),
                public_key: pubkey,
                chain_code: ChainCode::from(kc.chain_code),
            };
            Ok(xpub.to_string())
        }
    }

    pub fn import_bip32(store: &mut dyn Store, name: &str, extkey: &str, lock_key: Option<&str>) -> Result<Keychain, VaultError> {
        if let Ok(xpriv) = bip32::import_xpriv(extkey) {
            let secp = Secp256k1::new();
            let pubkey = PublicKey::from_secret_key(&secp, &xpriv.private_key);
            let hash = bip32::identity_hash(&pubkey, &xpriv.chain_code);
            let (privkey_ciphertext, privkey_salt) = encrypt_bytes(xpriv.to_string().as_bytes(), lock_key)?;
            let kc = Keychain {
                id: None,
                name: name.to_string(),
                hash,
                depth: xpriv.depth,
                parent_fingerprint: xpriv.parent_fingerprint.to_bytes(),
                child_num: u32::from(xpriv.child_number),
                chain_code: *xpriv.chain_code.as_bytes(),
                pubkey: pubkey.serialize(),
                privkey_ciphertext,
                privkey_salt,
                seed_ciphertext: Vec::new(),
                seed_salt: 0,
                has_seed: false,
                derivation_path: Vec::new(),
                parent_id: None,
                hidden: false,
            };
            return Self::persist_imported(store, kc);
        }

        let xpub = bip32::import_xpub(extkey).map_err(|e| KeychainError::InvalidPrivateKey(e.to_string()))?;
        let hash = bip32::identity_hash(&xpub.public_key, &xpub.chain_code);
        let kc = Keychain {
            id: None,
            name: name.to_string(),
            hash,
            depth: xpub.depth,
            parent_fingerprint: xpub.parent_fingerprint.to_bytes(),
            child_num: u32::from(xpub.child_number),
            chain_code: *xpub.chain_code.as_bytes(),
            pubkey: xpub.public_key.serialize(),
            privkey_ciphertext: Vec::new(),
            privkey_salt: 0,
            seed_ciphertext: Vec::new(),
            seed_salt: 0,
            has_seed: false,
            derivation_path: Vec::new(),
            parent_id: None,
            hidden: false,
        };
        Self::persist_imported(store, kc)
    }

    fn persist_imported(store: &mut dyn Store, kc: Keychain) -> Result<Keychain, VaultError> {
        match store.get_keychain_by_name(&kc.name)? {
            Some(existing) if existing.hash != kc.hash => {
                let renamed_name = next_free_name(store, &kc.name)?;
                let kc = Keychain { name: renamed_name, ..kc };
                let id = store.insert_keychain(&kc)?;
                Ok(Keychain { id: Some(id), ..kc })
            }
            _ => {
                let id = store.insert_keychain(&kc)?;
                Ok(Keychain { id: Some(id), ..kc })
            }
        }
    }

    /// Imports a keychain record (e.g. decoded from a vault export). If an
    /// existing record shares its hash and is public-only while the import is
    /// private, the private material is merged into the stored record and
    /// every `Key` row under that root is flipped to private. A name collision
    /// against a *different* hash renames the import instead of failing.
    pub fn import_keychain(store: &mut dyn Store, imported: Keychain, want_private: bool) -> Result<Keychain, VaultError> {
        if let Some(existing) = store.get_keychain_by_hash(&imported.hash)? {
            if !existing.is_private() && want_private && imported.is_private() {
                let merged = Keychain {
                    privkey_ciphertext: imported.privkey_ciphertext.clone(),
                    privkey_salt: imported.privkey_salt,
                    seed_ciphertext: imported.seed_ciphertext.clone(),
                    seed_salt: imported.seed_salt,
                    has_seed: imported.has_seed || existing.has_seed,
                    ..existing.clone()
                };
                store.update_keychain(&merged)?;
                if let Some(root_id) = merged.id {
                    for mut key in store.keys_for_root(root_id)? {
                        if !key.is_private {
                            key.is_private = true;
                            store.update_key(&key)?;
                        }
                    }
                }
                return Ok(merged);
            }
            return Err(KeychainError::AlreadyExists(existing.name).into());
        }

        match store.get_keychain_by_name(&imported.name)? {
            Some(other) if other.hash != imported.hash => {
                let renamed_name = next_free_name(store, &imported.name)?;
                let kc = Keychain { id: None, name: renamed_name, ..imported };
                let id = store.insert_keychain(&kc)?;
                Ok(Keychain { id: Some(id), ..kc })
            }
            Some(_) => Err(KeychainError::AlreadyExists(imported.name).into()),
            None => {
                let kc = Keychain { id: None, ..imported };
                let id = store.insert_keychain(&kc)?;
                Ok(Keychain { id: Some(id), ..kc })
            }
        }
    }
}
