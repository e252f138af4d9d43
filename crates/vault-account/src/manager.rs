//! Account and account-bin manager: account creation, signing-script
//! pool lookahead/refill, and script issuance.

use bitcoin::bip32::{ChainCode, ChildNumber, Fingerprint};
use bitcoin::secp256k1::PublicKey;

use vault_core::bip32::{self, Step};
use vault_db::error::{AccountBinError, AccountError, VaultError};
use vault_db::model::{Account, AccountBin, Id, Keychain, RedeemScriptPattern, SigningScript, SigningScriptStatus, BIN_INDEX_CHANGE, BIN_INDEX_DEFAULT};
use vault_db::store::Store;
use vault_script::redeem_script::build_redeem_script;
use vault_script::txoutscript::{derive_txinscript_template, derive_txoutscript};

pub struct AccountManager;

impl AccountManager {
    pub fn new_account(
        store: &mut dyn Store,
        name: &str,
        keychains: &[Keychain],
        minsigs: u8,
        pattern: RedeemScriptPattern,
        unused_pool_size: u32,
        time_created: i64,
    ) -> Result<Account, VaultError> {
        if store.get_account_by_name(name)?.is_some() {
            return Err(AccountError::AlreadyExists(name.to_string()).into());
        }
        let keychain_hashes: Vec<_> = keychains.iter().map(|k| k.hash).collect();
        let hash = Account::compute_hash(minsigs, keychain_hashes, pattern);
        if store.get_account_by_hash(&hash)?.is_some() {
            return Err(AccountError::AlreadyExists(format!("account with this hash already exists: {name}")).into());
        }

        let account = Account {
            id: None,
            name: name.to_string(),
            hash,
            minsigs,
            keychain_ids: keychains.iter().filter_map(|k| k.id).collect(),
            unused_pool_size,
            compressed_keys: true,
            pattern,
            time_created,
        };
        let account_id = store.insert_account(&account)?;
        let account = Account { id: Some(account_id), ..account };

        Self::new_bin(store, account_id, "change", BIN_INDEX_CHANGE)?;
        Self::new_bin(store, account_id, "default", BIN_INDEX_DEFAULT)?;
        Self::refill_account_bin_pool(store, &account, BIN_INDEX_CHANGE, 0, keychains)?;
        Self::refill_account_bin_pool(store, &account, BIN_INDEX_DEFAULT, 0, keychains)?;

        Ok(account)
    }

    fn new_bin(store: &mut dyn Store, account_id: Id, name: &str, index: u32) -> Result<AccountBin, VaultError> {
        let bin = AccountBin {
            id: None,
            account_id,
            name: name.to_string(),
            index,
            hash: [0u8; 20],
            next_script_index: 0,
            script_count: 0,
            labels: Default::default(),
            imported_keychain_ids: None,
        };
        let id = store.insert_bin(&bin)?;
        Ok(AccountBin { id: Some(id), ..bin })
    }

    /// Brings the bin's pool up to `max(min_index, highest_issued + 1) +
    /// account.unused_pool_size` by materializing new `UNUSED` scripts.
    pub fn refill_account_bin_pool(
        store: &mut dyn Store,
        account: &Account,
        bin_index: u32,
        min_index: u32,
        keychains: &[Keychain],
    ) -> Result<(), VaultError> {
        let bin = store
            .get_bin_by_name(account.id.expect("account persisted"), bin_name_for_index(bin_index))?
            .ok_or_else(|| AccountBinError::NotFound(bin_name_for_index(bin_index).to_string()))?;

        let existing_scripts = store.scripts_for_bin(bin.id.expect("bin persisted"))?;
        let highest_issued = existing_scripts
            .iter()
            .filter(|s| s.status != SigningScriptStatus::Unused)
            .map(|s| s.index)
            .max();
        let floor = highest_issued.map(|h| h + 1).unwrap_or(0).max(min_index);
        let target_highest = floor + account.unused_pool_size.saturating_sub(1);

        let target_count = target_highest + 1;
        let mut bin = bin;
        while bin.script_count < target_count {
            let script_index = bin.script_count;
            let script = Self::materialize_script(account, &bin, script_index, keychains)?;
            store.insert_signing_script(&script)?;
            bin.script_count += 1;
        }
        store.update_bin(&bin)?;
        Ok(())
    }

    fn materialize_script(account: &Account, bin: &AccountBin, script_index: u32, keychains: &[Keychain]) -> Result<SigningScript, VaultError> {
        let mut pubkeys = Vec::with_capacity(keychains.len());
        for kc in keychains {
            let pubkey = PublicKey::from_slice(&kc.pubkey).map_err(|e| AccountError::NotFound(e.to_string()))?;
            let xpub = bip32::xpub_from_parts(
                pubkey,
                ChainCode::from(kc.chain_code),
                kc.depth,
                Fingerprint::from(kc.parent_fingerprint),
                ChildNumber::from(kc.child_num),
            );
            let bin_child = bip32::derive_child_public(&xpub, Step::Normal(bin.index))
                .map_err(|e| AccountError::NotFound(e.to_string()))?;
            let script_child = bip32::derive_child_public(&bin_child, Step::Normal(script_index))
                .map_err(|e| AccountError::NotFound(e.to_string()))?;
            pubkeys.push(script_child.public_key.serialize().to_vec());
        }

        let redeem_script = build_redeem_script(account.minsigs, &pubkeys).map_err(|e| AccountError::NotFound(e.to_string()))?;
        let txoutscript = derive_txoutscript(&redeem_script, account.pattern);
        let txinscript_template = derive_txinscript_template(&redeem_script, account.pattern);

        Ok(SigningScript {
            id: None,
            bin_id: bin.id.expect("bin persisted"),
            index: script_index,
            label: String::new(),
            status: SigningScriptStatus::Unused,
            redeem_script: redeem_script.to_bytes(),
            txinscript_template: txinscript_template.to_bytes(),
            txoutscript: txoutscript.to_bytes(),
        })
    }

    /// Issues the specified (or lowest unused) script from a non-change bin,
    /// transitioning it to `ISSUED` and recording its label.
    pub fn issue_signing_script(
        store: &mut dyn Store,
        account: &Account,
        bin_name: &str,
        label: &str,
        index: u32,
        keychains: &[Keychain],
    ) -> Result<SigningScript, VaultError> {
        let bin = store
            .get_bin_by_name(account.id.expect("account persisted"), bin_name)?
            .ok_or_else(|| AccountBinError::NotFound(bin_name.to_string()))?;
        if bin.is_change() {
            return Err(AccountError::CannotIssueChangeScript.into());
        }

        Self::refill_account_bin_pool(store, account, bin.index, index, keychains)?;

        let scripts = store.scripts_for_bin(bin.id.expect("bin persisted"))?;
        let mut selected = if index > 0 {
            scripts.into_iter().find(|s| s.index == index)
        } else {
            let mut unused: Vec<_> = scripts.into_iter().filter(|s| s.status == SigningScriptStatus::Unused).collect();
            unused.sort_by_key(|s| s.index);
            unused.into_iter().next()
        }
        .ok_or(AccountBinError::OutOfScripts)?;

        selected.status = SigningScriptStatus::Issued;
        selected.label = label.to_string();
        store.update_signing_script(&selected)?;

        let mut bin = bin;
        bin.next_script_index = selected.index + 1;
        store.update_bin(&bin)?;

        Ok(selected)
    }
}

fn bin_name_for_index(index: u32) -> &'static str {
    if index == BIN_INDEX_CHANGE {
        "change"
    } else {
        "default"
    }
}
