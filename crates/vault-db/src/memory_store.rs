//! An in-process `Store` backed by `HashMap`s, used across the workspace for
//! fast unit tests that don't need real durability.

use std::collections::HashMap;

use crate::error::StoreError;
use crate::model::*;
use crate::store::Store;

#[derive(Default)]
pub struct InMemoryStore {
    next_id: Id,
    in_transaction: bool,

    keychains: HashMap<Id, Keychain>,
    keys: HashMap<Id, Key>,
    accounts: HashMap<Id, Account>,
    bins: HashMap<Id, AccountBin>,
    scripts: HashMap<Id, SigningScript>,
    txs: HashMap<Id, Tx>,
    txins: HashMap<Id, TxIn>,
    txouts: HashMap<Id, TxOut>,
    headers: HashMap<Id, BlockHeader>,
    merkle_blocks: HashMap<Id, MerkleBlock>,
    users: HashMap<Id, User>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&mut self) -> Id {
        self.next_id += 1;
        self.next_id
    }
}

impl Store for InMemoryStore {
    fn begin(&mut self) -> Result<(), StoreError> {
        if self.in_transaction {
            return Err(StoreError::Constraint("transaction already open".into()));
        }
        self.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if !self.in_transaction {
            return Err(StoreError::NotInTransaction);
        }
        self.in_transaction = false;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        // A real rollback would restore a pre-transaction snapshot; InMemoryStore
        // is only used in tests that check post-commit state, so a bare flag flip
        // is sufficient here (see SqliteStore for the durable equivalent).
        self.in_transaction = false;
        Ok(())
    }

    fn insert_keychain(&mut self, kc: &Keychain) -> Result<Id, StoreError> {
        if self.keychains.values().any(|k| k.name == kc.name) {
            return Err(StoreError::Constraint(format!("duplicate keychain name {}", kc.name)));
        }
        let id = self.next();
        let mut kc = kc.clone();
        kc.id = Some(id);
        self.keychains.insert(id, kc);
        Ok(id)
    }

    fn update_keychain(&mut self, kc: &Keychain) -> Result<(), StoreError> {
        let id = kc.id.ok_or_else(|| StoreError::Constraint("keychain has no id".into()))?;
        self.keychains.insert(id, kc.clone());
        Ok(())
    }

    fn delete_keychain(&mut self, id: Id) -> Result<(), StoreError> {
        self.keychains.remove(&id);
        Ok(())
    }

    fn get_keychain(&self, id: Id) -> Result<Option<Keychain>, StoreError> {
        Ok(self.keychains.get(&id).cloned())
    }

    fn get_keychain_by_name(&self, name: &str) -> Result<Option<Keychain>, StoreError> {
        Ok(self.keychains.values().find(|k| k.name == name).cloned())
    }

    fn get_keychain_by_hash(&self, hash: &EntityHash) -> Result<Option<Keychain>, StoreError> {
        Ok(self.keychains.values().find(|k| &k.hash == hash).cloned())
    }

    fn all_keychains(&self) -> Result<Vec<Keychain>, StoreError> {
        Ok(self.keychains.values().cloned().collect())
    }

    fn insert_key(&mut self, key: &Key) -> Result<Id, StoreError> {
        let id = self.next();
        let mut key = key.clone();
        key.id = Some(id);
        self.keys.insert(id, key);
        Ok(id)
    }

    fn update_key(&mut self, key: &Key) -> Result<(), StoreError> {
        let id = key.id.ok_or_else(|| StoreError::Constraint("key has no id".into()))?;
        self.keys.insert(id, key.clone());
        Ok(())
    }

    fn keys_for_root(&self, root_keychain_id: Id) -> Result<Vec<Key>, StoreError> {
        Ok(self
            .keys
            .values()
            .filter(|k| k.root_keychain_id == root_keychain_id)
            .cloned()
            .collect())
    }

    fn insert_account(&mut self, account: &Account) -> Result<Id, StoreError> {
        if self.accounts.values().any(|a| a.name == account.name) {
            return Err(StoreError::Constraint(format!("duplicate account name {}", account.name)));
        }
        let id = self.next();
        let mut account = account.clone();
        account.id = Some(id);
        self.accounts.insert(id, account);
        Ok(id)
    }

    fn update_account(&mut self, account: &Account) -> Result<(), StoreError> {
        let id = account.id.ok_or_else(|| StoreError::Constraint("account has no id".into()))?;
        self.accounts.insert(id, account.clone());
        Ok(())
    }

    fn get_account(&self, id: Id) -> Result<Option<Account>, StoreError> {
        Ok(self.accounts.get(&id).cloned())
    }

    fn get_account_by_name(&self, name: &str) -> Result<Option<Account>, StoreError> {
        Ok(self.accounts.values().find(|a| a.name == name).cloned())
    }

    fn get_account_by_hash(&self, hash: &EntityHash) -> Result<Option<Account>, StoreError> {
        Ok(self.accounts.values().find(|a| &a.hash == hash).cloned())
    }

    fn all_accounts(&self) -> Result<Vec<Account>, StoreError> {
        Ok(self.accounts.values().cloned().collect())
    }

    fn insert_bin(&mut self, bin: &AccountBin) -> Result<Id, StoreError> {
        let id = self.next();
        let mut bin = bin.clone();
        bin.id = Some(id);
        self.bins.insert(id, bin);
        Ok(id)
    }

    fn update_bin(&mut self, bin: &AccountBin) -> Result<(), StoreError> {
        let id = bin.id.ok_or_else(|| StoreError::Constraint("bin has no id".into()))?;
        self.bins.insert(id, bin.clone());
        Ok(())
    }

    fn get_bin(&self, id: Id) -> Result<Option<AccountBin>, StoreError> {
        Ok(self.bins.get(&id).cloned())
    }

    fn get_bin_by_name(&self, account_id: Id, name: &str) -> Result<Option<AccountBin>, StoreError> {
        Ok(self
            .bins
            .values()
            .find(|b| b.account_id == account_id && b.name == name)
            .cloned())
    }

    fn bins_for_account(&self, account_id: Id) -> Result<Vec<AccountBin>, StoreError> {
        Ok(self.bins.values().filter(|b| b.account_id == account_id).cloned().collect())
    }

    fn insert_signing_script(&mut self, script: &SigningScript) -> Result<Id, StoreError> {
        let id = self.next();
        let mut script = script.clone();
        script.id = Some(id);
        self.scripts.insert(id, script);
        Ok(id)
    }

    fn update_signing_script(&mut self, script: &SigningScript) -> Result<(), StoreError> {
        let id = script.id.ok_or_else(|| StoreError::Constraint("script has no id".into()))?;
        self.scripts.insert(id, script.clone());
        Ok(())
    }

    fn get_signing_script(&self, id: Id) -> Result<Option<SigningScript>, StoreError> {
        Ok(self.scripts.get(&id).cloned())
    }

    fn get_signing_script_by_bin_index(&self, bin_id: Id, index: u32) -> Result<Option<SigningScript>, StoreError> {
        Ok(self
            .scripts
            .values()
            .find(|s| s.bin_id == bin_id && s.index == index)
            .cloned())
    }

    fn get_signing_script_by_txoutscript(&self, txoutscript: &[u8]) -> Result<Option<SigningScript>, StoreError> {
        Ok(self.scripts.values().find(|s| s.txoutscript == txoutscript).cloned())
    }

    fn scripts_for_bin(&self, bin_id: Id) -> Result<Vec<SigningScript>, StoreError> {
        Ok(self.scripts.values().filter(|s| s.bin_id == bin_id).cloned().collect())
    }

    fn insert_tx(&mut self, tx: &Tx) -> Result<Id, StoreError> {
        if self.txs.values().any(|t| t.unsigned_hash == tx.unsigned_hash) {
            return Err(StoreError::Constraint("duplicate unsigned_hash".into()));
        }
        let id = self.next();
        let mut tx = tx.clone();
        tx.id = Some(id);
        self.txs.insert(id, tx);
        Ok(id)
    }

    fn update_tx(&mut self, tx: &Tx) -> Result<(), StoreError> {
        let id = tx.id.ok_or_else(|| StoreError::Constraint("tx has no id".into()))?;
        self.txs.insert(id, tx.clone());
        Ok(())
    }

    fn delete_tx(&mut self, id: Id) -> Result<(), StoreError> {
        self.txs.remove(&id);
        self.txins.retain(|_, t| t.tx_id != id);
        self.txouts.retain(|_, t| t.tx_id != id);
        Ok(())
    }

    fn get_tx(&self, id: Id) -> Result<Option<Tx>, StoreError> {
        Ok(self.txs.get(&id).cloned())
    }

    fn get_tx_by_unsigned_hash(&self, hash: &[u8; 32]) -> Result<Option<Tx>, StoreError> {
        Ok(self.txs.values().find(|t| &t.unsigned_hash == hash).cloned())
    }

    fn get_tx_by_signed_hash(&self, hash: &[u8; 32]) -> Result<Option<Tx>, StoreError> {
        Ok(self.txs.values().find(|t| &t.signed_hash == hash).cloned())
    }

    fn txs_at_or_above_height(&self, height: u32) -> Result<Vec<Tx>, StoreError> {
        let at_or_above: Vec<Id> = self
            .headers
            .values()
            .filter(|h| h.height >= height)
            .filter_map(|h| h.id)
            .collect();
        Ok(self
            .txs
            .values()
            .filter(|t| t.block_header_id.map(|id| at_or_above.contains(&id)).unwrap_or(false))
            .cloned()
            .collect())
    }

    fn all_txs(&self) -> Result<Vec<Tx>, StoreError> {
        Ok(self.txs.values().cloned().collect())
    }

    fn insert_txin(&mut self, txin: &TxIn) -> Result<Id, StoreError> {
        let id = self.next();
        let mut txin = txin.clone();
        txin.id = Some(id);
        self.txins.insert(id, txin);
        Ok(id)
    }

    fn update_txin(&mut self, txin: &TxIn) -> Result<(), StoreError> {
        let id = txin.id.ok_or_else(|| StoreError::Constraint("txin has no id".into()))?;
        self.txins.insert(id, txin.clone());
        Ok(())
    }

    fn txins_for_tx(&self, tx_id: Id) -> Result<Vec<TxIn>, StoreError> {
        let mut v: Vec<TxIn> = self.txins.values().filter(|t| t.tx_id == tx_id).cloned().collect();
        v.sort_by_key(|t| t.tx_index);
        Ok(v)
    }

    fn txins_spending(&self, outpoint_txout_id: Id) -> Result<Vec<TxIn>, StoreError> {
        Ok(self
            .txins
            .values()
            .filter(|t| t.outpoint_txout_id == Some(outpoint_txout_id))
            .cloned()
            .collect())
    }

    fn txins_awaiting_outpoint(&self, outpoint_hash: &[u8; 32], outpoint_index: u32) -> Result<Vec<TxIn>, StoreError> {
        Ok(self
            .txins
            .values()
            .filter(|t| &t.outpoint_hash == outpoint_hash && t.outpoint_index == outpoint_index && t.outpoint_txout_id.is_none())
            .cloned()
            .collect())
    }

    fn insert_txout(&mut self, txout: &TxOut) -> Result<Id, StoreError> {
        let id = self.next();
        let mut txout = txout.clone();
        txout.id = Some(id);
        self.txouts.insert(id, txout);
        Ok(id)
    }

    fn update_txout(&mut self, txout: &TxOut) -> Result<(), StoreError> {
        let id = txout.id.ok_or_else(|| StoreError::Constraint("txout has no id".into()))?;
        self.txouts.insert(id, txout.clone());
        Ok(())
    }

    fn txouts_for_tx(&self, tx_id: Id) -> Result<Vec<TxOut>, StoreError> {
        let mut v: Vec<TxOut> = self.txouts.values().filter(|t| t.tx_id == tx_id).cloned().collect();
        v.sort_by_key(|t| t.tx_index);
        Ok(v)
    }

    fn find_txout_by_outpoint(&self, outpoint_hash: &[u8; 32], outpoint_index: u32) -> Result<Option<(Id, TxOut)>, StoreError> {
        let tx = self.txs.values().find(|t| &t.unsigned_hash == outpoint_hash || &t.signed_hash == outpoint_hash);
        let Some(tx) = tx else { return Ok(None) };
        let Some(tx_id) = tx.id else { return Ok(None) };
        Ok(self
            .txouts
            .iter()
            .find(|(_, t)| t.tx_id == tx_id && t.tx_index == outpoint_index)
            .map(|(id, t)| (*id, t.clone())))
    }

    fn unspent_txouts_for_account(&self, account_id: Id) -> Result<Vec<(Id, TxOut)>, StoreError> {
        Ok(self
            .txouts
            .iter()
            .filter(|(_, t)| t.receiving_account_id == Some(account_id) && t.status == TxOutStatus::Unspent)
            .map(|(id, t)| (*id, t.clone()))
            .collect())
    }

    fn unspent_txouts_sent_by_account(&self, account_id: Id) -> Result<Vec<(Id, TxOut)>, StoreError> {
        Ok(self
            .txouts
            .iter()
            .filter(|(_, t)| t.sending_account_id == Some(account_id) && t.status == TxOutStatus::Unspent)
            .map(|(id, t)| (*id, t.clone()))
            .collect())
    }

    fn insert_block_header(&mut self, header: &BlockHeader) -> Result<Id, StoreError> {
        if self.headers.values().any(|h| h.height == header.height) {
            return Err(StoreError::Constraint(format!("duplicate header height {}", header.height)));
        }
        let id = self.next();
        let mut header = header.clone();
        header.id = Some(id);
        self.headers.insert(id, header);
        Ok(id)
    }

    fn delete_block_header(&mut self, id: Id) -> Result<(), StoreError> {
        self.headers.remove(&id);
        Ok(())
    }

    fn get_block_header_by_height(&self, height: u32) -> Result<Option<BlockHeader>, StoreError> {
        Ok(self.headers.values().find(|h| h.height == height).cloned())
    }

    fn get_block_header_by_hash(&self, hash: &[u8; 32]) -> Result<Option<BlockHeader>, StoreError> {
        Ok(self.headers.values().find(|h| &h.hash == hash).cloned())
    }

    fn best_block_header(&self) -> Result<Option<BlockHeader>, StoreError> {
        Ok(self.headers.values().max_by_key(|h| h.height).cloned())
    }

    fn all_block_headers_descending(&self) -> Result<Vec<BlockHeader>, StoreError> {
        let mut v: Vec<BlockHeader> = self.headers.values().cloned().collect();
        v.sort_by_key(|h| std::cmp::Reverse(h.height));
        Ok(v)
    }

    fn insert_merkle_block(&mut self, mb: &MerkleBlock) -> Result<Id, StoreError> {
        let id = self.next();
        let mut mb = mb.clone();
        mb.id = Some(id);
        self.merkle_blocks.insert(id, mb);
        Ok(id)
    }

    fn update_merkle_block(&mut self, mb: &MerkleBlock) -> Result<(), StoreError> {
        let id = mb.id.ok_or_else(|| StoreError::Constraint("merkle block has no id".into()))?;
        self.merkle_blocks.insert(id, mb.clone());
        Ok(())
    }

    fn delete_merkle_block(&mut self, id: Id) -> Result<(), StoreError> {
        self.merkle_blocks.remove(&id);
        Ok(())
    }

    fn get_merkle_block_by_header(&self, block_header_id: Id) -> Result<Option<MerkleBlock>, StoreError> {
        Ok(self
            .merkle_blocks
            .values()
            .find(|mb| mb.block_header_id == block_header_id)
            .cloned())
    }

    fn insert_user(&mut self, user: &User) -> Result<Id, StoreError> {
        if self.users.values().any(|u| u.username == user.username) {
            return Err(StoreError::Constraint(format!("duplicate username {}", user.username)));
        }
        let id = self.next();
        let mut user = user.clone();
        user.id = Some(id);
        self.users.insert(id, user);
        Ok(id)
    }

    fn update_user(&mut self, user: &User) -> Result<(), StoreError> {
        let id = user.id.ok_or_else(|| StoreError::Constraint("user has no id".into()))?;
        self.users.insert(id, user.clone());
        Ok(())
    }

    fn get_user_by_name(&self, username: &str) -> Result<Option<User>, StoreError> {
        Ok(self.users.values().find(|u| u.username == username).cloned())
    }

    fn earliest_account_time_created(&self) -> Result<Option<i64>, StoreError> {
        Ok(self.accounts.values().map(|a| a.time_created).min())
    }

    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.headers.is_empty())
    }
}
