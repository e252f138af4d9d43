//! The persistence trait.
//!
//! `Store` captures the session/transaction/query shape the vault core relies
//! on: load-by-id, query-by-field, persist, update, erase, and an atomic
//! `begin`/`commit`/`rollback` bracket around each public vault operation. Both
//! [`crate::memory_store::InMemoryStore`] and [`crate::sqlite_store::SqliteStore`]
//! implement it, so the vault core above this crate is store-agnostic.

use crate::error::StoreError;
use crate::model::*;

pub trait Store: Send {
    fn begin(&mut self) -> Result<(), StoreError>;
    fn commit(&mut self) -> Result<(), StoreError>;
    fn rollback(&mut self) -> Result<(), StoreError>;

    fn insert_keychain(&mut self, kc: &Keychain) -> Result<Id, StoreError>;
    fn update_keychain(&mut self, kc: &Keychain) -> Result<(), StoreError>;
    fn delete_keychain(&mut self, id: Id) -> Result<(), StoreError>;
    fn get_keychain(&self, id: Id) -> Result<Option<Keychain>, StoreError>;
    fn get_keychain_by_name(&self, name: &str) -> Result<Option<Keychain>, StoreError>;
    fn get_keychain_by_hash(&self, hash: &EntityHash) -> Result<Option<Keychain>, StoreError>;
    fn all_keychains(&self) -> Result<Vec<Keychain>, StoreError>;

    fn insert_key(&mut self, key: &Key) -> Result<Id, StoreError>;
    fn update_key(&mut self, key: &Key) -> Result<(), StoreError>;
    fn keys_for_root(&self, root_keychain_id: Id) -> Result<Vec<Key>, StoreError>;

    fn insert_account(&mut self, account: &Account) -> Result<Id, StoreError>;
    fn update_account(&mut self, account: &Account) -> Result<(), StoreError>;
    fn get_account(&self, id: Id) -> Result<Option<Account>, StoreError>;
    fn get_account_by_name(&self, name: &str) -> Result<Option<Account>, StoreError>;
    fn get_account_by_hash(&self, hash: &EntityHash) -> Result<Option<Account>, StoreError>;
    fn all_accounts(&self) -> Result<Vec<Account>, StoreError>;

    fn insert_bin(&mut self, bin: &AccountBin) -> Result<Id, StoreError>;
    fn update_bin(&mut self, bin: &AccountBin) -> Result<(), StoreError>;
    fn get_bin(&self, id: Id) -> Result<Option<AccountBin>, StoreError>;
    fn get_bin_by_name(&self, account_id: Id, name: &str) -> Result<Option<AccountBin>, StoreError>;
    fn bins_for_account(&self, account_id: Id) -> Result<Vec<AccountBin>, StoreError>;

    fn insert_signing_script(&mut self, script: &SigningScript) -> Result<Id, StoreError>;
    fn update_signing_script(&mut self, script: &SigningScript) -> Result<(), StoreError>;
    fn get_signing_script(&self, id: Id) -> Result<Option<SigningScript>, StoreError>;
    fn get_signing_script_by_bin_index(&self, bin_id: Id, index: u32) -> Result<Option<SigningScript>, StoreError>;
    fn get_signing_script_by_txoutscript(&self, txoutscript: &[u8]) -> Result<Option<SigningScript>, StoreError>;
    fn scripts_for_bin(&self, bin_id: Id) -> Result<Vec<SigningScript>, StoreError>;

    fn insert_tx(&mut self, tx: &Tx) -> Result<Id, StoreError>;
    fn update_tx(&mut self, tx: &Tx) -> Result<(), StoreError>;
    fn delete_tx(&mut self, id: Id) -> Result<(), StoreError>;
    fn get_tx(&self, id: Id) -> Result<Option<Tx>, StoreError>;
    fn get_tx_by_unsigned_hash(&self, hash: &[u8; 32]) -> Result<Option<Tx>, StoreError>;
    fn get_tx_by_signed_hash(&self, hash: &[u8; 32]) -> Result<Option<Tx>, StoreError>;
    fn txs_at_or_above_height(&self, height: u32) -> Result<Vec<Tx>, StoreError>;
    fn all_txs(&self) -> Result<Vec<Tx>, StoreError>;

    fn insert_txin(&mut self, txin: &TxIn) -> Result<Id, StoreError>;
    fn update_txin(&mut self, txin: &TxIn) -> Result<(), StoreError>;
    fn txins_for_tx(&self, tx_id: Id) -> Result<Vec<TxIn>, StoreError>;
    fn txins_spending(&self, outpoint_txout_id: Id) -> Result<Vec<TxIn>, StoreError>;
    /// TxIns already stored whose outpoint names `(outpoint_hash, outpoint_index)`
    /// but that arrived before the outpoint's own transaction, so
    /// `outpoint_txout_id` is still unresolved. Lets a just-inserted TxOut
    /// connect back to a spend that was seen first.
    fn txins_awaiting_outpoint(&self, outpoint_hash: &[u8; 32], outpoint_index: u32) -> Result<Vec<TxIn>, StoreError>;

    fn insert_txout(&mut self, txout: &TxOut) -> Result<Id, StoreError>;
    fn update_txout(&mut self, txout: &TxOut) -> Result<(), StoreError>;
    fn txouts_for_tx(&self, tx_id: Id) -> Result<Vec<TxOut>, StoreError>;
    fn find_txout_by_outpoint(&self, outpoint_hash: &[u8; 32], outpoint_index: u32) -> Result<Option<(Id, TxOut)>, StoreError>;
    fn unspent_txouts_for_account(&self, account_id: Id) -> Result<Vec<(Id, TxOut)>, StoreError>;
    /// Unspent outputs this account *sent* (paid out) that are still unspent
    /// from the network's perspective — used to build bloom filter outpoint
    /// elements so the vault notices when a payment it sent is spent onward.
    fn unspent_txouts_sent_by_account(&self, account_id: Id) -> Result<Vec<(Id, TxOut)>, StoreError>;

    fn insert_block_header(&mut self, header: &BlockHeader) -> Result<Id, StoreError>;
    fn delete_block_header(&mut self, id: Id) -> Result<(), StoreError>;
    fn get_block_header_by_height(&self, height: u32) -> Result<Option<BlockHeader>, StoreError>;
    fn get_block_header_by_hash(&self, hash: &[u8; 32]) -> Result<Option<BlockHeader>, StoreError>;
    fn best_block_header(&self) -> Result<Option<BlockHeader>, StoreError>;
    fn all_block_headers_descending(&self) -> Result<Vec<BlockHeader>, StoreError>;

    fn insert_merkle_block(&mut self, mb: &MerkleBlock) -> Result<Id, StoreError>;
    fn update_merkle_block(&mut self, mb: &MerkleBlock) -> Result<(), StoreError>;
    fn delete_merkle_block(&mut self, id: Id) -> Result<(), StoreError>;
    fn get_merkle_block_by_header(&self, block_header_id: Id) -> Result<Option<MerkleBlock>, StoreError>;

    fn insert_user(&mut self, user: &User) -> Result<Id, StoreError>;
    fn update_user(&mut self, user: &User) -> Result<(), StoreError>;
    fn get_user_by_name(&self, username: &str) -> Result<Option<User>, StoreError>;

    /// Earliest `time_created` across all accounts, used to compute the sync horizon.
    fn earliest_account_time_created(&self) -> Result<Option<i64>, StoreError>;

    fn is_empty(&self) -> Result<bool, StoreError>;
}
