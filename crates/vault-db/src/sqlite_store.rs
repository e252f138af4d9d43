//! The production `Store` backing, via `rusqlite`. Schema migrations follow the
//! versioned, idempotent-`ALTER`-check style this codebase already uses for its
//! on-disk databases: a base schema created with `CREATE TABLE IF NOT EXISTS`,
//! then sequential `migrate_vNN` passes that check before altering.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{StoreError, VaultError, VaultLifecycleError};
use crate::model::*;
use crate::store::Store;

/// The earliest schema version this build can still read. A store
/// older than this is rejected outright rather than migrated.
const BASE_SCHEMA_VERSION: u32 = 1;
/// The schema version this build writes. Equal to the base today — there is
/// only one schema generation so far — but kept distinct so a future
/// `migrate_v2` has somewhere to raise it.
const SCHEMA_VERSION: u32 = 1;

pub struct SqliteStore {
    conn: Connection,
}

fn to_blob(h: &[u8]) -> Vec<u8> {
    h.to_vec()
}

fn hash32(bytes: &[u8]) -> Result<[u8; 32], StoreError> {
    bytes
        .try_into()
        .map_err(|_| StoreError::Serialization("expected 32-byte hash".into()))
}

fn hash20(bytes: &[u8]) -> Result<[u8; 20], StoreError> {
    bytes
        .try_into()
        .map_err(|_| StoreError::Serialization("expected 20-byte hash".into()))
}

fn json_err(e: serde_json::Error) -> StoreError {
    StoreError::Serialization(e.to_string())
}

impl SqliteStore {
    /// Opens (creating if absent) with no network qualifier and migrations
    /// disabled — equivalent to `open_with_lifecycle(path, None, false)`.
    pub fn open(path: &Path) -> Result<Self, VaultError> {
        Self::open_with_lifecycle(path, None, false)
    }

    /// Opens the database at `path`, enforcing the schema-version and
    /// network-qualifier rules: a stored version below
    /// [`BASE_SCHEMA_VERSION`] or above [`SCHEMA_VERSION`] is rejected; a
    /// stored version between the two only proceeds if `migrate` is set.
    /// `network` (e.g. `"bitcoin"`, `"testnet"`) is recorded on first open
    /// and checked against on every subsequent one.
    pub fn open_with_lifecycle(path: &Path, network: Option<&str>, migrate: bool) -> Result<Self, VaultError> {
        let conn = Connection::open(path).map_err(|e| VaultLifecycleError::FailedToOpenDatabase(e.to_string()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| VaultLifecycleError::FailedToOpenDatabase(e.to_string()))?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| VaultLifecycleError::FailedToOpenDatabase(e.to_string()))?;
        let store = Self { conn };
        store.create_schema_if_missing()?;
        store.check_lifecycle(network, migrate)?;
        Ok(store)
    }

    /// In-memory stores are always freshly created, so there is nothing to
    /// version-check or migrate.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Io(e.to_string()))?;
        let store = Self { conn };
        store.create_schema_if_missing()?;
        store.init_schema_version_if_missing()?;
        Ok(store)
    }

    /// Checks the `schema_version`/`network` rows against `network` and
    /// `migrate`, inserting them on a brand-new database.
    fn check_lifecycle(&self, network: Option<&str>, migrate: bool) -> Result<(), VaultError> {
        let stored: Option<u32> = self
            .conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |r| r.get(0))
            .optional()
            .map_err(|e| StoreError::Io(e.to_string()))?;

        match stored {
            None => {
                self.conn
                    .execute("INSERT INTO schema_version (version) VALUES (?1)", params![SCHEMA_VERSION])
                    .map_err(|e| StoreError::Io(e.to_string()))?;
            }
            Some(v) if v < BASE_SCHEMA_VERSION => {
                return Err(VaultLifecycleError::WrongSchemaVersion { stored: v, expected: BASE_SCHEMA_VERSION }.into());
            }
            Some(v) if v > SCHEMA_VERSION => {
                return Err(VaultLifecycleError::WrongSchemaVersion { stored: v, expected: SCHEMA_VERSION }.into());
            }
            Some(v) if v < SCHEMA_VERSION && !migrate => {
                return Err(VaultLifecycleError::NeedsSchemaMigration { stored: v, current: SCHEMA_VERSION }.into());
            }
            Some(_) => {} // at the current version, or migrate=true with nothing yet to run
        }

        let stored_network: Option<String> = self
            .conn
            .query_row("SELECT name FROM network LIMIT 1", [], |r| r.get(0))
            .optional()
            .map_err(|e| StoreError::Io(e.to_string()))?;

        match (stored_network, network) {
            (Some(stored), Some(requested)) if stored != requested => {
                return Err(VaultLifecycleError::WrongNetwork { stored, requested: requested.to_string() }.into());
            }
            (None, Some(requested)) => {
                self.conn
                    .execute("INSERT INTO network (name) VALUES (?1)", params![requested])
                    .map_err(|e| StoreError::Io(e.to_string()))?;
            }
            _ => {}
        }

        Ok(())
    }

    fn init_schema_version_if_missing(&self) -> Result<(), StoreError> {
        let stored: Option<u32> = self
            .conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |r| r.get(0))
            .optional()
            .map_err(|e| StoreError::Io(e.to_string()))?;
        if stored.is_none() {
            self.conn
                .execute("INSERT INTO schema_version (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(|e| StoreError::Io(e.to_string()))?;
        }
        Ok(())
    }

    fn create_schema_if_missing(&self) -> Result<(), StoreError> {
        self.conn
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);

            CREATE TABLE IF NOT EXISTS keychains (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                hash BLOB NOT NULL UNIQUE,
                depth INTEGER NOT NULL,
                parent_fingerprint BLOB NOT NULL,
                child_num INTEGER NOT NULL,
                chain_code BLOB NOT NULL,
                pubkey BLOB NOT NULL,
                privkey_ciphertext BLOB NOT NULL,
                privkey_salt INTEGER NOT NULL,
                seed_ciphertext BLOB NOT NULL,
                seed_salt INTEGER NOT NULL,
                has_seed INTEGER NOT NULL,
                derivation_path TEXT NOT NULL,
                parent_id INTEGER,
                hidden INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS keys (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                root_keychain_id INTEGER NOT NULL,
                derivation_path TEXT NOT NULL,
                idx INTEGER NOT NULL,
                pubkey BLOB NOT NULL,
                is_private INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                hash BLOB NOT NULL UNIQUE,
                minsigs INTEGER NOT NULL,
                keychain_ids TEXT NOT NULL,
                unused_pool_size INTEGER NOT NULL,
                compressed_keys INTEGER NOT NULL,
                pattern TEXT NOT NULL,
                time_created INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS account_bins (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                idx INTEGER NOT NULL,
                hash BLOB NOT NULL,
                next_script_index INTEGER NOT NULL,
                script_count INTEGER NOT NULL,
                labels TEXT NOT NULL,
                imported_keychain_ids TEXT
            );

            CREATE TABLE IF NOT EXISTS signing_scripts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                bin_id INTEGER NOT NULL REFERENCES account_bins(id) ON DELETE CASCADE,
                idx INTEGER NOT NULL,
                label TEXT NOT NULL,
                status TEXT NOT NULL,
                redeem_script BLOB NOT NULL,
                txinscript_template BLOB NOT NULL,
                txoutscript BLOB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS txs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                version INTEGER NOT NULL,
                locktime INTEGER NOT NULL,
                timestamp INTEGER NOT NULL,
                status TEXT NOT NULL,
                conflicting INTEGER NOT NULL,
                unsigned_hash BLOB NOT NULL UNIQUE,
                signed_hash BLOB NOT NULL,
                block_header_id INTEGER,
                block_index INTEGER,
                total_in INTEGER NOT NULL,
                total_out INTEGER NOT NULL,
                user_id INTEGER
            );

            CREATE TABLE IF NOT EXISTS txins (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tx_id INTEGER NOT NULL REFERENCES txs(id) ON DELETE CASCADE,
                tx_index INTEGER NOT NULL,
                outpoint_hash BLOB NOT NULL,
                outpoint_index INTEGER NOT NULL,
                script BLOB NOT NULL,
                witness TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                outpoint_txout_id INTEGER
            );

            CREATE TABLE IF NOT EXISTS txouts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tx_id INTEGER NOT NULL REFERENCES txs(id) ON DELETE CASCADE,
                tx_index INTEGER NOT NULL,
                value INTEGER NOT NULL,
                script BLOB NOT NULL,
                status TEXT NOT NULL,
                spent_by_txin_id INTEGER,
                sending_account_id INTEGER,
                receiving_account_id INTEGER,
                receiving_bin_id INTEGER,
                receiving_signingscript_id INTEGER,
                sending_label TEXT NOT NULL,
                receiving_label TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS block_headers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                height INTEGER NOT NULL UNIQUE,
                hash BLOB NOT NULL UNIQUE,
                prev_hash BLOB NOT NULL,
                merkle_root BLOB NOT NULL,
                timestamp INTEGER NOT NULL,
                bits INTEGER NOT NULL,
                nonce INTEGER NOT NULL,
                version INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS merkle_blocks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                block_header_id INTEGER NOT NULL REFERENCES block_headers(id) ON DELETE CASCADE,
                tx_count INTEGER NOT NULL,
                hashes TEXT NOT NULL,
                flags BLOB NOT NULL,
                txsinserted INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                txoutscript_whitelist TEXT,
                enabled INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS network (
                name TEXT NOT NULL
            );
            ",
            )
            .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(())
    }
}

fn pattern_to_str(p: RedeemScriptPattern) -> &'static str {
    match p {
        RedeemScriptPattern::P2sh => "p2sh",
        RedeemScriptPattern::P2wsh => "p2wsh",
        RedeemScriptPattern::P2shP2wsh => "p2sh_p2wsh",
    }
}

fn pattern_from_str(s: &str) -> Result<RedeemScriptPattern, StoreError> {
    match s {
        "p2sh" => Ok(RedeemScriptPattern::P2sh),
        "p2wsh" => Ok(RedeemScriptPattern::P2wsh),
        "p2sh_p2wsh" => Ok(RedeemScriptPattern::P2shP2wsh),
        other => Err(StoreError::Serialization(format!("unknown pattern {other}"))),
    }
}

fn status_to_str(s: SigningScriptStatus) -> &'static str {
    match s {
        SigningScriptStatus::Unused => "unused",
        SigningScriptStatus::Issued => "issued",
        SigningScriptStatus::Change => "change",
        SigningScriptStatus::Used => "used",
    }
}

fn status_from_str(s: &str) -> Result<SigningScriptStatus, StoreError> {
    match s {
        "unused" => Ok(SigningScriptStatus::Unused),
        "issued" => Ok(SigningScriptStatus::Issued),
        "change" => Ok(SigningScriptStatus::Change),
        "used" => Ok(SigningScriptStatus::Used),
        other => Err(StoreError::Serialization(format!("unknown script status {other}"))),
    }
}

fn tx_status_to_str(s: TxStatus) -> &'static str {
    match s {
        TxStatus::NoStatus => "no_status",
        TxStatus::Unsigned => "unsigned",
        TxStatus::Unsent => "unsent",
        TxStatus::Sent => "sent",
        TxStatus::Propagated => "propagated",
        TxStatus::Canceled => "canceled",
        TxStatus::Confirmed => "confirmed",
    }
}

fn tx_status_from_str(s: &str) -> Result<TxStatus, StoreError> {
    Ok(match s {
        "no_status" => TxStatus::NoStatus,
        "unsigned" => TxStatus::Unsigned,
        "unsent" => TxStatus::Unsent,
        "sent" => TxStatus::Sent,
        "propagated" => TxStatus::Propagated,
        "canceled" => TxStatus::Canceled,
        "confirmed" => TxStatus::Confirmed,
        other => return Err(StoreError::Serialization(format!("unknown tx status {other}"))),
    })
}

fn txout_status_to_str(s: TxOutStatus) -> &'static str {
    match s {
        TxOutStatus::Unspent => "unspent",
        TxOutStatus::Spent => "spent",
    }
}

fn txout_status_from_str(s: &str) -> Result<TxOutStatus, StoreError> {
    Ok(match s {
        "unspent" => TxOutStatus::Unspent,
        "spent" => TxOutStatus::Spent,
        other => return Err(StoreError::Serialization(format!("unknown txout status {other}"))),
    })
}

impl Store for SqliteStore {
    fn begin(&mut self) -> Result<(), StoreError> {
        self.conn.execute_batch("BEGIN").map_err(|e| StoreError::Io(e.to_string()))
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.conn.execute_batch("COMMIT").map_err(|e| StoreError::Io(e.to_string()))
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        self.conn.execute_batch("ROLLBACK").map_err(|e| StoreError::Io(e.to_string()))
    }

    fn insert_keychain(&mut self, kc: &Keychain) -> Result<Id, StoreError> {
        let path_json = serde_json::to_string(&kc.derivation_path).map_err(json_err)?;
        self.conn
            .execute(
                "INSERT INTO keychains (name, hash, depth, parent_fingerprint, child_num, chain_code, pubkey,
                    privkey_ciphertext, privkey_salt, seed_ciphertext, seed_salt, has_seed, derivation_path, parent_id, hidden)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)",
                params![
                    kc.name,
                    to_blob(&kc.hash),
                    kc.depth,
                    to_blob(&kc.parent_fingerprint),
                    kc.child_num,
                    to_blob(&kc.chain_code),
                    to_blob(&kc.pubkey),
                    kc.privkey_ciphertext,
                    kc.privkey_salt as i64,
                    kc.seed_ciphertext,
                    kc.seed_salt as i64,
                    kc.has_seed,
                    path_json,
                    kc.parent_id.map(|v| v as i64),
                    kc.hidden,
                ],
            )
            .map_err(sqlite_to_store_err)?;
        Ok(self.conn.last_insert_rowid() as Id)
    }

    fn update_keychain(&mut self, kc: &Keychain) -> Result<(), StoreError> {
        let id = kc.id.ok_or_else(|| StoreError::Constraint("keychain has no id".into()))?;
        self.conn
            .execute(
                "UPDATE keychains SET name=?1, privkey_ciphertext=?2, privkey_salt=?3,
                    seed_ciphertext=?4, seed_salt=?5, has_seed=?6, hidden=?7 WHERE id=?8",
                params![
                    kc.name,
                    kc.privkey_ciphertext,
                    kc.privkey_salt as i64,
                    kc.seed_ciphertext,
                    kc.seed_salt as i64,
                    kc.has_seed,
                    kc.hidden,
                    id as i64,
                ],
            )
            .map_err(sqlite_to_store_err)?;
        Ok(())
    }

    fn delete_keychain(&mut self, id: Id) -> Result<(), StoreError> {
        self.conn
            .execute("DELETE FROM keychains WHERE id=?1", params![id as i64])
            .map_err(sqlite_to_store_err)?;
        Ok(())
    }

    fn get_keychain(&self, id: Id) -> Result<Option<Keychain>, StoreError> {
        self.conn
            .query_row("SELECT * FROM keychains WHERE id=?1", params![id as i64], row_to_keychain)
            .optional()
            .map_err(sqlite_to_store_err)
    }

    fn get_keychain_by_name(&self, name: &str) -> Result<Option<Keychain>, StoreError> {
        self.conn
            .query_row("SELECT * FROM keychains WHERE name=?1", params![name], row_to_keychain)
            .optional()
            .map_err(sqlite_to_store_err)
    }

    fn get_keychain_by_hash(&self, hash: &EntityHash) -> Result<Option<Keychain>, StoreError> {
        self.conn
            .query_row("SELECT * FROM keychains WHERE hash=?1", params![to_blob(hash)], row_to_keychain)
            .optional()
            .map_err(sqlite_to_store_err)
    }

    fn all_keychains(&self) -> Result<Vec<Keychain>, StoreError> {
        let mut stmt = self.conn.prepare("SELECT * FROM keychains").map_err(sqlite_to_store_err)?;
        let rows = stmt
            .query_map([], row_to_keychain)
            .map_err(sqlite_to_store_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(sqlite_to_store_err)
    }

    fn insert_key(&mut self, key: &Key) -> Result<Id, StoreError> {
        let path_json = serde_json::to_string(&key.derivation_path).map_err(json_err)?;
        self.conn
            .execute(
                "INSERT INTO keys (root_keychain_id, derivation_path, idx, pubkey, is_private) VALUES (?1,?2,?3,?4,?5)",
                params![key.root_keychain_id as i64, path_json, key.index, to_blob(&key.pubkey), key.is_private],
            )
            .map_err(sqlite_to_store_err)?;
        Ok(self.conn.last_insert_rowid() as Id)
    }

    fn update_key(&mut self, key: &Key) -> Result<(), StoreError> {
        let id = key.id.ok_or_else(|| StoreError::Constraint("key has no id".into()))?;
        self.conn
            .execute("UPDATE keys SET is_private=?1 WHERE id=?2", params![key.is_private, id as i64])
            .map_err(sqlite_to_store_err)?;
        Ok(())
    }

    fn keys_for_root(&self, root_keychain_id: Id) -> Result<Vec<Key>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM keys WHERE root_keychain_id=?1")
            .map_err(sqlite_to_store_err)?;
        let rows = stmt
            .query_map(params![root_keychain_id as i64], row_to_key)
            .map_err(sqlite_to_store_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(sqlite_to_store_err)
    }

    fn insert_account(&mut self, account: &Account) -> Result<Id, StoreError> {
        let ids_json = serde_json::to_string(&account.keychain_ids).map_err(json_err)?;
        self.conn
            .execute(
                "INSERT INTO accounts (name, hash, minsigs, keychain_ids, unused_pool_size, compressed_keys, pattern, time_created)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
                params![
                    account.name,
                    to_blob(&account.hash),
                    account.minsigs,
                    ids_json,
                    account.unused_pool_size,
                    account.compressed_keys,
                    pattern_to_str(account.pattern),
                    account.time_created,
                ],
            )
            .map_err(sqlite_to_store_err)?;
        Ok(self.conn.last_insert_rowid() as Id)
    }

    fn update_account(&mut self, account: &Account) -> Result<(), StoreError> {
        let id = account.id.ok_or_else(|| StoreError::Constraint("account has no id".into()))?;
        self.conn
            .execute(
                "UPDATE accounts SET unused_pool_size=?1, compressed_keys=?2 WHERE id=?3",
                params![account.unused_pool_size, account.compressed_keys, id as i64],
            )
            .map_err(sqlite_to_store_err)?;
        Ok(())
    }

    fn get_account(&self, id: Id) -> Result<Option<Account>, StoreError> {
        self.conn
            .query_row("SELECT * FROM accounts WHERE id=?1", params![id as i64], row_to_account)
            .optional()
            .map_err(sqlite_to_store_err)
    }

    fn get_account_by_name(&self, name: &str) -> Result<Option<Account>, StoreError> {
        self.conn
            .query_row("SELECT * FROM accounts WHERE name=?1", params![name], row_to_account)
            .optional()
            .map_err(sqlite_to_store_err)
    }

    fn get_account_by_hash(&self, hash: &EntityHash) -> Result<Option<Account>, StoreError> {
        self.conn
            .query_row("SELECT * FROM accounts WHERE hash=?1", params![to_blob(hash)], row_to_account)
            .optional()
            .map_err(sqlite_to_store_err)
    }

    fn all_accounts(&self) -> Result<Vec<Account>, StoreError> {
        let mut stmt = self.conn.prepare("SELECT * FROM accounts").map_err(sqlite_to_store_err)?;
        let rows = stmt.query_map([], row_to_account).map_err(sqlite_to_store_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(sqlite_to_store_err)
    }

    fn insert_bin(&mut self, bin: &AccountBin) -> Result<Id, StoreError> {
        let labels_json = serde_json::to_string(&bin.labels).map_err(json_err)?;
        let imported_json = bin
            .imported_keychain_ids
            .as_ref()
            .map(|v| serde_json::to_string(v))
            .transpose()
            .map_err(json_err)?;
        self.conn
            .execute(
                "INSERT INTO account_bins (account_id, name, idx, hash, next_script_index, script_count, labels, imported_keychain_ids)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
                params![
                    bin.account_id as i64,
                    bin.name,
                    bin.index,
                    to_blob(&bin.hash),
                    bin.next_script_index,
                    bin.script_count,
                    labels_json,
                    imported_json,
                ],
            )
            .map_err(sqlite_to_store_err)?;
        Ok(self.conn.last_insert_rowid() as Id)
    }

    fn update_bin(&mut self, bin: &AccountBin) -> Result<(), StoreError> {
        let id = bin.id.ok_or_else(|| StoreError::Constraint("bin has no id".into()))?;
        let labels_json = serde_json::to_string(&bin.labels).map_err(json_err)?;
        self.conn
            .execute(
                "UPDATE account_bins SET next_script_index=?1, script_count=?2, labels=?3 WHERE id=?4",
                params![bin.next_script_index, bin.script_count, labels_json, id as i64],
            )
            .map_err(sqlite_to_store_err)?;
        Ok(())
    }

    fn get_bin(&self, id: Id) -> Result<Option<AccountBin>, StoreError> {
        self.conn
            .query_row("SELECT * FROM account_bins WHERE id=?1", params![id as i64], row_to_bin)
            .optional()
            .map_err(sqlite_to_store_err)
    }

    fn get_bin_by_name(&self, account_id: Id, name: &str) -> Result<Option<AccountBin>, StoreError> {
        self.conn
            .query_row(
                "SELECT * FROM account_bins WHERE account_id=?1 AND name=?2",
                params![account_id as i64, name],
                row_to_bin,
            )
            .optional()
            .map_err(sqlite_to_store_err)
    }

    fn bins_for_account(&self, account_id: Id) -> Result<Vec<AccountBin>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM account_bins WHERE account_id=?1")
            .map_err(sqlite_to_store_err)?;
        let rows = stmt.query_map(params![account_id as i64], row_to_bin).map_err(sqlite_to_store_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(sqlite_to_store_err)
    }

    fn insert_signing_script(&mut self, script: &SigningScript) -> Result<Id, StoreError> {
        self.conn
            .execute(
                "INSERT INTO signing_scripts (bin_id, idx, label, status, redeem_script, txinscript_template, txoutscript)
                 VALUES (?1,?2,?3,?4,?5,?6,?7)",
                params![
                    script.bin_id as i64,
                    script.index,
                    script.label,
                    status_to_str(script.status),
                    script.redeem_script,
                    script.txinscript_template,
                    script.txoutscript,
                ],
            )
            .map_err(sqlite_to_store_err)?;
        Ok(self.conn.last_insert_rowid() as Id)
    }

    fn update_signing_script(&mut self, script: &SigningScript) -> Result<(), StoreError> {
        let id = script.id.ok_or_else(|| StoreError::Constraint("script has no id".into()))?;
        self.conn
            .execute(
                "UPDATE signing_scripts SET label=?1, status=?2, txinscript_template=?3 WHERE id=?4",
                params![script.label, status_to_str(script.status), script.txinscript_template, id as i64],
            )
            .map_err(sqlite_to_store_err)?;
        Ok(())
    }

    fn get_signing_script(&self, id: Id) -> Result<Option<SigningScript>, StoreError> {
        self.conn
            .query_row("SELECT * FROM signing_scripts WHERE id=?1", params![id as i64], row_to_script)
            .optional()
            .map_err(sqlite_to_store_err)
    }

    fn get_signing_script_by_bin_index(&self, bin_id: Id, index: u32) -> Result<Option<SigningScript>, StoreError> {
        self.conn
            .query_row(
                "SELECT * FROM signing_scripts WHERE bin_id=?1 AND idx=?2",
                params![bin_id as i64, index],
                row_to_script,
            )
            .optional()
            .map_err(sqlite_to_store_err)
    }

    fn get_signing_script_by_txoutscript(&self, txoutscript: &[u8]) -> Result<Option<SigningScript>, StoreError> {
        self.conn
            .query_row(
                "SELECT * FROM signing_scripts WHERE txoutscript=?1",
                params![txoutscript],
                row_to_script,
            )
            .optional()
            .map_err(sqlite_to_store_err)
    }

    fn scripts_for_bin(&self, bin_id: Id) -> Result<Vec<SigningScript>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM signing_scripts WHERE bin_id=?1")
            .map_err(sqlite_to_store_err)?;
        let rows = stmt.query_map(params![bin_id as i64], row_to_script).map_err(sqlite_to_store_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(sqlite_to_store_err)
    }

    fn insert_tx(&mut self, tx: &Tx) -> Result<Id, StoreError> {
        self.conn
            .execute(
                "INSERT INTO txs (version, locktime, timestamp, status, conflicting, unsigned_hash, signed_hash,
                    block_header_id, block_index, total_in, total_out, user_id)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)",
                params![
                    tx.version,
                    tx.locktime,
                    tx.timestamp,
                    tx_status_to_str(tx.status),
                    tx.conflicting,
                    to_blob(&tx.unsigned_hash),
                    to_blob(&tx.signed_hash),
                    tx.block_header_id.map(|v| v as i64),
                    tx.block_index,
                    tx.total_in as i64,
                    tx.total_out as i64,
                    tx.user_id.map(|v| v as i64),
                ],
            )
            .map_err(sqlite_to_store_err)?;
        Ok(self.conn.last_insert_rowid() as Id)
    }

    fn update_tx(&mut self, tx: &Tx) -> Result<(), StoreError> {
        let id = tx.id.ok_or_else(|| StoreError::Constraint("tx has no id".into()))?;
        self.conn
            .execute(
                "UPDATE txs SET status=?1, conflicting=?2, signed_hash=?3, block_header_id=?4, block_index=?5,
                    total_in=?6, total_out=?7 WHERE id=?8",
                params![
                    tx_status_to_str(tx.status),
                    tx.conflicting,
                    to_blob(&tx.signed_hash),
                    tx.block_header_id.map(|v| v as i64),
                    tx.block_index,
                    tx.total_in as i64,
                    tx.total_out as i64,
                    id as i64,
                ],
            )
            .map_err(sqlite_to_store_err)?;
        Ok(())
    }

    fn delete_tx(&mut self, id: Id) -> Result<(), StoreError> {
        self.conn.execute("DELETE FROM txs WHERE id=?1", params![id as i64]).map_err(sqlite_to_store_err)?;
        Ok(())
    }

    fn get_tx(&self, id: Id) -> Result<Option<Tx>, StoreError> {
        self.conn
            .query_row("SELECT * FROM txs WHERE id=?1", params![id as i64], row_to_tx)
            .optional()
            .map_err(sqlite_to_store_err)
    }

    fn get_tx_by_unsigned_hash(&self, hash: &[u8; 32]) -> Result<Option<Tx>, StoreError> {
        self.conn
            .query_row("SELECT * FROM txs WHERE unsigned_hash=?1", params![to_blob(hash)], row_to_tx)
            .optional()
            .map_err(sqlite_to_store_err)
    }

    fn get_tx_by_signed_hash(&self, hash: &[u8; 32]) -> Result<Option<Tx>, StoreError> {
        self.conn
            .query_row("SELECT * FROM txs WHERE signed_hash=?1", params![to_blob(hash)], row_to_tx)
            .optional()
            .map_err(sqlite_to_store_err)
    }

    fn txs_at_or_above_height(&self, height: u32) -> Result<Vec<Tx>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT t.* FROM txs t JOIN block_headers b ON t.block_header_id = b.id WHERE b.height >= ?1",
            )
            .map_err(sqlite_to_store_err)?;
        let rows = stmt.query_map(params![height], row_to_tx).map_err(sqlite_to_store_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(sqlite_to_store_err)
    }

    fn all_txs(&self) -> Result<Vec<Tx>, StoreError> {
        let mut stmt = self.conn.prepare("SELECT * FROM txs").map_err(sqlite_to_store_err)?;
        let rows = stmt.query_map([], row_to_tx).map_err(sqlite_to_store_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(sqlite_to_store_err)
    }

    fn insert_txin(&mut self, txin: &TxIn) -> Result<Id, StoreError> {
        let witness_json = serde_json::to_string(&txin.witness).map_err(json_err)?;
        self.conn
            .execute(
                "INSERT INTO txins (tx_id, tx_index, outpoint_hash, outpoint_index, script, witness, sequence, outpoint_txout_id)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
                params![
                    txin.tx_id as i64,
                    txin.tx_index,
                    to_blob(&txin.outpoint_hash),
                    txin.outpoint_index,
                    txin.script,
                    witness_json,
                    txin.sequence,
                    txin.outpoint_txout_id.map(|v| v as i64),
                ],
            )
            .map_err(sqlite_to_store_err)?;
        Ok(self.conn.last_insert_rowid() as Id)
    }

    fn update_txin(&mut self, txin: &TxIn) -> Result<(), StoreError> {
        let id = txin.id.ok_or_else(|| StoreError::Constraint("txin has no id".into()))?;
        let witness_json = serde_json::to_string(&txin.witness).map_err(json_err)?;
        self.conn
            .execute(
                "UPDATE txins SET script=?1, witness=?2, outpoint_txout_id=?3 WHERE id=?4",
                params![txin.script, witness_json, txin.outpoint_txout_id.map(|v| v as i64), id as i64],
            )
            .map_err(sqlite_to_store_err)?;
        Ok(())
    }

    fn txins_for_tx(&self, tx_id: Id) -> Result<Vec<TxIn>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM txins WHERE tx_id=?1 ORDER BY tx_index")
            .map_err(sqlite_to_store_err)?;
        let rows = stmt.query_map(params![tx_id as i64], row_to_txin).map_err(sqlite_to_store_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(sqlite_to_store_err)
    }

    fn txins_spending(&self, outpoint_txout_id: Id) -> Result<Vec<TxIn>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM txins WHERE outpoint_txout_id=?1")
            .map_err(sqlite_to_store_err)?;
        let rows = stmt
            .query_map(params![outpoint_txout_id as i64], row_to_txin)
            .map_err(sqlite_to_store_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(sqlite_to_store_err)
    }

    fn txins_awaiting_outpoint(&self, outpoint_hash: &[u8; 32], outpoint_index: u32) -> Result<Vec<TxIn>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM txins WHERE outpoint_hash=?1 AND outpoint_index=?2 AND outpoint_txout_id IS NULL")
            .map_err(sqlite_to_store_err)?;
        let rows = stmt
            .query_map(params![to_blob(outpoint_hash), outpoint_index], row_to_txin)
            .map_err(sqlite_to_store_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(sqlite_to_store_err)
    }

    fn insert_txout(&mut self, txout: &TxOut) -> Result<Id, StoreError> {
        self.conn
            .execute(
                "INSERT INTO txouts (tx_id, tx_index, value, script, status, spent_by_txin_id, sending_account_id,
                    receiving_account_id, receiving_bin_id, receiving_signingscript_id, sending_label, receiving_label)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)",
                params![
                    txout.tx_id as i64,
                    txout.tx_index,
                    txout.value as i64,
                    txout.script,
                    txout_status_to_str(txout.status),
                    txout.spent_by_txin_id.map(|v| v as i64),
                    txout.sending_account_id.map(|v| v as i64),
                    txout.receiving_account_id.map(|v| v as i64),
                    txout.receiving_bin_id.map(|v| v as i64),
                    txout.receiving_signingscript_id.map(|v| v as i64),
                    txout.sending_label,
                    txout.receiving_label,
                ],
            )
            .map_err(sqlite_to_store_err)?;
        Ok(self.conn.last_insert_rowid() as Id)
    }

    fn update_txout(&mut self, txout: &TxOut) -> Result<(), StoreError> {
        let id = txout.id.ok_or_else(|| StoreError::Constraint("txout has no id".into()))?;
        self.conn
            .execute(
                "UPDATE txouts SET status=?1, spent_by_txin_id=?2, receiving_label=?3 WHERE id=?4",
                params![
                    txout_status_to_str(txout.status),
                    txout.spent_by_txin_id.map(|v| v as i64),
                    txout.receiving_label,
                    id as i64,
                ],
            )
            .map_err(sqlite_to_store_err)?;
        Ok(())
    }

    fn txouts_for_tx(&self, tx_id: Id) -> Result<Vec<TxOut>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM txouts WHERE tx_id=?1 ORDER BY tx_index")
            .map_err(sqlite_to_store_err)?;
        let rows = stmt.query_map(params![tx_id as i64], row_to_txout).map_err(sqlite_to_store_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(sqlite_to_store_err)
    }

    fn find_txout_by_outpoint(&self, outpoint_hash: &[u8; 32], outpoint_index: u32) -> Result<Option<(Id, TxOut)>, StoreError> {
        let row: Option<(i64, TxOut)> = self
            .conn
            .query_row(
                "SELECT o.* FROM txouts o JOIN txs t ON o.tx_id = t.id
                 WHERE (t.unsigned_hash=?1 OR t.signed_hash=?1) AND o.tx_index=?2",
                params![to_blob(outpoint_hash), outpoint_index],
                |row| Ok((row.get::<_, i64>(0)?, row_to_txout(row)?)),
            )
            .optional()
            .map_err(sqlite_to_store_err)?;
        Ok(row.map(|(id, t)| (id as Id, t)))
    }

    fn unspent_txouts_for_account(&self, account_id: Id) -> Result<Vec<(Id, TxOut)>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM txouts WHERE receiving_account_id=?1 AND status='unspent'")
            .map_err(sqlite_to_store_err)?;
        let rows = stmt
            .query_map(params![account_id as i64], |row| Ok((row.get::<_, i64>(0)? as Id, row_to_txout(row)?)))
            .map_err(sqlite_to_store_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(sqlite_to_store_err)
    }

    fn unspent_txouts_sent_by_account(&self, account_id: Id) -> Result<Vec<(Id, TxOut)>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM txouts WHERE sending_account_id=?1 AND status='unspent'")
            .map_err(sqlite_to_store_err)?;
        let rows = stmt
            .query_map(params![account_id as i64], |row| Ok((row.get::<_, i64>(0)? as Id, row_to_txout(row)?)))
            .map_err(sqlite_to_store_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(sqlite_to_store_err)
    }

    fn insert_block_header(&mut self, header: &BlockHeader) -> Result<Id, StoreError> {
        self.conn
            .execute(
                "INSERT INTO block_headers (height, hash, prev_hash, merkle_root, timestamp, bits, nonce, version)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
                params![
                    header.height,
                    to_blob(&header.hash),
                    to_blob(&header.prev_hash),
                    to_blob(&header.merkle_root),
                    header.timestamp,
                    header.bits,
                    header.nonce,
                    header.version,
                ],
            )
            .map_err(sqlite_to_store_err)?;
        Ok(self.conn.last_insert_rowid() as Id)
    }

    fn delete_block_header(&mut self, id: Id) -> Result<(), StoreError> {
        self.conn
            .execute("DELETE FROM block_headers WHERE id=?1", params![id as i64])
            .map_err(sqlite_to_store_err)?;
        Ok(())
    }

    fn get_block_header_by_height(&self, height: u32) -> Result<Option<BlockHeader>, StoreError> {
        self.conn
            .query_row("SELECT * FROM block_headers WHERE height=?1", params![height], row_to_header)
            .optional()
            .map_err(sqlite_to_store_err)
    }

    fn get_block_header_by_hash(&self, hash: &[u8; 32]) -> Result<Option<BlockHeader>, StoreError> {
        self.conn
            .query_row("SELECT * FROM block_headers WHERE hash=?1", params![to_blob(hash)], row_to_header)
            .optional()
            .map_err(sqlite_to_store_err)
    }

    fn best_block_header(&self) -> Result<Option<BlockHeader>, StoreError> {
        self.conn
            .query_row(
                "SELECT * FROM block_headers ORDER BY height DESC LIMIT 1",
                [],
                row_to_header,
            )
            .optional()
            .map_err(sqlite_to_store_err)
    }

    fn all_block_headers_descending(&self) -> Result<Vec<BlockHeader>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM block_headers ORDER BY height DESC")
            .map_err(sqlite_to_store_err)?;
        let rows = stmt.query_map([], row_to_header).map_err(sqlite_to_store_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(sqlite_to_store_err)
    }

    fn insert_merkle_block(&mut self, mb: &MerkleBlock) -> Result<Id, StoreError> {
        let hashes_json = serde_json::to_string(&mb.hashes).map_err(json_err)?;
        self.conn
            .execute(
                "INSERT INTO merkle_blocks (block_header_id, tx_count, hashes, flags, txsinserted) VALUES (?1,?2,?3,?4,?5)",
                params![mb.block_header_id as i64, mb.tx_count, hashes_json, mb.flags, mb.txsinserted],
            )
            .map_err(sqlite_to_store_err)?;
        Ok(self.conn.last_insert_rowid() as Id)
    }

    fn update_merkle_block(&mut self, mb: &MerkleBlock) -> Result<(), StoreError> {
        let id = mb.id.ok_or_else(|| StoreError::Constraint("merkle block has no id".into()))?;
        self.conn
            .execute("UPDATE merkle_blocks SET txsinserted=?1 WHERE id=?2", params![mb.txsinserted, id as i64])
            .map_err(sqlite_to_store_err)?;
        Ok(())
    }

    fn delete_merkle_block(&mut self, id: Id) -> Result<(), StoreError> {
        self.conn
            .execute("DELETE FROM merkle_blocks WHERE id=?1", params![id as i64])
            .map_err(sqlite_to_store_err)?;
        Ok(())
    }

    fn get_merkle_block_by_header(&self, block_header_id: Id) -> Result<Option<MerkleBlock>, StoreError> {
        self.conn
            .query_row(
                "SELECT * FROM merkle_blocks WHERE block_header_id=?1",
                params![block_header_id as i64],
                row_to_merkle_block,
            )
            .optional()
            .map_err(sqlite_to_store_err)
    }

    fn insert_user(&mut self, user: &User) -> Result<Id, StoreError> {
        let whitelist_json = user
            .txoutscript_whitelist
            .as_ref()
            .map(|v| serde_json::to_string(v))
            .transpose()
            .map_err(json_err)?;
        self.conn
            .execute(
                "INSERT INTO users (username, txoutscript_whitelist, enabled) VALUES (?1,?2,?3)",
                params![user.username, whitelist_json, user.enabled],
            )
            .map_err(sqlite_to_store_err)?;
        Ok(self.conn.last_insert_rowid() as Id)
    }

    fn update_user(&mut self, user: &User) -> Result<(), StoreError> {
        let id = user.id.ok_or_else(|| StoreError::Constraint("user has no id".into()))?;
        self.conn
            .execute("UPDATE users SET enabled=?1 WHERE id=?2", params![user.enabled, id as i64])
            .map_err(sqlite_to_store_err)?;
        Ok(())
    }

    fn get_user_by_name(&self, username: &str) -> Result<Option<User>, StoreError> {
        self.conn
            .query_row("SELECT * FROM users WHERE username=?1", params![username], row_to_user)
            .optional()
            .map_err(sqlite_to_store_err)
    }

    fn earliest_account_time_created(&self) -> Result<Option<i64>, StoreError> {
        self.conn
            .query_row("SELECT MIN(time_created) FROM accounts", [], |r| r.get(0))
            .map_err(sqlite_to_store_err)
    }

    fn is_empty(&self) -> Result<bool, StoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM block_headers", [], |r| r.get(0))
            .map_err(sqlite_to_store_err)?;
        Ok(count == 0)
    }
}

fn sqlite_to_store_err(e: rusqlite::Error) -> StoreError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StoreError::Constraint(e.to_string())
        }
        _ => StoreError::Io(e.to_string()),
    }
}

fn row_to_keychain(row: &rusqlite::Row) -> rusqlite::Result<Keychain> {
    let path_json: String = row.get("derivation_path")?;
    let hash: Vec<u8> = row.get("hash")?;
    let parent_fp: Vec<u8> = row.get("parent_fingerprint")?;
    let chain_code: Vec<u8> = row.get("chain_code")?;
    let pubkey: Vec<u8> = row.get("pubkey")?;
    Ok(Keychain {
        id: Some(row.get::<_, i64>("id")? as Id),
        name: row.get("name")?,
        hash: hash20(&hash).unwrap_or([0; 20]),
        depth: row.get("depth")?,
        parent_fingerprint: parent_fp.try_into().unwrap_or([0; 4]),
        child_num: row.get("child_num")?,
        chain_code: chain_code.try_into().unwrap_or([0; 32]),
        pubkey: pubkey.try_into().unwrap_or([0; 33]),
        privkey_ciphertext: row.get("privkey_ciphertext")?,
        privkey_salt: row.get::<_, i64>("privkey_salt")? as u64,
        seed_ciphertext: row.get("seed_ciphertext")?,
        seed_salt: row.get::<_, i64>("seed_salt")? as u64,
        has_seed: row.get("has_seed")?,
        derivation_path: serde_json::from_str(&path_json).unwrap_or_default(),
        parent_id: row.get::<_, Option<i64>>("parent_id")?.map(|v| v as Id),
        hidden: row.get("hidden")?,
    })
}

fn row_to_key(row: &rusqlite::Row) -> rusqlite::Result<Key> {
    let path_json: String = row.get("derivation_path")?;
    let pubkey: Vec<u8> = row.get("pubkey")?;
    Ok(Key {
        id: Some(row.get::<_, i64>("id")? as Id),
        root_keychain_id: row.get::<_, i64>("root_keychain_id")? as Id,
        derivation_path: serde_json::from_str(&path_json).unwrap_or_default(),
        index: row.get("idx")?,
        pubkey: pubkey.try_into().unwrap_or([0; 33]),
        is_private: row.get("is_private")?,
    })
}

fn row_to_account(row: &rusqlite::Row) -> rusqlite::Result<Account> {
    let ids_json: String = row.get("keychain_ids")?;
    let hash: Vec<u8> = row.get("hash")?;
    let pattern_str: String = row.get("pattern")?;
    Ok(Account {
        id: Some(row.get::<_, i64>("id")? as Id),
        name: row.get("name")?,
        hash: hash20(&hash).unwrap_or([0; 20]),
        minsigs: row.get("minsigs")?,
        keychain_ids: serde_json::from_str(&ids_json).unwrap_or_default(),
        unused_pool_size: row.get("unused_pool_size")?,
        compressed_keys: row.get("compressed_keys")?,
        pattern: pattern_from_str(&pattern_str).unwrap_or(RedeemScriptPattern::P2sh),
        time_created: row.get("time_created")?,
    })
}

fn row_to_bin(row: &rusqlite::Row) -> rusqlite::Result<AccountBin> {
    let labels_json: String = row.get("labels")?;
    let imported_json: Option<String> = row.get("imported_keychain_ids")?;
    let hash: Vec<u8> = row.get("hash")?;
    Ok(AccountBin {
        id: Some(row.get::<_, i64>("id")? as Id),
        account_id: row.get::<_, i64>("account_id")? as Id,
        name: row.get("name")?,
        index: row.get("idx")?,
        hash: hash20(&hash).unwrap_or([0; 20]),
        next_script_index: row.get("next_script_index")?,
        script_count: row.get("script_count")?,
        labels: serde_json::from_str(&labels_json).unwrap_or_default(),
        imported_keychain_ids: imported_json.and_then(|s| serde_json::from_str(&s).ok()),
    })
}

fn row_to_script(row: &rusqlite::Row) -> rusqlite::Result<SigningScript> {
    let status_str: String = row.get("status")?;
    Ok(SigningScript {
        id: Some(row.get::<_, i64>("id")? as Id),
        bin_id: row.get::<_, i64>("bin_id")? as Id,
        index: row.get("idx")?,
        label: row.get("label")?,
        status: status_from_str(&status_str).unwrap_or(SigningScriptStatus::Unused),
        redeem_script: row.get("redeem_script")?,
        txinscript_template: row.get("txinscript_template")?,
        txoutscript: row.get("txoutscript")?,
    })
}

fn row_to_tx(row: &rusqlite::Row) -> rusqlite::Result<Tx> {
    let status_str: String = row.get("status")?;
    let unsigned: Vec<u8> = row.get("unsigned_hash")?;
    let signed: Vec<u8> = row.get("signed_hash")?;
    Ok(Tx {
        id: Some(row.get::<_, i64>("id")? as Id),
        version: row.get("version")?,
        locktime: row.get("locktime")?,
        timestamp: row.get("timestamp")?,
        status: tx_status_from_str(&status_str).unwrap_or(TxStatus::NoStatus),
        conflicting: row.get("conflicting")?,
        unsigned_hash: hash32(&unsigned).unwrap_or([0; 32]),
        signed_hash: hash32(&signed).unwrap_or([0; 32]),
        block_header_id: row.get::<_, Option<i64>>("block_header_id")?.map(|v| v as Id),
        block_index: row.get("block_index")?,
        total_in: row.get::<_, i64>("total_in")? as u64,
        total_out: row.get::<_, i64>("total_out")? as u64,
        user_id: row.get::<_, Option<i64>>("user_id")?.map(|v| v as Id),
    })
}

fn row_to_txin(row: &rusqlite::Row) -> rusqlite::Result<TxIn> {
    let witness_json: String = row.get("witness")?;
    let outpoint_hash: Vec<u8> = row.get("outpoint_hash")?;
    Ok(TxIn {
        id: Some(row.get::<_, i64>("id")? as Id),
        tx_id: row.get::<_, i64>("tx_id")? as Id,
        tx_index: row.get("tx_index")?,
        outpoint_hash: hash32(&outpoint_hash).unwrap_or([0; 32]),
        outpoint_index: row.get("outpoint_index")?,
        script: row.get("script")?,
        witness: serde_json::from_str(&witness_json).unwrap_or_default(),
        sequence: row.get("sequence")?,
        outpoint_txout_id: row.get::<_, Option<i64>>("outpoint_txout_id")?.map(|v| v as Id),
    })
}

fn row_to_txout(row: &rusqlite::Row) -> rusqlite::Result<TxOut> {
    let status_str: String = row.get("status")?;
    Ok(TxOut {
        id: Some(row.get::<_, i64>("id")? as Id),
        tx_id: row.get::<_, i64>("tx_id")? as Id,
        tx_index: row.get("tx_index")?,
        value: row.get::<_, i64>("value")? as u64,
        script: row.get("script")?,
        status: txout_status_from_str(&status_str).unwrap_or(TxOutStatus::Unspent),
        spent_by_txin_id: row.get::<_, Option<i64>>("spent_by_txin_id")?.map(|v| v as Id),
        sending_account_id: row.get::<_, Option<i64>>("sending_account_id")?.map(|v| v as Id),
        receiving_account_id: row.get::<_, Option<i64>>("receiving_account_id")?.map(|v| v as Id),
        receiving_bin_id: row.get::<_, Option<i64>>("receiving_bin_id")?.map(|v| v as Id),
        receiving_signingscript_id: row.get::<_, Option<i64>>("receiving_signingscript_id")?.map(|v| v as Id),
        sending_label: row.get("sending_label")?,
        receiving_label: row.get("receiving_label")?,
    })
}

fn row_to_header(row: &rusqlite::Row) -> rusqlite::Result<BlockHeader> {
    let hash: Vec<u8> = row.get("hash")?;
    let prev_hash: Vec<u8> = row.get("prev_hash")?;
    let merkle_root: Vec<u8> = row.get("merkle_root")?;
    Ok(BlockHeader {
        id: Some(row.get::<_, i64>("id")? as Id),
        height: row.get("height")?,
        hash: hash32(&hash).unwrap_or([0; 32]),
        prev_hash: hash32(&prev_hash).unwrap_or([0; 32]),
        merkle_root: hash32(&merkle_root).unwrap_or([0; 32]),
        timestamp: row.get("timestamp")?,
        bits: row.get("bits")?,
        nonce: row.get("nonce")?,
        version: row.get("version")?,
    })
}

fn row_to_merkle_block(row: &rusqlite::Row) -> rusqlite::Result<MerkleBlock> {
    let hashes_json: String = row.get("hashes")?;
    let hashes: Vec<Vec<u8>> = serde_json::from_str(&hashes_json).unwrap_or_default();
    Ok(MerkleBlock {
        id: Some(row.get::<_, i64>("id")? as Id),
        block_header_id: row.get::<_, i64>("block_header_id")? as Id,
        tx_count: row.get("tx_count")?,
        hashes: hashes.into_iter().filter_map(|h| hash32(&h).ok()).collect(),
        flags: row.get("flags")?,
        txsinserted: row.get("txsinserted")?,
    })
}

fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
    let whitelist_json: Option<String> = row.get("txoutscript_whitelist")?;
    Ok(User {
        id: Some(row.get::<_, i64>("id")? as Id),
        username: row.get("username")?,
        txoutscript_whitelist: whitelist_json.and_then(|s| serde_json::from_str(&s).ok()),
        enabled: row.get("enabled")?,
    })
}
