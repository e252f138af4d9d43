//! Event/signal surface,
//! grounded directly on `Vault.h`'s `Signals::Signal<...>` typedefs and
//! `SynchedVault.h`'s signal member list: one subscription list per named
//! event, not a single generic pub/sub bus.

use vault_db::model::Id;

use crate::state::SyncState;

/// A single occurrence queued during a mutation, to be dispatched only after
/// the enclosing transaction commits.
#[derive(Debug, Clone)]
pub enum VaultEvent {
    VaultOpened,
    VaultClosed,
    VaultError(String),
    KeychainUnlocked(String),
    KeychainLocked(String),
    StatusChanged(SyncState),
    BestHeaderChanged { height: u32, hash: [u8; 32] },
    SyncHeaderChanged { height: u32, hash: [u8; 32] },
    ConnectionError(String),
    BlockTreeError(String),
    PeerConnected,
    PeerDisconnected,
    TxInserted(Id),
    TxUpdated(Id),
    TxDeleted(Id),
    MerkleBlockInserted { height: u32 },
    TxInsertionError(String),
    MerkleBlockInsertionError(String),
    TxConfirmationError(String),
}

type Slot<A> = Box<dyn Fn(A) + Send>;

/// One `Vec` of closures per named signal. Registration order is
/// dispatch order; nothing deduplicates or removes a subscriber once added,
/// matching the source's append-only signal connections.
#[derive(Default)]
pub struct Subscribers {
    on_vault_opened: Vec<Slot<()>>,
    on_vault_closed: Vec<Slot<()>>,
    on_vault_error: Vec<Slot<String>>,
    on_keychain_unlocked: Vec<Slot<String>>,
    on_keychain_locked: Vec<Slot<String>>,
    on_status_changed: Vec<Slot<SyncState>>,
    on_best_header_changed: Vec<Slot<(u32, [u8; 32])>>,
    on_sync_header_changed: Vec<Slot<(u32, [u8; 32])>>,
    on_connection_error: Vec<Slot<String>>,
    on_block_tree_error: Vec<Slot<String>>,
    on_peer_connected: Vec<Slot<()>>,
    on_peer_disconnected: Vec<Slot<()>>,
    on_tx_inserted: Vec<Slot<Id>>,
    on_tx_updated: Vec<Slot<Id>>,
    on_tx_deleted: Vec<Slot<Id>>,
    on_merkle_block_inserted: Vec<Slot<u32>>,
    on_tx_insertion_error: Vec<Slot<String>>,
    on_merkle_block_insertion_error: Vec<Slot<String>>,
    on_tx_confirmation_error: Vec<Slot<String>>,
}

macro_rules! subscribe_method {
    ($name:ident, $field:ident, $arg:ty) => {
        pub fn $name(&mut self, f: impl Fn($arg) + Send + 'static) {
            self.$field.push(Box::new(f));
        }
    };
}

impl Subscribers {
    subscribe_method!(subscribe_vault_opened, on_vault_opened, ());
    subscribe_method!(subscribe_vault_closed, on_vault_closed, ());
    subscribe_method!(subscribe_vault_error, on_vault_error, String);
    subscribe_method!(subscribe_keychain_unlocked, on_keychain_unlocked, String);
    subscribe_method!(subscribe_keychain_locked, on_keychain_locked, String);
    subscribe_method!(subscribe_status_changed, on_status_changed, SyncState);
    subscribe_method!(subscribe_best_header_changed, on_best_header_changed, (u32, [u8; 32]));
    subscribe_method!(subscribe_sync_header_changed, on_sync_header_changed, (u32, [u8; 32]));
    subscribe_method!(subscribe_connection_error, on_connection_error, String);
    subscribe_method!(subscribe_block_tree_error, on_block_tree_error, String);
    subscribe_method!(subscribe_peer_connected, on_peer_connected, ());
    subscribe_method!(subscribe_peer_disconnected, on_peer_disconnected, ());
    subscribe_method!(subscribe_tx_inserted, on_tx_inserted, Id);
    subscribe_method!(subscribe_tx_updated, on_tx_updated, Id);
    subscribe_method!(subscribe_tx_deleted, on_tx_deleted, Id);
    subscribe_method!(subscribe_merkle_block_inserted, on_merkle_block_inserted, u32);
    subscribe_method!(subscribe_tx_insertion_error, on_tx_insertion_error, String);
    subscribe_method!(subscribe_merkle_block_insertion_error, on_merkle_block_insertion_error, String);
    subscribe_method!(subscribe_tx_confirmation_error, on_tx_confirmation_error, String);

    pub(crate) fn dispatch(&self, event: &VaultEvent) {
        match event {
            VaultEvent::VaultOpened => self.on_vault_opened.iter().for_each(|f| f(())),
            VaultEvent::VaultClosed => self.on_vault_closed.iter().for_each(|f| f(())),
            VaultEvent::VaultError(msg) => self.on_vault_error.iter().for_each(|f| f(msg.clone())),
            VaultEvent::KeychainUnlocked(name) => self.on_keychain_unlocked.iter().for_each(|f| f(name.clone())),
            VaultEvent::KeychainLocked(name) => self.on_keychain_locked.iter().for_each(|f| f(name.clone())),
            VaultEvent::StatusChanged(s) => self.on_status_changed.iter().for_each(|f| f(*s)),
            VaultEvent::BestHeaderChanged { height, hash } => {
                self.on_best_header_changed.iter().for_each(|f| f((*height, *hash)))
            }
            VaultEvent::SyncHeaderChanged { height, hash } => {
                self.on_sync_header_changed.iter().for_each(|f| f((*height, *hash)))
            }
            VaultEvent::ConnectionError(msg) => self.on_connection_error.iter().for_each(|f| f(msg.clone())),
            VaultEvent::BlockTreeError(msg) => self.on_block_tree_error.iter().for_each(|f| f(msg.clone())),
            VaultEvent::PeerConnected => self.on_peer_connected.iter().for_each(|f| f(())),
            VaultEvent::PeerDisconnected => self.on_peer_disconnected.iter().for_each(|f| f(())),
            VaultEvent::TxInserted(id) => self.on_tx_inserted.iter().for_each(|f| f(*id)),
            VaultEvent::TxUpdated(id) => self.on_tx_updated.iter().for_each(|f| f(*id)),
            VaultEvent::TxDeleted(id) => self.on_tx_deleted.iter().for_each(|f| f(*id)),
            VaultEvent::MerkleBlockInserted { height } => self.on_merkle_block_inserted.iter().for_each(|f| f(*height)),
            VaultEvent::TxInsertionError(msg) => self.on_tx_insertion_error.iter().for_each(|f| f(msg.clone())),
            VaultEvent::MerkleBlockInsertionError(msg) => {
                self.on_merkle_block_insertion_error.iter().for_each(|f| f(msg.clone()))
            }
            VaultEvent::TxConfirmationError(msg) => {
                self.on_tx_confirmation_error.iter().for_each(|f| f(msg.clone()))
            }
        }
    }
}

/// Events accumulated during a mutation: queued while the
/// persistence transaction is open, flushed only once it commits, discarded
/// if the mutation fails before commit.
#[derive(Default)]
pub struct SignalQueue {
    queued: Vec<VaultEvent>,
}

impl SignalQueue {
    pub fn push(&mut self, event: VaultEvent) {
        self.queued.push(event);
    }

    pub fn clear(&mut self) {
        self.queued.clear();
    }

    /// Dispatches every queued event in order, then empties the queue.
    pub fn flush(&mut self, subscribers: &Subscribers) {
        for event in self.queued.drain(..) {
            subscribers.dispatch(&event);
        }
    }
}
