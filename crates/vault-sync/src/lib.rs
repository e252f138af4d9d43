//! The sync coordinator: network client abstraction, the signal
//! queue and per-event subscription surface, and the state machine that
//! drives the vault's header/block ingestion against a live network peer.

pub mod coordinator;
pub mod electrum;
pub mod error;
pub mod event;
pub mod network;
pub mod state;

pub use coordinator::{SyncCoordinator, VaultState};
pub use error::SyncError;
pub use event::{SignalQueue, Subscribers, VaultEvent};
pub use network::NetworkClient;
pub use state::SyncState;
