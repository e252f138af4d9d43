//! The sync coordinator's state machine, grounded on
//! `SynchedVault.h`'s `status_t` enum.

/// `STOPPED → STARTING → SYNCHING_HEADERS → SYNCHING_BLOCKS → SYNCHED`, with
/// a transition back to `STOPPED` on disconnect and to `SYNCHING_HEADERS` on
/// any block-tree change (new best chain, reorg).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Stopped,
    Starting,
    SynchingHeaders,
    SynchingBlocks,
    Synched,
}
