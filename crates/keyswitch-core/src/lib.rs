//! # keyswitch-core
//!
//! Core key registry for keyswitch including:
//! - Quota period rollover and remaining-balance calculation
//! - Pluggable registry storage (atomic owner-only file, in-memory for tests)
//! - Registry manager enforcing the single-active-key and monotonic-id invariants
//! - Versioned snapshots for off-box sync

pub mod error;
pub mod quota;
pub mod registry;
pub mod snapshot;
pub mod storage;

pub use error::{RegistryError, Result};
pub use quota::{period_elapsed, remaining, QuotaPeriod};
pub use registry::{
    merge_registries, FieldUpdate, KeyKind, KeyPatch, KeyRecord, Registry, RegistryManager,
    RemoteSyncSettings, SortMode,
};
pub use snapshot::{snapshot_path, Snapshot, SNAPSHOT_SCHEMA_VERSION};
pub use storage::{FileStorage, MemoryStorage, RegistryStorage};
