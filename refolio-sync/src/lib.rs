//! Synchronization engine for refolio
//!
//! This crate provides the reconciliation engine that mirrors remote
//! libraries into a local store:
//! - Remote snapshot ingestion and tree building
//! - Change detection between local contents and the remote tree
//! - Operation planning with a fixed structural phase order
//! - Batched asynchronous application against the store
//! - Three-way payload merging that preserves local annotations
//! - Progress tracking, cancellation, and single-flight locking
//! - Durable per-library sync state

pub mod diff;
pub mod errors;
pub mod executor;
pub mod hydrate;
pub mod lock;
pub mod merge;
pub mod orchestrator;
pub mod planner;
pub mod progress;
pub mod shadow;
pub mod source;
pub mod state;
pub mod store;

pub use diff::{ChangeDetector, ChangeSet, DeletedNode, DiffStats, MovedNode, UpdatedNode};
pub use errors::{Result, SyncError};
pub use executor::{unfiled_key, ApplyReport, StructuralExecutor, TouchedNode};
pub use hydrate::{HydrateReport, Hydrator};
pub use lock::{CancelFlag, SyncGuard, SyncLock};
pub use merge::{merge, merge_entries};
pub use orchestrator::{LibraryReport, SyncConfig, SyncOrchestrator};
pub use planner::{plan, PlannedOp};
pub use progress::{ProgressReporter, SyncPhase};
pub use shadow::{ShadowSnapshot, ShadowStore};
pub use source::{
    ingest, CollectionRecord, IngestWarning, ItemRecord, RemoteSource, StaticRemote,
};
pub use state::{AsyncStateDatabase, LibraryState};
pub use store::{Handle, LocalStore, MemoryStore, StoredNode};
