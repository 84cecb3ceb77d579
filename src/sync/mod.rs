//! Offline-first synchronization engine.
//!
//! Local edits are captured as [`PendingChange`](crate::model::PendingChange)s
//! in a durable queue and pushed to a [`RemoteDataService`] whenever the
//! device is online:
//!
//! - **Queue**: [`ChangeStore`] persists the ordered queue through
//!   [`DurableStorage`](crate::storage::DurableStorage) before every in-memory update
//! - **Network**: [`NetworkMonitor`] debounces a [`NetworkSource`]
//! - **Scheduler**: one actor task owns the Idle/Syncing/Backoff phases
//! - **Processor**: [`BatchProcessor`] applies batches with per-entity ordering,
//!   retries and conflict resolution
//! - **State**: every transition is published as a [`SyncState`] snapshot
//!
//! # Architecture
//!
//! ```text
//! enqueue ──► ChangeStore ──► depth ──► StateHub ──► listeners
//!                 ▲                        ▲
//! NetworkSource ──► NetworkMonitor ──► Scheduler ──► BatchProcessor ──► Remote
//! ```
//!
//! [`SyncEngine`] wires the pieces together and is the only type most
//! applications need.

mod clock;
mod engine;
mod envelope;
mod http;
mod listener;
mod network;
mod processor;
mod queue;
mod remote;
mod resolver;
mod scheduler;
mod state;
mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{SyncEngine, SyncEngineBuilder};
pub use envelope::{decode, encode, Decoded, QUEUE_KEY, SCHEMA_VERSION};
pub use http::{probe, HttpProbe, HttpRemote};
pub use listener::{ListenerSet, Observer, Subscription};
pub use network::{ManualNetwork, NetworkMonitor, NetworkSource};
pub use processor::BatchProcessor;
pub use queue::ChangeStore;
pub use remote::{RemoteDataService, RemoteError};
pub use resolver::{merge_records, ConflictResolver, ConflictStrategy, ManualResolveFn, ResolveError};
pub use state::StateHub;
pub use types::{
    ChangeError, Connectivity, FailureReason, Phase, RecentError, SyncError, SyncOutcome,
    SyncResult, SyncState,
};
