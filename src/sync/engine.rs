//! The sync engine: composition root and application-facing API.
//!
//! # Example
//!
//! ```no_run
//! # async fn demo() -> Result<(), pantry_sync::sync::SyncError> {
//! use std::sync::Arc;
//! use pantry_sync::model::{NewChange, Product};
//! use pantry_sync::storage::MemoryStorage;
//! use pantry_sync::sync::{Connectivity, HttpRemote, ManualNetwork, SyncEngine};
//!
//! let network = Arc::new(ManualNetwork::new(Connectivity::Online));
//! let remote = HttpRemote::new("https://api.example.com", None, std::time::Duration::from_secs(15));
//! let engine = SyncEngine::builder(Arc::new(MemoryStorage::new()), network).start(remote)?;
//!
//! engine.enqueue(NewChange::create(Product::new("p1", "Milk", chrono::Utc::now())))?;
//! let outcome = engine.force_sync().await?;
//! println!("{}", outcome.label());
//! # Ok(())
//! # }
//! ```

use super::clock::{Clock, SystemClock};
use super::listener::{Observer, Subscription};
use super::network::{NetworkMonitor, NetworkSource};
use super::processor::BatchProcessor;
use super::queue::ChangeStore;
use super::remote::RemoteDataService;
use super::resolver::ConflictResolver;
use super::scheduler::{Scheduler, Trigger};
use super::state::StateHub;
use super::types::{Connectivity, SyncError, SyncOutcome, SyncResult, SyncState};
use crate::config::{SyncConfig, SyncConfigPatch};
use crate::model::{EntityKind, EntityRecord, NewChange, PendingChange};
use crate::storage::DurableStorage;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Configures and starts a [`SyncEngine`].
pub struct SyncEngineBuilder {
    storage: Arc<dyn DurableStorage>,
    network: Arc<dyn NetworkSource>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    resolver: ConflictResolver,
    origin_user: String,
    origin_device: String,
}

impl SyncEngineBuilder {
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Register the resolver used by the `Manual` strategy for `kind`.
    #[must_use]
    pub fn manual_resolver<F>(mut self, kind: EntityKind, resolve: F) -> Self
    where
        F: Fn(&EntityRecord, &EntityRecord) -> Result<EntityRecord, String> + Send + Sync + 'static,
    {
        self.resolver = self.resolver.with_manual(kind, resolve);
        self
    }

    /// User and device stamped onto every enqueued change.
    #[must_use]
    pub fn origin(mut self, user: impl Into<String>, device: impl Into<String>) -> Self {
        self.origin_user = user.into();
        self.origin_device = device.into();
        self
    }

    /// Load the queue and start the scheduler on the current Tokio runtime.
    ///
    /// If the network is online and changes are pending, a cycle starts
    /// immediately.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] for unusable settings,
    /// [`SyncError::NoRuntime`] outside a runtime, and a persistence error
    /// if the stored queue cannot be loaded.
    pub fn start<R: RemoteDataService>(self, remote: R) -> Result<SyncEngine, SyncError> {
        self.config.validate().map_err(SyncError::InvalidConfig)?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| SyncError::NoRuntime)?;

        let store = Arc::new(ChangeStore::open(self.storage)?);
        let (config_tx, config_rx) = watch::channel(self.config);
        let monitor = NetworkMonitor::start(&self.network, config_rx.clone());
        let connectivity = monitor.current_status();

        let hub = Arc::new(StateHub::new(SyncState::new(connectivity, store.len())));
        let depth_hub = Arc::clone(&hub);
        store.set_depth_observer(move |depth| depth_hub.update(|s| s.queue_depth = depth));

        let (tx, rx) = mpsc::unbounded_channel();
        let network_tx = tx.clone();
        let monitor_subscription = monitor.subscribe(move |status: &Connectivity| {
            let _ = network_tx.send(Trigger::Connectivity(*status));
        });

        let processor = Arc::new(BatchProcessor::new(
            Arc::clone(&store),
            Arc::new(remote),
            Arc::new(self.resolver),
        ));
        let scheduler = Scheduler::new(
            processor,
            Arc::clone(&store),
            Arc::clone(&hub),
            Arc::clone(&self.clock),
            config_rx,
            tx.clone(),
            rx,
            connectivity,
        );
        let actor = runtime.spawn(scheduler.run());

        info!(
            pending = store.len(),
            %connectivity,
            device = %self.origin_device,
            "Sync engine started"
        );

        Ok(SyncEngine {
            store,
            hub,
            clock: self.clock,
            config: config_tx,
            triggers: tx,
            monitor,
            monitor_subscription,
            origin_user: self.origin_user,
            origin_device: self.origin_device,
            actor,
        })
    }
}

/// Offline-first sync engine.
///
/// Changes are queued durably by [`SyncEngine::enqueue`] and pushed to the
/// remote by a background scheduler whenever the network is online.
pub struct SyncEngine {
    store: Arc<ChangeStore>,
    hub: Arc<StateHub>,
    clock: Arc<dyn Clock>,
    config: watch::Sender<SyncConfig>,
    triggers: mpsc::UnboundedSender<Trigger>,
    monitor: NetworkMonitor,
    monitor_subscription: Subscription,
    origin_user: String,
    origin_device: String,
    actor: JoinHandle<()>,
}

impl SyncEngine {
    /// Start building an engine over `storage` and `network`.
    #[must_use]
    pub fn builder(
        storage: Arc<dyn DurableStorage>,
        network: Arc<dyn NetworkSource>,
    ) -> SyncEngineBuilder {
        SyncEngineBuilder {
            storage,
            network,
            clock: Arc::new(SystemClock),
            config: SyncConfig::default(),
            resolver: ConflictResolver::new(),
            origin_user: "unknown".to_string(),
            origin_device: "unknown".to_string(),
        }
    }

    /// Validate, stamp and durably queue a change.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidChange`] for malformed changes and a
    /// persistence error if the queue could not be written; in both cases
    /// nothing is queued.
    pub fn enqueue(&self, change: NewChange) -> Result<PendingChange, SyncError> {
        change.validate().map_err(SyncError::InvalidChange)?;
        let pending = change.into_pending(self.clock.now(), &self.origin_user, &self.origin_device);
        let stored = self.store.enqueue(pending)?;
        debug!(
            change_id = %stored.id,
            entity = %stored.entity_kind(),
            entity_id = %stored.entity_id,
            op = %stored.change_kind(),
            "Change queued"
        );
        let _ = self.triggers.send(Trigger::Enqueued);
        Ok(stored)
    }

    /// Run a cycle now, or report why one cannot run.
    ///
    /// Cancels a pending backoff. Returns [`SyncOutcome::AlreadySyncing`]
    /// while a cycle is in flight and [`SyncOutcome::Offline`] when offline.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Stopped`] after shutdown and
    /// [`SyncError::CycleAborted`] if the cycle hit a persistence failure.
    pub async fn force_sync(&self) -> Result<SyncOutcome, SyncError> {
        let (reply, response) = oneshot::channel();
        self.triggers
            .send(Trigger::Force(reply))
            .map_err(|_| SyncError::Stopped)?;
        response.await.map_err(|_| SyncError::Stopped)?
    }

    /// Observe every published [`SyncState`].
    pub fn subscribe<O>(&self, observer: O) -> Subscription
    where
        O: Observer<SyncState> + 'static,
    {
        self.hub.subscribe(observer)
    }

    #[must_use]
    pub fn current_state(&self) -> SyncState {
        self.hub.snapshot()
    }

    /// Apply a partial configuration update; takes effect from the next cycle.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] if the result would be unusable;
    /// the running configuration is left unchanged.
    pub fn update_config(&self, patch: &SyncConfigPatch) -> Result<SyncConfig, SyncError> {
        let next = patch
            .applied_to(&self.config.borrow())
            .map_err(SyncError::InvalidConfig)?;
        self.config.send_replace(next.clone());
        info!("Sync configuration updated");
        Ok(next)
    }

    #[must_use]
    pub fn config(&self) -> SyncConfig {
        self.config.borrow().clone()
    }

    /// Queued changes in processing order.
    #[must_use]
    pub fn pending_changes(&self) -> Vec<PendingChange> {
        self.store.snapshot()
    }

    /// Drop every queued change.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the empty queue could not be written.
    pub fn clear_pending(&self) -> Result<usize, SyncError> {
        Ok(self.store.clear()?)
    }

    /// Settled connectivity as seen by the monitor.
    #[must_use]
    pub fn connectivity(&self) -> Connectivity {
        self.monitor.current_status()
    }

    /// Stop the scheduler.
    ///
    /// An in-flight cycle finishes its current batch; its partial result is
    /// returned. Returns `None` when no cycle was running.
    pub async fn shutdown(&self) -> Option<SyncResult> {
        let (reply, response) = oneshot::channel();
        if self.triggers.send(Trigger::Shutdown(reply)).is_err() {
            return None;
        }
        let result = response.await.ok().flatten();
        info!(partial = result.is_some(), "Sync engine stopped");
        result
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.monitor_subscription.unsubscribe();
        self.actor.abort();
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("state", &self.hub.snapshot())
            .field("device", &self.origin_device)
            .finish_non_exhaustive()
    }
}
