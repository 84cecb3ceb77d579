//! One synchronization cycle.
//!
//! The processor repeatedly plans a batch from the current queue, applies it
//! to the remote, and records each outcome in the store. Planning enforces
//! per-entity ordering:
//!
//! - only the oldest queued change of an entity is eligible
//! - an entity contributes at most one change per batch
//! - an entity whose change is deferred stays blocked for the rest of the cycle
//! - each change is attempted at most once per cycle
//!
//! Remote calls for distinct entities run concurrently on a bounded pool.
//! Once a batch completes its outcomes are settled in the store with one
//! durable write.

use super::queue::{ChangeStore, Disposition, Settled};
use super::remote::{RemoteDataService, RemoteError};
use super::resolver::{ConflictResolver, ConflictStrategy};
use super::types::{ChangeError, FailureReason, SyncResult};
use crate::config::SyncConfig;
use crate::model::{EntityKind, EntityRecord, PendingChange, Priority, RemoteOp};
use crate::storage::PersistenceError;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

type EntityKey = (EntityKind, String);

/// Result of one remote attempt.
#[derive(Debug, Clone, PartialEq)]
enum Attempt {
    Applied { via_conflict: bool },
    Retry(RemoteError),
    Failed(FailureReason),
}

/// Executes sync cycles against a remote.
pub struct BatchProcessor<R> {
    store: Arc<ChangeStore>,
    remote: Arc<R>,
    resolver: Arc<ConflictResolver>,
    stop: Arc<AtomicBool>,
}

impl<R: RemoteDataService> BatchProcessor<R> {
    #[must_use]
    pub fn new(store: Arc<ChangeStore>, remote: Arc<R>, resolver: Arc<ConflictResolver>) -> Self {
        Self {
            store,
            remote,
            resolver,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Ask running and future cycles to stop before their next batch.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Run one cycle with the given configuration snapshot.
    ///
    /// # Errors
    ///
    /// Returns the first [`PersistenceError`] raised by the store; the cycle
    /// stops at that point.
    pub async fn run_cycle(&self, config: &SyncConfig) -> Result<SyncResult, PersistenceError> {
        let started = Instant::now();
        let mut result = SyncResult::default();
        let mut attempted: HashSet<String> = HashSet::new();
        let mut blocked: HashSet<EntityKey> = HashSet::new();
        let mut batches = 0usize;

        loop {
            if self.stop_requested() {
                info!(batches, "Stop requested; ending cycle early");
                result.aborted = true;
                break;
            }

            let batch = plan_batch(&self.store.snapshot(), &attempted, &blocked, config.batch_size);
            if batch.is_empty() {
                break;
            }
            batches += 1;
            attempted.extend(batch.iter().map(|c| c.id.clone()));
            debug!(batch = batches, size = batch.len(), "Dispatching batch");

            let outcomes = self.execute(batch, config).await;
            self.record(outcomes, config, &mut result, &mut blocked)?;
        }

        result.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            synced = result.synced,
            failed = result.failed,
            deferred = result.deferred,
            batches,
            duration_ms = result.duration_ms,
            "Sync cycle finished"
        );
        Ok(result)
    }

    /// Run a batch's remote calls; results come back in batch order.
    async fn execute(
        &self,
        batch: Vec<PendingChange>,
        config: &SyncConfig,
    ) -> Vec<(PendingChange, Attempt)> {
        let permits = Arc::new(Semaphore::new(config.worker_concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for (index, change) in batch.into_iter().enumerate() {
            let remote = Arc::clone(&self.remote);
            let resolver = Arc::clone(&self.resolver);
            let permits = Arc::clone(&permits);
            let strategy = config.strategy_for(change.entity_kind());
            let limit = config.call_timeout();

            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                let outcome = attempt(remote.as_ref(), &resolver, &change, strategy, limit).await;
                (index, change, outcome)
            });
        }

        let mut done = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(item) => done.push(item),
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => error!(error = %e, "Remote call task was cancelled; change stays queued"),
            }
        }

        done.sort_by_key(|(index, _, _)| *index);
        done.into_iter()
            .map(|(_, change, outcome)| (change, outcome))
            .collect()
    }

    /// Settle a finished batch in the store, then tally it into `result`.
    fn record(
        &self,
        outcomes: Vec<(PendingChange, Attempt)>,
        config: &SyncConfig,
        result: &mut SyncResult,
        blocked: &mut HashSet<EntityKey>,
    ) -> Result<(), PersistenceError> {
        let dispositions: Vec<(String, Disposition)> = outcomes
            .iter()
            .map(|(change, attempt)| {
                let disposition = match attempt {
                    Attempt::Retry(_) => Disposition::Retry {
                        max_retries: config.max_retries,
                    },
                    Attempt::Applied { .. } | Attempt::Failed(_) => Disposition::Remove,
                };
                (change.id.clone(), disposition)
            })
            .collect();
        let settled = self.store.settle(&dispositions)?;

        for ((change, attempt), settled) in outcomes.into_iter().zip(settled) {
            match (attempt, settled) {
                (Attempt::Applied { via_conflict }, _) => {
                    result.synced += 1;
                    if via_conflict {
                        result.conflicts_resolved += 1;
                    }
                    debug!(change_id = %change.id, entity_id = %change.entity_id, "Change applied");
                }
                (Attempt::Failed(reason), _) => {
                    warn!(
                        change_id = %change.id,
                        entity_id = %change.entity_id,
                        reason = %reason,
                        "Change failed permanently"
                    );
                    push_failure(result, &change, reason);
                }
                (Attempt::Retry(err), Settled::Exhausted { attempts }) => {
                    warn!(
                        change_id = %change.id,
                        entity_id = %change.entity_id,
                        attempts,
                        error = %err,
                        "Change exceeded retry limit; dropped"
                    );
                    push_failure(
                        result,
                        &change,
                        FailureReason::MaxRetriesExceeded {
                            attempts,
                            last_error: err.to_string(),
                        },
                    );
                }
                (Attempt::Retry(err), Settled::Deferred { attempts }) => {
                    debug!(
                        change_id = %change.id,
                        entity_id = %change.entity_id,
                        attempts,
                        error = %err,
                        "Change deferred"
                    );
                    result.deferred += 1;
                    blocked.insert((change.entity_kind(), change.entity_id.clone()));
                }
                (Attempt::Retry(_), Settled::Removed | Settled::Missing) => {
                    debug!(change_id = %change.id, "Change left the queue during the cycle");
                }
            }
        }
        Ok(())
    }
}

fn push_failure(result: &mut SyncResult, change: &PendingChange, reason: FailureReason) {
    result.failed += 1;
    result.errors.push(ChangeError {
        change_id: change.id.clone(),
        entity: change.entity_kind(),
        entity_id: change.entity_id.clone(),
        reason,
    });
}

/// Choose the next batch from an ordered queue snapshot.
///
/// An entity's head inherits the highest priority queued for that entity,
/// so an urgent update is not held back behind a low-priority predecessor.
fn plan_batch(
    queue: &[PendingChange],
    attempted: &HashSet<String>,
    blocked: &HashSet<EntityKey>,
    max: usize,
) -> Vec<PendingChange> {
    let mut heads: HashMap<(EntityKind, &str), (&PendingChange, Priority)> = HashMap::new();
    for change in queue {
        heads
            .entry(change.entity_key())
            .and_modify(|(head, priority)| {
                if change.entity_order(*head).is_lt() {
                    *head = change;
                }
                if change.priority.rank() < priority.rank() {
                    *priority = change.priority;
                }
            })
            .or_insert((change, change.priority));
    }

    let mut eligible: Vec<(&PendingChange, Priority)> = heads
        .into_iter()
        .filter(|((kind, id), (head, _))| {
            !attempted.contains(&head.id) && !blocked.contains(&(*kind, (*id).to_string()))
        })
        .map(|(_, head)| head)
        .collect();
    eligible.sort_by(|(a, pa), (b, pb)| {
        pa.rank()
            .cmp(&pb.rank())
            .then_with(|| a.entity_order(b))
            .then_with(|| a.id.cmp(&b.id))
    });

    eligible
        .into_iter()
        .take(max)
        .map(|(change, _)| change.clone())
        .collect()
}

async fn call<R: RemoteDataService>(
    remote: &R,
    op: &RemoteOp,
    entity_id: &str,
    limit: Duration,
) -> Result<(), RemoteError> {
    let request = async {
        match op {
            RemoteOp::Create(record) => {
                let assigned = remote.create_entity(record).await?;
                if assigned != entity_id {
                    debug!(entity_id, assigned = %assigned, "Remote assigned a different id");
                }
                Ok(())
            }
            RemoteOp::Update(record) => remote.update_entity(entity_id, record).await,
            RemoteOp::Delete(kind) => remote.delete_entity(*kind, entity_id).await,
        }
    };
    tokio::time::timeout(limit, request)
        .await
        .unwrap_or(Err(RemoteError::Timeout))
}

async fn attempt<R: RemoteDataService>(
    remote: &R,
    resolver: &ConflictResolver,
    change: &PendingChange,
    strategy: ConflictStrategy,
    limit: Duration,
) -> Attempt {
    let op = change.payload.to_op();
    match call(remote, &op, &change.entity_id, limit).await {
        Ok(()) => Attempt::Applied {
            via_conflict: false,
        },
        Err(RemoteError::Conflict { remote: theirs }) => {
            settle_conflict(remote, resolver, change, op, &theirs, strategy, limit).await
        }
        Err(e) => failed_call(e),
    }
}

/// Classify a remote failure that is not handled by conflict resolution.
fn failed_call(err: RemoteError) -> Attempt {
    if err.is_retryable() {
        return Attempt::Retry(err);
    }
    match err {
        RemoteError::Validation(message) => Attempt::Failed(FailureReason::Validation { message }),
        other => Attempt::Failed(FailureReason::ConflictUnresolved {
            message: format!("remote still conflicts after resolution: {other}"),
        }),
    }
}

async fn settle_conflict<R: RemoteDataService>(
    remote: &R,
    resolver: &ConflictResolver,
    change: &PendingChange,
    op: RemoteOp,
    theirs: &EntityRecord,
    strategy: ConflictStrategy,
    limit: Duration,
) -> Attempt {
    let local = match op {
        RemoteOp::Create(record) | RemoteOp::Update(record) => record,
        RemoteOp::Delete(_) => {
            return if strategy == ConflictStrategy::RemoteWins {
                debug!(change_id = %change.id, "Delete conflict; keeping remote record");
                Attempt::Applied { via_conflict: true }
            } else {
                Attempt::Failed(FailureReason::ConflictUnresolved {
                    message: format!("delete conflicts with remote state under {strategy}"),
                })
            };
        }
    };

    let resolved = match resolver.resolve(&local, theirs, strategy) {
        Ok(resolved) => resolved,
        Err(e) => {
            warn!(change_id = %change.id, error = %e, "Conflict resolution failed");
            return Attempt::Failed(e.into());
        }
    };

    debug!(change_id = %change.id, strategy = %strategy, "Applying resolved record");
    match call(remote, &RemoteOp::Update(resolved), &change.entity_id, limit).await {
        Ok(()) => Attempt::Applied { via_conflict: true },
        Err(e) => failed_call(e),
    }
}
