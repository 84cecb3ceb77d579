//! The scheduling actor.
//!
//! A single task owns every phase decision. Connectivity transitions,
//! enqueue notifications, forced syncs and shutdown requests arrive as
//! [`Trigger`]s; the periodic timer, the backoff timer and configuration
//! updates are polled in the same `select!`. Cycles run on their own task
//! and report back with [`Trigger::CycleFinished`], so the actor stays
//! responsive while a cycle is in flight.

use super::clock::Clock;
use super::processor::BatchProcessor;
use super::queue::ChangeStore;
use super::remote::RemoteDataService;
use super::state::StateHub;
use super::types::{Connectivity, Phase, RecentError, SyncError, SyncOutcome, SyncResult};
use crate::config::SyncConfig;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, error, info};

pub(crate) type ForceReply = oneshot::Sender<Result<SyncOutcome, SyncError>>;
pub(crate) type ShutdownReply = oneshot::Sender<Option<SyncResult>>;

/// Events posted to the scheduler.
pub(crate) enum Trigger {
    Connectivity(Connectivity),
    Enqueued,
    Force(ForceReply),
    CycleFinished(Result<SyncResult, String>),
    Shutdown(ShutdownReply),
}

pub(crate) struct Scheduler<R: RemoteDataService> {
    processor: Arc<BatchProcessor<R>>,
    store: Arc<ChangeStore>,
    hub: Arc<StateHub>,
    clock: Arc<dyn Clock>,
    config: watch::Receiver<SyncConfig>,
    tx: mpsc::UnboundedSender<Trigger>,
    rx: mpsc::UnboundedReceiver<Trigger>,
    connectivity: Connectivity,
    in_flight: bool,
    waiters: Vec<ForceReply>,
    backoff: Option<Pin<Box<Sleep>>>,
    stopping: Option<ShutdownReply>,
}

impl<R: RemoteDataService> Scheduler<R> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        processor: Arc<BatchProcessor<R>>,
        store: Arc<ChangeStore>,
        hub: Arc<StateHub>,
        clock: Arc<dyn Clock>,
        config: watch::Receiver<SyncConfig>,
        tx: mpsc::UnboundedSender<Trigger>,
        rx: mpsc::UnboundedReceiver<Trigger>,
        connectivity: Connectivity,
    ) -> Self {
        Self {
            processor,
            store,
            hub,
            clock,
            config,
            tx,
            rx,
            connectivity,
            in_flight: false,
            waiters: Vec::new(),
            backoff: None,
            stopping: None,
        }
    }

    /// Drive the scheduler until shutdown.
    pub(crate) async fn run(mut self) {
        let mut interval = self.config.borrow().sync_interval();
        let mut ticker = periodic_timer(interval);
        let mut config_open = true;

        self.try_start("startup");

        loop {
            tokio::select! {
                trigger = self.rx.recv() => {
                    let Some(trigger) = trigger else { break };
                    if self.handle(trigger).is_break() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if self.config.borrow().auto_sync {
                        self.try_start("timer");
                    }
                }
                () = wait_backoff(&mut self.backoff) => {
                    self.backoff = None;
                    self.on_backoff_elapsed();
                }
                changed = self.config.changed(), if config_open => {
                    if changed.is_err() {
                        config_open = false;
                        continue;
                    }
                    let next = self.config.borrow_and_update().sync_interval();
                    if next != interval {
                        debug!(interval = ?next, "Rebuilding sync timer");
                        interval = next;
                        ticker = periodic_timer(interval);
                    }
                }
            }
        }

        debug!("Scheduler stopped");
    }

    fn handle(&mut self, trigger: Trigger) -> ControlFlow<()> {
        match trigger {
            Trigger::Connectivity(status) => self.on_connectivity(status),
            Trigger::Enqueued => {
                if self.config.borrow().sync_on_enqueue {
                    self.try_start("enqueue");
                }
            }
            Trigger::Force(reply) => self.on_force(reply),
            Trigger::CycleFinished(result) => return self.on_cycle_finished(result),
            Trigger::Shutdown(reply) => return self.on_shutdown(reply),
        }
        ControlFlow::Continue(())
    }

    /// Start a cycle if the scheduler is idle and there is work to do.
    fn try_start(&mut self, reason: &str) {
        if self.in_flight || self.stopping.is_some() || self.backoff.is_some() {
            return;
        }
        if !self.connectivity.is_online() || self.store.is_empty() {
            return;
        }
        debug!(reason, "Starting sync cycle");
        self.start_cycle();
    }

    fn start_cycle(&mut self) {
        let config = self.config.borrow().clone();
        self.in_flight = true;
        self.backoff = None;
        self.hub.update(|s| {
            s.phase = Phase::Syncing;
            s.next_attempt_at = None;
        });

        let processor = Arc::clone(&self.processor);
        let worker = tokio::spawn(async move { processor.run_cycle(&config).await });
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let finished = match worker.await {
                Ok(Ok(result)) => Ok(result),
                Ok(Err(e)) => Err(e.to_string()),
                Err(e) => Err(format!("sync cycle task failed: {e}")),
            };
            let _ = tx.send(Trigger::CycleFinished(finished));
        });
    }

    fn on_force(&mut self, reply: ForceReply) {
        let outcome = if self.stopping.is_some() {
            Err(SyncError::Stopped)
        } else if self.in_flight {
            Ok(SyncOutcome::AlreadySyncing)
        } else if !self.connectivity.is_online() {
            Ok(SyncOutcome::Offline)
        } else if self.store.is_empty() {
            let now = self.clock.now();
            self.hub.update(|s| s.last_sync_at = Some(now));
            Ok(SyncOutcome::Completed(SyncResult::default()))
        } else {
            if self.backoff.take().is_some() {
                debug!("Forced sync cancels backoff");
            }
            self.waiters.push(reply);
            self.start_cycle();
            return;
        };
        let _ = reply.send(outcome);
    }

    fn on_cycle_finished(&mut self, finished: Result<SyncResult, String>) -> ControlFlow<()> {
        self.in_flight = false;
        let now = self.clock.now();
        let config = self.config.borrow().clone();

        let result = match finished {
            Ok(result) => result,
            Err(message) => {
                error!(error = %message, "Sync cycle aborted");
                for waiter in self.waiters.drain(..) {
                    let _ = waiter.send(Err(SyncError::CycleAborted(message.clone())));
                }
                self.hub.update(|s| {
                    s.push_error(
                        RecentError {
                            at: now,
                            change_id: None,
                            message: message.clone(),
                        },
                        config.recent_error_limit,
                    );
                });
                if let Some(reply) = self.stopping.take() {
                    self.set_idle();
                    let _ = reply.send(None);
                    return ControlFlow::Break(());
                }
                if self.connectivity.is_online() {
                    self.enter_backoff(config.base_delay());
                } else {
                    self.set_idle();
                }
                return ControlFlow::Continue(());
            }
        };

        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Ok(SyncOutcome::Completed(result.clone())));
        }
        self.hub.update(|s| {
            s.last_sync_at = Some(now);
            for err in &result.errors {
                s.push_error(
                    RecentError {
                        at: now,
                        change_id: Some(err.change_id.clone()),
                        message: format!("{} {}: {}", err.entity, err.entity_id, err.reason),
                    },
                    config.recent_error_limit,
                );
            }
        });

        if let Some(reply) = self.stopping.take() {
            self.set_idle();
            let _ = reply.send(Some(result));
            return ControlFlow::Break(());
        }

        if !self.connectivity.is_online() {
            self.set_idle();
        } else if result.deferred > 0 {
            let retries = self.store.min_retry_count().unwrap_or(0);
            self.enter_backoff(config.backoff_delay(retries));
        } else if !self.store.is_empty() && !result.aborted {
            debug!("Changes arrived during the cycle; starting another");
            self.start_cycle();
        } else {
            self.set_idle();
        }
        ControlFlow::Continue(())
    }

    fn on_backoff_elapsed(&mut self) {
        if !self.connectivity.is_online() || self.store.is_empty() {
            self.set_idle();
            return;
        }
        debug!("Backoff elapsed; retrying");
        self.start_cycle();
    }

    fn on_connectivity(&mut self, status: Connectivity) {
        if status == self.connectivity {
            return;
        }
        info!(%status, "Connectivity changed");
        self.connectivity = status;
        self.hub.update(|s| s.connectivity = status);

        if status.is_online() {
            self.try_start("online");
        } else if self.backoff.take().is_some() {
            self.set_idle();
        }
    }

    fn on_shutdown(&mut self, reply: ShutdownReply) -> ControlFlow<()> {
        self.processor.request_stop();
        self.backoff = None;
        if self.in_flight {
            info!("Shutdown requested; waiting for in-flight cycle");
            self.stopping = Some(reply);
            return ControlFlow::Continue(());
        }
        self.set_idle();
        let _ = reply.send(None);
        ControlFlow::Break(())
    }

    fn enter_backoff(&mut self, delay: Duration) {
        info!(delay = ?delay, "Entering backoff");
        self.backoff = Some(Box::pin(sleep_until(Instant::now() + delay)));
        let at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| self.clock.now().checked_add_signed(d));
        self.hub.update(|s| {
            s.phase = Phase::Backoff;
            s.next_attempt_at = at;
        });
    }

    fn set_idle(&self) {
        self.hub.update(|s| {
            s.phase = Phase::Idle;
            s.next_attempt_at = None;
        });
    }
}

fn periodic_timer(period: Duration) -> Interval {
    let period = period.max(Duration::from_millis(1));
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn wait_backoff(backoff: &mut Option<Pin<Box<Sleep>>>) {
    match backoff {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}
