//! Connectivity sources and the debouncing network monitor.
//!
//! A [`NetworkSource`] reports raw reachability. [`NetworkMonitor`] turns
//! raw flips into transitions, emitting a new state only after it has held
//! for the configured settle window.

use super::listener::{ListenerSet, Observer, Subscription};
use super::types::Connectivity;
use crate::config::SyncConfig;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

/// Platform connectivity signal.
pub trait NetworkSource: Send + Sync {
    fn current(&self) -> Connectivity;

    fn subscribe(&self, observer: Arc<dyn Observer<Connectivity>>) -> Subscription;
}

/// A source the host flips explicitly.
pub struct ManualNetwork {
    status: Mutex<Connectivity>,
    listeners: ListenerSet<Connectivity>,
}

impl ManualNetwork {
    #[must_use]
    pub fn new(initial: Connectivity) -> Self {
        Self {
            status: Mutex::new(initial),
            listeners: ListenerSet::new(),
        }
    }

    /// Report a raw status; observers hear only actual flips.
    pub fn set(&self, status: Connectivity) {
        let changed = match self.status.lock() {
            Ok(mut current) if *current != status => {
                *current = status;
                true
            }
            _ => false,
        };
        if changed {
            self.listeners.publish(&status);
        }
    }
}

impl NetworkSource for ManualNetwork {
    fn current(&self) -> Connectivity {
        self.status
            .lock()
            .map_or(Connectivity::Offline, |status| *status)
    }

    fn subscribe(&self, observer: Arc<dyn Observer<Connectivity>>) -> Subscription {
        self.listeners.subscribe_shared(observer)
    }
}

/// Debounced view over a [`NetworkSource`].
pub struct NetworkMonitor {
    status: watch::Receiver<Connectivity>,
    listeners: ListenerSet<Connectivity>,
    source_subscription: Subscription,
    task: JoinHandle<()>,
}

impl NetworkMonitor {
    /// Start monitoring `source`. Must be called inside a Tokio runtime.
    ///
    /// The settle window is read from `config` each time a raw flip arrives,
    /// so configuration updates apply to the next flip.
    #[must_use]
    pub fn start(source: &Arc<dyn NetworkSource>, config: watch::Receiver<SyncConfig>) -> Self {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let source_subscription = source.subscribe(Arc::new(move |status: &Connectivity| {
            let _ = raw_tx.send(*status);
        }));
        // Read after subscribing: a flip in between is then also queued on
        // `raw_rx`, and a repeat of `initial` is ignored by the loop.
        let initial = source.current();
        let (status_tx, status_rx) = watch::channel(initial);
        let listeners = ListenerSet::new();

        let task = tokio::spawn(debounce_loop(
            initial,
            raw_rx,
            status_tx,
            listeners.clone(),
            config,
        ));

        Self {
            status: status_rx,
            listeners,
            source_subscription,
            task,
        }
    }

    /// Last emitted (settled) status.
    #[must_use]
    pub fn current_status(&self) -> Connectivity {
        *self.status.borrow()
    }

    /// Observe settled transitions.
    pub fn subscribe<O>(&self, observer: O) -> Subscription
    where
        O: Observer<Connectivity> + 'static,
    {
        self.listeners.subscribe(observer)
    }
}

impl Drop for NetworkMonitor {
    fn drop(&mut self) {
        self.source_subscription.unsubscribe();
        self.task.abort();
    }
}

async fn debounce_loop(
    initial: Connectivity,
    mut raw: mpsc::UnboundedReceiver<Connectivity>,
    status: watch::Sender<Connectivity>,
    listeners: ListenerSet<Connectivity>,
    config: watch::Receiver<SyncConfig>,
) {
    let mut emitted = initial;
    let mut pending: Option<(Connectivity, Instant)> = None;

    loop {
        let deadline = pending.map(|(_, at)| at);
        tokio::select! {
            next = raw.recv() => {
                let Some(next) = next else { break };
                if next == emitted {
                    if pending.take().is_some() {
                        debug!(status = %next, "Connectivity flap settled back; nothing emitted");
                    }
                } else if pending.is_none_or(|(p, _)| p != next) {
                    let settle = config.borrow().settle_window();
                    pending = Some((next, Instant::now() + settle));
                }
            }
            () = async {
                match deadline {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending().await,
                }
            } => {
                if let Some((next, _)) = pending.take() {
                    emitted = next;
                    info!(status = %next, "Connectivity transition");
                    status.send_replace(next);
                    listeners.publish(&next);
                }
            }
        }
    }
}
