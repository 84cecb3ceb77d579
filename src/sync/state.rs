//! Shared [`SyncState`] with change notification.

use super::listener::{ListenerSet, Observer, Subscription};
use super::types::SyncState;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

struct Inner {
    state: SyncState,
    /// Snapshots not yet delivered, oldest first.
    outbox: VecDeque<SyncState>,
    delivering: bool,
}

/// Holds the current state and publishes every update.
///
/// Snapshots are queued under the lock in the order the updates were
/// applied and delivered by one thread at a time, so listeners always see
/// them in that order. Listeners run without the lock held and may call
/// back into the engine; an update made from inside a listener is
/// delivered after that listener returns.
pub struct StateHub {
    inner: Mutex<Inner>,
    listeners: ListenerSet<SyncState>,
}

impl StateHub {
    #[must_use]
    pub fn new(initial: SyncState) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: initial,
                outbox: VecDeque::new(),
                delivering: false,
            }),
            listeners: ListenerSet::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    #[must_use]
    pub fn snapshot(&self) -> SyncState {
        self.lock().state.clone()
    }

    /// Mutate the state and notify listeners when it actually changed.
    pub fn update(&self, mutate: impl FnOnce(&mut SyncState)) {
        {
            let mut inner = self.lock();
            let before = inner.state.clone();
            mutate(&mut inner.state);
            if inner.state == before {
                return;
            }
            let published = inner.state.clone();
            inner.outbox.push_back(published);
            if inner.delivering {
                return;
            }
            inner.delivering = true;
        }
        self.drain();
    }

    /// Deliver queued snapshots until the outbox is empty.
    fn drain(&self) {
        loop {
            let next = {
                let mut inner = self.lock();
                let next = inner.outbox.pop_front();
                if next.is_none() {
                    inner.delivering = false;
                }
                next
            };
            match next {
                Some(state) => {
                    self.listeners.publish(&state);
                }
                None => return,
            }
        }
    }

    pub fn subscribe<O>(&self, observer: O) -> Subscription
    where
        O: Observer<SyncState> + 'static,
    {
        self.listeners.subscribe(observer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{Connectivity, Phase};
    use std::sync::Arc;

    #[test]
    fn test_update_publishes_only_changes() {
        let hub = StateHub::new(SyncState::new(Connectivity::Online, 0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = hub.subscribe(move |s: &SyncState| sink.lock().unwrap().push(s.phase));

        hub.update(|s| s.phase = Phase::Syncing);
        hub.update(|s| s.phase = Phase::Syncing);
        hub.update(|s| s.phase = Phase::Idle);

        assert_eq!(*seen.lock().unwrap(), vec![Phase::Syncing, Phase::Idle]);
        assert_eq!(hub.snapshot().phase, Phase::Idle);
    }

    #[test]
    fn test_concurrent_updates_deliver_latest_last() {
        for _ in 0..200 {
            let hub = Arc::new(StateHub::new(SyncState::new(Connectivity::Online, 0)));
            let last = Arc::new(Mutex::new(None));
            let sink = Arc::clone(&last);
            let _sub = hub.subscribe(move |s: &SyncState| *sink.lock().unwrap() = Some(s.clone()));

            let writers: Vec<_> = (0..2)
                .map(|writer| {
                    let hub = Arc::clone(&hub);
                    std::thread::spawn(move || {
                        for step in 1..=20 {
                            hub.update(|s| {
                                s.queue_depth = writer * 100 + step;
                                s.phase = if step % 2 == 0 { Phase::Idle } else { Phase::Syncing };
                            });
                        }
                    })
                })
                .collect();
            for writer in writers {
                writer.join().unwrap();
            }

            assert_eq!(last.lock().unwrap().clone(), Some(hub.snapshot()));
        }
    }

    #[test]
    fn test_update_from_listener_is_delivered_in_order() {
        let hub = Arc::new(StateHub::new(SyncState::new(Connectivity::Online, 0)));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let reentrant = Arc::clone(&hub);
        let _sub = hub.subscribe(move |s: &SyncState| {
            sink.lock().unwrap().push(s.queue_depth);
            if s.queue_depth == 1 {
                reentrant.update(|s| s.queue_depth = 2);
            }
        });

        hub.update(|s| s.queue_depth = 1);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
        assert_eq!(hub.snapshot().queue_depth, 2);
    }

    #[test]
    fn test_listener_may_read_state() {
        let hub = Arc::new(StateHub::new(SyncState::new(Connectivity::Offline, 0)));
        let reader = Arc::clone(&hub);
        let depths = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&depths);
        let _sub = hub.subscribe(move |_: &SyncState| {
            sink.lock().unwrap().push(reader.snapshot().queue_depth);
        });

        hub.update(|s| s.queue_depth = 3);
        assert_eq!(*depths.lock().unwrap(), vec![3]);
    }
}
