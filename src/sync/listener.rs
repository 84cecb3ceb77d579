//! Listener registry shared by the state bus and network sources.
//!
//! Listeners implement [`Observer`] (closures do automatically). Each
//! subscription returns a [`Subscription`] whose `unsubscribe` is
//! idempotent. A panicking listener is logged and skipped; the remaining
//! listeners still receive the value.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};
use tracing::warn;

/// Receives published values.
pub trait Observer<T>: Send + Sync {
    fn notify(&self, value: &T);
}

impl<T, F> Observer<T> for F
where
    F: Fn(&T) + Send + Sync,
{
    fn notify(&self, value: &T) {
        self(value);
    }
}

type Entries<T> = Vec<(u64, Arc<dyn Observer<T>>)>;

struct Registry<T> {
    next_id: u64,
    entries: Entries<T>,
}

/// A set of observers for values of type `T`.
pub struct ListenerSet<T> {
    registry: Arc<Mutex<Registry<T>>>,
}

impl<T> Default for ListenerSet<T> {
    fn default() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }
}

impl<T> Clone for ListenerSet<T> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<T: 'static> ListenerSet<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer.
    pub fn subscribe<O>(&self, observer: O) -> Subscription
    where
        O: Observer<T> + 'static,
    {
        self.subscribe_shared(Arc::new(observer))
    }

    /// Register an already shared observer.
    pub fn subscribe_shared(&self, observer: Arc<dyn Observer<T>>) -> Subscription {
        let id = match self.registry.lock() {
            Ok(mut registry) => {
                let id = registry.next_id;
                registry.next_id += 1;
                registry.entries.push((id, observer));
                id
            }
            Err(_) => return Subscription::detached(),
        };

        let weak: Weak<Mutex<Registry<T>>> = Arc::downgrade(&self.registry);
        Subscription::new(move || {
            if let Some(registry) = weak.upgrade() {
                if let Ok(mut registry) = registry.lock() {
                    registry.entries.retain(|(entry_id, _)| *entry_id != id);
                }
            }
        })
    }

    /// Deliver `value` to every observer; returns how many completed.
    ///
    /// The registry lock is released before observers run, so observers may
    /// subscribe or unsubscribe from inside `notify`.
    pub fn publish(&self, value: &T) -> usize {
        let observers: Vec<Arc<dyn Observer<T>>> = match self.registry.lock() {
            Ok(registry) => registry.entries.iter().map(|(_, o)| Arc::clone(o)).collect(),
            Err(_) => return 0,
        };

        let mut delivered = 0;
        for observer in observers {
            match catch_unwind(AssertUnwindSafe(|| observer.notify(value))) {
                Ok(()) => delivered += 1,
                Err(_) => warn!("Listener panicked; continuing with remaining listeners"),
            }
        }
        delivered
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.registry.lock().map_or(0, |r| r.entries.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

type Detach = Box<dyn FnOnce() + Send>;

/// Handle returned by `subscribe`.
///
/// Dropping the handle keeps the listener registered; call
/// [`Subscription::unsubscribe`] to remove it.
pub struct Subscription {
    detach: Mutex<Option<Detach>>,
}

impl Subscription {
    pub fn new(detach: impl FnOnce() + Send + 'static) -> Self {
        Self {
            detach: Mutex::new(Some(Box::new(detach))),
        }
    }

    /// A handle that is not attached to anything.
    #[must_use]
    pub fn detached() -> Self {
        Self {
            detach: Mutex::new(None),
        }
    }

    /// Remove the listener. Safe to call more than once.
    pub fn unsubscribe(&self) {
        let detach = self.detach.lock().ok().and_then(|mut slot| slot.take());
        if let Some(detach) = detach {
            detach();
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.detach.lock().is_ok_and(|slot| slot.is_some())
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_publish_reaches_all_listeners() {
        let set = ListenerSet::<u32>::new();
        let total = Arc::new(AtomicUsize::new(0));

        let t1 = Arc::clone(&total);
        let _a = set.subscribe(move |v: &u32| {
            t1.fetch_add(*v as usize, Ordering::SeqCst);
        });
        let t2 = Arc::clone(&total);
        let _b = set.subscribe(move |v: &u32| {
            t2.fetch_add(*v as usize * 10, Ordering::SeqCst);
        });

        assert_eq!(set.publish(&2), 2);
        assert_eq!(total.load(Ordering::SeqCst), 22);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let set = ListenerSet::<u32>::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let sub = set.subscribe(move |_: &u32| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        set.publish(&1);
        sub.unsubscribe();
        sub.unsubscribe();
        set.publish(&1);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(set.is_empty());
        assert!(!sub.is_active());
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let set = ListenerSet::<u32>::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let _bad = set.subscribe(|_: &u32| panic!("listener failure"));
        let h = Arc::clone(&hits);
        let _good = set.subscribe(move |_: &u32| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(set.publish(&7), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_after_set_dropped() {
        let set = ListenerSet::<u32>::new();
        let sub = set.subscribe(|_: &u32| {});
        drop(set);
        sub.unsubscribe();
    }
}
