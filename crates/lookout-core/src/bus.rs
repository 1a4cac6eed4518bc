//! Single-slot visual-context broadcaster.
//!
//! Holds exactly one current snapshot; an update replaces the slot
//! wholesale (last-write-wins, no queueing) and then notifies every
//! registered subscriber synchronously, in registration order. A slow
//! subscriber simply sees only the latest snapshot on its next invocation.
//!
//! Lifecycle-scoped service object: constructed once per pipeline run and
//! shared via `Arc`, never a module-level global.

use std::sync::{Arc, Mutex, Weak};

use crate::types::VisualSnapshot;

type Callback = Arc<dyn Fn(&VisualSnapshot) + Send + Sync>;

struct BusInner {
    snapshot: Option<VisualSnapshot>,
    subscribers: Vec<(u64, Callback)>,
    next_id: u64,
}

pub struct VisualContextBus {
    inner: Mutex<BusInner>,
}

impl VisualContextBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(BusInner {
                snapshot: None,
                subscribers: Vec::new(),
                next_id: 0,
            }),
        })
    }

    /// Replace the slot and fan the new snapshot out to all subscribers.
    ///
    /// Callbacks run on the caller's thread, outside the bus lock, so a
    /// callback may subscribe or unsubscribe without deadlocking. An
    /// unsubscribe that completes before `update` is called is always
    /// honored.
    pub fn update(&self, snapshot: VisualSnapshot) {
        let callbacks: Vec<Callback> = {
            let mut inner = self.inner.lock().expect("bus lock poisoned");
            inner.snapshot = Some(snapshot.clone());
            inner.subscribers.iter().map(|(_, cb)| cb.clone()).collect()
        };
        for cb in callbacks {
            cb(&snapshot);
        }
    }

    /// The current snapshot, if any update has happened yet.
    pub fn current(&self) -> Option<VisualSnapshot> {
        self.inner.lock().expect("bus lock poisoned").snapshot.clone()
    }

    /// Register a subscriber. Dropping the returned [`Subscription`]
    /// removes exactly this callback.
    pub fn subscribe<F>(self: &Arc<Self>, callback: F) -> Subscription
    where
        F: Fn(&VisualSnapshot) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock().expect("bus lock poisoned");
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.push((id, Arc::new(callback)));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn remove(&self, id: u64) {
        let mut inner = self.inner.lock().expect("bus lock poisoned");
        inner.subscribers.retain(|(sub_id, _)| *sub_id != id);
    }
}

/// Handle for one registered subscriber; unsubscribes on drop.
pub struct Subscription {
    bus: Weak<VisualContextBus>,
    id: u64,
}

impl Subscription {
    /// Remove the callback now instead of at drop time.
    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn snap(id: &str) -> VisualSnapshot {
        VisualSnapshot {
            found: true,
            id: Some(id.to_string()),
            name: Some(id.to_string()),
            relationship_status: None,
            similarity: Some(0.9),
            last_seen: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_subscribers_see_updates_in_order() {
        let bus = VisualContextBus::new();
        let seen1 = Arc::new(StdMutex::new(Vec::new()));
        let seen2 = Arc::new(StdMutex::new(Vec::new()));

        let s1 = {
            let seen = seen1.clone();
            bus.subscribe(move |s| seen.lock().unwrap().push(s.id.clone().unwrap()))
        };
        let s2 = {
            let seen = seen2.clone();
            bus.subscribe(move |s| seen.lock().unwrap().push(s.id.clone().unwrap()))
        };

        bus.update(snap("u1"));
        bus.update(snap("u2"));

        assert_eq!(*seen1.lock().unwrap(), vec!["u1", "u2"]);
        assert_eq!(*seen2.lock().unwrap(), vec!["u1", "u2"]);
        drop(s1);
        drop(s2);
    }

    #[test]
    fn test_unsubscribed_callback_is_never_invoked_again() {
        let bus = VisualContextBus::new();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sub = {
            let seen = seen.clone();
            bus.subscribe(move |s| seen.lock().unwrap().push(s.id.clone().unwrap()))
        };

        bus.update(snap("u1"));
        sub.unsubscribe();
        bus.update(snap("u2"));

        assert_eq!(*seen.lock().unwrap(), vec!["u1"]);
    }

    #[test]
    fn test_slot_is_replaced_wholesale() {
        let bus = VisualContextBus::new();
        assert!(bus.current().is_none());

        bus.update(snap("first"));
        let mut second = snap("second");
        second.relationship_status = Some("Friend".into());
        bus.update(second);

        let current = bus.current().unwrap();
        assert_eq!(current.id.as_deref(), Some("second"));
        assert_eq!(current.relationship_status.as_deref(), Some("Friend"));
    }

    #[test]
    fn test_subscription_drop_unsubscribes() {
        let bus = VisualContextBus::new();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        {
            let seen = seen.clone();
            let _sub = bus.subscribe(move |s| seen.lock().unwrap().push(s.id.clone().unwrap()));
            bus.update(snap("u1"));
        }
        bus.update(snap("u2"));
        assert_eq!(*seen.lock().unwrap(), vec!["u1"]);
    }
}
