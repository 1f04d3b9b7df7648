use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::models::JobSnapshot;

type Callback = Arc<dyn Fn(&JobSnapshot) + Send + Sync>;

struct Subscriber {
    id: u64,
    active: Arc<AtomicBool>,
    callback: Callback,
}

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<Subscriber>>,
}

/// Synchronous fan-out of job snapshots to registered callbacks.
///
/// Delivery is in subscription order on the publishing thread. Nothing is
/// buffered: a late subscriber only sees later publishes.
#[derive(Clone, Default)]
pub struct Broadcaster {
    registry: Arc<Registry>,
}

/// Returned by [`Broadcaster::subscribe`]. Dropping it does not unsubscribe.
pub struct Subscription {
    id: u64,
    active: Arc<AtomicBool>,
    registry: Arc<Registry>,
}

impl Subscription {
    /// Stop delivery. Idempotent, and safe to call from inside the callback itself.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        let mut subscribers = self
            .registry
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|s| s.id != self.id);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&JobSnapshot) + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::SeqCst);
        let active = Arc::new(AtomicBool::new(true));
        self.registry
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Subscriber {
                id,
                active: Arc::clone(&active),
                callback: Arc::new(callback),
            });
        Subscription {
            id,
            active,
            registry: Arc::clone(&self.registry),
        }
    }

    pub fn publish(&self, snapshot: &JobSnapshot) {
        // Release the lock before calling out so callbacks may (un)subscribe.
        let targets: Vec<(Arc<AtomicBool>, Callback)> = self
            .registry
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|s| (Arc::clone(&s.active), Arc::clone(&s.callback)))
            .collect();

        for (active, callback) in targets {
            if active.load(Ordering::SeqCst) {
                callback(snapshot);
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InstallMode, JobMetadata, JobStatus};
    use chrono::Utc;
    use uuid::Uuid;

    fn make_snapshot(progress: f64) -> JobSnapshot {
        JobSnapshot {
            id: Uuid::now_v7(),
            app_id: "294100".to_string(),
            content_item_id: "100".to_string(),
            profile_id: "p1".to_string(),
            status: JobStatus::Running,
            progress,
            logs: vec![],
            error: None,
            exit_code: None,
            installed_path: None,
            install_mode: InstallMode::Copy,
            metadata: JobMetadata::default(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    #[test]
    fn test_publish_reaches_subscribers_in_order() {
        let broadcaster = Broadcaster::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s1 = Arc::clone(&seen);
        let _a = broadcaster.subscribe(move |_| s1.lock().unwrap().push("a"));
        let s2 = Arc::clone(&seen);
        let _b = broadcaster.subscribe(move |_| s2.lock().unwrap().push("b"));

        broadcaster.publish(&make_snapshot(10.0));
        broadcaster.publish(&make_snapshot(20.0));
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "a", "b"]);
    }

    #[test]
    fn test_late_subscriber_gets_no_history() {
        let broadcaster = Broadcaster::new();
        broadcaster.publish(&make_snapshot(10.0));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let _sub = broadcaster.subscribe(move |snap| s.lock().unwrap().push(snap.progress));
        assert!(seen.lock().unwrap().is_empty());

        broadcaster.publish(&make_snapshot(30.0));
        assert_eq!(*seen.lock().unwrap(), vec![30.0]);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let broadcaster = Broadcaster::new();
        let count = Arc::new(AtomicU64::new(0));
        let c = Arc::clone(&count);
        let sub = broadcaster.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        broadcaster.publish(&make_snapshot(1.0));
        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!sub.is_active());
        broadcaster.publish(&make_snapshot(2.0));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[test]
    fn test_unsubscribe_from_inside_callback() {
        let broadcaster = Broadcaster::new();
        let count = Arc::new(AtomicU64::new(0));
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let c = Arc::clone(&count);
        let inner_slot = Arc::clone(&slot);
        let sub = broadcaster.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            if let Some(sub) = inner_slot.lock().unwrap().as_ref() {
                sub.unsubscribe();
            }
        });
        *slot.lock().unwrap() = Some(sub);

        broadcaster.publish(&make_snapshot(1.0));
        broadcaster.publish(&make_snapshot(2.0));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_earlier_subscriber_mid_publish_skips_it() {
        let broadcaster = Broadcaster::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let second_slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let s1 = Arc::clone(&seen);
        let slot = Arc::clone(&second_slot);
        let _first = broadcaster.subscribe(move |_| {
            s1.lock().unwrap().push("first");
            if let Some(sub) = slot.lock().unwrap().as_ref() {
                sub.unsubscribe();
            }
        });
        let s2 = Arc::clone(&seen);
        let second = broadcaster.subscribe(move |_| s2.lock().unwrap().push("second"));
        *second_slot.lock().unwrap() = Some(second);

        broadcaster.publish(&make_snapshot(1.0));
        assert_eq!(*seen.lock().unwrap(), vec!["first"]);
    }
}
