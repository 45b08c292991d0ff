//! In-process alert lifecycle management (C4): deduplication, counters, and
//! change notification, layered over the durable `AlertStore`.
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{Duration as ChronoDuration, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::alert::{Alert, Category, DedupKey, Severity, Status};
use crate::error::StoreError;
use crate::store::{AlertStore, TransitionOutcome};

type ChangeCallback = Box<dyn Fn(&Alert) + Send + Sync>;

#[derive(Default)]
struct Counters {
    info: AtomicU64,
    warning: AtomicU64,
    error: AtomicU64,
    critical: AtomicU64,
    total: AtomicU64,
}

impl Counters {
    fn get(&self, severity: Severity) -> &AtomicU64 {
        match severity {
            Severity::Info => &self.info,
            Severity::Warning => &self.warning,
            Severity::Error => &self.error,
            Severity::Critical => &self.critical,
        }
    }

    fn increment(&self, severity: Severity) {
        self.get(severity).fetch_add(1, Ordering::SeqCst);
        self.total.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement(&self, severity: Severity) {
        self.get(severity).fetch_sub(1, Ordering::SeqCst);
        self.total.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Snapshot of active-alert counts by severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlertCounts {
    /// Active informational alerts.
    pub info: u64,
    /// Active warning alerts.
    pub warning: u64,
    /// Active error alerts.
    pub error: u64,
    /// Active critical alerts.
    pub critical: u64,
    /// Total active alerts across all severities.
    pub total: u64,
}

/// Coordinates alert creation, deduplication, and lifecycle transitions.
///
/// Two locks guard disjoint state: `active_keys` guards the in-memory dedup
/// set and severity counters, `store` guards the database connection.
/// `raise` and `acknowledge_all_active` hold `active_keys` across their
/// entire critical section, including the store write, so the two can never
/// interleave: either a raise is fully visible (key, row, and counter all
/// present) before a bulk acknowledge runs, or it happens after. Single-row
/// transitions (`acknowledge`, `dismiss`) instead release `active_keys`
/// before touching the store and re-acquire it afterward to drop the
/// dedup key; this is safe because the store itself guards the legality of
/// the transition under its own lock (see `AlertStore::transition_status`),
/// so the in-between window can't resurrect a terminal status. Locks are
/// always acquired in the order `active_keys` before `store`, never the
/// reverse, so no deadlock is possible.
pub struct AlertManager {
    store: Arc<AlertStore>,
    active_keys: Mutex<HashSet<DedupKey>>,
    counters: Counters,
    subscribers: Mutex<Vec<ChangeCallback>>,
}

impl AlertManager {
    /// Builds a manager over `store`, replaying the store's existing active
    /// alerts into the in-memory dedup set and counters.
    pub fn new(store: Arc<AlertStore>) -> Result<Self, StoreError> {
        let manager = Self {
            store,
            active_keys: Mutex::new(HashSet::new()),
            counters: Counters::default(),
            subscribers: Mutex::new(Vec::new()),
        };
        manager.rebuild_from_store()?;
        Ok(manager)
    }

    fn rebuild_from_store(&self) -> Result<(), StoreError> {
        let active = self.store.active_sources()?;
        let mut keys = self.active_keys.lock().unwrap_or_else(|p| p.into_inner());
        for alert in &active {
            keys.insert(DedupKey::from_alert(alert));
            self.counters.increment(alert.severity);
        }
        Ok(())
    }

    /// Raises a new alert unless an active alert already exists for the same
    /// `(category, severity, source, message)` key, in which case the
    /// existing alert's id is returned without writing a duplicate row.
    pub fn raise(
        &self,
        severity: Severity,
        category: Category,
        source: &str,
        message: &str,
    ) -> Result<Uuid, StoreError> {
        let key = DedupKey::new(category, severity, source, message);
        let mut keys = self.active_keys.lock().unwrap_or_else(|p| p.into_inner());

        if !keys.insert(key.clone()) {
            debug!(?category, ?severity, source, "suppressing duplicate active alert");
            drop(keys);
            let existing = self
                .store
                .active_sources()?
                .into_iter()
                .find(|a| DedupKey::from_alert(a) == key)
                .map(|a| a.id);
            if let Some(id) = existing {
                return Ok(id);
            }
            // Key reserved in-memory but no backing active row (e.g. a
            // retention sweep raced the original insert); fall through and
            // raise fresh below, reusing the already-held reservation.
            keys = self.active_keys.lock().unwrap_or_else(|p| p.into_inner());
        }

        let alert = Alert::new(severity, category, source, message);
        if let Err(err) = self.store.insert(&alert) {
            keys.remove(&key);
            return Err(err);
        }

        // Counter increment happens under the same `active_keys` guard as
        // the key reservation and the store insert, so `acknowledge_all_active`
        // can never observe the key/counter/row in a partial state.
        self.counters.increment(severity);
        drop(keys);
        self.notify(&alert);
        info!(id = %alert.id, ?severity, ?category, source, "alert raised");
        Ok(alert.id)
    }

    /// Withdraws a previously raised active alert's dedup reservation
    /// without changing its stored status. Used when a downgraded or
    /// cleared condition means a key should no longer be considered active
    /// even though the historical row remains.
    fn release_key(&self, alert: &Alert) {
        let key = DedupKey::from_alert(alert);
        let mut keys = self.active_keys.lock().unwrap_or_else(|p| p.into_inner());
        if keys.remove(&key) {
            self.counters.decrement(alert.severity);
        }
    }

    /// Marks an alert acknowledged. Legal only from `Active`; a no-op if the
    /// alert is already `Acknowledged` or `Dismissed` (dismissed is
    /// terminal), since applying it unconditionally could stamp
    /// `acknowledged_at` after an existing `dismissed_at`.
    pub fn acknowledge(&self, id: Uuid) -> Result<(), StoreError> {
        let outcome = self.store.transition_status(id, &[Status::Active], Status::Acknowledged)?;
        if outcome == TransitionOutcome::Applied {
            let alert = self.store.get(id)?;
            self.release_key(&alert);
        }
        Ok(())
    }

    /// Marks an alert dismissed. Legal from `Active` or `Acknowledged`; a
    /// no-op if already `Dismissed`, since dismissed is terminal.
    pub fn dismiss(&self, id: Uuid) -> Result<(), StoreError> {
        let outcome =
            self.store
                .transition_status(id, &[Status::Active, Status::Acknowledged], Status::Dismissed)?;
        if outcome == TransitionOutcome::Applied {
            let alert = self.store.get(id)?;
            self.release_key(&alert);
        }
        Ok(())
    }

    /// Replaces an alert's long description, used to attach enricher
    /// output after the alert has already been created.
    pub fn set_description(&self, id: Uuid, description: &str) -> Result<(), StoreError> {
        self.store.set_description(id, description)
    }

    /// Acknowledges every currently active alert in a single operation,
    /// returning the number acknowledged. `active_keys` is held across both
    /// the store's bulk row update and the dedup-set clear/counter reset, the
    /// same lock `raise` holds across its own key reservation, store insert,
    /// and counter increment, so the two can never interleave. A concurrent
    /// `raise` either completes entirely before this runs (its row gets
    /// swept up by the bulk update) or entirely after (untouched by it).
    pub fn acknowledge_all_active(&self) -> Result<u64, StoreError> {
        let mut keys = self.active_keys.lock().unwrap_or_else(|p| p.into_inner());
        let changed = self.store.update_status_bulk(Status::Active, Status::Acknowledged)?;
        keys.clear();
        self.counters.info.store(0, Ordering::SeqCst);
        self.counters.warning.store(0, Ordering::SeqCst);
        self.counters.error.store(0, Ordering::SeqCst);
        self.counters.critical.store(0, Ordering::SeqCst);
        self.counters.total.store(0, Ordering::SeqCst);
        Ok(changed)
    }

    /// Deletes every alert older than `retention_hours`, regardless of
    /// status. Any still-active alert swept up by this purge has its dedup
    /// reservation released first, under `active_keys`, so the key becomes
    /// eligible to re-fire even though the row backing it is now gone.
    pub fn cleanup_older_than(&self, retention_hours: u64) -> Result<u64, StoreError> {
        let cutoff = Utc::now() - ChronoDuration::hours(retention_hours as i64);
        let expiring_active: Vec<_> = self
            .store
            .active_sources()?
            .into_iter()
            .filter(|a| a.created_at < cutoff)
            .collect();
        for alert in &expiring_active {
            self.release_key(alert);
        }
        self.store.delete_older_than(cutoff)
    }

    /// Returns a snapshot of active-alert counts by severity.
    pub fn counts(&self) -> AlertCounts {
        AlertCounts {
            info: self.counters.info.load(Ordering::SeqCst),
            warning: self.counters.warning.load(Ordering::SeqCst),
            error: self.counters.error.load(Ordering::SeqCst),
            critical: self.counters.critical.load(Ordering::SeqCst),
            total: self.counters.total.load(Ordering::SeqCst),
        }
    }

    /// Returns a single alert by id.
    pub fn get(&self, id: Uuid) -> Result<Alert, StoreError> {
        self.store.get(id)
    }

    /// Lists alerts, optionally filtered by status.
    pub fn list(&self, status: Option<Status>) -> Result<Vec<Alert>, StoreError> {
        self.store.list(status)
    }

    /// Registers a callback invoked whenever a new alert is raised.
    pub fn on_alert<F>(&self, callback: F)
    where
        F: Fn(&Alert) + Send + Sync + 'static,
    {
        self.subscribers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(Box::new(callback));
    }

    fn notify(&self, alert: &Alert) {
        let subscribers = self.subscribers.lock().unwrap_or_else(|p| p.into_inner());
        for callback in subscribers.iter() {
            callback(alert);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn manager() -> AlertManager {
        let store = Arc::new(AlertStore::open_in_memory().expect("open"));
        AlertManager::new(store).expect("manager")
    }

    #[test]
    fn raise_deduplicates_identical_active_alerts() {
        let manager = manager();
        let first = manager
            .raise(Severity::Warning, Category::Cpu, "cpu0", "load high")
            .expect("raise");
        let second = manager
            .raise(Severity::Warning, Category::Cpu, "cpu0", "load high")
            .expect("raise");
        assert_eq!(first, second);
        assert_eq!(manager.counts().warning, 1);
    }

    #[test]
    fn raise_allows_distinct_sources() {
        let manager = manager();
        manager
            .raise(Severity::Warning, Category::Cpu, "cpu0", "load high")
            .expect("raise cpu0");
        manager
            .raise(Severity::Warning, Category::Cpu, "cpu1", "load high")
            .expect("raise cpu1");
        assert_eq!(manager.counts().warning, 2);
    }

    #[test]
    fn acknowledge_releases_dedup_key_allowing_rerase() {
        let manager = manager();
        let id = manager
            .raise(Severity::Critical, Category::Disk, "/", "disk full")
            .expect("raise");
        manager.acknowledge(id).expect("ack");
        assert_eq!(manager.counts().critical, 0);

        let second = manager
            .raise(Severity::Critical, Category::Disk, "/", "disk full")
            .expect("re-raise");
        assert_ne!(id, second);
        assert_eq!(manager.counts().critical, 1);
    }

    #[test]
    fn acknowledge_on_a_dismissed_alert_is_a_no_op() {
        let manager = manager();
        let id = manager
            .raise(Severity::Critical, Category::Disk, "/", "disk full")
            .expect("raise");
        manager.dismiss(id).expect("dismiss");

        manager.acknowledge(id).expect("ack is a no-op, not an error");
        let alert = manager.get(id).expect("get");
        assert_eq!(alert.status, Status::Dismissed);
        assert!(alert.acknowledged_at.is_none());
    }

    #[test]
    fn acknowledge_all_active_clears_counters_and_keys() {
        let manager = manager();
        manager
            .raise(Severity::Warning, Category::Cpu, "cpu0", "hot")
            .expect("raise");
        manager
            .raise(Severity::Critical, Category::Memory, "mem", "oom risk")
            .expect("raise");

        let changed = manager.acknowledge_all_active().expect("bulk ack");
        assert_eq!(changed, 2);
        assert_eq!(manager.counts(), AlertCounts::default());
    }

    #[test]
    fn cleanup_releases_dedup_key_for_purged_active_alert() {
        let manager = manager();
        manager
            .raise(Severity::Warning, Category::Cpu, "cpu0", "hot")
            .expect("raise");
        let key = DedupKey::new(Category::Cpu, Severity::Warning, "cpu0", "hot");
        assert!(manager.active_keys.lock().unwrap().contains(&key));

        // retention_hours=0 makes the cutoff "now", which is already past the
        // alert's creation instant.
        std::thread::sleep(std::time::Duration::from_millis(5));
        let deleted = manager.cleanup_older_than(0).expect("cleanup");
        assert_eq!(deleted, 1);
        assert!(!manager.active_keys.lock().unwrap().contains(&key));
        assert_eq!(manager.counts().warning, 0);
    }

    #[test]
    fn on_alert_subscriber_is_invoked_on_raise() {
        let manager = manager();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        manager.on_alert(move |_alert| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        });

        manager
            .raise(Severity::Info, Category::Service, "sshd", "restarted")
            .expect("raise");
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
