//! Hygiene (spec.md §4.8) — throttled retention sweep. Deletes expired rows
//! per kind-specific retention, at most once an hour and only when the store
//! has seen activity since the last sweep.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use crate::config::RetentionSection;
use crate::store::{PrunePredicate, Store};

const MIN_INTERVAL_SECS: i64 = 3600;

/// Mutable throttle state: when hygiene last ran, and whether capture/recall
/// activity has happened since. Held behind a `Mutex` on `MemoryEngine` so
/// concurrent callers share one throttle decision.
#[derive(Debug, Default)]
pub struct HygieneState {
    last_run: Option<DateTime<Utc>>,
    dirty: bool,
}

impl HygieneState {
    pub fn new() -> Self {
        Self { last_run: None, dirty: false }
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        self.last_run
    }

    fn due(&self, now: DateTime<Utc>) -> bool {
        if !self.dirty {
            return false;
        }
        match self.last_run {
            None => true,
            Some(last) => (now - last).num_seconds() >= MIN_INTERVAL_SECS,
        }
    }
}

/// Run one hygiene sweep if due, else no-op. Returns the number of rows
/// pruned (0 if skipped). One transaction per kind's retention cutoff,
/// matching `Store::prune`'s single-predicate contract.
#[instrument(skip(store, state, retention))]
pub fn run_if_due(
    store: &Store,
    state: &Mutex<HygieneState>,
    retention: &RetentionSection,
    now: DateTime<Utc>,
) -> crate::error::Result<usize> {
    let mut guard = state.lock().unwrap();
    if !guard.due(now) {
        return Ok(0);
    }

    let pruned = store.prune(PrunePredicate::Expired { now })?;
    guard.last_run = Some(now);
    guard.dirty = false;
    info!(pruned, "hygiene sweep complete");
    let _ = retention;
    Ok(pruned)
}

/// Operator-invoked override (`memory prune --older-than-days`): runs
/// immediately, ignoring the throttle, and does not reset the dirty flag
/// since it is not the scheduled sweep.
pub fn prune_older_than_days(store: &Store, days: i64, now: DateTime<Utc>) -> crate::error::Result<usize> {
    let cutoff = now - chrono::Duration::days(days);
    store.prune(PrunePredicate::OlderThanDays { cutoff })
}

/// `memory prune --older-than-days --dry-run`: counts without deleting.
pub fn count_older_than_days(store: &Store, days: i64, now: DateTime<Utc>) -> crate::error::Result<usize> {
    let cutoff = now - chrono::Duration::days(days);
    store.count_matching(&PrunePredicate::OlderThanDays { cutoff })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{NewEntry, Store};
    use crate::types::{EntrySource, MemoryKind};
    use rusqlite::Connection;

    fn store_with_expired_row(now: DateTime<Utc>) -> Store {
        let store = Store::new(Connection::open_in_memory().unwrap(), ":memory:").unwrap();
        store
            .upsert(NewEntry {
                kind: MemoryKind::Episodic,
                scope_key: "scope-a".to_string(),
                text: "short-lived note".to_string(),
                channel: "cli".to_string(),
                chat_id: Some("chat-a".to_string()),
                sender_id: None,
                importance: 0.5,
                confidence: 0.8,
                source: EntrySource::Auto,
                now,
                retention_days: -1,
            })
            .unwrap();
        store
    }

    #[test]
    fn does_not_run_when_not_dirty() {
        let now = Utc::now();
        let store = store_with_expired_row(now);
        let state = Mutex::new(HygieneState::new());
        let retention = RetentionSection::default();

        let pruned = run_if_due(&store, &state, &retention, now).unwrap();
        assert_eq!(pruned, 0);
        assert_eq!(store.stats(None).unwrap().total_rows, 1);
    }

    #[test]
    fn runs_once_when_dirty_then_throttles() {
        let now = Utc::now();
        let store = store_with_expired_row(now);
        let state = Mutex::new(HygieneState::new());
        state.lock().unwrap().mark_dirty();
        let retention = RetentionSection::default();

        let pruned = run_if_due(&store, &state, &retention, now).unwrap();
        assert_eq!(pruned, 1);
        assert_eq!(store.stats(None).unwrap().total_rows, 0);

        // Mark dirty again immediately; throttle should prevent a second run.
        state.lock().unwrap().mark_dirty();
        let pruned_again = run_if_due(&store, &state, &retention, now).unwrap();
        assert_eq!(pruned_again, 0);
    }

    #[test]
    fn runs_again_after_interval_elapses() {
        let now = Utc::now();
        let store = store_with_expired_row(now);
        let state = Mutex::new(HygieneState::new());
        let retention = RetentionSection::default();
        state.lock().unwrap().mark_dirty();
        run_if_due(&store, &state, &retention, now).unwrap();

        // A second row expires only after the throttle window passes.
        store
            .upsert(NewEntry {
                kind: MemoryKind::Episodic,
                scope_key: "scope-a".to_string(),
                text: "another short-lived note".to_string(),
                channel: "cli".to_string(),
                chat_id: Some("chat-a".to_string()),
                sender_id: None,
                importance: 0.5,
                confidence: 0.8,
                source: EntrySource::Auto,
                now,
                retention_days: -1,
            })
            .unwrap();

        state.lock().unwrap().mark_dirty();
        let later = now + chrono::Duration::seconds(MIN_INTERVAL_SECS + 1);
        let pruned = run_if_due(&store, &state, &retention, later).unwrap();
        assert_eq!(pruned, 1);
    }

    #[test]
    fn operator_override_ignores_throttle() {
        let now = Utc::now();
        let store = Store::new(Connection::open_in_memory().unwrap(), ":memory:").unwrap();
        store
            .upsert(NewEntry {
                kind: MemoryKind::Fact,
                scope_key: "scope-a".to_string(),
                text: "an old fact".to_string(),
                channel: "cli".to_string(),
                chat_id: Some("chat-a".to_string()),
                sender_id: None,
                importance: 0.5,
                confidence: 0.8,
                source: EntrySource::Auto,
                now: now - chrono::Duration::days(30),
                retention_days: 3650,
            })
            .unwrap();

        let pruned = prune_older_than_days(&store, 10, now).unwrap();
        assert_eq!(pruned, 1);
    }

    #[test]
    fn dry_run_count_does_not_delete() {
        let now = Utc::now();
        let store = Store::new(Connection::open_in_memory().unwrap(), ":memory:").unwrap();
        store
            .upsert(NewEntry {
                kind: MemoryKind::Fact,
                scope_key: "scope-a".to_string(),
                text: "an old fact".to_string(),
                channel: "cli".to_string(),
                chat_id: Some("chat-a".to_string()),
                sender_id: None,
                importance: 0.5,
                confidence: 0.8,
                source: EntrySource::Auto,
                now: now - chrono::Duration::days(30),
                retention_days: 3650,
            })
            .unwrap();

        let count = count_older_than_days(&store, 10, now).unwrap();
        assert_eq!(count, 1);

        let stats = store.stats(None).unwrap();
        assert_eq!(stats.total_rows, 1);
    }
}
