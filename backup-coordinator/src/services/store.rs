//! The task store: single source of truth for unit state.
//!
//! All unit mutation is linearized by one lock. Schedulers and agents
//! never hold private unit copies that could diverge; they go through
//! the synchronized operations here. `claim_next_pending` is the
//! mutual-exclusion point that guarantees no unit is ever worked on by
//! two agents at once.

use crate::error::CoordinationError;
use crate::models::unit::{BackupUnit, UnitStatus};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

type ChangeHook = Arc<dyn Fn() + Send + Sync>;

pub struct TaskStore {
    inner: Mutex<Vec<BackupUnit>>,
    on_change: Mutex<Option<ChangeHook>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Vec::new()),
            on_change: Mutex::new(None),
        }
    }

    /// Install the persistence hook, invoked after every state
    /// transition and after progress crosses a 10% step.
    pub fn set_change_hook(&self, hook: ChangeHook) {
        *self.on_change.lock().unwrap() = Some(hook);
    }

    fn notify_change(&self) {
        let hook = self.on_change.lock().unwrap().clone();
        if let Some(hook) = hook {
            hook();
        }
    }

    /// Append a unit in caller-provided order. Unit names are unique
    /// within a session.
    pub fn add_unit(&self, unit: BackupUnit) -> Result<(), CoordinationError> {
        {
            let mut units = self.inner.lock().unwrap();
            if units.iter().any(|u| u.name == unit.name) {
                return Err(CoordinationError::DuplicateUnit(unit.name));
            }
            units.push(unit);
        }
        self.notify_change();
        Ok(())
    }

    /// Replace the whole unit table (initial population or restore).
    pub fn replace_units(&self, new_units: Vec<BackupUnit>) {
        {
            let mut units = self.inner.lock().unwrap();
            *units = new_units;
        }
        self.notify_change();
    }

    /// Atomically claim the highest-priority selected pending unit,
    /// marking it `assigned`. At most one caller can claim a given
    /// unit; concurrent callers get distinct units or `None`.
    pub fn claim_next_pending(&self) -> Option<BackupUnit> {
        let claimed = {
            let mut units = self.inner.lock().unwrap();
            let index = units
                .iter()
                .enumerate()
                .filter(|(_, u)| u.selected && u.status == UnitStatus::Pending)
                .max_by(|(ia, a), (ib, b)| {
                    // Highest priority wins; earlier catalog position
                    // breaks ties.
                    a.priority.cmp(&b.priority).then(ib.cmp(ia))
                })
                .map(|(i, _)| i)?;

            let unit = &mut units[index];
            unit.status = UnitStatus::Assigned;
            unit.assigned_agent = None;
            Some(unit.clone())
        };

        if claimed.is_some() {
            self.notify_change();
        }
        claimed
    }

    /// Record which agent accepted the handoff of a claimed unit.
    pub fn assign_to(&self, unit_id: &str, agent_id: &str) -> Result<(), CoordinationError> {
        {
            let mut units = self.inner.lock().unwrap();
            let unit = find_mut(&mut units, unit_id)?;
            if unit.status != UnitStatus::Assigned {
                warn!(unit = %unit.name, status = ?unit.status, "assign_to on unclaimed unit");
                return Ok(());
            }
            unit.assigned_agent = Some(agent_id.to_string());
        }
        self.notify_change();
        Ok(())
    }

    /// Return a claimed-but-not-started unit to the pending queue, e.g.
    /// after a rejected handoff. Does not count as a retry.
    pub fn release_claim(&self, unit_id: &str) -> Result<(), CoordinationError> {
        {
            let mut units = self.inner.lock().unwrap();
            let unit = find_mut(&mut units, unit_id)?;
            if unit.status != UnitStatus::Assigned {
                return Ok(());
            }
            unit.status = UnitStatus::Pending;
            unit.assigned_agent = None;
        }
        self.notify_change();
        Ok(())
    }

    /// Apply a progress report. A unit that is neither assigned nor
    /// in-progress has been reassigned or finished since the report was
    /// produced; such stale updates are rejected, not applied. Returns
    /// whether the update was applied.
    pub fn update_progress(
        &self,
        unit_id: &str,
        percent: u8,
        bytes_copied: u64,
        file_count: Option<u64>,
    ) -> bool {
        let (applied, step_crossed) = {
            let mut units = self.inner.lock().unwrap();
            let Some(unit) = units.iter_mut().find(|u| u.id == unit_id) else {
                return false;
            };
            if !unit.status.is_claimed() {
                debug!(unit = %unit.name, status = ?unit.status, "dropping stale progress update");
                return false;
            }

            let mut transitioned = false;
            if unit.status == UnitStatus::Assigned {
                unit.status = UnitStatus::InProgress;
                unit.start_time = Some(chrono::Utc::now().timestamp());
                transitioned = true;
            }

            let old_percent = unit.progress;
            unit.progress = percent.min(100);
            unit.size_copied = if unit.size > 0 {
                bytes_copied.min(unit.size)
            } else {
                bytes_copied
            };
            if file_count.is_some() {
                unit.file_count = file_count;
            }

            (true, transitioned || old_percent / 10 != unit.progress / 10)
        };

        if step_crossed {
            self.notify_change();
        }
        applied
    }

    /// Transition a unit to a terminal (or retry) state. On success the
    /// duration and average throughput are frozen; on failure the retry
    /// policy applies: back to `pending` with degraded priority while
    /// retries remain, permanently `failed` after that.
    ///
    /// Reports for units that are no longer claimed are dropped; the
    /// returned status is the unit's current one either way.
    pub fn complete(
        &self,
        unit_id: &str,
        success: bool,
        error: Option<String>,
        file_count: Option<u64>,
    ) -> Result<UnitStatus, CoordinationError> {
        let status = {
            let mut units = self.inner.lock().unwrap();
            let unit = find_mut(&mut units, unit_id)?;

            if !unit.status.is_claimed() {
                warn!(unit = %unit.name, status = ?unit.status, "dropping stale completion report");
                return Ok(unit.status);
            }

            let now = chrono::Utc::now().timestamp();
            if file_count.is_some() {
                unit.file_count = file_count;
            }

            if success {
                unit.status = UnitStatus::Completed;
                unit.progress = 100;
                unit.size_copied = unit.size;
                unit.end_time = Some(now);
                let duration = unit
                    .start_time
                    .map(|start| (now - start).max(0) as u64)
                    .unwrap_or(0);
                unit.duration_secs = Some(duration);
                if duration > 0 {
                    unit.average_speed = Some(unit.size_copied / duration);
                }
                unit.error_message = None;
            } else {
                unit.error_message = error;
                if unit.retry_count < unit.max_retries {
                    unit.retry_count += 1;
                    unit.priority = unit.priority.saturating_sub(10);
                    unit.status = UnitStatus::Pending;
                    unit.assigned_agent = None;
                    unit.progress = 0;
                    unit.size_copied = 0;
                    debug!(
                        unit = %unit.name,
                        retry = unit.retry_count,
                        max = unit.max_retries,
                        "unit failed, queued for retry"
                    );
                } else {
                    unit.status = UnitStatus::Failed;
                    unit.end_time = Some(now);
                }
            }

            unit.status
        };

        self.notify_change();
        Ok(status)
    }

    /// Explicit cancellation. Applies to any non-terminal state;
    /// cancelling an already-terminal unit is a no-op.
    pub fn cancel(&self, unit_id: &str) -> Result<UnitStatus, CoordinationError> {
        let status = {
            let mut units = self.inner.lock().unwrap();
            let unit = find_mut(&mut units, unit_id)?;
            if unit.is_terminal() {
                return Ok(unit.status);
            }
            unit.status = UnitStatus::Cancelled;
            unit.end_time = Some(chrono::Utc::now().timestamp());
            unit.status
        };
        self.notify_change();
        Ok(status)
    }

    /// Reassign everything a dead agent held back to `pending`. This is
    /// the recovery path for a crashed or partitioned worker; the units
    /// become visibly pending again within one eviction cycle.
    pub fn release_units_for(&self, agent_id: &str) -> Vec<String> {
        let released: Vec<String> = {
            let mut units = self.inner.lock().unwrap();
            units
                .iter_mut()
                .filter(|u| {
                    u.status.is_claimed() && u.assigned_agent.as_deref() == Some(agent_id)
                })
                .map(|u| {
                    u.status = UnitStatus::Pending;
                    u.assigned_agent = None;
                    u.progress = 0;
                    u.size_copied = 0;
                    u.name.clone()
                })
                .collect()
        };

        if !released.is_empty() {
            self.notify_change();
        }
        released
    }

    /// Update the selection set; unnamed units are deselected.
    pub fn select_units(&self, names: &[String]) {
        {
            let mut units = self.inner.lock().unwrap();
            for unit in units.iter_mut() {
                unit.selected = names.iter().any(|n| n == &unit.name);
            }
        }
        self.notify_change();
    }

    pub fn get(&self, unit_id: &str) -> Option<BackupUnit> {
        let units = self.inner.lock().unwrap();
        units.iter().find(|u| u.id == unit_id).cloned()
    }

    /// Ordered snapshot of all units.
    pub fn snapshot(&self) -> Vec<BackupUnit> {
        self.inner.lock().unwrap().clone()
    }

    /// Total declared size of selected units.
    pub fn total_size(&self) -> u64 {
        let units = self.inner.lock().unwrap();
        units.iter().filter(|u| u.selected).map(|u| u.size).sum()
    }

    /// Bytes copied so far across all units.
    pub fn completed_size(&self) -> u64 {
        let units = self.inner.lock().unwrap();
        units.iter().map(|u| u.size_copied).sum()
    }

    /// Whether every selected unit has reached a terminal state.
    pub fn all_selected_terminal(&self) -> bool {
        let units = self.inner.lock().unwrap();
        let mut any = false;
        for unit in units.iter().filter(|u| u.selected) {
            any = true;
            if !unit.is_terminal() {
                return false;
            }
        }
        any
    }
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new()
    }
}

fn find_mut<'a>(
    units: &'a mut [BackupUnit],
    unit_id: &str,
) -> Result<&'a mut BackupUnit, CoordinationError> {
    units
        .iter_mut()
        .find(|u| u.id == unit_id)
        .ok_or_else(|| CoordinationError::UnknownUnit(unit_id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn store_with(names: &[&str]) -> TaskStore {
        let store = TaskStore::new();
        for name in names {
            store
                .add_unit(BackupUnit::new(
                    *name,
                    PathBuf::from("/home/u").join(name),
                    100,
                    3,
                ))
                .unwrap();
        }
        store
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let store = store_with(&["Documents"]);
        let err = store
            .add_unit(BackupUnit::new(
                "Documents",
                PathBuf::from("/home/u/Documents"),
                1,
                3,
            ))
            .unwrap_err();
        assert!(matches!(err, CoordinationError::DuplicateUnit(_)));
    }

    #[test]
    fn claim_marks_assigned_and_respects_priority() {
        let store = TaskStore::new();
        let mut small = BackupUnit::new("small", PathBuf::from("/s"), 10, 3);
        small.priority = 100;
        let mut large = BackupUnit::new("large", PathBuf::from("/l"), 10, 3);
        large.priority = 40;
        store.add_unit(large).unwrap();
        store.add_unit(small).unwrap();

        let first = store.claim_next_pending().unwrap();
        assert_eq!(first.name, "small");
        assert_eq!(first.status, UnitStatus::Assigned);

        let second = store.claim_next_pending().unwrap();
        assert_eq!(second.name, "large");

        assert!(store.claim_next_pending().is_none());
    }

    #[test]
    fn claim_ties_break_by_catalog_order() {
        let store = store_with(&["zeta", "beta", "alpha"]);
        assert_eq!(store.claim_next_pending().unwrap().name, "zeta");
        assert_eq!(store.claim_next_pending().unwrap().name, "beta");
        assert_eq!(store.claim_next_pending().unwrap().name, "alpha");
    }

    #[test]
    fn claim_skips_unselected_units() {
        let store = store_with(&["a", "b"]);
        store.select_units(&["b".to_string()]);
        assert_eq!(store.claim_next_pending().unwrap().name, "b");
        assert!(store.claim_next_pending().is_none());
    }

    #[test]
    fn concurrent_claims_never_hand_out_the_same_unit() {
        let names: Vec<String> = (0..64).map(|i| format!("dir{i:02}")).collect();
        let store = Arc::new(TaskStore::new());
        for name in &names {
            store
                .add_unit(BackupUnit::new(
                    name.clone(),
                    PathBuf::from("/home/u").join(name),
                    100,
                    3,
                ))
                .unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                let mut claimed = Vec::new();
                while let Some(unit) = store.claim_next_pending() {
                    claimed.push(unit.id);
                }
                claimed
            }));
        }

        let mut all: Vec<String> = Vec::new();
        for handle in handles {
            all.extend(handle.join().unwrap());
        }

        let distinct: HashSet<&String> = all.iter().collect();
        assert_eq!(all.len(), names.len(), "every unit claimed exactly once");
        assert_eq!(distinct.len(), names.len(), "no unit claimed twice");
    }

    #[test]
    fn n_claims_yield_n_distinct_units() {
        let store = store_with(&["a", "b", "c", "d", "e"]);
        let mut seen = HashSet::new();
        for _ in 0..5 {
            assert!(seen.insert(store.claim_next_pending().unwrap().id));
        }
        assert!(store.claim_next_pending().is_none());
    }

    #[test]
    fn progress_promotes_assigned_to_in_progress() {
        let store = store_with(&["a"]);
        let unit = store.claim_next_pending().unwrap();
        store.assign_to(&unit.id, "agent-1").unwrap();

        assert!(store.update_progress(&unit.id, 40, 40, Some(3)));
        let unit = store.get(&unit.id).unwrap();
        assert_eq!(unit.status, UnitStatus::InProgress);
        assert_eq!(unit.progress, 40);
        assert_eq!(unit.size_copied, 40);
        assert_eq!(unit.file_count, Some(3));
        assert!(unit.start_time.is_some());
    }

    #[test]
    fn stale_progress_after_reassignment_is_rejected() {
        let store = store_with(&["a"]);
        let unit = store.claim_next_pending().unwrap();
        store.assign_to(&unit.id, "agent-1").unwrap();
        store.update_progress(&unit.id, 30, 30, None);

        // Agent dies; unit is reassigned to pending.
        let released = store.release_units_for("agent-1");
        assert_eq!(released, vec!["a".to_string()]);

        // Its late report must not be applied.
        assert!(!store.update_progress(&unit.id, 90, 90, None));
        let unit = store.get(&unit.id).unwrap();
        assert_eq!(unit.status, UnitStatus::Pending);
        assert_eq!(unit.progress, 0);
    }

    #[test]
    fn bytes_copied_cannot_exceed_declared_size() {
        let store = store_with(&["a"]);
        let unit = store.claim_next_pending().unwrap();
        store.update_progress(&unit.id, 100, 5000, None);
        assert_eq!(store.get(&unit.id).unwrap().size_copied, 100);
    }

    #[test]
    fn retry_policy_stops_exactly_at_max_retries() {
        let store = store_with(&["a"]);
        let id = store.snapshot()[0].id.clone();

        for attempt in 1..=3 {
            let unit = store.claim_next_pending().expect("still retryable");
            assert_eq!(unit.id, id);
            let status = store
                .complete(&id, false, Some("sync tool exited with code 23".into()), None)
                .unwrap();
            assert_eq!(status, UnitStatus::Pending, "attempt {attempt} re-queued");
            assert_eq!(store.get(&id).unwrap().retry_count, attempt);
        }

        // Retries exhausted: the next failure is terminal.
        store.claim_next_pending().unwrap();
        let status = store.complete(&id, false, Some("boom".into()), None).unwrap();
        assert_eq!(status, UnitStatus::Failed);
        assert_eq!(store.get(&id).unwrap().retry_count, 3);

        // Permanently failed: nothing left to claim.
        assert!(store.claim_next_pending().is_none());
    }

    #[test]
    fn retry_degrades_priority() {
        let store = store_with(&["a"]);
        let before = store.snapshot()[0].priority;
        let unit = store.claim_next_pending().unwrap();
        store.complete(&unit.id, false, None, None).unwrap();
        assert_eq!(store.get(&unit.id).unwrap().priority, before - 10);
    }

    #[test]
    fn success_freezes_duration_and_throughput() {
        let store = store_with(&["a"]);
        let unit = store.claim_next_pending().unwrap();
        store.update_progress(&unit.id, 50, 50, None);
        let status = store.complete(&unit.id, true, None, Some(12)).unwrap();
        assert_eq!(status, UnitStatus::Completed);

        let unit = store.get(&unit.id).unwrap();
        assert_eq!(unit.progress, 100);
        assert_eq!(unit.size_copied, unit.size);
        assert_eq!(unit.file_count, Some(12));
        assert!(unit.duration_secs.is_some());
        assert!(unit.end_time.is_some());
    }

    #[test]
    fn stale_completion_is_dropped() {
        let store = store_with(&["a"]);
        let unit = store.claim_next_pending().unwrap();
        store.release_units_for("nobody"); // no-op, unit has no agent
        store.release_claim(&unit.id).unwrap();

        let status = store.complete(&unit.id, true, None, None).unwrap();
        assert_eq!(status, UnitStatus::Pending, "completion not applied");
    }

    #[test]
    fn cancel_covers_non_terminal_states_only() {
        let store = store_with(&["a", "b"]);
        let a = store.snapshot()[0].id.clone();
        let b = store.snapshot()[1].id.clone();

        assert_eq!(store.cancel(&a).unwrap(), UnitStatus::Cancelled);

        let unit = store.claim_next_pending().unwrap();
        assert_eq!(unit.id, b);
        store.complete(&b, true, None, None).unwrap();
        assert_eq!(store.cancel(&b).unwrap(), UnitStatus::Completed);
    }

    #[test]
    fn unknown_unit_is_an_error() {
        let store = store_with(&["a"]);
        assert!(matches!(
            store.complete("missing", true, None, None),
            Err(CoordinationError::UnknownUnit(_))
        ));
        assert!(matches!(
            store.cancel("missing"),
            Err(CoordinationError::UnknownUnit(_))
        ));
    }

    #[test]
    fn change_hook_throttles_progress_to_ten_percent_steps() {
        let store = store_with(&["a"]);
        let unit = store.claim_next_pending().unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        store.set_change_hook(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        store.update_progress(&unit.id, 3, 3, None); // promotion fires
        let after_promotion = fired.load(Ordering::SeqCst);
        assert_eq!(after_promotion, 1);

        store.update_progress(&unit.id, 5, 5, None); // same step, no fire
        assert_eq!(fired.load(Ordering::SeqCst), after_promotion);

        store.update_progress(&unit.id, 12, 12, None); // crossed 10%
        assert_eq!(fired.load(Ordering::SeqCst), after_promotion + 1);

        store.complete(&unit.id, true, None, None).unwrap(); // transition fires
        assert_eq!(fired.load(Ordering::SeqCst), after_promotion + 2);
    }

    #[test]
    fn aggregates_track_selected_units() {
        let store = store_with(&["a", "b", "c"]);
        store.select_units(&["a".to_string(), "b".to_string()]);
        assert_eq!(store.total_size(), 200);
        assert!(!store.all_selected_terminal());

        for unit in store.snapshot() {
            if unit.selected {
                let claimed = store.claim_next_pending().unwrap();
                store.complete(&claimed.id, true, None, None).unwrap();
            }
        }
        assert!(store.all_selected_terminal());
    }
}
