//! Cooldown Table
//!
//! Live expiry instants per actor and action. Times are milliseconds since the
//! Unix epoch and every operation takes `now` explicitly, so the table holds no
//! clock of its own.
//!
//! Global-mode expiries sit beside the action map in the same per-actor slot,
//! so no action key can reach them and one lock covers both checks.

use std::collections::{BTreeMap, HashMap};

use dashmap::DashMap;

use super::model::{ActionKey, ActorId};

/// Owned copy of live action entries, ordered for stable output
pub type TableSnapshot = BTreeMap<ActorId, BTreeMap<ActionKey, i64>>;

#[derive(Debug, Default)]
struct ActorSlot {
    actions: HashMap<ActionKey, i64>,
    global: Option<i64>,
}

impl ActorSlot {
    fn is_empty(&self) -> bool {
        self.actions.is_empty() && self.global.is_none()
    }

    fn len(&self) -> usize {
        self.actions.len() + usize::from(self.global.is_some())
    }

    /// Drop lapsed entries; returns how many went
    fn retain_live(&mut self, now_ms: i64) -> usize {
        let before = self.len();
        self.actions.retain(|_, expiry| *expiry > now_ms);
        if self.global.is_some_and(|expiry| expiry <= now_ms) {
            self.global = None;
        }
        before - self.len()
    }
}

/// Per-actor map of action to expiry, plus the actor's global expiry
#[derive(Debug, Default)]
pub struct CooldownTable {
    entries: DashMap<ActorId, ActorSlot>,
}

impl CooldownTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whole seconds left, rounded up; 0 when no live entry exists
    pub fn remaining(&self, actor: &ActorId, action: &ActionKey, now_ms: i64) -> u64 {
        self.expiry(actor, action)
            .map(|expiry| remaining_seconds(expiry, now_ms))
            .unwrap_or(0)
    }

    pub fn global_remaining(&self, actor: &ActorId, now_ms: i64) -> u64 {
        self.entries
            .get(actor)
            .and_then(|slot| slot.global)
            .map(|expiry| remaining_seconds(expiry, now_ms))
            .unwrap_or(0)
    }

    pub fn expiry(&self, actor: &ActorId, action: &ActionKey) -> Option<i64> {
        self.entries
            .get(actor)
            .and_then(|slot| slot.actions.get(action).copied())
    }

    /// Start a cooldown of `seconds` from `now_ms`, replacing any previous one.
    ///
    /// Returns the expiry written, or `None` for a zero duration.
    pub fn commit(
        &self,
        actor: &ActorId,
        action: &ActionKey,
        seconds: u64,
        now_ms: i64,
    ) -> Option<i64> {
        if seconds == 0 {
            return None;
        }

        let expiry = expiry_after(seconds, now_ms);
        self.entries
            .entry(*actor)
            .or_default()
            .actions
            .insert(action.clone(), expiry);
        Some(expiry)
    }

    /// Check and commit in one step under the actor's slot lock.
    ///
    /// Fails with the larger remaining time when the action, or the global
    /// expiry while `global_seconds` is set, is still live. Otherwise commits
    /// `seconds` for the action and `global_seconds` for the global expiry
    /// (zero durations write nothing) and returns the action's new expiry.
    pub fn acquire(
        &self,
        actor: &ActorId,
        action: &ActionKey,
        seconds: u64,
        global_seconds: Option<u64>,
        now_ms: i64,
    ) -> Result<Option<i64>, u64> {
        let wait = |slot: &ActorSlot| {
            let own = slot
                .actions
                .get(action)
                .map(|expiry| remaining_seconds(*expiry, now_ms))
                .unwrap_or(0);
            let global = match (global_seconds, slot.global) {
                (Some(_), Some(expiry)) => remaining_seconds(expiry, now_ms),
                _ => 0,
            };
            own.max(global)
        };

        let global_seconds = global_seconds.unwrap_or(0);
        if seconds == 0 && global_seconds == 0 {
            let left = self
                .entries
                .get(actor)
                .map(|slot| wait(slot.value()))
                .unwrap_or(0);
            return if left > 0 { Err(left) } else { Ok(None) };
        }

        let mut slot = self.entries.entry(*actor).or_default();
        let left = wait(slot.value());
        if left > 0 {
            return Err(left);
        }

        if global_seconds > 0 {
            slot.global = Some(expiry_after(global_seconds, now_ms));
        }
        if seconds == 0 {
            return Ok(None);
        }
        let expiry = expiry_after(seconds, now_ms);
        slot.actions.insert(action.clone(), expiry);
        Ok(Some(expiry))
    }

    /// Remove one entry; `false` when there was none
    pub fn clear(&self, actor: &ActorId, action: &ActionKey) -> bool {
        let removed = self
            .entries
            .get_mut(actor)
            .map(|mut slot| slot.actions.remove(action).is_some())
            .unwrap_or(false);
        self.entries.remove_if(actor, |_, slot| slot.is_empty());
        removed
    }

    /// Remove every entry of the actor, the global one included
    pub fn clear_all(&self, actor: &ActorId) -> bool {
        self.entries.remove(actor).is_some()
    }

    /// The actor's live action entries, soonest expiry first
    pub fn active_for(&self, actor: &ActorId, now_ms: i64) -> Vec<(ActionKey, i64)> {
        let mut active: Vec<(ActionKey, i64)> = self
            .entries
            .get(actor)
            .map(|slot| {
                slot.actions
                    .iter()
                    .filter(|(_, expiry)| **expiry > now_ms)
                    .map(|(action, expiry)| (action.clone(), *expiry))
                    .collect()
            })
            .unwrap_or_default();
        active.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        active
    }

    /// Every action entry still live at `now_ms`; global expiries stay in memory
    pub fn snapshot(&self, now_ms: i64) -> TableSnapshot {
        let mut snapshot = TableSnapshot::new();
        for slot in self.entries.iter() {
            let live: BTreeMap<ActionKey, i64> = slot
                .value()
                .actions
                .iter()
                .filter(|(_, expiry)| **expiry > now_ms)
                .map(|(action, expiry)| (action.clone(), *expiry))
                .collect();
            if !live.is_empty() {
                snapshot.insert(*slot.key(), live);
            }
        }
        snapshot
    }

    /// Merge entries in; where both sides hold a key the later expiry is kept.
    ///
    /// Entries already lapsed at `now_ms` are dropped. Returns how many were
    /// written.
    pub fn restore(&self, snapshot: TableSnapshot, now_ms: i64) -> usize {
        let mut written = 0;
        for (actor, actions) in snapshot {
            let live: Vec<(ActionKey, i64)> = actions
                .into_iter()
                .filter(|(_, expiry)| *expiry > now_ms)
                .collect();
            if live.is_empty() {
                continue;
            }

            let mut slot = self.entries.entry(actor).or_default();
            for (action, expiry) in live {
                let current = slot.actions.entry(action).or_insert(expiry);
                if expiry >= *current {
                    *current = expiry;
                    written += 1;
                }
            }
        }
        written
    }

    /// Drop lapsed entries and empty actor slots; returns entries removed
    pub fn prune_expired(&self, now_ms: i64) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, slot| {
            removed += slot.retain_live(now_ms);
            !slot.is_empty()
        });
        removed
    }

    /// Drop one actor's lapsed entries, e.g. when it disconnects
    pub fn evict_expired(&self, actor: &ActorId, now_ms: i64) -> usize {
        let removed = self
            .entries
            .get_mut(actor)
            .map(|mut slot| slot.retain_live(now_ms))
            .unwrap_or(0);
        self.entries.remove_if(actor, |_, slot| slot.is_empty());
        removed
    }

    /// Actors holding at least one entry, live or not yet pruned
    pub fn tracked_actors(&self) -> usize {
        self.entries.len()
    }

    /// Stored entries across all actors, global expiries included
    pub fn len(&self) -> usize {
        self.entries.iter().map(|slot| slot.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn expiry_after(seconds: u64, now_ms: i64) -> i64 {
    let millis = i64::try_from(seconds.saturating_mul(1_000)).unwrap_or(i64::MAX);
    now_ms.saturating_add(millis)
}

fn remaining_seconds(expiry_ms: i64, now_ms: i64) -> u64 {
    let left = expiry_ms.saturating_sub(now_ms);
    if left <= 0 {
        0
    } else {
        (left as u64).div_ceil(1_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    const T0: i64 = 1_700_000_000_000;

    #[test]
    fn test_commit_and_remaining() {
        let table = CooldownTable::new();
        let actor = Uuid::new_v4();
        let home = ActionKey::new("home");

        assert_eq!(table.remaining(&actor, &home, T0), 0);
        assert_eq!(table.commit(&actor, &home, 10, T0), Some(T0 + 10_000));
        assert_eq!(table.remaining(&actor, &home, T0), 10);
        assert_eq!(table.remaining(&actor, &home, T0 + 3_000), 7);
        assert_eq!(table.remaining(&actor, &home, T0 + 10_000), 0);
    }

    #[test]
    fn test_remaining_rounds_up() {
        let table = CooldownTable::new();
        let actor = Uuid::new_v4();
        let home = ActionKey::new("home");
        table.commit(&actor, &home, 10, T0);

        assert_eq!(table.remaining(&actor, &home, T0 + 1), 10);
        assert_eq!(table.remaining(&actor, &home, T0 + 9_001), 1);
        assert_eq!(table.remaining(&actor, &home, T0 + 9_999), 1);
    }

    #[test]
    fn test_zero_commit_is_noop() {
        let table = CooldownTable::new();
        let actor = Uuid::new_v4();

        assert_eq!(table.commit(&actor, &ActionKey::new("home"), 0, T0), None);
        assert!(table.is_empty());
    }

    #[test]
    fn test_last_commit_wins() {
        let table = CooldownTable::new();
        let actor = Uuid::new_v4();
        let home = ActionKey::new("home");

        table.commit(&actor, &home, 60, T0);
        table.commit(&actor, &home, 5, T0);
        assert_eq!(table.remaining(&actor, &home, T0), 5);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_clear() {
        let table = CooldownTable::new();
        let actor = Uuid::new_v4();
        let home = ActionKey::new("home");
        let warp = ActionKey::new("warp");
        table.commit(&actor, &home, 10, T0);
        table.commit(&actor, &warp, 10, T0);
        assert_eq!(table.acquire(&actor, &home, 10, Some(3), T0), Err(10));
        assert_eq!(table.acquire(&actor, &ActionKey::new("spawn"), 0, Some(3), T0), Ok(None));

        assert!(table.clear(&actor, &home));
        assert!(!table.clear(&actor, &home));
        assert_eq!(table.remaining(&actor, &warp, T0), 10);

        assert!(table.clear_all(&actor));
        assert!(!table.clear_all(&actor));
        assert_eq!(table.global_remaining(&actor, T0), 0);
        assert_eq!(table.tracked_actors(), 0);
    }

    #[test]
    fn test_active_for_sorted_by_expiry() {
        let table = CooldownTable::new();
        let actor = Uuid::new_v4();
        table.commit(&actor, &ActionKey::new("warp"), 60, T0);
        table.commit(&actor, &ActionKey::new("home"), 10, T0);
        table.commit(&actor, &ActionKey::new("spawn"), 1, T0);

        let active = table.active_for(&actor, T0 + 2_000);
        let keys: Vec<&str> = active.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["home", "warp"]);
    }

    #[test]
    fn test_restore_keeps_later_expiry() {
        let table = CooldownTable::new();
        let actor = Uuid::new_v4();
        let home = ActionKey::new("home");
        let warp = ActionKey::new("warp");
        table.commit(&actor, &home, 30, T0);
        table.commit(&actor, &warp, 5, T0);

        let mut incoming = TableSnapshot::new();
        let mut actions = BTreeMap::new();
        actions.insert(home.clone(), T0 + 10_000);
        actions.insert(warp.clone(), T0 + 50_000);
        actions.insert(ActionKey::new("spawn"), T0 - 1);
        incoming.insert(actor, actions);

        assert_eq!(table.restore(incoming, T0), 1);
        assert_eq!(table.remaining(&actor, &home, T0), 30);
        assert_eq!(table.remaining(&actor, &warp, T0), 50);
        assert_eq!(table.expiry(&actor, &ActionKey::new("spawn")), None);
    }

    #[test]
    fn test_snapshot_drops_expired() {
        let table = CooldownTable::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        table.commit(&a, &ActionKey::new("home"), 10, T0);
        table.commit(&a, &ActionKey::new("spawn"), 1, T0);
        table.commit(&b, &ActionKey::new("spawn"), 1, T0);

        let snapshot = table.snapshot(T0 + 5_000);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[&a].len(), 1);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_prune_and_evict() {
        let table = CooldownTable::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        table.commit(&a, &ActionKey::new("home"), 10, T0);
        table.commit(&a, &ActionKey::new("spawn"), 1, T0);
        table.commit(&b, &ActionKey::new("spawn"), 1, T0);

        assert_eq!(table.evict_expired(&a, T0 + 5_000), 1);
        assert_eq!(table.tracked_actors(), 2);

        assert_eq!(table.prune_expired(T0 + 5_000), 1);
        assert_eq!(table.tracked_actors(), 1);

        assert_eq!(table.evict_expired(&a, T0 + 20_000), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn test_acquire_commits_when_ready() {
        let table = CooldownTable::new();
        let actor = Uuid::new_v4();
        let home = ActionKey::new("home");

        assert_eq!(table.acquire(&actor, &home, 10, None, T0), Ok(Some(T0 + 10_000)));
        assert_eq!(table.acquire(&actor, &home, 10, None, T0 + 3_000), Err(7));
        assert_eq!(table.remaining(&actor, &home, T0 + 3_000), 7);
        assert_eq!(
            table.acquire(&actor, &home, 10, None, T0 + 11_000),
            Ok(Some(T0 + 21_000))
        );
    }

    #[test]
    fn test_acquire_zero_duration_writes_nothing() {
        let table = CooldownTable::new();
        let actor = Uuid::new_v4();

        assert_eq!(table.acquire(&actor, &ActionKey::new("spawn"), 0, None, T0), Ok(None));
        assert!(table.is_empty());
    }

    #[test]
    fn test_acquire_global() {
        let table = CooldownTable::new();
        let actor = Uuid::new_v4();
        let home = ActionKey::new("home");
        let spawn = ActionKey::new("spawn");

        assert_eq!(table.acquire(&actor, &spawn, 0, Some(3), T0), Ok(None));
        assert_eq!(table.global_remaining(&actor, T0), 3);
        assert_eq!(table.acquire(&actor, &home, 10, Some(3), T0 + 1_000), Err(2));

        // Global entries only block while global mode is on
        assert_eq!(
            table.acquire(&actor, &home, 10, None, T0 + 1_000),
            Ok(Some(T0 + 11_000))
        );
        assert_eq!(table.acquire(&actor, &home, 0, Some(3), T0 + 4_000), Err(7));
    }

    #[test]
    fn test_global_expiry_is_separate_from_actions() {
        let table = CooldownTable::new();
        let actor = Uuid::new_v4();
        let lookalike = ActionKey::new("@global");

        assert_eq!(table.acquire(&actor, &lookalike, 1, Some(60), T0), Ok(Some(T0 + 1_000)));
        assert_eq!(table.remaining(&actor, &lookalike, T0), 1);
        assert_eq!(table.global_remaining(&actor, T0), 60);
        assert_eq!(table.acquire(&actor, &ActionKey::new("home"), 1, Some(60), T0 + 2_000), Err(58));

        // Global expiries are not persisted
        assert_eq!(table.snapshot(T0)[&actor].len(), 1);
        assert!(table.clear(&actor, &lookalike));
        assert_eq!(table.tracked_actors(), 1);
        assert_eq!(table.prune_expired(T0 + 60_000), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn test_acquire_concurrent_single_winner() {
        let table = std::sync::Arc::new(CooldownTable::new());
        let actor = Uuid::new_v4();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = table.clone();
                std::thread::spawn(move || {
                    table
                        .acquire(&actor, &ActionKey::new("home"), 10, None, T0)
                        .is_ok()
                })
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(winners, 1);
    }

    #[test]
    fn test_commit_saturates() {
        let table = CooldownTable::new();
        let actor = Uuid::new_v4();
        let home = ActionKey::new("home");

        assert_eq!(table.commit(&actor, &home, u64::MAX, T0), Some(i64::MAX));
        assert!(table.remaining(&actor, &home, T0) > 0);
    }

    proptest! {
        #[test]
        fn prop_commit_then_lapse(seconds in 1u64..1_000_000, now in 0i64..4_000_000_000_000) {
            let table = CooldownTable::new();
            let actor = Uuid::new_v4();
            let key = ActionKey::new("home");

            table.commit(&actor, &key, seconds, now);
            prop_assert_eq!(table.remaining(&actor, &key, now), seconds);
            prop_assert_eq!(table.remaining(&actor, &key, now + seconds as i64 * 1_000), 0);
        }

        #[test]
        fn prop_remaining_non_increasing(
            seconds in 1u64..100_000,
            mut steps in proptest::collection::vec(0i64..200_000_000, 1..20),
        ) {
            let table = CooldownTable::new();
            let actor = Uuid::new_v4();
            let key = ActionKey::new("warp");
            table.commit(&actor, &key, seconds, T0);

            steps.sort_unstable();
            let mut previous = table.remaining(&actor, &key, T0);
            for step in steps {
                let current = table.remaining(&actor, &key, T0 + step);
                prop_assert!(current <= previous);
                previous = current;
            }
        }
    }
}
