//! Cooldown Gate Service
//!
//! Provides:
//! - Per-invocation gating (allow, deny with remaining time)
//! - Administrative rule, bypass and cooldown operations
//! - Persistence on startup, reload, shutdown and explicit save
//! - Plugin lifecycle and periodic pruning

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use hourglass_common::{HourglassError, Result, now_millis};
use parking_lot::RwLock;
use tracing::{debug, error, info};

use super::bypass::{BypassRegistry, NoPermissions, PermissionCheck};
use super::invocation::{Invocation, is_excluded_command, is_excluded_world};
use super::model::*;
use super::rule_store::{DEFAULT_PAGE_SIZE, RuleSet, RuleStore};
use super::store::{CooldownStore, create_cooldown_store};
use super::table::CooldownTable;
use crate::Plugin;

/// The cooldown gate: decides, records and administers cooldowns.
///
/// The permission source and the store can be injected. Without an injected
/// store the gate derives one from its settings and rebuilds it on reload.
pub struct CooldownGate {
    settings: RwLock<Arc<EngineSettings>>,
    rules: Arc<RuleStore>,
    table: Arc<CooldownTable>,
    bypass: Arc<BypassRegistry>,
    permissions: Arc<dyn PermissionCheck>,
    store: RwLock<Arc<dyn CooldownStore>>,
    store_injected: bool,
    total: AtomicU64,
    allowed: AtomicU64,
    denied: AtomicU64,
    bypassed: AtomicU64,
    excluded: AtomicU64,
    committed: AtomicU64,
}

impl CooldownGate {
    pub fn new(settings: EngineSettings, rules: RuleSet) -> Self {
        let store = create_cooldown_store(&settings);
        Self {
            settings: RwLock::new(Arc::new(settings)),
            rules: Arc::new(RuleStore::new(rules)),
            table: Arc::new(CooldownTable::new()),
            bypass: Arc::new(BypassRegistry::new()),
            permissions: Arc::new(NoPermissions),
            store: RwLock::new(store),
            store_injected: false,
            total: AtomicU64::new(0),
            allowed: AtomicU64::new(0),
            denied: AtomicU64::new(0),
            bypassed: AtomicU64::new(0),
            excluded: AtomicU64::new(0),
            committed: AtomicU64::new(0),
        }
    }

    /// Validate a raw configuration and build a gate from it
    pub fn from_config(config: &CooldownConfig) -> Result<(Self, LoadReport)> {
        let (settings, rules, report) = config.build()?;
        Ok((Self::new(settings, rules), report))
    }

    pub fn with_permissions(mut self, permissions: Arc<dyn PermissionCheck>) -> Self {
        self.permissions = permissions;
        self
    }

    /// Use a fixed store; reloads keep it regardless of the settings
    pub fn with_store(mut self, store: Arc<dyn CooldownStore>) -> Self {
        self.store = RwLock::new(store);
        self.store_injected = true;
        self
    }

    pub fn settings(&self) -> Arc<EngineSettings> {
        self.settings.read().clone()
    }

    pub fn rules(&self) -> &Arc<RuleStore> {
        &self.rules
    }

    pub fn table(&self) -> &Arc<CooldownTable> {
        &self.table
    }

    pub fn store(&self) -> Arc<dyn CooldownStore> {
        self.store.read().clone()
    }

    /// Gate one invocation at `now_ms`
    pub fn evaluate(&self, request: &GateRequest, now_ms: i64) -> GateDecision {
        self.total.fetch_add(1, Ordering::Relaxed);
        let settings = self.settings();

        if !settings.enabled {
            return self.allow(AllowReason::Disabled);
        }

        let Some(invocation) = Invocation::with_settings(&request.invocation, &settings) else {
            self.excluded.fetch_add(1, Ordering::Relaxed);
            return self.allow(AllowReason::Excluded);
        };

        if is_excluded_command(invocation.command(), &settings.excluded_commands)
            || is_excluded_world(request.world.as_deref(), &settings.excluded_worlds)
        {
            self.excluded.fetch_add(1, Ordering::Relaxed);
            return self.allow(AllowReason::Excluded);
        }

        let actor = &request.actor;
        let action = invocation.into_action();

        if self
            .bypass
            .is_bypassed(actor, &action, self.permissions.as_ref())
        {
            self.bypassed.fetch_add(1, Ordering::Relaxed);
            if settings.debug {
                debug!("Bypass: actor {} skips cooldown on '{}'", actor, action);
            }
            return self.allow(AllowReason::Bypassed);
        }

        let seconds = self
            .rules
            .resolve_duration(actor, &action, self.permissions.as_ref());
        let global = settings
            .use_global_cooldown
            .then(|| settings.clamp(settings.global_cooldown));

        match self.table.acquire(actor, &action, seconds, global, now_ms) {
            Err(remaining) => {
                self.denied.fetch_add(1, Ordering::Relaxed);
                if settings.debug {
                    debug!(
                        "Deny: actor {} on '{}', {}s remaining",
                        actor, action, remaining
                    );
                }
                GateDecision::Deny { action, remaining }
            }
            Ok(Some(_)) => {
                self.committed.fetch_add(1, Ordering::Relaxed);
                if settings.debug {
                    debug!("Commit: actor {} on '{}' for {}s", actor, action, seconds);
                }
                self.allow(AllowReason::Committed { seconds })
            }
            Ok(None) => self.allow(AllowReason::NoCooldown),
        }
    }

    /// Gate one invocation against the wall clock
    pub fn check(&self, request: &GateRequest) -> GateDecision {
        self.evaluate(request, now_millis())
    }

    fn allow(&self, reason: AllowReason) -> GateDecision {
        self.allowed.fetch_add(1, Ordering::Relaxed);
        GateDecision::allow(reason)
    }

    // ---- rules ----

    /// Create or replace a rule; returns the stored (clamped) duration
    pub fn set_rule(&self, key: &str, seconds: u64) -> Result<u64> {
        let stored = self.rules.set_rule(key, seconds)?;
        info!("Cooldown rule '{}' set to {}s", key, stored);
        Ok(stored)
    }

    pub fn remove_rule(&self, key: &str) -> bool {
        let removed = self.rules.remove_rule(key);
        if removed {
            info!("Cooldown rule '{}' removed", key);
        }
        removed
    }

    /// Base duration for the key, before groups
    pub fn get_rule(&self, key: &str) -> u64 {
        self.rules.get_rule(key)
    }

    pub fn list_rules(&self) -> Vec<(String, u64)> {
        self.rules.list_rules()
    }

    pub fn list_rules_page(&self, page: usize) -> RulePage {
        self.rules.list_rules_page(page, DEFAULT_PAGE_SIZE)
    }

    /// Duration the actor would receive for the key right now
    pub fn resolve_duration(&self, actor: &ActorId, key: &str) -> u64 {
        self.rules
            .resolve_duration(actor, &ActionKey::new(key), self.permissions.as_ref())
    }

    // ---- cooldowns ----

    /// Seconds the actor still has to wait for the key, global cooldown included
    pub fn remaining(&self, actor: &ActorId, key: &str, now_ms: i64) -> u64 {
        let own = self.table.remaining(actor, &ActionKey::new(key), now_ms);
        if self.settings().use_global_cooldown {
            own.max(self.table.global_remaining(actor, now_ms))
        } else {
            own
        }
    }

    pub fn info(&self, actor: &ActorId, key: &str, now_ms: i64) -> RuleInfo {
        RuleInfo {
            action: ActionKey::new(key),
            configured_seconds: self.get_rule(key),
            remaining_seconds: self.remaining(actor, key, now_ms),
        }
    }

    /// Live entries of the actor with their expiry (epoch ms)
    pub fn active_cooldowns(&self, actor: &ActorId, now_ms: i64) -> Vec<(ActionKey, i64)> {
        self.table.active_for(actor, now_ms)
    }

    /// Clear one cooldown, or all of the actor's cooldowns when `key` is `None`
    pub fn clear(&self, actor: &ActorId, key: Option<&str>) -> bool {
        let cleared = match key {
            Some(key) => self.table.clear(actor, &ActionKey::new(key)),
            None => self.table.clear_all(actor),
        };
        if cleared {
            info!(
                "Cleared cooldown {} for actor {}",
                key.unwrap_or("(all)"),
                actor
            );
        }
        cleared
    }

    /// Drop the actor's lapsed entries, e.g. on disconnect
    pub fn evict_expired(&self, actor: &ActorId, now_ms: i64) -> usize {
        self.table.evict_expired(actor, now_ms)
    }

    pub fn prune_expired(&self, now_ms: i64) -> usize {
        self.table.prune_expired(now_ms)
    }

    // ---- bypass ----

    /// Flip the actor's bypass (for one key, or globally) and return the new state
    pub fn toggle_bypass(&self, actor: &ActorId, key: Option<&str>) -> Result<bool> {
        let enabled = match key {
            Some(key) => {
                let action = ActionKey::new(key);
                if action.is_empty() {
                    return Err(HourglassError::illegal_argument(
                        "bypass key must not be empty",
                    ));
                }
                self.bypass.toggle_action(actor, &action)
            }
            None => self.bypass.toggle_global(actor),
        };
        info!(
            "Bypass {} for actor {} {}",
            key.unwrap_or("(all)"),
            actor,
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(enabled)
    }

    pub fn is_bypassed(&self, actor: &ActorId, key: &str) -> bool {
        self.bypass
            .is_bypassed(actor, &ActionKey::new(key), self.permissions.as_ref())
    }

    // ---- persistence and reload ----

    /// Restore persisted entries (merged, later expiry wins).
    ///
    /// Does nothing when persistence is off. Unreadable state is logged and
    /// treated as empty.
    pub async fn load(&self, now_ms: i64) -> usize {
        if !self.settings().persistent_cooldowns {
            return 0;
        }

        let store = self.store();
        match store.load(now_ms).await {
            Ok(snapshot) => {
                let restored = self.table.restore(snapshot, now_ms);
                info!(
                    "Restored {} cooldowns from {}",
                    restored,
                    store.location()
                );
                restored
            }
            Err(e) => {
                error!(
                    "Failed to load cooldowns from {}, starting empty: {}",
                    store.location(),
                    e
                );
                0
            }
        }
    }

    /// Persist live entries; `Ok(false)` when persistence is off
    pub async fn save(&self, now_ms: i64) -> anyhow::Result<bool> {
        if !self.settings().persistent_cooldowns {
            return Ok(false);
        }

        let snapshot = self.table.snapshot(now_ms);
        let count: usize = snapshot.values().map(|actions| actions.len()).sum();
        let store = self.store();
        store.save(&snapshot, now_ms).await?;
        debug!("Saved {} cooldowns to {}", count, store.location());
        Ok(true)
    }

    /// Apply a new configuration.
    ///
    /// An invalid document leaves the current settings and rules in place.
    /// Otherwise live state is saved under the old settings, the new settings
    /// and rules are swapped in, and persisted state is merged back. A derived
    /// store follows `persistent-cooldowns` and `data-file`; an injected one
    /// is kept.
    pub async fn reload(&self, config: &CooldownConfig, now_ms: i64) -> Result<LoadReport> {
        let (settings, rules, report) = config.build()?;

        if let Err(e) = self.save(now_ms).await {
            error!("Failed to save cooldowns before reload: {}", e);
        }

        let previous = self.settings();
        if !self.store_injected
            && (previous.persistent_cooldowns != settings.persistent_cooldowns
                || previous.data_file != settings.data_file)
        {
            let store = create_cooldown_store(&settings);
            info!("Cooldown store switched to {}", store.location());
            *self.store.write() = store;
        }

        *self.settings.write() = Arc::new(settings);
        self.rules.reload(rules);
        self.load(now_ms).await;

        info!(
            "Cooldown configuration reloaded: {} rules, {} groups, {} skipped",
            report.rules_loaded,
            report.groups_loaded,
            report.skipped.len()
        );
        Ok(report)
    }

    pub fn stats(&self) -> GateStats {
        GateStats {
            total: self.total.load(Ordering::Relaxed),
            allowed: self.allowed.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            bypassed: self.bypassed.load(Ordering::Relaxed),
            excluded: self.excluded.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            tracked_actors: self.table.tracked_actors(),
        }
    }
}

/// Lifecycle wrapper that loads state on init and saves it on shutdown
pub struct CooldownPlugin {
    gate: Arc<CooldownGate>,
}

impl CooldownPlugin {
    pub fn new(gate: Arc<CooldownGate>) -> Self {
        Self { gate }
    }

    pub fn gate(&self) -> &Arc<CooldownGate> {
        &self.gate
    }
}

#[async_trait]
impl Plugin for CooldownPlugin {
    fn name(&self) -> &str {
        "cooldown"
    }

    async fn init(&self) -> anyhow::Result<()> {
        let restored = self.gate.load(now_millis()).await;
        info!("Cooldown plugin initialized ({} cooldowns restored)", restored);
        Ok(())
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        if let Err(e) = self.gate.save(now_millis()).await {
            error!("Failed to save cooldowns on shutdown: {}", e);
        }
        info!("Cooldown plugin shutdown");
        Ok(())
    }
}

/// Start background pruning of lapsed cooldowns
pub fn start_prune_task(
    gate: Arc<CooldownGate>,
    interval_seconds: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_seconds.max(1)));
        loop {
            interval.tick().await;
            let removed = gate.prune_expired(now_millis());
            if removed > 0 {
                debug!("Pruned {} lapsed cooldowns", removed);
            }
        }
    })
}
