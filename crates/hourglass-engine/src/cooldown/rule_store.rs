//! Rule Storage
//!
//! Holds the configured cooldown rules as an immutable [`RuleSet`] snapshot.
//! Resolution reads the current snapshot without locking it for the duration
//! of the lookup; administrative edits and reloads build a new snapshot and
//! swap it in, so an in-flight resolution never sees a half-applied change.
//!
//! Precedence, highest first:
//! 1. an override in the first eligible group (unmultiplied)
//! 2. the base duration times the first eligible group's multiplier
//! 3. the base duration
//!
//! The base duration is the exact rule for the key, else the longest matching
//! wildcard, else (for keys with arguments) the same two lookups on the bare
//! command, else the default.

use std::collections::HashMap;
use std::sync::Arc;

use hourglass_common::{
    HourglassError, INVOCATION_MARKER, Result, WILDCARD_SUFFIX, group_permission, normalize_name,
};
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::bypass::PermissionCheck;
use super::model::{ActionKey, ActorId, CooldownConfig, LoadReport, RulePage, clamp_seconds};

/// Rules listed per page by the admin listing
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// A `*`-suffixed prefix rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WildcardRule {
    prefix: String,
    seconds: u64,
}

impl WildcardRule {
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn seconds(&self) -> u64 {
        self.seconds
    }

    pub fn matches(&self, key: &str) -> bool {
        key.starts_with(&self.prefix)
    }

    fn pattern(&self) -> String {
        format!("{}{}", self.prefix, WILDCARD_SUFFIX)
    }
}

/// A named rule bundle granted to eligible actors
#[derive(Debug, Clone, PartialEq)]
pub struct CooldownGroup {
    name: String,
    multiplier: f64,
    priority: i32,
    overrides: HashMap<String, u64>,
}

impl CooldownGroup {
    pub fn new(name: &str, multiplier: f64) -> Self {
        Self {
            name: normalize_name(name),
            multiplier,
            priority: 0,
            overrides: HashMap::new(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_override(mut self, action: &str, seconds: u64) -> Self {
        self.overrides
            .insert(ActionKey::new(&rule_key(action)).as_str().to_string(), seconds);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Override for the key, falling back to the bare command
    fn override_for(&self, key: &ActionKey) -> Option<u64> {
        self.overrides.get(key.as_str()).copied().or_else(|| {
            if key.is_compound() {
                self.overrides.get(key.command()).copied()
            } else {
                None
            }
        })
    }

    fn apply_multiplier(&self, base: u64) -> u64 {
        // Float-to-int casts saturate, so NaN and negative products become 0
        (base as f64 * self.multiplier).floor() as u64
    }
}

/// Immutable snapshot of every configured rule
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    default_seconds: u64,
    max_cooldown: u64,
    exact: HashMap<String, u64>,
    /// Longest prefix first
    wildcards: Vec<WildcardRule>,
    /// Highest priority first, then by name
    groups: Vec<CooldownGroup>,
}

impl RuleSet {
    pub fn new(default_seconds: u64) -> Self {
        Self {
            default_seconds,
            ..Default::default()
        }
    }

    /// Clamp every duration (existing and future) to `max`; 0 means unlimited
    pub fn with_max_cooldown(mut self, max: u64) -> Self {
        self.max_cooldown = max;
        self.default_seconds = clamp_seconds(self.default_seconds, max);
        for seconds in self.exact.values_mut() {
            *seconds = clamp_seconds(*seconds, max);
        }
        for rule in &mut self.wildcards {
            rule.seconds = clamp_seconds(rule.seconds, max);
        }
        self
    }

    pub fn with_rule(mut self, key: &str, seconds: u64) -> Self {
        self.insert_rule(key, seconds);
        self
    }

    pub fn with_group(mut self, group: CooldownGroup) -> Self {
        self.groups.retain(|g| g.name != group.name);
        self.groups.push(group);
        self.sort_groups();
        self
    }

    /// Validate the raw configuration into a rule set.
    ///
    /// An invalid default rejects the load. Invalid rules, groups and group
    /// overrides are skipped with a warning.
    pub fn from_config(config: &CooldownConfig, max_cooldown: u64) -> Result<(Self, LoadReport)> {
        let default_seconds = config
            .default_cooldown
            .to_seconds()
            .map_err(|e| HourglassError::config(format!("default-cooldown: {}", e)))?;

        let mut report = LoadReport::default();
        let mut rules = RuleSet::new(default_seconds).with_max_cooldown(max_cooldown);

        for (key, raw) in &config.cooldowns {
            if rule_key(key).is_empty() {
                skip(&mut report, "cooldowns: empty key".to_string());
                continue;
            }
            match raw.to_seconds() {
                Ok(seconds) => {
                    rules.insert_rule(key, seconds);
                    report.rules_loaded += 1;
                }
                Err(e) => skip(&mut report, format!("cooldowns.{}: {}", key, e)),
            }
        }

        for (name, group_config) in &config.cooldown_groups {
            let multiplier = group_config.multiplier;
            if !multiplier.is_finite() || multiplier < 0.0 {
                skip(
                    &mut report,
                    format!("cooldown-groups.{}: invalid multiplier {}", name, multiplier),
                );
                continue;
            }
            if normalize_name(name).is_empty() {
                skip(&mut report, "cooldown-groups: empty group name".to_string());
                continue;
            }

            let mut group =
                CooldownGroup::new(name, multiplier).with_priority(group_config.priority);
            for (action, raw) in &group_config.commands {
                match raw.to_seconds() {
                    Ok(seconds) => {
                        group = group.with_override(action, clamp_seconds(seconds, max_cooldown));
                    }
                    Err(e) => skip(
                        &mut report,
                        format!("cooldown-groups.{}.commands.{}: {}", name, action, e),
                    ),
                }
            }
            rules = rules.with_group(group);
            report.groups_loaded += 1;
        }

        Ok((rules, report))
    }

    pub fn default_seconds(&self) -> u64 {
        self.default_seconds
    }

    pub fn max_cooldown(&self) -> u64 {
        self.max_cooldown
    }

    pub fn groups(&self) -> &[CooldownGroup] {
        &self.groups
    }

    pub fn wildcards(&self) -> &[WildcardRule] {
        &self.wildcards
    }

    /// Number of exact and wildcard rules
    pub fn len(&self) -> usize {
        self.exact.len() + self.wildcards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Duration configured under exactly this key or wildcard pattern
    pub fn rule(&self, key: &str) -> Option<u64> {
        let key = rule_key(key);
        match key.strip_suffix(WILDCARD_SUFFIX) {
            Some(prefix) => self
                .wildcards
                .iter()
                .find(|w| w.prefix == prefix)
                .map(|w| w.seconds),
            None => self.exact.get(ActionKey::new(&key).as_str()).copied(),
        }
    }

    /// Base duration for a key before any group is applied
    pub fn resolve_base(&self, key: &ActionKey) -> u64 {
        self.lookup(key.as_str())
            .or_else(|| {
                if key.is_compound() {
                    self.lookup(key.command())
                } else {
                    None
                }
            })
            .unwrap_or(self.default_seconds)
    }

    /// Duration that applies to `actor` for `key`
    pub fn resolve_duration(
        &self,
        actor: &ActorId,
        key: &ActionKey,
        permissions: &dyn PermissionCheck,
    ) -> u64 {
        let group = self
            .groups
            .iter()
            .find(|g| permissions.has_permission(actor, &group_permission(&g.name)));

        let seconds = match group {
            Some(group) => match group.override_for(key) {
                Some(seconds) => seconds,
                None => group.apply_multiplier(self.resolve_base(key)),
            },
            None => self.resolve_base(key),
        };

        clamp_seconds(seconds, self.max_cooldown)
    }

    /// Every exact and wildcard rule, sorted by key
    pub fn list_rules(&self) -> Vec<(String, u64)> {
        let mut rules: Vec<(String, u64)> = self
            .exact
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .chain(self.wildcards.iter().map(|w| (w.pattern(), w.seconds)))
            .collect();
        rules.sort_by(|a, b| a.0.cmp(&b.0));
        rules
    }

    fn lookup(&self, key: &str) -> Option<u64> {
        self.exact.get(key).copied().or_else(|| {
            self.wildcards
                .iter()
                .find(|w| w.matches(key))
                .map(|w| w.seconds)
        })
    }

    fn insert_rule(&mut self, key: &str, seconds: u64) {
        let seconds = clamp_seconds(seconds, self.max_cooldown);
        let key = rule_key(key);
        match key.strip_suffix(WILDCARD_SUFFIX) {
            Some(prefix) => {
                let prefix = prefix.to_string();
                self.wildcards.retain(|w| w.prefix != prefix);
                self.wildcards.push(WildcardRule { prefix, seconds });
                self.sort_wildcards();
            }
            None => {
                self.exact
                    .insert(ActionKey::new(&key).as_str().to_string(), seconds);
            }
        }
    }

    fn remove_rule(&mut self, key: &str) -> bool {
        let key = rule_key(key);
        match key.strip_suffix(WILDCARD_SUFFIX) {
            Some(prefix) => {
                let before = self.wildcards.len();
                self.wildcards.retain(|w| w.prefix != prefix);
                self.wildcards.len() != before
            }
            None => self.exact.remove(ActionKey::new(&key).as_str()).is_some(),
        }
    }

    fn sort_wildcards(&mut self) {
        self.wildcards.sort_by(|a, b| {
            b.prefix
                .len()
                .cmp(&a.prefix.len())
                .then_with(|| a.prefix.cmp(&b.prefix))
        });
    }

    fn sort_groups(&mut self) {
        self.groups.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.name.cmp(&b.name))
        });
    }
}

/// Normalised rule key; a leading `/` is accepted and dropped
fn rule_key(key: &str) -> String {
    let key = normalize_name(key);
    key.trim_start_matches(INVOCATION_MARKER).trim_start().to_string()
}

fn skip(report: &mut LoadReport, reason: String) {
    warn!("Skipping cooldown configuration entry: {}", reason);
    report.skipped.push(reason);
}

/// Shared, swappable holder of the current [`RuleSet`]
#[derive(Debug, Default)]
pub struct RuleStore {
    current: RwLock<Arc<RuleSet>>,
}

impl RuleStore {
    pub fn new(rules: RuleSet) -> Self {
        Self {
            current: RwLock::new(Arc::new(rules)),
        }
    }

    /// The current snapshot; stays valid across later swaps
    pub fn snapshot(&self) -> Arc<RuleSet> {
        self.current.read().clone()
    }

    /// Replace the whole rule set
    pub fn reload(&self, rules: RuleSet) {
        let count = rules.len();
        *self.current.write() = Arc::new(rules);
        debug!("Cooldown rules reloaded: {} rules", count);
    }

    /// Create or replace a rule, returning the stored (clamped) duration
    pub fn set_rule(&self, key: &str, seconds: u64) -> Result<u64> {
        if rule_key(key).is_empty() {
            return Err(HourglassError::illegal_argument("rule key must not be empty"));
        }
        if seconds == 0 {
            return Err(HourglassError::illegal_argument(
                "cooldown must be at least one second",
            ));
        }

        let mut guard = self.current.write();
        let mut next = RuleSet::clone(&guard);
        next.insert_rule(key, seconds);
        let stored = next.rule(key).unwrap_or(seconds);
        *guard = Arc::new(next);
        Ok(stored)
    }

    /// Remove a rule; `false` when no rule was stored under the key
    pub fn remove_rule(&self, key: &str) -> bool {
        let mut guard = self.current.write();
        let mut next = RuleSet::clone(&guard);
        let removed = next.remove_rule(key);
        if removed {
            *guard = Arc::new(next);
        }
        removed
    }

    /// Base duration that currently applies to the key
    pub fn get_rule(&self, key: &str) -> u64 {
        self.snapshot().resolve_base(&ActionKey::new(&rule_key(key)))
    }

    pub fn list_rules(&self) -> Vec<(String, u64)> {
        self.snapshot().list_rules()
    }

    /// One page of the sorted rule list; `page` is 1-based and clamped to range
    pub fn list_rules_page(&self, page: usize, per_page: usize) -> RulePage {
        let rules = self.list_rules();
        let per_page = per_page.max(1);
        let max_pages = rules.len().div_ceil(per_page).max(1);
        let page = page.clamp(1, max_pages);
        let entries = rules
            .into_iter()
            .skip((page - 1) * per_page)
            .take(per_page)
            .collect();

        RulePage {
            page,
            max_pages,
            entries,
        }
    }

    pub fn resolve_duration(
        &self,
        actor: &ActorId,
        key: &ActionKey,
        permissions: &dyn PermissionCheck,
    ) -> u64 {
        self.snapshot().resolve_duration(actor, key, permissions)
    }
}
