//! Cooldown Engine Data Models
//!
//! Defines the identities, keys, configuration shapes and gate outcomes shared
//! by the rule store, the cooldown table and the gate.

use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use hourglass_common::{HourglassError, Result, normalize_name, parse_duration};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::rule_store::RuleSet;

/// Stable identity of the actor being rate-limited
pub type ActorId = Uuid;

/// Normalised identifier of a gated action.
///
/// Either a bare command (`home`) or a command followed by leading argument
/// tokens (`home set`). Construction lower-cases the text and collapses runs
/// of whitespace to a single space, so two keys are equal exactly when their
/// normalised strings are.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ActionKey(String);

impl ActionKey {
    pub fn new(raw: &str) -> Self {
        let normalized = raw
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(" ");
        Self(normalized)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The command part of the key (first token)
    pub fn command(&self) -> &str {
        self.0.split(' ').next().unwrap_or("")
    }

    /// Whether the key carries argument tokens after the command
    pub fn is_compound(&self) -> bool {
        self.0.contains(' ')
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ActionKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ActionKey {
    fn from(value: &str) -> Self {
        ActionKey::new(value)
    }
}

impl From<String> for ActionKey {
    fn from(value: String) -> Self {
        ActionKey::new(&value)
    }
}

impl From<ActionKey> for String {
    fn from(value: ActionKey) -> Self {
        value.0
    }
}

/// A duration as written in configuration: whole seconds or a duration string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawDuration {
    Seconds(i64),
    Text(String),
}

impl RawDuration {
    /// Validate into non-negative whole seconds
    pub fn to_seconds(&self) -> Result<u64> {
        match self {
            RawDuration::Seconds(v) if *v < 0 => Err(HourglassError::config(format!(
                "negative duration {}",
                v
            ))),
            RawDuration::Seconds(v) => Ok(*v as u64),
            RawDuration::Text(s) => parse_duration(s),
        }
    }
}

impl From<u64> for RawDuration {
    fn from(value: u64) -> Self {
        RawDuration::Seconds(value.min(i64::MAX as u64) as i64)
    }
}

impl From<&str> for RawDuration {
    fn from(value: &str) -> Self {
        RawDuration::Text(value.to_string())
    }
}

/// Raw group definition as handed over by the configuration loader
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GroupConfig {
    /// Multiplier applied to the resolved base duration
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Evaluation order among groups (higher first)
    #[serde(default)]
    pub priority: i32,
    /// Per-action durations that replace the multiplied value
    #[serde(default)]
    pub commands: BTreeMap<String, RawDuration>,
}

fn default_multiplier() -> f64 {
    1.0
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            multiplier: 1.0,
            priority: 0,
            commands: BTreeMap::new(),
        }
    }
}

/// Raw cooldown configuration, the shape the configuration loader produces.
///
/// Nothing here is trusted; [`CooldownConfig::build`] validates it into an
/// [`EngineSettings`] and an immutable [`RuleSet`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CooldownConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_zero")]
    pub default_cooldown: RawDuration,
    #[serde(default)]
    pub use_global_cooldown: bool,
    #[serde(default = "default_global_cooldown")]
    pub global_cooldown: RawDuration,
    /// Upper bound for any duration; 0 disables the clamp
    #[serde(default = "default_max_cooldown")]
    pub max_cooldown: RawDuration,
    #[serde(default)]
    pub separate_arguments: bool,
    #[serde(default = "default_argument_depth")]
    pub argument_depth: usize,
    #[serde(default)]
    pub excluded_commands: Vec<String>,
    #[serde(default)]
    pub excluded_worlds: Vec<String>,
    #[serde(default)]
    pub persistent_cooldowns: bool,
    #[serde(default = "default_data_file")]
    pub data_file: PathBuf,
    #[serde(default)]
    pub cooldowns: BTreeMap<String, RawDuration>,
    #[serde(default)]
    pub cooldown_groups: BTreeMap<String, GroupConfig>,
}

fn default_true() -> bool {
    true
}

fn default_zero() -> RawDuration {
    RawDuration::Seconds(0)
}

fn default_global_cooldown() -> RawDuration {
    RawDuration::Seconds(3)
}

fn default_max_cooldown() -> RawDuration {
    RawDuration::Seconds(86_400)
}

fn default_argument_depth() -> usize {
    1
}

fn default_data_file() -> PathBuf {
    PathBuf::from("data/cooldowns.yml")
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debug: false,
            default_cooldown: default_zero(),
            use_global_cooldown: false,
            global_cooldown: default_global_cooldown(),
            max_cooldown: default_max_cooldown(),
            separate_arguments: false,
            argument_depth: 1,
            excluded_commands: Vec::new(),
            excluded_worlds: Vec::new(),
            persistent_cooldowns: false,
            data_file: default_data_file(),
            cooldowns: BTreeMap::new(),
            cooldown_groups: BTreeMap::new(),
        }
    }
}

impl CooldownConfig {
    /// Validate the raw configuration.
    ///
    /// Scalar settings that fail to parse reject the whole load. Individual
    /// rule, group and override entries that fail are skipped, logged, and
    /// listed in the returned [`LoadReport`].
    pub fn build(&self) -> Result<(EngineSettings, RuleSet, LoadReport)> {
        let settings = EngineSettings::from_config(self)?;
        let (rules, report) = RuleSet::from_config(self, settings.max_cooldown)?;
        Ok((settings, rules, report))
    }
}

/// Validated engine-wide switches
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub enabled: bool,
    pub debug: bool,
    pub use_global_cooldown: bool,
    pub global_cooldown: u64,
    pub max_cooldown: u64,
    pub separate_arguments: bool,
    pub argument_depth: usize,
    /// Lower-cased exclusion patterns; a trailing `*` makes a prefix match
    pub excluded_commands: Vec<String>,
    pub excluded_worlds: Vec<String>,
    pub persistent_cooldowns: bool,
    pub data_file: PathBuf,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            debug: false,
            use_global_cooldown: false,
            global_cooldown: 3,
            max_cooldown: 86_400,
            separate_arguments: false,
            argument_depth: 1,
            excluded_commands: Vec::new(),
            excluded_worlds: Vec::new(),
            persistent_cooldowns: false,
            data_file: default_data_file(),
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &CooldownConfig) -> Result<Self> {
        let global_cooldown = config
            .global_cooldown
            .to_seconds()
            .map_err(|e| HourglassError::config(format!("global-cooldown: {}", e)))?;
        let max_cooldown = config
            .max_cooldown
            .to_seconds()
            .map_err(|e| HourglassError::config(format!("max-cooldown: {}", e)))?;

        Ok(Self {
            enabled: config.enabled,
            debug: config.debug,
            use_global_cooldown: config.use_global_cooldown,
            global_cooldown,
            max_cooldown,
            separate_arguments: config.separate_arguments,
            argument_depth: config.argument_depth,
            excluded_commands: config
                .excluded_commands
                .iter()
                .map(|c| normalize_name(c.trim_start_matches(hourglass_common::INVOCATION_MARKER)))
                .filter(|c| !c.is_empty())
                .collect(),
            excluded_worlds: config.excluded_worlds.clone(),
            persistent_cooldowns: config.persistent_cooldowns,
            data_file: config.data_file.clone(),
        })
    }

    /// Apply the max-duration clamp (a zero clamp means unlimited)
    pub fn clamp(&self, seconds: u64) -> u64 {
        clamp_seconds(seconds, self.max_cooldown)
    }
}

pub(crate) fn clamp_seconds(seconds: u64, max: u64) -> u64 {
    if max > 0 { seconds.min(max) } else { seconds }
}

/// Outcome of validating a configuration document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    /// Exact and wildcard rules accepted
    pub rules_loaded: usize,
    /// Groups accepted
    pub groups_loaded: usize,
    /// Human-readable description of every skipped entry
    pub skipped: Vec<String>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Why an invocation was let through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AllowReason {
    /// The engine is switched off
    Disabled,
    /// Excluded command, reserved command, or excluded world
    Excluded,
    /// The actor holds a bypass
    Bypassed,
    /// No cooldown applies to this action
    NoCooldown,
    /// A new cooldown was started
    Committed { seconds: u64 },
}

/// Result of gating one invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GateDecision {
    Allow { reason: AllowReason },
    Deny { action: ActionKey, remaining: u64 },
}

impl GateDecision {
    pub fn allow(reason: AllowReason) -> Self {
        GateDecision::Allow { reason }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, GateDecision::Allow { .. })
    }

    /// Seconds left on a denial, 0 when allowed
    pub fn remaining(&self) -> u64 {
        match self {
            GateDecision::Allow { .. } => 0,
            GateDecision::Deny { remaining, .. } => *remaining,
        }
    }
}

/// One intercepted invocation
#[derive(Debug, Clone)]
pub struct GateRequest {
    pub actor: ActorId,
    /// The raw text, including the leading `/`
    pub invocation: String,
    /// World or category the actor is in, if the host has one
    pub world: Option<String>,
}

impl GateRequest {
    pub fn new(actor: ActorId, invocation: impl Into<String>) -> Self {
        Self {
            actor,
            invocation: invocation.into(),
            world: None,
        }
    }

    pub fn with_world(mut self, world: impl Into<String>) -> Self {
        self.world = Some(world.into());
        self
    }
}

/// Rule and cooldown details for one action, as shown by the admin `info` command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleInfo {
    pub action: ActionKey,
    /// Base duration from exact, wildcard or default rules (no group applied)
    pub configured_seconds: u64,
    /// Seconds the queried actor still has to wait
    pub remaining_seconds: u64,
}

/// One page of the sorted rule listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RulePage {
    pub page: usize,
    pub max_pages: usize,
    pub entries: Vec<(String, u64)>,
}

/// Gate statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateStats {
    /// Invocations evaluated
    pub total: u64,
    /// Invocations allowed, for any reason
    pub allowed: u64,
    /// Invocations denied because of a live cooldown
    pub denied: u64,
    /// Invocations allowed through a bypass
    pub bypassed: u64,
    /// Invocations allowed because the action or world is excluded
    pub excluded: u64,
    /// New cooldowns started
    pub committed: u64,
    /// Actors currently holding at least one entry
    pub tracked_actors: usize,
}
