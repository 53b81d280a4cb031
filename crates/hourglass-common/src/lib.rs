//! Hourglass Common - Shared types, errors, and utilities
//!
//! This crate provides the foundational pieces used across all Hourglass components:
//! - Error types
//! - Duration parsing and formatting
//! - Command names and permission nodes shared by the engine and its hosts

pub mod error;
pub mod utils;

// Re-exports for convenience
pub use error::{HourglassError, Result};
pub use utils::{format_duration, normalize_name, now_millis, parse_duration};

/// Command names owned by Hourglass itself; never gated by the engine.
pub const RESERVED_COMMANDS: &[&str] = &["hourglass", "hg", "commandcooldown", "cc"];

/// Permission node granting a standing bypass for every action
pub const PERMISSION_BYPASS: &str = "hourglass.bypass";

/// Prefix of the per-action bypass node (`hourglass.bypass.specific.<action>`)
pub const PERMISSION_BYPASS_SPECIFIC_PREFIX: &str = "hourglass.bypass.specific.";

/// Prefix of the group eligibility node (`hourglass.group.<name>`)
pub const PERMISSION_GROUP_PREFIX: &str = "hourglass.group.";

/// Marker that introduces an invocation (`/home`)
pub const INVOCATION_MARKER: char = '/';

/// Suffix that turns a rule or exclusion key into a prefix match
pub const WILDCARD_SUFFIX: char = '*';

/// Build the per-action bypass permission node for an action key
pub fn bypass_permission(action: &str) -> String {
    format!("{}{}", PERMISSION_BYPASS_SPECIFIC_PREFIX, action)
}

/// Build the group eligibility permission node for a group name
pub fn group_permission(group: &str) -> String {
    format!("{}{}", PERMISSION_GROUP_PREFIX, group)
}

/// Whether a command name is one of Hourglass's own commands
pub fn is_reserved_command(command: &str) -> bool {
    RESERVED_COMMANDS
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(command))
}
