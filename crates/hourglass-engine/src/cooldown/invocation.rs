//! Invocation parsing and exclusion matching

use hourglass_common::{INVOCATION_MARKER, WILDCARD_SUFFIX, is_reserved_command};

use super::model::{ActionKey, EngineSettings};

/// A tokenised invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    command: String,
    action: ActionKey,
}

impl Invocation {
    /// Tokenise raw text such as `/home set base`.
    ///
    /// Returns `None` when the text does not start with the invocation marker
    /// or names no command. With `separate_arguments` the action key keeps up
    /// to `argument_depth` argument tokens after the command.
    pub fn parse(raw: &str, separate_arguments: bool, argument_depth: usize) -> Option<Self> {
        let body = raw.trim_start().strip_prefix(INVOCATION_MARKER)?;
        let mut tokens = body.split_whitespace();
        let command = tokens.next()?.to_lowercase();

        let action = if separate_arguments && argument_depth > 0 {
            let mut parts = vec![command.as_str()];
            parts.extend(tokens.take(argument_depth));
            ActionKey::new(&parts.join(" "))
        } else {
            ActionKey::new(&command)
        };

        Some(Self { command, action })
    }

    pub fn with_settings(raw: &str, settings: &EngineSettings) -> Option<Self> {
        Self::parse(raw, settings.separate_arguments, settings.argument_depth)
    }

    /// The bare, lower-cased command name
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn action(&self) -> &ActionKey {
        &self.action
    }

    pub fn into_action(self) -> ActionKey {
        self.action
    }
}

/// Whether the command is excluded by pattern or is one of the reserved names.
///
/// Patterns are expected lower-cased; a trailing `*` makes a prefix match.
pub fn is_excluded_command(command: &str, patterns: &[String]) -> bool {
    let command = command.to_lowercase();
    if is_reserved_command(&command) {
        return true;
    }

    patterns.iter().any(|pattern| match pattern.strip_suffix(WILDCARD_SUFFIX) {
        Some(prefix) => command.starts_with(prefix),
        None => *pattern == command,
    })
}

pub fn is_excluded_world(world: Option<&str>, excluded: &[String]) -> bool {
    world.is_some_and(|world| excluded.iter().any(|w| w == world))
}
