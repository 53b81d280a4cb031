//! Bypass tracking
//!
//! Standing exemptions from cooldown checks, either for every action or for
//! individual actions, plus the permission seam the host uses to grant
//! bypasses and group membership from its own permission system.

use std::collections::HashSet;

use dashmap::DashMap;
use hourglass_common::{PERMISSION_BYPASS, bypass_permission};

use super::model::{ActionKey, ActorId};

/// Permission lookup delegated to the host
pub trait PermissionCheck: Send + Sync {
    /// Whether the actor holds the permission node
    fn has_permission(&self, actor: &ActorId, node: &str) -> bool;
}

/// Grants nothing; every actor is an ordinary actor
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPermissions;

impl PermissionCheck for NoPermissions {
    fn has_permission(&self, _actor: &ActorId, _node: &str) -> bool {
        false
    }
}

/// In-memory permission table, for hosts without a permission system
#[derive(Debug, Default)]
pub struct StaticPermissions {
    nodes: DashMap<ActorId, HashSet<String>>,
}

impl StaticPermissions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, actor: ActorId, node: impl Into<String>) {
        self.nodes.entry(actor).or_default().insert(node.into());
    }

    pub fn revoke(&self, actor: &ActorId, node: &str) -> bool {
        let removed = self
            .nodes
            .get_mut(actor)
            .map(|mut nodes| nodes.remove(node))
            .unwrap_or(false);
        self.nodes.remove_if(actor, |_, nodes| nodes.is_empty());
        removed
    }
}

impl PermissionCheck for StaticPermissions {
    fn has_permission(&self, actor: &ActorId, node: &str) -> bool {
        self.nodes
            .get(actor)
            .is_some_and(|nodes| nodes.contains(node))
    }
}

/// Bypass flags held by one actor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BypassState {
    pub all: bool,
    pub actions: HashSet<ActionKey>,
}

impl BypassState {
    fn is_empty(&self) -> bool {
        !self.all && self.actions.is_empty()
    }
}

/// Registry of toggled bypasses.
///
/// Each actor's flags live in a single map slot, so a toggle reads and flips
/// the flag under that slot's lock and concurrent toggles never both observe
/// the same starting state.
#[derive(Debug, Default)]
pub struct BypassRegistry {
    states: DashMap<ActorId, BypassState>,
}

impl BypassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip the actor's global bypass and return the new state
    pub fn toggle_global(&self, actor: &ActorId) -> bool {
        let enabled = {
            let mut state = self.states.entry(*actor).or_default();
            state.all = !state.all;
            state.all
        };
        self.states.remove_if(actor, |_, state| state.is_empty());
        enabled
    }

    /// Flip the actor's bypass for one action and return the new state
    pub fn toggle_action(&self, actor: &ActorId, action: &ActionKey) -> bool {
        let enabled = {
            let mut state = self.states.entry(*actor).or_default();
            if state.actions.remove(action) {
                false
            } else {
                state.actions.insert(action.clone());
                true
            }
        };
        self.states.remove_if(actor, |_, state| state.is_empty());
        enabled
    }

    pub fn is_globally_bypassed(&self, actor: &ActorId) -> bool {
        self.states.get(actor).is_some_and(|state| state.all)
    }

    /// Toggled bypass for the key itself or, for keys with arguments, its command
    pub fn is_action_bypassed(&self, actor: &ActorId, action: &ActionKey) -> bool {
        self.states.get(actor).is_some_and(|state| {
            state.actions.contains(action)
                || (action.is_compound() && state.actions.contains(action.command()))
        })
    }

    /// Toggled bypasses first, then the host's permission nodes
    pub fn is_bypassed(
        &self,
        actor: &ActorId,
        action: &ActionKey,
        permissions: &dyn PermissionCheck,
    ) -> bool {
        if self.is_globally_bypassed(actor) || self.is_action_bypassed(actor, action) {
            return true;
        }

        permissions.has_permission(actor, PERMISSION_BYPASS)
            || permissions.has_permission(actor, &bypass_permission(action.as_str()))
            || (action.is_compound()
                && permissions.has_permission(actor, &bypass_permission(action.command())))
    }

    pub fn state(&self, actor: &ActorId) -> BypassState {
        self.states
            .get(actor)
            .map(|state| state.clone())
            .unwrap_or_default()
    }

    /// Drop every toggled bypass the actor holds
    pub fn clear(&self, actor: &ActorId) {
        self.states.remove(actor);
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
