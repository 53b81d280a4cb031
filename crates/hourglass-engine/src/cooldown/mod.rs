//! Cooldown engine - per-actor command cooldowns
//!
//! This module provides:
//! - Rule resolution with wildcard rules and groups
//! - The cooldown table and bypass registry
//! - Invocation tokenising and exclusions
//! - Persistence codec and storage backends
//! - The gate that ties them together

mod bypass;
mod codec;
mod invocation;
mod model;
mod rule_store;
mod service;
mod store;
mod table;

pub use bypass::*;
pub use codec::*;
pub use invocation::*;
pub use model::*;
pub use rule_store::*;
pub use service::*;
pub use store::*;
pub use table::*;
