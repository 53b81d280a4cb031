// Host library for the hourglass cooldown engine
// Configuration loading, logging setup, shutdown handling, and the admin console

pub mod console; // Line-oriented admin console
pub mod model; // Application configuration
pub mod startup; // Logging and shutdown

pub use model::config::Configuration;
