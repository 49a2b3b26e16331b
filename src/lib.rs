// Clippy allows for reasonable defaults
#![allow(clippy::new_without_default)] // Default not always appropriate for stateful types
#![allow(clippy::collapsible_if)] // Separate ifs can be more readable

//! Chunk orchestrator: schedules coding agents over per-chunk git worktrees.
//!
//! - `database` - durable work-unit and conflict store
//! - `worktrees` - per-chunk worktree and branch lifecycle
//! - `oracle` - pairwise conflict analysis between chunks
//! - `scheduler` - dispatch loop and completion gate
//! - `daemon` - background process lifecycle
//! - `server` - HTTP API over unix socket and TCP

pub mod agent;
pub mod chunks;
pub mod config;
pub mod database;
pub mod git;
pub mod models;
pub mod oracle;
pub mod scheduler;
pub mod server;
pub mod utils;
pub mod worktrees;

#[cfg(unix)]
pub mod daemon;
#[cfg(unix)]
pub mod shutdown;

pub use models::*;
