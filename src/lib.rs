//! Taskboard: a Discord bot that keeps live task and meeting boards.
//!
//! Tasks and meetings live in JSON-backed stores. Every mutation is followed
//! by a full re-render of the affected board channel, so the channel always
//! mirrors the store even after messages or threads are deleted behind the
//! bot's back.
//!
//! # Architecture
//!
//! - **store**: durable entity maps with monotonic ids and a board pointer
//! - **board**: pure layouts plus the reconciler that clears and reposts
//! - **threads**: task discussion threads, self-healing when they vanish
//! - **manager**: validated task and meeting operations
//! - **scheduler**: one-shot meeting reminders and attendance checks
//! - **commands**: slash commands and buttons mapped onto managers
//! - **platform**: the [`platform::ChatPlatform`] boundary and its Discord
//!   implementation
//! - **runtime**: wiring, gateway lifecycle, and event routing

pub mod board;
pub mod clock;
pub mod commands;
pub mod config;
pub mod error;
pub mod manager;
pub mod model;
pub mod paths;
pub mod platform;
pub mod runtime;
pub mod scheduler;
pub mod store;
pub mod threads;

#[doc(hidden)]
pub mod test_utils;

pub use config::BotConfig;
pub use error::{BoardError, Result};
