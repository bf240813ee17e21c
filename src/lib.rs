//! Monitor a remote git repository and run a command whenever it advances.
//!
//! ## How it works
//!
//! `reposmon` polls one repository on a fixed interval. Every poll
//! **synchronizes** the local checkout (clone on the first run, fetch and
//! fast-forward afterwards) and compares the head before and after. If the
//! branch advanced, the configured **action** runs the command and writes its
//! output next to it. A lock file keyed by the command and the repository makes
//! sure only one monitor runs per job on a host.
//!
//! ```ignore
//! +----------+       +-------------+       +---------+       +-------+
//! | instance | ----> | synchronize | ----> | command | ----> | sleep |
//! +----------+       +-------------+       +---------+       +-------+
//!                          ^                                     |
//!                          +-------------------------------------+
//! ```
//!

/// An action is a process that runs if the repository changed (e.g. [running a command](actions::command::CommandRunner)).
pub mod actions;
/// The immutable configuration of a run and its YAML representation.
pub mod config;
/// The context which can share data between the synchronization and the action.
pub mod context;
/// Single instance enforcement with a liveness-checked lock file.
pub mod instance;
/// Cloning, pulling and change detection of the monitored repository.
pub mod repository;
/// Translating termination signals into a graceful shutdown.
pub mod signal;
/// The poll loop, that synchronizes and runs the action until it is stopped.
pub mod start;
