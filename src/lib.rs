//! # fabsync
//!
//! Keeps network fabric configuration converged with a desired-state store.
//!
//! The binary wires the workspace crates together:
//!
//! - [`fabsync_hashtree`]: per-tenant content-hashed trees and their diff
//! - [`fabsync_reconciler`]: reconciliation passes with retry escalation
//! - [`fabsync_universe`]: live per-tenant views of a backing system
//!
//! This crate adds configuration loading, state files and the CLI commands.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod cli;
pub mod commands;
pub mod config;
pub mod state;

pub use fabsync_core;
pub use fabsync_hashtree;
pub use fabsync_reconciler;
pub use fabsync_universe;
