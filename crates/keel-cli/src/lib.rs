//! # keel-cli
//!
//! Command-line interface for the Keel governance core.
//!
//! ## Commands
//!
//! - `keel sweep`: expire overdue escalations and execute due holds, once or on an interval
//! - `keel budget`: show the spend ledger or record a charge
//! - `keel sanitize`: run text through the signal sanitizer
//! - `keel holds`: list, approve or cancel held actions
//! - `keel escalations`: list, count, decide or expire escalations
//! - `keel policy`: print the action boundary table
//! - `keel config`: show or validate configuration

pub mod commands;

pub use commands::Cli;
