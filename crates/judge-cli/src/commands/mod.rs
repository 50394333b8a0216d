//! Subcommand handlers for the `judge` operator CLI (§6).
//!
//! Each submodule owns one noun from the top-level `Commands` enum in
//! `main.rs`; handlers are free functions so `main.rs` stays a thin dispatch
//! table rather than accumulating logic of its own.

pub mod config;
pub mod db;
pub mod outbox;
pub mod reconcile;
pub mod submission;
pub mod worker;
