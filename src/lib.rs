//! xsoar-ctl - Desired-state configuration for Cortex XSOAR
//!
//! This crate reconciles XSOAR resources (lists, integrations, jobs,
//! credentials, API keys, pre-process rules and tenant accounts) against
//! declared state and pushes master content to multi-tenant accounts.

pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod manifest;
pub mod resources;
pub mod sync;
