//! HTTP access to the XSOAR REST API
//!
//! # Components
//!
//! - [`http_client`]: authenticated JSON client with status-to-error mapping
//! - [`retry`]: bounded exponential backoff for idempotent reads

pub mod http_client;
pub mod retry;

pub use http_client::XsoarClient;
pub use retry::RetryManager;
