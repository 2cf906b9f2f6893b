//! Multi-tenant content synchronization
//!
//! Pushes content from the master to tenant accounts.
//!
//! # Components
//!
//! - [`tenant`]: the master's content API ([`TenantApi`]) and diff types
//! - [`runner`]: per-account sync with timeouts and skip-on-down behavior
//!
//! # Example
//!
//! ```ignore
//! use xsoar_ctl::sync::{ContentSync, SyncOptions, SyncRequest};
//!
//! let runner = ContentSync::new(&client, SyncOptions::from_config(&config.sync, false));
//! let report = runner.run(&SyncRequest {
//!     all_accounts: true,
//!     items: vec!["Phishing Triage".to_string()],
//!     ..Default::default()
//! }).await?;
//! ```

pub mod runner;
pub mod tenant;

pub use runner::{
    AccountOutcome, AccountReport, ContentSync, SyncAllReport, SyncOptions, SyncReport,
    SyncRequest,
};
pub use tenant::{ContentDiff, ContentItem, TenantApi};
