//! Desired-state handlers for XSOAR resources
//!
//! Each submodule defines the desired state of one resource kind and
//! implements [`Reconcile`] for it. [`apply`] drives any of them.

pub mod account;
pub mod api_key;
pub mod credential;
pub mod integration;
pub mod job;
pub mod list;
pub mod preprocess_rule;
pub mod traits;

pub use account::{AccountSpec, AccountStatusPolicy, RemoteAccount};
pub use api_key::ApiKeySpec;
pub use credential::CredentialSpec;
pub use integration::IntegrationSpec;
pub use job::JobSpec;
pub use list::ListSpec;
pub use preprocess_rule::PreprocessRuleSpec;
pub use traits::{apply, Action, DesiredState, ModuleResult, Mutation, Reconcile, RemoteId};
