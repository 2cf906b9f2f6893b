//! Desired-state manifests
//!
//! A manifest is a YAML document with an ordered list of tasks. Each task is
//! one resource block or sync request, tagged by `kind`:
//!
//! ```yaml
//! tasks:
//!   - kind: list
//!     name: Allowed domains
//!     content: example.org
//!   - kind: sync_accounts
//!     all_accounts: true
//!     items: [Allowed domains]
//! ```
//!
//! `${VAR}` references are expanded from the environment before parsing.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

use crate::client::XsoarClient;
use crate::config::{expand_env_vars, SyncConfig};
use crate::error::{ModuleError, SyncError};
use crate::resources::{
    apply, AccountSpec, AccountStatusPolicy, ApiKeySpec, CredentialSpec, IntegrationSpec, JobSpec,
    ListSpec, ModuleResult, PreprocessRuleSpec, Reconcile,
};
use crate::sync::{ContentSync, SyncAllReport, SyncOptions, SyncReport, SyncRequest};

/// Manifest loading and execution errors
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Failed to read manifest file
    #[error("Failed to read manifest: {0}")]
    FileRead(String),

    /// Failed to parse manifest
    #[error("Failed to parse manifest: {0}")]
    Parse(String),

    /// A task failed; later tasks were not run
    #[error("Task {index} ({task}) failed: {source}")]
    TaskFailed {
        /// One-based task position
        index: usize,
        /// Task label
        task: String,
        /// Underlying error
        #[source]
        source: TaskError,
    },
}

/// Error of a single task
#[derive(Debug, Error)]
pub enum TaskError {
    /// Resource handler failed
    #[error(transparent)]
    Module(#[from] ModuleError),

    /// Sync request failed
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Parameters of the server-side sync of every account
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SyncAllRequest {
    /// Timeout overriding `sync.account_timeout_secs`
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// One manifest entry
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Task {
    ApiKey(ApiKeySpec),
    Integration(IntegrationSpec),
    Job(JobSpec),
    List(ListSpec),
    PreprocessRule(PreprocessRuleSpec),
    Credential(CredentialSpec),
    Account(AccountSpec),
    SyncAccounts(SyncRequest),
    SyncAllAccounts(SyncAllRequest),
}

impl Task {
    /// Short description used in logs and errors
    pub fn label(&self) -> String {
        fn named<R: Reconcile>(resource: &R) -> String {
            format!("{} '{}'", R::KIND, resource.name())
        }
        match self {
            Task::ApiKey(spec) => named(spec),
            Task::Integration(spec) => named(spec),
            Task::Job(spec) => named(spec),
            Task::List(spec) => named(spec),
            Task::PreprocessRule(spec) => named(spec),
            Task::Credential(spec) => named(spec),
            Task::Account(spec) => named(spec),
            Task::SyncAccounts(_) => "SyncAccounts".to_string(),
            Task::SyncAllAccounts(_) => "SyncAllAccounts".to_string(),
        }
    }
}

/// Ordered list of tasks
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl Manifest {
    /// Load a manifest from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ManifestError::FileRead(format!("{}: {}", path.as_ref().display(), e)))?;
        Self::from_yaml(&content)
    }

    /// Parse a manifest from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ManifestError> {
        let expanded = expand_env_vars(yaml).map_err(|e| ManifestError::Parse(e.to_string()))?;
        serde_yaml::from_str(&expanded).map_err(|e| ManifestError::Parse(e.to_string()))
    }
}

/// Result of one task, printed as one JSON line
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TaskOutcome {
    Resource(ModuleResult),
    Sync(SyncReport),
    SyncAll(SyncAllReport),
}

impl TaskOutcome {
    /// Whether the task changed (or would change) remote state
    pub fn changed(&self) -> bool {
        match self {
            TaskOutcome::Resource(result) => result.changed,
            TaskOutcome::Sync(report) => report.changed,
            TaskOutcome::SyncAll(report) => report.changed,
        }
    }
}

/// Totals of a manifest run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub tasks: usize,
    pub changed: usize,
}

/// Applies manifest tasks against one server
pub struct ManifestRunner<'a> {
    client: &'a XsoarClient,
    sync: &'a SyncConfig,
    check_mode: bool,
}

impl<'a> ManifestRunner<'a> {
    pub fn new(client: &'a XsoarClient, sync: &'a SyncConfig, check_mode: bool) -> Self {
        Self {
            client,
            sync,
            check_mode,
        }
    }

    /// Run a single task
    pub async fn run_task(&self, task: &Task) -> Result<TaskOutcome, TaskError> {
        let check_mode = self.check_mode;
        let client = self.client;
        let outcome = match task {
            Task::ApiKey(spec) => TaskOutcome::Resource(apply(spec, client, check_mode).await?),
            Task::Integration(spec) => {
                TaskOutcome::Resource(apply(spec, client, check_mode).await?)
            }
            Task::Job(spec) => TaskOutcome::Resource(apply(spec, client, check_mode).await?),
            Task::List(spec) => TaskOutcome::Resource(apply(spec, client, check_mode).await?),
            Task::PreprocessRule(spec) => {
                TaskOutcome::Resource(apply(spec, client, check_mode).await?)
            }
            Task::Credential(spec) => {
                TaskOutcome::Resource(apply(spec, client, check_mode).await?)
            }
            Task::Account(spec) => {
                let spec = AccountSpec {
                    status_policy: AccountStatusPolicy::from(self.sync),
                    ..spec.clone()
                };
                TaskOutcome::Resource(apply(&spec, client, check_mode).await?)
            }
            Task::SyncAccounts(request) => TaskOutcome::Sync(self.sync_runner().run(request).await?),
            Task::SyncAllAccounts(request) => TaskOutcome::SyncAll(
                self.sync_runner()
                    .sync_all(request.timeout_secs.map(Duration::from_secs))
                    .await?,
            ),
        };
        Ok(outcome)
    }

    /// Run every task in order, stopping at the first failure
    ///
    /// `on_outcome` sees each result as soon as its task finishes. A sync
    /// report with failed accounts stops the run when `sync.fail_on_error`
    /// is set, after the report was handed to `on_outcome`.
    pub async fn run<F>(&self, manifest: &Manifest, mut on_outcome: F) -> Result<RunSummary, ManifestError>
    where
        F: FnMut(&Task, &TaskOutcome),
    {
        let mut summary = RunSummary::default();
        for (position, task) in manifest.tasks.iter().enumerate() {
            let index = position + 1;
            let failed = |source: TaskError| {
                error!(task = index, label = %task.label(), error = %source, "Task failed");
                ManifestError::TaskFailed {
                    index,
                    task: task.label(),
                    source,
                }
            };

            let outcome = self.run_task(task).await.map_err(failed)?;
            on_outcome(task, &outcome);

            summary.tasks += 1;
            if outcome.changed() {
                summary.changed += 1;
            }
            if let TaskOutcome::Sync(report) = &outcome {
                report
                    .ensure_success(self.sync.fail_on_error)
                    .map_err(|e| failed(e.into()))?;
            }
        }
        info!(
            tasks = summary.tasks,
            changed = summary.changed,
            check_mode = self.check_mode,
            "Manifest applied"
        );
        Ok(summary)
    }

    fn sync_runner(&self) -> ContentSync<'_, XsoarClient> {
        ContentSync::new(
            self.client,
            SyncOptions::from_config(self.sync, self.check_mode),
        )
    }
}
