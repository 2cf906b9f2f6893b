//! Per-account content sync
//!
//! Accounts are processed one after another. Each account's diff and push
//! run under one timeout; a failure or timeout is recorded in the report and
//! the run moves on to the next account.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::tenant::{ContentDiff, TenantApi};
use crate::config::SyncConfig;
use crate::error::{ClientError, SyncError};
use crate::resources::account::AccountStatusPolicy;

/// Which accounts and items to sync
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncRequest {
    /// Accounts to sync, by display name
    #[serde(default)]
    pub accounts: Vec<String>,
    /// Sync every account known to the master
    #[serde(default)]
    pub all_accounts: bool,
    /// Content items to push, by name
    #[serde(default)]
    pub items: Vec<String>,
    /// Push the whole diff
    #[serde(default)]
    pub all_items: bool,
    /// Per-account timeout overriding the configured one
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl SyncRequest {
    /// Check that exactly one target form and one item form were given
    /// and that a timeout override is not zero
    pub fn validate(&self) -> Result<(), SyncError> {
        let invalid = |reason: &str| Err(SyncError::InvalidRequest(reason.to_string()));
        if self.timeout_secs == Some(0) {
            return invalid("timeout_secs must be greater than zero");
        }
        match (self.accounts.is_empty(), self.all_accounts) {
            (true, false) => return invalid("one of accounts or all_accounts is required"),
            (false, true) => return invalid("accounts and all_accounts are mutually exclusive"),
            _ => {}
        }
        match (self.items.is_empty(), self.all_items) {
            (true, false) => invalid("one of items or all_items is required"),
            (false, true) => invalid("items and all_items are mutually exclusive"),
            _ => Ok(()),
        }
    }
}

/// Settings of one sync run
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOptions {
    /// Budget for diffing and pushing one account
    pub account_timeout: Duration,
    /// How down accounts are recognized
    pub status_policy: AccountStatusPolicy,
    /// Compute the report without pushing
    pub check_mode: bool,
}

impl SyncOptions {
    /// Options from the sync section of the configuration
    pub fn from_config(config: &SyncConfig, check_mode: bool) -> Self {
        Self {
            account_timeout: Duration::from_secs(config.account_timeout_secs),
            status_policy: AccountStatusPolicy::from(config),
            check_mode,
        }
    }
}

/// What happened to one account
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AccountOutcome {
    /// Items were pushed (or would be, in check mode)
    Synced {
        /// Number of items pushed
        pushed: usize,
        /// Names of the pushed items
        items: Vec<String>,
    },
    /// Nothing to push
    Unchanged,
    /// Account was not attempted
    Skipped {
        /// Why it was skipped
        reason: String,
    },
    /// Diff or push failed
    Failed {
        /// Error message
        error: String,
    },
    /// Diff and push did not finish in time
    TimedOut {
        /// Timeout that elapsed
        timeout_secs: u64,
    },
}

/// Outcome for one account
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountReport {
    /// Account display name
    pub account: String,
    #[serde(flatten)]
    pub outcome: AccountOutcome,
}

/// Summary of a sync run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    /// Whether any account received content
    pub changed: bool,
    /// Whether pushes were suppressed
    pub check_mode: bool,
    /// Human readable summary
    pub msg: String,
    /// Per-account outcomes in processing order
    pub accounts: Vec<AccountReport>,
}

impl SyncReport {
    fn new(accounts: Vec<AccountReport>, check_mode: bool) -> Self {
        let count = |pred: fn(&AccountOutcome) -> bool| {
            accounts.iter().filter(|r| pred(&r.outcome)).count()
        };
        let synced = count(|o| matches!(o, AccountOutcome::Synced { .. }));
        let unchanged = count(|o| matches!(o, AccountOutcome::Unchanged));
        let skipped = count(|o| matches!(o, AccountOutcome::Skipped { .. }));
        let failed = count(|o| {
            matches!(
                o,
                AccountOutcome::Failed { .. } | AccountOutcome::TimedOut { .. }
            )
        });
        Self {
            changed: synced > 0,
            check_mode,
            msg: format!(
                "{} synced, {} unchanged, {} skipped, {} failed",
                synced, unchanged, skipped, failed
            ),
            accounts,
        }
    }

    /// Accounts that failed or timed out
    pub fn failed_count(&self) -> usize {
        self.accounts
            .iter()
            .filter(|r| {
                matches!(
                    r.outcome,
                    AccountOutcome::Failed { .. } | AccountOutcome::TimedOut { .. }
                )
            })
            .count()
    }

    /// Turn account failures into an error when the run must fail on them
    pub fn ensure_success(&self, fail_on_error: bool) -> Result<(), SyncError> {
        let failed = self.failed_count();
        if fail_on_error && failed > 0 {
            return Err(SyncError::AccountsFailed {
                failed,
                total: self.accounts.len(),
            });
        }
        Ok(())
    }
}

/// Result of the server-side sync of all accounts
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncAllReport {
    /// Always true, the server does not report what it pushed
    pub changed: bool,
    pub check_mode: bool,
    pub msg: String,
}

struct Target {
    name: String,
    skip_reason: Option<String>,
}

/// Sync runner over a tenant API
pub struct ContentSync<'a, A: TenantApi + ?Sized> {
    api: &'a A,
    options: SyncOptions,
}

impl<'a, A: TenantApi + ?Sized> ContentSync<'a, A> {
    /// Create a runner
    pub fn new(api: &'a A, options: SyncOptions) -> Self {
        Self { api, options }
    }

    /// Sync the requested items to the requested accounts
    pub async fn run(&self, request: &SyncRequest) -> Result<SyncReport, SyncError> {
        request.validate()?;
        let timeout = request
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.options.account_timeout);

        let targets = self.resolve_targets(request).await?;
        info!(
            accounts = targets.len(),
            check_mode = self.options.check_mode,
            "Starting content sync"
        );

        let mut reports = Vec::with_capacity(targets.len());
        for target in targets {
            let outcome = match target.skip_reason {
                Some(reason) => {
                    warn!(account = %target.name, reason = %reason, "Skipping account");
                    AccountOutcome::Skipped { reason }
                }
                None => self.sync_with_timeout(&target.name, request, timeout).await,
            };
            reports.push(AccountReport {
                account: target.name,
                outcome,
            });
        }

        let report = SyncReport::new(reports, self.options.check_mode);
        info!(changed = report.changed, summary = %report.msg, "Content sync finished");
        Ok(report)
    }

    /// Trigger the server-side sync of every account
    pub async fn sync_all(&self, timeout: Option<Duration>) -> Result<SyncAllReport, SyncError> {
        let timeout = timeout.unwrap_or(self.options.account_timeout);
        if timeout.is_zero() {
            return Err(SyncError::InvalidRequest(
                "timeout_secs must be greater than zero".to_string(),
            ));
        }
        let msg = if self.options.check_mode {
            "All accounts would be synced"
        } else {
            self.api.sync_all(timeout).await.map_err(SyncError::SyncAll)?;
            info!(timeout_secs = timeout.as_secs(), "All accounts synced");
            "All accounts synced"
        };
        Ok(SyncAllReport {
            changed: true,
            check_mode: self.options.check_mode,
            msg: msg.to_string(),
        })
    }

    async fn resolve_targets(&self, request: &SyncRequest) -> Result<Vec<Target>, SyncError> {
        let accounts = self
            .api
            .list_accounts()
            .await
            .map_err(SyncError::AccountList)?;
        let policy = &self.options.status_policy;

        if request.all_accounts {
            return Ok(accounts
                .iter()
                .map(|account| Target {
                    name: account.display_name().to_string(),
                    skip_reason: policy.is_down(account).then(|| down_reason(policy.status(account))),
                })
                .collect());
        }

        Ok(request
            .accounts
            .iter()
            .map(|name| {
                let known = accounts.iter().find(|a| a.display_name() == name.as_str());
                let skip_reason = match known {
                    None => Some("account not found".to_string()),
                    Some(account) if policy.is_down(account) => {
                        Some(down_reason(policy.status(account)))
                    }
                    Some(_) => None,
                };
                Target {
                    name: name.clone(),
                    skip_reason,
                }
            })
            .collect())
    }

    async fn sync_with_timeout(
        &self,
        account: &str,
        request: &SyncRequest,
        timeout: Duration,
    ) -> AccountOutcome {
        match tokio::time::timeout(timeout, self.sync_account(account, request)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => {
                warn!(account = account, error = %err, "Account sync failed");
                AccountOutcome::Failed {
                    error: err.to_string(),
                }
            }
            Err(_) => {
                error!(
                    account = account,
                    timeout_secs = timeout.as_secs(),
                    "Account sync timed out"
                );
                AccountOutcome::TimedOut {
                    timeout_secs: timeout.as_secs(),
                }
            }
        }
    }

    async fn sync_account(
        &self,
        account: &str,
        request: &SyncRequest,
    ) -> Result<AccountOutcome, ClientError> {
        let diff = self.api.content_diff(account).await?;
        let selected: ContentDiff = if request.all_items {
            diff
        } else {
            diff.select(&request.items)
        };

        if selected.is_empty() {
            debug!(account = account, "Account content is current");
            return Ok(AccountOutcome::Unchanged);
        }

        let items = selected.item_names();
        let pushed = selected.item_count();
        if !self.options.check_mode {
            self.api.push_content(account, &selected).await?;
        }
        info!(
            account = account,
            pushed,
            check_mode = self.options.check_mode,
            "Pushed content to account"
        );
        Ok(AccountOutcome::Synced { pushed, items })
    }
}

fn down_reason(status: Option<&str>) -> String {
    format!("account is down (status {})", status.unwrap_or("unknown"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::account::RemoteAccount;
    use crate::sync::tenant::MockTenantApi;
    use mockall::predicate::eq;
    use serde_json::json;

    fn account(name: &str, status: &str) -> RemoteAccount {
        serde_json::from_value(json!({
            "name": format!("acc_{}", name),
            "displayName": name,
            "status": status,
        }))
        .unwrap()
    }

    fn diff_with(names: &[&str]) -> ContentDiff {
        let items: Vec<_> = names
            .iter()
            .map(|name| json!({"name": name, "type": "playbook"}))
            .collect();
        serde_json::from_value(json!({"add": {"playbook": items}})).unwrap()
    }

    fn options() -> SyncOptions {
        SyncOptions::from_config(&SyncConfig::default(), false)
    }

    fn all_items(accounts: &[&str]) -> SyncRequest {
        SyncRequest {
            accounts: accounts.iter().map(|a| a.to_string()).collect(),
            all_items: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_request_validation() {
        assert!(all_items(&["a"]).validate().is_ok());

        let mut request = all_items(&["a"]);
        request.all_accounts = true;
        assert!(matches!(
            request.validate(),
            Err(SyncError::InvalidRequest(_))
        ));

        let request = SyncRequest {
            all_accounts: true,
            ..Default::default()
        };
        assert!(request.validate().is_err());

        let request = SyncRequest {
            all_accounts: true,
            items: vec!["x".to_string()],
            all_items: true,
            ..Default::default()
        };
        assert!(request.validate().is_err());
    }

    #[tokio::test]
    async fn test_invalid_request_makes_no_calls() {
        let api = MockTenantApi::new();
        let runner = ContentSync::new(&api, options());
        let result = runner.run(&SyncRequest::default()).await;
        assert!(matches!(result, Err(SyncError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_down_account_is_skipped_not_fatal() {
        let mut api = MockTenantApi::new();
        api.expect_list_accounts()
            .returning(|| Ok(vec![account("t1", "running"), account("t2", "stopped")]));
        api.expect_content_diff()
            .with(eq("t1"))
            .times(1)
            .returning(|_| Ok(diff_with(&["Phishing"])));
        api.expect_push_content()
            .withf(|account, diff| account == "t1" && diff.item_count() == 1)
            .times(1)
            .returning(|_, _| Ok(()));

        let runner = ContentSync::new(&api, options());
        let request = SyncRequest {
            all_accounts: true,
            all_items: true,
            ..Default::default()
        };
        let report = runner.run(&request).await.unwrap();

        assert!(report.changed);
        assert_eq!(report.accounts.len(), 2);
        assert_eq!(
            report.accounts[0].outcome,
            AccountOutcome::Synced {
                pushed: 1,
                items: vec!["Phishing".to_string()]
            }
        );
        assert!(matches!(
            report.accounts[1].outcome,
            AccountOutcome::Skipped { .. }
        ));
        assert_eq!(report.msg, "1 synced, 0 unchanged, 1 skipped, 0 failed");
    }

    #[tokio::test]
    async fn test_failed_account_does_not_stop_the_run() {
        let mut api = MockTenantApi::new();
        api.expect_list_accounts()
            .returning(|| Ok(vec![account("t1", "running"), account("t2", "running")]));
        api.expect_content_diff()
            .with(eq("t1"))
            .returning(|_| Err(ClientError::ServerError(502)));
        api.expect_content_diff()
            .with(eq("t2"))
            .returning(|_| Ok(diff_with(&["Phishing"])));
        api.expect_push_content().times(1).returning(|_, _| Ok(()));

        let runner = ContentSync::new(&api, options());
        let report = runner.run(&all_items(&["t1", "t2"])).await.unwrap();

        assert_eq!(
            report.accounts[0].outcome,
            AccountOutcome::Failed {
                error: "Server error: HTTP 502".to_string()
            }
        );
        assert!(matches!(
            report.accounts[1].outcome,
            AccountOutcome::Synced { .. }
        ));
        assert_eq!(report.failed_count(), 1);
        assert!(report.ensure_success(false).is_ok());
        assert_eq!(
            report.ensure_success(true),
            Err(SyncError::AccountsFailed {
                failed: 1,
                total: 2
            })
        );
    }

    #[tokio::test]
    async fn test_unknown_account_is_skipped() {
        let mut api = MockTenantApi::new();
        api.expect_list_accounts()
            .returning(|| Ok(vec![account("t1", "running")]));
        api.expect_content_diff().times(0);

        let runner = ContentSync::new(&api, options());
        let report = runner.run(&all_items(&["ghost"])).await.unwrap();

        assert!(!report.changed);
        assert_eq!(
            report.accounts[0].outcome,
            AccountOutcome::Skipped {
                reason: "account not found".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_only_requested_items_are_pushed() {
        let mut api = MockTenantApi::new();
        api.expect_list_accounts()
            .returning(|| Ok(vec![account("t1", "running")]));
        api.expect_content_diff()
            .returning(|_| Ok(diff_with(&["Phishing", "Malware"])));
        api.expect_push_content()
            .withf(|_, diff| diff.item_names() == vec!["Malware".to_string()])
            .times(1)
            .returning(|_, _| Ok(()));

        let runner = ContentSync::new(&api, options());
        let request = SyncRequest {
            accounts: vec!["t1".to_string()],
            items: vec!["Malware".to_string(), "NotInDiff".to_string()],
            ..Default::default()
        };
        let report = runner.run(&request).await.unwrap();

        assert!(report.changed);
    }

    #[tokio::test]
    async fn test_empty_diff_is_unchanged() {
        let mut api = MockTenantApi::new();
        api.expect_list_accounts()
            .returning(|| Ok(vec![account("t1", "running")]));
        api.expect_content_diff()
            .returning(|_| Ok(ContentDiff::default()));
        api.expect_push_content().times(0);

        let runner = ContentSync::new(&api, options());
        let report = runner.run(&all_items(&["t1"])).await.unwrap();

        assert!(!report.changed);
        assert_eq!(report.accounts[0].outcome, AccountOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_check_mode_does_not_push() {
        let mut api = MockTenantApi::new();
        api.expect_list_accounts()
            .returning(|| Ok(vec![account("t1", "running")]));
        api.expect_content_diff()
            .returning(|_| Ok(diff_with(&["Phishing"])));
        api.expect_push_content().times(0);

        let runner = ContentSync::new(&api, SyncOptions::from_config(&SyncConfig::default(), true));
        let report = runner.run(&all_items(&["t1"])).await.unwrap();

        assert!(report.changed);
        assert!(report.check_mode);
    }

    #[tokio::test]
    async fn test_account_list_failure_aborts() {
        let mut api = MockTenantApi::new();
        api.expect_list_accounts()
            .returning(|| Err(ClientError::Unauthorized(401)));

        let runner = ContentSync::new(&api, options());
        let result = runner.run(&all_items(&["t1"])).await;

        assert_eq!(
            result,
            Err(SyncError::AccountList(ClientError::Unauthorized(401)))
        );
    }

    #[tokio::test]
    async fn test_sync_all_uses_timeout() {
        let mut api = MockTenantApi::new();
        api.expect_sync_all()
            .with(eq(Duration::from_secs(120)))
            .times(1)
            .returning(|_| Ok(()));

        let runner = ContentSync::new(&api, options());
        let report = runner
            .sync_all(Some(Duration::from_secs(120)))
            .await
            .unwrap();

        assert!(report.changed);
    }

    #[tokio::test]
    async fn test_zero_timeout_rejected() {
        let mut api = MockTenantApi::new();
        api.expect_list_accounts().times(0);
        api.expect_sync_all().times(0);
        let runner = ContentSync::new(&api, options());

        let mut request = all_items(&["t1"]);
        request.timeout_secs = Some(0);
        assert!(matches!(
            runner.run(&request).await,
            Err(SyncError::InvalidRequest(_))
        ));
        assert!(matches!(
            runner.sync_all(Some(Duration::ZERO)).await,
            Err(SyncError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_sync_all_check_mode_message() {
        let mut api = MockTenantApi::new();
        api.expect_sync_all().times(0);

        let runner = ContentSync::new(&api, SyncOptions::from_config(&SyncConfig::default(), true));
        let report = runner.sync_all(None).await.unwrap();

        assert!(report.changed);
        assert_eq!(report.msg, "All accounts would be synced");
    }

    #[tokio::test]
    async fn test_sync_all_failure() {
        let mut api = MockTenantApi::new();
        api.expect_sync_all()
            .returning(|_| Err(ClientError::NetworkTimeout));

        let runner = ContentSync::new(&api, options());
        let result = runner.sync_all(None).await;

        assert_eq!(result, Err(SyncError::SyncAll(ClientError::NetworkTimeout)));
    }

    #[test]
    fn test_report_serialization() {
        let report = SyncReport::new(
            vec![
                AccountReport {
                    account: "t1".to_string(),
                    outcome: AccountOutcome::TimedOut { timeout_secs: 5 },
                },
                AccountReport {
                    account: "t2".to_string(),
                    outcome: AccountOutcome::Unchanged,
                },
            ],
            false,
        );
        let value = serde_json::to_value(&report).unwrap();

        assert_eq!(value["changed"], false);
        assert_eq!(value["accounts"][0]["status"], "timed_out");
        assert_eq!(value["accounts"][0]["timeout_secs"], 5);
        assert_eq!(value["accounts"][1]["status"], "unchanged");
    }
}
