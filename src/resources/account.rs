//! Multi-tenant account resource
//!
//! Accounts live on the master server only and are never scoped to another
//! account. Besides the account definition (roles, propagation labels, host
//! group) the handler can drive the account's run status.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::debug;

use super::traits::{DesiredState, Mutation, Reconcile, RemoteId};
use crate::client::XsoarClient;
use crate::config::SyncConfig;
use crate::error::{ClientError, ModuleError};

/// Prefix the server puts in front of account names
pub const ACCOUNT_PREFIX: &str = "acc_";

/// How the run status of an account is read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountStatusPolicy {
    /// Field of the account record holding the status
    pub status_field: String,
    /// Status values (case-insensitive) meaning the account is down
    pub down_statuses: Vec<String>,
}

impl Default for AccountStatusPolicy {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for AccountStatusPolicy {
    fn from(config: &SyncConfig) -> Self {
        Self {
            status_field: config.status_field.clone(),
            down_statuses: config.down_statuses.clone(),
        }
    }
}

impl AccountStatusPolicy {
    /// Status string of an account, if the record carries one
    pub fn status<'a>(&self, account: &'a RemoteAccount) -> Option<&'a str> {
        account.extra.get(&self.status_field).and_then(Value::as_str)
    }

    /// Whether the account is reported down; a missing status counts as up
    pub fn is_down(&self, account: &RemoteAccount) -> bool {
        self.status(account).is_some_and(|status| {
            self.down_statuses
                .iter()
                .any(|down| down.eq_ignore_ascii_case(status))
        })
    }
}

/// Roles block of an account record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountRoles {
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Tenant account as listed by the master
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteAccount {
    /// Internal name, `acc_<name>`
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub propagation_labels: Option<Vec<String>>,
    #[serde(default)]
    pub roles: Option<AccountRoles>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RemoteAccount {
    /// Name the operator addresses the account by
    pub fn display_name(&self) -> &str {
        match self.display_name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => self.name.strip_prefix(ACCOUNT_PREFIX).unwrap_or(&self.name),
        }
    }
}

/// Run status of one account
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountStatus {
    /// Display name
    pub name: String,
    /// Reported status
    pub status: Option<String>,
    /// Whether the status is one of the down statuses
    pub down: bool,
}

/// List every tenant account known to the master
pub async fn list_accounts(client: &XsoarClient) -> Result<Vec<RemoteAccount>, ClientError> {
    let url = client.endpoint(None, "accounts");
    let accounts: Option<Vec<RemoteAccount>> = client.get(&url).await?;
    Ok(accounts.unwrap_or_default())
}

/// Report the run status of every tenant account
pub async fn account_statuses(
    client: &XsoarClient,
    policy: &AccountStatusPolicy,
) -> Result<Vec<AccountStatus>, ClientError> {
    let accounts = list_accounts(client).await?;
    Ok(accounts
        .iter()
        .map(|account| AccountStatus {
            name: account.display_name().to_string(),
            status: policy.status(account).map(str::to_string),
            down: policy.is_down(account),
        })
        .collect())
}

/// Desired state of a tenant account
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AccountSpec {
    /// Account name without the `acc_` prefix
    pub name: String,
    #[serde(default = "default_propagation_labels")]
    pub propagation_labels: Vec<String>,
    #[serde(default = "default_account_roles")]
    pub account_roles: Vec<String>,
    /// Host group the account runs on
    #[serde(default)]
    pub host_group_id: Option<String>,
    /// Host name resolved to its host group
    #[serde(default)]
    pub host_name: Option<String>,
    #[serde(default = "default_sync_on_creation")]
    pub sync_on_creation: bool,
    /// Timeout for create and purge calls
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Desired run status, left alone when unset
    #[serde(default)]
    pub running: Option<bool>,
    #[serde(default)]
    pub state: DesiredState,
    /// How the run status is read, taken from the sync settings
    #[serde(skip)]
    pub status_policy: AccountStatusPolicy,
}

fn default_propagation_labels() -> Vec<String> {
    vec!["all".to_string()]
}

fn default_account_roles() -> Vec<String> {
    vec!["Administrator".to_string()]
}

fn default_sync_on_creation() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize)]
struct HaGroup {
    #[serde(default)]
    id: RemoteId,
    #[serde(default)]
    name: String,
}

impl AccountSpec {
    fn account_name(&self) -> String {
        format!("{}{}", ACCOUNT_PREFIX, self.name)
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn definition_matches(&self, remote: &RemoteAccount) -> bool {
        if !self.propagation_labels.is_empty()
            && remote.propagation_labels.as_ref() != Some(&self.propagation_labels)
        {
            return false;
        }
        if !self.account_roles.is_empty() {
            let roles = remote.roles.as_ref().map(|r| r.roles.as_slice());
            if roles != Some(self.account_roles.as_slice()) {
                return false;
            }
        }
        true
    }

    fn run_status_matches(&self, remote: &RemoteAccount) -> bool {
        match self.running {
            Some(running) => self.status_policy.is_down(remote) != running,
            None => true,
        }
    }

    fn run_status_call(&self, client: &XsoarClient, running: bool) -> Mutation {
        let verb = if running { "start" } else { "stop" };
        let url = client.endpoint(None, &format!("account/{}/{}", verb, self.account_name()));
        Mutation::post(url, json!({})).without_resource()
    }

    async fn resolve_host_group(&self, client: &XsoarClient) -> Result<String, ModuleError> {
        let host_name = match (&self.host_name, &self.host_group_id) {
            (Some(host_name), _) => host_name,
            (None, Some(id)) => return Ok(id.clone()),
            (None, None) => return Ok(String::new()),
        };

        let url = client.endpoint(None, "ha-groups");
        let groups: Option<Vec<HaGroup>> =
            client.get(&url).await.map_err(|source| ModuleError::Api {
                action: "resolve the host group of",
                kind: Self::KIND,
                name: self.name.clone(),
                source,
            })?;

        let mut matching = groups
            .unwrap_or_default()
            .into_iter()
            .filter(|group| group.name.split(':').next() == Some(host_name.as_str()));
        match (matching.next(), matching.next()) {
            (Some(group), None) if group.id != RemoteId::Missing => {
                debug!(host = %host_name, host_group = %group.id, "Resolved host group");
                Ok(group.id.to_string())
            }
            _ => Err(ModuleError::invalid(
                Self::KIND,
                &self.name,
                format!("could not find the host group of host {}", host_name),
            )),
        }
    }
}

#[async_trait]
impl Reconcile for AccountSpec {
    type Remote = RemoteAccount;

    const KIND: &'static str = "Account";

    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> DesiredState {
        self.state
    }

    fn validate(&self) -> Result<(), ModuleError> {
        if self.host_group_id.is_some() && self.host_name.is_some() {
            return Err(ModuleError::invalid(
                Self::KIND,
                &self.name,
                "host_group_id and host_name are mutually exclusive",
            ));
        }
        if self.timeout_secs == 0 {
            return Err(ModuleError::invalid(
                Self::KIND,
                &self.name,
                "timeout_secs must be greater than zero",
            ));
        }
        Ok(())
    }

    async fn list(&self, client: &XsoarClient) -> Result<Vec<RemoteAccount>, ClientError> {
        list_accounts(client).await
    }

    fn is_named(&self, remote: &RemoteAccount) -> bool {
        remote.name == self.account_name()
    }

    fn matches(&self, remote: &RemoteAccount) -> bool {
        self.definition_matches(remote) && self.run_status_matches(remote)
    }

    async fn plan_create(&self, client: &XsoarClient) -> Result<Vec<Mutation>, ModuleError> {
        let host_group_id = self.resolve_host_group(client).await?;
        let body = json!({
            "name": self.name,
            "accountRoles": self.account_roles,
            "propagationLabels": self.propagation_labels,
            "syncOnCreation": self.sync_on_creation,
            "hostGroupId": host_group_id,
        });
        let mut plan =
            vec![Mutation::post(client.endpoint(None, "account"), body).with_timeout(self.timeout())];
        if self.running == Some(false) {
            plan.push(self.run_status_call(client, false));
        }
        Ok(plan)
    }

    async fn plan_update(
        &self,
        client: &XsoarClient,
        remote: RemoteAccount,
    ) -> Result<Vec<Mutation>, ModuleError> {
        let mut plan = Vec::new();
        if !self.definition_matches(&remote) {
            let url = client.endpoint(None, &format!("account/update/{}", self.account_name()));
            plan.push(
                Mutation::post(
                    url,
                    json!({
                        "selectedRoles": self.account_roles,
                        "selectedPropagationLabels": self.propagation_labels,
                    }),
                )
                .without_resource(),
            );
        }
        if let Some(running) = self.running {
            if !self.run_status_matches(&remote) {
                plan.push(self.run_status_call(client, running));
            }
        }
        Ok(plan)
    }

    fn plan_delete(&self, client: &XsoarClient, _remote: &RemoteAccount) -> Vec<Mutation> {
        let url = client.endpoint(None, &format!("account/purge/{}", self.account_name()));
        vec![Mutation::delete(url).with_timeout(self.timeout())]
    }

    fn updated_view(&self, mut remote: Value) -> Value {
        if let Some(account) = remote.as_object_mut() {
            if !self.propagation_labels.is_empty() {
                account.insert("propagationLabels".to_string(), json!(self.propagation_labels));
            }
            if !self.account_roles.is_empty() {
                if !account.get("roles").is_some_and(Value::is_object) {
                    account.insert("roles".to_string(), json!({}));
                }
                if let Some(Value::Object(roles)) = account.get_mut("roles") {
                    roles.insert("roles".to_string(), json!(self.account_roles));
                }
            }
        }
        remote
    }
}
