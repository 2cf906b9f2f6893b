//! Reconcile trait and the generic desired-state driver
//!
//! Every resource kind implements [`Reconcile`]: it knows how to find its
//! remote record by name, decide whether that record already matches the
//! desired state, and plan the mutating calls that would make it match.
//! [`apply`] runs the present/absent state machine on top of that.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

use crate::client::XsoarClient;
use crate::error::{ClientError, ModuleError};

/// State the operator wants the resource to be left in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DesiredState {
    /// Resource must exist with the desired fields
    #[default]
    Present,
    /// Resource must not exist
    Absent,
}

/// What a run did to the remote resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Remote state already matched
    None,
    /// Resource was created
    Created,
    /// Resource was updated in place
    Updated,
    /// Resource was deleted
    Deleted,
}

impl Action {
    fn verb(self) -> &'static str {
        match self {
            Action::None => "look up",
            Action::Created => "create",
            Action::Updated => "update",
            Action::Deleted => "delete",
        }
    }

    fn past_tense(self) -> &'static str {
        match self {
            Action::None => "unchanged",
            Action::Created => "created",
            Action::Updated => "updated",
            Action::Deleted => "deleted",
        }
    }
}

/// Identifier of a remote record; XSOAR returns both string and numeric ids
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RemoteId {
    /// String identifier
    Text(String),
    /// Numeric identifier
    Number(i64),
    /// Identifier absent or null
    #[default]
    Missing,
}

impl RemoteId {
    /// Whether the id equals the given string
    pub fn is(&self, other: &str) -> bool {
        match self {
            RemoteId::Text(id) => id == other,
            RemoteId::Number(id) => id.to_string() == other,
            RemoteId::Missing => false,
        }
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteId::Text(id) => f.write_str(id),
            RemoteId::Number(id) => write!(f, "{}", id),
            RemoteId::Missing => Ok(()),
        }
    }
}

/// HTTP verb of a planned mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationMethod {
    /// POST
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
}

/// One mutating API call planned by a resource
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    /// HTTP verb
    pub method: MutationMethod,
    /// Fully scoped URL
    pub url: String,
    /// JSON body (`Null` for DELETE)
    pub body: Value,
    /// Timeout overriding the client default
    pub timeout: Option<Duration>,
    /// Whether this call's response (or body) is the resulting resource
    pub reports_resource: bool,
}

impl Mutation {
    /// Plan a POST
    pub fn post(url: String, body: Value) -> Self {
        Self {
            method: MutationMethod::Post,
            url,
            body,
            timeout: None,
            reports_resource: true,
        }
    }

    /// Plan a PUT
    pub fn put(url: String, body: Value) -> Self {
        Self {
            method: MutationMethod::Put,
            url,
            body,
            timeout: None,
            reports_resource: true,
        }
    }

    /// Plan a DELETE
    pub fn delete(url: String) -> Self {
        Self {
            method: MutationMethod::Delete,
            url,
            body: Value::Null,
            timeout: None,
            reports_resource: false,
        }
    }

    /// Override the request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Mark a call whose response does not describe the resource
    pub fn without_resource(mut self) -> Self {
        self.reports_resource = false;
        self
    }

    async fn execute(&self, client: &XsoarClient) -> Result<Option<Value>, ClientError> {
        match (self.method, self.timeout) {
            (MutationMethod::Post, Some(timeout)) => {
                client
                    .post_with_timeout(&self.url, &self.body, timeout)
                    .await
            }
            (MutationMethod::Post, None) => client.post(&self.url, &self.body).await,
            (MutationMethod::Put, Some(timeout)) => {
                client.put_with_timeout(&self.url, &self.body, timeout).await
            }
            (MutationMethod::Put, None) => client.put(&self.url, &self.body).await,
            (MutationMethod::Delete, timeout) => client.delete(&self.url, timeout).await,
        }
    }
}

/// Outcome of reconciling one resource
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleResult {
    /// Resource kind
    pub kind: &'static str,
    /// Resource name
    pub name: String,
    /// Requested state
    pub state: DesiredState,
    /// Whether the remote state changed (or would change in check mode)
    pub changed: bool,
    /// What was done
    pub action: Action,
    /// Whether mutating calls were suppressed
    pub check_mode: bool,
    /// Human readable summary
    pub msg: String,
    /// Resulting resource representation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<Value>,
}

/// A resource kind that can be driven to a desired state
#[async_trait]
pub trait Reconcile: Send + Sync {
    /// Typed view of the remote record
    type Remote: Serialize + Send + Sync;

    /// Display name of the resource kind
    const KIND: &'static str;

    /// Name the resource is addressed by
    fn name(&self) -> &str;

    /// Requested state
    fn state(&self) -> DesiredState;

    /// Reject inconsistent desired state before any network call
    fn validate(&self) -> Result<(), ModuleError> {
        Ok(())
    }

    /// List the remote records of this kind in the resource's scope
    async fn list(&self, client: &XsoarClient) -> Result<Vec<Self::Remote>, ClientError>;

    /// Whether a remote record is the one this resource addresses
    fn is_named(&self, remote: &Self::Remote) -> bool;

    /// Whether the remote record already has the desired fields
    fn matches(&self, remote: &Self::Remote) -> bool;

    /// Calls that create the resource
    async fn plan_create(&self, client: &XsoarClient) -> Result<Vec<Mutation>, ModuleError>;

    /// Calls that bring an existing record in line with the desired state
    async fn plan_update(
        &self,
        client: &XsoarClient,
        remote: Self::Remote,
    ) -> Result<Vec<Mutation>, ModuleError>;

    /// Calls that delete an existing record
    fn plan_delete(&self, client: &XsoarClient, remote: &Self::Remote) -> Vec<Mutation>;

    /// Strip secrets from a body before it is reported
    fn redact(&self, body: Value) -> Value {
        body
    }

    /// Resource reported after an update whose calls returned no record
    fn updated_view(&self, remote: Value) -> Value {
        remote
    }
}

/// Pick the single record accepted by `is_named`, failing when several are
pub fn find_by_name<T>(
    kind: &'static str,
    name: &str,
    records: Vec<T>,
    is_named: impl Fn(&T) -> bool,
) -> Result<Option<T>, ModuleError> {
    let mut matching: Vec<T> = records.into_iter().filter(|r| is_named(r)).collect();
    match matching.len() {
        0 => Ok(None),
        1 => Ok(matching.pop()),
        count => Err(ModuleError::AmbiguousResource {
            kind,
            name: name.to_string(),
            count,
        }),
    }
}

/// Drive one resource to its desired state
///
/// In check mode the planned calls are reported but not sent.
pub async fn apply<R: Reconcile>(
    resource: &R,
    client: &XsoarClient,
    check_mode: bool,
) -> Result<ModuleResult, ModuleError> {
    resource.validate()?;

    let name = resource.name().to_string();
    let api_error = |action: Action, source: ClientError| ModuleError::Api {
        action: action.verb(),
        kind: R::KIND,
        name: name.clone(),
        source,
    };

    let records = resource
        .list(client)
        .await
        .map_err(|e| api_error(Action::None, e))?;
    let remote = find_by_name(R::KIND, &name, records, |r| resource.is_named(r))?;

    let to_value = |remote: &R::Remote| {
        serde_json::to_value(remote)
            .map_err(|e| api_error(Action::None, ClientError::InvalidData(e.to_string())))
    };

    // `current` is the remote record as found, used when no call reports one
    let (action, plan, current) = match (resource.state(), remote) {
        (DesiredState::Absent, None) => (Action::None, Vec::new(), None),
        (DesiredState::Absent, Some(remote)) => {
            let plan = resource.plan_delete(client, &remote);
            (Action::Deleted, plan, None)
        }
        (DesiredState::Present, None) => {
            let plan = resource.plan_create(client).await?;
            (Action::Created, plan, None)
        }
        (DesiredState::Present, Some(remote)) if resource.matches(&remote) => {
            let current = to_value(&remote)?;
            (Action::None, Vec::new(), Some(current))
        }
        (DesiredState::Present, Some(remote)) => {
            let current = resource.updated_view(to_value(&remote)?);
            let plan = resource.plan_update(client, remote).await?;
            (Action::Updated, plan, Some(current))
        }
    };

    if plan.is_empty() {
        debug!(kind = R::KIND, name = %name, "Remote state already matches");
        let resource_body = current.map(|v| resource.redact(v));
        return Ok(ModuleResult {
            kind: R::KIND,
            name: name.clone(),
            state: resource.state(),
            changed: false,
            action: Action::None,
            check_mode,
            msg: match resource.state() {
                DesiredState::Absent => format!("{} {} already absent", R::KIND, name),
                DesiredState::Present => format!("{} {} unchanged", R::KIND, name),
            },
            resource: resource_body,
        });
    }

    let is_record = |body: &Value| body.is_object() || body.is_array();
    let mut reported = None;
    let mut already_gone = false;
    for mutation in &plan {
        if check_mode {
            debug!(kind = R::KIND, name = %name, url = %mutation.url, "Check mode, skipping call");
            continue;
        }
        match mutation.execute(client).await {
            Ok(response) if mutation.reports_resource => {
                reported = response
                    .filter(is_record)
                    .or_else(|| Some(mutation.body.clone()).filter(is_record))
                    .or(reported);
            }
            Ok(_) => {}
            Err(ClientError::NotFound) if action == Action::Deleted => {
                debug!(kind = R::KIND, name = %name, "Resource disappeared before delete");
                already_gone = true;
            }
            Err(e) => return Err(api_error(action, e)),
        }
    }

    if already_gone {
        return Ok(ModuleResult {
            kind: R::KIND,
            name: name.clone(),
            state: resource.state(),
            changed: false,
            action: Action::None,
            check_mode,
            msg: format!("{} {} already absent", R::KIND, name),
            resource: None,
        });
    }

    let planned = || {
        plan.iter()
            .rev()
            .find(|m| m.reports_resource && is_record(&m.body))
            .map(|m| m.body.clone())
    };
    let resource_body = match action {
        Action::Deleted => None,
        _ if check_mode => planned().or(current),
        _ => reported.or(current).or_else(planned),
    }
    .map(|body| resource.redact(body));

    info!(
        kind = R::KIND,
        name = %name,
        action = action.past_tense(),
        check_mode,
        "Resource changed"
    );

    Ok(ModuleResult {
        kind: R::KIND,
        name: name.clone(),
        state: resource.state(),
        changed: true,
        action,
        check_mode,
        msg: format!("{} {} {}", R::KIND, name, action.past_tense()),
        resource: resource_body,
    })
}

/// Loose equality for configuration scalars: `443` matches `"443"`
pub fn values_equal(desired: &Value, remote: &Value) -> bool {
    if desired == remote {
        return true;
    }
    match (desired, remote) {
        (Value::String(s), Value::Number(_) | Value::Bool(_)) => *s == remote.to_string(),
        (Value::Number(_) | Value::Bool(_), Value::String(s)) => *s == desired.to_string(),
        _ => false,
    }
}

/// Read a boolean that XSOAR may encode as `true` or `"true"`
pub fn bool_like(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Compare an optional desired list with a remote one, treating missing as empty
pub fn same_list(desired: Option<&[String]>, remote: Option<&[String]>) -> bool {
    desired.unwrap_or_default() == remote.unwrap_or_default()
}
