//! API key resource

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::traits::{DesiredState, Mutation, Reconcile, RemoteId};
use crate::client::XsoarClient;
use crate::error::{ClientError, ModuleError};

/// Desired state of an API key
#[derive(Clone, PartialEq, Deserialize)]
pub struct ApiKeySpec {
    /// Key name
    pub name: String,
    /// Key value, required when present
    #[serde(default)]
    pub key: Option<String>,
    /// Requested state
    #[serde(default)]
    pub state: DesiredState,
    /// Tenant account scope
    #[serde(default)]
    pub account: Option<String>,
}

impl std::fmt::Debug for ApiKeySpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeySpec")
            .field("name", &self.name)
            .field("key", &self.key.as_ref().map(|_| "[REDACTED]"))
            .field("state", &self.state)
            .field("account", &self.account)
            .finish()
    }
}

/// API key as listed by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteApiKey {
    /// Server assigned id
    #[serde(default)]
    pub id: RemoteId,
    /// Key name
    #[serde(default)]
    pub name: String,
    /// Other fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[async_trait]
impl Reconcile for ApiKeySpec {
    type Remote = RemoteApiKey;

    const KIND: &'static str = "ApiKey";

    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> DesiredState {
        self.state
    }

    fn validate(&self) -> Result<(), ModuleError> {
        if self.state == DesiredState::Present && self.key.as_deref().unwrap_or("").is_empty() {
            return Err(ModuleError::invalid(
                Self::KIND,
                &self.name,
                "key is required when state is present",
            ));
        }
        Ok(())
    }

    async fn list(&self, client: &XsoarClient) -> Result<Vec<RemoteApiKey>, ClientError> {
        let url = client.endpoint(self.account.as_deref(), "apikeys");
        let keys: Option<Vec<RemoteApiKey>> = client.get(&url).await?;
        Ok(keys.unwrap_or_default())
    }

    fn is_named(&self, remote: &RemoteApiKey) -> bool {
        remote.name == self.name
    }

    // The key value is never returned, so any key with this name is current.
    fn matches(&self, _remote: &RemoteApiKey) -> bool {
        true
    }

    async fn plan_create(&self, client: &XsoarClient) -> Result<Vec<Mutation>, ModuleError> {
        let url = client.endpoint(self.account.as_deref(), "apikeys");
        let body = json!({
            "name": self.name,
            "apikey": self.key.as_deref().unwrap_or_default(),
        });
        Ok(vec![Mutation::post(url, body)])
    }

    async fn plan_update(
        &self,
        _client: &XsoarClient,
        _remote: RemoteApiKey,
    ) -> Result<Vec<Mutation>, ModuleError> {
        Ok(Vec::new())
    }

    fn plan_delete(&self, client: &XsoarClient, remote: &RemoteApiKey) -> Vec<Mutation> {
        let url = client.endpoint(self.account.as_deref(), &format!("apikeys/{}", remote.id));
        vec![Mutation::delete(url)]
    }

    fn redact(&self, mut body: Value) -> Value {
        if let Some(object) = body.as_object_mut() {
            object.remove("apikey");
        }
        body
    }
}
