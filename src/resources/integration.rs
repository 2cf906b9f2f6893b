//! Integration instance resource

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use super::traits::{bool_like, values_equal, DesiredState, Mutation, Reconcile, RemoteId};
use crate::client::XsoarClient;
use crate::error::{ClientError, ModuleError};

/// Parameter type of an encrypted value
const ENCRYPTED_PARAM: i64 = 4;

/// Parameter type of a credentials value
const CREDENTIALS_PARAM: i64 = 9;

const MASK: &str = "********";

/// Desired state of an integration instance
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IntegrationSpec {
    /// Instance name
    pub name: String,
    /// Integration brand the instance belongs to
    #[serde(default)]
    pub brand: Option<String>,
    /// Configuration parameters by name
    #[serde(default)]
    pub configuration: BTreeMap<String, Value>,
    /// Whether the instance is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Exclude the instance from default command execution
    #[serde(default)]
    pub default_ignore: bool,
    /// Propagation labels
    #[serde(default)]
    pub propagation_labels: Option<Vec<String>>,
    /// Incoming mapper id
    #[serde(default)]
    pub incoming_mapper_id: Option<String>,
    /// Requested state
    #[serde(default)]
    pub state: DesiredState,
    /// Tenant account scope
    #[serde(default)]
    pub account: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Integration instance as stored by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteInstance {
    #[serde(default)]
    pub id: RemoteId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub brand: String,
    #[serde(default)]
    pub enabled: Value,
    #[serde(default)]
    pub default_ignore: Option<bool>,
    #[serde(default)]
    pub incoming_mapper_id: Option<String>,
    #[serde(default)]
    pub propagation_labels: Option<Vec<String>>,
    #[serde(default)]
    pub data: Vec<InstanceParam>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One configuration parameter of an instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceParam {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub param_type: Option<i64>,
    #[serde(default)]
    pub value: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl InstanceParam {
    fn is_secret(&self) -> bool {
        matches!(self.param_type, Some(ENCRYPTED_PARAM | CREDENTIALS_PARAM))
    }
}

fn is_credentials_value(value: &Value) -> bool {
    value.get("password").is_some()
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

impl IntegrationSpec {
    fn brand(&self) -> &str {
        self.brand.as_deref().unwrap_or_default()
    }

    fn config_matches(&self, remote: &RemoteInstance) -> bool {
        self.configuration.iter().all(|(key, desired)| {
            let mut params = remote.data.iter().filter(|p| p.name == *key);
            match (params.next(), params.next()) {
                (Some(param), None) => param.is_secret() || values_equal(desired, &param.value),
                _ => false,
            }
        })
    }

    fn create_body(&self) -> Value {
        let data: Vec<Value> = self
            .configuration
            .iter()
            .map(|(name, value)| {
                if is_credentials_value(value) {
                    json!({ "name": name, "value": value, "type": CREDENTIALS_PARAM })
                } else {
                    json!({ "name": name, "value": value })
                }
            })
            .collect();

        let mut body = json!({
            "name": self.name,
            "brand": self.brand(),
            "enabled": self.enabled.to_string(),
            "data": data,
            "version": 0,
            "isIntegrationScript": true,
            "defaultIgnore": self.default_ignore,
            "incomingMapperId": self.incoming_mapper_id,
        });
        if let Some(labels) = &self.propagation_labels {
            body["propagationLabels"] = json!(labels);
        }
        body
    }

    fn merged(&self, mut remote: RemoteInstance) -> RemoteInstance {
        for (key, value) in &self.configuration {
            match remote.data.iter_mut().find(|p| p.name == *key) {
                Some(param) if param.param_type == Some(CREDENTIALS_PARAM) => {}
                Some(param) => param.value = value.clone(),
                None => remote.data.push(InstanceParam {
                    name: key.clone(),
                    param_type: is_credentials_value(value).then_some(CREDENTIALS_PARAM),
                    value: value.clone(),
                    extra: Map::new(),
                }),
            }
        }
        remote.enabled = Value::String(self.enabled.to_string());
        remote.default_ignore = Some(self.default_ignore);
        remote.incoming_mapper_id = self.incoming_mapper_id.clone();
        if let Some(labels) = &self.propagation_labels {
            remote.propagation_labels = Some(labels.clone());
        }
        remote.extra.insert("version".to_string(), json!(-1));
        remote
    }
}

#[async_trait]
impl Reconcile for IntegrationSpec {
    type Remote = RemoteInstance;

    const KIND: &'static str = "Integration";

    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> DesiredState {
        self.state
    }

    fn validate(&self) -> Result<(), ModuleError> {
        if self.state == DesiredState::Present && self.brand().is_empty() {
            return Err(ModuleError::invalid(
                Self::KIND,
                &self.name,
                "brand is required when state is present",
            ));
        }
        Ok(())
    }

    async fn list(&self, client: &XsoarClient) -> Result<Vec<RemoteInstance>, ClientError> {
        let url = client.endpoint(self.account.as_deref(), "settings/integration/search");
        let response: Value = client.query(&url, &json!({ "size": 500 })).await?;
        match response.get("instances") {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(instances) => serde_json::from_value(instances.clone())
                .map_err(|e| ClientError::InvalidData(e.to_string())),
        }
    }

    fn is_named(&self, remote: &RemoteInstance) -> bool {
        remote.name == self.name
    }

    fn matches(&self, remote: &RemoteInstance) -> bool {
        if remote.brand != self.brand() {
            return false;
        }
        if remote.default_ignore.unwrap_or(false) != self.default_ignore {
            return false;
        }
        if non_empty(remote.incoming_mapper_id.as_deref())
            != non_empty(self.incoming_mapper_id.as_deref())
        {
            return false;
        }
        if bool_like(&remote.enabled).unwrap_or(true) != self.enabled {
            return false;
        }
        if let Some(labels) = &self.propagation_labels {
            if remote.propagation_labels.as_ref() != Some(labels) {
                return false;
            }
        }
        self.config_matches(remote)
    }

    async fn plan_create(&self, client: &XsoarClient) -> Result<Vec<Mutation>, ModuleError> {
        let url = client.endpoint(self.account.as_deref(), "settings/integration");
        Ok(vec![Mutation::put(url, self.create_body())])
    }

    async fn plan_update(
        &self,
        client: &XsoarClient,
        remote: RemoteInstance,
    ) -> Result<Vec<Mutation>, ModuleError> {
        let url = client.endpoint(self.account.as_deref(), "settings/integration");
        let body = serde_json::to_value(self.merged(remote)).map_err(|e| ModuleError::Api {
            action: "update",
            kind: Self::KIND,
            name: self.name.clone(),
            source: ClientError::InvalidData(e.to_string()),
        })?;
        Ok(vec![Mutation::put(url, body)])
    }

    fn plan_delete(&self, client: &XsoarClient, remote: &RemoteInstance) -> Vec<Mutation> {
        let url = client.endpoint(
            self.account.as_deref(),
            &format!("settings/integration/{}", remote.id),
        );
        vec![Mutation::delete(url)]
    }

    fn redact(&self, mut body: Value) -> Value {
        if let Some(Value::Array(params)) = body.get_mut("data") {
            for param in params {
                let secret = matches!(
                    param.get("type").and_then(Value::as_i64),
                    Some(ENCRYPTED_PARAM | CREDENTIALS_PARAM)
                ) || param.get("value").is_some_and(is_credentials_value);
                if secret {
                    param["value"] = json!(MASK);
                }
            }
        }
        body
    }
}
