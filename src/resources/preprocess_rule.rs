//! Pre-process rule resource

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::traits::{DesiredState, Mutation, Reconcile, RemoteId};
use crate::client::XsoarClient;
use crate::error::{ClientError, ModuleError};

/// What a rule does with a matching incident
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreprocessAction {
    /// Run a script
    Script,
}

impl PreprocessAction {
    fn as_str(self) -> &'static str {
        match self {
            PreprocessAction::Script => "script",
        }
    }
}

/// Desired state of a pre-process rule
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PreprocessRuleSpec {
    pub name: String,
    #[serde(default)]
    pub action: Option<PreprocessAction>,
    /// Script run by the rule, required when `action` is `script`
    #[serde(default)]
    pub script_id: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub propagation_labels: Option<Vec<String>>,
    #[serde(default)]
    pub state: DesiredState,
    #[serde(default)]
    pub account: Option<String>,
}

fn default_enabled() -> bool {
    true
}

/// Pre-process rule as stored by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRule {
    #[serde(default)]
    pub id: RemoteId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(rename = "scriptID", default)]
    pub script_id: Option<String>,
    #[serde(default)]
    pub propagation_labels: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PreprocessRuleSpec {
    fn create_body(&self) -> Value {
        json!({
            "name": self.name,
            "enabled": self.enabled,
            "action": self.action.map(PreprocessAction::as_str),
            "scriptID": self.script_id,
            "propagationLabels": self.propagation_labels.clone().unwrap_or_default(),
            "newEventFilters": [],
            "existingEventsFilters": [],
            "linkTo": "oldest",
            "period": {"by": "days", "fromValue": 30},
            "searchClosed": false,
            "id": "",
            "shouldPublish": true,
            "shouldCommit": true,
            "commitMessage": "Preprocess rule edited",
        })
    }

    fn updated(&self, mut remote: RemoteRule) -> RemoteRule {
        remote.enabled = Some(self.enabled);
        if let Some(action) = self.action {
            remote.action = Some(action.as_str().to_string());
        }
        if self.script_id.is_some() {
            remote.script_id = self.script_id.clone();
        }
        remote.propagation_labels = Some(self.propagation_labels.clone().unwrap_or_default());
        remote.extra.insert("version".to_string(), json!(-1));
        remote
    }
}

#[async_trait]
impl Reconcile for PreprocessRuleSpec {
    type Remote = RemoteRule;

    const KIND: &'static str = "PreprocessRule";

    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> DesiredState {
        self.state
    }

    fn validate(&self) -> Result<(), ModuleError> {
        if self.state == DesiredState::Present
            && self.action == Some(PreprocessAction::Script)
            && self.script_id.as_deref().unwrap_or_default().is_empty()
        {
            return Err(ModuleError::invalid(
                Self::KIND,
                &self.name,
                "script_id is required when action is script",
            ));
        }
        Ok(())
    }

    async fn list(&self, client: &XsoarClient) -> Result<Vec<RemoteRule>, ClientError> {
        let url = client.endpoint(self.account.as_deref(), "preprocess/rules");
        let rules: Option<Vec<RemoteRule>> = client.get(&url).await?;
        Ok(rules.unwrap_or_default())
    }

    fn is_named(&self, remote: &RemoteRule) -> bool {
        remote.name == self.name
    }

    fn matches(&self, remote: &RemoteRule) -> bool {
        if remote.enabled.unwrap_or(false) != self.enabled {
            return false;
        }
        if let Some(labels) = &self.propagation_labels {
            if remote.propagation_labels.as_ref() != Some(labels) {
                return false;
            }
        }
        if let Some(action) = self.action {
            if remote.action.as_deref() != Some(action.as_str()) {
                return false;
            }
        }
        self.script_id.is_none() || remote.script_id == self.script_id
    }

    async fn plan_create(&self, client: &XsoarClient) -> Result<Vec<Mutation>, ModuleError> {
        let url = client.endpoint(self.account.as_deref(), "preprocess/rule");
        Ok(vec![Mutation::post(url, self.create_body())])
    }

    async fn plan_update(
        &self,
        client: &XsoarClient,
        remote: RemoteRule,
    ) -> Result<Vec<Mutation>, ModuleError> {
        let url = client.endpoint(self.account.as_deref(), "preprocess/rule");
        let body = serde_json::to_value(self.updated(remote)).map_err(|e| ModuleError::Api {
            action: "update",
            kind: Self::KIND,
            name: self.name.clone(),
            source: ClientError::InvalidData(e.to_string()),
        })?;
        Ok(vec![Mutation::post(url, body)])
    }

    fn plan_delete(&self, client: &XsoarClient, remote: &RemoteRule) -> Vec<Mutation> {
        let url = client.endpoint(
            self.account.as_deref(),
            &format!("preprocess/rule/{}", remote.id),
        );
        vec![Mutation::delete(url)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::testing::client_for;
    use crate::resources::{apply, Action};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn spec() -> PreprocessRuleSpec {
        PreprocessRuleSpec {
            name: "Drop duplicates".to_string(),
            action: Some(PreprocessAction::Script),
            script_id: Some("DedupIncoming".to_string()),
            enabled: true,
            propagation_labels: None,
            state: DesiredState::Present,
            account: None,
        }
    }

    fn stored() -> Value {
        json!({
            "id": 3,
            "name": "Drop duplicates",
            "enabled": true,
            "action": "script",
            "scriptID": "DedupIncoming",
            "propagationLabels": [],
            "newEventFilters": [[{"left": {"value": {"simple": "type"}}}]],
        })
    }

    #[test]
    fn test_script_action_requires_script_id() {
        let mut rule = spec();
        rule.script_id = None;
        assert!(rule.validate().is_err());

        rule.action = None;
        assert!(rule.validate().is_ok());
    }

    #[test]
    fn test_matches() {
        let remote: RemoteRule = serde_json::from_value(stored()).unwrap();
        assert!(spec().matches(&remote));

        let mut rule = spec();
        rule.enabled = false;
        assert!(!rule.matches(&remote));

        let mut rule = spec();
        rule.script_id = Some("Other".to_string());
        assert!(!rule.matches(&remote));

        let mut rule = spec();
        rule.propagation_labels = Some(vec!["emea".to_string()]);
        assert!(!rule.matches(&remote));
    }

    #[test]
    fn test_update_keeps_filters() {
        let remote: RemoteRule = serde_json::from_value(stored()).unwrap();
        let mut rule = spec();
        rule.enabled = false;
        let updated = serde_json::to_value(rule.updated(remote)).unwrap();

        assert_eq!(updated["enabled"], false);
        assert_eq!(updated["version"], -1);
        assert_eq!(updated["id"], 3);
        assert!(updated["newEventFilters"].is_array());
    }

    #[tokio::test]
    async fn test_creates_rule() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/preprocess/rules"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/preprocess/rule"))
            .and(body_partial_json(json!({
                "name": "Drop duplicates",
                "action": "script",
                "scriptID": "DedupIncoming",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 4})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let result = apply(&spec(), &client, false).await.unwrap();

        assert_eq!(result.action, Action::Created);
        assert_eq!(result.resource.unwrap()["id"], 4);
    }

    #[tokio::test]
    async fn test_deletes_by_numeric_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/preprocess/rules"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([stored()])))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/preprocess/rule/3"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut rule = spec();
        rule.state = DesiredState::Absent;
        let client = client_for(&server);
        let result = apply(&rule, &client, false).await.unwrap();

        assert_eq!(result.action, Action::Deleted);
    }
}
