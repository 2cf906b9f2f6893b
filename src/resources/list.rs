//! List resource
//!
//! Lists hold free-form content (text, JSON, markdown...) that playbooks read
//! at runtime. The server has no separate update call: saving with
//! `version: -1` overwrites whatever is stored.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::traits::{same_list, DesiredState, Mutation, Reconcile, RemoteId};
use crate::client::XsoarClient;
use crate::error::{ClientError, ModuleError};

/// Content type of a list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListContentType {
    /// JSON document, compared by parsed value
    #[serde(rename = "JSON")]
    Json,
    /// HTML
    #[serde(rename = "HTML")]
    Html,
    /// Plain text
    #[default]
    Text,
    /// Markdown
    Markdown,
    /// CSS
    #[serde(rename = "CSS")]
    Css,
}

impl ListContentType {
    /// Name the server uses for this type
    pub fn as_str(self) -> &'static str {
        match self {
            ListContentType::Json => "JSON",
            ListContentType::Html => "HTML",
            ListContentType::Text => "Text",
            ListContentType::Markdown => "Markdown",
            ListContentType::Css => "CSS",
        }
    }
}

/// Desired state of a list
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ListSpec {
    /// List name, also its id
    pub name: String,
    /// Content type
    #[serde(default)]
    pub content_type: ListContentType,
    /// Text content
    #[serde(default)]
    pub content: Option<String>,
    /// Structured content for JSON lists
    #[serde(default)]
    pub json_content: Option<Value>,
    /// Description
    #[serde(default)]
    pub description: Option<String>,
    /// Propagation labels
    #[serde(default = "default_propagation_labels")]
    pub propagation_labels: Vec<String>,
    /// Roles allowed to read the list
    #[serde(default)]
    pub read_roles: Option<Vec<String>>,
    /// Roles allowed to edit the list
    #[serde(default)]
    pub edit_roles: Option<Vec<String>>,
    /// Requested state
    #[serde(default)]
    pub state: DesiredState,
    /// Tenant account scope
    #[serde(default)]
    pub account: Option<String>,
}

fn default_propagation_labels() -> Vec<String> {
    vec!["all".to_string()]
}

/// List as stored by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteList {
    #[serde(default)]
    pub id: RemoteId,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub propagation_labels: Option<Vec<String>>,
    #[serde(default)]
    pub xsoar_read_only_roles: Option<Vec<String>>,
    #[serde(default)]
    pub roles: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ListSpec {
    /// Serialized content that will be stored as the list data
    fn data(&self) -> String {
        match (&self.json_content, &self.content) {
            (Some(json), _) => json.to_string(),
            (None, Some(content)) => content.clone(),
            (None, None) => String::new(),
        }
    }

    fn content_matches(&self, remote: &RemoteList) -> bool {
        let stored = remote.data.as_deref().unwrap_or_default();
        match &self.json_content {
            Some(desired) => serde_json::from_str::<Value>(stored)
                .map(|stored| stored == *desired)
                .unwrap_or(false),
            None => match self.content.as_deref() {
                Some(content) => stored == content,
                None => true,
            },
        }
    }

    fn save_body(&self) -> Value {
        let read_roles = self.read_roles.clone().unwrap_or_default();
        let edit_roles = self.edit_roles.clone().unwrap_or_default();

        let mut body = json!({
            "id": self.name,
            "name": self.name,
            "version": -1,
            "type": self.content_type.as_str(),
            "data": self.data(),
            "description": self.description.clone().unwrap_or_default(),
            "propagationLabels": self.propagation_labels,
            "allRead": read_roles.is_empty(),
            "allReadWrite": edit_roles.is_empty(),
        });
        if !read_roles.is_empty() {
            body["xsoarReadOnlyRoles"] = json!(read_roles);
        }
        if !edit_roles.is_empty() {
            body["roles"] = json!(edit_roles);
        }
        body
    }

    fn save(&self, client: &XsoarClient) -> Vec<Mutation> {
        let url = client.endpoint(self.account.as_deref(), "lists/save");
        vec![Mutation::post(url, self.save_body())]
    }
}

#[async_trait]
impl Reconcile for ListSpec {
    type Remote = RemoteList;

    const KIND: &'static str = "List";

    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> DesiredState {
        self.state
    }

    fn validate(&self) -> Result<(), ModuleError> {
        if self.state == DesiredState::Absent {
            return Ok(());
        }
        if self.content.is_some() && self.json_content.is_some() {
            return Err(ModuleError::invalid(
                Self::KIND,
                &self.name,
                "content and json_content are mutually exclusive",
            ));
        }
        match (self.content_type, self.json_content.is_some()) {
            (ListContentType::Json, false) => Err(ModuleError::invalid(
                Self::KIND,
                &self.name,
                "content_type JSON requires json_content",
            )),
            (ListContentType::Json, true) | (_, false) => Ok(()),
            (_, true) => Err(ModuleError::invalid(
                Self::KIND,
                &self.name,
                "json_content requires content_type JSON",
            )),
        }
    }

    async fn list(&self, client: &XsoarClient) -> Result<Vec<RemoteList>, ClientError> {
        let url = client.endpoint(self.account.as_deref(), "lists");
        let lists: Option<Vec<RemoteList>> = client.get(&url).await?;
        Ok(lists.unwrap_or_default())
    }

    fn is_named(&self, remote: &RemoteList) -> bool {
        remote.name == self.name
    }

    fn matches(&self, remote: &RemoteList) -> bool {
        if !remote.id.is(&self.name) {
            return false;
        }
        if remote.content_type.as_deref() != Some(self.content_type.as_str()) {
            return false;
        }
        if let Some(description) = &self.description {
            if remote.description.as_ref() != Some(description) {
                return false;
            }
        }
        if !self.propagation_labels.is_empty()
            && remote.propagation_labels.as_deref().unwrap_or_default()
                != self.propagation_labels.as_slice()
        {
            return false;
        }
        self.content_matches(remote)
            && same_list(
                self.read_roles.as_deref(),
                remote.xsoar_read_only_roles.as_deref(),
            )
            && same_list(self.edit_roles.as_deref(), remote.roles.as_deref())
    }

    async fn plan_create(&self, client: &XsoarClient) -> Result<Vec<Mutation>, ModuleError> {
        Ok(self.save(client))
    }

    async fn plan_update(
        &self,
        client: &XsoarClient,
        _remote: RemoteList,
    ) -> Result<Vec<Mutation>, ModuleError> {
        Ok(self.save(client))
    }

    fn plan_delete(&self, client: &XsoarClient, _remote: &RemoteList) -> Vec<Mutation> {
        let url = client.endpoint(self.account.as_deref(), "lists/delete");
        vec![Mutation::post(url, json!({ "id": self.name }))]
    }
}
