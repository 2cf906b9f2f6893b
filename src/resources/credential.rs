//! Stored credential resource
//!
//! Passwords and certificates cannot be read back; only their presence
//! flags are compared.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::traits::{DesiredState, Mutation, Reconcile, RemoteId};
use crate::client::XsoarClient;
use crate::error::{ClientError, ModuleError};

const SECRET_FIELDS: [&str; 2] = ["password", "sshkey"];

/// Desired state of a credential
#[derive(Clone, PartialEq, Deserialize)]
pub struct CredentialSpec {
    pub name: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub workgroup: Option<String>,
    /// SSH key or certificate
    #[serde(default)]
    pub certificate: Option<String>,
    #[serde(default)]
    pub state: DesiredState,
    #[serde(default)]
    pub account: Option<String>,
}

impl std::fmt::Debug for CredentialSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialSpec")
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("workgroup", &self.workgroup)
            .field("certificate", &self.certificate.as_ref().map(|_| "[REDACTED]"))
            .field("state", &self.state)
            .field("account", &self.account)
            .finish()
    }
}

/// Credential as listed by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCredential {
    #[serde(default)]
    pub id: RemoteId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub workgroup: Option<String>,
    #[serde(default)]
    pub has_password: Option<bool>,
    #[serde(default)]
    pub has_certificate: Option<bool>,
    #[serde(default)]
    pub version: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct CredentialSearch {
    #[serde(default)]
    credentials: Option<Vec<RemoteCredential>>,
}

impl CredentialSpec {
    fn save_body(&self, remote: Option<&RemoteCredential>) -> Value {
        let (id, version) = match remote {
            Some(remote) => (json!(remote.id), json!(remote.version.unwrap_or(0))),
            None => (Value::Null, json!(0)),
        };
        json!({
            "id": id,
            "version": version,
            "name": self.name,
            "user": self.user,
            "password": self.password,
            "workgroup": self.workgroup,
            "sshkey": self.certificate,
            "hasPassword": self.password.is_some(),
            "hasCertificate": self.certificate.is_some(),
        })
    }

    fn credentials_url(&self, client: &XsoarClient) -> String {
        client.endpoint(self.account.as_deref(), "settings/credentials")
    }
}

#[async_trait]
impl Reconcile for CredentialSpec {
    type Remote = RemoteCredential;

    const KIND: &'static str = "Credential";

    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> DesiredState {
        self.state
    }

    async fn list(&self, client: &XsoarClient) -> Result<Vec<RemoteCredential>, ClientError> {
        let body = json!({ "page": 0, "query": "", "size": 200 });
        let search: Option<CredentialSearch> =
            client.query(&self.credentials_url(client), &body).await?;
        Ok(search.and_then(|s| s.credentials).unwrap_or_default())
    }

    fn is_named(&self, remote: &RemoteCredential) -> bool {
        remote.name == self.name
    }

    fn matches(&self, remote: &RemoteCredential) -> bool {
        if !remote.id.is(&self.name) {
            return false;
        }
        if self.user.is_some() && remote.user != self.user {
            return false;
        }
        if self.workgroup.is_some() && remote.workgroup != self.workgroup {
            return false;
        }
        if self.password.is_some() && !remote.has_password.unwrap_or(false) {
            return false;
        }
        !(self.certificate.is_some() && !remote.has_certificate.unwrap_or(false))
    }

    async fn plan_create(&self, client: &XsoarClient) -> Result<Vec<Mutation>, ModuleError> {
        Ok(vec![Mutation::put(
            self.credentials_url(client),
            self.save_body(None),
        )])
    }

    async fn plan_update(
        &self,
        client: &XsoarClient,
        remote: RemoteCredential,
    ) -> Result<Vec<Mutation>, ModuleError> {
        Ok(vec![Mutation::put(
            self.credentials_url(client),
            self.save_body(Some(&remote)),
        )])
    }

    fn plan_delete(&self, client: &XsoarClient, remote: &RemoteCredential) -> Vec<Mutation> {
        let url = client.endpoint(self.account.as_deref(), "settings/credentials/delete");
        vec![Mutation::post(url, json!({ "id": remote.id }))]
    }

    fn redact(&self, mut body: Value) -> Value {
        if let Some(object) = body.as_object_mut() {
            for field in SECRET_FIELDS {
                object.remove(field);
            }
        }
        body
    }
}
