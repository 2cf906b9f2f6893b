//! Tenant content API used by the sync runner

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::client::XsoarClient;
use crate::error::ClientError;
use crate::resources::account::{list_accounts, RemoteAccount, ACCOUNT_PREFIX};

/// Content items grouped by item type
pub type ItemsByType = BTreeMap<String, Vec<ContentItem>>;

/// One content item (playbook, script, list...) in a diff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub item_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Difference between the master content and one account
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentDiff {
    /// Items missing on the account
    #[serde(default, deserialize_with = "lenient_items")]
    pub add: ItemsByType,
    /// Items whose account copy differs from the master
    #[serde(rename = "override", default, deserialize_with = "lenient_items")]
    pub override_items: ItemsByType,
    /// Items only present on the account
    #[serde(default, deserialize_with = "lenient_items")]
    pub remove: ItemsByType,
}

/// Accept `null` groups and drop groups that are not lists of items
fn lenient_items<'de, D>(deserializer: D) -> Result<ItemsByType, D::Error>
where
    D: Deserializer<'de>,
{
    let groups: Option<Map<String, Value>> = Option::deserialize(deserializer)?;
    Ok(groups
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(item_type, items)| match items {
            Value::Array(items) => {
                let items: Vec<ContentItem> = items
                    .into_iter()
                    .filter_map(|item| serde_json::from_value(item).ok())
                    .collect();
                Some((item_type, items))
            }
            _ => None,
        })
        .collect())
}

fn count(groups: &ItemsByType) -> usize {
    groups.values().map(Vec::len).sum()
}

impl ContentDiff {
    /// Whether the account is already in line with the master
    pub fn is_empty(&self) -> bool {
        self.item_count() == 0
    }

    /// Number of items in all three groups
    pub fn item_count(&self) -> usize {
        count(&self.add) + count(&self.override_items) + count(&self.remove)
    }

    /// Names of every item in the diff, sorted and deduplicated
    pub fn item_names(&self) -> Vec<String> {
        let mut names: Vec<String> = [&self.add, &self.override_items, &self.remove]
            .into_iter()
            .flat_map(|groups| groups.values().flatten())
            .filter_map(|item| item.name.clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Keep only added or overridden items carrying one of `names`
    ///
    /// Items are regrouped under their own `type`, falling back to the group
    /// they were listed in. Removals are never selected.
    pub fn select(&self, names: &[String]) -> ContentDiff {
        ContentDiff {
            add: select_items(&self.add, names),
            override_items: select_items(&self.override_items, names),
            remove: ItemsByType::new(),
        }
    }
}

fn select_items(groups: &ItemsByType, names: &[String]) -> ItemsByType {
    let mut selected = ItemsByType::new();
    for (group, items) in groups {
        for item in items {
            let wanted = item
                .name
                .as_ref()
                .is_some_and(|name| names.contains(name));
            if wanted {
                let item_type = item.item_type.clone().unwrap_or_else(|| group.clone());
                selected.entry(item_type).or_default().push(item.clone());
            }
        }
    }
    selected
}

/// Calls the sync runner makes against the master server
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TenantApi: Send + Sync {
    /// Every tenant account with its status fields
    async fn list_accounts(&self) -> Result<Vec<RemoteAccount>, ClientError>;

    /// Content difference between the master and an account
    async fn content_diff(&self, account: &str) -> Result<ContentDiff, ClientError>;

    /// Push content to an account
    async fn push_content(&self, account: &str, diff: &ContentDiff) -> Result<(), ClientError>;

    /// Let the server sync every account itself
    async fn sync_all(&self, timeout: Duration) -> Result<(), ClientError>;
}

#[async_trait]
impl TenantApi for XsoarClient {
    async fn list_accounts(&self) -> Result<Vec<RemoteAccount>, ClientError> {
        list_accounts(self).await
    }

    async fn content_diff(&self, account: &str) -> Result<ContentDiff, ClientError> {
        let url = self.endpoint(None, &format!("account/content/diff/{}", account));
        let diff: Option<ContentDiff> = self.query(&url, &json!({})).await?;
        Ok(diff.unwrap_or_default())
    }

    async fn push_content(&self, account: &str, diff: &ContentDiff) -> Result<(), ClientError> {
        let url = self.endpoint(
            None,
            &format!("account/content/sync/{}{}", ACCOUNT_PREFIX, account),
        );
        self.post(&url, diff).await.map(|_| ())
    }

    async fn sync_all(&self, timeout: Duration) -> Result<(), ClientError> {
        let url = self.endpoint(None, "accounts/content/sync");
        self.post_with_timeout(&url, &json!({}), timeout)
            .await
            .map(|_| ())
    }
}
