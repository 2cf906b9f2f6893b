//! Common test utilities and helpers for integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Map, Value};
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use xsoar_ctl::client::XsoarClient;
use xsoar_ctl::config::{ConnectionConfig, RetryConfig, SyncConfig};

/// Build a client pointing at a mock server, without retries
pub fn create_test_client(server: &MockServer) -> XsoarClient {
    let conn = ConnectionConfig {
        url: server.uri(),
        api_key: Some("integration-key".to_string()),
        ..Default::default()
    };
    XsoarClient::new(&conn, RetryConfig::disabled()).expect("Failed to build test client")
}

/// Sync settings with a short per-account timeout
pub fn create_test_sync_config(account_timeout_secs: u64) -> SyncConfig {
    SyncConfig {
        account_timeout_secs,
        ..Default::default()
    }
}

/// Records kept by the fake server, keyed by one field
#[derive(Clone)]
pub struct Store {
    key: &'static str,
    records: Arc<Mutex<Vec<Value>>>,
    next_id: Arc<AtomicUsize>,
}

impl Default for Store {
    fn default() -> Self {
        Self::with(Vec::new())
    }
}

impl Store {
    pub fn with(records: Vec<Value>) -> Self {
        Self::keyed("id", records)
    }

    pub fn keyed(key: &'static str, records: Vec<Value>) -> Self {
        Self {
            key,
            records: Arc::new(Mutex::new(records)),
            next_id: Arc::new(AtomicUsize::new(1)),
        }
    }

    pub fn snapshot(&self) -> Vec<Value> {
        self.records.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    /// Store a record, assigning an id when it has none
    fn upsert(&self, mut record: Value) -> Value {
        let unset = match &record[self.key] {
            Value::Null => true,
            Value::String(id) => id.is_empty(),
            _ => false,
        };
        if unset {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            record[self.key] = json!(format!("generated-{}", id));
        }
        let mut records = self.records.lock().unwrap();
        records.retain(|r| r[self.key] != record[self.key]);
        records.push(record.clone());
        record
    }

    fn remove(&self, id: &Value) -> bool {
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|r| r[self.key] != *id);
        records.len() != before
    }

    fn set_field(&self, id: &str, field: &str, value: Value) -> bool {
        let mut records = self.records.lock().unwrap();
        match records.iter_mut().find(|r| r[self.key] == id) {
            Some(record) => {
                record[field] = value;
                true
            }
            None => false,
        }
    }
}

/// Handler returning every stored record, bare or under an envelope field
struct ListAll {
    store: Store,
    envelope: Option<&'static str>,
}

impl Respond for ListAll {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let records = Value::Array(self.store.snapshot());
        let body = match self.envelope {
            Some(field) => Value::Object(Map::from_iter([(field.to_string(), records)])),
            None => records,
        };
        ResponseTemplate::new(200).set_body_json(body)
    }
}

/// Handler storing the request body the way the server would keep it
struct Save {
    store: Store,
    shape: fn(Value) -> Value,
}

impl Respond for Save {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        match request.body_json::<Value>() {
            Ok(body) => {
                let stored = self.store.upsert((self.shape)(body));
                ResponseTemplate::new(200).set_body_json(stored)
            }
            Err(_) => ResponseTemplate::new(400),
        }
    }
}

/// POST handler removing the record named by the body's `id`
struct DeleteById(Store);

impl Respond for DeleteById {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let id = request
            .body_json::<Value>()
            .map(|body| body["id"].clone())
            .unwrap_or(Value::Null);
        if self.0.remove(&id) {
            ResponseTemplate::new(200)
        } else {
            ResponseTemplate::new(404)
        }
    }
}

/// Handler setting the status of the account named by the last path segment
struct SetStatus {
    store: Store,
    status: &'static str,
}

impl Respond for SetStatus {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let name = request.url.path().rsplit('/').next().unwrap_or_default();
        if self.store.set_field(name, "status", json!(self.status)) {
            ResponseTemplate::new(200)
        } else {
            ResponseTemplate::new(404)
        }
    }
}

/// Listing and saving endpoints of one kind of record
pub struct Endpoints {
    pub list_method: &'static str,
    pub list_path: &'static str,
    /// Field wrapping the records in the listing, if any
    pub envelope: Option<&'static str>,
    pub save_method: &'static str,
    pub save_path: &'static str,
    pub key: &'static str,
    /// Turns a saved body into the stored record
    pub shape: fn(Value) -> Value,
}

impl Endpoints {
    pub fn jobs() -> Self {
        Self {
            list_method: "POST",
            list_path: "/jobs/search",
            envelope: Some("data"),
            save_method: "POST",
            save_path: "/jobs",
            key: "id",
            shape: |body| body,
        }
    }

    pub fn integrations() -> Self {
        Self {
            list_method: "POST",
            list_path: "/settings/integration/search",
            envelope: Some("instances"),
            save_method: "PUT",
            save_path: "/settings/integration",
            key: "id",
            shape: |body| body,
        }
    }

    pub fn preprocess_rules() -> Self {
        Self {
            list_method: "GET",
            list_path: "/preprocess/rules",
            envelope: None,
            save_method: "POST",
            save_path: "/preprocess/rule",
            key: "id",
            shape: |body| body,
        }
    }

    pub fn credentials() -> Self {
        Self {
            list_method: "POST",
            list_path: "/settings/credentials",
            envelope: Some("credentials"),
            save_method: "PUT",
            save_path: "/settings/credentials",
            key: "id",
            shape: stored_credential,
        }
    }

    pub fn accounts() -> Self {
        Self {
            list_method: "GET",
            list_path: "/accounts",
            envelope: None,
            save_method: "POST",
            save_path: "/account",
            key: "name",
            shape: stored_account,
        }
    }
}

/// Credentials are keyed by name and never hand their secrets back
fn stored_credential(mut body: Value) -> Value {
    body["id"] = body["name"].clone();
    body["hasPassword"] = json!(!body["password"].is_null());
    body["hasCertificate"] = json!(!body["sshkey"].is_null());
    if let Some(record) = body.as_object_mut() {
        record.remove("password");
        record.remove("sshkey");
    }
    body
}

/// Account creation bodies become running `acc_` records
fn stored_account(body: Value) -> Value {
    let name = body["name"].as_str().unwrap_or_default();
    json!({
        "name": format!("acc_{}", name),
        "displayName": name,
        "propagationLabels": body["propagationLabels"],
        "roles": {"roles": body["accountRoles"]},
        "hostGroupId": body["hostGroupId"],
        "status": "running",
    })
}

/// Fake XSOAR server keeping lists in memory
pub struct FakeXsoar {
    pub server: MockServer,
    pub lists: Store,
}

impl FakeXsoar {
    pub async fn start() -> Self {
        Self::with_lists(Vec::new()).await
    }

    pub async fn with_lists(lists: Vec<Value>) -> Self {
        let server = MockServer::start().await;
        let lists = Store::with(lists);

        Mock::given(method("GET"))
            .and(path("/lists"))
            .respond_with(ListAll {
                store: lists.clone(),
                envelope: None,
            })
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/lists/save"))
            .respond_with(Save {
                store: lists.clone(),
                shape: |body| body,
            })
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/lists/delete"))
            .respond_with(DeleteById(lists.clone()))
            .mount(&server)
            .await;

        Self { server, lists }
    }

    /// Keep one more kind of record in memory
    pub async fn serve(&self, endpoints: Endpoints) -> Store {
        let store = Store::keyed(endpoints.key, Vec::new());
        Mock::given(method(endpoints.list_method))
            .and(path(endpoints.list_path))
            .respond_with(ListAll {
                store: store.clone(),
                envelope: endpoints.envelope,
            })
            .mount(&self.server)
            .await;
        Mock::given(method(endpoints.save_method))
            .and(path(endpoints.save_path))
            .respond_with(Save {
                store: store.clone(),
                shape: endpoints.shape,
            })
            .mount(&self.server)
            .await;
        store
    }

    /// Keep accounts in memory, including their start and stop calls
    pub async fn serve_accounts(&self) -> Store {
        let store = self.serve(Endpoints::accounts()).await;
        for (verb, status) in [("start", "running"), ("stop", "stopped")] {
            Mock::given(method("POST"))
                .and(path_regex(format!("^/account/{}/[^/]+$", verb)))
                .respond_with(SetStatus {
                    store: store.clone(),
                    status,
                })
                .mount(&self.server)
                .await;
        }
        store
    }

    pub fn client(&self) -> XsoarClient {
        create_test_client(&self.server)
    }
}

/// Tenant account record as returned by `GET /accounts`
pub fn account_record(display_name: &str, status: &str) -> Value {
    json!({
        "name": format!("acc_{}", display_name),
        "displayName": display_name,
        "status": status,
        "propagationLabels": ["all"],
    })
}

/// Content diff holding one added playbook per name
pub fn playbook_diff(names: &[&str]) -> Value {
    let items: Vec<Value> = names
        .iter()
        .map(|name| json!({"name": name, "type": "playbook"}))
        .collect();
    json!({"add": {"playbook": items}, "override": {}, "remove": {}})
}

/// Mount the account listing
pub async fn mount_accounts(server: &MockServer, accounts: Vec<Value>) {
    Mock::given(method("GET"))
        .and(path("/accounts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(Value::Array(accounts)))
        .mount(server)
        .await;
}

/// Mount a content diff for one account, answered after `delay`
pub async fn mount_diff(server: &MockServer, account: &str, diff: Value, delay: Duration) {
    Mock::given(method("POST"))
        .and(path(format!("/account/content/diff/{}", account)))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(diff)
                .set_delay(delay),
        )
        .mount(server)
        .await;
}
