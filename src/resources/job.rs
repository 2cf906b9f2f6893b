//! Scheduled job resource
//!
//! Dates given as `now`, RFC 3339 or naive date/time (read as UTC) are
//! normalized to the microsecond UTC form the server stores.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::traits::{bool_like, DesiredState, Mutation, Reconcile, RemoteId};
use crate::client::XsoarClient;
use crate::error::{ClientError, ModuleError};

const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

const SEARCH_PAGE_SIZE: u32 = 500;

/// Desired state of a scheduled job
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JobSpec {
    /// Job name
    pub name: String,
    /// Cron expression, required when present
    #[serde(default)]
    pub cron: Option<String>,
    /// Playbook run by the job, required when present
    #[serde(default)]
    pub playbook_id: Option<String>,
    /// Job owner
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub close_previous_run: bool,
    #[serde(default)]
    pub should_trigger_new: bool,
    #[serde(default)]
    pub notify_owner: bool,
    /// Whether the schedule is active
    #[serde(default = "default_active")]
    pub active: bool,
    /// `now` or a date/time
    #[serde(default = "default_start_date")]
    pub start_date: String,
    #[serde(default)]
    pub end_date: Option<String>,
    /// `never` ends the schedule at its start date
    #[serde(default = "default_ending_type")]
    pub ending_type: String,
    #[serde(default = "default_incident_type")]
    pub incident_type: String,
    /// Requested state
    #[serde(default)]
    pub state: DesiredState,
    /// Tenant account scope
    #[serde(default)]
    pub account: Option<String>,
}

fn default_active() -> bool {
    true
}

fn default_start_date() -> String {
    "now".to_string()
}

fn default_ending_type() -> String {
    "never".to_string()
}

fn default_incident_type() -> String {
    "Unclassified".to_string()
}

/// Job as stored by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteJob {
    #[serde(default)]
    pub id: RemoteId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub cron: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub playbook_id: Option<String>,
    #[serde(default)]
    pub close_prev_run: Option<bool>,
    #[serde(default)]
    pub should_trigger_new: Option<bool>,
    #[serde(default)]
    pub notify_owner: Option<bool>,
    #[serde(rename = "type", default)]
    pub incident_type: Option<String>,
    #[serde(rename = "CustomFields", default)]
    pub custom_fields: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct JobSearch {
    #[serde(default)]
    data: Option<Vec<RemoteJob>>,
}

/// Parse a job date into UTC
pub fn parse_date(value: &str) -> Result<DateTime<Utc>, String> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("now") {
        return Ok(Utc::now());
    }
    if let Ok(date) = DateTime::parse_from_rfc3339(value) {
        return Ok(date.with_timezone(&Utc));
    }
    for format in [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
    ] {
        if let Ok(date) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(date.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|date| date.and_utc())
        .ok_or_else(|| format!("unrecognized date '{}'", value))
}

/// Format a date the way the server stores it
pub fn format_date(date: DateTime<Utc>) -> String {
    date.format(DATE_FORMAT).to_string()
}

struct Schedule {
    start: String,
    end: Option<String>,
}

impl JobSpec {
    fn schedule(&self) -> Result<Schedule, ModuleError> {
        let invalid = |reason: String| ModuleError::invalid(Self::KIND, &self.name, reason);
        let start = parse_date(&self.start_date).map_err(|e| invalid(format!("start_date: {}", e)))?;
        let end = if self.ending_type == "never" {
            Some(start)
        } else {
            self.end_date
                .as_deref()
                .map(parse_date)
                .transpose()
                .map_err(|e| invalid(format!("end_date: {}", e)))?
        };
        Ok(Schedule {
            start: format_date(start),
            end: end.map(format_date),
        })
    }

    fn active_flag(&self) -> String {
        self.active.to_string()
    }

    fn create_body(&self, schedule: &Schedule) -> Value {
        json!({
            "name": self.name,
            "rawName": self.name,
            "type": self.incident_type,
            "rawType": self.incident_type,
            "playbookId": self.playbook_id,
            "cron": self.cron,
            "owner": self.owner.clone().unwrap_or_default(),
            "closePrevRun": self.close_previous_run,
            "shouldTriggerNew": self.should_trigger_new,
            "notifyOwner": self.notify_owner,
            "scheduled": true,
            "recurrent": true,
            "times": 0,
            "startDate": schedule.start,
            "endingDate": schedule.end,
            "endingType": self.ending_type,
            "timezone": "UTC",
            "timezoneOffset": 0,
            "CustomFields": { "isactive": self.active_flag() },
            "isFeed": false,
            "version": 0,
        })
    }

    fn updated(&self, mut remote: RemoteJob, schedule: &Schedule) -> RemoteJob {
        remote.cron = self.cron.clone();
        remote.playbook_id = self.playbook_id.clone();
        if self.owner.is_some() {
            remote.owner = self.owner.clone();
        }
        remote.close_prev_run = Some(self.close_previous_run);
        remote.should_trigger_new = Some(self.should_trigger_new);
        remote.notify_owner = Some(self.notify_owner);
        remote.incident_type = Some(self.incident_type.clone());
        remote
            .custom_fields
            .get_or_insert_with(Map::new)
            .insert("isactive".to_string(), json!(self.active_flag()));

        let extra = &mut remote.extra;
        extra.insert("rawName".to_string(), json!(self.name));
        extra.insert("rawType".to_string(), json!(self.incident_type));
        extra.insert("startDate".to_string(), json!(schedule.start));
        extra.insert("endingDate".to_string(), json!(schedule.end));
        extra.insert("endingType".to_string(), json!(self.ending_type));
        extra.insert("version".to_string(), json!(-1));
        remote
    }

    fn jobs_url(&self, client: &XsoarClient) -> String {
        client.endpoint(self.account.as_deref(), "jobs")
    }
}

#[async_trait]
impl Reconcile for JobSpec {
    type Remote = RemoteJob;

    const KIND: &'static str = "Job";

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
        if self.cron.as_deref().unwrap_or_default().is_empty() {
            return Err(ModuleError::invalid(Self::KIND, &self.name, "cron is required"));
        }
        if self.playbook_id.as_deref().unwrap_or_default().is_empty() {
            return Err(ModuleError::invalid(
                Self::KIND,
                &self.name,
                "playbook_id is required",
            ));
        }
        self.schedule().map(|_| ())
    }

    async fn list(&self, client: &XsoarClient) -> Result<Vec<RemoteJob>, ClientError> {
        let url = client.endpoint(self.account.as_deref(), "jobs/search");
        let body = json!({
            "page": 0,
            "size": SEARCH_PAGE_SIZE,
            "query": "",
            "sort": [{ "field": "id", "asc": false }],
        });
        let search: JobSearch = client.query(&url, &body).await?;
        Ok(search.data.unwrap_or_default())
    }

    fn is_named(&self, remote: &RemoteJob) -> bool {
        remote.name == self.name
    }

    fn matches(&self, remote: &RemoteJob) -> bool {
        let optional_eq = |desired: &Option<String>, stored: &Option<String>| {
            desired.is_none() || desired == stored
        };
        optional_eq(&self.cron, &remote.cron)
            && optional_eq(&self.owner, &remote.owner)
            && optional_eq(&self.playbook_id, &remote.playbook_id)
            && remote.close_prev_run.unwrap_or(false) == self.close_previous_run
            && remote.should_trigger_new.unwrap_or(false) == self.should_trigger_new
            && remote.notify_owner.unwrap_or(false) == self.notify_owner
            && remote.incident_type.as_deref() == Some(self.incident_type.as_str())
            && remote
                .custom_fields
                .as_ref()
                .and_then(|fields| fields.get("isactive"))
                .and_then(bool_like)
                .unwrap_or(true)
                == self.active
    }

    async fn plan_create(&self, client: &XsoarClient) -> Result<Vec<Mutation>, ModuleError> {
        let schedule = self.schedule()?;
        Ok(vec![Mutation::post(
            self.jobs_url(client),
            self.create_body(&schedule),
        )])
    }

    async fn plan_update(
        &self,
        client: &XsoarClient,
        remote: RemoteJob,
    ) -> Result<Vec<Mutation>, ModuleError> {
        let schedule = self.schedule()?;
        let body = serde_json::to_value(self.updated(remote, &schedule)).map_err(|e| {
            ModuleError::Api {
                action: "update",
                kind: Self::KIND,
                name: self.name.clone(),
                source: ClientError::InvalidData(e.to_string()),
            }
        })?;
        Ok(vec![Mutation::post(self.jobs_url(client), body)])
    }

    fn plan_delete(&self, client: &XsoarClient, remote: &RemoteJob) -> Vec<Mutation> {
        let url = client.endpoint(self.account.as_deref(), &format!("jobs/{}", remote.id));
        vec![Mutation::delete(url)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::testing::client_for;
    use crate::resources::{apply, Action};
    use chrono::TimeZone;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn spec() -> JobSpec {
        serde_yaml::from_str(
            r#"
name: Nightly feed refresh
cron: "0 2 * * *"
playbook_id: refresh-feeds
start_date: "2024-05-01"
"#,
        )
        .unwrap()
    }

    fn stored() -> Value {
        json!({
            "id": "17",
            "name": "Nightly feed refresh",
            "cron": "0 2 * * *",
            "playbookId": "refresh-feeds",
            "owner": "admin",
            "closePrevRun": false,
            "shouldTriggerNew": false,
            "notifyOwner": false,
            "type": "Unclassified",
            "CustomFields": {"isactive": "true"},
            "startDate": "2024-05-01T00:00:00.000000Z",
            "modified": "2024-05-02T10:00:00Z",
        })
    }

    #[test]
    fn test_parse_date_forms() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        assert_eq!(parse_date("2024-05-01").unwrap(), expected);
        assert_eq!(parse_date("2024-05-01 00:00:00").unwrap(), expected);
        assert_eq!(parse_date("2024-05-01T02:00:00+02:00").unwrap(), expected);
        assert!(parse_date("yesterday").is_err());
    }

    #[test]
    fn test_format_date() {
        let date = Utc.with_ymd_and_hms(2024, 5, 1, 13, 45, 0).unwrap();
        assert_eq!(format_date(date), "2024-05-01T13:45:00.000000Z");
    }

    #[test]
    fn test_never_ending_schedule_ends_at_start() {
        let schedule = spec().schedule().unwrap();
        assert_eq!(schedule.start, "2024-05-01T00:00:00.000000Z");
        assert_eq!(schedule.end.as_deref(), Some("2024-05-01T00:00:00.000000Z"));
    }

    #[test]
    fn test_validation() {
        let mut job = spec();
        job.cron = None;
        assert!(job.validate().is_err());

        let mut job = spec();
        job.start_date = "someday".to_string();
        assert!(matches!(
            job.validate(),
            Err(ModuleError::InvalidParameters { .. })
        ));

        let mut job = spec();
        job.cron = None;
        job.state = DesiredState::Absent;
        assert!(job.validate().is_ok());
    }

    #[test]
    fn test_matches_stored_job() {
        let remote: RemoteJob = serde_json::from_value(stored()).unwrap();
        assert!(spec().matches(&remote));

        let mut job = spec();
        job.active = false;
        assert!(!job.matches(&remote));

        let mut job = spec();
        job.notify_owner = true;
        assert!(!job.matches(&remote));

        let mut job = spec();
        job.cron = Some("0 3 * * *".to_string());
        assert!(!job.matches(&remote));
    }

    #[test]
    fn test_update_sets_booleans_directly() {
        let mut remote: RemoteJob = serde_json::from_value(stored()).unwrap();
        remote.close_prev_run = Some(true);
        let job = spec();
        let schedule = job.schedule().unwrap();
        let updated = serde_json::to_value(job.updated(remote, &schedule)).unwrap();

        assert_eq!(updated["closePrevRun"], false);
        assert_eq!(updated["version"], -1);
        assert_eq!(updated["modified"], "2024-05-02T10:00:00Z");
        assert_eq!(updated["CustomFields"]["isactive"], "true");
        assert_eq!(updated["owner"], "admin");
    }

    #[tokio::test]
    async fn test_deactivating_job_posts_update() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/jobs/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [stored()]})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/jobs"))
            .and(body_partial_json(json!({
                "id": "17",
                "CustomFields": {"isactive": "false"},
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut job = spec();
        job.active = false;
        let client = client_for(&server);
        let result = apply(&job, &client, false).await.unwrap();

        assert_eq!(result.action, Action::Updated);
    }

    #[tokio::test]
    async fn test_duplicate_names_are_ambiguous() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/jobs/search"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"data": [stored(), stored()]})),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = apply(&spec(), &client, false).await.unwrap_err();

        assert!(matches!(
            err,
            ModuleError::AmbiguousResource { count: 2, .. }
        ));
    }

    #[tokio::test]
    async fn test_delete_by_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/jobs/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [stored()]})))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/jobs/17"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let mut job = spec();
        job.state = DesiredState::Absent;
        let client = client_for(&server);
        let result = apply(&job, &client, false).await.unwrap();

        assert!(!result.changed);
        assert_eq!(result.msg, "Job Nightly feed refresh already absent");
    }
}
