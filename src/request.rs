//! Request payload builders.
//!
//! Each reporting operation has a request type carrying the caller's
//! parameters. The service layer turns it into a JSON payload once every
//! identifier it depends on has been resolved.
//!
//! # Multipart sizing
//!
//! Logs are sent as `multipart/form-data`: one JSON part holding an array of
//! log payloads, followed by one part per attached file. The batcher needs
//! to know how large a batch will be on the wire before it is sent, so the
//! helpers here estimate part sizes from a typical multipart boundary.
//!
//! ```text
//! --<boundary>                                      ┐
//! Content-Disposition: form-data; name="json_request_part"
//! Content-Type: application/json                    │ json part
//!                                                   │
//! [{"launchUuid": ..., "message": ...}, ...]        ┘
//! --<boundary>                                      ┐
//! Content-Disposition: form-data; name="file"; filename="report.html"
//! Content-Type: text/html                           │ one per attachment
//!                                                   │
//! <file bytes>                                      ┘
//! --<boundary>--                                    footer
//! ```

use std::collections::BTreeMap;

use serde_json::{Map, Value, json};

use crate::deferred::MaybeDeferred;
use crate::model::{Attachment, Attribute, Id, ItemType, LaunchMode, LogRecord, Status};

/// Boundary length used for size estimation; real boundaries are the same
/// length.
const TYPICAL_BOUNDARY: &str = "--972dbca3abacfd01fb4aea0571532b52";

/// Size of the closing `\r\n--<boundary>--` sequence.
pub const MULTIPART_FOOTER_LENGTH: usize = 2 + TYPICAL_BOUNDARY.len() + 2;

/// Separator added between elements of the JSON log array.
const JSON_ARRAY_ELEMENT_LENGTH: usize = 1;

/// Stand-in for an identifier that is still pending when a record is sized.
pub const PLACEHOLDER_ID: &str = "00000000-0000-0000-0000-000000000000";

/// Name of the multipart part holding the JSON log array.
pub const JSON_PART_NAME: &str = "json_request_part";

/// Name of each multipart part holding an attachment.
pub const FILE_PART_NAME: &str = "file";

/// Parameters for starting a launch.
#[derive(Debug, Clone, Default)]
pub struct StartLaunch {
    pub name: String,
    pub start_time: String,
    pub attributes: Vec<Attribute>,
    pub description: Option<String>,
    pub rerun: bool,
    pub rerun_of: Option<String>,
    /// Client-chosen launch UUID, if the service should not generate one.
    pub uuid: Option<String>,
}

impl StartLaunch {
    pub fn new(name: impl Into<String>, start_time: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start_time: start_time.into(),
            ..Default::default()
        }
    }

    pub fn with_attributes(mut self, attributes: Vec<Attribute>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Marks the launch as a rerun, optionally of a specific launch.
    pub fn rerun_of(mut self, launch: Option<String>) -> Self {
        self.rerun = true;
        self.rerun_of = launch;
        self
    }

    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    /// Chooses a random launch UUID up front, so the launch can be referred
    /// to before the service answers.
    pub fn with_random_uuid(self) -> Self {
        self.with_uuid(uuid::Uuid::new_v4().to_string())
    }

    pub fn payload(&self, mode: LaunchMode) -> Value {
        let mut payload = json!({
            "name": self.name,
            "startTime": self.start_time,
            "attributes": truncated(&self.attributes),
            "mode": mode.as_wire(),
            "rerun": self.rerun,
        });
        insert_opt(&mut payload, "description", self.description.as_deref());
        insert_opt(&mut payload, "rerunOf", self.rerun_of.as_deref());
        insert_opt(&mut payload, "uuid", self.uuid.as_deref());
        payload
    }
}

/// Parameters for finishing a launch.
#[derive(Debug, Clone, Default)]
pub struct FinishLaunch {
    pub end_time: String,
    pub status: Option<Status>,
    pub attributes: Vec<Attribute>,
    pub description: Option<String>,
}

impl FinishLaunch {
    pub fn new(end_time: impl Into<String>) -> Self {
        Self {
            end_time: end_time.into(),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_attributes(mut self, attributes: Vec<Attribute>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn payload(&self) -> Value {
        let mut payload = json!({
            "endTime": self.end_time,
            "attributes": truncated(&self.attributes),
        });
        if let Some(status) = self.status {
            payload["status"] = json!(status);
        }
        insert_opt(&mut payload, "description", self.description.as_deref());
        payload
    }
}

/// Parameters for starting a test item.
#[derive(Debug, Clone)]
pub struct StartItem {
    /// Parent item; `None` starts a root item of the launch.
    pub parent: Option<MaybeDeferred<Id>>,
    pub name: String,
    pub start_time: String,
    pub item_type: ItemType,
    pub attributes: Vec<Attribute>,
    pub parameters: BTreeMap<String, String>,
    pub description: Option<String>,
    /// `false` for nested steps that should not count in statistics.
    pub has_stats: bool,
    pub code_ref: Option<String>,
    pub retry: bool,
    pub test_case_id: Option<String>,
}

impl StartItem {
    pub fn new(name: impl Into<String>, start_time: impl Into<String>, item_type: ItemType) -> Self {
        Self {
            parent: None,
            name: name.into(),
            start_time: start_time.into(),
            item_type,
            attributes: Vec::new(),
            parameters: BTreeMap::new(),
            description: None,
            has_stats: true,
            code_ref: None,
            retry: false,
            test_case_id: None,
        }
    }

    pub fn with_parent(mut self, parent: impl Into<MaybeDeferred<Id>>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_attributes(mut self, attributes: Vec<Attribute>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_code_ref(mut self, code_ref: impl Into<String>) -> Self {
        self.code_ref = Some(code_ref.into());
        self
    }

    pub fn with_test_case_id(mut self, test_case_id: impl Into<String>) -> Self {
        self.test_case_id = Some(test_case_id.into());
        self
    }

    pub fn without_stats(mut self) -> Self {
        self.has_stats = false;
        self
    }

    pub fn retry(mut self, retry: bool) -> Self {
        self.retry = retry;
        self
    }

    pub fn payload(&self, launch: &str) -> Value {
        let parameters: Vec<Attribute> = self
            .parameters
            .iter()
            .map(|(k, v)| Attribute::new(k, v))
            .collect();
        let mut payload = json!({
            "name": self.name,
            "startTime": self.start_time,
            "type": self.item_type,
            "launchUuid": launch,
            "attributes": truncated(&self.attributes),
            "hasStats": self.has_stats,
            "retry": self.retry,
        });
        if !parameters.is_empty() {
            payload["parameters"] = json!(parameters);
        }
        insert_opt(&mut payload, "description", self.description.as_deref());
        insert_opt(&mut payload, "codeRef", self.code_ref.as_deref());
        insert_opt(&mut payload, "testCaseId", self.test_case_id.as_deref());
        payload
    }
}

/// Parameters for finishing a test item.
#[derive(Debug, Clone, Default)]
pub struct FinishItem {
    pub end_time: String,
    pub status: Option<Status>,
    pub issue: Option<crate::model::Issue>,
    pub attributes: Vec<Attribute>,
    pub description: Option<String>,
    pub retry: bool,
}

impl FinishItem {
    pub fn new(end_time: impl Into<String>) -> Self {
        Self {
            end_time: end_time.into(),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_issue(mut self, issue: crate::model::Issue) -> Self {
        self.issue = Some(issue);
        self
    }

    pub fn with_attributes(mut self, attributes: Vec<Attribute>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn retry(mut self, retry: bool) -> Self {
        self.retry = retry;
        self
    }

    /// Builds the payload.
    ///
    /// A skipped item without an explicit issue is marked `NOT_ISSUE` when
    /// skipped items should not be treated as issues.
    pub fn payload(&self, launch: &str, is_skipped_an_issue: bool) -> Value {
        let mut payload = json!({
            "endTime": self.end_time,
            "launchUuid": launch,
            "attributes": truncated(&self.attributes),
            "retry": self.retry,
        });
        if let Some(status) = self.status {
            payload["status"] = json!(status);
        }
        let issue = match (&self.issue, self.status) {
            (Some(issue), _) => Some(issue.clone()),
            (None, Some(Status::Skipped)) if !is_skipped_an_issue => {
                Some(crate::model::Issue::not_issue())
            }
            _ => None,
        };
        if let Some(issue) = issue {
            payload["issue"] = json!(issue);
        }
        insert_opt(&mut payload, "description", self.description.as_deref());
        payload
    }
}

/// Builds the JSON payload of one log record from resolved identifiers.
pub fn log_payload(record: &LogRecord, launch: &Id, item: Option<&Id>) -> Value {
    let mut payload = json!({
        "launchUuid": launch,
        "time": record.time,
        "message": record.message,
    });
    if let Some(level) = record.level {
        payload["level"] = json!(level);
    }
    if let Some(item) = item {
        payload["itemUuid"] = json!(item);
    }
    if let Some(file) = &record.attachment {
        payload["file"] = json!({ "name": file.name });
    }
    payload
}

/// Wire size of one element of the JSON log array.
pub fn json_part_size(payload: &Value) -> usize {
    let serialized = serde_json::to_vec(payload).map(|v| v.len()).unwrap_or(0);
    serialized + JSON_ARRAY_ELEMENT_LENGTH
}

/// Wire size of the multipart part carrying an attachment.
pub fn file_part_size(file: Option<&Attachment>) -> usize {
    match file {
        None => 0,
        Some(file) => {
            let header = format!(
                "{TYPICAL_BOUNDARY}\r\nContent-Disposition: form-data; name=\"{FILE_PART_NAME}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                file.name,
                file.mime()
            );
            header.len() + file.content.len()
        }
    }
}

fn truncated(attributes: &[Attribute]) -> Vec<Attribute> {
    attributes.iter().map(Attribute::truncated).collect()
}

fn insert_opt(payload: &mut Value, key: &str, value: Option<&str>) {
    if let (Some(value), Value::Object(map)) = (value, payload) {
        map.insert(key.to_string(), Value::String(value.to_string()));
    }
}

/// Builds the body of an item update request.
pub fn update_payload(attributes: &[Attribute], description: Option<&str>) -> Value {
    let mut map = Map::new();
    map.insert("attributes".to_string(), json!(truncated(attributes)));
    if let Some(description) = description {
        map.insert("description".to_string(), json!(description));
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Issue, LogLevel};

    #[test]
    fn test_start_launch_payload() {
        let payload = StartLaunch::new("nightly", "1700000000000")
            .with_attributes(vec![Attribute::new("env", "ci")])
            .rerun_of(Some("prev-launch".to_string()))
            .payload(LaunchMode::Debug);

        assert_eq!(payload["name"], "nightly");
        assert_eq!(payload["mode"], "DEBUG");
        assert_eq!(payload["rerun"], true);
        assert_eq!(payload["rerunOf"], "prev-launch");
        assert_eq!(payload["attributes"][0]["key"], "env");
        assert!(payload.get("uuid").is_none());
    }

    #[test]
    fn test_random_launch_uuid() {
        let payload = StartLaunch::new("nightly", "1")
            .with_random_uuid()
            .payload(LaunchMode::Default);
        let uuid = payload["uuid"].as_str().unwrap();
        assert_eq!(uuid.len(), PLACEHOLDER_ID.len());
        assert!(uuid::Uuid::parse_str(uuid).is_ok());
        assert_eq!(uuid::Uuid::nil().to_string(), PLACEHOLDER_ID);
    }

    #[test]
    fn test_start_item_payload_parameters() {
        let payload = StartItem::new("test_add", "1", ItemType::Step)
            .with_parameter("x", "1")
            .with_code_ref("tests/test_math.py:test_add")
            .without_stats()
            .payload("launch-1");

        assert_eq!(payload["type"], "STEP");
        assert_eq!(payload["launchUuid"], "launch-1");
        assert_eq!(payload["hasStats"], false);
        assert_eq!(payload["parameters"][0]["key"], "x");
        assert_eq!(payload["codeRef"], "tests/test_math.py:test_add");
    }

    #[test]
    fn test_skipped_item_marked_not_issue() {
        let request = FinishItem::new("2").with_status(Status::Skipped);

        let as_issue = request.payload("launch-1", true);
        assert!(as_issue.get("issue").is_none());

        let not_issue = request.payload("launch-1", false);
        assert_eq!(not_issue["issue"]["issueType"], "NOT_ISSUE");
    }

    #[test]
    fn test_explicit_issue_wins() {
        let payload = FinishItem::new("2")
            .with_status(Status::Skipped)
            .with_issue(Issue::new("pb001").with_comment("flaky backend"))
            .payload("launch-1", false);
        assert_eq!(payload["issue"]["issueType"], "pb001");
        assert_eq!(payload["issue"]["comment"], "flaky backend");
    }

    #[test]
    fn test_log_payload_with_file() {
        let record = LogRecord::new(Id::new("launch-1"), "3", "screenshot")
            .with_level(LogLevel::Info)
            .with_attachment(Attachment::new("shot.png", vec![0u8; 4]));
        let payload = log_payload(&record, &Id::new("launch-1"), Some(&Id::new("item-1")));

        assert_eq!(payload["itemUuid"], "item-1");
        assert_eq!(payload["level"], "INFO");
        assert_eq!(payload["file"]["name"], "shot.png");
    }

    #[test]
    fn test_part_sizes() {
        let payload = json!({"message": "hi"});
        assert_eq!(json_part_size(&payload), r#"{"message":"hi"}"#.len() + 1);

        assert_eq!(file_part_size(None), 0);
        let file = Attachment::new("a.txt", b"hello".to_vec()).with_content_type("text/plain");
        let size = file_part_size(Some(&file));
        assert!(size > 5);
        assert!(size < 5 + 200);
    }
}
