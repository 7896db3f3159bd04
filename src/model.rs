//! Data model for launches, items and log records.
//!
//! # Identifiers
//!
//! The service assigns every launch and item an identifier. Until it does,
//! callers hold a [`Deferred<Id>`](crate::deferred::Deferred). When the
//! service cannot (or did not) produce one, the identifier resolves to
//! [`Id::NotFound`]; any operation that depends on such an identifier
//! short-circuits instead of issuing a request.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize, Serializer};

use crate::deferred::MaybeDeferred;

/// Maximum length of an attribute key or value accepted by the service.
pub const MAX_ATTRIBUTE_LENGTH: usize = 128;

/// Content type used for attachments that don't declare one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Identifier of a launch or item as confirmed by the service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Id {
    /// A real identifier returned by the service.
    Known(String),
    /// The entity could not be resolved; dependents must not be reported.
    NotFound,
}

impl Id {
    /// Shorthand for a known identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self::Known(id.into())
    }

    /// Returns the identifier text, or `None` for [`Id::NotFound`].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Known(id) => Some(id),
            Self::NotFound => None,
        }
    }

    /// Returns `true` for the [`Id::NotFound`] sentinel.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(id) => f.write_str(id),
            Self::NotFound => f.write_str("<not found>"),
        }
    }
}

impl Serialize for Id {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Known(id) => serializer.serialize_str(id),
            Self::NotFound => serializer.serialize_none(),
        }
    }
}

impl From<&str> for Id {
    fn from(id: &str) -> Self {
        Self::Known(id.to_string())
    }
}

impl From<String> for Id {
    fn from(id: String) -> Self {
        Self::Known(id)
    }
}

/// Launch mode. Debug launches are hidden from the default launch list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaunchMode {
    #[default]
    Default,
    Debug,
}

impl LaunchMode {
    /// Wire representation sent with the launch start request.
    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::Default => "DEFAULT",
            Self::Debug => "DEBUG",
        }
    }
}

/// Kind of test item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemType {
    Suite,
    Story,
    Test,
    Scenario,
    Step,
    BeforeClass,
    BeforeGroups,
    BeforeMethod,
    BeforeSuite,
    BeforeTest,
    AfterClass,
    AfterGroups,
    AfterMethod,
    AfterSuite,
    AfterTest,
}

/// Final status of an item or launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Passed,
    Failed,
    Stopped,
    Skipped,
    Interrupted,
    Cancelled,
    Info,
    Warn,
}

/// Severity of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
    Unknown,
}

/// A key/value label attached to a launch or item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub value: String,
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub system: bool,
}

impl Attribute {
    /// Creates a keyed attribute.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            value: value.into(),
            system: false,
        }
    }

    /// Creates a value-only attribute (a tag).
    pub fn tag(value: impl Into<String>) -> Self {
        Self {
            key: None,
            value: value.into(),
            system: false,
        }
    }

    /// Returns a copy with key and value cut to [`MAX_ATTRIBUTE_LENGTH`]
    /// characters.
    pub fn truncated(&self) -> Self {
        Self {
            key: self.key.as_deref().map(truncate),
            value: truncate(&self.value),
            system: self.system,
        }
    }
}

fn truncate(text: &str) -> String {
    text.chars().take(MAX_ATTRIBUTE_LENGTH).collect()
}

/// Converts a key/value map into an attribute list.
///
/// # Example
///
/// ```
/// use std::collections::BTreeMap;
/// use rp_client::model::attributes_from_map;
///
/// let mut map = BTreeMap::new();
/// map.insert("browser".to_string(), "firefox".to_string());
/// let attributes = attributes_from_map(&map);
/// assert_eq!(attributes[0].key.as_deref(), Some("browser"));
/// ```
pub fn attributes_from_map(map: &BTreeMap<String, String>) -> Vec<Attribute> {
    map.iter().map(|(k, v)| Attribute::new(k, v)).collect()
}

/// Defect classification attached to a finished item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub issue_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default)]
    pub auto_analyzed: bool,
    #[serde(default)]
    pub ignore_analyzer: bool,
}

impl Issue {
    /// Creates an issue of the given locator type (e.g. `"pb001"`).
    pub fn new(issue_type: impl Into<String>) -> Self {
        Self {
            issue_type: issue_type.into(),
            comment: None,
            auto_analyzed: false,
            ignore_analyzer: false,
        }
    }

    /// Issue marking a skipped item as not requiring investigation.
    pub fn not_issue() -> Self {
        Self::new("NOT_ISSUE")
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

/// A file attached to a log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub content: Vec<u8>,
    pub content_type: Option<String>,
}

impl Attachment {
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// The declared content type, or [`DEFAULT_CONTENT_TYPE`].
    pub fn mime(&self) -> &str {
        self.content_type.as_deref().unwrap_or(DEFAULT_CONTENT_TYPE)
    }
}

/// One log line destined for the service.
///
/// Identifiers may still be pending when the record is built; the batcher
/// and the service layer normalize them before sending.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub launch: MaybeDeferred<Id>,
    pub time: String,
    pub item: Option<MaybeDeferred<Id>>,
    pub level: Option<LogLevel>,
    pub message: String,
    pub attachment: Option<Attachment>,
}

impl LogRecord {
    /// Creates a launch-level log record.
    pub fn new(
        launch: impl Into<MaybeDeferred<Id>>,
        time: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            launch: launch.into(),
            time: time.into(),
            item: None,
            level: None,
            message: message.into(),
            attachment: None,
        }
    }

    pub fn with_item(mut self, item: impl Into<MaybeDeferred<Id>>) -> Self {
        self.item = Some(item.into());
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = Some(level);
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }
}

/// Current time as epoch milliseconds, the timestamp format the service
/// expects.
pub fn timestamp() -> String {
    chrono::Utc::now().timestamp_millis().to_string()
}
