//! State enums shared across the service, plus validation of incoming
//! publish items. Validation returns typed errors; nothing here panics on
//! bad input.

use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{error::ServiceError, settings::Settings};

/// Object key marking an item as a tombstone ("not present" marker).
pub const ABSENT_OBJECT_KEY: &str = "absent";

lazy_static! {
    static ref OBJECT_KEY_RE: Regex = Regex::new(r"^[0-9a-f]{64}$").unwrap();
    static ref CONTENT_TYPE_RE: Regex =
        Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9!#$&\-^_.+]*/[a-zA-Z0-9][a-zA-Z0-9!#$&\-^_.+]*(;.*)?$")
            .unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublishState {
    Pending,
    Committing,
    Committed,
    Failed,
}

impl PublishState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishState::Pending => "PENDING",
            PublishState::Committing => "COMMITTING",
            PublishState::Committed => "COMMITTED",
            PublishState::Failed => "FAILED",
        }
    }

    pub fn terminal() -> &'static [PublishState] {
        &[PublishState::Committed, PublishState::Failed]
    }

    pub fn is_terminal(&self) -> bool {
        Self::terminal().contains(self)
    }
}

impl fmt::Display for PublishState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PublishState {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(PublishState::Pending),
            "COMMITTING" => Ok(PublishState::Committing),
            "COMMITTED" => Ok(PublishState::Committed),
            "FAILED" => Ok(PublishState::Failed),
            other => Err(ServiceError::Validation(format!(
                "unknown publish state {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    NotStarted,
    InProgress,
    Complete,
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::NotStarted => "NOT_STARTED",
            TaskState::InProgress => "IN_PROGRESS",
            TaskState::Complete => "COMPLETE",
            TaskState::Failed => "FAILED",
        }
    }

    pub fn terminal() -> &'static [TaskState] {
        &[TaskState::Complete, TaskState::Failed]
    }

    pub fn is_terminal(&self) -> bool {
        Self::terminal().contains(self)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NOT_STARTED" => Ok(TaskState::NotStarted),
            "IN_PROGRESS" => Ok(TaskState::InProgress),
            "COMPLETE" => Ok(TaskState::Complete),
            "FAILED" => Ok(TaskState::Failed),
            other => Err(ServiceError::Validation(format!(
                "unknown task state {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitMode {
    Phase1,
    Phase2,
}

impl CommitMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitMode::Phase1 => "phase1",
            CommitMode::Phase2 => "phase2",
        }
    }
}

impl fmt::Display for CommitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommitMode {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "phase1" => Ok(CommitMode::Phase1),
            "phase2" => Ok(CommitMode::Phase2),
            other => Err(ServiceError::Validation(format!(
                "unknown commit mode {other:?}"
            ))),
        }
    }
}

/// One incoming publish item, as supplied by a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemInput {
    pub web_uri: String,
    #[serde(default)]
    pub object_key: Option<String>,
    #[serde(default)]
    pub link_to: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
}

impl ItemInput {
    /// Validate and normalize the item in place.
    ///
    /// Rules:
    /// - `web_uri` is a normalized absolute path;
    /// - `object_key` matches `[0-9a-f]{64}` or is the literal "absent";
    /// - `link_to` is mutually exclusive with a non-tombstone `object_key`,
    ///   and one of the two must be present;
    /// - `content_type` is forbidden for links and tombstones;
    /// - the reserved autoindex filename cannot be published directly.
    pub fn validate(&mut self, settings: &Settings) -> Result<(), ServiceError> {
        self.web_uri = normalize_path(&self.web_uri)?;

        if !settings.autoindex_filename.is_empty()
            && basename(&self.web_uri) == settings.autoindex_filename
        {
            return Err(ServiceError::Validation(format!(
                "{}: filename is reserved",
                self.web_uri
            )));
        }

        match (&self.object_key, &self.link_to) {
            (Some(key), None) => {
                if key != ABSENT_OBJECT_KEY && !OBJECT_KEY_RE.is_match(key) {
                    return Err(ServiceError::Validation(format!(
                        "invalid object key {key:?}"
                    )));
                }
            }
            (None, Some(_)) | (Some(_), Some(_)) => {
                if let Some(key) = &self.object_key {
                    if key != ABSENT_OBJECT_KEY {
                        return Err(ServiceError::Validation(format!(
                            "{}: object_key {key:?} cannot be combined with link_to",
                            self.web_uri
                        )));
                    }
                }
                let link = self.link_to.as_deref().unwrap_or_default();
                self.link_to = Some(normalize_path(link)?);
            }
            (None, None) => {
                return Err(ServiceError::Validation(format!(
                    "{}: one of object_key or link_to is required",
                    self.web_uri
                )));
            }
        }

        if let Some(content_type) = &self.content_type {
            if self.link_to.is_some() {
                return Err(ServiceError::Validation(format!(
                    "{}: content_type is not allowed for links",
                    self.web_uri
                )));
            }
            if self.object_key.as_deref() == Some(ABSENT_OBJECT_KEY) {
                return Err(ServiceError::Validation(format!(
                    "{}: content_type is not allowed for tombstones",
                    self.web_uri
                )));
            }
            if !CONTENT_TYPE_RE.is_match(content_type) {
                return Err(ServiceError::Validation(format!(
                    "invalid content type {content_type:?}"
                )));
            }
        }

        Ok(())
    }

    pub fn is_tombstone(&self) -> bool {
        self.object_key.as_deref() == Some(ABSENT_OBJECT_KEY)
    }
}

/// Normalize a CDN path: require a non-empty value, prepend a leading "/"
/// when missing, and reject traversal or repeated separators.
pub fn normalize_path(path: &str) -> Result<String, ServiceError> {
    if path.is_empty() {
        return Err(ServiceError::Validation("empty path".to_string()));
    }
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    if path.contains("//") || path.split('/').any(|seg| seg == "..") {
        return Err(ServiceError::Validation(format!("invalid path {path:?}")));
    }
    Ok(path)
}

pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// `updated` columns store naive UTC; convert back to an aware timestamp
/// when leaving the database layer.
pub fn utc_from_naive(naive: NaiveDateTime) -> DateTime<Utc> {
    DateTime::from_naive_utc_and_offset(naive, Utc)
}

pub fn now_naive() -> NaiveDateTime {
    Utc::now().naive_utc()
}
