use crate::driver::{DriverError, UpdateOutcome};
use crate::hooks::{HookEvent, HookWarning};
use crate::validation::{BatchValidationError, FieldIssue, RecordIssues, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Category of a failed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Storage,
    Hook,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: ErrorKind,
    pub message: String,
    /// Field issues of a single-record validation failure.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<FieldIssue>,
    /// Per-record issues of a batch validation failure.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub records: Vec<RecordIssues>,
}

/// Operation-specific payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseData {
    None,
    Ids { ids: Vec<Value> },
    Updated { matched: u64, modified: u64 },
    Deleted { deleted: u64 },
}

/// Outcome of a write or delete. `error` is present exactly when
/// `success` is false.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawResponse")]
pub struct Response {
    success: bool,
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<ErrorDetail>,
    count: u64,
    data: ResponseData,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<HookWarning>,
}

/// Wire form of `Response`, checked before it becomes one.
#[derive(Deserialize)]
struct RawResponse {
    success: bool,
    message: String,
    #[serde(default)]
    error: Option<ErrorDetail>,
    count: u64,
    data: ResponseData,
    #[serde(default)]
    warnings: Vec<HookWarning>,
}

impl TryFrom<RawResponse> for Response {
    type Error = String;

    fn try_from(raw: RawResponse) -> Result<Self, Self::Error> {
        match (raw.success, raw.error.is_some()) {
            (true, true) => return Err("a successful response cannot carry an error".into()),
            (false, false) => return Err("a failed response must carry an error".into()),
            _ => {}
        }
        Ok(Response {
            success: raw.success,
            message: raw.message,
            error: raw.error,
            count: raw.count,
            data: raw.data,
            warnings: raw.warnings,
        })
    }
}

impl Response {
    fn ok(message: String, count: u64, data: ResponseData) -> Self {
        Response {
            success: true,
            message,
            error: None,
            count,
            data,
            warnings: Vec::new(),
        }
    }

    fn failed(error: ErrorDetail) -> Self {
        Response {
            success: false,
            message: error.message.clone(),
            error: Some(error),
            count: 0,
            data: ResponseData::None,
            warnings: Vec::new(),
        }
    }

    pub fn inserted(ids: Vec<Value>) -> Self {
        let count = ids.len() as u64;
        Response::ok(
            format!("Inserted {count} document(s)"),
            count,
            ResponseData::Ids { ids },
        )
    }

    pub fn updated(outcome: UpdateOutcome) -> Self {
        Response::ok(
            format!(
                "Matched {} document(s), modified {}",
                outcome.matched, outcome.modified
            ),
            outcome.modified,
            ResponseData::Updated {
                matched: outcome.matched,
                modified: outcome.modified,
            },
        )
    }

    pub fn deleted(deleted: u64) -> Self {
        Response::ok(
            format!("Deleted {deleted} document(s)"),
            deleted,
            ResponseData::Deleted { deleted },
        )
    }

    pub fn validation_failed(error: ValidationError) -> Self {
        Response::failed(ErrorDetail {
            kind: ErrorKind::Validation,
            message: format!("Validation failed: {error}"),
            issues: error.issues,
            records: Vec::new(),
        })
    }

    pub fn batch_validation_failed(error: BatchValidationError) -> Self {
        Response::failed(ErrorDetail {
            kind: ErrorKind::Validation,
            message: format!("Validation failed: {error}"),
            issues: Vec::new(),
            records: error.records,
        })
    }

    pub fn storage_failed(error: &DriverError) -> Self {
        Response::failed(ErrorDetail {
            kind: ErrorKind::Storage,
            message: format!("Storage error: {error}"),
            issues: Vec::new(),
            records: Vec::new(),
        })
    }

    pub fn hook_failed(event: HookEvent, message: &str) -> Self {
        Response::failed(ErrorDetail {
            kind: ErrorKind::Hook,
            message: format!("Hook '{event}' failed: {message}"),
            issues: Vec::new(),
            records: Vec::new(),
        })
    }

    pub fn with_warnings(mut self, warnings: Vec<HookWarning>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Human-readable summary. Not meant to be parsed.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn error(&self) -> Option<&ErrorDetail> {
        self.error.as_ref()
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn data(&self) -> &ResponseData {
        &self.data
    }

    /// Inserted identifiers; empty for other operations.
    pub fn ids(&self) -> &[Value] {
        match &self.data {
            ResponseData::Ids { ids } => ids,
            _ => &[],
        }
    }

    pub fn warnings(&self) -> &[HookWarning] {
        &self.warnings
    }
}
