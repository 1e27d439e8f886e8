//! Uniform response envelope: `{status, statusCode, message, payload, count}`.

use canvas_tree::{Error, ErrorKind, PropagationReport};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub status: Status,
    pub status_code: u16,
    pub message: String,
    pub payload: Value,
    pub count: Option<usize>,
}

/// HTTP status a transport should answer with for an error kind.
pub fn status_code(kind: ErrorKind) -> u16 {
    match kind {
        ErrorKind::NotFound => 404,
        ErrorKind::InvalidInput | ErrorKind::Conflict => 400,
        ErrorKind::Locked => 403,
        ErrorKind::Storage => 500,
    }
}

impl Envelope {
    fn ok(status_code: u16, message: impl Into<String>, payload: Value, count: Option<usize>) -> Self {
        Self {
            status: Status::Success,
            status_code,
            message: message.into(),
            payload,
            count,
        }
    }

    pub fn success(payload: Value, message: impl Into<String>) -> Self {
        Self::ok(200, message, payload, None)
    }

    pub fn found(payload: Value, count: Option<usize>) -> Self {
        Self::ok(200, "Resource found", payload, count)
    }

    pub fn created(payload: Value) -> Self {
        Self::ok(201, "Resource created successfully", payload, None)
    }

    pub fn updated(payload: Value) -> Self {
        Self::ok(200, "Resource updated successfully", payload, None)
    }

    pub fn deleted(payload: Value) -> Self {
        Self::ok(200, "Resource deleted successfully", payload, None)
    }

    pub fn error(status_code: u16, message: impl Into<String>, payload: Value) -> Self {
        Self {
            status: Status::Error,
            status_code,
            message: message.into(),
            payload,
            count: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::error(400, message, Value::Null)
    }

    pub fn from_error(err: &Error) -> Self {
        Self::error(status_code(err.kind()), err.to_string(), Value::Null)
    }

    /// A complete propagation is a success; otherwise the envelope carries the
    /// report and the status of the first failed target.
    pub fn from_report(report: PropagationReport) -> Self {
        let total = report.target_count();
        let updated = report.updated.len();
        let message = format!("{updated} of {total} targets updated");
        let first_failure = report.failures.first().map(|f| f.kind);
        let payload = serde_json::to_value(&report).unwrap_or(Value::Null);
        match first_failure {
            None => Self::ok(200, message, payload, Some(total)),
            Some(kind) => Self {
                count: Some(total),
                ..Self::error(status_code(kind), message, payload)
            },
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}
