//! # TaskWing protocol
//!
//! Types shared by every TaskWing crate:
//!
//! - the stable error taxonomy ([`ErrorCode`], [`ErrorEnvelope`]) surfaced to tool clients,
//! - JSON-RPC 2.0 envelopes and the tool/resource result shapes ([`jsonrpc`]),
//! - path-safety helpers that keep every read inside the project base ([`paths`]),
//! - the single secret sanitizer applied before anything is logged or streamed ([`redact`]),
//! - the `.taskwing/` state directory and atomic JSON persistence ([`fsio`]).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

pub mod fsio;
pub mod jsonrpc;
pub mod paths;
pub mod redact;

pub use paths::{normalize_relative, relative_display, resolve_within, PathError};
pub use redact::{is_sensitive_key, redact_text, redact_value, redacted, REDACTED};

/// Stable, programmatic error codes. Serialized as their variant name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ErrorCode {
    UnknownAgent,
    ParseFailure,
    ModelUnavailable,
    ToolDenied,
    PathTraversal,
    FileNotFound,
    GitUnavailable,
    CommandNotAllowed,
    ScheduleStopped,
    BudgetExceeded,
    TaskNotFound,
    AmbiguousReference,
    CycleDetected,
    IntegrityViolation,
    ProtocolError,
    CancellationRequested,
    InvalidArgument,
    Internal,
}

impl ErrorCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UnknownAgent => "UnknownAgent",
            Self::ParseFailure => "ParseFailure",
            Self::ModelUnavailable => "ModelUnavailable",
            Self::ToolDenied => "ToolDenied",
            Self::PathTraversal => "PathTraversal",
            Self::FileNotFound => "FileNotFound",
            Self::GitUnavailable => "GitUnavailable",
            Self::CommandNotAllowed => "CommandNotAllowed",
            Self::ScheduleStopped => "ScheduleStopped",
            Self::BudgetExceeded => "BudgetExceeded",
            Self::TaskNotFound => "TaskNotFound",
            Self::AmbiguousReference => "AmbiguousReference",
            Self::CycleDetected => "CycleDetected",
            Self::IntegrityViolation => "IntegrityViolation",
            Self::ProtocolError => "ProtocolError",
            Self::CancellationRequested => "CancellationRequested",
            Self::InvalidArgument => "InvalidArgument",
            Self::Internal => "Internal",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error returned to tool clients: `{code, message, details, hint?}`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct ErrorEnvelope {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default)]
    pub details: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorEnvelope {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: Map::new(),
            hint: None,
        }
    }

    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl fmt::Display for ErrorEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ErrorEnvelope {}

/// Implemented by every crate-level error so callers can recover the stable code.
pub trait HasErrorCode {
    fn code(&self) -> ErrorCode;

    fn to_envelope(&self) -> ErrorEnvelope
    where
        Self: fmt::Display,
    {
        ErrorEnvelope::new(self.code(), self.to_string())
    }
}

impl HasErrorCode for ErrorEnvelope {
    fn code(&self) -> ErrorCode {
        self.code
    }

    fn to_envelope(&self) -> ErrorEnvelope {
        self.clone()
    }
}
