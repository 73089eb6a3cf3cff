//! Error taxonomy for the synchronization layer.
//!
//! Transient transport failures are retried inside [`crate::hub::HubClient`]
//! and only show up here once retries are exhausted. Duplicate or
//! out-of-order confirmations are not errors at all.

use tally_core::{SessionId, ZoneId};
use thiserror::Error;

/// Realtime channel failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The transport could not be established.
    #[error("connection error: {0}")]
    Connection(String),
    /// A group membership invocation failed, after one reconnect attempt.
    #[error("could not join group {group}: {reason}")]
    GroupJoin { group: String, reason: String },
    #[error("realtime channel is not connected")]
    NotConnected,
    #[error("connection lost before {method} completed")]
    ConnectionLost { method: String },
    /// The hub answered an invocation with an error.
    #[error("hub method {method} failed: {message}")]
    Invocation { method: String, message: String },
    #[error("timed out waiting for {0}")]
    Timeout(String),
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Failures of the HTTP collaborators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// No response was received (DNS, refused, timeout, TLS, ...).
    #[error("could not reach server: {0}")]
    Transport(String),
    /// The server answered with a non-success status.
    #[error("server responded with status {status}")]
    Status { status: u16, body: String },
    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Human-readable message carried by a structured error body, if any.
    pub fn server_message(&self) -> Option<String> {
        match self {
            ApiError::Status { body, .. } => crate::api::parse_error_message(body),
            _ => None,
        }
    }
}

/// Which finish failure the server reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishFailure {
    /// HTTP 400.
    InvalidData,
    /// HTTP 404.
    NotFound,
    Other,
}

/// A scan could not be submitted. Never a business outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmissionError {
    #[error("scanned code is empty")]
    EmptyCode,
    #[error("could not reach server: {0}")]
    Unreachable(String),
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },
    #[error("unexpected scan response: {0}")]
    InvalidResponse(String),
}

impl SubmissionError {
    pub fn user_message(&self) -> &'static str {
        match self {
            SubmissionError::EmptyCode => "No code was read. Scan again.",
            _ => "Could not send the scan. Check your connection.",
        }
    }
}

impl From<ApiError> for SubmissionError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Transport(reason) => SubmissionError::Unreachable(reason),
            ApiError::Status { status, ref body } => SubmissionError::Server {
                status,
                message: crate::api::parse_error_message(body)
                    .unwrap_or_else(|| "scan rejected by server".to_string()),
            },
            ApiError::Decode(reason) => SubmissionError::InvalidResponse(reason),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("could not load categories for zone {zone}: {message}")]
pub struct CatalogLoadError {
    pub zone: ZoneId,
    pub message: String,
}

/// Session lifecycle failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("could not start the inventory: {0}")]
    SessionCreate(String),
    #[error("{0}")]
    InvalidCode(String),
    /// The join request never got an answer.
    #[error("could not reach server: {0}")]
    Unreachable(String),
    /// The join request failed for a reason other than the code itself.
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },
    #[error("there is no active inventory")]
    NoActiveSession,
    #[error("inventory {0} is already active")]
    AlreadyActive(SessionId),
    #[error("{message}")]
    Finish { kind: FinishFailure, message: String },
    #[error(transparent)]
    Submission(#[from] SubmissionError),
}
