//! Scan outcome classification and user feedback.
//!
//! The server decides whether a scan is valid; the client only maps the
//! answer to a message. An outcome is transient: it drives a banner, never
//! the scanned set (that changes only through the realtime broadcast).

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::ItemId;

/// Server classification of one scan attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScanStatus {
    /// Accepted; a broadcast confirmation follows.
    Correct,
    /// The item exists but is not assignable to this zone.
    WrongZone,
    /// The code is unknown to the system.
    NotFound,
    /// The item was already confirmed in this session.
    Duplicate,
}

/// Raw body of the scan endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResponse {
    #[serde(default)]
    pub item_id: Option<ItemId>,
    #[serde(default)]
    pub is_valid: bool,
    pub status: ScanStatus,
}

/// Tone of a feedback banner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackTone {
    Success,
    Warning,
    Error,
    Info,
}

/// Message shown to the user after a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Feedback {
    pub tone: FeedbackTone,
    pub message: &'static str,
}

impl ScanStatus {
    pub fn feedback(self) -> Feedback {
        match self {
            ScanStatus::Correct => Feedback {
                tone: FeedbackTone::Success,
                message: "Item scanned successfully.",
            },
            ScanStatus::WrongZone => Feedback {
                tone: FeedbackTone::Warning,
                message: "Item does not belong to this zone.",
            },
            ScanStatus::NotFound => Feedback {
                tone: FeedbackTone::Error,
                message: "Item not found in the system.",
            },
            ScanStatus::Duplicate => Feedback {
                tone: FeedbackTone::Info,
                message: "Item already scanned previously.",
            },
        }
    }
}

/// Classified result of a submitted scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOutcome {
    pub status: ScanStatus,
    pub item_id: Option<ItemId>,
}

impl ScanOutcome {
    pub fn feedback(&self) -> Feedback {
        self.status.feedback()
    }

    /// Whether the server accepted the scan.
    pub fn is_accepted(&self) -> bool {
        self.status == ScanStatus::Correct
    }
}

impl From<ScanResponse> for ScanOutcome {
    fn from(response: ScanResponse) -> Self {
        if response.status == ScanStatus::Correct && !response.is_valid {
            log::warn!("Scan reported Correct but flagged invalid; trusting status");
        }
        Self {
            status: response.status,
            item_id: response.item_id,
        }
    }
}

impl fmt::Display for ScanOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.feedback().message)
    }
}
