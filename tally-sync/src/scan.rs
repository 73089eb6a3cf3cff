//! Scan submission: one request/response per physical scan.
//!
//! The server classifies every submission. `WrongZone`, `NotFound` and
//! `Duplicate` are business outcomes returned as values; only transport
//! or server failures become a [`SubmissionError`].
//!
//! Submitting never touches the [`crate::store::StoreHandle`]: the scanned
//! set only grows from the broadcast confirmation, which reaches every
//! device including the submitter.

use std::sync::Arc;

use tally_core::{ScanOutcome, SessionId, StateId};

use crate::api::{InventoryApi, ScanRequest};
use crate::error::SubmissionError;

/// Prefix some label printers put in front of the asset code.
const CODE_PREFIX: &str = "Code:";

/// Strip a `Code:` label prefix and surrounding whitespace.
pub fn normalize_scan_code(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix(CODE_PREFIX)
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}

#[derive(Clone)]
pub struct ScanSubmitter {
    api: Arc<dyn InventoryApi>,
}

impl ScanSubmitter {
    pub fn new(api: Arc<dyn InventoryApi>) -> Self {
        Self { api }
    }

    /// Submit one scanned code for classification.
    pub async fn submit_scan(
        &self,
        session_id: SessionId,
        code: &str,
        state_id: StateId,
    ) -> Result<ScanOutcome, SubmissionError> {
        let code = normalize_scan_code(code);
        if code.is_empty() {
            return Err(SubmissionError::EmptyCode);
        }

        let response = self
            .api
            .scan(ScanRequest {
                session_id,
                code: code.clone(),
                state_id,
            })
            .await
            .map_err(|e| {
                log::warn!("Scan of {code} in session {session_id} failed: {e}");
                SubmissionError::from(e)
            })?;

        let outcome = ScanOutcome::from(response);
        log::debug!("Scan of {code} in session {session_id}: {outcome}");
        Ok(outcome)
    }
}
