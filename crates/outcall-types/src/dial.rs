//! Dial metadata carried by a job.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when job metadata cannot be parsed.
#[derive(Debug, Error)]
#[error("invalid job metadata: {0}")]
pub struct MetadataError(#[from] serde_json::Error);

/// Dialing information parsed once from job metadata.
///
/// `phone_number = None` means the job is an inbound/direct session: no
/// outbound call leg is placed and the agent greets immediately.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialInfo {
    /// E.164 number to dial, if this is an outbound job.
    #[serde(default)]
    pub phone_number: Option<String>,
    /// Per-job directive appended to the agent's base instructions.
    #[serde(default)]
    pub prompt: Option<String>,
}

impl DialInfo {
    /// Parses dial information from the job's metadata payload.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError`] if the payload is not valid JSON. Unknown
    /// fields are ignored; dispatchers routinely attach extra bookkeeping.
    pub fn from_metadata(metadata: &str) -> Result<Self, MetadataError> {
        Ok(serde_json::from_str(metadata)?)
    }

    /// True when the job should place an outbound call leg.
    pub fn is_outbound(&self) -> bool {
        self.phone_number.is_some()
    }
}
