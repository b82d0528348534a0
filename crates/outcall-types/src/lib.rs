//! Shared types for the Outcall worker.
//!
//! This crate provides the domain types used across the workspace: dial
//! metadata parsed from job payloads, job-local call state, the SIP failure
//! classification, and the worker's job dispatch payloads.
//!
//! No crate in the workspace depends on anything *except* `outcall-types`
//! for cross-cutting type definitions. This keeps the dependency graph
//! clean and prevents circular dependencies.

use serde::{Deserialize, Serialize};

pub mod call;
pub mod dial;

pub use call::{CallOutcome, CallState, WebhookStatus};
pub use dial::{DialInfo, MetadataError};

/// A job submitted to the worker's dispatch surface.
///
/// `metadata` is the opaque JSON payload carrying the dial information; it
/// is parsed exactly once, inside the job, as [`DialInfo`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    /// Room to run the session in. Generated by the worker when absent.
    #[serde(default)]
    pub room_name: Option<String>,
    /// Job metadata (JSON text), e.g. `{"phone_number": "+15551234567"}`.
    pub metadata: String,
}

/// Dispatch acknowledgement returned for an accepted job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobAccepted {
    /// Worker-assigned job identifier.
    pub job_id: String,
    /// The room the job will run in.
    pub room_name: String,
}
