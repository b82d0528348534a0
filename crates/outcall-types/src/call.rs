//! Call state and SIP failure classification.

use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Mutable per-job call state.
///
/// Created at job start and discarded at job end; mutated by the dial path
/// and the disconnect watcher. `duration` is only meaningful when
/// `started_at` was recorded before the disconnect.
#[derive(Debug, Clone, Default)]
pub struct CallState {
    /// The dial attempt failed; no session was started.
    pub failed: bool,
    /// When the far end answered.
    pub started_at: Option<Instant>,
    /// Wall-clock seconds between answer and disconnect.
    pub duration: Option<u64>,
}

impl CallState {
    /// Records the answer time and computes the call duration.
    ///
    /// Returns the duration when the answer time was known. Saturates at
    /// zero, so the recorded duration is always non-negative.
    pub fn complete(&mut self, now: Instant) -> Option<u64> {
        let duration = self
            .started_at
            .map(|t| now.saturating_duration_since(t).as_secs());
        self.duration = duration;
        duration
    }
}

/// Status reported outward (webhooks, dispatch records) for a failed dial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookStatus {
    /// The far end actively refused the call.
    Rejected,
    /// The call could not be completed.
    Failed,
}

impl WebhookStatus {
    /// Returns the canonical string label for this status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        }
    }
}

/// Semantic outcome of a failed outbound dial, classified from the SIP
/// status code the telephony provider reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    /// 486: the number is busy.
    Busy,
    /// 480 or 404: the number is not reachable or not found.
    NotReachable,
    /// 603: the call was declined.
    Declined,
    /// 408 or 487: the call timed out or was cancelled.
    TimeoutOrCancelled,
    /// Any other status.
    Failure,
}

impl CallOutcome {
    /// Classifies a SIP status code string into an outcome.
    ///
    /// Unknown and absent codes both classify as [`CallOutcome::Failure`].
    pub fn from_sip_status(code: Option<&str>) -> Self {
        match code {
            Some("486") => Self::Busy,
            Some("480") | Some("404") => Self::NotReachable,
            Some("603") => Self::Declined,
            Some("408") | Some("487") => Self::TimeoutOrCancelled,
            _ => Self::Failure,
        }
    }

    /// The status string reported outward for this outcome.
    pub fn webhook_status(self) -> WebhookStatus {
        match self {
            Self::Busy | Self::Declined => WebhookStatus::Rejected,
            Self::NotReachable | Self::TimeoutOrCancelled | Self::Failure => WebhookStatus::Failed,
        }
    }

    /// Human-readable reason used in log lines.
    pub fn reason(self) -> &'static str {
        match self {
            Self::Busy => "Number is busy",
            Self::NotReachable => "Number not reachable/not found",
            Self::Declined => "Call declined",
            Self::TimeoutOrCancelled => "Call timeout/cancelled",
            Self::Failure => "Call failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn sip_classification_matches_the_fixed_mapping() {
        let cases = [
            ("486", CallOutcome::Busy, WebhookStatus::Rejected),
            ("480", CallOutcome::NotReachable, WebhookStatus::Failed),
            ("404", CallOutcome::NotReachable, WebhookStatus::Failed),
            ("603", CallOutcome::Declined, WebhookStatus::Rejected),
            ("408", CallOutcome::TimeoutOrCancelled, WebhookStatus::Failed),
            ("487", CallOutcome::TimeoutOrCancelled, WebhookStatus::Failed),
            ("500", CallOutcome::Failure, WebhookStatus::Failed),
            ("502", CallOutcome::Failure, WebhookStatus::Failed),
        ];
        for (code, outcome, status) in cases {
            let classified = CallOutcome::from_sip_status(Some(code));
            assert_eq!(classified, outcome, "code {code}");
            assert_eq!(classified.webhook_status(), status, "code {code}");
        }
    }

    #[test]
    fn absent_code_is_a_generic_failure() {
        let outcome = CallOutcome::from_sip_status(None);
        assert_eq!(outcome, CallOutcome::Failure);
        assert_eq!(outcome.webhook_status(), WebhookStatus::Failed);
    }

    #[test]
    fn webhook_status_labels() {
        assert_eq!(WebhookStatus::Rejected.as_str(), "rejected");
        assert_eq!(WebhookStatus::Failed.as_str(), "failed");
    }

    #[test]
    fn complete_records_duration_since_answer() {
        let answered = Instant::now();
        let mut state = CallState {
            started_at: Some(answered),
            ..Default::default()
        };
        let duration = state.complete(answered + Duration::from_secs(42));
        assert_eq!(duration, Some(42));
        assert_eq!(state.duration, Some(42));
    }

    #[test]
    fn complete_without_answer_time_yields_no_duration() {
        let mut state = CallState::default();
        assert_eq!(state.complete(Instant::now()), None);
        assert!(state.duration.is_none());
    }

    #[test]
    fn disconnect_before_answer_never_goes_negative() {
        let now = Instant::now();
        let mut state = CallState {
            started_at: Some(now + Duration::from_secs(5)),
            ..Default::default()
        };
        // Disconnect observed with a timestamp earlier than the recorded
        // answer; saturating arithmetic clamps to zero.
        assert_eq!(state.complete(now), Some(0));
    }
}
