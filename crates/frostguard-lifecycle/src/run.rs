//! Run reports and outcome derivation.
//!
//! Every orchestrated run produces an immutable list of [`StepRecord`]s.
//! The run outcome is derived from that list by a fold over the critical
//! steps, so the audit trail and the outcome can never disagree.

use frostguard_db::{NewDeprovisionRunStep, StepStatus, StepTargetType};
use frostguard_ttn::classify::{classify_network, Classification};
use frostguard_ttn::client::TtnResponse;
use frostguard_ttn::error::TtnError;
use uuid::Uuid;

/// Longest response excerpt persisted on an audit record.
pub const SNIPPET_MAX_LEN: usize = 500;

/// One executed step of a run.
#[derive(Debug, Clone)]
pub struct StepRecord {
    /// Step label, e.g. `delete_device_ns` or `purge_application`.
    pub step_name: String,
    /// Kind of object acted on.
    pub target_type: StepTargetType,
    /// Identifier of the object acted on.
    pub target_id: String,
    /// Outcome.
    pub status: StepStatus,
    /// HTTP status of the remote call, when one was made.
    pub http_status: Option<i32>,
    /// Endpoint path the call went to.
    pub endpoint: Option<String>,
    /// Truncated response body, kept only for failures.
    pub response_snippet: Option<String>,
    /// Whether a failure here fails the whole run.
    pub critical: bool,
}

impl StepRecord {
    /// Build a record from a delete/purge response.
    ///
    /// 2xx maps to `Ok`, 404 to `Skipped` (already gone), anything else to
    /// `Error` with a truncated body excerpt.
    pub fn from_delete_response(
        step_name: impl Into<String>,
        target_type: StepTargetType,
        target_id: impl Into<String>,
        endpoint: impl Into<String>,
        response: &TtnResponse,
        critical: bool,
    ) -> Self {
        let status = if response.ok {
            StepStatus::Ok
        } else if response.status == 404 {
            StepStatus::Skipped
        } else {
            StepStatus::Error
        };
        let snippet = if status == StepStatus::Error {
            Some(response.snippet(SNIPPET_MAX_LEN))
        } else {
            None
        };
        Self {
            step_name: step_name.into(),
            target_type,
            target_id: target_id.into(),
            status,
            http_status: Some(i32::from(response.status)),
            endpoint: Some(endpoint.into()),
            response_snippet: snippet,
            critical,
        }
    }

    /// Build a record for a step that completed without a remote call, or
    /// whose outcome was decided locally.
    pub fn local(
        step_name: impl Into<String>,
        target_type: StepTargetType,
        target_id: impl Into<String>,
        status: StepStatus,
        critical: bool,
    ) -> Self {
        Self {
            step_name: step_name.into(),
            target_type,
            target_id: target_id.into(),
            status,
            http_status: None,
            endpoint: None,
            response_snippet: None,
            critical,
        }
    }

    /// Attach a detail message as the response snippet.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        let mut text: String = detail.into();
        if text.len() > SNIPPET_MAX_LEN {
            let mut end = SNIPPET_MAX_LEN;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            text.truncate(end);
            text.push('…');
        }
        self.response_snippet = Some(text);
        self
    }

    /// Convert to the persistence shape for a given run.
    #[must_use]
    pub fn into_new_row(self, run_id: Uuid, job_id: Option<Uuid>) -> NewDeprovisionRunStep {
        NewDeprovisionRunStep {
            run_id,
            job_id,
            step_name: self.step_name,
            target_type: self.target_type,
            target_id: self.target_id,
            status: self.status,
            http_status: self.http_status,
            endpoint: self.endpoint,
            response_snippet: self.response_snippet,
            critical: self.critical,
        }
    }
}

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every critical step succeeded or was skipped.
    Succeeded,
    /// No critical step succeeded.
    Failed,
    /// Some critical steps succeeded, some failed.
    Partial,
}

/// Derive the outcome of a run from its step list.
///
/// Only critical steps count. A run with no critical errors succeeded,
/// including the degenerate case of no critical steps at all.
#[must_use]
pub fn derive_outcome(steps: &[StepRecord]) -> RunOutcome {
    let (successes, errors) = steps
        .iter()
        .filter(|s| s.critical)
        .fold((0_usize, 0_usize), |(ok, err), step| {
            if step.status.is_success() {
                (ok + 1, err)
            } else if step.status == StepStatus::Error {
                (ok, err + 1)
            } else {
                (ok, err)
            }
        });

    match (successes, errors) {
        (_, 0) => RunOutcome::Succeeded,
        (0, _) => RunOutcome::Failed,
        _ => RunOutcome::Partial,
    }
}

/// The complete result of one orchestrated run.
#[derive(Debug)]
pub struct RunReport {
    /// Correlates all audit records of this run.
    pub run_id: Uuid,
    /// Steps in execution order.
    pub steps: Vec<StepRecord>,
    /// Classification of the first critical failure, when one occurred.
    pub failure: Option<Classification>,
}

impl RunReport {
    /// Start an empty report with a fresh run id.
    #[must_use]
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            steps: Vec::new(),
            failure: None,
        }
    }

    /// Append a step, recording the first critical failure classification.
    pub fn push(&mut self, step: StepRecord, classification: Option<Classification>) {
        if step.critical && step.status == StepStatus::Error && self.failure.is_none() {
            self.failure = classification;
        }
        self.steps.push(step);
    }

    /// Derived outcome over the recorded steps.
    #[must_use]
    pub fn outcome(&self) -> RunOutcome {
        derive_outcome(&self.steps)
    }
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}

/// Record the outcome of one remote call on a report.
///
/// An HTTP-level failure becomes a classified step; a transport failure
/// becomes a local `Error` step classified as `NETWORK_ERROR`.
pub(crate) fn record_call(
    report: &mut RunReport,
    step_name: &str,
    target_type: StepTargetType,
    target_id: &str,
    endpoint: &str,
    result: Result<TtnResponse, TtnError>,
    critical: bool,
) {
    match result {
        Ok(response) => {
            let classification = response.classification();
            report.push(
                StepRecord::from_delete_response(
                    step_name, target_type, target_id, endpoint, &response, critical,
                ),
                classification,
            );
        }
        Err(error) => {
            let classification = classify_network(error.to_string());
            report.push(
                StepRecord::local(step_name, target_type, target_id, StepStatus::Error, critical)
                    .with_detail(error.to_string()),
                Some(classification),
            );
        }
    }
}
