/// Per-step outcome classification for the ingest pipeline
///
/// The degrade-vs-fail policy is explicit data instead of control flow:
/// every pipeline step reports one of these, and the final HTTP status is
/// composed from the collected outcomes.
use serde::Serialize;

/// Outcome of a single pipeline step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Step ran and succeeded
    Success,
    /// Step was not applicable this invocation (nothing to insert,
    /// collaborator not configured, or a prerequisite step degraded)
    Skipped,
    /// Step failed but the request as a whole still succeeds
    Degraded(String),
    /// Unrecoverable internal fault
    Fatal(String),
}

impl StepOutcome {
    /// Whether the step ran to completion
    pub fn is_success(&self) -> bool {
        matches!(self, StepOutcome::Success)
    }

    /// Whether the step failed in a tolerated way
    pub fn is_degraded(&self) -> bool {
        matches!(self, StepOutcome::Degraded(_))
    }
}

/// Serialized response body returned to the webhook sender
///
/// Downstream failures surface only as the `status` flag; no error detail
/// leaks into the body.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ResponseBody {
    pub message: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records_processed: Option<usize>,
}

/// Final report of one webhook invocation
#[derive(Debug, Clone, PartialEq)]
pub enum IngestReport {
    /// Pipeline ran end to end (possibly with tolerated degradation)
    Completed {
        raw_capture: StepOutcome,
        records_processed: usize,
        records_skipped: usize,
        warehouse: StepOutcome,
        trigger: StepOutcome,
    },
    /// Request body was not parseable as JSON; downstream steps skipped
    Rejected {
        raw_capture: StepOutcome,
        reason: String,
    },
    /// Unrecoverable internal fault
    Failed { reason: String },
}

impl IngestReport {
    /// HTTP status code for this report
    ///
    /// Storage and trigger failures never change the status; a warehouse
    /// failure keeps the success class (the sender must see a 2xx so the
    /// provider does not disable the endpoint).
    pub fn status_code(&self) -> u16 {
        match self {
            IngestReport::Completed { .. } => 200,
            IngestReport::Rejected { .. } => 400,
            IngestReport::Failed { .. } => 500,
        }
    }

    /// Response body for this report
    pub fn body(&self) -> ResponseBody {
        match self {
            IngestReport::Completed {
                records_processed,
                warehouse,
                ..
            } => {
                if warehouse.is_degraded() {
                    ResponseBody {
                        message: "Webhook received; downstream processing incomplete".to_string(),
                        status: "partial",
                        records_processed: Some(*records_processed),
                    }
                } else {
                    ResponseBody {
                        message: "Webhook received and processed successfully".to_string(),
                        status: "ok",
                        records_processed: Some(*records_processed),
                    }
                }
            }
            IngestReport::Rejected { .. } => ResponseBody {
                message: "Invalid JSON in request body".to_string(),
                status: "rejected",
                records_processed: None,
            },
            IngestReport::Failed { .. } => ResponseBody {
                message: "Internal error".to_string(),
                status: "error",
                records_processed: None,
            },
        }
    }
}
