use std::time::Duration;

use super::capture::CapturedCertificate;
use crate::diagnosis::{DiagnosticMessage, Diagnosis};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Connected { status: u16, version: String },
    Failed(Diagnosis),
    Cancelled,
}

/// Outcome of one connection probe.
///
/// `certificate` is the leaf certificate presented during this probe only.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub url: String,
    pub outcome: ProbeOutcome,
    pub certificate: Option<CapturedCertificate>,
    pub elapsed: Duration,
}

impl ProbeResult {
    pub fn message(&self) -> DiagnosticMessage {
        match &self.outcome {
            ProbeOutcome::Connected { status, .. } => {
                DiagnosticMessage::new(format!("Connection successful. Response code: {status}"))
            }
            ProbeOutcome::Failed(diagnosis) => diagnosis.message(),
            ProbeOutcome::Cancelled => DiagnosticMessage::new("Connection test cancelled."),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.outcome, ProbeOutcome::Cancelled)
    }
}
