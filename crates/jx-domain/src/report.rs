//! Sink for user-facing install diagnostics.

use std::sync::Mutex;

/// Stable codes attached to install diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportCode {
    UnsupportedFeature,
    BuildDisabled,
}

impl ReportCode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnsupportedFeature => "unsupported-feature",
            Self::BuildDisabled => "build-disabled",
        }
    }
}

pub trait Report: Send + Sync {
    fn report_warning(&self, code: ReportCode, message: &str);
    fn report_info(&self, code: ReportCode, message: &str);
}

/// Forwards diagnostics to the active tracing subscriber.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingReport;

impl Report for TracingReport {
    fn report_warning(&self, code: ReportCode, message: &str) {
        tracing::warn!(code = code.as_str(), "{message}");
    }

    fn report_info(&self, code: ReportCode, message: &str) {
        tracing::info!(code = code.as_str(), "{message}");
    }
}

/// Collects diagnostics for later inspection, for batch hosts and tests.
#[derive(Debug, Default)]
pub struct BufferedReport {
    warnings: Mutex<Vec<(ReportCode, String)>>,
    infos: Mutex<Vec<(ReportCode, String)>>,
}

impl BufferedReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warnings(&self) -> Vec<(ReportCode, String)> {
        self.warnings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn infos(&self) -> Vec<(ReportCode, String)> {
        self.infos
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl Report for BufferedReport {
    fn report_warning(&self, code: ReportCode, message: &str) {
        self.warnings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((code, message.to_string()));
    }

    fn report_info(&self, code: ReportCode, message: &str) {
        self.infos
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((code, message.to_string()));
    }
}
