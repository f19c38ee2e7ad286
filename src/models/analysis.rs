use serde::{Deserialize, Serialize};

use super::case::SimilarCase;
use super::finding::{render_findings, Finding};

/// Complete, immutable outcome of analyzing one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub findings: Vec<Finding>,
    pub similar_cases: Vec<SimilarCase>,
    pub generated_report: String,
    pub processing_time_seconds: f64,
}

impl AnalysisResult {
    /// Case context for follow-up chat, keeping the first `report_chars`
    /// characters of the report. Derived on every call.
    pub fn case_context(&self, report_chars: usize) -> String {
        build_case_context(&self.findings, &self.generated_report, report_chars)
    }
}

/// Bounded grounding string for chat: rendered findings plus a report excerpt.
pub fn build_case_context(findings: &[Finding], report: &str, report_chars: usize) -> String {
    let rendered = if findings.is_empty() {
        "none above threshold".to_string()
    } else {
        render_findings(findings)
    };
    let excerpt: String = report.trim().chars().take(report_chars).collect();
    format!("Detected findings: {rendered}\nReport excerpt: {excerpt}")
}
