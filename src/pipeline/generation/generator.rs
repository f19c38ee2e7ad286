use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use super::prompt::{
    build_chat_prompt, build_chat_system, build_report_prompt, clean_answer, extract_report,
    REPORT_SYSTEM_PROMPT,
};
use super::{GenerationError, LlmGenerate};
use crate::config::{AssistConfig, GenerationOptions};
use crate::models::{ChatTurn, Finding, SimilarCase};

/// Prompt sizes and sampling options for the generator.
#[derive(Debug, Clone)]
pub struct GeneratorSettings {
    pub report_options: GenerationOptions,
    pub chat_options: GenerationOptions,
    pub history_window: usize,
    pub similar_case_chars: usize,
    pub case_context_max_chars: usize,
}

impl GeneratorSettings {
    pub fn from_config(config: &AssistConfig) -> Self {
        Self {
            report_options: config.report_options.clone(),
            chat_options: config.chat_options.clone(),
            history_window: config.history_window,
            similar_case_chars: config.similar_case_chars,
            case_context_max_chars: config.case_context_max_chars,
        }
    }
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self::from_config(&AssistConfig::default())
    }
}

/// Drafts reports and answers follow-up questions with one LLM.
#[derive(Clone)]
pub struct ReportGenerator {
    llm: Arc<dyn LlmGenerate>,
    settings: GeneratorSettings,
}

impl ReportGenerator {
    pub fn new(llm: Arc<dyn LlmGenerate>, settings: GeneratorSettings) -> Self {
        Self { llm, settings }
    }

    pub fn settings(&self) -> &GeneratorSettings {
        &self.settings
    }

    /// Structured FINDINGS / IMPRESSION / RECOMMENDATIONS report.
    pub fn generate_report(
        &self,
        findings: &[Finding],
        similar_cases: &[SimilarCase],
    ) -> Result<String, GenerationError> {
        let started = Instant::now();
        let prompt = build_report_prompt(findings, similar_cases, self.settings.similar_case_chars);
        let raw = self
            .llm
            .generate(REPORT_SYSTEM_PROMPT, &prompt, &self.settings.report_options)?;

        let report = extract_report(&raw);
        if report.is_empty() {
            return Err(GenerationError::EmptyOutput);
        }

        info!(
            model = %self.llm.model_name(),
            findings = findings.len(),
            cases = similar_cases.len(),
            chars = report.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Report generated"
        );
        Ok(report)
    }

    /// Answer `message` given the prior conversation and case context.
    /// Only the most recent `history_window` turns reach the model.
    pub fn answer(
        &self,
        history: &[ChatTurn],
        message: &str,
        case_context: &str,
    ) -> Result<String, GenerationError> {
        let started = Instant::now();
        let system = build_chat_system(case_context, self.settings.case_context_max_chars);
        let prompt = build_chat_prompt(history, message, self.settings.history_window);
        let raw = self
            .llm
            .generate(&system, &prompt, &self.settings.chat_options)?;

        let answer = clean_answer(&raw);
        if answer.is_empty() {
            return Err(GenerationError::EmptyOutput);
        }

        info!(
            model = %self.llm.model_name(),
            turns = history.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Chat answer generated"
        );
        Ok(answer)
    }
}
