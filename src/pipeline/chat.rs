use tracing::debug;

use super::generation::{GenerationError, ReportGenerator};
use super::AssistError;
use crate::core_state::AssistCore;
use crate::models::{AnalysisResult, ChatTurn};

/// One conversation about one analyzed case.
///
/// Owned by the caller, never shared. History only grows on success, so a
/// failed turn leaves the session exactly as it was.
#[derive(Debug, Clone, Default)]
pub struct ChatSession {
    case_context: String,
    history: Vec<ChatTurn>,
}

impl ChatSession {
    pub fn new(case_context: impl Into<String>) -> Self {
        Self {
            case_context: case_context.into(),
            history: Vec::new(),
        }
    }

    /// Session grounded in an analysis, with the report excerpt bounded by
    /// the core's `case_report_chars`.
    pub fn for_analysis(core: &AssistCore, result: &AnalysisResult) -> Self {
        Self::new(core.case_context(result))
    }

    pub fn case_context(&self) -> &str {
        &self.case_context
    }

    pub fn set_case_context(&mut self, case_context: impl Into<String>) {
        self.case_context = case_context.into();
    }

    pub fn history(&self) -> &[ChatTurn] {
        &self.history
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    /// Ask through the shared core.
    pub async fn ask(&mut self, core: &AssistCore, message: &str) -> Result<String, AssistError> {
        let answer = core.chat(&self.history, message, &self.case_context).await?;
        self.record(message, &answer);
        Ok(answer)
    }

    /// Ask a generator directly. Blocks for the duration of the call.
    pub fn ask_with(
        &mut self,
        generator: &ReportGenerator,
        message: &str,
    ) -> Result<String, GenerationError> {
        let answer = generator.answer(&self.history, message, &self.case_context)?;
        self.record(message, &answer);
        Ok(answer)
    }

    fn record(&mut self, message: &str, answer: &str) {
        self.history.push(ChatTurn::user(message.trim()));
        self.history.push(ChatTurn::assistant(answer));
        debug!(turns = self.history.len(), "Chat turn recorded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::AssistConfig;
    use crate::models::{ChatRole, Finding};
    use crate::pipeline::generation::{GeneratorSettings, LlmGenerate, MockLlm};
    use crate::pipeline::retrieval::embedder::{EmbeddingModel, MockEmbedder};
    use crate::pipeline::vision::{MockPathologyModel, PathologyModel};
    use crate::registry::{ModelKind, ModelRegistry, ModelSlot};

    fn test_core(llm: Arc<dyn LlmGenerate>) -> AssistCore {
        let registry = ModelRegistry::new(
            ModelSlot::preloaded(
                ModelKind::Classifier,
                Arc::new(MockPathologyModel::new(&[])) as Arc<dyn PathologyModel>,
            ),
            ModelSlot::preloaded(
                ModelKind::Embedder,
                Arc::new(MockEmbedder::new()) as Arc<dyn EmbeddingModel>,
            ),
            ModelSlot::preloaded(ModelKind::Generator, llm),
        );
        AssistCore::with_registry(AssistConfig::default(), registry)
    }

    #[tokio::test]
    async fn successful_turn_appends_user_and_assistant() {
        let core = test_core(Arc::new(MockLlm::fixed("It is moderate.")));
        let mut session = ChatSession::new("Detected findings: Edema (72%)");

        let answer = session.ask(&core, "How severe is it?").await.unwrap();
        assert_eq!(answer, "It is moderate.");
        assert_eq!(session.history().len(), 2);
        assert_eq!(session.history()[0].role, ChatRole::User);
        assert_eq!(session.history()[0].content, "How severe is it?");
        assert_eq!(session.history()[1].role, ChatRole::Assistant);
    }

    #[tokio::test]
    async fn failed_turn_leaves_history_unchanged() {
        let core = test_core(Arc::new(MockLlm::failing("model crashed")));
        let mut session = ChatSession::new("ctx");
        session.history.push(ChatTurn::user("earlier"));
        session.history.push(ChatTurn::assistant("reply"));

        let err = session.ask(&core, "Another?").await.unwrap_err();
        assert!(matches!(err, AssistError::GenerationFailed(_)));
        assert_eq!(session.history().len(), 2);
    }

    #[test]
    fn session_from_analysis_carries_case_context() {
        let result = AnalysisResult {
            findings: vec![Finding::new("Cardiomegaly", 0.85)],
            similar_cases: vec![],
            generated_report: "IMPRESSION: Cardiomegaly.".into(),
            processing_time_seconds: 0.4,
        };
        let core = test_core(Arc::new(MockLlm::fixed("ok")));
        let session = ChatSession::for_analysis(&core, &result);
        assert!(session.case_context().contains("Cardiomegaly (85%)"));
        assert!(session.case_context().contains("IMPRESSION: Cardiomegaly."));
        assert!(session.history().is_empty());
    }

    #[test]
    fn session_excerpt_follows_configured_length() {
        let result = AnalysisResult {
            findings: vec![],
            similar_cases: vec![],
            generated_report: "abcdefghij".repeat(10),
            processing_time_seconds: 0.2,
        };
        let mut core = test_core(Arc::new(MockLlm::fixed("ok")));
        assert!(ChatSession::for_analysis(&core, &result)
            .case_context()
            .ends_with(&"abcdefghij".repeat(10)));

        core = AssistCore::with_registry(
            AssistConfig {
                case_report_chars: 15,
                ..AssistConfig::default()
            },
            ModelRegistry::from_config(&AssistConfig::default()),
        );
        let session = ChatSession::for_analysis(&core, &result);
        assert!(session.case_context().ends_with("Report excerpt: abcdefghijabcde"));
    }

    #[test]
    fn ask_with_generator_grows_history() {
        let llm = Arc::new(MockLlm::fixed("Follow up in 6 weeks."));
        let generator = ReportGenerator::new(llm.clone(), GeneratorSettings::default());
        let mut session = ChatSession::new("ctx");

        session.ask_with(&generator, "Next steps?").unwrap();
        session.ask_with(&generator, "Anything else?").unwrap();
        assert_eq!(session.history().len(), 4);

        let (_, prompt) = llm.last_prompt().unwrap();
        assert!(prompt.contains("User: Next steps?"));
        assert!(prompt.contains("Assistant: Follow up in 6 weeks."));
    }

    #[test]
    fn clear_resets_history_but_keeps_context() {
        let mut session = ChatSession::new("ctx");
        session.history.push(ChatTurn::user("q"));
        session.clear();
        assert!(session.history().is_empty());
        assert_eq!(session.case_context(), "ctx");
    }
}
