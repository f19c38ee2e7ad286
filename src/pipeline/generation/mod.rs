//! Report and chat text generation on top of a local LLM.

pub mod generator;
pub mod ollama;
pub mod prompt;

pub use generator::{GeneratorSettings, ReportGenerator};
pub use ollama::{OllamaClient, OllamaGenerator};

use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;

use crate::config::GenerationOptions;

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Ollama not reachable at {0}")]
    OllamaConnection(String),

    #[error("Ollama returned error {status}: {body}")]
    OllamaError { status: u16, body: String },

    #[error("Model {0} is not installed in Ollama")]
    ModelNotInstalled(String),

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Failed to parse model response: {0}")]
    ResponseParsing(String),

    #[error("Model returned an empty response")]
    EmptyOutput,
}

/// A text generator that takes a system prompt and a user prompt.
///
/// Calls block; async callers run them on the blocking pool.
pub trait LlmGenerate: Send + Sync {
    fn generate(
        &self,
        system: &str,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, GenerationError>;

    fn model_name(&self) -> &str;
}

enum MockBehavior {
    Fixed(String),
    /// Replies with the system prompt and prompt it was given.
    Echo,
    Fail(String),
}

/// Scriptable generator for tests. Records every prompt it receives.
pub struct MockLlm {
    behavior: MockBehavior,
    delay: Duration,
    prompts: Mutex<Vec<(String, String)>>,
}

impl MockLlm {
    fn with_behavior(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            delay: Duration::ZERO,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn fixed(response: &str) -> Self {
        Self::with_behavior(MockBehavior::Fixed(response.to_string()))
    }

    pub fn echo() -> Self {
        Self::with_behavior(MockBehavior::Echo)
    }

    pub fn failing(message: &str) -> Self {
        Self::with_behavior(MockBehavior::Fail(message.to_string()))
    }

    /// Sleep this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// `(system, prompt)` of the most recent call.
    pub fn last_prompt(&self) -> Option<(String, String)> {
        self.prompts.lock().ok().and_then(|p| p.last().cloned())
    }
}

impl LlmGenerate for MockLlm {
    fn generate(
        &self,
        system: &str,
        prompt: &str,
        _options: &GenerationOptions,
    ) -> Result<String, GenerationError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push((system.to_string(), prompt.to_string()));
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        match &self.behavior {
            MockBehavior::Fixed(response) => Ok(response.clone()),
            MockBehavior::Echo => Ok(format!("{system}\n{prompt}")),
            MockBehavior::Fail(message) => Err(GenerationError::HttpClient(message.clone())),
        }
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}
