use serde::{Deserialize, Serialize};

use super::{GenerationError, LlmGenerate};
use crate::config::GenerationOptions;

/// Ollama HTTP client for local LLM inference.
pub struct OllamaClient {
    base_url: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl OllamaClient {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, GenerationError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| GenerationError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            timeout_secs,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Non-streaming completion via `/api/generate`.
    pub fn generate(
        &self,
        model: &str,
        prompt: &str,
        system: &str,
        options: &GenerationOptions,
    ) -> Result<String, GenerationError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model,
            prompt,
            system,
            stream: false,
            options: RequestOptions::from(options),
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(GenerationError::OllamaError {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .map_err(|e| GenerationError::ResponseParsing(e.to_string()))?;

        Ok(parsed.response)
    }

    /// Names of the locally installed models, via `/api/tags`.
    pub fn list_models(&self) -> Result<Vec<String>, GenerationError> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(GenerationError::OllamaError {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TagsResponse = response
            .json()
            .map_err(|e| GenerationError::ResponseParsing(e.to_string()))?;

        Ok(parsed.models.into_iter().map(|m| m.name).collect())
    }

    pub fn is_model_available(&self, model: &str) -> Result<bool, GenerationError> {
        let models = self.list_models()?;
        Ok(models.iter().any(|m| m.starts_with(model)))
    }

    fn transport_error(&self, e: reqwest::Error) -> GenerationError {
        if e.is_connect() {
            GenerationError::OllamaConnection(self.base_url.clone())
        } else if e.is_timeout() {
            GenerationError::HttpClient(format!("Request timed out after {}s", self.timeout_secs))
        } else {
            GenerationError::HttpClient(e.to_string())
        }
    }
}

/// Request body for Ollama /api/generate
#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
    options: RequestOptions,
}

#[derive(Serialize, Debug, PartialEq)]
struct RequestOptions {
    num_predict: u32,
    temperature: f32,
    top_p: f32,
}

impl From<&GenerationOptions> for RequestOptions {
    fn from(options: &GenerationOptions) -> Self {
        Self {
            num_predict: options.max_new_tokens,
            temperature: options.temperature,
            top_p: options.top_p,
        }
    }
}

/// Response body from Ollama /api/generate
#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Response body from Ollama /api/tags
#[derive(Deserialize)]
struct TagsResponse {
    models: Vec<TagsModel>,
}

#[derive(Deserialize)]
struct TagsModel {
    name: String,
}

/// `LlmGenerate` backed by one model on a local Ollama instance.
pub struct OllamaGenerator {
    client: OllamaClient,
    model: String,
}

impl OllamaGenerator {
    pub fn new(client: OllamaClient, model: String) -> Self {
        Self { client, model }
    }

    /// Connect and confirm the model is installed.
    pub fn connect(base_url: &str, timeout_secs: u64, model: &str) -> Result<Self, GenerationError> {
        let client = OllamaClient::new(base_url, timeout_secs)?;
        if !client.is_model_available(model)? {
            return Err(GenerationError::ModelNotInstalled(model.to_string()));
        }
        tracing::info!(model = %model, url = %client.base_url(), "Ollama generator: model confirmed");
        Ok(Self::new(client, model.to_string()))
    }
}

impl LlmGenerate for OllamaGenerator {
    fn generate(
        &self,
        system: &str,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, GenerationError> {
        self.client.generate(&self.model, prompt, system, options)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
