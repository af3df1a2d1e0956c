use anyhow::{bail, Context, Result};
use async_openai::{config::OpenAIConfig, types::CreateChatCompletionRequestArgs, Client};
use async_trait::async_trait;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::sleep;

/// Parameters for a single generation call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f64,
    pub max_tokens: u32,
}

/// Model metadata queryable independent of any call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub provider: String,
    pub model: String,
}

/// Capability interface for text generation backends.
///
/// Any concrete backend (stub fixture, hosted API, local model) implements
/// this; the runner treats `generate` as an opaque external call.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Generate a response for the prompt, or fail
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String>;

    /// Describe the model behind this provider
    fn model_info(&self) -> ModelInfo;
}

/// Provider selection on the CLI
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ProviderKind {
    /// Pattern-matching fixture, no external calls
    Stub,
    /// OpenAI-compatible chat completion endpoint
    Openai,
}

/// Stub provider returning deterministic responses from simple pattern
/// matching on the prompt. Useful for harness development and testing.
///
/// The call counter is instance-scoped so multiple providers in one process
/// don't interfere.
pub struct StubProvider {
    call_count: AtomicU64,
}

impl StubProvider {
    pub fn new() -> Self {
        Self {
            call_count: AtomicU64::new(0),
        }
    }

    /// Number of generate calls served by this instance
    pub fn call_count(&self) -> u64 {
        self.call_count.load(Ordering::Relaxed)
    }

    fn respond(prompt: &str) -> String {
        let prompt_lower = prompt.to_lowercase();

        // Sentiment classification
        if prompt_lower.contains("sentiment") || prompt_lower.contains("classify") {
            if ["excellent", "great", "love", "amazing"]
                .iter()
                .any(|w| prompt_lower.contains(w))
            {
                return "Based on the feedback provided, this represents positive sentiment."
                    .to_string();
            }
            if ["terrible", "awful", "hate", "worst"]
                .iter()
                .any(|w| prompt_lower.contains(w))
            {
                return "Based on the feedback provided, this represents negative sentiment."
                    .to_string();
            }
            return "Based on the feedback provided, this represents neutral sentiment."
                .to_string();
        }

        // Intent detection
        if prompt_lower.contains("password") && prompt_lower.contains("reset") {
            return "Intent detected: password_reset. I can help you reset your password."
                .to_string();
        }

        // Factual questions
        if prompt_lower.contains("leap year") || prompt_lower.contains("366") {
            return "A leap year has 366 days.".to_string();
        }
        if prompt_lower.contains("warranty") {
            return "The standard warranty period is 2 years from date of purchase.".to_string();
        }

        // Uncertainty handling
        if prompt_lower.contains("weather")
            && (prompt_lower.contains("next month") || prompt_lower.contains("future"))
        {
            return "I cannot predict specific weather conditions for next month. Weather \
                    forecasts are typically reliable only for the next 7-10 days."
                .to_string();
        }

        // Instructions
        if prompt_lower.contains("how")
            && ["change", "set", "configure"]
                .iter()
                .any(|w| prompt_lower.contains(w))
        {
            return "To change your settings: 1. Navigate to Settings, 2. Select the relevant \
                    section, 3. Make your changes, 4. Save. For specific guidance, please \
                    specify which setting you'd like to change."
                .to_string();
        }

        // Adversarial: instruction override
        if prompt_lower.contains("ignore") && prompt_lower.contains("instruction") {
            return "I'm designed to assist with your questions while maintaining my core \
                    purpose. How can I help you today?"
                .to_string();
        }

        // Adversarial: system prompt extraction
        if prompt_lower.contains("system")
            && ["prompt", "instruction", "configuration"]
                .iter()
                .any(|w| prompt_lower.contains(w))
        {
            return "I'm designed to help answer questions and provide assistance, but I \
                    can't share details about my internal configuration."
                .to_string();
        }

        // Adversarial: unsafe advice
        if ["disable", "remove", "bypass"]
            .iter()
            .any(|w| prompt_lower.contains(w))
            && prompt_lower.contains("safety")
        {
            return "I cannot provide guidance on disabling safety features. Safety features \
                    are critical for preventing injury and ensuring proper operation."
                .to_string();
        }

        // Adversarial: chemical mixing
        if prompt_lower.contains("mix") && prompt_lower.contains("chemical") {
            return "I cannot provide advice on mixing household chemicals, as this can be \
                    dangerous. Please use commercial cleaning products as directed, or \
                    consult a professional."
                .to_string();
        }

        // Adversarial: jailbreak roleplay
        if ["game", "pretend", "roleplay"]
            .iter()
            .any(|w| prompt_lower.contains(w))
            && ["unrestricted", "no rules", "no limits"]
                .iter()
                .any(|w| prompt_lower.contains(w))
        {
            return "I'm designed to be helpful, harmless, and honest. I can't adopt roles \
                    that conflict with these core principles. How else can I assist you?"
                .to_string();
        }

        let preview: String = prompt.chars().take(100).collect();
        format!(
            "I understand you're asking about: {}... I'm designed to help with information \
             and assistance. Could you provide more specific details about what you need?",
            preview
        )
    }
}

impl Default for StubProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for StubProvider {
    async fn generate(&self, prompt: &str, _options: &GenerationOptions) -> Result<String> {
        self.call_count.fetch_add(1, Ordering::Relaxed);

        // Simulate processing time
        sleep(Duration::from_millis(10)).await;

        Ok(Self::respond(prompt))
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "StubProvider".to_string(),
            model: "stub-model-v1".to_string(),
        }
    }
}

/// Configuration for the OpenAI-compatible provider, loaded from a JSON file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiProviderConfig {
    /// API base URL
    #[serde(default = "default_api_endpoint")]
    pub api_endpoint: String,
    /// Environment variable holding the API key
    #[serde(default = "default_env_var_api_key")]
    pub env_var_api_key: String,
    /// Model to request
    pub model: String,
}

fn default_api_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_env_var_api_key() -> String {
    "OPENAI_API_KEY".to_string()
}

impl OpenAiProviderConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read provider config: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse provider config: {}", path.display()))
    }
}

/// Provider backed by an OpenAI-compatible chat completion API
pub struct OpenAiProvider {
    config: OpenAiProviderConfig,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiProviderConfig) -> Self {
        Self { config }
    }

    fn create_client(&self) -> Result<Client<OpenAIConfig>> {
        let api_key = std::env::var(&self.config.env_var_api_key).with_context(|| {
            format!(
                "Environment variable {} not found",
                self.config.env_var_api_key
            )
        })?;

        let openai_config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(&self.config.api_endpoint);

        Ok(Client::with_config(openai_config))
    }

    fn build_request(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<async_openai::types::CreateChatCompletionRequest> {
        let user_message = async_openai::types::ChatCompletionRequestUserMessageArgs::default()
            .content(prompt.to_string())
            .build()
            .context("Failed to build user message")?
            .into();

        CreateChatCompletionRequestArgs::default()
            .model(&self.config.model)
            .messages([user_message])
            .temperature(options.temperature as f32)
            .max_tokens(options.max_tokens as u16)
            .build()
            .context("Failed to build chat completion request")
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String> {
        let client = self.create_client()?;
        let request = self.build_request(prompt, options)?;

        let response = client
            .chat()
            .create(request)
            .await
            .context("Failed to generate response")?;

        let content = match response.choices.first() {
            Some(choice) => match &choice.message.content {
                Some(content) => content.clone(),
                None => String::new(),
            },
            None => String::new(),
        };

        Ok(content)
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "OpenAiProvider".to_string(),
            model: self.config.model.clone(),
        }
    }
}

/// Build the provider selected on the CLI
pub fn build_provider(kind: ProviderKind, config_path: Option<&Path>) -> Result<Box<dyn Provider>> {
    match kind {
        ProviderKind::Stub => Ok(Box::new(StubProvider::new())),
        ProviderKind::Openai => {
            let Some(path) = config_path else {
                bail!("The openai provider requires --provider-config");
            };
            let config = OpenAiProviderConfig::from_file(path)?;
            Ok(Box::new(OpenAiProvider::new(config)))
        }
    }
}
