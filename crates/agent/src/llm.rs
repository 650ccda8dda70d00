//! Generation backends.
//!
//! Every capability talks to the model through [`LlmClient`]. Two HTTP
//! implementations are provided: Ollama's native `/api/generate` and any
//! OpenAI-compatible `/v1/chat/completions` endpoint.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context as _, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use careercoach_core::config::{LlmConfig, LlmProvider};

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Builds the configured backend.
pub fn build_llm_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>> {
    let timeout = Duration::from_secs(config.timeout_secs.max(1));
    let client: Arc<dyn LlmClient> = match config.provider {
        LlmProvider::Ollama => {
            let base_url = config
                .base_url
                .clone()
                .ok_or_else(|| anyhow!("llm.base_url is required for the ollama provider"))?;
            Arc::new(OllamaClient::new(base_url, config.model.clone(), timeout, config.max_retries)?)
        }
        LlmProvider::OpenAi => {
            let api_key = config
                .api_key
                .clone()
                .ok_or_else(|| anyhow!("llm.api_key is required for the openai provider"))?;
            let base_url =
                config.base_url.clone().unwrap_or_else(|| "https://api.openai.com".to_string());
            Arc::new(OpenAiCompatibleClient::new(
                base_url,
                api_key,
                config.model.clone(),
                timeout,
                config.max_retries,
            )?)
        }
    };
    Ok(client)
}

pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
    max_retries: u32,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

impl OllamaClient {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build ollama http client")?;
        Ok(Self { client, base_url: base_url.into(), model: model.into(), max_retries })
    }

    fn api_url(&self) -> String {
        format!("{}/api/generate", self.base_url.trim_end_matches('/'))
    }

    async fn generate_once(&self, prompt: &str) -> Result<String> {
        let url = self.api_url();
        tracing::debug!(event_name = "llm.request", provider = "ollama", url = %url);

        let body = GenerateRequest { model: &self.model, prompt, stream: false };
        let response = self.client.post(&url).json(&body).send().await?;
        let parsed: GenerateResponse = read_json(response).await?;
        Ok(parsed.response)
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        with_retries("ollama", self.max_retries, || self.generate_once(prompt)).await
    }
}

pub struct OpenAiCompatibleClient {
    client: Client,
    base_url: String,
    api_key: SecretString,
    model: String,
    max_retries: u32,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

impl OpenAiCompatibleClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: SecretString,
        model: impl Into<String>,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build openai-compatible http client")?;
        Ok(Self { client, base_url: base_url.into(), api_key, model: model.into(), max_retries })
    }

    /// Appends `/v1/{path}`, tolerating a base url that already ends in `/v1`.
    fn api_url(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let base = base.strip_suffix("/v1").unwrap_or(base);
        format!("{}/v1/{}", base, path.trim_start_matches('/'))
    }

    async fn chat_once(&self, prompt: &str) -> Result<String> {
        let url = self.api_url("chat/completions");
        tracing::debug!(event_name = "llm.request", provider = "openai", url = %url);

        let body = ChatCompletionRequest {
            model: &self.model,
            messages: vec![ChatMessage { role: "user", content: prompt }],
            temperature: 0.3,
        };
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key.expose_secret()))
            .json(&body)
            .send()
            .await?;
        let parsed: ChatCompletionResponse = read_json(response).await?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("chat completion returned no content"))
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        with_retries("openai", self.max_retries, || self.chat_once(prompt)).await
    }
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    let text = response.text().await.context("failed to read response body")?;
    if !status.is_success() {
        bail!("HTTP {status}: {}", truncate(&text, 200));
    }
    serde_json::from_str(&text)
        .with_context(|| format!("unexpected response body: {}", truncate(&text, 200)))
}

async fn with_retries<F, Fut>(provider: &'static str, max_retries: u32, mut call: F) -> Result<String>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<String>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(text) => return Ok(text),
            Err(error) if attempt < max_retries => {
                attempt += 1;
                tracing::warn!(
                    event_name = "llm.request.retry",
                    provider,
                    attempt,
                    error = %error,
                );
                tokio::time::sleep(Duration::from_millis(250 * u64::from(attempt))).await;
            }
            Err(error) => return Err(error),
        }
    }
}

pub(crate) fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

/// Best-effort extraction of a JSON value from model output: strips code
/// fences, then tries the whole text, the outermost array and the outermost
/// object in turn.
pub fn extract_json(text: &str) -> Option<serde_json::Value> {
    let cleaned = text.replace("```json", "").replace("```JSON", "").replace("```", "");
    let cleaned = cleaned.trim();

    if let Ok(value) = serde_json::from_str(cleaned) {
        return Some(value);
    }
    for (open, close) in [('[', ']'), ('{', '}')] {
        if let (Some(start), Some(end)) = (cleaned.find(open), cleaned.rfind(close)) {
            if end > start {
                if let Ok(value) = serde_json::from_str(&cleaned[start..=end]) {
                    return Some(value);
                }
            }
        }
    }
    None
}

/// [`extract_json`] followed by a typed decode.
pub fn parse_llm_json<T: DeserializeOwned>(text: &str) -> Result<T> {
    let value = extract_json(text)
        .ok_or_else(|| anyhow!("no json found in model output: {}", truncate(text, 120)))?;
    serde_json::from_value(value).context("model output did not match the expected shape")
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;

    use super::LlmClient;

    /// Replays canned replies in order; errors once the script runs out.
    #[derive(Default)]
    pub struct ScriptedLlm {
        replies: Mutex<VecDeque<Result<String, String>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        pub fn new(replies: Vec<Result<String, String>>) -> Self {
            Self { replies: Mutex::new(replies.into()), prompts: Mutex::new(Vec::new()) }
        }

        pub fn replying(reply: &str) -> Self {
            Self::new(vec![Ok(reply.to_string())])
        }

        pub fn failing() -> Self {
            Self::default()
        }

        pub fn prompts(&self) -> Vec<String> {
            self.prompts.lock().map(|prompts| prompts.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(&self, prompt: &str) -> Result<String> {
            if let Ok(mut prompts) = self.prompts.lock() {
                prompts.push(prompt.to_string());
            }
            let next = self.replies.lock().ok().and_then(|mut replies| replies.pop_front());
            match next {
                Some(Ok(reply)) => Ok(reply),
                Some(Err(error)) => Err(anyhow!(error)),
                None => Err(anyhow!("generation backend unavailable")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use secrecy::SecretString;
    use serde::Deserialize;

    use super::{extract_json, parse_llm_json, truncate, OpenAiCompatibleClient};

    #[derive(Debug, Deserialize, PartialEq)]
    struct Verdict {
        intent: String,
        confidence: f64,
    }

    #[test]
    fn extracts_json_from_fenced_and_chatty_output() {
        let fenced = "```json\n{\"intent\":\"resume\",\"confidence\":0.9}\n```";
        let chatty = "Sure! Here you go: {\"intent\":\"jobs\",\"confidence\":0.7} Hope it helps.";

        assert_eq!(
            parse_llm_json::<Verdict>(fenced).expect("fenced"),
            Verdict { intent: "resume".to_string(), confidence: 0.9 }
        );
        assert_eq!(parse_llm_json::<Verdict>(chatty).expect("chatty").intent, "jobs");
    }

    #[test]
    fn prefers_outer_array_when_present() {
        let value = extract_json("listings: [{\"title\":\"A\"},{\"title\":\"B\"}] done")
            .expect("array");
        assert_eq!(value.as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn unparsable_output_is_an_error() {
        assert!(extract_json("no structure here").is_none());
        assert!(parse_llm_json::<Verdict>("{\"intent\": 3").is_err());
    }

    #[test]
    fn api_url_does_not_double_the_version_prefix() {
        let client = OpenAiCompatibleClient::new(
            "https://llm.example.com/v1/",
            SecretString::from("sk-test".to_string()),
            "gpt-4o-mini",
            Duration::from_secs(5),
            0,
        )
        .expect("client");

        assert_eq!(
            client.api_url("chat/completions"),
            "https://llm.example.com/v1/chat/completions"
        );
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo wörld", 4), "héll");
        assert_eq!(truncate("short", 200), "short");
    }
}
