use super::parse::parse_generator_output;
use super::prompts::{fix_issue_system, fix_issue_user};
use super::{GenerateFuture, GenerationRequest, Generator};
use crate::config::{Provider, UserConfig};
use crate::error::GeneratorError;
use crate::util::truncate;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Rate limit retry configuration
const MAX_RATE_LIMIT_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 2000;
const BACKOFF_MULTIPLIER: u64 = 2;
const MAX_RETRY_AFTER_SECS: u64 = 300;

const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    #[serde(default)]
    content: Option<String>,
}

fn check_base_url(base_url: &str) -> anyhow::Result<()> {
    match url::Url::parse(base_url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(()),
        _ => anyhow::bail!("Invalid API base URL: {}", base_url),
    }
}

/// Generator backed by an OpenAI-compatible chat-completions endpoint.
pub struct ChatGenerator {
    http: reqwest::Client,
    provider: Provider,
    model: String,
    base_url: String,
    api_key: String,
    max_tokens: u32,
}

impl ChatGenerator {
    pub fn new(provider: Provider, model: String, base_url: String, api_key: String) -> Self {
        ChatGenerator {
            http: reqwest::Client::new(),
            provider,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    /// Build from user settings; `model` overrides the configured one.
    pub fn from_user_config(
        config: &UserConfig,
        provider: Provider,
        model: Option<String>,
    ) -> anyhow::Result<Self> {
        let api_key = config.api_key(provider).ok_or_else(|| {
            anyhow::anyhow!(
                "No API key for {}. Set {} or store one in the system keychain.",
                provider.name(),
                provider.api_key_env()
            )
        })?;
        let model = model.unwrap_or_else(|| config.model_for(provider));
        let base_url = config.base_url_for(provider);
        check_base_url(&base_url)?;
        Ok(Self::new(provider, model, base_url, api_key))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, GeneratorError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: system,
                },
                Message {
                    role: "user",
                    content: user,
                },
            ],
            max_tokens: self.max_tokens,
            temperature: 0.0,
            stream: false,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
        };

        let mut retry_count = 0;
        loop {
            let mut builder = self
                .http
                .post(self.endpoint())
                .header("Content-Type", "application/json")
                .bearer_auth(&self.api_key);
            if self.provider == Provider::Openrouter {
                builder = builder.header("X-Title", "remedy");
            }

            let response = builder
                .json(&request)
                .send()
                .await
                .map_err(|e| GeneratorError::Transport(e.to_string()))?;

            let status = response.status();
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|secs| *secs > 0 && *secs < MAX_RETRY_AFTER_SECS);
            let text = response
                .text()
                .await
                .map_err(|e| GeneratorError::Transport(e.to_string()))?;

            if status.is_success() {
                let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| {
                    GeneratorError::Malformed(format!(
                        "unreadable {} response: {} ({})",
                        self.provider.name(),
                        e,
                        truncate(&text, 200)
                    ))
                })?;
                return parsed
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
                    .filter(|c| !c.trim().is_empty())
                    .ok_or_else(|| GeneratorError::Malformed("empty completion".to_string()));
            }

            if status.as_u16() == 429 && retry_count < MAX_RATE_LIMIT_RETRIES {
                retry_count += 1;
                let wait = retry_after.map(Duration::from_secs).unwrap_or_else(|| {
                    Duration::from_millis(
                        INITIAL_BACKOFF_MS * BACKOFF_MULTIPLIER.pow(retry_count - 1),
                    )
                });
                tracing::warn!(
                    provider = self.provider.name(),
                    wait_ms = wait.as_millis() as u64,
                    attempt = retry_count,
                    "rate limited; backing off"
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            return Err(GeneratorError::Rejected {
                status: status.as_u16(),
                body: truncate(&text, 200),
            });
        }
    }
}

impl Generator for ChatGenerator {
    fn name(&self) -> &str {
        self.provider.name()
    }

    fn generate<'a>(&'a self, request: &'a GenerationRequest) -> GenerateFuture<'a> {
        Box::pin(async move {
            let user = fix_issue_user(request);
            tracing::debug!(
                issue = %request.issue.key,
                attempt = request.attempt,
                model = %self.model,
                prompt_chars = user.len(),
                "requesting edit"
            );
            let content = self.complete(fix_issue_system(), &user).await?;
            parse_generator_output(&content, &request.issue.file)
        })
    }
}
