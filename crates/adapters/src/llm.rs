use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::{self, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};

use ghostwriter_core::config::{Config, LlmConfig};
use ghostwriter_core::{LanguageModel, LanguageModelError};

use crate::endpoint::{join_endpoint, resolve_base_url};
use crate::error::AdapterError;
use crate::retry::{call_with_retry, RetryConfig};

const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant and an accomplished writer of fiction.";

pub fn create_llm_adapter(
    config: &Config,
    profile_name: &str,
) -> Result<Box<dyn LanguageModel>, AdapterError> {
    let profile = config.get_llm_profile(profile_name).ok_or_else(|| {
        AdapterError::InvalidConfig(format!("unknown LLM profile `{profile_name}`"))
    })?;
    create_llm_adapter_from_profile(profile)
}

pub fn create_llm_adapter_from_profile(
    profile: &LlmConfig,
) -> Result<Box<dyn LanguageModel>, AdapterError> {
    let fmt = profile.interface_format.trim().to_lowercase();
    let settings = ChatSettings::from_profile(profile);

    let adapter: Box<dyn LanguageModel> = match fmt.as_str() {
        "" | "openai" => Box::new(OpenAiLikeAdapter::new(
            resolve_base_url(&profile.base_url, "https://api.openai.com/v1"),
            settings,
            DEFAULT_SYSTEM_PROMPT,
        )?),
        "deepseek" => Box::new(OpenAiLikeAdapter::new(
            resolve_base_url(&profile.base_url, "https://api.deepseek.com/v1"),
            settings,
            DEFAULT_SYSTEM_PROMPT,
        )?),
        "ollama" => Box::new(OpenAiLikeAdapter::new(
            resolve_base_url(&profile.base_url, "http://localhost:11434/v1"),
            settings,
            DEFAULT_SYSTEM_PROMPT,
        )?),
        "grok" => Box::new(OpenAiLikeAdapter::new(
            resolve_base_url(&profile.base_url, "https://api.x.ai/v1"),
            settings,
            "You are Grok, created by xAI. You write fiction with care.",
        )?),
        "azure openai" => Box::new(AzureOpenAiAdapter::new(&profile.base_url, settings)?),
        other => {
            return Err(AdapterError::InvalidConfig(format!(
                "unknown interface_format: {other}"
            )))
        }
    };
    Ok(adapter)
}

/// Per-call settings shared by every chat backend.
#[derive(Clone, Debug)]
struct ChatSettings {
    api_key: String,
    model_name: String,
    max_tokens: Option<u32>,
    temperature: f32,
    timeout: Duration,
    retry: RetryConfig,
}

impl ChatSettings {
    fn from_profile(profile: &LlmConfig) -> Self {
        Self {
            api_key: profile.resolved_api_key(),
            model_name: profile.model_name.trim().to_string(),
            max_tokens: (profile.max_tokens > 0).then_some(profile.max_tokens),
            temperature: profile.temperature,
            timeout: Duration::from_secs(profile.timeout.max(1)),
            retry: RetryConfig::new(profile.max_retries, Duration::from_secs(2)),
        }
    }

    fn client(&self) -> Result<Client, AdapterError> {
        Ok(Client::builder().timeout(self.timeout).build()?)
    }
}

struct OpenAiLikeAdapter {
    client: Client,
    url: String,
    settings: ChatSettings,
    system_prompt: String,
}

impl OpenAiLikeAdapter {
    fn new(
        base_url: String,
        settings: ChatSettings,
        system_prompt: &str,
    ) -> Result<Self, AdapterError> {
        if base_url.is_empty() {
            return Err(AdapterError::InvalidConfig(
                "base_url must not be empty".to_string(),
            ));
        }
        if settings.model_name.is_empty() {
            return Err(AdapterError::InvalidConfig(
                "model_name must not be empty".to_string(),
            ));
        }

        Ok(Self {
            client: settings.client()?,
            url: join_endpoint(&base_url, "chat/completions"),
            settings,
            system_prompt: system_prompt.to_string(),
        })
    }

    fn invoke_once(&self, prompt: &str) -> Result<String, AdapterError> {
        let body = ChatCompletionRequest {
            model: Some(self.settings.model_name.as_str()),
            messages: vec![
                ChatMessageRequest {
                    role: "system",
                    content: &self.system_prompt,
                },
                ChatMessageRequest {
                    role: "user",
                    content: prompt,
                },
            ],
            max_tokens: self.settings.max_tokens,
            temperature: Some(self.settings.temperature),
        };

        let mut request = self.client.post(&self.url).header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        if !self.settings.api_key.is_empty() {
            request = request.bearer_auth(&self.settings.api_key);
        }

        let response = request.json(&body).send()?;
        handle_chat_response(response)
    }
}

impl LanguageModel for OpenAiLikeAdapter {
    fn invoke(&self, prompt: &str) -> Result<String, LanguageModelError> {
        call_with_retry("chat", &self.settings.retry, || self.invoke_once(prompt))
            .map_err(LanguageModelError::new)
    }
}

static AZURE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^https://([^/]+)/openai/deployments/([^/]+)/chat/completions\?api-version=([^/?&]+)",
    )
    .expect("valid azure endpoint regex")
});

/// Validates an Azure OpenAI chat completions URL and returns it rebuilt
/// from its resource, deployment and API version.
fn parse_azure_url(base_url: &str) -> Result<String, AdapterError> {
    let captures = AZURE_RE.captures(base_url.trim()).ok_or_else(|| {
        AdapterError::InvalidConfig(
            "Invalid Azure OpenAI base_url format. Expected https://<resource>.openai.azure.com/openai/deployments/<deployment>/chat/completions?api-version=<version>"
                .to_string(),
        )
    })?;

    Ok(format!(
        "https://{}/openai/deployments/{}/chat/completions?api-version={}",
        &captures[1], &captures[2], &captures[3]
    ))
}

struct AzureOpenAiAdapter {
    client: Client,
    url: String,
    headers: HeaderMap,
    settings: ChatSettings,
}

impl AzureOpenAiAdapter {
    fn new(base_url: &str, settings: ChatSettings) -> Result<Self, AdapterError> {
        if settings.api_key.is_empty() {
            return Err(AdapterError::InvalidConfig(
                "Azure OpenAI api_key must not be empty".to_string(),
            ));
        }

        let url = parse_azure_url(base_url)?;
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(
            "api-key",
            HeaderValue::from_str(&settings.api_key).map_err(|err| {
                AdapterError::InvalidConfig(format!("invalid api key header: {err}"))
            })?,
        );

        Ok(Self {
            client: settings.client()?,
            url,
            headers,
            settings,
        })
    }

    fn invoke_once(&self, prompt: &str) -> Result<String, AdapterError> {
        let body = ChatCompletionRequest {
            model: None,
            messages: vec![ChatMessageRequest {
                role: "user",
                content: prompt,
            }],
            max_tokens: self.settings.max_tokens,
            temperature: Some(self.settings.temperature),
        };

        let response = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .json(&body)
            .send()?;
        handle_chat_response(response)
    }
}

impl LanguageModel for AzureOpenAiAdapter {
    fn invoke(&self, prompt: &str) -> Result<String, LanguageModelError> {
        call_with_retry("azure chat", &self.settings.retry, || {
            self.invoke_once(prompt)
        })
        .map_err(LanguageModelError::new)
    }
}

fn handle_chat_response(response: reqwest::blocking::Response) -> Result<String, AdapterError> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().unwrap_or_default();
        return Err(AdapterError::HttpStatus { status, body });
    }

    let parsed: ChatCompletionResponse = response.json()?;
    extract_choice_content(parsed).ok_or(AdapterError::EmptyResponse)
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: Vec<ChatMessageRequest<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct ChatMessageRequest<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    #[serde(default)]
    message: Option<ChatMessage>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

fn extract_choice_content(response: ChatCompletionResponse) -> Option<String> {
    response.choices.into_iter().find_map(|choice| {
        choice
            .message
            .and_then(|message| message.content)
            .or(choice.text)
            .filter(|content| !content.trim().is_empty())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(interface: &str) -> LlmConfig {
        LlmConfig {
            api_key: "sk-test".into(),
            interface_format: interface.into(),
            model_name: "gpt-4o".into(),
            ..LlmConfig::default()
        }
    }

    #[test]
    fn unknown_interface_is_rejected() {
        let err = create_llm_adapter_from_profile(&profile("carrier pigeon"))
            .err()
            .expect("adapter should not be created");
        assert!(err.to_string().contains("carrier pigeon"));
    }

    #[test]
    fn missing_profile_is_reported() {
        let err = create_llm_adapter(&Config::default(), "nope")
            .err()
            .expect("adapter should not be created");
        assert!(matches!(err, AdapterError::InvalidConfig(_)));
    }

    #[test]
    fn model_name_is_required() {
        let mut config = profile("openai");
        config.model_name = "  ".into();
        assert!(create_llm_adapter_from_profile(&config).is_err());
        assert!(create_llm_adapter_from_profile(&profile("OpenAI")).is_ok());
    }

    #[test]
    fn azure_url_must_name_deployment_and_version() {
        assert!(parse_azure_url("https://example.com/chat").is_err());
        let url = parse_azure_url(
            "https://res.openai.azure.com/openai/deployments/writer/chat/completions?api-version=2024-06-01",
        )
        .unwrap();
        assert!(url.ends_with("/deployments/writer/chat/completions?api-version=2024-06-01"));
    }

    #[test]
    fn extracts_first_non_empty_choice() {
        let response: ChatCompletionResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"content":"  "}},{"message":{"content":"Once upon a time"}}]}"#,
        )
        .unwrap();
        assert_eq!(
            extract_choice_content(response).as_deref(),
            Some("Once upon a time")
        );

        let empty: ChatCompletionResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert_eq!(extract_choice_content(empty), None);
    }

    #[test]
    fn request_omits_unset_fields() {
        let body = ChatCompletionRequest {
            model: None,
            messages: vec![ChatMessageRequest {
                role: "user",
                content: "hi",
            }],
            max_tokens: None,
            temperature: Some(0.5),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("model").is_none());
        assert!(json.get("max_tokens").is_none());
        assert_eq!(json["messages"][0]["content"], "hi");
    }
}
