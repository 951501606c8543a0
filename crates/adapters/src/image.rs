use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use ghostwriter_core::config::{Config, ImageConfig};
use ghostwriter_core::{ImageGenerator, ImageGeneratorError, ImageSize};

use crate::endpoint::{join_endpoint, resolve_base_url};
use crate::error::AdapterError;

pub fn create_image_adapter(
    config: &Config,
    profile_name: &str,
) -> Result<Box<dyn ImageGenerator>, AdapterError> {
    let profile = config.get_image_profile(profile_name).ok_or_else(|| {
        AdapterError::InvalidConfig(format!("unknown image profile `{profile_name}`"))
    })?;
    create_image_adapter_from_profile(profile)
}

pub fn create_image_adapter_from_profile(
    profile: &ImageConfig,
) -> Result<Box<dyn ImageGenerator>, AdapterError> {
    match profile.interface_format.trim().to_lowercase().as_str() {
        "" | "openai" => Ok(Box::new(OpenAiImageAdapter::new(
            resolve_base_url(&profile.base_url, "https://api.openai.com/v1"),
            profile.resolved_api_key(),
            profile.model_name.trim().to_string(),
            profile.timeout,
        )?)),
        other => Err(AdapterError::InvalidConfig(format!(
            "unknown image interface_format: {other}"
        ))),
    }
}

/// Client for the `images/generations` endpoint of OpenAI-compatible APIs.
struct OpenAiImageAdapter {
    client: Client,
    url: String,
    api_key: String,
    model_name: String,
}

impl OpenAiImageAdapter {
    fn new(
        base_url: String,
        api_key: String,
        model_name: String,
        timeout: u64,
    ) -> Result<Self, AdapterError> {
        if model_name.is_empty() {
            return Err(AdapterError::InvalidConfig(
                "image model_name must not be empty".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout.max(1)))
            .build()?;

        Ok(Self {
            client,
            url: join_endpoint(&base_url, "images/generations"),
            api_key,
            model_name,
        })
    }

    fn generate_once(&self, prompt: &str, size: ImageSize) -> Result<Vec<u8>, AdapterError> {
        let size = size.to_string();
        let body = ImageRequest {
            model: &self.model_name,
            prompt,
            size: &size,
            n: 1,
            response_format: self
                .model_name
                .starts_with("dall-e")
                .then_some("b64_json"),
        };

        let mut request = self.client.post(&self.url).json(&body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request.send()?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(AdapterError::HttpStatus { status, body });
        }

        let parsed: ImageResponse = response.json()?;
        match first_payload(parsed)? {
            ImagePayload::Inline(bytes) => Ok(bytes),
            ImagePayload::Remote(url) => self.download(&url),
        }
    }

    fn download(&self, url: &str) -> Result<Vec<u8>, AdapterError> {
        let response = self.client.get(url).send()?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(AdapterError::HttpStatus { status, body });
        }
        Ok(response.bytes()?.to_vec())
    }
}

impl ImageGenerator for OpenAiImageAdapter {
    fn generate(&self, prompt: &str, size: ImageSize) -> Result<Vec<u8>, ImageGeneratorError> {
        self.generate_once(prompt, size)
            .map_err(ImageGeneratorError::new)
    }
}

#[derive(Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    size: &'a str,
    n: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    #[serde(default)]
    b64_json: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum ImagePayload {
    Inline(Vec<u8>),
    Remote(String),
}

fn first_payload(response: ImageResponse) -> Result<ImagePayload, AdapterError> {
    let data = response
        .data
        .into_iter()
        .next()
        .ok_or(AdapterError::EmptyResponse)?;

    if let Some(encoded) = data.b64_json.filter(|s| !s.trim().is_empty()) {
        let bytes = general_purpose::STANDARD.decode(encoded.trim())?;
        return Ok(ImagePayload::Inline(bytes));
    }
    data.url
        .filter(|url| !url.trim().is_empty())
        .map(ImagePayload::Remote)
        .ok_or(AdapterError::EmptyResponse)
}
