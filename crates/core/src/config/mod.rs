use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    8192
}

fn default_timeout() -> u64 {
    600
}

fn default_max_retries() -> usize {
    1
}

fn default_image_model() -> String {
    "gpt-image-1".to_string()
}

fn default_output_dir() -> String {
    "output".to_string()
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LlmConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub interface_format: String,
    #[serde(default)]
    pub model_name: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Transport attempts per call. One means a single attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: String::new(),
            interface_format: String::new(),
            model_name: String::new(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout: default_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

impl LlmConfig {
    pub fn resolved_api_key(&self) -> String {
        resolve_api_key(&self.api_key)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ImageConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub interface_format: String,
    #[serde(default = "default_image_model")]
    pub model_name: String,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: String::new(),
            interface_format: "openai".to_string(),
            model_name: default_image_model(),
            timeout: default_timeout(),
        }
    }
}

impl ImageConfig {
    pub fn resolved_api_key(&self) -> String {
        resolve_api_key(&self.api_key)
    }
}

fn resolve_api_key(configured: &str) -> String {
    if configured.trim().is_empty() {
        env::var(API_KEY_ENV).unwrap_or_default()
    } else {
        configured.trim().to_string()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BookConfig {
    #[serde(default)]
    pub idea: String,
    #[serde(default)]
    pub idea_file: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub title: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    /// Skips every image generation call, for cheap test runs.
    #[serde(default)]
    pub disable_illustration: bool,
}

impl Default for BookConfig {
    fn default() -> Self {
        Self {
            idea: String::new(),
            idea_file: String::new(),
            author: String::new(),
            title: String::new(),
            output_dir: default_output_dir(),
            disable_illustration: false,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PromptConfig {
    #[serde(default)]
    pub custom_directories: Vec<PathBuf>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct RecentUsage {
    #[serde(default)]
    pub last_llm_interface: Option<String>,
    #[serde(default)]
    pub last_image_interface: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub llm_profiles: BTreeMap<String, LlmConfig>,
    #[serde(default)]
    pub image_profiles: BTreeMap<String, ImageConfig>,
    #[serde(default)]
    pub book: BookConfig,
    #[serde(default)]
    pub prompts: PromptConfig,
    #[serde(default)]
    pub recent: RecentUsage,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_llm_profile(&self, name: &str) -> Option<&LlmConfig> {
        self.llm_profiles.get(name)
    }

    pub fn upsert_llm_profile<S: Into<String>>(&mut self, name: S, profile: LlmConfig) {
        self.llm_profiles.insert(name.into(), profile);
    }

    pub fn get_image_profile(&self, name: &str) -> Option<&ImageConfig> {
        self.image_profiles.get(name)
    }

    pub fn upsert_image_profile<S: Into<String>>(&mut self, name: S, profile: ImageConfig) {
        self.image_profiles.insert(name.into(), profile);
    }

    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(input)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    pub fn to_path(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let serialized = serde_json::to_string_pretty(self)?;
        fs::write(path, serialized)?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    config: Config,
}

impl ConfigStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let config = if path.exists() {
            Config::from_path(&path)?
        } else {
            Config::default()
        };

        Ok(Self { path, config })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.config.to_path(&self.path)
    }

    pub fn touch_llm_interface<S: Into<String>>(&mut self, name: S) {
        self.config.recent.last_llm_interface = Some(name.into());
    }

    pub fn touch_image_interface<S: Into<String>>(&mut self, name: S) {
        self.config.recent.last_image_interface = Some(name.into());
    }

    pub fn last_llm_interface(&self) -> Option<&str> {
        self.config
            .recent
            .last_llm_interface
            .as_deref()
            .filter(|name| self.config.llm_profiles.contains_key(*name))
    }

    pub fn last_image_interface(&self) -> Option<&str> {
        self.config
            .recent
            .last_image_interface
            .as_deref()
            .filter(|name| self.config.image_profiles.contains_key(*name))
    }

    /// Points the recent selections at existing profiles when they are stale.
    pub fn ensure_recent_defaults(&mut self) {
        if self.last_llm_interface().is_none() {
            self.config.recent.last_llm_interface = self.config.llm_profiles.keys().next().cloned();
        }
        if self.last_image_interface().is_none() {
            self.config.recent.last_image_interface =
                self.config.image_profiles.keys().next().cloned();
        }
    }
}
