use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::PromptConfig;

const BUILT_IN_PROMPTS: &str = include_str!("../../prompts/default.toml");

/// Keys the book pipeline renders. Custom prompt directories may override any
/// of them but the built-in set always provides all of them.
pub mod keys {
    pub const IDEATION: &str = "ideation";
    pub const CHARACTER_DEVELOPMENT: &str = "character_development";
    pub const PLOT_DEVELOPMENT: &str = "plot_development";
    pub const SUBPLOT_DEVELOPMENT: &str = "subplot_development";
    pub const ARTISTIC_VISION: &str = "artistic_vision";
    pub const BOOK_DEVELOPMENT: &str = "book_development";
    pub const ACT_DEVELOPMENT: &str = "act_development";
    pub const WRITE_SCENE: &str = "write_scene";
    pub const CHAPTER_ILLUSTRATION: &str = "chapter_illustration";
    pub const COVER_ILLUSTRATION: &str = "cover_illustration";
    pub const FRONTISPIECE_ILLUSTRATION: &str = "frontispiece_illustration";

    pub const ALL: [&str; 11] = [
        IDEATION,
        CHARACTER_DEVELOPMENT,
        PLOT_DEVELOPMENT,
        SUBPLOT_DEVELOPMENT,
        ARTISTIC_VISION,
        BOOK_DEVELOPMENT,
        ACT_DEVELOPMENT,
        WRITE_SCENE,
        CHAPTER_ILLUSTRATION,
        COVER_ILLUSTRATION,
        FRONTISPIECE_ILLUSTRATION,
    ];
}

pub type PromptArguments = HashMap<String, String>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PromptSource {
    BuiltIn,
    File(PathBuf),
}

#[derive(Clone, Debug)]
pub struct PromptTemplate {
    key: String,
    description: Option<String>,
    source: PromptSource,
    segments: Vec<Segment>,
    required: BTreeSet<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Text(String),
    Slot(String),
}

impl PromptTemplate {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn source(&self) -> &PromptSource {
        &self.source
    }

    pub fn render(&self, arguments: &PromptArguments) -> Result<String, PromptError> {
        if let Some(missing) = self.required.iter().find(|name| !arguments.contains_key(*name)) {
            return Err(PromptError::MissingArgument {
                key: self.key.clone(),
                argument: missing.clone(),
            });
        }

        let rendered = self
            .segments
            .iter()
            .map(|segment| match segment {
                Segment::Text(text) => text.as_str(),
                Segment::Slot(name) => arguments.get(name).map(String::as_str).unwrap_or(""),
            })
            .collect::<String>();
        Ok(rendered.trim().to_string())
    }

    pub fn render_with<I, K, V>(&self, arguments: I) -> Result<String, PromptError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map = arguments
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect::<PromptArguments>();
        self.render(&map)
    }

    fn compile(key: String, raw: RawPrompt, source: PromptSource) -> Result<Self, PromptError> {
        let segments = split_template(&raw.template);
        let slots: BTreeSet<String> = segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::Slot(name) => Some(name.clone()),
                Segment::Text(_) => None,
            })
            .collect();

        let required = if raw.required.is_empty() {
            slots
        } else {
            let mut declared = BTreeSet::new();
            for argument in raw.required {
                let argument = argument.trim().to_string();
                if !slots.contains(&argument) {
                    return Err(PromptError::InvalidRequired { key, argument });
                }
                declared.insert(argument);
            }
            declared
        };

        Ok(Self {
            key,
            description: raw.description,
            source,
            segments,
            required,
        })
    }
}

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("prompt `{0}` not found")]
    NotFound(String),
    #[error("missing argument `{argument}` when rendering prompt `{key}`")]
    MissingArgument { key: String, argument: String },
    #[error("failed to read prompt file `{path}`: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse built-in prompt definitions: {0}")]
    ParseBuiltIn(toml::de::Error),
    #[error("failed to parse prompt file `{path}` as TOML: {source}")]
    ParseToml {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to parse prompt file `{path}` as YAML: {source}")]
    ParseYaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("prompt `{key}` declares required argument `{argument}` that never appears in its template")]
    InvalidRequired { key: String, argument: String },
}

#[derive(Debug)]
pub struct PromptRegistry {
    prompts: BTreeMap<String, PromptTemplate>,
}

impl PromptRegistry {
    /// Built-in templates only.
    pub fn new() -> Result<Self, PromptError> {
        Self::from_prompt_config(&PromptConfig::default())
    }

    pub fn from_prompt_config(config: &PromptConfig) -> Result<Self, PromptError> {
        Self::load(&config.custom_directories)
    }

    pub fn with_custom_directories<P: AsRef<Path>>(directories: &[P]) -> Result<Self, PromptError> {
        let directories: Vec<PathBuf> = directories
            .iter()
            .map(|p| p.as_ref().to_path_buf())
            .collect();
        Self::load(&directories)
    }

    fn load(directories: &[PathBuf]) -> Result<Self, PromptError> {
        Ok(Self {
            prompts: load_all(directories)?,
        })
    }

    pub fn get(&self, key: &str) -> Option<&PromptTemplate> {
        self.prompts.get(key)
    }

    pub fn format(&self, key: &str, args: &PromptArguments) -> Result<String, PromptError> {
        self.get(key)
            .ok_or_else(|| PromptError::NotFound(key.to_string()))?
            .render(args)
    }

    pub fn format_with<I, K, V>(&self, key: &str, arguments: I) -> Result<String, PromptError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.get(key)
            .ok_or_else(|| PromptError::NotFound(key.to_string()))?
            .render_with(arguments)
    }
}

fn load_all(directories: &[PathBuf]) -> Result<BTreeMap<String, PromptTemplate>, PromptError> {
    let document: PromptDocument =
        toml::from_str(BUILT_IN_PROMPTS).map_err(PromptError::ParseBuiltIn)?;
    let mut prompts = compile_document(document, &PromptSource::BuiltIn)?;

    for dir in directories {
        for path in prompt_files(dir)? {
            prompts.extend(load_file(&path)?);
        }
    }
    Ok(prompts)
}

/// Lists `.toml`, `.yaml` and `.yml` files of a directory in name order.
/// A missing directory contributes nothing.
fn prompt_files(dir: &Path) -> Result<Vec<PathBuf>, PromptError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let io_err = |source| PromptError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        let supported = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "toml" | "yaml" | "yml"))
            .unwrap_or(false);
        if supported && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn load_file(path: &Path) -> Result<BTreeMap<String, PromptTemplate>, PromptError> {
    let contents = fs::read_to_string(path).map_err(|source| PromptError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);

    let document: PromptDocument = if is_toml {
        toml::from_str(&contents).map_err(|source| PromptError::ParseToml {
            path: path.to_path_buf(),
            source,
        })?
    } else {
        serde_yaml::from_str(&contents).map_err(|source| PromptError::ParseYaml {
            path: path.to_path_buf(),
            source,
        })?
    };
    compile_document(document, &PromptSource::File(path.to_path_buf()))
}

fn compile_document(
    document: PromptDocument,
    source: &PromptSource,
) -> Result<BTreeMap<String, PromptTemplate>, PromptError> {
    document
        .prompts
        .into_iter()
        .map(|(key, raw)| {
            let template = PromptTemplate::compile(key.clone(), raw, source.clone())?;
            Ok((key, template))
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct PromptDocument {
    #[serde(default)]
    prompts: BTreeMap<String, RawPrompt>,
}

#[derive(Debug, Deserialize)]
struct RawPrompt {
    #[serde(alias = "text")]
    template: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    required: Vec<String>,
}

/// Splits a template into literal text and `{name}` slots. `{{` and `}}`
/// produce literal braces; an unterminated `{` is kept as text.
fn split_template(template: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut text = String::new();
    let mut rest = template;

    while let Some(pos) = rest.find(|c: char| c == '{' || c == '}') {
        text.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if tail.starts_with("{{") || tail.starts_with("}}") {
            text.push_str(&tail[..1]);
            rest = &tail[2..];
            continue;
        }
        if tail.starts_with('}') {
            text.push('}');
            rest = &tail[1..];
            continue;
        }

        match tail[1..].find('}') {
            Some(end) => {
                let name = tail[1..1 + end].trim();
                if name.is_empty() {
                    text.push_str("{}");
                } else {
                    if !text.is_empty() {
                        segments.push(Segment::Text(std::mem::take(&mut text)));
                    }
                    segments.push(Segment::Slot(name.to_string()));
                }
                rest = &tail[end + 2..];
            }
            None => {
                text.push_str(tail);
                rest = "";
            }
        }
    }
    text.push_str(rest);
    if !text.is_empty() {
        segments.push(Segment::Text(text));
    }
    segments
}
