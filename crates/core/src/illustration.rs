use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::manuscript::Transcriber;
use crate::markdown::{self, MarkdownError};
use crate::models::{ArtisticVision, Book, Chapter};
use crate::prompts::{keys, PromptError, PromptRegistry};

pub const COVER_FILE_NAME: &str = "cover.png";
pub const FRONTISPIECE_FILE_NAME: &str = "frontispiece.png";

pub fn chapter_file_name(chapter_number: u32) -> String {
    format!("chapter_{chapter_number:02}.png")
}

/// `WIDTHxHEIGHT` as understood by the image generation API.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub const SQUARE: ImageSize = ImageSize::new(1024, 1024);
    pub const PORTRAIT: ImageSize = ImageSize::new(1024, 1536);

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug)]
pub struct ImageGeneratorError {
    inner: Box<dyn StdError + Send + Sync>,
}

impl ImageGeneratorError {
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            inner: Box::new(error),
        }
    }

    pub fn msg(message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self {
            inner: message.into(),
        }
    }
}

impl fmt::Display for ImageGeneratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl StdError for ImageGeneratorError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.inner.as_ref())
    }
}

/// Text-to-image boundary. Implementations return encoded PNG bytes and must
/// report every failure through the error value.
pub trait ImageGenerator: Send + Sync {
    fn generate(&self, prompt: &str, size: ImageSize) -> Result<Vec<u8>, ImageGeneratorError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IllustrationOutcome {
    /// Illustration is switched off for this run.
    Skipped,
    Embedded(PathBuf),
    /// The generator failed; nothing was embedded.
    Failed(String),
}

impl IllustrationOutcome {
    pub fn is_embedded(&self) -> bool {
        matches!(self, Self::Embedded(_))
    }
}

impl fmt::Display for IllustrationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skipped => f.write_str("Illustration disabled, nothing generated."),
            Self::Embedded(path) => write!(f, "Image generated and saved to {}.", path.display()),
            Self::Failed(reason) => write!(f, "Failed to generate image: {reason}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum IllustrationError {
    #[error("failed to save image `{path}`: {source}")]
    SaveImage { path: PathBuf, source: io::Error },
    #[error("failed to embed illustration: {0}")]
    Manuscript(#[from] MarkdownError),
    #[error("failed to render illustration prompt: {0}")]
    Prompt(#[from] PromptError),
}

/// Generates an image, stores it under the images directory and embeds it in
/// the manuscript.
pub struct IllustrationWriter<'a> {
    generator: &'a dyn ImageGenerator,
    transcriber: Transcriber,
    images_path: PathBuf,
    enabled: bool,
    sink: &'a dyn LogSink,
}

impl<'a> IllustrationWriter<'a> {
    pub fn new(
        generator: &'a dyn ImageGenerator,
        transcriber: Transcriber,
        images_path: impl Into<PathBuf>,
        sink: &'a dyn LogSink,
    ) -> Self {
        Self {
            generator,
            transcriber,
            images_path: images_path.into(),
            enabled: true,
            sink,
        }
    }

    pub fn disabled(mut self, disabled: bool) -> Self {
        self.enabled = !disabled;
        self
    }


    /// Generator failures come back as [`IllustrationOutcome::Failed`] so one
    /// missing picture never stops the book. Errors saving the image or
    /// writing the manuscript are returned.
    pub fn write_illustration(
        &self,
        prompt: &str,
        size: ImageSize,
        filename: &str,
    ) -> Result<IllustrationOutcome, IllustrationError> {
        if !self.enabled {
            return Ok(IllustrationOutcome::Skipped);
        }

        let bytes = match self.generator.generate(prompt, size) {
            Ok(bytes) if !bytes.is_empty() => bytes,
            Ok(_) => return Ok(self.failed(filename, "image generator returned no data")),
            Err(err) => return Ok(self.failed(filename, &err.to_string())),
        };

        let path = self.images_path.join(filename);
        fs::create_dir_all(&self.images_path)
            .and_then(|_| fs::write(&path, &bytes))
            .map_err(|source| IllustrationError::SaveImage {
                path: path.clone(),
                source,
            })?;

        let reference = markdown::relative_to(&path, self.transcriber.base_dir());
        self.transcriber
            .append(&markdown::image(&reference, &alt_text(filename)))?;

        let outcome = IllustrationOutcome::Embedded(path);
        self.sink.log(LogRecord::new(LogLevel::Info, outcome.to_string()));
        Ok(outcome)
    }

    fn failed(&self, filename: &str, reason: &str) -> IllustrationOutcome {
        self.sink.log(LogRecord::new(
            LogLevel::Warn,
            format!("illustration `{filename}` skipped: {reason}"),
        ));
        IllustrationOutcome::Failed(reason.to_string())
    }
}

fn alt_text(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .map(|stem| stem.to_string_lossy().replace('_', " "))
        .unwrap_or_default()
}

fn vision_brief(vision: Option<&ArtisticVision>) -> String {
    vision.map(ArtisticVision::brief).unwrap_or_default()
}

pub fn chapter_illustration_prompt(
    prompts: &PromptRegistry,
    chapter: &Chapter,
    vision: Option<&ArtisticVision>,
) -> Result<String, PromptError> {
    prompts.format_with(
        keys::CHAPTER_ILLUSTRATION,
        [
            ("chapter_title", chapter.chapter_title.clone()),
            ("chapter_description", chapter.chapter_description.clone()),
            ("artistic_vision", vision_brief(vision)),
        ],
    )
}

pub fn cover_illustration_prompt(
    prompts: &PromptRegistry,
    book: &Book,
    vision: Option<&ArtisticVision>,
) -> Result<String, PromptError> {
    prompts.format_with(
        keys::COVER_ILLUSTRATION,
        [
            ("title", book.title.clone()),
            ("author", book.author.clone()),
            ("description", book.description.clone()),
            ("artistic_vision", vision_brief(vision)),
        ],
    )
}

pub fn frontispiece_illustration_prompt(
    prompts: &PromptRegistry,
    book: &Book,
    vision: Option<&ArtisticVision>,
) -> Result<String, PromptError> {
    prompts.format_with(
        keys::FRONTISPIECE_ILLUSTRATION,
        [
            ("description", book.description.clone()),
            ("artistic_vision", vision_brief(vision)),
        ],
    )
}
