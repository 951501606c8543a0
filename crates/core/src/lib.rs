pub mod agent;
pub mod book;
pub mod config;
pub mod illustration;
pub mod logging;
pub mod manuscript;
pub mod markdown;
pub mod models;
pub mod pipeline;
pub mod prompts;
pub mod render;
pub mod scene;

pub use agent::{LanguageModel, LanguageModelError};
pub use book::{BookError, BookServices, BookWriter, WriteStats};
pub use config::{
    BookConfig, Config, ConfigError, ConfigStore, ImageConfig, LlmConfig, PromptConfig,
    RecentUsage, API_KEY_ENV,
};
pub use illustration::{
    IllustrationError, IllustrationOutcome, IllustrationWriter, ImageGenerator,
    ImageGeneratorError, ImageSize,
};
pub use logging::{
    FileLogSink, LogLevel, LogRecord, LogSink, NullLogSink, SharedLogSink, StdoutLogSink,
    TeeLogSink, VecLogSink,
};
pub use manuscript::{Transcriber, IMAGES_DIR_NAME, MANUSCRIPT_FILE_NAME, PDF_FILE_NAME};
pub use markdown::{MarkdownError, WriteMode};
pub use models::{
    Act, ArtisticVision, Book, Chapter, Character, Characters, Idea, Plot, Scene, SubPlot,
    SubPlots,
};
pub use pipeline::{
    BookRequest, Pipeline, PipelineError, PipelineReport, Stage, StageRunner, StructuredOutput,
};
pub use prompts::{PromptArguments, PromptError, PromptRegistry, PromptSource, PromptTemplate};
pub use render::{render_manuscript, ManuscriptRenderer, PdfOutcome, RenderError, TOC_LEVEL};
pub use scene::{SceneError, SceneOutcome, SceneWriter};
