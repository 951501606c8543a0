use clap::{Args, Parser, Subcommand};
use ghostwriter_adapters::{
    create_image_adapter, create_llm_adapter, AdapterError, MarkdownPdfRenderer,
};
use ghostwriter_core::{
    render_manuscript, BookConfig, BookError, BookRequest, BookServices, BookWriter, ConfigStore,
    FileLogSink, ImageGenerator, ImageGeneratorError, ImageSize, LanguageModelError, LogLevel,
    LogRecord, LogSink, Pipeline, PipelineError, PromptError, PromptRegistry, RenderError,
    SharedLogSink, StdoutLogSink, TeeLogSink, MANUSCRIPT_FILE_NAME, PDF_FILE_NAME,
};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

const LOG_FILE_NAME: &str = "ghostwriter.log";
const TEST_PROMPT: &str = "Please reply 'OK'";

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    let sink = StdoutLogSink::with_min_level(cli.log_level());

    match cli.command {
        Command::Write(args) => run_write(&cli.config, args, sink),
        Command::Render(args) => run_render(&cli.config, args, &sink),
        Command::Config(command) => handle_config(&cli.config, command, &sink),
    }
}

fn handle_config(
    config_path: &Path,
    command: ConfigCommand,
    sink: &dyn LogSink,
) -> Result<(), CliError> {
    match command {
        ConfigCommand::TestLlm(args) => run_test_llm(config_path, args, sink),
        ConfigCommand::TestImage(args) => run_test_image(config_path, args, sink),
    }
}

fn run_write(config_path: &Path, args: WriteArgs, console: StdoutLogSink) -> Result<(), CliError> {
    let mut store = ConfigStore::open(config_path.to_path_buf())?;
    store.ensure_recent_defaults();

    let book = merge_book_args(store.config().book.clone(), &args);
    let idea = resolve_idea(&book)?;
    let output_dir = PathBuf::from(book.output_dir.trim());
    if output_dir.as_os_str().is_empty() {
        return Err(CliError::MissingOutputDir);
    }
    fs::create_dir_all(&output_dir).map_err(|source| CliError::Io {
        path: output_dir.clone(),
        source,
    })?;

    let console: SharedLogSink = Arc::new(console);
    let file_log: SharedLogSink = Arc::new(FileLogSink::new(output_dir.join(LOG_FILE_NAME)));
    let sink = TeeLogSink::new().with(console).with(file_log);

    let selected_llm = select_llm_interface(&store, args.llm_interface.clone())?;
    let llm = create_llm_adapter(store.config(), &selected_llm)?;

    let selected_image = if book.disable_illustration {
        None
    } else {
        Some(select_image_interface(&store, args.image_interface.clone())?)
    };
    let illustrator: Box<dyn ImageGenerator> = match &selected_image {
        Some(name) => create_image_adapter(store.config(), name)?,
        None => Box::new(IllustrationDisabled),
    };

    let prompts = PromptRegistry::from_prompt_config(&store.config().prompts)?;
    let renderer = MarkdownPdfRenderer::new();

    sink.log(LogRecord::new(
        LogLevel::Info,
        format!(
            "writing `{}` by {} into {}",
            display_or(&book.title, "an untitled book"),
            display_or(&book.author, "an unnamed author"),
            output_dir.display()
        ),
    ));
    sink.log(LogRecord::new(
        LogLevel::Info,
        format!(
            "LLM interface: {selected_llm} | image interface: {}",
            selected_image.as_deref().unwrap_or("disabled")
        ),
    ));

    let writer = BookWriter::new(
        BookServices {
            author: llm.as_ref(),
            illustrator: illustrator.as_ref(),
            renderer: &renderer,
            prompts: &prompts,
            sink: &sink,
        },
        &output_dir,
        book.disable_illustration,
    )?;
    let mut pipeline = Pipeline::new(llm.as_ref(), writer, &prompts, &sink);

    let report = pipeline.run(&BookRequest {
        idea,
        author: book.author.clone(),
        title: book.title.clone(),
    })?;

    sink.log(LogRecord::new(LogLevel::Info, report.pdf.to_string()));
    sink.log(LogRecord::new(
        LogLevel::Info,
        format!(
            "`{}`: {} acts, {} chapters, {} scenes ({} words), {} illustrations",
            report.title,
            report.stats.acts,
            report.stats.chapters,
            report.stats.scenes_written,
            report.stats.words,
            report.stats.illustrations_embedded
        ),
    ));
    if report.stats.scenes_failed > 0 || report.stats.illustrations_failed > 0 {
        sink.log(LogRecord::new(
            LogLevel::Warn,
            format!(
                "{} scenes and {} illustrations could not be generated",
                report.stats.scenes_failed, report.stats.illustrations_failed
            ),
        ));
    }

    store.touch_llm_interface(selected_llm);
    if let Some(name) = selected_image {
        store.touch_image_interface(name);
    }
    store.save()?;

    Ok(())
}

fn run_render(config_path: &Path, args: RenderArgs, sink: &dyn LogSink) -> Result<(), CliError> {
    let store = ConfigStore::open(config_path.to_path_buf())?;
    let output_dir = PathBuf::from(store.config().book.output_dir.trim());

    let markdown = args
        .markdown
        .unwrap_or_else(|| output_dir.join(MANUSCRIPT_FILE_NAME));
    let pdf = args.pdf.unwrap_or_else(|| markdown.with_file_name(PDF_FILE_NAME));

    let outcome = render_manuscript(&MarkdownPdfRenderer::new(), &markdown, &pdf)?;
    sink.log(LogRecord::new(LogLevel::Info, outcome.to_string()));
    Ok(())
}

fn run_test_llm(config_path: &Path, args: TestArgs, sink: &dyn LogSink) -> Result<(), CliError> {
    let mut store = ConfigStore::open(config_path.to_path_buf())?;
    store.ensure_recent_defaults();

    let selected = select_llm_interface(&store, args.interface)?;
    let profile = store
        .config()
        .get_llm_profile(&selected)
        .cloned()
        .ok_or_else(|| CliError::UnknownInterface(selected.clone()))?;

    sink.log(LogRecord::new(
        LogLevel::Info,
        format!("testing LLM profile `{selected}`"),
    ));
    sink.log(LogRecord::new(
        LogLevel::Debug,
        format!(
            "model: {} | interface: {} | base url: {}",
            profile.model_name, profile.interface_format, profile.base_url
        ),
    ));

    let adapter = create_llm_adapter(store.config(), &selected)?;
    match adapter.invoke(TEST_PROMPT) {
        Ok(response) if response.trim().is_empty() => {
            sink.log(LogRecord::new(
                LogLevel::Error,
                "LLM test failed: empty response",
            ));
            return Err(CliError::TestFailed(
                "LLM test failed: empty response".to_string(),
            ));
        }
        Ok(response) => {
            sink.log(LogRecord::new(LogLevel::Info, "LLM test succeeded"));
            sink.log(LogRecord::new(
                LogLevel::Debug,
                format!("test reply: {response}"),
            ));
        }
        Err(err) => {
            sink.log(LogRecord::new(
                LogLevel::Error,
                format!("LLM test failed: {err}"),
            ));
            return Err(CliError::Model(err));
        }
    }

    store.touch_llm_interface(selected);
    store.save()?;
    Ok(())
}

fn run_test_image(config_path: &Path, args: TestArgs, sink: &dyn LogSink) -> Result<(), CliError> {
    let mut store = ConfigStore::open(config_path.to_path_buf())?;
    store.ensure_recent_defaults();

    let selected = select_image_interface(&store, args.interface)?;
    sink.log(LogRecord::new(
        LogLevel::Info,
        format!("testing image profile `{selected}`"),
    ));

    let adapter = create_image_adapter(store.config(), &selected)?;
    match adapter.generate("A single green apple on a white table", ImageSize::SQUARE) {
        Ok(bytes) if bytes.is_empty() => {
            return Err(CliError::TestFailed(
                "image test failed: no image data".to_string(),
            ));
        }
        Ok(bytes) => sink.log(LogRecord::new(
            LogLevel::Info,
            format!("image test succeeded ({} bytes)", bytes.len()),
        )),
        Err(err) => {
            sink.log(LogRecord::new(
                LogLevel::Error,
                format!("image test failed: {err}"),
            ));
            return Err(CliError::Image(err));
        }
    }

    store.touch_image_interface(selected);
    store.save()?;
    Ok(())
}

/// Stands in for the image backend when illustration is switched off. The
/// illustration writer never calls it in that mode.
struct IllustrationDisabled;

impl ImageGenerator for IllustrationDisabled {
    fn generate(&self, _prompt: &str, _size: ImageSize) -> Result<Vec<u8>, ImageGeneratorError> {
        Err(ImageGeneratorError::msg("illustration is disabled"))
    }
}

fn merge_book_args(mut book: BookConfig, args: &WriteArgs) -> BookConfig {
    if let Some(idea) = normalize_preference(args.idea.clone()) {
        book.idea = idea;
        book.idea_file.clear();
    } else if let Some(path) = &args.idea_file {
        book.idea.clear();
        book.idea_file = path.display().to_string();
    }
    if let Some(author) = normalize_preference(args.author.clone()) {
        book.author = author;
    }
    if let Some(title) = normalize_preference(args.title.clone()) {
        book.title = title;
    }
    if let Some(output) = &args.output {
        book.output_dir = output.display().to_string();
    }
    book.disable_illustration |= args.no_illustrations;
    book
}

/// Inline idea text wins over an idea file.
fn resolve_idea(book: &BookConfig) -> Result<String, CliError> {
    if !book.idea.trim().is_empty() {
        return Ok(book.idea.trim().to_string());
    }

    let path = book.idea_file.trim();
    if path.is_empty() {
        return Err(CliError::MissingIdea);
    }
    let path = PathBuf::from(path);
    let idea = fs::read_to_string(&path).map_err(|source| CliError::Io {
        path: path.clone(),
        source,
    })?;
    if idea.trim().is_empty() {
        return Err(CliError::EmptyIdeaFile(path));
    }
    Ok(idea.trim().to_string())
}

fn display_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.trim().is_empty() {
        fallback
    } else {
        value.trim()
    }
}

fn select_llm_interface(
    store: &ConfigStore,
    preferred: Option<String>,
) -> Result<String, CliError> {
    if let Some(name) = normalize_preference(preferred) {
        if store.config().llm_profiles.contains_key(&name) {
            return Ok(name);
        }
        return Err(CliError::UnknownInterface(name));
    }

    if let Some(name) = store.last_llm_interface() {
        return Ok(name.to_string());
    }

    store
        .config()
        .llm_profiles
        .keys()
        .next()
        .cloned()
        .ok_or(CliError::MissingLlmProfile)
}

fn select_image_interface(
    store: &ConfigStore,
    preferred: Option<String>,
) -> Result<String, CliError> {
    if let Some(name) = normalize_preference(preferred) {
        if store.config().image_profiles.contains_key(&name) {
            return Ok(name);
        }
        return Err(CliError::UnknownInterface(name));
    }

    if let Some(name) = store.last_image_interface() {
        return Ok(name.to_string());
    }

    store
        .config()
        .image_profiles
        .keys()
        .next()
        .cloned()
        .ok_or(CliError::MissingImageProfile)
}

fn normalize_preference(value: Option<String>) -> Option<String> {
    value.and_then(|raw| {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[derive(Debug, Error)]
enum CliError {
    #[error("config error: {0}")]
    Config(#[from] ghostwriter_core::ConfigError),
    #[error("no LLM profile configured")]
    MissingLlmProfile,
    #[error("no image profile configured; add one or pass --no-illustrations")]
    MissingImageProfile,
    #[error("no book idea given; use --idea, --idea-file or `book.idea` in the config")]
    MissingIdea,
    #[error("idea file `{0}` is empty")]
    EmptyIdeaFile(PathBuf),
    #[error("output directory is not configured")]
    MissingOutputDir,
    #[error("no interface profile named `{0}`")]
    UnknownInterface(String),
    #[error("failed to access `{path}`: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),
    #[error("LLM call failed: {0}")]
    Model(#[from] LanguageModelError),
    #[error("image generation failed: {0}")]
    Image(#[from] ImageGeneratorError),
    #[error("failed to load prompts: {0}")]
    Prompt(#[from] PromptError),
    #[error("failed to write book: {0}")]
    Book(#[from] BookError),
    #[error("pipeline failed: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("failed to render PDF: {0}")]
    Render(#[from] RenderError),
    #[error("{0}")]
    TestFailed(String),
}

#[derive(Parser)]
#[command(
    name = "ghostwriter",
    version,
    about = "Writes an illustrated novel from a short idea using language and image models"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, default_value = "config.json")]
    config: PathBuf,

    /// Print debug records, including full prompts
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    fn log_level(&self) -> LogLevel {
        if self.verbose {
            LogLevel::Debug
        } else {
            LogLevel::Info
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Generate a complete book and its PDF
    Write(WriteArgs),
    /// Re-render an existing manuscript to PDF
    Render(RenderArgs),
    /// Configuration checks
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Send a test prompt to an LLM profile
    TestLlm(TestArgs),
    /// Generate a test image with an image profile
    TestImage(TestArgs),
}

#[derive(Args)]
struct WriteArgs {
    /// Book idea text; overrides the configured idea
    #[arg(long, conflicts_with = "idea_file")]
    idea: Option<String>,
    /// File containing the book idea
    #[arg(long)]
    idea_file: Option<PathBuf>,
    #[arg(long)]
    author: Option<String>,
    #[arg(long)]
    title: Option<String>,
    /// Output directory for the manuscript, images and PDF
    #[arg(long)]
    output: Option<PathBuf>,
    /// Skip all image generation
    #[arg(long)]
    no_illustrations: bool,
    #[arg(long)]
    llm_interface: Option<String>,
    #[arg(long)]
    image_interface: Option<String>,
}

#[derive(Args)]
struct RenderArgs {
    /// Manuscript to render; defaults to the configured output directory
    #[arg(long)]
    markdown: Option<PathBuf>,
    /// Target PDF; defaults to book.pdf next to the manuscript
    #[arg(long)]
    pdf: Option<PathBuf>,
}

#[derive(Args)]
struct TestArgs {
    /// Profile name; defaults to the most recently used one
    #[arg(long)]
    interface: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ghostwriter_core::{Config, ImageConfig, LlmConfig};
    use tempfile::tempdir;

    fn write_args(argv: &[&str]) -> WriteArgs {
        let mut full = vec!["ghostwriter", "write"];
        full.extend_from_slice(argv);
        match Cli::parse_from(full).command {
            Command::Write(args) => args,
            _ => unreachable!("parsed a write command"),
        }
    }

    #[test]
    fn command_line_overrides_config() {
        let config = BookConfig {
            idea: "configured idea".into(),
            author: "Config Author".into(),
            ..BookConfig::default()
        };
        let book = merge_book_args(
            config,
            &write_args(&["--author", "Cli Author", "--output", "out", "--no-illustrations"]),
        );

        assert_eq!(book.author, "Cli Author");
        assert_eq!(book.idea, "configured idea");
        assert_eq!(book.output_dir, "out");
        assert!(book.disable_illustration);
    }

    #[test]
    fn idea_file_is_read_when_no_inline_idea() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idea.txt");
        fs::write(&path, "  A worm learns to speak.\n").unwrap();

        let book = merge_book_args(
            BookConfig {
                idea: "configured idea".into(),
                ..BookConfig::default()
            },
            &write_args(&["--idea-file", path.to_str().unwrap()]),
        );
        assert_eq!(resolve_idea(&book).unwrap(), "A worm learns to speak.");

        let missing = resolve_idea(&BookConfig::default()).unwrap_err();
        assert!(matches!(missing, CliError::MissingIdea));
    }

    #[test]
    fn interface_selection_prefers_explicit_then_recent() {
        let dir = tempdir().unwrap();
        let mut store = ConfigStore::open(dir.path().join("config.json")).unwrap();
        let config: &mut Config = store.config_mut();
        config.upsert_llm_profile("alpha", LlmConfig::default());
        config.upsert_llm_profile("beta", LlmConfig::default());
        config.upsert_image_profile("images", ImageConfig::default());
        store.touch_llm_interface("beta");

        assert_eq!(select_llm_interface(&store, None).unwrap(), "beta");
        assert_eq!(
            select_llm_interface(&store, Some(" alpha ".into())).unwrap(),
            "alpha"
        );
        assert!(matches!(
            select_llm_interface(&store, Some("gamma".into())),
            Err(CliError::UnknownInterface(_))
        ));
        assert_eq!(select_image_interface(&store, None).unwrap(), "images");
    }
}
