use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::agent::{LanguageModel, LanguageModelError};
use crate::book::{BookError, BookWriter, WriteStats};
use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::models::{
    to_prompt_json, Act, ArtisticVision, Book, Chapter, Character, Characters, Idea, Plot, Scene,
    SubPlot, SubPlots,
};
use crate::prompts::{keys, PromptError, PromptRegistry};
use crate::render::PdfOutcome;

pub const ACT_COUNT: u32 = 3;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Stage {
    Ideation,
    CharacterDevelopment,
    PlotDevelopment,
    SubplotDevelopment,
    ArtisticVision,
    BookDevelopment,
    Act(u32),
}

impl Stage {
    pub fn prompt_key(&self) -> &'static str {
        match self {
            Self::Ideation => keys::IDEATION,
            Self::CharacterDevelopment => keys::CHARACTER_DEVELOPMENT,
            Self::PlotDevelopment => keys::PLOT_DEVELOPMENT,
            Self::SubplotDevelopment => keys::SUBPLOT_DEVELOPMENT,
            Self::ArtisticVision => keys::ARTISTIC_VISION,
            Self::BookDevelopment => keys::BOOK_DEVELOPMENT,
            Self::Act(_) => keys::ACT_DEVELOPMENT,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ideation => f.write_str("ideation"),
            Self::CharacterDevelopment => f.write_str("character development"),
            Self::PlotDevelopment => f.write_str("plot development"),
            Self::SubplotDevelopment => f.write_str("subplot development"),
            Self::ArtisticVision => f.write_str("artistic vision"),
            Self::BookDevelopment => f.write_str("book development"),
            Self::Act(n) => write!(f, "act {n} development"),
        }
    }
}

fn act_role(number: u32) -> &'static str {
    match number {
        1 => "setup: introduce the world, the characters and the inciting incident",
        2 => "confrontation: rising action and mounting complications through the midpoint",
        _ => "resolution: the climax, the falling action and the resolution",
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to render prompt for {stage}: {source}")]
    Prompt {
        stage: Stage,
        #[source]
        source: PromptError,
    },
    #[error("language model failed during {stage}: {source}")]
    Model {
        stage: Stage,
        #[source]
        source: LanguageModelError,
    },
    #[error("{stage} returned empty content")]
    EmptyResponse { stage: Stage },
    #[error("{stage} returned output that does not match the expected structure: {source}")]
    Parse {
        stage: Stage,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Book(#[from] BookError),
}

/// A record a stage is asked to return as JSON. The skeleton is shown to the
/// model as the expected shape.
pub trait StructuredOutput: Serialize + DeserializeOwned {
    fn skeleton() -> Self;
}

fn text(label: &str) -> String {
    format!("<{label}>")
}

impl StructuredOutput for Idea {
    fn skeleton() -> Self {
        Idea {
            premise: text("premise"),
            theme: text("central theme"),
            characters: text("sketch of the main characters"),
            plot_concepts: text("key plot concepts"),
            tone_style: text("tone and style"),
            narrative_perspective: text("narrative perspective"),
            symbolism: text("symbolism"),
            linguistic_constraints: text("linguistic constraints"),
            inspirations: text("inspirations"),
            philosophical_questions: text("philosophical questions"),
        }
    }
}

impl StructuredOutput for Characters {
    fn skeleton() -> Self {
        Characters {
            characters: vec![Character {
                name: text("name"),
                role: text("role"),
                traits: text("traits"),
                backstory: text("backstory"),
                motivations: text("motivations"),
                flaws: text("flaws"),
                relationships: text("relationships"),
            }],
        }
    }
}

impl StructuredOutput for Plot {
    fn skeleton() -> Self {
        Plot {
            description: text("overall plot"),
            rising_action: text("rising action"),
            climax: text("climax"),
            falling_action: text("falling action"),
            resolution: text("resolution"),
        }
    }
}

impl StructuredOutput for SubPlots {
    fn skeleton() -> Self {
        SubPlots {
            subplots: vec![SubPlot {
                title: text("title"),
                description: text("description"),
                characters: text("characters involved"),
                connection_to_main_plot: text("connection to the main plot"),
            }],
        }
    }
}

impl StructuredOutput for ArtisticVision {
    fn skeleton() -> Self {
        ArtisticVision {
            genre: text("genre"),
            tone: text("tone"),
            style: text("visual style"),
            themes: text("themes"),
            target_audience: text("target audience"),
            visual_elements: text("recurring visual elements"),
            color_palette: text("color palette"),
            mood_board: text("mood description"),
        }
    }
}

impl StructuredOutput for Book {
    fn skeleton() -> Self {
        Book {
            title: text("title"),
            author: text("author"),
            epigraph: text("epigraph"),
            preface: text("preface"),
            authors_note: text("author's note"),
            genre: text("genre"),
            description: text("one paragraph description"),
        }
    }
}

impl StructuredOutput for Act {
    fn skeleton() -> Self {
        Act {
            act_number: 1,
            act_title: text("act title"),
            act_description: text("act description"),
            act_plot: text("act plot"),
            chapters: vec![Chapter {
                chapter_title: text("chapter title"),
                chapter_description: text("chapter description"),
                chapter_plot: text("chapter plot"),
                scenes: vec![Scene {
                    scene_title: text("scene title"),
                    scene_description: text("scene description"),
                    characters: text("characters present"),
                    scene_plot: text("scene plot"),
                }],
            }],
        }
    }
}

/// Pulls the JSON object out of a model reply: the first fenced block that
/// parses wins, then the outermost braces.
pub fn extract_json(reply: &str) -> Option<&str> {
    static FENCE_RE: OnceLock<Regex> = OnceLock::new();
    let fence = FENCE_RE.get_or_init(|| {
        Regex::new(r"(?s)```(?:json|JSON)?\s*(\{.*?\})\s*```").expect("valid fence regex")
    });

    let mut fenced = fence
        .captures_iter(reply)
        .filter_map(|caps| caps.get(1))
        .map(|inner| inner.as_str());
    let first = fenced.next();
    if let Some(inner) = first
        .into_iter()
        .chain(fenced)
        .find(|inner| serde_json::from_str::<serde_json::Value>(inner).is_ok())
    {
        return Some(inner);
    }
    if first.is_some() {
        return first;
    }

    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    (end > start).then(|| &reply[start..=end])
}

/// Runs one stage: render its prompt, call the model once, parse the reply.
pub struct StageRunner<'a> {
    model: &'a dyn LanguageModel,
    prompts: &'a PromptRegistry,
    sink: &'a dyn LogSink,
}

impl<'a> StageRunner<'a> {
    pub fn new(
        model: &'a dyn LanguageModel,
        prompts: &'a PromptRegistry,
        sink: &'a dyn LogSink,
    ) -> Self {
        Self {
            model,
            prompts,
            sink,
        }
    }

    pub fn run<T, I, K, V>(&self, stage: Stage, arguments: I) -> Result<T, PipelineError>
    where
        T: StructuredOutput,
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let instruction = self
            .prompts
            .format_with(stage.prompt_key(), arguments)
            .map_err(|source| PipelineError::Prompt { stage, source })?;
        let schema = serde_json::to_string_pretty(&T::skeleton()).unwrap_or_default();
        let prompt = format!(
            "{instruction}\n\nRespond with a single JSON object and nothing else, using exactly this shape:\n{schema}"
        );

        self.log(LogLevel::Info, format!("stage {stage}: requesting structured output"));
        self.log(LogLevel::Debug, format!("stage {stage} prompt:\n{prompt}"));

        let reply = self
            .model
            .invoke(&prompt)
            .map_err(|source| PipelineError::Model { stage, source })?;
        if reply.trim().is_empty() {
            return Err(PipelineError::EmptyResponse { stage });
        }
        self.log(LogLevel::Debug, format!("stage {stage} reply:\n{reply}"));

        let json = extract_json(&reply).unwrap_or(reply.as_str());
        serde_json::from_str(json).map_err(|source| PipelineError::Parse { stage, source })
    }

    fn log(&self, level: LogLevel, message: String) {
        self.sink.log(LogRecord::new(level, message));
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BookRequest {
    pub idea: String,
    pub author: String,
    pub title: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineReport {
    pub title: String,
    pub stats: WriteStats,
    pub pdf: PdfOutcome,
}

/// The fixed sequence of stages. Each stage's record is passed as a plain
/// argument to the next; the book writer receives them as they arrive.
pub struct Pipeline<'a> {
    runner: StageRunner<'a>,
    writer: BookWriter<'a>,
    sink: &'a dyn LogSink,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        planner: &'a dyn LanguageModel,
        writer: BookWriter<'a>,
        prompts: &'a PromptRegistry,
        sink: &'a dyn LogSink,
    ) -> Self {
        Self {
            runner: StageRunner::new(planner, prompts, sink),
            writer,
            sink,
        }
    }

    pub fn writer(&self) -> &BookWriter<'a> {
        &self.writer
    }

    pub fn run(&mut self, request: &BookRequest) -> Result<PipelineReport, PipelineError> {
        self.writer.start_manuscript()?;

        let idea: Idea = self.runner.run(
            Stage::Ideation,
            [
                ("idea", request.idea.trim().to_string()),
                ("author", request.author.clone()),
                ("title", request.title.clone()),
            ],
        )?;
        let idea_json = to_prompt_json(&idea);

        let characters: Characters = self
            .runner
            .run(Stage::CharacterDevelopment, [("idea_json", idea_json.clone())])?;
        self.log(
            LogLevel::Info,
            format!("developed {} characters", characters.len()),
        );
        let characters_json = to_prompt_json(&characters);

        let plot: Plot = self.runner.run(
            Stage::PlotDevelopment,
            [
                ("idea_json", idea_json.clone()),
                ("characters_json", characters_json.clone()),
            ],
        )?;
        let plot_json = to_prompt_json(&plot);

        let subplots: SubPlots = self.runner.run(
            Stage::SubplotDevelopment,
            [
                ("idea_json", idea_json.clone()),
                ("characters_json", characters_json.clone()),
                ("plot_json", plot_json.clone()),
            ],
        )?;
        let subplots_json = to_prompt_json(&subplots);

        let vision: ArtisticVision = self.runner.run(
            Stage::ArtisticVision,
            [
                ("idea_json", idea_json.clone()),
                ("plot_json", plot_json.clone()),
                ("title", request.title.clone()),
            ],
        )?;
        self.writer.set_artistic_vision(vision);

        let mut book: Book = self.runner.run(
            Stage::BookDevelopment,
            [
                ("idea_json", idea_json.clone()),
                ("plot_json", plot_json.clone()),
                ("author", request.author.clone()),
                ("title", request.title.clone()),
            ],
        )?;
        if !request.title.trim().is_empty() {
            book.title = request.title.trim().to_string();
        }
        if !request.author.trim().is_empty() {
            book.author = request.author.trim().to_string();
        }
        self.writer.write_book_intro(&book)?;
        let mut pdf = self.writer.save_pdf()?;

        let mut outlined: Vec<serde_json::Value> = Vec::new();
        for number in 1..=ACT_COUNT {
            let mut act: Act = self.runner.run(
                Stage::Act(number),
                [
                    ("act_number", number.to_string()),
                    ("act_role", act_role(number).to_string()),
                    ("idea_json", idea_json.clone()),
                    ("characters_json", characters_json.clone()),
                    ("plot_json", plot_json.clone()),
                    ("subplots_json", subplots_json.clone()),
                    ("previous_acts", to_prompt_json(&outlined)),
                ],
            )?;
            if act.act_number != number {
                self.log(
                    LogLevel::Warn,
                    format!("act {number} came back numbered {}, renumbering", act.act_number),
                );
                act.act_number = number;
            }

            self.writer.write_act(&act, &idea, &characters)?;
            pdf = self.writer.save_pdf()?;

            outlined.push(serde_json::json!({
                "act_number": act.act_number,
                "act_title": act.act_title,
                "act_description": act.act_description,
                "act_plot": act.act_plot,
                "chapter_titles": act.chapters.iter().map(|c| c.chapter_title.as_str()).collect::<Vec<_>>(),
            }));
        }

        let report = PipelineReport {
            title: book.title,
            stats: self.writer.stats().clone(),
            pdf,
        };
        self.log(
            LogLevel::Info,
            format!(
                "finished `{}`: {} chapters, {} scenes written, {} failed",
                report.title,
                report.stats.chapters,
                report.stats.scenes_written,
                report.stats.scenes_failed
            ),
        );
        Ok(report)
    }

    fn log(&self, level: LogLevel, message: String) {
        self.sink.log(LogRecord::new(level, message));
    }
}
