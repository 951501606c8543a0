use std::fmt;
use thiserror::Error;

use crate::agent::LanguageModel;
use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::manuscript::Transcriber;
use crate::markdown::{self, MarkdownError};
use crate::models::{to_prompt_json, Act, Chapter, Characters, Idea, Scene};
use crate::prompts::{keys, PromptError, PromptRegistry};

pub const SCENE_HEADER_LEVEL: u8 = 4;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SceneOutcome {
    Written { words: usize },
    /// The author model failed or returned nothing. The scene header is in
    /// the manuscript, the prose is not.
    Failed(String),
}

impl fmt::Display for SceneOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Written { words } => write!(f, "scene written ({words} words)"),
            Self::Failed(reason) => write!(f, "scene not written: {reason}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SceneError {
    #[error("failed to render scene prompt: {0}")]
    Prompt(#[from] PromptError),
    #[error("failed to write scene to manuscript: {0}")]
    Manuscript(#[from] MarkdownError),
}

pub struct SceneWriter<'a> {
    author: &'a dyn LanguageModel,
    transcriber: Transcriber,
    prompts: &'a PromptRegistry,
    sink: &'a dyn LogSink,
}

impl<'a> SceneWriter<'a> {
    pub fn new(
        author: &'a dyn LanguageModel,
        transcriber: Transcriber,
        prompts: &'a PromptRegistry,
        sink: &'a dyn LogSink,
    ) -> Self {
        Self {
            author,
            transcriber,
            prompts,
            sink,
        }
    }

    /// Writes one scene: header, then the author's prose verbatim. Blocks
    /// until the model answers so scenes land in reading order.
    pub fn write_scene(
        &self,
        scene: &Scene,
        act: &Act,
        chapter: &Chapter,
        idea: &Idea,
        characters: &Characters,
    ) -> Result<SceneOutcome, SceneError> {
        self.transcriber
            .append(&markdown::header(scene.scene_title.trim(), SCENE_HEADER_LEVEL))?;

        let prompt = scene_prompt(self.prompts, scene, act, chapter, idea, characters)?;
        self.sink.log(LogRecord::new(
            LogLevel::Debug,
            format!("scene prompt for `{}`:\n{}", scene.scene_title, prompt),
        ));

        let prose = match self.author.invoke(&prompt) {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => return Ok(SceneOutcome::Failed("author returned empty prose".into())),
            Err(err) => return Ok(SceneOutcome::Failed(err.to_string())),
        };

        self.transcriber.append(&format!("{prose}\n\n"))?;
        Ok(SceneOutcome::Written {
            words: prose.split_whitespace().count(),
        })
    }
}

pub fn scene_prompt(
    prompts: &PromptRegistry,
    scene: &Scene,
    act: &Act,
    chapter: &Chapter,
    idea: &Idea,
    characters: &Characters,
) -> Result<String, PromptError> {
    prompts.format_with(
        keys::WRITE_SCENE,
        [
            ("scene_plot", scene.scene_plot.clone()),
            ("scene_characters", scene.characters.clone()),
            ("act_description", act.act_description.clone()),
            ("act_plot", act.act_plot.clone()),
            ("chapter_description", chapter.chapter_description.clone()),
            ("chapter_plot", chapter.chapter_plot.clone()),
            ("idea_json", to_prompt_json(idea)),
            ("characters_json", to_prompt_json(characters)),
        ],
    )
}
