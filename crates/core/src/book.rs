use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::agent::LanguageModel;
use crate::illustration::{
    chapter_file_name, chapter_illustration_prompt, cover_illustration_prompt,
    frontispiece_illustration_prompt, IllustrationError, IllustrationOutcome, IllustrationWriter,
    ImageGenerator, ImageSize, COVER_FILE_NAME, FRONTISPIECE_FILE_NAME,
};
use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::manuscript::{Transcriber, IMAGES_DIR_NAME, MANUSCRIPT_FILE_NAME, PDF_FILE_NAME};
use crate::markdown::{self, MarkdownError};
use crate::models::{Act, ArtisticVision, Book, Chapter, Characters, Idea};
use crate::prompts::{PromptError, PromptRegistry};
use crate::render::{render_manuscript, ManuscriptRenderer, PdfOutcome, RenderError};
use crate::scene::{SceneError, SceneOutcome, SceneWriter};

#[derive(Debug, Error)]
pub enum BookError {
    #[error("failed to prepare output directory `{path}`: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("failed to write manuscript: {0}")]
    Manuscript(#[from] MarkdownError),
    #[error("failed to render prompt: {0}")]
    Prompt(#[from] PromptError),
    #[error(transparent)]
    Illustration(#[from] IllustrationError),
    #[error(transparent)]
    Scene(#[from] SceneError),
    #[error("failed to render PDF: {0}")]
    Render(#[from] RenderError),
}

/// Counts of what the writer produced so far in this run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WriteStats {
    pub acts: usize,
    pub chapters: usize,
    pub scenes_written: usize,
    pub scenes_failed: usize,
    pub words: usize,
    pub illustrations_embedded: usize,
    pub illustrations_failed: usize,
}

/// External collaborators of a [`BookWriter`].
pub struct BookServices<'a> {
    pub author: &'a dyn LanguageModel,
    pub illustrator: &'a dyn ImageGenerator,
    pub renderer: &'a dyn ManuscriptRenderer,
    pub prompts: &'a PromptRegistry,
    pub sink: &'a dyn LogSink,
}

/// Owns the manuscript for one run and decides the order everything is
/// written in. The chapter counter spans the whole book.
pub struct BookWriter<'a> {
    transcriber: Transcriber,
    illustration_writer: IllustrationWriter<'a>,
    scene_writer: SceneWriter<'a>,
    renderer: &'a dyn ManuscriptRenderer,
    prompts: &'a PromptRegistry,
    sink: &'a dyn LogSink,
    output_path: PathBuf,
    book_pdf_path: PathBuf,
    chapter_number: u32,
    artistic_vision: Option<ArtisticVision>,
    stats: WriteStats,
}

impl<'a> BookWriter<'a> {
    /// Creates the output and images directories. The manuscript itself is
    /// created lazily by the first append.
    pub fn new(
        services: BookServices<'a>,
        output_path: impl Into<PathBuf>,
        disable_illustration: bool,
    ) -> Result<Self, BookError> {
        let output_path = output_path.into();
        let images_path = output_path.join(IMAGES_DIR_NAME);
        for dir in [&output_path, &images_path] {
            fs::create_dir_all(dir).map_err(|source| BookError::CreateDir {
                path: dir.clone(),
                source,
            })?;
        }

        let transcriber = Transcriber::new(output_path.join(MANUSCRIPT_FILE_NAME));
        let illustration_writer = IllustrationWriter::new(
            services.illustrator,
            transcriber.clone(),
            images_path,
            services.sink,
        )
        .disabled(disable_illustration);
        let scene_writer = SceneWriter::new(
            services.author,
            transcriber.clone(),
            services.prompts,
            services.sink,
        );

        Ok(Self {
            transcriber,
            illustration_writer,
            scene_writer,
            renderer: services.renderer,
            prompts: services.prompts,
            sink: services.sink,
            book_pdf_path: output_path.join(PDF_FILE_NAME),
            output_path,
            chapter_number: 1,
            artistic_vision: None,
            stats: WriteStats::default(),
        })
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn manuscript_path(&self) -> &Path {
        self.transcriber.path()
    }

    pub fn pdf_path(&self) -> &Path {
        &self.book_pdf_path
    }

    /// Number the next chapter will get.
    pub fn chapter_number(&self) -> u32 {
        self.chapter_number
    }

    pub fn artistic_vision(&self) -> Option<&ArtisticVision> {
        self.artistic_vision.as_ref()
    }

    pub fn stats(&self) -> &WriteStats {
        &self.stats
    }

    /// Empties the manuscript left by an earlier run.
    pub fn start_manuscript(&self) -> Result<(), BookError> {
        self.transcriber.start()?;
        Ok(())
    }

    pub fn set_artistic_vision(&mut self, vision: ArtisticVision) {
        self.artistic_vision = Some(vision);
    }

    /// Front matter in a fixed order: cover and title, frontispiece,
    /// epigraph, preface, author's note. PDF pagination depends on it.
    pub fn write_book_intro(&mut self, book: &Book) -> Result<(), BookError> {
        self.log(LogLevel::Info, format!("writing front matter for `{}`", book.title));
        if self.artistic_vision.is_none() {
            self.log(
                LogLevel::Warn,
                "artistic vision not set, illustration prompts will omit it",
            );
        }

        self.write_book_cover(book)?;
        self.write_frontispiece(book)?;
        self.write_epigraph(book)?;
        self.transcriber.append(&markdown::page_break())?;
        self.write_preface(book)?;
        self.transcriber.append(&markdown::page_break())?;
        self.write_authors_note(book)?;
        self.transcriber.append(&markdown::page_break())?;
        Ok(())
    }

    pub fn write_act(
        &mut self,
        act: &Act,
        idea: &Idea,
        characters: &Characters,
    ) -> Result<(), BookError> {
        self.log(
            LogLevel::Info,
            format!(
                "writing act {} `{}` ({} chapters)",
                act.act_number,
                act.act_title,
                act.chapters.len()
            ),
        );
        let act_header = markdown::header(
            &format!("Act {}: {}", act.act_number, act.act_title.trim()),
            2,
        );
        self.transcriber.append(&act_header)?;

        for chapter in &act.chapters {
            self.write_chapter(chapter, act, idea, characters)?;
        }
        self.stats.acts += 1;
        Ok(())
    }

    /// Re-renders the whole manuscript to PDF.
    pub fn save_pdf(&self) -> Result<PdfOutcome, BookError> {
        let outcome = render_manuscript(
            self.renderer,
            self.transcriber.path(),
            &self.book_pdf_path,
        )?;
        let level = match outcome {
            PdfOutcome::Rendered(_) => LogLevel::Info,
            PdfOutcome::MissingSource(_) => LogLevel::Warn,
        };
        self.log(level, outcome.to_string());
        Ok(outcome)
    }

    fn write_chapter(
        &mut self,
        chapter: &Chapter,
        act: &Act,
        idea: &Idea,
        characters: &Characters,
    ) -> Result<(), BookError> {
        let chapter_header = markdown::header(
            &format!("Chapter {}: {}", self.chapter_number, chapter.chapter_title.trim()),
            3,
        );
        self.transcriber.append(&chapter_header)?;

        let prompt =
            chapter_illustration_prompt(self.prompts, chapter, self.artistic_vision.as_ref())?;
        self.illustrate(&prompt, ImageSize::SQUARE, &chapter_file_name(self.chapter_number))?;

        self.chapter_number += 1;
        self.stats.chapters += 1;

        for scene in &chapter.scenes {
            match self.scene_writer.write_scene(scene, act, chapter, idea, characters)? {
                SceneOutcome::Written { words } => {
                    self.stats.scenes_written += 1;
                    self.stats.words += words;
                }
                SceneOutcome::Failed(reason) => {
                    self.stats.scenes_failed += 1;
                    self.log(
                        LogLevel::Error,
                        format!("scene `{}` left empty: {}", scene.scene_title, reason),
                    );
                }
            }
        }

        self.transcriber.append(&markdown::page_break())?;
        Ok(())
    }

    fn write_book_cover(&mut self, book: &Book) -> Result<(), BookError> {
        let prompt = cover_illustration_prompt(self.prompts, book, self.artistic_vision.as_ref())?;
        self.illustrate(&prompt, ImageSize::PORTRAIT, COVER_FILE_NAME)?;
        self.transcriber.append(&markdown::header(book.title.trim(), 1))?;
        Ok(())
    }

    fn write_frontispiece(&mut self, book: &Book) -> Result<(), BookError> {
        let prompt =
            frontispiece_illustration_prompt(self.prompts, book, self.artistic_vision.as_ref())?;
        self.illustrate(&prompt, ImageSize::SQUARE, FRONTISPIECE_FILE_NAME)?;
        Ok(())
    }

    fn write_epigraph(&self, book: &Book) -> Result<(), BookError> {
        self.transcriber
            .append(&markdown::quote_block(&book.epigraph, &book.author))?;
        Ok(())
    }

    fn write_preface(&self, book: &Book) -> Result<(), BookError> {
        self.transcriber.append(&markdown::header("Preface", 2))?;
        self.transcriber.append(&format!("{}\n\n", book.preface.trim()))?;
        Ok(())
    }

    fn write_authors_note(&self, book: &Book) -> Result<(), BookError> {
        self.transcriber.append(&markdown::header("Author's Note", 2))?;
        self.transcriber.append(&format!("{}\n\n", book.authors_note.trim()))?;
        Ok(())
    }

    fn illustrate(
        &mut self,
        prompt: &str,
        size: ImageSize,
        filename: &str,
    ) -> Result<(), BookError> {
        match self.illustration_writer.write_illustration(prompt, size, filename)? {
            IllustrationOutcome::Embedded(_) => self.stats.illustrations_embedded += 1,
            IllustrationOutcome::Failed(_) => self.stats.illustrations_failed += 1,
            IllustrationOutcome::Skipped => {}
        }
        Ok(())
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.log(LogRecord::new(level, message));
    }
}
