use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use ghostwriter_core::{
    Act, ArtisticVision, Book, BookRequest, BookServices, BookWriter, Chapter, Character,
    Characters, Idea, ImageGenerator, ImageGeneratorError, ImageSize, LanguageModel,
    LanguageModelError, LogLevel, ManuscriptRenderer, NullLogSink, PdfOutcome, Pipeline,
    PipelineError, Plot, PromptRegistry, RenderError, Scene, Stage, SubPlot, SubPlots,
    VecLogSink,
};
use tempfile::tempdir;

struct MockLanguageModel {
    responses: Mutex<VecDeque<String>>,
}

impl MockLanguageModel {
    fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
        }
    }

    fn assert_empty(&self) {
        let guard = self.responses.lock().expect("mock mutex poisoned");
        assert!(guard.is_empty(), "expected all mock responses to be consumed");
    }
}

impl LanguageModel for MockLanguageModel {
    fn invoke(&self, _prompt: &str) -> Result<String, LanguageModelError> {
        let mut guard = self.responses.lock().expect("mock mutex poisoned");
        guard
            .pop_front()
            .ok_or_else(|| LanguageModelError::msg("mock language model has no remaining responses"))
    }
}

/// Answers every scene prompt with numbered prose, or always fails.
struct MockAuthor {
    calls: AtomicUsize,
    fail: bool,
}

impl MockAuthor {
    fn writing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }
}

impl LanguageModel for MockAuthor {
    fn invoke(&self, _prompt: &str) -> Result<String, LanguageModelError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail {
            return Err(LanguageModelError::msg("author unavailable"));
        }
        Ok(format!("Scene prose number {n}."))
    }
}

struct StubImages {
    calls: AtomicUsize,
    fail: bool,
}

impl StubImages {
    fn working() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ImageGenerator for StubImages {
    fn generate(&self, _prompt: &str, size: ImageSize) -> Result<Vec<u8>, ImageGeneratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ImageGeneratorError::msg("content policy violation"));
        }
        Ok(format!("PNG {size}").into_bytes())
    }
}

/// Deterministic stand-in for the PDF backend.
struct StubRenderer;

impl ManuscriptRenderer for StubRenderer {
    fn render(
        &self,
        markdown: &str,
        _base_dir: &Path,
        title: &str,
        output: &Path,
    ) -> Result<(), RenderError> {
        let body = format!("%PDF-stub\ntitle={title}\n{markdown}");
        fs::write(output, body).map_err(RenderError::new)
    }
}

fn idea() -> Idea {
    Idea {
        premise: "A worm becomes aware of its own mind".into(),
        theme: "consciousness".into(),
        characters: "Ada, a neuroscientist".into(),
        plot_concepts: "first contact through soil".into(),
        ..Idea::default()
    }
}

fn characters() -> Characters {
    Characters {
        characters: vec![Character {
            name: "Ada".into(),
            role: "protagonist".into(),
            ..Character::default()
        }],
    }
}

fn book() -> Book {
    Book {
        title: "Draft Title".into(),
        author: "Model Author".into(),
        epigraph: "Even the smallest mind dreams.".into(),
        preface: "This book began in a garden.".into(),
        authors_note: "All worms are fictional.".into(),
        genre: "speculative".into(),
        description: "A quiet story about listening.".into(),
    }
}

fn act(number: u32, chapters: usize) -> Act {
    Act {
        act_number: number,
        act_title: format!("Movement {number}"),
        act_description: format!("description of act {number}"),
        act_plot: format!("plot of act {number}"),
        chapters: (0..chapters)
            .map(|c| Chapter {
                chapter_title: format!("Part {number}.{c}"),
                chapter_description: "chapter description".into(),
                chapter_plot: "chapter plot".into(),
                scenes: vec![Scene {
                    scene_title: format!("Scene {number}.{c}"),
                    scene_description: "scene description".into(),
                    characters: "Ada".into(),
                    scene_plot: "scene plot".into(),
                }],
            })
            .collect(),
    }
}

fn planner_replies(acts: &[Act]) -> Vec<String> {
    let plot = Plot {
        description: "Ada hears the worm".into(),
        climax: "the worm speaks".into(),
        ..Plot::default()
    };
    let subplots = SubPlots {
        subplots: vec![SubPlot {
            title: "Funding".into(),
            description: "The lab runs out of money".into(),
            ..SubPlot::default()
        }],
    };
    let vision = ArtisticVision {
        genre: "literary".into(),
        color_palette: "loam browns".into(),
        ..ArtisticVision::default()
    };

    let mut replies = vec![
        serde_json::to_string(&idea()).unwrap(),
        format!("```json\n{}\n```", serde_json::to_string(&characters()).unwrap()),
        serde_json::to_string(&plot).unwrap(),
        serde_json::to_string(&subplots).unwrap(),
        serde_json::to_string(&vision).unwrap(),
        format!("Here is the book:\n{}", serde_json::to_string(&book()).unwrap()),
    ];
    replies.extend(acts.iter().map(|a| serde_json::to_string(a).unwrap()));
    replies
}

fn position(haystack: &str, needle: &str) -> usize {
    haystack
        .find(needle)
        .unwrap_or_else(|| panic!("manuscript is missing `{needle}`"))
}

#[test]
fn pipeline_writes_whole_book_with_continuous_chapter_numbers(
) -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let output = temp.path().join("output");
    let prompts = PromptRegistry::new()?;
    let sink = VecLogSink::new();
    let planner = MockLanguageModel::new(planner_replies(&[act(1, 2), act(2, 3), act(3, 1)]));
    let author = MockAuthor::writing();
    let images = StubImages::working();

    let writer = BookWriter::new(
        BookServices {
            author: &author,
            illustrator: &images,
            renderer: &StubRenderer,
            prompts: &prompts,
            sink: &sink,
        },
        &output,
        false,
    )?;
    let mut pipeline = Pipeline::new(&planner, writer, &prompts, &sink);

    let report = pipeline.run(&BookRequest {
        idea: "A worm that thinks".into(),
        author: "J. Doe".into(),
        title: "The Listening Soil".into(),
    })?;
    planner.assert_empty();

    assert_eq!(report.title, "The Listening Soil");
    assert_eq!(report.stats.acts, 3);
    assert_eq!(report.stats.chapters, 6);
    assert_eq!(report.stats.scenes_written, 6);
    assert_eq!(report.stats.scenes_failed, 0);
    assert_eq!(report.stats.illustrations_embedded, 8);
    assert_eq!(report.pdf, PdfOutcome::Rendered(output.join("book.pdf")));
    assert_eq!(pipeline.writer().chapter_number(), 7);
    assert_eq!(images.calls(), 8);
    let renders = sink
        .at_level(LogLevel::Info)
        .into_iter()
        .filter(|record| record.message.starts_with("PDF successfully created at"))
        .count();
    assert_eq!(renders, 4);

    let manuscript = fs::read_to_string(output.join("book.md"))?;
    let mut last = 0;
    for n in 1..=6 {
        let at = position(&manuscript, &format!("### Chapter {n}: "));
        assert!(at > last, "chapter {n} is out of order");
        last = at;
        assert!(output.join("images").join(format!("chapter_{n:02}.png")).is_file());
    }
    assert!(!manuscript.contains("### Chapter 7"));
    assert!(position(&manuscript, "## Act 2: Movement 2") < position(&manuscript, "### Chapter 3: Part 2.0"));
    assert!(manuscript.contains("Scene prose number 6."));

    let pdf = fs::read_to_string(output.join("book.pdf"))?;
    assert!(pdf.starts_with("%PDF-stub\ntitle=book.md\n"));
    assert!(pdf.ends_with(&manuscript));
    Ok(())
}

#[test]
fn front_matter_is_written_in_reading_order() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let prompts = PromptRegistry::new()?;
    let author = MockAuthor::writing();
    let images = StubImages::working();
    let mut writer = BookWriter::new(
        BookServices {
            author: &author,
            illustrator: &images,
            renderer: &StubRenderer,
            prompts: &prompts,
            sink: &NullLogSink,
        },
        temp.path(),
        false,
    )?;

    writer.start_manuscript()?;
    writer.write_book_intro(&book())?;

    let manuscript = fs::read_to_string(writer.manuscript_path())?;
    let order = [
        "![cover](images/cover.png)",
        "# Draft Title",
        "![frontispiece](images/frontispiece.png)",
        "> Even the smallest mind dreams.",
        "## Preface",
        "This book began in a garden.",
        "## Author's Note",
        "All worms are fictional.",
    ];
    let positions: Vec<usize> = order.iter().map(|needle| position(&manuscript, needle)).collect();
    assert!(positions.windows(2).all(|pair| pair[0] < pair[1]), "{manuscript}");
    assert_eq!(manuscript.matches("page-break-after: always").count(), 3);
    assert!(manuscript.ends_with("<div style=\"page-break-after: always;\"></div>\n\n"));
    Ok(())
}

#[test]
fn disabled_illustrations_never_reach_the_generator() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let prompts = PromptRegistry::new()?;
    let author = MockAuthor::writing();
    let images = StubImages::working();
    let mut writer = BookWriter::new(
        BookServices {
            author: &author,
            illustrator: &images,
            renderer: &StubRenderer,
            prompts: &prompts,
            sink: &NullLogSink,
        },
        temp.path(),
        true,
    )?;

    writer.start_manuscript()?;
    writer.write_book_intro(&book())?;
    writer.write_act(&act(1, 2), &idea(), &characters())?;

    assert_eq!(images.calls(), 0);
    let manuscript = fs::read_to_string(writer.manuscript_path())?;
    assert!(!manuscript.contains("!["));
    assert!(manuscript.contains("### Chapter 2: Part 1.1"));
    assert_eq!(fs::read_dir(temp.path().join("images"))?.count(), 0);
    assert_eq!(writer.stats().illustrations_embedded, 0);
    Ok(())
}

#[test]
fn save_pdf_is_repeatable_and_reports_missing_manuscript(
) -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let prompts = PromptRegistry::new()?;
    let author = MockAuthor::writing();
    let images = StubImages::working();
    let mut writer = BookWriter::new(
        BookServices {
            author: &author,
            illustrator: &images,
            renderer: &StubRenderer,
            prompts: &prompts,
            sink: &NullLogSink,
        },
        temp.path(),
        false,
    )?;

    let before = writer.save_pdf()?;
    assert_eq!(before, PdfOutcome::MissingSource(temp.path().join("book.md")));
    assert!(!temp.path().join("book.pdf").exists());

    writer.start_manuscript()?;
    writer.write_book_intro(&book())?;
    writer.write_act(&act(1, 1), &idea(), &characters())?;

    writer.save_pdf()?;
    let first = fs::read(writer.pdf_path())?;
    writer.save_pdf()?;
    let second = fs::read(writer.pdf_path())?;
    assert_eq!(first, second);
    Ok(())
}

#[test]
fn failed_illustrations_and_scenes_do_not_abort_the_book(
) -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let prompts = PromptRegistry::new()?;
    let sink = VecLogSink::new();
    let author = MockAuthor::failing();
    let images = StubImages::failing();
    let mut writer = BookWriter::new(
        BookServices {
            author: &author,
            illustrator: &images,
            renderer: &StubRenderer,
            prompts: &prompts,
            sink: &sink,
        },
        temp.path(),
        false,
    )?;

    writer.start_manuscript()?;
    writer.set_artistic_vision(ArtisticVision::default());
    writer.write_book_intro(&book())?;
    writer.write_act(&act(1, 2), &idea(), &characters())?;

    let stats = writer.stats();
    assert_eq!(stats.illustrations_failed, 4);
    assert_eq!(stats.scenes_failed, 2);
    assert_eq!(stats.chapters, 2);

    let manuscript = fs::read_to_string(writer.manuscript_path())?;
    assert!(!manuscript.contains("!["));
    assert!(manuscript.contains("#### Scene 1.1\n\n"));
    assert_eq!(sink.at_level(LogLevel::Warn).len(), 4);
    assert_eq!(sink.at_level(LogLevel::Error).len(), 2);
    Ok(())
}

#[test]
fn malformed_stage_output_stops_before_any_act() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let prompts = PromptRegistry::new()?;
    let mut replies = planner_replies(&[]);
    replies[2] = "I would rather not answer in JSON.".into();
    let planner = MockLanguageModel::new(replies);
    let author = MockAuthor::writing();
    let images = StubImages::working();

    let writer = BookWriter::new(
        BookServices {
            author: &author,
            illustrator: &images,
            renderer: &StubRenderer,
            prompts: &prompts,
            sink: &NullLogSink,
        },
        temp.path(),
        false,
    )?;
    let mut pipeline = Pipeline::new(&planner, writer, &prompts, &NullLogSink);

    let err = pipeline
        .run(&BookRequest {
            idea: "A worm that thinks".into(),
            ..BookRequest::default()
        })
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Parse {
            stage: Stage::PlotDevelopment,
            ..
        }
    ));
    assert_eq!(author.calls.load(Ordering::SeqCst), 0);
    assert_eq!(images.calls(), 0);
    Ok(())
}
