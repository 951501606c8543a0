use std::error::Error as StdError;
use std::fmt;
use std::path::{Path, PathBuf};

/// Heading depth included in the rendered table of contents.
pub const TOC_LEVEL: u8 = 2;

#[derive(Debug)]
pub struct RenderError {
    inner: Box<dyn StdError + Send + Sync>,
}

impl RenderError {
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

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl StdError for RenderError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.inner.as_ref())
    }
}

/// Re-renders a whole Markdown manuscript into a PDF file.
pub trait ManuscriptRenderer: Send + Sync {
    /// `markdown` is the full manuscript text. `base_dir` is the directory
    /// relative image references resolve against and `title` is the document
    /// title metadata.
    fn render(
        &self,
        markdown: &str,
        base_dir: &Path,
        title: &str,
        output: &Path,
    ) -> Result<(), RenderError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PdfOutcome {
    Rendered(PathBuf),
    /// The manuscript does not exist yet. Not an error.
    MissingSource(PathBuf),
}

impl fmt::Display for PdfOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rendered(path) => write!(f, "PDF successfully created at: {}", path.display()),
            Self::MissingSource(path) => {
                write!(f, "Markdown file not found: {}", path.display())
            }
        }
    }
}

/// Reads `markdown_path` and renders it to `pdf_path`, titling the document
/// after the manuscript file name. Each call re-renders from scratch.
pub fn render_manuscript(
    renderer: &dyn ManuscriptRenderer,
    markdown_path: &Path,
    pdf_path: &Path,
) -> Result<PdfOutcome, RenderError> {
    if !markdown_path.is_file() {
        return Ok(PdfOutcome::MissingSource(markdown_path.to_path_buf()));
    }

    let markdown = std::fs::read_to_string(markdown_path).map_err(RenderError::new)?;
    let title = markdown_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let base_dir = markdown_path.parent().unwrap_or_else(|| Path::new(""));

    if let Some(parent) = pdf_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(RenderError::new)?;
        }
    }

    renderer.render(&markdown, base_dir, &title, pdf_path)?;
    Ok(PdfOutcome::Rendered(pdf_path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::tempdir;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(String, PathBuf, String)>>,
    }

    impl ManuscriptRenderer for Recorder {
        fn render(
            &self,
            markdown: &str,
            base_dir: &Path,
            title: &str,
            output: &Path,
        ) -> Result<(), RenderError> {
            self.calls
                .lock()
                .unwrap()
                .push((markdown.to_string(), base_dir.to_path_buf(), title.to_string()));
            fs::write(output, markdown.as_bytes()).map_err(RenderError::new)
        }
    }

    #[test]
    fn missing_manuscript_is_reported_as_outcome() {
        let dir = tempdir().unwrap();
        let renderer = Recorder::default();
        let md = dir.path().join("book.md");

        let outcome = render_manuscript(&renderer, &md, &dir.path().join("book.pdf")).unwrap();

        assert_eq!(outcome, PdfOutcome::MissingSource(md.clone()));
        assert!(outcome.to_string().starts_with("Markdown file not found"));
        assert!(renderer.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn passes_title_and_base_directory() {
        let dir = tempdir().unwrap();
        let md = dir.path().join("book.md");
        fs::write(&md, "# Title\n").unwrap();
        let renderer = Recorder::default();

        let pdf = dir.path().join("pdf").join("book.pdf");
        let outcome = render_manuscript(&renderer, &md, &pdf).unwrap();

        assert_eq!(outcome, PdfOutcome::Rendered(pdf.clone()));
        let calls = renderer.calls.lock().unwrap();
        assert_eq!(calls[0].0, "# Title\n");
        assert_eq!(calls[0].1, dir.path());
        assert_eq!(calls[0].2, "book.md");
    }
}
