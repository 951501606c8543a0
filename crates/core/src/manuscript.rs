use std::path::{Path, PathBuf};

use crate::markdown::{self, MarkdownError, WriteMode};

pub const MANUSCRIPT_FILE_NAME: &str = "book.md";
pub const PDF_FILE_NAME: &str = "book.pdf";
pub const IMAGES_DIR_NAME: &str = "images";

/// Appends fragments to the manuscript file. There is one transcriber per run
/// and it is the only writer of the manuscript.
#[derive(Clone, Debug)]
pub struct Transcriber {
    path: PathBuf,
}

impl Transcriber {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory that relative image references resolve against.
    pub fn base_dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new(""))
    }

    /// Truncates the manuscript so a new run does not append to an old book.
    pub fn start(&self) -> Result<(), MarkdownError> {
        markdown::write("", &self.path, WriteMode::Create)
    }

    pub fn append(&self, content: &str) -> Result<(), MarkdownError> {
        markdown::write(content, &self.path, WriteMode::Append)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn appends_in_call_order() {
        let dir = tempdir().unwrap();
        let transcriber = Transcriber::new(dir.path().join("out").join(MANUSCRIPT_FILE_NAME));

        transcriber.append("one ").unwrap();
        transcriber.append("two").unwrap();

        assert_eq!(fs::read_to_string(transcriber.path()).unwrap(), "one two");
        assert_eq!(transcriber.base_dir(), dir.path().join("out"));
    }

    #[test]
    fn start_discards_previous_run() {
        let dir = tempdir().unwrap();
        let transcriber = Transcriber::new(dir.path().join(MANUSCRIPT_FILE_NAME));
        transcriber.append("stale").unwrap();

        transcriber.start().unwrap();
        transcriber.append("fresh").unwrap();

        assert_eq!(fs::read_to_string(transcriber.path()).unwrap(), "fresh");
    }
}
