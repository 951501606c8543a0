//! Markdown fragments for the manuscript and the file writer that persists them.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

pub const PAGE_BREAK_DIRECTIVE: &str = "page-break-after: always";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WriteMode {
    /// Truncate or create the file.
    Create,
    Append,
}

#[derive(Debug, Error)]
pub enum MarkdownError {
    #[error("failed to create directory `{path}`: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("failed to open `{path}`: {source}")]
    Open { path: PathBuf, source: io::Error },
    #[error("failed to write `{path}`: {source}")]
    Write { path: PathBuf, source: io::Error },
}

pub fn header(text: &str, level: u8) -> String {
    let level = level.clamp(1, 6) as usize;
    format!("{} {}\n\n", "#".repeat(level), text)
}

pub fn image(path: &str, alt_text: &str) -> String {
    format!("![{alt_text}]({path})\n\n")
}

pub fn page_break() -> String {
    format!("<div style=\"{PAGE_BREAK_DIRECTIVE};\"></div>\n\n")
}

pub fn quote_block(text: &str, author: &str) -> String {
    let mut out = String::new();
    for line in text.trim().lines() {
        let line = line.trim_end();
        if line.is_empty() {
            out.push_str(">\n");
        } else {
            out.push_str("> ");
            out.push_str(line);
            out.push('\n');
        }
    }
    out.push_str(">\n");
    out.push_str(&format!("> \u{2014} *{}*\n\n", author.trim()));
    out
}

pub fn code_block(code: &str, language: &str) -> String {
    format!("```{language}\n{}\n```\n\n", code.trim_end_matches('\n'))
}

/// Expresses `target` relative to `base_dir` with forward slashes, so the
/// manuscript stays portable. Falls back to the bare file name when no
/// relative route exists (for example across Windows drive prefixes).
pub fn relative_to(target: &Path, base_dir: &Path) -> String {
    fn significant(path: &Path) -> Vec<Component<'_>> {
        path.components()
            .filter(|c| !matches!(c, Component::CurDir))
            .collect()
    }
    let target_parts = significant(target);
    let base_parts = significant(base_dir);

    let shared = target_parts
        .iter()
        .zip(base_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let rooted = |parts: &[Component<'_>]| {
        parts
            .first()
            .map(|c| matches!(c, Component::Prefix(_) | Component::RootDir))
            .unwrap_or(false)
    };
    if shared == 0 && (rooted(&target_parts) || rooted(&base_parts)) {
        return target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
    }

    let mut pieces: Vec<String> = Vec::new();
    for _ in shared..base_parts.len() {
        pieces.push("..".to_string());
    }
    for component in &target_parts[shared..] {
        pieces.push(component.as_os_str().to_string_lossy().into_owned());
    }
    pieces.join("/")
}

/// Writes `content` to `path`, creating missing parent directories.
///
/// The file handle is scoped to this call and closed on every return path.
pub fn write(content: &str, path: &Path, mode: WriteMode) -> Result<(), MarkdownError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|source| MarkdownError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }

    let mut options = OpenOptions::new();
    match mode {
        WriteMode::Create => options.write(true).create(true).truncate(true),
        WriteMode::Append => options.append(true).create(true),
    };
    let mut file = options.open(path).map_err(|source| MarkdownError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    file.write_all(content.as_bytes())
        .and_then(|_| file.flush())
        .map_err(|source| MarkdownError::Write {
            path: path.to_path_buf(),
            source,
        })
}
