use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use printpdf::image_crate::{self, DynamicImage, GenericImageView};
use printpdf::{
    BuiltinFont, Image, ImageTransform, IndirectFontRef, Mm, PdfDocument, PdfDocumentReference,
    PdfLayerIndex, PdfLayerReference, PdfPageIndex,
};
use pulldown_cmark::{Event, HeadingLevel, Options, Parser, Tag, TagEnd};

use ghostwriter_core::markdown::PAGE_BREAK_DIRECTIVE;
use ghostwriter_core::{ManuscriptRenderer, RenderError, TOC_LEVEL};

use crate::error::AdapterError;

const PAGE_WIDTH: f32 = 210.0;
const PAGE_HEIGHT: f32 = 297.0;
const MARGIN: f32 = 20.0;
const LAYER_NAME: &str = "Layer 1";
const PT_TO_MM: f32 = 0.352_778;
const LINE_SPACING: f32 = 1.45;
const BODY_SIZE: f32 = 11.0;
const CODE_SIZE: f32 = 9.0;
const QUOTE_INDENT: f32 = 10.0;
const IMAGE_DPI: f32 = 300.0;

/// A block-level element of the manuscript, in reading order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Block {
    Heading { level: u8, text: String },
    Paragraph(String),
    Quote(String),
    ListItem(String),
    Code(String),
    Image { path: String, alt: String },
    PageBreak,
    Rule,
}

fn heading_level(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

#[derive(Default)]
struct BlockCollector {
    blocks: Vec<Block>,
    text: String,
    heading: Option<u8>,
    image: Option<(String, String)>,
    quote_depth: usize,
    item_depth: usize,
    in_code: bool,
}

impl BlockCollector {
    fn flush_text(&mut self) {
        let text = self.text.trim().to_string();
        self.text.clear();
        if text.is_empty() {
            return;
        }
        let block = if self.quote_depth > 0 {
            Block::Quote(text)
        } else if self.item_depth > 0 {
            Block::ListItem(text)
        } else {
            Block::Paragraph(text)
        };
        self.blocks.push(block);
    }

    fn push_text(&mut self, text: &str) {
        match self.image.as_mut() {
            Some((_, alt)) => alt.push_str(text),
            None => self.text.push_str(text),
        }
    }

    fn handle(&mut self, event: Event<'_>) {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                self.flush_text();
                self.heading = Some(heading_level(level));
            }
            Event::End(TagEnd::Heading(_)) => {
                let text = self.text.trim().to_string();
                self.text.clear();
                if let Some(level) = self.heading.take() {
                    self.blocks.push(Block::Heading { level, text });
                }
            }
            Event::Start(Tag::Paragraph) => self.flush_text(),
            Event::End(TagEnd::Paragraph) => self.flush_text(),
            Event::Start(Tag::BlockQuote(_)) => {
                self.flush_text();
                self.quote_depth += 1;
            }
            Event::End(TagEnd::BlockQuote(_)) => {
                self.flush_text();
                self.quote_depth = self.quote_depth.saturating_sub(1);
            }
            Event::Start(Tag::Item) => {
                self.flush_text();
                self.item_depth += 1;
            }
            Event::End(TagEnd::Item) => {
                self.flush_text();
                self.item_depth = self.item_depth.saturating_sub(1);
            }
            Event::Start(Tag::CodeBlock(_)) => {
                self.flush_text();
                self.in_code = true;
            }
            Event::End(TagEnd::CodeBlock) => {
                self.in_code = false;
                let code = self.text.trim_end().to_string();
                self.text.clear();
                self.blocks.push(Block::Code(code));
            }
            Event::Start(Tag::Image { dest_url, .. }) => {
                self.flush_text();
                self.image = Some((dest_url.to_string(), String::new()));
            }
            Event::End(TagEnd::Image) => {
                if let Some((path, alt)) = self.image.take() {
                    self.blocks.push(Block::Image { path, alt });
                }
            }
            Event::Html(html) | Event::InlineHtml(html) => {
                if html.contains(PAGE_BREAK_DIRECTIVE) {
                    self.flush_text();
                    self.blocks.push(Block::PageBreak);
                }
            }
            Event::Text(text) | Event::Code(text) => self.push_text(&text),
            Event::SoftBreak => self.push_text(" "),
            Event::HardBreak => self.push_text("\n"),
            Event::Rule => {
                self.flush_text();
                self.blocks.push(Block::Rule);
            }
            _ => {}
        }
    }
}

pub fn parse_blocks(markdown: &str) -> Vec<Block> {
    let mut collector = BlockCollector::default();
    for event in Parser::new_ext(markdown, Options::empty()) {
        collector.handle(event);
    }
    collector.flush_text();
    collector.blocks
}

/// Headings that become PDF bookmarks.
pub fn outline(blocks: &[Block]) -> Vec<(u8, &str)> {
    blocks
        .iter()
        .filter_map(|block| match block {
            Block::Heading { level, text } if *level <= TOC_LEVEL => Some((*level, text.as_str())),
            _ => None,
        })
        .collect()
}

/// Characters outside Latin-1 that WinAnsiEncoding still has a code for.
const WIN_ANSI_EXTRAS: &str = concat!(
    "\u{20AC}\u{201A}\u{0192}\u{201E}\u{2026}\u{2020}\u{2021}\u{02C6}\u{2030}",
    "\u{0160}\u{2039}\u{0152}\u{017D}\u{2018}\u{2019}\u{201C}\u{201D}\u{2022}",
    "\u{2013}\u{2014}\u{02DC}\u{2122}\u{0161}\u{203A}\u{0153}\u{017E}\u{0178}",
);

/// Built-in fonts are written with WinAnsiEncoding.
fn win_ansi_encodable(c: char) -> bool {
    matches!(c, ' '..='~' | '\u{00A1}'..='\u{00FF}') || WIN_ANSI_EXTRAS.contains(c)
}

/// Keeps every character the built-in fonts can show and substitutes the
/// rest.
fn sanitize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            c if win_ansi_encodable(c) => out.push(c),
            '\u{2212}' | '\u{2010}' | '\u{2011}' | '\u{2012}' | '\u{2015}' => out.push('-'),
            '\u{201B}' | '\u{2032}' => out.push('\''),
            '\u{201F}' | '\u{2033}' => out.push('"'),
            '\u{00A0}' | '\u{2009}' | '\u{202F}' | '\t' => out.push(' '),
            '\n' => out.push('\n'),
            '\r' => {}
            _ => out.push('?'),
        }
    }
    out
}

/// Greedy word wrap by character count. Explicit newlines are kept and
/// words longer than a line are split.
pub fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut lines = Vec::new();

    for raw_line in text.split('\n') {
        let mut current = String::new();
        for word in raw_line.split_whitespace() {
            let mut word: Vec<char> = word.chars().collect();
            while word.len() > max_chars {
                if !current.is_empty() {
                    lines.push(std::mem::take(&mut current));
                }
                let rest = word.split_off(max_chars);
                lines.push(word.into_iter().collect());
                word = rest;
            }

            let needed = if current.is_empty() {
                word.len()
            } else {
                current.chars().count() + 1 + word.len()
            };
            if needed > max_chars && !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.extend(word);
        }
        lines.push(current);
    }

    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }
    lines
}

fn line_height(size: f32) -> f32 {
    size * PT_TO_MM * LINE_SPACING
}

fn chars_per_line(width_mm: f32, size: f32, em_ratio: f32) -> usize {
    (width_mm / (size * PT_TO_MM * em_ratio)).floor() as usize
}

fn heading_size(level: u8) -> f32 {
    match level {
        1 => 24.0,
        2 => 18.0,
        3 => 15.0,
        4 => 13.0,
        _ => BODY_SIZE,
    }
}

struct Fonts {
    regular: IndirectFontRef,
    bold: IndirectFontRef,
    italic: IndirectFontRef,
    mono: IndirectFontRef,
}

impl Fonts {
    fn load(doc: &PdfDocumentReference) -> Result<Self, AdapterError> {
        let font = |builtin| doc.add_builtin_font(builtin).map_err(AdapterError::pdf);
        Ok(Self {
            regular: font(BuiltinFont::Helvetica)?,
            bold: font(BuiltinFont::HelveticaBold)?,
            italic: font(BuiltinFont::HelveticaOblique)?,
            mono: font(BuiltinFont::Courier)?,
        })
    }
}

/// Write position on the current page. `y` is measured from the bottom
/// edge, as PDF coordinates are.
struct Cursor<'d> {
    doc: &'d PdfDocumentReference,
    page: PdfPageIndex,
    layer: PdfLayerReference,
    y: f32,
    fresh: bool,
    bookmarked: bool,
    pages: usize,
}

impl<'d> Cursor<'d> {
    fn new(doc: &'d PdfDocumentReference, page: PdfPageIndex, layer: PdfLayerIndex) -> Self {
        Self {
            doc,
            page,
            layer: doc.get_page(page).get_layer(layer),
            y: PAGE_HEIGHT - MARGIN,
            fresh: true,
            bookmarked: false,
            pages: 1,
        }
    }

    fn new_page(&mut self) {
        let (page, layer) = self.doc.add_page(Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), LAYER_NAME);
        self.page = page;
        self.layer = self.doc.get_page(page).get_layer(layer);
        self.y = PAGE_HEIGHT - MARGIN;
        self.fresh = true;
        self.bookmarked = false;
        self.pages += 1;
    }

    fn page_break(&mut self) {
        if !self.fresh {
            self.new_page();
        }
    }

    fn reserve(&mut self, height: f32) {
        if !self.fresh && self.y - height < MARGIN {
            self.new_page();
        }
    }

    fn gap(&mut self, height: f32) {
        if !self.fresh {
            self.y -= height;
        }
    }

    fn line(&mut self, text: &str, font: &IndirectFontRef, size: f32, indent: f32) {
        let height = line_height(size);
        self.reserve(height);
        self.y -= height;
        self.layer
            .use_text(text, size, Mm(MARGIN + indent), Mm(self.y), font);
        self.fresh = false;
    }
}

/// Renders the Markdown manuscript to an A4 PDF with built-in fonts. Level 1
/// and 2 headings become bookmarks. Images that cannot be read are replaced
/// by their alt text.
#[derive(Clone, Copy, Debug, Default)]
pub struct MarkdownPdfRenderer;

impl MarkdownPdfRenderer {
    pub fn new() -> Self {
        Self
    }

    /// Returns the number of pages written.
    pub fn render_to_file(
        &self,
        markdown: &str,
        base_dir: &Path,
        title: &str,
        output: &Path,
    ) -> Result<usize, AdapterError> {
        let blocks = parse_blocks(markdown);
        let (doc, page, layer) =
            PdfDocument::new(title, Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), LAYER_NAME);
        let fonts = Fonts::load(&doc)?;

        let mut cursor = Cursor::new(&doc, page, layer);
        for block in &blocks {
            write_block(&mut cursor, &fonts, block, base_dir);
        }
        let pages = cursor.pages;
        debug!(
            "laid out {} blocks on {} pages for `{}`",
            blocks.len(),
            pages,
            output.display()
        );

        let file = File::create(output).map_err(|source| AdapterError::io(output, source))?;
        doc.save(&mut BufWriter::new(file))
            .map_err(AdapterError::pdf)?;
        Ok(pages)
    }
}

impl ManuscriptRenderer for MarkdownPdfRenderer {
    fn render(
        &self,
        markdown: &str,
        base_dir: &Path,
        title: &str,
        output: &Path,
    ) -> Result<(), RenderError> {
        self.render_to_file(markdown, base_dir, title, output)
            .map(|_| ())
            .map_err(RenderError::new)
    }
}

fn write_block(cursor: &mut Cursor<'_>, fonts: &Fonts, block: &Block, base_dir: &Path) {
    let usable = PAGE_WIDTH - 2.0 * MARGIN;
    match block {
        Block::Heading { level, text } => {
            let size = heading_size(*level);
            cursor.gap(line_height(size) * 0.5);
            // keep the heading with at least two lines of what follows
            cursor.reserve(line_height(size) + 2.0 * line_height(BODY_SIZE));
            if *level <= TOC_LEVEL {
                // printpdf keeps one bookmark per page
                if cursor.bookmarked {
                    cursor.new_page();
                }
                cursor.doc.add_bookmark(sanitize(text), cursor.page);
                cursor.bookmarked = true;
            }
            for line in wrap_text(&sanitize(text), chars_per_line(usable, size, 0.55)) {
                cursor.line(&line, &fonts.bold, size, 0.0);
            }
            cursor.gap(line_height(BODY_SIZE) * 0.4);
        }
        Block::Paragraph(text) => {
            for line in wrap_text(&sanitize(text), chars_per_line(usable, BODY_SIZE, 0.5)) {
                cursor.line(&line, &fonts.regular, BODY_SIZE, 0.0);
            }
            cursor.gap(line_height(BODY_SIZE) * 0.6);
        }
        Block::ListItem(text) => {
            let width = usable - QUOTE_INDENT;
            for (n, line) in wrap_text(&sanitize(text), chars_per_line(width, BODY_SIZE, 0.5))
                .into_iter()
                .enumerate()
            {
                let line = if n == 0 { format!("- {line}") } else { format!("  {line}") };
                cursor.line(&line, &fonts.regular, BODY_SIZE, QUOTE_INDENT / 2.0);
            }
        }
        Block::Quote(text) => {
            let width = usable - 2.0 * QUOTE_INDENT;
            for line in wrap_text(&sanitize(text), chars_per_line(width, BODY_SIZE, 0.5)) {
                cursor.line(&line, &fonts.italic, BODY_SIZE, QUOTE_INDENT);
            }
            cursor.gap(line_height(BODY_SIZE) * 0.6);
        }
        Block::Code(code) => {
            for line in wrap_text(&sanitize(code), chars_per_line(usable, CODE_SIZE, 0.6)) {
                cursor.line(&line, &fonts.mono, CODE_SIZE, 0.0);
            }
            cursor.gap(line_height(BODY_SIZE) * 0.6);
        }
        Block::Image { path, alt } => write_image(cursor, fonts, path, alt, base_dir),
        Block::PageBreak => cursor.page_break(),
        Block::Rule => cursor.gap(line_height(BODY_SIZE)),
    }
}

fn resolve_image(path: &str, base_dir: &Path) -> PathBuf {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base_dir.join(candidate)
    }
}

fn load_image(path: &Path) -> Option<DynamicImage> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!("image `{}` unreadable, using alt text: {}", path.display(), err);
            return None;
        }
    };
    match image_crate::load_from_memory(&bytes) {
        Ok(image) => Some(image),
        Err(err) => {
            warn!("image `{}` could not be decoded, using alt text: {}", path.display(), err);
            None
        }
    }
}

fn write_image(cursor: &mut Cursor<'_>, fonts: &Fonts, path: &str, alt: &str, base_dir: &Path) {
    let Some(image) = load_image(&resolve_image(path, base_dir)) else {
        cursor.line(&format!("[{}]", sanitize(alt)), &fonts.italic, BODY_SIZE, 0.0);
        cursor.gap(line_height(BODY_SIZE) * 0.6);
        return;
    };

    let usable_width = PAGE_WIDTH - 2.0 * MARGIN;
    let usable_height = PAGE_HEIGHT - 2.0 * MARGIN;
    let (width_px, height_px) = image.dimensions();
    let natural_width = width_px as f32 / IMAGE_DPI * 25.4;
    let natural_height = height_px as f32 / IMAGE_DPI * 25.4;
    let scale = (usable_width / natural_width)
        .min(usable_height / natural_height)
        .min(1.0);
    let (width, height) = (natural_width * scale, natural_height * scale);

    cursor.reserve(height);
    cursor.y -= height;
    Image::from_dynamic_image(&image).add_to_layer(
        cursor.layer.clone(),
        ImageTransform {
            translate_x: Some(Mm(MARGIN + (usable_width - width) / 2.0)),
            translate_y: Some(Mm(cursor.y)),
            scale_x: Some(scale),
            scale_y: Some(scale),
            dpi: Some(IMAGE_DPI),
            ..Default::default()
        },
    );
    cursor.fresh = false;
    cursor.gap(line_height(BODY_SIZE));
}

#[cfg(test)]
mod tests {
    use super::*;
    use ghostwriter_core::markdown;
    use tempfile::tempdir;

    #[test]
    fn parses_manuscript_blocks_in_order() {
        let manuscript = [
            markdown::image("images/cover.png", "cover"),
            markdown::header("The Listening Soil", 1),
            markdown::quote_block("Even the smallest mind dreams.", "J. Doe"),
            markdown::page_break(),
            markdown::header("Preface", 2),
            "It began in a garden.\nThen it grew.\n\n".to_string(),
        ]
        .concat();

        let blocks = parse_blocks(&manuscript);

        assert_eq!(
            blocks,
            vec![
                Block::Image {
                    path: "images/cover.png".into(),
                    alt: "cover".into()
                },
                Block::Heading {
                    level: 1,
                    text: "The Listening Soil".into()
                },
                Block::Quote("Even the smallest mind dreams.".into()),
                Block::Quote("\u{2014} J. Doe".into()),
                Block::PageBreak,
                Block::Heading {
                    level: 2,
                    text: "Preface".into()
                },
                Block::Paragraph("It began in a garden. Then it grew.".into()),
            ]
        );
    }

    #[test]
    fn outline_stops_at_second_level() {
        let blocks = parse_blocks("# Book\n\n## Act 1: Contact\n\n### Chapter 1: Signals\n\n#### Scene\n");
        assert_eq!(outline(&blocks), vec![(1, "Book"), (2, "Act 1: Contact")]);
    }

    #[test]
    fn wraps_on_words_and_splits_long_ones() {
        assert_eq!(
            wrap_text("the quick brown fox", 9),
            vec!["the quick", "brown fox"]
        );
        assert_eq!(wrap_text("abcdefghij", 4), vec!["abcd", "efgh", "ij"]);
        assert_eq!(wrap_text("one\ntwo", 20), vec!["one", "two"]);
    }

    #[test]
    fn keeps_typographic_punctuation() {
        let text = "\u{2014} \u{201C}hi\u{201D} it\u{2019}s\u{2026}";
        assert_eq!(sanitize(text), text);
        assert_eq!(sanitize("a\u{2212}b\tc"), "a-b c");
    }

    #[test]
    fn keeps_accented_letters_and_replaces_the_rest() {
        let accented = "Caf\u{e9} na\u{ef}ve \u{c5}ngstr\u{f6}m";
        assert_eq!(sanitize(accented), accented);
        assert_eq!(sanitize("\u{152}uvre \u{20AC}5"), "\u{152}uvre \u{20AC}5");
        assert_eq!(sanitize("\u{732B} \u{1F41B}"), "? ?");
    }

    #[test]
    fn outline_headings_sharing_a_page_move_to_a_new_one() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("book.pdf");
        let manuscript = [
            markdown::header("Act 1: Contact", 2),
            markdown::header("Act 2: Silence", 2),
            markdown::header("Chapter 1: Signals", 3),
            "Some prose.\n\n".to_string(),
        ]
        .concat();

        let pages = MarkdownPdfRenderer::new()
            .render_to_file(&manuscript, dir.path(), "book.md", &output)
            .unwrap();

        assert_eq!(pages, 2);
    }

    #[test]
    fn renders_pdf_with_page_breaks_and_missing_images() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("book.pdf");
        let manuscript = [
            markdown::image("images/missing.png", "missing"),
            markdown::header("Title", 1),
            markdown::page_break(),
            markdown::header("Act 1: Contact", 2),
            "Some prose.\n\n".to_string(),
            markdown::page_break(),
            "More prose.\n\n".to_string(),
        ]
        .concat();

        let pages = MarkdownPdfRenderer::new()
            .render_to_file(&manuscript, dir.path(), "book.md", &output)
            .unwrap();

        assert_eq!(pages, 3);
        let bytes = fs::read(&output).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }

    #[test]
    fn embeds_readable_images() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("images")).unwrap();
        let png = dir.path().join("images").join("chapter_01.png");
        DynamicImage::new_rgb8(8, 8).save(&png).unwrap();

        let manuscript = markdown::image("images/chapter_01.png", "chapter 01");
        let output = dir.path().join("book.pdf");
        MarkdownPdfRenderer::new()
            .render(&manuscript, dir.path(), "book.md", &output)
            .unwrap();

        assert!(fs::metadata(&output).unwrap().len() > 0);
    }
}
