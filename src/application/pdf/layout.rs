//! Single-column text layout for the built-in PDF backend.
//!
//! Markup is flattened into typed blocks, wrapped against base-14 font
//! metrics and distributed over pages. Coordinates are PostScript points with
//! the origin at the bottom-left corner, as PDF expects.

use std::{cell::RefCell, error::Error as StdError, rc::Rc};

use html5ever::{
    tendril::StrTendril,
    tokenizer::{BufferQueue, Token, TokenSink, TokenSinkResult, Tokenizer, TokenizerOpts},
};
use lol_html::{
    RewriteStrSettings, doc_text, element,
    html_content::{Element, EndTag},
    rewrite_str,
};

use super::renderer::{BackendError, FontFamily, RendererConfig};

type HandlerOutcome = Result<(), Box<dyn StdError + Send + Sync>>;

/// Stands in for `<br>` until whitespace has been collapsed.
const HARD_BREAK: char = '\u{2028}';
const MIN_ORPHAN_LINES: usize = 2;
const MIN_WIDOW_LINES: usize = 2;
/// CSS pixels per point.
const PX_TO_PT: f32 = 0.75;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Heading(u8),
    Paragraph,
    ListItem,
    Preformatted,
    TableRow,
    Quote,
    /// `text` carries the alt text, `source` the image reference.
    Image,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub kind: BlockKind,
    pub text: String,
    pub source: Option<String>,
}

impl Block {
    pub fn text(kind: BlockKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            source: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedDocument {
    pub title: Option<String>,
    pub blocks: Vec<Block>,
}

impl ExtractedDocument {
    pub fn image_sources(&self) -> impl Iterator<Item = &str> {
        self.blocks
            .iter()
            .filter(|block| block.kind == BlockKind::Image)
            .filter_map(|block| block.source.as_deref())
    }
}

#[derive(Debug, Default)]
struct Collector {
    blocks: Vec<Block>,
    buffer: String,
    kinds: Vec<BlockKind>,
    lists: Vec<Option<u32>>,
    pending_marker: Option<String>,
    skip_depth: usize,
    title_depth: usize,
    title: String,
}

impl Collector {
    fn kind(&self) -> BlockKind {
        self.kinds.last().copied().unwrap_or(BlockKind::Paragraph)
    }

    fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let raw = std::mem::take(&mut self.buffer);
        let mut kind = self.kind();
        let mut text = match kind {
            BlockKind::Preformatted => clean_preformatted(&raw),
            _ => clean_flow(&raw),
        };
        if text.is_empty() {
            return;
        }
        if let Some(marker) = self.pending_marker.take() {
            text.insert_str(0, &marker);
            if kind == BlockKind::Paragraph {
                kind = BlockKind::ListItem;
            }
        }
        self.blocks.push(Block::text(kind, text));
    }

    fn open(&mut self, kind: BlockKind) {
        self.flush();
        self.kinds.push(kind);
    }

    fn close(&mut self) {
        self.flush();
        if self.kinds.pop() == Some(BlockKind::ListItem) {
            self.pending_marker = None;
        }
    }

    fn text(&mut self, raw: &str) {
        if self.title_depth > 0 {
            self.title.push_str(raw);
        } else if self.skip_depth == 0 {
            self.buffer.push_str(raw);
        }
    }

    fn line_break(&mut self) {
        if self.skip_depth == 0 && self.title_depth == 0 {
            self.buffer.push(HARD_BREAK);
        }
    }

    fn cell_separator(&mut self) {
        if self.buffer.chars().any(|ch| !ch.is_whitespace()) {
            self.buffer.push_str(" | ");
        }
    }

    fn next_list_marker(&mut self) -> String {
        match self.lists.last_mut() {
            Some(Some(counter)) => {
                *counter += 1;
                format!("{counter}. ")
            }
            _ => "- ".to_string(),
        }
    }

    fn image(&mut self, source: Option<String>, alt: &str) {
        if self.skip_depth > 0 || self.title_depth > 0 {
            return;
        }
        match source {
            Some(source) => {
                self.flush();
                self.blocks.push(Block {
                    kind: BlockKind::Image,
                    text: clean_flow(alt),
                    source: Some(source),
                });
            }
            None if !alt.is_empty() => self.buffer.push_str(&format!(" [{alt}] ")),
            None => {}
        }
    }
}

/// Flatten markup into text blocks.
pub fn extract(markup: &str) -> Result<ExtractedDocument, BackendError> {
    let state = Rc::new(RefCell::new(Collector::default()));

    rewrite_str(
        markup,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!("head, script, style, noscript, template", {
                    let state = Rc::clone(&state);
                    move |el| {
                        state.borrow_mut().skip_depth += 1;
                        on_close(&state, el, |collector| {
                            collector.skip_depth = collector.skip_depth.saturating_sub(1);
                        });
                        Ok(())
                    }
                }),
                element!("title", {
                    let state = Rc::clone(&state);
                    move |el| {
                        state.borrow_mut().title_depth += 1;
                        on_close(&state, el, |collector| {
                            collector.title_depth = collector.title_depth.saturating_sub(1);
                        });
                        Ok(())
                    }
                }),
                element!("h1, h2, h3, h4, h5, h6", {
                    let state = Rc::clone(&state);
                    move |el| {
                        let level = el
                            .tag_name()
                            .trim_start_matches(['h', 'H'])
                            .parse::<u8>()
                            .unwrap_or(1);
                        open_block(&state, el, BlockKind::Heading(level))
                    }
                }),
                element!(
                    "p, div, section, article, header, footer, main, aside, nav, figure, figcaption, address, dt, dd, caption",
                    {
                        let state = Rc::clone(&state);
                        move |el| open_block(&state, el, BlockKind::Paragraph)
                    }
                ),
                element!("ul, ol", {
                    let state = Rc::clone(&state);
                    move |el| {
                        let counter = (el.tag_name() == "ol").then_some(0);
                        state.borrow_mut().lists.push(counter);
                        on_close(&state, el, |collector| {
                            collector.lists.pop();
                        });
                        Ok(())
                    }
                }),
                element!("li", {
                    let state = Rc::clone(&state);
                    move |el| {
                        {
                            let mut collector = state.borrow_mut();
                            collector.flush();
                            let marker = collector.next_list_marker();
                            collector.pending_marker = Some(marker);
                        }
                        open_block(&state, el, BlockKind::ListItem)
                    }
                }),
                element!("pre", {
                    let state = Rc::clone(&state);
                    move |el| open_block(&state, el, BlockKind::Preformatted)
                }),
                element!("blockquote", {
                    let state = Rc::clone(&state);
                    move |el| open_block(&state, el, BlockKind::Quote)
                }),
                element!("tr", {
                    let state = Rc::clone(&state);
                    move |el| open_block(&state, el, BlockKind::TableRow)
                }),
                element!("td, th", {
                    let state = Rc::clone(&state);
                    move |_el| {
                        state.borrow_mut().cell_separator();
                        Ok(())
                    }
                }),
                element!("br", {
                    let state = Rc::clone(&state);
                    move |_el| {
                        state.borrow_mut().line_break();
                        Ok(())
                    }
                }),
                element!("hr", {
                    let state = Rc::clone(&state);
                    move |_el| {
                        state.borrow_mut().flush();
                        Ok(())
                    }
                }),
                element!("img", {
                    let state = Rc::clone(&state);
                    move |el| {
                        let alt = el.get_attribute("alt").unwrap_or_default();
                        let source = el
                            .get_attribute("src")
                            .map(|src| src.trim().to_string())
                            .filter(|src| !src.is_empty());
                        state.borrow_mut().image(source, alt.trim());
                        Ok(())
                    }
                }),
            ],
            document_content_handlers: vec![doc_text!({
                let state = Rc::clone(&state);
                move |chunk| {
                    state.borrow_mut().text(chunk.as_str());
                    Ok(())
                }
            })],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|err| BackendError::new(format!("markup could not be read: {err}")))?;

    let mut collector = state.borrow_mut();
    collector.flush();
    let title = clean_flow(&collector.title);

    Ok(ExtractedDocument {
        title: (!title.is_empty()).then_some(title),
        blocks: std::mem::take(&mut collector.blocks),
    })
}

fn open_block(
    state: &Rc<RefCell<Collector>>,
    el: &mut Element<'_, '_>,
    kind: BlockKind,
) -> HandlerOutcome {
    state.borrow_mut().open(kind);
    on_close(state, el, Collector::close);
    Ok(())
}

/// Run `action` when the element's end tag is reached, or right away when the
/// element cannot have one.
fn on_close(
    state: &Rc<RefCell<Collector>>,
    el: &mut Element<'_, '_>,
    action: impl FnOnce(&mut Collector) + 'static,
) {
    let state = Rc::clone(state);
    if let Some(handlers) = el.end_tag_handlers() {
        handlers.push(Box::new(move |_end: &mut EndTag<'_>| {
            action(&mut state.borrow_mut());
            Ok(())
        }));
    } else {
        action(&mut state.borrow_mut());
    }
}

fn clean_flow(raw: &str) -> String {
    let decoded = decode_entities(raw);
    let lines: Vec<String> = decoded
        .split(HARD_BREAK)
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect();
    printable(lines.join("\n").trim_matches('\n'))
}

fn clean_preformatted(raw: &str) -> String {
    let decoded = decode_entities(raw).replace(HARD_BREAK, "\n").replace('\t', "    ");
    let body = decoded.strip_prefix('\n').unwrap_or(&decoded);
    printable(body.trim_end())
}

/// Collects the character tokens of a text fragment.
#[derive(Default)]
struct TextSink {
    text: RefCell<String>,
}

impl TokenSink for TextSink {
    type Handle = ();

    fn process_token(&self, token: Token, _line_number: u64) -> TokenSinkResult<()> {
        if let Token::CharacterTokens(chunk) = token {
            self.text.borrow_mut().push_str(&chunk);
        }
        TokenSinkResult::Continue
    }
}

/// Decode character references with the HTML5 tokenizer, so the whole named
/// entity table applies. Unknown names are kept verbatim.
pub fn decode_entities(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }

    let input = BufferQueue::default();
    input.push_back(StrTendril::from(raw));
    let tokenizer = Tokenizer::new(TextSink::default(), TokenizerOpts::default());
    let _ = tokenizer.feed(&input);
    tokenizer.end();
    tokenizer.sink.text.take()
}

/// Map text onto what the standard PDF fonts can show: typographic
/// punctuation becomes its ASCII lookalike, anything past Latin-1 becomes `?`.
fn printable(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\n' => output.push('\n'),
            '\u{a0}' => output.push(' '),
            '\u{2018}' | '\u{2019}' => output.push('\''),
            '\u{201c}' | '\u{201d}' => output.push('"'),
            '\u{2013}' | '\u{2014}' | '\u{2022}' => output.push('-'),
            '\u{2026}' => output.push_str("..."),
            '\u{2122}' => output.push_str("(TM)"),
            '\u{20ac}' => output.push_str("EUR"),
            ch if ch.is_control() => {}
            ch if (ch as u32) <= 0xff => output.push(ch),
            _ => output.push('?'),
        }
    }
    output
}

/// Helvetica advance widths for printable ASCII, in 1/1000 em.
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '../
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, // 0-9
    278, 278, 584, 584, 584, 556, 1015, // :..@
    667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, // A-M
    722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, // N-Z
    278, 278, 278, 469, 556, 333, // [..`
    556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, // a-m
    556, 556, 556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, // n-z
    334, 260, 334, 584, // {..~
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontRole {
    Regular,
    Bold,
    Monospace,
}

fn glyph_units(ch: char, family: FontFamily) -> f32 {
    match family {
        FontFamily::Courier => 600.0,
        FontFamily::Helvetica | FontFamily::Times => {
            let code = ch as u32;
            let units = if (32..127).contains(&code) {
                f32::from(HELVETICA_WIDTHS[(code - 32) as usize])
            } else {
                556.0
            };
            if family == FontFamily::Times {
                units * 0.92
            } else {
                units
            }
        }
    }
}

/// Advance width of `text` in points.
pub fn text_width(text: &str, family: FontFamily, role: FontRole, size: f32) -> f32 {
    let units: f32 = text.chars().map(|ch| glyph_units(ch, family)).sum();
    let units = if role == FontRole::Bold && family != FontFamily::Courier {
        units * 1.05
    } else {
        units
    };
    units * size / 1000.0
}

struct Measure {
    family: FontFamily,
    role: FontRole,
    size: f32,
}

impl Measure {
    fn width(&self, text: &str) -> f32 {
        text_width(text, self.family, self.role, self.size)
    }
}

fn wrap_flow(text: &str, max_width: f32, measure: &Measure) -> Vec<String> {
    let mut lines = Vec::new();
    for hard_line in text.split('\n') {
        if hard_line.trim().is_empty() {
            lines.push(String::new());
            continue;
        }
        let mut current = String::new();
        for word in hard_line.split(' ').filter(|word| !word.is_empty()) {
            let candidate = if current.is_empty() {
                word.to_string()
            } else {
                format!("{current} {word}")
            };
            if measure.width(&candidate) <= max_width {
                current = candidate;
                continue;
            }
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            if measure.width(word) <= max_width {
                current = word.to_string();
            } else {
                let mut pieces = break_chars(word, max_width, measure);
                current = pieces.pop().unwrap_or_default();
                lines.extend(pieces);
            }
        }
        if !current.is_empty() {
            lines.push(current);
        }
    }
    lines
}

fn wrap_preformatted(text: &str, max_width: f32, measure: &Measure) -> Vec<String> {
    text.split('\n')
        .flat_map(|line| {
            if measure.width(line) <= max_width {
                vec![line.to_string()]
            } else {
                break_chars(line, max_width, measure)
            }
        })
        .collect()
}

fn break_chars(text: &str, max_width: f32, measure: &Measure) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        current.push(ch);
        if measure.width(&current) > max_width && current.chars().count() > 1 {
            current.pop();
            pieces.push(std::mem::replace(&mut current, ch.to_string()));
        }
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

/// What to do with a run of lines that may not fit the current page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakDecision {
    Place,
    MoveToNextPage,
    Split { lines_on_current_page: usize },
}

/// Decide how `line_count` equal-height lines meet the bottom of the page,
/// keeping at least `min_orphan` lines together at the foot of a page and
/// `min_widow` at the head of the next.
pub fn decide_break(
    remaining: f32,
    line_count: usize,
    leading: f32,
    min_orphan: usize,
    min_widow: usize,
) -> BreakDecision {
    let fit = if remaining <= 0.0 || leading <= 0.0 {
        0
    } else {
        ((remaining + 0.001) / leading).floor() as usize
    };

    if fit >= line_count {
        return BreakDecision::Place;
    }
    if fit < min_orphan {
        return BreakDecision::MoveToNextPage;
    }

    let carried = line_count - fit;
    if carried < min_widow {
        let adjusted = fit.saturating_sub(min_widow - carried);
        if adjusted < min_orphan.max(1) {
            return BreakDecision::MoveToNextPage;
        }
        return BreakDecision::Split {
            lines_on_current_page: adjusted,
        };
    }

    BreakDecision::Split {
        lines_on_current_page: fit,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlacedText {
    pub text: String,
    pub role: FontRole,
    pub size: f32,
    pub x: f32,
    pub y: f32,
}

/// An image box; `y` is its bottom edge.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedImage {
    pub source: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageLayout {
    pub body: Vec<PlacedText>,
    pub images: Vec<PlacedImage>,
    pub header: Option<PlacedText>,
    pub footer: Option<PlacedText>,
}

impl PageLayout {
    pub fn items(&self) -> impl Iterator<Item = &PlacedText> {
        self.header.iter().chain(self.body.iter()).chain(self.footer.iter())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentLayout {
    pub title: Option<String>,
    pub pages: Vec<PageLayout>,
}

struct BlockStyle {
    role: FontRole,
    size: f32,
    indent: f32,
    space_before: f32,
    space_after: f32,
    keep_with_next: bool,
}

fn block_style(kind: BlockKind, config: &RendererConfig) -> BlockStyle {
    let body = config.body_font_size;
    match kind {
        BlockKind::Heading(level) => {
            let scale = match level {
                1 => 1.8,
                2 => 1.5,
                3 => 1.3,
                4 => 1.15,
                _ => 1.0,
            };
            BlockStyle {
                role: FontRole::Bold,
                size: body * scale,
                indent: 0.0,
                space_before: body * 0.8,
                space_after: body * 0.4,
                keep_with_next: true,
            }
        }
        BlockKind::Preformatted => BlockStyle {
            role: FontRole::Monospace,
            size: body * 0.9,
            indent: 0.0,
            space_before: 0.0,
            space_after: body * 0.6,
            keep_with_next: false,
        },
        BlockKind::ListItem => BlockStyle {
            role: FontRole::Regular,
            size: body,
            indent: body * 1.5,
            space_before: 0.0,
            space_after: body * 0.25,
            keep_with_next: false,
        },
        BlockKind::Quote => BlockStyle {
            role: FontRole::Regular,
            size: body,
            indent: body * 2.0,
            space_before: 0.0,
            space_after: body * 0.6,
            keep_with_next: false,
        },
        BlockKind::Paragraph | BlockKind::TableRow | BlockKind::Image => BlockStyle {
            role: FontRole::Regular,
            size: body,
            indent: 0.0,
            space_before: 0.0,
            space_after: body * 0.6,
            keep_with_next: false,
        },
    }
}

fn family_for(role: FontRole, config: &RendererConfig) -> FontFamily {
    match role {
        FontRole::Monospace => config.monospace_font,
        FontRole::Regular | FontRole::Bold => config.body_font,
    }
}

struct Paginator<'a> {
    config: &'a RendererConfig,
    pages: Vec<PageLayout>,
    top: f32,
    bottom: f32,
    cursor: f32,
}

impl<'a> Paginator<'a> {
    fn new(config: &'a RendererConfig) -> Self {
        let (_, page_height) = config.page_dimensions();
        let top = page_height - config.margins.top - config.header_reserve();
        Self {
            config,
            pages: vec![PageLayout::default()],
            top,
            bottom: config.margins.bottom,
            cursor: top,
        }
    }

    fn page_is_empty(&self) -> bool {
        self.pages
            .last()
            .is_none_or(|page| page.body.is_empty() && page.images.is_empty())
    }

    fn remaining(&self) -> f32 {
        self.cursor - self.bottom
    }

    fn new_page(&mut self) {
        self.pages.push(PageLayout::default());
        self.cursor = self.top;
    }

    fn place(&mut self, text: String, style: &BlockStyle, leading: f32) {
        let item = PlacedText {
            text,
            role: style.role,
            size: style.size,
            x: self.config.margins.left + style.indent,
            y: self.cursor - style.size,
        };
        self.cursor -= leading;
        if let Some(page) = self.pages.last_mut() {
            page.body.push(item);
        }
    }

    fn place_image(&mut self, image: &SizedImage) {
        if self.config.auto_page_break && self.remaining() < image.height && !self.page_is_empty()
        {
            self.new_page();
        }
        let item = PlacedImage {
            source: image.source.clone(),
            x: self.config.margins.left,
            y: self.cursor - image.height,
            width: image.width,
            height: image.height,
        };
        self.cursor -= image.height;
        if let Some(page) = self.pages.last_mut() {
            page.images.push(item);
        }
    }

    fn place_lines(&mut self, lines: &[String], style: &BlockStyle, leading: f32) {
        let mut pending = lines;
        while !pending.is_empty() {
            let decision = if self.config.auto_page_break {
                decide_break(
                    self.remaining(),
                    pending.len(),
                    leading,
                    MIN_ORPHAN_LINES.min(pending.len()),
                    MIN_WIDOW_LINES,
                )
            } else {
                BreakDecision::Place
            };

            let take = match decision {
                BreakDecision::Place => pending.len(),
                BreakDecision::Split {
                    lines_on_current_page,
                } => lines_on_current_page,
                BreakDecision::MoveToNextPage if self.page_is_empty() => {
                    // Not even a fresh page holds the minimum; fill what fits.
                    let fit = (self.remaining() / leading).floor().max(1.0) as usize;
                    fit.min(pending.len())
                }
                BreakDecision::MoveToNextPage => {
                    self.new_page();
                    continue;
                }
            };

            for line in &pending[..take] {
                self.place(line.clone(), style, leading);
            }
            pending = &pending[take..];
            if !pending.is_empty() {
                self.new_page();
            }
        }
    }

    fn finish(mut self, title: Option<&str>) -> Vec<PageLayout> {
        let config = self.config;
        let (page_width, page_height) = config.page_dimensions();
        let total = self.pages.len();
        for (index, page) in self.pages.iter_mut().enumerate() {
            if config.header_block {
                page.header = Some(PlacedText {
                    text: title.unwrap_or_default().to_string(),
                    role: FontRole::Bold,
                    size: config.header_font_size,
                    x: config.margins.left,
                    y: page_height - config.margins.top - config.header_font_size,
                });
            }
            let label = format!("Page {} of {}", index + 1, total);
            let width = text_width(
                &label,
                config.body_font,
                FontRole::Regular,
                config.footer_font_size,
            );
            page.footer = Some(PlacedText {
                x: (page_width - config.margins.right - width).max(config.margins.left),
                y: (config.footer_margin - config.footer_font_size).max(0.0),
                text: label,
                role: FontRole::Regular,
                size: config.footer_font_size,
            });
        }
        self.pages
    }
}

struct SizedImage {
    source: String,
    width: f32,
    height: f32,
}

enum Flow {
    Text {
        style: BlockStyle,
        lines: Vec<String>,
    },
    Image(SizedImage),
}

impl Flow {
    fn text(kind: BlockKind, text: &str, config: &RendererConfig, max_width: f32) -> Self {
        let style = block_style(kind, config);
        let measure = Measure {
            family: family_for(style.role, config),
            role: style.role,
            size: style.size,
        };
        let width = (max_width - style.indent).max(style.size);
        let lines = match kind {
            BlockKind::Preformatted => wrap_preformatted(text, width, &measure),
            _ => wrap_flow(text, width, &measure),
        };
        Flow::Text { style, lines }
    }

    /// Height the head of this flow needs to stay on the page it starts on.
    fn lead_height(&self, config: &RendererConfig) -> f32 {
        match self {
            Flow::Text { style, lines } => {
                let count = if lines.len() < MIN_ORPHAN_LINES + MIN_WIDOW_LINES {
                    lines.len()
                } else {
                    MIN_ORPHAN_LINES
                };
                style.space_before + style.size * config.line_height * count as f32
            }
            Flow::Image(image) => image.height,
        }
    }
}

/// Intrinsic pixel size in points, shrunk to the body box with the aspect
/// ratio kept.
fn fit_image((px_width, px_height): (u32, u32), max_width: f32, max_height: f32) -> (f32, f32) {
    let width = px_width.max(1) as f32 * PX_TO_PT;
    let height = px_height.max(1) as f32 * PX_TO_PT;
    let scale = (max_width / width).min(max_height / height).min(1.0);
    (width * scale, height * scale)
}

/// Distribute blocks over pages with every image left as its alt text.
pub fn paginate(document: &ExtractedDocument, config: &RendererConfig) -> DocumentLayout {
    paginate_with_images(document, config, |_| None)
}

/// Distribute blocks over pages. Always yields at least one page.
///
/// `image_size` reports the pixel size of each image the backend could load;
/// the others are set as their alt text, or dropped when they have none.
pub fn paginate_with_images(
    document: &ExtractedDocument,
    config: &RendererConfig,
    image_size: impl Fn(&str) -> Option<(u32, u32)>,
) -> DocumentLayout {
    let mut paginator = Paginator::new(config);
    let max_width = config.content_width();
    let max_height = config.body_height().max(1.0);
    let image_gap = config.body_font_size * 0.6;

    let flows: Vec<Flow> = document
        .blocks
        .iter()
        .filter_map(|block| {
            if block.kind != BlockKind::Image {
                return Some(Flow::text(block.kind, &block.text, config, max_width));
            }
            if let Some(source) = block.source.as_deref()
                && let Some(size) = image_size(source)
            {
                let (width, height) = fit_image(size, max_width, max_height);
                return Some(Flow::Image(SizedImage {
                    source: source.to_string(),
                    width,
                    height,
                }));
            }
            (!block.text.is_empty()).then(|| {
                Flow::text(BlockKind::Image, &format!("[{}]", block.text), config, max_width)
            })
        })
        .collect();

    for (index, flow) in flows.iter().enumerate() {
        let (style, lines) = match flow {
            Flow::Image(image) => {
                paginator.place_image(image);
                paginator.cursor -= image_gap;
                continue;
            }
            Flow::Text { style, lines } => (style, lines),
        };
        if lines.is_empty() {
            continue;
        }
        let leading = style.size * config.line_height;

        if !paginator.page_is_empty() {
            paginator.cursor -= style.space_before;
        }

        if style.keep_with_next && config.auto_page_break && !paginator.page_is_empty() {
            // The heading must land together with enough of the next block
            // that the block itself will not be pushed to the next page.
            let following = flows
                .get(index + 1)
                .map(|next| next.lead_height(config))
                .unwrap_or(0.0);
            let needed = leading * lines.len() as f32 + style.space_after + following;
            if paginator.remaining() < needed {
                paginator.new_page();
            }
        }

        paginator.place_lines(lines, style, leading);
        paginator.cursor -= style.space_after;
    }

    let pages = paginator.finish(document.title.as_deref());
    DocumentLayout {
        title: document.title.clone(),
        pages,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(document: &ExtractedDocument) -> Vec<BlockKind> {
        document.blocks.iter().map(|block| block.kind).collect()
    }

    #[test]
    fn extracts_typed_blocks() {
        let markup = concat!(
            "<html><head><title>Annual &amp; Report</title>",
            "<style>p { color: red }</style><script>var x = '<p>no</p>';</script></head>",
            "<body><h2>Intro</h2><p>First   paragraph\n spread out.</p>",
            "<ul><li>one</li><li>two</li></ul>",
            "<ol><li>alpha</li><li>beta</li></ol>",
            "<pre>\nfn main() {\n    run();\n}\n</pre>",
            "<table><tr><th>Key</th><th>Value</th></tr></table>",
            "</body></html>",
        );
        let document = extract(markup).expect("extract");

        assert_eq!(document.title.as_deref(), Some("Annual & Report"));
        assert_eq!(
            kinds(&document),
            vec![
                BlockKind::Heading(2),
                BlockKind::Paragraph,
                BlockKind::ListItem,
                BlockKind::ListItem,
                BlockKind::ListItem,
                BlockKind::ListItem,
                BlockKind::Preformatted,
                BlockKind::TableRow,
            ]
        );
        let texts: Vec<&str> = document.blocks.iter().map(|b| b.text.as_str()).collect();
        assert_eq!(texts[1], "First paragraph spread out.");
        assert_eq!(texts[2], "- one");
        assert_eq!(texts[5], "2. beta");
        assert_eq!(texts[6], "fn main() {\n    run();\n}");
        assert_eq!(texts[7], "Key | Value");
    }

    #[test]
    fn line_breaks_survive_and_images_split_the_paragraph() {
        let document =
            extract(r#"<p>Line one<br>Line two <img src="x.png" alt=" Chart "> end</p>"#)
                .expect("extract");
        assert_eq!(
            document.blocks,
            vec![
                Block::text(BlockKind::Paragraph, "Line one\nLine two"),
                Block {
                    kind: BlockKind::Image,
                    text: "Chart".into(),
                    source: Some("x.png".into()),
                },
                Block::text(BlockKind::Paragraph, "end"),
            ]
        );
        assert_eq!(document.image_sources().collect::<Vec<_>>(), vec!["x.png"]);
    }

    #[test]
    fn image_without_source_keeps_its_alt_inline() {
        let document = extract(r#"<p>see <img alt="Chart"> here</p>"#).expect("extract");
        assert_eq!(document.blocks.len(), 1);
        assert_eq!(document.blocks[0].text, "see [Chart] here");
    }

    #[test]
    fn loaded_images_are_placed_and_scaled_to_the_body() {
        let config = RendererConfig::default();
        let document = extract(concat!(
            r#"<p>intro</p><img src="wide.png" alt="Wide">"#,
            r#"<img src="missing.png" alt="Gone"><img src="bare.png">"#,
        ))
        .expect("extract");

        let layout = paginate_with_images(&document, &config, |source| {
            (source == "wide.png").then_some((4000, 1000))
        });

        let page = &layout.pages[0];
        assert_eq!(page.images.len(), 1);
        let image = &page.images[0];
        assert_eq!(image.source, "wide.png");
        assert!((image.width - config.content_width()).abs() < 1e-3);
        assert!((image.width / image.height - 4.0).abs() < 1e-3);
        assert_eq!(image.x, config.margins.left);

        let texts: Vec<&str> = page.body.iter().map(|item| item.text.as_str()).collect();
        assert_eq!(texts, vec!["intro", "[Gone]"]);
        assert!(page.body[1].y < image.y);
    }

    #[test]
    fn tall_images_fit_on_a_page_of_their_own() {
        let config = RendererConfig::default();
        let document = extract(r#"<p>before</p><img src="tall.png">"#).expect("extract");

        let layout = paginate_with_images(&document, &config, |_| Some((500, 20_000)));

        assert_eq!(layout.pages.len(), 2);
        let image = &layout.pages[1].images[0];
        assert!(image.y >= config.margins.bottom - 0.01);
        assert!(image.width < 500.0 * PX_TO_PT);
    }

    #[test]
    fn bare_text_becomes_a_paragraph() {
        let document = extract("Hello &lt;world&gt; &#8212; &#x41;").expect("extract");
        assert_eq!(document.blocks.len(), 1);
        assert_eq!(document.blocks[0].text, "Hello <world> - A");
        assert!(document.title.is_none());
    }

    #[test]
    fn list_item_with_nested_paragraph_keeps_marker() {
        let document = extract("<ul><li><p>nested</p></li></ul>").expect("extract");
        assert_eq!(document.blocks.len(), 1);
        assert_eq!(document.blocks[0].kind, BlockKind::ListItem);
        assert_eq!(document.blocks[0].text, "- nested");
    }

    #[test]
    fn entity_decoding_keeps_unknown_references() {
        assert_eq!(decode_entities("a &bogus; b"), "a &bogus; b");
        assert_eq!(decode_entities("&quot;x&quot;"), "\"x\"");
        assert_eq!(decode_entities("&#233;"), "\u{e9}");
        assert_eq!(decode_entities("AT&T"), "AT&T");
    }

    #[test]
    fn named_entities_use_the_full_html_table() {
        let document =
            extract("<p>caf&eacute; M&uuml;ller &sect;3 &frac12; &Omega;</p>").expect("extract");
        assert_eq!(document.blocks.len(), 1);
        assert_eq!(
            document.blocks[0].text,
            "caf\u{e9} M\u{fc}ller \u{a7}3 \u{bd} ?"
        );
        assert_eq!(decode_entities("&frac12;&nbsp;&eacute;"), "\u{bd}\u{a0}\u{e9}");
    }

    #[test]
    fn printable_replaces_unsupported_characters() {
        assert_eq!(printable("\u{201c}ok\u{201d} \u{2026} \u{4e2d}"), "\"ok\" ... ?");
        assert_eq!(printable("caf\u{e9}"), "caf\u{e9}");
    }

    #[test]
    fn widths_follow_font_metrics() {
        let helvetica = text_width("Wi", FontFamily::Helvetica, FontRole::Regular, 10.0);
        assert!((helvetica - (944.0 + 222.0) / 100.0).abs() < 1e-3);
        let courier = text_width("Wi", FontFamily::Courier, FontRole::Regular, 10.0);
        assert!((courier - 12.0).abs() < 1e-3);
    }

    #[test]
    fn wrapping_respects_the_measure() {
        let measure = Measure {
            family: FontFamily::Helvetica,
            role: FontRole::Regular,
            size: 10.0,
        };
        let text = "the quick brown fox jumps over the lazy dog ".repeat(20);
        let lines = wrap_flow(text.trim(), 200.0, &measure);
        assert!(lines.len() > 5);
        for line in &lines {
            assert!(measure.width(line) <= 200.0, "`{line}` overflows");
        }

        let long = "x".repeat(400);
        let pieces = wrap_flow(&long, 100.0, &measure);
        assert!(pieces.len() > 1);
        assert_eq!(pieces.concat(), long);
    }

    #[test]
    fn break_decisions() {
        assert_eq!(decide_break(100.0, 3, 20.0, 2, 2), BreakDecision::Place);
        assert_eq!(decide_break(25.0, 3, 20.0, 2, 2), BreakDecision::MoveToNextPage);
        assert_eq!(
            decide_break(65.0, 4, 20.0, 2, 2),
            BreakDecision::Split {
                lines_on_current_page: 2
            }
        );
        assert_eq!(
            decide_break(100.0, 8, 20.0, 2, 2),
            BreakDecision::Split {
                lines_on_current_page: 5
            }
        );
    }

    #[test]
    fn empty_document_still_has_one_page() {
        let layout = paginate(&ExtractedDocument::default(), &RendererConfig::default());
        assert_eq!(layout.pages.len(), 1);
        let footer = layout.pages[0].footer.as_ref().expect("footer");
        assert_eq!(footer.text, "Page 1 of 1");
    }

    #[test]
    fn long_documents_flow_onto_numbered_pages() {
        let config = RendererConfig::default();
        let mut document = ExtractedDocument::default();
        for index in 0..60 {
            document
                .blocks
                .push(Block::text(BlockKind::Heading(2), format!("Section {index}")));
            document.blocks.push(Block::text(
                BlockKind::Paragraph,
                "Lorem ipsum dolor sit amet, consectetur adipiscing elit. ".repeat(6),
            ));
        }

        let layout = paginate(&document, &config);
        let total = layout.pages.len();
        assert!(total > 2);

        for (index, page) in layout.pages.iter().enumerate() {
            let footer = page.footer.as_ref().expect("footer");
            assert_eq!(footer.text, format!("Page {} of {}", index + 1, total));
            assert!(page.header.is_none());
            for item in &page.body {
                assert!(item.y >= config.margins.bottom - 0.01, "{item:?} below margin");
            }
            let last = page.body.last().expect("page has content");
            assert_ne!(last.role, FontRole::Bold, "page {} ends on a heading", index + 1);
        }
    }

    #[test]
    fn header_block_repeats_title() {
        let config = RendererConfig {
            header_block: true,
            ..RendererConfig::default()
        };
        let document = ExtractedDocument {
            title: Some("Quarterly".into()),
            blocks: vec![Block::text(BlockKind::Paragraph, "body")],
        };
        let layout = paginate(&document, &config);
        let header = layout.pages[0].header.as_ref().expect("header");
        assert_eq!(header.text, "Quarterly");
        assert!(layout.pages[0].body[0].y < header.y);
    }
}
