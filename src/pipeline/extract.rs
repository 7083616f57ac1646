//! Page text extraction: OCR'd single-page PDF → Markdown fragment.
//!
//! Two layers, tried in order:
//!
//! 1. **Primary**: the page's plain text reflowed into Markdown paragraphs
//!    and lists. Accepted when it passes [`passes_quality_check`].
//! 2. **Layout fallback**: positioned text spans grouped into lines. A line
//!    whose spans are separated by a horizontal gap wider than
//!    [`COLUMN_GAP_PT`] becomes a pipe-delimited table row; every other line
//!    is prose. The layout output only replaces the primary text when the
//!    share of row lines stays at or below [`MAX_TABLE_LINE_RATIO`]; above it
//!    the page is more likely scattered OCR debris than a table, so the
//!    primary text is kept. The same lines are emitted as prose only when
//!    there is no primary text at all.
//!
//! A page with no text yields an empty fragment. Only when *both* layers
//! error out (the page cannot be read at all) is [`PageError::ExtractionFailed`]
//! returned.

use crate::error::PageError;
use crate::pipeline::pdf::{PdfBackend, TextSpan};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

/// Minimum horizontal gap, in points, that separates two table cells.
pub const COLUMN_GAP_PT: f32 = 20.0;

/// Spans whose vertical centres differ by at most this much share a line.
pub const LINE_TOLERANCE_PT: f32 = 3.0;

/// Highest fraction of table-row lines for which the table rendering is kept.
pub const MAX_TABLE_LINE_RATIO: f32 = 0.6;

/// Highest fraction of replacement/control characters in acceptable text.
pub const MAX_GARBAGE_RATIO: f32 = 0.1;

/// Extract the Markdown fragment for one OCR'd page.
pub async fn extract_page(
    pdf: &[u8],
    page_num: usize,
    backend: &dyn PdfBackend,
) -> Result<String, PageError> {
    let primary = backend.page_text(pdf).await;
    let primary_md = match &primary {
        Ok(text) => {
            let md = text_to_markdown(text);
            if passes_quality_check(&md) {
                return Ok(md);
            }
            debug!("Page {}: primary text failed the quality check", page_num);
            Some(md)
        }
        Err(e) => {
            warn!("Page {}: primary extraction failed: {}", page_num, e);
            None
        }
    };

    match backend.text_spans(pdf).await {
        Ok(spans) => {
            let lines = group_lines(&spans);
            if lines.is_empty() {
                return Ok(primary_md.unwrap_or_default());
            }
            debug!(
                "Page {}: layout fallback over {} lines",
                page_num,
                lines.len()
            );
            if let Some(md) = render_table(&lines) {
                return Ok(md);
            }
            Ok(primary_md.unwrap_or_else(|| render_prose(&lines)))
        }
        Err(fallback_err) => match (primary_md, primary) {
            (Some(md), _) => Ok(md),
            (None, Err(primary_err)) => Err(PageError::ExtractionFailed {
                page: page_num,
                detail: format!("primary: {}; layout fallback: {}", primary_err, fallback_err),
            }),
            (None, Ok(_)) => Ok(String::new()),
        },
    }
}

// ── Primary: plain text → Markdown ──────────────────────────────────────────

static RE_BULLET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*[•·◦▪‣\-*]\s+(.*)$").unwrap());
static RE_NUMBERED: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*\d{1,3}[.)]\s+\S").unwrap());

/// Reflow plain page text into Markdown.
///
/// Blank lines separate paragraphs, wrapped lines are joined (undoing
/// end-of-line hyphenation), and bullet or numbered lines stay on their own
/// line as list items.
pub fn text_to_markdown(text: &str) -> String {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut blocks: Vec<String> = Vec::new();
    let mut paragraph = String::new();

    let flush = |paragraph: &mut String, blocks: &mut Vec<String>| {
        if !paragraph.is_empty() {
            blocks.push(std::mem::take(paragraph));
        }
    };

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() {
            flush(&mut paragraph, &mut blocks);
            continue;
        }
        if let Some(caps) = RE_BULLET.captures(line) {
            flush(&mut paragraph, &mut blocks);
            blocks.push(format!("- {}", caps[1].trim()));
            continue;
        }
        if RE_NUMBERED.is_match(line) {
            flush(&mut paragraph, &mut blocks);
            blocks.push(line.to_string());
            continue;
        }
        if paragraph.is_empty() {
            paragraph.push_str(line);
        } else if paragraph.ends_with('-') && !paragraph.ends_with(" -") {
            paragraph.pop();
            paragraph.push_str(line);
        } else {
            paragraph.push(' ');
            paragraph.push_str(line);
        }
    }
    flush(&mut paragraph, &mut blocks);

    // Consecutive list items stay tight; everything else gets a blank line.
    let mut out = String::new();
    for (i, block) in blocks.iter().enumerate() {
        if i > 0 {
            let tight = is_list_item(block) && is_list_item(&blocks[i - 1]);
            out.push_str(if tight { "\n" } else { "\n\n" });
        }
        out.push_str(block);
    }
    out
}

fn is_list_item(block: &str) -> bool {
    block.starts_with("- ") || RE_NUMBERED.is_match(block)
}

/// Non-empty, and at most [`MAX_GARBAGE_RATIO`] of the visible characters are
/// U+FFFD or control characters.
pub fn passes_quality_check(markdown: &str) -> bool {
    let mut visible = 0usize;
    let mut garbage = 0usize;
    for ch in markdown.chars().filter(|c| !c.is_whitespace()) {
        visible += 1;
        if ch == '\u{FFFD}' || ch.is_control() {
            garbage += 1;
        }
    }
    visible > 0 && (garbage as f32 / visible as f32) <= MAX_GARBAGE_RATIO
}

// ── Fallback: span layout → table rows / prose ──────────────────────────────

/// One visual line: its cells left to right. More than one cell means the
/// line had a column-sized gap somewhere.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutLine {
    pub cells: Vec<String>,
}

impl LayoutLine {
    pub fn is_table_row(&self) -> bool {
        self.cells.len() > 1
    }
}

/// Group spans into lines (top to bottom) and lines into cells.
pub fn group_lines(spans: &[TextSpan]) -> Vec<LayoutLine> {
    let mut sorted: Vec<&TextSpan> = spans.iter().filter(|s| !s.text.trim().is_empty()).collect();
    sorted.sort_by(|a, b| {
        a.center_y()
            .partial_cmp(&b.center_y())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(
                a.left
                    .partial_cmp(&b.left)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
    });

    let mut rows: Vec<Vec<&TextSpan>> = Vec::new();
    for span in sorted {
        match rows.last_mut() {
            Some(row)
                if row
                    .first()
                    .is_some_and(|first| (span.center_y() - first.center_y()).abs() <= LINE_TOLERANCE_PT) =>
            {
                row.push(span)
            }
            _ => rows.push(vec![span]),
        }
    }

    rows.into_iter()
        .map(|mut row| {
            row.sort_by(|a, b| a.left.partial_cmp(&b.left).unwrap_or(std::cmp::Ordering::Equal));
            let mut cells: Vec<String> = Vec::new();
            let mut prev_right: Option<f32> = None;
            for span in row {
                let text = span.text.trim();
                match (prev_right, cells.last_mut()) {
                    (Some(right), Some(cell)) if span.left - right <= COLUMN_GAP_PT => {
                        if span.left - right > 0.5 {
                            cell.push(' ');
                        }
                        cell.push_str(text);
                    }
                    _ => cells.push(text.to_string()),
                }
                prev_right = Some(prev_right.map_or(span.right, |r| r.max(span.right)));
            }
            LayoutLine { cells }
        })
        .collect()
}

/// Fraction of lines that would be rendered as table rows.
pub fn table_line_ratio(lines: &[LayoutLine]) -> f32 {
    if lines.is_empty() {
        return 0.0;
    }
    lines.iter().filter(|l| l.is_table_row()).count() as f32 / lines.len() as f32
}

/// Render lines as Markdown with table rows, or `None` when the share of row
/// lines is above [`MAX_TABLE_LINE_RATIO`].
pub fn render_table(lines: &[LayoutLine]) -> Option<String> {
    let ratio = table_line_ratio(lines);
    if ratio > MAX_TABLE_LINE_RATIO {
        debug!(
            "Table ratio {:.2} above {:.2}, layout rejected",
            ratio, MAX_TABLE_LINE_RATIO
        );
        return None;
    }

    let mut out: Vec<String> = Vec::with_capacity(lines.len() + 4);
    let mut in_table = false;
    for line in lines {
        if line.is_table_row() {
            if !in_table && !out.is_empty() {
                out.push(String::new());
            }
            out.push(table_row(&line.cells));
            if !in_table {
                out.push(separator_row(line.cells.len()));
            }
            in_table = true;
        } else {
            if in_table {
                out.push(String::new());
            }
            out.push(line.cells.join(" "));
            in_table = false;
        }
    }
    Some(out.join("\n"))
}

/// Render lines as plain prose, cells joined by spaces.
pub fn render_prose(lines: &[LayoutLine]) -> String {
    lines
        .iter()
        .map(|l| l.cells.join(" "))
        .collect::<Vec<_>>()
        .join("\n")
}

fn table_row(cells: &[String]) -> String {
    let escaped: Vec<String> = cells.iter().map(|c| c.replace('|', "\\|")).collect();
    format!("| {} |", escaped.join(" | "))
}

fn separator_row(columns: usize) -> String {
    let mut row = String::from("|");
    for _ in 0..columns {
        row.push_str(" --- |");
    }
    row
}
