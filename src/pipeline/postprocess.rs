//! Post-processing: deterministic cleanup of the assembled document Markdown.
//!
//! Page fragments come from two very different extractors (reflowed plain
//! text and the span-layout table heuristic) and are glued together with
//! page markers. The result is structurally noisy in predictable ways:
//! Windows line endings from the PDF text layer, runs of blank lines where a
//! page was empty, headings jammed against the previous paragraph, and table
//! runs split across fragments that end up with too few or too many
//! separator rows. The rules here fix those without touching content.
//!
//! ## Rule Order
//!
//! Line endings are normalised before trimming, blank lines are collapsed
//! before heading spacing re-inserts exactly one, and tables are repaired
//! before the optional ASCII filter so the filter never sees a half-built
//! separator row.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all cleanup rules to an assembled document.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF → LF)
/// 2. Trim trailing whitespace per line
/// 3. Collapse 3+ consecutive newlines down to one blank line
/// 4. Ensure heading lines have a blank line before them
/// 5. Add a separator row to tables that lack one
/// 6. Remove spurious mid-table separator rows
/// 7. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens, etc.)
/// 8. Optionally drop every non-ASCII character
/// 9. Ensure the text ends with exactly one newline
pub fn clean_markdown(input: &str, strip_non_ascii: bool) -> String {
    let s = normalise_line_endings(input);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = normalise_heading_spacing(&s);
    let s = fix_broken_tables(&s);
    let s = remove_mid_table_separators(&s);
    let s = remove_invisible_chars(&s);
    let s = if strip_non_ascii {
        remove_non_ascii(&s)
    } else {
        s
    };
    ensure_final_newline(&s)
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 3: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

// ── Rule 4: Normalise heading spacing ────────────────────────────────────────

static RE_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#{1,6} \S").unwrap());

fn normalise_heading_spacing(input: &str) -> String {
    let mut result = String::with_capacity(input.len() + 64);
    for (i, line) in input.lines().enumerate() {
        if RE_HEADING.is_match(line) && i > 0 {
            let trimmed = result.trim_end_matches('\n');
            result.truncate(trimmed.len());
            result.push_str("\n\n");
        }
        result.push_str(line);
        result.push('\n');
    }
    result
}

// ── Rule 5: Fix broken GFM tables ───────────────────────────────────────────

/// Insert a separator after the first row of any table block that has none
/// in second position.
fn fix_broken_tables(input: &str) -> String {
    let lines: Vec<&str> = input.lines().collect();
    let mut result: Vec<String> = Vec::with_capacity(lines.len() + 10);
    let mut prev_is_row = false;

    for (i, line) in lines.iter().enumerate() {
        let row = is_table_row(line);
        result.push(line.to_string());
        if row && !prev_is_row && !is_separator_row(line) {
            let next = lines.get(i + 1).copied().unwrap_or("");
            if !is_separator_row(next) {
                let col_count = line.matches('|').count().saturating_sub(1).max(1);
                let sep: String = std::iter::once("|")
                    .chain(std::iter::repeat_n(" --- |", col_count))
                    .collect();
                result.push(sep);
            }
        }
        prev_is_row = row;
    }

    result.join("\n")
}

fn is_table_row(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with('|') && trimmed.ends_with('|') && trimmed.len() > 2
}

fn is_separator_row(line: &str) -> bool {
    let trimmed = line.trim();
    if !trimmed.starts_with('|') || !trimmed.contains('-') {
        return false;
    }
    trimmed
        .chars()
        .all(|c| c == '|' || c == '-' || c == ':' || c == ' ')
}

// ── Rule 6: Remove spurious mid-table separator rows ────────────────────────
//
// GFM only allows a separator in position 2 of a table block. Fragments that
// each opened their own table run leave extra separators in the body.

fn remove_mid_table_separators(input: &str) -> String {
    let mut result: Vec<&str> = Vec::new();
    let mut table_line_count = 0usize;

    for line in input.lines() {
        if is_table_row(line) {
            table_line_count += 1;
            if is_separator_row(line) && table_line_count != 2 {
                continue;
            }
        } else {
            table_line_count = 0;
        }
        result.push(line);
    }

    result.join("\n")
}

// ── Rule 7: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 8: Optional ASCII-only output ──────────────────────────────────────

fn remove_non_ascii(input: &str) -> String {
    input.chars().filter(|c| c.is_ascii()).collect()
}

// ── Rule 9: Ensure file ends with single newline ─────────────────────────────

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_end();
    if trimmed.is_empty() {
        String::from("\n")
    } else {
        format!("{}\n", trimmed)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
