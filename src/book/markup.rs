//! Turns plain book text into the markup the reading UI understands.
//!
//! The transform works line by line. Three line-level directives are recognised, in priority
//! order: images (`[IMG=path|width|height]`), explicit page breaks (`[PAGEBREAK]`), and list
//! items (lines starting with `*`). Everything else is grouped into paragraphs.
//!
//! Books that open with [`RAW_MARKER`] on their first line skip this module entirely; the caller
//! checks for that with [`strip_raw_marker`].

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// First-line marker for books that carry their own hand-authored markup.
pub const RAW_MARKER: &str = ";;RAW_HTML;;";

const DEFAULT_IMAGE_WIDTH: u32 = 296;
const DEFAULT_IMAGE_HEIGHT: u32 = 296;

static IMAGE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\[img=([^|\]]+)(?:\|(\d+))?(?:\|(\d+))?\]$").unwrap()
});

/// Paragraph alignment used when generating markup.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum Alignment {
    Left,
    Center,
    Right,
}

impl Alignment {
    fn as_attr(self) -> &'static str {
        match self {
            Alignment::Left => "left",
            Alignment::Center => "center",
            Alignment::Right => "right",
        }
    }
}

impl Default for Alignment {
    fn default() -> Self {
        Alignment::Left
    }
}

/// If `text` starts with the raw-markup marker line, returns everything after that line,
/// untouched. The caller displays that remainder verbatim.
pub fn strip_raw_marker(text: &str) -> Option<&str> {
    let (first, rest) = match text.split_once('\n') {
        Some((first, rest)) => (first, rest),
        None => (text, ""),
    };

    (first.trim() == RAW_MARKER).then_some(rest)
}

fn render_image_line(captures: &regex::Captures) -> String {
    let path = captures[1].trim();

    let width = captures
        .get(2)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(DEFAULT_IMAGE_WIDTH);

    let height = captures
        .get(3)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(DEFAULT_IMAGE_HEIGHT);

    format!("<img src='img://{path}' width='{width}' height='{height}'>\n")
}

/// Renders a chunk of plain text as markup. Pure: font wrapping and raw-marker handling are the
/// caller's job.
pub fn render(plain: &str, alignment: Alignment) -> String {
    if plain.is_empty() {
        return String::new();
    }

    // Books get edited in external editors, so all three line-ending styles turn up.
    let normalized = plain.replace("\r\n", "\n").replace('\r', "\n");

    let mut out = String::new();
    let mut paragraph: Vec<&str> = Vec::new();
    let mut blank_run = 0;
    let mut in_list = false;

    fn flush_paragraph(out: &mut String, paragraph: &mut Vec<&str>, alignment: Alignment) {
        if paragraph.is_empty() {
            return;
        }

        out.push_str(&format!(
            "<p align='{}'>{}</p>\n",
            alignment.as_attr(),
            paragraph.join("<br>\n")
        ));

        paragraph.clear();
    }

    fn close_list(out: &mut String, in_list: &mut bool) {
        if *in_list {
            out.push_str("</ul>\n");
            *in_list = false;
        }
    }

    for line in normalized.lines() {
        let trimmed = line.trim();

        if let Some(captures) = IMAGE_PATTERN.captures(trimmed) {
            flush_paragraph(&mut out, &mut paragraph, alignment);
            close_list(&mut out, &mut in_list);
            out.push_str(&render_image_line(&captures));
            blank_run = 0;
        } else if trimmed.eq_ignore_ascii_case("[pagebreak]") {
            flush_paragraph(&mut out, &mut paragraph, alignment);
            close_list(&mut out, &mut in_list);
            out.push_str("[pagebreak]\n");
            blank_run = 0;
        } else if let Some(item) = trimmed.strip_prefix('*') {
            flush_paragraph(&mut out, &mut paragraph, alignment);

            if !in_list {
                out.push_str("<ul>\n");
                in_list = true;
            }

            out.push_str(&format!("<li>{}</li>\n", item.trim_start()));
            blank_run = 0;
        } else if trimmed.is_empty() {
            // One blank line separates paragraphs; the page-break decision happens when the next
            // text line arrives.
            flush_paragraph(&mut out, &mut paragraph, alignment);
            blank_run += 1;
        } else {
            close_list(&mut out, &mut in_list);

            if blank_run >= 2 {
                out.push_str("[pagebreak]\n");
            }

            blank_run = 0;
            paragraph.push(line);
        }
    }

    flush_paragraph(&mut out, &mut paragraph, alignment);
    close_list(&mut out, &mut in_list);

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render_left(plain: &str) -> String {
        render(plain, Alignment::Left)
    }

    #[test]
    fn single_paragraph_joins_lines_with_breaks() {
        assert_eq!(
            render_left("line one\nline two"),
            "<p align='left'>line one<br>\nline two</p>\n"
        );
    }

    #[test]
    fn one_blank_line_separates_paragraphs_without_pagebreak() {
        let html = render_left("first\n\nsecond");

        assert_eq!(
            html,
            "<p align='left'>first</p>\n<p align='left'>second</p>\n"
        );
    }

    #[test]
    fn two_blank_lines_insert_a_pagebreak() {
        let html = render_left("first\n\n\nsecond");

        assert_eq!(
            html,
            "<p align='left'>first</p>\n[pagebreak]\n<p align='left'>second</p>\n"
        );
    }

    #[test]
    fn explicit_pagebreak_directive() {
        let html = render_left("first\n[PAGEBREAK]\nsecond");

        assert_eq!(
            html,
            "<p align='left'>first</p>\n[pagebreak]\n<p align='left'>second</p>\n"
        );
    }

    #[test]
    fn line_endings_are_normalized() {
        assert_eq!(render_left("a\r\nb"), render_left("a\nb"));
        assert_eq!(render_left("a\rb"), render_left("a\nb"));
    }

    #[test]
    fn image_directive_with_explicit_size() {
        assert_eq!(
            render_left("[IMG=maps/skyrim.png|120|80]"),
            "<img src='img://maps/skyrim.png' width='120' height='80'>\n"
        );
    }

    #[test]
    fn image_directive_uses_default_size() {
        assert_eq!(
            render_left("[IMG=maps/skyrim.png]"),
            "<img src='img://maps/skyrim.png' width='296' height='296'>\n"
        );
    }

    #[test]
    fn image_flushes_the_open_paragraph() {
        let html = render_left("text\n[IMG=pic.png]\nmore");

        assert_eq!(
            html,
            "<p align='left'>text</p>\n\
             <img src='img://pic.png' width='296' height='296'>\n\
             <p align='left'>more</p>\n"
        );
    }

    #[test]
    fn list_items_accumulate_into_one_block() {
        let html = render_left("intro\n* one\n* two\noutro");

        assert_eq!(
            html,
            "<p align='left'>intro</p>\n\
             <ul>\n<li>one</li>\n<li>two</li>\n</ul>\n\
             <p align='left'>outro</p>\n"
        );
    }

    #[test]
    fn open_list_is_closed_at_end_of_input() {
        assert_eq!(render_left("* only item"), "<ul>\n<li>only item</li>\n</ul>\n");
    }

    #[test]
    fn alignment_is_applied() {
        assert_eq!(
            render("hello", Alignment::Center),
            "<p align='center'>hello</p>\n"
        );
    }

    #[test]
    fn empty_input_renders_nothing() {
        assert_eq!(render_left(""), "");
        assert_eq!(render_left("\n\n\n"), "");
    }

    #[test]
    fn paragraph_grouping_is_idempotent() {
        let plain = "one\ntwo\nthree";
        let first = render_left(plain);

        // Strip the generated tags back to plain text, then transform again. The grouping must
        // not change.
        let stripped = first
            .replace("<p align='left'>", "")
            .replace("</p>", "")
            .replace("<br>\n", "\n");
        let second = render_left(stripped.trim_end());

        assert_eq!(first, second);
    }

    #[test]
    fn raw_marker_is_detected_on_first_line_only() {
        assert_eq!(strip_raw_marker(";;RAW_HTML;;\n<b>hi</b>"), Some("<b>hi</b>"));
        assert_eq!(strip_raw_marker(";;RAW_HTML;;"), Some(""));
        assert_eq!(strip_raw_marker("text\n;;RAW_HTML;;"), None);
    }

    #[test]
    fn raw_content_is_untouched() {
        let raw = ";;RAW_HTML;;\n<font face='x'>\r\nkeep\rme\n";
        assert_eq!(strip_raw_marker(raw), Some("<font face='x'>\r\nkeep\rme\n"));
    }
}
