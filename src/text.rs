//! Plain-text rendering of rich-text post bodies.
//!
//! Search refinement, excerpts and the backup report all read post content
//! through [`strip_markup`] / [`element_text`] so they agree on what a
//! "word" in the content is.

use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use scraper::node::Node;
use scraper::{ElementRef, Html};

/// Excerpts are cut after this many characters.
pub const EXCERPT_CHARS: usize = 200;

const BLOCK_ELEMENTS: &[&str] = &[
    "address", "article", "aside", "blockquote", "dd", "div", "dl", "dt", "figcaption", "figure",
    "footer", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "li", "main", "nav", "ol", "p",
    "pre", "section", "table", "td", "th", "tr", "ul",
];

// Elements whose text is never shown to a reader.
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "template", "noscript", "head", "title"];

/// Remove all tags and decode entities, separating block elements with a newline.
pub fn strip_markup(rich_text: &str) -> String {
    let fragment = Html::parse_fragment(rich_text);
    element_text(fragment.root_element())
}

/// Visible text of a single element, rendered the same way as [`strip_markup`].
pub fn element_text(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    collect_text(element, &mut out);
    out.trim().to_string()
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) => {
                let name = el.name();
                if SKIPPED_ELEMENTS.contains(&name) {
                    continue;
                }
                if name == "br" {
                    out.push('\n');
                    continue;
                }
                let block = BLOCK_ELEMENTS.contains(&name);
                if block {
                    break_line(out);
                }
                if let Some(child_el) = ElementRef::wrap(child) {
                    collect_text(child_el, out);
                }
                if block {
                    break_line(out);
                }
            }
            _ => {}
        }
    }
}

fn break_line(out: &mut String) {
    if !out.is_empty() && !out.ends_with(char::is_whitespace) {
        out.push('\n');
    }
}

/// First [`EXCERPT_CHARS`] characters of the plain text, with `...` only when truncated.
pub fn excerpt(rich_text: &str) -> String {
    let plain = strip_markup(rich_text);
    match plain.char_indices().nth(EXCERPT_CHARS) {
        Some((cut, _)) => format!("{}...", &plain[..cut]),
        None => plain,
    }
}

/// `January 05, 2024`
pub fn format_date(at: &DateTime<Utc>) -> String {
    at.format("%B %d, %Y").to_string()
}

/// Decides whether a post matches a free-text query.
///
/// Titles match on a plain case-insensitive substring. Content only matches
/// when the query stands as a whole word in the stripped text; the query is
/// always treated literally.
#[derive(Debug, Clone)]
pub struct QueryMatcher {
    needle: String,
    word: Option<Regex>,
}

impl QueryMatcher {
    pub fn new(query: &str) -> Self {
        let pattern = format!(r"\b{}\b", regex::escape(query));
        let word = match RegexBuilder::new(&pattern).case_insensitive(true).build() {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::warn!(query, error = %e, "word matcher unavailable; content matches disabled");
                None
            }
        };
        Self { needle: query.to_lowercase(), word }
    }

    pub fn in_title(&self, title: &str) -> bool {
        title.to_lowercase().contains(&self.needle)
    }

    pub fn word_in(&self, plain_text: &str) -> bool {
        self.word.as_ref().is_some_and(|re| re.is_match(plain_text))
    }

    pub fn matches(&self, title: &str, rich_content: &str) -> bool {
        self.in_title(title) || self.word_in(&strip_markup(rich_content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn strips_tags_and_decodes_entities() {
        let plain = strip_markup("<p>Tom &amp; <b>Jerry</b></p><p>second&nbsp;block</p>");
        assert_eq!(plain, "Tom & Jerry\nsecond\u{a0}block");
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(strip_markup("just some words"), "just some words");
        let once = strip_markup("<div><h2>Head</h2>body<br>line</div>");
        assert_eq!(strip_markup(&once), once);
    }

    #[test]
    fn skips_script_bodies() {
        assert_eq!(strip_markup("<p>a</p><script>var x = 1;</script><p>b</p>"), "a\nb");
    }

    #[test]
    fn excerpt_only_marks_truncation() {
        let short = "x".repeat(EXCERPT_CHARS);
        assert_eq!(excerpt(&short), short);
        let long = "ç".repeat(EXCERPT_CHARS + 1);
        let ex = excerpt(&long);
        assert!(ex.ends_with("..."));
        assert_eq!(ex.chars().count(), EXCERPT_CHARS + 3);
    }

    #[test]
    fn date_is_month_day_year() {
        let at = Utc.with_ymd_and_hms(2024, 1, 5, 13, 0, 0).unwrap();
        assert_eq!(format_date(&at), "January 05, 2024");
    }

    #[test]
    fn whole_word_content_match() {
        let m = QueryMatcher::new("cat");
        assert!(m.matches("Untitled", "<p>A cat sat on the mat</p>"));
        assert!(m.matches("Untitled", "<p>(CAT)</p>"));
        assert!(!m.matches("Untitled", "<p>category theory</p>"));
        assert!(m.matches("Cats and Dogs", "<p>category theory</p>"));
    }

    #[test]
    fn query_is_literal() {
        let m = QueryMatcher::new("c.t");
        assert!(!m.word_in("a cat here"));
        assert!(m.word_in("the c.t file"));
    }
}
