//! Text preparation ahead of synthesis.
//!
//! [`normalize`] turns a part's text into running prose with one sentence per
//! line. The line breaks are hints for the engine's own segmentation, not an
//! application-level sentence splitter.

use once_cell::sync::Lazy;
use regex::Regex;

/// An apostrophe between two word characters (`he'd`, `can't`, `rock'n'roll`).
static CONTRACTION_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\w)'(\w)").unwrap());

/// Three or more dots, spaced or not.
static ELLIPSIS_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.(?:\s*\.){2,}").unwrap());

/// Sentence-final punctuation plus any whitespace that follows it.
static SENTENCE_END_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"([.!?])\s*").unwrap());

const NBSP: char = '\u{00A0}';

/// Prepare `text` for the synthesis engine.
///
/// Applied in order:
/// 1. newlines become spaces
/// 2. non-breaking spaces become spaces
/// 3. ellipses (`". . ."`, `"..."`) collapse to `"."`
/// 4. apostrophes inside contractions are dropped (`he'd` → `hed`) so the
///    engine's tokenizer does not split the word; this loses a little
///    pronunciation fidelity
/// 5. a newline follows every `.`, `!` and `?`
pub fn normalize(text: &str) -> String {
    let text = text.replace('\n', " ").replace(NBSP, " ");
    let text = ELLIPSIS_REGEX.replace_all(&text, ".");
    let text = strip_contraction_apostrophes(&text);
    SENTENCE_END_REGEX.replace_all(&text, "$1\n").into_owned()
}

// Matches cannot overlap, so chained contractions need more than one pass.
fn strip_contraction_apostrophes(text: &str) -> String {
    let mut current = text.to_string();
    while CONTRACTION_REGEX.is_match(&current) {
        current = CONTRACTION_REGEX.replace_all(&current, "$1$2").into_owned();
    }
    current
}

/// First `max_chars` characters of `text` with line breaks collapsed.
pub fn preview(text: &str, max_chars: usize) -> String {
    text.chars()
        .take(max_chars)
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{normalize, preview};

    #[test]
    fn joins_lines_and_breaks_after_sentences() {
        assert_eq!(
            normalize("It was late.\nShe left!  Why?"),
            "It was late.\nShe left!\nWhy?\n"
        );
    }

    #[test]
    fn replaces_non_breaking_spaces() {
        assert_eq!(normalize("Mr\u{00A0}Smith"), "Mr Smith");
    }

    #[test]
    fn collapses_spaced_ellipsis() {
        assert_eq!(normalize("Wait. . . what"), "Wait.\nwhat");
        assert_eq!(normalize("Wait... what"), "Wait.\nwhat");
        assert_eq!(normalize("Wait..  . what"), "Wait.\nwhat");
    }

    #[test]
    fn strips_contraction_apostrophes() {
        assert_eq!(normalize("he'd say we can't"), "hed say we cant");
        assert_eq!(normalize("rock'n'roll"), "rocknroll");
    }

    #[test]
    fn keeps_quotes_that_are_not_contractions() {
        assert_eq!(normalize("'quoted' dogs' bowls"), "'quoted' dogs' bowls");
    }

    #[test]
    fn normalizing_twice_is_a_no_op() {
        let inputs = [
            "One. Two! Three? Four",
            "He'd rather not.\nReally.",
            "Trailing space after stop. ",
            "No punctuation at all",
            "Wait... what",
            "Odd..  .spacing",
            "Two.. dots",
        ];
        for input in inputs {
            let once = normalize(input);
            assert_eq!(normalize(&once), once, "input: {input:?}");
        }
    }

    #[test]
    fn preview_truncates_and_flattens() {
        assert_eq!(preview("ab\ncd", 80), "ab cd");
        assert_eq!(preview(&"x".repeat(100), 80).chars().count(), 80);
    }
}
