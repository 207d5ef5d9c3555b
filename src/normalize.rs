//! Text normalization for tweets.
//!
//! Order matters here: markers and URLs must go before HTML unescaping and
//! case folding, and whitespace is collapsed last. Each step is idempotent
//! on its own output.

use once_cell::sync::Lazy;
use regex::Regex;

static RT_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bRT\b").unwrap());
static MENTION_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"@\w+").unwrap());
static WHITESPACE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

// Split "stormHits" and "1st(Upper)" style boundaries, then "ABCDef".
static CAMEL_FIRST_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(.)([A-Z]+[a-z]+)").unwrap());
static CAMEL_SECOND_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([a-z0-9])([A-Z])").unwrap());

// Either an explicit http(s) URL, or a bare dotted domain with a plausible
// TLD (generic ones spelled out, two-letter country codes as a catch-all),
// optionally followed by a path.
static URL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:https?://\S+|(?:[a-z0-9](?:[a-z0-9-]*[a-z0-9])?\.)+(?:com|net|org|edu|gov|mil|aero|asia|biz|cat|coop|info|int|jobs|mobi|museum|name|post|pro|tel|travel|xxx|[a-z]{2})(?:/\S*)?)",
    )
    .unwrap()
});

/// Normalize a raw tweet text.
///
/// Strips the retweet marker, `@mentions` and the `#` of hashtags (keeping
/// the tag word), removes URLs, unescapes HTML entities, splits CamelCase
/// and underscore/apostrophe joins, folds fully-uppercase words to
/// capitalized form, collapses whitespace, and lower-cases the result
/// unless `preserve_case` is set.
pub fn clean_text(text: &str, preserve_case: bool) -> String {
    let text = RT_PATTERN.replace_all(text, "");
    let text = MENTION_PATTERN.replace_all(&text, "");
    let text = text.replace('#', "");
    let text = URL_PATTERN.replace_all(&text, "");
    let text = html_escape::decode_html_entities(&text).into_owned();
    let text = CAMEL_FIRST_PATTERN.replace_all(&text, "$1 $2");
    let text = CAMEL_SECOND_PATTERN.replace_all(&text, "$1 $2");
    let text = text.replace('_', " ").replace('\'', " ");
    let text = fold_all_caps(&text);
    let text = WHITESPACE_PATTERN.replace_all(&text, " ");
    let text = text.trim();
    if preserve_case {
        text.to_owned()
    } else {
        text.to_lowercase()
    }
}

/// Fold fully-uppercase words to capitalized form ("TOKYO" → "Tokyo"), so
/// title-case tests behave on shouted tweets.
fn fold_all_caps(text: &str) -> String {
    let folded: Vec<String> = text
        .split(' ')
        .map(|token| {
            let has_cased = token.chars().any(char::is_alphabetic);
            let any_lower = token.chars().any(char::is_lowercase);
            if has_cased && !any_lower {
                capitalize(token)
            } else {
                token.to_owned()
            }
        })
        .collect();
    folded.join(" ")
}

/// Upper-case the first character, lower-case the rest.
fn capitalize(token: &str) -> String {
    let mut chars = token.chars();
    match chars.next() {
        None => String::new(),
        Some(first) => {
            first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_markers_and_urls() {
        let cleaned = clean_text(
            "RT @JoeyClipstar: Bow_Woooow_Signs RT to #BadBoyRecords http://t.co/3w58p6Sbx2 !!",
            false,
        );
        assert!(!cleaned.contains("rt "));
        assert!(!cleaned.contains('@'));
        assert!(!cleaned.contains('#'));
        assert!(!cleaned.contains("http"));
        assert!(!cleaned.contains("t.co"));
        assert!(cleaned.contains("bad boy records"));
        assert!(cleaned.contains("bow woooow signs"));
    }

    #[test]
    fn strips_bare_domains() {
        let cleaned = clean_text("details at example.com/storm now", false);
        assert!(!cleaned.contains("example"));
        assert!(cleaned.contains("details at"));
    }

    #[test]
    fn splits_camelcase_and_joins() {
        assert_eq!(clean_text("NewYork under_water", false), "new york under water");
        assert_eq!(clean_text("it's flooding", false), "it s flooding");
    }

    #[test]
    fn unescapes_html_entities() {
        assert_eq!(clean_text("storm &amp; flood", false), "storm & flood");
    }

    #[test]
    fn preserves_case_when_asked() {
        assert_eq!(clean_text("Big storm in Tokyo", true), "Big storm in Tokyo");
    }

    #[test]
    fn folds_shouted_words_to_capitalized() {
        assert_eq!(clean_text("BIG STORM in Tokyo", true), "Big Storm in Tokyo");
    }

    #[test]
    fn collapses_whitespace() {
        assert_eq!(clean_text("a   b\t\tc", false), "a b c");
    }
}
