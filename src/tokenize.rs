//! Tweet-aware tokenization and n-gram generation.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

// Hyphenated words, numbers, hashtag/mention words, plain words, emoji,
// punctuation runs, then single non-word characters as a fallback. First
// alternative wins, so hyphenated words stay whole.
static TOKEN_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\w+(?:-\w+)+|[-+]?\d+[.,]?\d+|[#@]?\w+|[\u{2600}-\u{26FF}\u{2700}-\u{27BF}\u{10000}-\u{10FFFF}]|[.:()\[\],;?!*]{2,4}|[^\s\w]",
    )
    .unwrap()
});

/// Split a text into tweet-style tokens. Emoji, hashtags and mentions
/// survive as single tokens; punctuation comes out as its own token.
pub fn tokenize(text: &str) -> Vec<String> {
    TOKEN_PATTERN
        .find_iter(text)
        .map(|m| m.as_str().to_owned())
        .collect()
}

/// Is this token made of nothing but ASCII punctuation?
pub fn is_punctuation_token(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|c| c.is_ascii_punctuation())
}

fn contains_punctuation(gram: &str) -> bool {
    gram.chars().any(|c| c.is_ascii_punctuation())
}

fn contains_digit(gram: &str) -> bool {
    gram.chars().any(|c| c.is_ascii_digit())
}

/// Generate word n-grams of lengths `min..=max`, joined by single spaces.
///
/// Any gram containing a punctuation character or a digit is discarded
/// (that covers punctuation-only tokens at the unigram tier too). The
/// result is de-duplicated but keeps first-occurrence order, which later
/// decides which original-case variant of a gram is remembered.
pub fn ngrams(tokens: &[String], min: usize, max: usize) -> Vec<String> {
    assert!(min > 0);
    assert!(max >= min);
    let mut grams = Vec::new();
    let mut seen = BTreeSet::new();
    if min == 1 {
        for token in tokens {
            if !contains_punctuation(token)
                && !contains_digit(token)
                && seen.insert(token.clone())
            {
                grams.push(token.clone());
            }
        }
    }
    for n in min.max(2)..=max {
        if n > tokens.len() {
            break;
        }
        for window in tokens.windows(n) {
            let gram = window.join(" ");
            if !contains_punctuation(&gram) && !contains_digit(&gram) && seen.insert(gram.clone())
            {
                grams.push(gram);
            }
        }
    }
    grams
}
