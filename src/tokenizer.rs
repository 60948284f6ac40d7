use crate::types::MaskedSpan;

/// Split message text into lowercase tokens.
///
/// Each masked span removes the first occurrence of its text from the
/// working copy. Matching is by substring, not offset: when the same text
/// appears earlier in the message than the real span, the earlier copy is
/// the one removed.
///
/// Whitespace runs separate tokens. Leading or trailing whitespace produces
/// an empty token at that end, and empty text produces a single empty token.
pub fn tokenize(text: &str, masked_spans: &[MaskedSpan]) -> Vec<String> {
    let mut working = text.to_string();
    for span in masked_spans {
        if span.text.is_empty() {
            continue;
        }
        working = working.replacen(&span.text, "", 1);
    }

    split_whitespace_runs(&working)
        .into_iter()
        .map(|piece| piece.to_lowercase())
        .collect()
}

/// Whether a message carries anything to learn from.
pub fn is_eligible(text: &str) -> bool {
    !text.is_empty()
}

/// True when `token` is exactly one character from `end_sentence`.
pub fn is_sentence_punctuation(token: &str, end_sentence: &[char]) -> bool {
    let mut chars = token.chars();
    matches!((chars.next(), chars.next()), (Some(c), None) if end_sentence.contains(&c))
}

/// True when the last character of `token` closes a sentence.
pub fn ends_sentence(token: &str, end_sentence: &[char]) -> bool {
    token
        .chars()
        .next_back()
        .is_some_and(|c| end_sentence.contains(&c))
}

fn split_whitespace_runs(text: &str) -> Vec<&str> {
    let mut pieces: Vec<&str> = text.split(char::is_whitespace).collect();
    // Interior empties come from consecutive whitespace; keep only the
    // boundary ones.
    let last = pieces.len() - 1;
    let mut index = 0;
    pieces.retain(|piece| {
        let keep = !piece.is_empty() || index == 0 || index == last;
        index += 1;
        keep
    });
    pieces
}
