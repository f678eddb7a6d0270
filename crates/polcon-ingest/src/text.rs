//! Small text helpers shared by the segmenter, the chunker and the
//! extraction backends.

const ABBREVIATIONS: &[&str] = &[
    "e.g", "i.e", "etc", "inc", "ltd", "llc", "co", "corp", "mr", "mrs", "ms", "dr", "u.s", "u.k", "vs",
    "no", "st", "approx", "cf", "art", "sec",
];

/// Collapse every whitespace run to a single space and trim.
pub fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whitespace-delimited word count; the chunker's size unit.
pub fn word_count(s: &str) -> usize {
    s.split_whitespace().count()
}

/// Lowercase ASCII slug (`Data We Share > Partners` -> `data-we-share-partners`).
pub fn slugify(s: &str) -> String {
    let mut slug = String::with_capacity(s.len());
    let mut dash = false;
    for c in s.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            dash = false;
        } else if !dash && !slug.is_empty() {
            slug.push('-');
            dash = true;
        }
        if slug.len() >= 48 {
            break;
        }
    }
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        "section".to_string()
    } else {
        slug
    }
}

/// Byte offset of the `char_idx`-th character (`text.len()` for one past the end).
pub fn char_to_byte(text: &str, char_idx: usize) -> Option<usize> {
    if char_idx == 0 {
        return Some(0);
    }
    let mut seen = 0;
    for (byte, _) in text.char_indices() {
        if seen == char_idx {
            return Some(byte);
        }
        seen += 1;
    }
    (seen == char_idx).then_some(text.len())
}

/// Number of characters before `byte` (which must be a char boundary).
pub fn byte_to_char(text: &str, byte: usize) -> usize {
    text[..byte.min(text.len())].chars().count()
}

// ============================================================================
// Sentence splitting
// ============================================================================

/// Split prose into sentence spans `(start, end)` relative to `text`,
/// trimmed of surrounding whitespace. Abbreviation-aware.
pub fn sentence_spans(text: &str) -> Vec<(usize, usize)> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut spans = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < chars.len() {
        let (pos, c) = chars[i];
        if !matches!(c, '.' | '!' | '?') {
            i += 1;
            continue;
        }

        let mut j = i + 1;
        while j < chars.len() && matches!(chars[j].1, '"' | '\'' | ')' | ']' | '\u{201D}' | '\u{2019}' | '.' | '!' | '?') {
            j += 1;
        }
        let end = chars.get(j).map(|(b, _)| *b).unwrap_or(text.len());
        let boundary = j >= chars.len() || (chars[j].1.is_whitespace() && starts_sentence(&chars[j..]));

        if boundary && !(c == '.' && is_abbreviation(&text[start..pos])) {
            push_trimmed(&mut spans, text, start, end);
            start = end;
        }
        i = j;
    }

    push_trimmed(&mut spans, text, start, text.len());
    spans
}

fn starts_sentence(rest: &[(usize, char)]) -> bool {
    match rest.iter().map(|(_, c)| *c).find(|c| !c.is_whitespace()) {
        None => true,
        Some(c) => c.is_uppercase() || c.is_ascii_digit() || matches!(c, '"' | '\'' | '(' | '\u{201C}' | '\u{2018}' | '-' | '*' | '\u{2022}'),
    }
}

fn is_abbreviation(before: &str) -> bool {
    let token = before
        .rsplit(char::is_whitespace)
        .next()
        .unwrap_or_default()
        .trim_start_matches(['(', '"', '\'']);
    if token.chars().count() == 1 && token.chars().all(|c| c.is_uppercase()) {
        return true;
    }
    let lower = token.to_lowercase();
    ABBREVIATIONS.contains(&lower.as_str())
}

fn push_trimmed(spans: &mut Vec<(usize, usize)>, text: &str, start: usize, end: usize) {
    let slice = &text[start..end];
    let lead = slice.len() - slice.trim_start().len();
    let trail = slice.len() - slice.trim_end().len();
    if start + lead < end - trail {
        spans.push((start + lead, end - trail));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentences(text: &str) -> Vec<&str> {
        sentence_spans(text).into_iter().map(|(s, e)| &text[s..e]).collect()
    }

    #[test]
    fn splits_on_terminal_punctuation() {
        assert_eq!(
            sentences("We collect data. We share it! Do we sell it? No."),
            vec!["We collect data.", "We share it!", "Do we sell it?", "No."]
        );
    }

    #[test]
    fn respects_abbreviations() {
        assert_eq!(
            sentences("We use identifiers, e.g. cookies. Acme Inc. Ltd. Is a partner. J. Smith agrees."),
            vec!["We use identifiers, e.g. cookies.", "Acme Inc. Ltd. Is a partner.", "J. Smith agrees."]
        );
    }

    #[test]
    fn no_split_before_lowercase_or_inside_numbers() {
        assert_eq!(sentences("Version 2.1 applies. see below."), vec!["Version 2.1 applies. see below."]);
    }

    #[test]
    fn trailing_fragment_without_period() {
        assert_eq!(sentences("First one.  Second one"), vec!["First one.", "Second one"]);
    }

    #[test]
    fn char_byte_conversion() {
        let text = "héllo wörld";
        assert_eq!(char_to_byte(text, 2), Some(3));
        assert_eq!(char_to_byte(text, 11), Some(text.len()));
        assert_eq!(char_to_byte(text, 12), None);
        assert_eq!(byte_to_char(text, 3), 2);
    }

    #[test]
    fn slugs() {
        assert_eq!(slugify("Data We Share > Partners"), "data-we-share-partners");
        assert_eq!(slugify("!!!"), "section");
    }
}
