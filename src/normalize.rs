//! Text normalization shared by dedupe-key computation (I2) and the
//! Safety Filter's length/emptiness checks.
//!
//! Dedupe normalization (spec.md §9 Open Question, resolved): lowercase,
//! collapse internal whitespace runs to a single space, strip leading and
//! trailing punctuation. Nothing stronger — no stemming, no unicode
//! folding beyond `char::to_lowercase`.

/// Normalize text for the dedupe key `(scope_key, kind, normalized(text))`.
pub fn normalize_for_dedupe(text: &str) -> String {
    let collapsed = collapse_whitespace(text);
    let lowered = collapsed.to_lowercase();
    strip_edge_punctuation(&lowered)
}

/// Collapse runs of whitespace (including newlines/tabs) to a single space
/// and trim the ends.
pub fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_space = false;
    for c in text.chars() {
        if c.is_whitespace() {
            if !last_was_space && !out.is_empty() {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    if out.ends_with(' ') {
        out.pop();
    }
    out
}

fn strip_edge_punctuation(text: &str) -> String {
    text.trim_matches(|c: char| c.is_ascii_punctuation()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_whitespace_and_lowercases() {
        assert_eq!(
            normalize_for_dedupe("  I  ALWAYS\nprefer\tdark mode! "),
            "i always prefer dark mode"
        );
    }

    #[test]
    fn strips_only_edge_punctuation() {
        assert_eq!(normalize_for_dedupe("...uses tailwind, a lot..."), "uses tailwind, a lot");
    }

    #[test]
    fn idempotent() {
        let once = normalize_for_dedupe("Prefer Concise Responses.");
        let twice = normalize_for_dedupe(&once);
        assert_eq!(once, twice);
    }
}
