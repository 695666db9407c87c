//! Shared text helpers.

const SNIPPET_LEN: usize = 120;

/// Lowercase ASCII slug suitable for a git branch segment.
pub fn slugify(text: &str, max_len: usize) -> String {
    let slug = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if slug.len() > max_len {
        slug[..max_len].trim_end_matches('-').to_string()
    } else {
        slug
    }
}

/// Truncate to at most `max_len` characters, ending with `...` when cut.
pub fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", kept)
}

/// Keep the last two path components.
pub fn shorten_path(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    if parts.len() <= 2 {
        parts.join("/")
    } else {
        parts[parts.len() - 2..].join("/")
    }
}

/// First non-blank line of `text`, capped.
pub fn snippet(text: &str) -> String {
    let first_line = text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("");
    truncate_str(first_line, SNIPPET_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Add a LICENSE file!", 40), "add-a-license-file");
        assert_eq!(slugify("  --weird__input--  ", 40), "weird-input");
        assert_eq!(slugify("fix the very long thing", 9), "fix-the-v");
        assert_eq!(slugify("fix the thing", 8), "fix-the");
        assert_eq!(slugify("résumé", 40), "r-sum");
    }

    #[test]
    fn test_truncate_str() {
        assert_eq!(truncate_str("short", 10), "short");
        assert_eq!(truncate_str("abcdefghij", 8), "abcde...");
        assert_eq!(truncate_str(&"é".repeat(10), 5).chars().count(), 5);
    }

    #[test]
    fn test_shorten_path() {
        assert_eq!(shorten_path("/work/project/src/main.rs"), "src/main.rs");
        assert_eq!(shorten_path("LICENSE"), "LICENSE");
        assert_eq!(shorten_path("/ws/LICENSE"), "ws/LICENSE");
    }

    #[test]
    fn test_snippet() {
        let long = format!("{}\nsecond line", "é".repeat(200));
        let s = snippet(&long);
        assert_eq!(s.chars().count(), 120);
        assert!(s.ends_with("..."));
        assert_eq!(snippet("\n\n  short  \nmore"), "short");
    }
}
