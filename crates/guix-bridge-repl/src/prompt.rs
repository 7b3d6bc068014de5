//! REPL prompt detection.

use regex::Regex;

/// Default Guile prompt, e.g. `scheme@(guile-user)> ` or, inside the
/// debugger, `scheme@(guile-user) [1]> `.
pub const DEFAULT_PROMPT: &str = r"scheme@\([^)]*\)(?: \[\d+\])?> ";

/// How far back from the end of the output a prompt may start.
const PROMPT_WINDOW: usize = 256;

/// Matches the REPL prompt at the very end of accumulated output.
#[derive(Debug, Clone)]
pub struct PromptMatcher {
    regex: Regex,
}

impl PromptMatcher {
    /// Compile a prompt pattern. The pattern is anchored to the end of the
    /// text; a trailing `$` is accepted and ignored.
    ///
    /// # Errors
    /// Returns error if the pattern is not a valid regular expression.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let pattern = pattern.strip_suffix('$').unwrap_or(pattern);
        Ok(Self {
            regex: Regex::new(&format!(r"(?:{pattern})\z"))?,
        })
    }

    /// Byte offset where a trailing prompt starts, if `text` ends with one.
    #[must_use]
    pub fn find_at_end(&self, text: &str) -> Option<usize> {
        let mut start = text.len().saturating_sub(PROMPT_WINDOW);
        while !text.is_char_boundary(start) {
            start -= 1;
        }
        self.regex.find(&text[start..]).map(|m| start + m.start())
    }

    /// Whether `text` ends with a prompt.
    #[must_use]
    pub fn ends_with_prompt(&self, text: &str) -> bool {
        self.find_at_end(text).is_some()
    }
}

impl Default for PromptMatcher {
    fn default() -> Self {
        Self {
            regex: Regex::new(&format!(r"(?:{DEFAULT_PROMPT})\z"))
                .expect("default prompt pattern is valid"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_prompt_at_end() {
        let prompt = PromptMatcher::default();
        let text = "((result \"3\") (output . \"\"))\nscheme@(guile-user)> ";
        let start = prompt.find_at_end(text).unwrap();
        assert_eq!(&text[..start], "((result \"3\") (output . \"\"))\n");
    }

    #[test]
    fn test_debugger_prompt() {
        let prompt = PromptMatcher::default();
        assert!(prompt.ends_with_prompt("error\nscheme@(guix ui) [1]> "));
    }

    #[test]
    fn test_prompt_must_be_trailing() {
        let prompt = PromptMatcher::default();
        assert!(!prompt.ends_with_prompt("scheme@(guile-user)> (+ 1 2)"));
        assert!(!prompt.ends_with_prompt("scheme@(guile-user)"));
    }

    #[test]
    fn test_custom_pattern_with_dollar() {
        let prompt = PromptMatcher::new(r"guix> $").unwrap();
        assert_eq!(prompt.find_at_end("ok\nguix> "), Some(3));
        assert!(PromptMatcher::new("(").is_err());
    }

    #[test]
    fn test_window_respects_char_boundaries() {
        let prompt = PromptMatcher::default();
        let text = format!("{}scheme@(guile-user)> ", "é".repeat(300));
        assert!(prompt.ends_with_prompt(&text));
    }
}
