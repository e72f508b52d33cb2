//! Prompt recognition.
//!
//! A prompt is a regex matched against device output. The matcher works on
//! raw bytes since device banners are not guaranteed to be valid UTF-8; a
//! successful match yields a [`PromptMatch`] carrying the matched text and
//! any named capture groups.

use regex::bytes::Regex;

#[derive(Debug, Clone)]
pub struct PromptMatcher {
    re: Regex,
}

impl PromptMatcher {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            re: Regex::new(pattern)?,
        })
    }

    pub fn pattern(&self) -> &str {
        self.re.as_str()
    }

    pub fn is_match(&self, haystack: &[u8]) -> bool {
        self.re.is_match(haystack)
    }

    /// Search the whole haystack, returning the first match with its groups.
    pub fn find(&self, haystack: &[u8]) -> Option<PromptMatch> {
        let caps = self.re.captures(haystack)?;
        let whole = caps.get(0).expect("group 0 always present on a match");

        let groups = self
            .re
            .capture_names()
            .enumerate()
            .map(|(i, name)| Group {
                name: name.map(str::to_string),
                text: caps
                    .get(i)
                    .map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned()),
            })
            .collect();

        Some(PromptMatch {
            text: String::from_utf8_lossy(whole.as_bytes()).into_owned(),
            start: whole.start(),
            end: whole.end(),
            groups,
        })
    }
}

#[derive(Debug, Clone)]
struct Group {
    name: Option<String>,
    text: Option<String>,
}

/// A successful prompt match: the matched text, its position in the searched
/// buffer, and the capture groups by index or name.
#[derive(Debug, Clone)]
pub struct PromptMatch {
    text: String,
    start: usize,
    end: usize,
    groups: Vec<Group>,
}

impl PromptMatch {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn range(&self) -> (usize, usize) {
        (self.start, self.end)
    }

    pub fn group(&self, index: usize) -> Option<&str> {
        self.groups.get(index).and_then(|g| g.text.as_deref())
    }

    pub fn group_by_name(&self, name: &str) -> Option<&str> {
        self.groups
            .iter()
            .find(|g| g.name.as_deref() == Some(name))
            .and_then(|g| g.text.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_device_prompt() {
        let m = PromptMatcher::new(r"[\w\-]+#").unwrap();
        assert!(m.is_match(b"sw1#"));
        assert!(m.is_match(b"line1\r\nsw-edge-2#"));
        assert!(!m.is_match(b"sw1>"));
    }

    #[test]
    fn reports_match_text_and_range() {
        let m = PromptMatcher::new(r"[\w\-]+#").unwrap();
        let hit = m.find(b"some output\r\nsw1#").unwrap();
        assert_eq!(hit.text(), "sw1#");
        assert_eq!(hit.range(), (13, 17));
    }

    #[test]
    fn named_groups() {
        let m = PromptMatcher::new(r"(?i)(?P<kind>user\w+|pass\w+):").unwrap();
        let hit = m.find(b"\r\nUsername: ").unwrap();
        assert_eq!(hit.group_by_name("kind"), Some("Username"));
        assert_eq!(hit.group(1), Some("Username"));
        assert_eq!(hit.group(7), None);
    }

    #[test]
    fn tolerates_binary_output() {
        let m = PromptMatcher::new(r"[\w\-]+#").unwrap();
        assert!(m.find(&[0xff, 0xfe, b's', b'w', b'1', b'#']).is_some());
    }

    #[test]
    fn invalid_pattern() {
        assert!(PromptMatcher::new(r"([unclosed").is_err());
    }
}
