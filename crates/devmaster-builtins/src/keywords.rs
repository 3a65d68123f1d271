use devmaster_core::{DevMasterError, DevMasterResult};
use regex::Regex;

/// Case-insensitive whole-word match against any of a set of keywords.
///
/// Multi-word keywords ("not working") match as phrases.
#[derive(Debug, Clone)]
pub struct KeywordSet {
    regex: Regex,
}

impl KeywordSet {
    pub fn new<S: AsRef<str>>(keywords: &[S]) -> DevMasterResult<Self> {
        if keywords.is_empty() {
            return Err(DevMasterError::Config("keyword set must not be empty".into()));
        }
        let alternatives: Vec<String> = keywords
            .iter()
            .map(|k| regex::escape(k.as_ref().trim()))
            .collect();
        let pattern = format!(r"(?i)\b(?:{})\b", alternatives.join("|"));
        let regex = Regex::new(&pattern)
            .map_err(|e| DevMasterError::Config(format!("invalid keyword pattern: {e}")))?;
        Ok(Self { regex })
    }

    pub fn matches(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    /// The first keyword found in `text`, as written there.
    pub fn find<'t>(&self, text: &'t str) -> Option<&'t str> {
        self.regex.find(text).map(|m| m.as_str())
    }

    /// Every distinct keyword found in `text`, lowercased, in order of first
    /// appearance.
    pub fn find_all(&self, text: &str) -> Vec<String> {
        let mut found: Vec<String> = Vec::new();
        for m in self.regex.find_iter(text) {
            let keyword = m.as_str().to_lowercase();
            if !found.contains(&keyword) {
                found.push(keyword);
            }
        }
        found
    }
}
