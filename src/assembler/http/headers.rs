//! Header storage with case-insensitive names, plus the token-list matcher
//! used for `Transfer-Encoding` inspection.

use std::collections::HashMap;

/// Header map with ASCII-lowercased names.
///
/// Duplicate names are merged at insert time by appending the new value
/// behind a `","`, so lookups always see the full list form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: HashMap<String, String>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: &str) {
        let key = name.to_ascii_lowercase();
        match self.entries.get_mut(&key) {
            Some(existing) => {
                existing.push(',');
                existing.push_str(value);
            }
            None => {
                self.entries.insert(key, value.to_string());
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// True when `token` appears as a whole element of a comma-separated list.
///
/// Elements are trimmed of surrounding spaces and tabs and may be wrapped in
/// one pair of double quotes. Substring hits do not count.
pub fn contains_token(value: &str, token: &str) -> bool {
    value.split(',').any(|element| {
        let mut element = element.trim_matches(|c| c == ' ' || c == '\t');
        if element.len() >= 2 && element.starts_with('"') && element.ends_with('"') {
            element = &element[1..element.len() - 1];
        }
        element == token
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_lowercases_names_and_merges_duplicates() {
        let mut headers = HeaderMap::new();
        headers.insert("Content-Type", "text/plain");
        headers.insert("Accept", "text/html");
        headers.insert("ACCEPT", "application/json");

        assert_eq!(headers.get("content-type"), Some("text/plain"));
        assert_eq!(headers.get("Content-Type"), Some("text/plain"));
        assert_eq!(headers.get("accept"), Some("text/html,application/json"));
        assert_eq!(headers.len(), 2);
    }

    #[test]
    fn matches_plain_tokens_with_arbitrary_whitespace() {
        assert!(contains_token("gzip,chunked,fss", "chunked"));
        assert!(contains_token("gzip, chunked ,fss", "chunked"));
        assert!(contains_token("gzip,   chunked   ,  fss", "chunked"));
        assert!(contains_token("  gzip  ,chunked  ,fss", "chunked"));
        assert!(contains_token("  chunked ,fss", "chunked"));
        assert!(contains_token("  fss, gzip,  chunked  ", "chunked"));
        assert!(contains_token("   chunked ,fss    ", "chunked"));
        assert!(contains_token("   gzip ,  chunked ,fss", "chunked"));

        assert!(!contains_token("gzip, chunkedd,fss", "chunked"));
        assert!(!contains_token("gzip, unchunked,fss", "chunked"));
    }

    #[test]
    fn matches_quoted_tokens_but_not_padded_quotes() {
        assert!(contains_token("gzip,\"chunked\",fss", "chunked"));
        assert!(contains_token("\"gzip\",\"chunked\",fss", "chunked"));
        assert!(contains_token("  \"gzip\"  ,  \"chunked\"  ,fss", "chunked"));
        assert!(contains_token("\"gzip\",chunked,fss", "chunked"));
        assert!(contains_token("\"gzip\"  ,  chunked  ,fss", "chunked"));

        assert!(!contains_token("gzip,\" chunked\",fss", "chunked"));
        assert!(!contains_token("\"gzip\"chunked,fss", "chunked"));
    }
}
