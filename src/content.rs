//! Source content: the items work is admitted for, and the representation
//! handed to the generation service.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ExtractionError;

/// Identity of a source content item (and of its work item).
pub type ItemId = u64;

/// Number of words kept when an excerpt has to be derived from the body.
const EXCERPT_WORDS: usize = 55;

/// A source content item as the content system stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceItem {
    pub id: ItemId,
    pub item_type: String,
    pub title: String,
    #[serde(default)]
    pub excerpt: String,
    pub body: String,
    #[serde(default)]
    pub terms: Vec<String>,
    #[serde(default)]
    pub permalink: Option<String>,
}

/// What the generation service sees of a source item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedContent {
    pub title: String,
    pub excerpt: String,
    pub body: String,
    pub terms: Vec<String>,
}

impl ExtractedContent {
    /// Hex SHA-256 over the JSON encoding; the content half of the cache key.
    pub fn fingerprint(&self) -> String {
        let encoded = serde_json::to_vec(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&encoded);
        format!("{:x}", hasher.finalize())
    }
}

/// Read access to the content system.
pub trait ContentSource: Send + Sync {
    fn get(&self, id: ItemId) -> Option<SourceItem>;

    fn exists(&self, id: ItemId) -> bool {
        self.get(id).is_some()
    }

    /// Builds the extracted representation of an item.
    ///
    /// Markup is stripped from the body and an empty excerpt falls back to
    /// the first words of the body.
    fn extract(&self, id: ItemId) -> Result<ExtractedContent, ExtractionError> {
        let item = self.get(id).ok_or(ExtractionError::NotFound(id))?;
        let body = strip_markup(&item.body);
        if body.trim().is_empty() {
            return Err(ExtractionError::Malformed {
                id,
                reason: "body is empty".into(),
            });
        }
        let excerpt = if item.excerpt.trim().is_empty() {
            trim_words(&body, EXCERPT_WORDS)
        } else {
            item.excerpt.trim().to_string()
        };
        Ok(ExtractedContent {
            title: item.title.trim().to_string(),
            excerpt,
            body,
            terms: item.terms,
        })
    }
}

/// Removes anything between `<` and `>` and collapses the leftover whitespace.
pub fn strip_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First `limit` words of `text`, with an ellipsis when something was cut.
pub fn trim_words(text: &str, limit: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= limit {
        return words.join(" ");
    }
    format!("{}...", words[..limit].join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct OneItem(SourceItem);

    impl ContentSource for OneItem {
        fn get(&self, id: ItemId) -> Option<SourceItem> {
            (id == self.0.id).then(|| self.0.clone())
        }
    }

    fn item(body: &str, excerpt: &str) -> SourceItem {
        SourceItem {
            id: 7,
            item_type: "post".into(),
            title: " Rust ownership ".into(),
            excerpt: excerpt.into(),
            body: body.into(),
            terms: vec!["rust".into()],
            permalink: None,
        }
    }

    #[test]
    fn extract_strips_markup_and_derives_excerpt() {
        let source = OneItem(item("<p>Ownership <b>moves</b> values.</p>", ""));
        let content = source.extract(7).unwrap();
        assert_eq!(content.title, "Rust ownership");
        assert_eq!(content.body, "Ownership moves values.");
        assert_eq!(content.excerpt, "Ownership moves values.");
        assert_eq!(content.terms, vec!["rust".to_string()]);
    }

    #[test]
    fn extract_missing_item_is_not_found() {
        let source = OneItem(item("body", ""));
        assert_eq!(source.extract(8), Err(ExtractionError::NotFound(8)));
        assert!(!source.exists(8));
    }

    #[test]
    fn extract_empty_body_is_malformed() {
        let source = OneItem(item("<div> </div>", "kept"));
        assert!(matches!(
            source.extract(7),
            Err(ExtractionError::Malformed { id: 7, .. })
        ));
    }

    #[test]
    fn fingerprint_is_stable_and_content_sensitive() {
        let a = OneItem(item("same body", "")).extract(7).unwrap();
        let b = OneItem(item("same body", "")).extract(7).unwrap();
        let c = OneItem(item("other body", "")).extract(7).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn trim_words_adds_ellipsis_only_when_cut() {
        assert_eq!(trim_words("a b c", 5), "a b c");
        assert_eq!(trim_words("a b c d", 2), "a b...");
    }
}
