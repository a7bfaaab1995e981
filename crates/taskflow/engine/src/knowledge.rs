//! Knowledge sources consulted by the decision gate
//!
//! The lookup mechanism and the content behind it are external. The gate
//! only needs `lookup(keywords) -> found / content`.

use async_trait::async_trait;
use std::collections::BTreeMap;
use taskflow_types::{KnowledgeQuery, KnowledgeResult};
use thiserror::Error;

/// Knowledge lookup failures. The gate treats them as "nothing found".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KnowledgeError {
    #[error("Knowledge source unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid knowledge query: {0}")]
    InvalidQuery(String),
}

/// A pluggable knowledge lookup
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    async fn lookup(&self, query: KnowledgeQuery) -> Result<KnowledgeResult, KnowledgeError>;
}

/// A source that never knows anything
#[derive(Clone, Copy, Debug, Default)]
pub struct NoKnowledge;

#[async_trait]
impl KnowledgeSource for NoKnowledge {
    async fn lookup(&self, _query: KnowledgeQuery) -> Result<KnowledgeResult, KnowledgeError> {
        Ok(KnowledgeResult::empty())
    }
}

/// Fixed keyword → content index.
///
/// A query keyword matches an entry when it contains the entry's keyword,
/// ignoring case. Matching entries are joined in keyword order.
#[derive(Clone, Debug, Default)]
pub struct StaticKnowledgeBase {
    entries: BTreeMap<String, String>,
}

impl StaticKnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, keyword: impl Into<String>, content: impl Into<String>) -> Self {
        self.insert(keyword, content);
        self
    }

    pub fn insert(&mut self, keyword: impl Into<String>, content: impl Into<String>) {
        let keyword = keyword.into().trim().to_lowercase();
        if !keyword.is_empty() {
            self.entries.insert(keyword, content.into());
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KnowledgeSource for StaticKnowledgeBase {
    async fn lookup(&self, query: KnowledgeQuery) -> Result<KnowledgeResult, KnowledgeError> {
        let keywords: Vec<String> = query
            .keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        if keywords.is_empty() {
            return Err(KnowledgeError::InvalidQuery("no keywords".to_string()));
        }

        let matches: Vec<&str> = self
            .entries
            .iter()
            .filter(|(entry, _)| keywords.iter().any(|k| k.contains(entry.as_str())))
            .map(|(_, content)| content.as_str())
            .collect();

        if matches.is_empty() {
            Ok(KnowledgeResult::empty())
        } else {
            Ok(KnowledgeResult::found(matches.join("\n\n")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(keywords: &[&str]) -> KnowledgeQuery {
        KnowledgeQuery {
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_static_lookup_matches_case_insensitively() {
        let kb = StaticKnowledgeBase::new()
            .with_entry("OAuth", "Use PKCE for public clients.")
            .with_entry("retry", "Retry with exponential backoff.");

        let result = kb.lookup(query(&["oauth login flow"])).await.unwrap();
        assert!(result.found);
        assert_eq!(result.content.as_deref(), Some("Use PKCE for public clients."));

        let both = kb.lookup(query(&["OAUTH", "retry policy"])).await.unwrap();
        assert!(both.content.unwrap().contains("backoff"));
    }

    #[tokio::test]
    async fn test_static_lookup_miss() {
        let kb = StaticKnowledgeBase::new().with_entry("oauth", "content");
        let result = kb.lookup(query(&["kubernetes"])).await.unwrap();
        assert!(!result.found);
        assert!(result.content.is_none());

        assert!(matches!(
            kb.lookup(query(&["  "])).await,
            Err(KnowledgeError::InvalidQuery(_))
        ));
    }

    #[tokio::test]
    async fn test_no_knowledge() {
        let result = NoKnowledge.lookup(query(&["anything"])).await.unwrap();
        assert_eq!(result, KnowledgeResult::empty());
    }
}
