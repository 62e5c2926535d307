//! Studio knowledge base: a TOML file of topics and prices. Keyword
//! matching here is what replaces the model at degradation level L2,
//! and price answers always come from this file, never from the model.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::collab::KnowledgeSource;

#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("could not read knowledge file `{path}`: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("could not parse knowledge file `{path}`: {source}")]
    Parse { path: String, source: toml::de::Error },
    #[error("knowledge file has no topics")]
    Empty,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Topic {
    pub key: String,
    pub keywords: Vec<String>,
    pub answer: String,
}

#[derive(Clone, Debug, Deserialize)]
struct KnowledgeFile {
    #[serde(default, rename = "topic")]
    topics: Vec<Topic>,
    /// Group name → price per class, in cents.
    #[serde(default)]
    prices: BTreeMap<String, u64>,
}

#[derive(Clone, Debug)]
pub struct KnowledgeBase {
    topics: Vec<Topic>,
    prices: BTreeMap<String, u64>,
}

impl KnowledgeBase {
    pub fn load(path: &Path) -> Result<Self, KnowledgeError> {
        let path_str = path.display().to_string();
        let raw = fs::read_to_string(path)
            .map_err(|source| KnowledgeError::Read { path: path_str.clone(), source })?;
        let file: KnowledgeFile = toml::from_str(&raw)
            .map_err(|source| KnowledgeError::Parse { path: path_str.clone(), source })?;
        if file.topics.is_empty() {
            return Err(KnowledgeError::Empty);
        }
        info!(
            event_name = "knowledge_loaded",
            path = %path_str,
            topics = file.topics.len(),
            prices = file.prices.len(),
            "loaded knowledge base"
        );
        Ok(Self { topics: file.topics, prices: file.prices })
    }

    pub fn from_parts(topics: Vec<Topic>, prices: BTreeMap<String, u64>) -> Self {
        Self { topics, prices }
    }

    /// Best keyword match over the query: the topic with the most keyword
    /// hits wins; zero hits is an explicit miss.
    pub fn best_match(&self, query: &str) -> Option<&Topic> {
        let query = query.to_lowercase();
        self.topics
            .iter()
            .map(|topic| {
                let hits = topic
                    .keywords
                    .iter()
                    .filter(|keyword| query.contains(&keyword.to_lowercase()))
                    .count();
                (hits, topic)
            })
            .filter(|(hits, _)| *hits > 0)
            .max_by_key(|(hits, _)| *hits)
            .map(|(_, topic)| topic)
    }

    pub fn all_prices(&self) -> &BTreeMap<String, u64> {
        &self.prices
    }
}

impl KnowledgeSource for KnowledgeBase {
    fn lookup(&self, topic: &str) -> Option<String> {
        // Exact key first, keyword match second.
        if let Some(found) = self.topics.iter().find(|candidate| candidate.key == topic) {
            return Some(found.answer.clone());
        }
        self.best_match(topic).map(|found| found.answer.clone())
    }

    fn price_of(&self, group: &str) -> Option<u64> {
        let group = group.to_lowercase();
        self.prices
            .iter()
            .find(|(name, _)| {
                let name = name.to_lowercase();
                name == group || group.contains(&name) || name.contains(&group)
            })
            .map(|(_, price)| *price)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::io::Write;

    use crate::collab::KnowledgeSource;

    use super::{KnowledgeBase, Topic};

    fn base() -> KnowledgeBase {
        let mut prices = BTreeMap::new();
        prices.insert("Salsa beginners".to_string(), 50_000);
        prices.insert("Hip-hop".to_string(), 45_000);
        KnowledgeBase::from_parts(
            vec![
                Topic {
                    key: "address".into(),
                    keywords: vec!["address".into(), "where".into(), "located".into()],
                    answer: "We're at 12 Svetlanskaya St.".into(),
                },
                Topic {
                    key: "trial".into(),
                    keywords: vec!["trial".into(), "first class".into(), "free".into()],
                    answer: "Your first trial class is free.".into(),
                },
            ],
            prices,
        )
    }

    #[test]
    fn keyword_match_picks_strongest_topic() {
        let base = base();
        let topic = base.best_match("where is the studio located?").expect("match");
        assert_eq!(topic.key, "address");
        assert!(base.best_match("do you sell shoes").is_none());
    }

    #[test]
    fn price_lookup_is_case_and_substring_tolerant() {
        let base = base();
        assert_eq!(base.price_of("salsa beginners"), Some(50_000));
        assert_eq!(base.price_of("hip-hop"), Some(45_000));
        assert_eq!(base.price_of("ballet"), None);
    }

    #[test]
    fn load_rejects_empty_topics() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "[prices]\nsalsa = 500").expect("write");
        let result = KnowledgeBase::load(file.path());
        assert!(result.is_err());
    }

    #[test]
    fn load_parses_topics_and_prices() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            "[[topic]]\nkey = \"address\"\nkeywords = [\"where\"]\nanswer = \"Here.\"\n\n\
             [prices]\nsalsa = 500"
        )
        .expect("write");

        let base = KnowledgeBase::load(file.path()).expect("load");
        assert_eq!(base.lookup("address").as_deref(), Some("Here."));
        assert_eq!(base.price_of("salsa"), Some(500));
    }
}
