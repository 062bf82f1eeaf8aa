pub mod extract;
pub mod feed;
pub mod selector;

pub use feed::{FeedSource, FeedSpec};
pub use selector::{SelectorSource, SelectorSpec};

use crate::traits::ExtractionProvider;
use crate::types::{CandidateItem, RelayError, Result};
use crate::Fetcher;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

/// Static description of one source, as found in a sources file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceSpec {
    Selector(SelectorSpec),
    Feed(FeedSpec),
}

impl SourceSpec {
    pub fn topic(&self) -> &str {
        match self {
            SourceSpec::Selector(spec) => &spec.topic,
            SourceSpec::Feed(spec) => &spec.topic,
        }
    }
}

/// Every kind of source the relay knows how to read.
pub enum Source {
    Selector(SelectorSource),
    Feed(FeedSource),
}

impl Source {
    pub fn from_spec(spec: SourceSpec) -> Result<Self> {
        match spec {
            SourceSpec::Selector(spec) => Ok(Source::Selector(SelectorSource::new(spec)?)),
            SourceSpec::Feed(spec) => Ok(Source::Feed(FeedSource::new(spec)?)),
        }
    }
}

#[async_trait]
impl ExtractionProvider for Source {
    fn topic(&self) -> &str {
        match self {
            Source::Selector(source) => source.topic(),
            Source::Feed(source) => source.topic(),
        }
    }

    async fn list_candidates(&self, fetcher: &Fetcher) -> Result<Vec<CandidateItem>> {
        match self {
            Source::Selector(source) => source.list_candidates(fetcher).await,
            Source::Feed(source) => source.list_candidates(fetcher).await,
        }
    }

    fn complete_item(&self, item: &mut CandidateItem, raw: &str) -> Result<()> {
        match self {
            Source::Selector(source) => source.complete_item(item, raw),
            Source::Feed(source) => source.complete_item(item, raw),
        }
    }
}

/// The press centres the relay scrapes out of the box.
pub fn builtin_specs() -> Vec<SourceSpec> {
    vec![
        SourceSpec::Selector(SelectorSpec {
            topic: "72point".to_string(),
            listing_url: "http://www.72point.com/coverage/".to_string(),
            link_selector: ".items .item .content .links a".to_string(),
            title_selector: "#content h3.title".to_string(),
            content_selector: "#content .item .content".to_string(),
            cruft_selector: Some(".addthis_toolbox".to_string()),
            date_selector: Some("#content .item .meta".to_string()),
        }),
        SourceSpec::Selector(SelectorSpec {
            topic: "waitrose".to_string(),
            listing_url: "http://www.waitrose.presscentre.com/content/default.aspx?NewsAreaID=2".to_string(),
            link_selector: "#content .main .item h3 a".to_string(),
            title_selector: "#content h1".to_string(),
            content_selector: "#content .main .bodyCopy".to_string(),
            cruft_selector: None,
            date_selector: Some("#content .date_release".to_string()),
        }),
    ]
}

/// Read extra source definitions from a JSON array.
pub fn load_specs(path: &Path) -> Result<Vec<SourceSpec>> {
    let raw = std::fs::read_to_string(path)?;
    let specs: Vec<SourceSpec> = serde_json::from_str(&raw)?;
    Ok(specs)
}

/// Build the source set, refusing empty or repeated topic names.
pub fn build_sources(specs: Vec<SourceSpec>) -> Result<Vec<Arc<Source>>> {
    let mut topics = HashSet::new();
    let mut sources = Vec::with_capacity(specs.len());

    for spec in specs {
        let topic = spec.topic().trim().to_string();
        if topic.is_empty() || topic.contains('/') {
            return Err(RelayError::Config(format!("invalid topic name {:?}", spec.topic())));
        }
        if !topics.insert(topic.clone()) {
            return Err(RelayError::Config(format!("topic {} configured twice", topic)));
        }
        sources.push(Arc::new(Source::from_spec(spec)?));
    }

    Ok(sources)
}
