use super::extract;
use crate::traits::ExtractionProvider;
use crate::types::{CandidateItem, RelayError, Result};
use crate::Fetcher;
use async_trait::async_trait;
use feed_rs::parser;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// A source publishing an RSS or Atom feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedSpec {
    pub topic: String,
    pub feed_url: String,
    /// Used to fetch the body of entries that ship without one.
    #[serde(default)]
    pub content_selector: Option<String>,
    #[serde(default)]
    pub cruft_selector: Option<String>,
}

pub struct FeedSource {
    spec: FeedSpec,
    content: Option<Selector>,
    cruft: Option<Selector>,
}

impl FeedSource {
    pub fn new(spec: FeedSpec) -> Result<Self> {
        url::Url::parse(&spec.feed_url)?;
        Ok(Self {
            content: extract::optional_selector(spec.content_selector.as_deref())?,
            cruft: extract::optional_selector(spec.cruft_selector.as_deref())?,
            spec,
        })
    }

    pub fn spec(&self) -> &FeedSpec {
        &self.spec
    }

    /// Entries of a feed document. Entries without a link are dropped; those
    /// that already carry a title and a body come back complete.
    pub fn parse_listing(&self, content: &str) -> Result<Vec<CandidateItem>> {
        let feed = parser::parse(content.as_bytes())
            .map_err(|e| RelayError::Parse(format!("Failed to parse feed: {}", e)))?;

        let mut candidates = Vec::with_capacity(feed.entries.len());
        for entry in feed.entries {
            let Some(link) = entry.links.first().map(|l| l.href.clone()) else {
                debug!("{}: skipping entry {} without a link", self.spec.topic, entry.id);
                continue;
            };

            let title = entry.title.map(|t| t.content.trim().to_string()).unwrap_or_default();
            let body = entry
                .content
                .and_then(|c| c.body)
                .or_else(|| entry.summary.map(|s| s.content))
                .map(|b| b.trim().to_string())
                .unwrap_or_default();

            let mut candidate = CandidateItem::new(&self.spec.topic, link).with_title(title);
            candidate.published_at = entry.published.or(entry.updated);
            candidate.complete = !candidate.title.is_empty() && !body.is_empty();
            candidate.content = body;
            candidates.push(candidate);
        }

        Ok(candidates)
    }
}

#[async_trait]
impl ExtractionProvider for FeedSource {
    fn topic(&self) -> &str {
        &self.spec.topic
    }

    async fn list_candidates(&self, fetcher: &Fetcher) -> Result<Vec<CandidateItem>> {
        let body = fetcher.fetch_page(&self.spec.feed_url).await?;
        let candidates = self.parse_listing(&body)?;
        info!("{}: feed has {} entries", self.spec.topic, candidates.len());
        Ok(candidates)
    }

    fn complete_item(&self, item: &mut CandidateItem, raw: &str) -> Result<()> {
        let content = self.content.as_ref().ok_or_else(|| {
            RelayError::Parse(format!("{}: entry has no body and no content selector", self.spec.topic))
        })?;

        let document = Html::parse_document(raw);
        item.content = extract::first_inner_html(&document, content, self.cruft.as_ref())
            .ok_or_else(|| RelayError::Parse(format!("no content matching {:?}", self.spec.content_selector)))?;

        if item.title.is_empty() {
            let h1 = extract::selector("h1")?;
            item.title = extract::first_text(&document, &h1)
                .ok_or_else(|| RelayError::Parse("entry has no title".to_string()))?;
        }

        item.complete = true;
        Ok(())
    }
}
