use super::extract;
use crate::traits::ExtractionProvider;
use crate::types::{CandidateItem, RelayError, Result};
use crate::Fetcher;
use async_trait::async_trait;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

/// A press centre scraped with CSS selectors: one index page listing links,
/// one page per release.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SelectorSpec {
    pub topic: String,
    pub listing_url: String,
    /// Anchors on the listing page that point at individual releases.
    pub link_selector: String,
    pub title_selector: String,
    pub content_selector: String,
    /// Elements inside the content to throw away (share buttons and such).
    #[serde(default)]
    pub cruft_selector: Option<String>,
    #[serde(default)]
    pub date_selector: Option<String>,
}

pub struct SelectorSource {
    spec: SelectorSpec,
    base: Url,
    link: Selector,
    title: Selector,
    content: Selector,
    cruft: Option<Selector>,
    date: Option<Selector>,
}

impl SelectorSource {
    pub fn new(spec: SelectorSpec) -> Result<Self> {
        let base = Url::parse(&spec.listing_url)?;
        Ok(Self {
            base,
            link: extract::selector(&spec.link_selector)?,
            title: extract::selector(&spec.title_selector)?,
            content: extract::selector(&spec.content_selector)?,
            cruft: extract::optional_selector(spec.cruft_selector.as_deref())?,
            date: extract::optional_selector(spec.date_selector.as_deref())?,
            spec,
        })
    }

    pub fn spec(&self) -> &SelectorSpec {
        &self.spec
    }

    /// Candidates from a listing page, in page order.
    pub fn parse_listing(&self, html: &str) -> Vec<CandidateItem> {
        let document = Html::parse_document(html);
        extract::links(&document, &self.link, &self.base)
            .into_iter()
            .map(|(title, href)| CandidateItem::new(&self.spec.topic, href).with_title(title))
            .collect()
    }
}

#[async_trait]
impl ExtractionProvider for SelectorSource {
    fn topic(&self) -> &str {
        &self.spec.topic
    }

    async fn list_candidates(&self, fetcher: &Fetcher) -> Result<Vec<CandidateItem>> {
        let body = fetcher.fetch_page(&self.spec.listing_url).await?;
        let candidates = self.parse_listing(&body);
        info!("{}: listing has {} links", self.spec.topic, candidates.len());
        Ok(candidates)
    }

    fn complete_item(&self, item: &mut CandidateItem, raw: &str) -> Result<()> {
        let document = Html::parse_document(raw);

        if let Some(title) = extract::first_text(&document, &self.title) {
            item.title = title;
        }
        if item.title.is_empty() {
            return Err(RelayError::Parse(format!(
                "no title matching {:?}",
                self.spec.title_selector
            )));
        }

        item.content = extract::first_inner_html(&document, &self.content, self.cruft.as_ref())
            .ok_or_else(|| {
                RelayError::Parse(format!("no content matching {:?}", self.spec.content_selector))
            })?;

        if let Some(date) = &self.date {
            match extract::first_text(&document, date) {
                Some(text) => {
                    item.published_at = extract::parse_date(&text);
                    if item.published_at.is_none() {
                        debug!("{}: unparseable date {:?} on {}", self.spec.topic, text, item.permalink);
                    }
                }
                None => debug!("{}: no date element on {}", self.spec.topic, item.permalink),
            }
        }

        item.complete = true;
        Ok(())
    }
}
