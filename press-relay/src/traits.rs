use crate::types::{CandidateItem, Result};
use crate::Fetcher;
use async_trait::async_trait;

/// What the scheduler needs from one press-release source.
#[async_trait]
pub trait ExtractionProvider: Send + Sync {
    /// Topic name; also the stream path clients connect to.
    fn topic(&self) -> &str;

    /// Fetch the current list of releases. Only `permalink` has to be set;
    /// entries carrying everything else should come back `complete`.
    async fn list_candidates(&self, fetcher: &Fetcher) -> Result<Vec<CandidateItem>>;

    /// Raw page for an incomplete candidate.
    async fn fetch_raw(&self, fetcher: &Fetcher, item: &CandidateItem) -> Result<String> {
        fetcher.fetch_page(&item.permalink).await
    }

    /// Fill in `item` from its raw page.
    fn complete_item(&self, item: &mut CandidateItem, raw: &str) -> Result<()>;
}
