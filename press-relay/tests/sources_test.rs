use chrono::{Datelike, TimeZone, Utc};
use press_relay::sources::{build_sources, builtin_specs, load_specs, FeedSource, FeedSpec, SelectorSource, SelectorSpec};
use press_relay::{ExtractionProvider, RelayError, SourceSpec};

const LISTING: &str = r##"
<html><body><div id="content"><div class="main">
  <div class="item"><h3><a href="/content/detail.aspx?ReleaseID=101">Summer range lands</a></h3></div>
  <div class="item"><h3><a href="http://press.example.com/content/detail.aspx?ReleaseID=102">Price freeze</a></h3></div>
  <div class="item"><h3><a href="#">Not a release</a></h3></div>
  <div class="sidebar"><a href="/about">About us</a></div>
</div></div></body></html>
"##;

const RELEASE: &str = r#"
<html><body><div id="content">
  <h1>  Summer   range lands </h1>
  <p class="date_release">Posted 3rd June 2014</p>
  <div class="main">
    <div class="bodyCopy"><p>Forty new lines arrive in store.</p><div class="share">Tweet this</div></div>
  </div>
</div></body></html>
"#;

fn grocer_spec() -> SelectorSpec {
    SelectorSpec {
        topic: "grocer".to_string(),
        listing_url: "http://press.example.com/content/default.aspx?NewsAreaID=2".to_string(),
        link_selector: "#content .main .item h3 a".to_string(),
        title_selector: "#content h1".to_string(),
        content_selector: "#content .main .bodyCopy".to_string(),
        cruft_selector: Some(".share".to_string()),
        date_selector: Some("#content .date_release".to_string()),
    }
}

#[test]
fn selector_listing_resolves_links_in_page_order() {
    let source = SelectorSource::new(grocer_spec()).unwrap();
    let candidates = source.parse_listing(LISTING);

    let links: Vec<_> = candidates.iter().map(|c| c.permalink.as_str()).collect();
    assert_eq!(
        links,
        vec![
            "http://press.example.com/content/detail.aspx?ReleaseID=101",
            "http://press.example.com/content/detail.aspx?ReleaseID=102",
        ]
    );
    assert_eq!(candidates[0].title, "Summer range lands");
    assert!(candidates.iter().all(|c| c.topic == "grocer" && !c.complete));
}

#[test]
fn selector_completion_fills_title_date_and_clean_content() {
    let source = SelectorSource::new(grocer_spec()).unwrap();
    let mut item = source.parse_listing(LISTING).remove(0);

    source.complete_item(&mut item, RELEASE).unwrap();

    assert!(item.complete);
    assert_eq!(item.title, "Summer range lands");
    assert_eq!(item.content, "<p>Forty new lines arrive in store.</p>");
    assert_eq!(item.published_at, Some(Utc.with_ymd_and_hms(2014, 6, 3, 0, 0, 0).unwrap()));
}

#[test]
fn selector_completion_without_content_fails() {
    let source = SelectorSource::new(grocer_spec()).unwrap();
    let mut item = source.parse_listing(LISTING).remove(1);

    let result = source.complete_item(&mut item, "<html><body><h1>Only a title</h1></body></html>");
    assert!(matches!(result, Err(RelayError::Parse(_))));
    assert!(!item.complete);
}

#[test]
fn bad_selector_is_rejected() {
    let mut spec = grocer_spec();
    spec.link_selector = "h3 >>> a[".to_string();
    assert!(SelectorSource::new(spec).is_err());
}

const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel>
  <title>Grocer press office</title>
  <link>http://press.example.com/</link>
  <description>Releases</description>
  <item>
    <title>Store opening in Leeds</title>
    <link>http://press.example.com/releases/leeds</link>
    <description>A new store opens on Monday.</description>
    <pubDate>Tue, 10 Jun 2014 09:00:00 GMT</pubDate>
  </item>
  <item>
    <title>Half year results</title>
    <link>http://press.example.com/releases/results</link>
  </item>
</channel></rss>"#;

fn feed_source(content_selector: Option<&str>) -> FeedSource {
    FeedSource::new(FeedSpec {
        topic: "grocer-feed".to_string(),
        feed_url: "http://press.example.com/rss".to_string(),
        content_selector: content_selector.map(str::to_string),
        cruft_selector: None,
    })
    .unwrap()
}

#[test]
fn feed_entries_with_bodies_come_back_complete() {
    let source = feed_source(Some(".article"));
    let candidates = source.parse_listing(FEED).unwrap();
    assert_eq!(candidates.len(), 2);

    let leeds = &candidates[0];
    assert_eq!(leeds.permalink, "http://press.example.com/releases/leeds");
    assert_eq!(leeds.title, "Store opening in Leeds");
    assert_eq!(leeds.content, "A new store opens on Monday.");
    assert_eq!(leeds.published_at.map(|d| (d.year(), d.month(), d.day())), Some((2014, 6, 10)));
    assert!(leeds.complete);

    let results = &candidates[1];
    assert!(!results.complete);
    assert!(results.content.is_empty());
}

#[test]
fn feed_entry_without_body_is_completed_from_its_page() {
    let source = feed_source(Some(".article"));
    let mut results = source.parse_listing(FEED).unwrap().remove(1);

    source
        .complete_item(&mut results, r#"<div class="article"><p>Sales up 4%.</p></div>"#)
        .unwrap();
    assert!(results.complete);
    assert_eq!(results.content, "<p>Sales up 4%.</p>");
    assert_eq!(results.title, "Half year results");

    let bare = feed_source(None);
    let mut results = bare.parse_listing(FEED).unwrap().remove(1);
    assert!(bare.complete_item(&mut results, "<p>anything</p>").is_err());
}

#[test]
fn garbage_feed_is_a_parse_error() {
    let source = feed_source(None);
    assert!(matches!(source.parse_listing("<html>not a feed"), Err(RelayError::Parse(_))));
}

#[test]
fn source_specs_parse_from_json() {
    let raw = r##"[
        {"kind": "selector", "topic": "grocer", "listing_url": "http://press.example.com/",
         "link_selector": ".item a", "title_selector": "h1", "content_selector": "#body"},
        {"kind": "feed", "topic": "grocer-feed", "feed_url": "http://press.example.com/rss"}
    ]"##;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sources.json");
    std::fs::write(&path, raw).unwrap();

    let specs = load_specs(&path).unwrap();
    assert_eq!(specs.len(), 2);
    assert!(matches!(&specs[0], SourceSpec::Selector(s) if s.cruft_selector.is_none()));
    assert_eq!(specs[1].topic(), "grocer-feed");

    let sources = build_sources(specs).unwrap();
    let topics: Vec<_> = sources.iter().map(|s| s.topic().to_string()).collect();
    assert_eq!(topics, vec!["grocer", "grocer-feed"]);
}

#[test]
fn builtin_sources_build() {
    let sources = build_sources(builtin_specs()).unwrap();
    let topics: Vec<_> = sources.iter().map(|s| s.topic()).collect();
    assert_eq!(topics, vec!["72point", "waitrose"]);
}

#[test]
fn duplicate_and_invalid_topics_are_refused() {
    let mut specs = builtin_specs();
    specs.push(specs[0].clone());
    assert!(matches!(build_sources(specs), Err(RelayError::Config(_))));

    let mut spec = grocer_spec();
    spec.topic = "a/b".to_string();
    assert!(matches!(
        build_sources(vec![SourceSpec::Selector(spec)]),
        Err(RelayError::Config(_))
    ));
}
