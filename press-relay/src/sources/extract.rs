//! Small HTML helpers shared by the scraping sources.

use crate::types::{RelayError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use scraper::{ElementRef, Html, Selector};
use url::Url;

pub fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| RelayError::Parse(format!("bad selector {:?}: {:?}", css, e)))
}

pub fn optional_selector(css: Option<&str>) -> Result<Option<Selector>> {
    css.filter(|s| !s.trim().is_empty()).map(selector).transpose()
}

/// Visible text of an element with whitespace collapsed.
pub fn text_of(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn first_text(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .next()
        .map(text_of)
        .filter(|text| !text.is_empty())
}

/// Inner HTML of the first match, with any `cruft` descendants cut out.
pub fn first_inner_html(document: &Html, selector: &Selector, cruft: Option<&Selector>) -> Option<String> {
    let element = document.select(selector).next()?;
    let mut html = element.inner_html();

    if let Some(cruft) = cruft {
        for junk in element.select(cruft) {
            html = html.replace(&junk.html(), "");
        }
    }

    let html = html.trim().to_string();
    if html.is_empty() {
        None
    } else {
        Some(html)
    }
}

/// `(link text, absolute href)` for every anchor matched by `selector`.
pub fn links(document: &Html, selector: &Selector, base: &Url) -> Vec<(String, String)> {
    document
        .select(selector)
        .filter_map(|anchor| {
            let href = anchor.value().attr("href")?.trim();
            if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
                return None;
            }
            let absolute = base.join(href).ok()?;
            Some((text_of(anchor), absolute.to_string()))
        })
        .collect()
}

const DATE_FORMATS: &[&str] = &[
    "%d %B %Y",
    "%d %b %Y",
    "%B %d %Y",
    "%b %d %Y",
    "%A %d %B %Y",
    "%d/%m/%Y",
    "%d.%m.%Y",
    "%Y-%m-%d",
];

/// Best-effort parse of a human-written release date.
///
/// Press pages tend to wrap the date in other words ("Posted 3rd March 2014
/// in News"), so every run of one to four words is tried against a handful of
/// formats after ordinal suffixes and commas are stripped.
pub fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    let words: Vec<String> = trimmed
        .split_whitespace()
        .map(|w| strip_ordinal(w.trim_matches(|c: char| c == ',' || c == '|' || c == '(' || c == ')')))
        .filter(|w| !w.is_empty())
        .collect();

    for window in [4, 3, 1] {
        if words.len() < window {
            continue;
        }
        for start in 0..=words.len() - window {
            let candidate = words[start..start + window].join(" ");
            for format in DATE_FORMATS {
                if let Ok(date) = NaiveDate::parse_from_str(&candidate, format) {
                    return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
                }
            }
        }
    }

    None
}

fn strip_ordinal(word: &str) -> String {
    let digits = word.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 || digits == word.len() {
        return word.to_string();
    }
    let suffix = &word[digits..];
    if matches!(suffix.to_ascii_lowercase().as_str(), "st" | "nd" | "rd" | "th") {
        word[..digits].to_string()
    } else {
        word.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn parses_dates_buried_in_text() {
        let date = parse_date("Posted 3rd March 2014 in News").unwrap();
        assert_eq!((date.year(), date.month(), date.day()), (2014, 3, 3));

        let date = parse_date("Release date: 21/11/2013").unwrap();
        assert_eq!((date.year(), date.month(), date.day()), (2013, 11, 21));

        let date = parse_date("Thursday 5 June 2014").unwrap();
        assert_eq!((date.year(), date.month(), date.day()), (2014, 6, 5));

        assert!(parse_date("no date here").is_none());
        assert!(parse_date("").is_none());
    }

    #[test]
    fn cruft_is_removed_from_content() {
        let document = Html::parse_document(
            r#"<div id="body"><p>Real text</p><div class="share">Share this</div></div>"#,
        );
        let content = first_inner_html(
            &document,
            &selector("#body").unwrap(),
            Some(&selector(".share").unwrap()),
        )
        .unwrap();
        assert_eq!(content, "<p>Real text</p>");
    }
}
