use anyhow::{anyhow, Result};
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use tracing::debug;

use crate::config::SiteConfig;

/// One forum thread: the opening post plus its reply titles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostRecord {
    pub url: String,
    pub title: String,
    pub body: String,
    pub comments: Vec<String>,
}

impl PostRecord {
    /// Threads nobody answered are not worth storing.
    pub fn is_empty(&self) -> bool {
        self.comments.is_empty()
    }
}

pub struct PostSelectors {
    title: Selector,
    body: Selector,
    comment: Selector,
}

impl PostSelectors {
    pub fn from_config(site: &SiteConfig) -> Result<Self> {
        let parse = |css: &str| Selector::parse(css).map_err(|e| anyhow!("bad selector {css}: {e}"));
        Ok(Self {
            title: parse(&site.title_selector)?,
            body: parse(&site.body_selector)?,
            comment: parse(&site.comment_selector)?,
        })
    }
}

/// Missing elements degrade to empty fields; only fetching can fail.
pub fn parse_post(url: &str, html: &str, selectors: &PostSelectors) -> PostRecord {
    let document = Html::parse_document(html);

    let title = document
        .select(&selectors.title)
        .next()
        .map(collapsed_text)
        .unwrap_or_default();
    let body = document
        .select(&selectors.body)
        .next()
        .map(collapsed_text)
        .unwrap_or_default();
    let comments: Vec<String> = document
        .select(&selectors.comment)
        .map(collapsed_text)
        .filter(|c| !c.is_empty())
        .collect();

    if title.is_empty() || body.is_empty() {
        debug!(url, title = !title.is_empty(), body = !body.is_empty(), "post fields missing");
    }

    PostRecord {
        url: url.to_string(),
        title,
        body,
        comments,
    }
}

fn collapsed_text(el: ElementRef) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}
