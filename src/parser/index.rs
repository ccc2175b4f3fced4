use std::collections::BTreeMap;
use std::sync::LazyLock;

use anyhow::{anyhow, Result};
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::config::SiteConfig;
use crate::date::DateKey;

static ANCHOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a").unwrap());

/// Post URLs grouped by posting date, in discovery order. Duplicates are kept.
pub type ResultBucket = BTreeMap<DateKey, Vec<String>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub href: String,
    pub raw_date: String,
    pub date: DateKey,
}

/// How hrefs and dates found on one index page are matched up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingMode {
    /// Anchor and date come from the same row; rows missing either are dropped.
    PerRow,
    /// Legacy behavior: collect all hrefs and all dates separately, then zip
    /// by index. A row with only one of the two shifts every later pair.
    Positional,
}

pub struct IndexSelectors {
    rows: Vec<Selector>,
}

impl IndexSelectors {
    pub fn from_config(site: &SiteConfig) -> Result<Self> {
        let rows = site
            .row_selectors
            .iter()
            .map(|css| Selector::parse(css).map_err(|e| anyhow!("bad row selector {css}: {e}")))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rows })
    }
}

/// Extract (href, date) entries from one index page. Rows are visited one
/// selector at a time (all odd rows, then all even rows), not in document order.
pub fn parse_index(
    html: &str,
    base: &Url,
    selectors: &IndexSelectors,
    mode: PairingMode,
) -> Vec<IndexEntry> {
    let document = Html::parse_document(html);
    let rows: Vec<ElementRef> = selectors
        .rows
        .iter()
        .flat_map(|sel| document.select(sel))
        .collect();
    debug!(rows = rows.len(), ?mode, "index rows selected");

    match mode {
        PairingMode::PerRow => rows
            .iter()
            .filter_map(|row| {
                let href = first_href(row)?;
                let (date, raw_date) = row_date(row)?;
                Some(IndexEntry {
                    href: absolutize(base, href),
                    raw_date,
                    date,
                })
            })
            .collect(),
        PairingMode::Positional => {
            let hrefs: Vec<&str> = rows.iter().filter_map(first_href).collect();
            let dates: Vec<(DateKey, String)> = rows.iter().filter_map(row_date).collect();
            if hrefs.len() != dates.len() {
                debug!(
                    hrefs = hrefs.len(),
                    dates = dates.len(),
                    "positional pairing with unequal lists, pairs may be misaligned"
                );
            }
            dates
                .into_iter()
                .zip(hrefs)
                .map(|((date, raw_date), href)| IndexEntry {
                    href: absolutize(base, href),
                    raw_date,
                    date,
                })
                .collect()
        }
    }
}

/// Group entries by date, keeping page order.
pub fn bucket(entries: Vec<IndexEntry>) -> ResultBucket {
    let mut out = ResultBucket::new();
    for entry in entries {
        out.entry(entry.date).or_default().push(entry.href);
    }
    out
}

fn first_href<'a>(row: &ElementRef<'a>) -> Option<&'a str> {
    row.select(&ANCHOR)
        .next()?
        .value()
        .attr("href")
        .map(str::trim)
        .filter(|h| !h.is_empty())
}

fn row_date(row: &ElementRef) -> Option<(DateKey, String)> {
    let text: String = row.text().collect();
    DateKey::find_in_text(&text)
}

fn absolutize(base: &Url, href: &str) -> String {
    match base.join(href) {
        Ok(url) => url.to_string(),
        Err(_) => format!("{}{}", base, href.strip_prefix("./").unwrap_or(href)),
    }
}
