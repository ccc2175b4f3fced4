use std::collections::HashSet;
use std::ops::RangeInclusive;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};
use url::Url;

use crate::config::CrawlConfig;
use crate::date::DateKey;
use crate::fetcher::{FetchError, PageFetcher};
use crate::parser::index::{self, IndexEntry, PairingMode, ResultBucket};
use crate::parser::post::{self, PostRecord};
use crate::parser::Selectors;

/// Index page `n` of a category board. Page 1 is the bare board URL.
pub fn page_url(base: &Url, page: u32) -> String {
    if page <= 1 {
        base.to_string()
    } else {
        format!("{}?page={}", base, page)
    }
}

pub enum PostOutcome {
    Fetched(PostRecord),
    /// Fetched fine but nobody replied.
    Empty { url: String },
    Failed { url: String, error: FetchError },
}

pub struct RangeCrawl {
    pub bucket: ResultBucket,
    pub pages_visited: usize,
}

/// Walks one category board: index pages first, then the matching posts.
pub struct Crawler<'a> {
    fetcher: &'a dyn PageFetcher,
    selectors: &'a Selectors,
    base: Url,
    pairing: PairingMode,
    early_exit: bool,
}

impl<'a> Crawler<'a> {
    pub fn new(
        fetcher: &'a dyn PageFetcher,
        selectors: &'a Selectors,
        category_url: &str,
        crawl: &CrawlConfig,
    ) -> Result<Self> {
        let base = Url::parse(category_url)
            .with_context(|| format!("Bad category URL: {}", category_url))?;
        Ok(Self {
            fetcher,
            selectors,
            base,
            pairing: crawl.pairing,
            early_exit: crawl.early_exit,
        })
    }

    /// Fetch and parse one index page. A failed fetch yields no entries.
    pub async fn crawl_index_page(&self, page: u32) -> Vec<IndexEntry> {
        let url = page_url(&self.base, page);
        info!("Crawling index page {} ({})", page, url);

        let html = match self.fetcher.fetch(&url).await {
            Ok(html) => html,
            Err(e) => {
                warn!("Failed to fetch index page {}: {}", url, e);
                return Vec::new();
            }
        };
        let entries = index::parse_index(&html, &self.base, &self.selectors.index, self.pairing);
        info!("Page {}: {} dated entries", page, entries.len());
        entries
    }

    /// Collect every post dated `target` across `pages`, in page order.
    pub async fn crawl_range(&self, pages: RangeInclusive<u32>, target: DateKey) -> RangeCrawl {
        let mut bucket = ResultBucket::new();
        let mut pages_visited = 0;

        for page in pages {
            let entries = self.crawl_index_page(page).await;
            pages_visited += 1;

            // Boards list newest first, so a page entirely older than the
            // target means later pages hold nothing for it.
            let exhausted = !entries.is_empty() && entries.iter().all(|e| e.date < target);

            let matching: Vec<IndexEntry> =
                entries.into_iter().filter(|e| e.date == target).collect();
            if !matching.is_empty() {
                info!("Found {} posts with date {}", matching.len(), target);
            }
            for (date, urls) in index::bucket(matching) {
                bucket.entry(date).or_default().extend(urls);
            }

            if self.early_exit && exhausted {
                info!("Page {} is older than {}, stopping early", page, target);
                break;
            }
        }

        RangeCrawl {
            bucket,
            pages_visited,
        }
    }

    pub async fn fetch_post(&self, url: &str) -> PostOutcome {
        match self.fetcher.fetch(url).await {
            Ok(html) => {
                let record = post::parse_post(url, &html, &self.selectors.post);
                if record.is_empty() {
                    PostOutcome::Empty {
                        url: url.to_string(),
                    }
                } else {
                    PostOutcome::Fetched(record)
                }
            }
            Err(error) => PostOutcome::Failed {
                url: url.to_string(),
                error,
            },
        }
    }

    /// Fetch posts one after another.
    pub async fn fetch_posts(&self, urls: &[String]) -> Vec<PostOutcome> {
        let pb = ProgressBar::new(urls.len() as u64);
        if let Ok(style) =
            ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40} {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("=> "));
        }

        let mut outcomes = Vec::with_capacity(urls.len());
        for url in urls {
            pb.set_message(url.clone());
            let outcome = self.fetch_post(url).await;
            match &outcome {
                PostOutcome::Fetched(record) => {
                    info!("Fetched {} ({} comments)", url, record.comments.len())
                }
                PostOutcome::Empty { url } => info!("Skipping empty post: {}", url),
                PostOutcome::Failed { url, error } => warn!("Failed to fetch post {}: {}", url, error),
            }
            outcomes.push(outcome);
            pb.inc(1);
        }
        pb.finish_and_clear();
        outcomes
    }
}

/// Drop repeated URLs, keeping first occurrences in order.
pub fn dedup_urls(urls: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    urls.into_iter().filter(|u| seen.insert(u.clone())).collect()
}

/// Outcome counts for one `run`.
#[derive(Debug, Default)]
pub struct CrawlReport {
    pub pages: usize,
    pub matched: usize,
    pub fetched: usize,
    pub empty: usize,
    pub failed: usize,
    pub attempted: usize,
    pub inserted: usize,
}

impl CrawlReport {
    pub fn tally(&mut self, outcomes: &[PostOutcome]) {
        for outcome in outcomes {
            match outcome {
                PostOutcome::Fetched(_) => self.fetched += 1,
                PostOutcome::Empty { .. } => self.empty += 1,
                PostOutcome::Failed { .. } => self.failed += 1,
            }
        }
    }

    pub fn print(&self) {
        println!(
            "Visited {} pages, matched {} posts ({} fetched, {} empty, {} failed).",
            self.pages, self.matched, self.fetched, self.empty, self.failed,
        );
        println!("Inserted {} of {} posts.", self.inserted, self.attempted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SiteConfig;
    use crate::fetcher::testing::FixtureFetcher;

    const BOARD: &str = "https://bbs.wenxuecity.com/znjy/";

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{}.html", name)).unwrap()
    }

    fn selectors() -> Selectors {
        Selectors::from_config(&SiteConfig::default()).unwrap()
    }

    fn date(raw: &str) -> DateKey {
        DateKey::parse_display(raw).unwrap()
    }

    #[test]
    fn page_urls() {
        let base = Url::parse(BOARD).unwrap();
        assert_eq!(page_url(&base, 1), BOARD);
        assert_eq!(page_url(&base, 3), "https://bbs.wenxuecity.com/znjy/?page=3");
    }

    #[tokio::test]
    async fn collects_only_target_date() {
        let fetcher = FixtureFetcher::default().with(BOARD, &fixture("index_page"));
        let sel = selectors();
        let crawler = Crawler::new(&fetcher, &sel, BOARD, &CrawlConfig::default()).unwrap();

        let target = date("02/18/2025");
        let out = crawler.crawl_range(1..=1, target).await;

        assert_eq!(target.storage(), "20250218");
        assert_eq!(out.bucket.len(), 1);
        assert_eq!(
            out.bucket[&target],
            vec![
                "https://bbs.wenxuecity.com/znjy/1001.html",
                "https://bbs.wenxuecity.com/znjy/1002.html",
            ]
        );
        assert!(!out.bucket.contains_key(&date("02/15/2025")));
    }

    #[tokio::test]
    async fn no_match_is_empty_and_visits_every_page() {
        let fetcher = FixtureFetcher::default().with(BOARD, &fixture("index_page"));
        let sel = selectors();
        let crawler = Crawler::new(&fetcher, &sel, BOARD, &CrawlConfig::default()).unwrap();

        let out = crawler.crawl_range(1..=3, date("01/01/2020")).await;

        assert!(out.bucket.is_empty());
        assert_eq!(out.pages_visited, 3);
        assert_eq!(
            fetcher.calls(),
            vec![
                BOARD.to_string(),
                format!("{BOARD}?page=2"),
                format!("{BOARD}?page=3"),
            ]
        );
    }

    #[tokio::test]
    async fn pages_append_without_dedup() {
        let html = fixture("index_page");
        let fetcher = FixtureFetcher::default()
            .with(BOARD, &html)
            .with(&format!("{BOARD}?page=2"), &html);
        let sel = selectors();
        let crawler = Crawler::new(&fetcher, &sel, BOARD, &CrawlConfig::default()).unwrap();

        let target = date("02/18/2025");
        let out = crawler.crawl_range(1..=2, target).await;
        let urls = out.bucket[&target].clone();
        assert_eq!(urls.len(), 4);

        let unique = dedup_urls(urls);
        assert_eq!(
            unique,
            vec![
                "https://bbs.wenxuecity.com/znjy/1001.html",
                "https://bbs.wenxuecity.com/znjy/1002.html",
            ]
        );
    }

    #[tokio::test]
    async fn early_exit_stops_after_older_page() {
        let html = fixture("index_page");
        let fetcher = FixtureFetcher::default()
            .with(BOARD, &html)
            .with(&format!("{BOARD}?page=2"), &html);
        let sel = selectors();
        let crawl = CrawlConfig {
            early_exit: true,
            ..CrawlConfig::default()
        };
        let crawler = Crawler::new(&fetcher, &sel, BOARD, &crawl).unwrap();

        let out = crawler.crawl_range(1..=5, date("02/20/2025")).await;
        assert!(out.bucket.is_empty());
        assert_eq!(out.pages_visited, 1);
        assert_eq!(fetcher.calls().len(), 1);
    }

    #[tokio::test]
    async fn early_exit_ignores_failed_pages() {
        let fetcher = FixtureFetcher::default();
        let sel = selectors();
        let crawl = CrawlConfig {
            early_exit: true,
            ..CrawlConfig::default()
        };
        let crawler = Crawler::new(&fetcher, &sel, BOARD, &crawl).unwrap();

        let out = crawler.crawl_range(1..=3, date("02/20/2025")).await;
        assert_eq!(out.pages_visited, 3);
    }

    #[tokio::test]
    async fn post_outcomes_are_classified() {
        let fetcher = FixtureFetcher::default()
            .with(&format!("{BOARD}2003.html"), &fixture("post_page"))
            .with(&format!("{BOARD}2005.html"), &fixture("post_no_comments"));
        let sel = selectors();
        let crawler = Crawler::new(&fetcher, &sel, BOARD, &CrawlConfig::default()).unwrap();

        let urls = vec![
            format!("{BOARD}2003.html"),
            format!("{BOARD}2005.html"),
            format!("{BOARD}missing.html"),
        ];
        let outcomes = crawler.fetch_posts(&urls).await;

        assert!(matches!(&outcomes[0], PostOutcome::Fetched(r) if r.comments.len() == 3));
        assert!(matches!(&outcomes[1], PostOutcome::Empty { url } if url.ends_with("2005.html")));
        assert!(matches!(
            &outcomes[2],
            PostOutcome::Failed { error: FetchError::Status(404), .. }
        ));

        let mut report = CrawlReport::default();
        report.tally(&outcomes);
        assert_eq!((report.fetched, report.empty, report.failed), (1, 1, 1));
    }
}
