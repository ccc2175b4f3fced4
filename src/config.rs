use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use scraper::Selector;
use serde::Deserialize;
use url::Url;

use crate::parser::index::PairingMode;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SiteConfig {
    /// Forum root; category boards live at `<base_url><category>/`.
    pub base_url: String,
    pub default_category: String,
    /// Alternating-row selectors, odd rows first.
    pub row_selectors: Vec<String>,
    pub title_selector: String,
    pub body_selector: String,
    pub comment_selector: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://bbs.wenxuecity.com/".to_string(),
            default_category: "znjy".to_string(),
            row_selectors: vec!["div.odd".to_string(), "div.even".to_string()],
            title_selector: "h1.title".to_string(),
            body_selector: "#msgbodyContent".to_string(),
            comment_selector: "#comment a.post".to_string(),
        }
    }
}

impl SiteConfig {
    pub fn category_url(&self, category: &str) -> String {
        format!("{}{}/", self.base_url, category.trim_matches('/'))
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CrawlConfig {
    pub first_page: u32,
    pub last_page: u32,
    pub lookback_days: u32,
    pub pairing: PairingMode,
    pub early_exit: bool,
    pub dedup: bool,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            first_page: 1,
            last_page: 10,
            lookback_days: 3,
            pairing: PairingMode::PerRow,
            early_exit: false,
            dedup: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FetchBackend {
    Http,
    Spider,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FetchConfig {
    pub backend: FetchBackend,
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            backend: FetchBackend::Http,
            timeout_secs: 30,
            user_agent: concat!("wxc_crawler/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: PathBuf,
    pub table: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/wxc.sqlite"),
            table: "wxc_posts".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub enabled: bool,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Whole-request limit; long generations from a local model need minutes.
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "http://127.0.0.1:1234/v1".to_string(),
            model: "openai/gpt-oss-20b".to_string(),
            temperature: 0.7,
            max_tokens: 65536,
            timeout_secs: 300,
        }
    }
}

/// Load config from `path`, or defaults when no path is given.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            toml::from_str(&content).with_context(|| "Failed to parse config file")?
        }
        None => Config::default(),
    };
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    let base = Url::parse(&config.site.base_url)
        .with_context(|| format!("site.base_url is not a URL: {}", config.site.base_url))?;
    if !base.path().ends_with('/') {
        bail!("site.base_url must end with '/'");
    }
    if config.site.row_selectors.is_empty() {
        bail!("site.row_selectors must not be empty");
    }
    let selectors = config
        .site
        .row_selectors
        .iter()
        .chain([
            &config.site.title_selector,
            &config.site.body_selector,
            &config.site.comment_selector,
        ]);
    for css in selectors {
        if Selector::parse(css).is_err() {
            bail!("invalid CSS selector: {css}");
        }
    }

    if config.crawl.first_page == 0 {
        bail!("crawl.first_page must be >= 1");
    }
    if config.crawl.first_page > config.crawl.last_page {
        bail!(
            "crawl.first_page ({}) is after crawl.last_page ({})",
            config.crawl.first_page,
            config.crawl.last_page
        );
    }

    if config.fetch.timeout_secs == 0 {
        bail!("fetch.timeout_secs must be > 0");
    }
    if config.llm.timeout_secs == 0 {
        bail!("llm.timeout_secs must be > 0");
    }

    if !is_identifier(&config.storage.table) {
        bail!("storage.table is not a plain SQL identifier: {}", config.storage.table);
    }
    Ok(())
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
