mod analyzer;
mod config;
mod crawler;
mod date;
mod db;
mod fetcher;
mod parser;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use crate::analyzer::Analyzer;
use crate::config::Config;
use crate::crawler::{CrawlReport, Crawler, PostOutcome};
use crate::date::DateKey;
use crate::parser::index::PairingMode;
use crate::parser::Selectors;

#[derive(Parser)]
#[command(name = "wxc_crawler", about = "Crawl dated forum threads into SQLite")]
struct Cli {
    /// TOML config file; built-in defaults are used without one
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl index pages, fetch posts dated TARGET and store them
    Run {
        /// Board to crawl (default from config)
        #[arg(short, long)]
        category: Option<String>,
        /// Target date as yyyymmdd (default: today minus lookback_days)
        #[arg(short, long, aliases = ["date-str", "date_str"])]
        date: Option<DateKey>,
        #[arg(long)]
        first_page: Option<u32>,
        #[arg(long)]
        last_page: Option<u32>,
        /// Pair hrefs and dates by list position (legacy behavior)
        #[arg(long)]
        positional: bool,
        /// Drop repeated post URLs before fetching
        #[arg(long)]
        dedup: bool,
        /// Stop at the first page entirely older than the target date
        #[arg(long)]
        early_exit: bool,
        /// Summarize each post with the configured LLM
        #[arg(long)]
        analyze: bool,
    },
    /// Parse a single index page and list its entries
    Index {
        #[arg(short, long)]
        category: Option<String>,
        #[arg(short, long, default_value = "1")]
        page: u32,
    },
    /// Fetch one post and print it as JSON
    Post { url: String },
    /// Fetch one post and print the LLM summary
    Analyze { url: String },
    /// Create or upgrade the posts table
    Init,
    /// Newest stored date for a category
    Latest {
        #[arg(short, long)]
        category: Option<String>,
    },
    /// Stored post count
    Stats {
        #[arg(short, long)]
        category: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut config = config::load_config(cli.config.as_deref())?;

    let result = match cli.command {
        Commands::Run {
            category,
            date,
            first_page,
            last_page,
            positional,
            dedup,
            early_exit,
            analyze,
        } => {
            if let Some(n) = first_page {
                config.crawl.first_page = n;
            }
            if let Some(n) = last_page {
                config.crawl.last_page = n;
            }
            if positional {
                config.crawl.pairing = PairingMode::Positional;
            }
            config.crawl.dedup |= dedup;
            config.crawl.early_exit |= early_exit;
            config.llm.enabled |= analyze;
            config::validate(&config)?;

            let category = category.unwrap_or_else(|| config.site.default_category.clone());
            let target = match date {
                Some(d) => {
                    println!("Using provided target date: {}", d.storage());
                    d
                }
                None => {
                    let today = chrono::Local::now().date_naive();
                    let d = DateKey::days_before(today, config.crawl.lookback_days);
                    println!(
                        "Target date ({} days back): {}",
                        config.crawl.lookback_days,
                        d.storage()
                    );
                    d
                }
            };
            let report = run(&config, &category, target).await?;
            report.print();
            Ok(())
        }
        Commands::Index { category, page } => {
            let category = category.unwrap_or_else(|| config.site.default_category.clone());
            let fetcher = fetcher::build_fetcher(&config.fetch)?;
            let selectors = Selectors::from_config(&config.site)?;
            let crawler = Crawler::new(
                fetcher.as_ref(),
                &selectors,
                &config.site.category_url(&category),
                &config.crawl,
            )?;
            let entries = crawler.crawl_index_page(page).await;
            if entries.is_empty() {
                println!("No dated entries on page {}.", page);
                return Ok(());
            }
            for (i, e) in entries.iter().enumerate() {
                println!("{:>3} | {} | {} | {}", i + 1, e.raw_date, e.date.storage(), e.href);
            }
            println!("\n{} entries", entries.len());
            Ok(())
        }
        Commands::Post { url } => {
            let record = fetch_single(&config, &url).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
        Commands::Analyze { url } => {
            let record = fetch_single(&config, &url).await?;
            let analyzer = Analyzer::new(config.llm.clone())?;
            let summary = analyzer.summarize(&record).await?;
            println!("Analysis of: {}", record.title);
            println!("{}", "=".repeat(60));
            println!("{}", summary);
            Ok(())
        }
        Commands::Init => {
            let conn = db::connect(&config.storage.db_path)?;
            db::init_schema(&conn, &config.storage.table)?;
            println!(
                "Table {} ready in {}",
                config.storage.table,
                config.storage.db_path.display()
            );
            Ok(())
        }
        Commands::Latest { category } => {
            let category = category.unwrap_or_else(|| config.site.default_category.clone());
            let conn = db::connect(&config.storage.db_path)?;
            db::init_schema(&conn, &config.storage.table)?;
            match db::latest_date_key(&conn, &config.storage.table, &category)? {
                Some(d) => println!("{}", d.storage()),
                None => println!("No posts stored for {}.", category),
            }
            Ok(())
        }
        Commands::Stats { category } => {
            let conn = db::connect(&config.storage.db_path)?;
            db::init_schema(&conn, &config.storage.table)?;
            let count = db::count_posts(&conn, &config.storage.table, category.as_deref())?;
            match category {
                Some(c) => println!("{}: {} posts", c, count),
                None => println!("Total: {} posts", count),
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", elapsed_label(elapsed));
    }

    result
}

/// Crawl, fetch, optionally summarize, then store.
async fn run(config: &Config, category: &str, target: DateKey) -> anyhow::Result<CrawlReport> {
    let fetcher = fetcher::build_fetcher(&config.fetch)?;
    let selectors = Selectors::from_config(&config.site)?;
    let crawler = Crawler::new(
        fetcher.as_ref(),
        &selectors,
        &config.site.category_url(category),
        &config.crawl,
    )?;

    let mut report = CrawlReport::default();
    let pages = config.crawl.first_page..=config.crawl.last_page;
    info!("Crawling {} pages {:?} for {}", category, pages, target.sort_key());
    let crawl = crawler.crawl_range(pages, target).await;
    report.pages = crawl.pages_visited;

    let mut urls = crawl.bucket.get(&target).cloned().unwrap_or_default();
    if config.crawl.dedup {
        urls = crawler::dedup_urls(urls);
    }
    report.matched = urls.len();

    if urls.is_empty() {
        println!("No posts found matching {}.", target);
        return Ok(report);
    }
    println!("\nPosts from {}:", target);
    for (i, url) in urls.iter().enumerate() {
        println!("  {}. {}", i + 1, url);
    }

    let outcomes = crawler.fetch_posts(&urls).await;
    report.tally(&outcomes);

    let analyzer = if config.llm.enabled {
        Some(Analyzer::new(config.llm.clone())?)
    } else {
        None
    };
    let mut rows = Vec::new();
    for outcome in outcomes {
        let PostOutcome::Fetched(record) = outcome else {
            continue;
        };
        let summary = match &analyzer {
            Some(a) => match a.summarize(&record).await {
                Ok(s) => Some(s),
                Err(e) => {
                    warn!("LLM summary failed for {}: {:#}", record.url, e);
                    None
                }
            },
            None => None,
        };
        println!("  + {}", title_preview(&record.title));
        rows.extend(db::PostRow::from_record(record, category, target, summary));
    }

    if rows.is_empty() {
        println!("No post data to store.");
        return Ok(report);
    }

    let conn = db::connect(&config.storage.db_path)?;
    db::init_schema(&conn, &config.storage.table)
        .with_context(|| format!("Failed to prepare table {}", config.storage.table))?;
    let stats = db::insert_posts(&conn, &config.storage.table, &rows);
    report.attempted = stats.attempted;
    report.inserted = stats.inserted;
    Ok(report)
}

async fn fetch_single(config: &Config, url: &str) -> anyhow::Result<parser::post::PostRecord> {
    let fetcher = fetcher::build_fetcher(&config.fetch)?;
    let selectors = Selectors::from_config(&config.site)?;
    let html = fetcher
        .fetch(url)
        .await
        .with_context(|| format!("Failed to fetch {}", url))?;
    Ok(parser::post::parse_post(url, &html, &selectors.post))
}

/// First 40 characters of a thread title for the progress listing.
fn title_preview(title: &str) -> String {
    const WIDTH: usize = 40;
    match title.char_indices().nth(WIDTH) {
        Some((cut, _)) => format!("{}…", &title[..cut]),
        None => title.to_string(),
    }
}

/// Wall-clock label such as `4.2s` or `12:05` (minutes:seconds).
fn elapsed_label(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else {
        format!("{}:{:02}", secs / 60, secs % 60)
    }
}
