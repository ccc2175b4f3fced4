use std::time::{Duration, Instant};

use async_trait::async_trait;
use spider_client::shapes::request::{ReturnFormat, ReturnFormatHandling};
use spider_client::{RequestParams, Spider};
use thiserror::Error;
use tracing::debug;

use crate::config::{FetchBackend, FetchConfig};

/// Any of these means "no data for this URL"; none of them abort a run.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("HTTP status {0}")]
    Status(u16),
    #[error("fetch backend error: {0}")]
    Backend(String),
    #[error("fetcher misconfigured: {0}")]
    Config(String),
}

/// Source of rendered HTML for a URL.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

pub fn build_fetcher(config: &FetchConfig) -> Result<Box<dyn PageFetcher>, FetchError> {
    let fetcher: Box<dyn PageFetcher> = match config.backend {
        FetchBackend::Http => Box::new(HttpFetcher::new(config)?),
        FetchBackend::Spider => Box::new(SpiderFetcher::from_env(config)?),
    };
    Ok(fetcher)
}

/// Plain GET with a per-request timeout.
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Config(e.to_string()))?;
        Ok(Self { client, timeout })
    }

    fn classify(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let start = Instant::now();
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let body = response.text().await.map_err(|e| self.classify(e))?;
        debug!(url, bytes = body.len(), ms = start.elapsed().as_millis() as u64, "fetched");
        Ok(body)
    }
}

/// Browser-rendered HTML through spider.cloud.
pub struct SpiderFetcher {
    spider: Spider,
    timeout: Duration,
}

impl SpiderFetcher {
    pub fn from_env(config: &FetchConfig) -> Result<Self, FetchError> {
        let api_key = std::env::var("SPIDER_API_KEY").map_err(|_| {
            FetchError::Config("SPIDER_API_KEY environment variable must be set".into())
        })?;
        let spider = Spider::new(Some(api_key))
            .map_err(|e| FetchError::Config(format!("Failed to create Spider client: {}", e)))?;
        Ok(Self {
            spider,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }
}

#[async_trait]
impl PageFetcher for SpiderFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let params = RequestParams {
            return_format: Some(ReturnFormatHandling::Single(ReturnFormat::Raw)),
            ..Default::default()
        };

        let start = Instant::now();
        let scrape = self.spider.scrape_url(url, Some(params), "application/json");
        let response = tokio::time::timeout(self.timeout, scrape)
            .await
            .map_err(|_| FetchError::Timeout(self.timeout))?
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let parsed: serde_json::Value = match response.as_str() {
            Some(s) => serde_json::from_str(s).unwrap_or(response.clone()),
            None => response,
        };
        let first = parsed.as_array().and_then(|arr| arr.first());

        if let Some(status) = first.and_then(|obj| obj.get("status")).and_then(|s| s.as_u64()) {
            if !(200..300).contains(&status) {
                return Err(FetchError::Status(status as u16));
            }
        }

        let content = first
            .and_then(|obj| obj.get("content"))
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| FetchError::Backend("No content in spider response".into()))?;

        debug!(url, bytes = content.len(), ms = start.elapsed().as_millis() as u64, "fetched via spider");
        Ok(content)
    }
}


#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    /// Accepts one connection and holds it open without answering.
    async fn silent_server() -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/znjy/1.html", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });
        (url, handle)
    }

    #[tokio::test]
    async fn unresponsive_server_is_a_timeout() {
        let (url, server) = silent_server().await;
        let config = FetchConfig {
            timeout_secs: 1,
            ..FetchConfig::default()
        };
        let fetcher = HttpFetcher::new(&config).unwrap();

        let start = Instant::now();
        let err = fetcher.fetch(&url).await.unwrap_err();
        assert!(matches!(err, FetchError::Timeout(d) if d == Duration::from_secs(1)), "{err}");
        assert!(start.elapsed() < Duration::from_secs(10));
        server.abort();
    }

    #[tokio::test]
    async fn refused_connection_is_a_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/", listener.local_addr().unwrap());
        drop(listener);

        let fetcher = HttpFetcher::new(&FetchConfig::default()).unwrap();
        let err = fetcher.fetch(&url).await.unwrap_err();
        assert!(matches!(err, FetchError::Network(_)), "{err}");
    }
}
