use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use once_cell::sync::Lazy;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::{Client, ClientBuilder};
use scraper::{Html, Selector};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

use crate::config::FetchConfig;
use crate::error::{AppError, Result};

// Create static selectors to avoid recompiling them each time
static BODY_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("body").expect("Failed to parse body selector")
});

static NOISE_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("script, style, noscript, template, svg")
        .expect("Failed to parse noise selector")
});

/// Anything that can turn a URL into page HTML.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// One entry of a crawl: the URL and either its body or why it is missing.
#[derive(Debug)]
pub struct FetchedPage {
    pub url: String,
    pub body: Result<String>,
}

/// reqwest-backed fetcher with fixed browser-like headers and a cookie jar.
pub struct HttpFetcher {
    client: Client,
    obey_robots_txt: bool,
    // robots.txt body per origin; `None` when it could not be retrieved.
    robots: Mutex<HashMap<String, Option<String>>>,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, header_value(&config.accept)?);
        headers.insert(ACCEPT_LANGUAGE, header_value(&config.accept_language)?);
        for (name, value) in &config.extra_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| AppError::ConfigError(format!("Invalid header name '{}': {}", name, e)))?;
            headers.insert(name, header_value(value)?);
        }

        let client = ClientBuilder::new()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .cookie_store(true)
            .timeout(config.request_timeout)
            .connect_timeout(config.request_timeout.min(Duration::from_secs(10)))
            .build()
            .map_err(|e| AppError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            obey_robots_txt: config.obey_robots_txt,
            robots: Mutex::new(HashMap::new()),
        })
    }

    async fn allowed_by_robots(&self, url: &Url) -> bool {
        let origin = url.origin().ascii_serialization();
        let mut cache = self.robots.lock().await;
        if !cache.contains_key(&origin) {
            let body = self.fetch_robots(url).await;
            cache.insert(origin.clone(), body);
        }

        match cache.get(&origin) {
            Some(Some(body)) => robots_allows(body, url.path()),
            _ => true,
        }
    }

    async fn fetch_robots(&self, url: &Url) -> Option<String> {
        let robots_url = url.join("/robots.txt").ok()?;
        match self.client.get(robots_url.clone()).send().await {
            Ok(resp) if resp.status().is_success() => resp.text().await.ok(),
            Ok(resp) => {
                debug!(url = %robots_url, status = %resp.status(), "no robots.txt, allowing");
                None
            }
            Err(e) => {
                debug!(url = %robots_url, error = %e, "robots.txt unreachable, allowing");
                None
            }
        }
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| AppError::ConfigError(format!("Invalid header value '{}': {}", value, e)))
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let parsed = Url::parse(url).map_err(|e| AppError::FetchError(format!("Invalid URL {}: {}", url, e)))?;

        if self.obey_robots_txt && !self.allowed_by_robots(&parsed).await {
            return Err(AppError::FetchError(format!("{} is disallowed by robots.txt", url)));
        }

        let response = self.client.get(parsed).send().await?.error_for_status()?;
        let html = response.text().await?;
        Ok(html)
    }
}

/// Fetch `urls` in order, one request at a time, pausing `delay` between requests.
///
/// The stream is lazy: nothing is requested until it is polled, and a failed
/// URL shows up as an `Err` body instead of ending the sequence.
pub fn fetch_all<'a, F>(
    fetcher: &'a F,
    urls: Vec<String>,
    delay: Duration,
) -> impl Stream<Item = FetchedPage> + Send + 'a
where
    F: PageFetcher + ?Sized,
{
    async_stream::stream! {
        for (i, url) in urls.into_iter().enumerate() {
            if i > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            debug!(url = %url, "fetching page");
            let body = fetcher.fetch(&url).await;
            if let Err(e) = &body {
                warn!(url = %url, error = %e, "page fetch failed");
            }
            yield FetchedPage { url, body };
        }
    }
}

/// Visible text of `<body>`, one text run per line.
pub fn extract_body_text(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let body = document.select(&BODY_SELECTOR).next()?;

    // Every node inside a noise element, so each text node is a single lookup.
    let noise: HashSet<_> = body
        .select(&NOISE_SELECTOR)
        .flat_map(|el| el.descendants().map(|node| node.id()))
        .collect();

    let mut text = String::with_capacity(html.len() / 4);
    for node in body.descendants() {
        let Some(fragment) = node.value().as_text() else {
            continue;
        };
        if noise.contains(&node.id()) {
            continue;
        }
        text.push_str(fragment);
        text.push('\n');
    }

    Some(format_text(&text))
}

/// Trim every line and drop the empty ones.
pub fn format_text(text: &str) -> String {
    let mut result = String::with_capacity(text.len());

    for line in text.lines() {
        let trimmed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if !trimmed.is_empty() {
            if !result.is_empty() {
                result.push('\n');
            }
            result.push_str(&trimmed);
        }
    }

    result
}

/// Cut `text` to at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Checks `path` against the `User-agent: *` group of a robots.txt body.
pub fn robots_allows(robots: &str, path: &str) -> bool {
    let mut in_wildcard_group = false;
    let mut last_was_agent = false;

    for raw in robots.lines() {
        let line = raw.split('#').next().unwrap_or("").trim();
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();

        match key.as_str() {
            "user-agent" => {
                // Consecutive user-agent lines share one group.
                if !last_was_agent {
                    in_wildcard_group = false;
                }
                if value == "*" {
                    in_wildcard_group = true;
                }
                last_was_agent = true;
            }
            "disallow" => {
                last_was_agent = false;
                if in_wildcard_group && !value.is_empty() && path.starts_with(value) {
                    return false;
                }
            }
            _ => last_was_agent = false,
        }
    }

    true
}
