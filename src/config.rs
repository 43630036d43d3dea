use std::env;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, Result};

/// Supermarket landing and offer pages crawled when `CRAWL_SITES` is unset.
pub const DEFAULT_SITES: &[&str] = &[
    "https://www.aldi-nord.de/",
    "https://www.aldi-sued.de/",
    "https://www.lidl.de/",
    "https://www.lidl.de/c/billiger-montag/a10006065?channel=store&tabCode=Current_Sales_Week",
    "https://netto.de/",
    "https://www.edeka.de/eh/angebote.jsp",
    "https://www.rewe.de/",
    "https://www.penny.de/",
    "https://www.real.de/",
    "https://www.kaufland.de/",
    "https://www.metro.de/",
    "https://www.otto.de/",
];

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

pub const DEFAULT_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

pub const DEFAULT_ACCEPT_LANGUAGE: &str = "de,en-US;q=0.9,en;q=0.8";

#[derive(Clone, Debug)]
pub struct Config {
    pub server_addr: SocketAddr,
    pub gemini: GeminiConfig,
    pub store: StoreConfig,
    pub fetch: FetchConfig,
    pub sites: Vec<String>,
    pub key_policy: AnalysisKeyPolicy,
    pub max_upload_bytes: usize,
}

#[derive(Clone, Debug)]
pub struct GeminiConfig {
    /// `None` disables the vendor; text extraction then degrades to empty results.
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gemini-2.0-flash".to_string(),
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            temperature: 0.0,
        }
    }
}

#[derive(Clone, Debug)]
pub enum StoreConfig {
    Postgres { database_url: String },
    Memory,
}

/// Politeness settings for the fetch engine. Requests are always issued one at a time.
#[derive(Clone, Debug)]
pub struct FetchConfig {
    pub delay: Duration,
    pub user_agent: String,
    pub accept: String,
    pub accept_language: String,
    /// Sent on every request after the headers above.
    pub extra_headers: Vec<(String, String)>,
    pub obey_robots_txt: bool,
    pub request_timeout: Duration,
    pub max_page_chars: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(2),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept: DEFAULT_ACCEPT.to_string(),
            accept_language: DEFAULT_ACCEPT_LANGUAGE.to_string(),
            extra_headers: vec![("Upgrade-Insecure-Requests".to_string(), "1".to_string())],
            obey_robots_txt: false,
            request_timeout: Duration::from_secs(30),
            max_page_chars: 100_000,
        }
    }
}

/// How media analyses are keyed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnalysisKeyPolicy {
    /// SHA-256 of the upload; a resubmission replaces the previous record.
    ContentHash,
    /// Random id per analysis; older rows stay behind as history.
    Surrogate,
}

impl FromStr for AnalysisKeyPolicy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "content_hash" | "hash" => Ok(AnalysisKeyPolicy::ContentHash),
            "surrogate" | "uuid" => Ok(AnalysisKeyPolicy::Surrogate),
            other => Err(AppError::ConfigError(format!(
                "Invalid ANALYSIS_KEY_POLICY '{}', expected content_hash or surrogate",
                other
            ))),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load environment variables from .env file if it exists
        dotenv::dotenv().ok();

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("PORT").unwrap_or_else(|_| "3000".to_string());
        let port = port.parse::<u16>().map_err(|e| AppError::ConfigError(format!("Invalid port: {}", e)))?;
        let ip = IpAddr::from_str(&host).map_err(|e| AppError::ConfigError(format!("Invalid host address: {}", e)))?;
        let server_addr = SocketAddr::new(ip, port);

        let gemini_defaults = GeminiConfig::default();
        let gemini = GeminiConfig {
            api_key: optional_var("GEMINI_API_KEY"),
            model: optional_var("GEMINI_MODEL").unwrap_or(gemini_defaults.model),
            base_url: optional_var("GEMINI_BASE_URL").unwrap_or(gemini_defaults.base_url),
            temperature: gemini_defaults.temperature,
        };

        let backend = env::var("STORE_BACKEND").unwrap_or_else(|_| "postgres".to_string());
        let store = match backend.to_ascii_lowercase().as_str() {
            "memory" => StoreConfig::Memory,
            "postgres" => {
                let database_url = optional_var("DATABASE_URL")
                    .or_else(|| optional_var("POSTGRES_URL_NO_SSL"))
                    .ok_or_else(|| AppError::ConfigError("DATABASE_URL is not set".to_string()))?;
                StoreConfig::Postgres { database_url }
            }
            other => {
                return Err(AppError::ConfigError(format!("Unknown STORE_BACKEND '{}'", other)));
            }
        };

        let fetch_defaults = FetchConfig::default();
        let fetch = FetchConfig {
            delay: match optional_var("CRAWL_DELAY_SECS") {
                Some(v) => parse_secs("CRAWL_DELAY_SECS", &v)?,
                None => fetch_defaults.delay,
            },
            user_agent: optional_var("CRAWL_USER_AGENT").unwrap_or(fetch_defaults.user_agent),
            accept: optional_var("CRAWL_ACCEPT").unwrap_or(fetch_defaults.accept),
            accept_language: optional_var("CRAWL_ACCEPT_LANGUAGE").unwrap_or(fetch_defaults.accept_language),
            extra_headers: match optional_var("CRAWL_HEADERS") {
                Some(list) => parse_headers("CRAWL_HEADERS", &list)?,
                None => fetch_defaults.extra_headers,
            },
            obey_robots_txt: match optional_var("CRAWL_OBEY_ROBOTS") {
                Some(v) => parse_bool("CRAWL_OBEY_ROBOTS", &v)?,
                None => fetch_defaults.obey_robots_txt,
            },
            request_timeout: match optional_var("CRAWL_TIMEOUT_SECS") {
                Some(v) => parse_timeout("CRAWL_TIMEOUT_SECS", &v)?,
                None => fetch_defaults.request_timeout,
            },
            max_page_chars: match optional_var("CRAWL_MAX_PAGE_CHARS") {
                Some(v) => v.parse().map_err(|e| {
                    AppError::ConfigError(format!("Invalid CRAWL_MAX_PAGE_CHARS: {}", e))
                })?,
                None => fetch_defaults.max_page_chars,
            },
        };

        let sites = match optional_var("CRAWL_SITES") {
            Some(list) => parse_sites(&list),
            None => DEFAULT_SITES.iter().map(|s| s.to_string()).collect(),
        };

        let key_policy = match optional_var("ANALYSIS_KEY_POLICY") {
            Some(v) => v.parse()?,
            None => AnalysisKeyPolicy::ContentHash,
        };

        let max_upload_bytes = match optional_var("MAX_UPLOAD_BYTES") {
            Some(v) => v
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid MAX_UPLOAD_BYTES: {}", e)))?,
            None => 100 * 1024 * 1024,
        };

        Ok(Config {
            server_addr,
            gemini,
            store,
            fetch,
            sites,
            key_policy,
            max_upload_bytes,
        })
    }
}

fn optional_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_sites(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_secs(key: &str, value: &str) -> Result<Duration> {
    let secs: f64 = value
        .trim()
        .parse()
        .map_err(|e| AppError::ConfigError(format!("Invalid {}: {}", key, e)))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(AppError::ConfigError(format!("Invalid {}: must be a non-negative number", key)));
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|e| AppError::ConfigError(format!("Invalid {}: {}", key, e)))
}

/// Parses `Name: value` pairs separated by `|`, e.g. `DNT: 1|Cache-Control: no-cache`.
fn parse_headers(key: &str, list: &str) -> Result<Vec<(String, String)>> {
    list.split('|')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once(':') {
            Some((name, value)) if !name.trim().is_empty() => {
                Ok((name.trim().to_string(), value.trim().to_string()))
            }
            _ => Err(AppError::ConfigError(format!(
                "Invalid {} entry '{}', expected 'Name: value'",
                key, entry
            ))),
        })
        .collect()
}

fn parse_timeout(key: &str, value: &str) -> Result<Duration> {
    let timeout = parse_secs(key, value)?;
    if timeout.is_zero() {
        return Err(AppError::ConfigError(format!("Invalid {}: must be greater than zero", key)));
    }
    Ok(timeout)
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(AppError::ConfigError(format!("Invalid {}: '{}'", key, other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sites_are_split_and_trimmed() {
        let sites = parse_sites(" https://a.example/ ,https://b.example/,, ");
        assert_eq!(sites, vec!["https://a.example/", "https://b.example/"]);
    }

    #[test]
    fn fractional_delay_is_accepted() {
        assert_eq!(parse_secs("D", "0.5").unwrap(), Duration::from_millis(500));
        assert!(parse_secs("D", "-1").is_err());
        assert!(parse_secs("D", "soon").is_err());
    }

    #[test]
    fn oversized_or_zero_durations_are_config_errors() {
        assert!(matches!(parse_secs("CRAWL_DELAY_SECS", "1e30"), Err(AppError::ConfigError(_))));
        assert!(matches!(parse_timeout("CRAWL_TIMEOUT_SECS", "1e30"), Err(AppError::ConfigError(_))));
        assert!(matches!(parse_timeout("CRAWL_TIMEOUT_SECS", "0"), Err(AppError::ConfigError(_))));
        assert_eq!(parse_timeout("CRAWL_TIMEOUT_SECS", "15").unwrap(), Duration::from_secs(15));
        assert_eq!(parse_secs("CRAWL_DELAY_SECS", "0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn extra_headers_are_parsed_from_pipe_list() {
        let headers = parse_headers("CRAWL_HEADERS", "DNT: 1 | Cache-Control: no-cache, no-store|").unwrap();
        assert_eq!(
            headers,
            vec![
                ("DNT".to_string(), "1".to_string()),
                ("Cache-Control".to_string(), "no-cache, no-store".to_string()),
            ]
        );
        assert!(parse_headers("CRAWL_HEADERS", "no-colon-here").is_err());
        assert!(parse_headers("CRAWL_HEADERS", ": value").is_err());
    }

    #[test]
    fn default_fetch_headers_keep_upgrade_insecure_requests() {
        let defaults = FetchConfig::default();
        assert_eq!(defaults.accept, DEFAULT_ACCEPT);
        assert!(defaults.extra_headers.iter().any(|(name, _)| name == "Upgrade-Insecure-Requests"));
    }

    #[test]
    fn key_policy_parses_both_variants() {
        assert_eq!("content_hash".parse::<AnalysisKeyPolicy>().unwrap(), AnalysisKeyPolicy::ContentHash);
        assert_eq!("Surrogate".parse::<AnalysisKeyPolicy>().unwrap(), AnalysisKeyPolicy::Surrogate);
        assert!("latest".parse::<AnalysisKeyPolicy>().is_err());
    }

    #[test]
    fn robots_flag_defaults_off() {
        assert!(!FetchConfig::default().obey_robots_txt);
        assert!(parse_bool("R", "on").unwrap());
        assert!(parse_bool("R", "maybe").is_err());
    }
}
