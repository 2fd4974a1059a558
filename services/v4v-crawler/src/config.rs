//!
//! src/config.rs  Oct 14th, 2026
//!
//! Loads configuration for the crawler, resolver and api from the
//! environment (after .env), falling back to the constants below
//!

use std::{net::SocketAddr, path::PathBuf, time};
use url::Url;
use crate::CrawlerError;

/// Constants for HTTP Config
pub const HTTP_TIMEOUT: u64 = 8000;
pub const HTTP_CONNECT_TIMEOUT: u64 = 2000;
pub const HTTP_POOL_MAX_IDLE: usize = 16;
pub const HTTP_POOL_IDLE_TIMEOUT: u64 = 90000;
pub const HTTP_MAX_REDIRECTS: u8 = 4;

pub const RETRY_MAX_ATTEMPTS: u8 = 4;
pub const RETRY_BASE_BACKOFF: u64 = 250;
pub const RETRY_JITTER: bool = true;
pub const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

pub const PODCAST_INDEX_BASE: &str = "https://api.podcastindex.org/api/1.0/";
pub const PODCAST_INDEX_HOST: &str = "api.podcastindex.org";

/// Wrapper over env::var to return an invalid enviroment var error
fn env_check(s: &str) -> Result<String, CrawlerError> {
    match std::env::var(s) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(CrawlerError::Config(format!("{s} was not set"))),
    }
}

fn env_or<T: std::str::FromStr>(s: &str, default: T) -> T {
    std::env::var(s)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Ensures that url is https
fn ensure_https(url: &Url) -> Result<(), String> {
    if url.scheme() == "https" {
        Ok(())
    } else {
        Err(format!("URL must be https: {url}"))
    }
}

fn ensure_host(url: &Url, expected_host: &str) -> Result<(), String> {
    match url.host_str() {
        Some(h) if h.eq_ignore_ascii_case(expected_host) => Ok(()),
        Some(h) => Err(
            format!("Unexpected host for {url} (got {h}, expected {expected_host})")
        ),
        None => Err(format!("URL missing host: {url}"))
    }
}

fn ensure_trailing_slash(url: &mut Url) {
    if !url.path().ends_with('/') {
        let mut path = url.path().to_string();
        path.push('/');
        url.set_path(&path);
    }
}

/// User agent sent to every upstream
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub user_agent: String,
}

fn build_identity() -> IdentityConfig {
    let user_agent = std::env::var("APPLICATION")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| format!("v4v-crawler/{}", env!("CARGO_PKG_VERSION")));
    IdentityConfig { user_agent }
}

///
/// Configuration for the Podcast Index api
///
#[derive(Clone)]
pub struct PodcastIndexConfig {
    pub api_key: String,
    pub api_secret: String,
    pub base_url: Url,
    pub episodes_max: u32,
}

// secret stays out of the startup dump
impl std::fmt::Debug for PodcastIndexConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PodcastIndexConfig")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .field("base_url", &self.base_url.as_str())
            .field("episodes_max", &self.episodes_max)
            .finish()
    }
}

/// Credentials are optional so the api can serve without them; anything
/// that talks to the index calls `AppConfig::podcast_index()` instead
fn build_podcast_index() -> Result<Option<PodcastIndexConfig>, CrawlerError> {
    if std::env::var("PODCAST_INDEX_API_KEY").is_err()
        && std::env::var("PODCAST_INDEX_API_SECRET").is_err() {
        return Ok(None);
    }
    let api_key    = env_check("PODCAST_INDEX_API_KEY")?;
    let api_secret = env_check("PODCAST_INDEX_API_SECRET")?;

    let base_url = std::env::var("PODCAST_INDEX_BASE_URL")
        .unwrap_or_else(|_| PODCAST_INDEX_BASE.to_string());
    let mut base_url = Url::parse(&base_url)
        .map_err(|e| CrawlerError::Config(
            format!("PODCAST_INDEX_BASE_URL invalid {e}")
        ))?;

    ensure_https(&base_url).map_err(CrawlerError::Config)?;
    ensure_host(&base_url, PODCAST_INDEX_HOST).map_err(CrawlerError::Config)?;
    ensure_trailing_slash(&mut base_url);

    let episodes_max = env_or("PODCAST_INDEX_EPISODES_MAX", 1000_u32);

    Ok( Some(PodcastIndexConfig { api_key, api_secret, base_url, episodes_max }) )
}

///
/// Configuration for Http timeouts, retries, etc.
///
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u8,
    pub base_backoff: time::Duration,
    pub jitter: bool,
    pub retryable_statuses: Vec<u16>
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: RETRY_MAX_ATTEMPTS,
            base_backoff: time::Duration::from_millis(RETRY_BASE_BACKOFF),
            jitter: RETRY_JITTER,
            retryable_statuses: RETRYABLE_STATUSES.to_vec()
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: time::Duration,
    pub connect_timeout: time::Duration,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout: time::Duration,
    pub max_redirects: u8,
    pub retry: RetryConfig
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: time::Duration::from_millis(HTTP_TIMEOUT),
            connect_timeout: time::Duration::from_millis(HTTP_CONNECT_TIMEOUT),
            pool_max_idle_per_host: HTTP_POOL_MAX_IDLE,
            pool_idle_timeout: time::Duration::from_millis(HTTP_POOL_IDLE_TIMEOUT),
            max_redirects: HTTP_MAX_REDIRECTS,
            retry: RetryConfig::default()
        }
    }
}

///
/// Configuration for persistent storage: json documents, sqlite job
/// queue and the compressed raw archive
///
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    pub data_dir: PathBuf,
    pub db_url: String,
    pub raw_store_root: PathBuf,
    pub raw_zstd_level: i32,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            db_url: "sqlite:./data/resolver.db".to_string(),
            raw_store_root: PathBuf::from("./data/raw"),
            raw_zstd_level: 3,
        }
    }
}

fn build_persistence() -> PersistenceConfig {
    let default = PersistenceConfig::default();
    PersistenceConfig {
        data_dir: std::env::var("DATA_DIR").map(PathBuf::from)
            .unwrap_or(default.data_dir),
        db_url: std::env::var("DATABASE_URL").unwrap_or(default.db_url),
        raw_store_root: std::env::var("RAW_STORE_ROOT").map(PathBuf::from)
            .unwrap_or(default.raw_store_root),
        raw_zstd_level: env_or("RAW_ZSTD_LEVEL", default.raw_zstd_level).clamp(0, 21),
    }
}

///
/// Limits for the resolver workers in terms of pacing, retries and
/// worker counts
///
#[derive(Clone, Debug)]
pub struct ResolverLimits {
    pub min_interval_ms: u64,   // gap between any two upstream requests
    pub resolve_workers: usize,
    pub max_attempts: i64,      // job attempts before it is marked failed
    pub queue_poll_ms: u64,
}

impl Default for ResolverLimits {
    fn default() -> Self {
        Self {
            min_interval_ms: 250,
            resolve_workers: 2,
            max_attempts: 3,
            queue_poll_ms: 300,
        }
    }
}

fn build_limits() -> ResolverLimits {
    let default = ResolverLimits::default();
    ResolverLimits {
        min_interval_ms: env_or("RESOLVER_MIN_INTERVAL_MS", default.min_interval_ms),
        resolve_workers: env_or("RESOLVER_CONCURRENCY", default.resolve_workers).max(1),
        max_attempts: env_or("RESOLVER_MAX_ATTEMPTS", default.max_attempts).max(1),
        ..default
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
}

fn build_server() -> Result<ServerConfig, CrawlerError> {
    let bind = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let bind = bind.parse::<SocketAddr>()
        .map_err(|e| CrawlerError::Config(format!("BIND_ADDR invalid {e}")))?;
    Ok( ServerConfig { bind } )
}

///
/// Configuration for Logger
///

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub filter_directives: String,
    pub format: LogFormat,
    pub with_ansi: bool,
    pub include_file_line: bool,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter_directives: "info,v4v_crawler=debug,reqwest=warn,sqlx=warn".to_string(),
            format: LogFormat::Json,
            with_ansi: true,
            include_file_line: true,
            include_target: true,
        }
    }
}

fn build_logging() -> LoggingConfig {
    let format = match std::env::var("LOG_FORMAT").as_deref() {
        Ok("pretty") => LogFormat::Pretty,
        _ => LogFormat::Json,
    };
    LoggingConfig { format, ..LoggingConfig::default() }
}

///
/// AppConfig which holds everything the clients, resolver and api need
///
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub identity: IdentityConfig,
    pub podcast_index: Option<PodcastIndexConfig>,
    pub http: HttpConfig,
    pub persistence: PersistenceConfig,
    pub limits: ResolverLimits,
    pub server: ServerConfig,
    pub logging: LoggingConfig
}

impl AppConfig {
    pub fn podcast_index(&self) -> Result<&PodcastIndexConfig, CrawlerError> {
        self.podcast_index.as_ref().ok_or_else(|| CrawlerError::Config(
            "PODCAST_INDEX_API_KEY and PODCAST_INDEX_API_SECRET must be set".to_string()
        ))
    }
}

///
/// Return all environment variables to caller at program start.
///
pub fn load_config() -> Result<AppConfig, CrawlerError> {
    dotenvy::dotenv().ok();

    let identity      = build_identity();
    let podcast_index = build_podcast_index()?;
    let http          = HttpConfig::default();
    let persistence   = build_persistence();
    let limits        = build_limits();
    let server        = build_server()?;
    let logging       = build_logging();

    Ok( AppConfig {
        identity, podcast_index, http, persistence, limits, server, logging
    } )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_and_scheme_checks() {
        let good = Url::parse(PODCAST_INDEX_BASE).unwrap();
        assert!(ensure_https(&good).is_ok());
        assert!(ensure_host(&good, PODCAST_INDEX_HOST).is_ok());

        let plain = Url::parse("http://api.podcastindex.org/api/1.0/").unwrap();
        assert!(ensure_https(&plain).is_err());

        let other = Url::parse("https://example.com/api/").unwrap();
        assert!(ensure_host(&other, PODCAST_INDEX_HOST).is_err());
    }

    #[test]
    fn trailing_slash_is_enforced() {
        let mut url = Url::parse("https://api.podcastindex.org/api/1.0").unwrap();
        ensure_trailing_slash(&mut url);
        assert_eq!(url.as_str(), "https://api.podcastindex.org/api/1.0/");
        assert_eq!(
            url.join("podcasts/byguid").unwrap().as_str(),
            "https://api.podcastindex.org/api/1.0/podcasts/byguid"
        );
    }

    #[test]
    fn secret_is_redacted_in_debug() {
        let cfg = PodcastIndexConfig {
            api_key: "KEY".into(),
            api_secret: "hunter2".into(),
            base_url: Url::parse(PODCAST_INDEX_BASE).unwrap(),
            episodes_max: 10,
        };
        let dump = format!("{cfg:?}");
        assert!(dump.contains("KEY"));
        assert!(!dump.contains("hunter2"));
    }
}
