//!
//! src/fetch.rs  Oct 15th, 2026
//!
//! Defines methods for hitting the Podcast Index endpoints and feed hosts,
//! returning unsent request builders. Retries and pacing live in
//! src/resolver.rs
//!

use std::time::{SystemTime, UNIX_EPOCH};

use reqwest::{Client, header, redirect, RequestBuilder};
use sha1::{Digest, Sha1};
use url::Url;

use crate::config::{HttpConfig, IdentityConfig, PodcastIndexConfig};
use crate::CrawlerError;

/// Client building functionality
fn client_helper(http: &HttpConfig) -> reqwest::ClientBuilder  {
    Client::builder()
        .timeout(http.timeout)
        .connect_timeout(http.connect_timeout)
        .pool_max_idle_per_host(http.pool_max_idle_per_host)
        .pool_idle_timeout(Some(http.pool_idle_timeout))
        .redirect(redirect::Policy::limited(http.max_redirects as usize))
}

fn client_with_headers(http: &HttpConfig, headers: header::HeaderMap) ->
    Result<Client, CrawlerError> {
    client_helper(http)
        .default_headers(headers)
        .build()
        .map_err(|e| CrawlerError::Http(format!("build client: {e}")))
}

fn user_agent(id: &IdentityConfig) -> Result<header::HeaderValue, CrawlerError> {
    header::HeaderValue::from_str(&id.user_agent)
        .map_err(|e| CrawlerError::Config(format!("invalid user-agent {e}")))
}

pub fn json_client(http: &HttpConfig, id: &IdentityConfig) ->
    Result<Client, CrawlerError> {
    let mut h = header::HeaderMap::new();
    h.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
    h.insert(header::USER_AGENT, user_agent(id)?);
    client_with_headers(http, h)
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Podcast Index request signature: sha1 over key, secret and the
/// unix time that is also sent as X-Auth-Date
pub fn auth_signature(api_key: &str, api_secret: &str, now: u64) -> String {
    let mut hasher = Sha1::new();
    hasher.update(api_key.as_bytes());
    hasher.update(api_secret.as_bytes());
    hasher.update(now.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

pub fn auth_headers(api_key: &str, api_secret: &str, now: u64) ->
    Result<header::HeaderMap, CrawlerError> {
    let value = |s: &str| header::HeaderValue::from_str(s)
        .map_err(|e| CrawlerError::Config(format!("invalid auth header {e}")));

    let mut h = header::HeaderMap::new();
    h.insert("x-auth-date", value(&now.to_string())?);
    h.insert("x-auth-key", value(api_key)?);
    h.insert(header::AUTHORIZATION, value(&auth_signature(api_key, api_secret, now))?);
    Ok(h)
}

#[derive(Clone, Debug)]
pub struct PodcastIndexClient {
    pub http: Client,
    pub cfg: PodcastIndexConfig
}

impl PodcastIndexClient {
    pub fn new(
        http_config: &HttpConfig,
        identity: &IdentityConfig,
        cfg: &PodcastIndexConfig
    ) -> Result<Self, CrawlerError> {
        let http = json_client(http_config, identity)?;
        Ok( Self { http, cfg: cfg.clone() } )
    }

    fn endpoint(&self, path: &str) -> Result<Url, CrawlerError> {
        self.cfg.base_url.join(path)
            .map_err(|e| CrawlerError::Config(format!("join {path}: {e}")))
    }

    /// Signs at build time; a retried clone reuses the same X-Auth-Date,
    /// which the index accepts for a few minutes
    fn signed_get(&self, path: &str) -> Result<RequestBuilder, CrawlerError> {
        let url = self.endpoint(path)?;
        let headers = auth_headers(&self.cfg.api_key, &self.cfg.api_secret, unix_now())?;
        Ok(self.http.get(url).headers(headers))
    }

    /// GET /podcasts/byguid?guid=...
    pub fn podcast_by_guid(&self, guid: &str) -> Result<RequestBuilder, CrawlerError> {
        Ok(self.signed_get("podcasts/byguid")?.query(&[("guid", guid)]))
    }

    /// GET /episodes/byguid?guid=...&feedid=...
    /// Episode guids are only unique within a feed, so the feed is required
    pub fn episode_by_guid(&self, guid: &str, feed_id: u64) ->
        Result<RequestBuilder, CrawlerError> {
        Ok(self.signed_get("episodes/byguid")?
            .query(&[("guid", guid)])
            .query(&[("feedid", feed_id)]))
    }

    /// GET /episodes/byfeedid?id=...&max=...
    pub fn episodes_by_feed_id(&self, feed_id: u64, max: u32) ->
        Result<RequestBuilder, CrawlerError> {
        Ok(self.signed_get("episodes/byfeedid")?.query(&[
            ("id", feed_id.to_string()),
            ("max", max.to_string())
        ]))
    }
}

/// Plain client for pulling feed xml from wherever it is hosted
#[derive(Clone, Debug)]
pub struct FeedClient {
    pub http: Client
}

impl FeedClient {
    pub fn new(http_config: &HttpConfig, identity: &IdentityConfig) ->
        Result<Self, CrawlerError> {
        let mut h = header::HeaderMap::new();
        h.insert(header::ACCEPT, header::HeaderValue::from_static(
            "application/rss+xml, application/xml, text/xml;q=0.9, */*;q=0.5"
        ));
        h.insert(header::USER_AGENT, user_agent(identity)?);
        Ok( Self { http: client_with_headers(http_config, h)? } )
    }

    pub fn get(&self, url: &str) -> Result<RequestBuilder, CrawlerError> {
        let url = Url::parse(url)
            .map_err(|e| CrawlerError::Parse(format!("feed url {url}: {e}")))?;
        match url.scheme() {
            "http" | "https" => Ok(self.http.get(url)),
            other => Err(CrawlerError::Parse(format!("unsupported scheme {other}")))
        }
    }
}
