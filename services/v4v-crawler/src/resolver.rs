//!
//! src/resolver.rs  Oct 17th, 2026
//!
//! Remote item resolution. Feeds are ingested into the track document and
//! every podcast:remoteItem they reference is queued; workers then turn
//! each reference into a playable song through the Podcast Index, falling
//! back to the referenced feed's own xml
//!

use std::{sync::Arc, time::{Duration, Instant}};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use reqwest::{header, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tokio::{sync::Mutex, task::JoinSet, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{AppConfig, PodcastIndexConfig, ResolverLimits, RetryConfig};
use crate::errors::CrawlerError;
use crate::fetch::{FeedClient, PodcastIndexClient};
use crate::model::{
    FeedKind, MusicTrack, ParseStatus, ParsedFeedEntry, ResolutionReport, ResolvedSong,
    TrackSource
};
use crate::persistent::{Job, JobStatus, JobType, Persistent};
use crate::repair;
use crate::rss::{self, ParsedFeed, ValueBlock, ValueRecipient};
use crate::sink::{DiskZstdSink, RawType};
use crate::store::JsonStore;
use crate::types::{FeedGuid, ItemGuid, RemoteItem};

const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct RateGate {
    min_interval: Duration,
    state: Mutex<Option<Instant>>
}

impl RateGate {
    pub fn new(min_interval: Duration) -> Self {
        Self { min_interval, state: Mutex::new(None) }
    }
    pub async fn wait(&self) {
        let mut last = self.state.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Exponential wait for http_with_retry, optionally jittered by 50..=200ms
fn generate_backoff(base: Duration, attempt: usize, jitter: bool, rng: &mut SmallRng) -> Duration {
    let exp = (1_u64 << attempt.min(6)) * base.as_millis() as u64;
    let jitter = if jitter { rng.gen_range(50..=200) } else { 0 };
    Duration::from_millis(exp + jitter)
}

/// Retry-After in its delta-seconds form, capped at MAX_RETRY_AFTER
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim()
        .parse::<u64>().ok()
        .map(|s| Duration::from_secs(s).min(MAX_RETRY_AFTER))
}

fn retry_after(resp: &Response) -> Option<Duration> {
    parse_retry_after(resp.headers().get(header::RETRY_AFTER)?.to_str().ok()?)
}

/// Sends `request` until it succeeds, retrying network errors and the
/// configured statuses. 404 is NotFound, any other non-success is Status
pub async fn http_with_retry(
    request: RequestBuilder,
    retry: &RetryConfig
) -> Result<Response, CrawlerError> {
    let mut rng = SmallRng::from_entropy();
    let max_attempts = retry.max_attempts.max(1) as usize;
    let mut attempt = 0_usize;
    loop {
        let response = request.try_clone()
            .ok_or_else(|| CrawlerError::Http("non-cloneable request".to_string()))?
            .send()
            .await;
        match response {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    return Ok(resp);
                }
                let url = resp.url().to_string();
                if status == StatusCode::NOT_FOUND {
                    return Err(CrawlerError::NotFound(url));
                }
                let retryable = retry.retryable_statuses.contains(&status.as_u16());
                if !retryable || attempt + 1 >= max_attempts {
                    return Err(match status {
                        StatusCode::TOO_MANY_REQUESTS if retryable => CrawlerError::RateLimited(
                            format!("{url} after {} attempts", attempt + 1)
                        ),
                        _ => CrawlerError::Status { status: status.as_u16(), url }
                    });
                }
                let backoff = retry_after(&resp).unwrap_or_else(
                    || generate_backoff(retry.base_backoff, attempt, retry.jitter, &mut rng)
                );
                warn!(status = %status, backoff = ?backoff.as_millis(), "http.retry");
                sleep(backoff).await;
                attempt += 1;
            },
            Err(e) => {
                if attempt + 1 >= max_attempts {
                    return Err(e.into());
                }
                let backoff = generate_backoff(retry.base_backoff, attempt, retry.jitter, &mut rng);
                warn!(error = %e, backoff = ?backoff.as_millis(), "http.retry.error");
                sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}

/// A feed as the index knows it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedInfo {
    pub id: u64,
    pub guid: String,
    pub title: Option<String>,
    pub url: Option<String>,
    pub author: Option<String>,
    pub image: Option<String>,
    pub medium: Option<String>,
    pub value: Option<ValueBlock>
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpisodeInfo {
    pub guid: String,
    pub title: Option<String>,
    pub enclosure_url: Option<String>,
    pub enclosure_type: Option<String>,
    pub duration: Option<u64>,
    pub image: Option<String>,
    pub feed_image: Option<String>,
    pub published_at: Option<String>,
    pub value: Option<ValueBlock>
}

fn str_field(v: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| v.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Index value blocks are { model: {type, method, suggested}, destinations: [..] }
fn value_from_json(v: &Value) -> Option<ValueBlock> {
    let model = v.get("model")?;
    let recipients = v.get("destinations")
        .and_then(Value::as_array)
        .map(|dests| dests.iter().filter_map(|d| Some(ValueRecipient {
            name: str_field(d, &["name"]),
            kind: str_field(d, &["type"]),
            address: str_field(d, &["address"])?,
            split: d.get("split").and_then(Value::as_u64).unwrap_or(0) as u32,
            fee: d.get("fee").and_then(Value::as_bool).unwrap_or(false),
            custom_key: str_field(d, &["customKey"]),
            custom_value: str_field(d, &["customValue"])
        })).collect())
        .unwrap_or_default();
    Some(ValueBlock {
        kind: str_field(model, &["type"]),
        method: str_field(model, &["method"]),
        suggested: str_field(model, &["suggested"]),
        recipients
    })
}

/// The index answers a miss with an empty array in place of the object
pub fn feed_from_json(v: &Value) -> Option<FeedInfo> {
    let id = v.get("id").and_then(Value::as_u64)?;
    Some(FeedInfo {
        id,
        guid: str_field(v, &["podcastGuid"]).unwrap_or_default(),
        title: str_field(v, &["title"]),
        url: str_field(v, &["url", "originalUrl"]),
        author: str_field(v, &["author", "ownerName"]),
        image: str_field(v, &["artwork", "image"]),
        medium: str_field(v, &["medium"]).map(|m| m.to_ascii_lowercase()),
        value: v.get("value").and_then(value_from_json)
    })
}

pub fn episode_from_json(v: &Value) -> Option<EpisodeInfo> {
    let guid = str_field(v, &["guid"])?;
    let published_at = v.get("datePublished")
        .and_then(Value::as_i64)
        .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
        .map(|d| d.to_rfc3339());
    Some(EpisodeInfo {
        guid,
        title: str_field(v, &["title"]),
        enclosure_url: str_field(v, &["enclosureUrl"]),
        enclosure_type: str_field(v, &["enclosureType"]),
        duration: v.get("duration").and_then(Value::as_u64).filter(|d| *d > 0),
        image: str_field(v, &["image"]),
        feed_image: str_field(v, &["feedImage"]),
        published_at,
        value: v.get("value").and_then(value_from_json)
    })
}

fn guid_matches(candidate: &str, wanted: &str) -> bool {
    candidate == wanted || candidate.trim().eq_ignore_ascii_case(wanted.trim())
}

/// Where resolution gets its answers from
#[async_trait]
pub trait EpisodeSource: Send + Sync {
    async fn feed_by_guid(&self, feed_guid: &FeedGuid) -> Result<Option<FeedInfo>, CrawlerError>;
    async fn episode_by_guid(&self, feed: &FeedInfo, item_guid: &ItemGuid) ->
        Result<Option<EpisodeInfo>, CrawlerError>;
    async fn episodes_by_feed(&self, feed_id: u64) -> Result<Vec<EpisodeInfo>, CrawlerError>;
    async fn feed_document(&self, url: &str) -> Result<ParsedFeed, CrawlerError>;
}

pub struct PodcastIndexSource {
    index: PodcastIndexClient,
    feeds: FeedClient,
    retry: RetryConfig,
    rate: RateGate,
    sink: DiskZstdSink,
    episodes_max: u32
}

impl PodcastIndexSource {
    pub fn new(cfg: &AppConfig, index: &PodcastIndexConfig) -> Result<Self, CrawlerError> {
        Ok(Self {
            index: PodcastIndexClient::new(&cfg.http, &cfg.identity, index)?,
            feeds: FeedClient::new(&cfg.http, &cfg.identity)?,
            retry: cfg.http.retry.clone(),
            rate: RateGate::new(Duration::from_millis(cfg.limits.min_interval_ms)),
            sink: DiskZstdSink::new(
                &cfg.persistence.raw_store_root,
                cfg.persistence.raw_zstd_level
            ),
            episodes_max: index.episodes_max
        })
    }

    /// Signed index GET; a 404 is a miss rather than an error
    async fn index_json(&self, request: RequestBuilder) -> Result<Option<Value>, CrawlerError> {
        self.rate.wait().await;
        match http_with_retry(request, &self.retry).await {
            Ok(resp) => Ok(Some(resp.json::<Value>().await?)),
            Err(CrawlerError::NotFound(_)) => Ok(None),
            Err(e) => Err(e)
        }
    }

    fn archive(&self, kind: RawType, key: &str, value: &Value) {
        if let Err(e) = self.sink.write_json(kind, key, value.clone()) {
            warn!(error = ?e, key = %key, "sink.write_json");
        }
    }
}

#[async_trait]
impl EpisodeSource for PodcastIndexSource {
    async fn feed_by_guid(&self, feed_guid: &FeedGuid) -> Result<Option<FeedInfo>, CrawlerError> {
        let Some(value) = self.index_json(self.index.podcast_by_guid(feed_guid.as_str())?).await?
        else { return Ok(None) };
        self.archive(RawType::PodcastIndexFeed, feed_guid.as_str(), &value);
        Ok(value.get("feed").and_then(feed_from_json))
    }

    async fn episode_by_guid(&self, feed: &FeedInfo, item_guid: &ItemGuid) ->
        Result<Option<EpisodeInfo>, CrawlerError> {
        let request = self.index.episode_by_guid(item_guid.as_str(), feed.id)?;
        let Some(value) = self.index_json(request).await? else { return Ok(None) };
        let key = format!("{}:{}", feed.id, item_guid.as_str());
        self.archive(RawType::PodcastIndexEpisode, &key, &value);
        Ok(value.get("episode").and_then(episode_from_json))
    }

    async fn episodes_by_feed(&self, feed_id: u64) -> Result<Vec<EpisodeInfo>, CrawlerError> {
        let request = self.index.episodes_by_feed_id(feed_id, self.episodes_max)?;
        let Some(value) = self.index_json(request).await? else { return Ok(Vec::new()) };
        self.archive(RawType::PodcastIndexEpisodes, &feed_id.to_string(), &value);
        Ok(value.get("items")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(episode_from_json).collect())
            .unwrap_or_default())
    }

    async fn feed_document(&self, url: &str) -> Result<ParsedFeed, CrawlerError> {
        self.rate.wait().await;
        let xml = http_with_retry(self.feeds.get(url)?, &self.retry).await?
            .text()
            .await?;
        if let Err(e) = self.sink.write_bytes(RawType::FeedXml, url, xml.as_bytes()) {
            warn!(error = ?e, url = %url, "sink.write_bytes");
        }
        rss::parse_feed(&xml)
    }
}

fn song_from_episode(
    item: &RemoteItem, item_guid: &ItemGuid, feed: &FeedInfo, ep: &EpisodeInfo
) -> Option<ResolvedSong> {
    Some(ResolvedSong {
        feed_guid: item.feed_guid.as_str().to_string(),
        item_guid: item_guid.as_str().to_string(),
        title: ep.title.clone().unwrap_or_else(|| "Untitled".to_string()),
        artist: feed.author.clone(),
        feed_title: feed.title.clone(),
        feed_url: feed.url.clone().or_else(|| item.feed_url.clone()),
        feed_image: feed.image.clone().or_else(|| ep.feed_image.clone()),
        enclosure_url: ep.enclosure_url.clone()?,
        enclosure_type: ep.enclosure_type.clone(),
        duration: ep.duration,
        image: ep.image.clone().or_else(|| feed.image.clone()),
        published_at: ep.published_at.clone(),
        medium: feed.medium.clone().or_else(|| item.medium.clone()),
        value: ep.value.clone().or_else(|| feed.value.clone()),
        source: TrackSource::PodcastIndex,
        resolved_at: Utc::now()
    })
}

fn song_from_document(
    item: &RemoteItem, item_guid: &ItemGuid, url: &str, doc: &ParsedFeed
) -> Option<ResolvedSong> {
    let found = doc.find_item(item_guid.as_str())?;
    let enclosure = found.enclosure.as_ref()?;
    Some(ResolvedSong {
        feed_guid: item.feed_guid.as_str().to_string(),
        item_guid: item_guid.as_str().to_string(),
        title: found.title.clone().unwrap_or_else(|| "Untitled".to_string()),
        artist: doc.author.clone(),
        feed_title: doc.title.clone(),
        feed_url: Some(url.to_string()),
        feed_image: doc.image.clone(),
        enclosure_url: enclosure.url.clone(),
        enclosure_type: enclosure.mime_type.clone(),
        duration: found.duration,
        image: found.image.clone().or_else(|| doc.image.clone()),
        published_at: found.pub_date.clone(),
        medium: doc.medium.clone().or_else(|| item.medium.clone()),
        value: found.value.clone().or_else(|| doc.value.clone()),
        source: TrackSource::Rss,
        resolved_at: Utc::now()
    })
}

/// feedGuid -> feed -> episode guid match, index first then the feed xml
pub async fn resolve_remote_item<S: EpisodeSource + ?Sized>(
    source: &S, item: &RemoteItem
) -> Result<ResolvedSong, CrawlerError> {
    let item_guid = item.item_guid.as_ref().ok_or_else(
        || CrawlerError::NotFound(format!("{} has no item guid", item.key()))
    )?;

    let feed = source.feed_by_guid(&item.feed_guid).await?;
    if let Some(feed) = feed.as_ref() {
        if let Some(ep) = source.episode_by_guid(feed, item_guid).await? {
            if let Some(song) = song_from_episode(item, item_guid, feed, &ep) {
                debug!(key = %item.key(), "resolve.hit.episode");
                return Ok(song);
            }
        }

        let episodes = source.episodes_by_feed(feed.id).await?;
        let matched = episodes.iter()
            .filter(|ep| guid_matches(&ep.guid, item_guid.as_str()))
            .find_map(|ep| song_from_episode(item, item_guid, feed, ep));
        if let Some(song) = matched {
            debug!(key = %item.key(), "resolve.hit.feed_episodes");
            return Ok(song);
        }
    }

    let url = feed.as_ref()
        .and_then(|f| f.url.clone())
        .or_else(|| item.feed_url.clone())
        .ok_or_else(|| CrawlerError::NotFound(
            format!("feed {} unknown to the index", item.feed_guid.as_str())
        ))?;

    let doc = source.feed_document(&url).await?;
    match song_from_document(item, item_guid, &url, &doc) {
        Some(song) => {
            debug!(key = %item.key(), url = %url, "resolve.hit.rss");
            Ok(song)
        }
        None => Err(CrawlerError::NotFound(format!("item {} not in {url}", item.key())))
    }
}

fn feed_kind(feed: &ParsedFeed) -> FeedKind {
    match feed.medium.as_deref().map(str::to_ascii_lowercase).as_deref() {
        Some("publisher") => FeedKind::Publisher,
        Some("musicl") | Some("podcastl") | Some("mixed") => FeedKind::Playlist,
        _ if feed.items.is_empty() && !feed.remote_items.is_empty() => FeedKind::Playlist,
        _ => FeedKind::Album
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestOutcome {
    pub tracks_added: usize,
    pub remote_items: usize,
    pub remote_items_new: usize,
    pub feeds_queued: usize
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSummary {
    pub resolved: usize,
    pub added: usize,
    pub duplicates: usize,
    pub failed: usize
}

pub struct Resolver<S: EpisodeSource> {
    source: Arc<S>,
    db: Arc<Persistent>,
    store: Arc<JsonStore>,
    limits: ResolverLimits,

    // music-tracks.json is read-modify-written by ingest and export
    tracks_lock: Arc<Mutex<()>>,
    started_at: DateTime<Utc>,

    shutdown: CancellationToken
}

impl<S: EpisodeSource + 'static> Resolver<S> {
    pub fn new(source: S, db: Persistent, store: JsonStore, limits: ResolverLimits) -> Self {
        Self {
            source: Arc::new(source),
            db: Arc::new(db),
            store: Arc::new(store),
            limits,
            tracks_lock: Arc::new(Mutex::new(())),
            started_at: Utc::now(),
            shutdown: CancellationToken::new()
        }
    }

    pub fn db(&self) -> &Persistent {
        &self.db
    }

    fn clone_for_task(&self) -> Self {
        Self {
            source: self.source.clone(),
            db: self.db.clone(),
            store: self.store.clone(),
            limits: self.limits.clone(),
            tracks_lock: self.tracks_lock.clone(),
            started_at: self.started_at,
            shutdown: self.shutdown.clone()
        }
    }

    pub async fn enqueue_feed(&self, url: &str) -> Result<bool, CrawlerError> {
        self.db.upsert_feed(url, None, None).await?;
        self.db.enqueue_job_if_missing(url, JobType::Feed).await
    }

    pub async fn resolve_remote_item(&self, item: &RemoteItem) -> Result<ResolvedSong, CrawlerError> {
        resolve_remote_item(self.source.as_ref(), item).await
    }

    /// Pulls one feed, records it in parsed-feeds.json, merges its own
    /// playable items into the track document and queues its references
    pub async fn ingest_feed(&self, url: &str) -> Result<IngestOutcome, CrawlerError> {
        self.db.upsert_feed(url, None, None).await?;

        let feed = match self.source.feed_document(url).await {
            Ok(feed) => feed,
            Err(e) => {
                self.db.mark_feed(url, false, Some(&e.to_string())).await?;
                self.record_parsed_feed(url, Err(&e)).await?;
                return Err(e);
            }
        };
        self.db.upsert_feed(url, feed.guid.as_deref(), feed.title.as_deref()).await?;

        let entry = self.record_parsed_feed(url, Ok(&feed)).await?;
        let tracks = entry.tracks();

        let mut outcome = IngestOutcome::default();
        if !tracks.is_empty() {
            let _guard = self.tracks_lock.lock().await;
            let merged = on_documents(&self.store, move |store| {
                let mut doc = store.load_tracks()?;
                let merged = repair::merge_tracks(&mut doc, tracks);
                store.save_tracks(&mut doc)?;
                Ok(merged)
            }).await?;
            outcome.tracks_added = merged.added;
        }

        for item in feed.all_remote_items() {
            outcome.remote_items += 1;
            if self.db.upsert_remote_item(item, Some(url)).await? {
                outcome.remote_items_new += 1;
            }
            // feed-only references (publisher / album lists) name feeds to ingest
            if item.item_guid.is_none() {
                if let Some(feed_url) = item.feed_url.as_deref() {
                    if self.enqueue_feed(feed_url).await? {
                        outcome.feeds_queued += 1;
                    }
                }
            }
        }

        self.db.mark_feed(url, true, None).await?;
        info!(
            url = %url, tracks = outcome.tracks_added,
            remote = outcome.remote_items, new = outcome.remote_items_new,
            "ingest.done"
        );
        Ok(outcome)
    }

    async fn record_parsed_feed(&self, url: &str, result: Result<&ParsedFeed, &CrawlerError>) ->
        Result<ParsedFeedEntry, CrawlerError> {
        let url = url.to_string();
        let result = result.map(ParsedFeed::clone).map_err(ToString::to_string);
        let _guard = self.tracks_lock.lock().await;
        on_documents(&self.store, move |store| {
            let mut doc = store.load_parsed_feeds()?;
            let existing = doc.feeds.iter().find(|f| f.original_url == url).cloned();

            let mut entry = existing.unwrap_or_else(|| ParsedFeedEntry {
                id: uuid::Uuid::new_v4().to_string(),
                original_url: url.clone(),
                ..ParsedFeedEntry::default()
            });
            match result {
                Ok(feed) => {
                    entry.kind = feed_kind(&feed);
                    entry.parse_status = ParseStatus::Success;
                    entry.parsed_at = Some(Utc::now());
                    entry.error = None;
                    entry.parsed_data = Some(feed);
                }
                Err(e) => {
                    entry.parse_status = ParseStatus::Error;
                    entry.error = Some(e);
                }
            }
            doc.upsert(entry.clone());
            store.save_parsed_feeds(&doc)?;
            Ok(entry)
        }).await
    }

    /// Feed and resolve workers until the token fires; with `once` they
    /// stop as soon as both queues are drained
    pub async fn run(&self, once: bool) -> Result<(), CrawlerError> {
        let requeued = self.db.requeue_active().await?;
        info!(
            workers = self.limits.resolve_workers, once, requeued,
            "resolver.start"
        );

        let mut workers = JoinSet::new();
        let this = self.clone_for_task();
        workers.spawn(async move { this.worker_loop(JobType::Feed, once).await });
        for _ in 0..self.limits.resolve_workers.max(1) {
            let this = self.clone_for_task();
            workers.spawn(async move { this.worker_loop(JobType::Resolve, once).await });
        }

        tokio::select! {
            () = self.shutdown.cancelled() => {
                info!(reason = "shutdown token", "resolver.stop");
            }
            r = tokio::signal::ctrl_c() => {
                if r.is_ok() {
                    warn!(msg = "shutting resolver down", "resolver.signal");
                }
            }
            () = Self::join_workers(&mut workers) => {
                info!("resolver.drained");
            }
        }
        self.shutdown.cancel();
        Self::join_workers(&mut workers).await;
        info!("resolver.exit");
        Ok(())
    }

    async fn join_workers(workers: &mut JoinSet<()>) {
        while let Some(r) = workers.join_next().await {
            if let Err(e) = r {
                error!(error = ?e, "worker task found error");
            }
        }
    }

    async fn queue_idle(&self) -> Result<bool, CrawlerError> {
        for kind in [JobType::Feed, JobType::Resolve] {
            for status in [JobStatus::Pending, JobStatus::Active] {
                if self.db.count_jobs(kind, status).await? > 0 {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    async fn worker_loop(&self, kind: JobType, once: bool) {
        info!(kind = kind.as_str(), "resolver.loop.start");
        let poll = Duration::from_millis(self.limits.queue_poll_ms);
        while !self.shutdown.is_cancelled() {
            match self.db.claim_one_job(kind).await {
                Ok(Some(job)) => {
                    let result = match kind {
                        JobType::Feed => self.process_feed_job(&job).await,
                        JobType::Resolve => self.process_resolve_job(&job).await
                    };
                    if let Err(e) = result {
                        error!(error = ?e, job_id = job.job_id, "job bookkeeping failed");
                    }
                }
                Ok(None) => {
                    if once && matches!(self.queue_idle().await, Ok(true)) {
                        break;
                    }
                    sleep(poll).await;
                }
                Err(e) => {
                    error!(error = ?e, kind = kind.as_str(), "claim_one_job failed");
                    sleep(poll).await;
                }
            }
        }
        info!(kind = kind.as_str(), "resolver.loop.stop");
    }

    async fn process_feed_job(&self, job: &Job) -> Result<(), CrawlerError> {
        debug!(job_id = job.job_id, url = %job.target, attempt = job.attempt, "feed.process");
        match self.ingest_feed(&job.target).await {
            Ok(_) => self.db.complete_job(job.job_id).await,
            Err(e) => {
                let status = self.db.retry_or_fail_job(job, &e, self.limits.max_attempts).await?;
                warn!(url = %job.target, error = %e, status = status.as_str(), "feed.error");
                Ok(())
            }
        }
    }

    async fn process_resolve_job(&self, job: &Job) -> Result<(), CrawlerError> {
        debug!(job_id = job.job_id, key = %job.target, attempt = job.attempt, "resolve.process");

        let row = match self.db.get_remote_item(&job.target).await? {
            Some(row) => row,
            None => {
                self.db.fail_job(job.job_id, "remote item not found").await?;
                info!(job_id = job.job_id, key = %job.target, "resolve.skip.no_item");
                return Ok(());
            }
        };
        if row.resolved.is_some() {
            return self.db.complete_job(job.job_id).await;
        }

        match self.resolve_remote_item(&row.item).await {
            Ok(song) => {
                self.db.set_resolved(&row.key, &song).await?;
                self.db.complete_job(job.job_id).await?;
                info!(
                    key = %row.key, title = %song.title,
                    source = song.source.as_str(), "resolve.done"
                );
            }
            Err(e) => {
                let status = self.db.retry_or_fail_job(job, &e, self.limits.max_attempts).await?;
                if status == JobStatus::Failed {
                    self.db.mark_remote_failed(&row.key).await?;
                }
                warn!(key = %row.key, error = %e, status = status.as_str(), "resolve.error");
            }
        }
        Ok(())
    }

    pub async fn export(&self) -> Result<ExportSummary, CrawlerError> {
        let _guard = self.tracks_lock.lock().await;
        export_resolved(&self.db, &self.store, self.started_at).await
    }
}

/// Runs a read-modify-write of the json documents on the blocking pool
async fn on_documents<T, F>(store: &JsonStore, f: F) -> Result<T, CrawlerError>
where
    T: Send + 'static,
    F: FnOnce(&JsonStore) -> Result<T, CrawlerError> + Send + 'static
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || f(&store))
        .await
        .map_err(|e| CrawlerError::Db(format!("document task: {e}")))?
}

/// Folds resolved songs into music-tracks.json and writes
/// resolved-songs.json plus the failure report
pub async fn export_resolved(
    db: &Persistent, store: &JsonStore, started_at: DateTime<Utc>
) -> Result<ExportSummary, CrawlerError> {
    let songs = db.resolved_songs().await?;
    let failed = db.failed_items().await?;

    let summary = on_documents(store, move |store| {
        let mut doc = store.load_tracks()?;
        let merged = repair::merge_tracks(
            &mut doc,
            songs.iter().map(MusicTrack::from).collect()
        );
        store.save_tracks(&mut doc)?;
        store.save_resolved_songs(&songs)?;

        let summary = ExportSummary {
            resolved: songs.len(),
            added: merged.added,
            duplicates: merged.duplicates,
            failed: failed.len()
        };
        store.save_report(&ResolutionReport {
            started_at,
            finished_at: Utc::now(),
            resolved: songs.len(),
            failed
        })?;
        Ok(summary)
    }).await?;
    info!(
        resolved = summary.resolved, added = summary.added,
        failed = summary.failed, "export.done"
    );
    Ok(summary)
}
