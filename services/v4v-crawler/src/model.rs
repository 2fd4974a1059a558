//!
//! src/model.rs  Oct 15th, 2026
//!
//! Shapes of the json documents under data/. Historical documents are
//! loose (itemGuid as object or string, duration as seconds or clock
//! string) so every field deserializes tolerantly and serializes in one
//! normalized form
//!

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::errors::CrawlerError;
use crate::rss::{self, ParsedFeed, ParsedItem, ValueBlock};

pub const DATABASE_VERSION: u32 = 1;

/// Where a track record came from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub enum TrackSource {
    Rss,
    PodcastIndex,
    #[default]
    Manual
}

impl TrackSource {
    pub fn as_str(self) -> &'static str {
        match self {
            TrackSource::Rss => "rss",
            TrackSource::PodcastIndex => "podcastindex",
            TrackSource::Manual => "manual"
        }
    }
}

impl From<String> for TrackSource {
    fn from(s: String) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "rss" | "feed" => TrackSource::Rss,
            "podcastindex" | "podcast-index" | "api" => TrackSource::PodcastIndex,
            _ => TrackSource::Manual
        }
    }
}

impl From<TrackSource> for String {
    fn from(s: TrackSource) -> Self { s.as_str().to_string() }
}

// null or a non-string reads as manual rather than failing the document
impl<'de> Deserialize<'de> for TrackSource {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        Ok(Option::<Value>::deserialize(d)?
            .as_ref()
            .and_then(Value::as_str)
            .map(|s| TrackSource::from(s.to_string()))
            .unwrap_or_default())
    }
}

/// itemGuid shows up as "abc" or as { "_": "abc", "isPermaLink": "false" }
fn de_item_guid<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    let v = Option::<Value>::deserialize(d)?;
    Ok(match v {
        Some(Value::String(s)) => Some(s),
        Some(Value::Object(m)) => ["_", "#text", "value", "guid"].iter()
            .find_map(|k| m.get(*k).and_then(Value::as_str))
            .map(str::to_string),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None
    }
    .map(|s| s.trim().to_string())
    .filter(|s| !s.is_empty()))
}

/// duration shows up as 245, 245.3, "245" or "00:04:05"
fn de_duration<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
    let v = Option::<Value>::deserialize(d)?;
    Ok(match v {
        Some(Value::Number(n)) => n.as_u64()
            .filter(|secs| *secs <= rss::MAX_DURATION_SECS)
            .or_else(|| n.as_f64().and_then(rss::clamp_seconds)),
        Some(Value::String(s)) => rss::parse_duration(&s),
        _ => None
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MusicTrack {
    #[serde(default, deserialize_with = "rss::de_string")]
    pub id: String,
    #[serde(default, deserialize_with = "rss::de_string")]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feed_guid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feed_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feed_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feed_image: Option<String>,
    #[serde(default, deserialize_with = "de_item_guid", skip_serializing_if = "Option::is_none")]
    pub item_guid: Option<String>,
    #[serde(default, alias = "audioUrl", skip_serializing_if = "Option::is_none")]
    pub enclosure_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enclosure_type: Option<String>,
    #[serde(default, deserialize_with = "de_duration", skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, alias = "pubDate", skip_serializing_if = "Option::is_none")]
    pub published_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher_feed_guid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medium: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<ValueBlock>,
    #[serde(default)]
    pub source: TrackSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovered_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>
}

impl MusicTrack {
    /// feedGuid:itemGuid, the identity shared with resolved remote items
    pub fn remote_key(&self) -> Option<String> {
        match (&self.feed_guid, &self.item_guid) {
            (Some(f), Some(i)) => Some(format!("{}:{}", f.trim(), i.trim())),
            _ => None
        }
    }

    /// A track needs something playable; items without an enclosure are skipped
    pub fn from_feed_item(feed: &ParsedFeed, feed_url: Option<&str>, item: &ParsedItem) ->
        Option<Self> {
        let enclosure = item.enclosure.as_ref()?;
        Some(Self {
            id: String::new(),
            title: item.title.clone().unwrap_or_else(|| "Untitled".to_string()),
            artist: feed.author.clone(),
            album: feed.title.clone(),
            feed_guid: feed.guid.clone(),
            feed_url: feed_url.map(str::to_string),
            feed_title: feed.title.clone(),
            feed_image: feed.image.clone(),
            item_guid: item.guid.clone(),
            enclosure_url: Some(enclosure.url.clone()),
            enclosure_type: enclosure.mime_type.clone(),
            duration: item.duration,
            image: item.image.clone().or_else(|| feed.image.clone()),
            published_at: item.pub_date.clone(),
            publisher_feed_guid: None,
            medium: feed.medium.clone(),
            value: item.value.clone().or_else(|| feed.value.clone()),
            source: TrackSource::Rss,
            discovered_at: Some(Utc::now()),
            extra: Map::new()
        })
    }
}

impl From<&ResolvedSong> for MusicTrack {
    fn from(song: &ResolvedSong) -> Self {
        Self {
            id: String::new(),
            title: song.title.clone(),
            artist: song.artist.clone(),
            album: song.feed_title.clone(),
            feed_guid: Some(song.feed_guid.clone()),
            feed_url: song.feed_url.clone(),
            feed_title: song.feed_title.clone(),
            feed_image: song.feed_image.clone(),
            item_guid: Some(song.item_guid.clone()),
            enclosure_url: Some(song.enclosure_url.clone()),
            enclosure_type: song.enclosure_type.clone(),
            duration: song.duration,
            image: song.image.clone().or_else(|| song.feed_image.clone()),
            published_at: song.published_at.clone(),
            publisher_feed_guid: None,
            medium: song.medium.clone(),
            value: song.value.clone(),
            source: song.source,
            discovered_at: Some(song.resolved_at),
            extra: Map::new()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseMetadata {
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_tracks: usize,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(flatten)]
    pub extra: Map<String, Value>
}

fn default_version() -> u32 { DATABASE_VERSION }

impl Default for DatabaseMetadata {
    fn default() -> Self {
        Self {
            last_updated: None,
            total_tracks: 0,
            version: DATABASE_VERSION,
            extra: Map::new()
        }
    }
}

/// data/music-tracks.json
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MusicTrackDatabase {
    #[serde(default)]
    pub metadata: DatabaseMetadata,
    #[serde(default, alias = "musicTracks")]
    pub tracks: Vec<MusicTrack>
}

impl MusicTrackDatabase {
    /// Accepts both the wrapped document and a legacy bare array
    pub fn from_value(v: Value) -> Result<Self, CrawlerError> {
        if v.is_array() {
            let tracks: Vec<MusicTrack> = serde_json::from_value(v)?;
            let mut db = Self { tracks, ..Self::default() };
            db.touch();
            return Ok(db);
        }
        Ok(serde_json::from_value(v)?)
    }

    pub fn touch(&mut self) {
        self.metadata.last_updated = Some(Utc::now());
        self.metadata.total_tracks = self.tracks.len();
    }

    pub fn find(&self, id: &str) -> Option<&MusicTrack> {
        self.tracks.iter().find(|t| t.id == id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    #[default]
    Album,
    Publisher,
    Playlist
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseStatus {
    #[default]
    Pending,
    Success,
    Error
}

/// One entry of data/parsed-feeds.json
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedFeedEntry {
    pub id: String,
    pub original_url: String,
    #[serde(default, rename = "type")]
    pub kind: FeedKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default)]
    pub parse_status: ParseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed_data: Option<ParsedFeed>
}

impl ParsedFeedEntry {
    /// Tracks for every playable item of a successfully parsed feed
    pub fn tracks(&self) -> Vec<MusicTrack> {
        let Some(feed) = self.parsed_data.as_ref() else { return Vec::new() };
        if self.parse_status != ParseStatus::Success {
            return Vec::new();
        }
        feed.items.iter()
            .filter_map(|item| MusicTrack::from_feed_item(feed, Some(&self.original_url), item))
            .collect()
    }
}

/// data/parsed-feeds.json
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedFeedsDocument {
    #[serde(default)]
    pub feeds: Vec<ParsedFeedEntry>
}

impl ParsedFeedsDocument {
    pub fn from_value(v: Value) -> Result<Self, CrawlerError> {
        if v.is_array() {
            return Ok(Self { feeds: serde_json::from_value(v)? });
        }
        Ok(serde_json::from_value(v)?)
    }

    /// Replaces the entry for the same url, or appends
    pub fn upsert(&mut self, entry: ParsedFeedEntry) {
        match self.feeds.iter_mut().find(|f| f.original_url == entry.original_url) {
            Some(existing) => *existing = entry,
            None => self.feeds.push(entry)
        }
    }
}

/// A remote item after resolution, one element of data/resolved-songs.json
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedSong {
    pub feed_guid: String,
    pub item_guid: String,
    pub title: String,
    pub artist: Option<String>,
    pub feed_title: Option<String>,
    pub feed_url: Option<String>,
    pub feed_image: Option<String>,
    pub enclosure_url: String,
    pub enclosure_type: Option<String>,
    pub duration: Option<u64>,
    pub image: Option<String>,
    pub published_at: Option<String>,
    pub medium: Option<String>,
    pub value: Option<ValueBlock>,
    pub source: TrackSource,
    pub resolved_at: DateTime<Utc>
}

impl ResolvedSong {
    pub fn key(&self) -> String {
        format!("{}:{}", self.feed_guid, self.item_guid)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedItem {
    pub feed_guid: String,
    pub item_guid: Option<String>,
    pub error: String,
    pub attempts: i64
}

/// Written next to the documents after every resolve run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub resolved: usize,
    pub failed: Vec<FailedItem>
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tolerant_track_fields() {
        let raw = json!([
            {
                "id": "t1",
                "title": "Lightning Thrashes",
                "itemGuid": { "_": " 3f1a ", "isPermaLink": "false" },
                "duration": "00:04:05",
                "feedGuid": "f1",
                "someLegacyField": 7
            },
            { "id": "t2", "title": "Two", "itemGuid": "abc", "duration": 180.9 },
            { "id": "t3", "title": "Three", "duration": "garbage", "source": "PodcastIndex" }
        ]);
        let db = MusicTrackDatabase::from_value(raw).unwrap();
        assert_eq!(db.metadata.total_tracks, 3);

        let t1 = &db.tracks[0];
        assert_eq!(t1.item_guid.as_deref(), Some("3f1a"));
        assert_eq!(t1.duration, Some(245));
        assert_eq!(t1.remote_key().as_deref(), Some("f1:3f1a"));
        assert_eq!(t1.extra.get("someLegacyField"), Some(&json!(7)));

        assert_eq!(db.tracks[1].duration, Some(180));
        assert_eq!(db.tracks[2].duration, None);
        assert_eq!(db.tracks[2].source, TrackSource::PodcastIndex);
        assert_eq!(db.tracks[1].source, TrackSource::Manual);
    }

    #[test]
    fn legacy_records_do_not_fail_the_document() {
        let raw = json!({
            "tracks": [
                {
                    "id": null,
                    "title": null,
                    "source": null,
                    "value": {
                        "type": "lightning",
                        "recipients": [
                            { "address": "03ab", "split": "95" },
                            { "address": "02cd", "split": 5.0, "fee": "true" }
                        ]
                    }
                },
                { "id": 42, "title": "Bare value", "value": { "type": "lightning" } },
                { "title": "Huge", "duration": 1e30 },
                { "title": "Huger", "duration": "1:1e30" }
            ]
        });
        let db = MusicTrackDatabase::from_value(raw).unwrap();
        assert_eq!(db.tracks.len(), 4);

        let first = &db.tracks[0];
        assert_eq!(first.id, "");
        assert_eq!(first.title, "");
        assert_eq!(first.source, TrackSource::Manual);
        let value = first.value.as_ref().unwrap();
        assert_eq!(value.recipients[0].split, 95);
        assert!(!value.recipients[0].fee);
        assert_eq!(value.recipients[1].split, 5);
        assert!(value.recipients[1].fee);

        assert_eq!(db.tracks[1].id, "42");
        assert!(db.tracks[1].value.as_ref().unwrap().recipients.is_empty());
        assert_eq!(db.tracks[2].duration, None);
        assert_eq!(db.tracks[3].duration, None);
    }

    #[test]
    fn serializes_normalized_forms() {
        let raw = json!({
            "metadata": { "totalTracks": 1, "version": 1 },
            "tracks": [{ "title": "x", "itemGuid": { "_": "g" }, "duration": "1:00" }]
        });
        let db = MusicTrackDatabase::from_value(raw).unwrap();
        let out = serde_json::to_value(&db).unwrap();
        assert_eq!(out["tracks"][0]["itemGuid"], json!("g"));
        assert_eq!(out["tracks"][0]["duration"], json!(60));
        assert_eq!(out["tracks"][0]["source"], json!("manual"));
        assert!(out["tracks"][0].get("artist").is_none());
    }

    #[test]
    fn feed_entries_produce_tracks_only_on_success() {
        let feed = crate::rss::parse_feed(r#"<rss><channel><title>Album</title>
            <itunes:author xmlns:itunes="x">Band</itunes:author>
            <item><title>Song</title><guid>g1</guid>
              <enclosure url="https://a/1.mp3" type="audio/mpeg"/></item>
            <item><title>No audio</title><guid>g2</guid></item>
            </channel></rss>"#).unwrap();

        let mut entry = ParsedFeedEntry {
            id: "album-1".into(),
            original_url: "https://a/feed.xml".into(),
            parse_status: ParseStatus::Success,
            parsed_data: Some(feed),
            ..ParsedFeedEntry::default()
        };
        let tracks = entry.tracks();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].album.as_deref(), Some("Album"));
        assert_eq!(tracks[0].artist.as_deref(), Some("Band"));
        assert_eq!(tracks[0].source, TrackSource::Rss);

        entry.parse_status = ParseStatus::Error;
        assert!(entry.tracks().is_empty());
    }

    #[test]
    fn parsed_feeds_upsert_by_url() {
        let mut doc = ParsedFeedsDocument::from_value(json!([
            { "id": "a", "originalUrl": "https://a", "type": "playlist", "parseStatus": "error" }
        ])).unwrap();
        assert_eq!(doc.feeds[0].kind, FeedKind::Playlist);

        doc.upsert(ParsedFeedEntry {
            id: "a".into(),
            original_url: "https://a".into(),
            parse_status: ParseStatus::Success,
            ..ParsedFeedEntry::default()
        });
        doc.upsert(ParsedFeedEntry {
            id: "b".into(),
            original_url: "https://b".into(),
            ..ParsedFeedEntry::default()
        });
        assert_eq!(doc.feeds.len(), 2);
        assert_eq!(doc.feeds[0].parse_status, ParseStatus::Success);
    }
}
