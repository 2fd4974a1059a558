//!
//! src/catalog.rs  Oct 17th, 2026
//!
//! Read side of the track document: albums grouped by feed, and filtered,
//! paginated track listings
//!

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::errors::CrawlerError;
use crate::model::{DatabaseMetadata, MusicTrack, MusicTrackDatabase};

pub const ALBUM_LIMIT_DEFAULT: usize = 50;
pub const ALBUM_LIMIT_MAX: usize = 500;
pub const PAGE_SIZE_DEFAULT: usize = 100;
pub const PAGE_SIZE_MAX: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Single,
    Ep,
    Album
}

impl Tier {
    pub fn for_count(n: usize) -> Tier {
        match n {
            0 | 1 => Tier::Single,
            2..=6 => Tier::Ep,
            _ => Tier::Album
        }
    }

    /// `all` and an empty value mean no tier filter
    pub fn parse(s: &str) -> Result<Option<Tier>, CrawlerError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "all" => Ok(None),
            "single" | "singles" => Ok(Some(Tier::Single)),
            "ep" | "eps" => Ok(Some(Tier::Ep)),
            "album" | "albums" => Ok(Some(Tier::Album)),
            other => Err(CrawlerError::Parse(format!("unknown tier {other}")))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Album {
    pub id: String,
    pub title: String,
    pub artist: Option<String>,
    pub cover_art: Option<String>,
    pub feed_guid: Option<String>,
    pub feed_url: Option<String>,
    pub tracks: Vec<MusicTrack>,
    pub total_duration: u64,
    pub track_count: usize,
    pub tier: Tier
}

fn slug(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
        } else if !out.ends_with('-') && !out.is_empty() {
            out.push('-');
        }
    }
    out.trim_end_matches('-').to_string()
}

fn group_key(t: &MusicTrack) -> String {
    if let Some(g) = t.feed_guid.as_deref().filter(|g| !g.is_empty()) {
        return format!("guid:{g}");
    }
    if let Some(u) = t.feed_url.as_deref().filter(|u| !u.is_empty()) {
        return format!("url:{u}");
    }
    let title = t.album.as_deref().or(t.feed_title.as_deref()).unwrap_or("unknown");
    format!("title:{}", title.trim().to_lowercase())
}

fn published(t: &MusicTrack) -> Option<DateTime<FixedOffset>> {
    let s = t.published_at.as_deref()?.trim();
    DateTime::parse_from_rfc3339(s)
        .or_else(|_| DateTime::parse_from_rfc2822(s))
        .ok()
}

fn first_with<F>(tracks: &[MusicTrack], field: F) -> Option<String>
where
    F: Fn(&MusicTrack) -> Option<&String>
{
    tracks.iter().find_map(|t| field(t).cloned())
}

fn build_album(tracks: Vec<MusicTrack>) -> Album {
    let mut tracks = tracks;
    tracks.sort_by_cached_key(|t| (published(t).is_none(), published(t), t.title.to_lowercase()));

    let feed_guid = first_with(&tracks, |t| t.feed_guid.as_ref());
    let feed_url = first_with(&tracks, |t| t.feed_url.as_ref());
    let title = first_with(&tracks, |t| t.album.as_ref())
        .or_else(|| first_with(&tracks, |t| t.feed_title.as_ref()))
        .unwrap_or_else(|| "Unknown Album".to_string());
    let artist = first_with(&tracks, |t| t.artist.as_ref());
    let cover_art = first_with(&tracks, |t| t.feed_image.as_ref())
        .or_else(|| first_with(&tracks, |t| t.image.as_ref()));

    let id = feed_guid.clone()
        .unwrap_or_else(|| slug(&format!("{} {}", artist.as_deref().unwrap_or(""), title)));

    Album {
        id,
        title,
        artist,
        cover_art,
        feed_guid,
        feed_url,
        total_duration: tracks.iter().filter_map(|t| t.duration).sum(),
        track_count: tracks.len(),
        tier: Tier::for_count(tracks.len()),
        tracks
    }
}

/// Groups by feed guid, else feed url, else album title; albums keep the
/// order their first track appears in
pub fn group_albums(tracks: &[MusicTrack]) -> Vec<Album> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<MusicTrack>> = HashMap::new();
    for t in tracks {
        let key = group_key(t);
        groups.entry(key.clone())
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(t.clone());
    }
    order.into_iter()
        .filter_map(|k| groups.remove(&k))
        .map(build_album)
        .collect()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlbumQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub tier: Option<String>,
    pub feed_id: Option<String>,
    pub filter: Option<String>
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlbumPage {
    pub albums: Vec<Album>,
    pub total_count: usize,
    pub has_more: bool,
    pub limit: usize,
    pub offset: usize
}

fn contains_ci(haystack: Option<&str>, needle: &str) -> bool {
    haystack.map(|h| h.to_lowercase().contains(needle)).unwrap_or(false)
}

fn album_matches(album: &Album, needle: &str) -> bool {
    contains_ci(Some(&album.title), needle)
        || contains_ci(album.artist.as_deref(), needle)
        || album.tracks.iter().any(|t| contains_ci(Some(&t.title), needle))
}

pub fn query_albums(tracks: &[MusicTrack], q: &AlbumQuery) -> Result<AlbumPage, CrawlerError> {
    let tier = match q.tier.as_deref() {
        Some(t) => Tier::parse(t)?,
        None => None
    };
    let limit = q.limit.unwrap_or(ALBUM_LIMIT_DEFAULT).clamp(1, ALBUM_LIMIT_MAX);
    let offset = q.offset.unwrap_or(0);
    let needle = q.filter.as_deref()
        .map(|f| f.trim().to_lowercase())
        .filter(|f| !f.is_empty());
    let feed_id = q.feed_id.as_deref().map(str::trim).filter(|f| !f.is_empty());

    let matched: Vec<Album> = group_albums(tracks).into_iter()
        .filter(|a| tier.map_or(true, |t| a.tier == t))
        .filter(|a| feed_id.map_or(true, |id| {
            a.id == id || a.feed_guid.as_deref() == Some(id) || a.feed_url.as_deref() == Some(id)
        }))
        .filter(|a| needle.as_deref().map_or(true, |n| album_matches(a, n)))
        .collect();

    let total_count = matched.len();
    let albums: Vec<Album> = matched.into_iter().skip(offset).take(limit).collect();
    Ok(AlbumPage {
        has_more: offset + albums.len() < total_count,
        albums,
        total_count,
        limit,
        offset
    })
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackQuery {
    pub page: Option<usize>,
    pub page_size: Option<usize>,
    pub artist: Option<String>,
    pub feed_guid: Option<String>,
    pub search: Option<String>
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: usize,
    pub page_size: usize,
    pub total: usize,
    pub total_pages: usize
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackPage {
    pub tracks: Vec<MusicTrack>,
    pub pagination: Pagination,
    pub metadata: DatabaseMetadata
}

pub fn query_tracks(db: &MusicTrackDatabase, q: &TrackQuery) -> TrackPage {
    let page = q.page.unwrap_or(1).max(1);
    let page_size = q.page_size.unwrap_or(PAGE_SIZE_DEFAULT).clamp(1, PAGE_SIZE_MAX);
    let artist = q.artist.as_deref().map(|a| a.trim().to_lowercase()).filter(|a| !a.is_empty());
    let search = q.search.as_deref().map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty());
    let feed_guid = q.feed_guid.as_deref().map(str::trim).filter(|g| !g.is_empty());

    let matched: Vec<&MusicTrack> = db.tracks.iter()
        .filter(|t| artist.as_deref().map_or(true, |a| contains_ci(t.artist.as_deref(), a)))
        .filter(|t| feed_guid.map_or(true, |g| t.feed_guid.as_deref() == Some(g)))
        .filter(|t| search.as_deref().map_or(true, |s| {
            contains_ci(Some(&t.title), s)
                || contains_ci(t.artist.as_deref(), s)
                || contains_ci(t.album.as_deref(), s)
        }))
        .collect();

    let total = matched.len();
    let tracks = matched.into_iter()
        .skip((page - 1).saturating_mul(page_size))
        .take(page_size)
        .cloned()
        .collect();
    TrackPage {
        tracks,
        pagination: Pagination {
            page,
            page_size,
            total,
            total_pages: total.div_ceil(page_size)
        },
        metadata: db.metadata.clone()
    }
}
