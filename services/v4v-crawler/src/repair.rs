//!
//! src/repair.rs  Oct 16th, 2026
//!
//! Normalization and de-duplication of the track document. Runs on every
//! merge into music-tracks.json, and on demand over the whole document
//!

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use uuid::Uuid;

use crate::model::{MusicTrack, MusicTrackDatabase};

/// UTF-8 text that went through a Latin-1/CP1252 decode once, plus
/// entities escaped twice upstream. Longer sequences first.
const MOJIBAKE: &[(&str, &str)] = &[
    ("â€™", "\u{2019}"),
    ("â€˜", "\u{2018}"),
    ("â€œ", "\u{201c}"),
    ("â€\u{9d}", "\u{201d}"),
    ("â€“", "\u{2013}"),
    ("â€”", "\u{2014}"),
    ("â€¦", "\u{2026}"),
    ("Ã©", "é"),
    ("Ã¨", "è"),
    ("Ãª", "ê"),
    ("Ã¡", "á"),
    ("Ã³", "ó"),
    ("Ã­", "í"),
    ("Ãº", "ú"),
    ("Ã±", "ñ"),
    ("Ã¶", "ö"),
    ("Ã¼", "ü"),
    ("Ã¤", "ä"),
    ("Ã§", "ç"),
    ("Â\u{a0}", " "),
    ("&amp;", "&"),
    ("&#39;", "'"),
    ("&#039;", "'"),
    ("&quot;", "\""),
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairSummary {
    pub duplicates_removed: usize,
    pub fields_filled: usize,
    pub text_fixed: usize,
    pub ids_assigned: usize
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeOutcome {
    pub added: usize,
    pub duplicates: usize
}

pub fn fix_text(s: &str) -> String {
    let mut out = s.trim().to_string();
    for (bad, good) in MOJIBAKE {
        if out.contains(bad) {
            out = out.replace(bad, good);
        }
    }
    out
}

fn fix_field(field: &mut String) -> bool {
    let fixed = fix_text(field);
    if fixed != *field {
        *field = fixed;
        return true;
    }
    false
}

fn fix_opt(field: &mut Option<String>) -> bool {
    match field {
        Some(s) => {
            let changed = fix_field(s);
            if s.is_empty() {
                *field = None;
            }
            changed
        }
        None => false
    }
}

fn fix_track_text(t: &mut MusicTrack) -> usize {
    [
        fix_field(&mut t.title),
        fix_opt(&mut t.artist),
        fix_opt(&mut t.album),
        fix_opt(&mut t.feed_title),
        fix_opt(&mut t.feed_guid),
        fix_opt(&mut t.item_guid),
        fix_opt(&mut t.enclosure_url),
    ]
    .iter()
    .filter(|changed| **changed)
    .count()
}

fn fill<T: Clone>(dst: &mut Option<T>, src: &Option<T>) -> usize {
    if dst.is_none() && src.is_some() {
        *dst = src.clone();
        1
    } else {
        0
    }
}

/// The earlier record wins, but takes whatever it is missing from the later
fn absorb(keep: &mut MusicTrack, dup: &MusicTrack) -> usize {
    let mut n = 0;
    if keep.title.is_empty() && !dup.title.is_empty() {
        keep.title = dup.title.clone();
        n += 1;
    }
    n += fill(&mut keep.artist, &dup.artist);
    n += fill(&mut keep.album, &dup.album);
    n += fill(&mut keep.feed_guid, &dup.feed_guid);
    n += fill(&mut keep.feed_url, &dup.feed_url);
    n += fill(&mut keep.feed_title, &dup.feed_title);
    n += fill(&mut keep.feed_image, &dup.feed_image);
    n += fill(&mut keep.item_guid, &dup.item_guid);
    n += fill(&mut keep.enclosure_url, &dup.enclosure_url);
    n += fill(&mut keep.enclosure_type, &dup.enclosure_type);
    n += fill(&mut keep.duration, &dup.duration);
    n += fill(&mut keep.image, &dup.image);
    n += fill(&mut keep.published_at, &dup.published_at);
    n += fill(&mut keep.publisher_feed_guid, &dup.publisher_feed_guid);
    n += fill(&mut keep.medium, &dup.medium);
    n += fill(&mut keep.value, &dup.value);
    n
}

fn meta_key(t: &MusicTrack) -> String {
    format!(
        "{}|{}|{}",
        t.title.to_lowercase(),
        t.artist.as_deref().unwrap_or("").to_lowercase(),
        t.album.as_deref().unwrap_or("").to_lowercase()
    )
}

/// Index over the identities a track can be matched on
#[derive(Default)]
struct Seen {
    remote: HashMap<String, usize>,
    url: HashMap<String, usize>,
    meta: HashMap<String, usize>
}

impl Seen {
    fn lookup(&self, t: &MusicTrack) -> Option<usize> {
        if let Some(i) = t.remote_key().and_then(|k| self.remote.get(&k)) {
            return Some(*i);
        }
        if let Some(i) = t.enclosure_url.as_ref().and_then(|u| self.url.get(u)) {
            return Some(*i);
        }
        if t.remote_key().is_none() && t.enclosure_url.is_none() {
            return self.meta.get(&meta_key(t)).copied();
        }
        None
    }

    fn insert(&mut self, t: &MusicTrack, idx: usize) {
        if let Some(k) = t.remote_key() {
            self.remote.entry(k).or_insert(idx);
        }
        if let Some(u) = &t.enclosure_url {
            self.url.entry(u.clone()).or_insert(idx);
        }
        if t.remote_key().is_none() && t.enclosure_url.is_none() {
            self.meta.entry(meta_key(t)).or_insert(idx);
        }
    }
}

/// Fills gaps from sibling data: album from the feed title, image from the
/// feed image, artist from another track of the same feed
fn fill_from_feed(tracks: &mut [MusicTrack]) -> usize {
    let mut artists: HashMap<String, String> = HashMap::new();
    for t in tracks.iter() {
        if let (Some(feed), Some(artist)) = (&t.feed_guid, &t.artist) {
            artists.entry(feed.clone()).or_insert_with(|| artist.clone());
        }
    }

    let mut n = 0;
    for t in tracks.iter_mut() {
        if t.album.is_none() && t.feed_title.is_some() {
            t.album = t.feed_title.clone();
            n += 1;
        }
        if t.image.is_none() && t.feed_image.is_some() {
            t.image = t.feed_image.clone();
            n += 1;
        }
        if t.artist.is_none() {
            if let Some(artist) = t.feed_guid.as_ref().and_then(|f| artists.get(f)) {
                t.artist = Some(artist.clone());
                n += 1;
            }
        }
    }
    n
}

/// Full pass over the document
pub fn repair(db: &mut MusicTrackDatabase) -> RepairSummary {
    let mut summary = RepairSummary::default();
    let incoming = std::mem::take(&mut db.tracks);

    let mut seen = Seen::default();
    let mut kept: Vec<MusicTrack> = Vec::with_capacity(incoming.len());
    for mut t in incoming {
        summary.text_fixed += fix_track_text(&mut t);
        match seen.lookup(&t) {
            Some(idx) => {
                summary.fields_filled += absorb(&mut kept[idx], &t);
                summary.duplicates_removed += 1;
                seen.insert(&kept[idx], idx);
            }
            None => {
                seen.insert(&t, kept.len());
                kept.push(t);
            }
        }
    }

    summary.fields_filled += fill_from_feed(&mut kept);

    let mut ids: HashSet<String> = HashSet::new();
    for t in kept.iter_mut() {
        if t.id.trim().is_empty() || !ids.insert(t.id.clone()) {
            t.id = Uuid::new_v4().to_string();
            ids.insert(t.id.clone());
            summary.ids_assigned += 1;
        }
    }

    db.tracks = kept;
    db.touch();
    summary
}

/// Appends new tracks, folding duplicates into the records already present
pub fn merge_tracks(db: &mut MusicTrackDatabase, incoming: Vec<MusicTrack>) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();
    let mut seen = Seen::default();
    let mut ids: HashSet<String> = HashSet::new();
    for (idx, t) in db.tracks.iter().enumerate() {
        seen.insert(t, idx);
        ids.insert(t.id.clone());
    }

    for mut t in incoming {
        fix_track_text(&mut t);
        match seen.lookup(&t) {
            Some(idx) => {
                absorb(&mut db.tracks[idx], &t);
                outcome.duplicates += 1;
                seen.insert(&db.tracks[idx], idx);
            }
            None => {
                if t.id.trim().is_empty() || ids.contains(&t.id) {
                    t.id = Uuid::new_v4().to_string();
                }
                ids.insert(t.id.clone());
                seen.insert(&t, db.tracks.len());
                db.tracks.push(t);
                outcome.added += 1;
            }
        }
    }
    db.touch();
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(title: &str, feed: Option<&str>, item: Option<&str>, url: Option<&str>) -> MusicTrack {
        MusicTrack {
            title: title.to_string(),
            feed_guid: feed.map(str::to_string),
            item_guid: item.map(str::to_string),
            enclosure_url: url.map(str::to_string),
            ..MusicTrack::default()
        }
    }

    #[test]
    fn mojibake_is_fixed() {
        assert_eq!(fix_text("  Donâ€™t Stop  "), "Don\u{2019}t Stop");
        assert_eq!(fix_text("CafÃ© &amp; Bar"), "Café & Bar");
        assert_eq!(fix_text("clean"), "clean");
    }

    #[test]
    fn duplicates_fold_into_first_occurrence() {
        let mut first = track("Song", Some("f"), Some("i"), None);
        first.id = "keep-me".into();
        let mut later = track("Song", Some("f"), Some("i"), Some("https://a/1.mp3"));
        later.duration = Some(200);
        let by_url = track("Song (copy)", None, None, Some("https://a/1.mp3"));

        let mut db = MusicTrackDatabase { tracks: vec![first, later, by_url], ..Default::default() };
        let summary = repair(&mut db);

        assert_eq!(db.tracks.len(), 1);
        assert_eq!(summary.duplicates_removed, 2);
        let kept = &db.tracks[0];
        assert_eq!(kept.id, "keep-me");
        assert_eq!(kept.duration, Some(200));
        assert_eq!(kept.enclosure_url.as_deref(), Some("https://a/1.mp3"));
        assert_eq!(db.metadata.total_tracks, 1);
    }

    #[test]
    fn metadata_only_tracks_dedupe_case_insensitively() {
        let mut a = track("Hello", None, None, None);
        a.artist = Some("Band".into());
        let mut b = track("HELLO", None, None, None);
        b.artist = Some("band".into());
        let mut db = MusicTrackDatabase { tracks: vec![a, b], ..Default::default() };
        assert_eq!(repair(&mut db).duplicates_removed, 1);
    }

    #[test]
    fn fills_from_feed_and_assigns_ids() {
        let mut a = track("One", Some("f"), Some("1"), Some("u1"));
        a.artist = Some("Band".into());
        a.feed_title = Some("Record".into());
        let mut b = track("Two", Some("f"), Some("2"), Some("u2"));
        b.feed_title = Some("Record".into());
        b.id = "dup".into();
        let mut c = track("Three", Some("g"), Some("3"), Some("u3"));
        c.id = "dup".into();

        let mut db = MusicTrackDatabase { tracks: vec![a, b, c], ..Default::default() };
        let summary = repair(&mut db);

        assert_eq!(db.tracks[1].artist.as_deref(), Some("Band"));
        assert_eq!(db.tracks[1].album.as_deref(), Some("Record"));
        assert_eq!(db.tracks[0].album.as_deref(), Some("Record"));
        // empty id on the first, repeated id on the third
        assert_eq!(summary.ids_assigned, 2);
        assert_ne!(db.tracks[1].id, db.tracks[2].id);
        assert_eq!(db.tracks[1].id, "dup");
    }

    #[test]
    fn merge_counts_added_and_duplicates() {
        let mut db = MusicTrackDatabase {
            tracks: vec![track("One", Some("f"), Some("1"), Some("u1"))],
            ..Default::default()
        };
        let outcome = merge_tracks(&mut db, vec![
            track("One again", Some("f"), Some("1"), None),
            track("Two", Some("f"), Some("2"), Some("u2")),
            track("Two dup", None, None, Some("u2")),
        ]);
        assert_eq!(outcome, MergeOutcome { added: 1, duplicates: 2 });
        assert_eq!(db.tracks.len(), 2);
        assert!(!db.tracks[1].id.is_empty());
    }
}
