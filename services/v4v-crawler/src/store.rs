//!
//! src/store.rs  Oct 16th, 2026
//!
//! Json documents under the data directory. Reads treat a missing file as
//! an empty document; writes go through a temp file in the same directory
//! and are persisted over the target so readers never see half a file
//!

use std::{fs, path::{Path, PathBuf}, time::SystemTime};

use serde::Serialize;
use serde_json::Value;

use crate::errors::CrawlerError;
use crate::model::{
    MusicTrackDatabase, ParsedFeedsDocument, ResolutionReport, ResolvedSong
};

pub const MUSIC_TRACKS_FILE: &str = "music-tracks.json";
pub const PARSED_FEEDS_FILE: &str = "parsed-feeds.json";
pub const RESOLVED_SONGS_FILE: &str = "resolved-songs.json";
pub const REPORT_FILE: &str = "resolution-report.json";

#[derive(Debug, Clone)]
pub struct JsonStore {
    root: PathBuf
}

impl JsonStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }

    pub fn path(&self, file: &str) -> PathBuf {
        self.root.join(file)
    }

    fn read_value(&self, file: &str) -> Result<Option<Value>, CrawlerError> {
        let path = self.path(file);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into())
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        let value = serde_json::from_slice(&bytes)
            .map_err(|e| CrawlerError::Parse(format!("{}: {e}", path.display())))?;
        Ok(Some(value))
    }

    fn write_json<T: Serialize>(&self, file: &str, doc: &T) -> Result<PathBuf, CrawlerError> {
        let path = self.path(file);
        let parent = path.parent().unwrap_or(Path::new("."));
        fs::create_dir_all(parent).map_err(|e|
            CrawlerError::Db(format!("create dir {}: {e}", parent.display())))?;

        let temp = tempfile::NamedTempFile::new_in(parent)
            .map_err(|e| CrawlerError::Db(
                format!("tempfile in {}: {e}", parent.display())
            ))?;
        serde_json::to_writer_pretty(temp.as_file(), doc)
            .map_err(|e| CrawlerError::Db(format!("serialize {file}: {e}")))?;
        temp.as_file().sync_all()?;
        temp.persist(&path).map_err(|e|
            CrawlerError::Db(format!("persist {}: {e}", path.display())))?;
        Ok(path)
    }

    pub fn load_tracks(&self) -> Result<MusicTrackDatabase, CrawlerError> {
        match self.read_value(MUSIC_TRACKS_FILE)? {
            Some(v) => MusicTrackDatabase::from_value(v),
            None => Ok(MusicTrackDatabase::default())
        }
    }

    /// mtime and length of music-tracks.json, None while it does not exist
    pub fn tracks_stamp(&self) -> Option<(SystemTime, u64)> {
        let meta = fs::metadata(self.path(MUSIC_TRACKS_FILE)).ok()?;
        Some((meta.modified().ok()?, meta.len()))
    }

    /// Refreshes lastUpdated / totalTracks before writing
    pub fn save_tracks(&self, db: &mut MusicTrackDatabase) -> Result<PathBuf, CrawlerError> {
        db.touch();
        self.write_json(MUSIC_TRACKS_FILE, db)
    }

    pub fn load_parsed_feeds(&self) -> Result<ParsedFeedsDocument, CrawlerError> {
        match self.read_value(PARSED_FEEDS_FILE)? {
            Some(v) => ParsedFeedsDocument::from_value(v),
            None => Ok(ParsedFeedsDocument::default())
        }
    }

    pub fn save_parsed_feeds(&self, doc: &ParsedFeedsDocument) -> Result<PathBuf, CrawlerError> {
        self.write_json(PARSED_FEEDS_FILE, doc)
    }

    pub fn load_resolved_songs(&self) -> Result<Vec<ResolvedSong>, CrawlerError> {
        match self.read_value(RESOLVED_SONGS_FILE)? {
            Some(v) => Ok(serde_json::from_value(v)?),
            None => Ok(Vec::new())
        }
    }

    pub fn save_resolved_songs(&self, songs: &[ResolvedSong]) -> Result<PathBuf, CrawlerError> {
        self.write_json(RESOLVED_SONGS_FILE, &songs)
    }

    pub fn save_report(&self, report: &ResolutionReport) -> Result<PathBuf, CrawlerError> {
        self.write_json(REPORT_FILE, report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MusicTrack;

    #[test]
    fn missing_and_blank_files_load_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path());
        assert!(store.load_tracks().unwrap().tracks.is_empty());

        fs::write(store.path(PARSED_FEEDS_FILE), "  \n").unwrap();
        assert!(store.load_parsed_feeds().unwrap().feeds.is_empty());
        assert!(store.load_resolved_songs().unwrap().is_empty());
    }

    #[test]
    fn save_refreshes_metadata_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path().join("nested"));

        let mut db = MusicTrackDatabase::default();
        db.tracks.push(MusicTrack { id: "a".into(), title: "A".into(), ..Default::default() });
        db.tracks.push(MusicTrack { id: "b".into(), title: "B".into(), ..Default::default() });
        store.save_tracks(&mut db).unwrap();

        let back = store.load_tracks().unwrap();
        assert_eq!(back.metadata.total_tracks, 2);
        assert!(back.metadata.last_updated.is_some());
        assert_eq!(back.find("b").unwrap().title, "B");

        // no temp files left behind
        let leftovers = fs::read_dir(dir.path().join("nested")).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn corrupt_documents_are_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path());
        fs::write(store.path(MUSIC_TRACKS_FILE), "{ not json").unwrap();
        assert!(matches!(store.load_tracks(), Err(CrawlerError::Parse(_))));
    }
}
