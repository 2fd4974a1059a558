//!
//! src/sink.rs  Oct 16th, 2026
//!
//! Compressed archive of raw upstream payloads (feed xml, Podcast Index
//! responses) so a resolution can be audited or replayed without
//! hitting the network again
//!

use std::{fs, io::Read, path::{Path, PathBuf}};
use serde_json::Value;
use sha1::{Digest, Sha1};

use crate::errors::CrawlerError;

const KEY_PREFIX_CHARS: usize = 96;
const KEY_DIGEST_HEX: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawType {
    FeedXml,
    PodcastIndexFeed,
    PodcastIndexEpisode,
    PodcastIndexEpisodes
}

impl RawType {
    pub fn source(self) -> &'static str {
        match self {
            RawType::FeedXml => "rss",
            _ => "podcastindex"
        }
    }

    pub fn subtype(self) -> &'static str {
        match self {
            RawType::FeedXml => "feed",
            RawType::PodcastIndexFeed => "podcast",
            RawType::PodcastIndexEpisode => "episode",
            RawType::PodcastIndexEpisodes => "episodes"
        }
    }

    fn extension(self) -> &'static str {
        match self {
            RawType::FeedXml => "xml.zst",
            _ => "json.zst"
        }
    }
}

pub struct DiskZstdSink {
    root: PathBuf,
    level: i32
}

impl DiskZstdSink {
    pub fn new(root: impl AsRef<Path>, level: i32) -> Self {
        Self { root: root.as_ref().to_path_buf(), level: level.clamp(0, 21)}
    }

    pub fn write_json(&self, kind: RawType, key: &str, mut json: Value) ->
        Result<PathBuf, CrawlerError> {
        Self::prune_podcast_index(&mut json);
        let bytes = serde_json::to_vec(&json)
            .map_err(|e| CrawlerError::Db(format!("serialize json: {e}")))?;
        self.write_bytes(kind, key, &bytes)
    }

    pub fn write_bytes(&self, kind: RawType, key: &str, bytes: &[u8]) ->
        Result<PathBuf, CrawlerError> {
        let path = self.root.join(Self::rel_path(kind, &Self::sanitize_key(key)));
        let parent = path.parent().unwrap_or(&self.root).to_path_buf();

        fs::create_dir_all(&parent).map_err(|e|
            CrawlerError::Db(
                format!("create dir {}: {e}", parent.display())
        ))?;

        let temp = tempfile::NamedTempFile::new_in(&parent)
            .map_err(|e| CrawlerError::Db(
                format!("tempfile in {}: {e}", parent.display())
            ))?;

        {
            let mut enc = zstd::stream::write::Encoder::new(
                temp.as_file(),
                self.level
            ).map_err(|e| CrawlerError::Db(
                format!("zstd encoder: {e}")
            ))?;

            std::io::Write::write_all(&mut enc, bytes)
                .map_err(|e| CrawlerError::Db(format!("zstd write: {e}")))?;
            enc.finish().map_err(|e| CrawlerError::Db(
                format!("zstd finish: {e}")
            ))?;
        }

        temp.persist(&path).map_err(|e|
            CrawlerError::Db(format!("persist {}: {e}", path.display())))?;

        Ok(path)
    }

    pub fn read_bytes(&self, kind: RawType, key: &str) -> Result<Vec<u8>, CrawlerError> {
        let path = self.root.join(Self::rel_path(kind, &Self::sanitize_key(key)));
        let file = fs::File::open(&path)?;
        let mut dec = zstd::stream::read::Decoder::new(file)
            .map_err(|e| CrawlerError::Db(format!("zstd decoder: {e}")))?;
        let mut out = Vec::new();
        dec.read_to_end(&mut out)?;
        Ok(out)
    }

    pub fn read_json(&self, kind: RawType, key: &str) -> Result<Value, CrawlerError> {
        Ok(serde_json::from_slice(&self.read_bytes(kind, key)?)?)
    }

    fn rel_path(kind: RawType, sanitized_key: &str) -> PathBuf {
        PathBuf::from(kind.source())
            .join(kind.subtype())
            .join(format!("{sanitized_key}.{}", kind.extension()))
    }

    /// Readable prefix of the key plus a digest of the whole key, so long
    /// feed urls stay under the file name limit and never collide
    fn sanitize_key(key: &str) -> String {
        let readable: String = key.chars()
            .take(KEY_PREFIX_CHARS)
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let digest = hex::encode(Sha1::digest(key.as_bytes()));
        format!("{readable}-{}", &digest[..KEY_DIGEST_HEX])
    }

    /// Drops keys that we do not store/handle
    fn prune_podcast_index(v: &mut Value) {
        Self::drop_keys_recursive(v,
            &["description", "transcripts", "chapters", "persons", "socialInteract",
              "soundbite", "soundbites", "chaptersUrl", "transcriptUrl"]);
    }

    fn drop_keys_recursive(v: &mut Value, keys: &[&str]) {
        match v {
            Value::Object(map) => {
                for key in keys {
                    map.remove(*key);
                }
                for val in map.values_mut() {
                    Self::drop_keys_recursive(val, keys);
                }
            }
            Value::Array(arr) => {
                for element in arr {
                    Self::drop_keys_recursive(element, keys);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_is_pruned_and_compressed() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DiskZstdSink::new(dir.path(), 3);

        let payload = json!({
            "status": "true",
            "episode": {
                "id": 1, "title": "Song", "description": "long html",
                "persons": [{"name": "x"}],
                "enclosureUrl": "https://a/1.mp3"
            }
        });
        let path = sink.write_json(RawType::PodcastIndexEpisode, "feed:item/1", payload).unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(path.parent().unwrap().ends_with("podcastindex/episode"));
        assert!(name.starts_with("feed_item_1-"));
        assert!(name.ends_with(".json.zst"));

        let back = sink.read_json(RawType::PodcastIndexEpisode, "feed:item/1").unwrap();
        assert_eq!(back["episode"]["title"], "Song");
        assert!(back["episode"].get("description").is_none());
        assert!(back["episode"].get("persons").is_none());
    }

    #[test]
    fn keys_map_to_short_distinct_names() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DiskZstdSink::new(dir.path(), 3);

        let long = format!("https://example.com/{}/feed.xml?token={}", "a".repeat(400), "b".repeat(200));
        let path = sink.write_bytes(RawType::FeedXml, &long, b"<rss/>").unwrap();
        assert!(path.file_name().unwrap().len() < 255);
        assert_eq!(sink.read_bytes(RawType::FeedXml, &long).unwrap(), b"<rss/>");

        let slash = sink.write_bytes(RawType::FeedXml, "https://a/b", b"1").unwrap();
        let under = sink.write_bytes(RawType::FeedXml, "https://a_b", b"2").unwrap();
        assert_ne!(slash, under);
        assert_eq!(sink.read_bytes(RawType::FeedXml, "https://a/b").unwrap(), b"1");
    }

    #[test]
    fn xml_bytes_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DiskZstdSink::new(dir.path(), 99);
        let xml = b"<rss><channel><title>x</title></channel></rss>";
        sink.write_bytes(RawType::FeedXml, "https://example.com/feed.xml", xml).unwrap();
        let back = sink.read_bytes(RawType::FeedXml, "https://example.com/feed.xml").unwrap();
        assert_eq!(back, xml);
    }
}
