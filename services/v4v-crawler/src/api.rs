//!
//! src/api.rs  Oct 18th, 2026
//!
//! Catalog http api. The track document is held behind a lock and
//! reloaded whenever music-tracks.json changes underneath it, since the
//! resolver exports into the same file. Writes start from the file on
//! disk and go back to disk before the in-memory copy is swapped
//!

use std::{sync::Arc, time::SystemTime};

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::{RwLock, RwLockReadGuard};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::catalog::{self, AlbumPage, AlbumQuery, TrackPage, TrackQuery};
use crate::config::ServerConfig;
use crate::errors::CrawlerError;
use crate::model::{MusicTrack, MusicTrackDatabase};
use crate::repair::{self, MergeOutcome, RepairSummary};
use crate::store::JsonStore;

/// The document as last read or written, with the file stamp it matches
pub struct Snapshot {
    pub doc: MusicTrackDatabase,
    stamp: Option<(SystemTime, u64)>
}

pub struct AppState {
    db: RwLock<Snapshot>,
    pub store: JsonStore
}

impl AppState {
    pub fn load(store: JsonStore) -> Result<Self, CrawlerError> {
        let stamp = store.tracks_stamp();
        let doc = store.load_tracks()?;
        info!(tracks = doc.tracks.len(), "api.state.loaded");
        Ok(Self { db: RwLock::new(Snapshot { doc, stamp }), store })
    }

    /// Read access to the document, reloading it first if the file moved on
    pub async fn current(&self) -> Result<RwLockReadGuard<'_, Snapshot>, CrawlerError> {
        let snap = self.db.read().await;
        if snap.stamp == self.store.tracks_stamp() {
            return Ok(snap);
        }
        drop(snap);

        let mut snap = self.db.write().await;
        let stamp = self.store.tracks_stamp();
        if snap.stamp != stamp {
            snap.doc = self.store.load_tracks()?;
            snap.stamp = stamp;
            info!(tracks = snap.doc.tracks.len(), "api.state.reloaded");
        }
        Ok(snap.downgrade())
    }

    /// Applies `f` to the document on disk, persists it, then publishes it
    async fn mutate<T>(
        &self,
        f: impl FnOnce(&mut MusicTrackDatabase) -> Result<T, CrawlerError>
    ) -> Result<T, CrawlerError> {
        let mut snap = self.db.write().await;
        let mut next = self.store.load_tracks()?;
        let out = f(&mut next)?;
        self.store.save_tracks(&mut next)?;
        snap.stamp = self.store.tracks_stamp();
        snap.doc = next;
        Ok(out)
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/albums", get(albums))
        .route("/api/music-tracks/database", get(list_tracks).post(update_database))
        .route("/api/admin/migrate-feeds", post(migrate_feeds))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(cfg: &ServerConfig, state: Arc<AppState>, shutdown: CancellationToken) ->
    Result<(), CrawlerError> {
    let listener = tokio::net::TcpListener::bind(cfg.bind).await?;
    info!(bind = %cfg.bind, "api.listen");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("api.exit");
    Ok(())
}

async fn health(State(state): State<Arc<AppState>>) -> Result<Json<Value>, CrawlerError> {
    let tracks = state.current().await?.doc.tracks.len();
    Ok(Json(json!({ "status": "ok", "tracks": tracks })))
}

/// GET /api/albums?limit&offset&tier&feedId&filter
async fn albums(
    State(state): State<Arc<AppState>>,
    Query(q): Query<AlbumQuery>
) -> Result<Json<AlbumPage>, CrawlerError> {
    let snap = state.current().await?;
    Ok(Json(catalog::query_albums(&snap.doc.tracks, &q)?))
}

/// GET /api/music-tracks/database?page&pageSize&artist&feedGuid&search
async fn list_tracks(
    State(state): State<Arc<AppState>>,
    Query(q): Query<TrackQuery>
) -> Result<Json<TrackPage>, CrawlerError> {
    let snap = state.current().await?;
    Ok(Json(catalog::query_tracks(&snap.doc, &q)))
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
enum DatabaseAction {
    Add { tracks: Vec<MusicTrack> },
    Update { id: String, patch: Map<String, Value> },
    Remove { ids: Vec<String> },
    Repair
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ActionResult {
    Added(MergeOutcome),
    Updated { updated: MusicTrack },
    Removed { removed: usize },
    Repaired(RepairSummary)
}

/// Overlays `patch` on the track's json form; the id is not patchable
fn apply_patch(track: &MusicTrack, patch: Map<String, Value>) -> Result<MusicTrack, CrawlerError> {
    let mut value = serde_json::to_value(track)?;
    if let Value::Object(fields) = &mut value {
        for (k, v) in patch {
            if k != "id" {
                fields.insert(k, v);
            }
        }
    }
    serde_json::from_value(value)
        .map_err(|e| CrawlerError::Parse(format!("patch: {e}")))
}

/// POST /api/music-tracks/database { action: add | update | remove | repair }
async fn update_database(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>
) -> Result<Json<ActionResult>, CrawlerError> {
    let action: DatabaseAction = serde_json::from_value(body)
        .map_err(|e| CrawlerError::Parse(format!("action: {e}")))?;

    let result = match action {
        DatabaseAction::Add { tracks } => state.mutate(|db| {
            Ok(ActionResult::Added(repair::merge_tracks(db, tracks)))
        }).await?,
        DatabaseAction::Update { id, patch } => state.mutate(|db| {
            let track = db.tracks.iter_mut()
                .find(|t| t.id == id)
                .ok_or_else(|| CrawlerError::NotFound(format!("track {id}")))?;
            *track = apply_patch(track, patch)?;
            Ok(ActionResult::Updated { updated: track.clone() })
        }).await?,
        DatabaseAction::Remove { ids } => state.mutate(|db| {
            let before = db.tracks.len();
            db.tracks.retain(|t| !ids.contains(&t.id));
            Ok(ActionResult::Removed { removed: before - db.tracks.len() })
        }).await?,
        DatabaseAction::Repair => state.mutate(|db| {
            Ok(ActionResult::Repaired(repair::repair(db)))
        }).await?
    };
    Ok(Json(result))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MigrateOutcome {
    migrated: usize,
    skipped: usize,
    feeds: usize,
    tracks_added: usize,
    duplicates: usize
}

/// POST /api/admin/migrate-feeds: every successfully parsed feed becomes tracks
async fn migrate_feeds(State(state): State<Arc<AppState>>) ->
    Result<Json<MigrateOutcome>, CrawlerError> {
    let parsed = state.store.load_parsed_feeds()?;
    let mut outcome = MigrateOutcome {
        migrated: 0,
        skipped: 0,
        feeds: parsed.feeds.len(),
        tracks_added: 0,
        duplicates: 0
    };

    let mut incoming = Vec::new();
    for entry in &parsed.feeds {
        let tracks = entry.tracks();
        if tracks.is_empty() {
            outcome.skipped += 1;
            continue;
        }
        outcome.migrated += 1;
        incoming.extend(tracks);
    }

    let merged = state.mutate(|db| Ok(repair::merge_tracks(db, incoming))).await?;
    outcome.tracks_added = merged.added;
    outcome.duplicates = merged.duplicates;
    info!(
        migrated = outcome.migrated, skipped = outcome.skipped,
        added = outcome.tracks_added, "api.migrate_feeds"
    );
    Ok(Json(outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::model::{ParseStatus, ParsedFeedEntry, ParsedFeedsDocument};

    fn track(id: &str, feed: &str, title: &str) -> MusicTrack {
        MusicTrack {
            id: id.into(),
            title: title.into(),
            artist: Some("Band".into()),
            feed_guid: Some(feed.into()),
            item_guid: Some(id.into()),
            enclosure_url: Some(format!("https://cdn/{id}.mp3")),
            ..MusicTrack::default()
        }
    }

    fn state(dir: &std::path::Path) -> Arc<AppState> {
        let store = JsonStore::new(dir);
        let mut db = MusicTrackDatabase::default();
        db.tracks = vec![track("t1", "f1", "One"), track("t2", "f1", "Two"), track("t3", "f2", "Solo")];
        store.save_tracks(&mut db).unwrap();
        Arc::new(AppState::load(store).unwrap())
    }

    async fn call(state: &Arc<AppState>, req: Request<Body>) -> (StatusCode, Value) {
        let resp = router(state.clone()).oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_and_albums() {
        let dir = tempfile::tempdir().unwrap();
        let s = state(dir.path());

        let (status, body) = call(&s, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "ok", "tracks": 3 }));

        let (status, body) = call(&s, get("/api/albums?tier=ep")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["totalCount"], 1);
        assert_eq!(body["albums"][0]["feedGuid"], "f1");
        assert_eq!(body["albums"][0]["trackCount"], 2);

        let (status, body) = call(&s, get("/api/albums?tier=all&filter=solo&limit=1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["albums"][0]["tier"], "single");
        assert_eq!(body["hasMore"], false);

        let (status, _) = call(&s, get("/api/albums?tier=boxset")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn track_listing_paginates() {
        let dir = tempfile::tempdir().unwrap();
        let s = state(dir.path());
        let (status, body) = call(&s, get("/api/music-tracks/database?page=2&pageSize=2")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["tracks"].as_array().unwrap().len(), 1);
        assert_eq!(body["pagination"]["totalPages"], 2);
        assert_eq!(body["metadata"]["totalTracks"], 3);
    }

    #[tokio::test]
    async fn actions_persist() {
        let dir = tempfile::tempdir().unwrap();
        let s = state(dir.path());

        let (status, body) = call(&s, post("/api/music-tracks/database", json!({
            "action": "add",
            "tracks": [
                { "title": "New", "feedGuid": "f3", "itemGuid": "n1", "enclosureUrl": "https://cdn/n1.mp3" },
                { "title": "One again", "feedGuid": "f1", "itemGuid": "t1" }
            ]
        }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "added": 1, "duplicates": 1 }));

        let (status, body) = call(&s, post("/api/music-tracks/database", json!({
            "action": "update", "id": "t2", "patch": { "title": "Two (Remastered)", "id": "hijack" }
        }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["updated"]["title"], "Two (Remastered)");
        assert_eq!(body["updated"]["id"], "t2");

        let (status, _) = call(&s, post("/api/music-tracks/database", json!({
            "action": "update", "id": "missing", "patch": {}
        }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(&s, post("/api/music-tracks/database", json!({
            "action": "remove", "ids": ["t3", "nope"]
        }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["removed"], 1);

        let (status, _) = call(&s, post("/api/music-tracks/database", json!({ "action": "explode" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let on_disk = JsonStore::new(dir.path()).load_tracks().unwrap();
        assert_eq!(on_disk.tracks.len(), 3);
        assert_eq!(on_disk.find("t2").unwrap().title, "Two (Remastered)");
        assert!(on_disk.find("t3").is_none());

        let (status, body) = call(&s, post("/api/music-tracks/database", json!({ "action": "repair" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["duplicatesRemoved"], 0);
    }

    #[tokio::test]
    async fn writes_behind_the_state_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let s = state(dir.path());

        // another process exports into the same file after the api loaded it
        let other = JsonStore::new(dir.path());
        let mut doc = other.load_tracks().unwrap();
        doc.tracks.push(track("t4", "f4", "Exported"));
        other.save_tracks(&mut doc).unwrap();

        let (status, body) = call(&s, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["tracks"], 4);

        let mut doc = other.load_tracks().unwrap();
        doc.tracks.push(track("t5", "f5", "Exported later"));
        other.save_tracks(&mut doc).unwrap();

        let (status, body) = call(&s, post("/api/music-tracks/database", json!({
            "action": "remove", "ids": ["t1"]
        }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["removed"], 1);

        let on_disk = other.load_tracks().unwrap();
        assert_eq!(on_disk.tracks.len(), 4);
        assert!(on_disk.find("t1").is_none());
        assert!(on_disk.find("t4").is_some());
        assert!(on_disk.find("t5").is_some());
        assert_eq!(s.current().await.unwrap().doc.tracks.len(), 4);
    }

    #[tokio::test]
    async fn migrate_feeds_converts_successful_entries() {
        let dir = tempfile::tempdir().unwrap();
        let s = state(dir.path());

        let feed = crate::rss::parse_feed(r#"<rss><channel><title>Fresh</title>
            <item><title>Fresh Song</title><guid>fs1</guid>
              <enclosure url="https://cdn/fresh.mp3" type="audio/mpeg"/></item>
            </channel></rss>"#).unwrap();
        let doc = ParsedFeedsDocument { feeds: vec![
            ParsedFeedEntry {
                id: "fresh".into(),
                original_url: "https://fresh/feed.xml".into(),
                parse_status: ParseStatus::Success,
                parsed_data: Some(feed),
                ..ParsedFeedEntry::default()
            },
            ParsedFeedEntry {
                id: "broken".into(),
                original_url: "https://broken/feed.xml".into(),
                parse_status: ParseStatus::Error,
                error: Some("timeout".into()),
                ..ParsedFeedEntry::default()
            }
        ]};
        s.store.save_parsed_feeds(&doc).unwrap();

        let (status, body) = call(&s, post("/api/admin/migrate-feeds", json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["migrated"], 1);
        assert_eq!(body["skipped"], 1);
        assert_eq!(body["feeds"], 2);
        assert_eq!(body["tracksAdded"], 1);

        let (_, body) = call(&s, get("/health")).await;
        assert_eq!(body["tracks"], 4);
    }
}
