//! Tidal v1 API client.
//!
//! Listings are offset-paged (`offset`, `limit`, `totalNumberOfItems`) and
//! every call carries `countryCode`. Playlist edits require the current
//! ETag in `If-None-Match`.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use super::http::check_status;
use super::rate_limiter::RequestPacer;
use super::types::*;
use super::{CatalogError, CatalogProvider};
use crate::config::TidalConfig;

const DEFAULT_BASE_URL: &str = "https://api.tidal.com/v1";
const PAGE_SIZE: usize = 100;
const WRITE_BATCH: usize = 50;

/// Tidal API client.
pub struct TidalClient {
    client: Client,
    base_url: String,
    access_token: String,
    user_id: String,
    country_code: String,
    pacer: RequestPacer,
}

impl TidalClient {
    pub fn new(config: TidalConfig) -> Result<Self, CatalogError> {
        let client = Client::builder()
            .user_agent(concat!("tunebridge/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .build()?;

        let base_url = config
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client,
            base_url,
            access_token: config.access_token,
            user_id: config.user_id,
            country_code: config.country_code,
            pacer: RequestPacer::new("tidal", config.requests_per_minute),
        })
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response, CatalogError> {
        self.pacer.acquire().await;
        let response = request
            .bearer_auth(&self.access_token)
            .query(&[("countryCode", self.country_code.as_str())])
            .send()
            .await?;
        match check_status("Tidal", response, what).await {
            Err(CatalogError::RateLimited { retry_after }) => {
                if let Some(wait) = retry_after {
                    self.pacer.penalize(wait).await;
                }
                Err(CatalogError::RateLimited { retry_after })
            }
            other => other,
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        what: &str,
    ) -> Result<T, CatalogError> {
        let response = self.send(self.client.get(url).query(query), what).await?;
        response
            .json()
            .await
            .map_err(|e| CatalogError::Parse(format!("{}: {}", what, e)))
    }

    /// Fetch every page of an offset-paged listing.
    async fn get_all<T: DeserializeOwned>(
        &self,
        url: &str,
        what: &str,
    ) -> Result<Vec<T>, CatalogError> {
        let mut items = Vec::new();
        loop {
            let query = [
                ("offset", items.len().to_string()),
                ("limit", PAGE_SIZE.to_string()),
            ];
            let mut page: TdPage<T> = self.get_json(url, &query, what).await?;
            let received = page.items.len();
            items.append(&mut page.items);
            if received == 0 || items.len() >= page.total_number_of_items {
                break;
            }
        }
        Ok(items)
    }

    async fn search<T: DeserializeOwned>(
        &self,
        kind: &str,
        query: &str,
        limit: u32,
    ) -> Result<Vec<T>, CatalogError> {
        debug!("Tidal search: type={}, query='{}'", kind, query);
        let page: TdPage<T> = self
            .get_json(
                &format!("{}/search/{}", self.base_url, kind),
                &[("query", query.to_string()), ("limit", limit.to_string())],
                "search",
            )
            .await?;
        Ok(page.items)
    }

    fn playlist_url(&self, uuid: &str) -> String {
        format!("{}/playlists/{}", self.base_url, urlencoding::encode(uuid))
    }

    fn favorites_url(&self, kind: CollectionKind) -> Option<String> {
        let segment = match kind {
            CollectionKind::Playlist => return None,
            CollectionKind::FavoriteTracks => "tracks",
            CollectionKind::SavedAlbums => "albums",
            CollectionKind::FollowedArtists => "artists",
        };
        Some(format!(
            "{}/users/{}/favorites/{}",
            self.base_url,
            urlencoding::encode(&self.user_id),
            segment
        ))
    }

    /// Current ETag of a playlist, required for edits.
    async fn playlist_etag(&self, uuid: &str) -> Result<String, CatalogError> {
        let response = self
            .send(
                self.client.get(self.playlist_url(uuid)),
                &format!("playlist {}", uuid),
            )
            .await?;
        response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| CatalogError::Parse(format!("playlist {} has no ETag", uuid)))
    }

    async fn playlist_tracks(&self, uuid: &str) -> Result<Vec<TrackRef>, CatalogError> {
        let items: Vec<TdItem<TdTrack>> = self
            .get_all(
                &format!("{}/items", self.playlist_url(uuid)),
                &format!("playlist {}", uuid),
            )
            .await?;
        // videos come back with a different `type` and are skipped
        Ok(items
            .into_iter()
            .filter(|i| i.kind.as_deref().is_none_or(|k| k == "track"))
            .map(|i| i.item.into())
            .collect())
    }
}

#[async_trait]
impl CatalogProvider for TidalClient {
    fn name(&self) -> &str {
        "tidal"
    }

    fn supports_identifier_lookup(&self) -> bool {
        true
    }

    async fn search_tracks(&self, query: &TrackQuery) -> Result<Vec<TrackRef>, CatalogError> {
        let text = match &query.artist {
            Some(artist) => format!("{} {}", query.title, artist),
            None => query.title.clone(),
        };
        let tracks: Vec<TdTrack> = self.search("tracks", &text, query.limit).await?;
        Ok(tracks.into_iter().map(TrackRef::from).collect())
    }

    async fn lookup_isrc(&self, isrc: &str) -> Result<Vec<TrackRef>, CatalogError> {
        // text search matches ISRCs; keep only exact hits
        let tracks: Vec<TdTrack> = self.search("tracks", isrc, 10).await?;
        Ok(tracks
            .into_iter()
            .map(TrackRef::from)
            .filter(|t| t.isrc().is_some_and(|i| i.eq_ignore_ascii_case(isrc)))
            .collect())
    }

    async fn search_albums(&self, query: &AlbumQuery) -> Result<Vec<AlbumRef>, CatalogError> {
        let text = match &query.artist {
            Some(artist) => format!("{} {}", query.title, artist),
            None => query.title.clone(),
        };
        let albums: Vec<TdAlbum> = self.search("albums", &text, query.limit).await?;
        Ok(albums.into_iter().map(AlbumRef::from).collect())
    }

    async fn lookup_upc(&self, upc: &str) -> Result<Vec<AlbumRef>, CatalogError> {
        let albums: Vec<TdAlbum> = self.search("albums", upc, 10).await?;
        Ok(albums
            .into_iter()
            .map(AlbumRef::from)
            .filter(|a| a.upc().is_some_and(|u| u == upc))
            .collect())
    }

    async fn search_artists(
        &self,
        name: &str,
        limit: u32,
    ) -> Result<Vec<ArtistRef>, CatalogError> {
        let artists: Vec<TdArtist> = self.search("artists", name, limit).await?;
        Ok(artists.into_iter().map(ArtistRef::from).collect())
    }

    async fn list_playlists(&self) -> Result<Vec<CollectionRef>, CatalogError> {
        let playlists: Vec<TdPlaylist> = self
            .get_all(
                &format!(
                    "{}/users/{}/playlists",
                    self.base_url,
                    urlencoding::encode(&self.user_id)
                ),
                "playlists",
            )
            .await?;
        Ok(playlists.into_iter().map(CollectionRef::from).collect())
    }

    async fn get_playlist(&self, id_or_uri: &str) -> Result<Collection, CatalogError> {
        let uuid = parse_playlist_uuid(id_or_uri);
        let playlist: TdPlaylist = self
            .get_json(&self.playlist_url(&uuid), &[], &format!("playlist {}", uuid))
            .await?;
        let tracks = self.playlist_tracks(&uuid).await?;
        Ok(Collection::new(
            playlist.into(),
            tracks.into_iter().map(SourceItem::Track).collect(),
        ))
    }

    async fn get_collection(&self, reference: &CollectionRef) -> Result<Collection, CatalogError> {
        let items = match reference.kind {
            CollectionKind::Playlist => self
                .playlist_tracks(&reference.id)
                .await?
                .into_iter()
                .map(SourceItem::Track)
                .collect(),
            CollectionKind::FavoriteTracks => {
                let url = self.favorites_url(reference.kind).unwrap_or_default();
                let items: Vec<TdItem<TdTrack>> = self.get_all(&url, "favorite tracks").await?;
                items
                    .into_iter()
                    .map(|i| SourceItem::Track(i.item.into()))
                    .collect()
            }
            CollectionKind::SavedAlbums => {
                let url = self.favorites_url(reference.kind).unwrap_or_default();
                let items: Vec<TdItem<TdAlbum>> = self.get_all(&url, "favorite albums").await?;
                items
                    .into_iter()
                    .map(|i| SourceItem::Album(i.item.into()))
                    .collect()
            }
            CollectionKind::FollowedArtists => {
                let url = self.favorites_url(reference.kind).unwrap_or_default();
                let items: Vec<TdItem<TdArtist>> = self.get_all(&url, "favorite artists").await?;
                items
                    .into_iter()
                    .map(|i| SourceItem::Artist(i.item.into()))
                    .collect()
            }
        };
        Ok(Collection::new(reference.clone(), items))
    }

    async fn create_playlist(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<CollectionRef, CatalogError> {
        let response = self
            .send(
                self.client
                    .post(format!(
                        "{}/users/{}/playlists",
                        self.base_url,
                        urlencoding::encode(&self.user_id)
                    ))
                    .form(&[
                        ("title", name),
                        ("description", description.unwrap_or_default()),
                    ]),
                "create playlist",
            )
            .await?;
        let playlist: TdPlaylist = response
            .json()
            .await
            .map_err(|e| CatalogError::Parse(format!("create playlist: {}", e)))?;
        debug!("Tidal created playlist '{}' ({})", playlist.title, playlist.uuid);
        Ok(playlist.into())
    }

    async fn add_items(
        &self,
        reference: &CollectionRef,
        ids: &[String],
        position: Option<usize>,
    ) -> Result<(), CatalogError> {
        if let Some(url) = self.favorites_url(reference.kind) {
            let field = match reference.kind {
                CollectionKind::SavedAlbums => "albumIds",
                CollectionKind::FollowedArtists => "artistIds",
                _ => "trackIds",
            };
            for chunk in ids.chunks(WRITE_BATCH) {
                self.send(
                    self.client.post(&url).form(&[(field, chunk.join(","))]),
                    "favorites add",
                )
                .await?;
            }
            return Ok(());
        }

        let url = format!("{}/items", self.playlist_url(&reference.id));
        let mut offset = 0;
        for chunk in ids.chunks(WRITE_BATCH) {
            let etag = self.playlist_etag(&reference.id).await?;
            let mut form = vec![
                ("trackIds", chunk.join(",")),
                ("onDupes", "ADD".to_string()),
            ];
            if let Some(pos) = position {
                form.push(("toIndex", (pos + offset).to_string()));
            }
            self.send(
                self.client
                    .post(&url)
                    .header(reqwest::header::IF_NONE_MATCH, etag)
                    .form(&form),
                "playlist add",
            )
            .await?;
            offset += chunk.len();
        }
        Ok(())
    }

    async fn remove_items(
        &self,
        reference: &CollectionRef,
        ids: &[String],
    ) -> Result<(), CatalogError> {
        if let Some(url) = self.favorites_url(reference.kind) {
            for chunk in ids.chunks(WRITE_BATCH) {
                self.send(
                    self.client.delete(format!("{}/{}", url, chunk.join(","))),
                    "favorites remove",
                )
                .await?;
            }
            return Ok(());
        }

        // playlist removal is by index; delete from the end so earlier
        // indices stay valid
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let current = self.playlist_tracks(&reference.id).await?;
        let mut indices: Vec<usize> = current
            .iter()
            .enumerate()
            .filter(|(_, t)| wanted.contains(t.id.as_str()))
            .map(|(i, _)| i)
            .collect();
        indices.sort_unstable_by(|a, b| b.cmp(a));

        for chunk in indices.chunks(WRITE_BATCH) {
            let etag = self.playlist_etag(&reference.id).await?;
            let list: Vec<String> = chunk.iter().map(|i| i.to_string()).collect();
            self.send(
                self.client
                    .delete(format!(
                        "{}/items/{}",
                        self.playlist_url(&reference.id),
                        list.join(",")
                    ))
                    .header(reqwest::header::IF_NONE_MATCH, etag),
                "playlist remove",
            )
            .await?;
        }
        Ok(())
    }

    async fn current_user(&self) -> Result<String, CatalogError> {
        Ok(self.user_id.clone())
    }
}

/// Extract a playlist UUID from a `tidal.com/.../playlist/<uuid>` URL or a
/// bare UUID.
fn parse_playlist_uuid(input: &str) -> String {
    let input = input.trim();
    match input.split_once("/playlist/") {
        Some((_, rest)) => rest
            .split(['?', '/', '#'])
            .next()
            .unwrap_or(rest)
            .to_string(),
        None => input.to_string(),
    }
}

// ============================================================================
// Tidal API Response Types (private)
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TdPage<T> {
    items: Vec<T>,
    #[serde(default)]
    total_number_of_items: usize,
}

#[derive(Debug, Deserialize)]
struct TdItem<T> {
    item: T,
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TdName {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TdAlbumTitle {
    title: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TdTrack {
    id: u64,
    title: String,
    /// Seconds.
    #[serde(default)]
    duration: Option<u64>,
    #[serde(default)]
    track_number: Option<u32>,
    #[serde(default)]
    isrc: Option<String>,
    /// Version tag such as "Live" or "Remastered", kept apart from the title.
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    artists: Vec<TdName>,
    #[serde(default)]
    album: Option<TdAlbumTitle>,
}

impl From<TdTrack> for TrackRef {
    fn from(t: TdTrack) -> Self {
        let title = match t.version.filter(|v| !v.trim().is_empty()) {
            Some(version) => format!("{} ({})", t.title, version.trim()),
            None => t.title,
        };
        TrackRef {
            id: t.id.to_string(),
            title,
            artists: t.artists.into_iter().map(|a| a.name).collect(),
            album: t.album.map(|a| a.title),
            duration_ms: t.duration.map(|s| s * 1000),
            isrc: t.isrc,
            track_number: t.track_number,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TdAlbum {
    id: u64,
    title: String,
    #[serde(default)]
    artists: Vec<TdName>,
    #[serde(default)]
    upc: Option<String>,
}

impl From<TdAlbum> for AlbumRef {
    fn from(a: TdAlbum) -> Self {
        AlbumRef {
            id: a.id.to_string(),
            title: a.title,
            artists: a.artists.into_iter().map(|n| n.name).collect(),
            upc: a.upc,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TdArtist {
    id: u64,
    name: String,
}

impl From<TdArtist> for ArtistRef {
    fn from(a: TdArtist) -> Self {
        ArtistRef::new(a.id.to_string(), a.name)
    }
}

#[derive(Debug, Deserialize)]
struct TdPlaylist {
    uuid: String,
    title: String,
    #[serde(default)]
    description: Option<String>,
}

impl From<TdPlaylist> for CollectionRef {
    fn from(p: TdPlaylist) -> Self {
        let mut reference = CollectionRef::playlist(p.uuid, p.title);
        reference.description = p.description.filter(|d| !d.is_empty());
        reference
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_playlist_uuid() {
        assert_eq!(
            parse_playlist_uuid("https://tidal.com/browse/playlist/0b2c-44ab?u"),
            "0b2c-44ab"
        );
        assert_eq!(parse_playlist_uuid("0b2c-44ab"), "0b2c-44ab");
    }

    #[test]
    fn test_track_version_is_folded_into_title() {
        let json = r#"{
            "id": 123, "title": "Song B", "duration": 240, "trackNumber": 2,
            "isrc": "GB0000000001", "version": "Live",
            "artists": [{"name": "Artist Y"}], "album": {"title": "Tour"}
        }"#;
        let track: TrackRef = serde_json::from_str::<TdTrack>(json).unwrap().into();
        assert_eq!(track.id, "123");
        assert_eq!(track.title, "Song B (Live)");
        assert_eq!(track.duration_ms, Some(240_000));
        assert_eq!(track.album.as_deref(), Some("Tour"));
    }

    #[test]
    fn test_parse_favorites_page() {
        let json = r#"{
            "limit": 100, "offset": 0, "totalNumberOfItems": 1,
            "items": [{"created": "2024-01-01", "item": {"id": 7, "title": "Abbey Road",
                       "artists": [{"name": "The Beatles"}], "upc": "0094638246824"}}]
        }"#;
        let page: TdPage<TdItem<TdAlbum>> = serde_json::from_str(json).unwrap();
        assert_eq!(page.total_number_of_items, 1);
        let album: AlbumRef = page.items.into_iter().next().unwrap().item.into();
        assert_eq!(album.id, "7");
        assert_eq!(album.upc(), Some("0094638246824"));
    }

    #[tokio::test]
    async fn test_current_user_is_configured_id() {
        let client = TidalClient::new(TidalConfig {
            access_token: "token".into(),
            user_id: "42".into(),
            country_code: "US".into(),
            base_url: None,
            requests_per_minute: 60,
            timeout_secs: 5,
        })
        .unwrap();
        let user = client.current_user().await.unwrap();
        assert_eq!(user, "42");
        assert_eq!(client.base_url, DEFAULT_BASE_URL);
    }
}
