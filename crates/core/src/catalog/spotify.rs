//! Spotify Web API client.
//!
//! Consumes an already-issued bearer token. Collections:
//! - playlists: `/me/playlists`, `/playlists/{id}/tracks`
//! - liked songs: `/me/tracks`
//! - saved albums: `/me/albums`
//! - followed artists: `/me/following?type=artist`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::OnceCell;
use tracing::debug;

use super::http::check_status;
use super::rate_limiter::RequestPacer;
use super::types::*;
use super::{CatalogError, CatalogProvider};
use crate::config::SpotifyConfig;

const DEFAULT_BASE_URL: &str = "https://api.spotify.com/v1";
const PAGE_SIZE: u32 = 50;
const PLAYLIST_BATCH: usize = 100;
const LIBRARY_BATCH: usize = 50;
const ALBUM_BATCH: usize = 20;

/// Spotify Web API client.
pub struct SpotifyClient {
    client: Client,
    base_url: String,
    access_token: String,
    market: Option<String>,
    pacer: RequestPacer,
    user_id: OnceCell<String>,
}

impl SpotifyClient {
    pub fn new(config: SpotifyConfig) -> Result<Self, CatalogError> {
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
            market: config.market,
            pacer: RequestPacer::new("spotify", config.requests_per_minute),
            user_id: OnceCell::new(),
        })
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response, CatalogError> {
        self.pacer.acquire().await;
        let response = request.bearer_auth(&self.access_token).send().await?;
        match check_status("Spotify", response, what).await {
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

    /// Follow `next` links until the listing is exhausted.
    async fn get_paged<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        what: &str,
    ) -> Result<Vec<T>, CatalogError> {
        let mut page: SpPaging<T> = self.get_json(url, query, what).await?;
        let mut items = std::mem::take(&mut page.items);
        while let Some(next) = page.next.take() {
            page = self.get_json(&next, &[], what).await?;
            items.append(&mut page.items);
        }
        Ok(items)
    }

    async fn search<T: DeserializeOwned>(
        &self,
        q: &str,
        kind: &str,
        limit: u32,
    ) -> Result<SpSearchResponse<T>, CatalogError> {
        let mut query = vec![
            ("q", q.to_string()),
            ("type", kind.to_string()),
            ("limit", limit.clamp(1, 50).to_string()),
        ];
        if let Some(market) = &self.market {
            query.push(("market", market.clone()));
        }
        debug!("Spotify search: type={}, q='{}'", kind, q);
        self.get_json(&format!("{}/search", self.base_url), &query, "search")
            .await
    }

    async fn saved_tracks(&self) -> Result<Vec<SourceItem>, CatalogError> {
        let items: Vec<SpPlaylistItem> = self
            .get_paged(
                &format!("{}/me/tracks", self.base_url),
                &[("limit", PAGE_SIZE.to_string())],
                "saved tracks",
            )
            .await?;
        Ok(tracks_from_items(items))
    }

    async fn playlist_tracks(&self, id: &str) -> Result<Vec<SourceItem>, CatalogError> {
        let items: Vec<SpPlaylistItem> = self
            .get_paged(
                &format!(
                    "{}/playlists/{}/tracks",
                    self.base_url,
                    urlencoding::encode(id)
                ),
                &[("limit", "100".to_string())],
                &format!("playlist {}", id),
            )
            .await?;
        Ok(tracks_from_items(items))
    }

    async fn saved_albums(&self) -> Result<Vec<SourceItem>, CatalogError> {
        let items: Vec<SpSavedAlbum> = self
            .get_paged(
                &format!("{}/me/albums", self.base_url),
                &[("limit", PAGE_SIZE.to_string())],
                "saved albums",
            )
            .await?;
        Ok(items
            .into_iter()
            .map(|s| SourceItem::Album(s.album.into()))
            .collect())
    }

    async fn followed_artists(&self) -> Result<Vec<SourceItem>, CatalogError> {
        // cursor paging wraps the listing in an `artists` object
        let url = format!("{}/me/following", self.base_url);
        let mut response: SpFollowing = self
            .get_json(
                &url,
                &[("type", "artist".to_string()), ("limit", PAGE_SIZE.to_string())],
                "followed artists",
            )
            .await?;
        let mut artists = std::mem::take(&mut response.artists.items);
        while let Some(next) = response.artists.next.take() {
            response = self.get_json(&next, &[], "followed artists").await?;
            artists.append(&mut response.artists.items);
        }
        Ok(artists
            .into_iter()
            .map(|a| SourceItem::Artist(a.into()))
            .collect())
    }

    /// Library endpoint and batch size for an unordered collection.
    fn library_endpoint(&self, kind: CollectionKind) -> Option<(String, usize)> {
        match kind {
            CollectionKind::Playlist => None,
            CollectionKind::FavoriteTracks => {
                Some((format!("{}/me/tracks", self.base_url), LIBRARY_BATCH))
            }
            CollectionKind::SavedAlbums => Some((format!("{}/me/albums", self.base_url), ALBUM_BATCH)),
            CollectionKind::FollowedArtists => Some((
                format!("{}/me/following?type=artist", self.base_url),
                LIBRARY_BATCH,
            )),
        }
    }
}

#[async_trait]
impl CatalogProvider for SpotifyClient {
    fn name(&self) -> &str {
        "spotify"
    }

    fn supports_identifier_lookup(&self) -> bool {
        true
    }

    async fn search_tracks(&self, query: &TrackQuery) -> Result<Vec<TrackRef>, CatalogError> {
        let q = match &query.artist {
            Some(artist) => format!("{} {}", query.title, artist),
            None => query.title.clone(),
        };
        let response: SpSearchResponse<SpTrack> = self.search(&q, "track", query.limit).await?;
        Ok(response
            .tracks
            .map(|p| p.items.into_iter().filter_map(SpTrack::into_track).collect())
            .unwrap_or_default())
    }

    async fn lookup_isrc(&self, isrc: &str) -> Result<Vec<TrackRef>, CatalogError> {
        let response: SpSearchResponse<SpTrack> =
            self.search(&format!("isrc:{}", isrc), "track", 10).await?;
        Ok(response
            .tracks
            .map(|p| p.items.into_iter().filter_map(SpTrack::into_track).collect::<Vec<_>>())
            .unwrap_or_default()
            .into_iter()
            .filter(|t| t.isrc().is_some_and(|i| i.eq_ignore_ascii_case(isrc)))
            .collect())
    }

    async fn search_albums(&self, query: &AlbumQuery) -> Result<Vec<AlbumRef>, CatalogError> {
        let q = match &query.artist {
            Some(artist) => format!("{} {}", query.title, artist),
            None => query.title.clone(),
        };
        let response: SpSearchResponse<SpAlbum> = self.search(&q, "album", query.limit).await?;
        Ok(response
            .albums
            .map(|p| p.items.into_iter().map(AlbumRef::from).collect())
            .unwrap_or_default())
    }

    async fn lookup_upc(&self, upc: &str) -> Result<Vec<AlbumRef>, CatalogError> {
        let response: SpSearchResponse<SpAlbum> =
            self.search(&format!("upc:{}", upc), "album", 10).await?;
        // search returns simplified albums without external IDs
        Ok(response
            .albums
            .map(|p| {
                p.items
                    .into_iter()
                    .map(|a| {
                        let mut album = AlbumRef::from(a);
                        album.upc.get_or_insert_with(|| upc.to_string());
                        album
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn search_artists(
        &self,
        name: &str,
        limit: u32,
    ) -> Result<Vec<ArtistRef>, CatalogError> {
        let response: SpSearchResponse<SpArtist> = self.search(name, "artist", limit).await?;
        Ok(response
            .artists
            .map(|p| p.items.into_iter().map(ArtistRef::from).collect())
            .unwrap_or_default())
    }

    /// Playlists the current user owns. `/me/playlists` also lists followed
    /// playlists, which cannot be written to; those are still reachable
    /// through `get_playlist`.
    async fn list_playlists(&self) -> Result<Vec<CollectionRef>, CatalogError> {
        let user = self.current_user().await?;
        let playlists: Vec<SpPlaylist> = self
            .get_paged(
                &format!("{}/me/playlists", self.base_url),
                &[("limit", PAGE_SIZE.to_string())],
                "playlists",
            )
            .await?;
        Ok(owned_playlists(playlists, &user))
    }

    async fn get_playlist(&self, id_or_uri: &str) -> Result<Collection, CatalogError> {
        let id = parse_playlist_id(id_or_uri);
        let playlist: SpPlaylist = self
            .get_json(
                &format!("{}/playlists/{}", self.base_url, urlencoding::encode(&id)),
                &[("fields", "id,name,description".to_string())],
                &format!("playlist {}", id),
            )
            .await?;
        let items = self.playlist_tracks(&id).await?;
        Ok(Collection::new(playlist.into(), items))
    }

    async fn get_collection(&self, reference: &CollectionRef) -> Result<Collection, CatalogError> {
        let items = match reference.kind {
            CollectionKind::Playlist => self.playlist_tracks(&reference.id).await?,
            CollectionKind::FavoriteTracks => self.saved_tracks().await?,
            CollectionKind::SavedAlbums => self.saved_albums().await?,
            CollectionKind::FollowedArtists => self.followed_artists().await?,
        };
        Ok(Collection::new(reference.clone(), items))
    }

    async fn create_playlist(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<CollectionRef, CatalogError> {
        let user = self.current_user().await?;
        let body = json!({
            "name": name,
            "description": description.unwrap_or_default(),
            "public": false,
        });
        let response = self
            .send(
                self.client
                    .post(format!(
                        "{}/users/{}/playlists",
                        self.base_url,
                        urlencoding::encode(&user)
                    ))
                    .json(&body),
                "create playlist",
            )
            .await?;
        let playlist: SpPlaylist = response
            .json()
            .await
            .map_err(|e| CatalogError::Parse(format!("create playlist: {}", e)))?;
        debug!("Spotify created playlist '{}' ({})", playlist.name, playlist.id);
        Ok(playlist.into())
    }

    async fn add_items(
        &self,
        reference: &CollectionRef,
        ids: &[String],
        position: Option<usize>,
    ) -> Result<(), CatalogError> {
        if let Some((url, batch)) = self.library_endpoint(reference.kind) {
            for chunk in ids.chunks(batch) {
                self.send(self.client.put(&url).json(&json!({ "ids": chunk })), "library add")
                    .await?;
            }
            return Ok(());
        }

        let url = format!(
            "{}/playlists/{}/tracks",
            self.base_url,
            urlencoding::encode(&reference.id)
        );
        let mut offset = 0;
        for chunk in ids.chunks(PLAYLIST_BATCH) {
            let uris: Vec<String> = chunk.iter().map(|id| track_uri(id)).collect();
            let mut body = json!({ "uris": uris });
            if let Some(pos) = position {
                body["position"] = json!(pos + offset);
            }
            self.send(self.client.post(&url).json(&body), "playlist add")
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
        if let Some((url, batch)) = self.library_endpoint(reference.kind) {
            for chunk in ids.chunks(batch) {
                self.send(
                    self.client.delete(&url).json(&json!({ "ids": chunk })),
                    "library remove",
                )
                .await?;
            }
            return Ok(());
        }

        let url = format!(
            "{}/playlists/{}/tracks",
            self.base_url,
            urlencoding::encode(&reference.id)
        );
        for chunk in ids.chunks(PLAYLIST_BATCH) {
            let tracks: Vec<_> = chunk
                .iter()
                .map(|id| json!({ "uri": track_uri(id) }))
                .collect();
            self.send(
                self.client.delete(&url).json(&json!({ "tracks": tracks })),
                "playlist remove",
            )
            .await?;
        }
        Ok(())
    }

    async fn current_user(&self) -> Result<String, CatalogError> {
        self.user_id
            .get_or_try_init(|| async {
                let user: SpUser = self
                    .get_json(&format!("{}/me", self.base_url), &[], "current user")
                    .await?;
                Ok::<_, CatalogError>(user.id)
            })
            .await
            .cloned()
    }
}

fn owned_playlists(playlists: Vec<SpPlaylist>, user: &str) -> Vec<CollectionRef> {
    playlists
        .into_iter()
        .filter(|p| match &p.owner {
            Some(owner) => owner.id == user,
            None => true,
        })
        .map(CollectionRef::from)
        .collect()
}

/// Extract a playlist ID from a `spotify:playlist:` URI, an
/// `open.spotify.com` URL or a bare ID.
pub fn parse_playlist_id(input: &str) -> String {
    let input = input.trim();
    if let Some(id) = input.strip_prefix("spotify:playlist:") {
        return id.to_string();
    }
    if let Some((_, rest)) = input.split_once("/playlist/") {
        return rest
            .split(['?', '/', '#'])
            .next()
            .unwrap_or(rest)
            .to_string();
    }
    input.to_string()
}

fn track_uri(id: &str) -> String {
    if id.starts_with("spotify:") {
        id.to_string()
    } else {
        format!("spotify:track:{}", id)
    }
}

fn tracks_from_items(items: Vec<SpPlaylistItem>) -> Vec<SourceItem> {
    items
        .into_iter()
        .filter_map(|i| i.track)
        .filter_map(SpTrack::into_track)
        .map(SourceItem::Track)
        .collect()
}

// ============================================================================
// Spotify API Response Types (private)
// ============================================================================

#[derive(Debug, Deserialize)]
struct SpPaging<T> {
    items: Vec<T>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SpSearchResponse<T> {
    tracks: Option<SpPaging<T>>,
    albums: Option<SpPaging<T>>,
    artists: Option<SpPaging<T>>,
}

#[derive(Debug, Default, Deserialize)]
struct SpExternalIds {
    isrc: Option<String>,
    upc: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SpName {
    name: String,
}

#[derive(Debug, Deserialize)]
struct SpTrack {
    /// Null for local files.
    id: Option<String>,
    name: String,
    #[serde(default)]
    duration_ms: Option<u64>,
    #[serde(default)]
    track_number: Option<u32>,
    #[serde(default)]
    external_ids: SpExternalIds,
    #[serde(default)]
    artists: Vec<SpName>,
    #[serde(default)]
    album: Option<SpName>,
}

impl SpTrack {
    fn into_track(self) -> Option<TrackRef> {
        let id = self.id?;
        Some(TrackRef {
            id,
            title: self.name,
            artists: self.artists.into_iter().map(|a| a.name).collect(),
            album: self.album.map(|a| a.name),
            duration_ms: self.duration_ms,
            isrc: self.external_ids.isrc,
            track_number: self.track_number,
        })
    }
}

#[derive(Debug, Deserialize)]
struct SpAlbum {
    id: String,
    name: String,
    #[serde(default)]
    artists: Vec<SpName>,
    #[serde(default)]
    external_ids: SpExternalIds,
}

impl From<SpAlbum> for AlbumRef {
    fn from(a: SpAlbum) -> Self {
        AlbumRef {
            id: a.id,
            title: a.name,
            artists: a.artists.into_iter().map(|n| n.name).collect(),
            upc: a.external_ids.upc,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SpArtist {
    id: String,
    name: String,
}

impl From<SpArtist> for ArtistRef {
    fn from(a: SpArtist) -> Self {
        ArtistRef::new(a.id, a.name)
    }
}

#[derive(Debug, Deserialize)]
struct SpPlaylist {
    id: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    owner: Option<SpUser>,
}

impl From<SpPlaylist> for CollectionRef {
    fn from(p: SpPlaylist) -> Self {
        let mut reference = CollectionRef::playlist(p.id, p.name);
        reference.description = p.description.filter(|d| !d.is_empty());
        reference
    }
}

#[derive(Debug, Deserialize)]
struct SpPlaylistItem {
    track: Option<SpTrack>,
}

#[derive(Debug, Deserialize)]
struct SpSavedAlbum {
    album: SpAlbum,
}

#[derive(Debug, Deserialize)]
struct SpFollowing {
    artists: SpPaging<SpArtist>,
}

#[derive(Debug, Deserialize)]
struct SpUser {
    id: String,
}
