//! Release metadata lookup (Discogs).

use std::fs;
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SliceError};
use crate::matcher::parse_duration;
use crate::models::TracklistEntry;

pub const DISCOGS_API_URL: &str = "https://api.discogs.com";
pub const DEFAULT_USER_AGENT: &str = "AutoSlice/1.0";

const SEARCH_PAGE_SIZE: u32 = 10;

/// One search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseSummary {
    pub id: u64,
    pub title: String,
    pub year: String,
    pub country: String,
    pub format: String,
    pub label: String,
    pub thumbnail_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    pub title: String,
    pub artists: String,
    pub year: String,
    pub genres: Vec<String>,
    pub styles: Vec<String>,
    pub labels: String,
    pub images: Vec<String>,
}

impl ReleaseInfo {
    /// Album part of a Discogs `"Artist - Album"` title.
    pub fn album_name(&self) -> &str {
        match self.title.split_once(" - ") {
            Some((_, album)) => album,
            None => &self.title,
        }
    }

    /// Fill whichever of artist, album and year the user left blank.
    pub fn fill_blanks(&self, artist: &mut String, album: &mut String, year: &mut Option<String>) {
        if artist.trim().is_empty() && !self.artists.is_empty() {
            *artist = self.artists.clone();
        }
        if album.trim().is_empty() && !self.album_name().is_empty() {
            *album = self.album_name().to_string();
        }
        if year.is_none() && !self.year.is_empty() {
            *year = Some(self.year.clone());
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub tracklist: Vec<TracklistEntry>,
    pub info: ReleaseInfo,
}

/// Source of reference tracklists.
pub trait MetadataLookup {
    fn search(&self, artist: &str, album: &str) -> Result<Vec<ReleaseSummary>>;
    fn get_tracklist(&self, release_id: u64) -> Result<Release>;
}

// Raw API payloads. Discogs mixes strings and numbers for `year`.

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Option<Vec<SearchResult>>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    id: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    year: Option<serde_json::Value>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    format: Vec<String>,
    #[serde(default)]
    label: Vec<String>,
    #[serde(default)]
    thumb: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Named {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawTrack {
    #[serde(default)]
    position: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    duration: String,
    #[serde(default)]
    type_: String,
    #[serde(default)]
    artists: Vec<Named>,
}

#[derive(Debug, Deserialize)]
struct RawImage {
    #[serde(default)]
    resource_url: Option<String>,
    #[serde(default)]
    uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReleaseResponse {
    #[serde(default)]
    tracklist: Option<Vec<RawTrack>>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    artists: Vec<Named>,
    #[serde(default)]
    year: Option<serde_json::Value>,
    #[serde(default)]
    genres: Vec<String>,
    #[serde(default)]
    styles: Vec<String>,
    #[serde(default)]
    labels: Vec<Named>,
    #[serde(default)]
    images: Vec<RawImage>,
}

fn year_text(value: Option<serde_json::Value>) -> String {
    match value {
        Some(serde_json::Value::String(s)) => s,
        Some(serde_json::Value::Number(n)) if n.as_u64() != Some(0) => n.to_string(),
        _ => String::new(),
    }
}

fn join_names(names: &[Named]) -> String {
    names
        .iter()
        .map(|n| n.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn summaries_from(response: SearchResponse) -> Vec<ReleaseSummary> {
    response
        .results
        .unwrap_or_default()
        .into_iter()
        .map(|r| ReleaseSummary {
            id: r.id,
            title: r.title,
            year: year_text(r.year),
            country: r.country.unwrap_or_default(),
            format: r.format.join(", "),
            label: r.label.join(", "),
            thumbnail_url: r.thumb.unwrap_or_default(),
        })
        .collect()
}

/// Keep only real tracks (headings and index entries are dropped).
fn release_from(response: ReleaseResponse) -> Release {
    let Some(raw_tracks) = response.tracklist else {
        return Release::default();
    };

    let tracklist = raw_tracks
        .into_iter()
        .filter(|t| t.type_ == "track")
        .enumerate()
        .map(|(index, t)| TracklistEntry {
            position: if t.position.is_empty() {
                (index + 1).to_string()
            } else {
                t.position
            },
            title: t.title,
            duration_seconds: parse_duration(&t.duration),
            artists: t.artists.into_iter().map(|a| a.name).collect(),
        })
        .collect();

    Release {
        tracklist,
        info: ReleaseInfo {
            title: response.title,
            artists: join_names(&response.artists),
            year: year_text(response.year),
            genres: response.genres,
            styles: response.styles,
            labels: join_names(&response.labels),
            images: response
                .images
                .into_iter()
                .filter_map(|img| img.resource_url.or(img.uri))
                .collect(),
        },
    }
}

/// Blocking Discogs API client.
pub struct DiscogsClient {
    http: Client,
    base_url: String,
    token: Option<String>,
}

impl DiscogsClient {
    pub fn new(token: Option<String>, user_agent: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(user_agent)
            .build()?;

        Ok(Self {
            http,
            base_url: DISCOGS_API_URL.to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn get(&self, url: &str) -> reqwest::blocking::RequestBuilder {
        let request = self.http.get(url);
        match &self.token {
            Some(token) => request.header("Authorization", format!("Discogs token={}", token)),
            None => request,
        }
    }

    fn fetch_json<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::blocking::RequestBuilder,
    ) -> Result<T> {
        let response = request.send()?;
        let status = response.status();
        let body = response.text()?;
        if !status.is_success() {
            let snippet: String = body.chars().take(200).collect();
            return Err(SliceError::Lookup(format!(
                "Discogs returned {}: {}",
                status.as_u16(),
                snippet
            )));
        }
        serde_json::from_str(&body).map_err(|e| {
            let snippet: String = body.chars().take(200).collect();
            SliceError::Lookup(format!("Failed to parse Discogs response ({}): {}", e, snippet))
        })
    }

    /// Download an image (e.g. a release cover) to `dest`.
    pub fn download_image(&self, url: &str, dest: &Path) -> Result<()> {
        let response = self.get(url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(SliceError::Lookup(format!(
                "Failed to download image (status {})",
                status.as_u16()
            )));
        }
        let bytes = response.bytes()?;
        fs::write(dest, &bytes)?;
        debug!(url = %url, dest = %dest.display(), "Downloaded image");
        Ok(())
    }
}

impl MetadataLookup for DiscogsClient {
    fn search(&self, artist: &str, album: &str) -> Result<Vec<ReleaseSummary>> {
        let query = format!("{} {}", artist, album).trim().to_string();
        let url = format!("{}/database/search", self.base_url);
        debug!(url = %url, query = %query, "Searching Discogs");

        let per_page = SEARCH_PAGE_SIZE.to_string();
        let request = self.get(&url).query(&[
            ("q", query.as_str()),
            ("type", "release"),
            ("per_page", per_page.as_str()),
        ]);
        let response: SearchResponse = self.fetch_json(request)?;
        Ok(summaries_from(response))
    }

    fn get_tracklist(&self, release_id: u64) -> Result<Release> {
        let url = format!("{}/releases/{}", self.base_url, release_id);
        debug!(url = %url, "Fetching Discogs release");

        let response: ReleaseResponse = self.fetch_json(self.get(&url))?;
        let release = release_from(response);
        debug!(tracks = release.tracklist.len(), "Fetched release");
        Ok(release)
    }
}
