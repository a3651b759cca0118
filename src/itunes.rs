//! Adaptador de contenido contra iTunes: feed RSS de top canciones por país
//! y búsqueda libre de canciones.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::models::Track;
use crate::regions::Region;

const API_BASE: &str = "https://itunes.apple.com";
const SEARCH_URL: &str = "https://itunes.apple.com/search";
const FEED_LIMIT: usize = 10;
/// iTunes limita agresivamente por IP: sólo se buscan previews de las primeras canciones.
const PREVIEW_LOOKUPS: usize = 5;
const PREVIEW_PAUSE: Duration = Duration::from_millis(200);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("error de red: {0}")]
    Network(#[from] reqwest::Error),
    #[error("estado HTTP {status} desde {url}")]
    Status { status: u16, url: String },
    #[error("respuesta mal formada: {0}")]
    Malformed(String),
}

/// Fuente de contenido musical. Cada llamada falla de forma independiente.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Etiqueta que se guarda en la instantánea cuando hay canciones.
    fn source_label(&self) -> &'static str;

    async fn top_tracks(&self, region: &Region) -> Result<Vec<Track>, FetchError>;

    async fn search_tracks(&self, query: &str, limit: usize) -> Result<Vec<Track>, FetchError>;
}

#[derive(Debug, Clone)]
pub struct ITunesFetcher {
    http: reqwest::Client,
}

impl ITunesFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { http })
    }

    fn feed_url(region: &Region) -> Result<Url, FetchError> {
        let raw = format!(
            "{API_BASE}/{}/rss/topsongs/limit={FEED_LIMIT}/json",
            region.code.to_lowercase()
        );
        Url::parse(&raw).map_err(|e| FetchError::Malformed(e.to_string()))
    }

    async fn get_json(&self, url: Url, params: &[(&str, String)]) -> Result<Value, FetchError> {
        let response = self.http.get(url.clone()).query(params).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status { status: status.as_u16(), url: url.to_string() });
        }
        Ok(response.json::<Value>().await?)
    }

    /// Busca el preview de una canción. Los fallos se ignoran: la canción queda sin preview.
    async fn preview_url(&self, track: &str, artist: &str, country_code: &str) -> Option<String> {
        let params = [
            ("term", format!("{track} {artist}")),
            ("media", "music".to_string()),
            ("entity", "song".to_string()),
            ("limit", "1".to_string()),
            ("country", country_code.to_string()),
        ];
        let url = Url::parse(SEARCH_URL).ok()?;
        match self.get_json(url, &params).await {
            Ok(body) => body["results"]
                .get(0)
                .and_then(|r| r["previewUrl"].as_str())
                .map(str::to_string),
            Err(FetchError::Status { status: 403 | 429, .. }) => None,
            Err(e) => {
                debug!("Preview no disponible para '{track}' ({country_code}): {e}");
                None
            }
        }
    }
}

#[async_trait]
impl ContentFetcher for ITunesFetcher {
    fn source_label(&self) -> &'static str {
        "itunes"
    }

    async fn top_tracks(&self, region: &Region) -> Result<Vec<Track>, FetchError> {
        let body = self.get_json(Self::feed_url(region)?, &[]).await?;
        let entries = parse_feed_entries(&body)?;

        let mut tracks = Vec::with_capacity(entries.len());
        for (idx, mut track) in entries.into_iter().enumerate() {
            if idx < PREVIEW_LOOKUPS {
                track.preview_url = self.preview_url(&track.name, &track.artist, region.code).await;
                tokio::time::sleep(PREVIEW_PAUSE).await;
            }
            tracks.push(track);
        }
        Ok(tracks)
    }

    async fn search_tracks(&self, query: &str, limit: usize) -> Result<Vec<Track>, FetchError> {
        let params = [
            ("term", query.to_string()),
            ("media", "music".to_string()),
            ("entity", "song".to_string()),
            ("limit", limit.to_string()),
            ("country", "US".to_string()),
        ];
        let url = Url::parse(SEARCH_URL).map_err(|e| FetchError::Malformed(e.to_string()))?;
        let body = self.get_json(url, &params).await?;
        let results = body["results"]
            .as_array()
            .ok_or_else(|| FetchError::Malformed("falta 'results' en la búsqueda".into()))?;
        Ok(results.iter().map(parse_search_result).collect())
    }
}

/// Convierte el feed RSS en canciones (sin previews todavía).
pub fn parse_feed_entries(body: &Value) -> Result<Vec<Track>, FetchError> {
    let feed = body
        .get("feed")
        .ok_or_else(|| FetchError::Malformed("falta 'feed' en la respuesta".into()))?;

    // Un feed con una sola canción llega como objeto, no como lista.
    let entries: Vec<&Value> = match feed.get("entry") {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(item @ Value::Object(_)) => vec![item],
        Some(_) => return Err(FetchError::Malformed("'entry' no es lista ni objeto".into())),
        None => Vec::new(),
    };

    let tracks = entries
        .into_iter()
        .take(FEED_LIMIT)
        .map(|entry| {
            let image_url = entry["im:image"]
                .as_array()
                .and_then(|images| images.last())
                .and_then(|img| img["label"].as_str())
                .map(str::to_string);
            let link = match &entry["link"] {
                Value::Array(links) => links.first().cloned().unwrap_or(Value::Null),
                other => other.clone(),
            };
            Track {
                name: label_or(&entry["im:name"], "Unknown"),
                artist: label_or(&entry["im:artist"], "Unknown Artist"),
                preview_url: None,
                image_url,
                external_url: link["attributes"]["href"].as_str().map(str::to_string),
            }
        })
        .collect();
    Ok(tracks)
}

fn parse_search_result(result: &Value) -> Track {
    let text = |key: &str| result[key].as_str().map(str::to_string);
    Track {
        name: text("trackName").unwrap_or_else(|| "Unknown".to_string()),
        artist: text("artistName").unwrap_or_else(|| "Unknown Artist".to_string()),
        preview_url: text("previewUrl"),
        image_url: text("artworkUrl100"),
        external_url: text("trackViewUrl"),
    }
}

fn label_or(node: &Value, default: &str) -> String {
    match node["label"].as_str() {
        Some(label) => label.to_string(),
        None => {
            if !node.is_null() {
                warn!("Etiqueta inesperada en el feed de iTunes: {node}");
            }
            default.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_feed_with_list_and_dict_links() {
        let body = json!({
            "feed": {
                "entry": [
                    {
                        "im:name": {"label": "Song A"},
                        "im:artist": {"label": "Artist A"},
                        "im:image": [{"label": "small.jpg"}, {"label": "big.jpg"}],
                        "link": {"attributes": {"href": "https://music.apple.com/a"}}
                    },
                    {
                        "im:name": {"label": "Song B"},
                        "link": [{"attributes": {"href": "https://music.apple.com/b"}}]
                    }
                ]
            }
        });
        let tracks = parse_feed_entries(&body).unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].image_url.as_deref(), Some("big.jpg"));
        assert_eq!(tracks[0].external_url.as_deref(), Some("https://music.apple.com/a"));
        assert_eq!(tracks[1].artist, "Unknown Artist");
        assert_eq!(tracks[1].external_url.as_deref(), Some("https://music.apple.com/b"));
        assert!(tracks.iter().all(|t| t.preview_url.is_none()));
    }

    #[test]
    fn feed_without_entries_is_empty_and_missing_feed_is_malformed() {
        assert!(parse_feed_entries(&json!({"feed": {}})).unwrap().is_empty());
        assert!(matches!(
            parse_feed_entries(&json!({"error": "nope"})),
            Err(FetchError::Malformed(_))
        ));
    }

    #[test]
    fn feed_is_capped_at_limit() {
        let entries: Vec<Value> = (0..25)
            .map(|i| json!({"im:name": {"label": format!("S{i}")}, "im:artist": {"label": "X"}}))
            .collect();
        let tracks = parse_feed_entries(&json!({"feed": {"entry": entries}})).unwrap();
        assert_eq!(tracks.len(), FEED_LIMIT);
    }

    #[test]
    fn search_result_maps_itunes_fields() {
        let track = parse_search_result(&json!({
            "trackName": "Hips Don't Lie",
            "artistName": "Shakira",
            "previewUrl": "https://audio/preview.m4a",
            "artworkUrl100": "https://img/100.jpg",
            "trackViewUrl": "https://music.apple.com/t"
        }));
        assert_eq!(track.artist, "Shakira");
        assert_eq!(track.preview_url.as_deref(), Some("https://audio/preview.m4a"));
    }

    #[test]
    fn feed_url_uses_lowercase_code() {
        let region = crate::regions::find("JP").unwrap();
        let url = ITunesFetcher::feed_url(region).unwrap();
        assert_eq!(url.as_str(), "https://itunes.apple.com/jp/rss/topsongs/limit=10/json");
    }
}
