//! Caché de instantáneas por país.
//!
//! El mapa completo se publica como una referencia inmutable (`Arc`); los
//! lectores clonan la referencia y el refresco sustituye el mapa entero.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::RegionMusic;

pub type RegionMap = HashMap<String, RegionMusic>;

#[derive(Debug, Default)]
struct Published {
    regions: Arc<RegionMap>,
    last_refresh: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct RegionCache {
    inner: RwLock<Published>,
}

/// Estadísticas de un país para el informe de salud.
#[derive(Debug, Clone, Serialize)]
pub struct RegionStats {
    pub country_code: String,
    pub track_count: usize,
    pub preview_count: usize,
    pub source: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub countries: usize,
    pub last_refresh: Option<String>,
    pub regions: Vec<RegionStats>,
}

impl RegionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Referencia consistente al mapa publicado en este momento.
    pub fn snapshot(&self) -> Arc<RegionMap> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .regions
            .clone()
    }

    /// Publica un mapa completo en sustitución del actual.
    pub fn publish(&self, regions: RegionMap) -> Arc<RegionMap> {
        let regions = Arc::new(regions);
        let mut published = self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        published.regions = regions.clone();
        published.last_refresh = Some(Utc::now());
        regions
    }

    pub fn get(&self, code: &str) -> Option<RegionMusic> {
        self.snapshot().get(&code.to_uppercase()).cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Todas las instantáneas ordenadas por código de país.
    pub fn all_sorted(&self) -> Vec<RegionMusic> {
        let snapshot = self.snapshot();
        let mut all: Vec<RegionMusic> = snapshot.values().cloned().collect();
        all.sort_by(|a, b| a.country_code.cmp(&b.country_code));
        all
    }

    pub fn stats(&self) -> CacheStats {
        let (snapshot, last_refresh) = {
            let published = self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner());
            (published.regions.clone(), published.last_refresh)
        };
        let mut regions: Vec<RegionStats> = snapshot
            .values()
            .map(|r| RegionStats {
                country_code: r.country_code.clone(),
                track_count: r.tracks.len(),
                preview_count: r.preview_count(),
                source: r.source.clone(),
                updated_at: r.updated_at.clone(),
            })
            .collect();
        regions.sort_by(|a, b| a.country_code.cmp(&b.country_code));
        CacheStats {
            countries: snapshot.len(),
            last_refresh: last_refresh.map(|t| t.to_rfc3339()),
            regions,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::Track;

    pub(crate) fn sample_region(code: &str, name: &str, tracks: &[(&str, &str)]) -> RegionMusic {
        RegionMusic {
            country_code: code.to_string(),
            country_name: name.to_string(),
            latitude: 0.0,
            longitude: 0.0,
            flag: None,
            tracks: tracks
                .iter()
                .map(|(song, artist)| Track {
                    name: song.to_string(),
                    artist: artist.to_string(),
                    preview_url: None,
                    image_url: None,
                    external_url: None,
                })
                .collect(),
            source: "itunes".to_string(),
            updated_at: "2024-01-01T00:00:00+00:00".to_string(),
        }
    }

    #[test]
    fn readers_keep_their_snapshot_across_publish() {
        let cache = RegionCache::new();
        let mut first = RegionMap::new();
        first.insert("JP".into(), sample_region("JP", "Japan", &[("Idol", "YOASOBI")]));
        cache.publish(first);

        let before = cache.snapshot();
        cache.publish(RegionMap::new());

        assert_eq!(before.len(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn stats_count_tracks_and_previews() {
        let cache = RegionCache::new();
        let mut region = sample_region("US", "United States", &[("A", "x"), ("B", "y")]);
        region.tracks[0].preview_url = Some("https://p".into());
        let mut map = RegionMap::new();
        map.insert("US".into(), region);
        cache.publish(map);

        let stats = cache.stats();
        assert_eq!(stats.countries, 1);
        assert!(stats.last_refresh.is_some());
        assert_eq!(stats.regions[0].track_count, 2);
        assert_eq!(stats.regions[0].preview_count, 1);
        assert_eq!(cache.get("us").map(|r| r.country_name), Some("United States".to_string()));
    }
}
