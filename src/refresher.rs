//! Refresco periódico de la caché de países y reconstrucción del índice.
//!
//! Los países se procesan en lotes: dentro de un lote las descargas van en
//! paralelo y el fallo de una no afecta a las demás; entre lotes se espera
//! un intervalo fijo para no disparar los límites por IP del proveedor.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use futures::future::join_all;
use tracing::{error, info, warn};

use crate::{
    app_state::Status,
    cache::{RegionCache, RegionMap},
    itunes::{ContentFetcher, FetchError},
    models::RegionMusic,
    regions::Region,
    vector_store::RetrievalIndex,
};

/// Resumen de una pasada de refresco.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RefreshSummary {
    pub regions_requested: usize,
    pub regions_updated: usize,
    pub regions_failed: usize,
    pub regions_cached: usize,
    pub documents_indexed: usize,
}

impl std::fmt::Display for RefreshSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Resumen: {} países solicitados, {} actualizados, {} fallidos. {} en caché y {} documentos indexados.",
            self.regions_requested, self.regions_updated, self.regions_failed, self.regions_cached, self.documents_indexed
        )
    }
}

pub struct Refresher {
    fetcher: Arc<dyn ContentFetcher>,
    cache: Arc<RegionCache>,
    index: Arc<RetrievalIndex>,
    status: Arc<Mutex<Status>>,
    batch_size: usize,
    batch_delay: Duration,
}

impl Refresher {
    pub fn new(
        fetcher: Arc<dyn ContentFetcher>,
        cache: Arc<RegionCache>,
        index: Arc<RetrievalIndex>,
        status: Arc<Mutex<Status>>,
        batch_size: usize,
        batch_delay: Duration,
    ) -> Self {
        Self {
            fetcher,
            cache,
            index,
            status,
            batch_size: batch_size.max(1),
            batch_delay,
        }
    }

    fn set_status(&self, busy: bool, message: String, progress: f32) {
        let mut status = self.status.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        status.is_busy = busy;
        status.message = message;
        status.progress = progress;
    }

    async fn fetch_region(&self, region: &Region) -> Result<RegionMusic, FetchError> {
        let tracks = self.fetcher.top_tracks(region).await?;
        let source = if tracks.is_empty() { "none" } else { self.fetcher.source_label() };
        Ok(RegionMusic {
            country_code: region.code.to_string(),
            country_name: region.name.to_string(),
            latitude: region.latitude,
            longitude: region.longitude,
            flag: Some(region.flag.to_string()),
            tracks,
            source: source.to_string(),
            updated_at: Utc::now().to_rfc3339(),
        })
    }

    /// Una pasada completa: descarga por lotes, publica la caché y reconstruye el índice.
    ///
    /// Un país que falla conserva su entrada anterior (o sigue ausente).
    pub async fn refresh(&self, regions: &[Region]) -> Result<RefreshSummary> {
        let mut summary = RefreshSummary { regions_requested: regions.len(), ..Default::default() };
        let mut working: RegionMap = (*self.cache.snapshot()).clone();
        let total_batches = regions.len().div_ceil(self.batch_size);

        info!("Actualizando datos musicales de {} países en {} lotes...", regions.len(), total_batches);
        self.set_status(true, "Iniciando actualización de países...".to_string(), 0.0);

        for (batch_index, batch) in regions.chunks(self.batch_size).enumerate() {
            let results = join_all(batch.iter().map(|region| self.fetch_region(region))).await;

            for (region, result) in batch.iter().zip(results) {
                match result {
                    Ok(snapshot) => {
                        summary.regions_updated += 1;
                        working.insert(region.code.to_string(), snapshot);
                    }
                    Err(err) => {
                        summary.regions_failed += 1;
                        warn!("Error obteniendo datos de {}: {err}", region.code);
                    }
                }
            }

            let done = batch_index + 1;
            self.set_status(
                true,
                format!("[{done}/{total_batches}] Lote procesado ({} países)", batch.len()),
                done as f32 / total_batches as f32,
            );

            if done < total_batches && !self.batch_delay.is_zero() {
                tokio::time::sleep(self.batch_delay).await;
            }
        }

        let published = self.cache.publish(working);
        summary.regions_cached = published.len();
        info!("Caché actualizada con {} países", summary.regions_cached);

        let indexed = self.index.rebuild(&published).await;
        match indexed {
            Ok(count) => {
                summary.documents_indexed = count;
                self.set_status(false, format!("¡Actualización completada! {summary}"), 0.0);
                info!("{summary}");
                Ok(summary)
            }
            Err(err) => {
                self.set_status(false, format!("Error reconstruyendo el índice: {err}"), 0.0);
                Err(err.into())
            }
        }
    }

    /// Bucle periódico: la siguiente pasada se programa al terminar la anterior.
    pub async fn run_periodic(self: Arc<Self>, regions: &'static [Region], interval: Duration) {
        loop {
            tokio::time::sleep(interval).await;
            if let Err(err) = self.refresh(regions).await {
                error!("Error en el refresco periódico: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::Embedder;
    use crate::models::Track;
    use crate::regions::REGIONS;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum FetchEvent {
        Started(&'static str, Instant),
        Settled(&'static str, Instant),
    }

    /// Fetcher de pruebas: falla para los códigos indicados, mide la
    /// concurrencia y registra cuándo empieza y termina cada descarga.
    struct FakeFetcher {
        failing: HashSet<&'static str>,
        label: &'static str,
        latency: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        calls: AtomicUsize,
        log: Mutex<Vec<FetchEvent>>,
    }

    impl FakeFetcher {
        fn new(failing: &[&'static str], label: &'static str) -> Arc<Self> {
            Self::with_latency(failing, label, Duration::from_millis(10))
        }

        fn with_latency(failing: &[&'static str], label: &'static str, latency: Duration) -> Arc<Self> {
            Arc::new(Self {
                failing: failing.iter().copied().collect(),
                label,
                latency,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
                log: Mutex::new(Vec::new()),
            })
        }

        fn events(&self) -> Vec<FetchEvent> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ContentFetcher for FakeFetcher {
        fn source_label(&self) -> &'static str {
            "itunes"
        }

        async fn top_tracks(&self, region: &Region) -> Result<Vec<Track>, FetchError> {
            self.log.lock().unwrap().push(FetchEvent::Started(region.code, Instant::now()));
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.log.lock().unwrap().push(FetchEvent::Settled(region.code, Instant::now()));

            if self.failing.contains(region.code) {
                return Err(FetchError::Status { status: 503, url: format!("test://{}", region.code) });
            }
            Ok(vec![Track {
                name: format!("{} hit", self.label),
                artist: format!("{} artist", region.name),
                preview_url: None,
                image_url: None,
                external_url: None,
            }])
        }

        async fn search_tracks(&self, _query: &str, _limit: usize) -> Result<Vec<Track>, FetchError> {
            Ok(Vec::new())
        }
    }

    fn refresher(fetcher: Arc<FakeFetcher>, cache: Arc<RegionCache>, index: Arc<RetrievalIndex>) -> Refresher {
        Refresher::new(fetcher, cache, index, Arc::new(Mutex::new(Status::default())), 5, Duration::ZERO)
    }

    #[tokio::test]
    async fn full_refresh_populates_cache_and_index() {
        let cache = Arc::new(RegionCache::new());
        let index = Arc::new(RetrievalIndex::new(Embedder::hashed()));
        let regions = &REGIONS[..12];
        let summary = refresher(FakeFetcher::new(&[], "first"), cache.clone(), index.clone())
            .refresh(regions)
            .await
            .unwrap();

        assert_eq!(summary.regions_updated, 12);
        assert_eq!(summary.documents_indexed, 12);
        assert_eq!(cache.len(), 12);
        assert_eq!(index.len(), 12);

        let ids: HashSet<String> = index
            .search("music", 12)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.document.id)
            .collect();
        let codes: HashSet<String> = regions.iter().map(|r| r.code.to_string()).collect();
        assert_eq!(ids, codes);
    }

    #[tokio::test]
    async fn failed_region_keeps_previous_snapshot() {
        let cache = Arc::new(RegionCache::new());
        let index = Arc::new(RetrievalIndex::new(Embedder::hashed()));
        let regions = &REGIONS[..5];

        refresher(FakeFetcher::new(&[], "first"), cache.clone(), index.clone())
            .refresh(regions)
            .await
            .unwrap();
        let before = cache.get(regions[2].code).unwrap();

        let summary = refresher(FakeFetcher::new(&[regions[2].code], "second"), cache.clone(), index.clone())
            .refresh(regions)
            .await
            .unwrap();

        assert_eq!(summary.regions_failed, 1);
        assert_eq!(summary.regions_updated, 4);
        assert_eq!(cache.get(regions[2].code).unwrap(), before);
        for (i, region) in regions.iter().enumerate().filter(|(i, _)| *i != 2) {
            let snapshot = cache.get(region.code).unwrap();
            assert_eq!(snapshot.tracks[0].name, "second hit", "región {i}");
        }
        assert_eq!(index.len(), 5);
    }

    #[tokio::test]
    async fn never_fetched_failing_region_stays_absent() {
        let cache = Arc::new(RegionCache::new());
        let index = Arc::new(RetrievalIndex::new(Embedder::hashed()));
        let regions = &REGIONS[..3];

        refresher(FakeFetcher::new(&[regions[0].code], "first"), cache.clone(), index.clone())
            .refresh(regions)
            .await
            .unwrap();

        assert!(cache.get(regions[0].code).is_none());
        assert_eq!(cache.len(), 2);
        assert_eq!(index.len(), 2);
    }

    #[tokio::test]
    async fn fetches_run_concurrently_but_bounded_by_batch_size() {
        let cache = Arc::new(RegionCache::new());
        let index = Arc::new(RetrievalIndex::new(Embedder::hashed()));
        let fetcher = FakeFetcher::new(&[], "first");

        refresher(fetcher.clone(), cache, index).refresh(&REGIONS[..12]).await.unwrap();

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 12);
        assert_eq!(fetcher.max_in_flight.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn empty_feed_is_cached_with_none_source() {
        struct EmptyFetcher;

        #[async_trait]
        impl ContentFetcher for EmptyFetcher {
            fn source_label(&self) -> &'static str {
                "itunes"
            }
            async fn top_tracks(&self, _region: &Region) -> Result<Vec<Track>, FetchError> {
                Ok(Vec::new())
            }
            async fn search_tracks(&self, _query: &str, _limit: usize) -> Result<Vec<Track>, FetchError> {
                Ok(Vec::new())
            }
        }

        let cache = Arc::new(RegionCache::new());
        let index = Arc::new(RetrievalIndex::new(Embedder::hashed()));
        let status = Arc::new(Mutex::new(Status::default()));
        let refresher = Refresher::new(Arc::new(EmptyFetcher), cache.clone(), index, status.clone(), 2, Duration::ZERO);
        refresher.refresh(&REGIONS[..1]).await.unwrap();

        assert_eq!(cache.get(REGIONS[0].code).unwrap().source, "none");
        let status = status.lock().unwrap();
        assert!(!status.is_busy);
        assert!(status.message.starts_with("¡Actualización completada!"));
    }

    fn paced_refresher(fetcher: Arc<FakeFetcher>, delay: Duration) -> Refresher {
        Refresher::new(
            fetcher,
            Arc::new(RegionCache::new()),
            Arc::new(RetrievalIndex::new(Embedder::hashed())),
            Arc::new(Mutex::new(Status::default())),
            5,
            delay,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn batch_delay_applies_between_batches_only() {
        let fetcher = FakeFetcher::with_latency(&[], "first", Duration::ZERO);
        let refresher = paced_refresher(fetcher.clone(), Duration::from_secs(1));

        let started = Instant::now();
        refresher.refresh(&REGIONS[..12]).await.unwrap();

        // 3 lotes: dos pausas de 1 s, ninguna tras el último.
        assert_eq!(started.elapsed(), Duration::from_secs(2));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 12);
    }

    #[tokio::test(start_paused = true)]
    async fn next_batch_starts_only_after_previous_one_settles() {
        let regions = &REGIONS[..12];
        let fetcher = FakeFetcher::with_latency(&[regions[3].code], "first", Duration::from_millis(250));
        let refresher = paced_refresher(fetcher.clone(), Duration::from_secs(1));
        refresher.refresh(regions).await.unwrap();

        let batch_of = |code: &str| regions.iter().position(|r| r.code == code).unwrap() / 5;
        let events = fetcher.events();
        assert_eq!(events.len(), 24);

        for (i, event) in events.iter().enumerate() {
            let FetchEvent::Started(code, started_at) = *event else { continue };
            let batch = batch_of(code);
            if batch == 0 {
                continue;
            }
            let previous_settled: Vec<Instant> = events
                .iter()
                .filter_map(|e| match *e {
                    FetchEvent::Settled(c, at) if batch_of(c) == batch - 1 => Some(at),
                    _ => None,
                })
                .collect();
            assert_eq!(previous_settled.len(), 5);
            let settled_before = events[..i]
                .iter()
                .filter(|e| matches!(e, FetchEvent::Settled(c, _) if batch_of(c) == batch - 1))
                .count();
            assert_eq!(settled_before, 5, "{code} empezó antes de cerrar el lote anterior");
            let last_settled = previous_settled.into_iter().max().unwrap();
            assert!(started_at >= last_settled + Duration::from_secs(1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_runs_never_overlap() {
        let fetcher = FakeFetcher::with_latency(&[], "first", Duration::from_secs(3));
        let refresher = Arc::new(paced_refresher(fetcher.clone(), Duration::ZERO));

        let origin = Instant::now();
        let task = tokio::spawn(refresher.run_periodic(&REGIONS[..1], Duration::from_secs(10)));
        tokio::time::sleep(Duration::from_secs(40)).await;
        task.abort();

        let starts: Vec<Duration> = fetcher
            .events()
            .into_iter()
            .filter_map(|e| match e {
                FetchEvent::Started(_, at) => Some(at - origin),
                FetchEvent::Settled(..) => None,
            })
            .collect();
        // Espera de 10 s, descarga de 3 s, y la siguiente espera empieza al terminar.
        assert_eq!(
            starts,
            vec![Duration::from_secs(10), Duration::from_secs(23), Duration::from_secs(36)]
        );
    }
}
