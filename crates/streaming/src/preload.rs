//! Two-leg station downloads behind a bounded cache.
//!
//! Every download races a low-resolution and a full-resolution fetch. The
//! first leg to finish is applied and resolves [`DownloadHandle::first_usable`];
//! if that was the low-resolution leg, the full-resolution leg keeps running
//! and replaces it, resolving [`DownloadHandle::full_resolution`].
//!
//! Shared state sits behind one `parking_lot::Mutex` that is only held for
//! short synchronous sections and never across an `.await`.

use std::fmt;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::{self, Shared};
use parking_lot::Mutex;
use runtime::RedrawRequests;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheError, LoadedCache};
use crate::downloads::DownloadList;
use crate::protocol::{FaceDescriptor, FaceSet, Resolution};
use crate::provider::{BoxFuture, ImageProvider, ProviderError};
use crate::request::{DownloadId, RevisionKey, StationId};
use crate::residency::ResidencyState;

/// How a completion signal settled when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreloadOutcome {
    Loaded(Resolution),
    /// Preempted or purged. Not an error.
    Aborted,
}

#[derive(Debug, Clone, Error)]
pub enum PreloadError {
    #[error("download of {key} failed")]
    Download {
        key: RevisionKey,
        #[source]
        source: Arc<ProviderError>,
    },
    #[error(transparent)]
    Cache(#[from] CacheError),
}

pub type PreloadResult = Result<PreloadOutcome, PreloadError>;

type Signal = Shared<BoxFuture<'static, PreloadResult>>;

fn signal(rx: oneshot::Receiver<PreloadResult>) -> Signal {
    // A dropped sender means the download task went away without finishing.
    let fut: BoxFuture<'static, PreloadResult> =
        Box::pin(async move { rx.await.unwrap_or(Ok(PreloadOutcome::Aborted)) });
    fut.shared()
}

fn settled(result: PreloadResult) -> Signal {
    let fut: BoxFuture<'static, PreloadResult> = Box::pin(future::ready(result));
    fut.shared()
}

/// Cloneable view on one download. Every clone observes the same signals.
#[derive(Clone)]
pub struct DownloadHandle {
    id: DownloadId,
    key: RevisionKey,
    first_usable: Signal,
    full_resolution: Signal,
}

impl fmt::Debug for DownloadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadHandle")
            .field("id", &self.id)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl DownloadHandle {
    /// Handle for a revision that is already fully loaded.
    fn completed(key: RevisionKey) -> Self {
        let done = settled(Ok(PreloadOutcome::Loaded(Resolution::Full)));
        Self {
            id: DownloadId(0),
            key,
            first_usable: done.clone(),
            full_resolution: done,
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_for_test(id: DownloadId, key: RevisionKey) -> Self {
        let (_, first) = oneshot::channel();
        let (_, full) = oneshot::channel();
        Self {
            id,
            key,
            first_usable: signal(first),
            full_resolution: signal(full),
        }
    }

    /// `DownloadId(0)` for handles of revisions that were already loaded.
    pub fn id(&self) -> DownloadId {
        self.id
    }

    pub fn key(&self) -> &RevisionKey {
        &self.key
    }

    /// Resolves once some resolution has been applied, or the download ended.
    pub async fn first_usable(&self) -> PreloadResult {
        self.first_usable.clone().await
    }

    /// Resolves once the full-resolution faces have been applied, or the
    /// download ended.
    pub async fn full_resolution(&self) -> PreloadResult {
        self.full_resolution.clone().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLimits {
    /// Loaded revisions kept in memory.
    pub image_cache_capacity: usize,
    /// In-flight downloads before older ones are preempted.
    pub download_capacity: usize,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            image_cache_capacity: 10,
            download_capacity: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub downloads_started: u64,
    pub deduplicated: u64,
    pub preempted: u64,
    pub evictions: u64,
    pub aborted: u64,
    pub failures: u64,
}

#[derive(Debug)]
struct CacheState {
    loaded: LoadedCache,
    downloads: DownloadList,
    visible: Option<StationId>,
    locked: Option<RevisionKey>,
    stats: CacheStats,
}

fn is_protected(
    visible: Option<&StationId>,
    locked: Option<&RevisionKey>,
    key: &RevisionKey,
) -> bool {
    visible == Some(&key.station) || locked == Some(key)
}

/// Bounded cache of loaded station revisions plus their in-flight downloads.
///
/// Revisions of the visible station and the locked revision are never evicted
/// or preempted.
#[derive(Clone)]
pub struct StreamingCache {
    state: Arc<Mutex<CacheState>>,
    images: Arc<dyn ImageProvider>,
    redraw: Option<RedrawRequests>,
}

impl fmt::Debug for StreamingCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingCache")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl StreamingCache {
    pub fn new(images: Arc<dyn ImageProvider>, limits: CacheLimits) -> Result<Self, CacheError> {
        if limits.download_capacity == 0 {
            return Err(CacheError::ZeroCapacity { what: "download" });
        }
        let state = CacheState {
            loaded: LoadedCache::new(limits.image_cache_capacity)?,
            downloads: DownloadList::new(limits.download_capacity),
            visible: None,
            locked: None,
            stats: CacheStats::default(),
        };
        Ok(Self {
            state: Arc::new(Mutex::new(state)),
            images,
            redraw: None,
        })
    }

    /// Request a redraw whenever new faces are applied.
    pub fn with_redraw_requests(mut self, redraw: RedrawRequests) -> Self {
        self.redraw = Some(redraw);
        self
    }

    pub fn limits(&self) -> CacheLimits {
        let state = self.state.lock();
        CacheLimits {
            image_cache_capacity: state.loaded.capacity(),
            download_capacity: state.downloads.capacity(),
        }
    }

    /// Start, join or short-circuit the download of one revision.
    ///
    /// Must be called from within a tokio runtime. With `lock` the revision
    /// becomes the locked one, replacing any previous lock.
    pub fn cached_preload(
        &self,
        key: RevisionKey,
        faces: Vec<FaceDescriptor>,
        lock: bool,
    ) -> DownloadHandle {
        let mut state = self.state.lock();
        if lock {
            state.locked = Some(key.clone());
        }

        if state.loaded.resolution(&key) == Some(Resolution::Full) {
            return DownloadHandle::completed(key);
        }

        if let Some(handle) = state.downloads.touch(&key) {
            state.stats.deduplicated += 1;
            debug!(%key, download = handle.id().0, "joining in-flight download");
            return handle;
        }

        if state.downloads.is_full() {
            let CacheState {
                downloads,
                visible,
                locked,
                stats,
                ..
            } = &mut *state;
            let candidate = downloads
                .preemption_candidate(|k| is_protected(visible.as_ref(), locked.as_ref(), k));
            match candidate {
                Some(victim) => {
                    downloads.abort(&victim);
                    stats.preempted += 1;
                    debug!(%victim, requested = %key, "preempted in-flight download");
                }
                None => {
                    debug!(
                        %key,
                        in_flight = downloads.len(),
                        "download capacity reached but every download is protected"
                    );
                }
            }
        }

        let id = state.downloads.next_id();
        let abort = CancellationToken::new();
        let (first_tx, first_rx) = oneshot::channel();
        let (full_tx, full_rx) = oneshot::channel();
        let handle = DownloadHandle {
            id,
            key: key.clone(),
            first_usable: signal(first_rx),
            full_resolution: signal(full_rx),
        };
        state.downloads.insert(handle.clone(), abort.clone());
        state.stats.downloads_started += 1;
        drop(state);

        debug!(%key, download = id.0, "starting download");
        let download = Download {
            state: self.state.clone(),
            images: self.images.clone(),
            redraw: self.redraw.clone(),
            id,
            key,
            faces,
            abort,
            first_tx,
            full_tx,
        };
        tokio::spawn(download.run());
        handle
    }

    /// Drop every revision of `station`, aborting its downloads.
    pub fn purge(&self, station: &StationId) {
        let mut state = self.state.lock();
        let aborted = state.downloads.abort_station(station);
        let removed = state.loaded.remove_station(station);
        if state.locked.as_ref().is_some_and(|k| k.station == *station) {
            state.locked = None;
        }
        if state.visible.as_ref() == Some(station) {
            state.visible = None;
        }
        drop(state);
        info!(
            %station,
            aborted = aborted.len(),
            removed = removed.len(),
            "purged station from streaming cache"
        );
    }

    pub fn set_visible_station(&self, station: StationId) {
        self.state.lock().visible = Some(station);
    }

    pub fn clear_visible_station(&self) {
        self.state.lock().visible = None;
    }

    pub fn visible_station(&self) -> Option<StationId> {
        self.state.lock().visible.clone()
    }

    pub fn unlock(&self) {
        self.state.lock().locked = None;
    }

    pub fn locked(&self) -> Option<RevisionKey> {
        self.state.lock().locked.clone()
    }

    pub fn residency(&self, key: &RevisionKey) -> ResidencyState {
        let state = self.state.lock();
        match state.loaded.resolution(key) {
            Some(Resolution::Full) => ResidencyState::LoadedFullRes,
            Some(Resolution::Low) => ResidencyState::LoadedLowRes,
            None if state.downloads.contains(key) => ResidencyState::Downloading,
            None => ResidencyState::NotLoaded,
        }
    }

    /// Faces currently applied for `key`, at whatever resolution arrived last.
    pub fn loaded_faces(&self, key: &RevisionKey) -> Option<FaceSet> {
        self.state.lock().loaded.faces(key).cloned()
    }

    pub fn loaded_len(&self) -> usize {
        self.state.lock().loaded.len()
    }

    /// Loaded keys from oldest to newest insertion.
    pub fn loaded_keys(&self) -> Vec<RevisionKey> {
        self.state.lock().loaded.keys_by_insertion()
    }

    pub fn in_flight_len(&self) -> usize {
        self.state.lock().downloads.len()
    }

    /// In-flight keys from most to least recently requested.
    pub fn in_flight_keys(&self) -> Vec<RevisionKey> {
        self.state.lock().downloads.keys()
    }

    pub fn stats(&self) -> CacheStats {
        self.state.lock().stats
    }
}

enum LegError {
    Aborted,
    Failed(ProviderError),
}

async fn fetch_leg(
    images: &dyn ImageProvider,
    faces: Vec<FaceDescriptor>,
    resolution: Resolution,
    abort: &CancellationToken,
) -> Result<FaceSet, LegError> {
    let fetch = images.fetch_faces(faces, resolution, abort.clone());
    tokio::select! {
        biased;
        _ = abort.cancelled() => Err(LegError::Aborted),
        result = fetch => match result {
            Ok(set) => Ok(FaceSet { resolution, ..set }),
            Err(_) if abort.is_cancelled() => Err(LegError::Aborted),
            Err(err) => Err(LegError::Failed(err)),
        },
    }
}

/// Removes the in-flight entry on every exit path of a download task.
struct InFlightGuard {
    state: Arc<Mutex<CacheState>>,
    id: DownloadId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.state.lock().downloads.finish(self.id);
    }
}

struct Download {
    state: Arc<Mutex<CacheState>>,
    images: Arc<dyn ImageProvider>,
    redraw: Option<RedrawRequests>,
    id: DownloadId,
    key: RevisionKey,
    faces: Vec<FaceDescriptor>,
    abort: CancellationToken,
    first_tx: oneshot::Sender<PreloadResult>,
    full_tx: oneshot::Sender<PreloadResult>,
}

impl Download {
    async fn run(self) {
        let Download {
            state,
            images,
            redraw,
            id,
            key,
            faces,
            abort,
            first_tx,
            full_tx,
        } = self;
        let guard = InFlightGuard {
            state: state.clone(),
            id,
        };
        let mut first_tx = Some(first_tx);

        let low = fetch_leg(images.as_ref(), faces.clone(), Resolution::Low, &abort);
        let full = fetch_leg(images.as_ref(), faces, Resolution::Full, &abort);
        tokio::pin!(low);
        tokio::pin!(full);
        let mut low_pending = true;
        // A full-leg failure is held back while the low leg can still land.
        let mut full_failure: Option<ProviderError> = None;

        let full_result = loop {
            tokio::select! {
                biased;
                result = &mut full, if full_failure.is_none() => match result {
                    Err(LegError::Failed(err)) if low_pending => {
                        warn!(%key, error = %err, "full-resolution leg failed; waiting for low resolution");
                        full_failure = Some(err);
                    }
                    result => break result,
                },
                result = &mut low, if low_pending => {
                    low_pending = false;
                    match result {
                        Ok(set) => match apply(&state, &key, &abort, set) {
                            Ok(true) => {
                                if let Some(redraw) = &redraw {
                                    redraw.request();
                                }
                                if let Some(tx) = first_tx.take() {
                                    let _ = tx.send(Ok(PreloadOutcome::Loaded(Resolution::Low)));
                                }
                            }
                            // Aborted while applying; the full leg sees it too.
                            Ok(false) => {}
                            Err(err) => {
                                drop(guard);
                                if let Some(tx) = first_tx.take() {
                                    let _ = tx.send(Err(err.clone()));
                                }
                                let _ = full_tx.send(Err(err));
                                return;
                            }
                        },
                        Err(LegError::Aborted) => {}
                        Err(LegError::Failed(err)) => {
                            warn!(%key, error = %err, "low-resolution leg failed");
                        }
                    }
                    if let Some(err) = full_failure.take() {
                        break Err(LegError::Failed(err));
                    }
                }
            }
        };

        let outcome = match full_result {
            Ok(set) => match apply(&state, &key, &abort, set) {
                Ok(true) => {
                    if let Some(redraw) = &redraw {
                        redraw.request();
                    }
                    Ok(PreloadOutcome::Loaded(Resolution::Full))
                }
                Ok(false) => Ok(PreloadOutcome::Aborted),
                Err(err) => Err(err),
            },
            Err(LegError::Aborted) => Ok(PreloadOutcome::Aborted),
            Err(LegError::Failed(source)) => Err(PreloadError::Download {
                key: key.clone(),
                source: Arc::new(source),
            }),
        };
        drop(guard);

        match &outcome {
            Ok(PreloadOutcome::Loaded(_)) => debug!(%key, "full resolution applied"),
            Ok(PreloadOutcome::Aborted) => {
                state.lock().stats.aborted += 1;
                debug!(%key, "download aborted");
            }
            Err(PreloadError::Download { source, .. }) => {
                state.lock().stats.failures += 1;
                warn!(%key, error = %source, "station download failed");
            }
            // Logged where the insertion failed.
            Err(PreloadError::Cache(_)) => {}
        }

        if let Some(tx) = first_tx.take() {
            let _ = tx.send(outcome.clone());
        }
        let _ = full_tx.send(outcome);
    }
}

/// Record freshly fetched faces. `Ok(false)` if the download was aborted.
fn apply(
    state: &Mutex<CacheState>,
    key: &RevisionKey,
    abort: &CancellationToken,
    faces: FaceSet,
) -> Result<bool, PreloadError> {
    let mut guard = state.lock();
    if abort.is_cancelled() {
        return Ok(false);
    }
    let resolution = faces.resolution;
    let bytes = faces.byte_len();
    let CacheState {
        loaded,
        visible,
        locked,
        stats,
        ..
    } = &mut *guard;
    match loaded.insert(key.clone(), faces, |k| {
        is_protected(visible.as_ref(), locked.as_ref(), k)
    }) {
        Ok(evicted) => {
            stats.evictions += evicted.len() as u64;
            for victim in &evicted {
                debug!(%victim, "evicted loaded station revision");
            }
            debug!(%key, resolution = resolution.as_str(), bytes, "applied station faces");
            Ok(true)
        }
        Err(err) => {
            error!(%key, error = %err, "cannot make room for station revision");
            Err(err.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CubeFace, FaceImage};
    use pretty_assertions::assert_eq;
    use std::collections::{BTreeMap, BTreeSet};
    use tokio::sync::Notify;

    /// Image provider whose legs complete only when released by the test.
    #[derive(Default)]
    struct GatedImages {
        instant: bool,
        gates: Mutex<BTreeMap<(String, Resolution), Arc<Notify>>>,
        failing: Mutex<BTreeSet<(String, Resolution)>>,
    }

    impl GatedImages {
        fn gated() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn instant() -> Arc<Self> {
            Arc::new(Self {
                instant: true,
                ..Self::default()
            })
        }

        fn gate(&self, station: &str, resolution: Resolution) -> Arc<Notify> {
            self.gates
                .lock()
                .entry((station.to_string(), resolution))
                .or_default()
                .clone()
        }

        fn release(&self, station: &str, resolution: Resolution) {
            self.gate(station, resolution).notify_one();
        }

        fn fail(&self, station: &str, resolution: Resolution) {
            self.failing.lock().insert((station.to_string(), resolution));
        }
    }

    impl ImageProvider for GatedImages {
        fn fetch_faces(
            &self,
            faces: Vec<FaceDescriptor>,
            resolution: Resolution,
            _abort: CancellationToken,
        ) -> BoxFuture<'_, Result<FaceSet, ProviderError>> {
            let station = faces
                .first()
                .and_then(|f| f.file_id.split('/').next())
                .unwrap_or_default()
                .to_string();
            let gate = (!self.instant).then(|| self.gate(&station, resolution));
            let fails = self
                .failing
                .lock()
                .contains(&(station.clone(), resolution));
            Box::pin(async move {
                if let Some(gate) = gate {
                    gate.notified().await;
                }
                if fails {
                    return Err(ProviderError::new(format!(
                        "{station} {} unavailable",
                        resolution.as_str()
                    )));
                }
                Ok(FaceSet {
                    resolution,
                    faces: faces
                        .iter()
                        .map(|f| FaceImage {
                            face: f.face,
                            bytes: f.file_id.clone().into_bytes(),
                        })
                        .collect(),
                })
            })
        }
    }

    fn key(station: &str) -> RevisionKey {
        RevisionKey::new(StationId::new(station), 0)
    }

    fn faces(station: &str) -> Vec<FaceDescriptor> {
        CubeFace::ALL
            .iter()
            .map(|f| FaceDescriptor::new(*f, format!("{station}/{f:?}")))
            .collect()
    }

    fn cache(images: Arc<GatedImages>, loaded: usize, downloads: usize) -> StreamingCache {
        StreamingCache::new(
            images,
            CacheLimits {
                image_cache_capacity: loaded,
                download_capacity: downloads,
            },
        )
        .expect("valid limits")
    }

    async fn load(cache: &StreamingCache, station: &str) -> PreloadResult {
        cache
            .cached_preload(key(station), faces(station), false)
            .full_resolution()
            .await
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_download() {
        let images = GatedImages::gated();
        let cache = cache(images.clone(), 10, 3);

        let a = cache.cached_preload(key("a"), faces("a"), false);
        let b = cache.cached_preload(key("a"), faces("a"), false);
        assert_eq!(a.id(), b.id());
        assert_eq!(cache.in_flight_len(), 1);
        assert_eq!(cache.residency(&key("a")), ResidencyState::Downloading);

        images.release("a", Resolution::Full);
        let outcome = b.first_usable().await.expect("loads");
        assert_eq!(outcome, PreloadOutcome::Loaded(Resolution::Full));
        assert_eq!(
            a.full_resolution().await.expect("loads"),
            PreloadOutcome::Loaded(Resolution::Full)
        );

        let stats = cache.stats();
        assert_eq!(stats.downloads_started, 1);
        assert_eq!(stats.deduplicated, 1);
        assert_eq!(cache.in_flight_len(), 0);
    }

    #[tokio::test]
    async fn low_resolution_first_then_full_replaces_it() {
        let images = GatedImages::gated();
        let cache = cache(images.clone(), 10, 3);
        images.release("a", Resolution::Low);

        let handle = cache.cached_preload(key("a"), faces("a"), false);
        assert_eq!(
            handle.first_usable().await.expect("low res"),
            PreloadOutcome::Loaded(Resolution::Low)
        );
        assert_eq!(cache.residency(&key("a")), ResidencyState::LoadedLowRes);
        assert_eq!(cache.in_flight_len(), 1);

        images.release("a", Resolution::Full);
        assert_eq!(
            handle.full_resolution().await.expect("full res"),
            PreloadOutcome::Loaded(Resolution::Full)
        );
        assert_eq!(cache.residency(&key("a")), ResidencyState::LoadedFullRes);
        let applied = cache.loaded_faces(&key("a")).expect("loaded");
        assert_eq!(applied.resolution, Resolution::Full);
        assert_eq!(applied.faces.len(), 6);
        assert_eq!(cache.in_flight_len(), 0);
        assert_eq!(cache.loaded_len(), 1);
    }

    #[tokio::test]
    async fn fully_loaded_revision_resolves_without_downloading() {
        let cache = cache(GatedImages::instant(), 10, 3);
        load(&cache, "a").await.expect("loads");

        let again = cache.cached_preload(key("a"), faces("a"), false);
        assert_eq!(again.id(), DownloadId(0));
        assert_eq!(
            again.first_usable().await.expect("ready"),
            PreloadOutcome::Loaded(Resolution::Full)
        );
        assert_eq!(cache.stats().downloads_started, 1);
    }

    #[tokio::test]
    async fn least_recently_requested_download_is_preempted() {
        let images = GatedImages::gated();
        let cache = cache(images.clone(), 10, 2);

        let a = cache.cached_preload(key("a"), faces("a"), false);
        let b = cache.cached_preload(key("b"), faces("b"), false);
        // Re-requesting 'a' makes 'b' the oldest request.
        cache.cached_preload(key("a"), faces("a"), false);
        cache.cached_preload(key("c"), faces("c"), false);

        assert_eq!(cache.in_flight_keys(), vec![key("c"), key("a")]);
        assert_eq!(b.first_usable().await.expect("abort is not an error"), PreloadOutcome::Aborted);
        assert_eq!(b.full_resolution().await.expect("abort is not an error"), PreloadOutcome::Aborted);
        assert_eq!(cache.stats().preempted, 1);
        assert_eq!(cache.residency(&key("b")), ResidencyState::NotLoaded);

        images.release("a", Resolution::Full);
        assert_eq!(
            a.full_resolution().await.expect("a loads"),
            PreloadOutcome::Loaded(Resolution::Full)
        );
    }

    #[tokio::test]
    async fn visible_station_download_is_never_preempted() {
        let images = GatedImages::gated();
        let cache = cache(images.clone(), 10, 1);
        cache.set_visible_station(StationId::new("a"));

        let a = cache.cached_preload(key("a"), faces("a"), false);
        let _b = cache.cached_preload(key("b"), faces("b"), false);
        // Capacity is a preemption target, not an admission gate.
        assert_eq!(cache.in_flight_len(), 2);
        assert_eq!(cache.stats().preempted, 0);

        images.release("a", Resolution::Full);
        assert_eq!(
            a.full_resolution().await.expect("a loads"),
            PreloadOutcome::Loaded(Resolution::Full)
        );
    }

    #[tokio::test]
    async fn locked_revision_is_protected_until_unlocked() {
        let images = GatedImages::gated();
        let cache = cache(images.clone(), 10, 1);

        let a = cache.cached_preload(key("a"), faces("a"), true);
        cache.cached_preload(key("b"), faces("b"), false);
        assert_eq!(cache.in_flight_len(), 2);
        assert_eq!(cache.locked(), Some(key("a")));

        cache.unlock();
        cache.cached_preload(key("c"), faces("c"), false);
        assert_eq!(a.first_usable().await.expect("aborted"), PreloadOutcome::Aborted);
        assert_eq!(cache.in_flight_keys(), vec![key("c"), key("b")]);
    }

    #[tokio::test]
    async fn abort_after_low_resolution_keeps_first_usable() {
        let images = GatedImages::gated();
        let cache = cache(images.clone(), 10, 1);
        images.release("a", Resolution::Low);

        let a = cache.cached_preload(key("a"), faces("a"), false);
        assert_eq!(
            a.first_usable().await.expect("low res"),
            PreloadOutcome::Loaded(Resolution::Low)
        );

        cache.cached_preload(key("b"), faces("b"), false);
        assert_eq!(a.full_resolution().await.expect("aborted"), PreloadOutcome::Aborted);
        assert_eq!(
            a.first_usable().await.expect("still low res"),
            PreloadOutcome::Loaded(Resolution::Low)
        );
        assert_eq!(cache.residency(&key("a")), ResidencyState::LoadedLowRes);
    }

    #[tokio::test]
    async fn loaded_entries_stay_within_capacity() {
        let cache = cache(GatedImages::instant(), 2, 3);
        for station in ["a", "b", "c", "d"] {
            load(&cache, station).await.expect("loads");
            assert!(cache.loaded_len() <= 2);
        }
        assert_eq!(cache.loaded_keys(), vec![key("c"), key("d")]);
        assert_eq!(cache.stats().evictions, 2);
        assert_eq!(cache.residency(&key("a")), ResidencyState::NotLoaded);
    }

    #[tokio::test]
    async fn visible_station_is_never_evicted() {
        let cache = cache(GatedImages::instant(), 2, 3);
        cache.set_visible_station(StationId::new("a"));
        for station in ["a", "b", "c"] {
            load(&cache, station).await.expect("loads");
        }
        assert_eq!(cache.loaded_keys(), vec![key("a"), key("c")]);
    }

    #[tokio::test]
    async fn nothing_evictable_fails_the_preload() {
        let cache = cache(GatedImages::instant(), 1, 3);
        cache.set_visible_station(StationId::new("a"));
        load(&cache, "a").await.expect("loads");

        let handle = cache.cached_preload(key("b"), faces("b"), false);
        let err = handle.first_usable().await.expect_err("no room");
        assert!(matches!(
            err,
            PreloadError::Cache(CacheError::NoEvictableEntries { capacity: 1 })
        ));
        assert!(handle.full_resolution().await.is_err());
        assert_eq!(cache.loaded_keys(), vec![key("a")]);
        assert_eq!(cache.in_flight_len(), 0);
    }

    #[tokio::test]
    async fn failed_download_is_an_error_and_leaves_station_unloaded() {
        let images = GatedImages::instant();
        images.fail("a", Resolution::Low);
        images.fail("a", Resolution::Full);
        let cache = cache(images, 10, 3);

        let handle = cache.cached_preload(key("a"), faces("a"), false);
        let err = handle.first_usable().await.expect_err("fails");
        let PreloadError::Download { key: failed, .. } = err else {
            panic!("expected a download failure, got {err:?}");
        };
        assert_eq!(failed, key("a"));
        assert_eq!(cache.residency(&key("a")), ResidencyState::NotLoaded);
        assert_eq!(cache.in_flight_len(), 0);
        assert_eq!(cache.stats().failures, 1);
    }

    #[tokio::test]
    async fn failed_low_leg_falls_back_to_full() {
        let images = GatedImages::gated();
        images.fail("a", Resolution::Low);
        images.release("a", Resolution::Low);
        let cache = cache(images.clone(), 10, 3);

        let handle = cache.cached_preload(key("a"), faces("a"), false);
        tokio::task::yield_now().await;
        images.release("a", Resolution::Full);
        assert_eq!(
            handle.first_usable().await.expect("full res"),
            PreloadOutcome::Loaded(Resolution::Full)
        );
    }

    #[tokio::test]
    async fn failed_full_leg_still_serves_low_resolution() {
        let images = GatedImages::gated();
        images.fail("a", Resolution::Full);
        images.release("a", Resolution::Full);
        let cache = cache(images.clone(), 10, 3);

        let handle = cache.cached_preload(key("a"), faces("a"), false);
        tokio::task::yield_now().await;
        images.release("a", Resolution::Low);
        assert_eq!(
            handle.first_usable().await.expect("low res"),
            PreloadOutcome::Loaded(Resolution::Low)
        );
        let err = handle.full_resolution().await.expect_err("full leg failed");
        assert!(matches!(err, PreloadError::Download { .. }));
        assert_eq!(cache.residency(&key("a")), ResidencyState::LoadedLowRes);
        assert_eq!(cache.in_flight_len(), 0);
        assert_eq!(cache.stats().failures, 1);
    }

    #[tokio::test]
    async fn purge_aborts_downloads_and_drops_loaded_revisions() {
        let images = GatedImages::gated();
        let cache = cache(images.clone(), 10, 3);
        images.release("a", Resolution::Full);
        load(&cache, "a").await.expect("loads");

        let other = RevisionKey::new(StationId::new("a"), 1);
        let pending = cache.cached_preload(other.clone(), faces("a"), true);
        cache.set_visible_station(StationId::new("a"));

        cache.purge(&StationId::new("a"));
        assert_eq!(pending.first_usable().await.expect("aborted"), PreloadOutcome::Aborted);
        assert_eq!(cache.loaded_len(), 0);
        assert_eq!(cache.in_flight_len(), 0);
        assert_eq!(cache.locked(), None);
        assert_eq!(cache.visible_station(), None);
        assert_eq!(cache.residency(&other), ResidencyState::NotLoaded);
    }

    #[tokio::test]
    async fn applying_faces_requests_a_redraw() {
        let redraw = RedrawRequests::new();
        let cache = cache(GatedImages::instant(), 10, 3).with_redraw_requests(redraw.clone());
        load(&cache, "a").await.expect("loads");
        assert!(redraw.take());
    }

    #[test]
    fn zero_download_capacity_is_rejected() {
        let err = StreamingCache::new(
            GatedImages::instant(),
            CacheLimits {
                image_cache_capacity: 1,
                download_capacity: 0,
            },
        )
        .expect_err("invalid");
        assert_eq!(err, CacheError::ZeroCapacity { what: "download" });
    }
}
