//! Top-level coordinator for 360° image collections.
//!
//! Owns every collection, fans the per-frame LOD pass out to them, resolves
//! marker and cluster hits across collections, and routes station lifecycle
//! (preload, enter, delete) through the streaming cache.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use foundation::math::precision::stable_total_cmp_f64;
use foundation::math::{Mat4, Ray, Vec2, Vec3};
use futures_util::future;
use parking_lot::Mutex;
use runtime::{CreationSequencer, RedrawRequests};
use scene::{Camera, CullingScheme, FrameStats, LodPolicy, PickHit, nearest_hit};
use streaming::{
    Annotation, AnnotationProvider, DescriptorProvider, DownloadHandle, FaceDescriptor,
    ImageProvider, PreloadOutcome, RevisionKey, StationId, StreamingCache,
};
use tracing::{debug, info};

use crate::collection::{CollectionSummary, Image360Collection};
use crate::config::ViewerConfig;
use crate::entity::{CollectionId, EntityId};
use crate::error::Image360Error;

/// Data sources the facade pulls from.
#[derive(Clone)]
pub struct Providers {
    pub descriptors: Arc<dyn DescriptorProvider>,
    pub images: Arc<dyn ImageProvider>,
    pub annotations: Arc<dyn AnnotationProvider>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityHit {
    pub entity: EntityId,
    /// World-space distance from the ray origin.
    pub distance: f64,
    pub point: Vec3,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterIntersection {
    pub collection: CollectionId,
    /// World-space sprite center.
    pub center: Vec3,
    pub member_count: usize,
    pub entities: Vec<EntityId>,
    /// Entity to label the cluster with.
    pub representative: EntityId,
    pub distance: f64,
}

/// Annotations and first usable imagery of one station revision.
#[derive(Debug, Clone)]
pub struct PreloadedStation {
    pub entity: EntityId,
    pub revision: usize,
    pub outcome: PreloadOutcome,
    pub annotations: Vec<Annotation>,
    /// Await [`DownloadHandle::full_resolution`] for the full-resolution faces.
    pub download: DownloadHandle,
}

pub struct Image360Facade {
    descriptors: Arc<dyn DescriptorProvider>,
    annotations: Arc<dyn AnnotationProvider>,
    cache: StreamingCache,
    sequencer: CreationSequencer,
    config: Arc<ViewerConfig>,
    redraw: RedrawRequests,
    next_collection: AtomicU64,
    collections: Arc<Mutex<Vec<Image360Collection>>>,
}

impl std::fmt::Debug for Image360Facade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image360Facade")
            .field("cache", &self.cache)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Image360Facade {
    pub fn new(
        providers: Providers,
        config: ViewerConfig,
        redraw: RedrawRequests,
    ) -> Result<Self, Image360Error> {
        let cache = StreamingCache::new(providers.images, config.cache_limits())?
            .with_redraw_requests(redraw.clone());
        Ok(Self {
            descriptors: providers.descriptors,
            annotations: providers.annotations,
            cache,
            sequencer: CreationSequencer::new(),
            config: Arc::new(config),
            redraw,
            next_collection: AtomicU64::new(0),
            collections: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn cache(&self) -> &StreamingCache {
        &self.cache
    }

    /// Fetch a site's stations and add them as a new collection.
    ///
    /// The creation slot is reserved before this returns, so collections are
    /// committed in call order even when later sites load faster. A failed
    /// creation commits nothing and does not hold up later ones.
    pub fn create(
        &self,
        site_id: String,
        transform: Mat4,
    ) -> impl Future<Output = Result<CollectionId, Image360Error>> + Send + use<> {
        let id = CollectionId(self.next_collection.fetch_add(1, Ordering::Relaxed));
        let descriptors = self.descriptors.clone();
        let config = self.config.clone();
        let redraw = self.redraw.clone();
        let collections = self.collections.clone();
        debug!(%site_id, collection = %id, "creating collection");

        let work = async move {
            let stations = descriptors
                .station_descriptors(&site_id)
                .await
                .map_err(|source| Image360Error::Descriptors {
                    site_id: site_id.clone(),
                    source,
                })?;
            Image360Collection::build(id, site_id, stations, transform, &config, Some(redraw))
        };

        self.sequencer.run(work, move |collection| {
            info!(
                collection = %collection.id(),
                site_id = collection.site_id(),
                stations = collection.len(),
                "collection created"
            );
            collections.lock().push(collection);
            id
        })
    }

    pub fn collections(&self) -> Vec<CollectionSummary> {
        self.collections
            .lock()
            .iter()
            .map(Image360Collection::summary)
            .collect()
    }

    /// Run the LOD pass of every collection for this frame.
    pub fn on_before_render(&self, camera: &Camera) -> FrameStats {
        let mut collections = self.collections.lock();
        collections
            .iter_mut()
            .map(|c| c.on_before_render(camera))
            .fold(FrameStats::default(), |acc, s| FrameStats {
                individual: acc.individual + s.individual,
                clusters: acc.clusters + s.clusters,
            })
    }

    /// Nearest rendered station marker under a pixel position (origin top-left).
    pub fn intersect(&self, screen: Vec2, camera: &Camera) -> Option<EntityHit> {
        let viewport = camera.viewport;
        if viewport.width <= 0.0 || viewport.height <= 0.0 {
            return None;
        }
        let ndc = Vec2::new(
            2.0 * screen.x / viewport.width - 1.0,
            1.0 - 2.0 * screen.y / viewport.height,
        );
        let ray = camera.ray_from_ndc(ndc)?;

        let collections = self.collections.lock();
        let hits = collections.iter().filter_map(|c| {
            let hit = c.controller().intersect_markers(&ray)?;
            let entity = c.entity(hit.target)?;
            Some(PickHit {
                target: entity.id(),
                distance: hit.distance,
                point: hit.point,
            })
        });
        nearest_hit(hits).map(|hit| EntityHit {
            entity: hit.target,
            distance: hit.distance,
            point: hit.point,
        })
    }

    /// Nearest cluster sprite hit by a world-space ray.
    pub fn intersect_cluster(&self, ray: &Ray) -> Option<ClusterIntersection> {
        let collections = self.collections.lock();
        let mut best: Option<ClusterIntersection> = None;
        for collection in collections.iter() {
            let Some(hit) = collection.controller().intersect_cluster(ray) else {
                continue;
            };
            let Some(representative) = collection.entity(hit.representative) else {
                continue;
            };
            if best
                .as_ref()
                .is_some_and(|b| !stable_total_cmp_f64(hit.distance, b.distance).is_lt())
            {
                continue;
            }
            let entities: Vec<EntityId> = hit
                .members
                .iter()
                .filter_map(|m| collection.entity(*m).map(|e| e.id()))
                .collect();
            best = Some(ClusterIntersection {
                collection: collection.id(),
                center: hit.center,
                member_count: entities.len(),
                entities,
                representative: representative.id(),
                distance: hit.distance,
            });
        }
        best
    }

    /// Pick the marker under `screen` and highlight it, clearing the hover
    /// highlight everywhere else.
    pub fn hover(&self, screen: Vec2, camera: &Camera) -> Option<EntityHit> {
        let hit = self.intersect(screen, camera);
        self.hover_entity(hit.as_ref().map(|h| h.entity));
        hit
    }

    pub fn hover_entity(&self, entity: Option<EntityId>) {
        let mut collections = self.collections.lock();
        for collection in collections.iter_mut() {
            let marker = entity
                .filter(|e| e.collection == collection.id())
                .map(|e| e.marker);
            collection.controller_mut().set_hovered_marker(marker);
        }
    }

    pub fn hovered_entity(&self) -> Option<EntityId> {
        let collections = self.collections.lock();
        collections.iter().find_map(|c| {
            let marker = c.controller().hovered_marker()?;
            c.entity(marker).map(|e| e.id())
        })
    }

    /// Entity of the station currently entered, if any.
    pub fn selected_entity(&self) -> Option<EntityId> {
        let collections = self.collections.lock();
        collections.iter().find_map(|c| {
            let marker = c.controller().selected_marker()?;
            c.entity(marker).map(|e| e.id())
        })
    }

    fn select_entity(&self, entity: Option<EntityId>) {
        let mut collections = self.collections.lock();
        for collection in collections.iter_mut() {
            let marker = entity
                .filter(|e| e.collection == collection.id())
                .map(|e| e.marker);
            collection.controller_mut().set_selected_marker(marker);
        }
    }

    /// Highlight the hovered cluster, clearing it everywhere else.
    pub fn hover_cluster(&self, hit: Option<&ClusterIntersection>) {
        let mut collections = self.collections.lock();
        for collection in collections.iter_mut() {
            let hovered = hit
                .filter(|h| h.collection == collection.id())
                .map(|h| h.representative.marker);
            collection.controller_mut().set_hovered_cluster(hovered);
        }
    }

    /// Load a station revision's imagery together with its annotations.
    ///
    /// `revision` defaults to the entity's active revision. Resolves once the
    /// annotations and the first usable resolution are both in. An aborted
    /// download is reported through [`PreloadedStation::outcome`], not as an
    /// error.
    pub async fn preload(
        &self,
        entity: EntityId,
        revision: Option<usize>,
        lock: bool,
    ) -> Result<PreloadedStation, Image360Error> {
        let (station, revision, faces) = self.revision_faces(entity, revision, false)?;
        let download = self
            .cache
            .cached_preload(RevisionKey::new(station.clone(), revision), faces, lock);

        let (annotations, image) = future::join(
            self.annotations.annotations(&station, revision),
            download.first_usable(),
        )
        .await;
        let outcome = image?;
        let annotations = annotations.map_err(|source| Image360Error::Annotations {
            station: station.clone(),
            source,
        })?;

        if outcome == PreloadOutcome::Aborted {
            debug!(%entity, %station, revision, "preload aborted");
        }
        Ok(PreloadedStation {
            entity,
            revision,
            outcome,
            annotations,
            download,
        })
    }

    /// Make `entity` the visible station and start loading it, locked.
    ///
    /// The chosen revision becomes the entity's active one.
    pub fn enter_station(
        &self,
        entity: EntityId,
        revision: Option<usize>,
    ) -> Result<DownloadHandle, Image360Error> {
        let (station, revision, faces) = self.revision_faces(entity, revision, true)?;
        self.cache.set_visible_station(station.clone());
        self.select_entity(Some(entity));
        info!(%entity, %station, revision, "entering station");
        Ok(self
            .cache
            .cached_preload(RevisionKey::new(station, revision), faces, true))
    }

    pub fn exit_station(&self) {
        if let Some(station) = self.cache.visible_station() {
            info!(%station, "leaving station");
        }
        self.cache.clear_visible_station();
        self.cache.unlock();
        self.select_entity(None);
    }

    /// Remove one entity. Its collection is disposed once it is empty.
    pub fn delete(&self, entity: EntityId) -> Result<(), Image360Error> {
        let mut collections = self.collections.lock();
        let pos = collections
            .iter()
            .position(|c| c.id() == entity.collection)
            .ok_or(Image360Error::UnknownEntity(entity))?;
        let removed = collections[pos]
            .remove_entity(entity.marker)
            .ok_or(Image360Error::UnknownEntity(entity))?;
        self.cache.purge(removed.station());
        debug!(%entity, station = %removed.station(), "entity deleted");

        if collections[pos].is_empty() {
            let mut collection = collections.remove(pos);
            collection.dispose();
            info!(collection = %collection.id(), "last entity deleted; collection disposed");
        }
        self.redraw.request();
        Ok(())
    }

    /// Drop a whole collection and everything cached for its stations.
    pub fn dispose(&self, id: CollectionId) -> Result<(), Image360Error> {
        let mut collection = {
            let mut collections = self.collections.lock();
            let pos = collections
                .iter()
                .position(|c| c.id() == id)
                .ok_or(Image360Error::UnknownCollection(id))?;
            collections.remove(pos)
        };
        let entities = collection.dispose();
        for entity in &entities {
            self.cache.purge(entity.station());
        }
        info!(collection = %id, stations = entities.len(), "collection disposed");
        self.redraw.request();
        Ok(())
    }

    pub fn set_collection_transform(
        &self,
        id: CollectionId,
        transform: Mat4,
    ) -> Result<(), Image360Error> {
        self.with_collection(id, |c| c.set_transform(transform))?
    }

    pub fn set_culling_scheme(
        &self,
        id: CollectionId,
        scheme: CullingScheme,
    ) -> Result<(), Image360Error> {
        self.with_collection(id, |c| c.set_culling_scheme(scheme))
    }

    pub fn set_lod_policy(&self, id: CollectionId, policy: LodPolicy) -> Result<(), Image360Error> {
        self.with_collection(id, |c| c.set_lod_policy(policy))
    }

    pub fn set_proximity_restrictions(
        &self,
        id: CollectionId,
        radius: f64,
        limit: usize,
    ) -> Result<(), Image360Error> {
        self.with_collection(id, |c| c.set_proximity_restrictions(radius, limit))
    }

    pub fn entity_station(&self, entity: EntityId) -> Option<StationId> {
        let collections = self.collections.lock();
        let collection = collections.iter().find(|c| c.id() == entity.collection)?;
        collection.entity(entity.marker).map(|e| e.station().clone())
    }

    pub fn entity_world_position(&self, entity: EntityId) -> Option<Vec3> {
        let collections = self.collections.lock();
        let collection = collections.iter().find(|c| c.id() == entity.collection)?;
        collection.world_position(entity.marker)
    }

    /// Every live entity, in collection then creation order.
    pub fn entities(&self) -> Vec<EntityId> {
        self.collections
            .lock()
            .iter()
            .flat_map(|c| c.entities().map(|e| e.id()).collect::<Vec<_>>())
            .collect()
    }

    fn with_collection<R>(
        &self,
        id: CollectionId,
        f: impl FnOnce(&mut Image360Collection) -> R,
    ) -> Result<R, Image360Error> {
        let mut collections = self.collections.lock();
        let collection = collections
            .iter_mut()
            .find(|c| c.id() == id)
            .ok_or(Image360Error::UnknownCollection(id))?;
        Ok(f(collection))
    }

    fn revision_faces(
        &self,
        id: EntityId,
        revision: Option<usize>,
        activate: bool,
    ) -> Result<(StationId, usize, Vec<FaceDescriptor>), Image360Error> {
        let mut collections = self.collections.lock();
        let entity = collections
            .iter_mut()
            .find(|c| c.id() == id.collection)
            .and_then(|c| c.entity_mut(id.marker))
            .ok_or(Image360Error::UnknownEntity(id))?;
        let revision = revision.unwrap_or(entity.active_revision());
        let faces = entity
            .faces(revision)
            .ok_or_else(|| Image360Error::UnknownRevision {
                station: entity.station().clone(),
                revision,
            })?;
        if activate {
            entity.set_active_revision(revision);
        }
        Ok((entity.station().clone(), revision, faces))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use scene::Viewport;
    use std::collections::BTreeMap;
    use streaming::{
        BoxFuture, CubeFace, FaceImage, FaceSet, ProviderError, Resolution, RevisionDescriptor,
        StationDescriptor,
    };
    use streaming::CancellationToken;
    use tokio::sync::Notify;

    /// Descriptor provider whose sites can be held back until released.
    #[derive(Default)]
    struct FakeDescriptors {
        sites: BTreeMap<String, Vec<StationDescriptor>>,
        gates: Mutex<BTreeMap<String, Arc<Notify>>>,
    }

    impl FakeDescriptors {
        fn gate(&self, site: &str) -> Arc<Notify> {
            self.gates
                .lock()
                .entry(site.to_string())
                .or_default()
                .clone()
        }
    }

    impl DescriptorProvider for FakeDescriptors {
        fn station_descriptors<'a>(
            &'a self,
            site_id: &'a str,
        ) -> BoxFuture<'a, Result<Vec<StationDescriptor>, ProviderError>> {
            let gate = self.gates.lock().get(site_id).cloned();
            Box::pin(async move {
                if let Some(gate) = gate {
                    gate.notified().await;
                }
                self.sites
                    .get(site_id)
                    .cloned()
                    .ok_or_else(|| ProviderError::new(format!("unknown site {site_id}")))
            })
        }
    }

    struct InstantImages;

    impl ImageProvider for InstantImages {
        fn fetch_faces(
            &self,
            faces: Vec<FaceDescriptor>,
            resolution: Resolution,
            _abort: CancellationToken,
        ) -> BoxFuture<'_, Result<FaceSet, ProviderError>> {
            Box::pin(async move {
                Ok(FaceSet {
                    resolution,
                    faces: faces
                        .into_iter()
                        .map(|f| FaceImage {
                            face: f.face,
                            bytes: f.file_id.into_bytes(),
                        })
                        .collect(),
                })
            })
        }
    }

    struct LabelAnnotations;

    impl AnnotationProvider for LabelAnnotations {
        fn annotations<'a>(
            &'a self,
            station: &'a StationId,
            revision: usize,
        ) -> BoxFuture<'a, Result<Vec<Annotation>, ProviderError>> {
            Box::pin(async move {
                Ok(vec![Annotation {
                    id: format!("{station}-{revision}"),
                    face: CubeFace::Front,
                    label: Some("valve".into()),
                    polygon: Vec::new(),
                }])
            })
        }
    }

    fn station(id: &str, position: Vec3) -> StationDescriptor {
        let mut transform = [0.0; 16];
        for i in [0, 5, 10, 15] {
            transform[i] = 1.0;
        }
        transform[12] = position.x;
        transform[13] = position.y;
        transform[14] = position.z;
        StationDescriptor {
            id: StationId::new(id),
            label: None,
            transform,
            revisions: vec![RevisionDescriptor {
                timestamp_ms: Some(1),
                faces: CubeFace::ALL
                    .iter()
                    .map(|f| FaceDescriptor::new(*f, format!("{id}/{f:?}")))
                    .collect(),
            }],
        }
    }

    fn facade(descriptors: FakeDescriptors) -> (Image360Facade, Arc<FakeDescriptors>) {
        let descriptors = Arc::new(descriptors);
        let facade = Image360Facade::new(
            Providers {
                descriptors: descriptors.clone(),
                images: Arc::new(InstantImages),
                annotations: Arc::new(LabelAnnotations),
            },
            ViewerConfig::default(),
            RedrawRequests::new(),
        )
        .expect("valid config");
        (facade, descriptors)
    }

    fn sites() -> FakeDescriptors {
        let mut sites = BTreeMap::new();
        sites.insert(
            "near".to_string(),
            vec![station("n-1", Vec3::new(0.0, 0.0, -10.0))],
        );
        sites.insert(
            "far".to_string(),
            vec![station("f-1", Vec3::new(0.0, 0.0, -20.0))],
        );
        sites.insert("empty".to_string(), Vec::new());
        FakeDescriptors {
            sites,
            ..FakeDescriptors::default()
        }
    }

    fn camera() -> Camera {
        Camera::look_at(
            Vec3::ZERO,
            Vec3::new(0.0, 0.0, -1.0),
            60.0,
            Viewport::new(800.0, 600.0),
        )
        .expect("camera")
    }

    #[tokio::test]
    async fn collections_commit_in_request_order() {
        let (facade, descriptors) = facade(sites());
        let far_gate = descriptors.gate("far");

        let far = tokio::spawn(facade.create("far".into(), Mat4::IDENTITY));
        let near = tokio::spawn(facade.create("near".into(), Mat4::IDENTITY));
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert!(facade.collections().is_empty());

        far_gate.notify_one();
        let far_id = far.await.expect("task").expect("far");
        let near_id = near.await.expect("task").expect("near");
        let order: Vec<(CollectionId, String)> = facade
            .collections()
            .into_iter()
            .map(|c| (c.id, c.site_id))
            .collect();
        assert_eq!(
            order,
            vec![(far_id, "far".to_string()), (near_id, "near".to_string())]
        );
        assert_eq!(far_id, CollectionId(0));
    }

    #[tokio::test]
    async fn failed_creation_commits_nothing_and_does_not_block() {
        let (facade, _) = facade(sites());
        let missing = facade.create("missing".into(), Mat4::IDENTITY);
        let empty = facade.create("empty".into(), Mat4::IDENTITY);
        let near = facade.create("near".into(), Mat4::IDENTITY);

        assert!(matches!(
            missing.await,
            Err(Image360Error::Descriptors { .. })
        ));
        assert!(matches!(
            empty.await,
            Err(Image360Error::EmptyCollection { .. })
        ));
        near.await.expect("near commits");
        assert_eq!(facade.collections().len(), 1);
    }

    #[tokio::test]
    async fn intersect_returns_closest_marker_across_collections() {
        let (facade, _) = facade(sites());
        let far = facade.create("far".into(), Mat4::IDENTITY).await.expect("far");
        let near = facade.create("near".into(), Mat4::IDENTITY).await.expect("near");
        let camera = camera();
        facade.on_before_render(&camera);

        let hit = facade
            .intersect(Vec2::new(400.0, 300.0), &camera)
            .expect("hit");
        assert_eq!(hit.entity.collection, near);
        assert!(hit.distance < 10.0 && hit.distance > 9.0);

        // Off to the side: nothing.
        assert!(facade.intersect(Vec2::new(0.0, 0.0), &camera).is_none());
        assert_ne!(near, far);
    }

    #[tokio::test]
    async fn hover_highlights_one_marker_across_collections() {
        let (facade, _) = facade(sites());
        let far = facade.create("far".into(), Mat4::IDENTITY).await.expect("far");
        facade.create("near".into(), Mat4::IDENTITY).await.expect("near");
        let camera = camera();
        facade.on_before_render(&camera);

        let hit = facade.hover(Vec2::new(400.0, 300.0), &camera).expect("hit");
        assert_eq!(facade.hovered_entity(), Some(hit.entity));

        let far_entity = facade
            .entities()
            .into_iter()
            .find(|e| e.collection == far)
            .expect("far entity");
        facade.hover_entity(Some(far_entity));
        assert_eq!(facade.hovered_entity(), Some(far_entity));

        assert!(facade.hover(Vec2::new(0.0, 0.0), &camera).is_none());
        assert_eq!(facade.hovered_entity(), None);
    }

    #[tokio::test]
    async fn cluster_hit_maps_members_to_entities() {
        let mut sites = BTreeMap::new();
        let stations: Vec<StationDescriptor> = (0..8)
            .map(|i| {
                station(
                    &format!("s-{i}"),
                    Vec3::new((i % 2) as f64, (i / 2 % 2) as f64, -500.0 - (i / 4) as f64),
                )
            })
            .collect();
        sites.insert("cluster".to_string(), stations);
        let (facade, _) = facade(FakeDescriptors {
            sites,
            ..FakeDescriptors::default()
        });
        let id = facade
            .create("cluster".into(), Mat4::IDENTITY)
            .await
            .expect("cluster");
        let stats = facade.on_before_render(&camera());
        assert_eq!(stats.clusters, 1);
        assert_eq!(stats.individual, 0);

        let ray = Ray::new(Vec3::ZERO, Vec3::new(0.5, 0.5, -500.5)).expect("ray");
        let hit = facade.intersect_cluster(&ray).expect("cluster hit");
        assert_eq!(hit.collection, id);
        assert_eq!(hit.member_count, 8);
        assert!(hit.entities.contains(&hit.representative));

        facade.hover_cluster(Some(&hit));
        let far_ray = Ray::new(Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0)).expect("ray");
        assert!(facade.intersect_cluster(&far_ray).is_none());
    }

    #[tokio::test]
    async fn preload_joins_annotations_and_imagery() {
        let (facade, _) = facade(sites());
        let id = facade.create("near".into(), Mat4::IDENTITY).await.expect("near");
        let entity = facade.entities()[0];
        assert_eq!(entity.collection, id);

        let loaded = facade.preload(entity, None, false).await.expect("preload");
        assert_eq!(loaded.outcome, PreloadOutcome::Loaded(Resolution::Full));
        assert_eq!(loaded.annotations.len(), 1);
        assert_eq!(loaded.annotations[0].id, "n-1-0");
        assert_eq!(facade.cache().loaded_len(), 1);

        assert!(matches!(
            facade.preload(entity, Some(3), false).await,
            Err(Image360Error::UnknownRevision { revision: 3, .. })
        ));
    }

    #[tokio::test]
    async fn deleting_last_entity_disposes_collection_and_purges_cache() {
        let (facade, _) = facade(sites());
        facade.create("near".into(), Mat4::IDENTITY).await.expect("near");
        facade.create("far".into(), Mat4::IDENTITY).await.expect("far");
        let entity = facade.entities()[0];
        facade.preload(entity, None, false).await.expect("preload");

        facade.delete(entity).expect("delete");
        assert_eq!(facade.cache().loaded_len(), 0);
        assert_eq!(facade.collections().len(), 1);
        assert!(matches!(
            facade.delete(entity),
            Err(Image360Error::UnknownEntity(_))
        ));
    }

    #[tokio::test]
    async fn entering_station_marks_it_visible_and_locked() {
        let (facade, _) = facade(sites());
        facade.create("near".into(), Mat4::IDENTITY).await.expect("near");
        let entity = facade.entities()[0];

        let download = facade.enter_station(entity, None).expect("enter");
        assert_eq!(
            facade.cache().visible_station(),
            Some(StationId::new("n-1"))
        );
        assert_eq!(facade.cache().locked(), Some(download.key().clone()));
        assert_eq!(facade.selected_entity(), Some(entity));
        download.full_resolution().await.expect("loads");

        facade.exit_station();
        assert_eq!(facade.cache().visible_station(), None);
        assert_eq!(facade.cache().locked(), None);
        assert_eq!(facade.selected_entity(), None);
    }

    #[tokio::test]
    async fn dispose_drops_collection_and_cached_imagery() {
        let (facade, _) = facade(sites());
        let id = facade.create("near".into(), Mat4::IDENTITY).await.expect("near");
        let entity = facade.entities()[0];
        facade.preload(entity, None, false).await.expect("preload");

        facade.dispose(id).expect("dispose");
        assert!(facade.collections().is_empty());
        assert_eq!(facade.cache().loaded_len(), 0);
        assert!(matches!(
            facade.dispose(id),
            Err(Image360Error::UnknownCollection(_))
        ));
    }

    #[tokio::test]
    async fn moving_a_collection_moves_its_markers() {
        let (facade, _) = facade(sites());
        let id = facade.create("near".into(), Mat4::IDENTITY).await.expect("near");
        let entity = facade.entities()[0];
        facade
            .set_collection_transform(id, Mat4::translation(Vec3::new(0.0, 0.0, 5.0)))
            .expect("invertible");
        let position = facade.entity_world_position(entity).expect("entity");
        assert_eq!(position, Vec3::new(0.0, 0.0, -5.0));
        assert!(matches!(
            facade.set_collection_transform(CollectionId(99), Mat4::IDENTITY),
            Err(Image360Error::UnknownCollection(_))
        ));
    }
}
