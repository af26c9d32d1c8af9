use std::collections::BTreeMap;

use foundation::math::{Mat4, Vec3};
use runtime::RedrawRequests;
use scene::{Camera, ClusteringController, CullingScheme, FrameStats, LodPolicy, MarkerId};
use streaming::StationDescriptor;

use crate::config::ViewerConfig;
use crate::entity::{CollectionId, EntityId, Image360Entity};
use crate::error::Image360Error;

/// Stations of one site, indexed and clustered together.
#[derive(Debug)]
pub struct Image360Collection {
    id: CollectionId,
    site_id: String,
    entities: BTreeMap<MarkerId, Image360Entity>,
    controller: ClusteringController,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSummary {
    pub id: CollectionId,
    pub site_id: String,
    pub entities: usize,
    pub individual_markers: usize,
    pub clusters: usize,
}

impl Image360Collection {
    /// Validate descriptors and build the marker index.
    ///
    /// Station transforms are relative to the collection; `transform` places
    /// the collection in the world.
    pub fn build(
        id: CollectionId,
        site_id: impl Into<String>,
        stations: Vec<StationDescriptor>,
        transform: Mat4,
        config: &ViewerConfig,
        redraw: Option<RedrawRequests>,
    ) -> Result<Self, Image360Error> {
        let site_id = site_id.into();
        if stations.is_empty() {
            return Err(Image360Error::EmptyCollection { site_id });
        }
        for station in &stations {
            if let Err(source) = station.validate() {
                return Err(Image360Error::MalformedDescriptor { site_id, source });
            }
        }

        let entities: BTreeMap<MarkerId, Image360Entity> = stations
            .into_iter()
            .enumerate()
            .map(|(i, descriptor)| {
                let marker = MarkerId(i as u32);
                let entity = Image360Entity::new(EntityId { collection: id, marker }, descriptor);
                (marker, entity)
            })
            .collect();
        let positions: Vec<Vec3> = entities.values().map(|e| e.local_position()).collect();

        let mut controller = ClusteringController::new(
            &positions,
            config.octree_params(),
            config.cluster_settings(),
        );
        if let Some(redraw) = redraw {
            controller = controller.with_redraw_requests(redraw);
        }
        controller.set_world_transform(transform)?;

        Ok(Self {
            id,
            site_id,
            entities,
            controller,
        })
    }

    pub fn id(&self) -> CollectionId {
        self.id
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Entities in creation order.
    pub fn entities(&self) -> impl Iterator<Item = &Image360Entity> {
        self.entities.values()
    }

    pub fn entity(&self, marker: MarkerId) -> Option<&Image360Entity> {
        self.entities.get(&marker)
    }

    pub fn entity_mut(&mut self, marker: MarkerId) -> Option<&mut Image360Entity> {
        self.entities.get_mut(&marker)
    }

    pub fn controller(&self) -> &ClusteringController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut ClusteringController {
        &mut self.controller
    }

    /// Station origin in world space.
    pub fn world_position(&self, marker: MarkerId) -> Option<Vec3> {
        let entity = self.entities.get(&marker)?;
        Some(
            self.controller
                .world_transform()
                .transform_point(entity.local_position()),
        )
    }

    pub fn set_transform(&mut self, transform: Mat4) -> Result<(), Image360Error> {
        self.controller.set_world_transform(transform)?;
        Ok(())
    }

    pub fn set_culling_scheme(&mut self, scheme: CullingScheme) {
        self.controller.set_culling_scheme(scheme);
    }

    pub fn set_lod_policy(&mut self, policy: LodPolicy) {
        self.controller.set_lod_policy(policy);
    }

    pub fn set_proximity_restrictions(&mut self, radius: f64, limit: usize) {
        self.controller.set_proximity_restrictions(radius, limit);
    }

    /// Detach an entity; its marker is disposed and never drawn again.
    pub fn remove_entity(&mut self, marker: MarkerId) -> Option<Image360Entity> {
        let entity = self.entities.remove(&marker)?;
        self.controller.dispose_marker(marker);
        Some(entity)
    }

    /// Dispose every marker and forget every entity.
    pub fn dispose(&mut self) -> Vec<Image360Entity> {
        self.controller.dispose();
        std::mem::take(&mut self.entities).into_values().collect()
    }

    pub fn summary(&self) -> CollectionSummary {
        CollectionSummary {
            id: self.id,
            site_id: self.site_id.clone(),
            entities: self.entities.len(),
            individual_markers: self.controller.individual_batch().len(),
            clusters: self.controller.cluster_batch().len(),
        }
    }

    pub(crate) fn on_before_render(&mut self, camera: &Camera) -> FrameStats {
        if self.entities.is_empty() {
            return FrameStats::default();
        }
        self.controller.on_before_render(camera)
    }
}
