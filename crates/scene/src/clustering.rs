//! Per-frame marker clustering for one collection.
//!
//! Every frame the controller asks the octree for a level-of-detail node set
//! and turns it into two point batches: markers drawn individually and
//! cluster sprites drawn at the centroid of their members. The clustered
//! scheme drops anything outside the view frustum. Both batches are rebuilt from scratch each
//! frame, and the per-marker LOD flag is cleared for every marker before
//! being re-asserted for the individual ones.

use foundation::math::precision::stable_total_cmp_f64;
use foundation::math::{Mat4, Ray, Vec3};
use runtime::RedrawRequests;
use tracing::{trace, warn};

use crate::camera::Camera;
use crate::frustum::Frustum;
use crate::icon::{Icon, IconSizing, MarkerId};
use crate::picking::{PickHit, PickOptions, pick_markers};
use crate::spatial::{Entry, IconOctree, NodeId, OctreeParams};

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ClusterSettings {
    /// Screen fraction above which an octree child is expanded.
    pub area_threshold: f64,
    /// Cluster sprite radius relative to a single marker.
    pub cluster_size_multiplier: f64,
    pub min_cluster_pixel_size: f64,
    /// Extra slack on cluster hit spheres.
    pub hover_margin: f64,
    pub sizing: IconSizing,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            area_threshold: 0.05,
            cluster_size_multiplier: 5.5,
            min_cluster_pixel_size: 40.0,
            hover_margin: 1.2,
            sizing: IconSizing::default(),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum CullingScheme {
    #[default]
    Clustered,
    /// Only the nearest markers within a radius, no clusters.
    Proximity,
}

#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub enum LodPolicy {
    #[default]
    ScreenArea,
    Distance {
        distance_threshold: f64,
        max_depth: Option<u32>,
    },
}

/// Point positions handed to the renderer, in collection-local space.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointBatch {
    pub positions: Vec<Vec3>,
    pub markers: Vec<MarkerId>,
    /// Markers represented by each point (1 for individual markers).
    pub counts: Vec<usize>,
}

impl PointBatch {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    fn push(&mut self, position: Vec3, marker: MarkerId, count: usize) {
        self.positions.push(position);
        self.markers.push(marker);
        self.counts.push(count);
    }
}

/// A cluster drawn this frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSprite {
    pub node: NodeId,
    /// Local-space sprite position: the centroid of `members`.
    pub position: Vec3,
    /// Marker whose label stands in for the cluster.
    pub representative: MarkerId,
    pub members: Vec<MarkerId>,
}

/// Result of a cluster hit test.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterHit {
    /// World-space sprite center.
    pub center: Vec3,
    pub member_count: usize,
    pub members: Vec<MarkerId>,
    pub representative: MarkerId,
    /// Distance along the ray to the hit sphere.
    pub distance: f64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct FrameStats {
    pub individual: usize,
    pub clusters: usize,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SingularTransform;

impl std::fmt::Display for SingularTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "collection transform is not invertible")
    }
}

impl std::error::Error for SingularTransform {}

#[derive(Debug)]
pub struct ClusteringController {
    icons: Vec<Icon>,
    octree: IconOctree,
    world_transform: Mat4,
    world_inverse: Mat4,
    settings: ClusterSettings,
    policy: LodPolicy,
    scheme: CullingScheme,
    proximity_radius: f64,
    proximity_limit: usize,
    individual: PointBatch,
    clusters: PointBatch,
    visible_clusters: Vec<ClusterSprite>,
    projection_scale: f64,
    render_height: f64,
    hovered_cluster: Option<MarkerId>,
    hovered_marker: Option<MarkerId>,
    selected_marker: Option<MarkerId>,
    redraw: Option<RedrawRequests>,
}

impl ClusteringController {
    /// One marker per position; marker ids follow input order.
    pub fn new(positions: &[Vec3], params: OctreeParams, settings: ClusterSettings) -> Self {
        let icons: Vec<Icon> = positions
            .iter()
            .enumerate()
            .map(|(i, p)| Icon::new(MarkerId(i as u32), *p, &settings.sizing))
            .collect();
        let octree = IconOctree::from_entries(
            icons.iter().map(|icon| Entry::new(icon.id(), icon.position())),
            params,
        );
        let proximity_limit = icons.len();
        Self {
            icons,
            octree,
            world_transform: Mat4::IDENTITY,
            world_inverse: Mat4::IDENTITY,
            settings,
            policy: LodPolicy::default(),
            scheme: CullingScheme::default(),
            proximity_radius: f64::INFINITY,
            proximity_limit,
            individual: PointBatch::default(),
            clusters: PointBatch::default(),
            visible_clusters: Vec::new(),
            // Roughly a 60 degree vertical FOV on a 1080p target.
            projection_scale: 1.73,
            render_height: 1080.0,
            hovered_cluster: None,
            hovered_marker: None,
            selected_marker: None,
            redraw: None,
        }
    }

    pub fn with_redraw_requests(mut self, redraw: RedrawRequests) -> Self {
        self.redraw = Some(redraw);
        self
    }

    pub fn icons(&self) -> &[Icon] {
        &self.icons
    }

    pub fn icon(&self, id: MarkerId) -> Option<&Icon> {
        self.icons.get(id.index())
    }

    pub fn icon_mut(&mut self, id: MarkerId) -> Option<&mut Icon> {
        self.icons.get_mut(id.index())
    }

    pub fn octree(&self) -> &IconOctree {
        &self.octree
    }

    pub fn settings(&self) -> &ClusterSettings {
        &self.settings
    }

    pub fn world_transform(&self) -> Mat4 {
        self.world_transform
    }

    pub fn world_inverse(&self) -> Mat4 {
        self.world_inverse
    }

    pub fn set_world_transform(&mut self, transform: Mat4) -> Result<(), SingularTransform> {
        let inverse = transform.inverse().ok_or(SingularTransform)?;
        self.world_transform = transform;
        self.world_inverse = inverse;
        self.request_redraw();
        Ok(())
    }

    pub fn lod_policy(&self) -> LodPolicy {
        self.policy
    }

    pub fn set_lod_policy(&mut self, policy: LodPolicy) {
        self.policy = policy;
        self.request_redraw();
    }

    pub fn culling_scheme(&self) -> CullingScheme {
        self.scheme
    }

    pub fn set_culling_scheme(&mut self, scheme: CullingScheme) {
        if self.scheme == scheme {
            return;
        }
        self.scheme = scheme;
        self.request_redraw();
    }

    /// Limits for [`CullingScheme::Proximity`]: at most `limit` markers
    /// within `radius` of the camera.
    pub fn set_proximity_restrictions(&mut self, radius: f64, limit: usize) {
        self.proximity_radius = radius.max(0.0);
        self.proximity_limit = limit.min(self.icons.len());
    }

    pub fn individual_batch(&self) -> &PointBatch {
        &self.individual
    }

    pub fn cluster_batch(&self) -> &PointBatch {
        &self.clusters
    }

    pub fn visible_clusters(&self) -> &[ClusterSprite] {
        &self.visible_clusters
    }

    pub fn hovered_cluster(&self) -> Option<MarkerId> {
        self.hovered_cluster
    }

    pub fn set_hovered_cluster(&mut self, representative: Option<MarkerId>) {
        if self.hovered_cluster != representative {
            self.hovered_cluster = representative;
            self.request_redraw();
        }
    }

    pub fn clear_hovered_cluster(&mut self) {
        self.set_hovered_cluster(None);
    }

    pub fn hovered_marker(&self) -> Option<MarkerId> {
        self.hovered_marker
    }

    /// Move the hover highlight to `marker`. Unknown or disposed markers
    /// clear it.
    pub fn set_hovered_marker(&mut self, marker: Option<MarkerId>) {
        let marker = marker.filter(|m| self.icon(*m).is_some_and(|icon| !icon.disposed()));
        if self.hovered_marker == marker {
            return;
        }
        if let Some(icon) = self.hovered_marker.and_then(|m| self.icons.get_mut(m.index())) {
            icon.set_hovered(false);
        }
        if let Some(icon) = marker.and_then(|m| self.icons.get_mut(m.index())) {
            icon.set_hovered(true);
        }
        self.hovered_marker = marker;
        self.request_redraw();
    }

    pub fn selected_marker(&self) -> Option<MarkerId> {
        self.selected_marker
    }

    /// Mark `marker` as the entered station. Unknown or disposed markers
    /// clear the selection.
    pub fn set_selected_marker(&mut self, marker: Option<MarkerId>) {
        let marker = marker.filter(|m| self.icon(*m).is_some_and(|icon| !icon.disposed()));
        if self.selected_marker == marker {
            return;
        }
        if let Some(icon) = self.selected_marker.and_then(|m| self.icons.get_mut(m.index())) {
            icon.set_selected(false);
        }
        if let Some(icon) = marker.and_then(|m| self.icons.get_mut(m.index())) {
            icon.set_selected(true);
        }
        self.selected_marker = marker;
        self.request_redraw();
    }

    /// Hide a marker for good; it is dropped from every later batch.
    pub fn dispose_marker(&mut self, id: MarkerId) {
        if let Some(icon) = self.icons.get_mut(id.index()) {
            icon.dispose();
            if self.hovered_marker == Some(id) {
                self.hovered_marker = None;
            }
            if self.selected_marker == Some(id) {
                self.selected_marker = None;
            }
            self.request_redraw();
        }
    }

    /// Dispose every marker and empty both batches.
    pub fn dispose(&mut self) {
        self.icons.iter_mut().for_each(Icon::dispose);
        self.individual = PointBatch::default();
        self.clusters = PointBatch::default();
        self.visible_clusters.clear();
        self.hovered_cluster = None;
        self.hovered_marker = None;
        self.selected_marker = None;
    }

    /// Recompute visibility and both batches for `camera` (world space).
    ///
    /// Pure function of resident state; never blocks and never fails.
    pub fn on_before_render(&mut self, camera: &Camera) -> FrameStats {
        let camera_local = self.world_inverse.transform_point(camera.position);
        self.projection_scale = camera.projection_scale();
        self.render_height = camera.render_height();

        let sizing = self.settings.sizing;
        for icon in &mut self.icons {
            icon.update_adaptive_scale(camera_local, self.projection_scale, self.render_height, &sizing);
        }

        match self.scheme {
            CullingScheme::Clustered => self.compute_clusters(camera, camera_local),
            CullingScheme::Proximity => self.compute_proximity(camera_local),
        }

        let stats = FrameStats {
            individual: self.individual.len(),
            clusters: self.clusters.len(),
        };
        trace!(
            individual = stats.individual,
            clusters = stats.clusters,
            "lod pass"
        );
        stats
    }

    fn compute_clusters(&mut self, camera: &Camera, camera_local: Vec3) {
        let view_projection = camera.view_projection().mul(&self.world_transform);
        let frustum = Frustum::from_view_projection(&view_projection);
        let selection = match self.policy {
            LodPolicy::ScreenArea => self
                .octree
                .lod_by_screen_area(self.settings.area_threshold, &view_projection),
            LodPolicy::Distance {
                distance_threshold,
                max_depth,
            } => self
                .octree
                .lod_by_distance_with_clustering(camera_local, distance_threshold, max_depth),
        };

        let mut individual_markers = Vec::new();
        let mut clusters = PointBatch::default();
        let mut sprites = Vec::new();

        for id in selection {
            let node = self.octree.node(id);
            if node.is_leaf() {
                individual_markers.extend(node.entries().iter().map(|e| e.marker));
                continue;
            }

            let members: Vec<MarkerId> = self
                .octree
                .all_markers(id)
                .into_iter()
                .filter(|m| self.icons[m.index()].is_shown())
                .collect();
            match members.len() {
                0 => {}
                1 => individual_markers.push(members[0]),
                count => {
                    let representative = self
                        .octree
                        .representative(id)
                        .filter(|r| self.icons[r.index()].is_shown())
                        .unwrap_or(members[0]);
                    let position = Vec3::mean(members.iter().map(|m| self.icons[m.index()].position()))
                        .unwrap_or_else(|| self.icons[representative.index()].position());
                    if !frustum.contains_point(position) {
                        continue;
                    }
                    clusters.push(position, representative, count);
                    sprites.push(ClusterSprite {
                        node: id,
                        position,
                        representative,
                        members,
                    });
                }
            }
        }

        individual_markers.retain(|m| frustum.contains_point(self.icons[m.index()].position()));
        self.individual = self.reassert_visibility(&individual_markers);
        self.clusters = clusters;
        self.visible_clusters = sprites;
    }

    fn compute_proximity(&mut self, camera_local: Vec3) {
        let mut nearest: Vec<MarkerId> = self
            .octree
            .markers_within_radius(camera_local, self.proximity_radius)
            .into_iter()
            .map(|e| e.marker)
            .take(self.proximity_limit)
            .collect();
        // Far to near, so the closest markers are drawn on top.
        nearest.reverse();

        self.individual = self.reassert_visibility(&nearest);
        self.clusters = PointBatch::default();
        self.visible_clusters.clear();
    }

    /// Clear every LOD flag, then re-assert it for `shown`. Returns the
    /// individual batch for the markers that end up rendered.
    fn reassert_visibility(&mut self, shown: &[MarkerId]) -> PointBatch {
        for icon in &mut self.icons {
            icon.set_culled(true);
        }
        let mut batch = PointBatch::default();
        for marker in shown {
            let icon = &mut self.icons[marker.index()];
            icon.set_culled(false);
            if icon.is_rendered() {
                batch.push(icon.position(), *marker, 1);
            }
        }
        batch
    }

    /// Nearest cluster sprite hit by `ray` (world space).
    pub fn intersect_cluster(&self, ray: &Ray) -> Option<ClusterHit> {
        let focal = self.render_height * self.projection_scale;
        let base_radius = self.settings.sizing.radius * self.settings.cluster_size_multiplier;

        let mut best: Option<ClusterHit> = None;
        for sprite in &self.visible_clusters {
            let center = self.world_transform.transform_point(sprite.position);
            let distance = ray.origin.distance(center);

            // Match the on-screen size: the sprite never shrinks below
            // `min_cluster_pixel_size`.
            let mut radius = base_radius;
            if distance > f64::EPSILON && focal > 0.0 {
                let pixels = (focal * base_radius / distance).max(self.settings.min_cluster_pixel_size);
                radius = pixels * distance / focal;
            }
            radius *= self.settings.hover_margin;

            let Some(t) = ray.intersect_sphere(center, radius) else {
                continue;
            };
            if best
                .as_ref()
                .is_none_or(|b| stable_total_cmp_f64(t, b.distance).is_lt())
            {
                best = Some(ClusterHit {
                    center,
                    member_count: sprite.members.len(),
                    members: sprite.members.clone(),
                    representative: sprite.representative,
                    distance: t,
                });
            }
        }
        best
    }

    /// Nearest rendered marker hit by `ray` (world space). The hit distance
    /// and point are reported in world space.
    pub fn intersect_markers(&self, ray: &Ray) -> Option<PickHit<MarkerId>> {
        let Some(local_ray) = ray.transformed(&self.world_inverse) else {
            warn!("degenerate ray after moving into collection space");
            return None;
        };
        let hit = pick_markers(&self.icons, &local_ray, PickOptions::default())?;
        let point = self.world_transform.transform_point(hit.point);
        Some(PickHit {
            target: hit.target,
            distance: ray.origin.distance(point),
            point,
        })
    }

    fn request_redraw(&self) {
        if let Some(redraw) = &self.redraw {
            redraw.request();
        }
    }
}
