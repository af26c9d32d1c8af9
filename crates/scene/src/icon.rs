use foundation::math::{Ray, Vec3};

/// Index of a marker inside its collection.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MarkerId(pub u32);

impl MarkerId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Pixel-size limits shared by every marker in a collection.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct IconSizing {
    pub min_pixel_size: f64,
    pub max_pixel_size: f64,
    /// Nominal world-space radius.
    pub radius: f64,
}

impl Default for IconSizing {
    fn default() -> Self {
        Self {
            min_pixel_size: 16.0,
            max_pixel_size: 256.0,
            radius: 0.3,
        }
    }
}

/// One station marker.
///
/// Drawn only when it is neither culled by the LOD pass, hidden by the user,
/// nor disposed.
#[derive(Debug, Clone, PartialEq)]
pub struct Icon {
    id: MarkerId,
    position: Vec3,
    culled: bool,
    visible: bool,
    hovered: bool,
    selected: bool,
    disposed: bool,
    adaptive_scale: f64,
}

impl Icon {
    pub fn new(id: MarkerId, position: Vec3, sizing: &IconSizing) -> Self {
        Self {
            id,
            position,
            culled: false,
            visible: true,
            hovered: false,
            selected: false,
            disposed: false,
            adaptive_scale: sizing.radius,
        }
    }

    pub fn id(&self) -> MarkerId {
        self.id
    }

    /// Local-space position.
    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn culled(&self) -> bool {
        self.culled
    }

    pub fn set_culled(&mut self, culled: bool) {
        self.culled = culled;
    }

    pub fn visible(&self) -> bool {
        self.visible
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub fn hovered(&self) -> bool {
        self.hovered
    }

    pub fn set_hovered(&mut self, hovered: bool) {
        self.hovered = hovered;
    }

    pub fn selected(&self) -> bool {
        self.selected
    }

    pub fn set_selected(&mut self, selected: bool) {
        self.selected = selected;
    }

    pub fn disposed(&self) -> bool {
        self.disposed
    }

    pub fn dispose(&mut self) {
        self.disposed = true;
        self.visible = false;
        self.hovered = false;
        self.selected = false;
    }

    /// Visible to the user and not disposed; ignores the per-frame LOD flag.
    pub fn is_shown(&self) -> bool {
        self.visible && !self.disposed
    }

    pub fn is_rendered(&self) -> bool {
        self.is_shown() && !self.culled
    }

    /// Current world-space radius after pixel clamping.
    pub fn adaptive_scale(&self) -> f64 {
        self.adaptive_scale
    }

    /// Recompute the radius so the on-screen size stays within
    /// `[min_pixel_size, max_pixel_size]`.
    ///
    /// `projection_scale` is `projection[1][1]`; `camera` is in the same space
    /// as the marker position.
    pub fn update_adaptive_scale(
        &mut self,
        camera: Vec3,
        projection_scale: f64,
        render_height: f64,
        sizing: &IconSizing,
    ) {
        let distance = self.position.distance(camera);
        let focal = render_height * projection_scale;
        if distance <= f64::EPSILON || focal <= 0.0 {
            self.adaptive_scale = sizing.radius;
            return;
        }
        let pixels = (focal * sizing.radius / distance)
            .clamp(sizing.min_pixel_size, sizing.max_pixel_size);
        self.adaptive_scale = pixels * distance / focal;
    }

    /// Distance along `ray` to the marker's sphere, if hit.
    pub fn intersect(&self, ray: &Ray) -> Option<f64> {
        if !self.is_rendered() {
            return None;
        }
        ray.intersect_sphere(self.position, self.adaptive_scale)
    }
}

#[cfg(test)]
mod tests {
    use super::{Icon, IconSizing, MarkerId};
    use foundation::math::{Ray, Vec3};

    fn icon_at(p: Vec3) -> Icon {
        Icon::new(MarkerId(0), p, &IconSizing::default())
    }

    #[test]
    fn adaptive_scale_respects_pixel_clamp() {
        let sizing = IconSizing::default();
        let mut icon = icon_at(Vec3::ZERO);

        // Far away: the nominal radius would be sub-pixel, so it grows to the minimum.
        icon.update_adaptive_scale(Vec3::new(0.0, 0.0, 1000.0), 1.73, 1080.0, &sizing);
        let pixels = 1080.0 * 1.73 * icon.adaptive_scale() / 1000.0;
        assert!((pixels - sizing.min_pixel_size).abs() < 1e-9);

        // Very close: capped at the maximum.
        icon.update_adaptive_scale(Vec3::new(0.0, 0.0, 0.1), 1.73, 1080.0, &sizing);
        let pixels = 1080.0 * 1.73 * icon.adaptive_scale() / 0.1;
        assert!((pixels - sizing.max_pixel_size).abs() < 1e-9);
    }

    #[test]
    fn culled_or_hidden_markers_are_not_hit() {
        let ray = Ray::new(Vec3::new(0.0, 0.0, 10.0), Vec3::new(0.0, 0.0, -1.0)).expect("ray");
        let mut icon = icon_at(Vec3::ZERO);
        assert!(icon.intersect(&ray).is_some());

        icon.set_culled(true);
        assert!(icon.intersect(&ray).is_none());
        icon.set_culled(false);

        icon.set_visible(false);
        assert!(icon.intersect(&ray).is_none());
        icon.set_visible(true);

        icon.dispose();
        assert!(icon.intersect(&ray).is_none());
        assert!(!icon.visible());
    }
}
