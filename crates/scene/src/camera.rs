use foundation::bounds::Aabb3;
use foundation::math::{Mat4, Ray, Vec2, Vec3};

/// Clip-space `w` at or below this counts as "at or behind the eye".
const W_EPSILON: f64 = 1e-6;

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn aspect(&self) -> f64 {
        if self.height > 0.0 {
            self.width / self.height
        } else {
            1.0
        }
    }
}

/// Perspective camera in world space.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    /// World -> camera.
    pub view: Mat4,
    /// Camera -> clip.
    pub projection: Mat4,
    pub viewport: Viewport,
}

impl Camera {
    pub fn new(position: Vec3, view: Mat4, projection: Mat4, viewport: Viewport) -> Self {
        Self {
            position,
            view,
            projection,
            viewport,
        }
    }

    /// Perspective camera at `eye` looking at `target` with +Y up.
    pub fn look_at(eye: Vec3, target: Vec3, fov_y_deg: f64, viewport: Viewport) -> Option<Self> {
        let view = Mat4::look_at(eye, target, Vec3::new(0.0, 1.0, 0.0))
            .or_else(|| Mat4::look_at(eye, target, Vec3::new(0.0, 0.0, 1.0)))?;
        let projection = Mat4::perspective(fov_y_deg.to_radians(), viewport.aspect(), 0.1, 10_000.0);
        Some(Self::new(eye, view, projection, viewport))
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection.mul(&self.view)
    }

    /// Vertical focal scale (`projection[1][1]`), used to convert world
    /// sizes to pixels.
    pub fn projection_scale(&self) -> f64 {
        self.projection.get(1, 1)
    }

    pub fn render_height(&self) -> f64 {
        self.viewport.height
    }

    /// World-space ray through a point in normalized device coordinates
    /// (`[-1, 1]` on both axes, +Y up).
    pub fn ray_from_ndc(&self, ndc: Vec2) -> Option<Ray> {
        let inv = self.view_projection().inverse()?;
        let far = inv.transform_point(Vec3::new(ndc.x, ndc.y, 1.0));
        Ray::new(self.position, far - self.position)
    }
}

/// Fraction of the screen (0..=1) covered by the projected screen-space
/// rectangle of `bounds` under `view_projection`.
///
/// Corners are clamped to the NDC square. A box reaching behind the eye is
/// treated as covering the whole screen.
pub fn projected_screen_area(bounds: &Aabb3, view_projection: &Mat4) -> f64 {
    let mut min = Vec2::new(f64::INFINITY, f64::INFINITY);
    let mut max = Vec2::new(f64::NEG_INFINITY, f64::NEG_INFINITY);

    for corner in bounds.corners() {
        let [x, y, _z, w] = view_projection.project(corner);
        if w <= W_EPSILON {
            return 1.0;
        }
        let nx = (x / w).clamp(-1.0, 1.0);
        let ny = (y / w).clamp(-1.0, 1.0);
        min = Vec2::new(min.x.min(nx), min.y.min(ny));
        max = Vec2::new(max.x.max(nx), max.y.max(ny));
    }

    ((max.x - min.x) * (max.y - min.y) / 4.0).clamp(0.0, 1.0)
}
