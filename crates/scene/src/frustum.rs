use foundation::math::{Mat4, Vec3};

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub d: f64,
}

impl Plane {
    /// Plane `a*x + b*y + c*z + d = 0` from `[a, b, c, d]`.
    fn from_coefficients(c: [f64; 4]) -> Self {
        Self {
            normal: Vec3::new(c[0], c[1], c[2]),
            d: c[3],
        }
    }

    pub fn normalize(self) -> Self {
        let len = self.normal.length();
        if len <= 0.0 {
            return self;
        }
        Self {
            normal: self.normal * (1.0 / len),
            d: self.d / len,
        }
    }

    pub fn distance(&self, p: Vec3) -> f64 {
        self.normal.dot(p) + self.d
    }
}

/// View frustum as six planes.
///
/// A point is inside iff its distance to every plane is non-negative. The
/// planes live in whatever space the source matrix maps from, so a
/// view-projection premultiplied onto a collection transform yields a
/// collection-local frustum.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Frustum {
    pub left: Plane,
    pub right: Plane,
    pub bottom: Plane,
    pub top: Plane,
    pub near: Plane,
    pub far: Plane,
}

impl Frustum {
    /// Gribb/Hartmann extraction for a row-major matrix with clip z in
    /// `[-w, w]`.
    pub fn from_view_projection(m: &Mat4) -> Self {
        let row = |r: usize| [m.get(r, 0), m.get(r, 1), m.get(r, 2), m.get(r, 3)];
        let r0 = row(0);
        let r1 = row(1);
        let r2 = row(2);
        let r3 = row(3);
        let add = |a: [f64; 4], b: [f64; 4]| {
            Plane::from_coefficients([a[0] + b[0], a[1] + b[1], a[2] + b[2], a[3] + b[3]]).normalize()
        };
        let sub = |a: [f64; 4], b: [f64; 4]| {
            Plane::from_coefficients([a[0] - b[0], a[1] - b[1], a[2] - b[2], a[3] - b[3]]).normalize()
        };
        Self {
            left: add(r3, r0),
            right: sub(r3, r0),
            bottom: add(r3, r1),
            top: sub(r3, r1),
            near: add(r3, r2),
            far: sub(r3, r2),
        }
    }

    pub fn planes(&self) -> [Plane; 6] {
        [self.left, self.right, self.bottom, self.top, self.near, self.far]
    }

    pub fn contains_point(&self, p: Vec3) -> bool {
        self.planes().iter().all(|plane| plane.distance(p) >= 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::Frustum;
    use crate::camera::{Camera, Viewport};
    use foundation::math::{Mat4, Vec3};

    fn frustum(eye: Vec3, target: Vec3) -> Frustum {
        let camera = Camera::look_at(eye, target, 60.0, Viewport::new(1920.0, 1080.0)).expect("camera");
        Frustum::from_view_projection(&camera.view_projection())
    }

    #[test]
    fn contains_points_in_front_only() {
        let f = frustum(Vec3::ZERO, Vec3::new(0.0, 0.0, -1.0));
        assert!(f.contains_point(Vec3::new(0.0, 0.0, -10.0)));
        assert!(!f.contains_point(Vec3::new(0.0, 0.0, 10.0)));
        // Closer than the near plane.
        assert!(!f.contains_point(Vec3::new(0.0, 0.0, -0.01)));
        // Far off to the side.
        assert!(!f.contains_point(Vec3::new(100.0, 0.0, -10.0)));
        // Past the far plane.
        assert!(!f.contains_point(Vec3::new(0.0, 0.0, -20_000.0)));
    }

    #[test]
    fn premultiplied_transform_yields_local_planes() {
        let camera = Camera::look_at(Vec3::ZERO, Vec3::new(0.0, 0.0, -1.0), 60.0, Viewport::new(800.0, 600.0))
            .expect("camera");
        let world = Mat4::translation(Vec3::new(0.0, 0.0, -50.0));
        let local = Frustum::from_view_projection(&camera.view_projection().mul(&world));
        // Local origin sits 50 units in front of the camera.
        assert!(local.contains_point(Vec3::ZERO));
        assert!(!local.contains_point(Vec3::new(0.0, 0.0, 60.0)));
    }
}
