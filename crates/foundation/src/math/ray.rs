use super::{Mat4, Vec3};

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    /// Unit direction.
    pub dir: Vec3,
}

impl Ray {
    /// Build a ray; `None` if `dir` has zero length.
    pub fn new(origin: Vec3, dir: Vec3) -> Option<Self> {
        Some(Self {
            origin,
            dir: dir.normalized()?,
        })
    }

    pub fn at(&self, t: f64) -> Vec3 {
        self.origin + self.dir * t
    }

    /// Transform into another space. The direction is re-normalized, so
    /// distances along the result are measured in the target space.
    pub fn transformed(&self, m: &Mat4) -> Option<Self> {
        Self::new(m.transform_point(self.origin), m.transform_vector(self.dir))
    }

    /// Distance along the ray to the first intersection with a sphere.
    ///
    /// If the origin is inside the sphere the exit distance is returned; a
    /// sphere entirely behind the origin is a miss.
    pub fn intersect_sphere(&self, center: Vec3, radius: f64) -> Option<f64> {
        let oc = center - self.origin;
        let tca = oc.dot(self.dir);
        let d2 = oc.length_squared() - tca * tca;
        let r2 = radius * radius;
        if d2 > r2 {
            return None;
        }
        let thc = (r2 - d2).sqrt();
        let t0 = tca - thc;
        let t1 = tca + thc;
        if t1 < 0.0 {
            return None;
        }
        Some(if t0 < 0.0 { t1 } else { t0 })
    }
}
