use crate::math::Vec3;

/// Axis-aligned bounding box in 3D.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Aabb3 {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb3 {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Aabb3 { min, max }
    }

    /// Tight box around `points`; `None` when empty.
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        Some(iter.fold(Aabb3::new(first, first), |b, p| b.expanded_to(p)))
    }

    pub fn expanded_to(self, p: Vec3) -> Self {
        Aabb3::new(self.min.min(p), self.max.max(p))
    }

    pub fn union(self, other: Self) -> Self {
        Aabb3::new(self.min.min(other.min), self.max.max(other.max))
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Inclusive on both faces.
    pub fn contains(&self, p: Vec3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    /// Octant index of `p` relative to the center: bit 0 = x, bit 1 = y,
    /// bit 2 = z, set when the coordinate is at or above the center.
    pub fn octant_of(&self, p: Vec3) -> usize {
        let c = self.center();
        let mut i = 0;
        if p.x >= c.x {
            i |= 1;
        }
        if p.y >= c.y {
            i |= 2;
        }
        if p.z >= c.z {
            i |= 4;
        }
        i
    }

    /// Child box for octant `i` (same bit layout as [`Aabb3::octant_of`]).
    pub fn octant(&self, i: usize) -> Self {
        let c = self.center();
        let pick = |bit: usize, lo: f64, mid: f64, hi: f64| {
            if i & bit != 0 { (mid, hi) } else { (lo, mid) }
        };
        let (x0, x1) = pick(1, self.min.x, c.x, self.max.x);
        let (y0, y1) = pick(2, self.min.y, c.y, self.max.y);
        let (z0, z1) = pick(4, self.min.z, c.z, self.max.z);
        Aabb3::new(Vec3::new(x0, y0, z0), Vec3::new(x1, y1, z1))
    }

    pub fn corners(&self) -> [Vec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vec3::new(a.x, a.y, a.z),
            Vec3::new(b.x, a.y, a.z),
            Vec3::new(a.x, b.y, a.z),
            Vec3::new(b.x, b.y, a.z),
            Vec3::new(a.x, a.y, b.z),
            Vec3::new(b.x, a.y, b.z),
            Vec3::new(a.x, b.y, b.z),
            Vec3::new(b.x, b.y, b.z),
        ]
    }

    /// Euclidean distance from `p` to the box (0 when inside).
    pub fn distance_to_point(&self, p: Vec3) -> f64 {
        let clamped = p.max(self.min).min(self.max);
        clamped.distance(p)
    }
}

#[cfg(test)]
mod tests {
    use super::Aabb3;
    use crate::math::Vec3;

    fn unit() -> Aabb3 {
        Aabb3::new(Vec3::ZERO, Vec3::splat(2.0))
    }

    #[test]
    fn from_points_is_tight() {
        let b = Aabb3::from_points([
            Vec3::new(1.0, -1.0, 0.0),
            Vec3::new(-2.0, 3.0, 5.0),
        ])
        .expect("non-empty");
        assert_eq!(b.min, Vec3::new(-2.0, -1.0, 0.0));
        assert_eq!(b.max, Vec3::new(1.0, 3.0, 5.0));
        assert!(Aabb3::from_points(std::iter::empty()).is_none());
    }

    #[test]
    fn octant_of_point_contains_point() {
        let b = unit();
        for p in [
            Vec3::new(0.5, 0.5, 0.5),
            Vec3::new(1.5, 0.2, 1.9),
            Vec3::new(1.0, 1.0, 1.0),
            Vec3::new(0.1, 1.7, 0.3),
        ] {
            let child = b.octant(b.octant_of(p));
            assert!(child.contains(p), "{p:?} not in {child:?}");
        }
    }

    #[test]
    fn octants_tile_parent() {
        let b = unit();
        let total: f64 = (0..8)
            .map(|i| {
                let s = b.octant(i).size();
                s.x * s.y * s.z
            })
            .sum();
        assert_eq!(total, 8.0);
    }

    #[test]
    fn distance_is_zero_inside() {
        let b = unit();
        assert_eq!(b.distance_to_point(Vec3::splat(1.0)), 0.0);
        assert_eq!(b.distance_to_point(Vec3::new(5.0, 1.0, 1.0)), 3.0);
    }
}
