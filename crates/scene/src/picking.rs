use foundation::math::precision::stable_total_cmp_f64;
use foundation::math::{Ray, Vec3};

use crate::icon::{Icon, MarkerId};

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PickHit<T> {
    pub target: T,
    pub distance: f64,
    pub point: Vec3,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PickOptions {
    pub max_distance: f64,
}

impl Default for PickOptions {
    fn default() -> Self {
        Self {
            max_distance: 1.0e30,
        }
    }
}

/// Closest hit wins.
///
/// Ordering contract:
/// - Equal distances are broken by the lower `target`, so the result never
///   depends on iteration order.
pub fn nearest_hit<T: Ord>(hits: impl IntoIterator<Item = PickHit<T>>) -> Option<PickHit<T>> {
    hits.into_iter().fold(None, |best, hit| match best {
        None => Some(hit),
        Some(b) => {
            let ord = stable_total_cmp_f64(hit.distance, b.distance)
                .then_with(|| hit.target.cmp(&b.target));
            if ord.is_lt() { Some(hit) } else { Some(b) }
        }
    })
}

/// Ray picking over rendered markers.
///
/// `ray` must be expressed in the markers' local space; distances are local.
/// Culled, hidden and disposed markers are skipped.
pub fn pick_markers(icons: &[Icon], ray: &Ray, opts: PickOptions) -> Option<PickHit<MarkerId>> {
    nearest_hit(icons.iter().filter_map(|icon| {
        let t = icon.intersect(ray)?;
        (t <= opts.max_distance).then(|| PickHit {
            target: icon.id(),
            distance: t,
            point: ray.at(t),
        })
    }))
}
