use std::fmt;

use foundation::math::{Mat4, Vec3};
use scene::MarkerId;
use streaming::{FaceDescriptor, RevisionDescriptor, RevisionKey, StationDescriptor, StationId};

/// Identifies a collection for its whole lifetime. Ids follow creation
/// request order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CollectionId(pub u64);

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "collection-{}", self.0)
    }
}

/// A station within a collection; the marker id doubles as its index.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityId {
    pub collection: CollectionId,
    pub marker: MarkerId,
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.marker.0)
    }
}

/// One image station: its descriptor plus the revision currently shown.
#[derive(Debug, Clone)]
pub struct Image360Entity {
    id: EntityId,
    descriptor: StationDescriptor,
    local_transform: Mat4,
    active_revision: usize,
}

impl Image360Entity {
    /// Starts on the newest revision. The descriptor must have passed
    /// validation.
    pub fn new(id: EntityId, descriptor: StationDescriptor) -> Self {
        let local_transform = Mat4::from_cols_array(descriptor.transform);
        let active_revision = newest_revision(&descriptor.revisions);
        Self {
            id,
            descriptor,
            local_transform,
            active_revision,
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn station(&self) -> &StationId {
        &self.descriptor.id
    }

    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    pub fn descriptor(&self) -> &StationDescriptor {
        &self.descriptor
    }

    /// Station-to-collection transform.
    pub fn local_transform(&self) -> Mat4 {
        self.local_transform
    }

    /// Station origin in collection space.
    pub fn local_position(&self) -> Vec3 {
        self.local_transform.translation_part()
    }

    pub fn revision_count(&self) -> usize {
        self.descriptor.revisions.len()
    }

    pub fn revision(&self, index: usize) -> Option<&RevisionDescriptor> {
        self.descriptor.revisions.get(index)
    }

    pub fn active_revision(&self) -> usize {
        self.active_revision
    }

    /// Returns false, leaving the selection unchanged, for an unknown index.
    pub fn set_active_revision(&mut self, index: usize) -> bool {
        if index < self.descriptor.revisions.len() {
            self.active_revision = index;
            true
        } else {
            false
        }
    }

    /// Revision captured closest to `timestamp_ms`, or the newest one when no
    /// revision carries a timestamp.
    pub fn revision_closest_to(&self, timestamp_ms: i64) -> usize {
        let closest = self
            .descriptor
            .revisions
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.timestamp_ms.map(|t| (i, t.abs_diff(timestamp_ms))))
            .min_by(|(ia, da), (ib, db)| da.cmp(db).then_with(|| ia.cmp(ib)));
        match closest {
            Some((i, _)) => i,
            None => newest_revision(&self.descriptor.revisions),
        }
    }

    pub fn revision_key(&self, revision: usize) -> RevisionKey {
        RevisionKey::new(self.descriptor.id.clone(), revision)
    }

    pub fn faces(&self, revision: usize) -> Option<Vec<FaceDescriptor>> {
        self.revision(revision).map(|r| r.faces.clone())
    }
}

/// Latest timestamp wins; untimestamped revisions rank oldest, and ties keep
/// the earlier revision.
fn newest_revision(revisions: &[RevisionDescriptor]) -> usize {
    let mut best = 0;
    let mut best_ts = i64::MIN;
    for (i, r) in revisions.iter().enumerate() {
        let ts = r.timestamp_ms.unwrap_or(i64::MIN);
        if ts > best_ts {
            best = i;
            best_ts = ts;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::{CollectionId, EntityId, Image360Entity};
    use scene::MarkerId;
    use streaming::{CubeFace, FaceDescriptor, RevisionDescriptor, StationDescriptor, StationId};

    fn revision(timestamp_ms: Option<i64>) -> RevisionDescriptor {
        RevisionDescriptor {
            timestamp_ms,
            faces: CubeFace::ALL
                .iter()
                .map(|f| FaceDescriptor::new(*f, format!("{f:?}")))
                .collect(),
        }
    }

    fn entity(revisions: Vec<RevisionDescriptor>) -> Image360Entity {
        let mut transform = [0.0; 16];
        transform[0] = 1.0;
        transform[5] = 1.0;
        transform[10] = 1.0;
        transform[15] = 1.0;
        transform[12] = 3.0;
        Image360Entity::new(
            EntityId {
                collection: CollectionId(1),
                marker: MarkerId(0),
            },
            StationDescriptor {
                id: StationId::new("s"),
                label: Some("Pump".into()),
                transform,
                revisions,
            },
        )
    }

    #[test]
    fn starts_on_newest_revision() {
        let e = entity(vec![revision(Some(10)), revision(Some(30)), revision(None)]);
        assert_eq!(e.active_revision(), 1);
        assert_eq!(e.local_position().x, 3.0);
        assert_eq!(e.label(), Some("Pump"));
    }

    #[test]
    fn closest_revision_by_timestamp() {
        let e = entity(vec![revision(Some(10)), revision(Some(30)), revision(None)]);
        assert_eq!(e.revision_closest_to(12), 0);
        assert_eq!(e.revision_closest_to(25), 1);
        // Equidistant: earlier revision wins.
        assert_eq!(e.revision_closest_to(20), 0);
    }

    #[test]
    fn untimestamped_revisions_fall_back_to_first() {
        let mut e = entity(vec![revision(None), revision(None)]);
        assert_eq!(e.active_revision(), 0);
        assert_eq!(e.revision_closest_to(5), 0);
        assert!(e.set_active_revision(1));
        assert!(!e.set_active_revision(2));
        assert_eq!(e.active_revision(), 1);
    }
}
