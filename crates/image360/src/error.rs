use scene::SingularTransform;
use streaming::{CacheError, DescriptorError, PreloadError, ProviderError, StationId};
use thiserror::Error;

use crate::entity::{CollectionId, EntityId};

#[derive(Debug, Error)]
pub enum Image360Error {
    #[error("site {site_id} has no stations")]
    EmptyCollection { site_id: String },
    #[error("site {site_id} has a malformed station descriptor")]
    MalformedDescriptor {
        site_id: String,
        #[source]
        source: DescriptorError,
    },
    #[error("failed to fetch station descriptors for site {site_id}")]
    Descriptors {
        site_id: String,
        #[source]
        source: ProviderError,
    },
    #[error("failed to fetch annotations for station {station}")]
    Annotations {
        station: StationId,
        #[source]
        source: ProviderError,
    },
    #[error(transparent)]
    Preload(#[from] PreloadError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("collection transform is not invertible")]
    SingularTransform(#[from] SingularTransform),
    #[error("unknown entity {0}")]
    UnknownEntity(EntityId),
    #[error("unknown collection {0}")]
    UnknownCollection(CollectionId),
    #[error("station {station} has no revision {revision}")]
    UnknownRevision { station: StationId, revision: usize },
}
