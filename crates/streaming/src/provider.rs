//! Seams to the data-provider layer.
//!
//! Providers are object-safe traits returning boxed futures so the cache can
//! hold them as `Arc<dyn ...>` and drive them from spawned tasks.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;
pub use tokio_util::sync::CancellationToken;

use crate::protocol::{Annotation, FaceDescriptor, FaceSet, Resolution, StationDescriptor};
use crate::request::StationId;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Error)]
#[error("{message}")]
pub struct ProviderError {
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

pub trait DescriptorProvider: Send + Sync {
    /// All stations of one site, fetched once at collection creation.
    fn station_descriptors<'a>(
        &'a self,
        site_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<StationDescriptor>, ProviderError>>;
}

pub trait ImageProvider: Send + Sync {
    /// Fetch all faces of a revision at the given resolution.
    ///
    /// Implementations should stop early once `abort` is cancelled; the cache
    /// also stops polling the returned future at that point.
    fn fetch_faces(
        &self,
        faces: Vec<FaceDescriptor>,
        resolution: Resolution,
        abort: CancellationToken,
    ) -> BoxFuture<'_, Result<FaceSet, ProviderError>>;
}

pub trait AnnotationProvider: Send + Sync {
    fn annotations<'a>(
        &'a self,
        station: &'a StationId,
        revision: usize,
    ) -> BoxFuture<'a, Result<Vec<Annotation>, ProviderError>>;
}
