use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use streaming::{
    Annotation, AnnotationProvider, BoxFuture, CancellationToken, DescriptorProvider,
    FaceDescriptor, FaceImage, FaceSet, ImageProvider, ProviderError, Resolution,
    SiteDescriptor, StationDescriptor, StationId,
};
use tracing::debug;

/// Serves stations from a directory tree:
///
/// ```text
/// <root>/<site>/stations.json
/// <root>/faces/<file_id>.<low|full>
/// <root>/annotations/<station>-<revision>.json   (optional)
/// ```
#[derive(Debug, Clone)]
pub struct FilesystemProvider {
    root: PathBuf,
}

impl FilesystemProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Sites under the root, i.e. directories holding a `stations.json`.
    pub async fn discover_sites(&self) -> Result<Vec<String>, ProviderError> {
        let mut dir = tokio::fs::read_dir(&self.root).await.map_err(|e| {
            ProviderError::with_source(format!("read {}", self.root.display()), e)
        })?;
        let mut sites = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| ProviderError::with_source("list site directories", e))?
        {
            let path = entry.path();
            if !tokio::fs::try_exists(path.join("stations.json"))
                .await
                .unwrap_or(false)
            {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                sites.push(name.to_string());
            }
        }
        sites.sort();
        Ok(sites)
    }

    fn face_path(&self, file_id: &str, resolution: Resolution) -> Result<PathBuf, ProviderError> {
        let relative = Path::new(file_id);
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(ProviderError::new(format!("invalid face file id {file_id:?}")));
        }
        let mut path = self.root.join("faces").join(relative).into_os_string();
        path.push(".");
        path.push(resolution.as_str());
        Ok(PathBuf::from(path))
    }
}

impl DescriptorProvider for FilesystemProvider {
    fn station_descriptors<'a>(
        &'a self,
        site_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<StationDescriptor>, ProviderError>> {
        Box::pin(async move {
            let path = self.root.join(site_id).join("stations.json");
            let text = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| ProviderError::with_source(format!("read {}", path.display()), e))?;
            let site = SiteDescriptor::from_json(&text)
                .map_err(|e| ProviderError::with_source(format!("parse {}", path.display()), e))?;
            if site.site_id != site_id {
                debug!(
                    requested = site_id,
                    declared = %site.site_id,
                    "site id differs from directory name"
                );
            }
            Ok(site.stations)
        })
    }
}

impl ImageProvider for FilesystemProvider {
    fn fetch_faces(
        &self,
        faces: Vec<FaceDescriptor>,
        resolution: Resolution,
        abort: CancellationToken,
    ) -> BoxFuture<'_, Result<FaceSet, ProviderError>> {
        Box::pin(async move {
            let mut images = Vec::with_capacity(faces.len());
            for face in faces {
                if abort.is_cancelled() {
                    return Err(ProviderError::new("face fetch aborted"));
                }
                let path = self.face_path(&face.file_id, resolution)?;
                let bytes = tokio::fs::read(&path).await.map_err(|e| {
                    ProviderError::with_source(format!("read {}", path.display()), e)
                })?;
                images.push(FaceImage {
                    face: face.face,
                    bytes,
                });
            }
            Ok(FaceSet {
                resolution,
                faces: images,
            })
        })
    }
}

impl AnnotationProvider for FilesystemProvider {
    fn annotations<'a>(
        &'a self,
        station: &'a StationId,
        revision: usize,
    ) -> BoxFuture<'a, Result<Vec<Annotation>, ProviderError>> {
        Box::pin(async move {
            let path = self
                .root
                .join("annotations")
                .join(format!("{station}-{revision}.json"));
            let text = match tokio::fs::read_to_string(&path).await {
                Ok(text) => text,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => {
                    return Err(ProviderError::with_source(
                        format!("read {}", path.display()),
                        e,
                    ))
                }
            };
            serde_json::from_str(&text)
                .map_err(|e| ProviderError::with_source(format!("parse {}", path.display()), e))
        })
    }
}
