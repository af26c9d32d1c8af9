//! Wire types for station descriptors, face imagery and annotations.
//!
//! Descriptors arrive as JSON from a descriptor provider, once per collection:
//!
//! ```json
//! { "site_id": "plant-a",
//!   "stations": [{ "id": "s-1", "label": "Pump room", "transform": [...16 column-major...],
//!                  "revisions": [{ "timestamp_ms": 1700000000000,
//!                                  "faces": [{ "face": "front", "file_id": "s-1-front" }, ...] }] }] }
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::request::StationId;

/// Side of the cube map a face image belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CubeFace {
    Front,
    Back,
    Left,
    Right,
    Top,
    Bottom,
}

impl CubeFace {
    pub const ALL: [CubeFace; 6] = [
        CubeFace::Front,
        CubeFace::Back,
        CubeFace::Left,
        CubeFace::Right,
        CubeFace::Top,
        CubeFace::Bottom,
    ];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceDescriptor {
    pub face: CubeFace,
    pub file_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl FaceDescriptor {
    pub fn new(face: CubeFace, file_id: impl Into<String>) -> Self {
        Self {
            face,
            file_id: file_id.into(),
            mime_type: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionDescriptor {
    /// Capture time in milliseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_ms: Option<i64>,
    pub faces: Vec<FaceDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationDescriptor {
    pub id: StationId,
    #[serde(default)]
    pub label: Option<String>,
    /// Station-to-world transform, column-major.
    pub transform: [f64; 16],
    pub revisions: Vec<RevisionDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteDescriptor {
    pub site_id: String,
    pub stations: Vec<StationDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error("station {station} has no revisions")]
    NoRevisions { station: StationId },
    #[error("station {station} revision {revision} has {found} faces, expected one of each of the 6")]
    IncompleteFaces {
        station: StationId,
        revision: usize,
        found: usize,
    },
    #[error("station {station} has a non-finite transform")]
    NonFiniteTransform { station: StationId },
}

impl StationDescriptor {
    /// Check the structural guarantees the rest of the pipeline relies on.
    pub fn validate(&self) -> Result<(), DescriptorError> {
        if self.revisions.is_empty() {
            return Err(DescriptorError::NoRevisions {
                station: self.id.clone(),
            });
        }
        if self.transform.iter().any(|v| !v.is_finite()) {
            return Err(DescriptorError::NonFiniteTransform {
                station: self.id.clone(),
            });
        }
        for (revision, rev) in self.revisions.iter().enumerate() {
            let complete = rev.faces.len() == 6
                && CubeFace::ALL
                    .iter()
                    .all(|face| rev.faces.iter().any(|f| f.face == *face));
            if !complete {
                return Err(DescriptorError::IncompleteFaces {
                    station: self.id.clone(),
                    revision,
                    found: rev.faces.len(),
                });
            }
        }
        Ok(())
    }

    /// Station origin in world space.
    pub fn position(&self) -> [f64; 3] {
        [self.transform[12], self.transform[13], self.transform[14]]
    }
}

impl SiteDescriptor {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Which leg of a download produced an image set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Low,
    Full,
}

impl Resolution {
    pub fn as_str(self) -> &'static str {
        match self {
            Resolution::Low => "low",
            Resolution::Full => "full",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaceImage {
    pub face: CubeFace,
    pub bytes: Vec<u8>,
}

/// The six decoded-or-raw faces of one revision at one resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaceSet {
    pub resolution: Resolution,
    pub faces: Vec<FaceImage>,
}

impl FaceSet {
    pub fn byte_len(&self) -> usize {
        self.faces.iter().map(|f| f.bytes.len()).sum()
    }
}

/// Annotation attached to one face of a station revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: String,
    pub face: CubeFace,
    #[serde(default)]
    pub label: Option<String>,
    /// Outline in normalized face coordinates.
    #[serde(default)]
    pub polygon: Vec<[f64; 2]>,
}
