//! Viewer tuning knobs.
//!
//! Values come from defaults, an optional serde source (JSON, TOML, ...), and
//! `IMAGE360_*` environment variables layered on top by [`ViewerConfig::from_env`].

use std::env;

use scene::{ClusterSettings, IconSizing, OctreeParams};
use serde::{Deserialize, Serialize};
use streaming::CacheLimits;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub image_cache_capacity: usize,
    pub download_capacity: usize,
    pub icon_min_pixel_size: f64,
    pub icon_max_pixel_size: f64,
    pub icon_radius: f64,
    pub octree_max_leaf_size: usize,
    pub octree_max_depth: u32,
    pub area_threshold: f64,
    pub cluster_size_multiplier: f64,
    pub hover_margin: f64,
    pub min_cluster_pixel_size: f64,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        let cluster = ClusterSettings::default();
        let params = OctreeParams::default();
        let limits = CacheLimits::default();
        Self {
            image_cache_capacity: limits.image_cache_capacity,
            download_capacity: limits.download_capacity,
            icon_min_pixel_size: cluster.sizing.min_pixel_size,
            icon_max_pixel_size: cluster.sizing.max_pixel_size,
            icon_radius: cluster.sizing.radius,
            octree_max_leaf_size: params.max_leaf_size,
            octree_max_depth: params.max_depth,
            area_threshold: cluster.area_threshold,
            cluster_size_multiplier: cluster.cluster_size_multiplier,
            hover_margin: cluster.hover_margin,
            min_cluster_pixel_size: cluster.min_cluster_pixel_size,
        }
    }
}

impl ViewerConfig {
    /// Defaults overridden by any `IMAGE360_*` variable that parses.
    pub fn from_env() -> Self {
        Self::default().overlay_env()
    }

    pub fn overlay_env(self) -> Self {
        Self {
            image_cache_capacity: env_var_usize(
                "IMAGE360_IMAGE_CACHE_CAPACITY",
                self.image_cache_capacity,
            ),
            download_capacity: env_var_usize("IMAGE360_DOWNLOAD_CAPACITY", self.download_capacity),
            icon_min_pixel_size: env_var_f64("IMAGE360_ICON_MIN_PIXELS", self.icon_min_pixel_size),
            icon_max_pixel_size: env_var_f64("IMAGE360_ICON_MAX_PIXELS", self.icon_max_pixel_size),
            icon_radius: env_var_f64("IMAGE360_ICON_RADIUS", self.icon_radius),
            octree_max_leaf_size: env_var_usize(
                "IMAGE360_OCTREE_LEAF_SIZE",
                self.octree_max_leaf_size,
            ),
            octree_max_depth: env_var_u32("IMAGE360_OCTREE_MAX_DEPTH", self.octree_max_depth),
            area_threshold: env_var_f64("IMAGE360_AREA_THRESHOLD", self.area_threshold),
            cluster_size_multiplier: env_var_f64(
                "IMAGE360_CLUSTER_SIZE_MULTIPLIER",
                self.cluster_size_multiplier,
            ),
            hover_margin: env_var_f64("IMAGE360_HOVER_MARGIN", self.hover_margin),
            min_cluster_pixel_size: env_var_f64(
                "IMAGE360_MIN_CLUSTER_PIXELS",
                self.min_cluster_pixel_size,
            ),
        }
    }

    pub fn cache_limits(&self) -> CacheLimits {
        CacheLimits {
            image_cache_capacity: self.image_cache_capacity,
            download_capacity: self.download_capacity,
        }
    }

    pub fn octree_params(&self) -> OctreeParams {
        OctreeParams {
            max_leaf_size: self.octree_max_leaf_size.max(1),
            max_depth: self.octree_max_depth,
        }
    }

    pub fn cluster_settings(&self) -> ClusterSettings {
        ClusterSettings {
            area_threshold: self.area_threshold,
            cluster_size_multiplier: self.cluster_size_multiplier,
            min_cluster_pixel_size: self.min_cluster_pixel_size,
            hover_margin: self.hover_margin,
            sizing: IconSizing {
                min_pixel_size: self.icon_min_pixel_size,
                max_pixel_size: self.icon_max_pixel_size.max(self.icon_min_pixel_size),
                radius: self.icon_radius,
            },
        }
    }
}

fn env_var_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_var_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_var_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
