//! Headless driver for 360° station collections.
//!
//! Loads every site under `STATION_ROOT`, flies a camera in towards the
//! stations while running the per-frame clustering pass, then preloads and
//! enters the station nearest to where the camera ended up.

use std::env;
use std::f64::consts::TAU;
use std::path::PathBuf;
use std::sync::Arc;

use foundation::math::{Mat4, Vec2, Vec3};
use futures_util::future::join_all;
use image360::{EntityId, Image360Error, Image360Facade, Providers, ViewerConfig};
use runtime::FrameClock;
use scene::{Camera, Viewport};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

mod data_sources;

use data_sources::FilesystemProvider;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    if let Err(err) = run().await {
        error!(error = %err, "station viewer failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Image360Error> {
    let root = env::var("STATION_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./stations"));
    let frames = env_var_u64("STATION_FRAMES", 240);
    let width = env_var_f64("STATION_VIEWPORT_WIDTH", 1280.0);
    let height = env_var_f64("STATION_VIEWPORT_HEIGHT", 720.0);
    let config = ViewerConfig::from_env();

    let provider = Arc::new(FilesystemProvider::new(root));
    let sites = match env::var("STATION_SITES") {
        Ok(list) => list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Err(_) => match provider.discover_sites().await {
            Ok(sites) => sites,
            Err(err) => {
                warn!(root = %provider.root().display(), error = %err, "no sites found");
                Vec::new()
            }
        },
    };
    info!(root = %provider.root().display(), sites = sites.len(), ?config, "starting");

    let mut clock = FrameClock::new(1.0 / 60.0);
    let facade = Image360Facade::new(
        Providers {
            descriptors: provider.clone(),
            images: provider.clone(),
            annotations: provider,
        },
        config,
        clock.redraw_requests(),
    )?;

    let pending: Vec<_> = sites
        .iter()
        .map(|site| facade.create(site.clone(), Mat4::IDENTITY))
        .collect();
    for (site, created) in sites.iter().zip(join_all(pending).await) {
        if let Err(err) = created {
            warn!(%site, error = %err, "collection creation failed");
        }
    }

    let entities = facade.entities();
    let positions: Vec<(EntityId, Vec3)> = entities
        .iter()
        .filter_map(|e| Some((*e, facade.entity_world_position(*e)?)))
        .collect();
    let Some(center) = Vec3::mean(positions.iter().map(|(_, p)| *p)) else {
        warn!("no stations loaded");
        return Ok(());
    };
    let extent = positions
        .iter()
        .map(|(_, p)| p.distance(center))
        .fold(1.0, f64::max);

    let viewport = Viewport::new(width, height);
    let mut last_eye = center;
    for _ in 0..frames {
        let (frame, redraw) = clock.advance();
        let t = frame.index as f64 / frames.max(1) as f64;
        let eye = orbit_eye(center, extent, t);
        let Some(camera) = Camera::look_at(eye, center, 60.0, viewport) else {
            continue;
        };
        last_eye = eye;

        let stats = facade.on_before_render(&camera);
        let hovered = facade.hover(Vec2::new(width / 2.0, height / 2.0), &camera);
        let cluster = camera
            .ray_from_ndc(Vec2::new(0.0, 0.0))
            .and_then(|ray| facade.intersect_cluster(&ray));
        facade.hover_cluster(cluster.as_ref());

        debug!(
            frame = frame.index,
            individual = stats.individual,
            clusters = stats.clusters,
            redraw,
            hovered = ?hovered.map(|h| h.entity),
            "frame"
        );
        if frame.index % 60 == 0 {
            info!(
                frame = frame.index,
                individual = stats.individual,
                clusters = stats.clusters,
                "batches"
            );
        }
    }

    let nearest = positions
        .iter()
        .min_by(|(_, a), (_, b)| a.distance(last_eye).total_cmp(&b.distance(last_eye)))
        .map(|(e, _)| *e);
    if let Some(entity) = nearest {
        let preloaded = facade.preload(entity, None, false).await?;
        info!(
            %entity,
            revision = preloaded.revision,
            outcome = ?preloaded.outcome,
            annotations = preloaded.annotations.len(),
            "nearest station preloaded"
        );

        let download = facade.enter_station(entity, None)?;
        match download.full_resolution().await {
            Ok(outcome) => info!(%entity, ?outcome, "station at full resolution"),
            Err(err) => warn!(%entity, error = %err, "full resolution failed"),
        }
        facade.exit_station();
    }

    let cache = facade.cache();
    info!(
        stats = ?cache.stats(),
        loaded = cache.loaded_len(),
        in_flight = cache.in_flight_len(),
        "streaming cache"
    );
    for summary in facade.collections() {
        info!(
            collection = %summary.id,
            site_id = %summary.site_id,
            entities = summary.entities,
            individual = summary.individual_markers,
            clusters = summary.clusters,
            "collection"
        );
    }
    Ok(())
}

/// Camera position on a descending spiral: starts well outside the stations
/// and ends just above them.
fn orbit_eye(center: Vec3, extent: f64, t: f64) -> Vec3 {
    let radius = extent * (4.0 - 3.5 * t);
    let angle = t * TAU;
    center + Vec3::new(radius * angle.cos(), extent * (1.5 - t), radius * angle.sin())
}

fn env_var_u64(key: &str, default: u64) -> u64 {
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

#[cfg(test)]
mod tests {
    use super::orbit_eye;
    use foundation::math::Vec3;

    #[test]
    fn orbit_descends_towards_center() {
        let center = Vec3::new(10.0, 0.0, 10.0);
        let start = orbit_eye(center, 5.0, 0.0);
        let end = orbit_eye(center, 5.0, 1.0);
        assert!(start.distance(center) > end.distance(center));
        assert!(end.y > center.y);
    }
}
