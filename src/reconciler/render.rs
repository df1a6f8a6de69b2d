//! Snapshot Renderer
//!
//! Commits a phase's resource description back into a fresh snapshot. This is
//! the only place phase-local results reach shared state, and every phase
//! calls it exactly once, right before returning.

use crate::cluster::{ClusterSnapshot, PoolConfig, PoolRole};
use crate::reconciler::ResourceDescription;
use tracing::debug;

/// Fold `resource` into a copy of `snapshot`.
///
/// A pool with the same name has its image, size, count, scripts and role
/// overwritten; otherwise a new pool is appended. The snapshot location always
/// takes the resource's region. `role` comes from the reconciler, never from
/// provider data.
pub fn render_snapshot(
    resource: &ResourceDescription,
    role: PoolRole,
    snapshot: &ClusterSnapshot,
) -> ClusterSnapshot {
    debug!(pool = %resource.name, "Rendering snapshot");
    let mut rendered = snapshot.clone();

    match rendered.pools.iter_mut().find(|p| p.name == resource.name) {
        Some(pool) => {
            pool.image = resource.image.clone();
            pool.size = resource.size.clone();
            pool.max_count = resource.count;
            pool.bootstrap_scripts = resource.bootstrap_scripts.clone();
            pool.role = role;
        }
        None => {
            let mut pool = PoolConfig::new(resource.name.clone(), role)
                .with_image(resource.image.clone())
                .with_size(resource.size.clone())
                .with_region(resource.region.clone())
                .with_max_count(resource.count);
            pool.bootstrap_scripts = resource.bootstrap_scripts.clone();
            rendered.pools.push(pool);
        }
    }

    rendered.provider_config.location = resource.region.clone();
    rendered
}
