//! Cluster config lookup

use anyhow::Context;
use mqmesh_topology::ClusterConfig;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Explicit path, else `~/.mqmesh/cluster.toml` when present, else defaults.
/// A non-empty `regions` replaces the configured list.
pub fn load(path: Option<&Path>, regions: &[String]) -> anyhow::Result<ClusterConfig> {
    let path = path.map(Path::to_path_buf).or_else(default_path);

    let config = match path {
        Some(path) => {
            debug!(path = %path.display(), "loading cluster config");
            ClusterConfig::load(&path).with_context(|| format!("loading {}", path.display()))?
        }
        None => ClusterConfig::default(),
    };

    Ok(if regions.is_empty() {
        config
    } else {
        config.with_regions(regions.iter().cloned())
    })
}

fn default_path() -> Option<PathBuf> {
    let path = dirs::home_dir()?.join(".mqmesh").join("cluster.toml");
    path.exists().then_some(path)
}
