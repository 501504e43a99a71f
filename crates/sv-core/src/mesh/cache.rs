//! On-disk cache of pre-parsed meshes
//!
//! Parsing large glTF assets dominates startup, so the flattened
//! [`MeshGeometry`] is stored next to the source as RON. A cache entry is
//! only trusted when its format version and recorded source size match and
//! it is not older than the source file. Anything unreadable is ignored and
//! rebuilt.

use std::path::Path;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use super::{MeshError, MeshGeometry, load_mesh};

/// Bump when [`MeshGeometry`] changes shape
pub const CACHE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct CachedMesh {
    version: u32,
    source_len: u64,
    mesh: MeshGeometry,
}

/// Load a mesh, preferring a fresh cache entry at `cache_path`
pub fn load_mesh_cached(
    path: impl AsRef<Path>,
    cache_path: impl AsRef<Path>,
) -> Result<MeshGeometry, MeshError> {
    let path = path.as_ref();
    let cache_path = cache_path.as_ref();

    let source_meta = std::fs::metadata(path)
        .map_err(|_| MeshError::AssetMissing(path.display().to_string()))?;

    match read_cache(cache_path, &source_meta) {
        Ok(Some(mesh)) => {
            tracing::info!(cache = %cache_path.display(), "Loaded mesh from cache");
            return Ok(mesh);
        }
        Ok(None) => {}
        Err(e) => tracing::warn!("Ignoring mesh cache: {}", e),
    }

    let mesh = load_mesh(path)?;
    if let Err(e) = write_cache(cache_path, &mesh, source_meta.len()) {
        tracing::warn!("Failed to write mesh cache: {}", e);
    }
    Ok(mesh)
}

fn read_cache(
    cache_path: &Path,
    source_meta: &std::fs::Metadata,
) -> Result<Option<MeshGeometry>, MeshError> {
    let Ok(cache_meta) = std::fs::metadata(cache_path) else {
        return Ok(None);
    };
    if modified(&cache_meta) < modified(source_meta) {
        return Ok(None);
    }

    let content =
        std::fs::read_to_string(cache_path).map_err(|e| MeshError::Cache(e.to_string()))?;
    let cached: CachedMesh =
        ron::from_str(&content).map_err(|e| MeshError::Cache(e.to_string()))?;

    if cached.version != CACHE_FORMAT_VERSION || cached.source_len != source_meta.len() {
        return Ok(None);
    }
    cached.mesh.validate()?;
    Ok(Some(cached.mesh))
}

fn write_cache(cache_path: &Path, mesh: &MeshGeometry, source_len: u64) -> Result<(), MeshError> {
    let cached = CachedMesh {
        version: CACHE_FORMAT_VERSION,
        source_len,
        mesh: mesh.clone(),
    };
    let content = ron::ser::to_string(&cached).map_err(|e| MeshError::Cache(e.to_string()))?;
    std::fs::write(cache_path, content).map_err(|e| MeshError::Io(e.to_string()))
}

fn modified(meta: &std::fs::Metadata) -> SystemTime {
    meta.modified().unwrap_or(SystemTime::UNIX_EPOCH)
}
