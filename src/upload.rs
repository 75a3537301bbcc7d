//! Storage uploader
//!
//! Streams a packaged image into a new volume. Upload is not idempotent, so
//! nothing here retries: a failure after the volume was defined leaves that
//! volume behind for the caller to clean up.

use tracing::{debug, info, warn};

use crate::CidataError;
use crate::backend::{StorageBackend, VolumeKey};

/// Upload `image` as a new volume `volume_name` in `pool` and return its key
pub fn upload(
    conn: &dyn StorageBackend,
    pool: &str,
    volume_name: &str,
    image: &[u8],
) -> Result<VolumeKey, CidataError> {
    conn.get_pool(pool)?;

    if conn.lookup_volume_by_name(pool, volume_name)?.is_some() {
        return Err(CidataError::Backend(format!(
            "volume '{}' already exists in pool '{}'",
            volume_name, pool
        )));
    }

    let volume = conn.define_volume(pool, volume_name, image.len() as u64)?;
    debug!(
        "Defined volume '{}' in pool '{}' ({} bytes)",
        volume_name,
        pool,
        image.len()
    );

    let key = conn.upload_bytes(&volume, image).map_err(|e| {
        warn!(
            "Upload into volume '{}' failed, the volume is left in pool '{}': {}",
            volume_name, pool, e
        );
        e
    })?;

    info!("Uploaded volume '{}' to pool '{}' as {}", volume_name, pool, key);
    Ok(key)
}
