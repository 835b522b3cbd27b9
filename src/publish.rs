use std::fs::{self, File};
use std::io::{BufWriter, Write};

use flate2::Compression;
use flate2::write::GzEncoder;
use geojson::FeatureCollection;
use tracing::{debug, info};

use crate::domain::{ArtifactKey, Category};
use crate::error::{EtlError, fs_err};
use crate::store::{PublishedArtifact, Store, remove_if_exists};

/// Serializes, gzips and publishes one artifact under the store's output
/// root.
///
/// Bytes are only ever written to `<artifact>.part`. The finished file is
/// synced and then renamed over the canonical path, so readers see either
/// the previous complete artifact or the new complete one.
pub fn publish(
    store: &Store,
    category: Category,
    metric: &str,
    collection: &FeatureCollection,
) -> Result<PublishedArtifact, EtlError> {
    let key = ArtifactKey::new(category, metric)?;
    store.ensure_category_dir(category)?;
    let path = store.artifact_path(&key);
    let part = store.artifact_part_path(&key);

    if remove_if_exists(&part)? {
        info!(path = %part, "cleaned up previously incomplete file");
    }

    debug!(path = %path, "writing artifact");
    let file = File::create(part.as_std_path()).map_err(|err| fs_err("create", &part, err))?;
    let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    serde_json::to_writer(&mut encoder, collection)
        .map_err(|err| EtlError::Filesystem(format!("write {part}: {err}")))?;
    let mut writer = encoder
        .finish()
        .map_err(|err| fs_err("compress", &part, err))?;
    writer.flush().map_err(|err| fs_err("flush", &part, err))?;
    let file = writer
        .into_inner()
        .map_err(|err| fs_err("flush", &part, err.into_error()))?;
    file.sync_all().map_err(|err| fs_err("sync", &part, err))?;
    let bytes = file
        .metadata()
        .map_err(|err| fs_err("stat", &part, err))?
        .len();
    drop(file);

    fs::rename(part.as_std_path(), path.as_std_path())
        .map_err(|err| fs_err("rename", &part, err))?;
    info!(%key, bytes, path = %path, "artifact published");

    Ok(PublishedArtifact {
        key: key.to_string(),
        path: path.to_string(),
        bytes,
    })
}
