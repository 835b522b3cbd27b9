use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{ArtifactKey, Category, registry};
use crate::error::{EtlError, fs_err};

pub const PAYLOAD_FILE: &str = "counties.timeseries.json";
pub const LAST_FETCHED_FILE: &str = "lastFetched.txt";
pub const PART_SUFFIX: &str = "part";

/// On-disk layout of the fetch cache and the published artifact tree.
#[derive(Debug, Clone)]
pub struct Store {
    cache_root: Utf8PathBuf,
    output_root: Utf8PathBuf,
}

/// What the cache directory holds right now, as seen by the staleness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheState {
    pub payload_present: bool,
    pub last_fetched: Option<LastFetched>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LastFetched {
    At(DateTime<Utc>),
    Unreadable(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct PublishedArtifact {
    pub key: String,
    pub path: String,
    pub bytes: u64,
}

impl Store {
    pub fn new(cache_root: Utf8PathBuf, output_root: Utf8PathBuf) -> Self {
        Self {
            cache_root,
            output_root,
        }
    }

    pub fn cache_root(&self) -> &Utf8Path {
        &self.cache_root
    }

    pub fn output_root(&self) -> &Utf8Path {
        &self.output_root
    }

    pub fn payload_path(&self) -> Utf8PathBuf {
        self.cache_root.join(PAYLOAD_FILE)
    }

    pub fn payload_part_path(&self) -> Utf8PathBuf {
        part_path(&self.payload_path())
    }

    pub fn last_fetched_path(&self) -> Utf8PathBuf {
        self.cache_root.join(LAST_FETCHED_FILE)
    }

    pub fn category_dir(&self, category: Category) -> Utf8PathBuf {
        self.output_root.join(category.as_str())
    }

    pub fn artifact_path(&self, key: &ArtifactKey) -> Utf8PathBuf {
        self.category_dir(key.category()).join(key.file_name())
    }

    pub fn artifact_part_path(&self, key: &ArtifactKey) -> Utf8PathBuf {
        part_path(&self.artifact_path(key))
    }

    pub fn ensure_cache_root(&self) -> Result<(), EtlError> {
        ensure_dir(&self.cache_root)
    }

    pub fn ensure_category_dir(&self, category: Category) -> Result<Utf8PathBuf, EtlError> {
        let dir = self.category_dir(category);
        ensure_dir(&dir)?;
        Ok(dir)
    }

    pub fn cache_state(&self) -> Result<CacheState, EtlError> {
        let payload_present = self.payload_path().as_std_path().is_file();
        let path = self.last_fetched_path();
        let last_fetched = match fs::read_to_string(path.as_std_path()) {
            Ok(content) => Some(parse_last_fetched(&content)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => None,
            Err(err) => return Err(fs_err("read", &path, err)),
        };
        Ok(CacheState {
            payload_present,
            last_fetched,
        })
    }

    pub fn write_last_fetched(&self, at: DateTime<Utc>) -> Result<(), EtlError> {
        Self::write_bytes_atomic(&self.last_fetched_path(), at.to_rfc3339().as_bytes())
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), EtlError> {
        if let Some(parent) = path.parent() {
            ensure_dir(parent)?;
        }
        let tmp_path = part_path(path);
        fs::write(tmp_path.as_std_path(), content).map_err(|err| fs_err("write", &tmp_path, err))?;
        fs::rename(tmp_path.as_std_path(), path.as_std_path())
            .map_err(|err| fs_err("rename", &tmp_path, err))?;
        Ok(())
    }

    /// Deletes leftover `.part` files in the cache root and every category
    /// directory. Returns the removed paths.
    pub fn sweep_partials(&self) -> Result<Vec<Utf8PathBuf>, EtlError> {
        let mut dirs = vec![self.cache_root.clone()];
        dirs.extend(Category::ALL.into_iter().map(|c| self.category_dir(c)));

        let mut removed = Vec::new();
        for dir in dirs {
            let entries = match fs::read_dir(dir.as_std_path()) {
                Ok(entries) => entries,
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(fs_err("scan", &dir, err)),
            };
            for entry in entries {
                let entry = entry.map_err(|err| fs_err("scan", &dir, err))?;
                let Ok(path) = Utf8PathBuf::from_path_buf(entry.path()) else {
                    continue;
                };
                if path.extension() == Some(PART_SUFFIX) && path.as_std_path().is_file() {
                    remove_if_exists(&path)?;
                    removed.push(path);
                }
            }
        }
        Ok(removed)
    }

    /// Maps a `category.metric` slug to its published file.
    pub fn resolve_artifact(&self, slug: &str) -> Result<Utf8PathBuf, EtlError> {
        let key: ArtifactKey = slug.parse()?;
        let path = self.artifact_path(&key);
        if !path.as_std_path().is_file() {
            return Err(EtlError::ArtifactNotFound(key.to_string()));
        }
        Ok(path)
    }

    pub fn list_artifacts(&self) -> Result<Vec<PublishedArtifact>, EtlError> {
        let mut items = Vec::new();
        for key in registry() {
            let path = self.artifact_path(&key);
            match fs::metadata(path.as_std_path()) {
                Ok(meta) if meta.is_file() => items.push(PublishedArtifact {
                    key: key.to_string(),
                    path: path.to_string(),
                    bytes: meta.len(),
                }),
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(fs_err("stat", &path, err)),
            }
        }
        Ok(items)
    }
}

pub fn part_path(path: &Utf8Path) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{path}.{PART_SUFFIX}"))
}

pub fn ensure_dir(path: &Utf8Path) -> Result<(), EtlError> {
    fs::create_dir_all(path.as_std_path()).map_err(|err| fs_err("create directory", path, err))
}

/// Removes `path`; a file that is already gone counts as removed.
pub fn remove_if_exists(path: &Utf8Path) -> Result<bool, EtlError> {
    match fs::remove_file(path.as_std_path()) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(fs_err("remove", path, err)),
    }
}

fn parse_last_fetched(content: &str) -> LastFetched {
    let trimmed = content.trim();
    match DateTime::parse_from_rfc3339(trimmed) {
        Ok(at) => LastFetched::At(at.with_timezone(&Utc)),
        Err(_) => LastFetched::Unreadable(trimmed.to_string()),
    }
}
