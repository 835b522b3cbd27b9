use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::EtlError;
use crate::fetch::{API_KEY_ENV, DEFAULT_BASE_URL};

pub const CONFIG_FILE: &str = "covidmap.json";
pub const DEFAULT_CACHE_DIR: &str = "../data";
pub const DEFAULT_GEOMETRY_PATH: &str = "static/counties.geojson";
pub const DEFAULT_OUTPUT_DIR: &str = "../web/public/data";
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30 * 60;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub cache_dir: Option<String>,
    #[serde(default)]
    pub geometry_path: Option<String>,
    #[serde(default)]
    pub output_dir: Option<String>,
    #[serde(default)]
    pub api_base_url: Option<String>,
    /// Deadline for the whole payload download. `0` disables it.
    #[serde(default)]
    pub fetch_timeout_secs: Option<u64>,
    /// `0` means one worker per available core.
    #[serde(default)]
    pub jobs: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub cache_dir: Utf8PathBuf,
    pub geometry_path: Utf8PathBuf,
    pub output_dir: Utf8PathBuf,
    pub api_base_url: String,
    pub fetch_timeout: Option<Duration>,
    pub jobs: usize,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or `covidmap.json` from the working directory when no
    /// path is given. Only an explicitly named file has to exist.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, EtlError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| EtlError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| EtlError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, EtlError> {
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(EtlError::ConfigParse(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let api_base_url = config
            .api_base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        if !api_base_url.starts_with("http://") && !api_base_url.starts_with("https://") {
            return Err(EtlError::ConfigParse(format!(
                "api_base_url must be an http(s) URL, got {api_base_url}"
            )));
        }

        let fetch_timeout = match config.fetch_timeout_secs.unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Ok(ResolvedConfig {
            schema_version,
            cache_dir: path_or(config.cache_dir, DEFAULT_CACHE_DIR),
            geometry_path: path_or(config.geometry_path, DEFAULT_GEOMETRY_PATH),
            output_dir: path_or(config.output_dir, DEFAULT_OUTPUT_DIR),
            api_base_url,
            fetch_timeout,
            jobs: resolve_jobs(config.jobs.unwrap_or(1)),
        })
    }

    /// The CovidActNow API key. Kept out of `ResolvedConfig` so it never
    /// shows up in debug output.
    pub fn api_key_from_env() -> Option<String> {
        std::env::var(API_KEY_ENV)
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
    }
}

pub fn resolve_jobs(jobs: usize) -> usize {
    if jobs > 0 {
        return jobs;
    }
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn path_or(value: Option<String>, default: &str) -> Utf8PathBuf {
    Utf8PathBuf::from(value.unwrap_or_else(|| default.to_string()))
}
