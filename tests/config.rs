use std::fs;
use std::time::Duration;

use assert_matches::assert_matches;

use covidmap_etl::config::{Config, ConfigLoader, resolve_jobs};
use covidmap_etl::error::EtlError;

#[test]
fn parse_config_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("covidmap.json");
    fs::write(
        &path,
        r#"{
            "schema_version": 1,
            "cache_dir": "/var/cache/covidmap",
            "geometry_path": "geo/counties.geojson",
            "output_dir": "dist/data",
            "api_base_url": "http://localhost:8080/v2",
            "fetch_timeout_secs": 60,
            "jobs": 3
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();
    assert_eq!(resolved.cache_dir.as_str(), "/var/cache/covidmap");
    assert_eq!(resolved.geometry_path.as_str(), "geo/counties.geojson");
    assert_eq!(resolved.output_dir.as_str(), "dist/data");
    assert_eq!(resolved.api_base_url, "http://localhost:8080/v2");
    assert_eq!(resolved.fetch_timeout, Some(Duration::from_secs(60)));
    assert_eq!(resolved.jobs, 3);
}

#[test]
fn explicit_missing_file_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("absent.json");
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(EtlError::ConfigRead(missing)) if missing == path
    );
}

#[test]
fn malformed_json_is_a_parse_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("covidmap.json");
    fs::write(&path, "{ \"jobs\": ").unwrap();
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(EtlError::ConfigParse(_))
    );
}

#[test]
fn unsupported_schema_version() {
    let config = Config {
        schema_version: Some(2),
        ..Config::default()
    };
    assert_matches!(
        ConfigLoader::resolve_config(config),
        Err(EtlError::ConfigParse(_))
    );
}

#[test]
fn zero_jobs_uses_available_cores() {
    assert!(resolve_jobs(0) >= 1);
    assert_eq!(resolve_jobs(5), 5);
}
