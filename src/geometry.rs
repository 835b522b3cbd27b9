use std::fs;
use std::sync::Arc;

use camino::Utf8Path;
use geojson::{Feature, FeatureCollection, GeoJson};
use serde_json::Value;
use tracing::info;

use crate::domain::RegionCode;
use crate::error::{EtlError, fs_err};

pub const STATE_PROPERTY: &str = "STATE";
pub const COUNTY_PROPERTY: &str = "COUNTY";
pub const NAME_PROPERTY: &str = "NAME";

/// Reads the county boundary file. The returned collection is the shared
/// template for every projection in this run and is never mutated.
pub fn load_base_geometry(path: &Utf8Path) -> Result<Arc<FeatureCollection>, EtlError> {
    let content =
        fs::read_to_string(path.as_std_path()).map_err(|err| fs_err("read", path, err))?;
    let geojson: GeoJson = content
        .parse()
        .map_err(|err: geojson::Error| EtlError::Parse(format!("{path}: {err}")))?;
    match geojson {
        GeoJson::FeatureCollection(collection) => {
            info!(features = collection.features.len(), %path, "base geometry loaded");
            Ok(Arc::new(collection))
        }
        _ => Err(EtlError::Parse(format!(
            "{path}: expected a GeoJSON FeatureCollection"
        ))),
    }
}

/// Builds the 5-character region code from the feature's `STATE` and
/// `COUNTY` properties.
pub fn region_code(feature: &Feature, index: usize) -> Result<RegionCode, EtlError> {
    let properties = feature.properties.as_ref().ok_or_else(|| {
        EtlError::InvalidFeature(format!("feature {index} has no properties"))
    })?;
    let state = string_property(properties.get(STATE_PROPERTY), STATE_PROPERTY, index)?;
    let county = string_property(properties.get(COUNTY_PROPERTY), COUNTY_PROPERTY, index)?;
    RegionCode::from_parts(state, county).map_err(|_| {
        EtlError::InvalidFeature(format!(
            "feature {index}: expected 2-digit {STATE_PROPERTY} and 3-digit {COUNTY_PROPERTY} \
             to form a 5-digit FIPS, got {state:?} + {county:?}"
        ))
    })
}

pub fn feature_name(feature: &Feature) -> Option<&str> {
    feature
        .properties
        .as_ref()
        .and_then(|props| props.get(NAME_PROPERTY))
        .and_then(Value::as_str)
}

fn string_property<'a>(
    value: Option<&'a Value>,
    name: &str,
    index: usize,
) -> Result<&'a str, EtlError> {
    match value {
        Some(Value::String(value)) => Ok(value.as_str()),
        Some(other) => Err(EtlError::InvalidFeature(format!(
            "feature {index}: {name} must be a string, got {other}"
        ))),
        None => Err(EtlError::InvalidFeature(format!(
            "feature {index} is missing {name}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn feature(properties: Value) -> Feature {
        let mut feature = Feature::default();
        feature.properties = properties.as_object().cloned();
        feature
    }

    #[test]
    fn builds_region_code_from_state_and_county() {
        let f = feature(json!({"STATE": "06", "COUNTY": "037", "NAME": "Los Angeles"}));
        assert_eq!(region_code(&f, 0).unwrap().as_str(), "06037");
        assert_eq!(feature_name(&f), Some("Los Angeles"));
    }

    #[test]
    fn rejects_wrong_length_codes() {
        let f = feature(json!({"STATE": "006", "COUNTY": "037"}));
        assert_matches!(region_code(&f, 4), Err(EtlError::InvalidFeature(msg)) if msg.starts_with("feature 4"));
    }

    #[test]
    fn rejects_missing_or_numeric_properties() {
        assert_matches!(
            region_code(&Feature::default(), 0),
            Err(EtlError::InvalidFeature(_))
        );
        let f = feature(json!({"STATE": 6, "COUNTY": "037"}));
        assert_matches!(region_code(&f, 0), Err(EtlError::InvalidFeature(_)));
        let f = feature(json!({"STATE": "06"}));
        assert_matches!(region_code(&f, 0), Err(EtlError::InvalidFeature(_)));
    }

    #[test]
    fn load_rejects_non_collection() {
        let dir = tempfile::tempdir().unwrap();
        let path = camino::Utf8PathBuf::from_path_buf(dir.path().join("point.geojson")).unwrap();
        fs::write(&path, r#"{"type": "Point", "coordinates": [1.0, 2.0]}"#).unwrap();
        assert_matches!(load_base_geometry(&path), Err(EtlError::Parse(_)));
    }
}
