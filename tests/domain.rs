use assert_matches::assert_matches;
use serde_json::json;

use covidmap_etl::domain::{ApiErrorResponse, ArtifactKey, Category, RegionCode, registry};
use covidmap_etl::error::EtlError;

#[test]
fn registry_order_and_size() {
    let keys: Vec<String> = registry().iter().map(ToString::to_string).collect();
    assert_eq!(keys.len(), 9 + 15 + 2);
    assert_eq!(keys[0], "metrics.testPositivityRatio");
    assert_eq!(keys[9], "actuals.cases");
    assert_eq!(keys[24], "riskLevels.overall");
    assert_eq!(keys[25], "riskLevels.caseDensity");
}

#[test]
fn metric_names_are_category_scoped() {
    // caseDensity exists in both metrics and riskLevels.
    let metrics = ArtifactKey::new(Category::Metrics, "caseDensity").unwrap();
    let risk = ArtifactKey::new(Category::RiskLevels, "caseDensity").unwrap();
    assert_ne!(metrics, risk);
    assert_eq!(metrics.property_key(), "metrics.caseDensity");
    assert_eq!(risk.property_key(), "riskLevels.caseDensity");

    assert_matches!(
        ArtifactKey::new(Category::RiskLevels, "cases"),
        Err(EtlError::InvalidMetric { category, metric })
            if category == "riskLevels" && metric == "cases"
    );
}

#[test]
fn parse_slug() {
    let key: ArtifactKey = "actuals.newCases".parse().unwrap();
    assert_eq!(key.category(), Category::Actuals);
    assert_eq!(key.metric(), "newCases");
    assert_eq!(key.file_name(), "newCases.json.gz");
    assert_eq!(
        key.content_headers(),
        [
            ("content-encoding", "gzip"),
            ("content-type", "application/json")
        ]
    );

    assert_matches!(
        "Actuals.cases".parse::<ArtifactKey>(),
        Err(EtlError::InvalidCategory(_))
    );
    assert_matches!(
        "cases".parse::<ArtifactKey>(),
        Err(EtlError::InvalidMetric { .. })
    );
}

#[test]
fn region_code_length() {
    let code = RegionCode::from_parts("06", "037").unwrap();
    assert_eq!(code.as_str(), "06037");
    assert_matches!(
        RegionCode::from_parts("6", "037"),
        Err(EtlError::InvalidRegionCode(_))
    );
    assert_matches!(
        "060370".parse::<RegionCode>(),
        Err(EtlError::InvalidRegionCode(_))
    );
}

#[test]
fn invalid_metric_error_body() {
    let body = serde_json::to_value(ApiErrorResponse::invalid_metric("actuals.nope")).unwrap();
    assert_eq!(
        body,
        json!({
            "type": "invalid_request",
            "code": "invalid_metric",
            "message": "No such metric actuals.nope"
        })
    );
}
