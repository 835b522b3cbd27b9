use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EtlError;

pub const METRICS_FIELDS: &[&str] = &[
    "testPositivityRatio",
    "caseDensity",
    "contactTracerCapacityRatio",
    "infectionRate",
    "infectionRateCI90",
    "icuHeadroomRatio",
    "icuCapacityRatio",
    "vaccinationsInitiatedRatio",
    "vaccinationsCompletedRatio",
];

pub const ACTUALS_FIELDS: &[&str] = &[
    "cases",
    "deaths",
    "positiveTests",
    "negativeTests",
    "contactTracers",
    "hospitalBeds",
    "icuBeds",
    "newCases",
    "newDeaths",
    "vaccinesDistributed",
    "vaccinationsInitiated",
    "vaccinationsCompleted",
    "vaccinesAdministered",
    "vaccinesAdministeredDemographics",
    "vaccinationsInitiatedDemographics",
];

pub const RISK_LEVELS_FIELDS: &[&str] = &["overall", "caseDensity"];

/// Top-level metric family of the upstream payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Category {
    Metrics,
    Actuals,
    RiskLevels,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Metrics, Category::Actuals, Category::RiskLevels];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Metrics => "metrics",
            Category::Actuals => "actuals",
            Category::RiskLevels => "riskLevels",
        }
    }

    pub fn fields(self) -> &'static [&'static str] {
        match self {
            Category::Metrics => METRICS_FIELDS,
            Category::Actuals => ACTUALS_FIELDS,
            Category::RiskLevels => RISK_LEVELS_FIELDS,
        }
    }

    /// Returns the registry's own copy of `metric`, or `InvalidMetric`.
    pub fn validate_metric(self, metric: &str) -> Result<&'static str, EtlError> {
        self.fields()
            .iter()
            .copied()
            .find(|field| *field == metric)
            .ok_or_else(|| EtlError::InvalidMetric {
                category: self.as_str().to_string(),
                metric: metric.to_string(),
            })
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Category {
    type Err = EtlError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|category| category.as_str() == value.trim())
            .ok_or_else(|| EtlError::InvalidCategory(value.to_string()))
    }
}

/// A registry-declared (category, metric) pair. Identifies one artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    category: Category,
    metric: &'static str,
}

impl ArtifactKey {
    pub const CONTENT_ENCODING: &'static str = "gzip";
    pub const CONTENT_TYPE: &'static str = "application/json";

    pub fn new(category: Category, metric: &str) -> Result<Self, EtlError> {
        let metric = category.validate_metric(metric)?;
        Ok(Self { category, metric })
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn metric(&self) -> &'static str {
        self.metric
    }

    /// Feature property under which the series view is attached.
    pub fn property_key(&self) -> String {
        format!("{}.{}", self.category.as_str(), self.metric)
    }

    pub fn file_name(&self) -> String {
        format!("{}.json.gz", self.metric)
    }

    /// Response headers a file server must send alongside the artifact bytes.
    pub fn content_headers(&self) -> [(&'static str, &'static str); 2] {
        [
            ("content-encoding", Self::CONTENT_ENCODING),
            ("content-type", Self::CONTENT_TYPE),
        ]
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.category, self.metric)
    }
}

impl FromStr for ArtifactKey {
    type Err = EtlError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (category, metric) = value.trim().split_once('.').ok_or_else(|| {
            EtlError::InvalidMetric {
                category: String::new(),
                metric: value.to_string(),
            }
        })?;
        ArtifactKey::new(category.parse()?, metric)
    }
}

/// Every (category, metric) pair, in registry order.
pub fn registry() -> Vec<ArtifactKey> {
    Category::ALL
        .into_iter()
        .flat_map(|category| {
            category
                .fields()
                .iter()
                .map(move |metric| ArtifactKey { category, metric })
        })
        .collect()
}

/// Five-character county code: two-character state plus three-character county.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegionCode(String);

impl RegionCode {
    pub fn from_parts(state: &str, county: &str) -> Result<Self, EtlError> {
        format!("{state}{county}").parse()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RegionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RegionCode {
    type Err = EtlError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.chars().count() != 5 {
            return Err(EtlError::InvalidRegionCode(value.to_string()));
        }
        Ok(Self(value.to_string()))
    }
}

/// Error body a serving layer returns when a slug has no artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    #[serde(rename = "type")]
    pub kind: String,
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
}

impl ApiErrorResponse {
    pub fn invalid_metric(slug: &str) -> Self {
        Self {
            kind: "invalid_request".to_string(),
            code: "invalid_metric".to_string(),
            message: format!("No such metric {slug}"),
            param: None,
        }
    }
}
