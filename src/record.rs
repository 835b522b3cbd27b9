use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::domain::Category;

/// One dated row of a category timeseries. Every field other than `date`
/// is kept as-is, since the set differs per category.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Observation {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub values: Map<String, Value>,
}

impl Observation {
    pub fn value(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }
}

/// One element of the upstream `counties.timeseries.json` array. Summary
/// fields the projection never reads are skipped while decoding.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRegionRecord {
    pub fips: String,
    #[serde(default)]
    pub metrics_timeseries: Vec<Observation>,
    #[serde(default)]
    pub actuals_timeseries: Vec<Observation>,
    #[serde(default)]
    pub risk_levels_timeseries: Vec<Observation>,
}

impl RawRegionRecord {
    pub fn timeseries(&self, category: Category) -> &[Observation] {
        match category {
            Category::Metrics => &self.metrics_timeseries,
            Category::Actuals => &self.actuals_timeseries,
            Category::RiskLevels => &self.risk_levels_timeseries,
        }
    }
}
