use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use geojson::FeatureCollection;
use serde_json::{Map, Number, Value};
use tracing::debug;

use crate::app::{ProgressEvent, ProgressSink};
use crate::domain::{ArtifactKey, Category, RegionCode};
use crate::error::EtlError;
use crate::geometry::{feature_name, region_code};
use crate::record::{Observation, RawRegionRecord};

/// Region code to record lookup. Later records replace earlier ones that
/// share a code.
#[derive(Debug, Default)]
pub struct RecordIndex<'a> {
    by_code: HashMap<&'a str, &'a RawRegionRecord>,
}

impl<'a> RecordIndex<'a> {
    pub fn new(records: &'a [RawRegionRecord]) -> Self {
        let mut by_code = HashMap::with_capacity(records.len());
        for record in records {
            by_code.insert(record.fips.as_str(), record);
        }
        Self { by_code }
    }

    pub fn get(&self, code: &RegionCode) -> Option<&'a RawRegionRecord> {
        self.by_code.get(code.as_str()).copied()
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }
}

/// One region's series for one metric: date to value, plus the extremes of
/// the numeric values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricSeriesView {
    pub values: BTreeMap<String, Value>,
    pub min: Option<Number>,
    pub max: Option<Number>,
}

impl MetricSeriesView {
    pub fn from_observations(observations: &[Observation], metric: &str) -> Self {
        let mut values = BTreeMap::new();
        for observation in observations {
            let date = observation.date.format("%Y-%m-%d").to_string();
            match observation.value(metric) {
                Some(Value::Null) | None => {
                    values.remove(&date);
                }
                Some(value) => {
                    values.insert(date, value.clone());
                }
            }
        }

        let mut min: Option<&Number> = None;
        let mut max: Option<&Number> = None;
        for number in values.values().filter_map(|value| match value {
            Value::Number(number) => Some(number),
            _ => None,
        }) {
            if min.is_none_or(|current| compare(number, current) == Ordering::Less) {
                min = Some(number);
            }
            if max.is_none_or(|current| compare(number, current) == Ordering::Greater) {
                max = Some(number);
            }
        }

        Self {
            min: min.cloned(),
            max: max.cloned(),
            values,
        }
    }

    pub fn into_value(self) -> Value {
        let mut object: Map<String, Value> = self.values.into_iter().collect();
        if let Some(min) = self.min {
            object.insert("min".to_string(), Value::Number(min));
        }
        if let Some(max) = self.max {
            object.insert("max".to_string(), Value::Number(max));
        }
        Value::Object(object)
    }
}

fn compare(a: &Number, b: &Number) -> Ordering {
    match (a.as_i64(), b.as_i64()) {
        (Some(a), Some(b)) => a.cmp(&b),
        _ => {
            let a = a.as_f64().unwrap_or(f64::NAN);
            let b = b.as_f64().unwrap_or(f64::NAN);
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
    }
}

/// A projected copy of the geometry template for one artifact.
#[derive(Debug, Clone)]
pub struct Projection {
    pub key: ArtifactKey,
    pub collection: FeatureCollection,
    pub matched: usize,
}

/// Joins one metric's timeseries onto a fresh copy of `template`.
///
/// Features with no record keep their properties untouched. A feature whose
/// `STATE`/`COUNTY` do not form a 5-character code aborts the projection.
pub fn project(
    category: Category,
    metric: &str,
    index: &RecordIndex<'_>,
    template: &FeatureCollection,
    sink: &dyn ProgressSink,
) -> Result<Projection, EtlError> {
    let key = ArtifactKey::new(category, metric)?;
    let property_key = key.property_key();
    let mut collection = template.clone();
    let total = collection.features.len();
    debug!(%key, features = total, records = index.len(), "mapping timeseries");

    let mut matched = 0usize;
    for (position, feature) in collection.features.iter_mut().enumerate() {
        let code = region_code(feature, position)?;
        let record = index.get(&code);
        if let Some(record) = record {
            let view =
                MetricSeriesView::from_observations(record.timeseries(category), key.metric());
            feature.set_property(property_key.clone(), view.into_value());
            matched += 1;
        }
        sink.event(ProgressEvent::Feature {
            key,
            index: position,
            total,
            name: feature_name(feature).map(str::to_string),
            matched: record.is_some(),
        });
    }

    Ok(Projection {
        key,
        collection,
        matched,
    })
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde_json::json;

    use super::*;

    fn observation(date: &str, fields: Value) -> Observation {
        Observation {
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            values: fields.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn nulls_are_dropped_and_extremes_ignore_them() {
        let observations = vec![
            observation("2021-01-01", json!({"cases": 100})),
            observation("2021-01-02", json!({"cases": null})),
            observation("2021-01-03", json!({"cases": 40})),
            observation("2021-01-04", json!({})),
        ];
        let view = MetricSeriesView::from_observations(&observations, "cases");
        assert_eq!(
            view.into_value(),
            json!({"2021-01-01": 100, "2021-01-03": 40, "min": 40, "max": 100})
        );
    }

    #[test]
    fn all_null_series_has_no_extremes() {
        let observations = vec![
            observation("2021-01-01", json!({"cases": null})),
            observation("2021-01-02", json!({"cases": null})),
        ];
        let view = MetricSeriesView::from_observations(&observations, "cases");
        assert_eq!(view.min, None);
        assert_eq!(view.max, None);
        assert_eq!(view.into_value(), json!({}));
    }

    #[test]
    fn last_observation_wins_on_duplicate_dates() {
        let observations = vec![
            observation("2021-01-01", json!({"overall": 1})),
            observation("2021-01-01", json!({"overall": 3})),
        ];
        let view = MetricSeriesView::from_observations(&observations, "overall");
        assert_eq!(view.values["2021-01-01"], json!(3));
        assert_eq!(view.min, Some(Number::from(3)));
    }

    #[test]
    fn trailing_null_clears_duplicate_date() {
        let observations = vec![
            observation("2021-01-01", json!({"cases": 5})),
            observation("2021-01-01", json!({"cases": null})),
        ];
        let view = MetricSeriesView::from_observations(&observations, "cases");
        assert!(view.values.is_empty());
        assert_eq!(view.max, None);
    }

    #[test]
    fn mixed_integer_and_float_extremes() {
        let observations = vec![
            observation("2021-01-01", json!({"infectionRate": 1})),
            observation("2021-01-02", json!({"infectionRate": 0.85})),
            observation("2021-01-03", json!({"infectionRate": 1.2})),
        ];
        let view = MetricSeriesView::from_observations(&observations, "infectionRate");
        assert_eq!(view.min.unwrap().as_f64(), Some(0.85));
        assert_eq!(view.max.unwrap().as_f64(), Some(1.2));
    }

    #[test]
    fn non_numeric_values_pass_through_without_extremes() {
        let observations = vec![observation(
            "2021-02-01",
            json!({"vaccinesAdministeredDemographics": {"age": {"18-64": 10}}}),
        )];
        let view =
            MetricSeriesView::from_observations(&observations, "vaccinesAdministeredDemographics");
        assert_eq!(
            view.into_value(),
            json!({"2021-02-01": {"age": {"18-64": 10}}})
        );
    }

    #[test]
    fn index_keeps_last_duplicate() {
        let records = vec![
            RawRegionRecord {
                fips: "06037".to_string(),
                metrics_timeseries: Vec::new(),
                actuals_timeseries: Vec::new(),
                risk_levels_timeseries: Vec::new(),
            },
            RawRegionRecord {
                fips: "06037".to_string(),
                metrics_timeseries: Vec::new(),
                actuals_timeseries: vec![observation("2021-01-01", json!({"cases": 1}))],
                risk_levels_timeseries: Vec::new(),
            },
        ];
        let index = RecordIndex::new(&records);
        assert_eq!(index.len(), 1);
        let code: RegionCode = "06037".parse().unwrap();
        assert_eq!(index.get(&code).unwrap().actuals_timeseries.len(), 1);
    }
}
