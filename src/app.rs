use camino::Utf8PathBuf;
use chrono::{DateTime, Local, TimeZone};
use geojson::FeatureCollection;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::domain::{ArtifactKey, registry};
use crate::error::EtlError;
use crate::fetch::{FetchOutcome, PayloadClient, ensure_fresh_payload};
use crate::geometry::load_base_geometry;
use crate::parser::parse_payload;
use crate::project::{RecordIndex, project};
use crate::publish::publish;
use crate::store::{PublishedArtifact, Store, ensure_dir};

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub geometry_path: Utf8PathBuf,
    /// Worker threads for project+publish. `1` runs the registry in order on
    /// the calling thread.
    pub jobs: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub fetch: FetchOutcome,
    pub swept: Vec<String>,
    pub records: usize,
    pub features: usize,
    pub artifacts: Vec<ArtifactReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArtifactReport {
    pub key: String,
    pub path: String,
    pub bytes: u64,
    pub matched: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub artifacts: Vec<PublishedArtifact>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolveResult {
    pub key: String,
    pub path: String,
    pub content_encoding: &'static str,
    pub content_type: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Prepare,
    Fetch,
    Parse,
    Geometry,
    Project,
    Publish,
}

impl Phase {
    pub fn label(self) -> &'static str {
        match self {
            Phase::Prepare => "prereq",
            Phase::Fetch => "fetch",
            Phase::Parse => "parse",
            Phase::Geometry => "geometry",
            Phase::Project => "map",
            Phase::Publish => "build",
        }
    }
}

#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Phase {
        phase: Phase,
        message: String,
    },
    Downloaded {
        bytes: u64,
        total: Option<u64>,
    },
    Parsed {
        records: usize,
    },
    Feature {
        key: ArtifactKey,
        index: usize,
        total: usize,
        name: Option<String>,
        matched: bool,
    },
    Published {
        key: ArtifactKey,
        path: String,
        bytes: u64,
    },
}

/// Receives operator feedback. Sinks are shared across projection workers,
/// hence `Sync`.
pub trait ProgressSink: Sync {
    fn event(&self, event: ProgressEvent);
}

#[derive(Clone)]
pub struct App<C: PayloadClient> {
    store: Store,
    client: C,
}

impl<C: PayloadClient> App<C> {
    pub fn new(store: Store, client: C) -> Self {
        Self { store, client }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn build(
        &self,
        options: &BuildOptions,
        sink: &dyn ProgressSink,
    ) -> Result<BuildReport, EtlError> {
        self.build_at(options, &Local::now(), sink)
    }

    /// Full rebuild: fetch if stale, parse, then project and publish every
    /// registry pair. The first error aborts the run.
    pub fn build_at<Tz: TimeZone>(
        &self,
        options: &BuildOptions,
        now: &DateTime<Tz>,
        sink: &dyn ProgressSink,
    ) -> Result<BuildReport, EtlError> {
        sink.event(ProgressEvent::Phase {
            phase: Phase::Prepare,
            message: format!("output path: {}", self.store.output_root()),
        });
        let swept = self
            .store
            .sweep_partials()
            .map_err(|err| err.in_stage("cleanup", "stale partial files"))?;
        for path in &swept {
            info!(%path, "deleted stale partial file");
        }
        ensure_dir(self.store.output_root())
            .map_err(|err| err.in_stage("prepare", "output directory"))?;

        let fetch = ensure_fresh_payload(&self.store, &self.client, now, sink)
            .map_err(|err| err.in_stage("fetch", "timeseries payload"))?;

        let records = parse_payload(&self.store.payload_path(), sink)
            .map_err(|err| err.in_stage("parse", "timeseries payload"))?;
        let index = RecordIndex::new(&records);
        if index.is_empty() {
            warn!("timeseries payload holds no records; every feature stays unmatched");
        }

        sink.event(ProgressEvent::Phase {
            phase: Phase::Geometry,
            message: format!("loading {}", options.geometry_path),
        });
        let template = load_base_geometry(&options.geometry_path)
            .map_err(|err| err.in_stage("load geometry", options.geometry_path.as_str()))?;

        let keys = registry();
        let run_one = |key: &ArtifactKey| self.project_and_publish(*key, &index, &template, sink);
        let artifacts = if options.jobs <= 1 {
            keys.iter().map(run_one).collect::<Result<Vec<_>, _>>()?
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(options.jobs)
                .build()
                .map_err(|err| EtlError::WorkerPool(err.to_string()))?;
            info!(threads = options.jobs, "projecting metrics in parallel");
            pool.install(|| {
                keys.par_iter()
                    .map(run_one)
                    .collect::<Result<Vec<_>, _>>()
            })?
        };

        info!(artifacts = artifacts.len(), "build complete");
        Ok(BuildReport {
            fetch,
            swept: swept.into_iter().map(|path| path.to_string()).collect(),
            records: records.len(),
            features: template.features.len(),
            artifacts,
        })
    }

    fn project_and_publish(
        &self,
        key: ArtifactKey,
        index: &RecordIndex<'_>,
        template: &FeatureCollection,
        sink: &dyn ProgressSink,
    ) -> Result<ArtifactReport, EtlError> {
        sink.event(ProgressEvent::Phase {
            phase: Phase::Project,
            message: format!(
                "mapping timeseries for {key} with {} counties",
                template.features.len()
            ),
        });
        let projection = project(key.category(), key.metric(), index, template, sink)
            .map_err(|err| err.in_stage("project", key.to_string()))?;

        sink.event(ProgressEvent::Phase {
            phase: Phase::Publish,
            message: format!("writing file to {}", self.store.artifact_path(&key)),
        });
        let published = publish(
            &self.store,
            key.category(),
            key.metric(),
            &projection.collection,
        )
        .map_err(|err| err.in_stage("publish", key.to_string()))?;
        sink.event(ProgressEvent::Published {
            key,
            path: published.path.clone(),
            bytes: published.bytes,
        });

        Ok(ArtifactReport {
            key: published.key,
            path: published.path,
            bytes: published.bytes,
            matched: projection.matched,
        })
    }

    pub fn list(&self) -> Result<ListResult, EtlError> {
        Ok(ListResult {
            artifacts: self.store.list_artifacts()?,
        })
    }

    pub fn resolve(&self, slug: &str) -> Result<ResolveResult, EtlError> {
        let key: ArtifactKey = slug.parse()?;
        let path = self.store.resolve_artifact(slug)?;
        Ok(ResolveResult {
            key: key.to_string(),
            path: path.to_string(),
            content_encoding: ArtifactKey::CONTENT_ENCODING,
            content_type: ArtifactKey::CONTENT_TYPE,
        })
    }
}
