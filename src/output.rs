use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::{debug, info, trace};

use crate::app::{BuildReport, ListResult, ProgressEvent, ProgressSink, ResolveResult};

const DOWNLOAD_LOG_STEP: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Human,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_build(result: &BuildReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_list(result: &ListResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_resolve(result: &ResolveResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Turns progress events into log lines. Per-feature events only show up at
/// trace level.
#[derive(Default)]
pub struct LogSink {
    last_download_step: AtomicU64,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressSink for LogSink {
    fn event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Phase { phase, message } => {
                info!(phase = phase.label(), "{message}");
            }
            ProgressEvent::Downloaded { bytes, total } => {
                let step = bytes / DOWNLOAD_LOG_STEP;
                let previous = self.last_download_step.fetch_max(step, Ordering::Relaxed);
                if step > previous {
                    let mb = bytes as f64 / 1_048_576.0;
                    match total {
                        Some(total) if total > 0 => {
                            let pct = bytes as f64 / total as f64 * 100.0;
                            info!("downloaded {mb:.0} MB ({pct:.0}%)");
                        }
                        _ => info!("downloaded {mb:.0} MB"),
                    }
                }
            }
            ProgressEvent::Parsed { records } => {
                debug!(records, "parsed so far");
            }
            ProgressEvent::Feature {
                key,
                index,
                total,
                name,
                matched,
            } => {
                trace!(
                    %key,
                    feature = index + 1,
                    total,
                    county = name.as_deref().unwrap_or("N/A"),
                    matched,
                    "feature mapped"
                );
            }
            ProgressEvent::Published { key, path, bytes } => {
                debug!(%key, %path, bytes, "published");
            }
        }
    }
}

pub fn print_human_build(report: &BuildReport) {
    for artifact in &report.artifacts {
        println!(
            "{:<48} {:>6} counties  {:>10} bytes  {}",
            artifact.key, artifact.matched, artifact.bytes, artifact.path
        );
    }
    println!(
        "{} artifacts from {} records over {} features",
        report.artifacts.len(),
        report.records,
        report.features
    );
}

pub fn print_human_list(result: &ListResult) {
    if result.artifacts.is_empty() {
        println!("no published artifacts");
        return;
    }
    for artifact in &result.artifacts {
        println!("{:<48} {:>10} bytes  {}", artifact.key, artifact.bytes, artifact.path);
    }
}
