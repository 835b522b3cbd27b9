use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::app::{Phase, ProgressEvent, ProgressSink};
use crate::error::{EtlError, fs_err};
use crate::store::{CacheState, LastFetched, Store, remove_if_exists};

pub const DEFAULT_BASE_URL: &str = "https://api.covidactnow.org/v2/";
pub const API_KEY_ENV: &str = "COVIDACTNOW_API_KEY";

const COPY_BUFFER: usize = 64 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct DownloadInfo {
    pub bytes: u64,
}

pub trait PayloadClient: Send + Sync {
    /// Streams the county timeseries payload into `destination`.
    fn download_timeseries(
        &self,
        destination: &Path,
        sink: &dyn ProgressSink,
    ) -> Result<DownloadInfo, EtlError>;
}

#[derive(Clone)]
pub struct CovidActNowClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl CovidActNowClient {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, EtlError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("covidmap-etl/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| EtlError::Network(err.to_string()))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(30))
            .timeout(timeout)
            .build()
            .map_err(|err| EtlError::Network(err.to_string()))?;

        let base_url = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };

        Ok(Self {
            client,
            base_url,
            api_key: api_key.filter(|key| !key.trim().is_empty()),
        })
    }

    pub fn timeseries_url(&self) -> String {
        format!("{}counties.timeseries.json", self.base_url)
    }

    fn write_response_to_file(
        &self,
        mut response: reqwest::blocking::Response,
        destination: &Path,
        sink: &dyn ProgressSink,
    ) -> Result<DownloadInfo, EtlError> {
        let status = response.status();
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(EtlError::Auth(format!(
                "CovidActNow rejected the API key (status {})",
                status.as_u16()
            )));
        }
        if !status.is_success() {
            let message = response
                .text()
                .unwrap_or_else(|_| "CovidActNow request failed".to_string());
            return Err(EtlError::HttpStatus {
                status: status.as_u16(),
                message,
            });
        }

        let total = response.content_length();
        let mut file =
            File::create(destination).map_err(|err| fs_err("create", destination.display(), err))?;
        let bytes = copy_with_progress(&mut response, &mut file, total, sink)?;
        file.sync_all()
            .map_err(|err| fs_err("sync", destination.display(), err))?;
        Ok(DownloadInfo { bytes })
    }
}

impl PayloadClient for CovidActNowClient {
    fn download_timeseries(
        &self,
        destination: &Path,
        sink: &dyn ProgressSink,
    ) -> Result<DownloadInfo, EtlError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            EtlError::Auth(format!("no API key provided (set {API_KEY_ENV})"))
        })?;
        let response = self
            .client
            .get(self.timeseries_url())
            .query(&[("apiKey", api_key)])
            .send()
            .map_err(|err| EtlError::Network(err.without_url().to_string()))?;
        self.write_response_to_file(response, destination, sink)
    }
}

/// Copies the body chunk by chunk so read failures (network) and write
/// failures (disk) surface as different errors.
fn copy_with_progress(
    reader: &mut dyn Read,
    writer: &mut dyn Write,
    total: Option<u64>,
    sink: &dyn ProgressSink,
) -> Result<u64, EtlError> {
    let mut buf = vec![0u8; COPY_BUFFER];
    let mut written: u64 = 0;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(EtlError::Network(format!("download interrupted: {err}"))),
        };
        writer
            .write_all(&buf[..n])
            .map_err(|err| EtlError::Filesystem(format!("write payload: {err}")))?;
        written += n as u64;
        sink.event(ProgressEvent::Downloaded {
            bytes: written,
            total,
        });
    }
    writer
        .flush()
        .map_err(|err| EtlError::Filesystem(format!("flush payload: {err}")))?;
    Ok(written)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchReason {
    PayloadMissing,
    TimestampMissing,
    TimestampUnreadable,
    FetchedBeforeToday,
}

impl FetchReason {
    pub fn describe(self) -> &'static str {
        match self {
            FetchReason::PayloadMissing => "couldn't find timeseries file",
            FetchReason::TimestampMissing => "couldn't find last fetched file",
            FetchReason::TimestampUnreadable => "last fetched file is unreadable",
            FetchReason::FetchedBeforeToday => "last fetched was before today",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FetchOutcome {
    Fresh,
    Fetched { reason: FetchReason, bytes: u64 },
}

/// Decides whether the cached payload has to be downloaded again.
///
/// A timestamp counts as fresh when it falls on the current calendar day in
/// `now`'s time zone, i.e. it is not earlier than local midnight.
pub fn needs_fetch<Tz: TimeZone>(state: &CacheState, now: &DateTime<Tz>) -> Option<FetchReason> {
    if !state.payload_present {
        return Some(FetchReason::PayloadMissing);
    }
    match &state.last_fetched {
        None => Some(FetchReason::TimestampMissing),
        Some(LastFetched::Unreadable(_)) => Some(FetchReason::TimestampUnreadable),
        Some(LastFetched::At(at)) => {
            let fetched_day = at.with_timezone(&now.timezone()).date_naive();
            (fetched_day < now.date_naive()).then_some(FetchReason::FetchedBeforeToday)
        }
    }
}

/// Downloads the payload unless the cache is fresh for `now`.
pub fn ensure_fresh_payload<C: PayloadClient, Tz: TimeZone>(
    store: &Store,
    client: &C,
    now: &DateTime<Tz>,
    sink: &dyn ProgressSink,
) -> Result<FetchOutcome, EtlError> {
    let state = store.cache_state()?;
    if let Some(LastFetched::Unreadable(raw)) = &state.last_fetched {
        warn!(content = %raw, "ignoring unreadable last fetched timestamp");
    }

    match needs_fetch(&state, now) {
        None => {
            debug!(path = %store.payload_path(), "cached payload is fresh");
            Ok(FetchOutcome::Fresh)
        }
        Some(reason) => {
            info!(reason = reason.describe(), "downloading timeseries payload");
            let info = download_payload(store, client, sink)?;
            Ok(FetchOutcome::Fetched {
                reason,
                bytes: info.bytes,
            })
        }
    }
}

/// Unconditionally replaces the cached payload.
///
/// The body lands in the `.part` file first; the timestamp is written before
/// the rename so a visible payload never has an older timestamp than itself.
/// On failure the `.part` file is left for the next run to discard.
pub fn download_payload<C: PayloadClient>(
    store: &Store,
    client: &C,
    sink: &dyn ProgressSink,
) -> Result<DownloadInfo, EtlError> {
    sink.event(ProgressEvent::Phase {
        phase: Phase::Fetch,
        message: "downloading timeseries data from CovidActNow".to_string(),
    });
    store.ensure_cache_root()?;

    let part = store.payload_part_path();
    if remove_if_exists(&part)? {
        info!(path = %part, "deleted previously unfinished download");
    }

    let info = client.download_timeseries(part.as_std_path(), sink)?;

    store.write_last_fetched(Utc::now())?;
    let payload = store.payload_path();
    std::fs::rename(part.as_std_path(), payload.as_std_path())
        .map_err(|err| fs_err("rename", &part, err))?;
    info!(bytes = info.bytes, path = %payload, "timeseries payload cached");
    Ok(info)
}

#[cfg(test)]
mod tests {
    use chrono::FixedOffset;

    use super::*;

    fn at(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339).unwrap().with_timezone(&Utc)
    }

    fn fresh_state(fetched: &str) -> CacheState {
        CacheState {
            payload_present: true,
            last_fetched: Some(LastFetched::At(at(fetched))),
        }
    }

    #[test]
    fn yesterday_is_stale_today_is_fresh() {
        let tz = FixedOffset::west_opt(5 * 3600).unwrap();
        let now = at("2021-01-02T15:00:00Z").with_timezone(&tz);

        let yesterday = fresh_state("2021-01-01T23:00:00Z");
        assert_eq!(needs_fetch(&yesterday, &now), Some(FetchReason::FetchedBeforeToday));

        let today = fresh_state("2021-01-02T06:00:00Z");
        assert_eq!(needs_fetch(&today, &now), None);
    }

    #[test]
    fn start_of_day_uses_local_offset() {
        // 03:00 UTC on Jan 2 is still Jan 1 at UTC-5.
        let tz = FixedOffset::west_opt(5 * 3600).unwrap();
        let now = at("2021-01-02T12:00:00Z").with_timezone(&tz);
        let state = fresh_state("2021-01-02T03:00:00Z");
        assert_eq!(needs_fetch(&state, &now), Some(FetchReason::FetchedBeforeToday));
        assert_eq!(needs_fetch(&state, &at("2021-01-02T12:00:00Z")), None);
    }

    #[test]
    fn missing_files_always_fetch() {
        let now = at("2021-01-02T12:00:00Z");
        let mut state = fresh_state("2021-01-02T11:00:00Z");
        state.payload_present = false;
        assert_eq!(needs_fetch(&state, &now), Some(FetchReason::PayloadMissing));

        let state = CacheState {
            payload_present: true,
            last_fetched: None,
        };
        assert_eq!(needs_fetch(&state, &now), Some(FetchReason::TimestampMissing));
    }

    #[test]
    fn base_url_gets_trailing_slash() {
        let client = CovidActNowClient::new("http://localhost:9/v2", None, None).unwrap();
        assert_eq!(
            client.timeseries_url(),
            "http://localhost:9/v2/counties.timeseries.json"
        );
    }

    #[test]
    fn download_without_key_is_auth_error() {
        let client = CovidActNowClient::new(DEFAULT_BASE_URL, Some("  ".to_string()), None).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let err = client
            .download_timeseries(&dir.path().join("out.part"), &crate::output::JsonOutput)
            .unwrap_err();
        assert!(matches!(err, EtlError::Auth(_)));
        assert!(!dir.path().join("out.part").exists());
    }
}
