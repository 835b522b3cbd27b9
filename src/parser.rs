//! Incremental decoding of the upstream timeseries array.
//!
//! The payload is one JSON array that can run to several hundred megabytes.
//! Elements are decoded straight from a buffered file reader and handed off
//! one by one, so the raw text is never held in memory and no intermediate
//! `Value` tree is built.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};

use camino::Utf8Path;
use serde::Deserializer as _;
use serde::de::{SeqAccess, Visitor};
use tracing::info;

use crate::app::{Phase, ProgressEvent, ProgressSink};
use crate::error::{EtlError, fs_err};
use crate::record::RawRegionRecord;

/// Read buffer size for the payload file.
pub const READ_BUFFER: usize = 1024 * 1024;

/// A progress event is emitted after this many records.
pub const PROGRESS_EVERY: usize = 500;

/// Parses the whole payload file. Either every record is returned in file
/// order, or an error is; a truncated file never yields a partial list.
pub fn parse_payload(
    path: &Utf8Path,
    sink: &dyn ProgressSink,
) -> Result<Vec<RawRegionRecord>, EtlError> {
    sink.event(ProgressEvent::Phase {
        phase: Phase::Parse,
        message: format!("parsing {path}"),
    });
    let file = File::open(path.as_std_path()).map_err(|err| fs_err("open", path, err))?;
    let reader = BufReader::with_capacity(READ_BUFFER, file);

    let mut records = Vec::new();
    parse_reader(reader, |record| {
        records.push(record);
        if records.len() % PROGRESS_EVERY == 0 {
            sink.event(ProgressEvent::Parsed {
                records: records.len(),
            });
        }
    })
    .map_err(|err| match err {
        EtlError::Parse(message) => EtlError::Parse(format!("{path}: {message}")),
        other => other,
    })?;

    sink.event(ProgressEvent::Parsed {
        records: records.len(),
    });
    info!(records = records.len(), "timeseries payload parsed");
    Ok(records)
}

/// Decodes a JSON array of records from `reader`, calling `on_record` for
/// each element as soon as it is complete. Returns the element count.
pub fn parse_reader<R, F>(reader: R, on_record: F) -> Result<usize, EtlError>
where
    R: Read,
    F: FnMut(RawRegionRecord),
{
    let mut de = serde_json::Deserializer::from_reader(reader);
    let count = (&mut de)
        .deserialize_seq(RecordSeq { on_record })
        .map_err(map_json_err)?;
    de.end().map_err(map_json_err)?;
    Ok(count)
}

fn map_json_err(err: serde_json::Error) -> EtlError {
    if err.is_io() {
        EtlError::Filesystem(format!("read payload: {err}"))
    } else {
        EtlError::Parse(err.to_string())
    }
}

struct RecordSeq<F> {
    on_record: F,
}

impl<'de, F> Visitor<'de> for RecordSeq<F>
where
    F: FnMut(RawRegionRecord),
{
    type Value = usize;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a JSON array of region timeseries records")
    }

    fn visit_seq<A>(mut self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut count = 0usize;
        while let Some(record) = seq.next_element::<RawRegionRecord>()? {
            (self.on_record)(record);
            count += 1;
        }
        Ok(count)
    }
}
