use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::NaiveDateTime;
use tracing::debug;

use crate::{
    config::{parse_finite_value, parse_timestamp},
    error::{ChronoplotError, ChronoplotResult},
};

/// Per-file summary produced by the scan and read by every downstream phase.
/// Columns are 1-based gnuplot column indices.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceRecordSet {
    pub path: PathBuf,
    pub record_count: u64,
    pub time_min: NaiveDateTime,
    pub time_max: NaiveDateTime,
    pub data_min: f64,
    pub data_max: f64,
    pub date_column: usize,
    pub data_column: usize,
}

/// Basic structural checks on one source file: exists, is a regular file, is
/// not empty, and decodes as UTF-8. Content-level validation happens in
/// [`scan_source`].
pub fn check_source_file(path: &Path) -> ChronoplotResult<()> {
    let meta = fs::metadata(path).map_err(|e| {
        ChronoplotError::validation(format!("source '{}' is not readable: {e}", path.display()))
    })?;
    if !meta.is_file() {
        return Err(ChronoplotError::validation(format!(
            "source '{}' is not a regular file",
            path.display()
        )));
    }
    if meta.len() == 0 {
        return Err(ChronoplotError::validation(format!(
            "source '{}' is empty",
            path.display()
        )));
    }
    fs::read_to_string(path).map_err(|e| {
        ChronoplotError::validation(format!(
            "source '{}' is not a readable UTF-8 file: {e}",
            path.display()
        ))
    })?;
    Ok(())
}

/// Scan one source file into a [`SourceRecordSet`].
///
/// Every non-whitespace line must be `<timestamp> <number>` where the number
/// is the last space-separated field and everything before it is the
/// timestamp in `time_format`. Returns `Ok(None)` for a file that contains
/// only whitespace; such files are dropped from the source set.
pub fn scan_source(path: &Path, time_format: &str) -> ChronoplotResult<Option<SourceRecordSet>> {
    let text = fs::read_to_string(path).map_err(|e| {
        ChronoplotError::validation(format!("read source '{}': {e}", path.display()))
    })?;

    let mut records = text.lines().filter(|line| !line.trim().is_empty());
    let Some(first) = records.next() else {
        debug!("source '{}' contains only whitespace, dropping", path.display());
        return Ok(None);
    };

    let first = first.trim();
    let (first_time, first_value) = split_record(first, path, time_format)?;

    let mut summary = SourceRecordSet {
        path: path.to_path_buf(),
        record_count: 1,
        time_min: first_time,
        time_max: first_time,
        data_min: first_value,
        data_max: first_value,
        date_column: 1,
        data_column: first.split_whitespace().count(),
    };

    for line in records {
        let (time, value) = split_record(line.trim(), path, time_format)?;
        summary.record_count += 1;
        summary.time_min = summary.time_min.min(time);
        summary.time_max = summary.time_max.max(time);
        summary.data_min = summary.data_min.min(value);
        summary.data_max = summary.data_max.max(value);
    }

    Ok(Some(summary))
}

fn split_record(
    line: &str,
    path: &Path,
    time_format: &str,
) -> ChronoplotResult<(NaiveDateTime, f64)> {
    let Some(split_at) = line.rfind(' ') else {
        return Err(ChronoplotError::validation(format!(
            "source '{}': record '{line}' has no value field",
            path.display()
        )));
    };
    let value = parse_finite_value(line[split_at..].trim())?;
    let time = parse_timestamp(line[..split_at].trim_end(), time_format)?;
    Ok((time, value))
}

/// Load the record payload lines of one source for the renderer, newline
/// terminated, whitespace-only lines excluded so the pool size matches the
/// scanned `record_count`.
pub fn load_record_lines(path: &Path) -> ChronoplotResult<Vec<String>> {
    let text = fs::read_to_string(path).map_err(|e| {
        ChronoplotError::resource(format!("read source '{}': {e}", path.display()))
    })?;
    Ok(text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| format!("{line}\n"))
        .collect())
}
