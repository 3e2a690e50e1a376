use std::{
    collections::HashSet,
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use chrono::NaiveDateTime;
use serde::Deserialize;
use tracing::warn;

use crate::error::{ChronoplotError, ChronoplotResult};

pub const DEFAULT_SPEED: f64 = 1.0;
pub const DEFAULT_FPS: f64 = 25.0;
pub const DEFAULT_TIME_FORMAT: &str = "[%Y-%m-%d %H:%M:%S]";

/// Background/foreground color scheme for the rendered frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    White,
    Black,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::White => "white",
            Scheme::Black => "black",
        }
    }
}

/// Output resolution preset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Size {
    Xga,
    Hd,
}

impl Size {
    pub fn resolution(self) -> &'static str {
        match self {
            Size::Xga => "1024,768",
            Size::Hd => "1920,1080",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Effects {
    pub scheme: Option<Scheme>,
    pub size: Option<Size>,
}

impl Effects {
    pub fn is_configured(&self) -> bool {
        self.scheme.is_some() || self.size.is_some()
    }
}

/// One end of an axis range. `Min`/`Max` resolve against the global record
/// extents at render time; `Literal` is passed to gnuplot verbatim.
#[derive(Clone, Debug, PartialEq)]
pub enum AxisBound {
    Auto,
    Min,
    Max,
    Literal(String),
}

/// Which value domain an axis carries: timestamps on x, plain numbers on y.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AxisKind {
    Time,
    Value,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AxisEnd {
    Lower,
    Upper,
}

impl AxisEnd {
    fn keyword(self) -> &'static str {
        match self {
            AxisEnd::Lower => "min",
            AxisEnd::Upper => "max",
        }
    }
}

/// Reference lines drawn at fixed positions; x entries are timestamps in the
/// configured time format, y entries are plain numbers. Both are kept as the
/// user wrote them so the script text reproduces their formatting.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CriticalValues {
    pub x: Vec<String>,
    pub y: Vec<String>,
}

impl CriticalValues {
    pub fn is_empty(&self) -> bool {
        self.x.is_empty() && self.y.is_empty()
    }
}

/// Fully validated run configuration, produced once at the boundary and read
/// by every downstream phase.
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub sources: Vec<PathBuf>,
    pub time_format: String,
    pub speed: Option<f64>,
    pub fps: Option<f64>,
    pub duration: Option<f64>,
    pub x_min: AxisBound,
    pub x_max: AxisBound,
    pub y_min: AxisBound,
    pub y_max: AxisBound,
    pub critical_values: Option<CriticalValues>,
    pub legend: Option<String>,
    pub effects: Effects,
    pub gnuplot_params: Vec<String>,
    pub output_name: Option<String>,
    pub ignore_errors: bool,
}

/// Optional JSON config file. Any option the command line left unset can be
/// supplied here; repeatable options are appended after the command-line ones.
/// Unknown keys are rejected so typos surface at parse time.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ConfigFile {
    pub time_format: Option<String>,
    pub speed: Option<f64>,
    pub fps: Option<f64>,
    pub duration: Option<f64>,
    pub x_min: Option<String>,
    pub x_max: Option<String>,
    pub y_min: Option<String>,
    pub y_max: Option<String>,
    pub critical: Vec<String>,
    pub legend: Option<String>,
    pub effect: Vec<String>,
    pub gnuplot: Vec<String>,
    pub name: Option<String>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> ChronoplotResult<Self> {
        let f = File::open(path).map_err(|e| {
            ChronoplotError::validation(format!("open config file '{}': {e}", path.display()))
        })?;
        serde_json::from_reader(BufReader::new(f)).map_err(|e| {
            ChronoplotError::validation(format!("parse config file '{}': {e}", path.display()))
        })
    }
}

/// Raw, unvalidated options as they come off the command line, before the
/// config file overlay and validation turn them into a [`RunConfig`].
#[derive(Clone, Debug, Default)]
pub struct RawOptions {
    pub sources: Vec<String>,
    pub time_format: Option<String>,
    pub speed: Option<f64>,
    pub fps: Option<f64>,
    pub duration: Option<f64>,
    pub x_min: Option<String>,
    pub x_max: Option<String>,
    pub y_min: Option<String>,
    pub y_max: Option<String>,
    pub critical: Vec<String>,
    pub legend: Option<String>,
    pub effect: Vec<String>,
    pub gnuplot: Vec<String>,
    pub name: Option<String>,
    pub ignore_errors: bool,
}

impl RawOptions {
    /// Fill options the command line left unset from the config file; the
    /// command line wins for scalars, repeatable options append.
    pub fn merge_config_file(&mut self, file: ConfigFile) {
        merge_scalar(&mut self.time_format, file.time_format);
        merge_scalar(&mut self.speed, file.speed);
        merge_scalar(&mut self.fps, file.fps);
        merge_scalar(&mut self.duration, file.duration);
        merge_scalar(&mut self.x_min, file.x_min);
        merge_scalar(&mut self.x_max, file.x_max);
        merge_scalar(&mut self.y_min, file.y_min);
        merge_scalar(&mut self.y_max, file.y_max);
        merge_scalar(&mut self.legend, file.legend);
        merge_scalar(&mut self.name, file.name);
        self.critical.extend(file.critical);
        self.effect.extend(file.effect);
        self.gnuplot.extend(file.gnuplot);
    }

    pub fn validate(mut self) -> ChronoplotResult<RunConfig> {
        let ignore_errors = self.ignore_errors;
        let time_format = self
            .time_format
            .unwrap_or_else(|| DEFAULT_TIME_FORMAT.to_string());

        dedup_preserving_order(&mut self.sources);
        dedup_preserving_order(&mut self.critical);
        dedup_preserving_order(&mut self.effect);
        dedup_preserving_order(&mut self.gnuplot);

        if self.sources.is_empty() {
            return Err(ChronoplotError::validation("no source files given"));
        }
        for source in &self.sources {
            let lowered = source.trim().to_ascii_lowercase();
            if lowered.starts_with("http://") || lowered.starts_with("https://") {
                return Err(ChronoplotError::validation(format!(
                    "remote sources are not supported, copy '{source}' to a local file"
                )));
            }
        }

        for (label, value) in [
            ("speed", self.speed),
            ("fps", self.fps),
            ("duration", self.duration),
        ] {
            if let Some(v) = value
                && !v.is_finite()
            {
                return Err(ChronoplotError::validation(format!(
                    "{label} must be a finite number, got {v}"
                )));
            }
        }

        let x_min = parse_axis_bound(
            self.x_min.as_deref(),
            AxisKind::Time,
            AxisEnd::Lower,
            AxisBound::Min,
            &time_format,
            ignore_errors,
        )?;
        let x_max = parse_axis_bound(
            self.x_max.as_deref(),
            AxisKind::Time,
            AxisEnd::Upper,
            AxisBound::Max,
            &time_format,
            ignore_errors,
        )?;
        let y_min = parse_axis_bound(
            self.y_min.as_deref(),
            AxisKind::Value,
            AxisEnd::Lower,
            AxisBound::Auto,
            &time_format,
            ignore_errors,
        )?;
        let y_max = parse_axis_bound(
            self.y_max.as_deref(),
            AxisKind::Value,
            AxisEnd::Upper,
            AxisBound::Auto,
            &time_format,
            ignore_errors,
        )?;

        let critical_values = parse_critical_values(&self.critical, &time_format, ignore_errors)?;
        let effects = parse_effect_params(&self.effect, ignore_errors)?;

        Ok(RunConfig {
            sources: self.sources.into_iter().map(PathBuf::from).collect(),
            time_format,
            speed: self.speed,
            fps: self.fps,
            duration: self.duration,
            x_min,
            x_max,
            y_min,
            y_max,
            critical_values,
            legend: self.legend,
            effects,
            gnuplot_params: self.gnuplot,
            output_name: self.name,
            ignore_errors,
        })
    }
}

fn merge_scalar<T>(cli: &mut Option<T>, file: Option<T>) {
    if cli.is_none() {
        *cli = file;
    }
}

fn dedup_preserving_order(items: &mut Vec<String>) {
    let mut seen = HashSet::new();
    items.retain(|item| seen.insert(item.clone()));
}

pub fn parse_timestamp(raw: &str, time_format: &str) -> ChronoplotResult<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, time_format).map_err(|e| {
        ChronoplotError::validation(format!(
            "'{raw}' does not match time format '{time_format}': {e}"
        ))
    })
}

pub fn parse_finite_value(raw: &str) -> ChronoplotResult<f64> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|e| ChronoplotError::validation(format!("'{raw}' is not a number: {e}")))?;
    if !value.is_finite() {
        return Err(ChronoplotError::validation(format!(
            "'{raw}' is inf/nan where an actual number is required"
        )));
    }
    Ok(value)
}

fn parse_axis_bound(
    raw: Option<&str>,
    kind: AxisKind,
    end: AxisEnd,
    default: AxisBound,
    time_format: &str,
    ignore_errors: bool,
) -> ChronoplotResult<AxisBound> {
    let Some(raw) = raw else {
        return Ok(default);
    };

    if raw == "auto" {
        return Ok(AxisBound::Auto);
    }
    if raw == end.keyword() {
        return Ok(match end {
            AxisEnd::Lower => AxisBound::Min,
            AxisEnd::Upper => AxisBound::Max,
        });
    }

    let literal_ok = match kind {
        AxisKind::Time => parse_timestamp(raw, time_format).map(|_| ()),
        AxisKind::Value => parse_finite_value(raw).map(|_| ()),
    };
    match literal_ok {
        Ok(()) => Ok(AxisBound::Literal(raw.to_string())),
        Err(err) if ignore_errors => {
            warn!("ignoring bad axis bound, falling back to default: {err}");
            Ok(default)
        },
        Err(err) => Err(err),
    }
}

/// Parse repeatable `x=<timestamp>` / `y=<number>` entries. Entries without a
/// recognizable prefix are skipped outright; entries with an unparsable value
/// are fatal unless errors are ignored, in which case they are dropped with a
/// warning. Returns `None` when nothing valid remains.
fn parse_critical_values(
    entries: &[String],
    time_format: &str,
    ignore_errors: bool,
) -> ChronoplotResult<Option<CriticalValues>> {
    let mut values = CriticalValues::default();

    for entry in entries {
        let Some((axis, raw)) = entry.split_once('=') else {
            continue;
        };
        match axis {
            "x" => match parse_timestamp(raw, time_format) {
                Ok(_) => values.x.push(raw.to_string()),
                Err(err) if ignore_errors => {
                    warn!("dropping critical value '{entry}': {err}");
                },
                Err(err) => return Err(err),
            },
            "y" => match parse_finite_value(raw) {
                Ok(_) => values.y.push(raw.to_string()),
                Err(err) if ignore_errors => {
                    warn!("dropping critical value '{entry}': {err}");
                },
                Err(err) => return Err(err),
            },
            _ => {},
        }
    }

    if values.is_empty() {
        Ok(None)
    } else {
        Ok(Some(values))
    }
}

/// Parse repeatable `key=value[:key=value...]` effect entries into the typed
/// [`Effects`]. Unknown keys and values are rejected at this boundary; later
/// entries override earlier ones.
fn parse_effect_params(entries: &[String], ignore_errors: bool) -> ChronoplotResult<Effects> {
    let mut effects = Effects::default();

    for entry in entries {
        for part in entry.split(':') {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            let mut recognized = true;
            match key {
                "scheme" => match value {
                    "white" => effects.scheme = Some(Scheme::White),
                    "black" => effects.scheme = Some(Scheme::Black),
                    _ => recognized = false,
                },
                "size" => match value {
                    "xga" => effects.size = Some(Size::Xga),
                    "hd" => effects.size = Some(Size::Hd),
                    _ => recognized = false,
                },
                _ => recognized = false,
            }
            if !recognized {
                if ignore_errors {
                    warn!("ignoring unknown effect '{part}'");
                } else {
                    return Err(ChronoplotError::validation(format!(
                        "unknown effect '{part}' (expected scheme=white|black or size=xga|hd)"
                    )));
                }
            }
        }
    }

    Ok(effects)
}
