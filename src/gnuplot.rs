use std::{
    io::Write as _,
    path::{Path, PathBuf},
    process::{Child, ChildStdin, Command, Stdio},
};

use rand::seq::SliceRandom as _;
use tracing::{debug, warn};

use crate::{
    config::{AxisBound, CriticalValues, Effects, RunConfig, Scheme},
    error::{ChronoplotError, ChronoplotResult},
    source::{SourceRecordSet, load_record_lines},
    timing::{AnimationTiming, AnimationType},
};

const FRAME_BASENAME: &str = "g";

// Line colors cycled through by the plot; one palette per background scheme.
const BLACK_SCHEME_LINES: [&str; 7] = [
    "#FFFFFF", "#00FF00", "#FFFF00", "#0000FF", "#FF00FF", "#00FFFF", "#FF4000",
];
const WHITE_SCHEME_LINES: [&str; 7] = [
    "#000000", "#008000", "#008080", "#404000", "#000080", "#400080", "#804000",
];

/// Zero-padding width for frame image indices: the decimal digit count of the
/// total frame count. Shared with the encoder's input filename pattern.
pub fn frame_index_width(frame_count: u64) -> usize {
    frame_count.to_string().len()
}

/// ffmpeg-style input pattern matching the names [`FrameNames`] produces.
pub fn frame_pattern(frame_count: u64) -> String {
    format!("{FRAME_BASENAME}_%0{}d.png", frame_index_width(frame_count))
}

/// Generator of sequential zero-padded frame image paths. The counter is
/// unbounded: a run may emit more images than `frame_count` (oneline runs
/// with several sources do), the padding width just stays fixed.
struct FrameNames {
    dir: PathBuf,
    width: usize,
    next: u64,
}

impl FrameNames {
    fn new(dir: &Path, frame_count: u64) -> Self {
        Self {
            dir: dir.to_path_buf(),
            width: frame_index_width(frame_count),
            next: 0,
        }
    }

    fn next_path(&mut self) -> PathBuf {
        let index = self.next;
        self.next += 1;
        self.dir
            .join(format!("{FRAME_BASENAME}_{index:0width$}.png", width = self.width))
    }
}

fn configure_effects(effects: &Effects) -> String {
    let terminal = r#"set terminal png font "arial,10""#;
    if !effects.is_configured() {
        return format!("{terminal}\n");
    }

    let resolution = match effects.size {
        Some(size) => format!(" size {} ", size.resolution()),
        None => " size 640,480 ".to_string(),
    };

    let (background, scheme) = match effects.scheme {
        Some(color) => {
            let mut scheme = String::new();
            scheme.push_str("set border 15 lw 3 lc rgb \"#FF0000\"\n");
            scheme.push_str("set xtics textcolor rgb \"#FF0000\"\n");
            scheme.push_str("set ytics textcolor rgb \"#FF0000\"\n");
            let palette = match color {
                Scheme::Black => &BLACK_SCHEME_LINES,
                Scheme::White => &WHITE_SCHEME_LINES,
            };
            for (i, rgb) in palette.iter().enumerate() {
                // gnuplot numbers linetypes from 1.
                scheme.push_str(&format!("set linetype {} lc rgb \"{rgb}\"\n", i + 1));
            }
            scheme.push_str("set linetype cycle 7\n");
            (format!(" background \"{}\" ", color.as_str()), scheme)
        },
        None => (String::new(), String::new()),
    };

    format!("{terminal}{resolution}{background}\n{scheme}")
}

/// Global record extents across all sources, used to substitute `min`/`max`
/// axis bounds.
struct RecordExtremes {
    time_min: String,
    time_max: String,
    data_min: f64,
    data_max: f64,
}

fn record_extremes(
    sources: &[SourceRecordSet],
    time_format: &str,
) -> ChronoplotResult<RecordExtremes> {
    let first = sources.first().ok_or_else(|| {
        ChronoplotError::internal("axis extents requested for an empty source set")
    })?;

    let mut time_min = first.time_min;
    let mut time_max = first.time_max;
    let mut data_min = first.data_min;
    let mut data_max = first.data_max;
    for source in sources {
        time_min = time_min.min(source.time_min);
        time_max = time_max.max(source.time_max);
        data_min = data_min.min(source.data_min);
        data_max = data_max.max(source.data_max);
    }

    Ok(RecordExtremes {
        time_min: time_min.format(time_format).to_string(),
        time_max: time_max.format(time_format).to_string(),
        data_min,
        data_max,
    })
}

fn resolve_x_bound(bound: &AxisBound, extremes: &RecordExtremes) -> String {
    match bound {
        AxisBound::Auto => "*".to_string(),
        AxisBound::Min => format!("\"{}\"", extremes.time_min),
        AxisBound::Max => format!("\"{}\"", extremes.time_max),
        AxisBound::Literal(raw) => raw.clone(),
    }
}

fn resolve_y_bound(bound: &AxisBound, extremes: &RecordExtremes) -> String {
    match bound {
        AxisBound::Auto => "*".to_string(),
        AxisBound::Min => extremes.data_min.to_string(),
        AxisBound::Max => extremes.data_max.to_string(),
        AxisBound::Literal(raw) => raw.clone(),
    }
}

fn configure_axes(config: &RunConfig, sources: &[SourceRecordSet]) -> ChronoplotResult<String> {
    let extremes = record_extremes(sources, &config.time_format)?;

    let mut script = String::new();
    script.push_str(&format!("set timefmt \"{}\"\n", config.time_format));
    script.push_str("set xdata time\n");
    script.push_str("set grid\n");
    script.push_str("unset key\n");
    script.push_str(&format!(
        "set xrange [{}:{}]\n",
        resolve_x_bound(&config.x_min, &extremes),
        resolve_x_bound(&config.x_max, &extremes)
    ));
    script.push_str(&format!(
        "set yrange [{}:{}]\n",
        resolve_y_bound(&config.y_min, &extremes),
        resolve_y_bound(&config.y_max, &extremes)
    ));
    script.push_str("set xlabel \"Date && Time\" textcolor rgb \"#FF0000\"\n");
    script.push_str("set ylabel \"Values\" textcolor rgb \"#FF0000\"\n");
    Ok(script)
}

fn configure_critical_values(critical: &CriticalValues) -> String {
    let mut script = String::new();
    for x in &critical.x {
        script.push_str(&format!(
            "set arrow from \"{x}\", graph 0 to \"{x}\", graph 1 nohead lc rgb \"red\"\n"
        ));
    }
    for y in &critical.y {
        script.push_str(&format!(
            "set arrow from graph 0, first {y} to graph 1, first {y} nohead lc rgb \"red\"\n"
        ));
    }
    script
}

/// Session preamble, composed in a fixed order so later pieces can override
/// earlier ones: terminal/effects, axis ranges, critical-value markers, the
/// title, and finally the user's raw passthrough directives.
pub fn build_preamble(
    config: &RunConfig,
    sources: &[SourceRecordSet],
) -> ChronoplotResult<String> {
    let mut script = configure_effects(&config.effects);
    script.push_str(&configure_axes(config, sources)?);

    if let Some(critical) = &config.critical_values {
        script.push_str(&configure_critical_values(critical));
    }

    if let Some(legend) = &config.legend {
        script.push_str(&format!(
            "set title \"{legend}\" textcolor rgb \"#FF0000\"\n"
        ));
    }

    for directive in &config.gnuplot_params {
        script.push_str(directive);
        script.push('\n');
    }

    Ok(script)
}

/// Receiver of the line-oriented plotting script. The real implementation is
/// a [`GnuplotSession`]; tests substitute a capturing sink to inspect the
/// frame stream without spawning a process.
pub trait PlotSink {
    fn write_script(&mut self, text: &str) -> ChronoplotResult<()>;

    /// One frame: output-file directive, plot command, then each data block
    /// terminated by the inline end-of-data sentinel.
    fn emit_frame(
        &mut self,
        output: &Path,
        plot_command: &str,
        data_blocks: &[&str],
    ) -> ChronoplotResult<()> {
        self.write_script(&format!("set output '{}'\n", output.display()))?;
        self.write_script(plot_command)?;
        for block in data_blocks {
            self.write_script(block)?;
            self.write_script("e\n")?;
        }
        Ok(())
    }
}

/// A persistent gnuplot process fed over a pipe for the whole frame
/// generation phase. The session owns the child; `quit` is sent and the
/// process reaped on every exit path, early errors included.
pub struct GnuplotSession {
    child: Child,
    stdin: Option<ChildStdin>,
}

impl GnuplotSession {
    pub fn spawn() -> ChronoplotResult<Self> {
        let mut child = Command::new("gnuplot")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                ChronoplotError::resource(format!(
                    "failed to spawn gnuplot (is it installed and on PATH?): {e}"
                ))
            })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ChronoplotError::resource("failed to open gnuplot stdin"))?;
        Ok(Self {
            child,
            stdin: Some(stdin),
        })
    }

    pub fn finish(mut self) -> ChronoplotResult<()> {
        let Some(mut stdin) = self.stdin.take() else {
            return Ok(());
        };
        stdin
            .write_all(b"quit\n")
            .map_err(|e| ChronoplotError::resource(format!("write to gnuplot: {e}")))?;
        drop(stdin);

        let status = self
            .child
            .wait()
            .map_err(|e| ChronoplotError::resource(format!("wait for gnuplot: {e}")))?;
        if !status.success() {
            return Err(ChronoplotError::resource(format!(
                "gnuplot exited with status {status}"
            )));
        }
        Ok(())
    }
}

impl PlotSink for GnuplotSession {
    fn write_script(&mut self, text: &str) -> ChronoplotResult<()> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(ChronoplotError::internal(
                "write to a gnuplot session that is already finished",
            ));
        };
        stdin
            .write_all(text.as_bytes())
            .map_err(|e| ChronoplotError::resource(format!("write to gnuplot: {e}")))
    }
}

impl Drop for GnuplotSession {
    fn drop(&mut self) {
        // Error path: finish() was never reached. Close the session cleanly
        // so no orphaned gnuplot lingers behind the failed run.
        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.write_all(b"quit\n");
            drop(stdin);
            if let Err(e) = self.child.wait() {
                warn!("failed to reap gnuplot after aborted session: {e}");
            }
        }
    }
}

/// Randomly ordered, destructively consumed multiset of record lines.
fn shuffled_pool(lines: Vec<String>) -> Vec<String> {
    let mut pool = lines;
    pool.shuffle(&mut rand::rng());
    pool
}

fn multiplot_plot_command(series_count: usize, date_column: usize, data_column: usize) -> String {
    let blocks: Vec<String> = (0..series_count)
        .map(|_| format!("'-' using {date_column}:{data_column}"))
        .collect();
    format!("plot {}\n", blocks.join(", "))
}

fn pop_into(pool: &mut Vec<String>, count: u64, buffer: &mut String) -> ChronoplotResult<()> {
    for _ in 0..count {
        let line = pool.pop().ok_or_else(|| {
            ChronoplotError::internal("render pool exhausted before its frame sequence")
        })?;
        buffer.push_str(&line);
    }
    Ok(())
}

/// Drive a persistent gnuplot session over all frames and return the number
/// of images written.
pub fn render_frames(
    config: &RunConfig,
    sources: &[SourceRecordSet],
    timing: &AnimationTiming,
    sequences: &[Vec<u64>],
    frames_dir: &Path,
) -> ChronoplotResult<u64> {
    let preamble = build_preamble(config, sources)?;
    let mut session = GnuplotSession::spawn()?;
    session.write_script(&preamble)?;
    let written = render_frames_into(&mut session, sources, timing, sequences, frames_dir)?;
    session.finish()?;
    debug!(written, "gnuplot session finished");
    Ok(written)
}

/// Stream every frame of the run into `sink` using the data-supply strategy
/// the animation type calls for.
pub fn render_frames_into(
    sink: &mut dyn PlotSink,
    sources: &[SourceRecordSet],
    timing: &AnimationTiming,
    sequences: &[Vec<u64>],
    frames_dir: &Path,
) -> ChronoplotResult<u64> {
    let first = sources.first().ok_or_else(|| {
        ChronoplotError::internal("frame rendering requested for an empty source set")
    })?;
    let (date_column, data_column) = (first.date_column, first.data_column);

    let mut names = FrameNames::new(frames_dir, timing.frame_count);
    match timing.animation_type {
        AnimationType::Oneline => render_oneline(
            sink,
            sources,
            sequences,
            &mut names,
            date_column,
            data_column,
        ),
        AnimationType::Multiplot => render_multiplot(
            sink,
            sources,
            sequences,
            timing.frame_count,
            &mut names,
            date_column,
            data_column,
        ),
    }
}

/// Oneline: one pool merged across all sources, shuffled once. Each source's
/// frame sequence is drained in full before the next source's begins, and the
/// per-frame buffer is cleared after every frame.
fn render_oneline(
    sink: &mut dyn PlotSink,
    sources: &[SourceRecordSet],
    sequences: &[Vec<u64>],
    names: &mut FrameNames,
    date_column: usize,
    data_column: usize,
) -> ChronoplotResult<u64> {
    let mut merged = Vec::new();
    for source in sources {
        merged.extend(load_record_lines(&source.path)?);
    }
    let mut pool = shuffled_pool(merged);

    let plot_command = format!("plot '-' using {date_column}:{data_column}\n");
    let mut written = 0u64;
    let mut buffer = String::new();
    for sequence in sequences {
        for &count in sequence {
            pop_into(&mut pool, count, &mut buffer)?;
            sink.emit_frame(&names.next_path(), &plot_command, &[buffer.as_str()])?;
            buffer.clear();
            written += 1;
        }
    }
    Ok(written)
}

/// Multiplot: per-source shuffled pools and grow-only accumulation buffers.
/// Every global frame re-plots each source's cumulative history; a source
/// whose sequence is exhausted keeps its buffer frozen.
fn render_multiplot(
    sink: &mut dyn PlotSink,
    sources: &[SourceRecordSet],
    sequences: &[Vec<u64>],
    frame_count: u64,
    names: &mut FrameNames,
    date_column: usize,
    data_column: usize,
) -> ChronoplotResult<u64> {
    struct Series {
        pool: Vec<String>,
        buffer: String,
        position: usize,
    }

    let mut series = Vec::with_capacity(sources.len());
    for source in sources {
        series.push(Series {
            pool: shuffled_pool(load_record_lines(&source.path)?),
            buffer: String::new(),
            position: 0,
        });
    }

    let plot_command = multiplot_plot_command(sources.len(), date_column, data_column);

    let mut written = 0u64;
    for _ in 0..frame_count {
        for (state, sequence) in series.iter_mut().zip(sequences) {
            if let Some(&count) = sequence.get(state.position) {
                state.position += 1;
                pop_into(&mut state.pool, count, &mut state.buffer)?;
            }
        }

        let blocks: Vec<&str> = series.iter().map(|s| s.buffer.as_str()).collect();
        sink.emit_frame(&names.next_path(), &plot_command, &blocks)?;
        written += 1;
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDateTime;

    use super::*;
    use crate::config::{DEFAULT_TIME_FORMAT, RawOptions, Size};

    fn source(name: &str, time_min: &str, time_max: &str, data: (f64, f64)) -> SourceRecordSet {
        SourceRecordSet {
            path: name.into(),
            record_count: 4,
            time_min: NaiveDateTime::parse_from_str(time_min, DEFAULT_TIME_FORMAT).unwrap(),
            time_max: NaiveDateTime::parse_from_str(time_max, DEFAULT_TIME_FORMAT).unwrap(),
            data_min: data.0,
            data_max: data.1,
            date_column: 1,
            data_column: 3,
        }
    }

    fn sources() -> Vec<SourceRecordSet> {
        vec![
            source(
                "a",
                "[2013-01-01 00:00:00]",
                "[2013-06-01 00:00:00]",
                (-2.0, 4.0),
            ),
            source(
                "b",
                "[2013-02-01 00:00:00]",
                "[2013-09-01 00:00:00]",
                (1.0, 9.5),
            ),
        ]
    }

    fn config(raw: RawOptions) -> RunConfig {
        RawOptions {
            sources: vec!["data.txt".to_string()],
            ..raw
        }
        .validate()
        .unwrap()
    }

    #[test]
    fn frame_names_are_zero_padded_to_frame_count_width() {
        let mut names = FrameNames::new(Path::new("/tmp/frames"), 100);
        assert!(names.next_path().ends_with("g_000.png"));
        assert!(names.next_path().ends_with("g_001.png"));
        assert_eq!(frame_pattern(100), "g_%03d.png");
        assert_eq!(frame_pattern(9), "g_%01d.png");
    }

    #[test]
    fn frame_names_keep_counting_past_frame_count() {
        let mut names = FrameNames::new(Path::new("."), 2);
        for _ in 0..3 {
            names.next_path();
        }
        assert!(names.next_path().ends_with("g_3.png"));
    }

    #[test]
    fn default_effects_is_bare_terminal() {
        assert_eq!(
            configure_effects(&Effects::default()),
            "set terminal png font \"arial,10\"\n"
        );
    }

    #[test]
    fn size_without_scheme_keeps_default_colors() {
        let effects = Effects {
            scheme: None,
            size: Some(Size::Hd),
        };
        let script = configure_effects(&effects);
        assert!(script.starts_with("set terminal png font \"arial,10\" size 1920,1080 \n"));
        assert!(!script.contains("linetype"));
    }

    #[test]
    fn scheme_without_size_falls_back_to_vga_resolution() {
        let effects = Effects {
            scheme: Some(Scheme::White),
            size: None,
        };
        let script = configure_effects(&effects);
        assert!(script.contains(" size 640,480 "));
        assert!(script.contains(" background \"white\" "));
        assert!(script.contains("set linetype 1 lc rgb \"#000000\"\n"));
        assert!(script.contains("set linetype cycle 7\n"));
    }

    #[test]
    fn axes_resolve_min_max_against_global_extents() {
        let mut cfg = config(RawOptions::default());
        cfg.x_min = AxisBound::Min;
        cfg.x_max = AxisBound::Max;
        cfg.y_min = AxisBound::Min;
        cfg.y_max = AxisBound::Max;
        let script = configure_axes(&cfg, &sources()).unwrap();
        assert!(script.contains(
            "set xrange [\"[2013-01-01 00:00:00]\":\"[2013-09-01 00:00:00]\"]\n"
        ));
        assert!(script.contains("set yrange [-2:9.5]\n"));
    }

    #[test]
    fn auto_and_literal_bounds_pass_through() {
        let mut cfg = config(RawOptions::default());
        cfg.x_min = AxisBound::Auto;
        cfg.x_max = AxisBound::Literal("\"[2013-05-01 00:00:00]\"".to_string());
        cfg.y_min = AxisBound::Auto;
        cfg.y_max = AxisBound::Literal("12.5".to_string());
        let script = configure_axes(&cfg, &sources()).unwrap();
        assert!(script.contains("set xrange [*:\"[2013-05-01 00:00:00]\"]\n"));
        assert!(script.contains("set yrange [*:12.5]\n"));
    }

    #[test]
    fn critical_values_draw_arrows() {
        let critical = CriticalValues {
            x: vec!["[2013-03-01 00:00:00]".to_string()],
            y: vec!["7.5".to_string()],
        };
        let script = configure_critical_values(&critical);
        assert_eq!(
            script,
            "set arrow from \"[2013-03-01 00:00:00]\", graph 0 to \"[2013-03-01 00:00:00]\", \
             graph 1 nohead lc rgb \"red\"\n\
             set arrow from graph 0, first 7.5 to graph 1, first 7.5 nohead lc rgb \"red\"\n"
        );
    }

    #[test]
    fn preamble_composes_in_fixed_order_with_passthrough_last() {
        let mut raw = RawOptions::default();
        raw.effect = vec!["scheme=black".to_string()];
        raw.critical = vec!["y=1.5".to_string()];
        raw.legend = Some("cpu load".to_string());
        raw.gnuplot = vec!["unset grid".to_string()];
        let cfg = config(raw);
        let script = build_preamble(&cfg, &sources()).unwrap();

        let terminal = script.find("set terminal png").unwrap();
        let ranges = script.find("set xrange").unwrap();
        let arrows = script.find("set arrow").unwrap();
        let title = script.find("set title \"cpu load\"").unwrap();
        let user = script.find("unset grid").unwrap();
        assert!(terminal < ranges && ranges < arrows && arrows < title && title < user);
        assert!(script.ends_with("unset grid\n"));
    }

    #[test]
    fn multiplot_plot_command_names_one_block_per_source() {
        assert_eq!(
            multiplot_plot_command(2, 1, 3),
            "plot '-' using 1:3, '-' using 1:3\n"
        );
        assert_eq!(multiplot_plot_command(1, 1, 2), "plot '-' using 1:2\n");
    }
}
