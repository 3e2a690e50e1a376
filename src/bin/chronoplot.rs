use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use tracing::{debug, info, warn};

use chronoplot::{
    AnimationTiming, ChronoplotError, ConfigFile, Phase, RawOptions, RunConfig, ScratchDirs,
    SourceRecordSet, encode_ffmpeg, frame_sequence, gnuplot,
    source::{check_source_file, scan_source},
    timing::{resolve_animation_type, total_records},
};

/// Animate timestamped data series into a video by driving gnuplot and ffmpeg.
#[derive(Parser, Debug)]
#[command(name = "chronoplot", version)]
struct Cli {
    /// Data files to animate; each line is `<timestamp> <value>`.
    #[arg(required = true)]
    source: Vec<String>,

    /// Timestamp format of the source records (strftime syntax).
    #[arg(short = 't', long = "time-format")]
    time_format: Option<String>,

    /// Records consumed per frame (may be fractional).
    #[arg(short = 'S', long)]
    speed: Option<f64>,

    /// Frames per second of the produced video.
    #[arg(short = 'F', long)]
    fps: Option<f64>,

    /// Animation duration in seconds.
    #[arg(short = 'T', long)]
    duration: Option<f64>,

    /// Lower x-axis bound: "auto", "min", or a timestamp.
    #[arg(short = 'x', long = "x-min")]
    x_min: Option<String>,

    /// Upper x-axis bound: "auto", "max", or a timestamp.
    #[arg(short = 'X', long = "x-max")]
    x_max: Option<String>,

    /// Lower y-axis bound: "auto", "min", or a number.
    #[arg(short = 'y', long = "y-min")]
    y_min: Option<String>,

    /// Upper y-axis bound: "auto", "max", or a number.
    #[arg(short = 'Y', long = "y-max")]
    y_max: Option<String>,

    /// Highlighted reference line, `x=<timestamp>` or `y=<number>`; repeatable.
    #[arg(short = 'c', long = "critical")]
    critical: Vec<String>,

    /// Plot title.
    #[arg(short = 'l', long)]
    legend: Option<String>,

    /// Render effect, `scheme=white|black` or `size=xga|hd`; repeatable.
    #[arg(short = 'e', long = "effect")]
    effect: Vec<String>,

    /// Raw gnuplot directive appended after the built-in configuration;
    /// repeatable, syntax is your responsibility.
    #[arg(short = 'g', long = "gnuplot")]
    gnuplot: Vec<String>,

    /// Optional JSON config file supplying options the command line left unset.
    #[arg(short = 'f', long = "config")]
    config: Option<PathBuf>,

    /// Name of the animation (also the output directory name).
    #[arg(short = 'n', long)]
    name: Option<String>,

    /// Substitute safe defaults for recoverable errors instead of failing.
    #[arg(short = 'E', long = "ignore-errors")]
    ignore_errors: bool,

    /// Be verbose; use multiple times to be more verbose.
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn into_raw_options(self) -> RawOptions {
        RawOptions {
            sources: self.source,
            time_format: self.time_format,
            speed: self.speed,
            fps: self.fps,
            duration: self.duration,
            x_min: self.x_min,
            x_max: self.x_max,
            y_min: self.y_min,
            y_max: self.y_max,
            critical: self.critical,
            legend: self.legend,
            effect: self.effect,
            gnuplot: self.gnuplot,
            name: self.name,
            ignore_errors: self.ignore_errors,
        }
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            use clap::error::ErrorKind;
            let informational =
                matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion);
            let _ = e.print();
            return if informational {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(Phase::ArgumentParse.exit_code())
            };
        },
    };

    init_tracing(cli.verbose);

    if let Err(err) = check_dependencies() {
        return exit_failure(Phase::MissingDependency, &err, None);
    }

    let scratch = match ScratchDirs::create() {
        Ok(scratch) => scratch,
        Err(err) => return exit_failure(Phase::ScratchSetup, &err, None),
    };

    match run(cli, &scratch) {
        Ok(()) => {
            scratch.cleanup();
            ExitCode::SUCCESS
        },
        Err((phase, err)) => exit_failure(phase, &err, Some(scratch)),
    }
}

fn exit_failure(phase: Phase, err: &ChronoplotError, scratch: Option<ScratchDirs>) -> ExitCode {
    eprintln!("[ERROR] chronoplot: fatal error: {err}");
    if let Some(scratch) = scratch {
        scratch.cleanup();
    }
    ExitCode::from(phase.exit_code())
}

fn init_tracing(verbosity: u8) {
    let default = match verbosity {
        0 => "error",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn check_dependencies() -> Result<(), ChronoplotError> {
    for tool in ["gnuplot", "ffmpeg"] {
        which::which(tool).map_err(|e| {
            ChronoplotError::resource(format!("required command '{tool}' is not available: {e}"))
        })?;
    }
    Ok(())
}

type PhaseResult<T> = Result<T, (Phase, ChronoplotError)>;

fn run(cli: Cli, scratch: &ScratchDirs) -> PhaseResult<()> {
    let config = build_config(cli)?;
    let sources = resolve_sources(&config)?;

    let (timing, sequences) = resolve_timing(&config, &sources)?;
    info!(
        animation_type = ?timing.animation_type,
        speed = timing.speed,
        fps = timing.fps,
        duration = timing.duration,
        frames = timing.frame_count,
        "timing resolved"
    );

    let written = gnuplot::render_frames(
        &config,
        &sources,
        &timing,
        &sequences,
        scratch.frames_dir(),
    )
    .map_err(|e| (Phase::FrameRendering, e))?;
    debug!(written, "frame images rendered");

    let name = config
        .output_name
        .clone()
        .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string());
    let output_dir =
        encode_ffmpeg::resolve_output_dir(&name, scratch.root_dir(), config.ignore_errors)
            .map_err(|e| (Phase::VideoAssembly, e))?;
    encode_ffmpeg::assemble_video(
        scratch.frames_dir(),
        timing.frame_count,
        timing.fps,
        &output_dir,
        &name,
    )
    .map_err(|e| (Phase::VideoAssembly, e))?;

    Ok(())
}

fn build_config(cli: Cli) -> PhaseResult<RunConfig> {
    let config_path = cli.config.clone();
    let mut raw = cli.into_raw_options();

    if let Some(path) = config_path {
        match ConfigFile::load(&path) {
            Ok(file) => raw.merge_config_file(file),
            Err(err) if raw.ignore_errors => {
                warn!("skipping config file: {err}");
            },
            Err(err) => return Err((Phase::ConfigParse, err)),
        }
    }

    let config = raw.validate().map_err(|e| (Phase::ArgumentCheck, e))?;
    for path in &config.sources {
        check_source_file(path).map_err(|e| (Phase::ArgumentCheck, e))?;
    }
    Ok(config)
}

fn resolve_sources(config: &RunConfig) -> PhaseResult<Vec<SourceRecordSet>> {
    let mut sources = Vec::with_capacity(config.sources.len());
    for path in &config.sources {
        let summary =
            scan_source(path, &config.time_format).map_err(|e| (Phase::SourceResolution, e))?;
        if let Some(summary) = summary {
            sources.push(summary);
        }
    }
    if sources.is_empty() {
        return Err((
            Phase::SourceResolution,
            ChronoplotError::validation("no valid source file remains after scanning"),
        ));
    }
    Ok(sources)
}

fn resolve_timing(
    config: &RunConfig,
    sources: &[SourceRecordSet],
) -> PhaseResult<(AnimationTiming, Vec<Vec<u64>>)> {
    let animation_type =
        resolve_animation_type(sources).map_err(|e| (Phase::TimingResolution, e))?;
    let records = total_records(animation_type, sources);
    let timing = AnimationTiming::resolve(config, animation_type, records)
        .map_err(|e| (Phase::TimingResolution, e))?;
    let sequences = sources
        .iter()
        .map(|source| frame_sequence(source.record_count, timing.speed))
        .collect();
    Ok((timing, sequences))
}
