use tracing::warn;

use crate::{
    config::{DEFAULT_FPS, DEFAULT_SPEED, RunConfig},
    error::{ChronoplotError, ChronoplotResult},
    source::SourceRecordSet,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnimationType {
    /// All sources merged into a single scrolling series.
    Oneline,
    /// Sources overlaid as independently paced series on a shared timeline.
    Multiplot,
}

/// Classify the run by scanning for the sources holding the earliest start
/// and the latest end of the shared timeline.
///
/// The fold is deliberately order-dependent: a source that takes over the
/// minimum also takes the maximum when its end is at least as late, and vice
/// versa. Downstream mode selection depends on these exact tie-breaks, so the
/// comparisons must not be "simplified".
pub fn resolve_animation_type(sources: &[SourceRecordSet]) -> ChronoplotResult<AnimationType> {
    if sources.is_empty() {
        return Err(ChronoplotError::internal(
            "animation type requested for an empty source set",
        ));
    }

    let mut min_holder = 0usize;
    let mut max_holder = 0usize;
    for (idx, source) in sources.iter().enumerate().skip(1) {
        if source.time_min < sources[min_holder].time_min {
            min_holder = idx;
            if source.time_max >= sources[max_holder].time_max {
                max_holder = idx;
            }
        } else if source.time_max > sources[max_holder].time_max {
            max_holder = idx;
            if source.time_min <= sources[min_holder].time_min {
                min_holder = idx;
            }
        }
    }

    if min_holder == max_holder && sources.len() != 1 {
        Ok(AnimationType::Multiplot)
    } else {
        Ok(AnimationType::Oneline)
    }
}

/// Total records driving the timing math: the longest source for Multiplot
/// (series advance in parallel), the sum of all sources for Oneline (they are
/// drained one after another).
pub fn total_records(animation_type: AnimationType, sources: &[SourceRecordSet]) -> u64 {
    match animation_type {
        AnimationType::Multiplot => sources.iter().map(|s| s.record_count).max().unwrap_or(0),
        AnimationType::Oneline => sources.iter().map(|s| s.record_count).sum(),
    }
}

/// Fully resolved animation timing; every field is concrete after
/// [`AnimationTiming::resolve`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AnimationTiming {
    pub animation_type: AnimationType,
    pub total_records: u64,
    /// Records consumed per frame; may be fractional.
    pub speed: f64,
    pub fps: f64,
    /// Animation duration in seconds.
    pub duration: f64,
    pub frame_count: u64,
}

/// The exact-equality check used when speed, fps and duration were all
/// supplied. Kept as literal float equality: a duration like `10.0000001`
/// against an expected `10.0` is a hard mismatch. Isolated here so a future
/// tolerance change is a one-line edit.
fn duration_matches_exactly(expected: f64, supplied: f64) -> bool {
    expected == supplied
}

fn checked_div(what: &str, dividend: f64, divisor: f64) -> ChronoplotResult<f64> {
    if divisor == 0.0 {
        return Err(ChronoplotError::arithmetic(format!(
            "division by zero while computing {what}"
        )));
    }
    let result = dividend / divisor;
    if !result.is_finite() {
        return Err(ChronoplotError::arithmetic(format!(
            "computing {what} produced a non-finite value"
        )));
    }
    Ok(result)
}

#[derive(Clone, Copy, Debug, Default)]
struct TimingRequest {
    speed: Option<f64>,
    fps: Option<f64>,
    duration: Option<f64>,
}

impl AnimationTiming {
    pub fn resolve(
        config: &RunConfig,
        animation_type: AnimationType,
        total_records: u64,
    ) -> ChronoplotResult<Self> {
        let request = TimingRequest {
            speed: config.speed,
            fps: config.fps,
            duration: config.duration,
        };
        let (speed, fps, duration) =
            reconcile(request, total_records, config.ignore_errors)?;

        // Speed or fps below one record/frame makes the sequencing and frame
        // generation phases degenerate into enormous runs.
        let (speed, fps, duration) = if speed < 1.0 || fps < 1.0 {
            if config.ignore_errors {
                warn!(
                    speed,
                    fps, "speed/fps below 1, resetting timing to defaults"
                );
                reconcile(TimingRequest::default(), total_records, config.ignore_errors)?
            } else {
                return Err(ChronoplotError::validation(format!(
                    "animation too small: speed/fps resolved to {speed}/{fps}, \
                     both must be >= 1 (use --ignore-errors to fall back to defaults)"
                )));
            }
        } else {
            (speed, fps, duration)
        };

        let frame_count = (total_records as f64 / speed).ceil() as u64;

        Ok(AnimationTiming {
            animation_type,
            total_records,
            speed,
            fps,
            duration,
            frame_count,
        })
    }
}

/// One pass of the speed/fps/duration reconciliation: whichever subset the
/// user supplied determines which remaining quantity is derived from
/// `records = speed * fps * duration`.
fn reconcile(
    request: TimingRequest,
    total_records: u64,
    ignore_errors: bool,
) -> ChronoplotResult<(f64, f64, f64)> {
    let records = total_records as f64;
    let mut speed = request.speed.unwrap_or(DEFAULT_SPEED);
    let mut fps = request.fps.unwrap_or(DEFAULT_FPS);

    let duration = match (
        request.speed.is_some(),
        request.fps.is_some(),
        request.duration.is_some(),
    ) {
        // Nothing set, or any subset of speed/fps set: derive the duration.
        (_, _, false) => checked_div("duration", records, speed * fps)?,

        // Duration set and fps free: derive fps from speed (given or default).
        (_, false, true) => {
            let duration = request.duration.unwrap_or_default();
            fps = checked_div("fps", records, speed * duration)?;
            duration
        },

        // Duration and fps set: derive the speed.
        (false, true, true) => {
            let duration = request.duration.unwrap_or_default();
            speed = checked_div("speed", records, fps * duration)?;
            duration
        },

        // Everything set: verify consistency instead of deriving.
        (true, true, true) => {
            let supplied = request.duration.unwrap_or_default();
            let expected = checked_div("duration", records, speed * fps)?;
            if duration_matches_exactly(expected, supplied) {
                supplied
            } else if ignore_errors {
                warn!(
                    supplied,
                    expected, "duration inconsistent with speed and fps, overwriting"
                );
                expected
            } else {
                return Err(ChronoplotError::validation(format!(
                    "duration {supplied} is inconsistent with speed {speed} and fps {fps} \
                     over {total_records} records (expected {expected})"
                )));
            }
        },
    };

    Ok((speed, fps, duration))
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDateTime;

    use super::*;
    use crate::config::{DEFAULT_TIME_FORMAT, RawOptions};

    fn source(name: &str, records: u64, time_min: &str, time_max: &str) -> SourceRecordSet {
        SourceRecordSet {
            path: name.into(),
            record_count: records,
            time_min: ts(time_min),
            time_max: ts(time_max),
            data_min: 0.0,
            data_max: 1.0,
            date_column: 1,
            data_column: 2,
        }
    }

    fn ts(raw: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(raw, DEFAULT_TIME_FORMAT).unwrap()
    }

    fn config(speed: Option<f64>, fps: Option<f64>, duration: Option<f64>) -> RunConfig {
        let raw = RawOptions {
            sources: vec!["data.txt".to_string()],
            speed,
            fps,
            duration,
            ..RawOptions::default()
        };
        raw.validate().unwrap()
    }

    #[test]
    fn single_source_is_always_oneline() {
        let sources = [source("a", 5, "[2013-01-01 00:00:00]", "[2013-12-31 00:00:00]")];
        assert_eq!(
            resolve_animation_type(&sources).unwrap(),
            AnimationType::Oneline
        );
    }

    #[test]
    fn strictly_containing_range_is_multiplot() {
        let sources = [
            source("a", 5, "[2013-02-01 00:00:00]", "[2013-03-01 00:00:00]"),
            source("b", 5, "[2013-01-01 00:00:00]", "[2013-12-01 00:00:00]"),
        ];
        assert_eq!(
            resolve_animation_type(&sources).unwrap(),
            AnimationType::Multiplot
        );
    }

    #[test]
    fn disjoint_ranges_are_oneline() {
        let sources = [
            source("a", 5, "[2013-01-01 00:00:00]", "[2013-02-01 00:00:00]"),
            source("b", 5, "[2013-03-01 00:00:00]", "[2013-04-01 00:00:00]"),
        ];
        assert_eq!(
            resolve_animation_type(&sources).unwrap(),
            AnimationType::Oneline
        );
    }

    #[test]
    fn takeover_of_min_also_takes_equal_max() {
        // The second source starts earlier and ends at the same instant: it
        // takes both holder roles, so the run is multiplot.
        let sources = [
            source("a", 5, "[2013-06-01 00:00:00]", "[2013-12-01 00:00:00]"),
            source("b", 5, "[2013-01-01 00:00:00]", "[2013-12-01 00:00:00]"),
        ];
        assert_eq!(
            resolve_animation_type(&sources).unwrap(),
            AnimationType::Multiplot
        );
    }

    #[test]
    fn empty_source_set_is_an_internal_error() {
        assert!(matches!(
            resolve_animation_type(&[]),
            Err(ChronoplotError::Internal(_))
        ));
    }

    #[test]
    fn total_records_sums_for_oneline_and_maxes_for_multiplot() {
        let sources = [
            source("a", 30, "[2013-01-01 00:00:00]", "[2013-02-01 00:00:00]"),
            source("b", 70, "[2013-03-01 00:00:00]", "[2013-04-01 00:00:00]"),
        ];
        assert_eq!(total_records(AnimationType::Oneline, &sources), 100);
        assert_eq!(total_records(AnimationType::Multiplot, &sources), 70);
    }

    #[test]
    fn derives_duration_from_speed_and_fps() {
        let timing =
            AnimationTiming::resolve(&config(Some(2.0), Some(5.0), None), AnimationType::Oneline, 100)
                .unwrap();
        assert_eq!(timing.duration, 10.0);
        assert_eq!(timing.frame_count, 50);
    }

    #[test]
    fn derives_speed_from_fps_and_duration() {
        let timing =
            AnimationTiming::resolve(&config(None, Some(5.0), Some(10.0)), AnimationType::Oneline, 100)
                .unwrap();
        assert_eq!(timing.speed, 2.0);
    }

    #[test]
    fn derives_fps_from_speed_and_duration() {
        let timing =
            AnimationTiming::resolve(&config(Some(2.0), None, Some(10.0)), AnimationType::Oneline, 100)
                .unwrap();
        assert_eq!(timing.fps, 5.0);
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let timing =
            AnimationTiming::resolve(&config(None, None, None), AnimationType::Oneline, 100)
                .unwrap();
        assert_eq!(timing.speed, DEFAULT_SPEED);
        assert_eq!(timing.fps, DEFAULT_FPS);
        assert_eq!(timing.duration, 100.0 / (DEFAULT_SPEED * DEFAULT_FPS));
        assert_eq!(timing.frame_count, 100);
    }

    #[test]
    fn consistent_triple_passes_unchanged() {
        let timing = AnimationTiming::resolve(
            &config(Some(2.0), Some(5.0), Some(10.0)),
            AnimationType::Oneline,
            100,
        )
        .unwrap();
        assert_eq!(timing.duration, 10.0);
        assert_eq!(timing.speed, 2.0);
        assert_eq!(timing.fps, 5.0);
    }

    #[test]
    fn inconsistent_triple_is_fatal_without_ignore_errors() {
        let err = AnimationTiming::resolve(
            &config(Some(2.0), Some(5.0), Some(7.0)),
            AnimationType::Oneline,
            100,
        );
        assert!(matches!(err, Err(ChronoplotError::Validation(_))));
    }

    #[test]
    fn inconsistent_triple_is_overwritten_with_ignore_errors() {
        let mut config = config(Some(2.0), Some(5.0), Some(7.0));
        config.ignore_errors = true;
        let timing = AnimationTiming::resolve(&config, AnimationType::Oneline, 100).unwrap();
        assert_eq!(timing.duration, 10.0);
    }

    #[test]
    fn zero_speed_is_an_arithmetic_error() {
        let err = AnimationTiming::resolve(
            &config(Some(0.0), None, None),
            AnimationType::Oneline,
            100,
        );
        assert!(matches!(err, Err(ChronoplotError::Arithmetic(_))));
    }

    #[test]
    fn degenerate_speed_is_fatal_without_ignore_errors() {
        let err = AnimationTiming::resolve(
            &config(Some(0.5), None, None),
            AnimationType::Oneline,
            100,
        );
        assert!(matches!(err, Err(ChronoplotError::Validation(_))));
    }

    #[test]
    fn degenerate_speed_resets_to_defaults_with_ignore_errors() {
        let mut config = config(Some(0.5), None, None);
        config.ignore_errors = true;
        let timing = AnimationTiming::resolve(&config, AnimationType::Oneline, 100).unwrap();
        assert_eq!(timing.speed, DEFAULT_SPEED);
        assert_eq!(timing.fps, DEFAULT_FPS);
        assert_eq!(timing.frame_count, 100);
    }

    #[test]
    fn fractional_speed_rounds_frame_count_up() {
        let timing =
            AnimationTiming::resolve(&config(Some(3.0), None, None), AnimationType::Oneline, 100)
                .unwrap();
        assert_eq!(timing.frame_count, 34);
    }
}
