#![forbid(unsafe_code)]

pub mod config;
pub mod encode_ffmpeg;
pub mod error;
pub mod gnuplot;
pub mod scratch;
pub mod sequence;
pub mod source;
pub mod timing;

pub use config::{AxisBound, ConfigFile, CriticalValues, Effects, RawOptions, RunConfig, Scheme, Size};
pub use error::{ChronoplotError, ChronoplotResult, Phase};
pub use scratch::ScratchDirs;
pub use sequence::frame_sequence;
pub use source::SourceRecordSet;
pub use timing::{AnimationTiming, AnimationType};
