pub type ChronoplotResult<T> = Result<T, ChronoplotError>;

#[derive(thiserror::Error, Debug)]
pub enum ChronoplotError {
    #[error("invalid value: {0}")]
    Validation(String),

    #[error("arithmetic error: {0}")]
    Arithmetic(String),

    #[error("resource error: {0}")]
    Resource(String),

    #[error("internal error (this is a bug): {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ChronoplotError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn arithmetic(msg: impl Into<String>) -> Self {
        Self::Arithmetic(msg.into())
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        Self::Resource(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Pipeline phases, each with its own process exit code so scripts can tell
/// where a run died without parsing the error message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    ArgumentParse,
    ConfigParse,
    ArgumentCheck,
    MissingDependency,
    SourceResolution,
    TimingResolution,
    FrameRendering,
    VideoAssembly,
    ScratchSetup,
}

impl Phase {
    pub fn exit_code(self) -> u8 {
        match self {
            Phase::ArgumentParse => 10,
            Phase::ConfigParse => 20,
            Phase::ArgumentCheck => 30,
            Phase::MissingDependency => 40,
            Phase::SourceResolution => 50,
            Phase::TimingResolution => 60,
            Phase::FrameRendering => 70,
            Phase::VideoAssembly => 80,
            Phase::ScratchSetup => 90,
        }
    }
}
