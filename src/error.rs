use thiserror::Error;

/// Main error type for ks-detect
#[derive(Error, Debug)]
pub enum KsError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Rule compile error (sid {sid}): {reason}")]
    RuleCompileError { sid: u32, reason: String },

    #[error("Invalid rule option: {0}")]
    InvalidRuleOption(String),

    #[error("Invalid pattern notation: {0}")]
    PatternError(String),

    #[error("Duplicate SID: {0}")]
    DuplicateSid(u32),

    #[error("Rule tree error: {0}")]
    RuleTreeError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Channel send error")]
    ChannelSendError,

    #[error("Channel receive error")]
    ChannelRecvError,

    #[error("Thread error: {0}")]
    ThreadError(String),

    #[error("Regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("YAML parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Result type alias for ks-detect operations
pub type Result<T> = std::result::Result<T, KsError>;

impl<T> From<crossbeam::channel::SendError<T>> for KsError {
    fn from(_: crossbeam::channel::SendError<T>) -> Self {
        KsError::ChannelSendError
    }
}

impl From<crossbeam::channel::RecvError> for KsError {
    fn from(_: crossbeam::channel::RecvError) -> Self {
        KsError::ChannelRecvError
    }
}
