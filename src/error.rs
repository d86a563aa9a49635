use thiserror::Error;

/// Failures a single series run can hit.
///
/// Every variant is caught at the run boundary and turned into a notification;
/// none of them escape to the scheduler.
#[derive(Debug, Error)]
pub enum GrabError {
    #[error("fetch {url} failed: {message}")]
    Fetch {
        url: String,
        status: Option<u16>,
        message: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("forward failed: {0}")]
    Forward(String),

    #[error("episode store: {0}")]
    Store(String),
}

impl GrabError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Fetch { .. } => "fetch",
            Self::NotFound(_) => "not_found",
            Self::Config(_) => "config",
            Self::Forward(_) => "forward",
            Self::Store(_) => "store",
        }
    }
}

impl From<std::io::Error> for GrabError {
    fn from(err: std::io::Error) -> Self {
        Self::Store(err.to_string())
    }
}
