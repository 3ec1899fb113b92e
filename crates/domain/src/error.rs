/// Shared error type used across all SafeTrack crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("invalid circle: {0}")]
    InvalidCircle(String),

    #[error("trusted circle must not be empty")]
    EmptyCircle,

    #[error("trusted circle has {size} entries, at most {max} allowed")]
    CircleTooLarge { size: usize, max: usize },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("persistence: {0}")]
    Persistence(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Stable machine-readable tag carried in `error` frames sent to clients.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Json(_) => "malformed-message",
            Error::Auth(_) => "authentication-failure",
            Error::InvalidCircle(_) => "invalid-circle",
            Error::EmptyCircle => "empty-circle",
            Error::CircleTooLarge { .. } => "circle-too-large",
            Error::InvalidState(_) => "invalid-state",
            Error::Persistence(_) => "persistence-failure",
            Error::Config(_) => "config",
            Error::Other(_) => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
