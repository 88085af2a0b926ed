use std::fmt;
use std::path::PathBuf;

use prox_core::ReactorError;

#[derive(Debug)]
pub enum LinkError {
    Io { path: PathBuf, source: std::io::Error },
    Config(toml::de::Error),
    Serialize(toml::ser::Error),
    Http(reqwest::Error),
    Status(u16),
    Timeout(u64),
    MissingToken,
    Emit(std::io::Error),
    Reactor(ReactorError),
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::Io { path, source } => write!(f, "{}: {source}", path.display()),
            LinkError::Config(e) => write!(f, "invalid config: {e}"),
            LinkError::Serialize(e) => write!(f, "failed to serialize config: {e}"),
            LinkError::Http(e) => write!(f, "token request failed: {e}"),
            LinkError::Status(code) => write!(f, "token service returned HTTP {code}"),
            LinkError::Timeout(ms) => write!(f, "token request timed out after {ms}ms"),
            LinkError::MissingToken => write!(f, "token service response has no token"),
            LinkError::Emit(e) => write!(f, "failed to write effect: {e}"),
            LinkError::Reactor(e) => write!(f, "reactor error: {e}"),
        }
    }
}

impl std::error::Error for LinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LinkError::Io { source, .. } => Some(source),
            LinkError::Config(e) => Some(e),
            LinkError::Serialize(e) => Some(e),
            LinkError::Http(e) => Some(e),
            LinkError::Emit(e) => Some(e),
            LinkError::Reactor(e) => Some(e),
            _ => None,
        }
    }
}

impl From<toml::de::Error> for LinkError {
    fn from(e: toml::de::Error) -> Self {
        LinkError::Config(e)
    }
}

impl From<toml::ser::Error> for LinkError {
    fn from(e: toml::ser::Error) -> Self {
        LinkError::Serialize(e)
    }
}

impl From<reqwest::Error> for LinkError {
    fn from(e: reqwest::Error) -> Self {
        LinkError::Http(e)
    }
}

impl From<ReactorError> for LinkError {
    fn from(e: ReactorError) -> Self {
        LinkError::Reactor(e)
    }
}

pub type Result<T> = std::result::Result<T, LinkError>;
