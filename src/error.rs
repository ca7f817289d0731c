//! Error taxonomy shared across the crate.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A value could not cross the serialization boundary.
    #[error("encoding failed: {0}")]
    Encoding(String),

    /// A tag-based cell lookup matched nothing.
    #[error("no cell matched the selector")]
    CellNotFound,

    /// The interpreter raised during an execution. Propagated verbatim;
    /// aborts the remainder of any batch in progress.
    #[error("{name}: {message}")]
    Remote {
        name: String,
        message: String,
        trace: Vec<String>,
    },

    /// Operation attempted on a session not yet started or already shut down.
    #[error("session lifecycle: {0}")]
    Lifecycle(String),

    /// The kernel process or its wire protocol failed.
    #[error("kernel transport: {0}")]
    Transport(String),
}

impl Error {
    pub fn encoding(msg: impl Into<String>) -> Self {
        Error::Encoding(msg.into())
    }

    pub fn lifecycle(msg: impl Into<String>) -> Self {
        Error::Lifecycle(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Error::Transport(msg.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Transport(e.to_string())
    }
}
