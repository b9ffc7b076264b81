use std::io;

/// Error kinds surfaced by the table layer.
///
/// Iterators and builders remember the first error they hit and keep
/// reporting it from `status()`, so the type is cloneable; io errors clone
/// as kind plus message.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Io(#[from] io::Error),

    #[error("corruption: {0}")]
    Corruption(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("key not found")]
    KeyNotFound,
}

impl Clone for Error {
    fn clone(&self) -> Error {
        match self {
            Error::Io(e) => Error::Io(io::Error::new(e.kind(), e.to_string())),
            Error::Corruption(s) => Error::Corruption(s.clone()),
            Error::NotSupported(s) => Error::NotSupported(s.clone()),
            Error::InvalidArgument(s) => Error::InvalidArgument(s.clone()),
            Error::KeyNotFound => Error::KeyNotFound,
        }
    }
}

impl Error {
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_))
    }
}
