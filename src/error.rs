use std::collections::TryReserveError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DevError {
    /// A non-blocking call could not proceed without suspending.
    #[error("operation would block")]
    WouldBlock,

    /// A blocked call was cancelled before it could complete.
    /// No bytes were consumed or produced.
    #[error("blocked operation was interrupted")]
    Interrupted,

    /// Lazy growth of a device failed to allocate.
    #[error("out of memory during device allocation")]
    OutOfMemory,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The caller-supplied buffer is inaccessible. Only produced by
    /// embedders that dispatch raw user buffers; safe callers never see it.
    #[error("caller buffer is inaccessible")]
    CopyFault,

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<TryReserveError> for DevError {
    fn from(_: TryReserveError) -> Self {
        DevError::OutOfMemory
    }
}

impl From<DevError> for std::io::Error {
    fn from(err: DevError) -> Self {
        use std::io::ErrorKind;
        let kind = match err {
            DevError::WouldBlock => ErrorKind::WouldBlock,
            DevError::Interrupted => ErrorKind::Interrupted,
            DevError::OutOfMemory => ErrorKind::OutOfMemory,
            DevError::InvalidArgument(_) => ErrorKind::InvalidInput,
            DevError::CopyFault | DevError::Config(_) => ErrorKind::Other,
        };
        std::io::Error::new(kind, err)
    }
}

pub type Result<T> = std::result::Result<T, DevError>;
