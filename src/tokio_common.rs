//! Error type shared by the `tokio-modbus` based data source.
use crate::protocol as proto;

/// Represents all possible errors that can occur while fetching from the controller.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Wraps `proto::Error`.
    #[error(transparent)]
    ProtocolError(#[from] proto::Error),

    /// Wraps `tokio_modbus::ExceptionCode`.
    #[error(transparent)]
    TokioExceptionError(#[from] tokio_modbus::ExceptionCode),

    /// Wraps `tokio_modbus::Error`.
    #[error(transparent)]
    TokioError(#[from] tokio_modbus::Error),

    /// Socket setup or address resolution failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Not a single register block could be read.
    #[error("No register block could be read")]
    NoData,
}

impl Error {
    /// Whether the connection is unusable after this error.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::TokioError(_) | Error::Io(_))
    }
}

/// The result type for tokio operations.
pub(crate) type Result<T> = std::result::Result<T, crate::tokio_common::Error>;
