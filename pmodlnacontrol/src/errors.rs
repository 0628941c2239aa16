//! Erreurs du control point.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControlPointError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] pmodlna::transport::TransportError),

    #[error("{0}")]
    ParsingError(String),

    #[error("No device matching '{0}'")]
    NoDevice(String),

    #[error("No service matching '{0}' on device '{1}'")]
    NoService(String, String),

    #[error("Discovery has not been started")]
    NotStarted,

    #[error("Soap Error: UPnP action call {0}")]
    SoapAction(String),
}
