//! Erreurs du moteur UPnP.

use thiserror::Error;

/// Erreur générale du moteur UPnP.
///
/// Le moteur ne lève jamais d'erreur fatale depuis la boucle principale :
/// les erreurs réseau sont loguées et réessayées par la couche appelante.
#[derive(Debug, Error)]
pub enum UpnpError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid service '{0}': {1}")]
    InvalidService(String, String),

    #[error("No device matching '{0}'")]
    NoDevice(String),

    #[error("No service matching '{0}'")]
    NoService(String),

    #[error("Device host is not started")]
    NotStarted,

    #[error("Transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),

    #[error("Subscription error: {0}")]
    Event(#[from] crate::eventing::EventError),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}
