//! Configuration du moteur.
//!
//! Toutes les constantes de fonctionnement sont regroupées dans
//! [`DlnaOptions`], désérialisable depuis un fichier YAML. Les options sont
//! passées explicitement aux constructeurs, il n'y a pas de configuration
//! globale.

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Options de fonctionnement du moteur UPnP.
///
/// Les valeurs par défaut conviennent à un déploiement embarqué typique.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DlnaOptions {
    /// Pause coopérative entre deux tours de boucle (ms).
    pub loop_delay_ms: u64,

    /// Intervalle minimal entre deux passes du scheduler (ms).
    pub run_scheduler_every_ms: u64,

    /// Intervalle minimal entre deux passes de publication d'événements (ms).
    pub run_subscriptions_every_ms: u64,

    /// Timeout par appel HTTP (ms).
    pub http_request_timeout_ms: u64,

    /// Taille de lecture pour le parsing XML incrémental.
    pub xml_parser_buffer_size: usize,

    /// Port multicast SSDP.
    pub ssdp_port: u16,

    /// Timeout par défaut accordé aux abonnés (secondes).
    pub subscription_timeout_sec: u32,

    /// Nombre d'échecs d'envoi avant abandon d'une notification.
    pub max_send_errors: u8,

    /// Cadence de répétition des M-SEARCH côté control point (ms).
    pub msearch_repeat_ms: u64,

    /// Cadence de réconciliation des abonnements côté control point (ms).
    pub event_subscription_retry_ms: u64,

    /// Durée de validité des annonces SSDP (secondes).
    pub max_age: u32,

    /// Valeur du header SERVER sur les annonces et réponses.
    pub server_header: String,
}

impl Default for DlnaOptions {
    fn default() -> Self {
        Self {
            loop_delay_ms: 5,
            run_scheduler_every_ms: 10,
            run_subscriptions_every_ms: 10,
            http_request_timeout_ms: 6000,
            xml_parser_buffer_size: 512,
            ssdp_port: 1900,
            subscription_timeout_sec: 1800,
            max_send_errors: 3,
            msearch_repeat_ms: 10_000,
            event_subscription_retry_ms: 5000,
            max_age: 1800,
            server_header: "PMODLNA/0.1 UPnP/1.0 DLNADOC/1.50".to_string(),
        }
    }
}

impl DlnaOptions {
    /// Charge les options depuis une chaîne YAML.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Charge les options depuis un fichier YAML.
    pub fn from_yaml_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }
}
