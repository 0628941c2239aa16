//! # PMODLNA - moteur UPnP/DLNA 1.0
//!
//! Ce crate implémente le cœur protocolaire d'une pile UPnP/DLNA 1.0 :
//! découverte SSDP, descriptions de devices et de services, actions SOAP,
//! et événements GENA côté device.
//!
//! ## Fonctionnalités
//!
//! - ✅ Annonces SSDP alive/byebye et réponses M-SEARCH pilotées par un scheduler
//! - ✅ Génération XML en streaming avec comptage d'octets
//! - ✅ Parsing XML incrémental sur buffer en append seul
//! - ✅ Pipeline d'actions SOAP (client et serveur)
//! - ✅ Gestion des abonnements aux événements avec SEQ et expiration
//! - ✅ Device host complet piloté par une boucle coopérative
//!
//! ## Architecture
//!
//! - [`host::DeviceHost`] : composition d'un device complet
//! - [`scheduler::Scheduler`] : file de tâches temporisées
//! - [`eventing::DeviceSubscriptionManager`] : abonnements et notifications
//! - [`xml`] : écrivain streaming et parseur incrémental
//! - [`transport`] : seams UDP multicast et HTTP
//!
//! Le moteur progresse exclusivement par appels périodiques (`loop_once`),
//! avec un seul thread de contrôle. Les transports HTTP sont des
//! collaborateurs externes avec timeout fini par appel.

pub mod config;
pub mod devices;
pub mod errors;
pub mod eventing;
pub mod host;
pub mod scheduler;
pub mod soap;
pub mod ssdp;
pub mod strings;
pub mod transport;
pub mod xml;

pub use crate::config::DlnaOptions;
pub use crate::errors::UpnpError;
pub use crate::host::DeviceHost;
