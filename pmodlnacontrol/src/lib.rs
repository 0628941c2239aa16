//! # PMODLNA Control - control point UPnP/DLNA
//!
//! Control point construit sur le moteur `pmodlna` : découverte SSDP,
//! registre des devices découverts, invocation d'actions SOAP et
//! abonnements aux événements.
//!
//! ## Fonctionnalités
//!
//! - ✅ Découverte M-SEARCH avec fenêtre d'attente bornée
//! - ✅ Registre dédoublonné par UDN, éviction sur byebye et max-age
//! - ✅ Téléchargement et parsing incrémental des descriptions
//! - ✅ Invocation d'actions et collecte des résultats
//! - ✅ Abonnements aux événements avec réconciliation périodique
//!
//! ## Architecture
//!
//! - [`ControlPoint`] : orchestration de la découverte et des actions
//! - [`DeviceRegistry`] : devices découverts, dédoublonnés par UDN
//! - [`CpSubscriptionManager`] : cycle de vie des abonnements

mod control_point;
mod errors;
mod registry;
mod subscriptions;

pub use control_point::{ControlPoint, XmlProcessor};
pub use errors::ControlPointError;
pub use registry::{DeviceRegistry, DiscoveredDevice};
pub use subscriptions::{CpSubscriptionManager, EventCallback, ServiceSubscription,
                        SubscriptionPhase};
