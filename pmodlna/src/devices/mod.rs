//! # Module devices - modèle de description UPnP
//!
//! Représentation en mémoire d'un device UPnP et de ses services, et les
//! deux productions XML qui en découlent : le document de description
//! racine et la SCPD de chaque service. Les deux sont produites par
//! l'écrivain streaming directement depuis le modèle, jamais depuis un
//! blob XML stocké, avec un ordre de champs fixe pour une sortie stable.
//!
//! Côté control point, [`DescriptionParser`] reconstruit un
//! [`DeviceDescription`] par parsing incrémental d'un document téléchargé.

mod description;
mod parse;
mod service;

pub use description::{DeviceDescription, DeviceIcon};
pub use parse::DescriptionParser;
pub use service::{Direction, ScpdAction, ScpdArgument, ScpdDocument, ServiceDescription,
                  StateVariable, abbrev_for};
