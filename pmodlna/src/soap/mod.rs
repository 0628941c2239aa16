//! # Module SOAP - invocation d'actions UPnP
//!
//! Construction et parsing des enveloppes SOAP 1.1 du profil UPnP, par
//! l'écrivain streaming et le parseur incrémental.
//!
//! ## Fonctionnalités
//!
//! - ✅ Sérialisation des requêtes d'action (côté control point)
//! - ✅ Parsing des réponses en arguments `(nom, valeur)`
//! - ✅ Extraction d'une action entrante avec ses arguments (côté device)
//! - ✅ Construction des réponses et des SOAP Faults

mod action;
mod builder;
mod fault;
mod parser;

pub use action::{ActionReply, ActionRequest};
pub use builder::{soap_action_header, write_action_request, write_action_response};
pub use fault::write_soap_fault;
pub use parser::{SoapAction, SoapError, parse_action, parse_action_reply};

/// Codes d'erreur SOAP UPnP standards.
pub mod error_codes {
    /// Action invalide
    pub const INVALID_ACTION: &str = "401";

    /// Arguments invalides
    pub const INVALID_ARGS: &str = "402";

    /// Action échouée
    pub const ACTION_FAILED: &str = "501";

    /// Valeur d'argument invalide
    pub const ARGUMENT_VALUE_INVALID: &str = "600";

    /// Valeur d'argument hors limites
    pub const ARGUMENT_VALUE_OUT_OF_RANGE: &str = "601";

    /// Action optionnelle non implémentée
    pub const OPTIONAL_ACTION_NOT_IMPLEMENTED: &str = "602";

    /// Mémoire insuffisante
    pub const OUT_OF_MEMORY: &str = "603";

    /// Intervention humaine requise
    pub const HUMAN_INTERVENTION_REQUIRED: &str = "604";

    /// Argument chaîne trop long
    pub const STRING_ARGUMENT_TOO_LONG: &str = "605";
}
