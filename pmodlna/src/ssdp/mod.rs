//! # Module SSDP - Simple Service Discovery Protocol
//!
//! Découverte UPnP sur UDP multicast : annonces NOTIFY alive/byebye,
//! requêtes M-SEARCH et réponses unicast.
//!
//! ## Fonctionnalités
//!
//! - ✅ Codec des datagrammes SSDP (parse et émission)
//! - ✅ Jeu d'annonces par scope (root device, UDN, types)
//! - ✅ Correspondance explicite des cibles de recherche ST
//!
//! ## Constantes SSDP
//!
//! - **Adresse multicast** : 239.255.255.250:1900
//! - **Max-Age** : 1800 secondes par défaut

mod announce;
mod message;

pub use announce::{Announcement, NotificationScope, ScopeKind};
pub use message::{SsdpMessage, extract_udn, format_alive, format_byebye, format_msearch,
                  format_search_reply};

use std::net::Ipv4Addr;

/// Adresse multicast SSDP.
pub const SSDP_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);

/// Port SSDP.
pub const SSDP_PORT: u16 = 1900;

/// Durée de validité des annonces (secondes).
pub const MAX_AGE: u32 = 1800;
