//! # Module eventing - abonnements GENA côté device
//!
//! Gestion des abonnements aux événements d'un device : SUBSCRIBE et
//! renouvellement, UNSUBSCRIBE, mise en file des notifications et passes
//! de publication avec reprise sur erreur.
//!
//! ## Fonctionnalités
//!
//! - ✅ SID générés côté serveur, numéros SEQ réservés à l'enfilage
//! - ✅ Table d'abonnements en arène à clés générationnelles
//! - ✅ File FIFO de notifications avec blocage tête de ligne par abonné
//! - ✅ Expiration automatique avec nettoyage en cascade
//! - ✅ Abandon après `max_send_errors` échecs d'envoi

mod arena;
mod device;

pub use arena::{SubKey, SubscriptionArena};
pub use device::{DeviceSubscriptionManager, EventError, EventWriter, PublishStats,
                 SubscribeAck, Subscription, parse_timeout_header, write_notify_body};
