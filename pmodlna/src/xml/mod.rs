//! # Module XML - génération streaming et parsing incrémental
//!
//! Ce module fournit les deux briques XML du moteur :
//!
//! - ✅ Un écrivain streaming qui produit du XML bien formé dans n'importe
//!   quel puits d'octets, chaque opération retournant le nombre d'octets
//!   produits (ce qui permet de précalculer un Content-Length en écrivant
//!   d'abord dans un puits nul)
//! - ✅ Un parseur incrémental qui consomme un buffer en append seul et
//!   restitue un événement `(nom, chemin, texte, attributs)` à la fois
//!
//! Le parseur est tolérant : commentaires et instructions de traitement
//! sont ignorés, une entrée malformée termine le parsing silencieusement.

mod parser;
mod sink;
mod writer;

pub use parser::{XmlEvent, XmlPullParser, XmlStream, decode_text};
pub use sink::{EscapingSink, IoSink, NullSink, XmlSink};
pub use writer::XmlOut;
