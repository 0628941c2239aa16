//! Construction d'enveloppes SOAP.

use std::io;

use crate::xml::{XmlOut, XmlSink};

const ENVELOPE_ATTRS: &str = r#"xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/""#;

/// Valeur du header SOAPACTION, guillemets inclus.
pub fn soap_action_header(service_type: &str, action: &str) -> String {
    format!("\"{service_type}#{action}\"")
}

/// Produit l'enveloppe d'une requête d'action.
///
/// Chaque argument devient un enfant texte de `u:<Action>`, dans l'ordre
/// fourni. Retourne le nombre d'octets produits, ce qui permet de
/// dimensionner le Content-Length avec un puits nul.
pub fn write_action_request(
    sink: &mut dyn XmlSink,
    service_type: &str,
    action: &str,
    args: &[(String, String)],
) -> io::Result<usize> {
    write_envelope(sink, service_type, &format!("u:{action}"), args)
}

/// Produit l'enveloppe d'une réponse d'action.
pub fn write_action_response(
    sink: &mut dyn XmlSink,
    service_type: &str,
    action: &str,
    args: &[(String, String)],
) -> io::Result<usize> {
    write_envelope(sink, service_type, &format!("u:{action}Response"), args)
}

fn write_envelope(
    sink: &mut dyn XmlSink,
    service_type: &str,
    element: &str,
    args: &[(String, String)],
) -> io::Result<usize> {
    let mut out = XmlOut::new(sink);
    let mut produced = out.preamble()?;
    produced += out.open_ns(None, "s:Envelope", Some(ENVELOPE_ATTRS))?;
    produced += out.open("s:Body")?;
    produced += out.open_with(element, &format!(r#"xmlns:u="{service_type}""#))?;
    for (name, value) in args {
        produced += out.text_element(name, value)?;
    }
    produced += out.close(element)?;
    produced += out.close("s:Body")?;
    produced += out.close_ns(Some("s"), "Envelope")?;
    Ok(produced)
}
