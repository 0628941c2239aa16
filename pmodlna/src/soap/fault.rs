//! Construction des SOAP Faults UPnP.

use std::io;

use crate::xml::{XmlOut, XmlSink};

const ENVELOPE_ATTRS: &str = r#"xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/""#;

/// Produit une enveloppe SOAP Fault au format UPnP.
///
/// `code` est un code d'erreur UPnP (voir [`super::error_codes`]), la
/// description est libre. Retourne le nombre d'octets produits.
pub fn write_soap_fault(
    sink: &mut dyn XmlSink,
    code: &str,
    description: &str,
) -> io::Result<usize> {
    let mut out = XmlOut::new(sink);
    let mut produced = out.preamble()?;
    produced += out.open_ns(None, "s:Envelope", Some(ENVELOPE_ATTRS))?;
    produced += out.open("s:Body")?;
    produced += out.element_with("s:Fault", None, |fault| {
        let mut n = fault.text_element("faultcode", "s:Client")?;
        n += fault.text_element("faultstring", "UPnPError")?;
        n += fault.element_with("detail", None, |detail| {
            detail.element_with(
                "UPnPError",
                Some(r#"xmlns="urn:schemas-upnp-org:control-1-0""#),
                |error| {
                    let mut n = error.text_element("errorCode", code)?;
                    n += error.text_element("errorDescription", description)?;
                    Ok(n)
                },
            )
        })?;
        Ok(n)
    })?;
    produced += out.close("s:Body")?;
    produced += out.close_ns(Some("s"), "Envelope")?;
    Ok(produced)
}
