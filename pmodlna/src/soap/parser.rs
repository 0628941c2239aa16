//! Parsing d'enveloppes SOAP.

use thiserror::Error;
use tracing::debug;

use super::action::ActionReply;
use crate::xml::{XmlPullParser, decode_text};

/// Action UPnP extraite d'une enveloppe SOAP entrante.
#[derive(Debug, Clone)]
pub struct SoapAction {
    /// Nom de l'action (ex: "Play", "SetAVTransportURI").
    pub name: String,

    /// Arguments de l'action, dans l'ordre du document.
    pub args: Vec<(String, String)>,
}

impl SoapAction {
    pub fn argument(&self, name: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Erreur de parsing SOAP.
#[derive(Debug, Error)]
pub enum SoapError {
    #[error("Missing SOAP Envelope")]
    MissingEnvelope,

    #[error("Missing SOAP Body")]
    MissingBody,

    #[error("No action found in SOAP Body")]
    NoAction,
}

/// Extrait l'action d'un POST de contrôle entrant.
///
/// L'action est le premier élément du Body ; ses enfants textes deviennent
/// les arguments `(nom, valeur)`, entités décodées.
pub fn parse_action(body: &[u8]) -> Result<SoapAction, SoapError> {
    let mut parser = XmlPullParser::new(true);
    parser.push(body);

    let mut saw_envelope = false;
    let mut saw_body = false;
    let mut action: Option<SoapAction> = None;

    while let Some(event) = parser.next_event() {
        if event.is_start() {
            match event.depth() {
                1 => {
                    if &*event.name == "Envelope" {
                        saw_envelope = true;
                    }
                }
                2 if saw_envelope => {
                    if &*event.name == "Body" {
                        saw_body = true;
                    }
                }
                3 if saw_body && action.is_none() && event.path.starts_with("/Envelope/Body/") => {
                    action = Some(SoapAction {
                        name: event.name.to_string(),
                        args: Vec::new(),
                    });
                }
                _ => {}
            }
            continue;
        }

        // Événement texte : argument direct de l'action.
        if let Some(current) = action.as_mut() {
            let arg_prefix = format!("/Envelope/Body/{}/", current.name);
            if let Some(arg_name) = event.path.strip_prefix(&arg_prefix) {
                if !arg_name.contains('/') {
                    current.args.push((arg_name.to_string(), event.text));
                }
            }
        }
    }

    if !saw_envelope {
        return Err(SoapError::MissingEnvelope);
    }
    if !saw_body {
        return Err(SoapError::MissingBody);
    }
    action.ok_or(SoapError::NoAction)
}

/// Parse la réponse d'une action côté control point.
///
/// Les événements textes sous `<Action>Response` deviennent les arguments
/// du résultat. L'élément `Result` peut transporter du XML imbriqué encore
/// échappé (DIDL-Lite) : son contenu brut est préservé tel quel, les
/// autres valeurs sont décodées.
pub fn parse_action_reply(body: &[u8], action: &str) -> ActionReply {
    let mut parser = XmlPullParser::new(false);
    parser.push(body);

    let response_path = format!("/Envelope/Body/{action}Response");
    let arg_prefix = format!("{response_path}/");
    let mut reply = ActionReply::invalid();

    while let Some(event) = parser.next_event() {
        if event.is_start() {
            if event.path == response_path {
                reply.valid = true;
            } else if event.path == "/Envelope/Body/Fault" {
                debug!("SOAP fault in response to {}", action);
                return ActionReply::invalid();
            }
            continue;
        }

        if let Some(arg_name) = event.path.strip_prefix(arg_prefix.as_str()) {
            if !arg_name.contains('/') {
                let value = if arg_name == "Result" {
                    event.text
                } else {
                    decode_text(&event.text)
                };
                reply.args.push((arg_name.to_string(), value));
            }
        }
    }

    if !reply.valid {
        debug!("No {}Response element found in SOAP reply", action);
        reply.args.clear();
    }
    reply
}
