//! Services UPnP et documents SCPD.

use std::io;

use crate::xml::{XmlOut, XmlSink};

/// Service attaché à un device.
///
/// Les trois URLs (SCPD, contrôle, événements) sont toutes renseignées ou
/// le service est refusé à l'enregistrement. Côté control point les URLs
/// sont absolues, résolues contre l'URL de base du device.
#[derive(Debug, Clone)]
pub struct ServiceDescription {
    /// Nom court (ex: "AVTransport").
    pub name: String,

    /// URN du type de service.
    pub service_type: String,

    /// URN de l'identifiant de service.
    pub service_id: String,

    pub scpd_url: String,
    pub control_url: String,
    pub event_sub_url: String,

    /// Abréviation de namespace pour les événements LastChange
    /// (ex: "AVT", "RCS").
    pub abbrev: String,

    pub active: bool,
}

impl ServiceDescription {
    /// Construit un service device-side avec les routes standard.
    pub fn new(name: &str, version: u32, abbrev: &str, device_route: &str) -> Self {
        let route = format!("{device_route}/service/{name}");
        Self {
            name: name.to_string(),
            service_type: format!("urn:schemas-upnp-org:service:{name}:{version}"),
            service_id: format!("urn:upnp-org:serviceId:{name}"),
            scpd_url: format!("{route}/desc.xml"),
            control_url: format!("{route}/control"),
            event_sub_url: format!("{route}/event"),
            abbrev: abbrev.to_string(),
            active: true,
        }
    }

    /// Vrai quand les trois URLs d'endpoints sont renseignées.
    pub fn has_all_urls(&self) -> bool {
        !self.scpd_url.is_empty() && !self.control_url.is_empty() && !self.event_sub_url.is_empty()
    }

    /// Produit l'entrée `<service>` de la liste de services.
    pub fn write_service_entry(&self, out: &mut XmlOut<'_>) -> io::Result<usize> {
        out.element_with("service", None, |service| {
            let mut n = service.text_element("serviceType", &self.service_type)?;
            n += service.text_element("serviceId", &self.service_id)?;
            n += service.text_element("SCPDURL", &self.scpd_url)?;
            n += service.text_element("controlURL", &self.control_url)?;
            n += service.text_element("eventSubURL", &self.event_sub_url)?;
            Ok(n)
        })
    }
}

/// Abréviation de namespace LastChange pour un nom de service connu.
pub fn abbrev_for(service_name: &str) -> String {
    match service_name {
        "AVTransport" => "AVT".to_string(),
        "RenderingControl" => "RCS".to_string(),
        "ConnectionManager" => "CMS".to_string(),
        "ContentDirectory" => "CDS".to_string(),
        other => other
            .chars()
            .filter(|c| c.is_ascii_uppercase())
            .take(3)
            .collect(),
    }
}

/// Sens d'un argument d'action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

/// Argument déclaré d'une action SCPD.
#[derive(Debug, Clone)]
pub struct ScpdArgument {
    pub name: String,
    pub direction: Direction,
    pub related_state_variable: String,
}

impl ScpdArgument {
    pub fn new(name: &str, direction: Direction, related: &str) -> Self {
        Self {
            name: name.to_string(),
            direction,
            related_state_variable: related.to_string(),
        }
    }
}

/// Action déclarée dans une SCPD.
#[derive(Debug, Clone)]
pub struct ScpdAction {
    pub name: String,
    pub arguments: Vec<ScpdArgument>,
}

impl ScpdAction {
    pub fn new(name: &str, arguments: Vec<ScpdArgument>) -> Self {
        Self {
            name: name.to_string(),
            arguments,
        }
    }
}

/// Variable d'état déclarée dans une SCPD.
#[derive(Debug, Clone)]
pub struct StateVariable {
    pub name: String,
    pub data_type: String,
    pub send_events: bool,
    pub default_value: Option<String>,
    pub allowed_values: Vec<String>,
}

impl StateVariable {
    pub fn new(name: &str, data_type: &str, send_events: bool) -> Self {
        Self {
            name: name.to_string(),
            data_type: data_type.to_string(),
            send_events,
            default_value: None,
            allowed_values: Vec::new(),
        }
    }
}

/// Document SCPD d'un service : table d'actions et table de variables.
#[derive(Debug, Clone, Default)]
pub struct ScpdDocument {
    pub actions: Vec<ScpdAction>,
    pub variables: Vec<StateVariable>,
}

impl ScpdDocument {
    /// Produit le document SCPD complet.
    pub fn write_scpd(&self, sink: &mut dyn XmlSink) -> io::Result<usize> {
        let mut out = XmlOut::new(sink);
        let mut produced = out.preamble()?;
        produced += out.element_with(
            "scpd",
            Some(r#"xmlns="urn:schemas-upnp-org:service-1-0""#),
            |scpd| {
                let mut n = scpd.element_with("specVersion", None, |spec| {
                    let mut n = spec.int_element("major", 1)?;
                    n += spec.int_element("minor", 0)?;
                    Ok(n)
                })?;
                if !self.actions.is_empty() {
                    n += scpd.element_with("actionList", None, |list| {
                        let mut n = 0;
                        for action in &self.actions {
                            n += write_action(list, action)?;
                        }
                        Ok(n)
                    })?;
                }
                if !self.variables.is_empty() {
                    n += scpd.element_with("serviceStateTable", None, |table| {
                        let mut n = 0;
                        for variable in &self.variables {
                            n += write_state_variable(table, variable)?;
                        }
                        Ok(n)
                    })?;
                }
                Ok(n)
            },
        )?;
        Ok(produced)
    }
}

fn write_action(out: &mut XmlOut<'_>, action: &ScpdAction) -> io::Result<usize> {
    out.element_with("action", None, |elem| {
        let mut n = elem.text_element("name", &action.name)?;
        if !action.arguments.is_empty() {
            n += elem.element_with("argumentList", None, |list| {
                let mut n = 0;
                for argument in &action.arguments {
                    n += list.element_with("argument", None, |arg| {
                        let mut n = arg.text_element("name", &argument.name)?;
                        n += arg.text_element("direction", argument.direction.as_str())?;
                        n += arg.text_element(
                            "relatedStateVariable",
                            &argument.related_state_variable,
                        )?;
                        Ok(n)
                    })?;
                }
                Ok(n)
            })?;
        }
        Ok(n)
    })
}

fn write_state_variable(out: &mut XmlOut<'_>, variable: &StateVariable) -> io::Result<usize> {
    let send_events = if variable.send_events { "yes" } else { "no" };
    out.element_with(
        "stateVariable",
        Some(&format!(r#"sendEvents="{send_events}""#)),
        |elem| {
            let mut n = elem.text_element("name", &variable.name)?;
            n += elem.text_element("dataType", &variable.data_type)?;
            if let Some(default) = &variable.default_value {
                n += elem.text_element("defaultValue", default)?;
            }
            if !variable.allowed_values.is_empty() {
                n += elem.element_with("allowedValueList", None, |list| {
                    let mut n = 0;
                    for value in &variable.allowed_values {
                        n += list.text_element("allowedValue", value)?;
                    }
                    Ok(n)
                })?;
            }
            Ok(n)
        },
    )
}
