//! Parsing incrémental d'une description de device téléchargée.

use tracing::{debug, warn};
use url::Url;

use super::description::{DeviceDescription, DeviceIcon};
use super::service::{ServiceDescription, abbrev_for};
use crate::xml::XmlStream;

/// Accumulateur du service en cours de parsing.
///
/// Le parseur n'émet pas d'événement sur les tags fermants ; un service
/// est donc flushé quand un de ses champs se répète (un nouveau
/// `<service>` a commencé) et en fin de document.
#[derive(Debug, Default)]
struct ServiceAccumulator {
    service_type: Option<String>,
    service_id: Option<String>,
    scpd_url: Option<String>,
    control_url: Option<String>,
    event_sub_url: Option<String>,
}

impl ServiceAccumulator {
    fn is_empty(&self) -> bool {
        self.service_type.is_none()
            && self.service_id.is_none()
            && self.scpd_url.is_none()
            && self.control_url.is_none()
            && self.event_sub_url.is_none()
    }

    fn set(&mut self, field: &str, value: &str) -> bool {
        let slot = match field {
            "serviceType" => &mut self.service_type,
            "serviceId" => &mut self.service_id,
            "SCPDURL" => &mut self.scpd_url,
            "controlURL" => &mut self.control_url,
            "eventSubURL" => &mut self.event_sub_url,
            _ => return false,
        };
        let repeat = slot.is_some();
        if !repeat {
            *slot = Some(value.to_string());
        }
        repeat
    }

    fn build(&mut self) -> Option<ServiceDescription> {
        if self.is_empty() {
            return None;
        }
        let service_type = self.service_type.take().unwrap_or_default();
        let name = service_name_from_type(&service_type);
        let service = ServiceDescription {
            abbrev: abbrev_for(&name),
            name,
            service_id: self.service_id.take().unwrap_or_default(),
            scpd_url: self.scpd_url.take().unwrap_or_default(),
            control_url: self.control_url.take().unwrap_or_default(),
            event_sub_url: self.event_sub_url.take().unwrap_or_default(),
            service_type,
            active: true,
        };
        if !service.has_all_urls() {
            warn!(
                "Dropping service '{}' with incomplete endpoint URLs",
                service.name
            );
            return None;
        }
        Some(service)
    }
}

/// Parseur incrémental de description de device.
///
/// Alimenter avec [`feed`](Self::feed) au fil de la lecture du corps HTTP,
/// puis appeler [`finish`](Self::finish) avec l'URL du document pour
/// obtenir la description, URLs de services résolues en absolu. Les champs
/// inconnus sont ignorés.
pub struct DescriptionParser {
    stream: XmlStream,
    device: DeviceDescription,
    current_service: ServiceAccumulator,
    icon: DeviceIcon,
    has_icon: bool,
}

impl Default for DescriptionParser {
    fn default() -> Self {
        Self::new()
    }
}

impl DescriptionParser {
    pub fn new() -> Self {
        Self {
            stream: XmlStream::new(true),
            device: DeviceDescription::new("", "", ""),
            current_service: ServiceAccumulator::default(),
            icon: DeviceIcon::default(),
            has_icon: false,
        }
    }

    /// Ajoute un morceau du document et consomme les événements produits.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.stream.write(bytes);
        while let Some(event) = self.stream.next_event() {
            if event.text.is_empty() {
                continue;
            }
            self.assign(&event.path, &event.name, &event.text);
        }
    }

    fn assign(&mut self, path: &str, name: &str, text: &str) {
        match path {
            "/root/URLBase" => self.device.base_url = text.trim_end_matches('/').to_string(),
            "/root/device/deviceType" => self.device.device_type = text.to_string(),
            "/root/device/friendlyName" => self.device.friendly_name = text.to_string(),
            "/root/device/manufacturer" => self.device.manufacturer = text.to_string(),
            "/root/device/manufacturerURL" => self.device.manufacturer_url = text.to_string(),
            "/root/device/modelDescription" => self.device.model_description = text.to_string(),
            "/root/device/modelName" => self.device.model_name = text.to_string(),
            "/root/device/modelNumber" => self.device.model_number = text.to_string(),
            "/root/device/serialNumber" => self.device.serial_number = text.to_string(),
            "/root/device/UDN" => {
                self.device.udn = DeviceDescription::normalize_udn(text);
            }
            "/root/device/UPC" => self.device.upc = text.to_string(),
            "/root/device/iconList/icon/mimetype" => {
                self.has_icon = true;
                self.icon.mime_type = text.to_string();
            }
            "/root/device/iconList/icon/width" => {
                self.icon.width = text.parse().unwrap_or(0);
            }
            "/root/device/iconList/icon/height" => {
                self.icon.height = text.parse().unwrap_or(0);
            }
            "/root/device/iconList/icon/depth" => {
                self.icon.depth = text.parse().unwrap_or(0);
            }
            "/root/device/iconList/icon/url" => {
                self.has_icon = true;
                self.icon.url = text.to_string();
            }
            _ => {
                if let Some(field) = path.strip_prefix("/root/device/serviceList/service/") {
                    if self.current_service.set(field, text) {
                        // Champ répété : un nouveau service a commencé.
                        self.flush_service();
                        self.current_service.set(field, text);
                    }
                } else {
                    debug!("Dropping unknown description field {} = '{}'", name, text);
                }
            }
        }
    }

    fn flush_service(&mut self) {
        if let Some(service) = self.current_service.build() {
            self.device.services.push(service);
        }
    }

    /// Termine le parsing et retourne la description.
    ///
    /// `location` est l'URL du document téléchargé ; elle sert d'URL de
    /// base quand le document n'a pas d'élément `URLBase`, et de base de
    /// résolution pour passer les URLs de services en absolu.
    pub fn finish(mut self, location: &str) -> DeviceDescription {
        self.flush_service();
        if self.has_icon {
            self.device.icon = Some(self.icon);
        }

        if self.device.base_url.is_empty() {
            if let Ok(url) = Url::parse(location) {
                let mut origin = format!(
                    "{}://{}",
                    url.scheme(),
                    url.host_str().unwrap_or_default()
                );
                if let Some(port) = url.port() {
                    origin.push_str(&format!(":{port}"));
                }
                self.device.base_url = origin;
            }
        }

        if self.device.name.is_empty() {
            self.device.name = if self.device.friendly_name.is_empty() {
                self.device.udn.clone()
            } else {
                self.device.friendly_name.clone()
            };
        }

        resolve_service_urls(&mut self.device);
        self.device
    }
}

fn resolve_service_urls(device: &mut DeviceDescription) {
    let Ok(base) = Url::parse(&format!("{}/", device.base_url.trim_end_matches('/'))) else {
        return;
    };
    for service in &mut device.services {
        for url in [
            &mut service.scpd_url,
            &mut service.control_url,
            &mut service.event_sub_url,
        ] {
            if url.starts_with("http://") || url.starts_with("https://") {
                continue;
            }
            if let Ok(resolved) = base.join(url) {
                *url = resolved.to_string();
            }
        }
    }
}

fn service_name_from_type(service_type: &str) -> String {
    // "urn:schemas-upnp-org:service:RenderingControl:1" -> "RenderingControl"
    let mut segments: Vec<&str> = service_type.split(':').collect();
    if segments.len() >= 2 {
        let last = segments.pop().unwrap_or_default();
        let candidate = segments.pop().unwrap_or_default();
        if last.chars().all(|c| c.is_ascii_digit()) {
            return candidate.to_string();
        }
        return last.to_string();
    }
    service_type.to_string()
}
