//! Description d'un device UPnP.

use std::io;
use std::time::Instant;

use super::service::ServiceDescription;
use crate::xml::{XmlOut, XmlSink};

/// Icône déclarée par un device.
#[derive(Debug, Clone, Default)]
pub struct DeviceIcon {
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub url: String,

    /// Octets de l'image, servis par la route de l'icône côté device,
    /// vides côté control point.
    pub bytes: Vec<u8>,
}

/// Description d'un device UPnP.
///
/// Construite par l'application côté device, ou par parsing incrémental
/// d'un document téléchargé côté control point. L'UDN identifie le device
/// de façon unique dans un registre ; les URLs de services se résolvent
/// relativement à `base_url`.
#[derive(Debug, Clone)]
pub struct DeviceDescription {
    /// Identifiant court servant aux routes HTTP.
    pub name: String,

    /// UDN normalisé, préfixe `uuid:` inclus.
    pub udn: String,

    /// URN du type de device.
    pub device_type: String,

    pub friendly_name: String,
    pub manufacturer: String,
    pub manufacturer_url: String,
    pub model_description: String,
    pub model_name: String,
    pub model_number: String,
    pub serial_number: String,
    pub upc: String,

    /// URL de base du serveur HTTP (protocole + hôte + port).
    pub base_url: String,

    pub icon: Option<DeviceIcon>,
    pub services: Vec<ServiceDescription>,

    pub active: bool,
    pub discovered_at: Option<Instant>,
    pub last_seen: Option<Instant>,
}

impl DeviceDescription {
    pub fn new(name: &str, device_type: &str, udn: &str) -> Self {
        Self {
            name: name.to_string(),
            udn: Self::normalize_udn(udn),
            device_type: device_type.to_string(),
            friendly_name: name.to_string(),
            manufacturer: String::new(),
            manufacturer_url: String::new(),
            model_description: String::new(),
            model_name: String::new(),
            model_number: String::new(),
            serial_number: String::new(),
            upc: String::new(),
            base_url: String::new(),
            icon: None,
            services: Vec::new(),
            active: true,
            discovered_at: None,
            last_seen: None,
        }
    }

    /// Impose le préfixe `uuid:` requis par la spécification, une seule
    /// fois.
    pub fn normalize_udn(udn: &str) -> String {
        let udn = udn.trim();
        if udn.starts_with("uuid:") {
            udn.to_string()
        } else {
            format!("uuid:{udn}")
        }
    }

    /// Route du device (chemin relatif).
    pub fn route(&self) -> String {
        format!("/device/{}", self.name)
    }

    /// Route du document de description.
    pub fn description_route(&self) -> String {
        format!("{}/desc.xml", self.route())
    }

    /// Route de l'icône.
    pub fn icon_route(&self) -> String {
        format!("{}/icon", self.route())
    }

    /// URL absolue du document de description.
    pub fn location(&self) -> String {
        format!("{}{}", self.base_url, self.description_route())
    }

    pub fn service(&self, name: &str) -> Option<&ServiceDescription> {
        self.services.iter().find(|service| service.name == name)
    }

    pub fn service_by_abbrev(&self, abbrev: &str) -> Option<&ServiceDescription> {
        self.services.iter().find(|service| service.abbrev == abbrev)
    }

    pub fn service_by_type(&self, service_type: &str) -> Option<&ServiceDescription> {
        self.services
            .iter()
            .find(|service| service.service_type == service_type)
    }

    /// Produit le document de description racine.
    ///
    /// Les accesseurs sont consultés dans un ordre fixe, la sortie est
    /// stable octet par octet pour un même modèle.
    pub fn write_description(&self, sink: &mut dyn XmlSink) -> io::Result<usize> {
        let mut out = XmlOut::new(sink);
        let mut produced = out.preamble()?;
        produced += out.element_with(
            "root",
            Some(r#"xmlns="urn:schemas-upnp-org:device-1-0""#),
            |root| {
                let mut n = root.element_with("specVersion", None, |spec| {
                    let mut n = spec.int_element("major", 1)?;
                    n += spec.int_element("minor", 0)?;
                    Ok(n)
                })?;
                n += root.text_element("URLBase", &self.base_url)?;
                n += root.element_with("device", None, |device| self.write_device_element(device))?;
                Ok(n)
            },
        )?;
        Ok(produced)
    }

    fn write_device_element(&self, out: &mut XmlOut<'_>) -> io::Result<usize> {
        let mut produced = out.text_element("deviceType", &self.device_type)?;
        produced += out.text_element("friendlyName", &self.friendly_name)?;
        produced += out.text_element("manufacturer", &self.manufacturer)?;
        if !self.manufacturer_url.is_empty() {
            produced += out.text_element("manufacturerURL", &self.manufacturer_url)?;
        }
        if !self.model_description.is_empty() {
            produced += out.text_element("modelDescription", &self.model_description)?;
        }
        produced += out.text_element("modelName", &self.model_name)?;
        if !self.model_number.is_empty() {
            produced += out.text_element("modelNumber", &self.model_number)?;
        }
        if !self.serial_number.is_empty() {
            produced += out.text_element("serialNumber", &self.serial_number)?;
        }
        produced += out.text_element("UDN", &self.udn)?;
        if !self.upc.is_empty() {
            produced += out.text_element("UPC", &self.upc)?;
        }
        if let Some(icon) = &self.icon {
            produced += out.element_with("iconList", None, |list| {
                list.element_with("icon", None, |entry| {
                    let mut n = entry.text_element("mimetype", &icon.mime_type)?;
                    n += entry.int_element("width", icon.width as i64)?;
                    n += entry.int_element("height", icon.height as i64)?;
                    n += entry.int_element("depth", icon.depth as i64)?;
                    n += entry.text_element("url", &icon.url)?;
                    Ok(n)
                })
            })?;
        }
        if !self.services.is_empty() {
            produced += out.element_with("serviceList", None, |list| {
                let mut n = 0;
                for service in &self.services {
                    n += service.write_service_entry(list)?;
                }
                Ok(n)
            })?;
        }
        Ok(produced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::NullSink;

    fn sample() -> DeviceDescription {
        let mut description = DeviceDescription::new(
            "mediaserver",
            "urn:schemas-upnp-org:device:MediaServer:1",
            "0ddba11-cafe",
        );
        description.base_url = "http://192.0.2.5:8080".to_string();
        description.manufacturer = "PMO".to_string();
        description.model_name = "PMODLNA Server".to_string();
        description.services.push(ServiceDescription::new(
            "ContentDirectory",
            1,
            "CDS",
            &description.route(),
        ));
        description
    }

    #[test]
    fn test_udn_normalized_once() {
        assert_eq!(DeviceDescription::normalize_udn("abc"), "uuid:abc");
        assert_eq!(DeviceDescription::normalize_udn("uuid:abc"), "uuid:abc");
    }

    #[test]
    fn test_description_is_byte_stable() {
        let description = sample();
        let mut first = Vec::new();
        let mut second = Vec::new();
        description.write_description(&mut first).unwrap();
        description.write_description(&mut second).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_description_sizing_matches() {
        let description = sample();
        let mut null = NullSink;
        let sized = description.write_description(&mut null).unwrap();
        let mut buf = Vec::new();
        let written = description.write_description(&mut buf).unwrap();
        assert_eq!(sized, written);
        assert_eq!(sized, buf.len());
    }

    #[test]
    fn test_description_contents() {
        let description = sample();
        let mut buf = Vec::new();
        description.write_description(&mut buf).unwrap();
        let xml = String::from_utf8(buf).unwrap();
        assert!(xml.contains(r#"<root xmlns="urn:schemas-upnp-org:device-1-0">"#));
        assert!(xml.contains("<URLBase>http://192.0.2.5:8080</URLBase>"));
        assert!(xml.contains("<UDN>uuid:0ddba11-cafe</UDN>"));
        assert!(xml.contains("<serviceType>urn:schemas-upnp-org:service:ContentDirectory:1</serviceType>"));
        assert!(xml.contains("<controlURL>/device/mediaserver/service/ContentDirectory/control</controlURL>"));
    }
}
