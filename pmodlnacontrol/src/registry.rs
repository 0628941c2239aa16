//! Registre des devices découverts.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use pmodlna::devices::DeviceDescription;
use tracing::{debug, info};

/// Device découvert sur le réseau.
#[derive(Debug, Clone)]
pub struct DiscoveredDevice {
    pub description: DeviceDescription,
    pub active: bool,
    pub discovered_at: Instant,
    pub last_seen: Instant,
    pub max_age: u32,
}

impl DiscoveredDevice {
    /// Vrai quand l'annonce la plus récente est périmée.
    pub fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.last_seen) > Duration::from_secs(self.max_age as u64)
    }
}

/// Registre des devices, clé = UDN.
///
/// L'UDN est la clé de dédoublonnage : deux annonces portant le même UDN
/// désignent le même device, quelle que soit la forme de l'USN.
#[derive(Default)]
pub struct DeviceRegistry {
    devices: HashMap<String, DiscoveredDevice>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insère ou remplace un device fraîchement décrit.
    pub fn insert(&mut self, mut description: DeviceDescription, max_age: u32, now: Instant) {
        let udn = description.udn.clone();
        description.active = true;
        description.discovered_at = Some(now);
        description.last_seen = Some(now);
        let discovered_at = self
            .devices
            .get(&udn)
            .map(|existing| existing.discovered_at)
            .unwrap_or(now);
        info!(
            "✅ Device registered: {} ({}, {} service(s))",
            description.friendly_name,
            udn,
            description.services.len()
        );
        self.devices.insert(
            udn,
            DiscoveredDevice {
                description,
                active: true,
                discovered_at,
                last_seen: now,
                max_age: max_age.max(1),
            },
        );
    }

    /// Rafraîchit la présence d'un device connu.
    ///
    /// Retourne faux quand l'UDN est inconnu : l'appelant doit alors
    /// télécharger la description.
    pub fn refresh(&mut self, udn: &str, max_age: u32, now: Instant) -> bool {
        let Some(device) = self.devices.get_mut(udn) else {
            return false;
        };
        device.last_seen = now;
        device.max_age = max_age.max(1);
        device.active = true;
        device.description.active = true;
        device.description.last_seen = Some(now);
        for service in &mut device.description.services {
            service.active = true;
        }
        true
    }

    /// Marque un device et ses services inactifs après un byebye.
    pub fn mark_byebye(&mut self, udn: &str) {
        if let Some(device) = self.devices.get_mut(udn) {
            info!("👋 Device {} said byebye", udn);
            device.active = false;
            device.description.active = false;
            for service in &mut device.description.services {
                service.active = false;
            }
        }
    }

    /// Retire les devices dont l'annonce a dépassé son max-age.
    pub fn sweep_expired(&mut self, now: Instant) -> usize {
        let before = self.devices.len();
        self.devices.retain(|udn, device| {
            let keep = !device.is_expired(now);
            if !keep {
                debug!("Evicting device {} (max-age exceeded)", udn);
            }
            keep
        });
        before - self.devices.len()
    }

    pub fn get(&self, udn: &str) -> Option<&DiscoveredDevice> {
        self.devices.get(udn)
    }

    pub fn contains(&self, udn: &str) -> bool {
        self.devices.contains_key(udn)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn devices(&self) -> impl Iterator<Item = &DiscoveredDevice> {
        self.devices.values()
    }

    pub fn active_count(&self) -> usize {
        self.devices.values().filter(|device| device.active).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmodlna::devices::ServiceDescription;

    fn device(udn: &str) -> DeviceDescription {
        let mut description = DeviceDescription::new(
            "renderer",
            "urn:schemas-upnp-org:device:MediaRenderer:1",
            udn,
        );
        description.services.push(ServiceDescription::new(
            "AVTransport",
            1,
            "AVT",
            "/device/renderer",
        ));
        description
    }

    #[test]
    fn test_dedupe_by_udn() {
        let mut registry = DeviceRegistry::new();
        let now = Instant::now();
        registry.insert(device("uuid:01"), 1800, now);
        registry.insert(device("uuid:01"), 1800, now);
        assert_eq!(registry.len(), 1);
        assert!(registry.refresh("uuid:01", 900, now));
        assert!(!registry.refresh("uuid:02", 900, now));
    }

    #[test]
    fn test_byebye_marks_services_inactive() {
        let mut registry = DeviceRegistry::new();
        registry.insert(device("uuid:01"), 1800, Instant::now());
        registry.mark_byebye("uuid:01");
        let entry = registry.get("uuid:01").unwrap();
        assert!(!entry.active);
        assert!(entry.description.services.iter().all(|s| !s.active));
    }

    #[test]
    fn test_expiry_eviction() {
        let mut registry = DeviceRegistry::new();
        let now = Instant::now();
        registry.insert(device("uuid:01"), 1, now);
        assert_eq!(registry.sweep_expired(now), 0);
        assert_eq!(
            registry.sweep_expired(now + Duration::from_secs(3)),
            1
        );
        assert!(registry.is_empty());
    }
}
