//! Jeu d'annonces SSDP d'un device.

use crate::devices::DeviceDescription;

/// Nature d'un scope d'annonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    RootDevice,
    Udn,
    DeviceType,
    ServiceType,
}

/// Un couple (NT, USN) annoncé sur le réseau.
///
/// L'USN vaut l'UDN seul pour les scopes root device et UDN, et
/// `<UDN>::<NT>` pour les scopes typés.
#[derive(Debug, Clone)]
pub struct NotificationScope {
    pub kind: ScopeKind,
    pub nt: String,
    pub usn: String,
}

/// Paramètres d'annonce d'un device, figés au démarrage.
///
/// Le jeu de scopes est le produit fixe : root device, UDN, type du device
/// et type de chaque service.
#[derive(Debug, Clone)]
pub struct Announcement {
    pub location: String,
    pub server: String,
    pub max_age: u32,
    pub scopes: Vec<NotificationScope>,
}

impl Announcement {
    pub fn for_device(description: &DeviceDescription, server: &str, max_age: u32) -> Self {
        let udn = description.udn.clone();
        let mut scopes = vec![
            NotificationScope {
                kind: ScopeKind::RootDevice,
                nt: "upnp:rootdevice".to_string(),
                usn: udn.clone(),
            },
            NotificationScope {
                kind: ScopeKind::Udn,
                nt: udn.clone(),
                usn: udn.clone(),
            },
            NotificationScope {
                kind: ScopeKind::DeviceType,
                nt: description.device_type.clone(),
                usn: format!("{}::{}", udn, description.device_type),
            },
        ];
        for service in &description.services {
            scopes.push(NotificationScope {
                kind: ScopeKind::ServiceType,
                nt: service.service_type.clone(),
                usn: format!("{}::{}", udn, service.service_type),
            });
        }

        Self {
            location: description.location(),
            server: server.to_string(),
            max_age,
            scopes,
        }
    }

    /// Scopes correspondant à une cible de recherche.
    ///
    /// La correspondance est explicite : `ssdp:all` couvre tous les
    /// scopes, `upnp:rootdevice` le scope racine, un `uuid:` doit être
    /// exactement l'UDN, et une URN doit être exactement le type du device
    /// ou d'un service. Aucune correspondance par sous-chaîne.
    pub fn match_search_target(&self, st: &str) -> Vec<&NotificationScope> {
        let st = st.trim();
        if st == "ssdp:all" {
            return self.scopes.iter().collect();
        }
        self.scopes
            .iter()
            .filter(|scope| match scope.kind {
                ScopeKind::RootDevice => st == "upnp:rootdevice",
                ScopeKind::Udn => st == scope.nt,
                ScopeKind::DeviceType | ScopeKind::ServiceType => st == scope.nt,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::{DeviceDescription, ServiceDescription};

    fn sample_device() -> DeviceDescription {
        let mut description = DeviceDescription::new(
            "renderer",
            "urn:schemas-upnp-org:device:MediaRenderer:1",
            "uuid:01",
        );
        description.base_url = "http://192.0.2.5:8080".to_string();
        description.services.push(ServiceDescription::new(
            "RenderingControl",
            1,
            "RCS",
            &description.route(),
        ));
        description
    }

    #[test]
    fn test_scope_product() {
        let announcement = Announcement::for_device(&sample_device(), "Test/1.0", 1800);
        let nts: Vec<&str> = announcement.scopes.iter().map(|s| s.nt.as_str()).collect();
        assert_eq!(
            nts,
            vec![
                "upnp:rootdevice",
                "uuid:01",
                "urn:schemas-upnp-org:device:MediaRenderer:1",
                "urn:schemas-upnp-org:service:RenderingControl:1",
            ]
        );
        assert_eq!(announcement.scopes[0].usn, "uuid:01");
        assert_eq!(
            announcement.scopes[3].usn,
            "uuid:01::urn:schemas-upnp-org:service:RenderingControl:1"
        );
    }

    #[test]
    fn test_explicit_matching() {
        let announcement = Announcement::for_device(&sample_device(), "Test/1.0", 1800);
        assert_eq!(announcement.match_search_target("ssdp:all").len(), 4);
        assert_eq!(announcement.match_search_target("upnp:rootdevice").len(), 1);
        assert_eq!(announcement.match_search_target("uuid:01").len(), 1);
        assert_eq!(
            announcement
                .match_search_target("urn:schemas-upnp-org:service:RenderingControl:1")
                .len(),
            1
        );
        // Pas de correspondance par sous-chaîne.
        assert!(announcement.match_search_target("uuid:0").is_empty());
        assert!(announcement.match_search_target("RenderingControl").is_empty());
    }
}
