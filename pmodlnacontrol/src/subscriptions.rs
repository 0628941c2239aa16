//! Gestionnaire d'abonnements côté control point.
//!
//! État miroir des abonnements, piloté depuis l'initiateur : SUBSCRIBE et
//! renouvellement, UNSUBSCRIBE, et parsing des NOTIFY entrants vers le
//! callback applicatif. Une passe de réconciliation périodique aligne
//! l'état voulu (actif ou non) sur l'état réel de chaque service.

use std::time::{Duration, Instant};

use pmodlna::eventing::parse_timeout_header;
use pmodlna::transport::{HttpCall, HttpClient};
use pmodlna::xml::{XmlStream, decode_text};
use tracing::{debug, info, warn};

/// Machine à états d'un abonnement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionPhase {
    Unsubscribed,
    Subscribing,
    Subscribed,
    Unsubscribing,
}

/// Abonnement suivi pour un service d'un device découvert.
#[derive(Debug, Clone)]
pub struct ServiceSubscription {
    pub device_udn: String,
    pub service_name: String,

    /// URL absolue de souscription aux événements.
    pub event_url: String,

    pub phase: SubscriptionPhase,
    pub sid: Option<String>,
    pub started_at: Option<Instant>,
    pub confirmed_at: Option<Instant>,
    pub expires_at: Option<Instant>,
}

/// Callback applicatif : `(sid, nom de variable, valeur)`.
pub type EventCallback = Box<dyn FnMut(&str, &str, &str) + Send>;

/// Marge de renouvellement avant l'expiration locale.
const RENEWAL_SAFETY_MARGIN: Duration = Duration::from_secs(60);

/// Gestionnaire des abonnements d'un control point.
pub struct CpSubscriptionManager {
    active: bool,
    entries: Vec<ServiceSubscription>,
    callback_url: String,
    timeout_sec: u32,
    retry_every: Duration,
    last_reconcile: Option<Instant>,
    callback: EventCallback,
    seq_trace: Vec<(String, u32)>,
}

impl CpSubscriptionManager {
    pub fn new(
        callback_url: String,
        timeout_sec: u32,
        retry_every: Duration,
        callback: EventCallback,
    ) -> Self {
        Self {
            active: false,
            entries: Vec::new(),
            callback_url,
            timeout_sec,
            retry_every,
            last_reconcile: None,
            callback,
            seq_trace: Vec::new(),
        }
    }

    /// Active ou désactive globalement les abonnements.
    ///
    /// La réconciliation suivante souscrit ou désabonne chaque service
    /// pour s'aligner.
    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Suit un service candidat à l'abonnement.
    ///
    /// Refusé quand l'URL d'événements est vide. Idempotent.
    pub fn track(&mut self, device_udn: &str, service_name: &str, event_url: &str) -> bool {
        if event_url.is_empty() {
            return false;
        }
        let exists = self
            .entries
            .iter()
            .any(|entry| entry.device_udn == device_udn && entry.service_name == service_name);
        if exists {
            return true;
        }
        self.entries.push(ServiceSubscription {
            device_udn: device_udn.to_string(),
            service_name: service_name.to_string(),
            event_url: event_url.to_string(),
            phase: SubscriptionPhase::Unsubscribed,
            sid: None,
            started_at: None,
            confirmed_at: None,
            expires_at: None,
        });
        true
    }

    /// Passe de réconciliation : état voulu contre état réel.
    ///
    /// Exécutée au plus une fois par `retry_every`. Souscrit les services
    /// non abonnés quand le gestionnaire est actif, renouvelle près de
    /// l'expiration, désabonne quand il est inactif.
    pub fn reconcile(&mut self, now: Instant, http: &mut dyn HttpClient) {
        if let Some(last) = self.last_reconcile {
            if now.duration_since(last) < self.retry_every {
                return;
            }
        }
        self.last_reconcile = Some(now);

        for index in 0..self.entries.len() {
            let phase = self.entries[index].phase;
            if self.active {
                match phase {
                    SubscriptionPhase::Subscribed => {
                        let near_expiry = self.entries[index]
                            .expires_at
                            .map(|expires| {
                                expires
                                    .checked_sub(RENEWAL_SAFETY_MARGIN)
                                    .map(|renew_at| renew_at <= now)
                                    .unwrap_or(true)
                                    || expires <= now
                            })
                            .unwrap_or(true);
                        if near_expiry {
                            self.subscribe_entry(index, http, now);
                        }
                    }
                    _ => {
                        self.subscribe_entry(index, http, now);
                    }
                }
            } else if phase == SubscriptionPhase::Subscribed {
                self.unsubscribe_entry(index, http);
            }
        }
    }

    /// Souscription ou renouvellement d'une entrée.
    fn subscribe_entry(&mut self, index: usize, http: &mut dyn HttpClient, now: Instant) -> bool {
        let entry = &mut self.entries[index];
        let renewal_sid = match entry.phase {
            SubscriptionPhase::Subscribed => entry.sid.clone(),
            _ => None,
        };
        entry.phase = SubscriptionPhase::Subscribing;
        entry.started_at = Some(now);

        let mut headers = vec![(
            "TIMEOUT".to_string(),
            format!("Second-{}", self.timeout_sec),
        )];
        match &renewal_sid {
            Some(sid) => headers.push(("SID".to_string(), sid.clone())),
            None => {
                headers.push(("NT".to_string(), "upnp:event".to_string()));
                headers.push(("CALLBACK".to_string(), format!("<{}>", self.callback_url)));
            }
        }

        let result = http.exchange(HttpCall {
            method: "SUBSCRIBE",
            url: &entry.event_url,
            headers: &headers,
            body: None,
        });

        match result {
            Ok(reply) if reply.is_success() => {
                let sid = reply
                    .header("SID")
                    .map(|s| s.to_string())
                    .or(renewal_sid);
                let Some(sid) = sid else {
                    warn!("SUBSCRIBE response without SID for {}", entry.service_name);
                    entry.phase = SubscriptionPhase::Unsubscribed;
                    return false;
                };
                let timeout_sec = reply
                    .header("TIMEOUT")
                    .and_then(parse_timeout_header)
                    .unwrap_or(self.timeout_sec);
                entry.sid = Some(sid.clone());
                entry.phase = SubscriptionPhase::Subscribed;
                entry.confirmed_at = Some(now);
                entry.expires_at = Some(now + Duration::from_secs(timeout_sec as u64));
                info!(
                    "🔒 Subscribed to {} (SID={}, Second-{})",
                    entry.service_name, sid, timeout_sec
                );
                true
            }
            Ok(reply) => {
                warn!(
                    "❌ SUBSCRIBE {} answered HTTP {}",
                    entry.service_name, reply.status
                );
                entry.phase = SubscriptionPhase::Unsubscribed;
                entry.sid = None;
                false
            }
            Err(e) => {
                warn!("❌ SUBSCRIBE {} failed: {}", entry.service_name, e);
                entry.phase = SubscriptionPhase::Unsubscribed;
                entry.sid = None;
                false
            }
        }
    }

    fn unsubscribe_entry(&mut self, index: usize, http: &mut dyn HttpClient) {
        let entry = &mut self.entries[index];
        let Some(sid) = entry.sid.clone() else {
            entry.phase = SubscriptionPhase::Unsubscribed;
            return;
        };
        entry.phase = SubscriptionPhase::Unsubscribing;

        let headers = vec![("SID".to_string(), sid.clone())];
        let result = http.exchange(HttpCall {
            method: "UNSUBSCRIBE",
            url: &entry.event_url,
            headers: &headers,
            body: None,
        });

        match result {
            Ok(reply) if reply.is_success() => {
                info!("❌ Unsubscribed from {} (SID={})", entry.service_name, sid);
            }
            Ok(reply) => {
                warn!(
                    "UNSUBSCRIBE {} answered HTTP {}, clearing local state",
                    entry.service_name, reply.status
                );
            }
            Err(e) => {
                warn!(
                    "UNSUBSCRIBE {} failed ({}), clearing local state",
                    entry.service_name, e
                );
            }
        }
        entry.phase = SubscriptionPhase::Unsubscribed;
        entry.sid = None;
        entry.expires_at = None;
        entry.confirmed_at = None;
    }

    /// Traite un NOTIFY entrant.
    ///
    /// Parse le corps incrémentalement et invoque le callback pour chaque
    /// variable trouvée dans un sous-arbre `<e:property>`, qu'elle soit un
    /// enfant direct, imbriquée dans un document LastChange embarqué, ou
    /// portée par un document LastChange encore échappé.
    pub fn handle_notify(&mut self, sid: &str, seq: Option<u32>, body: &[u8]) {
        if let Some(seq) = seq {
            self.seq_trace.push((sid.to_string(), seq));
        }
        let known = self
            .entries
            .iter()
            .any(|entry| entry.sid.as_deref() == Some(sid));
        if !known {
            debug!("NOTIFY for unknown SID {}, parsing anyway", sid);
        }

        let mut stream = XmlStream::new(true);
        stream.write(body);
        while let Some(event) = stream.next_event() {
            if !event.path.contains("/property/") {
                continue;
            }
            let name = &*event.name;
            if event.text.is_empty() {
                // Tag ouvrant : une variable LastChange portée en attribut.
                if let Some(value) = extract_val_attribute(&event.attributes) {
                    if !is_structural(name) {
                        (self.callback)(sid, name, &value);
                    }
                }
                continue;
            }
            if name == "LastChange" && event.text.trim_start().starts_with('<') {
                // Document LastChange reçu échappé, re-parse du contenu.
                self.dispatch_last_change(sid, &event.text);
            } else if !is_structural(name) {
                (self.callback)(sid, name, &event.text);
            }
        }
    }

    fn dispatch_last_change(&mut self, sid: &str, document: &str) {
        let mut stream = XmlStream::new(true);
        stream.write(document.as_bytes());
        while let Some(event) = stream.next_event() {
            let name = &*event.name;
            if is_structural(name) {
                continue;
            }
            if !event.text.is_empty() {
                (self.callback)(sid, name, &event.text);
            } else if let Some(value) = extract_val_attribute(&event.attributes) {
                (self.callback)(sid, name, &value);
            }
        }
    }

    /// Journal des SEQ observés, dans l'ordre d'arrivée.
    pub fn sequence_trace(&self) -> &[(String, u32)] {
        &self.seq_trace
    }

    pub fn subscribed_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.phase == SubscriptionPhase::Subscribed)
            .count()
    }

    pub fn entries(&self) -> &[ServiceSubscription] {
        &self.entries
    }

    pub fn entry(&self, device_udn: &str, service_name: &str) -> Option<&ServiceSubscription> {
        self.entries
            .iter()
            .find(|entry| entry.device_udn == device_udn && entry.service_name == service_name)
    }
}

fn is_structural(name: &str) -> bool {
    matches!(name, "propertyset" | "property" | "LastChange" | "Event" | "InstanceID")
}

/// Extrait la valeur d'un attribut `val="..."`.
fn extract_val_attribute(attributes: &str) -> Option<String> {
    let idx = attributes.find("val=")?;
    let rest = &attributes[idx + 4..];
    let quote = rest.chars().next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let rest = &rest[1..];
    let end = rest.find(quote)?;
    Some(decode_text(&rest[..end]))
}
