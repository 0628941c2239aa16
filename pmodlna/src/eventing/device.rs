//! Gestionnaire d'abonnements côté device.

use std::collections::{HashSet, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::arena::{SubKey, SubscriptionArena};
use crate::transport::{HttpCall, HttpClient, HttpPayload};
use crate::xml::{NullSink, XmlOut, XmlSink};

/// Closure d'écriture du contenu d'événement.
///
/// Produit le contenu de l'élément `<Event>` dans le puits et retourne le
/// nombre d'octets écrits. Appelée deux fois par notification : une fois
/// dans un puits nul pour dimensionner, une fois vers le réseau.
pub type EventWriter = Arc<dyn Fn(&mut dyn XmlSink) -> io::Result<usize> + Send + Sync>;

/// Abonnement d'un control point à un service.
#[derive(Debug, Clone)]
pub struct Subscription {
    /// SID opaque généré côté serveur, forme `uuid:<...>`.
    pub sid: String,

    /// URL de callback fournie dans CALLBACK, chevrons retirés.
    pub callback_url: String,

    /// Timeout accordé.
    pub timeout: Duration,

    /// Compteur de séquence, incrémenté à chaque enfilage.
    pub seq: u32,

    /// Date d'expiration absolue.
    pub expires_at: Instant,

    /// Nom du service propriétaire.
    pub service: String,
}

/// Notification en attente de livraison.
///
/// Référence son abonnement par clé générationnelle : si l'abonnement
/// disparaît, l'entrée est abandonnée, jamais livrée.
struct PendingNotification {
    id: u64,
    key: SubKey,
    seq: u32,
    abbrev: String,
    writer: EventWriter,
    body_len: usize,
    error_count: u8,
}

/// Accusé de SUBSCRIBE.
#[derive(Debug, Clone)]
pub struct SubscribeAck {
    pub sid: String,
    pub timeout_sec: u32,
}

/// Bilan d'une passe de publication.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishStats {
    pub attempted: usize,
    pub delivered: usize,
    pub dropped: usize,
    pub expired: usize,
}

#[derive(Debug, Error)]
pub enum EventError {
    #[error("Subscription '{0}' not found")]
    NotFound(String),

    #[error("SUBSCRIBE without CALLBACK header")]
    MissingCallback,
}

/// Élément prêt à livrer, photographié hors verrou.
struct Delivery {
    id: u64,
    key: SubKey,
    sid: String,
    callback_url: String,
    seq: u32,
    abbrev: String,
    writer: EventWriter,
    body_len: usize,
}

enum Outcome {
    Delivered,
    Retry(SubKey),
    Dropped,
    Gone,
}

/// Gestionnaire des abonnements d'un device.
///
/// Possède exclusivement ses abonnements et ses notifications en attente.
/// Les méthodes ne doivent pas être ré-entrées depuis un handler NOTIFY.
pub struct DeviceSubscriptionManager {
    arena: SubscriptionArena,
    pending: VecDeque<PendingNotification>,
    next_pending_id: u64,
    default_timeout_sec: u32,
    max_send_errors: u8,
}

impl DeviceSubscriptionManager {
    pub fn new(default_timeout_sec: u32, max_send_errors: u8) -> Self {
        Self {
            arena: SubscriptionArena::new(),
            pending: VecDeque::new(),
            next_pending_id: 1,
            default_timeout_sec,
            max_send_errors,
        }
    }

    /// Traite un SUBSCRIBE, nouvelle souscription ou renouvellement.
    ///
    /// Un SID connu sur le même service est renouvelé sur place ; le
    /// timeout est mis à jour et un CALLBACK fourni remplace l'URL
    /// enregistrée. Sans SID, un CALLBACK est obligatoire et un abonnement
    /// neuf est créé avec un SID généré.
    pub fn subscribe(
        &mut self,
        service: &str,
        callback: Option<&str>,
        sid: Option<&str>,
        timeout_sec: Option<u32>,
        now: Instant,
    ) -> Result<SubscribeAck, EventError> {
        let timeout_sec = timeout_sec.unwrap_or(self.default_timeout_sec).max(1);
        let timeout = Duration::from_secs(timeout_sec as u64);

        if let Some(sid) = sid.filter(|s| !s.is_empty()) {
            let Some(key) = self.find_key(service, sid) else {
                return Err(EventError::NotFound(sid.to_string()));
            };
            let entry = self.arena.get_mut(key).expect("key just resolved");
            entry.timeout = timeout;
            entry.expires_at = now + timeout;
            if let Some(callback) = callback.filter(|c| !c.is_empty()) {
                entry.callback_url = strip_callback(callback);
            }
            info!("♻️ Renewed subscription {} on {}", sid, service);
            return Ok(SubscribeAck {
                sid: sid.to_string(),
                timeout_sec,
            });
        }

        let callback = callback
            .filter(|c| !c.is_empty())
            .ok_or(EventError::MissingCallback)?;
        let sid = format!("uuid:{}", uuid::Uuid::new_v4());
        let subscription = Subscription {
            sid: sid.clone(),
            callback_url: strip_callback(callback),
            timeout,
            seq: 0,
            expires_at: now + timeout,
            service: service.to_string(),
        };
        info!(
            "🔒 New subscription on {}: SID={}, Callback={}, Timeout={}s",
            service, sid, subscription.callback_url, timeout_sec
        );
        self.arena.insert(subscription);
        Ok(SubscribeAck { sid, timeout_sec })
    }

    /// Traite un UNSUBSCRIBE. Retourne faux quand le SID est inconnu.
    pub fn unsubscribe(&mut self, service: &str, sid: &str) -> bool {
        let Some(key) = self.find_key(service, sid) else {
            return false;
        };
        self.arena.remove(key);
        let before = self.pending.len();
        self.pending.retain(|entry| entry.key != key);
        info!(
            "❌ Unsubscribed {} from {} ({} pending dropped)",
            sid,
            service,
            before - self.pending.len()
        );
        true
    }

    /// Enfile un changement d'état pour tous les abonnés d'un service.
    ///
    /// La closure produit le contenu de l'élément `<Event>` du namespace
    /// abrégé `abbrev`. Un numéro de séquence est réservé par abonné au
    /// moment de l'enfilage et la taille du corps NOTIFY complet est
    /// précalculée dans un puits nul. Une closure qui n'écrit rien est
    /// ignorée avec un avertissement. Retourne le nombre d'entrées
    /// enfilées.
    pub fn add_change(&mut self, service: &str, abbrev: &str, writer: EventWriter) -> usize {
        let mut null = NullSink;
        let inner_len = match writer(&mut null) {
            Ok(len) => len,
            Err(e) => {
                warn!("❌ Event writer failed while sizing: {}", e);
                return 0;
            }
        };
        if inner_len == 0 {
            warn!("Event writer for {} produced no content, skipping", service);
            return 0;
        }

        let body_len = match write_notify_body(&mut null, abbrev, writer.as_ref()) {
            Ok(len) => len,
            Err(e) => {
                warn!("❌ Failed to size NOTIFY body: {}", e);
                return 0;
            }
        };

        let keys: Vec<SubKey> = self
            .arena
            .iter()
            .filter(|(_, sub)| sub.service == service)
            .map(|(key, _)| key)
            .collect();

        let mut enqueued = 0;
        for key in keys {
            let Some(subscription) = self.arena.get_mut(key) else {
                continue;
            };
            subscription.seq += 1;
            let id = self.next_pending_id;
            self.next_pending_id += 1;
            self.pending.push_back(PendingNotification {
                id,
                key,
                seq: subscription.seq,
                abbrev: abbrev.to_string(),
                writer: writer.clone(),
                body_len,
                error_count: 0,
            });
            enqueued += 1;
        }
        debug!(
            "Queued change on {} for {} subscriber(s) ({} bytes)",
            service, enqueued, body_len
        );
        enqueued
    }

    /// Retire les abonnements expirés et leurs notifications en attente.
    pub fn sweep_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<(SubKey, String)> = self
            .arena
            .iter()
            .filter(|(_, sub)| sub.expires_at <= now)
            .map(|(key, sub)| (key, sub.sid.clone()))
            .collect();
        for (key, sid) in &expired {
            self.arena.remove(*key);
            self.pending.retain(|entry| entry.key != *key);
            info!("⏲️ Subscription {} expired, unsubscribed", sid);
        }
        expired.len()
    }

    fn find_key(&self, service: &str, sid: &str) -> Option<SubKey> {
        self.arena
            .iter()
            .find(|(_, sub)| sub.service == service && sub.sid.eq_ignore_ascii_case(sid))
            .map(|(key, _)| key)
    }

    /// Prochaine entrée livrable après `after_id`, abonnés bloqués exclus.
    ///
    /// Les entrées dont l'abonnement a disparu sont purgées au passage.
    fn next_delivery(&mut self, stalled: &HashSet<SubKey>, after_id: u64) -> Option<Delivery> {
        let arena = &self.arena;
        self.pending.retain(|entry| arena.get(entry.key).is_some());
        for entry in &self.pending {
            if entry.id <= after_id || stalled.contains(&entry.key) {
                continue;
            }
            let subscription = self.arena.get(entry.key)?;
            return Some(Delivery {
                id: entry.id,
                key: entry.key,
                sid: subscription.sid.clone(),
                callback_url: subscription.callback_url.clone(),
                seq: entry.seq,
                abbrev: entry.abbrev.clone(),
                writer: entry.writer.clone(),
                body_len: entry.body_len,
            });
        }
        None
    }

    fn apply_outcome(&mut self, id: u64, delivered: bool) -> Outcome {
        let Some(position) = self.pending.iter().position(|entry| entry.id == id) else {
            // Retirée entre-temps par un unsubscribe.
            return Outcome::Gone;
        };
        if delivered {
            self.pending.remove(position);
            return Outcome::Delivered;
        }
        let entry = &mut self.pending[position];
        entry.error_count += 1;
        if entry.error_count > self.max_send_errors {
            let entry = self.pending.remove(position).expect("position just found");
            warn!(
                "⚠️ Dropping notification SEQ={} after {} failed attempts",
                entry.seq, entry.error_count
            );
            Outcome::Dropped
        } else {
            Outcome::Retry(self.pending[position].key)
        }
    }

    pub fn subscriptions_count(&self) -> usize {
        self.arena.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// SID des abonnements d'un service.
    pub fn subscriptions_for(&self, service: &str) -> Vec<String> {
        self.arena
            .iter()
            .filter(|(_, sub)| sub.service == service)
            .map(|(_, sub)| sub.sid.clone())
            .collect()
    }

    /// Passe de publication.
    ///
    /// Balaie d'abord les abonnements expirés, puis tente la livraison des
    /// notifications en ordre d'enfilage. Un échec bloque les entrées
    /// suivantes du même abonné jusqu'à la prochaine passe ; une entrée est
    /// abandonnée après `max_send_errors` échecs. Le verrou n'est jamais
    /// tenu pendant un appel réseau.
    pub fn publish(
        manager: &Mutex<Self>,
        now: Instant,
        http: &mut dyn HttpClient,
    ) -> PublishStats {
        let mut stats = PublishStats {
            expired: manager.lock().unwrap().sweep_expired(now),
            ..PublishStats::default()
        };

        let mut stalled: HashSet<SubKey> = HashSet::new();
        let mut cursor = 0u64;
        loop {
            let delivery = manager.lock().unwrap().next_delivery(&stalled, cursor);
            let Some(delivery) = delivery else {
                break;
            };
            cursor = delivery.id;

            let delivered = send_notify(http, &delivery);
            stats.attempted += 1;

            match manager.lock().unwrap().apply_outcome(delivery.id, delivered) {
                Outcome::Delivered => stats.delivered += 1,
                Outcome::Dropped => stats.dropped += 1,
                Outcome::Retry(key) => {
                    stalled.insert(key);
                }
                Outcome::Gone => {}
            }
        }
        stats
    }
}

fn strip_callback(callback: &str) -> String {
    callback
        .trim()
        .trim_matches(|c| c == '<' || c == '>')
        .to_string()
}

/// Produit le corps NOTIFY complet autour du contenu applicatif.
///
/// Enveloppe `<e:propertyset>` / `<e:property>` / `<LastChange>` /
/// `<Event xmlns=".../<ABBREV>/">`, le contenu de `Event` venant de la
/// closure. Retourne le nombre d'octets produits.
pub fn write_notify_body(
    sink: &mut dyn XmlSink,
    abbrev: &str,
    writer: &dyn Fn(&mut dyn XmlSink) -> io::Result<usize>,
) -> io::Result<usize> {
    let mut out = XmlOut::new(sink);
    let mut produced = out.open_with(
        "e:propertyset",
        r#"xmlns:e="urn:schemas-upnp-org:metadata-1-0/events""#,
    )?;
    produced += out.open("e:property")?;
    produced += out.open("LastChange")?;
    produced += out.open_with(
        "Event",
        &format!(r#"xmlns="urn:schemas-upnp-org:metadata-1-0/{abbrev}/""#),
    )?;
    produced += writer(out.sink())?;
    produced += out.close("Event")?;
    produced += out.close("LastChange")?;
    produced += out.close("e:property")?;
    produced += out.close("e:propertyset")?;
    Ok(produced)
}

fn send_notify(http: &mut dyn HttpClient, delivery: &Delivery) -> bool {
    let headers = vec![
        ("NT".to_string(), "upnp:event".to_string()),
        ("NTS".to_string(), "upnp:propchange".to_string()),
        ("SID".to_string(), delivery.sid.clone()),
        ("SEQ".to_string(), delivery.seq.to_string()),
    ];
    let writer = delivery.writer.clone();
    let abbrev = delivery.abbrev.clone();
    let mut write_body =
        move |sink: &mut dyn XmlSink| write_notify_body(sink, &abbrev, writer.as_ref());

    let call = HttpCall {
        method: "NOTIFY",
        url: &delivery.callback_url,
        headers: &headers,
        body: Some(HttpPayload {
            content_type: "text/xml; charset=\"utf-8\"",
            length: delivery.body_len,
            write: &mut write_body,
        }),
    };

    match http.exchange(call) {
        Ok(reply) if reply.is_success() => {
            debug!(
                "✅ NOTIFY SEQ={} delivered to {}",
                delivery.seq, delivery.callback_url
            );
            true
        }
        Ok(reply) => {
            warn!(
                "❌ NOTIFY SEQ={} to {} answered HTTP {}",
                delivery.seq, delivery.callback_url, reply.status
            );
            false
        }
        Err(e) => {
            warn!(
                "❌ NOTIFY SEQ={} to {} failed: {}",
                delivery.seq, delivery.callback_url, e
            );
            false
        }
    }
}

/// Décode un header `TIMEOUT: Second-<n>`.
pub fn parse_timeout_header(value: &str) -> Option<u32> {
    let lower = value.trim().to_ascii_lowercase();
    let digits = lower.strip_prefix("second-")?;
    digits.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{HttpReply, TransportError};

    /// Client HTTP scripté : une liste de statuts à servir dans l'ordre,
    /// le dernier restant en vigueur.
    struct ScriptedHttp {
        statuses: Vec<u16>,
        cursor: usize,
        calls: Vec<(String, String, Vec<u8>)>,
    }

    impl ScriptedHttp {
        fn new(statuses: Vec<u16>) -> Self {
            Self {
                statuses,
                cursor: 0,
                calls: Vec::new(),
            }
        }

        fn always(status: u16) -> Self {
            Self::new(vec![status])
        }
    }

    impl HttpClient for ScriptedHttp {
        fn exchange(&mut self, call: HttpCall<'_>) -> Result<HttpReply, TransportError> {
            let status = *self
                .statuses
                .get(self.cursor)
                .or(self.statuses.last())
                .unwrap();
            self.cursor += 1;
            let mut body = Vec::new();
            if let Some(payload) = call.body {
                (payload.write)(&mut body).unwrap();
            }
            self.calls
                .push((call.method.to_string(), call.url.to_string(), body));
            Ok(HttpReply {
                status,
                headers: Vec::new(),
                body: Vec::new(),
            })
        }
    }

    fn writer_foo_bar() -> EventWriter {
        Arc::new(|sink: &mut dyn XmlSink| {
            let mut out = XmlOut::new(sink);
            out.text_element("Foo", "bar")
        })
    }

    fn manager() -> DeviceSubscriptionManager {
        DeviceSubscriptionManager::new(1800, 3)
    }

    #[test]
    fn test_subscribe_and_renew() {
        let mut mgr = manager();
        let now = Instant::now();
        let ack = mgr
            .subscribe("AVTransport", Some("<http://192.0.2.8/ev>"), None, Some(60), now)
            .unwrap();
        assert!(ack.sid.starts_with("uuid:"));
        assert_eq!(ack.timeout_sec, 60);
        assert_eq!(mgr.subscriptions_count(), 1);

        // Renouvellement : même SID, callback remplaçable.
        let renewed = mgr
            .subscribe(
                "AVTransport",
                Some("http://192.0.2.9/ev"),
                Some(&ack.sid),
                Some(120),
                now,
            )
            .unwrap();
        assert_eq!(renewed.sid, ack.sid);
        assert_eq!(mgr.subscriptions_count(), 1);
    }

    #[test]
    fn test_subscribe_requires_callback() {
        let mut mgr = manager();
        let result = mgr.subscribe("AVTransport", None, None, None, Instant::now());
        assert!(matches!(result, Err(EventError::MissingCallback)));
    }

    #[test]
    fn test_renew_unknown_sid_fails() {
        let mut mgr = manager();
        let result = mgr.subscribe(
            "AVTransport",
            None,
            Some("uuid:ghost"),
            None,
            Instant::now(),
        );
        assert!(matches!(result, Err(EventError::NotFound(_))));
    }

    #[test]
    fn test_seq_reserved_per_enqueue() {
        let mut mgr = manager();
        let now = Instant::now();
        mgr.subscribe("AVTransport", Some("http://192.0.2.8/ev"), None, None, now)
            .unwrap();

        assert_eq!(mgr.add_change("AVTransport", "AVT", writer_foo_bar()), 1);
        assert_eq!(mgr.add_change("AVTransport", "AVT", writer_foo_bar()), 1);
        assert_eq!(mgr.pending_count(), 2);

        let manager = Mutex::new(mgr);
        let mut http = ScriptedHttp::always(200);
        let stats =
            DeviceSubscriptionManager::publish(&manager, Instant::now(), &mut http);
        assert_eq!(stats.delivered, 2);
        assert_eq!(manager.lock().unwrap().pending_count(), 0);

        // SEQ 1 puis 2, corps complet avec l'enveloppe propertyset.
        let first = String::from_utf8(http.calls[0].2.clone()).unwrap();
        assert!(first.contains(
            r#"<e:propertyset xmlns:e="urn:schemas-upnp-org:metadata-1-0/events">"#
        ));
        assert!(first.contains(r#"<Event xmlns="urn:schemas-upnp-org:metadata-1-0/AVT/">"#));
        assert!(first.contains("<Foo>bar</Foo>"));
    }

    #[test]
    fn test_empty_writer_skipped() {
        let mut mgr = manager();
        let now = Instant::now();
        mgr.subscribe("AVTransport", Some("http://192.0.2.8/ev"), None, None, now)
            .unwrap();
        let empty: EventWriter = Arc::new(|_sink: &mut dyn XmlSink| Ok(0));
        assert_eq!(mgr.add_change("AVTransport", "AVT", empty), 0);
        assert_eq!(mgr.pending_count(), 0);
    }

    #[test]
    fn test_unsubscribe_cascades_pending() {
        let mut mgr = manager();
        let now = Instant::now();
        let ack = mgr
            .subscribe("AVTransport", Some("http://192.0.2.8/ev"), None, None, now)
            .unwrap();
        mgr.add_change("AVTransport", "AVT", writer_foo_bar());
        assert_eq!(mgr.pending_count(), 1);

        assert!(mgr.unsubscribe("AVTransport", &ack.sid));
        assert_eq!(mgr.subscriptions_count(), 0);
        assert_eq!(mgr.pending_count(), 0);
        assert!(!mgr.unsubscribe("AVTransport", &ack.sid));
    }

    #[test]
    fn test_retry_then_drop_keeps_subscription() {
        let mgr = Mutex::new(manager());
        let now = Instant::now();
        mgr.lock()
            .unwrap()
            .subscribe("AVTransport", Some("http://192.0.2.8/ev"), None, None, now)
            .unwrap();
        for _ in 0..3 {
            mgr.lock()
                .unwrap()
                .add_change("AVTransport", "AVT", writer_foo_bar());
        }

        let mut http = ScriptedHttp::always(500);
        let mut total_attempts = 0;
        // La tête de ligne bloque les suivantes : une tentative par passe
        // et par abonné, chaque entrée est abandonnée après 4 échecs.
        for _ in 0..20 {
            let stats = DeviceSubscriptionManager::publish(&mgr, Instant::now(), &mut http);
            total_attempts += stats.attempted;
        }
        assert_eq!(total_attempts, 12);
        assert_eq!(mgr.lock().unwrap().pending_count(), 0);
        assert_eq!(mgr.lock().unwrap().subscriptions_count(), 1);

        // Plus aucune tentative ensuite.
        let stats = DeviceSubscriptionManager::publish(&mgr, Instant::now(), &mut http);
        assert_eq!(stats.attempted, 0);
    }

    #[test]
    fn test_stall_does_not_block_other_subscription() {
        let mgr = Mutex::new(manager());
        let now = Instant::now();
        mgr.lock()
            .unwrap()
            .subscribe("AVTransport", Some("http://192.0.2.8/ev"), None, None, now)
            .unwrap();
        mgr.lock()
            .unwrap()
            .subscribe("AVTransport", Some("http://192.0.2.9/ev"), None, None, now)
            .unwrap();
        mgr.lock()
            .unwrap()
            .add_change("AVTransport", "AVT", writer_foo_bar());

        // Premier abonné en échec, second livré dans la même passe.
        let mut http = ScriptedHttp::new(vec![500, 200]);
        let stats = DeviceSubscriptionManager::publish(&mgr, Instant::now(), &mut http);
        assert_eq!(stats.attempted, 2);
        assert_eq!(stats.delivered, 1);
        assert_eq!(mgr.lock().unwrap().pending_count(), 1);
    }

    #[test]
    fn test_expiry_sweep_cascades() {
        let mgr = Mutex::new(manager());
        let now = Instant::now();
        mgr.lock()
            .unwrap()
            .subscribe(
                "AVTransport",
                Some("http://192.0.2.8/ev"),
                None,
                Some(1),
                now,
            )
            .unwrap();
        mgr.lock()
            .unwrap()
            .add_change("AVTransport", "AVT", writer_foo_bar());

        let mut http = ScriptedHttp::always(200);
        let stats = DeviceSubscriptionManager::publish(
            &mgr,
            now + Duration::from_secs(2),
            &mut http,
        );
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.attempted, 0);
        assert_eq!(mgr.lock().unwrap().subscriptions_count(), 0);
        assert_eq!(mgr.lock().unwrap().pending_count(), 0);
    }

    #[test]
    fn test_parse_timeout_header() {
        assert_eq!(parse_timeout_header("Second-1800"), Some(1800));
        assert_eq!(parse_timeout_header("second-60"), Some(60));
        assert_eq!(parse_timeout_header("infinite"), None);
    }
}
