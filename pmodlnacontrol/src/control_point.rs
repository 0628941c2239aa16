//! Control point UPnP.

use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::{debug, info, warn};

use pmodlna::config::DlnaOptions;
use pmodlna::devices::DescriptionParser;
use pmodlna::scheduler::{ScheduledTask, Scheduler, TaskKind};
use pmodlna::soap::{self, ActionReply, ActionRequest};
use pmodlna::ssdp::{SsdpMessage, extract_udn};
use pmodlna::transport::{
    HttpCall, HttpClient, HttpFront, HttpPayload, HttpResponse, UdpEndpoint, guess_local_ip,
};
use pmodlna::xml::NullSink;

use crate::errors::ControlPointError;
use crate::registry::DeviceRegistry;
use crate::subscriptions::{CpSubscriptionManager, EventCallback};

/// Callback optionnel qui prend en charge le parsing d'une réponse SOAP,
/// pour les payloads volumineux : `(nom d'action, corps brut)`.
pub type XmlProcessor = Box<dyn FnMut(&str, &[u8]) -> ActionReply + Send>;

/// NOTIFY reçu par le frontal, en attente de traitement sur la boucle.
struct IncomingNotify {
    sid: String,
    seq: Option<u32>,
    body: Vec<u8>,
}

/// Chemin du callback d'événements sur le frontal local.
const EVENT_CALLBACK_PATH: &str = "/events";

/// Nombre maximal de datagrammes SSDP traités par tour de boucle.
const DATAGRAMS_PER_POLL: usize = 16;

/// Control point : découverte, registre, actions et événements.
///
/// Comme le device host, le control point progresse par appels
/// [`poll`](Self::poll) depuis l'unique thread de contrôle. Le frontal
/// HTTP local ne sert que le callback NOTIFY : les corps reçus sont remis
/// à la boucle par un canal et les callbacks applicatifs s'exécutent sur
/// le thread de la boucle.
pub struct ControlPoint {
    options: DlnaOptions,
    registry: DeviceRegistry,
    scheduler: Scheduler,
    udp: Box<dyn UdpEndpoint>,
    http: Box<dyn HttpClient>,
    front: HttpFront,
    notify_rx: Receiver<IncomingNotify>,
    subscriptions: CpSubscriptionManager,
    search_target: String,
    started_at: Option<Instant>,
    min_wait: Duration,
    max_wait: Duration,
    datagram_buf: Vec<u8>,
    xml_processor: Option<XmlProcessor>,
}

impl ControlPoint {
    /// Crée un control point.
    ///
    /// `bind` est l'adresse d'écoute du callback NOTIFY local ;
    /// `event_callback` reçoit `(sid, variable, valeur)` pour chaque
    /// changement notifié.
    pub fn new(
        options: DlnaOptions,
        udp: Box<dyn UdpEndpoint>,
        http: Box<dyn HttpClient>,
        bind: &str,
        event_callback: EventCallback,
    ) -> Result<Self, ControlPointError> {
        let front = HttpFront::start(bind)?;
        let (notify_tx, notify_rx) = unbounded::<IncomingNotify>();
        register_notify_route(&front, notify_tx);

        let callback_ip = if bind.starts_with("127.") {
            "127.0.0.1".to_string()
        } else {
            guess_local_ip()
        };
        let callback_url = format!(
            "http://{}:{}{}",
            callback_ip,
            front.local_addr().port(),
            EVENT_CALLBACK_PATH
        );
        info!("✅ Control point event callback at {}", callback_url);

        let subscriptions = CpSubscriptionManager::new(
            callback_url,
            options.subscription_timeout_sec,
            Duration::from_millis(options.event_subscription_retry_ms),
            event_callback,
        );

        Ok(Self {
            registry: DeviceRegistry::new(),
            scheduler: Scheduler::new(),
            udp,
            http,
            front,
            notify_rx,
            subscriptions,
            search_target: String::new(),
            started_at: None,
            min_wait: Duration::ZERO,
            max_wait: Duration::ZERO,
            datagram_buf: vec![0u8; 8192],
            xml_processor: None,
            options,
        })
    }

    /// Démarre la découverte.
    ///
    /// Planifie un M-SEARCH répété à la cadence configurée, avec fin de
    /// vie à `now + max_wait`.
    pub fn begin(&mut self, search_target: &str, min_wait: Duration, max_wait: Duration) {
        let now = Instant::now();
        self.search_target = search_target.to_string();
        self.min_wait = min_wait;
        self.max_wait = max_wait;
        self.started_at = Some(now);
        self.scheduler.add(ScheduledTask::repeating(
            "msearch",
            now,
            Duration::from_millis(self.options.msearch_repeat_ms),
            Some(now + max_wait),
            TaskKind::MSearch {
                target: search_target.to_string(),
                mx: 2,
            },
        ));
        info!("🔍 Discovery started (ST={}, max {:?})", search_target, max_wait);
    }

    /// Un tour de la boucle coopérative.
    pub fn poll(&mut self, now: Instant) {
        // NOTIFY reçus par le frontal, callbacks sur ce thread.
        while let Ok(notify) = self.notify_rx.try_recv() {
            self.subscriptions
                .handle_notify(&notify.sid, notify.seq, &notify.body);
        }

        for _ in 0..DATAGRAMS_PER_POLL {
            let received = match self.udp.poll_datagram(&mut self.datagram_buf) {
                Ok(received) => received,
                Err(e) => {
                    warn!("❌ SSDP read error: {}", e);
                    break;
                }
            };
            let Some((len, from)) = received else {
                break;
            };
            if let Some(message) = SsdpMessage::parse(&self.datagram_buf[..len], from) {
                self.handle_ssdp(message, now);
            }
        }

        self.scheduler
            .execute(now, self.udp.as_mut(), None, self.options.ssdp_port);
        self.subscriptions.reconcile(now, self.http.as_mut());
        self.registry.sweep_expired(now);
    }

    /// Boucle de découverte bloquante.
    ///
    /// Tourne au moins `min_wait`, retourne dès qu'un device est
    /// enregistré passé ce seuil, et s'arrête quoi qu'il arrive à
    /// `max_wait`. Retourne le nombre de devices enregistrés.
    pub fn run_discovery(&mut self) -> Result<usize, ControlPointError> {
        let Some(started_at) = self.started_at else {
            return Err(ControlPointError::NotStarted);
        };
        loop {
            let now = Instant::now();
            self.poll(now);
            let elapsed = now.duration_since(started_at);
            if elapsed >= self.max_wait {
                break;
            }
            if elapsed >= self.min_wait && !self.registry.is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(self.options.loop_delay_ms));
        }
        Ok(self.registry.len())
    }

    fn handle_ssdp(&mut self, message: SsdpMessage, now: Instant) {
        match message {
            SsdpMessage::Search { .. } => {
                // Un autre control point interroge le réseau, rien à faire.
            }
            SsdpMessage::Alive {
                usn,
                nt,
                location,
                max_age,
                ..
            } => {
                if self.accepts_target(&nt) {
                    self.register_announcement(&usn, &location, max_age, now);
                }
            }
            SsdpMessage::SearchReply {
                usn,
                st,
                location,
                max_age,
                ..
            } => {
                if self.accepts_target(&st) {
                    self.register_announcement(&usn, &location, max_age, now);
                }
            }
            SsdpMessage::ByeBye { usn, .. } => {
                if let Some(udn) = extract_udn(&usn) {
                    self.registry.mark_byebye(&udn);
                }
            }
        }
    }

    /// Correspondance explicite entre notre cible de recherche et le
    /// ST ou NT d'une annonce entrante.
    fn accepts_target(&self, st_or_nt: &str) -> bool {
        self.search_target == "ssdp:all" || st_or_nt == self.search_target
    }

    fn register_announcement(&mut self, usn: &str, location: &str, max_age: u32, now: Instant) {
        let Some(udn) = extract_udn(usn) else {
            debug!("Announcement without uuid in USN: '{}'", usn);
            return;
        };
        if self.registry.refresh(&udn, max_age, now) {
            return;
        }
        match self.fetch_description(location) {
            Ok(description) => {
                for service in &description.services {
                    self.subscriptions.track(
                        &description.udn,
                        &service.name,
                        &service.event_sub_url,
                    );
                }
                self.registry.insert(description, max_age, now);
            }
            Err(e) => {
                warn!("❌ Failed to fetch description at {}: {}", location, e);
            }
        }
    }

    /// Télécharge et parse une description de device.
    fn fetch_description(
        &mut self,
        location: &str,
    ) -> Result<pmodlna::devices::DeviceDescription, ControlPointError> {
        let reply = self.http.exchange(HttpCall {
            method: "GET",
            url: location,
            headers: &[],
            body: None,
        })?;
        if !reply.is_success() {
            return Err(ControlPointError::ParsingError(format!(
                "description GET answered HTTP {}",
                reply.status
            )));
        }

        let mut parser = DescriptionParser::new();
        for chunk in reply.body.chunks(self.options.xml_parser_buffer_size.max(1)) {
            parser.feed(chunk);
        }
        let description = parser.finish(location);
        if description.udn.is_empty() {
            return Err(ControlPointError::ParsingError(
                "description without UDN".to_string(),
            ));
        }
        Ok(description)
    }

    /// Exécute une série de requêtes d'action.
    ///
    /// Chaque requête est sérialisée, postée sur l'URL de contrôle du
    /// service, et la réponse est parsée en arguments. Un statut HTTP
    /// non-200 ou une enveloppe malformée donne une réponse invalide ;
    /// l'appelant décide d'un éventuel réessai.
    pub fn execute_actions(&mut self, requests: &[ActionRequest]) -> Vec<ActionReply> {
        requests
            .iter()
            .map(|request| self.execute_action(request))
            .collect()
    }

    fn execute_action(&mut self, request: &ActionRequest) -> ActionReply {
        if !request.is_valid() {
            warn!("Invalid action request '{}' skipped", request.action);
            return ActionReply::invalid();
        }

        let mut null = NullSink;
        let Ok(size) = soap::write_action_request(
            &mut null,
            &request.service_type,
            &request.action,
            &request.args,
        ) else {
            return ActionReply::invalid();
        };

        let headers = vec![(
            "SOAPACTION".to_string(),
            soap::soap_action_header(&request.service_type, &request.action),
        )];
        let mut write_body = |sink: &mut dyn pmodlna::xml::XmlSink| {
            soap::write_action_request(sink, &request.service_type, &request.action, &request.args)
        };

        let result = self.http.exchange(HttpCall {
            method: "POST",
            url: &request.control_url,
            headers: &headers,
            body: Some(HttpPayload {
                content_type: "text/xml; charset=\"utf-8\"",
                length: size,
                write: &mut write_body,
            }),
        });

        let reply = match result {
            Ok(reply) if reply.is_success() => reply,
            Ok(reply) => {
                warn!(
                    "❌ Action {} answered HTTP {}",
                    request.action, reply.status
                );
                return ActionReply::invalid();
            }
            Err(e) => {
                warn!("❌ Action {} failed: {}", request.action, e);
                return ActionReply::invalid();
            }
        };

        let mut parsed = match self.xml_processor.as_mut() {
            Some(processor) => processor(&request.action, &reply.body),
            None => soap::parse_action_reply(&reply.body, &request.action),
        };
        if let Some(expected) = request.expected_results {
            if parsed.args.len() < expected {
                parsed.valid = false;
            }
        }
        parsed
    }

    /// Invoque une action sur un service d'un device du registre.
    pub fn invoke(
        &mut self,
        udn: &str,
        service_name: &str,
        action: &str,
        args: &[(&str, &str)],
    ) -> Result<ActionReply, ControlPointError> {
        let request = {
            let device = self
                .registry
                .get(udn)
                .ok_or_else(|| ControlPointError::NoDevice(udn.to_string()))?;
            let service = device.description.service(service_name).ok_or_else(|| {
                ControlPointError::NoService(service_name.to_string(), udn.to_string())
            })?;
            let mut request = ActionRequest::new(service, action);
            for (name, value) in args {
                request = request.arg(name, value);
            }
            request
        };
        Ok(self.execute_action(&request))
    }

    /// Prend en charge le parsing des réponses d'action.
    pub fn set_xml_processor(&mut self, processor: Option<XmlProcessor>) {
        self.xml_processor = processor;
    }

    /// Active ou désactive les abonnements aux événements.
    pub fn set_events_active(&mut self, active: bool) {
        self.subscriptions.set_active(active);
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn subscriptions(&self) -> &CpSubscriptionManager {
        &self.subscriptions
    }

    pub fn has_active_msearch(&self) -> bool {
        self.scheduler.has_active_msearch()
    }

    /// Arrête le control point : désabonnements puis extinction.
    pub fn end(&mut self) {
        self.subscriptions.set_active(false);
        let now = Instant::now();
        self.subscriptions.reconcile(
            now + Duration::from_millis(self.options.event_subscription_retry_ms),
            self.http.as_mut(),
        );
        self.front.stop();
        self.scheduler.set_active(false);
        info!("👋 Control point stopped");
    }
}

fn register_notify_route(front: &HttpFront, notify_tx: Sender<IncomingNotify>) {
    front.router().lock().unwrap().add(
        EVENT_CALLBACK_PATH,
        Box::new(move |request| {
            if request.method != "NOTIFY" {
                return HttpResponse::empty(405);
            }
            let notify = IncomingNotify {
                sid: request.header("sid").unwrap_or_default().to_string(),
                seq: request.header("seq").and_then(|v| v.parse().ok()),
                body: request.body.clone(),
            };
            if notify_tx.send(notify).is_err() {
                warn!("Dropping notify event because the loop channel is closed");
            }
            // 200 immédiat, le parsing se fait sur la boucle.
            HttpResponse::empty(200)
        }),
    );
}
