//! # Device host
//!
//! Composition d'un device UPnP complet : description, scheduler
//! d'annonces SSDP, routes HTTP et gestionnaire d'abonnements. Le host est
//! piloté par [`loop_once`](DeviceHost::loop_once) depuis l'unique thread
//! de contrôle ; le frontal HTTP tourne sur son thread accepteur et
//! partage le gestionnaire d'abonnements derrière un verrou.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::DlnaOptions;
use crate::devices::{DeviceDescription, ScpdDocument, ServiceDescription};
use crate::errors::UpnpError;
use crate::eventing::{DeviceSubscriptionManager, EventError, EventWriter, parse_timeout_header};
use crate::scheduler::{ScheduledTask, Scheduler, TaskKind};
use crate::soap::{self, ActionReply, SoapAction, error_codes};
use crate::ssdp::{Announcement, SsdpMessage};
use crate::transport::{
    HttpClient, HttpFront, HttpRequest, HttpResponse, UdpEndpoint, guess_local_ip,
};
use crate::xml::NullSink;

/// Handler applicatif d'une action de contrôle.
///
/// Reçoit l'action parsée avec ses arguments et retourne les arguments de
/// résultat, ou une réponse invalide qui devient un SOAP Fault.
pub type ActionHandler = Box<dyn FnMut(&SoapAction) -> ActionReply + Send>;

/// Décalage entre les deux annonces alive initiales, pour survivre à la
/// perte d'un datagramme UDP.
const ALIVE_STAGGER: Duration = Duration::from_millis(100);

/// Cadence des NOTIFY byebye pendant l'arrêt.
const BYEBYE_REPEAT: Duration = Duration::from_millis(800);

/// Durée de la séquence d'arrêt.
const BYEBYE_WINDOW: Duration = Duration::from_secs(2);

/// Période du diagnostic périodique.
const DIAGNOSTIC_EVERY: Duration = Duration::from_secs(10);

struct RegisteredService {
    scpd: Arc<ScpdDocument>,
    handler: Option<ActionHandler>,
}

/// Host d'un device UPnP.
pub struct DeviceHost {
    description: DeviceDescription,
    registered: Vec<(String, RegisteredService)>,
    options: DlnaOptions,
    scheduler: Scheduler,
    announcement: Option<Announcement>,
    subscriptions: Arc<Mutex<DeviceSubscriptionManager>>,
    udp: Box<dyn UdpEndpoint>,
    http: Box<dyn HttpClient>,
    front: Option<HttpFront>,
    bind: String,
    frozen: Option<Arc<DeviceDescription>>,
    last_scheduler_pass: Option<Instant>,
    last_publish_pass: Option<Instant>,
    last_diagnostic: Option<Instant>,
    datagram_buf: Vec<u8>,
    started: bool,
}

impl DeviceHost {
    /// Crée un host non démarré.
    ///
    /// `bind` est l'adresse d'écoute du frontal HTTP (ex: `0.0.0.0:0`).
    /// Les transports sont injectés, ce qui permet aux tests de brancher
    /// un bus UDP en mémoire.
    pub fn new(
        description: DeviceDescription,
        options: DlnaOptions,
        udp: Box<dyn UdpEndpoint>,
        http: Box<dyn HttpClient>,
        bind: &str,
    ) -> Self {
        let subscriptions = Arc::new(Mutex::new(DeviceSubscriptionManager::new(
            options.subscription_timeout_sec,
            options.max_send_errors,
        )));
        Self {
            description,
            registered: Vec::new(),
            options,
            scheduler: Scheduler::new(),
            announcement: None,
            subscriptions,
            udp,
            http,
            front: None,
            bind: bind.to_string(),
            frozen: None,
            last_scheduler_pass: None,
            last_publish_pass: None,
            last_diagnostic: None,
            datagram_buf: vec![0u8; 8192],
            started: false,
        }
    }

    /// Enregistre un service avant le démarrage.
    ///
    /// Le service est refusé si une de ses trois URLs d'endpoints manque
    /// ou si le handler d'action est absent.
    pub fn register_service(
        &mut self,
        service: ServiceDescription,
        scpd: ScpdDocument,
        handler: ActionHandler,
    ) -> Result<(), UpnpError> {
        if !service.has_all_urls() {
            return Err(UpnpError::InvalidService(
                service.name.clone(),
                "missing endpoint URL".to_string(),
            ));
        }
        if self.description.service(&service.name).is_some() {
            return Err(UpnpError::InvalidService(
                service.name.clone(),
                "already registered".to_string(),
            ));
        }
        self.registered.push((
            service.name.clone(),
            RegisteredService {
                scpd: Arc::new(scpd),
                handler: Some(handler),
            },
        ));
        self.description.services.push(service);
        Ok(())
    }

    /// Démarre le device : frontal HTTP, routes, annonces.
    ///
    /// Deux tâches `NotifyAlive` décalées de 100 ms sont planifiées puis
    /// répétées à la demi-vie du max-age.
    pub fn begin(&mut self) -> Result<(), UpnpError> {
        let front = HttpFront::start(&self.bind)?;
        let port = front.local_addr().port();
        if self.description.base_url.is_empty() {
            let host_ip = if self.bind.starts_with("127.") {
                "127.0.0.1".to_string()
            } else {
                guess_local_ip()
            };
            self.description.base_url = format!("http://{host_ip}:{port}");
        }

        let frozen = Arc::new(self.description.clone());
        self.register_routes(&front, &frozen);

        let announcement = Announcement::for_device(
            &frozen,
            &self.options.server_header,
            self.options.max_age,
        );
        info!(
            "✅ Device '{}' ({}) available at {}",
            frozen.friendly_name,
            frozen.udn,
            frozen.location()
        );

        let now = Instant::now();
        let alive_every = Duration::from_secs((self.options.max_age / 2).max(1) as u64);
        self.scheduler.add(ScheduledTask::repeating(
            "notify-alive",
            now,
            alive_every,
            None,
            TaskKind::NotifyAlive,
        ));
        self.scheduler.add(ScheduledTask::repeating(
            "notify-alive-echo",
            now + ALIVE_STAGGER,
            alive_every,
            None,
            TaskKind::NotifyAlive,
        ));

        self.announcement = Some(announcement);
        self.front = Some(front);
        self.frozen = Some(frozen);
        self.started = true;
        Ok(())
    }

    fn register_routes(&mut self, front: &HttpFront, frozen: &Arc<DeviceDescription>) {
        let router = front.router();
        let mut router = router.lock().unwrap();

        // Description du device.
        let description = frozen.clone();
        router.add(
            &frozen.description_route(),
            Box::new(move |request| {
                if request.method != "GET" {
                    return HttpResponse::empty(405);
                }
                let mut null = NullSink;
                let Ok(size) = description.write_description(&mut null) else {
                    return HttpResponse::empty(500);
                };
                let mut body = Vec::with_capacity(size);
                if description.write_description(&mut body).is_err() {
                    return HttpResponse::empty(500);
                }
                HttpResponse::ok_xml(body)
            }),
        );

        // Icône éventuelle.
        if let Some(icon) = frozen.icon.clone() {
            if !icon.bytes.is_empty() {
                router.add(
                    &frozen.icon_route(),
                    Box::new(move |request| {
                        if request.method != "GET" {
                            return HttpResponse::empty(405);
                        }
                        HttpResponse {
                            status: 200,
                            headers: vec![(
                                "Content-Type".to_string(),
                                icon.mime_type.clone(),
                            )],
                            body: icon.bytes.clone(),
                        }
                    }),
                );
            }
        }

        // Routes de chaque service : SCPD, contrôle, événements.
        for service in &frozen.services {
            let Some(slot) = self
                .registered
                .iter_mut()
                .find(|(name, _)| *name == service.name)
            else {
                continue;
            };

            let scpd = slot.1.scpd.clone();
            router.add(
                &service.scpd_url,
                Box::new(move |request| {
                    if request.method != "GET" {
                        return HttpResponse::empty(405);
                    }
                    let mut null = NullSink;
                    let Ok(size) = scpd.write_scpd(&mut null) else {
                        return HttpResponse::empty(500);
                    };
                    let mut body = Vec::with_capacity(size);
                    if scpd.write_scpd(&mut body).is_err() {
                        return HttpResponse::empty(500);
                    }
                    HttpResponse::ok_xml(body)
                }),
            );

            if let Some(mut handler) = slot.1.handler.take() {
                let service_type = service.service_type.clone();
                let service_name = service.name.clone();
                router.add(
                    &service.control_url,
                    Box::new(move |request| {
                        if request.method != "POST" {
                            return HttpResponse::empty(405);
                        }
                        control_response(&service_name, &service_type, request, &mut handler)
                    }),
                );
            }

            let subscriptions = self.subscriptions.clone();
            let service_name = service.name.clone();
            router.add(
                &service.event_sub_url,
                Box::new(move |request| {
                    event_response(&service_name, &subscriptions, request)
                }),
            );
        }
    }

    /// Un tour de la boucle coopérative.
    ///
    /// Lit au plus un datagramme SSDP par passe de scheduler, planifie les
    /// réponses M-SEARCH, déclenche les tâches échues et lance la passe de
    /// publication des événements à sa propre cadence.
    pub fn loop_once(&mut self, now: Instant) {
        if !self.started {
            return;
        }

        if is_due(self.last_diagnostic, now, DIAGNOSTIC_EVERY) {
            self.last_diagnostic = Some(now);
            let subscriptions = self.subscriptions.lock().unwrap();
            debug!(
                "📊 Device '{}': {} task(s), {} subscription(s), {} pending notification(s)",
                self.description.name,
                self.scheduler.len(),
                subscriptions.subscriptions_count(),
                subscriptions.pending_count()
            );
        }

        let scheduler_every = Duration::from_millis(self.options.run_scheduler_every_ms);
        if is_due(self.last_scheduler_pass, now, scheduler_every) {
            self.last_scheduler_pass = Some(now);
            self.read_one_datagram(now);
            self.scheduler.execute(
                now,
                self.udp.as_mut(),
                self.announcement.as_ref(),
                self.options.ssdp_port,
            );
        }

        let publish_every = Duration::from_millis(self.options.run_subscriptions_every_ms);
        if is_due(self.last_publish_pass, now, publish_every) {
            self.last_publish_pass = Some(now);
            DeviceSubscriptionManager::publish(&self.subscriptions, now, self.http.as_mut());
        }
    }

    fn read_one_datagram(&mut self, now: Instant) {
        let received = match self.udp.poll_datagram(&mut self.datagram_buf) {
            Ok(received) => received,
            Err(e) => {
                warn!("❌ SSDP read error: {}", e);
                return;
            }
        };
        let Some((len, from)) = received else {
            return;
        };
        let Some(message) = SsdpMessage::parse(&self.datagram_buf[..len], from) else {
            return;
        };
        if let SsdpMessage::Search { st, from, .. } = message {
            let Some(announcement) = self.announcement.as_ref() else {
                return;
            };
            let matches = announcement.match_search_target(&st);
            if matches.is_empty() {
                return;
            }
            debug!("📥 M-SEARCH (ST={}) from {}", st, from);
            for scope in matches {
                self.scheduler.add(ScheduledTask::one_shot(
                    "msearch-reply",
                    now,
                    TaskKind::MSearchReply {
                        to: from,
                        st: scope.nt.clone(),
                        usn: scope.usn.clone(),
                    },
                ));
            }
        }
    }

    /// Fait tourner la boucle en temps réel pendant `duration`.
    pub fn run_for(&mut self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while Instant::now() < deadline {
            self.loop_once(Instant::now());
            std::thread::sleep(Duration::from_millis(self.options.loop_delay_ms));
        }
    }

    /// Enfile un changement d'état pour le service d'abréviation donnée.
    pub fn add_change(&mut self, abbrev: &str, writer: EventWriter) -> Result<usize, UpnpError> {
        let Some(service_name) = self
            .description
            .service_by_abbrev(abbrev)
            .map(|service| service.name.clone())
        else {
            return Err(UpnpError::NoService(abbrev.to_string()));
        };
        Ok(self
            .subscriptions
            .lock()
            .unwrap()
            .add_change(&service_name, abbrev, writer))
    }

    /// Arrête le device : byebye répétés puis extinction des transports.
    ///
    /// La séquence byebye va toujours à son terme : environ deux secondes
    /// de NOTIFY ssdp:byebye répétés toutes les 800 ms.
    pub fn end(&mut self) {
        if !self.started {
            return;
        }
        info!("👋 Stopping device '{}'", self.description.name);

        let start = Instant::now();
        self.scheduler.add(ScheduledTask::repeating(
            "notify-byebye",
            start,
            BYEBYE_REPEAT,
            Some(start + BYEBYE_WINDOW),
            TaskKind::NotifyByebye,
        ));
        while Instant::now() < start + BYEBYE_WINDOW {
            let now = Instant::now();
            self.scheduler.execute(
                now,
                self.udp.as_mut(),
                self.announcement.as_ref(),
                self.options.ssdp_port,
            );
            std::thread::sleep(Duration::from_millis(self.options.loop_delay_ms));
        }

        if let Some(mut front) = self.front.take() {
            front.stop();
        }
        self.scheduler.set_active(false);
        self.started = false;
    }

    /// URL absolue du document de description.
    pub fn location(&self) -> Option<String> {
        self.frozen.as_ref().map(|d| d.location())
    }

    pub fn base_url(&self) -> &str {
        &self.description.base_url
    }

    pub fn description(&self) -> Option<&Arc<DeviceDescription>> {
        self.frozen.as_ref()
    }

    pub fn subscriptions_count(&self) -> usize {
        self.subscriptions.lock().unwrap().subscriptions_count()
    }

    pub fn pending_count(&self) -> usize {
        self.subscriptions.lock().unwrap().pending_count()
    }

    pub fn scheduled_tasks(&self) -> usize {
        self.scheduler.len()
    }
}

impl Drop for DeviceHost {
    fn drop(&mut self) {
        if self.started {
            self.end();
        }
    }
}

fn is_due(last: Option<Instant>, now: Instant, every: Duration) -> bool {
    match last {
        Some(last) => now.duration_since(last) >= every,
        None => true,
    }
}

fn control_response(
    service_name: &str,
    service_type: &str,
    request: &HttpRequest,
    handler: &mut ActionHandler,
) -> HttpResponse {
    let action = match soap::parse_action(&request.body) {
        Ok(action) => action,
        Err(e) => {
            warn!("❌ Bad SOAP request on {}: {}", service_name, e);
            return fault_response(error_codes::INVALID_ACTION, &e.to_string());
        }
    };
    debug!("📡 Control request {}#{}", service_name, action.name);

    let reply = handler(&action);
    if !reply.valid {
        return fault_response(error_codes::ACTION_FAILED, "Action failed");
    }

    let mut null = NullSink;
    let Ok(size) = soap::write_action_response(&mut null, service_type, &action.name, &reply.args)
    else {
        return HttpResponse::empty(500);
    };
    let mut body = Vec::with_capacity(size);
    if soap::write_action_response(&mut body, service_type, &action.name, &reply.args).is_err() {
        return HttpResponse::empty(500);
    }
    HttpResponse::ok_xml(body)
}

fn fault_response(code: &str, description: &str) -> HttpResponse {
    let mut body = Vec::new();
    if soap::write_soap_fault(&mut body, code, description).is_err() {
        return HttpResponse::empty(500);
    }
    let mut response = HttpResponse::ok_xml(body);
    response.status = 500;
    response
}

fn event_response(
    service_name: &str,
    subscriptions: &Arc<Mutex<DeviceSubscriptionManager>>,
    request: &HttpRequest,
) -> HttpResponse {
    match request.method.as_str() {
        "SUBSCRIBE" => {
            let sid = request.header("sid");
            let callback = request.header("callback");
            let timeout = request.header("timeout").and_then(parse_timeout_header);
            let result = subscriptions.lock().unwrap().subscribe(
                service_name,
                callback,
                sid,
                timeout,
                Instant::now(),
            );
            match result {
                Ok(ack) => HttpResponse::empty(200)
                    .with_header("SID", &ack.sid)
                    .with_header("TIMEOUT", &format!("Second-{}", ack.timeout_sec)),
                Err(EventError::NotFound(sid)) => {
                    warn!("SUBSCRIBE renewal for unknown SID {}", sid);
                    HttpResponse::empty(404)
                }
                Err(EventError::MissingCallback) => HttpResponse::empty(412),
            }
        }
        "UNSUBSCRIBE" => {
            let Some(sid) = request.header("sid") else {
                return HttpResponse::empty(412);
            };
            if subscriptions.lock().unwrap().unsubscribe(service_name, sid) {
                HttpResponse::empty(200)
            } else {
                HttpResponse::empty(404)
            }
        }
        other => {
            warn!("Unsupported EventSub method: {}", other);
            HttpResponse::empty(405)
        }
    }
}
