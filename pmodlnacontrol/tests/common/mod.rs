//! Aides partagées : un device et un control point reliés par un bus UDP
//! en mémoire, HTTP réel sur loopback.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use pmodlna::config::DlnaOptions;
use pmodlna::devices::{
    DeviceDescription, Direction, ScpdAction, ScpdArgument, ScpdDocument, ServiceDescription,
    StateVariable,
};
use pmodlna::host::DeviceHost;
use pmodlna::soap::ActionReply;
use pmodlna::transport::{MemoryUdpBus, UreqClient};
use pmodlnacontrol::ControlPoint;

pub type EventLog = Arc<Mutex<Vec<(String, String, String)>>>;

pub fn device_options() -> DlnaOptions {
    DlnaOptions {
        run_scheduler_every_ms: 10,
        run_subscriptions_every_ms: 10,
        http_request_timeout_ms: 2000,
        subscription_timeout_sec: 60,
        ..DlnaOptions::default()
    }
}

pub fn control_point_options() -> DlnaOptions {
    DlnaOptions {
        http_request_timeout_ms: 2000,
        subscription_timeout_sec: 60,
        event_subscription_retry_ms: 20,
        msearch_repeat_ms: 500,
        ..DlnaOptions::default()
    }
}

fn avt_scpd() -> ScpdDocument {
    ScpdDocument {
        actions: vec![ScpdAction::new(
            "Play",
            vec![ScpdArgument::new(
                "InstanceID",
                Direction::In,
                "A_ARG_TYPE_InstanceID",
            )],
        )],
        variables: vec![StateVariable::new("LastChange", "string", true)],
    }
}

/// Démarre un device MediaRenderer `uuid:01` avec un service AVTransport
/// dont le handler Play répond `Result=OK`.
pub fn start_device(bus: &MemoryUdpBus) -> DeviceHost {
    let description = DeviceDescription::new(
        "renderer",
        "urn:schemas-upnp-org:device:MediaRenderer:1",
        "uuid:01",
    );
    let udp = bus.endpoint("192.0.2.1:1900".parse().unwrap());
    let http = UreqClient::new(Duration::from_secs(2));
    let mut host = DeviceHost::new(
        description,
        device_options(),
        Box::new(udp),
        Box::new(http),
        "127.0.0.1:0",
    );
    host.register_service(
        ServiceDescription::new("AVTransport", 1, "AVT", "/device/renderer"),
        avt_scpd(),
        Box::new(|action| {
            if action.name == "Play" {
                ActionReply::ok().with_arg("Result", "OK")
            } else {
                ActionReply::invalid()
            }
        }),
    )
    .unwrap();
    host.begin().unwrap();
    host
}

/// Crée un control point branché sur le même bus, avec journal des
/// événements reçus.
pub fn start_control_point(bus: &MemoryUdpBus) -> (ControlPoint, EventLog) {
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let udp = bus.endpoint("192.0.2.2:40000".parse().unwrap());
    let http = UreqClient::new(Duration::from_secs(2));
    let cp = ControlPoint::new(
        control_point_options(),
        Box::new(udp),
        Box::new(http),
        "127.0.0.1:0",
        Box::new(move |sid, name, value| {
            sink.lock()
                .unwrap()
                .push((sid.to_string(), name.to_string(), value.to_string()));
        }),
    )
    .unwrap();
    (cp, log)
}

/// Fait tourner device et control point entrelacés jusqu'à ce que la
/// condition passe ou que le délai expire. Retourne vrai si la condition
/// a fini par passer.
pub fn drive_until<F>(
    host: &mut DeviceHost,
    cp: &mut ControlPoint,
    timeout: Duration,
    mut condition: F,
) -> bool
where
    F: FnMut(&DeviceHost, &ControlPoint) -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        let now = Instant::now();
        host.loop_once(now);
        cp.poll(now);
        if condition(host, cp) {
            return true;
        }
        if now >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}
