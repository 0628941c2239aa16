//! Tests d'intégration du device host : description, SCPD, abonnements.

use std::net::TcpListener;
use std::sync::Arc;
use std::time::{Duration, Instant};

use pmodlna::config::DlnaOptions;
use pmodlna::devices::{
    DescriptionParser, DeviceDescription, Direction, ScpdAction, ScpdArgument, ScpdDocument,
    ServiceDescription, StateVariable,
};
use pmodlna::eventing::EventWriter;
use pmodlna::host::DeviceHost;
use pmodlna::soap::ActionReply;
use pmodlna::transport::{HttpCall, HttpClient, MemoryUdpBus, UreqClient};
use pmodlna::xml::{XmlOut, XmlSink};

fn test_options() -> DlnaOptions {
    DlnaOptions {
        run_scheduler_every_ms: 10,
        run_subscriptions_every_ms: 10,
        http_request_timeout_ms: 2000,
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

fn start_host(bus: &MemoryUdpBus) -> DeviceHost {
    let description = DeviceDescription::new(
        "renderer",
        "urn:schemas-upnp-org:device:MediaRenderer:1",
        "uuid:01",
    );
    let udp = bus.endpoint("192.0.2.1:1900".parse().unwrap());
    let http = UreqClient::new(Duration::from_millis(2000));
    let mut host = DeviceHost::new(
        description,
        test_options(),
        Box::new(udp),
        Box::new(http),
        "127.0.0.1:0",
    );
    host.register_service(
        ServiceDescription::new("AVTransport", 1, "AVT", "/device/renderer"),
        avt_scpd(),
        Box::new(|_action| ActionReply::ok().with_arg("Result", "OK")),
    )
    .unwrap();
    host.begin().unwrap();
    host
}

fn http_get(client: &mut UreqClient, url: &str) -> (u16, Vec<u8>) {
    let reply = client
        .exchange(HttpCall {
            method: "GET",
            url,
            headers: &[],
            body: None,
        })
        .unwrap();
    (reply.status, reply.body)
}

fn foo_bar_writer() -> EventWriter {
    Arc::new(|sink: &mut dyn XmlSink| {
        let mut out = XmlOut::new(sink);
        out.text_element("Foo", "bar")
    })
}

/// Port loopback fermé de façon certaine.
fn dead_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

#[test]
fn test_description_round_trip() {
    let bus = MemoryUdpBus::new();
    let mut host = start_host(&bus);
    let location = host.location().unwrap();

    let mut client = UreqClient::new(Duration::from_secs(2));
    let (status, body) = http_get(&mut client, &location);
    assert_eq!(status, 200);

    let mut parser = DescriptionParser::new();
    parser.feed(&body);
    let parsed = parser.finish(&location);
    assert_eq!(parsed.udn, "uuid:01");
    assert_eq!(
        parsed.device_type,
        "urn:schemas-upnp-org:device:MediaRenderer:1"
    );
    assert_eq!(parsed.services.len(), 1);
    assert_eq!(parsed.services[0].name, "AVTransport");
    assert!(parsed.services[0].control_url.starts_with("http://127.0.0.1:"));

    host.end();
}

#[test]
fn test_scpd_served() {
    let bus = MemoryUdpBus::new();
    let mut host = start_host(&bus);
    let scpd_url = format!(
        "{}/device/renderer/service/AVTransport/desc.xml",
        host.base_url()
    );

    let mut client = UreqClient::new(Duration::from_secs(2));
    let (status, body) = http_get(&mut client, &scpd_url);
    assert_eq!(status, 200);
    let xml = String::from_utf8(body).unwrap();
    assert!(xml.contains(r#"<scpd xmlns="urn:schemas-upnp-org:service-1-0">"#));
    assert!(xml.contains("<name>Play</name>"));
    assert!(xml.contains("<name>LastChange</name>"));

    host.end();
}

#[test]
fn test_subscribe_renew_unsubscribe_over_http() {
    let bus = MemoryUdpBus::new();
    let mut host = start_host(&bus);
    let event_url = format!(
        "{}/device/renderer/service/AVTransport/event",
        host.base_url()
    );
    let mut client = UreqClient::new(Duration::from_secs(2));

    // SUBSCRIBE initial.
    let reply = client
        .exchange(HttpCall {
            method: "SUBSCRIBE",
            url: &event_url,
            headers: &[
                ("NT".to_string(), "upnp:event".to_string()),
                ("CALLBACK".to_string(), "<http://127.0.0.1:1/cb>".to_string()),
                ("TIMEOUT".to_string(), "Second-60".to_string()),
            ],
            body: None,
        })
        .unwrap();
    assert_eq!(reply.status, 200);
    let sid = reply.header("SID").unwrap().to_string();
    assert!(sid.starts_with("uuid:"));
    assert_eq!(reply.header("TIMEOUT"), Some("Second-60"));
    assert_eq!(host.subscriptions_count(), 1);

    // Renouvellement avec SID.
    let reply = client
        .exchange(HttpCall {
            method: "SUBSCRIBE",
            url: &event_url,
            headers: &[
                ("SID".to_string(), sid.clone()),
                ("TIMEOUT".to_string(), "Second-120".to_string()),
            ],
            body: None,
        })
        .unwrap();
    assert_eq!(reply.status, 200);
    assert_eq!(reply.header("SID"), Some(sid.as_str()));
    assert_eq!(host.subscriptions_count(), 1);

    // UNSUBSCRIBE, puis le même SID devient inconnu.
    let unsubscribe = |client: &mut UreqClient| {
        client
            .exchange(HttpCall {
                method: "UNSUBSCRIBE",
                url: &event_url,
                headers: &[("SID".to_string(), sid.clone())],
                body: None,
            })
            .unwrap()
    };
    assert_eq!(unsubscribe(&mut client).status, 200);
    assert_eq!(host.subscriptions_count(), 0);
    assert_eq!(unsubscribe(&mut client).status, 404);

    host.end();
}

#[test]
fn test_subscribe_without_callback_rejected() {
    let bus = MemoryUdpBus::new();
    let mut host = start_host(&bus);
    let event_url = format!(
        "{}/device/renderer/service/AVTransport/event",
        host.base_url()
    );
    let mut client = UreqClient::new(Duration::from_secs(2));

    let reply = client
        .exchange(HttpCall {
            method: "SUBSCRIBE",
            url: &event_url,
            headers: &[("NT".to_string(), "upnp:event".to_string())],
            body: None,
        })
        .unwrap();
    assert_eq!(reply.status, 412);
    assert_eq!(host.subscriptions_count(), 0);

    host.end();
}

#[test]
fn test_retry_drop_keeps_subscription() {
    let bus = MemoryUdpBus::new();
    let mut host = start_host(&bus);
    let event_url = format!(
        "{}/device/renderer/service/AVTransport/event",
        host.base_url()
    );

    // Abonné injoignable : port loopback fermé.
    let callback = format!("<http://127.0.0.1:{}/cb>", dead_port());
    let mut client = UreqClient::new(Duration::from_secs(2));
    let reply = client
        .exchange(HttpCall {
            method: "SUBSCRIBE",
            url: &event_url,
            headers: &[
                ("NT".to_string(), "upnp:event".to_string()),
                ("CALLBACK".to_string(), callback),
                ("TIMEOUT".to_string(), "Second-60".to_string()),
            ],
            body: None,
        })
        .unwrap();
    assert_eq!(reply.status, 200);

    for _ in 0..3 {
        assert_eq!(host.add_change("AVT", foo_bar_writer()).unwrap(), 1);
    }
    assert_eq!(host.pending_count(), 3);

    // Chaque entrée est tentée jusqu'à 4 fois puis abandonnée ; la tête
    // de ligne bloque les suivantes, d'où une dizaine de passes.
    let mut now = Instant::now();
    for _ in 0..15 {
        now += Duration::from_millis(20);
        host.loop_once(now);
    }
    assert_eq!(host.pending_count(), 0);
    assert_eq!(host.subscriptions_count(), 1);

    // L'abonnement survit pour les addChange futurs.
    assert_eq!(host.add_change("AVT", foo_bar_writer()).unwrap(), 1);

    host.end();
}

#[test]
fn test_expiry_cleanup() {
    let bus = MemoryUdpBus::new();
    let mut host = start_host(&bus);
    let event_url = format!(
        "{}/device/renderer/service/AVTransport/event",
        host.base_url()
    );

    let mut client = UreqClient::new(Duration::from_secs(2));
    let reply = client
        .exchange(HttpCall {
            method: "SUBSCRIBE",
            url: &event_url,
            headers: &[
                ("NT".to_string(), "upnp:event".to_string()),
                ("CALLBACK".to_string(), format!("<http://127.0.0.1:{}/cb>", dead_port())),
                ("TIMEOUT".to_string(), "Second-1".to_string()),
            ],
            body: None,
        })
        .unwrap();
    assert_eq!(reply.status, 200);
    assert_eq!(reply.header("TIMEOUT"), Some("Second-1"));
    assert_eq!(host.subscriptions_count(), 1);
    host.add_change("AVT", foo_bar_writer()).unwrap();

    // Deux secondes plus tard, la passe de publication expire tout.
    host.loop_once(Instant::now() + Duration::from_secs(2));
    assert_eq!(host.subscriptions_count(), 0);
    assert_eq!(host.pending_count(), 0);

    host.end();
}

#[test]
fn test_unknown_service_add_change() {
    let bus = MemoryUdpBus::new();
    let mut host = start_host(&bus);
    assert!(host.add_change("RCS", foo_bar_writer()).is_err());
    host.end();
}
