//! Scénario d'aller-retour SOAP : Play sur un service AVTransport.

mod common;

use std::time::Duration;

use common::{drive_until, start_control_point, start_device};
use pmodlna::soap::ActionRequest;
use pmodlna::transport::MemoryUdpBus;

#[test]
fn test_soap_round_trip() {
    let bus = MemoryUdpBus::new();
    let mut host = start_device(&bus);
    let (mut cp, _log) = start_control_point(&bus);

    cp.begin("ssdp:all", Duration::from_millis(100), Duration::from_secs(2));
    let found = drive_until(&mut host, &mut cp, Duration::from_secs(2), |_, cp| {
        cp.registry().contains("uuid:01")
    });
    assert!(found);

    let reply = cp
        .invoke("uuid:01", "AVTransport", "Play", &[("InstanceID", "0")])
        .unwrap();
    assert!(reply.valid);
    assert_eq!(reply.args.len(), 1);
    assert_eq!(reply.argument("Result"), Some("OK"));

    cp.end();
    host.end();
}

#[test]
fn test_unknown_action_is_fault() {
    let bus = MemoryUdpBus::new();
    let mut host = start_device(&bus);
    let (mut cp, _log) = start_control_point(&bus);

    cp.begin("ssdp:all", Duration::from_millis(100), Duration::from_secs(2));
    assert!(drive_until(&mut host, &mut cp, Duration::from_secs(2), |_, cp| {
        cp.registry().contains("uuid:01")
    }));

    // Le handler refuse l'action, la réponse est un SOAP Fault HTTP 500.
    let reply = cp
        .invoke("uuid:01", "AVTransport", "Teleport", &[])
        .unwrap();
    assert!(!reply.valid);
    assert!(reply.args.is_empty());

    cp.end();
    host.end();
}

#[test]
fn test_queued_requests_collect_replies() {
    let bus = MemoryUdpBus::new();
    let mut host = start_device(&bus);
    let (mut cp, _log) = start_control_point(&bus);

    cp.begin("ssdp:all", Duration::from_millis(100), Duration::from_secs(2));
    assert!(drive_until(&mut host, &mut cp, Duration::from_secs(2), |_, cp| {
        cp.registry().contains("uuid:01")
    }));

    let service = cp
        .registry()
        .get("uuid:01")
        .unwrap()
        .description
        .service("AVTransport")
        .unwrap()
        .clone();

    let requests = vec![
        ActionRequest::new(&service, "Play")
            .arg("InstanceID", "0")
            .expect_results(1),
        ActionRequest::new(&service, ""),
    ];
    let replies = cp.execute_actions(&requests);
    assert_eq!(replies.len(), 2);
    assert!(replies[0].valid);
    assert_eq!(replies[0].argument("Result"), Some("OK"));
    // Requête invalide (action vide) : jamais envoyée.
    assert!(!replies[1].valid);

    cp.end();
    host.end();
}
