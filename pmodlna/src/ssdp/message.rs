//! Codec des datagrammes SSDP.
//!
//! SSDP transporte du texte HTTP sur UDP. Le parseur reconnaît les trois
//! formes utiles : M-SEARCH, NOTIFY (alive/byebye) et la réponse unicast
//! `HTTP/1.1 200 OK` à un M-SEARCH. Un datagramme malformé est simplement
//! ignoré.

use std::collections::HashMap;
use std::net::SocketAddr;

use tracing::trace;

use super::{Announcement, MAX_AGE, NotificationScope, SSDP_MULTICAST_ADDR};

/// Datagramme SSDP décodé.
#[derive(Debug, Clone)]
pub enum SsdpMessage {
    /// M-SEARCH reçu d'un control point.
    Search {
        st: String,
        mx: u32,
        from: SocketAddr,
    },

    /// NOTIFY ssdp:alive.
    Alive {
        usn: String,
        nt: String,
        location: String,
        server: String,
        max_age: u32,
        from: SocketAddr,
    },

    /// NOTIFY ssdp:byebye.
    ByeBye {
        usn: String,
        nt: String,
        from: SocketAddr,
    },

    /// Réponse unicast à un M-SEARCH.
    SearchReply {
        usn: String,
        st: String,
        location: String,
        server: String,
        max_age: u32,
        from: SocketAddr,
    },
}

impl SsdpMessage {
    /// Décode un datagramme, ou `None` s'il n'est pas exploitable.
    pub fn parse(data: &[u8], from: SocketAddr) -> Option<Self> {
        let text = String::from_utf8_lossy(data);
        let mut lines = text.lines();
        let first_line = lines.next()?.trim();
        let upper = first_line.to_ascii_uppercase();
        let headers = parse_headers(lines);

        let message = if upper.starts_with("M-SEARCH ") {
            let st = headers.get("ST")?.to_string();
            let mx = headers
                .get("MX")
                .and_then(|v| v.parse().ok())
                .unwrap_or(1);
            Some(SsdpMessage::Search { st, mx, from })
        } else if upper.starts_with("NOTIFY ") {
            parse_notify(&headers, from)
        } else if upper.starts_with("HTTP/") && upper.contains(" 200 ") {
            parse_search_reply(&headers, from)
        } else {
            trace!("Unknown SSDP message type from {}: {}", from, first_line);
            None
        };

        if message.is_none() {
            trace!("SSDP message from {} could not be parsed", from);
        }
        message
    }
}

fn parse_notify(headers: &HashMap<String, String>, from: SocketAddr) -> Option<SsdpMessage> {
    let nts = headers.get("NTS")?.to_ascii_lowercase();
    let nt = headers.get("NT")?.to_string();
    let usn = headers.get("USN")?.to_string();

    if nts == "ssdp:alive" {
        let location = headers.get("LOCATION")?.to_string();
        let server = headers
            .get("SERVER")
            .cloned()
            .unwrap_or_else(|| "Unknown".to_string());
        let max_age = parse_max_age(headers.get("CACHE-CONTROL"));
        Some(SsdpMessage::Alive {
            usn,
            nt,
            location,
            server,
            max_age,
            from,
        })
    } else if nts == "ssdp:byebye" {
        Some(SsdpMessage::ByeBye { usn, nt, from })
    } else {
        trace!("Unknown NTS value from {}: {}", from, nts);
        None
    }
}

fn parse_search_reply(headers: &HashMap<String, String>, from: SocketAddr) -> Option<SsdpMessage> {
    let st = headers.get("ST")?.to_string();
    let usn = headers.get("USN")?.to_string();
    let location = headers.get("LOCATION")?.to_string();
    let server = headers
        .get("SERVER")
        .cloned()
        .unwrap_or_else(|| "Unknown".to_string());
    let max_age = parse_max_age(headers.get("CACHE-CONTROL"));

    Some(SsdpMessage::SearchReply {
        usn,
        st,
        location,
        server,
        max_age,
        from,
    })
}

fn parse_headers<'a, I>(lines: I) -> HashMap<String, String>
where
    I: Iterator<Item = &'a str>,
{
    let mut headers = HashMap::new();
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        // Coupe au premier ':' seulement, les valeurs peuvent en contenir.
        if let Some(colon) = line.find(':') {
            let (name, value) = line.split_at(colon);
            let name = name.trim().to_ascii_uppercase();
            let value = value[1..].trim().to_string();
            if !name.is_empty() && !value.is_empty() {
                headers.insert(name, value);
            }
        } else {
            trace!("Skipping SSDP line without colon: '{}'", line);
        }
    }
    headers
}

fn parse_max_age(value: Option<&String>) -> u32 {
    if let Some(v) = value {
        let lower = v.to_ascii_lowercase();
        if let Some(idx) = lower.find("max-age") {
            let after = v[idx + 7..].trim_start().trim_start_matches('=').trim_start();
            let digits: String = after.chars().take_while(|c| c.is_ascii_digit()).collect();
            if let Ok(age) = digits.parse() {
                return age;
            }
        }
        trace!("Could not parse max-age from CACHE-CONTROL: '{}'", v);
    }
    MAX_AGE
}

/// Extrait l'UDN d'un USN (sous-chaîne avant `::`).
pub fn extract_udn(usn: &str) -> Option<String> {
    let lower = usn.trim().to_ascii_lowercase();
    let idx = lower.find("uuid:")?;
    let tail = &usn.trim()[idx..];
    match tail.find("::") {
        Some(end) => Some(tail[..end].to_string()),
        None => Some(tail.to_string()),
    }
}

/// Formate un M-SEARCH multicast.
pub fn format_msearch(st: &str, mx: u32, port: u16) -> String {
    let mx = mx.max(1);
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {}:{}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: {}\r\n\
         ST: {}\r\n\
         \r\n",
        SSDP_MULTICAST_ADDR, port, mx, st
    )
}

/// Formate un NOTIFY ssdp:alive pour un scope.
pub fn format_alive(scope: &NotificationScope, announcement: &Announcement, port: u16) -> String {
    format!(
        "NOTIFY * HTTP/1.1\r\n\
         HOST: {}:{}\r\n\
         CACHE-CONTROL: max-age={}\r\n\
         LOCATION: {}\r\n\
         NT: {}\r\n\
         NTS: ssdp:alive\r\n\
         SERVER: {}\r\n\
         USN: {}\r\n\
         \r\n",
        SSDP_MULTICAST_ADDR,
        port,
        announcement.max_age,
        announcement.location,
        scope.nt,
        announcement.server,
        scope.usn
    )
}

/// Formate un NOTIFY ssdp:byebye pour un scope.
pub fn format_byebye(scope: &NotificationScope, port: u16) -> String {
    format!(
        "NOTIFY * HTTP/1.1\r\n\
         HOST: {}:{}\r\n\
         NT: {}\r\n\
         NTS: ssdp:byebye\r\n\
         USN: {}\r\n\
         \r\n",
        SSDP_MULTICAST_ADDR, port, scope.nt, scope.usn
    )
}

/// Formate la réponse unicast 200 à un M-SEARCH.
pub fn format_search_reply(st: &str, usn: &str, announcement: &Announcement) -> String {
    let date = chrono::Utc::now().format("%a, %d %b %Y %H:%M:%S GMT");
    format!(
        "HTTP/1.1 200 OK\r\n\
         CACHE-CONTROL: max-age={}\r\n\
         DATE: {}\r\n\
         EXT:\r\n\
         LOCATION: {}\r\n\
         SERVER: {}\r\n\
         ST: {}\r\n\
         USN: {}\r\n\
         \r\n",
        announcement.max_age, date, announcement.location, announcement.server, st, usn
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_addr() -> SocketAddr {
        "192.0.2.9:1900".parse().unwrap()
    }

    #[test]
    fn test_parse_msearch() {
        let datagram = format_msearch("ssdp:all", 2, 1900);
        let message = SsdpMessage::parse(datagram.as_bytes(), from_addr()).unwrap();
        match message {
            SsdpMessage::Search { st, mx, .. } => {
                assert_eq!(st, "ssdp:all");
                assert_eq!(mx, 2);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_parse_alive() {
        let datagram = "NOTIFY * HTTP/1.1\r\n\
             HOST: 239.255.255.250:1900\r\n\
             CACHE-CONTROL: max-age=900\r\n\
             LOCATION: http://192.0.2.5:8080/device/r/desc.xml\r\n\
             NT: upnp:rootdevice\r\n\
             NTS: ssdp:alive\r\n\
             SERVER: Test/1.0\r\n\
             USN: uuid:01\r\n\r\n";
        let message = SsdpMessage::parse(datagram.as_bytes(), from_addr()).unwrap();
        match message {
            SsdpMessage::Alive {
                usn,
                nt,
                location,
                max_age,
                ..
            } => {
                assert_eq!(usn, "uuid:01");
                assert_eq!(nt, "upnp:rootdevice");
                assert_eq!(location, "http://192.0.2.5:8080/device/r/desc.xml");
                assert_eq!(max_age, 900);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_parse_byebye() {
        let datagram = "NOTIFY * HTTP/1.1\r\n\
             HOST: 239.255.255.250:1900\r\n\
             NT: upnp:rootdevice\r\n\
             NTS: ssdp:byebye\r\n\
             USN: uuid:01::upnp:rootdevice\r\n\r\n";
        let message = SsdpMessage::parse(datagram.as_bytes(), from_addr()).unwrap();
        assert!(matches!(message, SsdpMessage::ByeBye { .. }));
    }

    #[test]
    fn test_alive_without_location_dropped() {
        let datagram = "NOTIFY * HTTP/1.1\r\n\
             NT: upnp:rootdevice\r\n\
             NTS: ssdp:alive\r\n\
             USN: uuid:01\r\n\r\n";
        assert!(SsdpMessage::parse(datagram.as_bytes(), from_addr()).is_none());
    }

    #[test]
    fn test_extract_udn() {
        assert_eq!(extract_udn("uuid:01::upnp:rootdevice").unwrap(), "uuid:01");
        assert_eq!(extract_udn("uuid:01").unwrap(), "uuid:01");
        assert!(extract_udn("urn:something").is_none());
    }

    #[test]
    fn test_max_age_fallback() {
        assert_eq!(parse_max_age(Some(&"no-cache".to_string())), MAX_AGE);
        assert_eq!(parse_max_age(Some(&"max-age = 42".to_string())), 42);
        assert_eq!(parse_max_age(None), MAX_AGE);
    }
}
