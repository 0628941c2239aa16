//! # Module transport - seams UDP et HTTP
//!
//! Le moteur ne possède ni la pile UDP ni la pile HTTP : il les consomme à
//! travers les traits de ce module.
//!
//! - [`UdpEndpoint`] : envoi multicast/unicast et réception non bloquante
//!   de datagrammes SSDP. Implémenté par [`SsdpSocket`] (socket multicast
//!   réelle) et [`MemoryUdp`] (bus en mémoire pour les tests).
//! - [`HttpClient`] : échanges HTTP sortants avec méthodes arbitraires
//!   (SUBSCRIBE, NOTIFY, POST). Implémenté par [`UreqClient`].
//! - [`HttpFront`] : frontal HTTP minimal pour les routes entrantes,
//!   adossé à un thread accepteur.

mod http_client;
mod httpd;
mod udp;

pub use http_client::UreqClient;
pub use httpd::{HttpFront, HttpRequest, HttpResponse, RouteHandler, Router};
pub use udp::{SsdpSocket, guess_local_ip};

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::xml::XmlSink;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Invalid URL '{0}'")]
    Url(String),
}

/// Point d'accès UDP pour SSDP.
///
/// La réception est non bloquante : `poll_datagram` retourne `Ok(None)`
/// quand rien n'est arrivé, ce qui est un résultat normal pour la boucle
/// coopérative.
pub trait UdpEndpoint: Send {
    fn send_multicast(&mut self, payload: &[u8]) -> io::Result<()>;

    fn send_unicast(&mut self, payload: &[u8], to: SocketAddr) -> io::Result<()>;

    fn poll_datagram(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>>;

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// Corps d'une requête HTTP sortante.
///
/// Le corps est exprimé comme une closure qui écrit dans un puits et
/// retourne le nombre d'octets produits ; `length` a été précalculé par un
/// premier passage dans un puits nul.
pub struct HttpPayload<'a> {
    pub content_type: &'a str,
    pub length: usize,
    pub write: &'a mut dyn FnMut(&mut dyn XmlSink) -> io::Result<usize>,
}

/// Requête HTTP sortante.
pub struct HttpCall<'a> {
    pub method: &'a str,
    pub url: &'a str,
    pub headers: &'a [(String, String)],
    pub body: Option<HttpPayload<'a>>,
}

/// Réponse HTTP reçue.
#[derive(Debug)]
pub struct HttpReply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Valeur d'un header, nom comparé sans tenir compte de la casse.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Client HTTP sortant avec timeout fini par appel.
pub trait HttpClient: Send {
    fn exchange(&mut self, call: HttpCall<'_>) -> Result<HttpReply, TransportError>;
}

type Mailbox = Arc<Mutex<VecDeque<(Vec<u8>, SocketAddr)>>>;

/// Bus UDP en mémoire reliant plusieurs endpoints d'un même processus.
///
/// Sert aux tests de scénario pour faire dialoguer un device et un control
/// point sans toucher au réseau.
#[derive(Clone, Default)]
pub struct MemoryUdpBus {
    peers: Arc<Mutex<Vec<(SocketAddr, Mailbox)>>>,
}

impl MemoryUdpBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Crée un endpoint rattaché au bus, avec une adresse distincte.
    pub fn endpoint(&self, addr: SocketAddr) -> MemoryUdp {
        let inbox: Mailbox = Arc::new(Mutex::new(VecDeque::new()));
        self.peers.lock().unwrap().push((addr, inbox.clone()));
        MemoryUdp {
            addr,
            inbox,
            peers: self.peers.clone(),
        }
    }
}

/// Endpoint UDP en mémoire.
pub struct MemoryUdp {
    addr: SocketAddr,
    inbox: Mailbox,
    peers: Arc<Mutex<Vec<(SocketAddr, Mailbox)>>>,
}

impl UdpEndpoint for MemoryUdp {
    fn send_multicast(&mut self, payload: &[u8]) -> io::Result<()> {
        for (addr, inbox) in self.peers.lock().unwrap().iter() {
            if *addr != self.addr {
                inbox
                    .lock()
                    .unwrap()
                    .push_back((payload.to_vec(), self.addr));
            }
        }
        Ok(())
    }

    fn send_unicast(&mut self, payload: &[u8], to: SocketAddr) -> io::Result<()> {
        for (addr, inbox) in self.peers.lock().unwrap().iter() {
            if *addr == to {
                inbox
                    .lock()
                    .unwrap()
                    .push_back((payload.to_vec(), self.addr));
                return Ok(());
            }
        }
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no memory endpoint at {to}"),
        ))
    }

    fn poll_datagram(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        let Some((payload, from)) = self.inbox.lock().unwrap().pop_front() else {
            return Ok(None);
        };
        let len = payload.len().min(buf.len());
        buf[..len].copy_from_slice(&payload[..len]);
        Ok(Some((len, from)))
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        Some(self.addr)
    }
}
