//! Socket UDP multicast pour SSDP.
//!
//! Deux modes d'ouverture, qui ne doivent pas partager le port 1900 :
//!
//! - le mode device écoute sur 0.0.0.0:1900 et rejoint le groupe multicast
//!   pour recevoir les M-SEARCH ;
//! - le mode control point se lie sur un port éphémère, envoie les
//!   M-SEARCH et reçoit les réponses unicast ainsi que les NOTIFY du
//!   groupe. Si les deux modes se liaient sur 1900 le noyau répartirait
//!   les datagrammes entre les sockets et des messages seraient perdus.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, warn};

use super::UdpEndpoint;
use crate::ssdp::SSDP_MULTICAST_ADDR;

/// Socket SSDP concrète.
pub struct SsdpSocket {
    socket: UdpSocket,
    multicast: SocketAddr,
}

impl SsdpSocket {
    /// Ouvre la socket en mode device : port SSDP, groupe multicast joint.
    pub fn device(port: u16) -> io::Result<Self> {
        let socket = Self::bind_reusable(port)?;
        Self::join_group(&socket);
        socket.set_multicast_loop_v4(false)?;
        socket.set_nonblocking(true)?;
        debug!("✅ SSDP device socket bound on 0.0.0.0:{}", port);
        Ok(Self {
            socket,
            multicast: SocketAddr::new(IpAddr::V4(SSDP_MULTICAST_ADDR), port),
        })
    }

    /// Ouvre la socket en mode control point : port éphémère.
    pub fn control_point(port: u16) -> io::Result<Self> {
        let socket = Self::bind_reusable(0)?;
        Self::join_group(&socket);
        socket.set_multicast_loop_v4(true)?;
        socket.set_nonblocking(true)?;
        debug!(
            "✅ SSDP control point socket bound on {}",
            socket.local_addr()?
        );
        Ok(Self {
            socket,
            multicast: SocketAddr::new(IpAddr::V4(SSDP_MULTICAST_ADDR), port),
        })
    }

    fn bind_reusable(port: u16) -> io::Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        let bind_addr: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
        socket.bind(&bind_addr.into())?;
        Ok(socket.into())
    }

    fn join_group(socket: &UdpSocket) {
        let Ok(interfaces) = get_if_addrs::get_if_addrs() else {
            warn!("❌ Could not enumerate network interfaces for multicast join");
            return;
        };
        for interface in interfaces {
            if let IpAddr::V4(ipv4) = interface.ip() {
                if ipv4.is_loopback() {
                    continue;
                }
                match socket.join_multicast_v4(&SSDP_MULTICAST_ADDR, &ipv4) {
                    Ok(()) => debug!("SSDP: joined {} on {}", SSDP_MULTICAST_ADDR, ipv4),
                    Err(e) => warn!(
                        "SSDP: failed to join {} on {}: {}",
                        SSDP_MULTICAST_ADDR, ipv4, e
                    ),
                }
            }
        }
    }
}

impl UdpEndpoint for SsdpSocket {
    fn send_multicast(&mut self, payload: &[u8]) -> io::Result<()> {
        self.socket.send_to(payload, self.multicast)?;
        Ok(())
    }

    fn send_unicast(&mut self, payload: &[u8], to: SocketAddr) -> io::Result<()> {
        self.socket.send_to(payload, to)?;
        Ok(())
    }

    fn poll_datagram(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match self.socket.recv_from(buf) {
            Ok((len, from)) => Ok(Some((len, from))),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.local_addr().ok()
    }
}

/// Devine l'adresse IP locale de la machine.
///
/// Demande au système quelle interface serait utilisée pour joindre une
/// adresse publique ; aucune connexion réelle n'est établie (UDP est sans
/// connexion). Retourne `127.0.0.1` en cas d'échec.
pub fn guess_local_ip() -> String {
    match UdpSocket::bind("0.0.0.0:0") {
        Ok(socket) => {
            if socket.connect("8.8.8.8:80").is_ok() {
                if let Ok(local_addr) = socket.local_addr() {
                    return local_addr.ip().to_string();
                }
            }
            "127.0.0.1".to_string()
        }
        Err(_) => "127.0.0.1".to_string(),
    }
}
