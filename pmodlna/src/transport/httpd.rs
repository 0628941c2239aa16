//! Frontal HTTP minimal.
//!
//! Un accepteur ligne à ligne suffisant pour les besoins UPnP : GET des
//! descriptions, POST de contrôle, SUBSCRIBE/UNSUBSCRIBE des événements et
//! NOTIFY entrants. Chaque connexion porte une requête et se ferme après la
//! réponse. L'accepteur tourne sur son propre thread ; les handlers portent
//! leur contexte par capture et partagent l'état du moteur derrière des
//! verrous à cette couture uniquement.

use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, warn};

const READ_TIMEOUT: Duration = Duration::from_secs(5);
const ACCEPT_IDLE_SLEEP: Duration = Duration::from_millis(10);

/// Requête HTTP entrante, corps lu en entier.
#[derive(Debug)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Valeur d'un header, nom comparé en minuscules.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|v| v.as_str())
    }
}

/// Réponse HTTP à émettre.
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn empty(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Réponse 200 avec un corps text/xml.
    pub fn ok_xml(body: Vec<u8>) -> Self {
        Self {
            status: 200,
            headers: vec![(
                "Content-Type".to_string(),
                "text/xml; charset=\"utf-8\"".to_string(),
            )],
            body,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

pub type RouteHandler = Box<dyn FnMut(&HttpRequest) -> HttpResponse + Send>;

/// Table de routes à chemin exact.
///
/// Chaque handler embarque son contexte par capture, il n'y a pas de table
/// de dispatch statique.
#[derive(Default)]
pub struct Router {
    routes: Vec<(String, RouteHandler)>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, path: &str, handler: RouteHandler) {
        self.routes.push((path.to_string(), handler));
    }

    pub fn dispatch(&mut self, request: &HttpRequest) -> HttpResponse {
        for (path, handler) in &mut self.routes {
            if *path == request.path {
                return handler(request);
            }
        }
        debug!("404 for {} {}", request.method, request.path);
        HttpResponse::empty(404)
    }
}

/// Frontal HTTP : un thread accepteur au-dessus d'un `TcpListener`.
pub struct HttpFront {
    addr: SocketAddr,
    router: Arc<Mutex<Router>>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl HttpFront {
    /// Lie l'adresse demandée et démarre l'accepteur.
    pub fn start(bind: &str) -> io::Result<Self> {
        let listener = TcpListener::bind(bind)?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        let router = Arc::new(Mutex::new(Router::new()));
        let stop = Arc::new(AtomicBool::new(false));

        let thread_router = router.clone();
        let thread_stop = stop.clone();
        let thread = std::thread::Builder::new()
            .name("pmodlna-http".to_string())
            .spawn(move || accept_loop(listener, thread_router, thread_stop))?;

        info!("✅ HTTP front listening on {}", addr);
        Ok(Self {
            addr,
            router,
            stop,
            thread: Some(thread),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Table de routes partagée avec l'accepteur.
    pub fn router(&self) -> Arc<Mutex<Router>> {
        self.router.clone()
    }

    /// Arrête l'accepteur et attend la fin du thread.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for HttpFront {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(listener: TcpListener, router: Arc<Mutex<Router>>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((mut stream, peer)) => {
                let _ = stream.set_nonblocking(false);
                let _ = stream.set_read_timeout(Some(READ_TIMEOUT));
                let _ = stream.set_write_timeout(Some(READ_TIMEOUT));
                match read_http_request(&mut stream) {
                    Ok(request) => {
                        let response = router.lock().unwrap().dispatch(&request);
                        if let Err(e) = write_http_response(&mut stream, &response) {
                            warn!("❌ Failed to answer {} {}: {}", request.method, peer, e);
                        }
                    }
                    Err(e) => {
                        warn!("❌ Bad request from {}: {}", peer, e);
                        let _ = write_http_response(&mut stream, &HttpResponse::empty(400));
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_IDLE_SLEEP);
            }
            Err(e) => {
                warn!("❌ Incoming connection failed: {}", e);
            }
        }
    }
}

fn read_http_request(stream: &mut TcpStream) -> io::Result<HttpRequest> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut request_line = String::new();
    if reader.read_line(&mut request_line)? == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "missing request line",
        ));
    }

    let request_line = request_line.trim_end_matches(['\r', '\n']);
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing method"))?
        .to_ascii_uppercase();
    let path = parts
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing path"))?
        .to_string();

    let mut headers = HashMap::new();
    loop {
        let mut line = String::new();
        let len = reader.read_line(&mut line)?;
        if len == 0 {
            break;
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }
        if let Some((name, value)) = trimmed.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let content_length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body)?;

    Ok(HttpRequest {
        method,
        path,
        headers,
        body,
    })
}

fn write_http_response(stream: &mut TcpStream, response: &HttpResponse) -> io::Result<()> {
    let mut head = format!(
        "HTTP/1.1 {} {}\r\n",
        response.status,
        reason(response.status)
    );
    for (name, value) in &response.headers {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str(&format!("Content-Length: {}\r\n", response.body.len()));
    head.push_str("Connection: close\r\n\r\n");

    stream.write_all(head.as_bytes())?;
    stream.write_all(&response.body)?;
    stream.flush()
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        412 => "Precondition Failed",
        500 => "Internal Server Error",
        _ => "",
    }
}
