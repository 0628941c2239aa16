//! Client HTTP sortant basé sur ureq.

use std::io::Read;
use std::time::Duration;

use tracing::debug;
use ureq::Agent;

use super::{HttpCall, HttpClient, HttpReply, TransportError};

/// Client HTTP bloquant avec timeout global par appel.
///
/// Les statuts 4xx/5xx ne sont pas traités comme des erreurs de transport :
/// l'appelant décide quoi faire du statut. Les méthodes non standard
/// (SUBSCRIBE, UNSUBSCRIBE, NOTIFY) passent par le constructeur de requête
/// de `ureq::http`.
pub struct UreqClient {
    agent: Agent,
}

impl UreqClient {
    pub fn new(timeout: Duration) -> Self {
        let config = Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(timeout))
            .allow_non_standard_methods(true)
            .build();
        Self {
            agent: config.into(),
        }
    }
}

impl HttpClient for UreqClient {
    fn exchange(&mut self, call: HttpCall<'_>) -> Result<HttpReply, TransportError> {
        let mut builder = ureq::http::Request::builder()
            .method(call.method)
            .uri(call.url);
        for (name, value) in call.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let mut response = match call.body {
            Some(payload) => {
                let mut body: Vec<u8> = Vec::with_capacity(payload.length);
                (payload.write)(&mut body)?;
                let request = builder
                    .header("Content-Type", payload.content_type)
                    .body(body)
                    .map_err(|e| TransportError::Http(e.to_string()))?;
                self.agent
                    .run(request)
                    .map_err(|e| TransportError::Http(e.to_string()))?
            }
            None => {
                let request = builder
                    .body(())
                    .map_err(|e| TransportError::Http(e.to_string()))?;
                self.agent
                    .run(request)
                    .map_err(|e| TransportError::Http(e.to_string()))?
            }
        };

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.to_string(), v.to_string()))
            })
            .collect();

        let mut body = Vec::new();
        response
            .body_mut()
            .as_reader()
            .read_to_end(&mut body)
            .map_err(|e| TransportError::Http(e.to_string()))?;

        debug!(
            "📨 {} {} -> {} ({} bytes)",
            call.method,
            call.url,
            status,
            body.len()
        );

        Ok(HttpReply {
            status,
            headers,
            body,
        })
    }
}
