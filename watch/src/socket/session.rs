//! Async websocket driver: dial, pump frames through the protocol, redial.

use std::collections::HashMap;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use prometheus::{Gauge, Opts, Registry};
use rand::Rng;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::console::{emit, ConsoleHook};
use super::protocol::{SessionEvent, SessionProtocol, SessionState};
use crate::client::ApiClient;
use crate::domain::{ConfigError, ProtocolError, TransportError};

/// Wait between a failed or closed session and the next dial
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(10);

/// SockJS endpoint for `base`: `/socket/<server id>/<session id>/websocket`.
///
/// # Errors
/// Returns `ConfigError::UnsupportedScheme` unless `base` is http or https.
pub fn socket_url(base: &Url) -> Result<Url, ConfigError> {
    let scheme = match base.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
    };

    let mut rng = rand::thread_rng();
    let server: u32 = rng.gen_range(100..=998);
    let session: [u8; 4] = rng.gen();
    let path = format!("/socket/{server}/{}/websocket", hex::encode(session));

    let mut url = base.join(&path).map_err(|source| ConfigError::InvalidUrl {
        server: base.to_string(),
        source,
    })?;
    url.set_scheme(scheme)
        .map_err(|()| ConfigError::UnsupportedScheme(base.scheme().to_string()))?;
    Ok(url)
}

struct SocketGauges {
    cpu: Gauge,
    memory: Gauge,
}

impl SocketGauges {
    fn register(
        registry: &Registry,
        const_labels: &HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let registration =
            |source| ConfigError::Registration { what: "websocket gauges".to_string(), source };
        let gauge = |name: &str, help: &str| -> Result<Gauge, ConfigError> {
            let opts = Opts::new(name, help)
                .namespace("screeps")
                .subsystem("websocket")
                .const_labels(const_labels.clone());
            let gauge = Gauge::with_opts(opts).map_err(registration)?;
            registry.register(Box::new(gauge.clone())).map_err(registration)?;
            Ok(gauge)
        };

        Ok(Self {
            cpu: gauge("cpu_last", "Last recorded cpu usage for the user.")?,
            memory: gauge("memory_last_bytes", "Last recorded memory usage for the user in bytes.")?,
        })
    }
}

/// Long lived websocket feed of one server.
pub struct ScreepsSocket {
    client: ApiClient,
    channels: Vec<String>,
    gauges: SocketGauges,
    hook: Option<ConsoleHook>,
    backoff: Duration,
}

impl ScreepsSocket {
    /// # Errors
    /// Returns `ConfigError` for a base url the socket cannot be derived
    /// from or gauges that clash in `registry`.
    pub fn new(
        client: ApiClient,
        channels: Vec<String>,
        registry: &Registry,
        const_labels: &HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        socket_url(client.base())?;
        let gauges = SocketGauges::register(registry, const_labels)?;
        Ok(Self { client, channels, gauges, hook: None, backoff: RECONNECT_BACKOFF })
    }

    #[must_use]
    pub fn with_console_hook(mut self, hook: ConsoleHook) -> Self {
        self.hook = Some(hook);
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Run sessions until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let Some(user_id) = self.resolve_user_id(&cancel).await else {
            return;
        };

        let mut state = SessionState::Disconnected;
        loop {
            transition(&mut state, SessionState::Dialing);
            match self.session(&user_id, &cancel).await {
                Ok(()) => {
                    transition(&mut state, SessionState::Disconnected);
                    return;
                }
                Err(err) => error!("Websocket session failed: {err}"),
            }
            transition(&mut state, SessionState::Closed);

            info!("Reconnecting websocket in {:?}", self.backoff);
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(self.backoff) => {}
            }
        }
    }

    async fn resolve_user_id(&self, cancel: &CancellationToken) -> Option<String> {
        loop {
            let lookup = tokio::select! {
                () = cancel.cancelled() => return None,
                lookup = self.client.my_user_id() => lookup,
            };
            match lookup {
                Ok(id) if !id.is_empty() => return Some(id),
                Ok(_) => error!("Empty user id from {}", self.client.base()),
                Err(err) => error!("Failed to get user id: {err}"),
            }
            tokio::select! {
                () = cancel.cancelled() => return None,
                () = tokio::time::sleep(self.backoff) => {}
            }
        }
    }

    /// One connection. `Ok` only when cancelled.
    async fn session(&self, user_id: &str, cancel: &CancellationToken) -> Result<(), ProtocolError> {
        let url = socket_url(self.client.base())
            .map_err(|err| ProtocolError::Payload(err.to_string()))?;
        debug!("Dialing websocket {url}");
        let (stream, _) = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            dialed = connect_async(url.as_str()) => dialed.map_err(TransportError::from)?,
        };
        info!("Websocket session started");

        let (mut sink, mut stream) = stream.split();
        let mut protocol = SessionProtocol::new(user_id, &self.channels);

        loop {
            let message = tokio::select! {
                () = cancel.cancelled() => {
                    let _ = sink.close().await;
                    return Ok(());
                }
                message = stream.next() => message,
            };

            let text = match message {
                None | Some(Ok(Message::Close(_))) => return Err(ProtocolError::StreamEnded),
                Some(Err(err)) => return Err(TransportError::from(err).into()),
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(_)) => continue,
            };

            for event in protocol.handle_frame(&text)? {
                match event {
                    SessionEvent::Authenticate => {
                        let token = self
                            .client
                            .auth()
                            .token(self.client.http(), self.client.base())
                            .await
                            .map_err(ProtocolError::Token)?;
                        let auth = protocol.auth_message(&token);
                        sink.send(Message::Text(auth)).await.map_err(TransportError::from)?;
                    }
                    SessionEvent::Send(text) => {
                        sink.send(Message::Text(text)).await.map_err(TransportError::from)?;
                    }
                    SessionEvent::Console(console) => emit(&console, self.hook.as_ref()),
                    SessionEvent::Cpu { cpu, memory } => {
                        if let Some(cpu) = cpu {
                            self.gauges.cpu.set(cpu);
                        }
                        if let Some(memory) = memory {
                            self.gauges.memory.set(memory);
                        }
                    }
                }
            }
        }
    }
}

fn transition(state: &mut SessionState, next: SessionState) {
    if *state != next {
        debug!("Websocket {state} -> {next}");
        if next == SessionState::Closed {
            warn!("Websocket session closed");
        }
        *state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_url() {
        let url = socket_url(&Url::parse("https://screeps.com").unwrap()).unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.host_str(), Some("screeps.com"));

        let parts: Vec<&str> = url.path().split('/').collect();
        assert_eq!(parts.len(), 5, "{url}");
        assert_eq!(parts[1], "socket");
        let server: u32 = parts[2].parse().unwrap();
        assert!((100..=998).contains(&server));
        assert_eq!(parts[3].len(), 8);
        assert!(parts[3].chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(parts[4], "websocket");
    }

    #[test]
    fn test_socket_url_keeps_port() {
        let url = socket_url(&Url::parse("http://localhost:21025/").unwrap()).unwrap();
        assert_eq!(url.scheme(), "ws");
        assert_eq!(url.port(), Some(21025));
    }

    #[test]
    fn test_unsupported_scheme() {
        let err = socket_url(&Url::parse("ftp://screeps.com").unwrap()).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedScheme(ref scheme) if scheme == "ftp"));
    }
}
