use crate::view::LobbyView;
use bincode::{deserialize, serialize};
use log::{error, info, warn};
use serde_json::Value;
use shared::{Credentials, LobbyRequest, Packet, MAX_PACKET_SIZE, PROTOCOL_VERSION};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::{interval, timeout, Instant};

/// How often an idle client tells the server it is still there.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("rejected by server: {0}")]
    Rejected(String),
    #[error("no answer from server")]
    Timeout,
    #[error("not connected")]
    NotConnected,
}

/// Something the server told us.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Response {
        request_id: u32,
        /// Message type of the request this answers, if we sent it.
        message_type: Option<String>,
        success: bool,
        payload: Value,
    },
    Message {
        message_type: String,
        payload: Value,
    },
    Disconnected {
        reason: String,
    },
}

pub struct LobbyClient {
    socket: UdpSocket,
    server_addr: SocketAddr,
    client_id: Option<u32>,
    next_request_id: u32,
    pending: HashMap<u32, String>,
}

impl LobbyClient {
    pub async fn new(server_addr: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let server_addr = server_addr.parse()?;

        Ok(LobbyClient {
            socket,
            server_addr,
            client_id: None,
            next_request_id: 1,
            pending: HashMap::new(),
        })
    }

    pub fn client_id(&self) -> Option<u32> {
        self.client_id
    }

    pub fn is_connected(&self) -> bool {
        self.client_id.is_some()
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    async fn recv_packet(&self) -> Result<Packet, Box<dyn std::error::Error>> {
        let mut buffer = vec![0u8; MAX_PACKET_SIZE];
        loop {
            let (len, from) = self.socket.recv_from(&mut buffer).await?;
            if from != self.server_addr {
                warn!("Ignoring datagram from {}", from);
                continue;
            }
            match deserialize::<Packet>(&buffer[..len]) {
                Ok(packet) => return Ok(packet),
                Err(e) => warn!("Failed to deserialize packet: {}", e),
            }
        }
    }

    /// Joins the lobby and waits for the server's verdict.
    pub async fn connect(
        &mut self,
        name: &str,
        credentials: Credentials,
        wait: Duration,
    ) -> Result<u32, Box<dyn std::error::Error>> {
        info!("Connecting to {} as {}", self.server_addr, name);
        self.send_packet(&Packet::Connect {
            client_version: PROTOCOL_VERSION,
            name: name.to_string(),
            credentials,
        })
        .await?;

        let deadline = Instant::now() + wait;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let packet = timeout(remaining, self.recv_packet())
                .await
                .map_err(|_| ClientError::Timeout)??;

            match packet {
                Packet::Connected { client_id } => {
                    info!("Connected! Client ID: {}", client_id);
                    self.client_id = Some(client_id);
                    return Ok(client_id);
                }
                Packet::Rejected { reason } | Packet::Disconnected { reason } => {
                    return Err(ClientError::Rejected(reason).into());
                }
                other => warn!("Unexpected packet while connecting: {:?}", other),
            }
        }
    }

    /// Sends a request and returns its id.
    pub async fn send_request(
        &mut self,
        request: &LobbyRequest,
    ) -> Result<u32, Box<dyn std::error::Error>> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected.into());
        }

        let (message_type, payload) = request.to_parts()?;
        let request_id = self.next_request_id;
        self.next_request_id += 1;

        self.send_packet(&Packet::Request {
            request_id,
            message_type: message_type.clone(),
            payload,
        })
        .await?;
        self.pending.insert(request_id, message_type);
        Ok(request_id)
    }

    pub async fn heartbeat(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.is_connected() {
            self.send_packet(&Packet::Heartbeat).await?;
        }
        Ok(())
    }

    pub async fn disconnect(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        if self.client_id.take().is_some() {
            self.send_packet(&Packet::Disconnect).await?;
        }
        Ok(())
    }

    /// Waits for the next server message.
    pub async fn recv(&mut self) -> Result<ClientEvent, Box<dyn std::error::Error>> {
        loop {
            let packet = self.recv_packet().await?;
            if let Some(event) = self.handle_packet(packet) {
                return Ok(event);
            }
        }
    }

    fn handle_packet(&mut self, packet: Packet) -> Option<ClientEvent> {
        match packet {
            Packet::Response {
                request_id,
                success,
                payload,
            } => Some(ClientEvent::Response {
                request_id,
                message_type: self.pending.remove(&request_id),
                success,
                payload: parse_payload(&payload),
            }),
            Packet::Message {
                message_type,
                payload,
            } => Some(ClientEvent::Message {
                message_type,
                payload: parse_payload(&payload),
            }),
            Packet::Disconnected { reason } | Packet::Rejected { reason } => {
                warn!("Disconnected: {}", reason);
                self.client_id = None;
                Some(ClientEvent::Disconnected { reason })
            }
            Packet::Connected { client_id } => {
                self.client_id = Some(client_id);
                None
            }
            _ => {
                warn!("Unexpected packet type");
                None
            }
        }
    }

    /// Sends `script` one request at a time, each after the previous answer,
    /// mirroring everything into `view`. Stays connected for `linger` after
    /// the last answer.
    pub async fn run(
        &mut self,
        script: Vec<LobbyRequest>,
        linger: Duration,
        view: &mut LobbyView,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let mut script: VecDeque<LobbyRequest> = script.into();
        let mut heartbeat = interval(HEARTBEAT_INTERVAL);
        let mut awaiting: Option<u32> = None;
        let mut linger_until: Option<Instant> = None;

        loop {
            if awaiting.is_none() {
                match script.pop_front() {
                    Some(request) => awaiting = Some(self.send_request(&request).await?),
                    None if linger_until.is_none() => linger_until = Some(Instant::now() + linger),
                    None => {}
                }
            }

            let until = linger_until.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                event = self.recv() => {
                    match event? {
                        ClientEvent::Response { request_id, message_type, success, payload } => {
                            if Some(request_id) == awaiting {
                                awaiting = None;
                            }
                            let kind = message_type.unwrap_or_default();
                            if success {
                                info!("{} ok", kind);
                                if kind == "chat_history" {
                                    view.apply_chat_history(&payload);
                                }
                            } else {
                                error!("{} failed: {}", kind, payload);
                            }
                        }
                        ClientEvent::Message { message_type, payload } => {
                            if message_type == "event_message" || message_type == "chat_message" {
                                info!("[{}] {}", message_type, payload);
                            }
                            view.apply(&message_type, &payload);
                        }
                        ClientEvent::Disconnected { reason } => {
                            info!("Server closed the connection: {}", reason);
                            return Ok(());
                        }
                    }
                },

                _ = heartbeat.tick() => {
                    if let Err(e) = self.heartbeat().await {
                        error!("Error sending heartbeat: {}", e);
                    }
                },

                _ = tokio::time::sleep_until(until) => {
                    break;
                },
            }
        }

        info!("{}", view.summary());
        self.disconnect().await?;
        Ok(())
    }
}

fn parse_payload(payload: &str) -> Value {
    if payload.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(payload).unwrap_or_else(|_| Value::String(payload.to_string()))
}
