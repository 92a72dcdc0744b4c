//! UDP transport host for the lobby
//!
//! Decodes datagrams into host events for the lobby and executes the
//! network commands the lobby sends back.

use crate::client_manager::ClientManager;
use crate::driver::NetworkCommand;
use crate::events::{HostEvent, HostEvents};
use crate::session::ClientInfo;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{Packet, MAX_PACKET_SIZE, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};

/// Messages sent from network tasks to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    ClientTimeout { client_id: u32 },
}

/// Messages sent from the main loop to the sender task
#[derive(Debug)]
pub enum OutgoingMessage {
    SendPacket {
        packet: Packet,
        addr: SocketAddr,
    },
    BroadcastPacket {
        packet: Packet,
        exclude: Option<u32>,
    },
}

pub struct LobbyServer {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    events: Arc<RwLock<HostEvents>>,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    outgoing_tx: mpsc::UnboundedSender<OutgoingMessage>,
    outgoing_rx: mpsc::UnboundedReceiver<OutgoingMessage>,
    commands_rx: mpsc::UnboundedReceiver<NetworkCommand>,
}

impl LobbyServer {
    pub async fn new(
        addr: &str,
        max_clients: usize,
        events: Arc<RwLock<HostEvents>>,
        commands_rx: mpsc::UnboundedReceiver<NetworkCommand>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Lobby listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();

        Ok(LobbyServer {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(max_clients))),
            events,
            server_tx,
            server_rx,
            outgoing_tx,
            outgoing_rx,
            commands_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_PACKET_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes outgoing packet queue
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let clients = Arc::clone(&self.clients);
        let mut outgoing_rx = std::mem::replace(&mut self.outgoing_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                match message {
                    OutgoingMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    OutgoingMessage::BroadcastPacket { packet, exclude } => {
                        let client_addrs = {
                            let clients_guard = clients.read().await;
                            clients_guard.get_client_addrs()
                        };

                        for (client_id, addr) in client_addrs {
                            if Some(client_id) == exclude {
                                continue;
                            }

                            if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                                error!("Failed to send to client {}: {}", client_id, e);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that monitors client timeouts
    fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts()
                };

                for client_id in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { client_id }) {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self
            .outgoing_tx
            .send(OutgoingMessage::SendPacket { packet, addr })
        {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn broadcast_packet(&self, packet: Packet, exclude: Option<u32>) {
        if let Err(e) = self
            .outgoing_tx
            .send(OutgoingMessage::BroadcastPacket { packet, exclude })
        {
            error!("Failed to queue broadcast packet: {}", e);
        }
    }

    async fn publish(&self, event: HostEvent) {
        let delivered = self.events.read().await.publish(event);
        if delivered == 0 {
            debug!("No lobby listening for host events");
        }
    }

    /// Turns an incoming packet into host events
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        let known = {
            let mut clients = self.clients.write().await;
            let id = clients.find_client_by_addr(addr);
            if let Some(id) = id {
                clients.touch(id);
            }
            id
        };

        match packet {
            Packet::Connect {
                client_version,
                name,
                credentials,
            } => {
                info!(
                    "Client {} connecting from {} (version: {})",
                    name, addr, client_version
                );

                if client_version != PROTOCOL_VERSION {
                    self.send_packet(
                        Packet::Rejected {
                            reason: format!(
                                "Protocol version mismatch (server {}, client {})",
                                PROTOCOL_VERSION, client_version
                            ),
                        },
                        addr,
                    );
                    return;
                }

                let admitted = match known {
                    Some(client_id) => Some((client_id, true)),
                    None => {
                        let mut clients = self.clients.write().await;
                        clients
                            .add_client(addr, &name, &credentials.account_id)
                            .map(|a| (a.client_id, a.reconnect))
                    }
                };

                match admitted {
                    Some((client_id, reconnect)) => {
                        self.send_packet(Packet::Connected { client_id }, addr);
                        self.publish(HostEvent::Connected {
                            client: ClientInfo::new(client_id, name, credentials),
                            reconnect,
                        })
                        .await;
                    }
                    None => self.send_packet(
                        Packet::Disconnected {
                            reason: "Server full".to_string(),
                        },
                        addr,
                    ),
                }
            }

            Packet::Request {
                request_id,
                message_type,
                payload,
            } => match known {
                Some(client_id) => {
                    self.publish(HostEvent::Request {
                        client_id,
                        request_id,
                        message_type,
                        payload,
                    })
                    .await
                }
                None => warn!("Request {} from unconnected {}", message_type, addr),
            },

            Packet::Heartbeat => {}

            Packet::Disconnect => {
                if let Some(client_id) = known {
                    self.clients.write().await.remove_client(&client_id);
                    self.publish(HostEvent::Disconnected { client_id }).await;
                }
            }

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    /// Executes one command from the lobby. Returns false on shutdown.
    async fn handle_command(&mut self, command: NetworkCommand) -> bool {
        match command {
            NetworkCommand::Send { client_id, packet } => {
                let addr = self.clients.read().await.addr_of(client_id);
                match addr {
                    Some(addr) => self.send_packet(packet, addr),
                    None => debug!("Dropping packet for departed client {}", client_id),
                }
            }
            NetworkCommand::Broadcast { packet } => self.broadcast_packet(packet, None),
            NetworkCommand::Close { client_id, packet } => {
                let mut clients = self.clients.write().await;
                if let Some(addr) = clients.addr_of(client_id) {
                    self.send_packet(packet, addr);
                }
                clients.forget_client(&client_id);
            }
            NetworkCommand::SetMaxClients(max) => {
                self.clients.write().await.set_max_clients(max);
            }
            NetworkCommand::Shutdown => return false,
        }
        true
    }

    /// Runs the transport until the lobby asks it to stop
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        info!("Lobby transport started");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(ServerMessage::ClientTimeout { client_id }) => {
                            info!("Client {} timed out", client_id);
                            self.publish(HostEvent::Disconnected { client_id }).await;
                        },
                        None => break,
                    }
                },

                command = self.commands_rx.recv() => {
                    match command {
                        Some(command) => {
                            if !self.handle_command(command).await {
                                break;
                            }
                        },
                        None => break,
                    }
                },
            }
        }

        // Let queued goodbyes leave before the socket goes away.
        tokio::time::sleep(Duration::from_millis(50)).await;
        info!("Lobby transport shutting down");
        Ok(())
    }
}
