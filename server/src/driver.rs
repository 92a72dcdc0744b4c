//! Lobby state task.
//!
//! Owns the `Session`, feeds it host events and timer ticks, and turns its
//! outbox into network commands and simulation calls.

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::events::{HostEvent, HostEvents};
use crate::launch::LaunchData;
use crate::session::{ClientInfo, Outbound, Session};
use crate::sim::SimulationHost;
use log::{debug, error, info, warn};
use shared::{Beacon, Packet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, RwLock};

/// Work the lobby hands to the transport.
#[derive(Debug, Clone)]
pub enum NetworkCommand {
    Send { client_id: u32, packet: Packet },
    Broadcast { packet: Packet },
    /// Sends a final packet, then forgets the client.
    Close { client_id: u32, packet: Packet },
    SetMaxClients(usize),
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DriverOutcome {
    Launched(Box<LaunchData>),
    Exited,
}

pub struct LobbyDriver<S: SimulationHost> {
    config: SessionConfig,
    events: Arc<RwLock<HostEvents>>,
    network_tx: mpsc::UnboundedSender<NetworkCommand>,
    sim: S,
    session: Option<Session>,
    beacon: Option<Beacon>,
}

impl<S: SimulationHost> LobbyDriver<S> {
    pub fn new(
        config: SessionConfig,
        events: Arc<RwLock<HostEvents>>,
        network_tx: mpsc::UnboundedSender<NetworkCommand>,
        sim: S,
    ) -> Self {
        Self {
            config,
            events,
            network_tx,
            sim,
            session: None,
            beacon: None,
        }
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn sim(&self) -> &S {
        &self.sim
    }

    /// Latest server discoverability record, if the lobby is listed.
    pub fn beacon(&self) -> Option<&Beacon> {
        self.beacon.as_ref()
    }

    /// Ladder lobbies open immediately. Custom lobbies wait for their owner.
    pub fn start(&mut self, now: Instant) -> Result<Option<DriverOutcome>, SessionError> {
        if !self.config.mode.is_ladder() {
            info!("Waiting for the lobby owner to connect");
            return Ok(None);
        }
        self.session = Some(Session::enter(self.config.clone(), None, now)?);
        info!("Ladder lobby open");
        Ok(self.tick(now))
    }

    /// Applies one host event and flushes whatever it caused.
    pub fn handle_event(
        &mut self,
        now: Instant,
        event: HostEvent,
    ) -> Result<Option<DriverOutcome>, SessionError> {
        let session = match self.session.as_mut() {
            Some(session) => session,
            None => return self.open_custom(now, event),
        };

        match event {
            HostEvent::Connected { client, reconnect } => {
                let client_id = client.client_id;
                if let Err(e) = session.connect(now, client, reconnect) {
                    debug!("Client {} not admitted: {}", client_id, e);
                }
            }
            HostEvent::Disconnected { client_id } => session.disconnect(now, client_id),
            HostEvent::Request {
                client_id,
                request_id,
                message_type,
                payload,
            } => session.handle_request(now, client_id, request_id, &message_type, &payload),
            HostEvent::SystemReady => session.system_ready(now),
            HostEvent::SimReady => session.sim_ready(now),
        }

        Ok(self.tick(now))
    }

    fn open_custom(
        &mut self,
        now: Instant,
        event: HostEvent,
    ) -> Result<Option<DriverOutcome>, SessionError> {
        let owner: ClientInfo = match event {
            HostEvent::Connected { client, .. } => client,
            other => {
                debug!("Ignoring {:?} before the lobby is open", other);
                return Ok(None);
            }
        };

        let client_id = owner.client_id;
        match Session::enter(self.config.clone(), Some(owner), now) {
            Ok(session) => {
                info!("Custom lobby opened by client {}", client_id);
                self.session = Some(session);
                Ok(self.tick(now))
            }
            Err(e) => {
                error!("Lobby owner {} rejected: {}", client_id, e);
                self.command(NetworkCommand::Close {
                    client_id,
                    packet: Packet::Rejected {
                        reason: e.to_string(),
                    },
                });
                self.command(NetworkCommand::Shutdown);
                Err(e)
            }
        }
    }

    /// Fires due session work and routes the outbox.
    pub fn tick(&mut self, now: Instant) -> Option<DriverOutcome> {
        let outbox = match self.session.as_mut() {
            Some(session) => {
                session.poll(now);
                session.drain_outbox()
            }
            None => return None,
        };

        let mut outcome = None;
        for effect in outbox {
            if let Some(done) = self.route(effect) {
                outcome = Some(done);
            }
        }
        outcome
    }

    fn route(&mut self, effect: Outbound) -> Option<DriverOutcome> {
        match effect {
            Outbound::Broadcast {
                message_type,
                payload,
            } => self.command(NetworkCommand::Broadcast {
                packet: Packet::Message {
                    message_type,
                    payload: payload.to_string(),
                },
            }),
            Outbound::Respond {
                client_id,
                request_id,
                success,
                payload,
            } => self.command(NetworkCommand::Send {
                client_id,
                packet: Packet::Response {
                    request_id,
                    success,
                    payload: payload.to_string(),
                },
            }),
            Outbound::Message {
                client_id,
                message_type,
                payload,
            } => self.command(NetworkCommand::Send {
                client_id,
                packet: Packet::Message {
                    message_type,
                    payload: payload.to_string(),
                },
            }),
            Outbound::Reject { client_id, reason } => self.command(NetworkCommand::Close {
                client_id,
                packet: Packet::Rejected { reason },
            }),
            Outbound::Terminate { client_id, reason } => self.command(NetworkCommand::Close {
                client_id,
                packet: Packet::Disconnected { reason },
            }),
            Outbound::Beacon(beacon) => {
                match beacon.as_deref() {
                    Some(beacon) => debug!(
                        "Beacon: {} players, {} spectators",
                        beacon.players, beacon.spectators
                    ),
                    None => debug!("Beacon withdrawn"),
                }
                self.beacon = beacon.map(|b| *b);
            }
            Outbound::SetMaxClients(max) => self.command(NetworkCommand::SetMaxClients(max)),
            Outbound::BuildSystem(system) => self.sim.build_system(&system),
            Outbound::CreateSimulation => self.sim.create(),
            Outbound::Launch(data) => {
                self.sim.launch(&data);
                return Some(DriverOutcome::Launched(data));
            }
            Outbound::LadderAbandoned {
                penalty,
                abandoned,
                remaining,
            } => warn!(
                "Ladder game abandoned (penalty = {}): abandoned {:?}, remaining {:?}",
                penalty, abandoned, remaining
            ),
            Outbound::ShutdownSimulation { hard } => self.sim.shutdown(hard),
            Outbound::Exit => {
                self.command(NetworkCommand::Shutdown);
                return Some(DriverOutcome::Exited);
            }
        }
        None
    }

    fn command(&self, command: NetworkCommand) {
        if let Err(e) = self.network_tx.send(command) {
            error!("Failed to queue network command: {}", e);
        }
    }

    /// Runs until the game launches or the lobby exits.
    pub async fn run(mut self) -> Result<DriverOutcome, SessionError> {
        let (subscription, mut events_rx) = self.events.write().await.subscribe();
        let outcome = self.run_loop(&mut events_rx).await;
        self.events.write().await.unsubscribe(subscription);

        if let Some(session) = self.session.as_mut() {
            session.exit();
        }
        outcome
    }

    async fn run_loop(
        &mut self,
        events_rx: &mut mpsc::UnboundedReceiver<HostEvent>,
    ) -> Result<DriverOutcome, SessionError> {
        if let Some(outcome) = self.start(Instant::now())? {
            return Ok(outcome);
        }

        loop {
            let deadline = self.session.as_ref().and_then(Session::next_deadline);
            let wake = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
                    None => std::future::pending::<()>().await,
                }
            };

            let outcome = tokio::select! {
                event = events_rx.recv() => match event {
                    Some(event) => self.handle_event(Instant::now(), event)?,
                    None => {
                        info!("Host event stream closed");
                        Some(DriverOutcome::Exited)
                    }
                },
                _ = wake => self.tick(Instant::now()),
            };

            if let Some(outcome) = outcome {
                return Ok(outcome);
            }
        }
    }
}
