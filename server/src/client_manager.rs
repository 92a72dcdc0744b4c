//! Transport-level bookkeeping for lobby connections
//!
//! This module tracks who is talking to the server over UDP:
//! - Connection lifecycle (connect, explicit disconnect, heartbeat timeout)
//! - Address lookup for routing incoming datagrams to a client id
//! - Capacity enforcement, adjusted by the lobby as its seat count changes
//! - Client id reuse for accounts that drop and come back
//!
//! Admission decisions (passwords, whitelists, seats) belong to the lobby
//! session; the manager only refuses connections past the hard client limit.

use log::info;
use shared::AccountId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Silence after which a client is considered gone.
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// A connected client as the transport sees it
#[derive(Debug)]
pub struct Client {
    /// Unique client identifier assigned by the server
    pub id: u32,
    /// Network address for sending responses
    pub addr: SocketAddr,
    pub name: String,
    pub account: AccountId,
    /// Last time we received any packet from this client
    pub last_seen: Instant,
}

impl Client {
    pub fn new(id: u32, addr: SocketAddr, name: impl Into<String>, account: AccountId) -> Self {
        Self {
            id,
            addr,
            name: name.into(),
            account,
            last_seen: Instant::now(),
        }
    }

    /// Records activity from this client
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Checks if the client has exceeded the connection timeout
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Result of a successful `ClientManager::add_client`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admitted {
    pub client_id: u32,
    /// The account dropped earlier and got its old id back.
    pub reconnect: bool,
}

/// Manages all connected clients
///
/// Clients that drop without being closed by the lobby leave their id
/// behind, keyed by account, so a returning player is recognised as a
/// reconnect rather than a stranger.
pub struct ClientManager {
    /// Connected clients indexed by their unique ID
    clients: HashMap<u32, Client>,
    /// Ids of accounts that dropped and may come back
    departed: HashMap<AccountId, u32>,
    /// Next available client ID for new connections
    next_client_id: u32,
    /// Maximum number of concurrent clients allowed
    max_clients: usize,
}

impl ClientManager {
    /// Creates a new client manager with the specified capacity limit
    ///
    /// Client IDs start from 1 and increment for each new connection.
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            departed: HashMap::new(),
            next_client_id: 1,
            max_clients,
        }
    }

    /// Attempts to add a new client connection
    ///
    /// Returns None if the server is at capacity. An account with a departed
    /// id gets that id back and is flagged as a reconnect.
    pub fn add_client(
        &mut self,
        addr: SocketAddr,
        name: &str,
        account: &str,
    ) -> Option<Admitted> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let returning = if account.is_empty() {
            None
        } else {
            self.departed.remove(account)
        };
        let client_id = match returning {
            Some(id) => id,
            None => {
                let id = self.next_client_id;
                self.next_client_id += 1;
                id
            }
        };

        info!(
            "Client {} ({}) connected from {}{}",
            client_id,
            name,
            addr,
            if returning.is_some() { " again" } else { "" }
        );
        self.clients.insert(
            client_id,
            Client::new(client_id, addr, name, account.to_string()),
        );

        Some(Admitted {
            client_id,
            reconnect: returning.is_some(),
        })
    }

    /// Removes a client that dropped on its own
    ///
    /// The id is kept for the client's account so a later connect counts
    /// as a reconnect. Returns false if the client was already gone.
    pub fn remove_client(&mut self, client_id: &u32) -> bool {
        match self.clients.remove(client_id) {
            Some(client) => {
                info!("Client {} disconnected", client.id);
                if !client.account.is_empty() {
                    self.departed.insert(client.account, client.id);
                }
                true
            }
            None => false,
        }
    }

    /// Removes a client the lobby closed; its id is not kept.
    ///
    /// Also drops a departed id the lobby has since let go of, so that
    /// account comes back as a stranger.
    pub fn forget_client(&mut self, client_id: &u32) -> bool {
        let departed = self.departed.len();
        self.departed.retain(|_, id| id != client_id);
        let purged = self.departed.len() != departed;

        match self.clients.remove(client_id) {
            Some(client) => {
                info!("Client {} closed by the lobby", client.id);
                true
            }
            None => purged,
        }
    }

    /// Finds a client ID by their network address
    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<u32> {
        self.clients
            .iter()
            .find(|(_, client)| client.addr == addr)
            .map(|(id, _)| *id)
    }

    pub fn addr_of(&self, client_id: u32) -> Option<SocketAddr> {
        self.clients.get(&client_id).map(|client| client.addr)
    }

    /// Marks a client as alive. Returns false for unknown ids.
    pub fn touch(&mut self, client_id: u32) -> bool {
        match self.clients.get_mut(&client_id) {
            Some(client) => {
                client.touch();
                true
            }
            None => false,
        }
    }

    /// Adjusts the capacity. Already connected clients are never evicted.
    pub fn set_max_clients(&mut self, max_clients: usize) {
        if self.max_clients != max_clients {
            info!("Client limit {} -> {}", self.max_clients, max_clients);
            self.max_clients = max_clients;
        }
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients
    }

    /// Checks for and removes timed-out clients
    ///
    /// Returns the removed client IDs so the lobby can treat them as
    /// disconnects.
    pub fn check_timeouts(&mut self) -> Vec<u32> {
        let timed_out: Vec<u32> = self
            .clients
            .iter()
            .filter(|(_, client)| client.is_timed_out(CLIENT_TIMEOUT))
            .map(|(id, _)| *id)
            .collect();

        for client_id in &timed_out {
            self.remove_client(client_id);
        }

        timed_out
    }

    /// Gets all client IDs and their network addresses
    pub fn get_client_addrs(&self) -> Vec<(u32, SocketAddr)> {
        self.clients
            .iter()
            .map(|(id, client)| (*id, client.addr))
            .collect()
    }

    /// Returns the number of currently connected clients
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
