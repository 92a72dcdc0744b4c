//! Simulation host seam.
//!
//! The lobby never talks to a simulation directly. It asks the host to build
//! terrain, create the simulation, launch and shut down, and the host
//! answers with `SystemReady` / `SimReady` events.

use crate::events::{HostEvent, HostEvents};
use crate::launch::LaunchData;
use log::{debug, info};
use shared::SystemConfig;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

pub trait SimulationHost: Send {
    /// Starts terrain generation for `system`. Replaces any build in progress.
    fn build_system(&mut self, system: &SystemConfig);
    fn create(&mut self);
    fn launch(&mut self, data: &LaunchData);
    fn shutdown(&mut self, hard: bool);
}

/// Stand-in simulation that reports readiness after a fixed delay.
pub struct LocalSimulation {
    events: Arc<RwLock<HostEvents>>,
    delay: Duration,
    generation: Arc<AtomicU64>,
    launched: Option<LaunchData>,
}

impl LocalSimulation {
    pub fn new(events: Arc<RwLock<HostEvents>>, delay: Duration) -> Self {
        Self {
            events,
            delay,
            generation: Arc::new(AtomicU64::new(0)),
            launched: None,
        }
    }

    pub fn launched(&self) -> Option<&LaunchData> {
        self.launched.as_ref()
    }

    /// Publishes `event` after the delay unless a newer build or a shutdown
    /// happened in the meantime.
    fn report_later(&self, event: HostEvent) {
        let events = Arc::clone(&self.events);
        let generation = Arc::clone(&self.generation);
        let expected = generation.load(Ordering::SeqCst);
        let delay = self.delay;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if generation.load(Ordering::SeqCst) != expected {
                debug!("Dropping stale simulation report {:?}", event);
                return;
            }
            events.read().await.publish(event);
        });
    }
}

impl SimulationHost for LocalSimulation {
    fn build_system(&mut self, system: &SystemConfig) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        info!(
            "Building system {} ({} planets)",
            system.name,
            system.planets.len()
        );
        self.report_later(HostEvent::SystemReady);
    }

    fn create(&mut self) {
        info!("Creating simulation");
        self.report_later(HostEvent::SimReady);
    }

    fn launch(&mut self, data: &LaunchData) {
        info!(
            "Simulation launched: {} armies, {} players, ranked = {}",
            data.armies.len(),
            data.players.len(),
            data.ranked
        );
        self.launched = Some(data.clone());
    }

    fn shutdown(&mut self, hard: bool) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        info!("Simulation shut down (hard = {})", hard);
    }
}
