//! Star network simulation
//!
//! One hub and N clients over the loopback transport, ticked on a timer.
//! Each client sends raw messages to its neighbour (through the hub when
//! relaying) and every delivery is counted.

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use netplex_core::{Multiplexer, MultiplexerEvent};
use netplex_network::{LoopbackNetwork, PeerId, TransferMode, TARGET_PEER_SERVER};

use crate::config::{SimConfig, WARMUP_TICKS};

/// Outcome of a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimReport {
    pub ticks: u32,
    pub sent: u64,
    pub delivered: u64,
    /// Deliveries attributed to the hub, which never sends
    pub misattributed: u64,
    pub relayed: u64,
    pub dropped: u64,
}

pub struct Simulation {
    // Keeps the switch alive for the peers.
    _network: LoopbackNetwork,
    hub: Multiplexer,
    clients: Vec<Multiplexer>,
    relay: bool,
    report: SimReport,
}

impl Simulation {
    pub fn new(config: &SimConfig) -> Result<Self> {
        let network = LoopbackNetwork::new();

        let mut hub = Multiplexer::new(config.multiplexer()).context("Failed to create hub")?;
        hub.configure_transport(Some(Box::new(network.create_server())))
            .context("Failed to attach hub transport")?;

        let mut clients = Vec::with_capacity(config.clients);
        for _ in 0..config.clients {
            let mut client =
                Multiplexer::new(config.multiplexer()).context("Failed to create client")?;
            client
                .configure_transport(Some(Box::new(network.create_client())))
                .context("Failed to attach client transport")?;
            debug!("Client {} joining", client.unique_id());
            clients.push(client);
        }

        Ok(Self {
            _network: network,
            hub,
            clients,
            relay: config.server_relay,
            report: SimReport::default(),
        })
    }

    /// Poll every peer once, hub first
    pub fn tick(&mut self) -> Result<()> {
        self.hub.poll().context("Hub poll failed")?;
        Self::collect(&mut self.hub, &mut self.report);

        for client in &mut self.clients {
            client
                .poll()
                .with_context(|| format!("Client {} poll failed", client.unique_id()))?;
            Self::collect(client, &mut self.report);
        }

        self.report.ticks += 1;
        Ok(())
    }

    /// Each client sends one message to its neighbour
    pub fn send_round(&mut self, round: u32) -> Result<()> {
        for client in &mut self.clients {
            let id = client.unique_id();
            let target = Self::neighbour(client, self.relay);
            let message = format!("round {} from {}", round, id);

            client
                .send_raw(message.as_bytes(), target, TransferMode::Reliable, 0)
                .with_context(|| format!("Client {} failed to send to {}", id, target))?;
            self.report.sent += 1;
        }
        Ok(())
    }

    pub fn report(&self) -> SimReport {
        let hub_stats = self.hub.stats();
        let client_drops: u64 = self.clients.iter().map(|c| c.stats().packets_dropped).sum();
        SimReport {
            relayed: hub_stats.packets_relayed,
            dropped: hub_stats.packets_dropped + client_drops,
            ..self.report.clone()
        }
    }

    /// The next client id after ours, wrapping; the hub when relaying is off
    fn neighbour(client: &Multiplexer, relay: bool) -> PeerId {
        if !relay {
            return TARGET_PEER_SERVER;
        }
        let me = client.unique_id();
        let others: Vec<PeerId> = client
            .peer_ids()
            .into_iter()
            .filter(|&p| p != TARGET_PEER_SERVER)
            .collect();
        others
            .iter()
            .copied()
            .find(|&p| p > me)
            .or_else(|| others.first().copied())
            .unwrap_or(TARGET_PEER_SERVER)
    }

    fn collect(peer: &mut Multiplexer, report: &mut SimReport) {
        let me = peer.unique_id();
        for event in peer.drain_events() {
            match event {
                MultiplexerEvent::PeerPacket { from, payload } => {
                    let text = String::from_utf8_lossy(&payload);
                    debug!("Peer {} got {:?} from {}", me, text, from);
                    if from == TARGET_PEER_SERVER {
                        report.misattributed += 1;
                    }
                    report.delivered += 1;
                }
                MultiplexerEvent::PeerConnected(id) => debug!("Peer {} sees {} join", me, id),
                MultiplexerEvent::PeerDisconnected(id) => debug!("Peer {} sees {} leave", me, id),
                MultiplexerEvent::ConnectedToHost => info!("Peer {} connected to hub", me),
                MultiplexerEvent::ConnectionFailed => warn!("Peer {} failed to connect", me),
                MultiplexerEvent::HostDisconnected => warn!("Peer {} lost the hub", me),
            }
        }
    }
}

/// Run a full simulation on a timer tick
pub async fn run(config: &SimConfig) -> Result<SimReport> {
    let mut sim = Simulation::new(config)?;
    let mut interval = tokio::time::interval(Duration::from_millis(config.tick_interval_ms));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut round = 0;
    for tick in 0..config.ticks {
        interval.tick().await;
        sim.tick()?;

        if tick + 1 >= WARMUP_TICKS && round < config.messages {
            sim.send_round(round)?;
            round += 1;
        }
    }

    let report = sim.report();
    info!(
        "Simulation finished: {} sent, {} delivered, {} relayed",
        report.sent, report.delivered, report.relayed
    );
    Ok(report)
}
