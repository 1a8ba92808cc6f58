use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use codec::EntityId;
use demo_schema::{demo_protocol, pawn_position, step, Chat, MoveInput, Pawn, PawnEntity};
use room::{
    ClientNotification, ClientRoom, Outbox, PeerId, RoomConfig, ServerNotification, ServerRoom,
    SpatialScope,
};
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "demo-sim",
    version,
    about = "Deterministic server and clients over a lossy loopback"
)]
struct Cli {
    /// Number of connected clients, each controlling one pawn.
    #[arg(long, default_value_t = 4)]
    clients: u32,
    /// Number of server-driven pawns.
    #[arg(long, default_value_t = 16)]
    npcs: u32,
    /// Number of server ticks to simulate.
    #[arg(long, default_value_t = 300)]
    ticks: u32,
    /// RNG seed for deterministic results.
    #[arg(long, default_value_t = 1)]
    seed: u64,
    /// Percentage of packets dropped in each direction.
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u8).range(0..=100))]
    loss: u8,
    /// One-way latency in ticks.
    #[arg(long, default_value_t = 2)]
    latency: u32,
    /// Extra random latency in ticks, added per packet.
    #[arg(long, default_value_t = 1)]
    jitter: u32,
    /// Send a chat event from the first client every N ticks.
    #[arg(long, default_value_t = 30)]
    chat_every: u32,
    /// Relevance radius around each client's pawn. Everything is in scope
    /// when unset.
    #[arg(long)]
    radius: Option<f32>,
    /// JSON room configuration. Defaults apply to missing fields.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Where to write the JSON summary.
    #[arg(long)]
    summary: Option<PathBuf>,
    /// Fail if p95 server packet size exceeds this value.
    #[arg(long)]
    max_p95_bytes: Option<u64>,
    /// Fail if average server packet size exceeds this value.
    #[arg(long)]
    max_avg_bytes: Option<u64>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    let mut sim = Sim::new(&cli, config)?;
    for _ in 0..cli.ticks {
        sim.step(&cli)?;
    }

    let summary = sim.summarize(&cli);
    summary.assert_budgets(cli.max_p95_bytes, cli.max_avg_bytes)?;
    let json = serde_json::to_string_pretty(&summary).context("serialize summary")?;
    match &cli.summary {
        Some(path) => {
            fs::write(path, json).with_context(|| format!("write {}", path.display()))?;
            info!(path = %path.display(), "wrote summary");
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<RoomConfig> {
    let Some(path) = path else {
        return Ok(RoomConfig::default());
    };
    let contents =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let config: RoomConfig = serde_json::from_str(&contents)
        .with_context(|| format!("parse room config {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("invalid room config {}", path.display()))?;
    Ok(config)
}

#[derive(Debug, Clone, Copy)]
enum Endpoint {
    Server(PeerId),
    Client(usize),
}

struct InFlight {
    deliver_at: u64,
    to: Endpoint,
    bytes: Vec<u8>,
}

/// Loopback network with fixed latency, jitter and random loss.
#[derive(Default)]
struct Network {
    in_flight: Vec<InFlight>,
    sent: u64,
    dropped: u64,
}

impl Network {
    fn send(&mut self, cli: &Cli, rng: &mut Rng, now: u64, to: Endpoint, bytes: Vec<u8>) {
        self.sent += 1;
        if rng.percent() < u32::from(cli.loss) {
            self.dropped += 1;
            return;
        }
        let jitter = if cli.jitter == 0 {
            0
        } else {
            rng.next_u32() % (cli.jitter + 1)
        };
        self.in_flight.push(InFlight {
            deliver_at: now + u64::from(cli.latency + jitter),
            to,
            bytes,
        });
    }

    /// Packets due by `now`, in send order.
    fn due(&mut self, now: u64) -> Vec<InFlight> {
        let (due, pending) = self
            .in_flight
            .drain(..)
            .partition(|packet| packet.deliver_at <= now);
        self.in_flight = pending;
        due
    }
}

struct Player {
    peer: PeerId,
    room: ClientRoom,
    pawn: EntityId,
    prediction_error: f32,
}

struct Sim {
    server: ServerRoom,
    players: Vec<Player>,
    npcs: Vec<EntityId>,
    network: Network,
    rng: Rng,
    now: u64,
    server_packet_sizes: Vec<u64>,
    client_bytes: u64,
    chats_sent: u32,
    chats_received: BTreeMap<usize, u32>,
    corrupt_packets: u32,
}

impl Sim {
    fn new(cli: &Cli, config: RoomConfig) -> Result<Self> {
        let protocol = demo_protocol();
        let mut rng = Rng::new(cli.seed);
        let mut server =
            ServerRoom::new(protocol.clone(), config.clone()).context("create server room")?;

        let mut npcs = Vec::new();
        for index in 0..cli.npcs {
            let pawn = Pawn {
                team: u8::try_from(index % 4).unwrap_or(0),
                x: rng.range_f32(-20.0, 20.0),
                y: rng.range_f32(-20.0, 20.0),
                health: 100,
                ..Pawn::default()
            };
            npcs.push(server.add_entity(PawnEntity::default(), pawn)?);
        }

        let mut players = Vec::new();
        for index in 0..cli.clients {
            let peer = PeerId(index + 1);
            server.add_peer(peer);
            let pawn = server.add_entity(
                PawnEntity::default(),
                Pawn {
                    health: 100,
                    ..Pawn::default()
                },
            )?;
            server.set_controller(pawn, Some(peer))?;
            if let Some(radius) = cli.radius {
                server.set_scope(peer, Box::new(SpatialScope::new(radius, pawn_position)))?;
            }
            let room = ClientRoom::new(protocol.clone(), config.clone())
                .context("create client room")?;
            players.push(Player {
                peer,
                room,
                pawn,
                prediction_error: 0.0,
            });
        }
        info!(
            clients = cli.clients,
            npcs = cli.npcs,
            fingerprint = format_args!("{:016x}", protocol.fingerprint()),
            "simulation ready"
        );

        Ok(Self {
            server,
            players,
            npcs,
            network: Network::default(),
            rng,
            now: 0,
            server_packet_sizes: Vec::new(),
            client_bytes: 0,
            chats_sent: 0,
            chats_received: BTreeMap::new(),
            corrupt_packets: 0,
        })
    }

    fn step(&mut self, cli: &Cli) -> Result<()> {
        self.now += 1;
        self.deliver();

        for &npc in &self.npcs {
            let input = random_input(&mut self.rng);
            if let Some(state) = self.server.state_mut::<Pawn>(npc) {
                step(state, input);
            }
        }

        let mut outbox = Outbox::new();
        self.server.update(&mut outbox);
        for (peer, bytes) in outbox.drain() {
            self.server_packet_sizes.push(bytes.len() as u64);
            let index = usize::try_from(peer.0 - 1)?;
            self.network
                .send(cli, &mut self.rng, self.now, Endpoint::Client(index), bytes);
        }
        self.handle_server_notifications()?;

        for index in 0..self.players.len() {
            let input = random_input(&mut self.rng);
            let player = &mut self.players[index];
            if let Some(behavior) = player.room.behavior_mut::<PawnEntity>(player.pawn) {
                behavior.input = input;
            }
            if index == 0 && cli.chat_every > 0 && self.now % u64::from(cli.chat_every) == 0 {
                player.room.send_event(Chat { code: self.chats_sent }, None)?;
                self.chats_sent += 1;
            }

            let mut outbox = Outbox::new();
            player.room.update(&mut outbox);
            for (_, bytes) in outbox.drain() {
                self.client_bytes += bytes.len() as u64;
                let to = Endpoint::Server(player.peer);
                self.network.send(cli, &mut self.rng, self.now, to, bytes);
            }

            for note in player.room.drain_notifications() {
                match note {
                    ClientNotification::Event(event) => {
                        if event.message::<Chat>().is_some() {
                            *self.chats_received.entry(index).or_default() += 1;
                        }
                    }
                    ClientNotification::CorruptPacket(error) => {
                        debug!(client = index, %error, "corrupt packet");
                        self.corrupt_packets += 1;
                    }
                    _ => {}
                }
            }

            if let (Some(predicted), Some(actual)) = (
                player.room.state::<Pawn>(player.pawn),
                self.server.state::<Pawn>(player.pawn),
            ) {
                let error = predicted.position().distance_sq(actual.position()).sqrt();
                player.prediction_error = player.prediction_error.max(error);
            }
        }
        Ok(())
    }

    fn deliver(&mut self) {
        for packet in self.network.due(self.now) {
            match packet.to {
                Endpoint::Server(peer) => self.server.receive(peer, &packet.bytes),
                Endpoint::Client(index) => {
                    if let Some(player) = self.players.get_mut(index) {
                        player.room.receive(&packet.bytes);
                    }
                }
            }
        }
    }

    /// Relays every chat a client sends to all clients.
    fn handle_server_notifications(&mut self) -> Result<()> {
        let notes: Vec<ServerNotification> = self.server.drain_notifications().collect();
        for note in notes {
            match note {
                ServerNotification::Event { peer, event } => {
                    if let Some(chat) = event.message::<Chat>() {
                        debug!(%peer, code = chat.code, "relaying chat");
                        self.server.broadcast_event(chat.clone(), None)?;
                    }
                }
                ServerNotification::CorruptPacket { .. } => self.corrupt_packets += 1,
                _ => {}
            }
        }
        Ok(())
    }

    fn summarize(&self, cli: &Cli) -> Summary {
        let mut sizes = self.server_packet_sizes.clone();
        sizes.sort_unstable();
        let total: u64 = sizes.iter().sum();
        let avg = if sizes.is_empty() {
            0
        } else {
            total / sizes.len() as u64
        };
        let p95 = percentile(&sizes, 0.95);

        let clients = self
            .players
            .iter()
            .enumerate()
            .map(|(index, player)| ClientSummary {
                peer: player.peer.0,
                entities_seen: player.room.entities().count(),
                controls_pawn: player.room.is_controlled(player.pawn),
                server_tick: player.room.server_tick().raw(),
                behind_server: self.server.tick().diff(player.room.server_tick()),
                max_prediction_error: player.prediction_error,
                chats_received: self.chats_received.get(&index).copied().unwrap_or(0),
            })
            .collect();

        Summary {
            clients: cli.clients,
            npcs: cli.npcs,
            ticks: cli.ticks,
            seed: cli.seed,
            loss_percent: cli.loss,
            latency_ticks: cli.latency,
            server_tick: self.server.tick().raw(),
            packets_sent: self.network.sent,
            packets_dropped: self.network.dropped,
            corrupt_packets: self.corrupt_packets,
            server_bytes_total: total,
            client_bytes_total: self.client_bytes,
            avg_server_packet_bytes: avg,
            p95_server_packet_bytes: p95,
            chats_sent: self.chats_sent,
            per_client: clients,
        }
    }
}

fn percentile(sorted: &[u64], fraction: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    let index = ((sorted.len() as f64) * fraction).ceil() as usize;
    sorted[index.saturating_sub(1).min(sorted.len() - 1)]
}

fn random_input(rng: &mut Rng) -> MoveInput {
    // Axis values in -1..=1.
    let axis = |value: u32| i8::try_from(value % 3).unwrap_or(1) - 1;
    MoveInput {
        dx: axis(rng.next_u32()),
        dy: axis(rng.next_u32()),
        sprint: rng.percent() < 10,
    }
}

/// 64-bit LCG; good enough for reproducible traffic.
struct Rng {
    state: u64,
}

impl Rng {
    const fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u32(&mut self) -> u32 {
        self.state = self
            .state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1);
        #[allow(clippy::cast_possible_truncation)]
        let high = (self.state >> 32) as u32;
        high
    }

    fn percent(&mut self) -> u32 {
        self.next_u32() % 100
    }

    fn range_f32(&mut self, min: f32, max: f32) -> f32 {
        #[allow(clippy::cast_precision_loss)]
        let unit = self.next_u32() as f32 / u32::MAX as f32;
        min + (max - min) * unit
    }
}

#[derive(Debug, Serialize)]
struct ClientSummary {
    peer: u32,
    entities_seen: usize,
    controls_pawn: bool,
    server_tick: u32,
    behind_server: i64,
    max_prediction_error: f32,
    chats_received: u32,
}

#[derive(Debug, Serialize)]
struct Summary {
    clients: u32,
    npcs: u32,
    ticks: u32,
    seed: u64,
    loss_percent: u8,
    latency_ticks: u32,
    server_tick: u32,
    packets_sent: u64,
    packets_dropped: u64,
    corrupt_packets: u32,
    server_bytes_total: u64,
    client_bytes_total: u64,
    avg_server_packet_bytes: u64,
    p95_server_packet_bytes: u64,
    chats_sent: u32,
    per_client: Vec<ClientSummary>,
}

impl Summary {
    fn assert_budgets(&self, max_p95: Option<u64>, max_avg: Option<u64>) -> Result<()> {
        if let Some(max_p95) = max_p95 {
            if self.p95_server_packet_bytes > max_p95 {
                anyhow::bail!(
                    "p95 server packet bytes {} exceeds budget {}",
                    self.p95_server_packet_bytes,
                    max_p95
                );
            }
        }
        if let Some(max_avg) = max_avg {
            if self.avg_server_packet_bytes > max_avg {
                anyhow::bail!(
                    "avg server packet bytes {} exceeds budget {}",
                    self.avg_server_packet_bytes,
                    max_avg
                );
            }
        }
        Ok(())
    }
}
