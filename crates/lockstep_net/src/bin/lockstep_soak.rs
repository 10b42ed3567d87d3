//! # Lockstep Soak Test
//!
//! One server and several clients on the in-memory network with random
//! loss. Every client sends one critical tic command per tic; the server
//! streams best-effort file fragments back. At the end every tic command
//! must have reached the server exactly once.
//!
//! Run with: `cargo run --release --features soak --bin lockstep_soak -- --tics 2000 --loss 10 --clients 4`
//!
//! Set `RUST_LOG=lockstep_net=debug` for per-packet logging.

use std::collections::HashSet;
use std::env;
use std::process::ExitCode;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use lockstep_net::simulation::{SimNetwork, SimTransport};
use lockstep_net::{
    Clock, Delivery, ManualClock, NetConfig, NetError, NodeId, PacketClass, PacketType, Session,
};

type SimSession = Session<SimTransport, ManualClock>;

const TIC_CMD: PacketType = PacketType(8);
const FILE_FRAGMENT: PacketType = PacketType(40);
const SERVER: NodeId = NodeId(1);
const FRAGMENT: [u8; 512] = [0xAB; 512];

/// Soak parameters.
#[derive(Debug)]
struct SoakConfig {
    /// Tics with traffic.
    tics: u32,
    /// Datagram loss, percent.
    loss: u8,
    /// Number of clients.
    clients: u8,
    /// Loss generator seed.
    seed: u64,
    /// Session configuration file, defaults if absent.
    net_config: Option<String>,
}

impl Default for SoakConfig {
    fn default() -> Self {
        Self {
            tics: 2000,
            loss: 10,
            clients: 4,
            seed: 0x5EED,
            net_config: None,
        }
    }
}

fn config_from_iter<I>(mut args: I) -> Result<SoakConfig, String>
where
    I: Iterator<Item = String>,
{
    fn value<T: std::str::FromStr>(flag: &str, arg: Option<String>) -> Result<T, String> {
        arg.as_deref()
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| format!("{flag} needs a numeric value"))
    }

    let mut config = SoakConfig::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--tics" => config.tics = value("--tics", args.next())?,
            "--loss" => config.loss = value::<u8>("--loss", args.next())?.min(100),
            "--clients" => config.clients = value("--clients", args.next())?,
            "--seed" => config.seed = value("--seed", args.next())?,
            "--config" => config.net_config = args.next(),
            other => return Err(format!("unknown argument {other}")),
        }
    }
    Ok(config)
}

/// Per-client bookkeeping on the server side.
#[derive(Default)]
struct Ledger {
    /// Tic commands sent by the client.
    sent: u32,
    /// Tic commands seen by the server.
    seen: HashSet<u32>,
    /// Tic commands seen more than once.
    duplicates: u32,
}

struct Soak {
    clock: ManualClock,
    server: SimSession,
    clients: Vec<SimSession>,
    ledgers: Vec<Ledger>,
    refused: u64,
}

impl Soak {
    fn new(config: &SoakConfig, net: &NetConfig) -> Result<Self, NetError> {
        let network = SimNetwork::new();
        let clock = ManualClock::new();
        let server_transport = network.add_host();
        let server_host = server_transport.host();
        let server = Session::new(net.clone(), server_transport, clock.clone())?;

        let mut clients = Vec::with_capacity(usize::from(config.clients));
        for id in 1..=config.clients {
            let transport = network.add_host();
            network.connect(server_host, NodeId(id), transport.host(), SERVER);
            clients.push(Session::new(net.clone(), transport, clock.clone())?);
        }
        network.set_loss(config.loss, config.seed);

        Ok(Self {
            clock,
            server,
            ledgers: (0..config.clients).map(|_| Ledger::default()).collect(),
            clients,
            refused: 0,
        })
    }

    /// Sends this tic's traffic. Only a fatal error is returned.
    fn send(&mut self) -> Result<(), NetError> {
        for (client, ledger) in self.clients.iter_mut().zip(&mut self.ledgers) {
            let command = ledger.sent.to_le_bytes();
            match client.send(SERVER, Delivery::Reliable(PacketClass::Critical), TIC_CMD, &command) {
                Ok(()) => ledger.sent += 1,
                Err(e) if e.is_fatal() => return Err(e),
                // Retried next tic with the same number.
                Err(_) => self.refused += 1,
            }
        }

        for index in 0..self.clients.len() {
            let node = NodeId(index as u8 + 1);
            match self.server.send(
                node,
                Delivery::Reliable(PacketClass::BestEffort),
                FILE_FRAGMENT,
                &FRAGMENT,
            ) {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(_) => self.refused += 1,
            }
        }
        Ok(())
    }

    fn receive(&mut self) {
        while let Some(packet) = self.server.receive() {
            if packet.packet_type != TIC_CMD {
                continue;
            }
            let Some(ledger) = self.ledgers.get_mut(packet.source.index().wrapping_sub(1)) else {
                warn!(node = packet.source.0, "tic command from unknown client");
                continue;
            };
            let Ok(bytes) = <[u8; 4]>::try_from(packet.payload) else {
                warn!(node = packet.source.0, len = packet.payload.len(), "malformed tic command");
                continue;
            };
            if !ledger.seen.insert(u32::from_le_bytes(bytes)) {
                ledger.duplicates += 1;
            }
        }
        for client in &mut self.clients {
            while client.receive().is_some() {}
        }
    }

    fn tick(&mut self) {
        self.server.tick();
        for client in &mut self.clients {
            client.tick();
        }
        self.server.record_tic(0);
        if self.server.poll_stats() {
            let stats = self.server.stats();
            info!(
                tic = self.clock.now(),
                send_bps = stats.send_bps,
                recv_bps = stats.recv_bps,
                lost = format_args!("{:.1}%", stats.lost_percent),
                dup = format_args!("{:.1}%", stats.dup_percent),
                "server window"
            );
        }
        self.clock.advance(1);
    }

    fn in_flight(&self) -> usize {
        self.clients
            .iter()
            .map(|client| client.in_flight(SERVER))
            .sum()
    }
}

fn run(config: &SoakConfig) -> Result<bool, NetError> {
    let net = match &config.net_config {
        Some(path) => NetConfig::load(path)?,
        None => NetConfig::default(),
    };
    let mut soak = Soak::new(config, &net)?;
    info!(
        tics = config.tics,
        loss = config.loss,
        clients = config.clients,
        seed = config.seed,
        "soak started"
    );

    for _ in 0..config.tics {
        soak.send()?;
        soak.receive();
        soak.tick();
    }

    // Drain: no new traffic until every tic command is acknowledged.
    let drain_limit = net.retry_interval * u32::from(net.max_resends);
    let mut drained = 0;
    while soak.in_flight() > 0 && drained < drain_limit {
        soak.receive();
        soak.tick();
        drained += 1;
    }
    if soak.in_flight() > 0 {
        warn!(pending = soak.in_flight(), "clients still have unacknowledged tic commands");
    }
    soak.receive();

    let mut ok = true;
    for (index, ledger) in soak.ledgers.iter().enumerate() {
        let node = index + 1;
        let complete = ledger.seen.len() == ledger.sent as usize;
        let exact = ledger.duplicates == 0 && ledger.seen.iter().all(|&n| n < ledger.sent);
        if !(complete && exact) {
            error!(
                node,
                sent = ledger.sent,
                seen = ledger.seen.len(),
                duplicates = ledger.duplicates,
                "tic commands not delivered exactly once"
            );
            ok = false;
        }
    }

    let server = soak.server.stats();
    println!();
    println!("lockstep soak: {} tics, {}% loss, {} clients", config.tics, config.loss, config.clients);
    println!("  server bytes sent      {}", server.bytes_sent);
    println!("  server bytes received  {}", server.bytes_received);
    println!("  server retransmits     {}", server.retransmits);
    println!("  server duplicates      {}", server.duplicates);
    for (index, client) in soak.clients.iter().enumerate() {
        let stats = client.stats();
        println!(
            "  client {:>2}: sent {:>6} tic commands, {:>5} retransmits, {:>5} duplicates",
            index + 1,
            soak.ledgers[index].sent,
            stats.retransmits,
            stats.duplicates
        );
    }
    println!("  refused sends          {}", soak.refused);
    println!("  drain tics             {drained}");
    println!("  result                 {}", if ok { "PASS" } else { "FAIL" });

    soak.server.shutdown();
    for client in &mut soak.clients {
        client.shutdown();
    }
    Ok(ok)
}

fn main() -> ExitCode {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();

    let config = match config_from_iter(env::args().skip(1)) {
        Ok(config) => config,
        Err(message) => {
            eprintln!("{message}");
            eprintln!("usage: lockstep_soak [--tics N] [--loss PERCENT] [--clients N] [--seed N] [--config FILE]");
            return ExitCode::from(2);
        }
    };

    match run(&config) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %e, "soak aborted");
            ExitCode::FAILURE
        }
    }
}
