mod world;

use std::cell::Cell;
use std::fmt::Write;
use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;

use qnet::protocol::{PORT_SERVER, PRINT_HIGH};
use qnet::{
    LossyTransport, NetSrc, PacketLossSimulation, ServerConfig, ServerEvent, ServerSession,
    Transport, UdpTransport,
};
use world::World;

#[derive(Parser)]
#[command(name = "qnet-server")]
#[command(about = "Snapshot protocol test server")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = PORT_SERVER)]
    port: u16,

    #[arg(short, long, default_value_t = 8)]
    max_clients: usize,

    #[arg(long, default_value_t = 125, help = "Seconds of silence before a client is dropped")]
    timeout: u64,

    #[arg(long, default_value = "noname")]
    hostname: String,

    #[arg(long, default_value = "base1")]
    map: String,

    #[arg(long, help = "Enables remote console commands")]
    rcon_password: Option<String>,

    #[arg(long, help = "Enable outgoing packet loss simulation")]
    simulate_packet_loss: bool,

    #[arg(long, default_value_t = 0.0, help = "Packet loss percentage (0-100)")]
    loss_percent: f32,

    #[arg(long, default_value_t = 0, help = "Minimum latency in ms")]
    min_latency: u32,

    #[arg(long, default_value_t = 0, help = "Maximum latency in ms")]
    max_latency: u32,

    #[arg(long, default_value_t = 0, help = "Jitter in ms")]
    jitter: u32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let bind_addr = format!("{}:{}", args.bind, args.port);

    let packet_loss = args.simulate_packet_loss.then(|| PacketLossSimulation {
        enabled: true,
        loss_percent: args.loss_percent,
        min_latency_ms: args.min_latency,
        max_latency_ms: args.max_latency,
        jitter_ms: args.jitter,
    });

    let config = ServerConfig {
        max_clients: args.max_clients,
        timeout_ms: args.timeout * 1000,
        rcon_password: args.rcon_password,
        hostname: args.hostname,
        map_name: args.map,
        packet_loss,
        ..Default::default()
    };

    let mut udp = UdpTransport::new();
    let local = udp
        .bind(NetSrc::Server, bind_addr.as_str())
        .with_context(|| format!("binding {}", bind_addr))?;
    let mut net = LossyTransport::new(udp, config.packet_loss.clone().unwrap_or_default());

    let mut world = World::new(config.max_clients);
    let mut session = ServerSession::new(config);
    for baseline in world.baselines() {
        session.set_baseline(baseline);
    }

    let running = Rc::new(Cell::new(true));
    let console_running = Rc::clone(&running);
    session.set_rcon_handler(
        move |session: &mut ServerSession, net: &mut dyn Transport, command: &str, now: u64| {
            console_command(session, net, command, now, &console_running)
        },
    );

    log::info!("Server started on {}", local);

    let start = Instant::now();
    while running.get() {
        let now = start.elapsed().as_millis() as u64;
        net.flush(now);

        let frame = session.frame_number();
        session.run_frame(&mut net, now);
        handle_events(&mut session, &mut world);

        if session.frame_number() != frame {
            world.step(session.config().frame_interval_ms as f32 / 1000.0);
            session.set_entities(world.entities());
            for slot in 0..session.config().max_clients {
                if let Some(player) = world.player(slot) {
                    session.set_player_state(slot, *player);
                }
            }
        }

        net.inner()
            .sleep(NetSrc::Server, Duration::from_millis(1))
            .context("waiting for packets")?;
    }

    let now = start.elapsed().as_millis() as u64;
    session.shutdown(&mut net, now);
    net.flush(u64::MAX);
    log::info!("Server shutting down");
    Ok(())
}

fn handle_events(session: &mut ServerSession, world: &mut World) {
    let events: Vec<ServerEvent> = session.drain_events().collect();
    for event in events {
        match event {
            ServerEvent::ClientConnected {
                slot,
                addr,
                userinfo,
            } => {
                log::info!("Client {} connected from {} ({})", slot, addr, userinfo);
            }
            ServerEvent::ClientBegin { slot } => {
                world.spawn_player(slot);
                session.broadcast_print(PRINT_HIGH, &format!("client {} entered the game\n", slot));
            }
            ServerEvent::ClientDisconnected { slot, reason } => {
                log::info!("Client {} {}", slot, reason.as_str());
                world.remove_player(slot);
            }
            ServerEvent::ConnectionDenied { addr, reason } => {
                log::warn!("Connection denied to {}: {}", addr, reason);
            }
            ServerEvent::UserCommand { slot, cmd } => world.apply_command(slot, &cmd),
            ServerEvent::ClientCommand { slot, text } => {
                log::info!("Client {}: {}", slot, text);
            }
            ServerEvent::UserInfoChanged { slot, userinfo } => {
                log::debug!("Client {} userinfo {}", slot, userinfo);
            }
        }
    }
}

/// Runs a remote console command and returns the text sent back to the
/// operator.
fn console_command(
    session: &mut ServerSession,
    mut net: &mut dyn Transport,
    command: &str,
    now: u64,
    running: &Cell<bool>,
) -> String {
    let mut out = String::new();
    let mut words = command.split_whitespace();
    match words.next() {
        Some("status") => {
            let _ = writeln!(
                out,
                "frame {}, {} connected",
                session.frame_number(),
                session.connected_count()
            );
            for (slot, client) in session.clients() {
                let _ = writeln!(out, "  {} {} {:?}", slot, client.addr(), client.state);
            }
        }
        Some("kick") => match words.next().and_then(|w| w.parse::<usize>().ok()) {
            Some(slot) if session.client(slot).is_some() => {
                session.kick_client(&mut net, slot, now);
                let _ = writeln!(out, "kicked client {}", slot);
            }
            Some(slot) => {
                let _ = writeln!(out, "no client in slot {}", slot);
            }
            None => out.push_str("usage: kick <slot>\n"),
        },
        Some("say") => {
            let text: Vec<&str> = words.collect();
            session.broadcast_print(PRINT_HIGH, &format!("console: {}\n", text.join(" ")));
            let _ = writeln!(out, "said: {}", text.join(" "));
        }
        Some("quit") => {
            running.set(false);
            out.push_str("shutting down\n");
        }
        Some(other) => {
            let _ = writeln!(out, "unknown command: {}", other);
        }
        None => {}
    }
    for line in out.lines() {
        log::info!("rcon: {}", line);
    }
    out
}
