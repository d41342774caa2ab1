use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use clap::Parser;
use glam::Vec3;

use qnet::protocol::PORT_SERVER;
use qnet::{
    ClientConfig, ClientEvent, ClientSession, ClientState, DemoReader, NetAddr, NetSrc,
    UdpTransport, UserCmd,
};

const FRAME_MS: u64 = 16;

#[derive(Parser)]
#[command(name = "qnet-client")]
#[command(about = "Headless snapshot protocol client")]
struct Args {
    #[arg(
        short,
        long,
        help = "Server address to connect to (e.g., 127.0.0.1:27910)"
    )]
    server: Option<String>,

    #[arg(long, default_value = "unnamed")]
    name: String,

    #[arg(long, help = "Fixed qport instead of a random one")]
    qport: Option<u16>,

    #[arg(long, help = "Record the session to this demo file once in a level")]
    record: Option<PathBuf>,

    #[arg(long, help = "Play back a recorded demo instead of connecting")]
    play: Option<PathBuf>,

    #[arg(long, default_value_t = 0, help = "Disconnect after this many seconds (0 runs forever)")]
    duration: u64,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = ClientConfig {
        userinfo: format!("\\name\\{}", args.name),
        qport: args.qport,
        ..Default::default()
    };

    if let Some(path) = &args.play {
        return play_demo(ClientSession::new(config), path);
    }
    let Some(server) = &args.server else {
        bail!("either --server or --play is required");
    };

    let server = NetAddr::resolve(server, PORT_SERVER)?;
    if server.is_loopback() {
        bail!("loopback needs a server in this process; use 127.0.0.1");
    }
    let mut net = UdpTransport::new();
    net.bind(NetSrc::Client, "0.0.0.0:0")
        .context("opening client socket")?;

    run(ClientSession::new(config), &mut net, server, &args)
}

fn run(
    mut client: ClientSession,
    net: &mut UdpTransport,
    server: NetAddr,
    args: &Args,
) -> anyhow::Result<()> {
    let start = Instant::now();
    let deadline = (args.duration > 0).then(|| Duration::from_secs(args.duration));
    let mut last_cmd = 0;

    log::info!("Connecting to {} (qport {})", server, client.qport());
    client.connect(net, server, 0);

    loop {
        let now = start.elapsed().as_millis() as u64;
        if deadline.is_some_and(|d| start.elapsed() >= d) {
            client.disconnect(net, now);
            break;
        }

        if client.state() == ClientState::Active {
            let msec = (now - last_cmd).min(250) as u8;
            client.set_user_cmd(wander(now, msec));
        }
        last_cmd = now;

        client.run_frame(net, now);

        let mut finished = false;
        let events: Vec<ClientEvent> = client.drain_events().collect();
        for event in events {
            match event {
                ClientEvent::Active => {
                    log::info!("In level");
                    if let Some(path) = &args.record {
                        start_recording(&mut client, path)?;
                    }
                }
                ClientEvent::Disconnected { reason } => {
                    log::info!("Disconnected: {}", reason);
                    finished = true;
                }
                other => log_event(&other),
            }
        }
        if finished {
            break;
        }

        net.sleep(NetSrc::Client, Duration::from_millis(FRAME_MS))
            .context("waiting for packets")?;
    }

    if client.is_recording() {
        let messages = client.stop_recording()?;
        log::info!("Recorded {} messages", messages);
    }
    Ok(())
}

fn start_recording(client: &mut ClientSession, path: &Path) -> anyhow::Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    client.start_recording(BufWriter::new(file))?;
    log::info!("Recording to {}", path.display());
    Ok(())
}

fn play_demo(mut client: ClientSession, path: &Path) -> anyhow::Result<()> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut now = 0;
    for message in DemoReader::new(BufReader::new(file)) {
        let more = client.play_demo_message(&message?, now)?;
        for event in client.drain_events().collect::<Vec<_>>() {
            log_event(&event);
        }
        if !more {
            break;
        }
        now += client.config().frame_interval_ms;
    }
    log::info!("Demo finished");
    Ok(())
}

fn log_event(event: &ClientEvent) {
    match event {
        ClientEvent::Connected => log::info!("Connected, signing on"),
        ClientEvent::ServerData(data) => {
            log::info!("Map {} ({}), player {}", data.level_name, data.game_dir, data.player_num)
        }
        ClientEvent::Print { text, .. } => log::info!("{}", text.trim_end()),
        ClientEvent::CenterPrint(text) => log::info!("[center] {}", text.trim_end()),
        ClientEvent::Frame {
            number,
            delta_frame,
        } => log::debug!("frame {} (delta {})", number, delta_frame),
        ClientEvent::ConfigString { index, value, .. } => {
            log::debug!("configstring {} = {}", index, value)
        }
        ClientEvent::Reconnect => log::info!("Server asked us to reconnect"),
        other => log::trace!("{:?}", other),
    }
}

/// Walks forward while slowly turning, so the server has something to move.
fn wander(now: u64, msec: u8) -> UserCmd {
    let yaw = (now as f32 / 40.0) % 360.0;
    UserCmd {
        msec,
        angles: Vec3::new(0.0, yaw, 0.0),
        forward_move: 200,
        ..Default::default()
    }
}
