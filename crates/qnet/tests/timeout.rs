use qnet::net::oob::out_of_band;
use qnet::{
    DisconnectReason, LoopbackTransport, NetAddr, NetChan, NetSrc, ServerConfig, ServerEvent,
    ServerSession, Transport,
};

const CHECKS: u32 = 3;

fn connected_server(timeout_ms: u64) -> (ServerSession, LoopbackTransport) {
    let mut server = ServerSession::new(ServerConfig {
        timeout_ms,
        timeout_checks: CHECKS,
        ..Default::default()
    });
    let mut net = LoopbackTransport::new();
    out_of_band(&mut net, NetSrc::Client, &NetAddr::LOOPBACK, "connect 34 1 0 \"\"");
    server.process_packets(&mut net, 0);
    while net.receive(NetSrc::Client).is_some() {}
    server.drain_events().count();
    (server, net)
}

#[test]
fn test_silent_client_dropped_after_repeated_timeouts() {
    let (mut server, mut net) = connected_server(1000);

    server.check_timeouts(&mut net, 1000);
    assert_eq!(server.connected_count(), 1);

    // One slow frame is tolerated, and so is every miss up to the limit.
    for (i, now) in (1001..).take(CHECKS as usize).enumerate() {
        server.check_timeouts(&mut net, now);
        assert_eq!(server.connected_count(), 1, "dropped after {} misses", i + 1);
    }
    assert_eq!(server.drain_events().count(), 0);

    server.check_timeouts(&mut net, 1001 + CHECKS as u64);
    assert_eq!(server.connected_count(), 0);
    assert!(matches!(
        server.drain_events().next(),
        Some(ServerEvent::ClientDisconnected {
            slot: 0,
            reason: DisconnectReason::Timeout
        })
    ));
}

#[test]
fn test_traffic_resets_missed_checks() {
    let (mut server, mut net) = connected_server(1000);
    let mut chan = NetChan::new(NetSrc::Client, NetAddr::LOOPBACK, 1, 0);

    for now in 1001..1001 + CHECKS as u64 {
        server.check_timeouts(&mut net, now);
    }
    assert_eq!(server.connected_count(), 1);

    chan.transmit(&mut net, 1500, &[]).unwrap();
    server.process_packets(&mut net, 1500);
    server.check_timeouts(&mut net, 1600);
    assert_eq!(server.connected_count(), 1);

    // The count starts over once the new deadline passes.
    for now in 2501..2501 + CHECKS as u64 {
        server.check_timeouts(&mut net, now);
        assert_eq!(server.connected_count(), 1);
    }
    server.check_timeouts(&mut net, 2501 + CHECKS as u64);
    assert_eq!(server.connected_count(), 0);
}

#[test]
fn test_run_frame_checks_once_per_frame() {
    let (mut server, mut net) = connected_server(1000);
    let interval = server.config().frame_interval_ms;

    // Many ticks inside one frame interval count as a single check.
    let mut now = 2000;
    for _ in 0..CHECKS {
        for tick in 0..interval {
            server.run_frame(&mut net, now + tick);
        }
        assert_eq!(server.connected_count(), 1);
        now += interval;
    }
    server.run_frame(&mut net, now);
    assert_eq!(server.connected_count(), 0);
}
