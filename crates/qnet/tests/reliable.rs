mod common;

use qnet::protocol::PRINT_HIGH;
use qnet::{
    ClientConfig, ClientEvent, ClientSession, LoopbackTransport, LossyTransport, NetAddr,
    PacketLossSimulation, ServerConfig, ServerMessage, ServerSession,
};

#[test]
fn test_reliable_messages_arrive_once_in_order_over_lossy_link() {
    let mut net = LossyTransport::new(LoopbackTransport::new(), PacketLossSimulation::default())
        .with_seed(7);
    let mut server = ServerSession::new(ServerConfig::default());
    let mut client = ClientSession::new(ClientConfig::default());

    client.connect(&mut net, NetAddr::LOOPBACK, 0);
    let mut now = common::sign_on(&mut server, &mut client, &mut net, 0);
    client.drain_events().count();

    net.set_simulation(PacketLossSimulation {
        enabled: true,
        loss_percent: 30.0,
        ..Default::default()
    });

    let sent: Vec<String> = (0..40).map(|i| format!("message {}\n", i)).collect();
    for text in &sent {
        let print = ServerMessage::Print {
            level: PRINT_HIGH,
            text: text.clone(),
        };
        server.send_reliable(0, &print).unwrap();
    }

    let mut received = Vec::new();
    for _ in 0..600 {
        now += common::TICK_MS;
        client.run_frame(&mut net, now);
        server.run_frame(&mut net, now);
        received.extend(client.drain_events().filter_map(|e| match e {
            ClientEvent::Print { text, .. } => Some(text),
            _ => None,
        }));
    }

    assert!(net.stats().packets_dropped > 0);
    assert_eq!(received, sent);
}
