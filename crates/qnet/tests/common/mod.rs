#![allow(dead_code)]

use qnet::{ClientSession, ClientState, ServerSession, Transport};

pub const TICK_MS: u64 = 50;

/// Runs both ends over one shared transport until the client is receiving
/// frames. Returns the time reached.
pub fn sign_on(
    server: &mut ServerSession,
    client: &mut ClientSession,
    net: &mut impl Transport,
    mut now: u64,
) -> u64 {
    for _ in 0..200 {
        client.run_frame(net, now);
        server.run_frame(net, now);
        if client.state() == ClientState::Active {
            return now;
        }
        now += TICK_MS;
    }
    panic!("client stuck in {:?}: {:?}", client.state(), client.last_error());
}

/// Same as [`sign_on`] with a socket per side.
pub fn sign_on_split(
    server: &mut ServerSession,
    server_net: &mut impl Transport,
    client: &mut ClientSession,
    client_net: &mut impl Transport,
    mut now: u64,
) -> u64 {
    for _ in 0..200 {
        client.run_frame(client_net, now);
        server.run_frame(server_net, now);
        if client.state() == ClientState::Active {
            return now;
        }
        now += TICK_MS;
    }
    panic!("client stuck in {:?}: {:?}", client.state(), client.last_error());
}
