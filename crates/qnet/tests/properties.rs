use proptest::prelude::*;

use qnet::msg::{SizeBuf, angle_delta};
use qnet::net::PacketHeader;
use qnet::{NetAddr, NetChan, NetSrc};

proptest! {
    #[test]
    fn test_coord_within_an_eighth(v in -4095.0f32..4095.0) {
        let mut msg = SizeBuf::new(16);
        msg.write_coord(v).unwrap();
        let back = msg.read_coord().unwrap();
        prop_assert!((back - v).abs() <= 1.0 / 16.0 + 1e-4, "{} -> {}", v, back);
    }

    #[test]
    fn test_angle_within_one_step(v in -720.0f32..720.0) {
        let mut msg = SizeBuf::new(16);
        msg.write_angle(v).unwrap();
        let back = msg.read_angle().unwrap();
        prop_assert!(angle_delta(back, v) <= 360.0 / 256.0, "{} -> {}", v, back);
    }

    #[test]
    fn test_accepted_sequences_strictly_increase(
        sequences in prop::collection::vec(1u32..200, 1..100)
    ) {
        let mut chan = NetChan::new(NetSrc::Server, NetAddr::LOOPBACK, 0, 0);
        let mut accepted = Vec::new();

        for sequence in sequences {
            let mut packet = SizeBuf::new(16);
            PacketHeader { sequence, reliable: false, ack: 0, ack_reliable: false }
                .write(&mut packet)
                .unwrap();
            let mut msg = SizeBuf::from_bytes(packet.data());
            if chan.process(&mut msg, 0) {
                accepted.push(sequence);
            }
        }

        prop_assert!(accepted.windows(2).all(|w| w[0] < w[1]));
    }
}
