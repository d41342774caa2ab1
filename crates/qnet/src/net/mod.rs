mod address;
mod loopback;
mod memory;
mod netchan;
pub mod oob;
mod simulator;
mod stats;
mod transport;

pub use address::{AddrKind, AddressError, NetAddr};
pub use loopback::LoopbackTransport;
pub use memory::{MemoryNetwork, MemorySocket, SharedNetwork};
pub use netchan::{ChannelError, NetChan, PacketHeader};
pub use simulator::{LossyTransport, PacketLossSimulation};
pub use stats::NetworkStats;
pub use transport::{NetSrc, Transport, UdpTransport};
