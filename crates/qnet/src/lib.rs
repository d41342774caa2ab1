pub mod client;
pub mod configstrings;
pub mod demo;
pub mod messages;
pub mod msg;
pub mod net;
pub mod protocol;
pub mod server;
pub mod snapshot;

pub use client::{ClientConfig, ClientEvent, ClientFrame, ClientSession, ClientState, ViewState};
pub use configstrings::{ConfigRange, ConfigStringError, ConfigStrings};
pub use demo::{DemoError, DemoReader, DemoWriter};
pub use messages::{ClientMessage, ServerData, ServerMessage, SoundMessage};
pub use msg::{MsgError, OverflowPolicy, SizeBuf};
pub use net::{
    ChannelError, LoopbackTransport, LossyTransport, MemoryNetwork, MemorySocket, NetAddr,
    NetChan, NetSrc, NetworkStats, PacketLossSimulation, Transport, UdpTransport,
};
pub use protocol::{PROTOCOL_VERSION, ProtocolError};
pub use server::{
    ChallengeGenerator, ClientSlot, DisconnectReason, RconHandler, ServerConfig, ServerEvent,
    ServerSession, SlotState,
};
pub use snapshot::{EntityState, MoveCommand, PlayerState, UserCmd};
