// Realtime channel protocol: framing and chat event payloads

pub mod messages;
pub mod packet;

// Re-export key types
pub use messages::{ClientEvent, OutboundMessage, ServerEvent, WireMessage};
pub use packet::{decode, encode, EnginePacket, OpenPayload, SocketPacket};
