// Realtime connection management

pub mod manager;
pub mod state_machine;

pub use manager::{ChannelEvent, ChannelHandle, RealtimeConnectionManager};
pub use state_machine::{ConnectionEvent, ConnectionState, ConnectionStateMachine, StateTransition};
