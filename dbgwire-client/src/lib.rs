// dbgwire client library
//
// Client side of the dbgwire debugger protocol:
// - Connection management over local TCP
// - NUL-delimited JSON framing
// - Classification of breakpoint and break notifications
// - Typed event subscriptions

pub mod config;
pub mod connection;
pub mod eventloop;
pub mod events;
pub mod framer;
pub mod protocol;
pub mod types;

pub use config::ConnectOptions;
pub use connection::{ConnectionState, DebugConnection};
pub use events::{ConnectionEvent, InboundMessage};
pub use framer::MessageFramer;
pub use protocol::{DebugWireError, Request, WireResult, DEBUGGER_PORT};
pub use types::{Address, BreakpointList, Breaking, HitBreakpoint};
