//! TCP server for filo: listener, per-connection sessions and the wire
//! protocol.

mod listener;
pub mod protocol;
mod session;

pub use listener::ChatServer;
pub use protocol::{parse_line, Command, InputLine, ParseError};
pub use session::{SessionContext, SessionHandler};
