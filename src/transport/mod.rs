//! The `transport` module is responsible for handling network communication
//! with clients over WebSockets.
//!
//! It defines the messaging protocol used between clients and the server,
//! the connection multiplexer that maps each connection to its channels, and
//! the WebSocket server itself.

pub mod message;
pub mod multiplexer;
pub mod websocket;

pub use message::{ClientMessage, ServerMessage};
pub use multiplexer::ConnectionMultiplexer;
pub use websocket::{serve, start_websocket_server};
