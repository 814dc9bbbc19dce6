//! mcper Bridge - length-prefixed JSON commands between mcper and an
//! automation peer.
//!
//! Each message is a 4-byte little-endian length followed by a JSON payload.
//! Either side may send a [`BridgeRequest`]; the other answers with a
//! [`BridgeResponse`] carrying the same id. [`BridgeConnection`] correlates
//! responses with pending requests, bounds every round trip with a timeout
//! and hands the peer's own requests to a [`CommandHandler`].
//!
//! The [`http`] module exposes a connection as a small HTTP API.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod codec;
pub mod connection;
mod error;
pub mod http;
pub mod message;

pub use codec::{DEFAULT_MAX_FRAME, read_frame, read_message, write_frame, write_message};
pub use connection::{
    BridgeConnection, BridgeConnectionBuilder, CommandHandler, DEFAULT_TIMEOUT, PingHandler,
};
pub use error::{BridgeError, BridgeResult};
pub use message::{BridgeFrame, BridgeRequest, BridgeResponse};
