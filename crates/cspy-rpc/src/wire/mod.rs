//! Wire-level backend client.
//!
//! Speaks newline-delimited JSON over TCP. Replies are matched to requests by
//! id; notifications are fanned out through a `broadcast` channel.

mod client;
mod codec;

pub use client::{WireClient, WireClientConfig, WireConnector};
pub use codec::{decode_message, encode_message, WireError, WireMessage};
