//! # hearth-harmony
//!
//! Harmony hub remote-control protocol client for Hearth.
//!
//! The hub speaks a restricted XMPP-derived dialect over plain TCP:
//! stream negotiation, SASL PLAIN with a fixed guest login, resource
//! binding, then IQ-wrapped "hold action" commands that emulate remote
//! button presses. This crate implements exactly that subset — it is not
//! a general XMPP client.
//!
//! ## Architecture
//!
//! - **Connection**: exclusive owner of the TCP socket and the
//!   incremental XML reader positioned on it
//! - **Handshake**: linear state machine driving a fresh socket to a
//!   bound session
//! - **Supervisor**: one background task holding the only connection
//!   handle; reconnects on a fixed 1s tick, keeps the session alive with
//!   a 20s newline keepalive, tears down cleanly on stop
//! - **Dispatch**: two-phase press/release commands with positional
//!   acknowledgement reads, reached through a message-passing handle
//!
//! ## Usage
//!
//! ```ignore
//! use hearth_harmony::{HarmonyClient, HarmonyConfig};
//!
//! let client = HarmonyClient::start(HarmonyConfig::new("192.168.1.20:5222"));
//! client.hold_and_release("device123", "VolumeUp").await?;
//! client.stop().await;
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod handshake;
pub mod parser;
pub mod stanza;

mod error;

pub use client::{ConnectionState, HarmonyClient};
pub use config::HarmonyConfig;
pub use error::HarmonyError;
pub use parser::{ns, ClientIq, SaslFailure, StreamElement, StreamFeatures};
