//! Error types for the Harmony hub protocol client.

use thiserror::Error;

/// Errors produced by the hub connection, handshake, and command dispatch.
#[derive(Debug, Error)]
pub enum HarmonyError {
    /// TCP connection to the hub could not be established
    #[error("connection failed: {0}")]
    Connect(#[source] std::io::Error),

    /// A stanza arrived where a different, specific one was required
    #[error("unexpected element <{name}>")]
    UnexpectedElement {
        /// Qualified name of the offending element
        name: String,
    },

    /// Stream feature negotiation failed
    #[error("stream negotiation failed: {0}")]
    Negotiation(String),

    /// The hub rejected SASL authentication
    #[error("authentication rejected: {0}")]
    AuthFailure(String),

    /// A command was attempted while no session is bound
    #[error("not connected to hub")]
    NotConnected,

    /// The hub closed the stream
    #[error("connection closed by hub")]
    ConnectionClosed,

    /// XML decoding failed mid-stream
    #[error("XML decode error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// IO error on an established session
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A bounded read expired before the hub answered
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
}

impl HarmonyError {
    /// Whether this error means the underlying session is gone and the
    /// supervisor must rebuild it from scratch. Protocol-level errors
    /// (unexpected element, auth rejection) leave the TCP session in place.
    pub(crate) fn is_disconnect(&self) -> bool {
        match self {
            Self::Connect(_) | Self::ConnectionClosed | Self::Io(_) | Self::Timeout(_) => true,
            Self::Xml(quick_xml::Error::Io(_)) => true,
            _ => false,
        }
    }
}
