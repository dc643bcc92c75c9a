//! Outbound stanza construction.
//!
//! The hub's dialect is small enough that stanzas are assembled as plain
//! strings; none of the interpolated values require XML escaping (device
//! and command identifiers are alphanumeric tokens).

use std::fmt;

use base64::prelude::*;

use crate::parser::ns;

/// MIME selector for the hub's two-phase IR hold action.
pub const HOLD_ACTION_MIME: &str = "vnd.logitech.harmony/vnd.logitech.harmony.engine?holdAction";

/// Graceful stream close tag.
pub const STREAM_CLOSE: &str = "</stream:stream>";

/// Build a stream-open tag addressed to `peer`.
///
/// The tag is intentionally unclosed; the stream document stays open for
/// the lifetime of the session.
pub fn stream_open(peer: &str) -> String {
    format!(
        "<stream:stream xmlns=\"{}\" xmlns:stream=\"{}\" version=\"1.0\" to=\"{}\">",
        ns::JABBER_CLIENT,
        ns::STREAM,
        peer
    )
}

/// Encode the SASL PLAIN payload: base64 of `authzid \0 authcid \0 password`.
pub fn sasl_plain(authzid: &str, authcid: &str, password: &str) -> String {
    BASE64_STANDARD.encode(format!("{authzid}\0{authcid}\0{password}").as_bytes())
}

/// Build the SASL PLAIN `<auth>` element.
pub fn auth(authzid: &str, authcid: &str, password: &str) -> String {
    format!(
        "<auth xmlns=\"{}\" mechanism=\"PLAIN\">{}</auth>",
        ns::SASL,
        sasl_plain(authzid, authcid, password)
    )
}

/// Build the resource-bind IQ with a locally chosen request id.
pub fn bind(resource: &str, request_id: &str) -> String {
    format!(
        "<iq type=\"set\" id=\"{}\"><bind xmlns=\"{}\"><resource>{}</resource></bind></iq>",
        request_id,
        ns::BIND,
        resource
    )
}

/// Phase marker of a two-phase hold action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldStatus {
    /// Button pressed
    Press,
    /// Button released
    Release,
}

impl HoldStatus {
    /// Wire value of the status field.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Press => "press",
            Self::Release => "release",
        }
    }
}

impl fmt::Display for HoldStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build one phase of the IR hold action for `command` on `device_id`.
///
/// The press and release stanzas are identical except for the status
/// field; the double-colon separators are the hub's own quirk, not JSON.
pub fn hold_action(device_id: &str, command: &str, status: HoldStatus) -> String {
    format!(
        "<iq type=\"get\"><oa xmlns=\"{}\" mime=\"{}\">\
         action={{\"command\"::\"{}\",\"type\"::\"IRCommand\",\"deviceId\"::\"{}\"}}:status={}</oa></iq>",
        ns::OA,
        HOLD_ACTION_MIME,
        command,
        device_id,
        status.as_str()
    )
}
