//! Client configuration.
//!
//! The hub accepts an anonymous-style guest login and ignores most of the
//! addressing fields, so everything here ships with working defaults; an
//! embedding hub only has to fill in the network address of the device.

use std::time::Duration;

/// Default interval between connect attempts while disconnected.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Default idle keepalive interval.
///
/// The hub unilaterally drops connections after 60 seconds of silence;
/// 20 seconds leaves comfortable margin for scheduling jitter.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(20);

/// Default timeout for establishing the TCP connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for each read during the handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for each command acknowledgement read.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Peer name used in the initial stream open. The device never validates
/// this hostname; it is a vestigial protocol artifact, not a routable
/// address.
pub const DEFAULT_NOMINAL_PEER: &str = "x.com";

/// Peer name used for the post-auth stream restart.
pub const DEFAULT_SESSION_PEER: &str = "connect.logitech.com";

/// Fixed resource name bound during the handshake.
pub const DEFAULT_RESOURCE: &str = "gatorade";

/// Harmony hub client configuration.
#[derive(Debug, Clone)]
pub struct HarmonyConfig {
    /// Network address of the hub (e.g., "192.168.1.20:5222")
    pub address: String,
    /// Peer name for the initial stream open (unvalidated by the device)
    pub nominal_peer: String,
    /// Peer name for the post-auth stream restart
    pub session_peer: String,
    /// SASL PLAIN authorization identity
    pub authzid: String,
    /// SASL PLAIN authentication identity
    pub authcid: String,
    /// SASL PLAIN password
    pub password: String,
    /// Resource name bound during the handshake
    pub resource: String,
    /// Interval between connect attempts while disconnected
    pub retry_interval: Duration,
    /// Idle keepalive interval while connected
    pub keepalive_interval: Duration,
    /// Timeout for establishing the TCP connection
    pub connect_timeout: Duration,
    /// Timeout for each handshake read
    pub handshake_timeout: Duration,
    /// Timeout for each command acknowledgement read
    pub reply_timeout: Duration,
}

impl HarmonyConfig {
    /// Create a configuration for the hub at `address` with the stock
    /// guest credentials the device accepts.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }
}

impl Default for HarmonyConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:5222".to_string(),
            nominal_peer: DEFAULT_NOMINAL_PEER.to_string(),
            session_peer: DEFAULT_SESSION_PEER.to_string(),
            authzid: "guest@x.com".to_string(),
            authcid: "guest".to_string(),
            password: "guest".to_string(),
            resource: DEFAULT_RESOURCE.to_string(),
            retry_interval: DEFAULT_RETRY_INTERVAL,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_use_guest_login() {
        let config = HarmonyConfig::new("192.168.1.20:5222");
        assert_eq!(config.address, "192.168.1.20:5222");
        assert_eq!(config.authzid, "guest@x.com");
        assert_eq!(config.authcid, "guest");
        assert_eq!(config.password, "guest");
    }

    #[test]
    fn test_keepalive_stays_under_idle_drop() {
        // The device drops idle sessions after 60s.
        let config = HarmonyConfig::default();
        assert!(config.keepalive_interval < Duration::from_secs(60) / 2);
        assert_eq!(config.retry_interval, Duration::from_secs(1));
    }
}
