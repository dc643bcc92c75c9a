//! Test utilities for driving the client against a scripted hub peer.
//!
//! `MockHub` plays the device side of the protocol byte-for-byte; each
//! test scripts exactly the reads and responses it needs, so ordering
//! violations show up as read timeouts.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Instant};

use hearth_harmony::{HarmonyClient, HarmonyConfig};

/// Default timeout for test operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Stream open the mock hub answers with (first negotiation).
pub const HUB_STREAM_OPEN: &str = "<stream:stream xmlns=\"jabber:client\" \
     xmlns:stream=\"http://etherx.jabber.org/streams\" from=\"x.com\" id=\"1\" version=\"1.0\">";

/// Pre-auth features: exactly one mechanism, PLAIN.
pub const HUB_FEATURES_PLAIN: &str = "<stream:features>\
     <mechanisms xmlns=\"urn:ietf:params:xml:ns:xmpp-sasl\">\
     <mechanism>PLAIN</mechanism></mechanisms></stream:features>";

/// Post-auth features advertising resource binding.
pub const HUB_FEATURES_BIND: &str = "<stream:features>\
     <bind xmlns=\"urn:ietf:params:xml:ns:xmpp-bind\"/></stream:features>";

pub const HUB_SASL_SUCCESS: &str = "<success xmlns=\"urn:ietf:params:xml:ns:xmpp-sasl\"/>";

pub const HUB_BIND_RESULT: &str =
    "<iq type=\"result\" id=\"bind-result\" from=\"connect.logitech.com\"/>";

/// Initialize tracing for tests (RUST_LOG-controlled, once per process).
pub fn init_test_env() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Client configuration with intervals shrunk for test time scales.
pub fn test_config(addr: SocketAddr) -> HarmonyConfig {
    let mut config = HarmonyConfig::new(addr.to_string());
    config.retry_interval = Duration::from_millis(20);
    config.keepalive_interval = Duration::from_millis(50);
    config.connect_timeout = Duration::from_secs(2);
    config.handshake_timeout = Duration::from_secs(2);
    config.reply_timeout = Duration::from_secs(2);
    config
}

/// Listener standing in for the hub device.
pub struct MockHub {
    listener: TcpListener,
    pub addr: SocketAddr,
}

impl MockHub {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock hub listener");
        let addr = listener.local_addr().expect("mock hub local addr");
        Self { listener, addr }
    }

    /// Wait for the client's next TCP connection.
    pub async fn accept(&self) -> HubSession {
        let (stream, _) = timeout(DEFAULT_TIMEOUT, self.listener.accept())
            .await
            .expect("timed out waiting for client connection")
            .expect("accept client connection");
        HubSession {
            stream,
            buffer: String::new(),
        }
    }
}

/// One accepted client connection, driven from the hub side.
pub struct HubSession {
    stream: TcpStream,
    buffer: String,
}

impl HubSession {
    pub async fn send(&mut self, data: &str) {
        self.stream
            .write_all(data.as_bytes())
            .await
            .expect("mock hub write");
        self.stream.flush().await.expect("mock hub flush");
    }

    /// Read until `pattern` appears in the accumulated buffer.
    pub async fn read_until(&mut self, pattern: &str, timeout_dur: Duration) -> std::io::Result<String> {
        let start = Instant::now();
        while !self.buffer.contains(pattern) {
            if start.elapsed() > timeout_dur {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("timeout waiting for {:?}, buffer: {:?}", pattern, self.buffer),
                ));
            }
            let mut buf = [0u8; 4096];
            let remaining = timeout_dur.saturating_sub(start.elapsed());
            let n = match timeout(remaining, self.stream.read(&mut buf)).await {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("timeout waiting for {:?}, buffer: {:?}", pattern, self.buffer),
                    ))
                }
            };
            if n == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "client closed connection",
                ));
            }
            self.buffer.push_str(&String::from_utf8_lossy(&buf[..n]));
        }
        Ok(self.buffer.clone())
    }

    /// Collect whatever the client sends for `dur`, without responding.
    pub async fn collect_for(&mut self, dur: Duration) -> String {
        let deadline = Instant::now() + dur;
        let mut collected = String::new();
        let mut buf = [0u8; 1024];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match timeout(remaining, self.stream.read(&mut buf)).await {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => collected.push_str(&String::from_utf8_lossy(&buf[..n])),
                Ok(Err(_)) | Err(_) => break,
            }
        }
        collected
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Play the hub's side of a complete successful handshake.
    pub async fn serve_handshake(&mut self) -> std::io::Result<()> {
        // Client stream open
        self.read_until(">", DEFAULT_TIMEOUT).await?;
        self.clear();
        self.send(&format!("{HUB_STREAM_OPEN}{HUB_FEATURES_PLAIN}"))
            .await;

        // SASL PLAIN auth
        self.read_until("</auth>", DEFAULT_TIMEOUT).await?;
        self.clear();
        self.send(HUB_SASL_SUCCESS).await;

        // Stream restart
        self.read_until(">", DEFAULT_TIMEOUT).await?;
        self.clear();
        self.send(&format!("{HUB_STREAM_OPEN}{HUB_FEATURES_BIND}"))
            .await;

        // Resource bind
        self.read_until("</iq>", DEFAULT_TIMEOUT).await?;
        self.clear();
        self.send(HUB_BIND_RESULT).await;
        Ok(())
    }

    /// Wait for one press/release pair, acknowledge both, and return the
    /// raw bytes the client sent.
    pub async fn serve_command(&mut self) -> std::io::Result<String> {
        let seen = self
            .read_until("status=release</oa></iq>", DEFAULT_TIMEOUT)
            .await?;
        self.clear();
        self.send("<iq type=\"result\" id=\"ack-1\"/><iq type=\"result\" id=\"ack-2\"/>")
            .await;
        Ok(seen)
    }
}

/// Poll the client until it reports a bound session.
pub async fn wait_for_connected(client: &HarmonyClient, timeout_dur: Duration) -> bool {
    let deadline = Instant::now() + timeout_dur;
    while Instant::now() < deadline {
        if client.is_connected() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
