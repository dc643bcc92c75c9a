//! Client handle and the keepalive/reconnect supervisor.
//!
//! One background task owns the connection for the lifetime of the
//! client. All protocol operations — handshake, keepalive write, command
//! dispatch — execute on that task, never concurrently against the same
//! socket; callers reach it only through a message-passing entry point.
//! The loop reacts to three events:
//!
//! - a stop signal (terminal; sends a best-effort stream close)
//! - a connect-retry tick while disconnected (fixed interval, no backoff)
//! - a keepalive tick while connected (raw newline, kept well under the
//!   hub's 60-second idle drop)

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::HarmonyConfig;
use crate::connection::Connection;
use crate::handshake;
use crate::parser::StreamElement;
use crate::stanza::{self, HoldStatus};
use crate::HarmonyError;

/// Connectivity state of the hub session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session; the retry tick will attempt one
    Disconnected,
    /// TCP connect in progress
    Connecting,
    /// Handshake in progress
    Authenticating,
    /// Session established; commands may be dispatched
    Bound,
}

enum Command {
    HoldAndRelease {
        device_id: String,
        command: String,
        reply: oneshot::Sender<Result<(), HarmonyError>>,
    },
}

/// Handle to a running hub client.
///
/// Cheap to use from any task; all socket access happens on the
/// supervisor task this handle talks to. Dropping the handle without
/// calling [`stop`](Self::stop) shuts the supervisor down without the
/// graceful stream close.
pub struct HarmonyClient {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
    shutdown: CancellationToken,
    supervisor: JoinHandle<()>,
}

impl HarmonyClient {
    /// Spawn the supervisor and start connecting to the hub.
    pub fn start(config: HarmonyConfig) -> Self {
        let (command_tx, command_rx) = mpsc::channel(16);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let shutdown = CancellationToken::new();

        let supervisor = Supervisor {
            config,
            connection: None,
            state: state_tx,
        };
        let task = tokio::spawn(supervisor.run(command_rx, shutdown.clone()));

        Self {
            commands: command_tx,
            state: state_rx,
            shutdown,
            supervisor: task,
        }
    }

    /// Current connectivity state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Whether a session is bound and commands may be dispatched.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Bound
    }

    /// Emulate a remote button press: send the press and release stanzas
    /// for `command` on `device_id` and consume both acknowledgements.
    ///
    /// Fails immediately with [`HarmonyError::NotConnected`] while no
    /// session is bound; nothing is queued for later. Retry policy, if
    /// any, belongs to the caller.
    pub async fn hold_and_release(
        &self,
        device_id: &str,
        command: &str,
    ) -> Result<(), HarmonyError> {
        if !self.is_connected() {
            return Err(HarmonyError::NotConnected);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let request = Command::HoldAndRelease {
            device_id: device_id.to_string(),
            command: command.to_string(),
            reply: reply_tx,
        };
        self.commands
            .send(request)
            .await
            .map_err(|_| HarmonyError::NotConnected)?;
        reply_rx.await.map_err(|_| HarmonyError::NotConnected)?
    }

    /// Stop the client: close the session gracefully and end the
    /// supervisor. Terminal; the loop never restarts after stopping.
    pub async fn stop(self) {
        info!("stopping hub client");
        self.shutdown.cancel();
        let _ = self.supervisor.await;
    }
}

/// Single owner of the connection handle and the connectivity state.
struct Supervisor {
    config: HarmonyConfig,
    connection: Option<Connection>,
    state: watch::Sender<ConnectionState>,
}

impl Supervisor {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>, shutdown: CancellationToken) {
        let mut retry = interval(self.config.retry_interval);
        retry.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut keepalive = interval(self.config.keepalive_interval);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    self.shutdown_session().await;
                    return;
                }
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!("all client handles dropped, shutting down");
                        self.shutdown_session().await;
                        return;
                    }
                },
                _ = retry.tick(), if self.connection.is_none() => {
                    // A stop request must not wait out an in-flight
                    // handshake read; cancellation drops the attempt
                    // mid-read.
                    let connected = tokio::select! {
                        _ = shutdown.cancelled() => None,
                        connected = self.try_connect() => Some(connected),
                    };
                    match connected {
                        None => {
                            self.shutdown_session().await;
                            return;
                        }
                        Some(true) => {
                            // The keepalive interval accumulated ticks
                            // while its branch was disabled; start the
                            // cadence from now.
                            keepalive.reset();
                        }
                        Some(false) => {}
                    }
                }
                _ = keepalive.tick(), if self.connection.is_some() => {
                    self.send_keepalive().await;
                }
            }
        }
    }

    fn set_state(&self, next: ConnectionState) {
        self.state.send_replace(next);
    }

    /// One connect attempt: TCP connect plus the full handshake. Returns
    /// whether a session was bound.
    async fn try_connect(&mut self) -> bool {
        self.set_state(ConnectionState::Connecting);
        let mut conn = match Connection::connect(&self.config).await {
            Ok(conn) => conn,
            Err(error) => {
                debug!(addr = %self.config.address, %error, "connect attempt failed");
                self.set_state(ConnectionState::Disconnected);
                return false;
            }
        };

        self.set_state(ConnectionState::Authenticating);
        match handshake::authenticate(&mut conn, &self.config).await {
            Ok(()) => {
                info!(addr = %self.config.address, "hub session established");
                self.connection = Some(conn);
                self.set_state(ConnectionState::Bound);
                true
            }
            Err(error) => {
                warn!(addr = %self.config.address, %error, "handshake failed");
                self.set_state(ConnectionState::Disconnected);
                false
            }
        }
    }

    async fn send_keepalive(&mut self) {
        let Some(conn) = self.connection.as_mut() else {
            return;
        };
        if let Err(error) = conn.send_keepalive().await {
            warn!(%error, "keepalive write failed, dropping session");
            self.drop_session();
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::HoldAndRelease {
                device_id,
                command,
                reply,
            } => {
                let result = match self.connection.as_mut() {
                    None => Err(HarmonyError::NotConnected),
                    Some(conn) => {
                        dispatch_hold_and_release(conn, &self.config, &device_id, &command).await
                    }
                };
                if let Err(error) = &result {
                    if error.is_disconnect() {
                        warn!(%error, "session lost during command dispatch");
                        self.drop_session();
                    }
                }
                // A caller that gave up on the reply is not an error here.
                let _ = reply.send(result);
            }
        }
    }

    fn drop_session(&mut self) {
        self.connection = None;
        self.set_state(ConnectionState::Disconnected);
    }

    async fn shutdown_session(&mut self) {
        if let Some(mut conn) = self.connection.take() {
            if let Err(error) = conn.close().await {
                debug!(%error, "error sending stream close");
            }
        }
        self.set_state(ConnectionState::Disconnected);
    }
}

/// Send the press/release pair in one write, then consume exactly two
/// acknowledgement IQs in send order.
///
/// Correlation is positional: the hub tags neither acknowledgement, so
/// the next two IQs on the stream are taken as the answer. That
/// assumption lives entirely inside this function; a stricter id-matching
/// scheme could replace it without touching the public contract.
async fn dispatch_hold_and_release(
    conn: &mut Connection,
    config: &HarmonyConfig,
    device_id: &str,
    command: &str,
) -> Result<(), HarmonyError> {
    let press = stanza::hold_action(device_id, command, HoldStatus::Press);
    let release = stanza::hold_action(device_id, command, HoldStatus::Release);

    // The hub tolerates stanza concatenation; both phases go out in a
    // single write so no ack read can interleave with the sends.
    let mut pair = press;
    pair.push_str(&release);
    conn.send(&pair).await?;

    for phase in [HoldStatus::Press, HoldStatus::Release] {
        let element = timeout(config.reply_timeout, conn.next_element())
            .await
            .map_err(|_| HarmonyError::Timeout("command acknowledgement"))??;
        match element {
            StreamElement::ClientIq(_) => trace!(%phase, "acknowledged"),
            other => {
                return Err(HarmonyError::UnexpectedElement {
                    name: other.name().to_string(),
                });
            }
        }
    }
    Ok(())
}
