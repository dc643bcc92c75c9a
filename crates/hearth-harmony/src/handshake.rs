//! Session handshake: stream negotiation, SASL PLAIN auth, resource bind.
//!
//! The machine is strictly linear; there are no branching success paths
//! and no in-attempt retries. A failure at any step aborts the whole
//! attempt with the underlying error, and recovery happens only at the
//! supervisor's fixed retry tick.
//!
//! # Session Flow
//!
//! 1. Send stream open to the nominal peer name, expect the hub's own
//!    stream-open tag back
//! 2. Read stream features, require exactly one mechanism: PLAIN
//! 3. Send SASL PLAIN auth with the guest credential triple
//! 4. Read the auth result (`<success/>` or `<failure>`)
//! 5. Restart the stream, now addressed to the real peer name, and
//!    discard the post-auth features
//! 6. Bind the fixed resource name, expect one IQ back
//!
//! Every read is bounded by the configured handshake timeout; the
//! reference design blocked indefinitely on an unresponsive peer.

use tokio::time::timeout;
use tracing::debug;
use uuid::Uuid;

use crate::config::HarmonyConfig;
use crate::connection::Connection;
use crate::parser::{StreamElement, StreamFeatures};
use crate::stanza;
use crate::HarmonyError;

const MECHANISM_PLAIN: &str = "PLAIN";

/// Drive a freshly opened connection to an authenticated, bound session.
pub async fn authenticate(
    conn: &mut Connection,
    config: &HarmonyConfig,
) -> Result<(), HarmonyError> {
    open_stream(conn, config, &config.nominal_peer, "initial stream open").await?;

    let features = expect_features(conn, config, "pre-auth stream features").await?;
    // The device only ever offers PLAIN; anything else means we are not
    // talking to a hub. No negotiation fallback.
    if features.mechanisms.len() != 1 {
        return Err(HarmonyError::Negotiation(format!(
            "expected exactly one SASL mechanism, hub offered {:?}",
            features.mechanisms
        )));
    }
    if features.mechanisms[0] != MECHANISM_PLAIN {
        return Err(HarmonyError::Negotiation(format!(
            "unsupported SASL mechanism {:?}",
            features.mechanisms[0]
        )));
    }

    conn.send(&stanza::auth(&config.authzid, &config.authcid, &config.password))
        .await?;
    match read_element(conn, config, "authentication result").await? {
        StreamElement::SaslSuccess => debug!("SASL authentication accepted"),
        StreamElement::SaslFailure(failure) => {
            return Err(HarmonyError::AuthFailure(failure.message()));
        }
        other => {
            return Err(HarmonyError::UnexpectedElement {
                name: other.name().to_string(),
            });
        }
    }

    // Per protocol convention the stream restarts after auth, this time
    // addressed to the real peer name. The re-advertised features carry
    // nothing we need.
    open_stream(conn, config, &config.session_peer, "post-auth stream open").await?;
    expect_features(conn, config, "post-auth stream features").await?;

    let request_id = Uuid::new_v4().to_string();
    conn.send(&stanza::bind(&config.resource, &request_id))
        .await?;
    match read_element(conn, config, "bind result").await? {
        // Receiving an IQ at all is taken as success; the hub's reply
        // carries nothing worth inspecting.
        StreamElement::ClientIq(_) => {
            debug!(resource = %config.resource, "resource bound");
            Ok(())
        }
        other => Err(HarmonyError::UnexpectedElement {
            name: other.name().to_string(),
        }),
    }
}

/// Send a stream open addressed to `peer` and expect the hub's own
/// stream-open tag as the next start element.
async fn open_stream(
    conn: &mut Connection,
    config: &HarmonyConfig,
    peer: &str,
    step: &'static str,
) -> Result<(), HarmonyError> {
    conn.send(&stanza::stream_open(peer)).await?;
    let tag = timeout(config.handshake_timeout, conn.next_start())
        .await
        .map_err(|_| HarmonyError::Timeout(step))??;
    if !tag.is_stream_open() {
        return Err(HarmonyError::UnexpectedElement {
            name: tag.qualified(),
        });
    }
    debug!(peer, "stream opened");
    Ok(())
}

async fn read_element(
    conn: &mut Connection,
    config: &HarmonyConfig,
    step: &'static str,
) -> Result<StreamElement, HarmonyError> {
    timeout(config.handshake_timeout, conn.next_element())
        .await
        .map_err(|_| HarmonyError::Timeout(step))?
}

async fn expect_features(
    conn: &mut Connection,
    config: &HarmonyConfig,
    step: &'static str,
) -> Result<StreamFeatures, HarmonyError> {
    match read_element(conn, config, step).await? {
        StreamElement::StreamFeatures(features) => Ok(features),
        other => Err(HarmonyError::UnexpectedElement {
            name: other.name().to_string(),
        }),
    }
}
