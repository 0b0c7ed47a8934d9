//! Connection I/O for one WebSocket client.
//!
//! A connection runs three tasks:
//!
//! - read loop: socket frames -> participant inbound queue
//! - process loop: the [`Participant`] itself
//! - write loop: participant outbound queue and keep-alive pings -> socket
//!
//! All three share one cancellation token, a child of the registry token.
//! Whichever side hits a terminal condition first brings the other two down.

use super::messages::{ParticipantEntry, ParticipantEvent};
use super::participant::{Participant, ParticipantContext};
use crate::config::DEFAULT_MAX_MESSAGE_SIZE;
use crate::protocol::ConnectParams;

use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Time allowed to read the next frame (any frame, pongs included).
pub const DEFAULT_PONG_WAIT: Duration = Duration::from_secs(60);

/// Time allowed to write one frame.
pub const DEFAULT_WRITE_WAIT: Duration = Duration::from_secs(10);

/// Keep-alive ping period; must be shorter than the pong wait.
pub const DEFAULT_PING_PERIOD: Duration = Duration::from_secs(54);

const DEFAULT_INBOUND_CAPACITY: usize = 64;
const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Per-connection timing and buffering.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub pong_wait: Duration,
    pub write_wait: Duration,
    pub ping_period: Duration,
    pub max_message_size: usize,
    pub inbound_capacity: usize,
    pub outbound_capacity: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            pong_wait: DEFAULT_PONG_WAIT,
            write_wait: DEFAULT_WRITE_WAIT,
            ping_period: DEFAULT_PING_PERIOD,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }
}

/// Run one accepted WebSocket connection to completion.
///
/// Registers the participant, runs the three connection tasks and returns
/// once all of them have finished.
#[instrument(
    skip_all,
    name = "signal.connection",
    fields(session_id = %identity.session_id, token_id = %identity.token_id)
)]
pub async fn serve_participant(
    socket: WebSocket,
    identity: ConnectParams,
    ctx: ParticipantContext,
    settings: ConnectionSettings,
) {
    let (sink, stream) = socket.split();
    let cancel_token = ctx.registry.child_token();
    let (outbound_tx, outbound_rx) = mpsc::channel(settings.outbound_capacity);

    let entry_session = identity.session_id.clone();
    let entry_token = identity.token_id.clone();
    let registry = ctx.registry.clone();
    let (participant, inbound) = Participant::new(
        identity,
        ctx,
        outbound_tx,
        cancel_token.clone(),
        settings.inbound_capacity,
    );

    let entry = ParticipantEntry {
        participant_id: participant.participant_id().to_string(),
        session_id: entry_session,
        token_id: entry_token,
        cancel_token: cancel_token.clone(),
    };
    if let Err(e) = registry.register(entry).await {
        warn!(
            target: "signal.connection",
            error = %e,
            "Failed to register participant, dropping connection"
        );
        return;
    }

    let reader = tokio::spawn(read_loop(
        stream,
        inbound,
        cancel_token.clone(),
        settings.pong_wait,
    ));
    let writer = tokio::spawn(write_loop(
        sink,
        outbound_rx,
        cancel_token,
        settings.write_wait,
        settings.ping_period,
    ));

    participant.run().await;

    let _ = reader.await;
    let _ = writer.await;
    debug!(target: "signal.connection", "Connection closed");
}

/// Forward client text frames to the participant.
///
/// Ends on close frame, read error, end of stream, read deadline or
/// cancellation. Every end except cancellation is reported to the
/// participant as `Disconnected`.
pub async fn read_loop<S>(
    mut stream: S,
    inbound: mpsc::Sender<ParticipantEvent>,
    cancel_token: CancellationToken,
    pong_wait: Duration,
) where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let reason = loop {
        let frame = tokio::select! {
            biased;
            () = cancel_token.cancelled() => return,
            frame = timeout(pong_wait, stream.next()) => frame,
        };

        let message = match frame {
            Err(_) => break "read timeout",
            Ok(None) => break "connection closed",
            Ok(Some(Err(e))) => {
                debug!(target: "signal.connection", error = %e, "Read failed");
                break "read error";
            }
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Text(text) => {
                tokio::select! {
                    biased;
                    () = cancel_token.cancelled() => return,
                    sent = inbound.send(ParticipantEvent::Client(text)) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }
            Message::Close(_) => break "client closed",
            // Pongs only extend the read deadline; ping replies are queued by the socket
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Binary(_) => {
                debug!(target: "signal.connection", "Ignoring binary frame");
            }
        }
    };

    tokio::select! {
        biased;
        () = cancel_token.cancelled() => {}
        _ = inbound.send(ParticipantEvent::Disconnected { reason }) => {}
    }
}

/// Write queued client messages and keep-alive pings.
///
/// Each write is bounded by `write_wait`; a failed or late write cancels the
/// connection.
pub async fn write_loop<S>(
    mut sink: S,
    mut outbound: mpsc::Receiver<String>,
    cancel_token: CancellationToken,
    write_wait: Duration,
    ping_period: Duration,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let mut ping = interval_at(Instant::now() + ping_period, ping_period);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let frame = tokio::select! {
            biased;
            () = cancel_token.cancelled() => break,
            text = outbound.recv() => match text {
                Some(text) => Message::Text(text),
                None => break,
            },
            _ = ping.tick() => Message::Ping(Vec::new()),
        };

        let failure = match timeout(write_wait, sink.send(frame)).await {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => e.to_string(),
            Err(_) => "write deadline exceeded".to_string(),
        };
        warn!(target: "signal.connection", error = %failure, "Write failed, closing connection");
        cancel_token.cancel();
        return;
    }

    let _ = timeout(write_wait, sink.close()).await;
}
