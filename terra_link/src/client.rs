//! The client end of the link.
//!
//! Sequential request/response client: connect (mutual attestation), sign
//! and submit envelopes, buffer telemetry pushes, queue non-critical
//! commands while disconnected, and replay the queue verbatim on reconnect.

use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{info, warn};

use terra_common::clock::wall_clock_ms;
use terra_common::types::command::{Command, CommandEnvelope};

use crate::cert::{CaKey, Certificate};
use crate::envelope::make_envelope;
use crate::error::LinkError;
use crate::offline::OfflineQueue;
use crate::protocol::{Frame, TelemetrySnapshot};

/// Per-frame read timeout.
const READ_TIMEOUT: Duration = Duration::from_secs(5);
/// Initial reconnect backoff; doubles per attempt.
const BACKOFF_INITIAL: Duration = Duration::from_millis(100);

struct Connection {
    lines: tokio::io::Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    #[allow(dead_code)]
    token: String,
}

/// Outcome of submitting one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Server admitted and dispatched the command.
    Accepted,
    /// Server rejected with a machine-readable kind.
    Rejected { error_kind: String, message: String },
    /// Link down; the command was persisted for later replay.
    Queued,
}

/// The operator-side link client.
pub struct LinkClient {
    addr: String,
    certificate: Certificate,
    ca: CaKey,
    key: Vec<u8>,
    connection: Option<Connection>,
    queue: Option<OfflineQueue>,
    last_telemetry: Option<TelemetrySnapshot>,
}

impl LinkClient {
    pub fn new(
        addr: &str,
        certificate: Certificate,
        ca: CaKey,
        queue: Option<OfflineQueue>,
    ) -> Result<Self, LinkError> {
        let key = certificate.key_bytes()?;
        Ok(Self {
            addr: addr.to_string(),
            certificate,
            ca,
            key,
            connection: None,
            queue,
            last_telemetry: None,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Latest telemetry snapshot observed on the stream.
    pub fn last_telemetry(&self) -> Option<&TelemetrySnapshot> {
        self.last_telemetry.as_ref()
    }

    /// Pending offline commands.
    pub fn queued_len(&self) -> usize {
        self.queue.as_ref().map_or(0, |q| q.len())
    }

    /// Connect and run the mutual-attestation handshake.
    pub async fn connect(&mut self) -> Result<(), LinkError> {
        let stream = TcpStream::connect(&self.addr).await?;
        let (read_half, mut writer) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        // Server presents first; verify against the CA.
        match read_frame(&mut lines).await? {
            Frame::ServerHello { certificate } => {
                certificate.verify(&self.ca, wall_clock_ms())?;
            }
            other => {
                return Err(LinkError::Handshake(format!(
                    "expected server hello, got {other:?}"
                )))
            }
        }

        write_frame(
            &mut writer,
            &Frame::ClientHello {
                certificate: self.certificate.clone(),
            },
        )
        .await?;

        let token = match read_frame(&mut lines).await? {
            Frame::SessionGranted { token } => token,
            Frame::HandshakeError { error_kind, message } => {
                return Err(LinkError::Handshake(format!("{error_kind}: {message}")));
            }
            other => {
                return Err(LinkError::Handshake(format!(
                    "expected session grant, got {other:?}"
                )))
            }
        };

        // First telemetry frame (current ESTOP state) arrives before
        // anything else; buffer it.
        if let Ok(Frame::Telemetry { snapshot }) = read_frame(&mut lines).await {
            self.last_telemetry = Some(snapshot);
        }

        info!(addr = self.addr, "link established");
        self.connection = Some(Connection {
            lines,
            writer,
            token,
        });
        Ok(())
    }

    /// Connect with bounded exponential backoff.
    pub async fn connect_with_backoff(&mut self, max_attempts: u32) -> Result<(), LinkError> {
        let mut backoff = BACKOFF_INITIAL;
        let mut last_err = LinkError::Handshake("no attempts made".to_string());
        for attempt in 1..=max_attempts.max(1) {
            match self.connect().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(attempt, error = %e, "link connect failed");
                    last_err = e;
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(Duration::from_secs(10));
                }
            }
        }
        Err(last_err)
    }

    pub fn disconnect(&mut self) {
        self.connection = None;
    }

    /// Sign and submit a command; queue non-critical commands when the link
    /// is down and offline operation is enabled.
    pub async fn submit(&mut self, command: Command) -> Result<SubmitOutcome, LinkError> {
        let envelope = make_envelope(command, &self.key)?;
        if self.connection.is_some() {
            return self.submit_envelope(envelope).await;
        }
        match &mut self.queue {
            Some(queue) => {
                queue.push(envelope, wall_clock_ms())?;
                Ok(SubmitOutcome::Queued)
            }
            None => Err(LinkError::NotQueueable("link down, no queue".to_string())),
        }
    }

    /// Submit an already-signed envelope verbatim and await the verdict.
    pub async fn submit_envelope(
        &mut self,
        envelope: CommandEnvelope,
    ) -> Result<SubmitOutcome, LinkError> {
        let id = envelope.id;
        let conn = self
            .connection
            .as_mut()
            .ok_or_else(|| LinkError::Handshake("not connected".to_string()))?;

        let result = async {
            write_frame(&mut conn.writer, &Frame::Command { envelope }).await?;
            loop {
                match read_frame(&mut conn.lines).await? {
                    Frame::Ack { id: acked } if acked == id => {
                        return Ok(SubmitOutcome::Accepted);
                    }
                    Frame::Reject {
                        id: rejected,
                        error_kind,
                        message,
                    } if rejected == id => {
                        return Ok(SubmitOutcome::Rejected {
                            error_kind,
                            message,
                        });
                    }
                    Frame::Telemetry { snapshot } => {
                        self.last_telemetry = Some(snapshot);
                    }
                    _ => {}
                }
            }
        }
        .await;
        if result.is_err() {
            self.connection = None;
        }
        result
    }

    /// Record a second factor for this session.
    pub async fn provide_second_factor(&mut self, assertion: &str) -> Result<(), LinkError> {
        let conn = self
            .connection
            .as_mut()
            .ok_or_else(|| LinkError::Handshake("not connected".to_string()))?;
        write_frame(&mut conn.writer, &Frame::Mfa {
            assertion: assertion.to_string(),
        })
        .await?;
        loop {
            match read_frame(&mut conn.lines).await? {
                Frame::MfaAccepted {} => return Ok(()),
                Frame::Telemetry { snapshot } => {
                    self.last_telemetry = Some(snapshot);
                }
                _ => {}
            }
        }
    }

    /// Replay the offline queue verbatim, oldest first.
    ///
    /// Returns `(accepted, rejected)` counts; the server rejects whatever
    /// has gone stale while offline.
    pub async fn flush_offline(&mut self) -> Result<(usize, usize), LinkError> {
        let Some(queue) = &mut self.queue else {
            return Ok((0, 0));
        };
        let entries = queue.drain()?;
        let mut accepted = 0;
        let mut rejected = 0;
        for entry in entries {
            match self.submit_envelope(entry.envelope).await? {
                SubmitOutcome::Accepted => accepted += 1,
                SubmitOutcome::Rejected { error_kind, .. } => {
                    warn!(kind = error_kind, "queued command rejected on replay");
                    rejected += 1;
                }
                SubmitOutcome::Queued => unreachable!("connected replay never queues"),
            }
        }
        info!(accepted, rejected, "offline queue flushed");
        Ok((accepted, rejected))
    }

    /// Read frames until the next telemetry push (test/monitor helper).
    pub async fn await_telemetry(&mut self) -> Result<TelemetrySnapshot, LinkError> {
        let conn = self
            .connection
            .as_mut()
            .ok_or_else(|| LinkError::Handshake("not connected".to_string()))?;
        loop {
            if let Frame::Telemetry { snapshot } = read_frame(&mut conn.lines).await? {
                self.last_telemetry = Some(snapshot.clone());
                return Ok(snapshot);
            }
        }
    }
}

async fn write_frame(writer: &mut OwnedWriteHalf, frame: &Frame) -> Result<(), LinkError> {
    let mut line = serde_json::to_string(frame)
        .map_err(|e| LinkError::InvalidFormat(format!("frame: {e}")))?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    Ok(())
}

async fn read_frame(
    lines: &mut tokio::io::Lines<BufReader<OwnedReadHalf>>,
) -> Result<Frame, LinkError> {
    let line = tokio::time::timeout(READ_TIMEOUT, lines.next_line())
        .await
        .map_err(|_| LinkError::Handshake("read timeout".to_string()))??
        .ok_or_else(|| LinkError::Handshake("connection closed".to_string()))?;
    serde_json::from_str(&line).map_err(|e| LinkError::InvalidFormat(format!("frame: {e}")))
}
