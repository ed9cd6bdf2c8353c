//! Wire frames for the link stream.
//!
//! Newline-delimited JSON, one frame per line, both directions.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use terra_common::types::command::CommandEnvelope;
use terra_common::types::motor::MotorStatus;
use terra_common::types::operation::OperationStatus;
use terra_common::types::pose::Pose;
use terra_common::types::safety::SafetyStatus;
use terra_common::types::status::ImplementsStatus;

use crate::cert::Certificate;

/// One frame on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Server → client, first frame of the handshake.
    ServerHello { certificate: Certificate },
    /// Client → server, second frame of the handshake.
    ClientHello { certificate: Certificate },
    /// Server → client on successful mutual verification.
    SessionGranted { token: String },
    /// Server → client on handshake failure; the connection closes after.
    HandshakeError { error_kind: String, message: String },
    /// Client → server: a signed command envelope.
    Command { envelope: CommandEnvelope },
    /// Server → client: command admitted and dispatched.
    Ack { id: Uuid },
    /// Server → client: command rejected.
    Reject {
        id: Uuid,
        error_kind: String,
        message: String,
    },
    /// Client → server: second-factor assertion for this session.
    Mfa { assertion: String },
    /// Server → client: second factor recorded.
    MfaAccepted {},
    /// Server → client: status push.
    Telemetry { snapshot: TelemetrySnapshot },
}

/// Aggregated status snapshot pushed to clients.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub safety: Option<SafetyStatus>,
    pub pose: Option<Pose>,
    pub motors: Option<MotorStatus>,
    pub implements: Option<ImplementsStatus>,
    pub operation: Option<OperationStatus>,
    /// Wall-clock serialization time [ms].
    pub timestamp_ms: u64,
}
