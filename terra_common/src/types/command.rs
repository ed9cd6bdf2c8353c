//! Operator commands and the signed wire envelope.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geometry::Vec3;

/// Implement addressed by a `control_implement` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImplementKind {
    Cutter,
    Loader,
    Transport,
}

/// Action requested on an implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImplementAction {
    Start,
    Stop,
    Engage,
    Release,
}

/// Partial runtime update of the safety envelope.
///
/// Absent fields leave the current value untouched; the receiver bounds-checks
/// every present field before applying.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SafetyLimits {
    pub max_speed_mps: Option<f64>,
    pub obstacle_safe_distance_m: Option<f64>,
    pub human_safe_distance_m: Option<f64>,
    pub max_incline_deg: Option<f64>,
}

/// Typed operator command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Command {
    Move {
        /// Ground speed [m/s], clamped by the motion controller.
        speed: f64,
        /// Heading, radians CCW from East.
        direction: f64,
    },
    Navigate {
        waypoints: Vec<Vec3>,
    },
    Stop {},
    EmergencyStop {
        reason: String,
    },
    SetBoundaries {
        points: Vec<Vec3>,
    },
    ResetEmergency {},
    ControlImplement {
        implement: ImplementKind,
        action: ImplementAction,
        #[serde(default)]
        params: serde_json::Value,
    },
    UpdateSafetyLimits {
        limits: SafetyLimits,
    },
    FirmwareUpdate {
        version: String,
    },
    Reset {},
    Calibrate {
        target: String,
    },
}

impl Command {
    /// Stable type name matching the wire `type` field.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Command::Move { .. } => "move",
            Command::Navigate { .. } => "navigate",
            Command::Stop {} => "stop",
            Command::EmergencyStop { .. } => "emergency_stop",
            Command::SetBoundaries { .. } => "set_boundaries",
            Command::ResetEmergency {} => "reset_emergency",
            Command::ControlImplement { .. } => "control_implement",
            Command::UpdateSafetyLimits { .. } => "update_safety_limits",
            Command::FirmwareUpdate { .. } => "firmware_update",
            Command::Reset {} => "reset",
            Command::Calibrate { .. } => "calibrate",
        }
    }

    /// Critical commands require a recorded second factor and are never
    /// queued offline.
    pub const fn is_critical(&self) -> bool {
        matches!(
            self,
            Command::EmergencyStop { .. }
                | Command::FirmwareUpdate { .. }
                | Command::Reset {}
                | Command::Calibrate { .. }
        )
    }
}

/// Signed wire envelope of a single command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    /// 128-bit unique command id.
    pub id: Uuid,
    #[serde(flatten)]
    pub command: Command,
    /// Wall-clock issue time [ms since epoch].
    pub timestamp_ms: u64,
    /// Hex HMAC-SHA256 over [`CommandEnvelope::signable_bytes`].
    pub signature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

impl CommandEnvelope {
    /// Canonical byte string covered by the signature.
    ///
    /// `serde_json` object keys serialize in sorted order, so the payload
    /// rendering is deterministic on both ends of the link.
    pub fn signable_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        let body = serde_json::to_value(&self.command)?;
        let nonce = self.nonce.as_deref().unwrap_or("");
        Ok(format!("{}|{}|{}|{}", self.id, self.timestamp_ms, nonce, body).into_bytes())
    }
}
