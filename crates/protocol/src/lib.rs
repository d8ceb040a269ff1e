//! Capsheet Wire Protocol — v1 Frozen Wire Format
//!
//! This crate defines the canonical protocol types for client ↔ daemon
//! communication. The wire format is JSONL (newline-delimited JSON) over
//! TCP localhost.
//!
//! # Protocol Version
//!
//! This is **protocol v1** — the wire format is frozen. Changes require a
//! version bump in PROTOCOL_VERSION and backward compatibility handling.
//!
//! # Usage
//!
//! ```ignore
//! use capsheet_protocol::{ClientMessage, ServerMessage, PROTOCOL_VERSION};
//!
//! // Serialize a client message
//! let msg = ClientMessage::Ping(PingMessage { id: "1".into() });
//! let json = serde_json::to_string(&msg)?;
//!
//! // Deserialize a server message
//! let response: ServerMessage = serde_json::from_str(&line)?;
//! ```

use serde::{Deserialize, Serialize};

/// Current protocol version. Increment for breaking changes.
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum size of a single JSONL message in bytes (1 MiB).
/// Connections sending larger messages are closed.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

// =============================================================================
// Action Operations
// =============================================================================

/// What an operation does to its target range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    /// Write a rectangular grid of literal values.
    Write,
    /// Write a formula string (starts with `=`).
    Formula,
    /// Set a fill color (name or hex code).
    Color,
}

/// One atomic spreadsheet edit instruction.
///
/// Exactly one of `values` / `formula` / `color` is meaningful for a given
/// `kind`; the others are `None` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOp {
    /// Unique within one batch (e.g., "op-1", "op-2").
    pub id: String,
    /// Target range in A1 notation (e.g., "E2", "E4:H9").
    pub range: String,
    /// Generative models frequently emit the legacy field name `type`;
    /// accept it on input, always emit `kind`.
    #[serde(alias = "type")]
    pub kind: OpKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<Vec<serde_json::Value>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl ActionOp {
    /// A write op carrying a single cell value.
    pub fn write_cell(id: String, range: String, value: serde_json::Value, note: &str) -> Self {
        ActionOp {
            id,
            range,
            kind: OpKind::Write,
            values: Some(vec![vec![value]]),
            formula: None,
            color: None,
            note: Some(note.to_string()),
        }
    }

    /// A formula op for a single cell.
    pub fn formula_cell(id: String, range: String, formula: String, note: &str) -> Self {
        ActionOp {
            id,
            range,
            kind: OpKind::Formula,
            values: None,
            formula: Some(formula),
            color: None,
            note: Some(note.to_string()),
        }
    }
}

// =============================================================================
// Client → Server Messages
// =============================================================================

/// Messages sent from client to the capsheet daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Hello(HelloMessage),
    Chat(ChatMessage),
    SubmitPlan(SubmitPlanMessage),
    PollPlan(PollPlanMessage),
    CustomPlan(CustomPlanMessage),
    Ping(PingMessage),
}

/// Initial handshake from client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloMessage {
    pub id: String,
    pub client: String,
    pub version: String,
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u32,
}

fn default_protocol_version() -> u32 {
    1
}

/// One conversational turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    /// Omitted or unknown id creates a fresh session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub message: String,
}

/// The four round parameters, as collected by the dialog.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlotValues {
    #[serde(rename = "roundType")]
    pub round_type: Option<String>,
    pub amount: Option<String>,
    #[serde(rename = "preMoney")]
    pub pre_money: Option<String>,
    #[serde(rename = "poolPct")]
    pub pool_pct: Option<String>,
}

impl SlotValues {
    pub fn all_filled(&self) -> bool {
        self.round_type.is_some()
            && self.amount.is_some()
            && self.pre_money.is_some()
            && self.pool_pct.is_some()
    }
}

/// Request an asynchronous cap-table plan build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitPlanMessage {
    pub id: String,
    pub slots: SlotValues,
    /// Sheet contents as display strings, row-major.
    pub sheet: Vec<Vec<String>>,
    /// The user's selected input range in A1 notation (sheet prefix allowed).
    pub selected_range: String,
}

/// Poll an in-flight plan job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollPlanMessage {
    pub id: String,
    pub task_id: String,
}

/// Synchronous free-text plan: the oracle emits ops directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomPlanMessage {
    pub id: String,
    pub prompt: String,
    pub sheet: Vec<Vec<String>>,
}

/// Ping for keepalive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingMessage {
    pub id: String,
}

// =============================================================================
// Server → Client Messages
// =============================================================================

/// Messages sent from the daemon to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome(WelcomeMessage),
    ChatResult(ChatResultMessage),
    PlanAccepted(PlanAcceptedMessage),
    PlanStatus(PlanStatusMessage),
    CustomPlanResult(CustomPlanResultMessage),
    Pong(PongMessage),
    Error(ErrorMessage),
}

/// Welcome response after successful hello.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WelcomeMessage {
    pub id: String,
    pub protocol_version: u32,
    pub capabilities: Vec<String>,
}

/// Result of one chat turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResultMessage {
    pub id: String,
    pub session_id: String,
    /// The next dialog question or completion message (collecting mode).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slots_filled: Option<SlotValues>,
    /// True once all four slots are known.
    #[serde(default)]
    pub ready: bool,
    /// Ops emitted by the direct-command path (idle mode).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direct_ops: Option<Vec<ActionOp>>,
    /// Informational note (e.g., "nothing understood").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Acknowledgement that a plan job was queued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanAcceptedMessage {
    pub id: String,
    pub task_id: String,
}

/// Lifecycle state of a plan job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Processing,
    Completed,
    Failed,
}

/// Compiled plan ops plus recovery/validation diagnostics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanResult {
    pub ops: Vec<ActionOp>,
    #[serde(default)]
    pub diagnostics: Vec<String>,
}

/// Result of polling a plan job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStatusMessage {
    pub id: String,
    pub task_id: String,
    pub status: PlanStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<PlanResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of a synchronous custom plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomPlanResultMessage {
    pub id: String,
    pub ops: Vec<ActionOp>,
    #[serde(default)]
    pub diagnostics: Vec<String>,
}

/// Pong response to ping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PongMessage {
    pub id: String,
}

/// Error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Request ID (if available).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Error code (e.g., "bad_range", "oracle_unavailable").
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

/// Protocol error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// Unsupported protocol version.
    ProtocolMismatch,
    /// Selected range address does not parse.
    BadRange,
    /// The generative backend is unreachable or not configured.
    OracleUnavailable,
    /// The generative backend returned an API error.
    OracleError,
    /// Unknown task id in a poll request.
    UnknownTask,
    /// Message too large.
    MessageTooLarge,
    /// Malformed JSON.
    MalformedMessage,
    /// Unknown error.
    InternalError,
}

impl ProtocolError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::ProtocolMismatch => "protocol_mismatch",
            Self::BadRange => "bad_range",
            Self::OracleUnavailable => "oracle_unavailable",
            Self::OracleError => "oracle_error",
            Self::UnknownTask => "unknown_task",
            Self::MessageTooLarge => "message_too_large",
            Self::MalformedMessage => "malformed_message",
            Self::InternalError => "internal_error",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::ProtocolMismatch => "Unsupported protocol version",
            Self::BadRange => "Selected range address is not valid A1 notation",
            Self::OracleUnavailable => "Oracle backend is unreachable or not configured",
            Self::OracleError => "Oracle backend returned an error",
            Self::UnknownTask => "No plan job with that task id",
            Self::MessageTooLarge => "Message exceeds maximum size",
            Self::MalformedMessage => "Malformed JSON message",
            Self::InternalError => "Internal server error",
        }
    }

    pub fn to_error_message(&self, id: Option<String>) -> ErrorMessage {
        ErrorMessage {
            id,
            code: self.code().to_string(),
            message: self.message().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_serialization() {
        let msg = ClientMessage::Hello(HelloMessage {
            id: "1".to_string(),
            client: "test-client".to_string(),
            version: "1.0.0".to_string(),
            protocol_version: 1,
        });

        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"hello""#));

        let parsed: ClientMessage = serde_json::from_str(&json).unwrap();
        if let ClientMessage::Hello(h) = parsed {
            assert_eq!(h.client, "test-client");
        } else {
            panic!("Expected Hello message");
        }
    }

    #[test]
    fn test_action_op_serialization() {
        let op = ActionOp::write_cell(
            "op-1".to_string(),
            "E2".to_string(),
            serde_json::json!("Round Type"),
            "Echo round input",
        );

        let json = serde_json::to_string(&op).unwrap();
        assert!(json.contains(r#""kind":"write""#));
        assert!(!json.contains("formula"));

        let parsed: ActionOp = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.kind, OpKind::Write);
        assert_eq!(parsed.values.unwrap()[0][0], serde_json::json!("Round Type"));
    }

    #[test]
    fn test_action_op_accepts_legacy_type_field() {
        let json = r#"{"id":"direct-op-1","range":"A6","type":"formula","formula":"=SUM(A1:A5)"}"#;
        let parsed: ActionOp = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.kind, OpKind::Formula);
        assert_eq!(parsed.formula.as_deref(), Some("=SUM(A1:A5)"));
        assert!(parsed.values.is_none());
    }

    #[test]
    fn test_slot_values_wire_names() {
        let slots = SlotValues {
            round_type: Some("Series A".to_string()),
            amount: Some("5000000".to_string()),
            pre_money: None,
            pool_pct: None,
        };

        let json = serde_json::to_string(&slots).unwrap();
        assert!(json.contains(r#""roundType":"Series A""#));
        assert!(json.contains(r#""preMoney":null"#));
        assert!(!slots.all_filled());
    }

    #[test]
    fn test_chat_message_optional_session() {
        let json = r#"{"type":"chat","id":"c1","message":"hello"}"#;
        let parsed: ClientMessage = serde_json::from_str(json).unwrap();
        if let ClientMessage::Chat(c) = parsed {
            assert!(c.session_id.is_none());
            assert_eq!(c.message, "hello");
        } else {
            panic!("Expected Chat message");
        }
    }

    #[test]
    fn test_plan_status_serialization() {
        let msg = ServerMessage::PlanStatus(PlanStatusMessage {
            id: "p1".to_string(),
            task_id: "task-1".to_string(),
            status: PlanStatus::Completed,
            result: Some(PlanResult {
                ops: vec![],
                diagnostics: vec!["row 3 skipped: no name".to_string()],
            }),
            error: None,
        });

        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""status":"completed""#));

        let parsed: ServerMessage = serde_json::from_str(&json).unwrap();
        if let ServerMessage::PlanStatus(p) = parsed {
            assert_eq!(p.status, PlanStatus::Completed);
            assert_eq!(p.result.unwrap().diagnostics.len(), 1);
        } else {
            panic!("Expected PlanStatus message");
        }
    }

    #[test]
    fn test_error_codes_stable() {
        assert_eq!(ProtocolError::BadRange.code(), "bad_range");
        assert_eq!(ProtocolError::OracleUnavailable.code(), "oracle_unavailable");
        let err = ProtocolError::MalformedMessage.to_error_message(None);
        assert_eq!(err.code, "malformed_message");
        assert!(err.id.is_none());
    }
}
