//! Wire command model.
//!
//! Every frame on the wire is one JSON-encoded [`Command`]. Absent fields
//! are omitted entirely, so the common commands stay small. The serial
//! field is serialized under the short key `i`; it is what correlates a
//! reply with its request.

use serde::{Deserialize, Serialize};

use crate::core::TetherResult;

use super::handshake::Signature;

/// Top-level command discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Session lifecycle (open, close).
    Session,

    /// Presence queries and their results.
    Presence,

    /// Application payload addressed to a session.
    Direct,

    /// Bare acknowledgement.
    Ack,

    /// Liveness probe; replies echo the serial.
    Echo,

    /// Request rejection carrying an [`ErrorPayload`].
    Error,

    /// Any kind this build does not know about.
    #[serde(other)]
    Unknown,
}

/// Sub-operation within a command kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    /// Request to establish a session.
    Open,

    /// Session established.
    Opened,

    /// Presence lookup request.
    Query,

    /// Presence lookup result.
    QueryResult,

    /// Request to end a session.
    Close,

    /// Session ended.
    Closed,
}

/// Session handshake payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPayload {
    /// Present and true when re-establishing after a reconnect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect: Option<bool>,

    /// Client capability string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<String>,

    /// Authentication signature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,

    /// Millisecond timestamp the signature was produced at.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,

    /// Signature nonce.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

/// Presence payload for queries and results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresencePayload {
    /// Identities being queried.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<String>>,

    /// Subset of the queried identities currently online.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub online: Option<Vec<String>>,
}

/// Rejection details attached to [`CommandKind::Error`] commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Application error code.
    pub code: i32,

    /// Human-readable reason.
    pub reason: String,
}

/// One protocol command, request or reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Command discriminator.
    pub cmd: CommandKind,

    /// Sub-operation, where the kind has any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub op: Option<OpKind>,

    /// Application the command belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,

    /// Destination or origin session identity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<String>,

    /// Correlation serial; absent on unsolicited commands.
    #[serde(rename = "i", skip_serializing_if = "Option::is_none")]
    pub serial: Option<u32>,

    /// Session handshake payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionPayload>,

    /// Presence payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence: Option<PresencePayload>,

    /// Rejection details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,

    /// Opaque application payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl Command {
    /// A bare command of the given kind.
    pub fn new(cmd: CommandKind) -> Self {
        Self {
            cmd,
            op: None,
            app_id: None,
            peer_id: None,
            serial: None,
            session: None,
            presence: None,
            error: None,
            payload: None,
        }
    }

    /// A session-open request.
    pub fn session_open(
        peer_id: Option<String>,
        capabilities: String,
        reconnect: bool,
        signature: Option<Signature>,
    ) -> Self {
        let mut session = SessionPayload {
            reconnect: if reconnect { Some(true) } else { None },
            capabilities: Some(capabilities),
            ..SessionPayload::default()
        };
        if let Some(sig) = signature {
            session.signature = Some(sig.signature);
            session.timestamp = Some(sig.timestamp);
            session.nonce = Some(sig.nonce);
        }
        Self {
            op: Some(OpKind::Open),
            peer_id,
            session: Some(session),
            ..Self::new(CommandKind::Session)
        }
    }

    /// A liveness probe.
    pub fn echo() -> Self {
        Self::new(CommandKind::Echo)
    }

    /// The reply to a liveness probe carrying the probe's serial.
    pub fn echo_reply(serial: u32) -> Self {
        Self {
            serial: Some(serial),
            ..Self::new(CommandKind::Echo)
        }
    }

    /// A presence query for the given identities.
    pub fn presence_query(targets: Vec<String>) -> Self {
        Self {
            op: Some(OpKind::Query),
            presence: Some(PresencePayload {
                targets: Some(targets),
                online: None,
            }),
            ..Self::new(CommandKind::Presence)
        }
    }

    /// An application payload addressed to `peer_id`.
    pub fn direct(peer_id: Option<String>, payload: serde_json::Value) -> Self {
        Self {
            peer_id,
            payload: Some(payload),
            ..Self::new(CommandKind::Direct)
        }
    }

    /// Serialize for the wire.
    pub fn encode(&self) -> TetherResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a wire frame.
    pub fn decode(bytes: &[u8]) -> TetherResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
