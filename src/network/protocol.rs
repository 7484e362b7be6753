//! Agent wire protocol (§6).
//!
//! Tagged JSON messages over a WebSocket transport. All named methods are
//! callable only server to client: `auth`, `is_ready`, `notify_start`,
//! `get_action`, `notify_end`, `notify_info`, `notify_error`. Requests that
//! expect a reply carry a correlation id so the transport can deliver
//! exactly-once request/response semantics over one shared socket; one-way
//! notifications carry none.

use serde::{Deserialize, Serialize};

/// A server-to-client request. `request_id` is echoed back by the matching
/// `ClientReply` variant for everything except the three one-way
/// notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerRequest {
    /// Challenge the client to authenticate with its token.
    Auth {
        /// Correlation id.
        request_id: u64,
    },
    /// Ask whether the agent wants to play another game.
    IsReady {
        /// Correlation id.
        request_id: u64,
    },
    /// One-way: a game has been found.
    NotifyStart {
        /// Newly created game id.
        game_id: String,
    },
    /// Ask the agent for its next action given an observation.
    GetAction {
        /// Correlation id.
        request_id: u64,
        /// Observation vector for the requesting player.
        observation: Vec<f64>,
    },
    /// One-way: the game has ended.
    NotifyEnd {
        /// Whether this player won.
        player_won: bool,
        /// Post-game summary statistics.
        stats: Vec<f64>,
    },
    /// One-way informational message.
    NotifyInfo {
        /// Human-readable message.
        message: String,
    },
    /// One-way error message.
    NotifyError {
        /// Human-readable message.
        message: String,
    },
}

/// A client-to-server reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientReply {
    /// Reply to `Auth`.
    AuthReply {
        /// Correlation id this answers.
        request_id: u64,
        /// The presented token.
        token: String,
    },
    /// Reply to `IsReady`.
    ReadyReply {
        /// Correlation id this answers.
        request_id: u64,
        /// Whether the agent wants to play.
        ready: bool,
    },
    /// Reply to `GetAction`.
    ActionReply {
        /// Correlation id this answers.
        request_id: u64,
        /// The chosen action vector.
        action: Vec<f64>,
    },
    /// Unsolicited error raised by the remote agent's handler
    /// (`RemoteAgentError`, §7). Carries no correlation id.
    Error {
        /// Human-readable message.
        message: String,
    },
}

impl ServerRequest {
    /// Serialize to a JSON string for sending over the socket.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl ClientReply {
    /// Parse a client's reply from a raw text frame.
    pub fn from_json(s: &str) -> serde_json::Result<ClientReply> {
        serde_json::from_str(s)
    }

    /// The correlation id this reply answers, if any.
    pub fn request_id(&self) -> Option<u64> {
        match self {
            ClientReply::AuthReply { request_id, .. } => Some(*request_id),
            ClientReply::ReadyReply { request_id, .. } => Some(*request_id),
            ClientReply::ActionReply { request_id, .. } => Some(*request_id),
            ClientReply::Error { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_action_round_trips() {
        let req = ServerRequest::GetAction {
            request_id: 7,
            observation: vec![1.0, 2.0, 3.0],
        };
        let json = req.to_json().unwrap();
        assert!(json.contains("\"type\":\"get_action\""));

        let reply = ClientReply::ActionReply {
            request_id: 7,
            action: vec![0.0, 1.0],
        };
        let json = serde_json::to_string(&reply).unwrap();
        let parsed = ClientReply::from_json(&json).unwrap();
        assert_eq!(parsed.request_id(), Some(7));
    }

    #[test]
    fn one_way_notifications_have_no_request_id() {
        let start = ServerRequest::NotifyStart {
            game_id: "g-1".into(),
        };
        let json = start.to_json().unwrap();
        assert!(!json.contains("request_id"));

        let err = ClientReply::Error {
            message: "boom".into(),
        };
        assert_eq!(err.request_id(), None);
    }

    #[test]
    fn malformed_reply_is_rejected() {
        assert!(ClientReply::from_json("{\"type\":\"not_a_real_variant\"}").is_err());
    }
}
