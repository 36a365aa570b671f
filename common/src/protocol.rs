use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value as JsonValue, json};
use thiserror::Error;

use crate::{LeaderboardSnapshot, PlayerScore};

/// Inbound live-channel message.
///
/// Two wire shapes exist and carry different semantics:
/// `{"type":"update_score","user_id":..,"points":..}` adds points, while
/// `{"action":"submit_score","player_id":..,"score":..}` replaces the score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    UpdateScore {
        player_id: String,
        points: i64,
    },
    SubmitScore {
        player_id: String,
        player_name: Option<String>,
        score: i64,
    },
    GetLeaderboard,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("message has no `type` or `action` field")]
    MissingKind,
    #[error("unknown message kind `{0}`")]
    UnknownKind(String),
    #[error("`type` says `{by_type}` but `action` says `{by_action}`")]
    ConflictingKind { by_type: String, by_action: String },
    #[error("`{kind}` must be sent in the `{field}` field")]
    WrongKindField { kind: String, field: &'static str },
    #[error("invalid `{kind}` message: {reason}")]
    InvalidFields { kind: &'static str, reason: String },
    #[error("player id must not be empty")]
    EmptyPlayerId,
}

#[derive(Deserialize)]
struct UpdateScoreFields {
    user_id: String,
    #[serde(deserialize_with = "integer")]
    points: i64,
}

#[derive(Deserialize)]
struct SubmitScoreFields {
    player_id: String,
    #[serde(default)]
    player_name: Option<String>,
    #[serde(deserialize_with = "integer")]
    score: i64,
}

// Score fields arrive as JSON integers from the live channel and as decimal
// strings from some form-encoded ingress paths.
fn integer<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IntOrString {
        Int(i64),
        Str(String),
    }

    match IntOrString::deserialize(deserializer)? {
        IntOrString::Int(value) => Ok(value),
        IntOrString::Str(text) => text
            .trim()
            .parse()
            .map_err(|_| D::Error::custom(format!("`{}` is not an integer", text))),
    }
}

fn require_player_id(player_id: String) -> Result<String, ProtocolError> {
    if player_id.trim().is_empty() {
        Err(ProtocolError::EmptyPlayerId)
    } else {
        Ok(player_id)
    }
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: JsonValue =
            serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;

        let by_type = value.get("type").and_then(JsonValue::as_str);
        let by_action = value.get("action").and_then(JsonValue::as_str);
        if let (Some(by_type), Some(by_action)) = (by_type, by_action) {
            if by_type != by_action {
                return Err(ProtocolError::ConflictingKind {
                    by_type: by_type.to_string(),
                    by_action: by_action.to_string(),
                });
            }
        }
        let kind = by_type
            .or(by_action)
            .ok_or(ProtocolError::MissingKind)?
            .to_string();

        // Additive updates arrive as `type`, absolute submits and reads as `action`.
        let field = match kind.as_str() {
            "update_score" => "type",
            "submit_score" | "get_leaderboard" => "action",
            _ => return Err(ProtocolError::UnknownKind(kind)),
        };
        if value.get(field).and_then(JsonValue::as_str) != Some(kind.as_str()) {
            return Err(ProtocolError::WrongKindField { kind, field });
        }

        match kind.as_str() {
            "update_score" => {
                let fields: UpdateScoreFields =
                    serde_json::from_value(value).map_err(|e| ProtocolError::InvalidFields {
                        kind: "update_score",
                        reason: e.to_string(),
                    })?;
                Ok(ClientMessage::UpdateScore {
                    player_id: require_player_id(fields.user_id)?,
                    points: fields.points,
                })
            }
            "submit_score" => {
                let fields: SubmitScoreFields =
                    serde_json::from_value(value).map_err(|e| ProtocolError::InvalidFields {
                        kind: "submit_score",
                        reason: e.to_string(),
                    })?;
                Ok(ClientMessage::SubmitScore {
                    player_id: require_player_id(fields.player_id)?,
                    player_name: fields.player_name,
                    score: fields.score,
                })
            }
            "get_leaderboard" => Ok(ClientMessage::GetLeaderboard),
            _ => Err(ProtocolError::UnknownKind(kind)),
        }
    }

    /// Encodes the message in the same wire shape `parse` accepts.
    pub fn to_json(&self) -> String {
        let value = match self {
            ClientMessage::UpdateScore { player_id, points } => json!({
                "type": "update_score",
                "user_id": player_id,
                "points": points,
            }),
            ClientMessage::SubmitScore {
                player_id,
                player_name,
                score,
            } => {
                let mut value = json!({
                    "action": "submit_score",
                    "player_id": player_id,
                    "score": score,
                });
                if let Some(name) = player_name {
                    value["player_name"] = json!(name);
                }
                value
            }
            ClientMessage::GetLeaderboard => json!({ "action": "get_leaderboard" }),
        };
        value.to_string()
    }
}

/// Outbound live-channel message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    LeaderboardUpdate {
        version: u64,
        data: Vec<PlayerScore>,
        timestamp: DateTime<Utc>,
    },
    /// The update was dropped; nothing was stored and the client may resend it.
    UpdateFailed {
        player_id: String,
        reason: String,
        attempts: u32,
    },
    /// The score is stored but the ranking refresh failed. The next refresh
    /// publishes it; resending would apply the update twice.
    UpdatePending {
        player_id: String,
        score: i64,
        reason: String,
    },
    Error {
        reason: String,
    },
}

impl ServerMessage {
    pub fn leaderboard(snapshot: &LeaderboardSnapshot) -> Self {
        ServerMessage::LeaderboardUpdate {
            version: snapshot.version,
            data: snapshot.entries.clone(),
            timestamp: Utc::now(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_additive_update() {
        let msg = ClientMessage::parse(r#"{"type":"update_score","user_id":"p2","points":7}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::UpdateScore {
                player_id: "p2".to_string(),
                points: 7
            }
        );
    }

    #[test]
    fn parses_absolute_submit_with_optional_name() {
        let named = ClientMessage::parse(
            r#"{"action":"submit_score","player_id":"p1","player_name":"Al","score":10}"#,
        )
        .unwrap();
        assert_eq!(
            named,
            ClientMessage::SubmitScore {
                player_id: "p1".to_string(),
                player_name: Some("Al".to_string()),
                score: 10
            }
        );

        let anonymous =
            ClientMessage::parse(r#"{"action":"submit_score","player_id":"p1","score":"-3"}"#).unwrap();
        assert_eq!(
            anonymous,
            ClientMessage::SubmitScore {
                player_id: "p1".to_string(),
                player_name: None,
                score: -3
            }
        );
    }

    #[test]
    fn rejects_malformed_messages() {
        assert!(matches!(
            ClientMessage::parse("not json"),
            Err(ProtocolError::InvalidJson(_))
        ));
        assert_eq!(
            ClientMessage::parse(r#"{"player_id":"p1"}"#),
            Err(ProtocolError::MissingKind)
        );
        assert_eq!(
            ClientMessage::parse(r#"{"action":"delete_everything"}"#),
            Err(ProtocolError::UnknownKind("delete_everything".to_string()))
        );
        assert!(matches!(
            ClientMessage::parse(r#"{"action":"submit_score","player_id":"p1"}"#),
            Err(ProtocolError::InvalidFields { kind: "submit_score", .. })
        ));
        assert!(matches!(
            ClientMessage::parse(r#"{"type":"update_score","user_id":"p1","points":1.5}"#),
            Err(ProtocolError::InvalidFields { kind: "update_score", .. })
        ));
        assert_eq!(
            ClientMessage::parse(r#"{"action":"submit_score","player_id":" ","score":1}"#),
            Err(ProtocolError::EmptyPlayerId)
        );
    }

    #[test]
    fn each_operation_is_bound_to_its_kind_field() {
        assert_eq!(
            ClientMessage::parse(r#"{"action":"update_score","user_id":"p1","points":1}"#),
            Err(ProtocolError::WrongKindField {
                kind: "update_score".to_string(),
                field: "type"
            })
        );
        assert_eq!(
            ClientMessage::parse(r#"{"type":"submit_score","player_id":"p1","score":1}"#),
            Err(ProtocolError::WrongKindField {
                kind: "submit_score".to_string(),
                field: "action"
            })
        );
        assert_eq!(
            ClientMessage::parse(r#"{"type":"update_score","action":"submit_score","user_id":"p1","points":1}"#),
            Err(ProtocolError::ConflictingKind {
                by_type: "update_score".to_string(),
                by_action: "submit_score".to_string()
            })
        );
        assert_eq!(
            ClientMessage::parse(r#"{"action":"get_leaderboard"}"#),
            Ok(ClientMessage::GetLeaderboard)
        );
    }

    #[test]
    fn update_pending_carries_stored_score() {
        let pending = ServerMessage::UpdatePending {
            player_id: "p1".to_string(),
            score: 10,
            reason: "refresh failed".to_string(),
        };
        let json: JsonValue = serde_json::from_str(&pending.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "update_pending");
        assert_eq!(json["score"], 10);
    }

    #[test]
    fn encoded_client_messages_parse_back() {
        let msg = ClientMessage::SubmitScore {
            player_id: "p9".to_string(),
            player_name: None,
            score: 40,
        };
        assert_eq!(ClientMessage::parse(&msg.to_json()).unwrap(), msg);
    }

    #[test]
    fn leaderboard_update_uses_type_tag() {
        let snapshot = LeaderboardSnapshot::empty();
        let json: JsonValue =
            serde_json::from_str(&ServerMessage::leaderboard(&snapshot).to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "leaderboard_update");
        assert_eq!(json["data"], json!([]));

        let failed = ServerMessage::UpdateFailed {
            player_id: "p1".to_string(),
            reason: "store unavailable".to_string(),
            attempts: 5,
        };
        let json: JsonValue = serde_json::from_str(&failed.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "update_failed");
        assert_eq!(json["attempts"], 5);
    }
}
