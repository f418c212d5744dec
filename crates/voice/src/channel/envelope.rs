//! Relay wire envelopes
//!
//! Every relayed message is a JSON object `{Type, Payload, Sender, Target, RoomId}`.
//! The relay itself writes lowercase keys, so both spellings are accepted on the
//! way in. The handshake sent right after the socket opens is the exception: it
//! is the bare `{username, roomId, connectionId}` object.

use crate::types::{IceCandidate, PeerId, RosterEntry, SessionDescription};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const USER_LIST_UPDATE: &str = "user_list_update";
pub const PLAYER_SYNC: &str = "player_sync";
pub const WEBRTC_OFFER: &str = "webrtc-offer";
pub const WEBRTC_ANSWER: &str = "webrtc-answer";
pub const WEBRTC_ICE_CANDIDATE: &str = "webrtc-ice-candidate";

/// Handshake announcing the local client to the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitMessage {
    pub username: String,
    pub room_id: String,
    pub connection_id: PeerId,
}

impl InitMessage {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Closed set of relayed messages
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    /// Room membership snapshot, usually written by the relay itself
    PresenceUpdate {
        sender: Option<PeerId>,
        room_id: String,
        entries: Vec<RosterEntry>,
    },
    /// Player command, opaque to the orchestrator
    PlayerSync {
        sender: Option<PeerId>,
        room_id: String,
        command: Value,
    },
    SignalOffer {
        sender: PeerId,
        target: PeerId,
        room_id: String,
        description: SessionDescription,
    },
    SignalAnswer {
        sender: PeerId,
        target: PeerId,
        room_id: String,
        description: SessionDescription,
    },
    SignalIce {
        sender: PeerId,
        target: PeerId,
        room_id: String,
        candidate: IceCandidate,
    },
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "Type", alias = "type", default)]
    kind: Option<String>,
    #[serde(rename = "Payload", alias = "payload", default)]
    payload: Value,
    #[serde(rename = "Sender", alias = "sender", default)]
    sender: Option<PeerId>,
    #[serde(rename = "Target", alias = "target", default)]
    target: Option<PeerId>,
    #[serde(rename = "RoomId", alias = "roomId", default)]
    room_id: Option<String>,
}

#[derive(Serialize)]
struct OutboundEnvelope<'a> {
    #[serde(rename = "Type")]
    kind: &'a str,
    #[serde(rename = "Payload")]
    payload: Value,
    #[serde(rename = "Sender", skip_serializing_if = "Option::is_none")]
    sender: Option<&'a str>,
    #[serde(rename = "Target", skip_serializing_if = "Option::is_none")]
    target: Option<&'a str>,
    #[serde(rename = "RoomId")]
    room_id: &'a str,
}

#[derive(Debug, Serialize, Deserialize)]
struct UserListPayload {
    #[serde(rename = "Users", alias = "users")]
    users: Vec<RosterEntry>,
}

fn payload<T: serde::de::DeserializeOwned>(kind: &str, value: Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| Error::MalformedEnvelope(format!("invalid {} payload: {}", kind, e)))
}

fn required(field: Option<PeerId>, name: &str, kind: &str) -> Result<PeerId> {
    field
        .filter(|value| !value.is_empty())
        .ok_or_else(|| Error::MalformedEnvelope(format!("{} without {}", kind, name)))
}

impl ControlMessage {
    /// Parse one inbound text frame
    pub fn decode(text: &str) -> Result<Self> {
        let raw: RawEnvelope = serde_json::from_str(text)
            .map_err(|e| Error::MalformedEnvelope(format!("not an envelope: {}", e)))?;

        let kind = raw
            .kind
            .ok_or_else(|| Error::MalformedEnvelope("missing Type".to_string()))?;
        let room_id = raw.room_id.unwrap_or_default();

        match kind.as_str() {
            USER_LIST_UPDATE => {
                let list: UserListPayload = payload(&kind, raw.payload)?;
                Ok(ControlMessage::PresenceUpdate {
                    sender: raw.sender,
                    room_id,
                    entries: list.users,
                })
            }
            PLAYER_SYNC => Ok(ControlMessage::PlayerSync {
                sender: raw.sender,
                room_id,
                command: raw.payload,
            }),
            WEBRTC_OFFER | WEBRTC_ANSWER => {
                let sender = required(raw.sender, "Sender", &kind)?;
                let target = required(raw.target, "Target", &kind)?;
                let description: SessionDescription = payload(&kind, raw.payload)?;
                if kind == WEBRTC_OFFER {
                    Ok(ControlMessage::SignalOffer {
                        sender,
                        target,
                        room_id,
                        description,
                    })
                } else {
                    Ok(ControlMessage::SignalAnswer {
                        sender,
                        target,
                        room_id,
                        description,
                    })
                }
            }
            WEBRTC_ICE_CANDIDATE => {
                let sender = required(raw.sender, "Sender", &kind)?;
                let target = required(raw.target, "Target", &kind)?;
                let candidate: IceCandidate = payload(&kind, raw.payload)?;
                Ok(ControlMessage::SignalIce {
                    sender,
                    target,
                    room_id,
                    candidate,
                })
            }
            other => Err(Error::MalformedEnvelope(format!(
                "unknown message type: {}",
                other
            ))),
        }
    }

    /// Serialize for the relay; `Target` is only written for signaling messages
    pub fn encode(&self) -> Result<String> {
        let envelope = match self {
            ControlMessage::PresenceUpdate {
                sender,
                room_id,
                entries,
            } => OutboundEnvelope {
                kind: USER_LIST_UPDATE,
                payload: serde_json::to_value(UserListPayload {
                    users: entries.clone(),
                })?,
                sender: sender.as_deref(),
                target: None,
                room_id,
            },
            ControlMessage::PlayerSync {
                sender,
                room_id,
                command,
            } => OutboundEnvelope {
                kind: PLAYER_SYNC,
                payload: command.clone(),
                sender: sender.as_deref(),
                target: None,
                room_id,
            },
            ControlMessage::SignalOffer {
                sender,
                target,
                room_id,
                description,
            }
            | ControlMessage::SignalAnswer {
                sender,
                target,
                room_id,
                description,
            } => OutboundEnvelope {
                kind: self.kind(),
                payload: serde_json::to_value(description)?,
                sender: Some(sender.as_str()),
                target: Some(target.as_str()),
                room_id,
            },
            ControlMessage::SignalIce {
                sender,
                target,
                room_id,
                candidate,
            } => OutboundEnvelope {
                kind: WEBRTC_ICE_CANDIDATE,
                payload: serde_json::to_value(candidate)?,
                sender: Some(sender.as_str()),
                target: Some(target.as_str()),
                room_id,
            },
        };

        Ok(serde_json::to_string(&envelope)?)
    }

    /// Wire discriminant
    pub fn kind(&self) -> &'static str {
        match self {
            ControlMessage::PresenceUpdate { .. } => USER_LIST_UPDATE,
            ControlMessage::PlayerSync { .. } => PLAYER_SYNC,
            ControlMessage::SignalOffer { .. } => WEBRTC_OFFER,
            ControlMessage::SignalAnswer { .. } => WEBRTC_ANSWER,
            ControlMessage::SignalIce { .. } => WEBRTC_ICE_CANDIDATE,
        }
    }

    pub fn sender(&self) -> Option<&str> {
        match self {
            ControlMessage::PresenceUpdate { sender, .. }
            | ControlMessage::PlayerSync { sender, .. } => sender.as_deref(),
            ControlMessage::SignalOffer { sender, .. }
            | ControlMessage::SignalAnswer { sender, .. }
            | ControlMessage::SignalIce { sender, .. } => Some(sender.as_str()),
        }
    }

    /// Addressee of a signaling message, `None` for broadcasts
    pub fn target(&self) -> Option<&str> {
        match self {
            ControlMessage::SignalOffer { target, .. }
            | ControlMessage::SignalAnswer { target, .. }
            | ControlMessage::SignalIce { target, .. } => Some(target.as_str()),
            _ => None,
        }
    }
}
