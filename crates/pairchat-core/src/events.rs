//! Wire events exchanged with browser clients.
//!
//! Every frame is a JSON object `{"event": <name>, "data": <payload>}`;
//! payload-less events omit `data`. Relay payloads stay as raw
//! [`serde_json::Value`] and are never inspected on the way through.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::ConnectionId;

/// Display name shown for a partner that never set one.
pub const ANONYMOUS: &str = "Anonymous";

/// Events a client sends to the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "startChat")]
    StartChat,

    #[serde(rename = "endChat")]
    EndChat,

    #[serde(rename = "setUsername")]
    SetUsername(String),

    #[serde(rename = "chatMessage")]
    ChatMessage(Value),

    #[serde(rename = "mediaMessage")]
    MediaMessage(Value),

    #[serde(rename = "voiceMessage")]
    VoiceMessage(Value),

    #[serde(rename = "offer")]
    Offer(Value),

    #[serde(rename = "answer")]
    Answer(Value),

    #[serde(rename = "ice-candidate")]
    IceCandidate(Value),

    #[serde(rename = "toggle-video")]
    ToggleVideo(Value),

    #[serde(rename = "toggle-audio")]
    ToggleAudio(Value),

    #[serde(rename = "typing")]
    Typing,
}

impl ClientEvent {
    /// Wire name of the event, used for logging and metric labels.
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartChat => "startChat",
            Self::EndChat => "endChat",
            Self::SetUsername(_) => "setUsername",
            relay => relay.relay_kind().map_or("relay", RelayKind::as_str),
        }
    }

    /// The relay class of this event, or `None` for control events.
    pub fn relay_kind(&self) -> Option<RelayKind> {
        let kind = match self {
            Self::ChatMessage(_) => RelayKind::ChatMessage,
            Self::MediaMessage(_) => RelayKind::MediaMessage,
            Self::VoiceMessage(_) => RelayKind::VoiceMessage,
            Self::Offer(_) => RelayKind::Offer,
            Self::Answer(_) => RelayKind::Answer,
            Self::IceCandidate(_) => RelayKind::IceCandidate,
            Self::ToggleVideo(_) => RelayKind::ToggleVideo,
            Self::ToggleAudio(_) => RelayKind::ToggleAudio,
            Self::Typing => RelayKind::Typing,
            Self::StartChat | Self::EndChat | Self::SetUsername(_) => return None,
        };
        Some(kind)
    }

    pub fn is_relay(&self) -> bool {
        self.relay_kind().is_some()
    }

    /// Split relay-class events from control events. Control events come
    /// back unchanged in `Err`.
    pub fn into_relay(self) -> Result<RelayEvent, Self> {
        let Some(kind) = self.relay_kind() else {
            return Err(self);
        };
        let payload = match self {
            Self::ChatMessage(v)
            | Self::MediaMessage(v)
            | Self::VoiceMessage(v)
            | Self::Offer(v)
            | Self::Answer(v)
            | Self::IceCandidate(v)
            | Self::ToggleVideo(v)
            | Self::ToggleAudio(v) => Some(v),
            _ => None,
        };
        Ok(RelayEvent { kind, payload })
    }
}

/// Sent once to a freshly opened socket so the client knows its own id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub connection_id: ConnectionId,
}

/// Partner details sent with `chatStarted`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPartner {
    pub partner_id: ConnectionId,
    pub partner_username: String,
}

/// Events the server pushes to clients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "connected")]
    Connected(ConnectionInfo),

    #[serde(rename = "waiting")]
    Waiting,

    #[serde(rename = "chatStarted")]
    ChatStarted(ChatPartner),

    #[serde(rename = "chatEnded")]
    ChatEnded,

    #[serde(rename = "chatMessage")]
    ChatMessage(Value),

    #[serde(rename = "mediaMessage")]
    MediaMessage(Value),

    #[serde(rename = "voiceMessage")]
    VoiceMessage(Value),

    #[serde(rename = "offer")]
    Offer(Value),

    #[serde(rename = "answer")]
    Answer(Value),

    #[serde(rename = "ice-candidate")]
    IceCandidate(Value),

    #[serde(rename = "partner-video-toggle")]
    PartnerVideoToggle(Value),

    #[serde(rename = "partner-audio-toggle")]
    PartnerAudioToggle(Value),

    #[serde(rename = "typing")]
    Typing,

    #[serde(rename = "updateOnlineUsers")]
    UpdateOnlineUsers(usize),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected(_) => "connected",
            Self::Waiting => "waiting",
            Self::ChatStarted(_) => "chatStarted",
            Self::ChatEnded => "chatEnded",
            Self::ChatMessage(_) => "chatMessage",
            Self::MediaMessage(_) => "mediaMessage",
            Self::VoiceMessage(_) => "voiceMessage",
            Self::Offer(_) => "offer",
            Self::Answer(_) => "answer",
            Self::IceCandidate(_) => "ice-candidate",
            Self::PartnerVideoToggle(_) => "partner-video-toggle",
            Self::PartnerAudioToggle(_) => "partner-audio-toggle",
            Self::Typing => "typing",
            Self::UpdateOnlineUsers(_) => "updateOnlineUsers",
        }
    }
}

/// Kinds of opaque payloads forwarded between session partners.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RelayKind {
    ChatMessage,
    MediaMessage,
    VoiceMessage,
    Offer,
    Answer,
    IceCandidate,
    ToggleVideo,
    ToggleAudio,
    Typing,
}

impl RelayKind {
    /// Inbound wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ChatMessage => "chatMessage",
            Self::MediaMessage => "mediaMessage",
            Self::VoiceMessage => "voiceMessage",
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::IceCandidate => "ice-candidate",
            Self::ToggleVideo => "toggle-video",
            Self::ToggleAudio => "toggle-audio",
            Self::Typing => "typing",
        }
    }
}

/// A relay-class event detached from its sender.
#[derive(Clone, Debug, PartialEq)]
pub struct RelayEvent {
    pub kind: RelayKind,
    pub payload: Option<Value>,
}

impl RelayEvent {
    /// The event the partner receives. Payload passes through untouched;
    /// media toggles are renamed to their `partner-*` form.
    pub fn into_server_event(self) -> ServerEvent {
        let payload = self.payload.unwrap_or(Value::Null);
        match self.kind {
            RelayKind::ChatMessage => ServerEvent::ChatMessage(payload),
            RelayKind::MediaMessage => ServerEvent::MediaMessage(payload),
            RelayKind::VoiceMessage => ServerEvent::VoiceMessage(payload),
            RelayKind::Offer => ServerEvent::Offer(payload),
            RelayKind::Answer => ServerEvent::Answer(payload),
            RelayKind::IceCandidate => ServerEvent::IceCandidate(payload),
            RelayKind::ToggleVideo => ServerEvent::PartnerVideoToggle(payload),
            RelayKind::ToggleAudio => ServerEvent::PartnerAudioToggle(payload),
            RelayKind::Typing => ServerEvent::Typing,
        }
    }
}
