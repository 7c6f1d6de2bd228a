use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events sent from server to client over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, username: String },

    /// The server accepted a room join
    RoomJoined { chat_id: Uuid },

    /// A new message was posted in a chat the client has joined
    MessageCreate {
        id: Uuid,
        chat_id: Uuid,
        sender_id: Uuid,
        sender_username: String,
        content: String,
        sent_at: chrono::DateTime<chrono::Utc>,
    },

    /// A participant started or stopped typing
    Typing {
        chat_id: Uuid,
        user_id: Uuid,
        is_typing: bool,
    },

    /// A message the client sent was read by its recipient
    MessageRead { message_id: Uuid, chat_id: Uuid },

    /// A reciprocal like completed — a new match and its chat exist
    MatchCreated {
        match_id: Uuid,
        chat_id: Uuid,
        other_user_id: Uuid,
        other_username: String,
    },

    /// The other participant ended the match; the chat is gone
    Unmatched { match_id: Uuid },

    /// A room participant came online or went offline
    PresenceUpdate {
        chat_id: Uuid,
        user_id: Uuid,
        online: bool,
    },

    /// Call signaling relayed from a peer
    CallSignal {
        from_user_id: Uuid,
        signal: CallSignalPayload,
    },

    /// A peer hung up
    CallEnded { from_user_id: Uuid },

    /// A command the client sent could not be processed
    Error { message: String },
}

/// Commands sent from client to server over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Join a chat room; only match participants are admitted
    JoinRoom { chat_id: Uuid },

    /// Leave a chat room
    LeaveRoom { chat_id: Uuid },

    /// Persist a message and relay it to the room
    SendMessage { chat_id: Uuid, content: String },

    /// Typing indicator, relayed without persistence
    Typing { chat_id: Uuid, is_typing: bool },

    /// Mark a received message as read; the sender is told
    MarkRead { message_id: Uuid },

    /// Send call signaling to a specific peer
    CallSignal {
        target_user_id: Uuid,
        signal: CallSignalPayload,
    },

    /// Hang up on a specific peer
    EndCall { target_user_id: Uuid },
}

/// WebRTC signaling payload relayed between peers. The server never
/// inspects the SDP or candidate contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "signal_type")]
pub enum CallSignalPayload {
    Offer { sdp: String },
    Answer { sdp: String },
    IceCandidate {
        candidate: String,
        sdp_mid: Option<String>,
        sdp_m_line_index: Option<u16>,
    },
}
