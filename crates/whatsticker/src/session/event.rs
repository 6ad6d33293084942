//! Typed events emitted by the protocol session.

use chrono::prelude::*;
use serde::{Deserialize, Serialize};

pub(crate) const MEDIA_TYPE_IMAGE: &str = "image";
pub(crate) const MEDIA_TYPE_VIDEO: &str = "video";

/// Notification delivered by the session layer. Only a handful of variants
/// are meaningful for the bot, the rest are ignored.
#[derive(Debug, Clone, PartialEq, Deserialize, strum::IntoStaticStr)]
#[serde(tag = "type", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub(crate) enum InboundEvent {
    /// The server refused the connection
    ConnectFailure {
        #[serde(default)]
        reason: Option<String>,
    },

    /// The server considers the client version too old to connect
    ClientOutdated,

    /// Another client connected with the same device session
    StreamReplaced,

    /// All messages sent while the client was offline were received
    OfflineSyncCompleted {
        #[serde(default)]
        count: u64,
    },

    Message(Box<MessageEvent>),

    /// Pairing QR code that needs to be scanned to log in
    Qr { code: String },

    /// The session is connected and logged in
    Connected {
        #[serde(default)]
        device_id: Option<String>,
    },

    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct MessageEvent {
    pub(crate) info: MessageInfo,
    pub(crate) message: MessageContent,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct MessageInfo {
    pub(crate) id: String,
    pub(crate) chat: String,
    pub(crate) sender: String,

    #[serde(default)]
    pub(crate) push_name: String,

    #[serde(default)]
    pub(crate) is_from_me: bool,

    #[serde(default)]
    pub(crate) is_group: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) timestamp: Option<DateTime<Utc>>,

    /// Kind of the media attached to the message e.g. `image` or `video`
    #[serde(default)]
    pub(crate) media_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct MessageContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) conversation: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) image_message: Option<ImageMessage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) video_message: Option<VideoMessage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) extended_text_message: Option<ExtendedTextMessage>,
}

/// Reference to the media blob. The blob itself lives on the media servers
/// of the messaging service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct MediaRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) direct_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) media_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) mimetype: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) file_length: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ImageMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) caption: Option<String>,

    #[serde(flatten)]
    pub(crate) media: MediaRef,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct VideoMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) caption: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) seconds: Option<u32>,

    /// Animated images (GIFs) are delivered as videos with this flag set
    #[serde(default)]
    pub(crate) gif_playback: bool,

    #[serde(flatten)]
    pub(crate) media: MediaRef,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct ExtendedTextMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) context_info: Option<ContextInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct ContextInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) stanza_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) participant: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) quoted_message: Option<Box<MessageContent>>,
}

impl MessageContent {
    pub(crate) fn image_caption(&self) -> &str {
        self.image_message
            .as_ref()
            .and_then(|image| image.caption.as_deref())
            .unwrap_or_default()
    }

    pub(crate) fn video_caption(&self) -> &str {
        self.video_message
            .as_ref()
            .and_then(|video| video.caption.as_deref())
            .unwrap_or_default()
    }
}

impl ExtendedTextMessage {
    pub(crate) fn quoted_message(&self) -> Option<&MessageContent> {
        self.context_info.as_ref()?.quoted_message.as_deref()
    }
}
