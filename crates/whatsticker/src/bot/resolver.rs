use super::CommandSet;
use crate::session::{MessageEvent, MEDIA_TYPE_IMAGE, MEDIA_TYPE_VIDEO};
use serde::Serialize;

/// Where the media to convert came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub(crate) enum Origin {
    /// The media was attached to the message with the trigger caption
    Direct,

    /// The message with the trigger text replied to a message with the media
    Quoted,
}

/// Message that carries the media to convert in its own image or video slot
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Target {
    pub(crate) event: MessageEvent,
    pub(crate) origin: Origin,
}

/// Decides whether the message is a request for a sticker and which media it
/// refers to. Returns `None` if the message isn't a request.
pub(crate) fn resolve(commands: &CommandSet, event: &MessageEvent) -> Option<Target> {
    let content = &event.message;

    let image_match = commands.matches(content.image_caption());
    let video_match = commands.matches(content.video_caption());

    let quoted = content.extended_text_message.as_ref().and_then(|extended| {
        let text = extended.text.as_deref().unwrap_or_default();
        let quoted = extended.quoted_message()?;
        let has_media = quoted.image_message.is_some() || quoted.video_message.is_some();
        (has_media && commands.matches(text)).then_some(quoted)
    });

    let Some(quoted) = quoted else {
        return (image_match || video_match).then(|| Target {
            event: event.clone(),
            origin: Origin::Direct,
        });
    };

    let mut effective = event.clone();

    // Quoted image wins over the quoted video if both are present. Animated
    // images are delivered as videos, so they take the video path.
    if let Some(image) = &quoted.image_message {
        effective.info.media_type = MEDIA_TYPE_IMAGE.to_owned();
        effective.message.image_message = Some(image.clone());
    } else if let Some(video) = &quoted.video_message {
        effective.info.media_type = MEDIA_TYPE_VIDEO.to_owned();
        effective.message.video_message = Some(video.clone());
    }

    Some(Target {
        event: effective,
        origin: Origin::Quoted,
    })
}
