use crate::session::{InboundEvent, MessageEvent};

/// What the bot should do with an inbound event
#[derive(Debug, PartialEq)]
pub(crate) enum Classification {
    /// The session can't recover from this, the process must exit
    Fatal { event: &'static str },

    /// Worth a log record, nothing else
    Notice(Notice),

    /// Message that may be a request for a sticker
    Candidate(Box<MessageEvent>),

    Ignored,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Notice {
    /// Another client took over the device session
    StreamReplaced,

    /// Messages received while offline were delivered
    OfflineSyncCompleted { count: u64 },
}

pub(crate) fn classify(event: InboundEvent) -> Classification {
    let kind: &'static str = (&event).into();

    match event {
        InboundEvent::ConnectFailure { .. } | InboundEvent::ClientOutdated => {
            Classification::Fatal { event: kind }
        }
        InboundEvent::StreamReplaced => Classification::Notice(Notice::StreamReplaced),
        InboundEvent::OfflineSyncCompleted { count } => {
            Classification::Notice(Notice::OfflineSyncCompleted { count })
        }
        InboundEvent::Message(message) => Classification::Candidate(message),
        InboundEvent::Qr { .. } | InboundEvent::Connected { .. } | InboundEvent::Other => {
            Classification::Ignored
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_events() {
        assert_eq!(
            classify(InboundEvent::ConnectFailure {
                reason: Some("banned".to_owned())
            }),
            Classification::Fatal {
                event: "connect_failure"
            }
        );
        assert_eq!(
            classify(InboundEvent::ClientOutdated),
            Classification::Fatal {
                event: "client_outdated"
            }
        );
    }

    #[test]
    fn notices_and_ignored_events() {
        assert_eq!(
            classify(InboundEvent::StreamReplaced),
            Classification::Notice(Notice::StreamReplaced)
        );
        assert_eq!(
            classify(InboundEvent::OfflineSyncCompleted { count: 12 }),
            Classification::Notice(Notice::OfflineSyncCompleted { count: 12 })
        );
        assert_eq!(classify(InboundEvent::Other), Classification::Ignored);
        assert_eq!(
            classify(InboundEvent::Qr {
                code: "2@abc".to_owned()
            }),
            Classification::Ignored
        );
    }
}
