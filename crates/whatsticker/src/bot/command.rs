use std::collections::HashSet;

/// Captions that trigger the conversion of the media into a sticker
const TRIGGERS: &[&str] = &["stickerize", "stickerize deven96"];

/// Immutable set of normalized trigger captions
#[derive(Debug, Clone)]
pub(crate) struct CommandSet {
    commands: HashSet<String>,
}

impl Default for CommandSet {
    fn default() -> Self {
        Self::new(TRIGGERS.iter().copied())
    }
}

impl CommandSet {
    pub(crate) fn new<'a>(commands: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            commands: commands.into_iter().map(normalize).collect(),
        }
    }

    pub(crate) fn matches(&self, caption: &str) -> bool {
        self.commands.contains(&normalize(caption))
    }
}

fn normalize(caption: &str) -> String {
    caption.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_is_idempotent() {
        for caption in ["  StickeRize ", "stickerize deven96\n", "", "\tHELLO  world "] {
            let once = normalize(caption);
            assert_eq!(normalize(&once), once);
        }
    }

    #[test]
    fn matches_triggers() {
        let commands = CommandSet::default();

        for caption in [
            "stickerize",
            "Stickerize",
            "  STICKERIZE\t",
            "stickerize deven96",
            " Stickerize Deven96 ",
        ] {
            assert!(commands.matches(caption), "{caption:?}");
        }

        for caption in [
            "",
            "hello",
            "stickerize please",
            "stickerize  deven96",
            "sticker ize",
            "stickerized",
        ] {
            assert!(!commands.matches(caption), "{caption:?}");
        }
    }
}
