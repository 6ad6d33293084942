use crate::observability::LogLevel;
use crate::{bot, logger, queue, session};
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Command line flags of the bot process
#[derive(clap::Parser, Debug)]
#[command(version, about = "Turns captioned images and videos into stickers")]
pub struct BotArgs {
    /// Verbosity of the logs, overridden by `WHATSTICKER_LOG` env var
    #[arg(long, value_enum, default_value_t, ignore_case = true, env = "LOG_LEVEL")]
    pub log_level: LogLevel,

    /// Quote the original message when replying with the sticker
    #[arg(long)]
    pub reply_to: bool,
}

pub struct BotConfig {
    pub(crate) log_level: LogLevel,
    pub(crate) reply_to: bool,
    pub(crate) bot: bot::Config,
    pub(crate) worker: bot::WorkerConfig,
    pub(crate) session: session::Config,
    pub(crate) queue: queue::Config,
    pub metrics: MetricsConfig,
}

impl BotConfig {
    pub fn load_or_panic(args: &BotArgs) -> Self {
        Self {
            log_level: args.log_level,
            reply_to: args.reply_to,
            bot: from_env_or_panic("BOT_"),
            worker: from_env_or_panic("CONVERT_"),
            session: from_env_or_panic("SESSION_"),
            queue: from_env_or_panic(""),
            metrics: from_env_or_panic("METRICS_"),
        }
    }
}

pub struct LoggerConfig {
    pub(crate) logger: logger::Config,
    pub(crate) queue: queue::Config,
    pub metrics: MetricsConfig,
}

impl LoggerConfig {
    pub fn load_or_panic() -> Self {
        Self {
            logger: from_env_or_panic("LOGGER_"),
            queue: from_env_or_panic(""),
            metrics: from_env_or_panic("METRICS_"),
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct MetricsConfig {
    /// Port of the HTTP listener that serves Prometheus metrics
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    2000
}

pub(crate) fn from_env_or_panic<T: DeserializeOwned>(prefix: &str) -> T {
    envy::prefixed(prefix).from_env().unwrap_or_else(|err| {
        panic!(
            "BUG: Couldn't load config from environment for {}: {:#?}",
            std::any::type_name::<T>(),
            err
        );
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::num::NonZeroUsize;

    fn from_vars<T: DeserializeOwned>(prefix: &str, vars: &[(&str, &str)]) -> envy::Result<T> {
        envy::prefixed(prefix).from_iter(
            vars.iter()
                .map(|(key, value)| (key.to_string(), value.to_string())),
        )
    }

    #[test]
    fn bot_args() {
        let args = BotArgs::parse_from(["whatsticker"]);
        assert_eq!(args.log_level, LogLevel::Info);
        assert!(!args.reply_to);

        let args = BotArgs::parse_from(["whatsticker", "--log-level", "debug", "--reply-to"]);
        assert_eq!(args.log_level, LogLevel::Debug);
        assert!(args.reply_to);

        let args = BotArgs::parse_from(["whatsticker", "--log-level=DEBUG"]);
        assert_eq!(args.log_level, LogLevel::Debug);

        BotArgs::try_parse_from(["whatsticker", "--log-level", "TRACE"]).unwrap_err();
    }

    #[test]
    fn bot_max_in_flight() {
        let config: bot::Config = from_vars("BOT_", &[]).unwrap();
        assert_eq!(config.max_in_flight, None);

        let config: bot::Config = from_vars("BOT_", &[("BOT_MAX_IN_FLIGHT", "3")]).unwrap();
        assert_eq!(config.max_in_flight, NonZeroUsize::new(3));

        from_vars::<bot::Config>("BOT_", &[("BOT_MAX_IN_FLIGHT", "0")]).unwrap_err();
    }

    #[test]
    fn logger_prefetch() {
        let config: logger::Config = from_vars("LOGGER_", &[]).unwrap();
        assert_eq!(config.prefetch.get(), 10);

        let config: logger::Config =
            from_vars("LOGGER_", &[("LOGGER_PREFETCH", "1")]).unwrap();
        assert_eq!(config.prefetch.get(), 1);

        from_vars::<logger::Config>("LOGGER_", &[("LOGGER_PREFETCH", "0")]).unwrap_err();
    }
}
