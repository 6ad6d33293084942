pub(crate) mod logging;
pub(crate) mod metrics;

pub use self::logging::{init_logging, tracing_err, LogLevel, LoggingTask};
pub use self::metrics::init_metrics;

const GLOBAL_LABELS: &[(&str, &str)] = &[
    ("app_version", env!("CARGO_PKG_VERSION")),
    ("app_build_target", env!("VERGEN_CARGO_TARGET_TRIPLE")),
    ("app_build_timestamp", env!("VERGEN_BUILD_TIMESTAMP")),
];
