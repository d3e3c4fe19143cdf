use serdeconv;
use sloggers::{Config, LoggerConfig};

pub use slog::{crit, debug, error, info, o, trace, warn};
pub use slog::{Discard, Logger};

/// Builds the root terminal logger used by the binaries.
pub fn init() -> Logger {
    init_with_level("info")
}

/// Builds a root terminal logger with an explicit level (`trace`, `debug`,
/// `info`, `warning`, `error`, `critical`).
pub fn init_with_level(level: &str) -> Logger {
    let config: LoggerConfig = serdeconv::from_toml_str(&format!(
        r#"
type = "terminal"
level = "{}"
destination = "stderr"
"#,
        level
    ))
    .expect("Error parsing logger configuration");

    config.build_logger().expect("Error building logger")
}

/// A logger that drops everything. Used by tests and as the default when an
/// actor is constructed without a parent logger.
pub fn discard() -> Logger {
    Logger::root(Discard, o!())
}
