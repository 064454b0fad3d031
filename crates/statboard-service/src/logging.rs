use std::io::IsTerminal;

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;
use tracing_subscriber::fmt::time::UtcTime;

use crate::config::{LogFormat, Logging};

/// Initializes the global tracing subscriber according to the logging config.
///
/// The `RUST_LOG` environment variable overrides the configured level when set.
pub fn init(config: &Logging) {
    if config.enable_backtraces {
        unsafe {
            std::env::set_var("RUST_BACKTRACE", "1");
        }
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("statboard_service={}", config.level)));

    let format = match config.format {
        LogFormat::Auto if std::io::stderr().is_terminal() => LogFormat::Pretty,
        LogFormat::Auto => LogFormat::Simplified,
        other => other,
    };

    let subscriber = fmt()
        .with_timer(UtcTime::rfc_3339())
        .with_target(true)
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Pretty => subscriber.pretty().init(),
        LogFormat::Simplified | LogFormat::Auto => subscriber.compact().init(),
        LogFormat::Json => subscriber
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(true)
            .with_file(true)
            .with_line_number(true)
            .init(),
    }
}
