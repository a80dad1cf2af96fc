// Logging utilities for CLI
use chrono::SecondsFormat;
use std::io::Write;

/// Initialize logger for CLI
///
/// Every line is prefixed with a UTC timestamp and the level, e.g.
/// `[2024-01-01T00:00:00.000Z] INFO: message`. `RUST_LOG` overrides the
/// level selected by the flags.
pub fn init_logger(verbose: bool, quiet: bool) {
    let default_level = if quiet {
        log::LevelFilter::Error
    } else if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    let mut builder = env_logger::Builder::new();
    builder.filter_level(default_level).format(|buf, record| {
        writeln!(
            buf,
            "[{}] {}: {}",
            chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            record.level(),
            record.args()
        )
    });

    // Suppress noisy debug logs from dependencies
    if verbose {
        builder.filter_module("reqwest", log::LevelFilter::Info);
        builder.filter_module("hyper", log::LevelFilter::Info);
        builder.filter_module("hyper_util", log::LevelFilter::Info);
        builder.filter_module("rustls", log::LevelFilter::Info);
    }

    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }

    builder.init();
}
