//! Structured logging for the surface engine.
//!
//! Installs a `tracing` subscriber with a human-readable console layer and,
//! in debug builds, a JSON file layer for post-mortem analysis of tile
//! loading. The filter honours `RUST_LOG` first, then the config's
//! `debug.log_level`.

use nebula_config::Config;
use std::path::Path;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when neither `RUST_LOG` nor the config name a level.
pub const DEFAULT_FILTER: &str = "info,nebula_tilemgr=info,nebula_elevation=warn";

/// Name of the JSON log file written below the log directory.
pub const LOG_FILE_NAME: &str = "surface.log";

/// Filter directives for the given config.
///
/// A bare level such as `"debug"` applies to every target; anything with a
/// `=` or `,` is passed through as a full directive list.
pub fn filter_directives(config: Option<&Config>) -> String {
    match config.map(|c| c.debug.log_level.trim()) {
        Some(level) if !level.is_empty() => level.to_string(),
        _ => DEFAULT_FILTER.to_string(),
    }
}

/// Initialize the global tracing subscriber.
///
/// * `log_dir` - directory for the JSON log file (debug builds only)
/// * `debug_build` - whether file logging is enabled
/// * `config` - optional configuration supplying the log level
///
/// ```no_run
/// use nebula_log::init_logging;
/// use nebula_config::Config;
///
/// let config = Config::default();
/// init_logging(Some(std::path::Path::new("./logs")), true, Some(&config));
/// ```
pub fn init_logging(log_dir: Option<&Path>, debug_build: bool, config: Option<&Config>) {
    let filter_str = filter_directives(config);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    // Loader workers are named, so thread names are worth showing.
    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(true)
        .with_level(true)
        .with_timer(fmt::time::uptime());

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);

    if debug_build
        && let Some(log_dir) = log_dir
        && std::fs::create_dir_all(log_dir).is_ok()
        && let Ok(log_file) = std::fs::File::create(log_dir.join(LOG_FILE_NAME))
    {
        let file_layer = fmt::layer()
            .with_writer(log_file)
            .with_ansi(false)
            .with_target(true)
            .with_timer(fmt::time::uptime())
            .json();

        subscriber.with(file_layer).init();
        return;
    }

    subscriber.init();
}

/// `EnvFilter` built from [`DEFAULT_FILTER`].
pub fn default_env_filter() -> EnvFilter {
    EnvFilter::new(DEFAULT_FILTER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter() {
        let filter_str = format!("{}", default_env_filter());
        assert!(filter_str.contains("nebula_elevation=warn"));
        assert!(filter_str.contains("info"));
    }

    #[test]
    fn test_config_level_overrides_default() {
        let mut config = Config::default();
        config.debug.log_level = "debug,nebula_tilemgr=trace".to_string();
        assert_eq!(filter_directives(Some(&config)), "debug,nebula_tilemgr=trace");
    }

    #[test]
    fn test_empty_level_falls_back() {
        let mut config = Config::default();
        config.debug.log_level = "  ".to_string();
        assert_eq!(filter_directives(Some(&config)), DEFAULT_FILTER);
        assert_eq!(filter_directives(None), DEFAULT_FILTER);
    }

    #[test]
    fn test_filter_strings_parse() {
        for filter_str in ["info", "debug,nebula_tilemgr=trace", "warn,nebula_elevation=debug", DEFAULT_FILTER] {
            assert!(EnvFilter::try_new(filter_str).is_ok(), "failed to parse {filter_str}");
        }
    }
}
