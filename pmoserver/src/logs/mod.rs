use pmoconfig::Config;

use axum::{extract::Request, middleware::Next, response::Response};
use tracing::{Level, info};
use tracing_subscriber::{
    EnvFilter, Registry, filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt,
    util::TryInitError,
};

/// Logging initialisation options
#[derive(Debug, Clone)]
pub struct LoggingOptions {
    /// Minimum level when `RUST_LOG` is not set
    pub min_level: LevelFilter,
    /// Enable output to stderr/stdout
    pub enable_console: bool,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            min_level: LevelFilter::INFO,
            enable_console: true,
        }
    }
}

impl LoggingOptions {
    /// Reads `host.logger.min_level` and `host.logger.enable_console`
    pub fn from_config(config: &Config) -> Self {
        let default = Self::default();

        let min_level = match config.get_log_min_level() {
            Ok(l) => match string_to_level(&l) {
                Some(lev) => level_to_levelfilter(lev),
                None => {
                    eprintln!("⚠️ Unknown log level '{}', using {}", l, default.min_level);
                    default.min_level
                }
            },
            Err(_) => default.min_level,
        };

        let enable_console = config
            .get_log_enable_console()
            .unwrap_or(default.enable_console);

        Self {
            min_level,
            enable_console,
        }
    }
}

/// Installs the global subscriber
///
/// The filter comes from `RUST_LOG` when set, otherwise from `min_level`.
/// Fails if a global subscriber is already installed.
///
/// # Example
/// ```rust,no_run
/// use pmoserver::logs::{init_logging, LoggingOptions};
///
/// init_logging(LoggingOptions::default()).expect("logging already initialised");
/// ```
pub fn init_logging(options: LoggingOptions) -> Result<(), TryInitError> {
    let filter = build_filter(options.min_level);

    let console = options.enable_console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_ansi(true)
    });

    Registry::default().with(filter).with(console).try_init()
}

fn build_filter(min_level: LevelFilter) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(min_level.into())
        .from_env_lossy()
}

/// Axum middleware logging every incoming request
pub async fn log_request(request: Request, next: Next) -> Response {
    info!(
        method = %request.method(),
        path = %request.uri().path(),
        headers = ?request.headers(),
        "Incoming request"
    );
    next.run(request).await
}

fn string_to_level(s: &str) -> Option<Level> {
    match s.trim().to_uppercase().as_str() {
        "ERROR" => Some(Level::ERROR),
        "WARN" | "WARNING" => Some(Level::WARN),
        "INFO" => Some(Level::INFO),
        "DEBUG" => Some(Level::DEBUG),
        "TRACE" => Some(Level::TRACE),
        _ => None,
    }
}

fn level_to_levelfilter(level: Level) -> LevelFilter {
    match level {
        Level::ERROR => LevelFilter::ERROR,
        Level::WARN => LevelFilter::WARN,
        Level::INFO => LevelFilter::INFO,
        Level::DEBUG => LevelFilter::DEBUG,
        Level::TRACE => LevelFilter::TRACE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_to_level() {
        assert_eq!(string_to_level("info"), Some(Level::INFO));
        assert_eq!(string_to_level(" Warning "), Some(Level::WARN));
        assert_eq!(string_to_level("TRACE"), Some(Level::TRACE));
        assert_eq!(string_to_level("verbose"), None);
    }

    #[test]
    fn test_options_from_config() {
        let config = Config::from_yaml(Some(
            "host:\n  logger:\n    min_level: debug\n    enable_console: false\n",
        ))
        .unwrap();
        let options = LoggingOptions::from_config(&config);
        assert_eq!(options.min_level, LevelFilter::DEBUG);
        assert!(!options.enable_console);
    }

    #[test]
    fn test_unknown_level_falls_back_to_info() {
        let config = Config::from_yaml(Some("host:\n  logger:\n    min_level: loud\n")).unwrap();
        let options = LoggingOptions::from_config(&config);
        assert_eq!(options.min_level, LevelFilter::INFO);
        assert!(options.enable_console);
    }
}
