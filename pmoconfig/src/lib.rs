//! # PMOIcyProxy Configuration Module
//!
//! This module provides configuration management for PMOIcyProxy, including:
//! - An embedded default configuration (YAML)
//! - Merging with an optional user configuration file
//! - Environment variable overrides (`PMOICY_CONFIG__SECTION__KEY=value`)
//! - Type-safe getters and setters for configuration values
//! - A process-wide instance initialised once at start-up
//!
//! The table of relayed sources lives in its own file, see [`sources`].
//!
//! ## Usage
//!
//! ```no_run
//! use pmoconfig::{get_config, init_config};
//!
//! init_config(None)?;
//!
//! let config = get_config();
//! let addr = config.get_listen_addr()?;
//! let metaint = config.get_icy_metaint()?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{anyhow, Context, Result};
use dirs::home_dir;
use once_cell::sync::OnceCell;
use serde_yaml::{Mapping, Number, Value};
use std::{
    env, fs,
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tracing::info;

pub mod sources;

pub use sources::{load_sources, parse_sources, Source, Sources, SourcesFormat};

// Embedded default configuration
const DEFAULT_CONFIG: &str = include_str!("pmoicyproxy.yaml");

static CONFIG: OnceCell<Arc<Config>> = OnceCell::new();

const ENV_CONFIG_FILE: &str = "PMOICY_CONFIG";
const ENV_PREFIX: &str = "PMOICY_CONFIG__";
const CONFIG_DIR_NAME: &str = ".pmoicy";
const CONFIG_FILE_NAME: &str = "config.yaml";

// Default values for configuration
const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0";
const DEFAULT_HTTP_PORT: u16 = 8080;
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 5;
const DEFAULT_LOG_MIN_LEVEL: &str = "INFO";
const DEFAULT_LOG_ENABLE_CONSOLE: bool = true;
const DEFAULT_ICY_METAINT: usize = 16_000;
const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 10;
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 10;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Macro to generate getter/setter for usize values with default
macro_rules! impl_usize_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<usize> {
            match self.get_value($path) {
                Ok(Value::Number(n)) => n
                    .as_u64()
                    .map(|n| n as usize)
                    .ok_or_else(|| anyhow!("{} must be a positive integer", $path.join("."))),
                Ok(_) | Err(_) => Ok($default),
            }
        }

        pub fn $setter(&self, value: usize) -> Result<()> {
            self.set_value($path, Value::Number(Number::from(value as u64)))
        }
    };
}

/// Macro to generate getter/setter for durations stored as whole seconds
macro_rules! impl_secs_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<Duration> {
            match self.get_value($path) {
                Ok(Value::Number(n)) => n
                    .as_u64()
                    .map(Duration::from_secs)
                    .ok_or_else(|| anyhow!("{} must be a number of seconds", $path.join("."))),
                Ok(_) | Err(_) => Ok(Duration::from_secs($default)),
            }
        }

        pub fn $setter(&self, value: Duration) -> Result<()> {
            self.set_value($path, Value::Number(Number::from(value.as_secs())))
        }
    };
}

/// Macro to generate getter/setter for bool values with default
macro_rules! impl_bool_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<bool> {
            match self.get_value($path) {
                Ok(Value::Bool(b)) => Ok(b),
                Ok(_) | Err(_) => Ok($default),
            }
        }

        pub fn $setter(&self, value: bool) -> Result<()> {
            self.set_value($path, Value::Bool(value))
        }
    };
}

/// Macro to generate getter/setter for string values with default
macro_rules! impl_string_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<String> {
            match self.get_value($path) {
                Ok(Value::String(s)) => Ok(s),
                Ok(Value::Number(n)) => Ok(n.to_string()),
                Ok(_) | Err(_) => Ok($default.to_string()),
            }
        }

        pub fn $setter(&self, value: String) -> Result<()> {
            self.set_value($path, Value::String(value))
        }
    };
}

/// Configuration manager for PMOIcyProxy
///
/// Values are kept as a YAML tree with lower-cased keys and addressed by
/// path (`&["icy", "metaint"]`). Setters only change the in-memory tree;
/// the configuration file is never rewritten.
#[derive(Debug)]
pub struct Config {
    path: Option<PathBuf>,
    data: Mutex<Value>,
}

impl Config {
    /// Finds the configuration file to load, in order:
    /// 1. the explicit `path`
    /// 2. the `PMOICY_CONFIG` environment variable
    /// 3. `.pmoicy/config.yaml` in the current directory
    /// 4. `.pmoicy/config.yaml` in the user's home directory
    fn find_config_file(path: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = path {
            return Some(path.to_path_buf());
        }

        if let Ok(env_path) = env::var(ENV_CONFIG_FILE) {
            info!(env_var = ENV_CONFIG_FILE, path = %env_path, "Trying to load config from env");
            return Some(PathBuf::from(env_path));
        }

        let local = Path::new(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME);
        if local.exists() {
            return Some(local);
        }

        home_dir()
            .map(|home| home.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
            .filter(|candidate| candidate.exists())
    }

    /// Loads the configuration
    ///
    /// This method:
    /// 1. Loads the default embedded configuration
    /// 2. Merges the configuration file, if one is found (see `find_config_file`)
    /// 3. Applies environment variable overrides
    ///
    /// A file given explicitly (argument or `PMOICY_CONFIG`) must exist.
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let file = Self::find_config_file(path);

        let external = match &file {
            Some(file) => {
                let yaml = fs::read_to_string(file)
                    .with_context(|| format!("reading config file {}", file.display()))?;
                info!(config_file = %file.display(), "Loaded config file");
                Some(yaml)
            }
            None => {
                info!("No config file found, using default embedded config");
                None
            }
        };

        let mut config = Self::from_yaml(external.as_deref())?;
        config.path = file;
        config.apply_env_overrides(env::vars());
        Ok(config)
    }

    /// Builds a configuration from the embedded defaults merged with `yaml`,
    /// without touching the filesystem or the environment.
    pub fn from_yaml(yaml: Option<&str>) -> Result<Self> {
        let mut value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;

        if let Some(yaml) = yaml {
            let external: Value = serde_yaml::from_str(yaml).context("parsing config file")?;
            // An empty file parses as null
            if !external.is_null() {
                merge_yaml(&mut value, &Self::lower_keys_value(external));
            }
        }

        Ok(Config {
            path: None,
            data: Mutex::new(Self::lower_keys_value(value)),
        })
    }

    /// Path of the configuration file that was merged, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn data(&self) -> MutexGuard<'_, Value> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sets a configuration value at the specified path
    ///
    /// # Arguments
    ///
    /// * `path` - Array of keys representing the path (e.g., `&["host", "http_port"]`)
    /// * `value` - The YAML value to set
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        let mut data = self.data();
        Self::set_value_internal(&mut data, path, value)
    }

    fn set_value_internal(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
        if path.is_empty() {
            *data = value;
            return Ok(());
        }
        if let Value::Mapping(map) = data {
            let key_value = Value::String(path[0].to_lowercase());
            if path.len() == 1 {
                map.insert(key_value, value);
            } else {
                let entry = map
                    .entry(key_value)
                    .or_insert(Value::Mapping(Mapping::new()));
                Self::set_value_internal(entry, &path[1..], value)?;
            }
            Ok(())
        } else {
            Err(anyhow!("Current node is not a map"))
        }
    }

    /// Gets a configuration value at the specified path
    ///
    /// Returns an error if the path doesn't exist.
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.data();
        Self::get_value_internal(&data, path)
    }

    fn get_value_internal(data: &Value, path: &[&str]) -> Result<Value> {
        let mut current = data;
        for (i, key) in path.iter().enumerate() {
            if let Value::Mapping(map) = current {
                let key = key.to_lowercase();

                if let Some(next) = map.get(Value::String(key)) {
                    current = next;
                } else {
                    return Err(anyhow!("Path {} does not exist", path[..=i].join(".")));
                }
            } else {
                return Err(anyhow!("Path {} is not a map", path[..i].join(".")));
            }
        }
        Ok(current.clone())
    }

    /// Applies `PMOICY_CONFIG__A__B=value` overrides found in `vars`.
    pub fn apply_env_overrides<I>(&self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut data = self.data();
        for (key, value) in vars {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                let key_path = stripped.split("__").collect::<Vec<_>>();
                let yaml_value = Self::convert_env_value(&value);
                if let Err(err) = Self::set_value_internal(&mut data, &key_path, yaml_value) {
                    tracing::warn!(env_var = %key, "Ignoring config override: {}", err);
                }
            }
        }
    }

    fn convert_env_value(value: &str) -> Value {
        if let Ok(parsed) = serde_yaml::from_str::<Value>(value) {
            return parsed;
        }
        Value::String(value.to_string())
    }

    fn lower_keys_value(value: Value) -> Value {
        match value {
            Value::Mapping(map) => {
                let mut new_map = Mapping::new();
                for (k, v) in map {
                    let key = match k {
                        Value::String(s) => Value::String(s.to_lowercase()),
                        other => other,
                    };
                    new_map.insert(key, Self::lower_keys_value(v));
                }
                Value::Mapping(new_map)
            }
            Value::Sequence(seq) => {
                Value::Sequence(seq.into_iter().map(Self::lower_keys_value).collect())
            }
            _ => value,
        }
    }

    /// Gets the HTTP port from configuration
    ///
    /// Returns the default port (8080) if the value is missing or invalid.
    pub fn get_http_port(&self) -> u16 {
        match self.get_value(&["host", "http_port"]) {
            Ok(Value::Number(n)) => match n.as_u64().and_then(|p| u16::try_from(p).ok()) {
                Some(port) => port,
                None => {
                    tracing::warn!("Invalid HTTP port {}, using default {}", n, DEFAULT_HTTP_PORT);
                    DEFAULT_HTTP_PORT
                }
            },
            Ok(Value::String(s)) => s.parse::<u16>().unwrap_or_else(|_| {
                tracing::warn!("Invalid HTTP port '{}', using default {}", s, DEFAULT_HTTP_PORT);
                DEFAULT_HTTP_PORT
            }),
            Ok(_) | Err(_) => DEFAULT_HTTP_PORT,
        }
    }

    /// Sets the HTTP port in configuration
    pub fn set_http_port(&self, port: u16) -> Result<()> {
        self.set_value(&["host", "http_port"], Value::Number(Number::from(port)))
    }

    impl_string_config!(
        get_listen_address,
        set_listen_address,
        &["host", "listen_address"],
        DEFAULT_LISTEN_ADDRESS
    );

    /// Socket address the HTTP server binds to
    pub fn get_listen_addr(&self) -> Result<SocketAddr> {
        let address = self.get_listen_address()?;
        let ip: IpAddr = address
            .parse()
            .with_context(|| format!("invalid listen address '{}'", address))?;
        Ok(SocketAddr::new(ip, self.get_http_port()))
    }

    /// Overrides address and port from a `host:port` or `:port` string,
    /// the format of the `--listen` command line flag.
    pub fn set_listen(&self, listen: &str) -> Result<()> {
        let addr = parse_listen(listen)?;
        self.set_listen_address(addr.ip().to_string())?;
        self.set_http_port(addr.port())
    }

    impl_secs_config!(
        get_shutdown_grace,
        set_shutdown_grace,
        &["host", "shutdown_grace_secs"],
        DEFAULT_SHUTDOWN_GRACE_SECS
    );

    impl_string_config!(
        get_log_min_level,
        set_log_min_level,
        &["host", "logger", "min_level"],
        DEFAULT_LOG_MIN_LEVEL
    );

    impl_bool_config!(
        get_log_enable_console,
        set_log_enable_console,
        &["host", "logger", "enable_console"],
        DEFAULT_LOG_ENABLE_CONSOLE
    );

    impl_usize_config!(
        get_icy_metaint,
        set_icy_metaint,
        &["icy", "metaint"],
        DEFAULT_ICY_METAINT
    );

    impl_string_config!(
        get_icy_initial_title,
        set_icy_initial_title,
        &["icy", "initial_title"],
        ""
    );

    impl_secs_config!(
        get_icy_refresh_interval,
        set_icy_refresh_interval,
        &["icy", "refresh_interval_secs"],
        DEFAULT_REFRESH_INTERVAL_SECS
    );

    impl_secs_config!(
        get_icy_fetch_timeout,
        set_icy_fetch_timeout,
        &["icy", "fetch_timeout_secs"],
        DEFAULT_FETCH_TIMEOUT_SECS
    );

    impl_secs_config!(
        get_upstream_connect_timeout,
        set_upstream_connect_timeout,
        &["upstream", "connect_timeout_secs"],
        DEFAULT_CONNECT_TIMEOUT_SECS
    );

    /// User agent sent to upstream servers, `None` when left empty
    pub fn get_upstream_user_agent(&self) -> Option<String> {
        match self.get_value(&["upstream", "user_agent"]) {
            Ok(Value::String(s)) if !s.trim().is_empty() => Some(s),
            _ => None,
        }
    }
}

/// Parses `host:port`, `[v6]:port` or Go-style `:port` (all interfaces).
pub fn parse_listen(listen: &str) -> Result<SocketAddr> {
    let listen = listen.trim();
    let full = if listen.starts_with(':') {
        format!("{}{}", DEFAULT_LISTEN_ADDRESS, listen)
    } else {
        listen.to_string()
    };
    full.parse()
        .with_context(|| format!("invalid listen address '{}'", listen))
}

/// Loads the process-wide configuration
///
/// Must be called once, before the first [`get_config`]; later calls fail.
pub fn init_config(path: Option<&Path>) -> Result<Arc<Config>> {
    let config = Arc::new(Config::load_config(path)?);
    CONFIG
        .set(config.clone())
        .map_err(|_| anyhow!("configuration already initialised"))?;
    Ok(config)
}

/// Returns the global configuration instance
///
/// Falls back to the embedded defaults (plus environment overrides) when
/// [`init_config`] was never called.
pub fn get_config() -> Arc<Config> {
    CONFIG
        .get_or_init(|| {
            let config = Config::from_yaml(None).unwrap_or_else(|err| {
                tracing::error!("Embedded default configuration is invalid: {}", err);
                Config {
                    path: None,
                    data: Mutex::new(Value::Mapping(Mapping::new())),
                }
            });
            config.apply_env_overrides(env::vars());
            Arc::new(config)
        })
        .clone()
}

/// Merges external YAML configuration into default configuration
///
/// - For mappings (objects), it merges keys from external into default
/// - For scalars and sequences, external values replace default values
fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (d, e) => *d = e.clone(), // scalars and sequences are replaced
    }
}
