//! Exporter configuration.
//!
//! Settings are layered, later layers winning:
//!
//! 1. built-in defaults
//! 2. an optional TOML file (`--config`)
//! 3. `WS90_*` environment variables (`WS90_PORT=9000`, `WS90_IDS=100,0x20`)
//! 4. command-line flags
//!
//! # Example file
//!
//! ```toml
//! cmd = "rtl_433 -Y minmax -f 868.3M -F json"
//! ids = ["100", "0x20"]
//! port = 8000
//! clear = 120
//! vm_url = "http://localhost:8428"
//! log = "systemd"
//! log_level = "info"
//! ```

use std::net::{Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use ws90_types::{DeviceFilter, ParseDeviceIdError, WS90_MODEL};

use crate::logging::{LogLevel, LogTarget, LoggingError};
use crate::source::{CommandLine, CommandLineError};

/// Default decoder invocation.
pub const DEFAULT_COMMAND: &str = "rtl_433 -Y minmax -f 868.3M -F json";

/// Prefix of the environment variables read as configuration.
pub const ENV_PREFIX: &str = "WS90";

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Loading or merging the layers failed.
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// `cmd` could not be split.
    #[error("invalid command: {0}")]
    Command(#[from] CommandLineError),

    /// An allow-list entry is not a device id.
    #[error(transparent)]
    DeviceId(#[from] ParseDeviceIdError),

    /// `log` or `log_level` is unknown.
    #[error(transparent)]
    Logging(#[from] LoggingError),

    /// A value is out of range.
    #[error("invalid `{key}`: {reason}")]
    Invalid {
        /// Configuration key.
        key: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Prometheus/VictoriaMetrics exporter for Fine Offset WS90 weather stations.
#[derive(Parser, Debug, Default, Clone)]
#[command(name = "ws90-exporter", version, about, long_about = None)]
pub struct Args {
    /// TOML configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// rtl_433 command line [default: "rtl_433 -Y minmax -f 868.3M -F json"]
    #[arg(long)]
    pub cmd: Option<String>,

    /// Device id to accept, decimal or 0x-hex (repeatable; default: all devices)
    #[arg(long = "id", value_name = "ID")]
    pub ids: Vec<String>,

    /// Port of the Prometheus endpoint [default: 8000]
    #[arg(long)]
    pub port: Option<u16>,

    /// Seconds without readings before a device's metrics are cleared, 0 to never clear [default: 120]
    #[arg(long)]
    pub clear: Option<u64>,

    /// VictoriaMetrics base URL; readings are also pushed there when set
    #[arg(long)]
    pub vm_url: Option<String>,

    /// VictoriaMetrics request timeout in seconds [default: 10]
    #[arg(long)]
    pub vm_timeout: Option<u64>,

    /// Log destination: stderr or systemd [default: stderr]
    #[arg(long)]
    pub log: Option<String>,

    /// Log level: debug, info, warning or error [default: info]
    #[arg(long)]
    pub log_level: Option<String>,

    /// Sensor model to accept [default: Fineoffset-WS90]
    #[arg(long)]
    pub model: Option<String>,
}

/// Raw merged settings, before validation.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Decoder command line.
    pub cmd: String,
    /// Device allow-list entries.
    #[serde(default)]
    pub ids: Vec<String>,
    /// Prometheus port.
    pub port: u16,
    /// Expiry interval in seconds.
    pub clear: u64,
    /// VictoriaMetrics base URL.
    #[serde(default)]
    pub vm_url: Option<String>,
    /// VictoriaMetrics timeout in seconds.
    pub vm_timeout: u64,
    /// Log destination.
    pub log: String,
    /// Log level.
    pub log_level: String,
    /// Accepted model.
    pub model: String,
}

impl Settings {
    /// Merge defaults, the config file, the environment and `args`.
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        Self::load_with_env(args, Environment::with_prefix(ENV_PREFIX))
    }

    fn load_with_env(args: &Args, env: Environment) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("cmd", DEFAULT_COMMAND)?
            .set_default("ids", Vec::<String>::new())?
            .set_default("port", 8000_i64)?
            .set_default("clear", 120_i64)?
            .set_default("vm_timeout", 10_i64)?
            .set_default("log", "stderr")?
            .set_default("log_level", "info")?
            .set_default("model", WS90_MODEL)?;

        if let Some(path) = &args.config {
            builder = builder.add_source(File::from(path.as_path()));
        }

        builder = builder.add_source(
            env.try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("ids"),
        );

        if !args.ids.is_empty() {
            builder = builder.set_override("ids", args.ids.clone())?;
        }

        let config = builder
            .set_override_option("cmd", args.cmd.clone())?
            .set_override_option("port", args.port.map(i64::from))?
            .set_override_option("clear", args.clear.map(clamp_i64))?
            .set_override_option("vm_url", args.vm_url.clone())?
            .set_override_option("vm_timeout", args.vm_timeout.map(clamp_i64))?
            .set_override_option("log", args.log.clone())?
            .set_override_option("log_level", args.log_level.clone())?
            .set_override_option("model", args.model.clone())?
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Validated configuration the daemon runs with.
#[derive(Debug, Clone)]
pub struct ExporterConfig {
    /// Decoder command line.
    pub command: CommandLine,
    /// Accepted sensor model.
    pub model: String,
    /// Accepted devices.
    pub devices: DeviceFilter,
    /// Prometheus listen address.
    pub listen_addr: SocketAddr,
    /// Expiry interval; zero disables expiry.
    pub clear_interval: Duration,
    /// VictoriaMetrics base URL.
    pub vm_url: Option<String>,
    /// VictoriaMetrics request timeout.
    pub vm_timeout: Duration,
    /// Log destination.
    pub log_target: LogTarget,
    /// Log level.
    pub log_level: LogLevel,
}

impl ExporterConfig {
    /// Load all layers and validate them.
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        Self::from_settings(Settings::load(args)?)
    }

    /// Validate merged settings.
    pub fn from_settings(settings: Settings) -> Result<Self, ConfigError> {
        if settings.vm_timeout == 0 {
            return Err(ConfigError::Invalid {
                key: "vm_timeout",
                reason: "must be at least one second".to_string(),
            });
        }
        if settings.model.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "model",
                reason: "must not be empty".to_string(),
            });
        }

        let vm_url = settings
            .vm_url
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());

        Ok(Self {
            command: CommandLine::parse(&settings.cmd)?,
            model: settings.model,
            devices: DeviceFilter::parse(&settings.ids)?,
            listen_addr: SocketAddr::from((Ipv6Addr::UNSPECIFIED, settings.port)),
            clear_interval: Duration::from_secs(settings.clear),
            vm_url,
            vm_timeout: Duration::from_secs(settings.vm_timeout),
            log_target: settings.log.parse()?,
            log_level: settings.log_level.parse()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use ws90_types::DeviceId;

    // An isolated environment so the host's WS90_* variables never leak in.
    fn env(vars: &[(&str, &str)]) -> Environment {
        let source: config::Map<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Environment::with_prefix(ENV_PREFIX).source(Some(source))
    }

    fn load(args: &Args, vars: &[(&str, &str)]) -> ExporterConfig {
        ExporterConfig::from_settings(Settings::load_with_env(args, env(vars)).unwrap()).unwrap()
    }

    fn toml_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults() {
        let config = load(&Args::default(), &[]);

        assert_eq!(config.command.program(), "rtl_433");
        assert_eq!(config.command.args(), ["-Y", "minmax", "-f", "868.3M", "-F", "json"]);
        assert!(config.devices.is_empty());
        assert_eq!(config.listen_addr.to_string(), "[::]:8000");
        assert_eq!(config.clear_interval, Duration::from_secs(120));
        assert_eq!(config.vm_url, None);
        assert_eq!(config.vm_timeout, Duration::from_secs(10));
        assert_eq!(config.log_target, LogTarget::Stderr);
        assert_eq!(config.log_level, LogLevel::Info);
        assert_eq!(config.model, WS90_MODEL);
    }

    #[test]
    fn file_then_env_then_flags() {
        let file = toml_file(
            r#"
            cmd = "rtl_433 -F json"
            ids = ["100", "0x20"]
            port = 9000
            clear = 30
            log_level = "debug"
            "#,
        );

        let args = Args {
            config: Some(file.path().to_path_buf()),
            clear: Some(0),
            ..Args::default()
        };
        let config = load(&args, &[("WS90_PORT", "9100"), ("WS90_VM_URL", "http://vm:8428")]);

        assert_eq!(config.command.args(), ["-F", "json"]);
        assert_eq!(
            config.devices.iter().collect::<Vec<_>>(),
            vec![DeviceId::new(32), DeviceId::new(100)]
        );
        assert_eq!(config.listen_addr.port(), 9100);
        assert_eq!(config.clear_interval, Duration::ZERO);
        assert_eq!(config.vm_url.as_deref(), Some("http://vm:8428"));
        assert_eq!(config.log_level, LogLevel::Debug);
    }

    #[test]
    fn env_ids_are_comma_separated() {
        let config = load(&Args::default(), &[("WS90_IDS", "100,0x20")]);
        assert_eq!(config.devices.len(), 2);
        assert!(config.devices.allows(DeviceId::new(0x20)));
    }

    #[test]
    fn flag_ids_replace_other_layers() {
        let args = Args {
            ids: vec!["7".to_string()],
            ..Args::default()
        };
        let config = load(&args, &[("WS90_IDS", "100,0x20")]);

        assert_eq!(config.devices.iter().collect::<Vec<_>>(), vec![DeviceId::new(7)]);
    }

    #[test]
    fn rejects_bad_values() {
        let bad_id = Args {
            ids: vec!["nope".to_string()],
            ..Args::default()
        };
        let settings = Settings::load_with_env(&bad_id, env(&[])).unwrap();
        assert!(matches!(
            ExporterConfig::from_settings(settings),
            Err(ConfigError::DeviceId(_))
        ));

        let bad_cmd = Args {
            cmd: Some("rtl_433 'unterminated".to_string()),
            ..Args::default()
        };
        let settings = Settings::load_with_env(&bad_cmd, env(&[])).unwrap();
        assert!(matches!(
            ExporterConfig::from_settings(settings),
            Err(ConfigError::Command(_))
        ));

        let settings = Settings::load_with_env(&Args::default(), env(&[("WS90_LOG", "syslog")]))
            .unwrap();
        assert!(matches!(
            ExporterConfig::from_settings(settings),
            Err(ConfigError::Logging(_))
        ));

        let args = Args {
            vm_timeout: Some(0),
            ..Args::default()
        };
        let settings = Settings::load_with_env(&args, env(&[])).unwrap();
        assert!(matches!(
            ExporterConfig::from_settings(settings),
            Err(ConfigError::Invalid { key: "vm_timeout", .. })
        ));
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let args = Args {
            config: Some(PathBuf::from("/nonexistent/ws90.toml")),
            ..Args::default()
        };
        assert!(matches!(
            Settings::load_with_env(&args, env(&[])),
            Err(ConfigError::Load(_))
        ));
    }

    #[test]
    fn cli_parses_repeated_ids() {
        let args = Args::try_parse_from([
            "ws90-exporter",
            "--id",
            "100",
            "--id",
            "0x20",
            "--port",
            "9000",
            "--vm-url",
            "http://localhost:8428",
            "--log-level",
            "warning",
        ])
        .unwrap();

        assert_eq!(args.ids, ["100", "0x20"]);
        assert_eq!(args.port, Some(9000));
        assert_eq!(args.vm_url.as_deref(), Some("http://localhost:8428"));
        assert_eq!(args.log_level.as_deref(), Some("warning"));
    }
}
