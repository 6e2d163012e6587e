use anyhow::{bail, Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variables with this prefix override file values;
/// `APP__SERVER__PORT=9000` sets `server.port`.
pub const ENV_PREFIX: &str = "APP__";

/// Top-level configuration: typed process sections plus a free-form bag of
/// per-module sections that modules deserialize themselves.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub server: ServerConfig,
    /// Uses [`default_logging_config`] when absent.
    pub logging: Option<LoggingConfig>,
    /// SDK provider settings; in-process providers when absent.
    #[serde(default)]
    pub telemetry: Option<TelemetryConfig>,
    /// Directory of `<module>.yaml` files merged into `modules`.
    #[serde(default)]
    pub modules_dir: Option<String>,
    /// Keyed by module name, e.g. `otel_core`.
    #[serde(default)]
    pub modules: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Base directory for relative paths (log files). Empty means the working directory.
    #[serde(default)]
    pub home_dir: String,
    pub host: String,
    pub port: u16,
    /// Global path prefix every route is served under, e.g. "/api".
    #[serde(default)]
    pub global_prefix: Option<String>,
    #[serde(default)]
    pub timeout_sec: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            home_dir: String::new(),
            host: "127.0.0.1".to_string(),
            port: 8087,
            global_prefix: None,
            timeout_sec: 0,
        }
    }
}

/// Where and how the OpenTelemetry SDK providers export.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfig {
    /// `service.name` resource attribute.
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// OTLP gRPC endpoint (e.g. "http://localhost:4317"); no export when absent.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
    /// Periodic metric export interval.
    #[serde(default = "default_export_interval", with = "humantime_serde")]
    pub export_interval: Duration,
}

fn default_service_name() -> String {
    "otel-server".to_string()
}

fn default_export_interval() -> Duration {
    Duration::from_secs(60)
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            otlp_endpoint: None,
            export_interval: default_export_interval(),
        }
    }
}

/// Subsystem (crate name) → logging section. `"default"` catches every
/// target no other section claims.
pub type LoggingConfig = HashMap<String, Section>;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Section {
    /// "trace" | "debug" | "info" | "warn" | "error" | "off"
    pub console_level: String,
    /// Relative to `server.home_dir`; empty disables the file sink.
    pub file: String,
    #[serde(default)]
    pub file_level: String,
    #[serde(default)]
    pub max_backups: Option<usize>,
    #[serde(default)]
    pub max_size_mb: Option<u64>,
}

pub fn default_logging_config() -> LoggingConfig {
    HashMap::from([(
        "default".to_string(),
        Section {
            console_level: "info".to_string(),
            file: "logs/otel-server.log".to_string(),
            file_level: "debug".to_string(),
            max_backups: Some(3),
            max_size_mb: Some(100),
        },
    )])
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            logging: Some(default_logging_config()),
            telemetry: Some(TelemetryConfig::default()),
            ..Self::bare()
        }
    }
}

impl AppConfig {
    /// Defaults used underneath a config file: optional sections stay `None`
    /// unless the file or the environment provides them.
    fn bare() -> Self {
        Self {
            server: ServerConfig::default(),
            logging: None,
            telemetry: None,
            modules_dir: None,
            modules: HashMap::new(),
        }
    }

    /// defaults → YAML file → `APP__*` environment, then `modules_dir` files.
    /// A missing file is an error rather than silently yielding defaults.
    pub fn load_layered<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let path = config_path.as_ref();
        if !path.is_file() {
            bail!("config file not found: {}", path.display());
        }

        let mut config: AppConfig = Figment::new()
            .merge(Serialized::defaults(Self::bare()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .with_context(|| format!("invalid config {}", path.display()))?;

        if let Some(dir) = config.modules_dir.clone() {
            merge_module_files(&mut config.modules, dir)?;
        }
        Ok(config)
    }

    pub fn load_or_default<P: AsRef<Path>>(config_path: Option<P>) -> Result<Self> {
        config_path.map_or_else(|| Ok(Self::default()), Self::load_layered)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize config to YAML")
    }

    /// Base directory for relative paths.
    pub fn home_dir(&self) -> PathBuf {
        match self.server.home_dir.trim() {
            "" => PathBuf::from("."),
            dir => PathBuf::from(dir),
        }
    }

    /// `--port` replaces `server.port`; each `-v` raises the default console
    /// level one step (debug, then trace).
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(port) = args.port {
            self.server.port = port;
        }

        let level = match args.verbose {
            0 => return,
            1 => "debug",
            _ => "trace",
        };
        let logging = self.logging.get_or_insert_with(default_logging_config);
        if let Some(section) = logging.get_mut("default") {
            section.console_level = level.to_string();
        }
    }
}

/// CLI values the config layer cares about.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config: Option<String>,
    pub port: Option<u16>,
    pub print_config: bool,
    pub verbose: u8,
}

/// Read-only view over the per-module configuration bag.
#[derive(Debug, Clone)]
pub struct AppConfigProvider(AppConfig);

impl AppConfigProvider {
    pub fn new(config: AppConfig) -> Self {
        Self(config)
    }

    pub fn get_module_config(&self, module_name: &str) -> Option<&serde_json::Value> {
        self.0.modules.get(module_name)
    }
}

/// Each `<name>.yaml` / `<name>.yml` in `dir` becomes `modules.<name>`,
/// replacing an inline section of the same name. A missing directory is ignored.
fn merge_module_files(
    bag: &mut HashMap<String, serde_json::Value>,
    dir: impl AsRef<Path>,
) -> Result<()> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        tracing::debug!(dir = %dir.display(), "modules_dir does not exist, skipping");
        return Ok(());
    }

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));
        let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if !path.is_file() || !is_yaml {
            continue;
        }

        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("reading module config {}", path.display()))?;
        let value: serde_yaml::Value = serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing module config {}", path.display()))?;
        if bag
            .insert(name.to_string(), serde_json::to_value(value)?)
            .is_some()
        {
            tracing::debug!(module = name, "module file overrides inline section");
        }
    }
    Ok(())
}
